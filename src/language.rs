//! Language detection and translation in front of the classifier.
//!
//! Everything here is best effort: a failing detector or translator leaves the
//! text untouched and the pipeline carries on with the original input.

use async_trait::async_trait;
use dashmap::DashMap;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use whatlang::Lang;
use xxhash_rust::xxh3::xxh3_64;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum DetectionError {
    #[error("language could not be detected")]
    Undetermined,
    #[error("detected language {0} has no two-letter code")]
    Unsupported(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TranslationError {
    #[error("translation is disabled")]
    Disabled,
    #[error("translation timed out after {0:?}")]
    Timeout(Duration),
    #[error("translation request failed: {0}")]
    Request(String),
    #[error("unexpected translation response: {0}")]
    Malformed(String),
}

pub trait LanguageDetector: Send + Sync {
    /// Returns an ISO 639-1 code.
    fn detect(&self, text: &str) -> Result<String, DetectionError>;
}

#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, from: &str, to: &str) -> Result<String, TranslationError>;
}

/// Trigram-statistics detector backed by `whatlang`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WhatlangDetector;

impl LanguageDetector for WhatlangDetector {
    fn detect(&self, text: &str) -> Result<String, DetectionError> {
        let info = whatlang::detect(text).ok_or(DetectionError::Undetermined)?;
        if !info.is_reliable() {
            tracing::debug!(lang = info.lang().code(), confidence = info.confidence(), "Unreliable language guess");
        }
        iso_639_1(info.lang())
            .map(str::to_string)
            .ok_or_else(|| DetectionError::Unsupported(info.lang().code().to_string()))
    }
}

fn iso_639_1(lang: Lang) -> Option<&'static str> {
    Some(match lang {
        Lang::Por => "pt",
        Lang::Eng => "en",
        Lang::Spa => "es",
        Lang::Fra => "fr",
        Lang::Ita => "it",
        Lang::Deu => "de",
        Lang::Nld => "nl",
        Lang::Cat => "ca",
        Lang::Ron => "ro",
        Lang::Pol => "pl",
        Lang::Rus => "ru",
        Lang::Ukr => "uk",
        Lang::Tur => "tr",
        Lang::Swe => "sv",
        Lang::Dan => "da",
        Lang::Nob => "no",
        Lang::Fin => "fi",
        Lang::Ces => "cs",
        Lang::Hun => "hu",
        Lang::Ell => "el",
        Lang::Ara => "ar",
        Lang::Heb => "he",
        Lang::Hin => "hi",
        Lang::Jpn => "ja",
        Lang::Kor => "ko",
        Lang::Cmn => "zh",
        Lang::Vie => "vi",
        Lang::Ind => "id",
        _ => return None,
    })
}

/// Used when no translation backend is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledTranslator;

#[async_trait]
impl Translator for DisabledTranslator {
    async fn translate(&self, _text: &str, _from: &str, _to: &str) -> Result<String, TranslationError> {
        Err(TranslationError::Disabled)
    }
}

/// Google Cloud Translation (v2 REST) client with an in-memory cache.
pub struct GoogleTranslator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    timeout: Duration,
    cache: DashMap<u64, String>, // hash -> translation
    cache_capacity: usize,
}

impl GoogleTranslator {
    pub fn new(
        endpoint: String,
        api_key: String,
        timeout: Duration,
        cache_capacity: usize,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            api_key,
            timeout,
            cache: DashMap::new(),
            cache_capacity,
        })
    }

    fn cache_key(text: &str, from: &str, to: &str) -> u64 {
        xxh3_64(format!("{from}::{to}::{text}").as_bytes())
    }

    /// Keeps at most `cache_capacity` translations; a full cache is dropped
    /// wholesale. A capacity of 0 disables caching.
    fn remember(&self, hash: u64, translated: &str) {
        if self.cache_capacity == 0 {
            return;
        }
        if self.cache.len() >= self.cache_capacity && !self.cache.contains_key(&hash) {
            tracing::debug!(entries = self.cache.len(), "Translation cache full, clearing");
            self.cache.clear();
        }
        self.cache.insert(hash, translated.to_string());
    }
}

#[async_trait]
impl Translator for GoogleTranslator {
    #[tracing::instrument(skip(self, text), fields(chars = text.chars().count()))]
    async fn translate(&self, text: &str, from: &str, to: &str) -> Result<String, TranslationError> {
        let hash = Self::cache_key(text, from, to);
        if let Some(hit) = self.cache.get(&hash) {
            return Ok(hit.clone());
        }

        let resp = self
            .client
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .form(&[("q", text), ("source", from), ("target", to), ("format", "text")])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TranslationError::Timeout(self.timeout)
                } else {
                    TranslationError::Request(e.to_string())
                }
            })?
            .error_for_status()
            .map_err(|e| TranslationError::Request(e.to_string()))?;

        let value: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| TranslationError::Malformed(e.to_string()))?;
        let translated = value["data"]["translations"][0]["translatedText"]
            .as_str()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| TranslationError::Malformed(value.to_string()))?
            .to_string();

        self.remember(hash, &translated);
        Ok(translated)
    }
}

#[derive(Debug, Clone)]
pub struct NormalizerConfig {
    pub target_language: String,
    pub fallback_language: String,
    pub min_detection_chars: usize,
    pub translation_timeout: Duration,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            target_language: "pt".to_string(),
            fallback_language: "en".to_string(),
            min_detection_chars: 10,
            translation_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub text: String,
    pub original_language: String,
    pub was_translated: bool,
}

/// Brings input text into the classifier's language.
pub struct LanguageNormalizer {
    detector: Arc<dyn LanguageDetector>,
    translator: Arc<dyn Translator>,
    config: NormalizerConfig,
}

impl LanguageNormalizer {
    pub fn new(
        detector: Arc<dyn LanguageDetector>,
        translator: Arc<dyn Translator>,
        config: NormalizerConfig,
    ) -> Self {
        Self {
            detector,
            translator,
            config,
        }
    }

    pub fn target_language(&self) -> &str {
        &self.config.target_language
    }

    pub fn detect(&self, text: &str) -> String {
        if text.trim().chars().count() < self.config.min_detection_chars {
            return self.config.fallback_language.clone();
        }
        match self.detector.detect(text) {
            Ok(lang) => lang,
            Err(err) => {
                tracing::debug!(error = %err, fallback = %self.config.fallback_language, "Language detection failed");
                self.config.fallback_language.clone()
            }
        }
    }

    #[tracing::instrument(skip(self, text))]
    pub async fn normalize(&self, text: &str) -> Normalized {
        let original_language = self.detect(text);
        if original_language == self.config.target_language {
            return Normalized {
                text: text.to_string(),
                original_language,
                was_translated: false,
            };
        }

        match self
            .translate(text, &original_language, &self.config.target_language)
            .await
        {
            Ok(translated) => {
                tracing::debug!(from = %original_language, to = %self.config.target_language, "Input translated");
                Normalized {
                    text: translated,
                    original_language,
                    was_translated: true,
                }
            }
            Err(_) => Normalized {
                text: text.to_string(),
                original_language,
                was_translated: false,
            },
        }
    }

    /// Translates with the configured timeout. Failures are logged and counted
    /// here, so callers only need to pick a fallback.
    pub async fn translate(&self, text: &str, from: &str, to: &str) -> Result<String, TranslationError> {
        let result = match tokio::time::timeout(
            self.config.translation_timeout,
            self.translator.translate(text, from, to),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TranslationError::Timeout(self.config.translation_timeout)),
        };

        match result {
            Err(TranslationError::Disabled) => Err(TranslationError::Disabled),
            Err(err) => {
                counter!("translation_failures_total").increment(1);
                tracing::warn!(error = %err, %from, %to, "Translation failed, keeping original text");
                Err(err)
            }
            ok => ok,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) struct FixedDetector(pub &'static str);

    impl LanguageDetector for FixedDetector {
        fn detect(&self, _text: &str) -> Result<String, DetectionError> {
            Ok(self.0.to_string())
        }
    }

    struct FailingDetector;

    impl LanguageDetector for FailingDetector {
        fn detect(&self, _text: &str) -> Result<String, DetectionError> {
            Err(DetectionError::Undetermined)
        }
    }

    /// Prefixes the text with the target language and counts calls.
    #[derive(Default)]
    pub(crate) struct TaggingTranslator {
        pub calls: AtomicUsize,
    }

    #[async_trait]
    impl Translator for TaggingTranslator {
        async fn translate(&self, text: &str, _from: &str, to: &str) -> Result<String, TranslationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("[{to}] {text}"))
        }
    }

    struct BrokenTranslator;

    #[async_trait]
    impl Translator for BrokenTranslator {
        async fn translate(&self, _text: &str, _from: &str, _to: &str) -> Result<String, TranslationError> {
            Err(TranslationError::Request("connection refused".to_string()))
        }
    }

    struct SlowTranslator;

    #[async_trait]
    impl Translator for SlowTranslator {
        async fn translate(&self, text: &str, _from: &str, _to: &str) -> Result<String, TranslationError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(text.to_string())
        }
    }

    fn normalizer(detector: impl LanguageDetector + 'static, translator: Arc<dyn Translator>) -> LanguageNormalizer {
        LanguageNormalizer::new(
            Arc::new(detector),
            translator,
            NormalizerConfig {
                translation_timeout: Duration::from_millis(50),
                ..NormalizerConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn target_language_passes_through() {
        let translator = Arc::new(TaggingTranslator::default());
        let n = normalizer(FixedDetector("pt"), translator.clone());
        let out = n.normalize("Preciso do relatório até amanhã.").await;
        assert_eq!(out.text, "Preciso do relatório até amanhã.");
        assert_eq!(out.original_language, "pt");
        assert!(!out.was_translated);
        assert_eq!(translator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn foreign_text_is_translated() {
        let n = normalizer(FixedDetector("en"), Arc::new(TaggingTranslator::default()));
        let out = n.normalize("Please send the budget report by Friday.").await;
        assert_eq!(out.text, "[pt] Please send the budget report by Friday.");
        assert_eq!(out.original_language, "en");
        assert!(out.was_translated);
    }

    #[tokio::test]
    async fn short_text_uses_fallback_language() {
        let n = normalizer(FixedDetector("pt"), Arc::new(TaggingTranslator::default()));
        assert_eq!(n.detect("Oi!"), "en");
        assert_eq!(n.detect("Bom dia a todos da equipe"), "pt");
    }

    #[tokio::test]
    async fn detection_failure_uses_fallback_language() {
        let n = normalizer(FailingDetector, Arc::new(TaggingTranslator::default()));
        assert_eq!(n.detect("1234567890 !!! ???"), "en");
    }

    #[tokio::test]
    async fn translator_error_keeps_original_text() {
        let n = normalizer(FixedDetector("en"), Arc::new(BrokenTranslator));
        let out = n.normalize("Please send the report.").await;
        assert_eq!(out.text, "Please send the report.");
        assert!(!out.was_translated);
    }

    #[tokio::test]
    async fn translator_timeout_keeps_original_text() {
        let n = normalizer(FixedDetector("es"), Arc::new(SlowTranslator));
        let out = n.normalize("Necesito el informe mañana.").await;
        assert_eq!(out.text, "Necesito el informe mañana.");
        assert_eq!(out.original_language, "es");
        assert!(!out.was_translated);
    }

    #[tokio::test]
    async fn disabled_translator_is_a_pass_through() {
        let n = normalizer(FixedDetector("en"), Arc::new(DisabledTranslator));
        let out = n.normalize("Happy birthday to the whole team!").await;
        assert!(!out.was_translated);
        assert_eq!(out.text, "Happy birthday to the whole team!");
    }

    #[test]
    fn whatlang_recognizes_portuguese() {
        let lang = WhatlangDetector
            .detect("Bom dia, preciso de uma reunião urgente sobre o orçamento do projeto deste ano.")
            .unwrap();
        assert_eq!(lang, "pt");
    }

    #[test]
    fn translation_cache_stays_within_capacity() {
        let translator = GoogleTranslator::new(
            "http://127.0.0.1:9/translate".to_string(),
            "key".to_string(),
            Duration::from_secs(1),
            3,
        )
        .unwrap();

        for i in 0..10u64 {
            translator.remember(i, &format!("texto {i}"));
            assert!(translator.cache.len() <= 3);
        }
        assert_eq!(translator.cache.get(&9).as_deref().map(String::as_str), Some("texto 9"));
    }

    #[test]
    fn refreshing_a_cached_entry_keeps_the_others() {
        let translator = GoogleTranslator::new(
            "http://127.0.0.1:9/translate".to_string(),
            "key".to_string(),
            Duration::from_secs(1),
            3,
        )
        .unwrap();
        for i in 1..=3u64 {
            translator.remember(i, "x");
        }
        translator.remember(2, "y");
        assert_eq!(translator.cache.len(), 3);
        assert!(translator.cache.contains_key(&1) && translator.cache.contains_key(&3));
    }

    #[test]
    fn zero_capacity_disables_cache() {
        let translator = GoogleTranslator::new(
            "http://127.0.0.1:9/translate".to_string(),
            "key".to_string(),
            Duration::from_secs(1),
            0,
        )
        .unwrap();
        translator.remember(1, "hello");
        assert!(translator.cache.is_empty());
    }

    #[test]
    fn cache_key_depends_on_direction() {
        assert_ne!(
            GoogleTranslator::cache_key("olá", "pt", "en"),
            GoogleTranslator::cache_key("olá", "en", "pt")
        );
    }
}
