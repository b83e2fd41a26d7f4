use metrics::counter;
use std::sync::Arc;

use crate::correction::{KeywordCategory, KeywordCorrector, detect_intent};
use crate::engine::{Classifier, ClassifierError, ModelStatus};
use crate::language::LanguageNormalizer;
use crate::reply::{Priority, ReplySelector};
use crate::types::{Category, ClassificationResult, LanguageInfo, ReplyRecord, Scores, Tone};

pub const NO_CONTENT_EXPLANATION: &str = "Nenhum conteúdo recebido para análise.";

/// Result of one `classify_and_reply` call.
#[derive(Debug, Clone, PartialEq)]
pub struct Triage {
    pub result: ClassificationResult,
    pub reply: ReplyRecord,
    /// Keyword table entry that picked the reply template.
    pub subtype: Option<&'static KeywordCategory>,
}

/// Normalize → classify → correct → reply.
pub struct Pipeline {
    normalizer: LanguageNormalizer,
    classifier: Arc<dyn Classifier>,
    corrector: KeywordCorrector,
    replies: ReplySelector,
    back_translate: bool,
}

/// Collapses whitespace runs and trims.
pub fn preprocess(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl Pipeline {
    pub fn new(
        normalizer: LanguageNormalizer,
        classifier: Arc<dyn Classifier>,
        corrector: KeywordCorrector,
        replies: ReplySelector,
    ) -> Self {
        Self {
            normalizer,
            classifier,
            corrector,
            replies,
            back_translate: false,
        }
    }

    pub fn with_back_translation(mut self, enabled: bool) -> Self {
        self.back_translate = enabled;
        self
    }

    pub fn model_status(&self) -> ModelStatus {
        self.classifier.status()
    }

    pub async fn classify(&self, content: &str) -> ClassificationResult {
        self.classify_text(&preprocess(content)).await
    }

    /// `text` must already be preprocessed.
    #[tracing::instrument(skip(self, text), fields(chars = text.chars().count()))]
    async fn classify_text(&self, text: &str) -> ClassificationResult {
        if text.is_empty() {
            tracing::debug!("Empty input, returning default result");
            return ClassificationResult {
                category: Category::Improdutivo,
                model_category: Category::Improdutivo,
                model_confidence: 0.0,
                confidence: 0.0,
                scores: Scores::uniform(),
                correction_applied: false,
                explanation: NO_CONTENT_EXPLANATION.to_string(),
                language: LanguageInfo {
                    original_language: self.normalizer.target_language().to_string(),
                    was_translated: false,
                },
            };
        }

        let normalized = self.normalizer.normalize(text).await;
        let language = LanguageInfo {
            original_language: normalized.original_language.clone(),
            was_translated: normalized.was_translated,
        };

        let prediction = match self.classifier.classify(&normalized.text).await {
            Ok(prediction) => prediction,
            Err(err) => {
                counter!("classifier_failures_total").increment(1);
                tracing::error!(error = %err, "Classification failed");
                return ClassificationResult {
                    category: Category::Erro,
                    model_category: Category::Erro,
                    model_confidence: 0.0,
                    confidence: 0.0,
                    scores: Scores::zero(),
                    correction_applied: false,
                    explanation: failure_explanation(&err),
                    language,
                };
            }
        };

        let correction = self
            .corrector
            .correct(text, prediction.label, prediction.confidence);
        if correction.applied {
            counter!("keyword_corrections_total").increment(1);
        }

        ClassificationResult {
            category: correction.label.into(),
            model_category: prediction.label.into(),
            model_confidence: prediction.confidence,
            confidence: prediction.scores.get(correction.label),
            scores: prediction.scores,
            correction_applied: correction.applied,
            explanation: correction.reason,
            language,
        }
    }

    pub async fn classify_and_reply(&self, content: &str, tone: Tone) -> Triage {
        let text = preprocess(content);
        let result = self.classify_text(&text).await;
        counter!("classifications_total", "category" => result.category.as_str()).increment(1);

        if text.is_empty() {
            return Triage {
                result,
                reply: ReplyRecord {
                    text: String::new(),
                    confidence: 0.0,
                    reasoning: NO_CONTENT_EXPLANATION.to_string(),
                },
                subtype: None,
            };
        }

        let (reply, subtype) = match result.category.label() {
            None => (self.replies.select_reply(Category::Erro, tone), None),
            Some(label) => {
                let subtype = detect_intent(&text, label);
                let intent = subtype.map(|c| c.intent);
                let priority = Priority::infer(intent, result.model_confidence);
                (self.replies.select(result.category, tone, intent, priority), subtype)
            }
        };

        let reply = if self.back_translate && result.language.was_translated {
            self.back_translate_reply(reply, &result.language.original_language)
                .await
        } else {
            reply
        };

        tracing::info!(
            category = %result.category,
            correction_applied = result.correction_applied,
            confidence = result.confidence,
            "Email triaged"
        );

        Triage {
            result,
            reply,
            subtype,
        }
    }

    async fn back_translate_reply(&self, reply: ReplyRecord, language: &str) -> ReplyRecord {
        match self
            .normalizer
            .translate(&reply.text, self.normalizer.target_language(), language)
            .await
        {
            Ok(text) => ReplyRecord {
                text,
                reasoning: format!("{} Traduzida para {language}.", reply.reasoning),
                ..reply
            },
            Err(_) => reply,
        }
    }
}

fn failure_explanation(err: &ClassifierError) -> String {
    match err {
        ClassifierError::Unavailable(reason) => {
            format!("Modelo de classificação indisponível: {reason}")
        }
        ClassifierError::Timeout(after) => {
            format!("A classificação excedeu o tempo limite de {:.1}s.", after.as_secs_f64())
        }
        ClassifierError::Inference(reason) => format!("Falha ao executar o modelo: {reason}"),
    }
}
