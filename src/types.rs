use serde::{Deserialize, Serialize};
use std::fmt;

use crate::correction::{Intent, KeywordCategory, ResponseType};

/// Label the model and the keyword corrector can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    Produtivo,
    Improdutivo,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Produtivo => "Produtivo",
            Label::Improdutivo => "Improdutivo",
        }
    }

    /// Maps a label string from a model's `id2label` table.
    pub fn from_model_label(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "produtivo" | "productive" | "label_1" | "1" => Some(Label::Produtivo),
            "improdutivo" | "unproductive" | "label_0" | "0" => Some(Label::Improdutivo),
            _ => None,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final category of a triaged email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Produtivo,
    Improdutivo,
    Erro,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Produtivo => "Produtivo",
            Category::Improdutivo => "Improdutivo",
            Category::Erro => "Erro",
        }
    }

    pub fn label(&self) -> Option<Label> {
        match self {
            Category::Produtivo => Some(Label::Produtivo),
            Category::Improdutivo => Some(Label::Improdutivo),
            Category::Erro => None,
        }
    }
}

impl From<Label> for Category {
    fn from(label: Label) -> Self {
        match label {
            Label::Produtivo => Category::Produtivo,
            Label::Improdutivo => Category::Improdutivo,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Probability per label. Both entries are always present.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    #[serde(rename = "Produtivo")]
    pub produtivo: f64,
    #[serde(rename = "Improdutivo")]
    pub improdutivo: f64,
}

impl Scores {
    /// Builds a distribution from raw (non-negative) weights, rescaled to sum to 1.
    /// A degenerate input yields the uniform distribution.
    pub fn normalized(produtivo: f64, improdutivo: f64) -> Self {
        let produtivo = if produtivo.is_finite() { produtivo.max(0.0) } else { 0.0 };
        let improdutivo = if improdutivo.is_finite() { improdutivo.max(0.0) } else { 0.0 };
        let total = produtivo + improdutivo;
        if total <= f64::EPSILON {
            return Self::uniform();
        }
        Self {
            produtivo: produtivo / total,
            improdutivo: improdutivo / total,
        }
    }

    pub fn uniform() -> Self {
        Self {
            produtivo: 0.5,
            improdutivo: 0.5,
        }
    }

    /// Scores reported when no classification could be made.
    pub fn zero() -> Self {
        Self {
            produtivo: 0.0,
            improdutivo: 0.0,
        }
    }

    pub fn get(&self, label: Label) -> f64 {
        match label {
            Label::Produtivo => self.produtivo,
            Label::Improdutivo => self.improdutivo,
        }
    }

    pub fn argmax(&self) -> Label {
        if self.produtivo > self.improdutivo {
            Label::Produtivo
        } else {
            Label::Improdutivo
        }
    }
}

/// Output of the neural classifier for one text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPrediction {
    pub label: Label,
    pub confidence: f64,
    pub scores: Scores,
}

impl ModelPrediction {
    pub fn from_scores(scores: Scores) -> Self {
        let label = scores.argmax();
        Self {
            label,
            confidence: scores.get(label),
            scores,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LanguageInfo {
    pub original_language: String,
    pub was_translated: bool,
}

/// Outcome of one classification call. Built once and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub category: Category,
    pub model_category: Category,
    pub model_confidence: f64,
    pub confidence: f64,
    pub scores: Scores,
    pub correction_applied: bool,
    pub explanation: String,
    pub language: LanguageInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplyRecord {
    pub text: String,
    pub confidence: f64,
    pub reasoning: String,
}

/// Reply register requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    #[default]
    Professional,
    Friendly,
    Formal,
}

impl Tone {
    /// Unknown tones fall back to professional.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "friendly" | "amigável" | "amigavel" => Tone::Friendly,
            "formal" => Tone::Formal,
            _ => Tone::Professional,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tone::Professional => "profissional",
            Tone::Friendly => "amigável",
            Tone::Formal => "formal",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifyRequest {
    #[serde(alias = "content")]
    pub text: String,
    #[serde(default)]
    pub tone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifyAndReplyResponse {
    pub id: String,
    pub created: i64,
    pub category: Category,
    pub confidence: f64,
    pub scores: Scores,
    pub explanation: String,
    pub correction_applied: bool,
    pub reply: String,
    pub reply_confidence: f64,
    pub reply_reasoning: String,
    pub model_category: Category,
    pub model_confidence: f64,
    /// Reply subtype picked from the keyword table, if any matched.
    pub intent: Option<Intent>,
    pub response_type: Option<ResponseType>,
    pub original_language: String,
    pub translated: bool,
}

impl ClassifyAndReplyResponse {
    pub fn new(
        result: ClassificationResult,
        reply: ReplyRecord,
        subtype: Option<&KeywordCategory>,
    ) -> Self {
        Self {
            id: format!("classify-{}", uuid::Uuid::new_v4().simple()),
            created: chrono::Utc::now().timestamp(),
            category: result.category,
            confidence: result.confidence,
            scores: result.scores,
            explanation: result.explanation,
            correction_applied: result.correction_applied,
            reply: reply.text,
            reply_confidence: reply.confidence,
            reply_reasoning: reply.reasoning,
            model_category: result.model_category,
            model_confidence: result.model_confidence,
            intent: subtype.map(|c| c.intent),
            response_type: subtype.map(|c| c.response_type),
            original_language: result.language.original_language,
            translated: result.language.was_translated,
        }
    }
}

/// Several emails triaged in one call.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchClassifyRequest {
    pub emails: Vec<ClassifyRequest>,
    /// Tone for emails that do not set their own.
    #[serde(default)]
    pub tone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchClassifyResponse {
    pub results: Vec<ClassifyAndReplyResponse>,
    pub total_processed: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_loaded: bool,
    pub model_status: String,
    pub version: &'static str,
    pub uptime_secs: f64,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
