//! Keyword correction of the model's label.
//!
//! The model was fine-tuned on a small, skewed dataset and tends to call short
//! social messages productive. Two keyword buckets veto the most obvious
//! mistakes: when one bucket clearly dominates (at least two distinct hits and
//! more than the other bucket) it decides the label.
//!
//! The finer [`KeywordCategory`] table never changes the label. It only picks
//! the reply subtype once the label is final.

use serde::Serialize;
use unicode_normalization::UnicodeNormalization;

use crate::types::Label;

/// Greetings, holiday wishes, congratulations, gratitude and small talk.
pub const SOCIAL_KEYWORDS: &[&str] = &[
    "aniversário",
    "parabéns",
    "felicidades",
    "feliz",
    "saúde",
    "muitos anos",
    "natal",
    "ano novo",
    "páscoa",
    "boas festas",
    "feriado",
    "férias",
    "fim de semana",
    "bom dia",
    "boa tarde",
    "boa noite",
    "olá",
    "abraço",
    "obrigado",
    "obrigada",
    "agradeço",
    "agradecemos",
    "happy birthday",
    "congratulations",
    "merry christmas",
    "happy new year",
    "good morning",
    "thank you",
];

/// Meetings, deadlines, failures, money and request verbs.
pub const WORK_KEYWORDS: &[&str] = &[
    "reunião",
    "prazo",
    "erro",
    "falha",
    "bug",
    "problema",
    "crítico",
    "urgente",
    "sistema",
    "projeto",
    "orçamento",
    "cotação",
    "proposta",
    "contrato",
    "fatura",
    "pagamento",
    "relatório",
    "documento",
    "solicito",
    "solicitação",
    "preciso",
    "necessito",
    "requer",
    "suporte",
    "status",
    "agendar",
    "deadline",
    "meeting",
    "budget",
    "invoice",
    "request",
];

/// Minimum distinct hits before a bucket may override the model.
pub const MIN_MATCHES: usize = 2;

/// Lower-cased, NFC-normalized copy of `text` used for keyword containment.
pub fn fold(text: &str) -> String {
    text.nfc().collect::<String>().to_lowercase()
}

fn count_hits(folded: &str, keywords: &[&str]) -> usize {
    keywords.iter().filter(|kw| folded.contains(*kw)).count()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Correction {
    pub label: Label,
    pub applied: bool,
    pub social_matches: usize,
    pub work_matches: usize,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct KeywordCorrector {
    social: Vec<String>,
    work: Vec<String>,
    min_matches: usize,
}

impl Default for KeywordCorrector {
    fn default() -> Self {
        Self::new(SOCIAL_KEYWORDS, WORK_KEYWORDS, MIN_MATCHES)
    }
}

impl KeywordCorrector {
    pub fn new(social: &[&str], work: &[&str], min_matches: usize) -> Self {
        Self {
            social: social.iter().map(|k| fold(k)).collect(),
            work: work.iter().map(|k| fold(k)).collect(),
            min_matches,
        }
    }

    /// Distinct (social, work) keyword hits in `text`.
    pub fn score(&self, text: &str) -> (usize, usize) {
        let folded = fold(text);
        let social = self.social.iter().filter(|kw| folded.contains(kw.as_str())).count();
        let work = self.work.iter().filter(|kw| folded.contains(kw.as_str())).count();
        (social, work)
    }

    pub fn correct(&self, original_text: &str, model_label: Label, model_confidence: f64) -> Correction {
        let (social, work) = self.score(original_text);

        let verdict = if social > work && social >= self.min_matches {
            Some(Label::Improdutivo)
        } else if work > social && work >= self.min_matches {
            Some(Label::Produtivo)
        } else {
            None
        };

        let (label, reason) = match verdict {
            Some(label) if label != model_label => (
                label,
                format!(
                    "Modelo indicou {model_label} ({:.1}%), corrigido para {label}: {social} termo(s) social(is) contra {work} de trabalho.",
                    model_confidence * 100.0
                ),
            ),
            Some(label) => (
                label,
                format!(
                    "Modelo indicou {model_label} ({:.1}%), confirmado por palavras-chave: {social} termo(s) social(is) contra {work} de trabalho.",
                    model_confidence * 100.0
                ),
            ),
            None => (
                model_label,
                format!(
                    "Modelo indicou {model_label} ({:.1}%); palavras-chave inconclusivas ({social} social(is), {work} de trabalho).",
                    model_confidence * 100.0
                ),
            ),
        };

        let applied = label != model_label;
        if applied {
            tracing::debug!(%model_label, %label, social, work, "Keyword correction applied");
        }

        Correction {
            label,
            applied,
            social_matches: social,
            work_matches: work,
            reason,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Birthday,
    Holiday,
    Greeting,
    Gratitude,
    Informational,
    ActionRequest,
    UrgentProblem,
    Reminder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    SocialGreeting,
    Acknowledgment,
    Information,
    ActionRequired,
    UrgentAction,
    Reminder,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeywordCategory {
    pub intent: Intent,
    pub name: &'static str,
    pub keywords: &'static [&'static str],
    pub priority: f32,
    pub response_type: ResponseType,
    /// Only considered when the final label matches.
    pub label: Label,
}

pub static KEYWORD_CATEGORIES: &[KeywordCategory] = &[
    KeywordCategory {
        intent: Intent::Birthday,
        name: "aniversario_parabens",
        keywords: &["aniversário", "parabéns", "felicidades", "muitos anos", "happy birthday", "congratulations"],
        priority: 1.0,
        response_type: ResponseType::SocialGreeting,
        label: Label::Improdutivo,
    },
    KeywordCategory {
        intent: Intent::Holiday,
        name: "feriado_festas",
        keywords: &["natal", "ano novo", "páscoa", "boas festas", "feriado", "férias", "fim de semana", "merry christmas", "happy new year"],
        priority: 0.9,
        response_type: ResponseType::SocialGreeting,
        label: Label::Improdutivo,
    },
    KeywordCategory {
        intent: Intent::Gratitude,
        name: "agradecimento",
        keywords: &["obrigado", "obrigada", "valeu", "agradeço", "agradecemos", "grato", "grata", "thank you"],
        priority: 0.9,
        response_type: ResponseType::Acknowledgment,
        label: Label::Improdutivo,
    },
    KeywordCategory {
        intent: Intent::Informational,
        name: "informacao_geral",
        keywords: &["informar", "comunicar", "avisar", "notificar", "divulgar", "comunicado"],
        priority: 0.8,
        response_type: ResponseType::Information,
        label: Label::Improdutivo,
    },
    KeywordCategory {
        intent: Intent::Greeting,
        name: "saudacao",
        keywords: &["bom dia", "boa tarde", "boa noite", "olá", "abraço", "good morning"],
        priority: 0.6,
        response_type: ResponseType::SocialGreeting,
        label: Label::Improdutivo,
    },
    KeywordCategory {
        intent: Intent::UrgentProblem,
        name: "problema_urgencia",
        keywords: &["problema", "erro", "falha", "crítico", "emergência", "bug", "sistema", "urgente", "fora do ar"],
        priority: 0.9,
        response_type: ResponseType::UrgentAction,
        label: Label::Produtivo,
    },
    KeywordCategory {
        intent: Intent::Reminder,
        name: "lembrete_agendamento",
        keywords: &["lembrar", "lembrete", "agenda", "horário", "data", "deadline", "prazo"],
        priority: 0.8,
        response_type: ResponseType::Reminder,
        label: Label::Produtivo,
    },
    KeywordCategory {
        intent: Intent::ActionRequest,
        name: "solicitacao_acao",
        keywords: &["preciso", "solicito", "requer", "necessito", "reunião", "projeto", "proposta", "orçamento", "relatório", "documento", "request"],
        priority: 0.7,
        response_type: ResponseType::ActionRequired,
        label: Label::Produtivo,
    },
];

impl KeywordCategory {
    pub fn for_intent(intent: Intent) -> &'static KeywordCategory {
        KEYWORD_CATEGORIES
            .iter()
            .find(|c| c.intent == intent)
            .unwrap_or(&KEYWORD_CATEGORIES[0])
    }
}

/// Picks the reply subtype for an already decided label.
///
/// Most distinct hits wins; ties go to the higher priority, then to the
/// earlier table entry. `None` when nothing of that label matches.
pub fn detect_intent(text: &str, label: Label) -> Option<&'static KeywordCategory> {
    let folded = fold(text);
    let mut best: Option<(&'static KeywordCategory, usize)> = None;
    for category in KEYWORD_CATEGORIES.iter().filter(|c| c.label == label) {
        let hits = count_hits(&folded, category.keywords);
        if hits == 0 {
            continue;
        }
        let better = match best {
            None => true,
            Some((current, current_hits)) => {
                hits > current_hits || (hits == current_hits && category.priority > current.priority)
            }
        };
        if better {
            best = Some((category, hits));
        }
    }
    best.map(|(category, _)| category)
}
