use std::fmt;

use crate::correction::{Intent, KeywordCategory};
use crate::types::{Category, ReplyRecord, Tone};

pub const PRODUCTIVE_REPLY_CONFIDENCE: f64 = 0.90;
pub const UNPRODUCTIVE_REPLY_CONFIDENCE: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    High,
    Medium,
}

impl Priority {
    /// Urgent problems and confident predictions get high priority.
    pub fn infer(intent: Option<Intent>, model_confidence: f64) -> Self {
        if intent == Some(Intent::UrgentProblem) || model_confidence >= 0.8 {
            Priority::High
        } else {
            Priority::Medium
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::High => f.write_str("Alta"),
            Priority::Medium => f.write_str("Média"),
        }
    }
}

fn opening(tone: Tone) -> &'static str {
    match tone {
        Tone::Professional => "Prezado(a),",
        Tone::Friendly => "Olá!",
        Tone::Formal => "Exmo(a). Senhor(a),",
    }
}

fn closing(tone: Tone) -> &'static str {
    match tone {
        Tone::Professional => "Atenciosamente,\n{signature}",
        Tone::Friendly => "Abraços,\n{signature}",
        Tone::Formal => "Respeitosamente,\n{signature}",
    }
}

fn deadline(intent: Option<Intent>) -> &'static str {
    match intent {
        Some(Intent::UrgentProblem) => "4 horas úteis",
        Some(Intent::Reminder) => "até a data mencionada",
        _ => "24 horas úteis",
    }
}

fn body(category: Category, intent: Option<Intent>, tone: Tone) -> &'static str {
    use Intent::*;
    use Tone::*;

    match (category, intent, tone) {
        (Category::Produtivo, Some(UrgentProblem), Professional) => {
            "Problema identificado. Nossa equipe técnica foi notificada e está trabalhando na solução.\n\nPrioridade: {priority}\nPrazo para primeira resposta: {deadline}."
        }
        (Category::Produtivo, Some(UrgentProblem), Friendly) => {
            "Ops! Já avisamos o time técnico e vamos resolver isso rapidinho.\n\nPrioridade: {priority} | Retorno em até {deadline}."
        }
        (Category::Produtivo, Some(UrgentProblem), Formal) => {
            "Informamos que o problema relatado foi identificado e nossa equipe técnica foi imediatamente notificada. Estamos trabalhando na solução.\n\nPrioridade: {priority}\nPrazo para primeira resposta: {deadline}."
        }
        (Category::Produtivo, Some(Reminder), Professional) => {
            "Lembrete registrado. Confirmaremos o agendamento em breve.\n\nPrioridade: {priority}\nPrazo: {deadline}."
        }
        (Category::Produtivo, Some(Reminder), Friendly) => {
            "Perfeito, já anotei na agenda! Confirmo tudo em breve.\n\nPrioridade: {priority} | Prazo: {deadline}."
        }
        (Category::Produtivo, Some(Reminder), Formal) => {
            "Acusamos o recebimento do lembrete, que foi devidamente registrado. O agendamento será confirmado em breve.\n\nPrioridade: {priority}\nPrazo: {deadline}."
        }
        (Category::Produtivo, _, Professional) => {
            "Solicitação recebida. Vamos analisar e retornar em breve com as informações solicitadas.\n\nPrioridade: {priority}\nPrazo estimado de resposta: {deadline}."
        }
        (Category::Produtivo, _, Friendly) => {
            "Beleza, recebi seu pedido! Vou dar uma olhada e te retorno logo.\n\nPrioridade: {priority} | Retorno em até {deadline}."
        }
        (Category::Produtivo, _, Formal) => {
            "Acusamos o recebimento de sua solicitação, que está sendo processada pela equipe responsável. Retornaremos com as informações solicitadas.\n\nPrioridade: {priority}\nPrazo estimado de resposta: {deadline}."
        }
        (Category::Improdutivo, Some(Birthday), Professional) => {
            "Obrigado pela mensagem! Desejamos muitas felicidades e sucesso.\n\nNo momento, não há ação necessária de nossa parte."
        }
        (Category::Improdutivo, Some(Birthday), Friendly) => {
            "Que legal, muito obrigado pelo carinho! Muitas felicidades para você também! 🎉"
        }
        (Category::Improdutivo, Some(Birthday), Formal) => {
            "Agradecemos a gentil mensagem de felicitações. Desejamos igualmente muitas felicidades e prosperidade."
        }
        (Category::Improdutivo, Some(Holiday), Professional) => {
            "Obrigado pelos votos! A equipe agradece a consideração e deseja um excelente período a todos.\n\nNo momento, não há ação necessária de nossa parte."
        }
        (Category::Improdutivo, Some(Holiday), Friendly) => {
            "Valeu pelos votos! Aproveite bastante também! 🎊"
        }
        (Category::Improdutivo, Some(Holiday), Formal) => {
            "Agradecemos os votos recebidos e retribuímos os melhores desejos para o período."
        }
        (Category::Improdutivo, Some(Gratitude), Professional) => {
            "De nada! Ficamos felizes em poder ajudar e permanecemos à disposição."
        }
        (Category::Improdutivo, Some(Gratitude), Friendly) => "Por nada! Foi um prazer! 😊",
        (Category::Improdutivo, Some(Gratitude), Formal) => {
            "É um prazer poder auxiliar. Permanecemos à disposição para futuras demandas."
        }
        (Category::Improdutivo, Some(Informational), Professional) => {
            "Informação recebida e registrada. Obrigado pela comunicação."
        }
        (Category::Improdutivo, Some(Informational), Friendly) => {
            "Ok, anotado! Obrigado por avisar! 👍"
        }
        (Category::Improdutivo, Some(Informational), Formal) => {
            "Acusamos o recebimento da informação, que foi devidamente registrada. Agradecemos a comunicação."
        }
        (Category::Improdutivo, Some(Greeting), Professional) => {
            "Obrigado pela saudação! Desejamos um excelente dia de trabalho.\n\nNo momento, não há ação necessária de nossa parte."
        }
        (Category::Improdutivo, Some(Greeting), Friendly) => {
            "Oi! Obrigado pela mensagem, tenha um ótimo dia! 😊"
        }
        (Category::Improdutivo, Some(Greeting), Formal) => {
            "Agradecemos a cordial saudação e desejamos um excelente dia."
        }
        (Category::Improdutivo, _, Professional) => {
            "Agradecemos sua mensagem. No momento, não há ação necessária de nossa parte."
        }
        (Category::Improdutivo, _, Friendly) => {
            "Valeu pela mensagem! Por aqui não precisamos fazer nada agora. 😊"
        }
        (Category::Improdutivo, _, Formal) => {
            "Acusamos o recebimento de sua mensagem. Informamos que não há providências necessárias de nossa parte."
        }
        (Category::Erro, _, _) => {
            "Recebemos sua mensagem, mas não foi possível analisá-la automaticamente neste momento. Ela será encaminhada para triagem manual."
        }
    }
}

/// Canned replies keyed by category, reply subtype and tone.
#[derive(Debug, Clone)]
pub struct ReplySelector {
    signature: String,
}

impl Default for ReplySelector {
    fn default() -> Self {
        Self::new("Equipe de Atendimento")
    }
}

impl ReplySelector {
    pub fn new(signature: impl Into<String>) -> Self {
        Self {
            signature: signature.into(),
        }
    }

    /// Generic reply for a category, without subtype or inferred priority.
    pub fn select_reply(&self, category: Category, tone: Tone) -> ReplyRecord {
        self.select(category, tone, None, Priority::Medium)
    }

    pub fn select(
        &self,
        category: Category,
        tone: Tone,
        intent: Option<Intent>,
        priority: Priority,
    ) -> ReplyRecord {
        let template = format!("{}\n\n{}\n\n{}", opening(tone), body(category, intent, tone), closing(tone));
        let text = template
            .replace("{priority}", &priority.to_string())
            .replace("{deadline}", deadline(intent))
            .replace("{signature}", &self.signature);

        let confidence = match category {
            Category::Produtivo => PRODUCTIVE_REPLY_CONFIDENCE,
            Category::Improdutivo => UNPRODUCTIVE_REPLY_CONFIDENCE,
            Category::Erro => 0.0,
        };

        let subtype = intent
            .map(|i| KeywordCategory::for_intent(i).name)
            .unwrap_or("genérica");
        let reasoning = match category {
            Category::Erro => format!(
                "Classificação indisponível; resposta padrão de encaminhamento em tom {}.",
                tone.as_str()
            ),
            _ => format!(
                "E-mail {category} (modelo de resposta: {subtype}), tom {}.",
                tone.as_str()
            ),
        };

        ReplyRecord {
            text,
            confidence,
            reasoning,
        }
    }
}
