//! Multi-turn message-collection dialog, taken when the requested service
//! can't be reached.
//!
//! Uses JSON-mode chat completions with free-form object parsing rather
//! than a fixed response struct, since the model's output shape
//! (`{complete, info, next_question}`) is itself part of the contract with
//! the caller rather than a typed REST response.

use crate::ai::{AiClient, ChatMessage};
use crate::error::AppResult;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

pub const CLOSER_MESSAGE: &str =
    "Merci pour ces informations. Nous vous rappellerons dès que possible.";
const GENERIC_NEXT_QUESTION: &str = "Pouvez-vous me donner plus de détails ?";

const SCHEMA_HINT: &str = r#"Tu aides à recueillir un message pour un correspondant absent.
Réponds uniquement par un objet JSON de la forme exacte :
{"complete": bool, "info": {"name": string|null, "company": string|null, "subject": string|null}, "next_question": string}
"complete" est vrai seulement quand le nom, la société et le sujet ont tous été obtenus.
"next_question" est la prochaine question à poser à l'appelant si "complete" est faux."#;

/// The three fields the collector extracts: name, company, subject.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageInfo {
    pub name: Option<String>,
    pub company: Option<String>,
    pub subject: Option<String>,
}

impl MessageInfo {
    /// Shallow merge: a non-empty field in `other` overwrites the
    /// corresponding field here; empty/missing fields never erase existing
    /// data.
    pub fn merge(&mut self, other: MessageInfo) {
        if let Some(name) = non_empty(other.name) {
            self.name = Some(name);
        }
        if let Some(company) = non_empty(other.company) {
            self.company = Some(company);
        }
        if let Some(subject) = non_empty(other.subject) {
            self.subject = Some(subject);
        }
    }

    /// Render fields for the webhook payload: missing fields become
    /// "Non spécifié(e)".
    pub fn name_or_default(&self) -> &str {
        self.name.as_deref().unwrap_or("Non spécifié")
    }

    pub fn company_or_default(&self) -> &str {
        self.company.as_deref().unwrap_or("Non spécifiée")
    }

    pub fn subject_or_default(&self) -> &str {
        self.subject.as_deref().unwrap_or("Non spécifié")
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Result of one collection turn.
#[derive(Debug, Clone)]
pub struct CollectOutcome {
    pub complete: bool,
    pub info: MessageInfo,
    pub response: String,
}

#[derive(Deserialize, Default)]
struct RawCollectResponse {
    #[serde(default)]
    complete: bool,
    #[serde(default)]
    info: HashMap<String, Option<String>>,
    #[serde(default)]
    next_question: Option<String>,
}

pub struct MessageCollector {
    ai: Arc<dyn AiClient>,
}

impl MessageCollector {
    pub fn new(ai: Arc<dyn AiClient>) -> Self {
        Self { ai }
    }

    /// Runs one turn of message collection, returning whether the record
    /// is now complete, the extracted info, and the reply to speak. The
    /// caller must have already appended the user's turn to `conversation`;
    /// the engine owns `conversation` and the accumulated info across turns.
    pub async fn collect_step(&self, conversation: &mut Vec<ChatMessage>) -> AppResult<CollectOutcome> {
        let parsed = match self.ai.classify_json(conversation, SCHEMA_HINT).await {
            Ok(value) => serde_json::from_value::<RawCollectResponse>(value).unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "collection JSON parse/call failure, treating as incomplete");
                RawCollectResponse::default()
            }
        };

        let info = MessageInfo {
            name: parsed.info.get("name").cloned().flatten(),
            company: parsed.info.get("company").cloned().flatten(),
            subject: parsed.info.get("subject").cloned().flatten(),
        };

        if parsed.complete {
            Ok(CollectOutcome { complete: true, info, response: CLOSER_MESSAGE.to_string() })
        } else {
            let response = parsed
                .next_question
                .filter(|q| !q.trim().is_empty())
                .unwrap_or_else(|| GENERIC_NEXT_QUESTION.to_string());
            Ok(CollectOutcome { complete: false, info, response })
        }
    }
}
