//! Maps a free-form caller utterance to a configured service.
//!
//! A stateless client wrapping `AiClient`: request/response shape in, a
//! matched service out. Matching is substring containment against the
//! service directory, first match wins.

use crate::ai::AiClient;
use crate::config::ServiceEntry;
use crate::error::AppResult;
use std::sync::Arc;
use tracing::debug;

/// Result of classifying one caller utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationResult {
    pub service: Option<ServiceEntry>,
    pub response: String,
}

pub struct IntentClassifier {
    ai: Arc<dyn AiClient>,
    directory: Vec<ServiceEntry>,
}

impl IntentClassifier {
    pub fn new(ai: Arc<dyn AiClient>, directory: Vec<ServiceEntry>) -> Self {
        Self { ai, directory }
    }

    fn system_prompt(&self) -> String {
        let mut prompt = String::from(
            "Tu es un standardiste téléphonique. Voici les services disponibles :\n",
        );
        for service in &self.directory {
            prompt.push_str(&format!("- {}\n", service.name));
        }
        prompt.push_str(
            "Réponds uniquement par le nom exact d'un de ces services si tu peux déterminer \
             lequel l'appelant souhaite joindre, ou par une courte question de clarification \
             sinon.",
        );
        prompt
    }

    /// First service whose name appears (case-insensitive substring) in
    /// `ai_response`, in directory order.
    fn match_service(&self, ai_response: &str) -> Option<ServiceEntry> {
        let lower = ai_response.to_lowercase();
        self.directory
            .iter()
            .find(|service| lower.contains(&service.name.to_lowercase()))
            .cloned()
    }

    /// Classify one caller utterance into a matched service (or a
    /// clarification reply when none matches).
    pub async fn classify(&self, user_text: &str) -> AppResult<ClassificationResult> {
        let ai_response = self
            .ai
            .classify(&self.system_prompt(), user_text, 0.3)
            .await?;

        match self.match_service(&ai_response) {
            Some(service) => {
                debug!(service = %service.name, "intent matched a service");
                let response = format!(
                    "Je vous transfère au {}. Un instant s'il vous plaît.",
                    service.name
                );
                Ok(ClassificationResult { service: Some(service), response })
            }
            None => {
                debug!("intent unclear, returning clarification");
                Ok(ClassificationResult { service: None, response: ai_response })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::ChatMessage;
    use crate::error::AppResult as Result;
    use async_trait::async_trait;
    use std::path::Path;

    fn directory() -> Vec<ServiceEntry> {
        vec![
            ServiceEntry { extension: "101".into(), name: "Ventes".into() },
            ServiceEntry { extension: "102".into(), name: "Support".into() },
            ServiceEntry { extension: "103".into(), name: "Comptabilité".into() },
        ]
    }

    struct ScriptedAi(String);

    #[async_trait]
    impl AiClient for ScriptedAi {
        async fn synthesize(&self, _text: &str) -> Result<Vec<u8>> {
            unimplemented!()
        }
        async fn transcribe(&self, _p: &Path, _l: &str) -> Result<String> {
            unimplemented!()
        }
        async fn classify(&self, _sys: &str, _user: &str, _temp: f32) -> Result<String> {
            Ok(self.0.clone())
        }
        async fn classify_json(&self, _m: &[ChatMessage], _h: &str) -> Result<serde_json::Value> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn matches_exact_service_name() {
        let ai = Arc::new(ScriptedAi("Ventes".into()));
        let classifier = IntentClassifier::new(ai, directory());
        let result = classifier.classify("je voudrais les ventes").await.unwrap();
        assert_eq!(result.service.unwrap().name, "Ventes");
        assert_eq!(result.response, "Je vous transfère au Ventes. Un instant s'il vous plaît.");
    }

    #[tokio::test]
    async fn matches_case_insensitively_as_substring() {
        let ai = Arc::new(ScriptedAi("Vous voulez sans doute le service COMPTABILITÉ".into()));
        let classifier = IntentClassifier::new(ai, directory());
        let result = classifier.classify("euh la compta").await.unwrap();
        assert_eq!(result.service.unwrap().name, "Comptabilité");
    }

    #[tokio::test]
    async fn first_directory_match_wins_on_ambiguous_reply() {
        // Both "Ventes" and "Support" would be substrings here; directory
        // order (Ventes first) breaks the tie.
        let ai = Arc::new(ScriptedAi("Est-ce Ventes ou Support ?".into()));
        let classifier = IntentClassifier::new(ai, directory());
        let result = classifier.classify("je ne sais pas").await.unwrap();
        assert_eq!(result.service.unwrap().name, "Ventes");
    }

    #[tokio::test]
    async fn returns_clarification_when_no_service_matches() {
        let ai = Arc::new(ScriptedAi("Pouvez-vous préciser votre demande ?".into()));
        let classifier = IntentClassifier::new(ai, directory());
        let result = classifier.classify("je ne sais pas trop").await.unwrap();
        assert!(result.service.is_none());
        assert_eq!(result.response, "Pouvez-vous préciser votre demande ?");
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::path::Path;

    struct ScriptedAi(String);

    #[async_trait]
    impl AiClient for ScriptedAi {
        async fn synthesize(&self, _text: &str) -> AppResult<Vec<u8>> {
            unimplemented!()
        }
        async fn transcribe(&self, _p: &Path, _l: &str) -> AppResult<String> {
            unimplemented!()
        }
        async fn classify(&self, _sys: &str, _user: &str, _temp: f32) -> AppResult<String> {
            Ok(self.0.clone())
        }
        async fn classify_json(&self, _m: &[crate::ai::ChatMessage], _h: &str) -> AppResult<serde_json::Value> {
            unimplemented!()
        }
    }

    fn directory() -> Vec<ServiceEntry> {
        vec![
            ServiceEntry { extension: "101".into(), name: "Ventes".into() },
            ServiceEntry { extension: "102".into(), name: "Support".into() },
            ServiceEntry { extension: "103".into(), name: "Comptabilité".into() },
        ]
    }

    proptest! {
        // P4: a reply containing a service name anywhere, in any case, always
        // yields a match on that service, regardless of surrounding noise.
        #[test]
        fn any_reply_containing_a_service_name_matches_it(
            prefix in "[a-zA-Z ]{0,20}",
            suffix in "[a-zA-Z ]{0,20}",
            service_idx in 0usize..3,
            shout in prop::bool::ANY,
        ) {
            let dir = directory();
            let mut name = dir[service_idx].name.clone();
            if shout {
                name = name.to_uppercase();
            }
            let reply = format!("{prefix}{name}{suffix}");

            let runtime = tokio::runtime::Runtime::new().unwrap();
            let ai = Arc::new(ScriptedAi(reply));
            let classifier = IntentClassifier::new(ai, dir.clone());
            let result = runtime.block_on(classifier.classify("peu importe")).unwrap();

            prop_assert_eq!(result.service.unwrap().name, dir[service_idx].name.clone());
        }

        // P4 tie-break: when a reply contains no configured service name at
        // all, classification never manufactures a match.
        #[test]
        fn reply_with_no_service_name_never_matches(text in "[a-z ]{0,40}") {
            let dir = directory();
            prop_assume!(!dir.iter().any(|s| text.to_lowercase().contains(&s.name.to_lowercase())));

            let runtime = tokio::runtime::Runtime::new().unwrap();
            let ai = Arc::new(ScriptedAi(text.clone()));
            let classifier = IntentClassifier::new(ai, dir);
            let result = runtime.block_on(classifier.classify("peu importe")).unwrap();

            prop_assert!(result.service.is_none());
            prop_assert_eq!(result.response, text);
        }
    }
}
