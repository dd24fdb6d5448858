//! Dialog Engine: the per-call state machine that consumes call-control
//! events and drives synthesis, transcription, classification, message
//! collection and webhook notification, owning the session table.

mod session;

pub use session::{CallState, Services, SessionSnapshot};

use crate::callcontrol::CallControlEvent;
use dashmap::DashMap;
use session::{Inbox, SessionActor};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

pub(crate) struct SessionHandle {
    tx: mpsc::UnboundedSender<Inbox>,
    snapshot: Arc<Mutex<SessionSnapshot>>,
}

/// Owns the session table and the shared collaborators every session actor
/// needs. One call-control event at a time is dispatched; each session
/// then serializes its own mutations independently.
pub struct DialogEngine {
    sessions: Arc<DashMap<String, SessionHandle>>,
    services: Arc<Services>,
}

impl DialogEngine {
    pub fn new(services: Services) -> Self {
        Self { sessions: Arc::new(DashMap::new()), services: Arc::new(services) }
    }

    /// Route one decoded call-control event. `CallStarted` spawns a new
    /// session actor; every other event is forwarded to the matching
    /// session's inbox, or dropped if the channel is unknown.
    pub fn dispatch(&self, event: CallControlEvent) {
        if let CallControlEvent::CallStarted { channel_id, caller_id } = event {
            if self.sessions.contains_key(&channel_id) {
                debug!(%channel_id, "CallStarted for an already-open channel, ignoring");
                return;
            }
            SessionActor::spawn(channel_id, caller_id, Arc::clone(&self.services), Arc::clone(&self.sessions));
            return;
        }

        let channel_id = event.channel_id().to_string();
        match self.sessions.get(&channel_id) {
            Some(handle) => {
                if handle.tx.send(Inbox::CallControl(event)).is_err() {
                    debug!(%channel_id, "session inbox closed, dropping event");
                }
            }
            None => debug!(%channel_id, "event for unknown channel, ignoring"),
        }
    }

    /// Snapshot of every open session, for the admin/test surface only.
    /// Never consulted by the engine itself.
    pub fn session_snapshots(&self) -> Vec<SessionSnapshot> {
        self.sessions.iter().map(|entry| entry.value().snapshot.lock().unwrap().clone()).collect()
    }

    pub fn active_session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Shared collaborators, for the admin/test surface's manual-probe
    /// endpoints. Never consulted by the engine's own dispatch path, which
    /// goes through the per-session actors instead.
    pub fn services(&self) -> Arc<Services> {
        Arc::clone(&self.services)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{AiClient, ChatMessage};
    use crate::callcontrol::{CallControlClient, OriginateRequest, RecordOptions};
    use crate::config::ServiceEntry;
    use crate::error::AppResult;
    use crate::intent::IntentClassifier;
    use crate::message::MessageCollector;
    use crate::tts::TtsCache;
    use crate::webhook::{WebhookNotifier, WebhookPayload};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct FakeAi {
        transcripts: StdMutex<Vec<String>>,
        classify_replies: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl AiClient for FakeAi {
        async fn synthesize(&self, _text: &str) -> AppResult<Vec<u8>> {
            Ok(b"RIFF....WAVEfmt ".to_vec())
        }

        async fn transcribe(&self, _audio_path: &Path, _language: &str) -> AppResult<String> {
            let mut transcripts = self.transcripts.lock().unwrap();
            Ok(transcripts.pop().unwrap_or_default())
        }

        async fn classify(&self, _system_prompt: &str, _user_text: &str, _temperature: f32) -> AppResult<String> {
            let mut replies = self.classify_replies.lock().unwrap();
            Ok(replies.pop().unwrap_or_default())
        }

        async fn classify_json(&self, _messages: &[ChatMessage], _hint: &str) -> AppResult<serde_json::Value> {
            Ok(serde_json::json!({"complete": false, "info": {}, "next_question": "Et ensuite ?"}))
        }
    }

    struct FakeCallControl {
        originate_result: StdMutex<Option<AppResult<String>>>,
        originate_calls: AtomicUsize,
        play_calls: AtomicUsize,
        hangup_calls: AtomicUsize,
    }

    impl Default for FakeCallControl {
        fn default() -> Self {
            Self {
                originate_result: StdMutex::new(Some(Ok("newch".to_string()))),
                originate_calls: AtomicUsize::new(0),
                play_calls: AtomicUsize::new(0),
                hangup_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CallControlClient for FakeCallControl {
        async fn answer(&self, _channel_id: &str) -> AppResult<()> {
            Ok(())
        }
        async fn play(&self, _channel_id: &str, _sound_ref: &str) -> AppResult<()> {
            self.play_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn record(&self, _channel_id: &str, _options: &RecordOptions) -> AppResult<()> {
            Ok(())
        }
        async fn originate(&self, _request: &OriginateRequest) -> AppResult<String> {
            self.originate_calls.fetch_add(1, Ordering::SeqCst);
            self.originate_result.lock().unwrap().take().unwrap_or(Ok("newch".to_string()))
        }
        async fn hangup(&self, _channel_id: &str) -> AppResult<()> {
            self.hangup_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeWebhook {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl WebhookNotifier for FakeWebhook {
        async fn notify(&self, _payload: WebhookPayload) -> AppResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn directory() -> Vec<ServiceEntry> {
        vec![ServiceEntry { extension: "101".into(), name: "Ventes".into() }]
    }

    fn leaked_config() -> &'static crate::config::AppConfig {
        Box::leak(Box::new(crate::config::AppConfig {
            ari_host: "localhost".into(),
            ari_port: 8088,
            ari_user: "u".into(),
            ari_password: "p".into(),
            ari_app: "voicedesk".into(),
            openai_api_key: "k".into(),
            company_name: "Acme".into(),
            greeting_message: "Bonjour, bienvenue chez Acme.".into(),
            ring_timeout: 1,
            services: "101:Ventes".into(),
            n8n_webhook_url: None,
            cache_dir: std::env::temp_dir().join("voicedesk-test-cache").to_string_lossy().into_owned(),
            recordings_dir: std::env::temp_dir().to_string_lossy().into_owned(),
        }))
    }

    #[tokio::test]
    async fn direct_match_transfer_arms_watchdog_and_originates() {
        let ai = Arc::new(FakeAi {
            transcripts: StdMutex::new(vec!["je voudrais les ventes".to_string()]),
            classify_replies: StdMutex::new(vec!["Ventes".to_string()]),
        });
        let call_control = Arc::new(FakeCallControl::default());
        let webhook = Arc::new(FakeWebhook { calls: AtomicUsize::new(0) });
        let config = leaked_config();

        let services = Services {
            ai: ai.clone(),
            tts: Arc::new(TtsCache::new(ai.clone(), config.cache_dir.clone())),
            intent: Arc::new(IntentClassifier::new(ai.clone(), directory())),
            collector: Arc::new(MessageCollector::new(ai.clone())),
            call_control: call_control.clone(),
            webhook: webhook.clone(),
            config,
        };

        let engine = DialogEngine::new(services);
        engine.dispatch(CallControlEvent::CallStarted { channel_id: "A".into(), caller_id: "+41000".into() });
        // greeting playback finished -> records
        engine.dispatch(CallControlEvent::PlaybackFinished { channel_id: "A".into() });
        // recording finished -> transcribe + classify -> match -> originate
        engine.dispatch(CallControlEvent::RecordingFinished { channel_id: "A".into(), recording_name: "A-1".into() });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(call_control.originate_calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.active_session_count(), 1);
    }

    #[tokio::test]
    async fn unknown_channel_events_are_ignored() {
        let ai = Arc::new(FakeAi { transcripts: StdMutex::new(vec![]), classify_replies: StdMutex::new(vec![]) });
        let call_control = Arc::new(FakeCallControl::default());
        let webhook = Arc::new(FakeWebhook { calls: AtomicUsize::new(0) });
        let config = leaked_config();

        let services = Services {
            ai: ai.clone(),
            tts: Arc::new(TtsCache::new(ai.clone(), config.cache_dir.clone())),
            intent: Arc::new(IntentClassifier::new(ai.clone(), directory())),
            collector: Arc::new(MessageCollector::new(ai.clone())),
            call_control: call_control.clone(),
            webhook,
            config,
        };

        let engine = DialogEngine::new(services);
        engine.dispatch(CallControlEvent::PlaybackFinished { channel_id: "ghost".into() });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(engine.active_session_count(), 0);
    }

    #[tokio::test]
    async fn channel_destroyed_removes_session() {
        let ai = Arc::new(FakeAi { transcripts: StdMutex::new(vec![]), classify_replies: StdMutex::new(vec![]) });
        let call_control = Arc::new(FakeCallControl::default());
        let webhook = Arc::new(FakeWebhook { calls: AtomicUsize::new(0) });
        let config = leaked_config();

        let services = Services {
            ai: ai.clone(),
            tts: Arc::new(TtsCache::new(ai.clone(), config.cache_dir.clone())),
            intent: Arc::new(IntentClassifier::new(ai.clone(), directory())),
            collector: Arc::new(MessageCollector::new(ai.clone())),
            call_control,
            webhook,
            config,
        };

        let engine = DialogEngine::new(services);
        engine.dispatch(CallControlEvent::CallStarted { channel_id: "B".into(), caller_id: "+41111".into() });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(engine.active_session_count(), 1);

        engine.dispatch(CallControlEvent::ChannelDestroyed { channel_id: "B".into() });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(engine.active_session_count(), 0);
    }
}
