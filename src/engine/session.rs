//! Per-call actor: owns one call session and serializes every mutation of
//! it behind its own inbox, one spawned task per active call, driven by
//! its own channel, generalized from a fixed audio pipeline to the full
//! greeting → classify → transfer → collect state machine.

use crate::ai::{AiClient, ChatMessage};
use crate::callcontrol::{CallControlClient, CallControlEvent, OriginateRequest, RecordOptions};
use crate::config::{AppConfig, ServiceEntry};
use crate::intent::IntentClassifier;
use crate::message::{MessageCollector, MessageInfo};
use crate::tts::TtsCache;
use crate::webhook::{WebhookNotifier, WebhookPayload};
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, info_span, warn, Instrument};

const CLARIFICATION_RETRY: &str = "Je n'ai pas compris. Pouvez-vous répéter s'il vous plaît ?";
const SERVICE_BUSY_OPENER: &str =
    "Le service est actuellement occupé. Puis-je prendre un message ? Quel est votre nom ?";
const MAX_RETRIES: u32 = 3;
const RECORDING_MAX_DURATION_SECS: u32 = 10;

/// The dialog states a call moves through from greeting to hangup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum CallState {
    Greeting,
    WaitingServiceChoice,
    Transferring,
    CollectingMessage,
    Ending,
}

/// A read-only view of a session, for the admin/test surface. Never used
/// by the engine itself to make decisions.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionSnapshot {
    pub channel_id: String,
    pub caller_id: String,
    pub state: CallState,
    pub target_service: Option<String>,
    pub retry_count: u32,
}

pub(crate) enum Inbox {
    CallControl(CallControlEvent),
    WatchdogFired,
}

/// Shared, constructor-injected collaborators every session needs. Cloned
/// (cheaply, via `Arc`) into each spawned `SessionActor`.
pub struct Services {
    pub ai: Arc<dyn AiClient>,
    pub tts: Arc<TtsCache>,
    pub intent: Arc<IntentClassifier>,
    pub collector: Arc<MessageCollector>,
    pub call_control: Arc<dyn CallControlClient>,
    pub webhook: Arc<dyn WebhookNotifier>,
    pub config: &'static AppConfig,
}

pub(crate) struct SessionActor {
    channel_id: String,
    caller_id: String,
    state: CallState,
    target_service: Option<ServiceEntry>,
    message_info: MessageInfo,
    conversation: Vec<ChatMessage>,
    retry_count: u32,
    webhook_notified: bool,
    recording_seq: u32,
    transfer_watchdog: Option<tokio::task::JoinHandle<()>>,

    inbox: mpsc::UnboundedReceiver<Inbox>,
    inbox_tx: mpsc::UnboundedSender<Inbox>,
    sessions: Arc<DashMap<String, super::SessionHandle>>,
    snapshot: Arc<Mutex<SessionSnapshot>>,
    services: Arc<Services>,
}

impl SessionActor {
    pub(crate) fn spawn(
        channel_id: String,
        caller_id: String,
        services: Arc<Services>,
        sessions: Arc<DashMap<String, super::SessionHandle>>,
    ) {
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let snapshot = Arc::new(Mutex::new(SessionSnapshot {
            channel_id: channel_id.clone(),
            caller_id: caller_id.clone(),
            state: CallState::Greeting,
            target_service: None,
            retry_count: 0,
        }));

        sessions.insert(
            channel_id.clone(),
            super::SessionHandle { tx: inbox_tx.clone(), snapshot: snapshot.clone() },
        );

        let actor = SessionActor {
            channel_id: channel_id.clone(),
            caller_id,
            state: CallState::Greeting,
            target_service: None,
            message_info: MessageInfo::default(),
            conversation: Vec::new(),
            retry_count: 0,
            webhook_notified: false,
            recording_seq: 0,
            transfer_watchdog: None,
            inbox,
            inbox_tx,
            sessions,
            snapshot,
            services,
        };

        let span = info_span!("call", channel_id = %channel_id);
        tokio::spawn(actor.run().instrument(span));
    }

    async fn run(mut self) {
        self.start().await;

        while let Some(event) = self.inbox.recv().await {
            let keep_going = match event {
                Inbox::CallControl(e) => self.handle_event(e).await,
                Inbox::WatchdogFired => {
                    self.handle_watchdog_fired().await;
                    true
                }
            };
            if !keep_going {
                break;
            }
        }

        self.cancel_watchdog();
        self.sessions.remove(&self.channel_id);
        info!("session ended");
    }

    fn sync_snapshot(&self) {
        let mut snapshot = self.snapshot.lock().unwrap();
        snapshot.state = self.state;
        snapshot.target_service = self.target_service.as_ref().map(|s| s.name.clone());
        snapshot.retry_count = self.retry_count;
    }

    async fn start(&mut self) {
        info!(caller_id = %self.caller_id, "call started");

        if let Err(e) = self.services.call_control.answer(&self.channel_id).await {
            warn!(error = %e, "answer failed, continuing anyway");
        }

        self.conversation.push(ChatMessage::assistant(self.services.config.greeting_message.as_str()));
        self.speak_logged(&self.services.config.greeting_message).await;
    }

    /// Dispatch a single call-control event. Returns `false` when the
    /// session should stop (i.e. `ChannelDestroyed`).
    async fn handle_event(&mut self, event: CallControlEvent) -> bool {
        match event {
            CallControlEvent::CallStarted { .. } => {
                warn!("duplicate CallStarted for an existing session, ignoring");
            }
            CallControlEvent::PlaybackFinished { .. } => self.handle_playback_finished().await,
            CallControlEvent::RecordingFinished { recording_name, .. } => {
                self.handle_recording_finished(recording_name).await
            }
            CallControlEvent::HangupRequested { .. } => {
                self.cancel_watchdog();
            }
            CallControlEvent::CallStasisEnded { .. } => {}
            CallControlEvent::ChannelDestroyed { .. } => {
                self.cancel_watchdog();
                return false;
            }
        }
        self.sync_snapshot();
        true
    }

    async fn handle_playback_finished(&mut self) {
        match self.state {
            CallState::Greeting => {
                self.state = CallState::WaitingServiceChoice;
                self.start_recording().await;
            }
            CallState::WaitingServiceChoice | CallState::CollectingMessage => {
                self.start_recording().await;
            }
            CallState::Ending => {
                if let Err(e) = self.services.call_control.hangup(&self.channel_id).await {
                    warn!(error = %e, "hangup failed");
                }
            }
            CallState::Transferring => {}
        }
    }

    async fn start_recording(&mut self) {
        self.recording_seq += 1;
        let name = format!("{}-{}", self.channel_id, self.recording_seq);
        let options = RecordOptions::new(name, RECORDING_MAX_DURATION_SECS);
        if let Err(e) = self.services.call_control.record(&self.channel_id, &options).await {
            warn!(error = %e, "record failed; state machine continues, may desync");
        }
    }

    async fn handle_recording_finished(&mut self, recording_name: String) {
        let path = PathBuf::from(&self.services.config.recordings_dir).join(format!("{recording_name}.wav"));

        let text = match self.services.ai.transcribe(&path, "fr").await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "transcription failed, retrying with clarification prompt");
                self.conversation.push(ChatMessage::assistant(CLARIFICATION_RETRY));
                self.speak_logged(CLARIFICATION_RETRY).await;
                return;
            }
        };

        self.conversation.push(ChatMessage::user(text.as_str()));

        match self.state {
            CallState::WaitingServiceChoice => self.handle_classification(&text).await,
            CallState::CollectingMessage => self.handle_collection().await,
            _ => {}
        }
    }

    async fn handle_classification(&mut self, text: &str) {
        let result = self.services.intent.classify(text).await;
        let result = match result {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "classification failed, treated as unclear");
                crate::intent::ClassificationResult { service: None, response: CLARIFICATION_RETRY.to_string() }
            }
        };

        match result.service {
            Some(service) => {
                self.target_service = Some(service.clone());
                self.state = CallState::Transferring;
                self.conversation.push(ChatMessage::assistant(result.response.as_str()));
                self.speak_logged(&result.response).await;
                self.originate_transfer(&service).await;
            }
            None => {
                self.retry_count += 1;
                if self.retry_count >= MAX_RETRIES {
                    self.collection_init().await;
                } else {
                    self.conversation.push(ChatMessage::assistant(result.response.as_str()));
                    self.speak_logged(&result.response).await;
                }
            }
        }
    }

    async fn originate_transfer(&mut self, service: &ServiceEntry) {
        let request = OriginateRequest {
            extension: service.extension.clone(),
            app: self.services.config.ari_app.clone(),
            originating_channel_id: self.channel_id.clone(),
            timeout_secs: self.services.config.ring_timeout,
            caller_id: self.caller_id.clone(),
        };

        match self.services.call_control.originate(&request).await {
            Ok(new_channel_id) => {
                info!(%new_channel_id, "originate succeeded, arming ring watchdog");
                self.arm_watchdog();
            }
            Err(e) => {
                warn!(error = %e, "originate failed, falling into message collection");
                self.collection_init().await;
            }
        }
    }

    fn arm_watchdog(&mut self) {
        self.cancel_watchdog();
        let delay = Duration::from_secs(self.services.config.ring_timeout + 1);
        let tx = self.inbox_tx.clone();
        self.transfer_watchdog = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Inbox::WatchdogFired);
        }));
    }

    fn cancel_watchdog(&mut self) {
        if let Some(handle) = self.transfer_watchdog.take() {
            handle.abort();
        }
    }

    async fn handle_watchdog_fired(&mut self) {
        if self.state != CallState::Transferring {
            return;
        }
        info!("ring watchdog fired, falling into message collection");
        self.transfer_watchdog = None;
        self.collection_init().await;
        self.sync_snapshot();
    }

    async fn collection_init(&mut self) {
        self.cancel_watchdog();
        self.state = CallState::CollectingMessage;
        self.conversation.clear();
        self.conversation.push(ChatMessage::assistant(SERVICE_BUSY_OPENER));
        self.speak_logged(SERVICE_BUSY_OPENER).await;
    }

    async fn handle_collection(&mut self) {
        let outcome = match self.services.collector.collect_step(&mut self.conversation).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "message collection step failed, staying in collection");
                return;
            }
        };

        self.message_info.merge(outcome.info);

        if outcome.complete {
            self.state = CallState::Ending;
            self.notify_webhook().await;
            self.conversation.push(ChatMessage::assistant(outcome.response.as_str()));
            self.speak_logged(&outcome.response).await;
        } else {
            self.conversation.push(ChatMessage::assistant(outcome.response.as_str()));
            self.speak_logged(&outcome.response).await;
        }
    }

    async fn notify_webhook(&mut self) {
        if self.webhook_notified {
            return;
        }
        self.webhook_notified = true;

        let service = self.target_service.as_ref().map(|s| s.name.clone()).unwrap_or_else(|| "Non spécifié".to_string());
        let payload = WebhookPayload {
            caller_id: self.caller_id.clone(),
            service,
            nom: self.message_info.name_or_default().to_string(),
            societe: self.message_info.company_or_default().to_string(),
            sujet: self.message_info.subject_or_default().to_string(),
        };

        if let Err(e) = self.services.webhook.notify(payload).await {
            warn!(error = %e, "webhook notify returned an error, ignoring");
        }
    }

    async fn speak_logged(&self, text: &str) {
        if let Err(e) = self.speak(text).await {
            warn!(error = %e, "speak failed");
        }
    }

    async fn speak(&self, text: &str) -> crate::error::AppResult<()> {
        self.services.tts.ensure_audio(text, true).await?;
        let fingerprint = TtsCache::fingerprint(text);
        let sound_ref = TtsCache::sound_ref(&fingerprint);
        self.services.call_control.play(&self.channel_id, &sound_ref).await
    }
}
