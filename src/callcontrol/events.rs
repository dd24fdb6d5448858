//! Inbound call-control event bus: typed events plus a supervised
//! WebSocket subscriber.
//!
//! Connect loop built on `tokio-tungstenite` with reconnect-on-drop, using
//! an unconditional fixed-delay retry rather than bounded exponential
//! backoff, since the call-control bus is the one connection this process
//! cannot function without and must keep trying to reach indefinitely.

use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// Delay between reconnect attempts. The bus is retried forever; there is
/// no give-up condition.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// A decoded call-control event, shaped for the dialog engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallControlEvent {
    CallStarted { channel_id: String, caller_id: String },
    CallStasisEnded { channel_id: String },
    PlaybackFinished { channel_id: String },
    RecordingFinished { channel_id: String, recording_name: String },
    HangupRequested { channel_id: String },
    ChannelDestroyed { channel_id: String },
}

impl CallControlEvent {
    pub fn channel_id(&self) -> &str {
        match self {
            CallControlEvent::CallStarted { channel_id, .. }
            | CallControlEvent::CallStasisEnded { channel_id }
            | CallControlEvent::PlaybackFinished { channel_id }
            | CallControlEvent::RecordingFinished { channel_id, .. }
            | CallControlEvent::HangupRequested { channel_id }
            | CallControlEvent::ChannelDestroyed { channel_id } => channel_id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawChannel {
    id: String,
    #[serde(default)]
    caller: Option<RawCaller>,
}

#[derive(Debug, Deserialize)]
struct RawCaller {
    number: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTargetUri {
    target_uri: String,
}

#[derive(Debug, Deserialize)]
struct RawRecording {
    name: String,
    target_uri: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum RawEvent {
    StasisStart { channel: RawChannel },
    StasisEnd { channel: RawChannel },
    PlaybackFinished { playback: RawTargetUri },
    RecordingFinished { recording: RawRecording },
    ChannelHangupRequest { channel: RawChannel },
    ChannelDestroyed { channel: RawChannel },
    #[serde(other)]
    Unknown,
}

/// `target_uri` is shaped `"channel:<id>"`; anything else is
/// dropped without mutating session state.
fn channel_id_from_target_uri(target_uri: &str) -> Option<String> {
    target_uri.strip_prefix("channel:").filter(|id| !id.is_empty()).map(str::to_string)
}

/// Parse one raw event bus message. Returns `None` for events this crate
/// doesn't act on or whose `target_uri` doesn't match the expected shape,
/// both are silently dropped, not errors.
pub fn parse_event(raw: &str) -> Option<CallControlEvent> {
    let event: RawEvent = match serde_json::from_str(raw) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "dropping malformed call-control event");
            return None;
        }
    };

    match event {
        RawEvent::StasisStart { channel } => Some(CallControlEvent::CallStarted {
            channel_id: channel.id,
            caller_id: channel.caller.and_then(|c| c.number).unwrap_or_else(|| "inconnu".to_string()),
        }),
        RawEvent::StasisEnd { channel } => Some(CallControlEvent::CallStasisEnded { channel_id: channel.id }),
        RawEvent::PlaybackFinished { playback } => {
            channel_id_from_target_uri(&playback.target_uri).map(|channel_id| CallControlEvent::PlaybackFinished { channel_id })
        }
        RawEvent::RecordingFinished { recording } => channel_id_from_target_uri(&recording.target_uri)
            .map(|channel_id| CallControlEvent::RecordingFinished { channel_id, recording_name: recording.name }),
        RawEvent::ChannelHangupRequest { channel } => Some(CallControlEvent::HangupRequested { channel_id: channel.id }),
        RawEvent::ChannelDestroyed { channel } => Some(CallControlEvent::ChannelDestroyed { channel_id: channel.id }),
        RawEvent::Unknown => None,
    }
}

/// Run the event subscriber until `shutdown` resolves. Reconnects on any
/// connection error or clean close, waiting `RECONNECT_DELAY` between
/// attempts, forever. There is no bounded retry count here because the
/// process has nothing useful to do while disconnected from the bus.
pub async fn run_event_subscriber(
    ws_url: String,
    tx: mpsc::UnboundedSender<CallControlEvent>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            return;
        }

        info!(%ws_url, "connecting to call-control event bus");
        match tokio_tungstenite::connect_async(&ws_url).await {
            Ok((stream, _response)) => {
                info!("call-control event bus connected");
                if !drain_events(stream, &tx, &mut shutdown).await {
                    return;
                }
            }
            Err(e) => {
                error!(error = %e, "failed to connect to call-control event bus");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

/// Returns `false` if shutdown was requested while draining (caller should
/// stop reconnecting), `true` if the connection simply dropped and a
/// reconnect should be attempted.
async fn drain_events<S>(
    mut stream: tokio_tungstenite::WebSocketStream<S>,
    tx: &mpsc::UnboundedSender<CallControlEvent>,
    shutdown: &mut tokio::sync::watch::Receiver<bool>,
) -> bool
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    use futures::StreamExt;

    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(event) = parse_event(&text) {
                            debug!(?event, "dispatching call-control event");
                            if tx.send(event).is_err() {
                                warn!("event receiver dropped, stopping subscriber");
                                return false;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        warn!("call-control event bus closed, will reconnect");
                        return true;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(error = %e, "call-control event bus error, will reconnect");
                        return true;
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stasis_start_with_caller() {
        let raw = r#"{"type":"StasisStart","channel":{"id":"c1","caller":{"number":"0601020304"}}}"#;
        let event = parse_event(raw).unwrap();
        assert_eq!(event, CallControlEvent::CallStarted { channel_id: "c1".into(), caller_id: "0601020304".into() });
    }

    #[test]
    fn parses_stasis_start_without_caller_number() {
        let raw = r#"{"type":"StasisStart","channel":{"id":"c1"}}"#;
        let event = parse_event(raw).unwrap();
        assert_eq!(event, CallControlEvent::CallStarted { channel_id: "c1".into(), caller_id: "inconnu".into() });
    }

    #[test]
    fn parses_recording_finished_with_valid_target_uri() {
        let raw = r#"{"type":"RecordingFinished","recording":{"name":"r1","target_uri":"channel:c1"}}"#;
        let event = parse_event(raw).unwrap();
        assert_eq!(event, CallControlEvent::RecordingFinished { channel_id: "c1".into(), recording_name: "r1".into() });
    }

    #[test]
    fn drops_recording_finished_with_malformed_target_uri() {
        let raw = r#"{"type":"RecordingFinished","recording":{"name":"r1","target_uri":"bridge:b1"}}"#;
        assert!(parse_event(raw).is_none());
    }

    #[test]
    fn drops_playback_finished_with_empty_channel_id() {
        let raw = r#"{"type":"PlaybackFinished","playback":{"target_uri":"channel:"}}"#;
        assert!(parse_event(raw).is_none());
    }

    #[test]
    fn drops_unknown_event_types() {
        let raw = r#"{"type":"ApplicationReplaced","application":"other"}"#;
        assert!(parse_event(raw).is_none());
    }

    #[test]
    fn drops_unparseable_json() {
        assert!(parse_event("not json").is_none());
    }

    #[test]
    fn parses_channel_hangup_request() {
        let raw = r#"{"type":"ChannelHangupRequest","channel":{"id":"c9"}}"#;
        let event = parse_event(raw).unwrap();
        assert_eq!(event, CallControlEvent::HangupRequested { channel_id: "c9".into() });
    }

    #[test]
    fn parses_channel_destroyed() {
        let raw = r#"{"type":"ChannelDestroyed","channel":{"id":"c9"}}"#;
        let event = parse_event(raw).unwrap();
        assert_eq!(event, CallControlEvent::ChannelDestroyed { channel_id: "c9".into() });
    }
}
