//! Outbound call-control surface: answer/play/record/originate/hangup.
//!
//! REST wrapper shape: `reqwest::Client` + base URL + per-call error
//! mapping, using basic-auth'd requests against the call-control bus.

use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{error, warn};

/// Options for `POST /ari/channels/{id}/record`.
#[derive(Debug, Clone)]
pub struct RecordOptions {
    pub name: String,
    pub max_duration_seconds: u32,
    pub max_silence_seconds: u32,
    pub beep: bool,
    pub terminate_on: String,
}

impl RecordOptions {
    pub fn new(name: impl Into<String>, max_duration_seconds: u32) -> Self {
        Self {
            name: name.into(),
            max_duration_seconds,
            max_silence_seconds: 2,
            beep: false,
            terminate_on: "#".to_string(),
        }
    }
}

/// Parameters for `POST /ari/channels` (originate).
#[derive(Debug, Clone)]
pub struct OriginateRequest {
    pub extension: String,
    pub app: String,
    pub originating_channel_id: String,
    pub timeout_secs: u64,
    pub caller_id: String,
}

/// The outbound half of the call-control adapter.
///
/// A non-2xx response is a permanent operation error for that call, not a
/// fatal condition for the adapter. Callers decide per operation whether
/// to log-and-continue (play/record/answer/hangup) or transition on
/// failure (originate).
#[async_trait]
pub trait CallControlClient: Send + Sync {
    async fn answer(&self, channel_id: &str) -> AppResult<()>;
    async fn play(&self, channel_id: &str, sound_ref: &str) -> AppResult<()>;
    async fn record(&self, channel_id: &str, options: &RecordOptions) -> AppResult<()>;
    /// Returns the newly originated channel id.
    async fn originate(&self, request: &OriginateRequest) -> AppResult<String>;
    async fn hangup(&self, channel_id: &str) -> AppResult<()>;
}

pub struct AriClient {
    http: Client,
    base_url: String,
    user: String,
    password: String,
}

impl std::fmt::Debug for AriClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AriClient").field("base_url", &self.base_url).finish_non_exhaustive()
    }
}

impl AriClient {
    pub fn new(host: &str, port: u16, user: impl Into<String>, password: impl Into<String>) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build HTTP client");

        Self { http, base_url: format!("http://{host}:{port}"), user: user.into(), password: password.into() }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check_status(op: &str, channel_id: &str, response: reqwest::Response) -> AppResult<()> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            warn!(%op, %channel_id, %status, %body, "call-control request failed");
            Err(AppError::CallControl(format!("{op} on {channel_id}: {status}: {body}")))
        }
    }
}

#[async_trait]
impl CallControlClient for AriClient {
    async fn answer(&self, channel_id: &str) -> AppResult<()> {
        let response = self
            .http
            .post(self.endpoint(&format!("/ari/channels/{channel_id}/answer")))
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await
            .map_err(|e| AppError::CallControl(e.to_string()))?;
        Self::check_status("answer", channel_id, response).await
    }

    async fn play(&self, channel_id: &str, sound_ref: &str) -> AppResult<()> {
        let response = self
            .http
            .post(self.endpoint(&format!("/ari/channels/{channel_id}/play")))
            .query(&[("media", sound_ref)])
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await
            .map_err(|e| AppError::CallControl(e.to_string()))?;
        Self::check_status("play", channel_id, response).await
    }

    async fn record(&self, channel_id: &str, options: &RecordOptions) -> AppResult<()> {
        let response = self
            .http
            .post(self.endpoint(&format!("/ari/channels/{channel_id}/record")))
            .query(&[
                ("name", options.name.as_str()),
                ("format", "wav"),
                ("maxDurationSeconds", &options.max_duration_seconds.to_string()),
                ("maxSilenceSeconds", &options.max_silence_seconds.to_string()),
                ("beep", if options.beep { "yes" } else { "no" }),
                ("terminateOn", options.terminate_on.as_str()),
            ])
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await
            .map_err(|e| AppError::CallControl(e.to_string()))?;
        Self::check_status("record", channel_id, response).await
    }

    async fn originate(&self, request: &OriginateRequest) -> AppResult<String> {
        let endpoint_param = format!("PJSIP/{}", request.extension);
        let app_args = format!("transfer,{}", request.originating_channel_id);

        let response = self
            .http
            .post(self.endpoint("/ari/channels"))
            .query(&[
                ("endpoint", endpoint_param.as_str()),
                ("app", request.app.as_str()),
                ("appArgs", app_args.as_str()),
                ("timeout", &request.timeout_secs.to_string()),
                ("callerId", request.caller_id.as_str()),
            ])
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await
            .map_err(|e| AppError::Transfer(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%status, %body, "originate failed");
            return Err(AppError::Transfer(format!("{status}: {body}")));
        }

        #[derive(serde::Deserialize)]
        struct ChannelResponse {
            id: String,
        }

        let channel: ChannelResponse = response.json().await.map_err(|e| AppError::Transfer(e.to_string()))?;
        Ok(channel.id)
    }

    async fn hangup(&self, channel_id: &str) -> AppResult<()> {
        let response = self
            .http
            .delete(self.endpoint(&format!("/ari/channels/{channel_id}")))
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await
            .map_err(|e| AppError::CallControl(e.to_string()))?;
        Self::check_status("hangup", channel_id, response).await
    }
}
