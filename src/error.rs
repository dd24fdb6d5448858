use thiserror::Error;

/// Application-wide error type.
///
/// `is_transient()` distinguishes errors that are worth retrying (network
/// hiccups) from permanent ones (bad request, bad config). Callers in the
/// dialog engine use it to decide whether a failure should be
/// logged-and-ignored or should drive a state transition.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("call-control WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("AI provider returned a bad request: {0}")]
    AiBadRequest(String),

    #[error("AI provider unreachable: {0}")]
    AiTransient(String),

    #[error("transcription failed: {0}")]
    Transcription(String),

    #[error("classification failed: {0}")]
    Classification(String),

    #[error("call-control operation failed: {0}")]
    CallControl(String),

    #[error("transfer origination failed: {0}")]
    Transfer(String),

    #[error("webhook delivery failed: {0}")]
    Webhook(String),

    #[error("no active session for channel {0}")]
    UnknownChannel(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// True when the failure is plausibly transient (network blip, 5xx) and
    /// the caller may retry the same request; false for a permanent,
    /// bad-request style failure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::WebSocket(_) | Self::Io(_) | Self::AiTransient(_)
        )
    }
}

/// Result type alias using [`AppError`].
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Http(_) => StatusCode::BAD_GATEWAY,
            Self::WebSocket(_) => StatusCode::BAD_GATEWAY,
            Self::Json(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::AiBadRequest(_) => StatusCode::BAD_REQUEST,
            Self::AiTransient(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Transcription(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Classification(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::CallControl(_) => StatusCode::BAD_GATEWAY,
            Self::Transfer(_) => StatusCode::BAD_GATEWAY,
            Self::Webhook(_) => StatusCode::BAD_GATEWAY,
            Self::UnknownChannel(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = serde_json::json!({
            "error": self.to_string(),
            "code": status.as_u16(),
        });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_flagged() {
        let err = AppError::AiTransient("timeout".into());
        assert!(err.is_transient());

        let err = AppError::AiBadRequest("bad prompt".into());
        assert!(!err.is_transient());
    }

    #[test]
    fn status_codes_map_sensibly() {
        assert_eq!(
            AppError::UnknownChannel("x".into()).status_code(),
            axum::http::StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Transfer("no route".into()).status_code(),
            axum::http::StatusCode::BAD_GATEWAY
        );
    }
}
