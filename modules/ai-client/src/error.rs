use thiserror::Error;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {message}")]
    Network { message: String, timeout: bool },

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Empty response from model")]
    EmptyResponse,
}

impl AiError {
    /// Rate limits, gateway failures, resets and timeouts. Everything else is
    /// terminal for the request that produced it.
    pub fn is_transient(&self) -> bool {
        match self {
            AiError::Network { .. } => true,
            AiError::Api { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),
            AiError::Config(_) | AiError::Parse(_) | AiError::EmptyResponse => false,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, AiError::Api { status: 401 | 403, .. })
    }

    /// Endpoint refused the `response_format` field (older compatible-mode
    /// deployments).
    pub fn rejects_response_format(&self) -> bool {
        matches!(self, AiError::Api { status: 400, body } if body.contains("response_format"))
    }
}

impl From<reqwest::Error> for AiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return AiError::Parse(e.to_string());
        }
        AiError::Network {
            timeout: e.is_timeout(),
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for AiError {
    fn from(e: serde_json::Error) -> Self {
        AiError::Parse(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_and_gateway_errors_are_transient() {
        for status in [429, 500, 502, 503, 504] {
            let err = AiError::Api {
                status,
                body: String::new(),
            };
            assert!(err.is_transient(), "{status} should be transient");
        }
    }

    #[test]
    fn auth_errors_are_terminal() {
        let err = AiError::Api {
            status: 401,
            body: "invalid key".into(),
        };
        assert!(!err.is_transient());
        assert!(err.is_auth());
    }

    #[test]
    fn response_format_rejection_detected_only_on_400() {
        let rejected = AiError::Api {
            status: 400,
            body: r#"{"error":"response_format is not supported"}"#.into(),
        };
        assert!(rejected.rejects_response_format());

        let other = AiError::Api {
            status: 500,
            body: "response_format".into(),
        };
        assert!(!other.rejects_response_format());
    }
}
