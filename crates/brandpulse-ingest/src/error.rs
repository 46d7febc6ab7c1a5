use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("rate limited by {api}")]
    RateLimited { api: String },

    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed payload for {context}: {reason}")]
    Shape { context: String, reason: String },

    #[error("missing credentials for {api}: set {var}")]
    MissingCredentials { api: String, var: String },

    #[error("authentication failed for {api}: {reason}")]
    Auth { api: String, reason: String },

    #[error("unknown source: {0}")]
    UnknownSource(String),

    #[error("state store error: {0}")]
    State(#[from] brandpulse_db::DbError),

    #[error("sink error: {0}")]
    Sink(String),
}

impl IngestError {
    /// Whether the error is a transient upstream condition worth another
    /// attempt, as opposed to a permanent one (bad payload, bad creds)
    /// where retrying returns the same failure.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            IngestError::Http(e) => !e.is_decode(),
            IngestError::RateLimited { .. } => true,
            IngestError::UnexpectedStatus { status, .. } => *status == 429 || *status >= 500,
            IngestError::Deserialize { .. }
            | IngestError::Shape { .. }
            | IngestError::MissingCredentials { .. }
            | IngestError::Auth { .. }
            | IngestError::UnknownSource(_)
            | IngestError::State(_)
            | IngestError::Sink(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_is_transient() {
        let err = IngestError::RateLimited {
            api: "glassdoor".to_string(),
        };
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "rate limited by glassdoor");
    }

    #[test]
    fn server_errors_are_transient_client_errors_are_not() {
        let server = IngestError::UnexpectedStatus {
            status: 503,
            url: "https://api.example.com".to_string(),
        };
        assert!(server.is_transient());

        let forbidden = IngestError::UnexpectedStatus {
            status: 403,
            url: "https://api.example.com".to_string(),
        };
        assert!(!forbidden.is_transient());

        let too_many = IngestError::UnexpectedStatus {
            status: 429,
            url: "https://api.example.com".to_string(),
        };
        assert!(too_many.is_transient());
    }

    #[test]
    fn parse_and_credential_errors_are_permanent() {
        let parse = IngestError::Deserialize {
            context: "cfpb complaints".to_string(),
            source: serde_json::from_str::<serde_json::Value>("nope").unwrap_err(),
        };
        assert!(!parse.is_transient());

        let creds = IngestError::MissingCredentials {
            api: "reddit".to_string(),
            var: "REDDIT_CLIENT_ID".to_string(),
        };
        assert!(!creds.is_transient());
        assert_eq!(
            creds.to_string(),
            "missing credentials for reddit: set REDDIT_CLIENT_ID"
        );
    }
}
