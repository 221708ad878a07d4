use reqwest::StatusCode;

/// Errors from talking to a vendor API.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("failed to build HTTP client: {0}")]
  Client(#[source] reqwest::Error),

  #[error("GET {endpoint} failed: {source}")]
  Request {
    endpoint: String,
    #[source]
    source:   reqwest::Error,
  },

  #[error("GET {endpoint} returned {status}")]
  Status { endpoint: String, status: StatusCode },

  #[error("{endpoint} reported an error: {message}")]
  Api { endpoint: String, message: String },

  #[error("unexpected payload from {endpoint}: {source}")]
  Payload {
    endpoint: String,
    #[source]
    source:   serde_json::Error,
  },

  #[error("{0} credentials are empty")]
  MissingCredentials(&'static str),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
