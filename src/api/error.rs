//! Normalized API errors.

use reqwest::StatusCode;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
  /// The request could not complete
  Network,
  /// The server rejected the payload
  Validation,
  /// Missing or insufficient role/permission
  Unauthorized,
  /// Stale identifier
  NotFound,
  Server,
}

/// Every failure of the API client, carrying a message fit for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
  pub kind: ApiErrorKind,
  pub message: String,
}

impl ApiError {
  pub fn network(err: reqwest::Error) -> Self {
    let message = if err.is_timeout() {
      "The server did not respond in time".to_string()
    } else if err.is_connect() {
      "Could not connect to the server".to_string()
    } else {
      format!("Network error: {}", err)
    };
    Self {
      kind: ApiErrorKind::Network,
      message,
    }
  }

  pub fn from_status(status: StatusCode, message: Option<String>) -> Self {
    let kind = match status {
      StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
        ApiErrorKind::Validation
      }
      StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiErrorKind::Unauthorized,
      StatusCode::NOT_FOUND => ApiErrorKind::NotFound,
      _ => ApiErrorKind::Server,
    };
    let message = message
      .filter(|m| !m.trim().is_empty())
      .unwrap_or_else(|| format!("Request failed with status {}", status));
    Self { kind, message }
  }
}

impl fmt::Display for ApiError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.message)
  }
}

impl std::error::Error for ApiError {}
