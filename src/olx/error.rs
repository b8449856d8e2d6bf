use serde_json::Value;
use thiserror::Error;

/// Classification of a marketplace response. Validation messages are the
/// most information-bearing kind and must reach the operator verbatim.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("remote resource not found: {0}")]
    NotFound(String),
    #[error("validation rejected: {0}")]
    Validation(String),
    #[error("upstream error: {0}")]
    Upstream(String),
}

impl ApiError {
    pub fn from_response(status: u16, body: &str) -> Self {
        let message = extract_message(body);
        match status {
            401 | 403 => ApiError::Authentication(message),
            404 => ApiError::NotFound(message),
            422 => ApiError::Validation(message),
            other => ApiError::Upstream(format!("HTTP {other}: {message}")),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Authentication(_) => "authentication",
            ApiError::NotFound(_) => "not_found",
            ApiError::Validation(_) => "validation",
            ApiError::Upstream(_) => "upstream",
        }
    }
}

/// Pulls a human-readable message out of an error body. The upstream uses
/// `message`, `error` or an `errors` list depending on the endpoint; none of
/// them is guaranteed, so the raw body is the last resort.
pub fn extract_message(body: &str) -> String {
    let parsed: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(_) => return body.trim().to_string(),
    };
    if let Some(message) = parsed.get("message").and_then(Value::as_str) {
        return message.to_string();
    }
    if let Some(message) = parsed.get("error").and_then(Value::as_str) {
        return message.to_string();
    }
    if let Some(first) = parsed
        .get("errors")
        .and_then(Value::as_array)
        .and_then(|errors| errors.first())
    {
        if let Some(text) = first.as_str() {
            return text.to_string();
        }
        if let Some(text) = first.get("message").and_then(Value::as_str) {
            return text.to_string();
        }
    }
    body.trim().to_string()
}
