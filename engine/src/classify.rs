//! Failure taxonomy and response classification.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Longest error detail kept from a raw response body.
const MAX_DETAIL_LEN: usize = 200;

/// Why a remote mutation did not go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Local database locked, full or unreadable
    StorageUnavailable,
    /// Backend could not be reached, or no response arrived
    NetworkUnreachable,
    /// Backend answered 5xx
    ServerError,
    /// Session is no longer accepted by the backend
    Unauthorized,
    /// Backend rejected the payload (4xx other than auth)
    ValidationRejected,
    /// Response did not have the shape the adapter expects
    AdapterMismatch,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::StorageUnavailable => "storage_unavailable",
            FailureKind::NetworkUnreachable => "network_unreachable",
            FailureKind::ServerError => "server_error",
            FailureKind::Unauthorized => "unauthorized",
            FailureKind::ValidationRejected => "validation_rejected",
            FailureKind::AdapterMismatch => "adapter_mismatch",
        }
    }

    /// Transient failures: the same request may succeed later unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FailureKind::NetworkUnreachable | FailureKind::ServerError | FailureKind::Unauthorized
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a non-success response. Returns `None` for 2xx.
///
/// A 403 only counts as an auth failure when its detail talks about the
/// token; other 403s are permission rejections of this particular payload.
pub fn classify_status(status: u16, body: &Value) -> Option<FailureKind> {
    match status {
        200..=299 => None,
        401 => Some(FailureKind::Unauthorized),
        403 if mentions_token(&extract_detail(body)) => Some(FailureKind::Unauthorized),
        500..=599 => Some(FailureKind::ServerError),
        _ => Some(FailureKind::ValidationRejected),
    }
}

fn mentions_token(detail: &str) -> bool {
    let detail = detail.to_lowercase();
    ["invalid", "expired", "token"].iter().any(|w| detail.contains(w))
}

/// Human-readable error detail from a backend error body.
///
/// Looks at `detail`, then `message`, then the first `msg` of a validation
/// error list, and falls back to the raw body.
pub fn extract_detail(body: &Value) -> String {
    for key in ["detail", "message"] {
        match body.get(key) {
            Some(Value::String(s)) => return s.clone(),
            Some(Value::Array(items)) => {
                if let Some(msg) = items.iter().find_map(|i| i.get("msg").and_then(Value::as_str)) {
                    return msg.to_string();
                }
            }
            _ => {}
        }
    }

    let raw = match body {
        Value::Null => return String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    truncate(raw, MAX_DETAIL_LEN)
}

fn truncate(mut s: String, max: usize) -> String {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
        s.push('…');
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_is_not_classified() {
        assert_eq!(classify_status(200, &json!({})), None);
        assert_eq!(classify_status(204, &Value::Null), None);
    }

    #[test]
    fn status_classes() {
        assert_eq!(classify_status(401, &json!({})), Some(FailureKind::Unauthorized));
        assert_eq!(classify_status(422, &json!({})), Some(FailureKind::ValidationRejected));
        assert_eq!(classify_status(404, &json!({})), Some(FailureKind::ValidationRejected));
        assert_eq!(classify_status(503, &json!({})), Some(FailureKind::ServerError));
    }

    #[test]
    fn forbidden_depends_on_detail() {
        let expired = json!({"detail": "Token has expired"});
        assert_eq!(classify_status(403, &expired), Some(FailureKind::Unauthorized));

        let denied = json!({"detail": "Not your cow"});
        assert_eq!(classify_status(403, &denied), Some(FailureKind::ValidationRejected));
    }

    #[test]
    fn detail_extraction_order() {
        assert_eq!(extract_detail(&json!({"detail": "a", "message": "b"})), "a");
        assert_eq!(extract_detail(&json!({"message": "b"})), "b");
        assert_eq!(
            extract_detail(&json!({"detail": [{"loc": ["body", "name"], "msg": "field required"}]})),
            "field required"
        );
        assert_eq!(extract_detail(&json!("plain text")), "plain text");
        assert_eq!(extract_detail(&Value::Null), "");
    }

    #[test]
    fn raw_body_truncated() {
        let long = "x".repeat(500);
        let detail = extract_detail(&Value::String(long));
        assert!(detail.chars().count() <= MAX_DETAIL_LEN + 1);
        assert!(detail.ends_with('…'));
    }

    #[test]
    fn transient_kinds() {
        assert!(FailureKind::NetworkUnreachable.is_transient());
        assert!(FailureKind::Unauthorized.is_transient());
        assert!(!FailureKind::ValidationRejected.is_transient());
        assert!(!FailureKind::AdapterMismatch.is_transient());
    }
}
