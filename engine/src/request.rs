//! Internal request and response shapes.
//!
//! Requests are built against the client's internal endpoint names; the
//! [`RequestAdapter`](crate::RequestAdapter) translates them for the backend.

use crate::{catalog::Catalog, error::Result, Error, OpKind, PendingOperation};
use serde::{Deserialize, Serialize};
use std::fmt;

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    /// Repeating the request leaves the server in the same state.
    ///
    /// POST (create) and PATCH are not idempotent.
    pub fn is_idempotent(&self) -> bool {
        matches!(self, Method::Get | Method::Put | Method::Delete)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request in either the internal or the backend shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the API base URL, query string included
    pub path: String,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>, body: Option<serde_json::Value>) -> Self {
        Self {
            method,
            path: path.into(),
            body,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path, None)
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::Post, path, Some(body))
    }

    pub fn put(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::Put, path, Some(body))
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path, None)
    }

    /// Path without the query string.
    pub fn route(&self) -> &str {
        self.path.split('?').next().unwrap_or_default()
    }
}

/// A response in either the backend or the internal shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: u16,
    /// Parsed JSON body; `null` when empty
    pub body: serde_json::Value,
}

impl ApiResponse {
    pub fn new(status: u16, body: serde_json::Value) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Build the internal request that replays a queued operation.
///
/// Updates and deletes must target a server id: an operation still pointing
/// at a provisional id means its create was never applied.
pub fn build_request(catalog: &Catalog, op: &PendingOperation) -> Result<ApiRequest> {
    let def = catalog.get(&op.entity_type)?;

    match op.kind {
        OpKind::Create => Ok(ApiRequest::post(def.endpoint.clone(), op.payload.clone())),
        _ if op.targets_provisional() => Err(Error::UnresolvedProvisionalId(op.entity_id.clone())),
        OpKind::Update => Ok(ApiRequest::put(def.item_path(&op.entity_id), op.payload.clone())),
        OpKind::Delete => Ok(ApiRequest::delete(def.item_path(&op.entity_id))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn idempotent_methods() {
        assert!(Method::Get.is_idempotent());
        assert!(Method::Put.is_idempotent());
        assert!(Method::Delete.is_idempotent());
        assert!(!Method::Post.is_idempotent());
        assert!(!Method::Patch.is_idempotent());
    }

    #[test]
    fn route_strips_query() {
        let req = ApiRequest::get("/api/v1/cows?user_id=7");
        assert_eq!(req.route(), "/api/v1/cows");
    }

    #[test]
    fn build_create_request() {
        let catalog = Catalog::standard();
        let op = PendingOperation::new(1, OpKind::Create, "cow", "local-1", json!({"name": "Daisy"}), 0);

        let req = build_request(&catalog, &op).unwrap();
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.path, "/api/v1/cows");
        assert_eq!(req.body, Some(json!({"name": "Daisy"})));
    }

    #[test]
    fn build_update_and_delete_requests() {
        let catalog = Catalog::standard();

        let update = PendingOperation::new(2, OpKind::Update, "feed", "9", json!({"name": "Hay"}), 0);
        let req = build_request(&catalog, &update).unwrap();
        assert_eq!(req.method, Method::Put);
        assert_eq!(req.path, "/api/v1/feeds/custom/9");

        let delete = PendingOperation::new(3, OpKind::Delete, "feed", "9", json!(null), 0);
        let req = build_request(&catalog, &delete).unwrap();
        assert_eq!(req.method, Method::Delete);
        assert!(req.body.is_none());
    }

    #[test]
    fn update_on_provisional_id_is_rejected() {
        let catalog = Catalog::standard();
        let op = PendingOperation::new(2, OpKind::Update, "cow", "local-1", json!({"name": "x"}), 0);

        let result = build_request(&catalog, &op);
        assert!(matches!(result, Err(Error::UnresolvedProvisionalId(id)) if id == "local-1"));
    }

    #[test]
    fn success_statuses() {
        assert!(ApiResponse::new(201, json!({})).is_success());
        assert!(ApiResponse::new(204, json!(null)).is_success());
        assert!(!ApiResponse::new(422, json!({})).is_success());
    }
}
