//! Edge case tests for fieldsync-engine
//!
//! These tests cover boundary conditions and unusual inputs.

use fieldsync_engine::{
    build_request, classify_status, extract_detail, ApiRequest, ApiResponse, Attempt, Catalog,
    EndpointMapping, Error, FailureKind, Method, NewOperation, OpKind, PendingOperation,
    RequestAdapter, RetryPolicy,
};
use serde_json::json;
use std::time::Duration;

// ============================================================================
// Path Edge Cases
// ============================================================================

#[test]
fn trailing_slash_is_not_the_same_route() {
    let adapter = RequestAdapter::standard();

    // "/api/v1/cows/" has an empty last segment, so it matches "/api/v1/cows/:id"
    // with an empty id rather than the collection route.
    let adapted = adapter.adapt_request(&ApiRequest::get("/api/v1/cows/"));
    assert_eq!(adapted.request.path, "/cow-profiles/detail/");
}

#[test]
fn unicode_path_parameters() {
    let adapter = RequestAdapter::standard();
    let adapted = adapter.adapt_request(&ApiRequest::get("/api/v1/farmer-profiles/ラム/summary"));
    assert_eq!(adapted.request.path, "/farmer-profiles/ラム/summary");
}

#[test]
fn query_only_on_unmapped_path() {
    let adapter = RequestAdapter::standard();
    let adapted = adapter.adapt_request(&ApiRequest::get("/api/v1/?x=1"));
    assert_eq!(adapted.request.path, "/?x=1");
    assert!(!adapted.mapped);
}

#[test]
fn empty_table_strips_prefix_only() {
    let adapter = RequestAdapter::new(Vec::new());
    let adapted = adapter.adapt_request(&ApiRequest::delete("/api/v1/cows/42"));
    assert_eq!(adapted.request.path, "/cows/42");
    assert_eq!(adapted.request.method, Method::Delete);
}

#[test]
fn deep_parameterised_routes() {
    let adapter = RequestAdapter::standard();

    let adapted = adapter.adapt_request(&ApiRequest::get("/api/v1/yield-data/analytics/organization/12"));
    assert_eq!(adapted.request.path, "/yield-data/analytics/organization/12");

    let adapted = adapter.adapt_request(&ApiRequest::post("/api/v1/diet/9/evaluate", json!({"score": 4})));
    assert_eq!(adapted.request.path, "/bot-diet-history/9/evaluate");
}

// ============================================================================
// Body Edge Cases
// ============================================================================

#[test]
fn non_object_bodies_pass_through() {
    let adapter = RequestAdapter::standard();

    for body in [json!([1, 2, 3]), json!("text"), json!(42), json!(null)] {
        let adapted = adapter.adapt_request(&ApiRequest::post("/api/v1/cows", body.clone()));
        assert_eq!(adapted.request.body, Some(body));
    }
}

#[test]
fn rename_onto_existing_field_overwrites() {
    let adapter = RequestAdapter::standard();
    let adapted = adapter.adapt_request(&ApiRequest::post(
        "/api/v1/cows",
        json!({"user_id": "new", "app_user_id": "old"}),
    ));
    assert_eq!(adapted.request.body.unwrap(), json!({"app_user_id": "new"}));
}

#[test]
fn rename_into_scalar_parent_keeps_source() {
    let adapter = RequestAdapter::new(vec![
        EndpointMapping::new("/api/v1/things", "/things/").rename("weight", "animal.weight")
    ]);
    let adapted = adapter.adapt_request(&ApiRequest::post(
        "/api/v1/things",
        json!({"weight": 5, "animal": "cow"}),
    ));
    assert_eq!(adapted.request.body.unwrap(), json!({"weight": 5, "animal": "cow"}));
}

#[test]
fn nested_local_fields_are_kept() {
    // Only top-level bookkeeping fields are local; nested data belongs to the record.
    let adapter = RequestAdapter::standard();
    let adapted = adapter.adapt_request(&ApiRequest::post(
        "/api/v1/diet/optimize",
        json!({"_synced": true, "input": {"_note": "keep"}}),
    ));
    assert_eq!(adapted.request.body.unwrap(), json!({"input": {"_note": "keep"}}));
}

#[test]
fn wrap_ignores_objects_without_source_field() {
    let adapter = RequestAdapter::standard();
    let original = ApiRequest::get("/api/v1/diet/history");
    let response = ApiResponse::new(200, json!({"success": false, "error": "none"}));

    let internal = adapter.adapt_response(&original, response.clone());
    assert_eq!(internal, response);
}

#[test]
fn empty_response_body_passes_through() {
    let adapter = RequestAdapter::standard();
    let original = ApiRequest::delete("/api/v1/cows/42");
    let response = ApiResponse::new(204, json!(null));

    assert_eq!(adapter.adapt_response(&original, response.clone()), response);
}

#[test]
fn response_renames_apply_to_bare_lists() {
    let adapter = RequestAdapter::standard();
    let original = ApiRequest::get("/api/v1/cows");
    let response = ApiResponse::new(200, json!([{"id": 1, "app_user_id": "u"}, 5]));

    let internal = adapter.adapt_response(&original, response);
    assert_eq!(internal.body, json!([{"id": 1, "user_id": "u"}, 5]));
}

// ============================================================================
// Operation Edge Cases
// ============================================================================

#[test]
fn build_request_for_unknown_type() {
    let op = PendingOperation::new(1, OpKind::Create, "goat", "local-1", json!({}), 0);
    let result = build_request(&Catalog::standard(), &op);
    assert!(matches!(result, Err(Error::UnknownEntityType(t)) if t == "goat"));
}

#[test]
fn delete_on_provisional_id_is_unresolved() {
    let op = PendingOperation::new(1, OpKind::Delete, "cow", "local-abc", json!(null), 0);
    let result = build_request(&Catalog::standard(), &op);
    assert!(matches!(result, Err(Error::UnresolvedProvisionalId(_))));
}

#[test]
fn create_on_provisional_id_is_fine() {
    let op = PendingOperation::new(1, OpKind::Create, "milk_log", "local-abc", json!({}), 0);
    let request = build_request(&Catalog::standard(), &op).unwrap();
    assert_eq!(request.path, "/api/v1/milk-logs");
}

#[test]
fn integer_where_float_expected_is_accepted() {
    let catalog = Catalog::standard();
    let op = NewOperation::create("cow", "local-1", json!({"name": "Daisy", "weight_kg": 450}));
    assert!(catalog.validate_operation(&op).is_ok());
}

#[test]
fn very_large_payload_validates() {
    let notes = "x".repeat(100_000);
    let op = NewOperation::create("cow", "local-1", json!({"name": "Daisy", "notes": notes}));
    assert!(Catalog::standard().validate_operation(&op).is_ok());
}

// ============================================================================
// Retry and Classification Edge Cases
// ============================================================================

#[test]
fn zero_attempts_is_clamped_to_one() {
    let policy = RetryPolicy::new(0, Duration::from_millis(10));
    assert_eq!(policy.max_attempts, 1);
    assert!(!policy.should_retry(Method::Get, Attempt::ConnectFailed, 1));
}

#[test]
fn huge_attempt_number_does_not_overflow() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.delay_for(u32::MAX), policy.max_delay);
}

#[test]
fn unusual_status_codes() {
    assert_eq!(classify_status(100, &json!(null)), Some(FailureKind::ValidationRejected));
    assert_eq!(classify_status(308, &json!(null)), Some(FailureKind::ValidationRejected));
    assert_eq!(classify_status(599, &json!(null)), Some(FailureKind::ServerError));
}

#[test]
fn forbidden_with_validation_list() {
    let body = json!({"detail": [{"msg": "Invalid token signature"}]});
    assert_eq!(classify_status(403, &body), Some(FailureKind::Unauthorized));
}

#[test]
fn detail_ignores_non_string_fields() {
    assert_eq!(extract_detail(&json!({"detail": 5, "message": "fallback"})), "fallback");
    assert_eq!(extract_detail(&json!({"code": 7})), r#"{"code":7}"#);
}
