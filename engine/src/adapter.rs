//! Request adapter: translates between the client's internal API shape and
//! the backend's actual routes and field names.
//!
//! The adapter is a pure transform pair. It narrows known discrepancies and
//! never validates: unmapped paths and unknown fields pass through unchanged.

use crate::{ApiRequest, ApiResponse, Method};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Prefix of the client's internal routes.
const INTERNAL_PREFIX: &str = "/api/v1/";

/// How a backend list envelope is presented to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "camelCase")]
pub enum EnvelopeRule {
    /// Expose backend field `from` under `to` as well, keeping the rest of the body.
    Alias { from: String, to: String },
    /// Lift a bare array, or backend field `from`, into `{to: [...], success: true}`.
    Wrap { from: Option<String>, to: String },
}

/// One row of the endpoint table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointMapping {
    /// Only match this method, any method when `None`
    pub method: Option<Method>,
    /// Internal path pattern, `:name` segments capture parameters
    pub pattern: String,
    /// Backend path pattern, `:name` segments are substituted
    pub target: String,
    /// Field renames as `(internal, backend)`; dotted names address nested objects
    pub fields: Vec<(String, String)>,
    /// Fields never sent to the backend
    pub exclude: Vec<String>,
    pub envelope: Option<EnvelopeRule>,
}

impl EndpointMapping {
    pub fn new(pattern: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            method: None,
            pattern: pattern.into(),
            target: target.into(),
            fields: Vec::new(),
            exclude: Vec::new(),
            envelope: None,
        }
    }

    pub fn for_method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn rename(mut self, internal: impl Into<String>, backend: impl Into<String>) -> Self {
        self.fields.push((internal.into(), backend.into()));
        self
    }

    pub fn exclude(mut self, field: impl Into<String>) -> Self {
        self.exclude.push(field.into());
        self
    }

    pub fn alias(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.envelope = Some(EnvelopeRule::Alias {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    pub fn wrap(mut self, from: Option<&str>, to: impl Into<String>) -> Self {
        self.envelope = Some(EnvelopeRule::Wrap {
            from: from.map(str::to_string),
            to: to.into(),
        });
        self
    }

    fn matches_method(&self, method: Method) -> bool {
        self.method.map_or(true, |m| m == method)
    }

    /// Capture `:name` parameters if `route` matches the pattern.
    fn capture(&self, route: &str) -> Option<HashMap<String, String>> {
        let pattern: Vec<&str> = self.pattern.split('/').collect();
        let actual: Vec<&str> = route.split('/').collect();
        if pattern.len() != actual.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (p, a) in pattern.iter().zip(&actual) {
            if let Some(name) = p.strip_prefix(':') {
                params.insert(name.to_string(), (*a).to_string());
            } else if p != a {
                return None;
            }
        }
        Some(params)
    }

    fn render_target(&self, params: &HashMap<String, String>) -> String {
        self.target
            .split('/')
            .map(|segment| {
                segment
                    .strip_prefix(':')
                    .and_then(|name| params.get(name))
                    .map_or(segment, String::as_str)
            })
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Result of adapting an internal request.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptedRequest {
    /// Request in the backend's shape
    pub request: ApiRequest,
    /// Internal path the request was built for, needed to adapt its response
    pub original_path: String,
    /// Whether a table entry matched (false means prefix fallback or passthrough)
    pub mapped: bool,
}

/// Static endpoint table plus the transform pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestAdapter {
    mappings: Vec<EndpointMapping>,
}

impl RequestAdapter {
    pub fn new(mappings: Vec<EndpointMapping>) -> Self {
        Self { mappings }
    }

    pub fn mappings(&self) -> &[EndpointMapping] {
        &self.mappings
    }

    /// Find the mapping for a method and route: exact pattern first, then
    /// parameterised patterns in table order.
    fn find(&self, method: Method, route: &str) -> Option<(&EndpointMapping, HashMap<String, String>)> {
        let candidates = || self.mappings.iter().filter(move |m| m.matches_method(method));

        if let Some(exact) = candidates().find(|m| m.pattern == route) {
            return Some((exact, HashMap::new()));
        }
        candidates().find_map(|m| m.capture(route).map(|params| (m, params)))
    }

    /// Rewrite an internal request into the backend's shape.
    pub fn adapt_request(&self, internal: &ApiRequest) -> AdaptedRequest {
        let route = internal.route();
        let query = internal.path.find('?').map(|i| &internal.path[i..]).unwrap_or("");

        let Some((mapping, params)) = self.find(internal.method, route) else {
            let path = match internal.path.strip_prefix(INTERNAL_PREFIX) {
                Some(rest) => format!("/{rest}"),
                None => internal.path.clone(),
            };
            return AdaptedRequest {
                request: ApiRequest::new(internal.method, path, internal.body.as_ref().map(strip_local_fields)),
                original_path: internal.path.clone(),
                mapped: false,
            };
        };

        let body = internal.body.as_ref().map(|body| {
            let mut body = strip_local_fields(body);
            if let Some(obj) = body.as_object_mut() {
                for field in &mapping.exclude {
                    obj.remove(field);
                }
            }
            for (from, to) in &mapping.fields {
                move_field(&mut body, from, to);
            }
            body
        });

        AdaptedRequest {
            request: ApiRequest::new(
                internal.method,
                format!("{}{}", mapping.render_target(&params), query),
                body,
            ),
            original_path: internal.path.clone(),
            mapped: true,
        }
    }

    /// Translate a backend response back into the client's internal shape.
    ///
    /// Only successful responses with a body are transformed; error bodies
    /// pass through so their `detail`/`message` stays intact.
    pub fn adapt_response(&self, original: &ApiRequest, mut response: ApiResponse) -> ApiResponse {
        if !response.is_success() || response.body.is_null() {
            return response;
        }
        let Some((mapping, _)) = self.find(original.method, original.route()) else {
            return response;
        };

        for_each_record(&mut response.body, &mut |record| {
            for (internal, backend) in &mapping.fields {
                move_field(record, backend, internal);
            }
        });

        if let Some(rule) = &mapping.envelope {
            response.body = apply_envelope(rule, response.body);
        }
        response
    }

    /// The endpoint table of the field application's backend.
    pub fn standard() -> Self {
        Self::new(vec![
            // Auth
            EndpointMapping::new("/api/v1/users/register", "/auth/register"),
            EndpointMapping::new("/api/v1/users/login", "/auth/login"),
            EndpointMapping::new("/api/v1/users/verify-pin", "/auth/verify-pin"),
            EndpointMapping::new("/api/v1/users/change-pin", "/auth/change-pin"),
            EndpointMapping::new("/api/v1/users/:id", "/auth/get-user-info"),
            // Cow profiles
            EndpointMapping::new("/api/v1/cows", "/cow-profiles/")
                .rename("user_id", "app_user_id")
                .alias("cow_profiles", "cows"),
            EndpointMapping::new("/api/v1/cows/:id", "/cow-profiles/detail/:id")
                .rename("user_id", "app_user_id"),
            // Feeds
            EndpointMapping::new("/api/v1/feeds/master", "/feeds/").wrap(Some("master_feeds"), "feeds"),
            EndpointMapping::new("/api/v1/feeds/custom", "/custom-feeds/"),
            EndpointMapping::new("/api/v1/feeds/custom/:id", "/custom-feeds/:id"),
            EndpointMapping::new("/api/v1/feeds/:id", "/feeds/:id"),
            // Diets
            EndpointMapping::new("/api/v1/diet/optimize", "/diet-recommendation-working/"),
            EndpointMapping::new("/api/v1/diet/history", "/bot-diet-history/")
                .wrap(Some("diet_histories"), "diets"),
            EndpointMapping::new("/api/v1/diet", "/bot-diet-history/"),
            EndpointMapping::new("/api/v1/diet/:id", "/bot-diet-history/:id"),
            EndpointMapping::new("/api/v1/diet/:id/evaluate", "/bot-diet-history/:id/evaluate"),
            // Milk logs
            EndpointMapping::new("/api/v1/milk-logs", "/bot-daily-logs/").wrap(Some("logs"), "milkLogs"),
            EndpointMapping::new("/api/v1/milk-logs/:id", "/bot-daily-logs/:id"),
            // Organizations
            EndpointMapping::new("/api/v1/organizations", "/organizations/"),
            EndpointMapping::new("/api/v1/organizations/:id", "/organizations/:id"),
            EndpointMapping::new("/api/v1/organizations/:id/users", "/organizations/:id/users"),
            EndpointMapping::new("/api/v1/organizations/:id/farmers", "/organizations/:id/farmers"),
            // Farmer profiles
            EndpointMapping::new("/api/v1/farmer-profiles", "/farmer-profiles/"),
            EndpointMapping::new("/api/v1/farmer-profiles/:id", "/farmer-profiles/:id"),
            EndpointMapping::new("/api/v1/farmer-profiles/:id/cows", "/farmer-profiles/:id/cows"),
            EndpointMapping::new("/api/v1/farmer-profiles/:id/summary", "/farmer-profiles/:id/summary"),
            // Yield data
            EndpointMapping::new("/api/v1/yield-data", "/yield-data/"),
            EndpointMapping::new("/api/v1/yield-data/farmer/:id", "/yield-data/farmer/:id"),
            EndpointMapping::new("/api/v1/yield-data/cow/:id", "/yield-data/cow/:id"),
            EndpointMapping::new(
                "/api/v1/yield-data/analytics/organization/:id",
                "/yield-data/analytics/organization/:id",
            ),
            EndpointMapping::new("/api/v1/yield-data/:id", "/yield-data/:id"),
        ])
    }
}

/// Drop top-level local bookkeeping fields (`_synced`, `_deleted`, ...).
fn strip_local_fields(body: &Value) -> Value {
    match body {
        Value::Object(obj) => Value::Object(
            obj.iter()
                .filter(|(key, _)| !key.starts_with('_'))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Move the value at dotted path `from` to dotted path `to`, creating
/// intermediate objects. Missing sources and non-object targets are left alone.
fn move_field(value: &mut Value, from: &str, to: &str) {
    let Some(taken) = take_path(value, from) else {
        return;
    };
    if !put_path(value, to, taken.clone()) {
        // Could not place it; restore the original shape.
        put_path(value, from, taken);
    }
}

fn take_path(value: &mut Value, path: &str) -> Option<Value> {
    let (parents, leaf) = match path.rsplit_once('.') {
        Some((parents, leaf)) => (Some(parents), leaf),
        None => (None, path),
    };
    let mut current = value;
    if let Some(parents) = parents {
        for key in parents.split('.') {
            current = current.as_object_mut()?.get_mut(key)?;
        }
    }
    current.as_object_mut()?.remove(leaf)
}

fn put_path(value: &mut Value, path: &str, new: Value) -> bool {
    let mut keys: Vec<&str> = path.split('.').collect();
    let Some(leaf) = keys.pop() else {
        return false;
    };
    let mut current = value;
    for key in keys {
        let Some(obj) = current.as_object_mut() else {
            return false;
        };
        current = obj.entry(key).or_insert_with(|| Value::Object(Map::new()));
    }
    match current.as_object_mut() {
        Some(obj) => {
            obj.insert(leaf.to_string(), new);
            true
        }
        None => false,
    }
}

/// Visit every record in a response body: the body itself when it is an
/// object, and each object inside a top-level array or array-valued field.
fn for_each_record(body: &mut Value, visit: &mut impl FnMut(&mut Value)) {
    if let Value::Array(items) = body {
        items.iter_mut().filter(|v| v.is_object()).for_each(|v| visit(v));
        return;
    }
    let Some(obj) = body.as_object_mut() else {
        return;
    };
    for value in obj.values_mut() {
        if let Value::Array(items) = value {
            items.iter_mut().filter(|v| v.is_object()).for_each(|v| visit(v));
        }
    }
    visit(body);
}

fn apply_envelope(rule: &EnvelopeRule, body: Value) -> Value {
    match rule {
        EnvelopeRule::Alias { from, to } => match body {
            Value::Object(mut obj) => {
                if let Some(list) = obj.get(from).cloned() {
                    obj.insert(to.clone(), list);
                }
                Value::Object(obj)
            }
            other => other,
        },
        EnvelopeRule::Wrap { from, to } => {
            let list = match (&body, from) {
                (Value::Array(_), _) => Some(body.clone()),
                (Value::Object(obj), Some(from)) => obj.get(from).cloned(),
                _ => None,
            };
            match list {
                Some(list) => {
                    let mut wrapped = Map::new();
                    wrapped.insert(to.clone(), list);
                    wrapped.insert("success".to_string(), Value::Bool(true));
                    Value::Object(wrapped)
                }
                None => body,
            }
        }
    }
}
