//! Query key factories, REST endpoints and the dashboard-facing [`Queries`] facade.
//!
//! Key names here are the ones realtime invalidation matches on: list keys
//! start with the plural table name and detail keys contain the
//! `("boq", 42)`-style pair.

use async_trait::async_trait;
use msq_cache::{
    optimistic_add, optimistic_remove, optimistic_update, run_mutation, run_mutation_with,
    CacheRead, KeyMatcher, KeySegment, MutationOptions, QueryCache, QueryFetcher, QueryKey,
    QueryOptions,
};
use msq_core::{Boq, BoqStatus, EntityId, FetchError, ToastSink, Vendor, VendorForm};
use serde_json::{json, Value};
use std::sync::Arc;

fn with_filters(key: QueryKey, filters: Option<Value>) -> QueryKey {
    match filters {
        Some(filters) => key.with(filters),
        None => key,
    }
}

pub mod boq_keys {
    use super::*;

    pub fn all() -> QueryKey {
        QueryKey::new().with("boqs")
    }

    pub fn list(filters: Option<Value>) -> QueryKey {
        with_filters(all().with("list"), filters)
    }

    pub fn detail(boq_id: EntityId) -> QueryKey {
        QueryKey::new().with("boq").with(boq_id)
    }

    pub fn items(boq_id: EntityId) -> QueryKey {
        detail(boq_id).with("items")
    }

    /// Technical Director dashboard, one key per tab.
    pub fn td_list(tab: &str) -> QueryKey {
        QueryKey::new().with("td_boqs").with(tab)
    }

    pub fn pm_list() -> QueryKey {
        QueryKey::new().with("pm_boqs")
    }

    pub fn estimator_list() -> QueryKey {
        QueryKey::new().with("estimator_boqs")
    }
}

/// Every BOQ list a dashboard reads.
fn boq_list_matchers() -> Vec<KeyMatcher> {
    ["boqs", "td_boqs", "pm_boqs", "estimator_boqs"]
        .into_iter()
        .map(KeyMatcher::contains)
        .collect()
}

pub mod purchase_keys {
    use super::*;

    pub fn all() -> QueryKey {
        QueryKey::new().with("purchases")
    }

    pub fn list(filters: Option<Value>) -> QueryKey {
        with_filters(all().with("list"), filters)
    }

    pub fn detail(purchase_id: EntityId) -> QueryKey {
        QueryKey::new().with("purchase").with(purchase_id)
    }
}

pub mod change_request_keys {
    use super::*;

    pub fn all() -> QueryKey {
        QueryKey::new().with("change_requests")
    }

    pub fn list(filters: Option<Value>) -> QueryKey {
        with_filters(all().with("list"), filters)
    }

    pub fn detail(cr_id: EntityId) -> QueryKey {
        QueryKey::new().with("change_request").with(cr_id)
    }
}

pub mod vendor_keys {
    use super::*;

    pub fn all() -> QueryKey {
        QueryKey::new().with("vendors")
    }

    pub fn list(filters: Option<Value>) -> QueryKey {
        with_filters(all().with("list"), filters)
    }

    pub fn detail(vendor_id: EntityId) -> QueryKey {
        QueryKey::new().with("vendor").with(vendor_id)
    }
}

pub mod inspection_keys {
    use super::*;

    pub fn all() -> QueryKey {
        QueryKey::new().with("inspections")
    }

    pub fn list(filters: Option<Value>) -> QueryKey {
        with_filters(all().with("list"), filters)
    }

    pub fn detail(id: EntityId) -> QueryKey {
        QueryKey::new().with("inspection").with(id)
    }
}

pub mod return_request_keys {
    use super::*;

    pub fn all() -> QueryKey {
        QueryKey::new().with("return_requests")
    }

    pub fn list(filters: Option<Value>) -> QueryKey {
        with_filters(all().with("list"), filters)
    }

    pub fn detail(id: EntityId) -> QueryKey {
        QueryKey::new().with("return_request").with(id)
    }
}

pub mod notification_keys {
    use super::*;

    pub fn all() -> QueryKey {
        QueryKey::new().with("notifications")
    }
}

/// A REST path plus query-string pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl Endpoint {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
        }
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Flatten a filter object into query parameters; nulls are skipped.
    fn with_filters(mut self, filters: Option<Value>) -> Self {
        if let Some(Value::Object(map)) = filters {
            for (name, value) in map {
                let value = match value {
                    Value::Null => continue,
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                self.query.push((name, value));
            }
        }
        self
    }
}

/// REST endpoint that serves `key`, if any.
pub fn endpoint_for(key: &QueryKey) -> Option<Endpoint> {
    let segments = key.segments();
    let root = segments.first()?.as_str()?;
    let id = match segments.get(1) {
        Some(KeySegment::Int(id)) => Some(*id),
        _ => None,
    };
    let filters = segments.iter().rev().find_map(|segment| match segment {
        KeySegment::Json(_) => Some(segment.to_json()),
        _ => None,
    });
    let list = |path: &str| Some(Endpoint::new(path).with_filters(filters.clone()));

    match (root, id) {
        ("boqs", _) => list("/api/boqs"),
        ("boq", Some(id)) => match segments.get(2).and_then(KeySegment::as_str) {
            Some("items") => Some(Endpoint::new(format!("/api/boq/{}/items", id))),
            _ => Some(Endpoint::new(format!("/api/boq/{}", id))),
        },
        ("td_boqs", _) => {
            let endpoint = Endpoint::new("/api/td/boqs");
            Some(match segments.get(1).and_then(KeySegment::as_str) {
                Some(tab) => endpoint.with_query("tab", tab),
                None => endpoint,
            })
        }
        ("pm_boqs", _) => list("/api/pm/boqs"),
        ("estimator_boqs", _) => list("/api/estimator/boqs"),
        ("purchases", _) => list("/api/purchases"),
        ("purchase", Some(id)) => Some(Endpoint::new(format!("/api/purchase/{}", id))),
        ("change_requests", _) => list("/api/change-requests"),
        ("change_request", Some(id)) => Some(Endpoint::new(format!("/api/change-request/{}", id))),
        ("vendors", _) => list("/api/vendors"),
        ("vendor", Some(id)) => Some(Endpoint::new(format!("/api/vendor/{}", id))),
        ("inspections", _) => list("/api/inspections"),
        ("inspection", Some(id)) => Some(Endpoint::new(format!("/api/inspection/{}", id))),
        ("return_requests", _) => list("/api/return-requests"),
        ("return_request", Some(id)) => Some(Endpoint::new(format!("/api/return-request/{}", id))),
        ("notifications", _) => Some(Endpoint::new("/api/notifications")),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationMethod {
    Post,
    Put,
    Patch,
    Delete,
}

/// Sends writes to the backend.
#[async_trait]
pub trait MutationTransport: Send + Sync {
    async fn mutate(
        &self,
        method: MutationMethod,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, FetchError>;
}

#[async_trait]
impl MutationTransport for crate::api_client::RestClient {
    async fn mutate(
        &self,
        method: MutationMethod,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, FetchError> {
        let method = match method {
            MutationMethod::Post => reqwest::Method::POST,
            MutationMethod::Put => reqwest::Method::PUT,
            MutationMethod::Patch => reqwest::Method::PATCH,
            MutationMethod::Delete => reqwest::Method::DELETE,
        };
        Ok(self.send_json(method, path, body.as_ref()).await?)
    }
}

/// Cached reads and optimistic writes for the role dashboards.
#[derive(Clone)]
pub struct Queries {
    cache: QueryCache,
    fetcher: Arc<dyn QueryFetcher>,
    transport: Arc<dyn MutationTransport>,
    toasts: Arc<dyn ToastSink>,
    options: QueryOptions,
}

impl Queries {
    pub fn new(
        cache: QueryCache,
        fetcher: Arc<dyn QueryFetcher>,
        transport: Arc<dyn MutationTransport>,
        toasts: Arc<dyn ToastSink>,
    ) -> Self {
        let options = cache.defaults().clone();
        Self {
            cache,
            fetcher,
            transport,
            toasts,
            options,
        }
    }

    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub async fn query(&self, key: &QueryKey) -> Result<CacheRead<Value>, FetchError> {
        self.cache
            .fetch_query(key, &self.options, self.fetcher.as_ref())
            .await
    }

    pub async fn boqs(&self, filters: Option<Value>) -> Result<CacheRead<Value>, FetchError> {
        self.query(&boq_keys::list(filters)).await
    }

    pub async fn boq(&self, boq_id: EntityId) -> Result<CacheRead<Boq>, FetchError> {
        self.cache
            .fetch_typed(&boq_keys::detail(boq_id), &self.options, self.fetcher.as_ref())
            .await
    }

    pub async fn boq_items(&self, boq_id: EntityId) -> Result<CacheRead<Value>, FetchError> {
        self.query(&boq_keys::items(boq_id)).await
    }

    pub async fn td_boqs(&self, tab: &str) -> Result<CacheRead<Value>, FetchError> {
        self.query(&boq_keys::td_list(tab)).await
    }

    pub async fn pm_boqs(&self) -> Result<CacheRead<Value>, FetchError> {
        self.query(&boq_keys::pm_list()).await
    }

    pub async fn estimator_boqs(&self) -> Result<CacheRead<Value>, FetchError> {
        self.query(&boq_keys::estimator_list()).await
    }

    pub async fn purchases(&self, filters: Option<Value>) -> Result<CacheRead<Value>, FetchError> {
        self.query(&purchase_keys::list(filters)).await
    }

    pub async fn purchase(&self, purchase_id: EntityId) -> Result<CacheRead<Value>, FetchError> {
        self.query(&purchase_keys::detail(purchase_id)).await
    }

    pub async fn change_requests(
        &self,
        filters: Option<Value>,
    ) -> Result<CacheRead<Value>, FetchError> {
        self.query(&change_request_keys::list(filters)).await
    }

    pub async fn change_request(&self, cr_id: EntityId) -> Result<CacheRead<Value>, FetchError> {
        self.query(&change_request_keys::detail(cr_id)).await
    }

    pub async fn vendors(&self, filters: Option<Value>) -> Result<CacheRead<Value>, FetchError> {
        self.query(&vendor_keys::list(filters)).await
    }

    pub async fn vendor(&self, vendor_id: EntityId) -> Result<CacheRead<Vendor>, FetchError> {
        self.cache
            .fetch_typed(&vendor_keys::detail(vendor_id), &self.options, self.fetcher.as_ref())
            .await
    }

    pub async fn inspections(&self, filters: Option<Value>) -> Result<CacheRead<Value>, FetchError> {
        self.query(&inspection_keys::list(filters)).await
    }

    pub async fn return_requests(
        &self,
        filters: Option<Value>,
    ) -> Result<CacheRead<Value>, FetchError> {
        self.query(&return_request_keys::list(filters)).await
    }

    /// Move a BOQ to `status`, showing the new status before the server answers.
    ///
    /// The detail entry and every cached dashboard list holding the BOQ are
    /// patched locally; on success they are all invalidated so the server's
    /// row replaces the local guess.
    pub async fn update_boq_status(
        &self,
        boq_id: EntityId,
        status: BoqStatus,
    ) -> Result<Value, FetchError> {
        let detail = boq_keys::detail(boq_id);
        let path = format!("/api/boq/{}/status", boq_id);
        let body = json!({"status": status.as_str()});
        let lists = boq_list_matchers();
        let mut options = MutationOptions::new("Failed to update BOQ status")
            .with_success_message(format!("BOQ moved to {}", status))
            .invalidating(KeyMatcher::sequence([
                KeySegment::from("boq"),
                KeySegment::from(boq_id),
            ]));
        options.invalidate.extend(lists.iter().cloned());

        let mut contexts = Vec::new();
        match optimistic_update(&self.cache, &detail, "boq_id", boq_id, body.clone()) {
            Ok(context) => contexts.push(context),
            Err(err) => tracing::warn!(key = %detail, error = %err, "Optimistic write skipped"),
        }
        for key in self.cache.keys() {
            if !lists.iter().any(|m| m.matches(&key)) {
                continue;
            }
            // Lists that do not hold this BOQ stay untouched.
            if let Ok(context) = optimistic_update(&self.cache, &key, "boq_id", boq_id, body.clone())
            {
                contexts.push(context);
            }
        }

        let transport = &self.transport;
        run_mutation_with(&self.cache, self.toasts.as_ref(), &options, contexts, || {
            transport.mutate(MutationMethod::Patch, &path, Some(body.clone()))
        })
        .await
    }

    /// Validate and create a vendor; the new row shows in the list immediately.
    ///
    /// Field errors come back as [`FetchError::Rejected`] without a request.
    pub async fn create_vendor(&self, form: &VendorForm) -> Result<Value, FetchError> {
        form.validate()
            .map_err(|errors| FetchError::Rejected { errors })?;

        let key = vendor_keys::list(None);
        let payload = form.to_payload();
        let options = MutationOptions::new("Failed to create vendor")
            .with_success_message(format!("Vendor {} created", form.company_name.trim()))
            .invalidating(KeyMatcher::contains("vendors"))
            .confirm_with_response();
        let transport = &self.transport;

        run_mutation(
            &self.cache,
            self.toasts.as_ref(),
            &options,
            |cache| optimistic_add(cache, &key, payload.clone()),
            || transport.mutate(MutationMethod::Post, "/api/vendor", Some(payload.clone())),
        )
        .await
    }

    pub async fn delete_vendor(&self, vendor_id: EntityId) -> Result<Value, FetchError> {
        let key = vendor_keys::list(None);
        let path = format!("/api/vendor/{}", vendor_id);
        let options = MutationOptions::new("Failed to delete vendor")
            .with_success_message("Vendor deleted")
            .invalidating(KeyMatcher::contains("vendors"));
        let transport = &self.transport;

        run_mutation(
            &self.cache,
            self.toasts.as_ref(),
            &options,
            |cache| optimistic_remove(cache, &key, "vendor_id", vendor_id),
            || transport.mutate(MutationMethod::Delete, &path, None),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints() {
        assert_eq!(
            endpoint_for(&boq_keys::detail(42)),
            Some(Endpoint::new("/api/boq/42"))
        );
        assert_eq!(
            endpoint_for(&boq_keys::items(42)).unwrap().path,
            "/api/boq/42/items"
        );
        assert_eq!(
            endpoint_for(&boq_keys::td_list("pending")),
            Some(Endpoint::new("/api/td/boqs").with_query("tab", "pending"))
        );
        assert_eq!(
            endpoint_for(&notification_keys::all()).unwrap().path,
            "/api/notifications"
        );
        assert_eq!(endpoint_for(&QueryKey::new().with("projects")), None);
        assert_eq!(endpoint_for(&QueryKey::new()), None);
    }

    #[test]
    fn test_filters_become_query_params() {
        let key = purchase_keys::list(Some(json!({"status": "pending", "page": 2, "vendor": null})));
        let endpoint = endpoint_for(&key).unwrap();
        assert_eq!(endpoint.path, "/api/purchases");
        let mut query = endpoint.query;
        query.sort();
        assert_eq!(
            query,
            vec![
                ("page".to_string(), "2".to_string()),
                ("status".to_string(), "pending".to_string())
            ]
        );
    }

    #[test]
    fn test_list_keys_fall_under_their_family() {
        let family = KeyMatcher::contains("boqs");
        assert!(family.matches(&boq_keys::list(Some(json!({"page": 1})))));
        assert!(family.matches(&boq_keys::all()));
        assert!(!family.matches(&boq_keys::detail(1)));
        assert!(KeyMatcher::sequence(["boq".into(), KeySegment::Int(7)])
            .matches(&boq_keys::items(7)));
    }
}
