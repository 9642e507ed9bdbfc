//! Optimistic writes against cached lists.
//!
//! Each helper snapshots the current value, applies the change locally and
//! tags touched items with `_optimistic: true`. The returned
//! [`OptimisticContext`] must be confirmed or rolled back; until then the key
//! is excluded from persisted snapshots.
//!
//! Lists may be a bare JSON array or an object wrapping one under `data`,
//! `items` or `results` (paginated responses).

use crate::key::QueryKey;
use crate::store::QueryCache;
use msq_core::CacheError;
use serde_json::{Map, Value};

pub const OPTIMISTIC_MARKER: &str = "_optimistic";
pub const TEMP_ID_FIELD: &str = "_temp_id";
const WRAPPED_LIST_FIELDS: [&str; 3] = ["data", "items", "results"];

#[derive(Debug, Clone, PartialEq)]
enum Change {
    Added { temp_id: String },
    Updated { id_field: String, id: Value },
    Removed,
}

/// Undo information for one optimistic write.
#[must_use = "an optimistic write must be confirmed or rolled back"]
#[derive(Debug)]
pub struct OptimisticContext {
    key: QueryKey,
    previous: Option<Value>,
    change: Change,
}

impl OptimisticContext {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Value cached before the write; `None` if the key was empty.
    pub fn previous(&self) -> Option<&Value> {
        self.previous.as_ref()
    }

    /// Temporary id assigned by [`optimistic_add`].
    pub fn temp_id(&self) -> Option<&str> {
        match &self.change {
            Change::Added { temp_id } => Some(temp_id),
            _ => None,
        }
    }

    /// Restore exactly what was cached before the write.
    pub fn rollback(self, cache: &QueryCache) {
        cache.end_optimistic(&self.key);
        match self.previous {
            Some(previous) => {
                cache.set_query_data(self.key.clone(), previous);
            }
            None => {
                cache.remove_query(&self.key);
            }
        }
        tracing::debug!(key = %self.key, "Rolled back optimistic write");
    }

    /// Accept the write. `server_value` replaces the optimistic item when given.
    pub fn confirm(self, cache: &QueryCache, server_value: Option<Value>) {
        let change = self.change;
        cache.update_query_data(&self.key, |current| {
            let mut next = current?.clone();
            let settled = match &change {
                Change::Added { temp_id } => settle_item(
                    &mut next,
                    |item| item.get(TEMP_ID_FIELD).and_then(Value::as_str) == Some(temp_id.as_str()),
                    server_value,
                ),
                Change::Updated { id_field, id } => settle_item(
                    &mut next,
                    |item| item.get(id_field).is_some_and(|v| ids_match(v, id)),
                    server_value,
                ),
                Change::Removed => false,
            };
            settled.then_some(next)
        });
        cache.end_optimistic(&self.key);
    }
}

/// Prepend `item` to the cached list under a temporary id.
pub fn optimistic_add(
    cache: &QueryCache,
    key: &QueryKey,
    item: Value,
) -> Result<OptimisticContext, CacheError> {
    let previous = cache.get_query_data(key);
    let temp_id = format!("temp-{}", uuid::Uuid::new_v4());
    let mut item = into_object(item);
    item.insert(TEMP_ID_FIELD.to_string(), Value::String(temp_id.clone()));
    item.insert(OPTIMISTIC_MARKER.to_string(), Value::Bool(true));

    let mut next = previous.clone().unwrap_or_else(|| Value::Array(Vec::new()));
    list_mut(&mut next)
        .ok_or_else(|| CacheError::NotAList {
            key: key.to_string(),
        })?
        .insert(0, Value::Object(item));

    Ok(apply(cache, key, previous, next, Change::Added { temp_id }))
}

/// Merge `patch` into the item whose `id_field` equals `id`.
///
/// Works on lists and on a single cached object (detail queries). Nothing is
/// written when the key is empty.
pub fn optimistic_update(
    cache: &QueryCache,
    key: &QueryKey,
    id_field: &str,
    id: impl Into<Value>,
    patch: Value,
) -> Result<OptimisticContext, CacheError> {
    let id = id.into();
    let previous = cache.get_query_data(key);
    let change = Change::Updated {
        id_field: id_field.to_string(),
        id: id.clone(),
    };
    let Some(mut next) = previous.clone() else {
        return Ok(noop(cache, key, change));
    };

    let matches = |item: &Value| item.get(id_field).is_some_and(|v| ids_match(v, &id));
    let target = if has_list(&next) {
        list_mut(&mut next).and_then(|list| list.iter_mut().find(|item| matches(item)))
    } else if matches(&next) {
        Some(&mut next)
    } else {
        None
    };
    let Some(Value::Object(target)) = target else {
        return Err(not_found(key, id_field, &id));
    };
    if let Value::Object(fields) = patch {
        target.extend(fields);
    }
    target.insert(OPTIMISTIC_MARKER.to_string(), Value::Bool(true));

    Ok(apply(cache, key, previous, next, change))
}

/// Drop the item whose `id_field` equals `id` from the cached list.
pub fn optimistic_remove(
    cache: &QueryCache,
    key: &QueryKey,
    id_field: &str,
    id: impl Into<Value>,
) -> Result<OptimisticContext, CacheError> {
    let id = id.into();
    let previous = cache.get_query_data(key);
    let Some(mut next) = previous.clone() else {
        return Ok(noop(cache, key, Change::Removed));
    };
    let list = list_mut(&mut next).ok_or_else(|| CacheError::NotAList {
        key: key.to_string(),
    })?;
    let before = list.len();
    list.retain(|item| !item.get(id_field).is_some_and(|v| ids_match(v, &id)));
    if list.len() == before {
        return Err(not_found(key, id_field, &id));
    }

    Ok(apply(cache, key, previous, next, Change::Removed))
}

/// Copy of `value` without optimistic items. `None` when the whole value is optimistic.
pub fn strip_optimistic(value: &Value) -> Option<Value> {
    if is_optimistic(value) {
        return None;
    }
    let mut clean = value.clone();
    if let Some(list) = list_mut(&mut clean) {
        list.retain(|item| !is_optimistic(item));
    }
    Some(clean)
}

pub fn is_optimistic(value: &Value) -> bool {
    value.get(OPTIMISTIC_MARKER).and_then(Value::as_bool) == Some(true)
}

/// Backend ids arrive as numbers or numeric strings; treat `42` and `"42"` alike.
pub fn ids_match(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => {
            s.trim() == n.to_string()
        }
        _ => false,
    }
}

fn apply(
    cache: &QueryCache,
    key: &QueryKey,
    previous: Option<Value>,
    next: Value,
    change: Change,
) -> OptimisticContext {
    cache.begin_optimistic(key);
    cache.set_query_data(key.clone(), next);
    OptimisticContext {
        key: key.clone(),
        previous,
        change,
    }
}

fn noop(cache: &QueryCache, key: &QueryKey, change: Change) -> OptimisticContext {
    cache.begin_optimistic(key);
    OptimisticContext {
        key: key.clone(),
        previous: None,
        change,
    }
}

fn not_found(key: &QueryKey, id_field: &str, id: &Value) -> CacheError {
    CacheError::ItemNotFound {
        key: key.to_string(),
        id_field: id_field.to_string(),
        id: id.to_string(),
    }
}

fn into_object(item: Value) -> Map<String, Value> {
    match item {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

fn has_list(value: &Value) -> bool {
    match value {
        Value::Array(_) => true,
        Value::Object(map) => WRAPPED_LIST_FIELDS
            .iter()
            .any(|field| map.get(*field).is_some_and(Value::is_array)),
        _ => false,
    }
}

fn list_mut(value: &mut Value) -> Option<&mut Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(map) => WRAPPED_LIST_FIELDS
            .iter()
            .find(|field| map.get(**field).is_some_and(Value::is_array))
            .copied()
            .and_then(|field| map.get_mut(field))
            .and_then(Value::as_array_mut),
        _ => None,
    }
}

/// Clear the marker on the first matching item, or swap in the server row.
fn settle_item<P>(value: &mut Value, predicate: P, server_value: Option<Value>) -> bool
where
    P: Fn(&Value) -> bool,
{
    let target = if has_list(value) {
        list_mut(value).and_then(|list| list.iter_mut().find(|item| predicate(item)))
    } else if predicate(value) {
        Some(value)
    } else {
        None
    };
    let Some(target) = target else {
        return false;
    };
    match server_value {
        Some(row) => *target = row,
        None => {
            if let Value::Object(map) = target {
                map.remove(OPTIMISTIC_MARKER);
                map.remove(TEMP_ID_FIELD);
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_key;
    use serde_json::json;

    fn seeded(key: &QueryKey, value: Value) -> QueryCache {
        let cache = QueryCache::default();
        cache.set_query_data(key.clone(), value);
        cache
    }

    #[test]
    fn test_add_prepends_marked_item() {
        let key = query_key!["vendors", "list"];
        let cache = seeded(&key, json!([{"vendor_id": 1}]));
        let ctx = optimistic_add(&cache, &key, json!({"company_name": "Acme"})).unwrap();

        let data = cache.get_query_data(&key).unwrap();
        assert_eq!(data.as_array().unwrap().len(), 2);
        assert_eq!(data[0]["_optimistic"], true);
        assert_eq!(data[0]["_temp_id"], ctx.temp_id().unwrap());
        assert!(cache.read(&key).unwrap().is_optimistic());

        ctx.rollback(&cache);
        assert_eq!(cache.get_query_data(&key), Some(json!([{"vendor_id": 1}])));
        assert!(!cache.has_pending_optimistic(&key));
    }

    #[test]
    fn test_add_to_empty_key_then_rollback_restores_absence() {
        let cache = QueryCache::default();
        let key = query_key!["vendors"];
        let ctx = optimistic_add(&cache, &key, json!({"company_name": "Acme"})).unwrap();
        assert!(cache.get_query_data(&key).is_some());
        ctx.rollback(&cache);
        assert!(cache.get_query_data(&key).is_none());
    }

    #[test]
    fn test_confirm_add_swaps_in_server_row() {
        let key = query_key!["vendors"];
        let cache = seeded(&key, json!([]));
        let ctx = optimistic_add(&cache, &key, json!({"company_name": "Acme"})).unwrap();
        ctx.confirm(&cache, Some(json!({"vendor_id": 9, "company_name": "Acme"})));
        assert_eq!(
            cache.get_query_data(&key),
            Some(json!([{"vendor_id": 9, "company_name": "Acme"}]))
        );
        assert!(!cache.has_pending_optimistic(&key));
    }

    #[test]
    fn test_update_wrapped_list_with_string_id() {
        let key = query_key!["td_boqs"];
        let cache = seeded(
            &key,
            json!({"data": [{"boq_id": 42, "status": "Pending_TD_Approval"}], "total": 1}),
        );
        let ctx =
            optimistic_update(&cache, &key, "boq_id", "42", json!({"status": "Approved"})).unwrap();
        let data = cache.get_query_data(&key).unwrap();
        assert_eq!(data["data"][0]["status"], "Approved");
        assert_eq!(data["data"][0]["_optimistic"], true);

        ctx.confirm(&cache, None);
        let data = cache.get_query_data(&key).unwrap();
        assert_eq!(data["data"][0], json!({"boq_id": 42, "status": "Approved"}));
    }

    #[test]
    fn test_update_detail_object() {
        let key = query_key!["boq", 42];
        let cache = seeded(&key, json!({"boq_id": 42, "status": "Draft"}));
        let ctx = optimistic_update(&cache, &key, "boq_id", 42, json!({"status": "Approved"})).unwrap();
        assert_eq!(cache.get_query_data(&key).unwrap()["status"], "Approved");
        ctx.rollback(&cache);
        assert_eq!(
            cache.get_query_data(&key),
            Some(json!({"boq_id": 42, "status": "Draft"}))
        );
    }

    #[test]
    fn test_update_missing_item_is_an_error() {
        let key = query_key!["purchases"];
        let cache = seeded(&key, json!([{"purchase_id": 1}]));
        let err = optimistic_update(&cache, &key, "purchase_id", 2, json!({})).unwrap_err();
        assert!(matches!(err, CacheError::ItemNotFound { .. }));
        assert!(!cache.has_pending_optimistic(&key));
    }

    #[test]
    fn test_remove_then_rollback() {
        let key = query_key!["change_requests"];
        let original = json!([{"cr_id": 1}, {"cr_id": 2}]);
        let cache = seeded(&key, original.clone());
        let ctx = optimistic_remove(&cache, &key, "cr_id", 1).unwrap();
        assert_eq!(cache.get_query_data(&key), Some(json!([{"cr_id": 2}])));
        ctx.rollback(&cache);
        assert_eq!(cache.get_query_data(&key), Some(original));
    }

    #[test]
    fn test_remove_from_non_list_is_an_error() {
        let key = query_key!["boq", 1];
        let cache = seeded(&key, json!("text"));
        assert!(matches!(
            optimistic_remove(&cache, &key, "boq_id", 1),
            Err(CacheError::NotAList { .. })
        ));
    }

    #[test]
    fn test_ids_match_loosely() {
        assert!(ids_match(&json!(42), &json!("42")));
        assert!(ids_match(&json!("abc"), &json!("abc")));
        assert!(!ids_match(&json!(42), &json!("43")));
        assert!(!ids_match(&json!(null), &json!(0)));
    }

    #[test]
    fn test_strip_optimistic() {
        assert_eq!(strip_optimistic(&json!({"_optimistic": true})), None);
        assert_eq!(
            strip_optimistic(&json!({"items": [{"id": 1}, {"id": 2, "_optimistic": true}]})),
            Some(json!({"items": [{"id": 1}]}))
        );
    }
}
