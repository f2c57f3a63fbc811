//! In-memory map/reduce index over a keyspace.
//!
//! Each view keeps a sorted snapshot of its emitted rows. `stale` decides
//! whether the snapshot is rebuilt before the query, after it, or not at all.
//! Map functions are Rust closures; reduce functions are the built-ins.

use super::collate::collate;
use super::options::Stale;
use super::{IndexResponse, IndexService, ViewQuery, ViewRequest, ViewRow};
use crate::document::Document;
use crate::error::{Error, Result};
use crate::kv::KvEngine;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

/// Collects the rows a map function emits for one document
#[derive(Debug, Default)]
pub struct Emitter {
    rows: Vec<(Value, Value)>,
    errors: Vec<String>,
}

impl Emitter {
    pub fn emit(&mut self, key: Value, value: Value) {
        self.rows.push((key, value));
    }

    /// Record that this document could not be mapped.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.errors.push(reason.into());
    }
}

pub type MapFn = Arc<dyn Fn(&Document, &mut Emitter) + Send + Sync>;

/// Built-in reduce functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reducer {
    Count,
    Sum,
    Stats,
}

impl Reducer {
    fn reduce(&self, values: &[&Value]) -> Result<Value> {
        match self {
            Reducer::Count => Ok(json!(values.len())),
            Reducer::Sum => {
                let numbers = numbers(values)?;
                Ok(sum_value(&numbers))
            }
            Reducer::Stats => {
                let numbers = numbers(values)?;
                let floats: Vec<f64> = numbers.iter().filter_map(|n| n.as_f64()).collect();
                let min = floats.iter().copied().fold(f64::INFINITY, f64::min);
                let max = floats.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                Ok(json!({
                    "sum": sum_value(&numbers),
                    "count": floats.len(),
                    "min": if floats.is_empty() { Value::Null } else { json!(min) },
                    "max": if floats.is_empty() { Value::Null } else { json!(max) },
                    "sumsqr": floats.iter().map(|f| f * f).sum::<f64>(),
                }))
            }
        }
    }
}

fn numbers<'a>(values: &[&'a Value]) -> Result<Vec<&'a serde_json::Number>> {
    values
        .iter()
        .map(|&v| match v {
            Value::Number(n) => Ok(n),
            other => Err(Error::invalid(format!(
                "built-in reducer expects numbers, got {}",
                other
            ))),
        })
        .collect()
}

fn sum_value(numbers: &[&serde_json::Number]) -> Value {
    let ints: Option<Vec<i64>> = numbers.iter().map(|n| n.as_i64()).collect();
    if let Some(total) = ints.and_then(|v| v.iter().try_fold(0i64, |acc, x| acc.checked_add(*x))) {
        return json!(total);
    }
    json!(numbers.iter().filter_map(|n| n.as_f64()).sum::<f64>())
}

#[derive(Clone)]
pub struct ViewDefinition {
    map: MapFn,
    reduce: Option<Reducer>,
}

impl ViewDefinition {
    pub fn map<F>(map: F) -> Self
    where
        F: Fn(&Document, &mut Emitter) + Send + Sync + 'static,
    {
        ViewDefinition {
            map: Arc::new(map),
            reduce: None,
        }
    }

    /// Map over documents whose content parses as JSON; others are reported
    /// as map errors.
    pub fn json_map<F>(map: F) -> Self
    where
        F: Fn(&str, &Value, &mut Emitter) + Send + Sync + 'static,
    {
        Self::map(move |doc, emitter| match doc.parse_json::<Value>() {
            Ok(value) => map(doc.id(), &value, emitter),
            Err(_) => emitter.fail("document is not JSON"),
        })
    }

    pub fn with_reduce(mut self, reducer: Reducer) -> Self {
        self.reduce = Some(reducer);
        self
    }
}

#[derive(Clone, Default)]
pub struct DesignDocument {
    name: String,
    views: HashMap<String, ViewDefinition>,
}

impl DesignDocument {
    pub fn new(name: impl Into<String>) -> Self {
        DesignDocument {
            name: name.into(),
            views: HashMap::new(),
        }
    }

    pub fn with_view(mut self, name: impl Into<String>, view: ViewDefinition) -> Self {
        self.views.insert(name.into(), view);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone)]
struct IndexEntry {
    key: Value,
    id: String,
    value: Value,
}

#[derive(Debug, Default)]
struct Snapshot {
    entries: Vec<IndexEntry>,
    errors: Vec<Value>,
}

type ViewId = (String, String);

/// Clones share the same designs and snapshots.
#[derive(Clone)]
pub struct InMemoryIndex {
    engine: Arc<KvEngine>,
    designs: Arc<RwLock<HashMap<String, DesignDocument>>>,
    snapshots: Arc<RwLock<HashMap<ViewId, Arc<Snapshot>>>>,
}

impl InMemoryIndex {
    pub fn new(engine: Arc<KvEngine>) -> Self {
        InMemoryIndex {
            engine,
            designs: Arc::new(RwLock::new(HashMap::new())),
            snapshots: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Install or replace a design document. Its views are rebuilt lazily.
    pub fn put_design_document(&self, design: DesignDocument) {
        let name = design.name.clone();
        self.snapshots.write().retain(|(d, _), _| *d != name);
        self.designs.write().insert(name, design);
    }

    /// Bring one view up to date with the keyspace.
    pub fn refresh(&self, design: &str, view: &str) -> Result<()> {
        let definition = self.definition(design, view)?;
        let snapshot = self.build(&definition);
        debug!(design, view, entries = snapshot.entries.len(), "Index refreshed");
        self.snapshots
            .write()
            .insert((design.to_string(), view.to_string()), Arc::new(snapshot));
        Ok(())
    }

    fn definition(&self, design: &str, view: &str) -> Result<ViewDefinition> {
        self.designs
            .read()
            .get(design)
            .and_then(|d| d.views.get(view))
            .cloned()
            .ok_or_else(|| Error::ViewNotFound {
                design: design.to_string(),
                view: view.to_string(),
            })
    }

    fn build(&self, definition: &ViewDefinition) -> Snapshot {
        let mut snapshot = Snapshot::default();
        for doc in self.engine.scan() {
            let mut emitter = Emitter::default();
            (definition.map)(&doc, &mut emitter);
            snapshot
                .entries
                .extend(emitter.rows.into_iter().map(|(key, value)| IndexEntry {
                    key,
                    id: doc.id().to_string(),
                    value,
                }));
            snapshot.errors.extend(
                emitter
                    .errors
                    .into_iter()
                    .map(|reason| json!({ "from": "local", "id": doc.id(), "reason": reason })),
            );
        }
        snapshot
            .entries
            .sort_by(|a, b| collate(&a.key, &b.key).then_with(|| a.id.cmp(&b.id)));
        snapshot
    }

    fn snapshot(&self, design: &str, view: &str, stale: Stale) -> Result<Arc<Snapshot>> {
        if stale == Stale::UpdateBefore {
            self.refresh(design, view)?;
        }
        let id = (design.to_string(), view.to_string());
        if let Some(snapshot) = self.snapshots.read().get(&id) {
            return Ok(snapshot.clone());
        }
        // First query against this view builds its baseline.
        self.refresh(design, view)?;
        self.snapshots
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::ViewNotFound {
                design: design.to_string(),
                view: view.to_string(),
            })
    }

    fn execute(&self, request: &ViewRequest) -> Result<IndexResponse> {
        let definition = self.definition(&request.design, &request.view)?;
        let query = &request.query;
        let snapshot = self.snapshot(&request.design, &request.view, query.stale)?;

        let selected = select(&snapshot.entries, query);
        let reducer = match (definition.reduce, query.reduce) {
            (Some(reducer), None | Some(true)) => Some(reducer),
            _ => None,
        };

        let mut response = match reducer {
            Some(reducer) => IndexResponse {
                rows: reduce_rows(reducer, &selected, query)?,
                total_rows: None,
                ..IndexResponse::default()
            },
            None => {
                if query.group || query.group_level.is_some() {
                    return Err(Error::invalid("grouping requires a view with a reduce function"));
                }
                IndexResponse {
                    rows: selected
                        .iter()
                        .map(|e| ViewRow {
                            id: Some(e.id.clone()),
                            key: e.key.clone(),
                            value: e.value.clone(),
                        })
                        .collect(),
                    total_rows: Some(snapshot.entries.len() as u64),
                    ..IndexResponse::default()
                }
            }
        };

        response.rows = paginate(response.rows, query);
        response.errors = snapshot.errors.clone();
        response.debug = Some(json!({
            "design": request.design,
            "view": request.view,
            "indexed_rows": snapshot.entries.len(),
            "stale": query.stale.as_str(),
        }));

        if query.stale == Stale::UpdateAfter {
            self.refresh(&request.design, &request.view)?;
        }
        Ok(response)
    }
}

impl IndexService for InMemoryIndex {
    /// Map closures run on the blocking pool, so a caller's deadline can
    /// fire while the index is still being built.
    fn query<'a>(
        &'a self,
        request: &'a ViewRequest,
    ) -> Pin<Box<dyn Future<Output = Result<IndexResponse>> + Send + 'a>> {
        let index = self.clone();
        let request = request.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || index.execute(&request))
                .await
                .map_err(|e| Error::Io(std::io::Error::other(e)))?
        })
    }
}

impl std::fmt::Debug for InMemoryIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryIndex")
            .field("designs", &self.designs.read().len())
            .finish()
    }
}

fn cmp_bound(entry: &IndexEntry, key: &Value, doc_id: Option<&str>) -> Ordering {
    collate(&entry.key, key).then_with(|| match doc_id {
        Some(id) => entry.id.as_str().cmp(id),
        None => Ordering::Equal,
    })
}

/// Apply key, keys and range filters in the requested direction.
fn select<'a>(entries: &'a [IndexEntry], query: &ViewQuery) -> Vec<&'a IndexEntry> {
    let ordered: Vec<&IndexEntry> = if query.descending {
        entries.iter().rev().collect()
    } else {
        entries.iter().collect()
    };

    if let Some(keys) = &query.keys {
        return keys
            .iter()
            .flat_map(|k| {
                ordered
                    .iter()
                    .copied()
                    .filter(move |e| collate(&e.key, k) == Ordering::Equal)
            })
            .collect();
    }
    if let Some(key) = &query.key {
        return ordered
            .into_iter()
            .filter(|e| collate(&e.key, key) == Ordering::Equal)
            .collect();
    }

    // In descending order the start bound is the high end.
    let forward = !query.descending;
    ordered
        .into_iter()
        .filter(|e| match &query.start_key {
            Some(start) => {
                let o = cmp_bound(e, start, query.start_key_doc_id.as_deref());
                if forward {
                    o != Ordering::Less
                } else {
                    o != Ordering::Greater
                }
            }
            None => true,
        })
        .filter(|e| match &query.end_key {
            Some(end) => {
                let o = cmp_bound(e, end, query.end_key_doc_id.as_deref());
                match (forward, query.inclusive_end) {
                    (true, true) => o != Ordering::Greater,
                    (true, false) => o == Ordering::Less,
                    (false, true) => o != Ordering::Less,
                    (false, false) => o == Ordering::Greater,
                }
            }
            None => true,
        })
        .collect()
}

fn group_key(key: &Value, level: Option<usize>) -> Value {
    match (key, level) {
        (Value::Array(items), Some(level)) => Value::Array(items.iter().take(level).cloned().collect()),
        _ => key.clone(),
    }
}

fn reduce_rows(reducer: Reducer, selected: &[&IndexEntry], query: &ViewQuery) -> Result<Vec<ViewRow>> {
    let grouping = query.group || query.group_level.is_some();
    if !grouping {
        if query.keys.is_some() {
            return Err(Error::invalid("multi-key reduce queries require group=true"));
        }
        if selected.is_empty() {
            return Ok(Vec::new());
        }
        let values: Vec<&Value> = selected.iter().map(|e| &e.value).collect();
        return Ok(vec![ViewRow {
            id: None,
            key: Value::Null,
            value: reducer.reduce(&values)?,
        }]);
    }

    // group=true without a level groups on the full key.
    let level = query.group_level;
    let mut rows: Vec<ViewRow> = Vec::new();
    let mut current: Option<(Value, Vec<&Value>)> = None;
    for entry in selected {
        let key = group_key(&entry.key, level);
        if let Some((k, values)) = current.as_mut() {
            if collate(k, &key) == Ordering::Equal {
                values.push(&entry.value);
                continue;
            }
        }
        if let Some((k, values)) = current.take() {
            rows.push(ViewRow {
                id: None,
                key: k,
                value: reducer.reduce(&values)?,
            });
        }
        current = Some((key, vec![&entry.value]));
    }
    if let Some((k, values)) = current {
        rows.push(ViewRow {
            id: None,
            key: k,
            value: reducer.reduce(&values)?,
        });
    }
    Ok(rows)
}

fn paginate(rows: Vec<ViewRow>, query: &ViewQuery) -> Vec<ViewRow> {
    let limit = query.limit.unwrap_or(usize::MAX);
    rows.into_iter().skip(query.skip).take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimulatedClock;
    use crate::config::EngineConfig;

    fn index_with(docs: &[(&str, Value)]) -> (Arc<KvEngine>, InMemoryIndex) {
        let engine = Arc::new(KvEngine::new(
            EngineConfig::default(),
            Arc::new(SimulatedClock::default()),
        ));
        for (id, body) in docs {
            engine.upsert(&Document::json(*id, body).unwrap()).unwrap();
        }
        let index = InMemoryIndex::new(engine.clone());
        index.put_design_document(
            DesignDocument::new("sales")
                .with_view(
                    "by_region",
                    ViewDefinition::json_map(|_, doc, emit| {
                        emit.emit(json!([doc["region"], doc["month"]]), doc["amount"].clone())
                    })
                    .with_reduce(Reducer::Sum),
                )
                .with_view(
                    "by_amount",
                    ViewDefinition::json_map(|_, doc, emit| emit.emit(doc["amount"].clone(), Value::Null)),
                ),
        );
        (engine, index)
    }

    fn sales() -> Vec<(&'static str, Value)> {
        vec![
            ("s1", json!({"region": "eu", "month": 1, "amount": 10})),
            ("s2", json!({"region": "eu", "month": 2, "amount": 5})),
            ("s3", json!({"region": "us", "month": 1, "amount": 7})),
            ("s4", json!({"region": "us", "month": 1, "amount": 3})),
        ]
    }

    fn request(view: &str, query: ViewQuery) -> ViewRequest {
        ViewRequest {
            design: "sales".into(),
            view: view.into(),
            query,
        }
    }

    #[test]
    fn test_reduce_without_group_is_single_row() {
        let (_, index) = index_with(&sales());
        let response = index.execute(&request("by_region", ViewQuery::new())).unwrap();
        assert_eq!(response.rows.len(), 1);
        assert_eq!(response.rows[0].key, Value::Null);
        assert_eq!(response.rows[0].value, json!(25));
        assert_eq!(response.total_rows, None);
    }

    #[test]
    fn test_group_levels() {
        let (_, index) = index_with(&sales());
        let full = index
            .execute(&request("by_region", ViewQuery::new().group(true)))
            .unwrap();
        let keys: Vec<Value> = full.rows.iter().map(|r| r.key.clone()).collect();
        assert_eq!(keys, vec![json!(["eu", 1]), json!(["eu", 2]), json!(["us", 1])]);
        assert_eq!(full.rows[2].value, json!(10));

        let by_region = index
            .execute(&request("by_region", ViewQuery::new().group_level(1)))
            .unwrap();
        assert_eq!(by_region.rows.len(), 2);
        assert_eq!(by_region.rows[0].value, json!(15));
    }

    #[test]
    fn test_range_descending_and_pagination() {
        let (_, index) = index_with(&sales());
        let asc = index
            .execute(&request(
                "by_amount",
                ViewQuery::new().range(Some(json!(5)), Some(json!(10))).inclusive_end(false),
            ))
            .unwrap();
        let ids: Vec<_> = asc.rows.iter().filter_map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec!["s2", "s3"]);
        assert_eq!(asc.total_rows, Some(4));

        let desc = index
            .execute(&request(
                "by_amount",
                ViewQuery::new().descending(true).skip(1).limit(2),
            ))
            .unwrap();
        let ids: Vec<_> = desc.rows.iter().filter_map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec!["s3", "s2"]);
    }

    #[test]
    fn test_keys_preserve_request_order() {
        let (_, index) = index_with(&sales());
        let response = index
            .execute(&request(
                "by_amount",
                ViewQuery::new().keys(vec![json!(7), json!(3), json!(99)]),
            ))
            .unwrap();
        let ids: Vec<_> = response.rows.iter().filter_map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec!["s3", "s4"]);
    }

    #[test]
    fn test_stale_snapshot_semantics() {
        let (engine, index) = index_with(&sales());
        let count = |stale| {
            index
                .execute(&request("by_amount", ViewQuery::new().stale(stale)))
                .unwrap()
                .rows
                .len()
        };
        assert_eq!(count(Stale::UpdateBefore), 4);

        engine
            .upsert(&Document::json("s5", &json!({"region": "eu", "month": 3, "amount": 1})).unwrap())
            .unwrap();
        assert_eq!(count(Stale::Ok), 4, "stale read serves the old snapshot");
        assert_eq!(count(Stale::UpdateAfter), 4, "served before the refresh");
        assert_eq!(count(Stale::Ok), 5, "refreshed after the previous query");
    }

    #[test]
    fn test_unknown_view_and_map_errors() {
        let (engine, index) = index_with(&sales());
        let err = index.execute(&request("nope", ViewQuery::new())).unwrap_err();
        assert!(matches!(err, Error::ViewNotFound { .. }));

        engine.upsert(&Document::new("raw", "not json")).unwrap();
        let response = index
            .execute(&request("by_amount", ViewQuery::new().stale(Stale::UpdateBefore)))
            .unwrap();
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0]["id"], "raw");
    }

    #[test]
    fn test_grouping_on_map_view_is_rejected() {
        let (_, index) = index_with(&sales());
        let err = index
            .execute(&request("by_amount", ViewQuery::new().group(true)))
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_reducers() {
        let values = [json!(1), json!(2.5), json!(3)];
        let refs: Vec<&Value> = values.iter().collect();
        assert_eq!(Reducer::Count.reduce(&refs).unwrap(), json!(3));
        assert_eq!(Reducer::Sum.reduce(&refs).unwrap(), json!(6.5));

        let stats = Reducer::Stats.reduce(&refs).unwrap();
        assert_eq!(stats["count"], 3);
        assert_eq!(stats["min"], json!(1.0));
        assert_eq!(stats["max"], json!(3.0));

        let bad = [json!("x")];
        let bad: Vec<&Value> = bad.iter().collect();
        assert!(Reducer::Sum.reduce(&bad).is_err());
    }
}
