//! View query options.
//!
//! Options arrive either through the builder methods or as a JSON object.
//! JSON parsing is strict: an unknown option name or a value of the wrong
//! shape is an `InvalidArgument` error, raised before the index is touched.

use crate::error::{Error, Result};
use serde::Deserialize;
use serde_json::Value;

/// Index freshness requested by a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stale {
    /// Serve whatever the index holds (`stale: true` / `"ok"`)
    #[default]
    Ok,
    /// Bring the index up to date first (`stale: false`)
    UpdateBefore,
    /// Serve the current snapshot, then refresh (`"update_after"`)
    UpdateAfter,
}

impl Stale {
    fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Bool(false) => Ok(Stale::UpdateBefore),
            Value::Bool(true) => Ok(Stale::Ok),
            Value::String(s) => match s.as_str() {
                "ok" => Ok(Stale::Ok),
                "false" => Ok(Stale::UpdateBefore),
                "update_after" => Ok(Stale::UpdateAfter),
                other => Err(Error::invalid(format!(
                    "stale must be true, false, \"ok\" or \"update_after\", got {:?}",
                    other
                ))),
            },
            other => Err(Error::invalid(format!(
                "stale must be a boolean or string, got {}",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stale::Ok => "ok",
            Stale::UpdateBefore => "false",
            Stale::UpdateAfter => "update_after",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnError {
    #[default]
    Continue,
    Stop,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewQuery {
    pub stale: Stale,
    /// None applies the view's reduce function if it has one
    pub reduce: Option<bool>,
    pub key: Option<Value>,
    pub keys: Option<Vec<Value>>,
    pub start_key: Option<Value>,
    pub start_key_doc_id: Option<String>,
    pub end_key: Option<Value>,
    pub end_key_doc_id: Option<String>,
    pub inclusive_end: bool,
    pub descending: bool,
    pub skip: usize,
    pub limit: Option<usize>,
    pub group: bool,
    pub group_level: Option<usize>,
    pub debug: bool,
    pub on_error: OnError,
    pub bbox: Option<[f64; 4]>,
}

impl Default for ViewQuery {
    fn default() -> Self {
        ViewQuery {
            stale: Stale::Ok,
            reduce: None,
            key: None,
            keys: None,
            start_key: None,
            start_key_doc_id: None,
            end_key: None,
            end_key_doc_id: None,
            inclusive_end: true,
            descending: false,
            skip: 0,
            limit: None,
            group: false,
            group_level: None,
            debug: false,
            on_error: OnError::Continue,
            bbox: None,
        }
    }
}

/// Wire shape of the JSON option object
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawQuery {
    stale: Option<Value>,
    reduce: Option<bool>,
    key: Option<Value>,
    keys: Option<Vec<Value>>,
    #[serde(alias = "start_key")]
    startkey: Option<Value>,
    startkey_docid: Option<String>,
    #[serde(alias = "end_key")]
    endkey: Option<Value>,
    endkey_docid: Option<String>,
    inclusive_end: Option<bool>,
    descending: Option<bool>,
    skip: Option<usize>,
    limit: Option<usize>,
    group: Option<bool>,
    group_level: Option<usize>,
    debug: Option<bool>,
    on_error: Option<String>,
    bbox: Option<[f64; 4]>,
}

impl ViewQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an option object such as `{"stale": false, "reduce": false}`.
    pub fn from_json(options: &Value) -> Result<Self> {
        if !options.is_object() {
            return Err(Error::invalid("view options must be a JSON object"));
        }
        let raw: RawQuery = serde_json::from_value(options.clone())?;

        let on_error = match raw.on_error.as_deref() {
            None | Some("continue") => OnError::Continue,
            Some("stop") => OnError::Stop,
            Some(other) => {
                return Err(Error::invalid(format!(
                    "on_error must be \"continue\" or \"stop\", got {:?}",
                    other
                )))
            }
        };

        let query = ViewQuery {
            stale: raw.stale.as_ref().map(Stale::from_json).transpose()?.unwrap_or_default(),
            reduce: raw.reduce,
            key: raw.key,
            keys: raw.keys,
            start_key: raw.startkey,
            start_key_doc_id: raw.startkey_docid,
            end_key: raw.endkey,
            end_key_doc_id: raw.endkey_docid,
            inclusive_end: raw.inclusive_end.unwrap_or(true),
            descending: raw.descending.unwrap_or(false),
            skip: raw.skip.unwrap_or(0),
            limit: raw.limit,
            group: raw.group.unwrap_or(false),
            group_level: raw.group_level,
            debug: raw.debug.unwrap_or(false),
            on_error,
            bbox: raw.bbox,
        };
        query.validate()?;
        Ok(query)
    }

    /// Reject option combinations no index can answer.
    pub fn validate(&self) -> Result<()> {
        if self.key.is_some() && self.keys.is_some() {
            return Err(Error::invalid("key and keys are mutually exclusive"));
        }
        if self.keys.is_some() && (self.start_key.is_some() || self.end_key.is_some()) {
            return Err(Error::invalid("keys cannot be combined with a key range"));
        }
        if self.reduce == Some(false) && (self.group || self.group_level.is_some()) {
            return Err(Error::invalid("group requires reduce"));
        }
        if self.bbox.is_some_and(|b| b.iter().any(|v| !v.is_finite())) {
            return Err(Error::invalid("bbox values must be finite numbers"));
        }
        Ok(())
    }

    pub fn stale(mut self, stale: Stale) -> Self {
        self.stale = stale;
        self
    }

    pub fn reduce(mut self, reduce: bool) -> Self {
        self.reduce = Some(reduce);
        self
    }

    pub fn key(mut self, key: Value) -> Self {
        self.key = Some(key);
        self
    }

    pub fn keys(mut self, keys: Vec<Value>) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn range(mut self, start: Option<Value>, end: Option<Value>) -> Self {
        self.start_key = start;
        self.end_key = end;
        self
    }

    pub fn inclusive_end(mut self, inclusive: bool) -> Self {
        self.inclusive_end = inclusive;
        self
    }

    pub fn descending(mut self, descending: bool) -> Self {
        self.descending = descending;
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn group(mut self, group: bool) -> Self {
        self.group = group;
        self
    }

    pub fn group_level(mut self, level: usize) -> Self {
        self.group_level = Some(level);
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn on_error(mut self, on_error: OnError) -> Self {
        self.on_error = on_error;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_stale_values() {
        let q = |v: Value| ViewQuery::from_json(&json!({ "stale": v })).map(|q| q.stale);
        assert_eq!(q(json!(false)).unwrap(), Stale::UpdateBefore);
        assert_eq!(q(json!(true)).unwrap(), Stale::Ok);
        assert_eq!(q(json!("ok")).unwrap(), Stale::Ok);
        assert_eq!(q(json!("update_after")).unwrap(), Stale::UpdateAfter);
        assert!(q(json!("sometimes")).is_err());
        assert!(q(json!(1)).is_err());
    }

    #[test]
    fn test_defaults() {
        let query = ViewQuery::from_json(&json!({})).unwrap();
        assert_eq!(query, ViewQuery::default());
        assert!(query.inclusive_end);
        assert_eq!(query.reduce, None);
    }

    #[test]
    fn test_unknown_option_is_invalid_argument() {
        let err = ViewQuery::from_json(&json!({"stale": false, "include_docs": true})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(err.to_string().contains("include_docs"));
    }

    #[test]
    fn test_wrong_value_shapes() {
        for bad in [
            json!({"reduce": "yes"}),
            json!({"limit": -1}),
            json!({"keys": "a"}),
            json!({"bbox": [1, 2, 3]}),
            json!({"on_error": "explode"}),
            json!(["stale", false]),
        ] {
            let err = ViewQuery::from_json(&bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "{}", bad);
        }
    }

    #[test]
    fn test_key_aliases() {
        let query = ViewQuery::from_json(&json!({
            "start_key": "a",
            "endkey": "m",
            "startkey_docid": "doc1",
            "inclusive_end": false,
            "descending": true,
            "skip": 2,
            "limit": 10,
        }))
        .unwrap();
        assert_eq!(query.start_key, Some(json!("a")));
        assert_eq!(query.end_key, Some(json!("m")));
        assert_eq!(query.start_key_doc_id.as_deref(), Some("doc1"));
        assert!(!query.inclusive_end);
        assert!(query.descending);
        assert_eq!((query.skip, query.limit), (2, Some(10)));
    }

    #[test]
    fn test_conflicting_options() {
        assert!(ViewQuery::from_json(&json!({"key": 1, "keys": [1]})).is_err());
        assert!(ViewQuery::from_json(&json!({"reduce": false, "group": true})).is_err());
        assert!(ViewQuery::new().reduce(false).group_level(1).validate().is_err());
    }
}
