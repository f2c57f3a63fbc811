//! View Query Engine
//!
//! Runs named map/reduce views through an `IndexService` and shapes the
//! answer into a `ViewResult`. Options are validated here, so a malformed
//! query never reaches the index.
//!
//! Implementations of `IndexService`:
//! - `InMemoryIndex`: map/reduce over a keyspace's documents, for tests and embedding

pub mod collate;
pub mod memory;
pub mod options;

pub use collate::collate;
pub use memory::{DesignDocument, Emitter, InMemoryIndex, Reducer, ViewDefinition};
pub use options::{OnError, Stale, ViewQuery};

use crate::error::Result;
use serde::Serialize;
use serde_json::{json, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};

/// One result row. Reduced rows have no document id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub key: Value,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewResult {
    pub success: bool,
    /// `{"total_rows": N}` for map queries
    pub info: Option<Value>,
    pub rows: Vec<ViewRow>,
    pub errors: Option<Value>,
    pub debug: Option<Value>,
}

impl ViewResult {
    pub fn total_rows(&self) -> Option<u64> {
        self.info.as_ref()?.get("total_rows")?.as_u64()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ViewRow> {
        self.rows.iter()
    }
}

impl IntoIterator for ViewResult {
    type Item = ViewRow;
    type IntoIter = std::vec::IntoIter<ViewRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

/// A validated query addressed to one view
#[derive(Debug, Clone, PartialEq)]
pub struct ViewRequest {
    pub design: String,
    pub view: String,
    pub query: ViewQuery,
}

/// What an index hands back before result shaping
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexResponse {
    pub rows: Vec<ViewRow>,
    /// Size of the whole index; None for reduced answers
    pub total_rows: Option<u64>,
    /// Per-document failures the index tolerated
    pub errors: Vec<Value>,
    pub debug: Option<Value>,
}

/// Index subsystem abstraction
pub trait IndexService: Send + Sync + 'static {
    fn query<'a>(
        &'a self,
        request: &'a ViewRequest,
    ) -> Pin<Box<dyn Future<Output = Result<IndexResponse>> + Send + 'a>>;
}

#[derive(Clone)]
pub struct ViewEngine {
    index: Arc<dyn IndexService>,
}

impl ViewEngine {
    pub fn new(index: Arc<dyn IndexService>) -> Self {
        ViewEngine { index }
    }

    /// Parse a JSON option object, then run the query.
    pub async fn query_json(&self, design: &str, view: &str, options: &Value) -> Result<ViewResult> {
        let query = match ViewQuery::from_json(options) {
            Ok(query) => query,
            Err(e) => {
                warn!(design, view, error = %e, "Rejected view options");
                return Err(e);
            }
        };
        self.query(design, view, query).await
    }

    pub async fn query(&self, design: &str, view: &str, query: ViewQuery) -> Result<ViewResult> {
        query.validate()?;
        let request = ViewRequest {
            design: design.to_string(),
            view: view.to_string(),
            query,
        };
        let response = self.index.query(&request).await?;
        debug!(
            design,
            view,
            rows = response.rows.len(),
            stale = request.query.stale.as_str(),
            "View query"
        );
        Ok(shape(&request.query, response))
    }
}

fn shape(query: &ViewQuery, response: IndexResponse) -> ViewResult {
    let success = response.errors.is_empty() || query.on_error == OnError::Continue;
    ViewResult {
        success,
        info: response.total_rows.map(|n| json!({ "total_rows": n })),
        rows: response.rows,
        errors: if response.errors.is_empty() {
            None
        } else {
            Some(Value::Array(response.errors))
        },
        debug: if query.debug { response.debug } else { None },
    }
}

impl std::fmt::Debug for ViewEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewEngine").finish_non_exhaustive()
    }
}
