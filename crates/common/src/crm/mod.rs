//! CRM client abstraction
//!
//! Deals are managed through three item operations: list by filter, update by
//! id, and add. Implementations:
//! - `WebhookCrmClient`: REST webhook (base URL + method suffix) with bounded retry
//! - `InMemoryCrm`: process-local item store for tests (`test-util` feature)

#[cfg(any(test, feature = "test-util"))]
mod memory;
mod retry;
mod webhook;

#[cfg(any(test, feature = "test-util"))]
pub use memory::{CrmCall, InMemoryCrm};
pub use retry::RetryPolicy;
pub use webhook::WebhookCrmClient;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

/// CRM call errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CrmError {
    #[error("CRM responded with HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("CRM request failed: {message}")]
    Transport { message: String },

    #[error("CRM request timed out")]
    Timeout,

    #[error("Malformed CRM response: {message}")]
    MalformedResponse { message: String },

    #[error("CRM rejected the request: {message}")]
    Provider { message: String },
}

impl CrmError {
    /// Server errors and calls that never completed are worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            CrmError::Status { status, .. } => *status >= 500,
            CrmError::Transport { .. } | CrmError::Timeout => true,
            CrmError::MalformedResponse { .. } | CrmError::Provider { .. } => false,
        }
    }
}

/// Exact-match filter for `item_list`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemFilter {
    fields: Map<String, Value>,
}

impl ItemFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `field` to equal `value`
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Whether an item's fields satisfy every condition
    pub fn matches(&self, item: &Map<String, Value>) -> bool {
        self.fields
            .iter()
            .all(|(key, expected)| item.get(key) == Some(expected))
    }
}

/// Reference to an existing CRM item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrmItem {
    pub id: String,
}

#[async_trait]
pub trait CrmClient: Send + Sync {
    /// Items matching every condition of `filter`, in provider order
    async fn item_list(&self, filter: &ItemFilter) -> Result<Vec<CrmItem>, CrmError>;

    /// Overwrite the given fields of item `id`
    async fn item_update(&self, id: &str, fields: &Value) -> Result<(), CrmError>;

    /// Create an item, returning its id
    async fn item_add(&self, fields: &Value) -> Result<String, CrmError>;
}

/// Render a CRM id that may arrive as a number or a string
pub(crate) fn id_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
