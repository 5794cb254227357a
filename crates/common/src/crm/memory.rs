//! Process-local CRM item store

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use super::{CrmClient, CrmError, CrmItem, ItemFilter};

/// A call received by `InMemoryCrm`, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum CrmCall {
    List(ItemFilter),
    Update { id: String, fields: Value },
    Add { fields: Value },
}

#[derive(Default)]
struct State {
    items: Vec<(String, Map<String, Value>)>,
    calls: Vec<CrmCall>,
    failure: Option<CrmError>,
    next_id: u64,
}

#[derive(Default)]
pub struct InMemoryCrm {
    state: Mutex<State>,
}

impl InMemoryCrm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an existing item, returning its id
    pub async fn insert(&self, fields: Value) -> String {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = state.next_id.to_string();
        state
            .items
            .push((id.clone(), fields.as_object().cloned().unwrap_or_default()));
        id
    }

    /// Make every subsequent call fail with `error`
    pub async fn fail_with(&self, error: CrmError) {
        self.state.lock().await.failure = Some(error);
    }

    pub async fn calls(&self) -> Vec<CrmCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn item(&self, id: &str) -> Option<Value> {
        self.state
            .lock()
            .await
            .items
            .iter()
            .find(|(item_id, _)| item_id == id)
            .map(|(_, fields)| Value::Object(fields.clone()))
    }

    pub async fn item_count(&self) -> usize {
        self.state.lock().await.items.len()
    }
}

#[async_trait]
impl CrmClient for InMemoryCrm {
    async fn item_list(&self, filter: &ItemFilter) -> Result<Vec<CrmItem>, CrmError> {
        let mut state = self.state.lock().await;
        state.calls.push(CrmCall::List(filter.clone()));
        if let Some(error) = state.failure.clone() {
            return Err(error);
        }

        Ok(state
            .items
            .iter()
            .filter(|(_, fields)| filter.matches(fields))
            .map(|(id, _)| CrmItem { id: id.clone() })
            .collect())
    }

    async fn item_update(&self, id: &str, fields: &Value) -> Result<(), CrmError> {
        let mut state = self.state.lock().await;
        state.calls.push(CrmCall::Update {
            id: id.to_string(),
            fields: fields.clone(),
        });
        if let Some(error) = state.failure.clone() {
            return Err(error);
        }

        let (_, existing) = state
            .items
            .iter_mut()
            .find(|(item_id, _)| item_id == id)
            .ok_or_else(|| CrmError::Provider {
                message: format!("Item {} not found", id),
            })?;
        if let Some(update) = fields.as_object() {
            existing.extend(update.clone());
        }
        Ok(())
    }

    async fn item_add(&self, fields: &Value) -> Result<String, CrmError> {
        let mut state = self.state.lock().await;
        state.calls.push(CrmCall::Add {
            fields: fields.clone(),
        });
        if let Some(error) = state.failure.clone() {
            return Err(error);
        }

        state.next_id += 1;
        let id = state.next_id.to_string();
        state
            .items
            .push((id.clone(), fields.as_object().cloned().unwrap_or_default()));
        Ok(id)
    }
}
