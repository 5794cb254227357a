//! CRM webhook client
//!
//! Every call is a JSON POST to `{webhook_url}/{method}.json`. Each HTTP
//! attempt carries the configured timeout and the whole call goes through
//! the retry policy.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::{id_to_string, CrmClient, CrmError, CrmItem, ItemFilter, RetryPolicy};
use crate::config::CrmConfig;
use crate::metrics::record_crm_request;

const METHOD_LIST: &str = "crm.item.list";
const METHOD_UPDATE: &str = "crm.item.update";
const METHOD_ADD: &str = "crm.item.add";

pub struct WebhookCrmClient {
    http: reqwest::Client,
    base_url: String,
    entity_type_id: u32,
    retry: RetryPolicy,
}

impl WebhookCrmClient {
    pub fn new(config: &CrmConfig) -> Result<Self, CrmError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| CrmError::Transport {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            http,
            base_url: config.webhook_url.trim_end_matches('/').to_string(),
            entity_type_id: config.entity_type_id,
            retry: RetryPolicy::from_config(config),
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}.json", self.base_url, method)
    }

    async fn call(&self, method: &str, body: &Value) -> Result<Value, CrmError> {
        self.retry
            .run(method, || self.call_once(method, body))
            .await
    }

    async fn call_once(&self, method: &str, body: &Value) -> Result<Value, CrmError> {
        let response = match self.http.post(self.url(method)).json(body).send().await {
            Ok(response) => response,
            Err(e) => {
                record_crm_request(method, "error");
                return Err(if e.is_timeout() {
                    CrmError::Timeout
                } else {
                    CrmError::Transport {
                        message: e.to_string(),
                    }
                });
            }
        };

        let status = response.status();
        record_crm_request(method, status.as_str());

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CrmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                CrmError::Timeout
            } else {
                CrmError::MalformedResponse {
                    message: e.to_string(),
                }
            }
        })?;

        if let Some(error) = payload.get("error") {
            let message = payload
                .get("error_description")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(CrmError::Provider { message });
        }

        debug!(method = method, "CRM call succeeded");
        Ok(payload)
    }
}

/// Identifier of a newly added item: `result.item.id`, or `result.id`
pub fn created_item_id(payload: &Value) -> Option<String> {
    let result = payload.get("result")?;
    result
        .get("item")
        .and_then(|item| item.get("id"))
        .and_then(id_to_string)
        .or_else(|| result.get("id").and_then(id_to_string))
}

fn listed_items(payload: &Value) -> Result<Vec<CrmItem>, CrmError> {
    let items = payload
        .get("result")
        .and_then(|result| result.get("items"))
        .and_then(Value::as_array)
        .ok_or_else(|| CrmError::MalformedResponse {
            message: "missing result.items".to_string(),
        })?;

    Ok(items
        .iter()
        .filter_map(|item| item.get("id").and_then(id_to_string))
        .map(|id| CrmItem { id })
        .collect())
}

#[async_trait]
impl CrmClient for WebhookCrmClient {
    async fn item_list(&self, filter: &ItemFilter) -> Result<Vec<CrmItem>, CrmError> {
        let body = json!({
            "entityTypeId": self.entity_type_id,
            "filter": filter.fields(),
            "select": ["id"],
        });
        let payload = self.call(METHOD_LIST, &body).await?;
        listed_items(&payload)
    }

    async fn item_update(&self, id: &str, fields: &Value) -> Result<(), CrmError> {
        let body = json!({
            "entityTypeId": self.entity_type_id,
            "id": id,
            "fields": fields,
        });
        self.call(METHOD_UPDATE, &body).await?;
        Ok(())
    }

    async fn item_add(&self, fields: &Value) -> Result<String, CrmError> {
        let body = json!({
            "entityTypeId": self.entity_type_id,
            "fields": fields,
        });
        let payload = self.call(METHOD_ADD, &body).await?;
        created_item_id(&payload).ok_or_else(|| CrmError::MalformedResponse {
            message: "created item id missing from response".to_string(),
        })
    }
}
