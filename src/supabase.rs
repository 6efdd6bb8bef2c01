//! Supabase (PostgREST) document store.
//!
//! Each collection is a table; a record is inserted as one row and the
//! generated `id` column is read back from the returned representation.

use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info};

use crate::store::{DocumentStore, Record, StoreError};

#[derive(Clone)]
pub struct SupabaseStore {
    client: Client,
    base_url: String,
    service_role_key: String,
}

impl SupabaseStore {
    pub fn new(client: Client, base_url: &str, service_role_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_role_key: service_role_key.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl DocumentStore for SupabaseStore {
    fn name(&self) -> &str {
        "supabase"
    }

    async fn create(&self, collection: &str, record: Record) -> Result<String, StoreError> {
        let url = format!("{}/rest/v1/{}", self.base_url, collection);
        let body = Value::Object(record.stamped());

        debug!("Inserting into {}", collection);

        let resp = self
            .client
            .post(&url)
            .header("apikey", &self.service_role_key)
            .bearer_auth(&self.service_role_key)
            .header("Prefer", "return=representation")
            .json(&body)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                message: text,
            });
        }

        let rows: Vec<Value> = resp.json().await.map_err(|e| StoreError::Rejected {
            status: status.as_u16(),
            message: format!("unreadable insert response: {}", e),
        })?;

        let id = rows
            .first()
            .and_then(|row| row.get("id"))
            .and_then(|id| match id {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .ok_or_else(|| StoreError::Rejected {
                status: status.as_u16(),
                message: "insert response has no id".to_string(),
            })?;

        info!("Inserted {}/{}", collection, id);
        Ok(id)
    }
}
