//! Document store interface and the in-memory implementation.
//!
//! Records are JSON objects written once into a named collection; the store
//! assigns an opaque id and stamps any requested server-timestamp fields.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use uuid::Uuid;

use crate::schema::{NewNote, NOTES_COLLECTION};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store rejected the write ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("record is not a JSON object: {0}")]
    InvalidRecord(String),
}

/// A record to create, plus the fields the store fills with its own clock.
#[derive(Debug, Clone)]
pub struct Record {
    pub fields: Map<String, Value>,
    pub server_timestamps: Vec<&'static str>,
}

impl Record {
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self, StoreError> {
        match serde_json::to_value(value) {
            Ok(Value::Object(fields)) => Ok(Self {
                fields,
                server_timestamps: Vec::new(),
            }),
            Ok(other) => Err(StoreError::InvalidRecord(format!("got {}", other))),
            Err(e) => Err(StoreError::InvalidRecord(e.to_string())),
        }
    }

    pub fn with_server_timestamp(mut self, field: &'static str) -> Self {
        self.server_timestamps.push(field);
        self
    }

    /// Fields with every server timestamp set to now (RFC 3339, UTC).
    pub fn stamped(self) -> Map<String, Value> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let mut fields = self.fields;
        for field in self.server_timestamps {
            fields.insert(field.to_string(), Value::String(now.clone()));
        }
        fields
    }
}

/// Append-only document store.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    fn name(&self) -> &str;

    /// Atomically create one record, returning its generated id.
    async fn create(&self, collection: &str, record: Record) -> Result<String, StoreError>;
}

/// Persist a note with a server-assigned `createdAt`.
pub async fn create_note(store: &dyn DocumentStore, note: &NewNote) -> Result<String, StoreError> {
    let record = Record::from_serialize(note)?.with_server_timestamp(NewNote::CREATED_AT_FIELD);
    store.create(NOTES_COLLECTION, record).await
}

/// In-memory store, used for local development and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryDocumentStore {
    inner: Arc<RwLock<HashMap<String, Vec<(String, Map<String, Value>)>>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a record by id.
    pub fn get(&self, collection: &str, id: &str) -> Option<Map<String, Value>> {
        let store = self.inner.read().ok()?;
        store
            .get(collection)?
            .iter()
            .find(|(record_id, _)| record_id == id)
            .map(|(_, fields)| fields.clone())
    }

    /// Number of records in a collection.
    pub fn len(&self, collection: &str) -> usize {
        self.inner
            .read()
            .map(|store| store.get(collection).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryDocumentStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create(&self, collection: &str, record: Record) -> Result<String, StoreError> {
        let id = Uuid::new_v4().simple().to_string();
        let fields = record.stamped();

        let mut store = self
            .inner
            .write()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))?;
        store
            .entry(collection.to_string())
            .or_default()
            .push((id.clone(), fields));

        tracing::debug!("MemoryDocumentStore: created {}/{}", collection, id);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Subject;

    fn note() -> NewNote {
        NewNote {
            title: "Cell biology".to_string(),
            subject: Subject::Biology,
            content: "Cells are the basic unit of life.".to_string(),
            summary: "Cells are basic.".to_string(),
            user_id: "user-1".to_string(),
            pdf_url: "https://example.com/cells.pdf".to_string(),
            original_file_name: "cells.pdf".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = MemoryDocumentStore::new();
        let id = create_note(&store, &note()).await.unwrap();

        let record = store.get(NOTES_COLLECTION, &id).unwrap();
        assert_eq!(record["title"], "Cell biology");
        assert_eq!(record["userId"], "user-1");
        assert_eq!(store.len(NOTES_COLLECTION), 1);
    }

    #[tokio::test]
    async fn test_created_at_is_server_assigned() {
        let store = MemoryDocumentStore::new();
        let before = Utc::now();
        let id = create_note(&store, &note()).await.unwrap();

        let record = store.get(NOTES_COLLECTION, &id).unwrap();
        let created_at = record["createdAt"].as_str().unwrap();
        let parsed = chrono::DateTime::parse_from_rfc3339(created_at).unwrap();
        assert!(parsed.timestamp_millis() >= before.timestamp_millis());
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let store = MemoryDocumentStore::new();
        let a = create_note(&store, &note()).await.unwrap();
        let b = create_note(&store, &note()).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(store.len(NOTES_COLLECTION), 2);
        assert_eq!(store.len("other"), 0);
    }

    #[test]
    fn test_non_object_record_is_rejected() {
        let err = Record::from_serialize(&vec![1, 2, 3]).unwrap_err();
        assert!(matches!(err, StoreError::InvalidRecord(_)));
    }
}
