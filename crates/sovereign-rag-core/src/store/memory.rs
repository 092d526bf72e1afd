//! In-memory [`DocumentStore`] implementation for tests and ephemeral runs.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. Locks are never
//! held across an `.await`.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::Document;

use super::DocumentStore;

/// In-memory store. Contents are lost when the process exits.
pub struct InMemoryStore {
    docs: RwLock<HashMap<String, Document>>,
    sets: RwLock<HashMap<String, Vec<String>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
            sets: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn put(&self, doc: &Document) -> Result<()> {
        let mut docs = self.docs.write().map_err(poisoned)?;
        docs.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Document>> {
        let docs = self.docs.read().map_err(poisoned)?;
        Ok(docs.get(id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut docs = self.docs.write().map_err(poisoned)?;
        Ok(docs.remove(id).is_some())
    }

    async fn add_to_set(&self, set: &str, id: &str) -> Result<()> {
        let mut sets = self.sets.write().map_err(poisoned)?;
        let members = sets.entry(set.to_string()).or_default();
        if !members.iter().any(|m| m == id) {
            members.push(id.to_string());
        }
        Ok(())
    }

    async fn remove_from_set(&self, set: &str, id: &str) -> Result<bool> {
        let mut sets = self.sets.write().map_err(poisoned)?;
        let Some(members) = sets.get_mut(set) else {
            return Ok(false);
        };
        let before = members.len();
        members.retain(|m| m != id);
        Ok(members.len() != before)
    }

    async fn members(&self, set: &str) -> Result<Vec<String>> {
        let sets = self.sets.read().map_err(poisoned)?;
        Ok(sets.get(set).cloned().unwrap_or_default())
    }
}
