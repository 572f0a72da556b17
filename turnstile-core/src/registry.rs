//! Catalogue registry owned by the runtime.
//!
//! Catalogues are built once per concrete type and shared by every
//! instance of that type. The registry lives as long as the runtime that
//! owns it and is cleared between test runs.

use crate::error::CoreError;
use dashmap::DashMap;
use std::any::Any;
use std::sync::Arc;

type Entry = Arc<dyn Any + Send + Sync>;

/// Cache of built catalogues keyed by type name.
#[derive(Default)]
pub struct CatalogRegistry {
    entries: DashMap<String, Entry>,
}

impl CatalogRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached catalogue for `type_name`, building it on first
    /// use.
    pub fn get_or_build<T, F>(&self, type_name: &str, build: F) -> Result<Arc<T>, CoreError>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Result<T, CoreError>,
    {
        if let Some(existing) = self.get::<T>(type_name)? {
            return Ok(existing);
        }

        let built: Entry = Arc::new(build()?);
        tracing::debug!("Built catalogue for {}", type_name);

        // A concurrent builder may have won; keep whichever landed first.
        let entry = self
            .entries
            .entry(type_name.to_string())
            .or_insert(built)
            .clone();
        downcast(type_name, entry)
    }

    /// Inserts a catalogue, replacing any previous one under the same name.
    pub fn insert<T>(&self, type_name: &str, catalog: T) -> Arc<T>
    where
        T: Any + Send + Sync,
    {
        let catalog = Arc::new(catalog);
        self.entries
            .insert(type_name.to_string(), catalog.clone() as Entry);
        catalog
    }

    /// Returns the cached catalogue, if one was built.
    pub fn get<T>(&self, type_name: &str) -> Result<Option<Arc<T>>, CoreError>
    where
        T: Any + Send + Sync,
    {
        match self.entries.get(type_name) {
            Some(entry) => downcast(type_name, entry.value().clone()).map(Some),
            None => Ok(None),
        }
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.entries.contains_key(type_name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every cached catalogue.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

fn downcast<T: Any + Send + Sync>(type_name: &str, entry: Entry) -> Result<Arc<T>, CoreError> {
    entry
        .downcast::<T>()
        .map_err(|_| CoreError::CatalogTypeMismatch {
            type_name: type_name.to_string(),
        })
}
