//! In-memory storage implementation for testing and development.

use async_trait::async_trait;
use chrono::NaiveDate;
use indexmap::IndexMap;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::error::{StoreResult, UpstreamResult};
use crate::traits::store::{DedupLedger, RecordQuery, RecordStore};
use crate::types::{
    decision::{Decision, Destination},
    message::ProcessedKey,
    query::{DashboardStats, PageRequest, RecordFilter, RecordPage, SourceCount},
};

#[derive(Default)]
struct Tables {
    relevant: IndexMap<ProcessedKey, Decision>,
    uncategorized: IndexMap<ProcessedKey, Decision>,
    processed: HashSet<ProcessedKey>,
}

impl Tables {
    fn table(&self, destination: Destination) -> &IndexMap<ProcessedKey, Decision> {
        match destination {
            Destination::Relevant => &self.relevant,
            Destination::Uncategorized => &self.uncategorized,
        }
    }

    fn table_mut(&mut self, destination: Destination) -> &mut IndexMap<ProcessedKey, Decision> {
        match destination {
            Destination::Relevant => &mut self.relevant,
            Destination::Uncategorized => &mut self.uncategorized,
        }
    }

    fn all(&self) -> impl Iterator<Item = &Decision> {
        self.relevant.values().chain(self.uncategorized.values())
    }
}

/// In-memory ledger and record tables.
///
/// Clones share the same tables, so one instance can be handed to the
/// pipeline as both store and ledger and inspected afterwards. Data is lost
/// on restart.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows written to a destination, in append order.
    pub fn records(&self, destination: Destination) -> Vec<Decision> {
        self.tables
            .read()
            .unwrap()
            .table(destination)
            .values()
            .cloned()
            .collect()
    }

    /// Number of rows across both destinations.
    pub fn record_count(&self) -> usize {
        let tables = self.tables.read().unwrap();
        tables.relevant.len() + tables.uncategorized.len()
    }

    /// Clear all stored data.
    pub fn clear(&self) {
        let mut tables = self.tables.write().unwrap();
        tables.relevant.clear();
        tables.uncategorized.clear();
        tables.processed.clear();
    }
}

#[async_trait]
impl DedupLedger for MemoryStore {
    async fn seen(&self, key: &ProcessedKey) -> StoreResult<bool> {
        Ok(self.tables.read().unwrap().processed.contains(key))
    }

    async fn mark(&self, key: &ProcessedKey) -> StoreResult<()> {
        self.tables.write().unwrap().processed.insert(key.clone());
        Ok(())
    }

    async fn mark_all(&self, keys: &[ProcessedKey]) -> StoreResult<()> {
        self.tables
            .write()
            .unwrap()
            .processed
            .extend(keys.iter().cloned());
        Ok(())
    }

    async fn len(&self) -> StoreResult<usize> {
        Ok(self.tables.read().unwrap().processed.len())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn append_rows(&self, destination: Destination, rows: &[Decision]) -> UpstreamResult<()> {
        let mut tables = self.tables.write().unwrap();
        let table = tables.table_mut(destination);
        for row in rows {
            table.insert(row.key().clone(), row.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl RecordQuery for MemoryStore {
    async fn list(&self, filter: &RecordFilter, page: PageRequest) -> StoreResult<RecordPage> {
        let matching: Vec<Decision> = self
            .tables
            .read()
            .unwrap()
            .all()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect();

        Ok(RecordPage::paginate(matching, page))
    }

    async fn stats(&self, today: NaiveDate) -> StoreResult<DashboardStats> {
        let tables = self.tables.read().unwrap();
        Ok(DashboardStats::from_records(tables.all(), today))
    }

    async fn sources(&self) -> StoreResult<Vec<SourceCount>> {
        let tables = self.tables.read().unwrap();
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for record in tables.all() {
            *counts.entry(record.meta().source.as_str()).or_insert(0) += 1;
        }

        Ok(counts
            .into_iter()
            .map(|(name, count)| SourceCount {
                name: name.to_string(),
                count,
            })
            .collect())
    }

    async fn get(&self, key: &ProcessedKey) -> StoreResult<Option<Decision>> {
        let tables = self.tables.read().unwrap();
        Ok(Destination::ALL
            .iter()
            .find_map(|d| tables.table(*d).get(key).cloned()))
    }
}
