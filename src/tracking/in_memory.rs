//! In-process tracking store. The primary map and the progress index are updated under the
//! same write lock, so the index never disagrees with a record.

use super::errors::{TrackingError, TrackingResult};
use super::{merge_in_stage, ProgressCursor, TrackingStore};
use crate::models::{DocumentRecord, OrderStamp, StageMapUpdate, StateTransition};
use crate::state_machine::StageState;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;

type IndexKey = (StageState, OrderStamp, String);

#[derive(Debug, Default)]
struct StoreState {
    records: HashMap<String, DocumentRecord>,
    index: BTreeSet<IndexKey>,
}

impl StoreState {
    fn index_key(record: &DocumentRecord) -> IndexKey {
        (
            record.stage_state,
            record.order_stamp,
            record.document_id.clone(),
        )
    }

    fn upsert(&mut self, record: DocumentRecord) {
        if let Some(previous) = self.records.get(&record.document_id) {
            let key = Self::index_key(previous);
            self.index.remove(&key);
        }
        self.index.insert(Self::index_key(&record));
        self.records.insert(record.document_id.clone(), record);
    }

    fn collect<'a>(&self, keys: impl Iterator<Item = &'a IndexKey>, limit: usize) -> Vec<DocumentRecord> {
        keys.filter_map(|(_, _, id)| self.records.get(id))
            .take(limit)
            .cloned()
            .collect()
    }

    fn state_keys(&self, state: StageState) -> Vec<&IndexKey> {
        let lower = (state, OrderStamp::from_micros(i64::MIN), String::new());
        self.index
            .range((Bound::Included(lower), Bound::Unbounded))
            .take_while(|(key_state, _, _)| *key_state == state)
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTrackingStore {
    state: RwLock<StoreState>,
}

impl InMemoryTrackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every record, for inspection in tests and tools
    pub fn all(&self) -> Vec<DocumentRecord> {
        let state = self.state.read();
        let mut records: Vec<_> = state.records.values().cloned().collect();
        records.sort_by(|a, b| a.document_id.cmp(&b.document_id));
        records
    }
}

#[async_trait]
impl TrackingStore for InMemoryTrackingStore {
    async fn create(&self, record: &DocumentRecord) -> TrackingResult<bool> {
        let mut state = self.state.write();
        if state.records.contains_key(&record.document_id) {
            return Ok(false);
        }
        state.upsert(record.clone());
        Ok(true)
    }

    async fn put(&self, record: &DocumentRecord) -> TrackingResult<()> {
        self.state.write().upsert(record.clone());
        Ok(())
    }

    async fn get(&self, document_id: &str) -> TrackingResult<Option<DocumentRecord>> {
        Ok(self.state.read().records.get(document_id).cloned())
    }

    async fn merge_stage_map(
        &self,
        document_id: &str,
        update: &StageMapUpdate,
    ) -> TrackingResult<DocumentRecord> {
        let mut state = self.state.write();
        let mut record = state
            .records
            .get(document_id)
            .cloned()
            .ok_or_else(|| TrackingError::not_found(document_id))?;

        if merge_in_stage(&mut record, update)? {
            state.upsert(record.clone());
        }
        Ok(record)
    }

    async fn transition(
        &self,
        document_id: &str,
        transition: &StateTransition,
    ) -> TrackingResult<DocumentRecord> {
        let mut state = self.state.write();
        let mut record = state
            .records
            .get(document_id)
            .cloned()
            .ok_or_else(|| TrackingError::not_found(document_id))?;

        if record.stage_state != transition.expected {
            return Err(TrackingError::stale_state(
                document_id,
                transition.expected,
                record.stage_state,
            ));
        }

        record.apply_transition(transition);
        state.upsert(record.clone());
        Ok(record)
    }

    async fn query_by_state(
        &self,
        state: StageState,
        ascending: bool,
        limit: usize,
    ) -> TrackingResult<Vec<DocumentRecord>> {
        let store = self.state.read();
        let keys = store.state_keys(state);
        let records = if ascending {
            store.collect(keys.into_iter(), limit)
        } else {
            store.collect(keys.into_iter().rev(), limit)
        };
        Ok(records)
    }

    async fn query_by_state_after(
        &self,
        state: StageState,
        cursor: &ProgressCursor,
        limit: usize,
    ) -> TrackingResult<Vec<DocumentRecord>> {
        let store = self.state.read();
        let after = (state, cursor.order_stamp, cursor.document_id.clone());
        let keys = store
            .index
            .range((Bound::Excluded(after), Bound::Unbounded))
            .take_while(|(key_state, _, _)| *key_state == state);
        Ok(store.collect(keys, limit))
    }
}
