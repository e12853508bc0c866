//! # Tracking Store
//!
//! Durable keyed store of document records with a secondary progress index on
//! (`stage_state`, `order_stamp`).
//!
//! ## Overview
//!
//! The store is the only shared mutable state of the pipeline. Every mutation is scoped to
//! a single record and atomic:
//!
//! - `merge_stage_map` merges a partial update field by field, and only while the record
//!   is still in the update's stage; an update that changes nothing leaves the record
//!   untouched.
//! - `transition` is a compare-and-set on `stage_state`, so concurrent duplicates of the
//!   same step resolve to one winner and `StaleState` for the rest.
//! - `query_by_state` walks the progress index and never returns a record whose current
//!   state differs from the requested one.

pub mod errors;
pub mod in_memory;
pub mod postgres;

use crate::models::{DocumentRecord, OrderStamp, StageMapUpdate, StateTransition};
use crate::state_machine::StageState;
use async_trait::async_trait;
use std::fmt;

pub use errors::{TrackingError, TrackingResult};
pub use in_memory::InMemoryTrackingStore;
pub use postgres::PostgresTrackingStore;

/// Position in the progress index, used to page through one state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressCursor {
    pub order_stamp: OrderStamp,
    pub document_id: String,
}

impl From<&DocumentRecord> for ProgressCursor {
    fn from(record: &DocumentRecord) -> Self {
        Self {
            order_stamp: record.order_stamp,
            document_id: record.document_id.clone(),
        }
    }
}

/// Merge `update` into `record` if the record is still in the update's stage
pub(crate) fn merge_in_stage(
    record: &mut DocumentRecord,
    update: &StageMapUpdate,
) -> TrackingResult<bool> {
    let stage = StageState::from(update.stage());
    if record.stage_state != stage {
        return Err(TrackingError::stale_state(
            record.document_id.as_str(),
            stage,
            record.stage_state,
        ));
    }
    Ok(record.apply_update(update)?)
}

#[async_trait]
pub trait TrackingStore: Send + Sync + fmt::Debug {
    /// Insert the record unless one already exists for its id; returns whether it was inserted
    async fn create(&self, record: &DocumentRecord) -> TrackingResult<bool>;

    /// Unconditional upsert
    async fn put(&self, record: &DocumentRecord) -> TrackingResult<()>;

    async fn get(&self, document_id: &str) -> TrackingResult<Option<DocumentRecord>>;

    /// Validate and merge a partial stage map update
    ///
    /// Fails with `StaleState` unless the record is in the state of the update's stage,
    /// so maps of stages already left stay as they were promoted.
    async fn merge_stage_map(
        &self,
        document_id: &str,
        update: &StageMapUpdate,
    ) -> TrackingResult<DocumentRecord>;

    /// Apply a state change if the record is still in `transition.expected`
    async fn transition(
        &self,
        document_id: &str,
        transition: &StateTransition,
    ) -> TrackingResult<DocumentRecord>;

    /// Records currently in `state`, ordered by `order_stamp`
    async fn query_by_state(
        &self,
        state: StageState,
        ascending: bool,
        limit: usize,
    ) -> TrackingResult<Vec<DocumentRecord>>;

    /// Ascending page of records in `state` strictly after `cursor`
    async fn query_by_state_after(
        &self,
        state: StageState,
        cursor: &ProgressCursor,
        limit: usize,
    ) -> TrackingResult<Vec<DocumentRecord>>;

    /// Fetch a record that must exist
    async fn require(&self, document_id: &str) -> TrackingResult<DocumentRecord> {
        self.get(document_id)
            .await?
            .ok_or_else(|| TrackingError::not_found(document_id))
    }
}
