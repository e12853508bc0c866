//! # Document Record
//!
//! One tracking record per document under processing. The record is the durable
//! continuation of the document's state machine: every runner re-reads it instead of keeping
//! in-memory state between invocations.

use super::stage_maps::{AcquireMap, MapValidationError, StageMapUpdate, StageMaps};
use crate::state_machine::{Stage, StageState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

static LAST_STAMP: AtomicI64 = AtomicI64::new(0);

/// Strictly increasing stamp (UTC microseconds) used as the progress index sort key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderStamp(i64);

impl OrderStamp {
    /// Next stamp from the process-wide source; never repeats or goes backwards
    pub fn now() -> Self {
        loop {
            let now = Utc::now().timestamp_micros();
            let last = LAST_STAMP.load(Ordering::Acquire);
            let next = now.max(last + 1);
            if LAST_STAMP
                .compare_exchange(last, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Self(next);
            }
        }
    }

    pub fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self(at.timestamp_micros())
    }

    pub fn as_micros(&self) -> i64 {
        self.0
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(self.0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Time elapsed since this stamp
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.to_datetime())
    }
}

impl fmt::Display for OrderStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scratch data of the stage currently executing; not durable until await commits
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurrentMap {
    pub stage: Option<Stage>,
    #[serde(default)]
    pub scratch: Map<String, Value>,
}

impl CurrentMap {
    pub fn for_stage(stage: Stage) -> Self {
        Self {
            stage: Some(stage),
            scratch: Map::new(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.scratch.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.scratch.get(key)
    }
}

/// Why and where a document stopped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub reason: String,
    pub failed_stage: Stage,
    pub failed_at: DateTime<Utc>,
}

/// A compare-and-set state change applied atomically by the tracking store
#[derive(Debug, Clone, PartialEq)]
pub struct StateTransition {
    /// State the caller observed; the store refuses the change if it moved
    pub expected: StageState,
    pub target: StageState,
    /// New progress stamp, `None` keeps the current one
    pub order_stamp: Option<OrderStamp>,
    /// Clear this stage's map and every later one
    pub clear_maps_from: Option<Stage>,
    pub failure: Option<FailureInfo>,
    pub clear_failure: bool,
}

impl StateTransition {
    /// Enter `stage` (or re-enter it when `expected` is already that stage)
    pub fn begin(expected: StageState, stage: Stage) -> Self {
        Self {
            expected,
            target: StageState::from(stage),
            order_stamp: Some(OrderStamp::now()),
            clear_maps_from: None,
            failure: None,
            clear_failure: false,
        }
    }

    pub fn complete(expected: StageState) -> Self {
        Self {
            expected,
            target: StageState::Complete,
            order_stamp: None,
            clear_maps_from: None,
            failure: None,
            clear_failure: false,
        }
    }

    pub fn fail(expected: StageState, failure: FailureInfo) -> Self {
        Self {
            expected,
            target: StageState::Failed,
            order_stamp: None,
            clear_maps_from: None,
            failure: Some(failure),
            clear_failure: false,
        }
    }

    /// Rewind to `stage`, dropping its map and all later ones
    pub fn restart(expected: StageState, stage: Stage) -> Self {
        Self {
            expected,
            target: StageState::from(stage),
            order_stamp: Some(OrderStamp::now()),
            clear_maps_from: Some(stage),
            failure: None,
            clear_failure: true,
        }
    }
}

/// Tracking record of one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub document_id: String,
    pub stage_state: StageState,
    pub order_stamp: OrderStamp,
    #[serde(default)]
    pub maps: StageMaps,
    #[serde(default)]
    pub current_map: CurrentMap,
    pub failure: Option<FailureInfo>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentRecord {
    /// New record at the intake stage
    pub fn new(document_id: impl Into<String>, acquire: AcquireMap) -> Self {
        let now = Utc::now();
        Self {
            document_id: document_id.into(),
            stage_state: StageState::Acquire,
            order_stamp: OrderStamp::now(),
            maps: StageMaps {
                acquire: Some(acquire),
                ..Default::default()
            },
            current_map: CurrentMap::default(),
            failure: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Stage the document is currently in, `None` when terminal
    pub fn current_stage(&self) -> Option<Stage> {
        self.stage_state.stage()
    }

    pub fn is_at(&self, stage: Stage) -> bool {
        self.stage_state == StageState::from(stage)
    }

    /// Suspended in the augment stage waiting for a reviewer
    pub fn is_awaiting_review(&self) -> bool {
        self.is_at(Stage::Augment)
            && self
                .maps
                .augment
                .as_ref()
                .is_some_and(|augment| augment.is_awaiting_review())
    }

    /// Validate and merge a partial update; returns whether the record changed.
    ///
    /// An unchanged record keeps its version and `updated_at`, so duplicate merges leave it
    /// byte-for-byte identical.
    pub fn apply_update(&mut self, update: &StageMapUpdate) -> Result<bool, MapValidationError> {
        update.validate()?;
        if !self.maps.merge(update) {
            return Ok(false);
        }
        self.current_map = CurrentMap::default();
        self.touch();
        Ok(true)
    }

    /// Apply a state transition whose `expected` state has already been checked
    pub fn apply_transition(&mut self, transition: &StateTransition) {
        self.stage_state = transition.target;
        if let Some(stamp) = transition.order_stamp {
            self.order_stamp = stamp;
        }
        if let Some(stage) = transition.clear_maps_from {
            self.maps.clear_from(stage);
        }
        if transition.clear_failure {
            self.failure = None;
        }
        if let Some(failure) = &transition.failure {
            self.failure = Some(failure.clone());
        }
        self.current_map = match transition.target.stage() {
            Some(stage) if stage.is_processing() => CurrentMap::for_stage(stage),
            _ => CurrentMap::default(),
        };
        self.touch();
    }

    fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }
}
