//! # Checkup
//!
//! Reconciliation sweep for documents that stopped moving: a crash between a state change
//! and its enqueue, a message that exhausted its redeliveries, a review nobody picked up.
//!
//! Each in-progress state is walked oldest first through the progress index. The walk of a
//! state ends at the first record younger than the staleness threshold, since everything
//! after it entered the state later still.

use super::manager::ControlPlaneManager;
use crate::config::{CheckupAction, CheckupConfig, ReviewConfig};
use crate::error::Result;
use crate::models::DocumentRecord;
use crate::state_machine::{Stage, StageState};
use crate::tracking::ProgressCursor;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

/// Staleness thresholds and what to do about stale documents
#[derive(Debug, Clone)]
pub struct CheckupPolicy {
    pub stale_after: Duration,
    /// Threshold for documents suspended in human review
    pub review_timeout: Duration,
    pub action: CheckupAction,
    pub batch_limit: usize,
}

impl Default for CheckupPolicy {
    fn default() -> Self {
        Self::from_config(&CheckupConfig::default(), &ReviewConfig::default())
    }
}

impl CheckupPolicy {
    pub fn from_config(checkup: &CheckupConfig, review: &ReviewConfig) -> Self {
        let seconds = |value: u64| Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX));
        Self {
            stale_after: seconds(checkup.stale_after_seconds),
            review_timeout: seconds(review.review_timeout_seconds),
            action: checkup.action,
            batch_limit: checkup.batch_limit.max(1),
        }
    }

    fn threshold_for(&self, record: &DocumentRecord) -> Duration {
        if record.is_awaiting_review() {
            self.review_timeout
        } else {
            self.stale_after
        }
    }

    /// Below this age nothing in `state` can be stale
    fn floor_for(&self, state: StageState) -> Duration {
        if state == StageState::Augment {
            self.stale_after.min(self.review_timeout)
        } else {
            self.stale_after
        }
    }
}

/// One stale document and what checkup did with it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StaleDocument {
    pub document_id: String,
    pub state: StageState,
    pub age_seconds: i64,
    pub awaiting_review: bool,
    pub action: CheckupAction,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckupReport {
    pub scanned: usize,
    pub stale: Vec<StaleDocument>,
    pub errors: usize,
}

impl CheckupReport {
    pub fn stale_count(&self) -> usize {
        self.stale.len()
    }

    pub fn contains(&self, document_id: &str) -> bool {
        self.stale.iter().any(|s| s.document_id == document_id)
    }
}

impl ControlPlaneManager {
    /// Sweep every in-progress state and apply the configured action to stale documents
    #[instrument(skip(self))]
    pub async fn checkup(&self) -> Result<CheckupReport> {
        self.checkup_at(Utc::now()).await
    }

    /// Checkup as of `now`
    pub async fn checkup_at(&self, now: DateTime<Utc>) -> Result<CheckupReport> {
        let mut report = CheckupReport::default();

        for state in StageState::IN_PROGRESS {
            self.sweep_state(state, now, &mut report).await?;
        }

        if report.stale.is_empty() {
            info!(scanned = report.scanned, "🩺 Checkup found no stale documents");
        } else {
            warn!(
                scanned = report.scanned,
                stale = report.stale.len(),
                errors = report.errors,
                "🩺 Checkup found stale documents"
            );
        }
        Ok(report)
    }

    async fn sweep_state(
        &self,
        state: StageState,
        now: DateTime<Utc>,
        report: &mut CheckupReport,
    ) -> Result<()> {
        let limit = self.policy.batch_limit;
        let floor = self.policy.floor_for(state);
        let mut cursor: Option<ProgressCursor> = None;

        loop {
            let page = match &cursor {
                None => self.store.query_by_state(state, true, limit).await?,
                Some(after) => self.store.query_by_state_after(state, after, limit).await?,
            };
            let page_len = page.len();

            for record in page {
                let age = record.order_stamp.age(now);
                if age < floor {
                    return Ok(());
                }
                report.scanned += 1;
                cursor = Some(ProgressCursor::from(&record));

                if age < self.policy.threshold_for(&record) {
                    continue;
                }
                self.handle_stale(record, age, report).await;
            }

            if page_len < limit {
                return Ok(());
            }
        }
    }

    async fn handle_stale(&self, record: DocumentRecord, age: Duration, report: &mut CheckupReport) {
        let awaiting_review = record.is_awaiting_review();
        // Reviews are owned by people; checkup only reports them
        let action = if awaiting_review {
            CheckupAction::Alert
        } else {
            self.policy.action
        };

        warn!(
            document_id = %record.document_id,
            state = %record.stage_state,
            age_seconds = age.num_seconds(),
            awaiting_review,
            action = ?action,
            "⏰ Stale document"
        );

        let outcome = match (action, record.current_stage()) {
            (CheckupAction::Alert, _) | (_, None) => Ok(()),
            (CheckupAction::Resume, Some(Stage::Acquire))
            | (CheckupAction::Restart, Some(Stage::Acquire)) => self
                .promote_from(&record.document_id, Stage::Acquire)
                .await
                .map(|_| ()),
            (CheckupAction::Resume, Some(_)) => {
                self.begin.rebegin(&record.document_id).await.map(|_| ())
            }
            (CheckupAction::Restart, Some(stage)) => {
                self.restart(&record.document_id, stage).await.map(|_| ())
            }
        };

        if let Err(e) = &outcome {
            error!(
                document_id = %record.document_id,
                error = %e,
                "Checkup action failed"
            );
            report.errors += 1;
        }

        report.stale.push(StaleDocument {
            document_id: record.document_id,
            state: record.stage_state,
            age_seconds: age.num_seconds(),
            awaiting_review,
            action,
        });
    }
}
