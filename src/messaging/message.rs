//! # Stage Message
//!
//! The single schema exchanged between the begin, actor and await roles of a stage. Every
//! stage queue carries all three aspects; `aspect` tells the consumer which role runs next.

use crate::models::StageMapUpdate;
use crate::state_machine::Stage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Which role produced the message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aspect {
    /// Work request for the stage actor
    Begin,
    /// Actor result for the await runner
    Actor,
    /// Review completion delivered by the human-review bridge
    Review,
}

impl Aspect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Begin => "begin",
            Self::Actor => "actor",
            Self::Review => "review",
        }
    }

    /// Consumed by the await runner
    pub fn is_completion(&self) -> bool {
        matches!(self, Self::Actor | Self::Review)
    }
}

impl fmt::Display for Aspect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Business verdict of the actor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActorGrade {
    #[default]
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageMessage {
    pub message_id: Uuid,
    pub document_id: String,
    pub stage: Stage,
    pub aspect: Aspect,
    #[serde(default)]
    pub map_updates: Option<StageMapUpdate>,
    #[serde(default)]
    pub actor_grade: ActorGrade,
    #[serde(default)]
    pub failure_reason: Option<String>,
    pub final_stamp: DateTime<Utc>,
}

impl StageMessage {
    fn new(document_id: impl Into<String>, stage: Stage, aspect: Aspect) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            document_id: document_id.into(),
            stage,
            aspect,
            map_updates: None,
            actor_grade: ActorGrade::Pass,
            failure_reason: None,
            final_stamp: Utc::now(),
        }
    }

    /// Work request carrying no map updates
    pub fn begin(document_id: impl Into<String>, stage: Stage) -> Self {
        Self::new(document_id, stage, Aspect::Begin)
    }

    pub fn actor_pass(document_id: impl Into<String>, stage: Stage, update: StageMapUpdate) -> Self {
        let mut message = Self::new(document_id, stage, Aspect::Actor);
        message.map_updates = Some(update);
        message
    }

    pub fn actor_fail(document_id: impl Into<String>, stage: Stage, reason: impl Into<String>) -> Self {
        let mut message = Self::new(document_id, stage, Aspect::Actor);
        message.actor_grade = ActorGrade::Fail;
        message.failure_reason = Some(reason.into());
        message
    }

    /// Review completion for the augment stage
    pub fn review(
        document_id: impl Into<String>,
        update: StageMapUpdate,
        grade: ActorGrade,
        failure_reason: Option<String>,
    ) -> Self {
        let mut message = Self::new(document_id, Stage::Augment, Aspect::Review);
        message.map_updates = Some(update);
        message.actor_grade = grade;
        message.failure_reason = failure_reason;
        message
    }

    /// Set `final_stamp` immediately before enqueue
    pub fn stamped(mut self) -> Self {
        self.final_stamp = Utc::now();
        self
    }

    pub fn is_pass(&self) -> bool {
        self.actor_grade == ActorGrade::Pass
    }

    /// Reason handed to breakup for a FAIL grade
    pub fn failure_description(&self) -> String {
        self.failure_reason
            .clone()
            .unwrap_or_else(|| format!("{} actor reported failure", self.stage))
    }
}
