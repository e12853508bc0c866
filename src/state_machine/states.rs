use serde::{Deserialize, Serialize};
use std::fmt;

/// Named steps of the document pipeline.
///
/// `Acquire` is the intake pseudo-stage: it owns the intake map written by `startup` but has
/// no queue and no actor. Every other variant is a processing stage with its own
/// begin/actor/await triad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Acquire,
    Classify,
    Extract,
    Operate,
    Reshape,
    Augment,
    Catalog,
}

/// The fixed processing order. `Acquire` precedes all of these.
pub const STAGE_SEQUENCE: [Stage; 6] = [
    Stage::Classify,
    Stage::Extract,
    Stage::Operate,
    Stage::Reshape,
    Stage::Augment,
    Stage::Catalog,
];

impl Stage {
    /// First processing stage entered by `startup`
    pub fn first() -> Self {
        STAGE_SEQUENCE[0]
    }

    /// Last processing stage; its successful await completes the document
    pub fn last() -> Self {
        STAGE_SEQUENCE[STAGE_SEQUENCE.len() - 1]
    }

    /// Position in the pipeline, `Acquire` being 0
    pub fn ordinal(&self) -> usize {
        match self {
            Self::Acquire => 0,
            Self::Classify => 1,
            Self::Extract => 2,
            Self::Operate => 3,
            Self::Reshape => 4,
            Self::Augment => 5,
            Self::Catalog => 6,
        }
    }

    /// Stage that follows this one, `None` for the terminal stage
    pub fn next(&self) -> Option<Stage> {
        match self {
            Self::Acquire => Some(Self::Classify),
            Self::Classify => Some(Self::Extract),
            Self::Extract => Some(Self::Operate),
            Self::Operate => Some(Self::Reshape),
            Self::Reshape => Some(Self::Augment),
            Self::Augment => Some(Self::Catalog),
            Self::Catalog => None,
        }
    }

    /// Stage that precedes this one, `None` for `Acquire`
    pub fn previous(&self) -> Option<Stage> {
        match self {
            Self::Acquire => None,
            Self::Classify => Some(Self::Acquire),
            Self::Extract => Some(Self::Classify),
            Self::Operate => Some(Self::Extract),
            Self::Reshape => Some(Self::Operate),
            Self::Augment => Some(Self::Reshape),
            Self::Catalog => Some(Self::Augment),
        }
    }

    /// Whether this stage has a queue and an actor
    pub fn is_processing(&self) -> bool {
        !matches!(self, Self::Acquire)
    }

    /// Whether this stage's await is gated on an external review callback
    pub fn awaits_external_callback(&self) -> bool {
        matches!(self, Self::Augment)
    }

    /// This stage and every later one, in order
    pub fn this_and_later(&self) -> impl Iterator<Item = Stage> {
        let from = self.ordinal();
        [Self::Acquire]
            .into_iter()
            .chain(STAGE_SEQUENCE)
            .filter(move |stage| stage.ordinal() >= from)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Acquire => "acquire",
            Self::Classify => "classify",
            Self::Extract => "extract",
            Self::Operate => "operate",
            Self::Reshape => "reshape",
            Self::Augment => "augment",
            Self::Catalog => "catalog",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "acquire" => Ok(Self::Acquire),
            "classify" => Ok(Self::Classify),
            "extract" => Ok(Self::Extract),
            "operate" => Ok(Self::Operate),
            "reshape" => Ok(Self::Reshape),
            "augment" => Ok(Self::Augment),
            "catalog" => Ok(Self::Catalog),
            _ => Err(format!("Invalid stage: {s}")),
        }
    }
}

/// Current position of a document: one tag per stage plus the two terminal states.
///
/// This is the partition key of the progress index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Acquire,
    Classify,
    Extract,
    Operate,
    Reshape,
    Augment,
    Catalog,
    /// Every stage passed
    Complete,
    /// Stopped by breakup; maps are retained for post-mortem
    Failed,
}

impl StageState {
    /// Non-terminal states, i.e. everything checkup has to watch
    pub const IN_PROGRESS: [StageState; 7] = [
        Self::Acquire,
        Self::Classify,
        Self::Extract,
        Self::Operate,
        Self::Reshape,
        Self::Augment,
        Self::Catalog,
    ];

    /// Check if this is a terminal state (no further forward progress)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Check if this is the failure state
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Stage this state corresponds to, `None` when terminal
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Acquire => Some(Stage::Acquire),
            Self::Classify => Some(Stage::Classify),
            Self::Extract => Some(Stage::Extract),
            Self::Operate => Some(Stage::Operate),
            Self::Reshape => Some(Stage::Reshape),
            Self::Augment => Some(Stage::Augment),
            Self::Catalog => Some(Stage::Catalog),
            Self::Complete | Self::Failed => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Failed => "failed",
            other => other.stage().map(|stage| stage.as_str()).unwrap_or("unknown"),
        }
    }
}

impl From<Stage> for StageState {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Acquire => Self::Acquire,
            Stage::Classify => Self::Classify,
            Stage::Extract => Self::Extract,
            Stage::Operate => Self::Operate,
            Stage::Reshape => Self::Reshape,
            Stage::Augment => Self::Augment,
            Stage::Catalog => Self::Catalog,
        }
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StageState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            other => other
                .parse::<Stage>()
                .map(Self::from)
                .map_err(|_| format!("Invalid stage state: {s}")),
        }
    }
}

/// Default state for new documents
impl Default for StageState {
    fn default() -> Self {
        Self::Acquire
    }
}
