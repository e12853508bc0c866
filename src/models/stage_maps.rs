//! # Stage Maps
//!
//! Typed, stage-scoped results attached to a document record. Every field is optional so the
//! same type doubles as the partial update an actor sends: merging copies only the fields that
//! are present and leaves the rest untouched, which makes a repeated merge of the same payload
//! a no-op.

use super::locator::ObjectLocator;
use crate::state_machine::Stage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A partial update was rejected before merge
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid {stage} map update: {reason}")]
pub struct MapValidationError {
    pub stage: Stage,
    pub reason: String,
}

impl MapValidationError {
    pub fn new(stage: Stage, reason: impl Into<String>) -> Self {
        Self {
            stage,
            reason: reason.into(),
        }
    }
}

/// Field-wise merge of a partial update; returns whether anything changed
pub trait MergeMap {
    fn merge_from(&mut self, update: &Self) -> bool;
}

fn merge_field<T: Clone + PartialEq>(target: &mut Option<T>, update: &Option<T>) -> bool {
    match update {
        Some(value) if target.as_ref() != Some(value) => {
            *target = Some(value.clone());
            true
        }
        _ => false,
    }
}

fn check_locator(
    stage: Stage,
    locator: &Option<ObjectLocator>,
) -> Result<(), MapValidationError> {
    match locator {
        Some(locator) => locator
            .validate()
            .map_err(|reason| MapValidationError::new(stage, reason)),
        None => Ok(()),
    }
}

fn check_text(stage: Stage, field: &str, value: &Option<String>) -> Result<(), MapValidationError> {
    match value {
        Some(text) if text.trim().is_empty() => Err(MapValidationError::new(
            stage,
            format!("{field} must not be blank"),
        )),
        _ => Ok(()),
    }
}

/// Intake data written by startup
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcquireMap {
    pub input: Option<ObjectLocator>,
    pub received_at: Option<DateTime<Utc>>,
}

impl MergeMap for AcquireMap {
    fn merge_from(&mut self, update: &Self) -> bool {
        let mut changed = merge_field(&mut self.input, &update.input);
        changed |= merge_field(&mut self.received_at, &update.received_at);
        changed
    }
}

/// Classification answer; `prompt` and `language` feed the extract stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassifyMap {
    pub stage_output: Option<ObjectLocator>,
    pub is_financial_document: Option<bool>,
    pub document_type: Option<String>,
    pub language: Option<String>,
    pub prompt: Option<String>,
}

impl MergeMap for ClassifyMap {
    fn merge_from(&mut self, update: &Self) -> bool {
        let mut changed = merge_field(&mut self.stage_output, &update.stage_output);
        changed |= merge_field(&mut self.is_financial_document, &update.is_financial_document);
        changed |= merge_field(&mut self.document_type, &update.document_type);
        changed |= merge_field(&mut self.language, &update.language);
        changed |= merge_field(&mut self.prompt, &update.prompt);
        changed
    }
}

/// Location of a stage's single output object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputMap {
    pub stage_output: Option<ObjectLocator>,
}

impl MergeMap for OutputMap {
    fn merge_from(&mut self, update: &Self) -> bool {
        merge_field(&mut self.stage_output, &update.stage_output)
    }
}

/// Review input prepared for the human-review stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReshapeMap {
    pub stage_output: Option<ObjectLocator>,
    pub table_count: Option<u32>,
}

impl MergeMap for ReshapeMap {
    fn merge_from(&mut self, update: &Self) -> bool {
        let mut changed = merge_field(&mut self.stage_output, &update.stage_output);
        changed |= merge_field(&mut self.table_count, &update.table_count);
        changed
    }
}

/// Terminal status of a human review loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Completed,
    Failed,
    Stopped,
}

/// Table classification produced by a reviewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableType {
    pub name: String,
    #[serde(default, alias = "columnTypes")]
    pub column_types: Vec<String>,
}

/// Human-review request and, later, its outcome
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AugmentMap {
    pub review_input: Option<ObjectLocator>,
    pub workflow_id: Option<String>,
    pub review_loop_id: Option<String>,
    pub review_requested_at: Option<DateTime<Utc>>,
    pub review_status: Option<ReviewStatus>,
    pub table_types: Option<Vec<TableType>>,
    pub review_output: Option<ObjectLocator>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl AugmentMap {
    /// Review was requested but its outcome has not been committed yet
    pub fn is_awaiting_review(&self) -> bool {
        self.review_loop_id.is_some() && self.review_status.is_none()
    }
}

impl MergeMap for AugmentMap {
    fn merge_from(&mut self, update: &Self) -> bool {
        let mut changed = merge_field(&mut self.review_input, &update.review_input);
        changed |= merge_field(&mut self.workflow_id, &update.workflow_id);
        changed |= merge_field(&mut self.review_loop_id, &update.review_loop_id);
        changed |= merge_field(&mut self.review_requested_at, &update.review_requested_at);
        changed |= merge_field(&mut self.review_status, &update.review_status);
        changed |= merge_field(&mut self.table_types, &update.table_types);
        changed |= merge_field(&mut self.review_output, &update.review_output);
        changed |= merge_field(&mut self.reviewed_at, &update.reviewed_at);
        changed
    }
}

/// Final catalog entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogMap {
    pub stage_output: Option<ObjectLocator>,
    pub catalogued_at: Option<DateTime<Utc>>,
}

impl MergeMap for CatalogMap {
    fn merge_from(&mut self, update: &Self) -> bool {
        let mut changed = merge_field(&mut self.stage_output, &update.stage_output);
        changed |= merge_field(&mut self.catalogued_at, &update.catalogued_at);
        changed
    }
}

/// Partial update for exactly one stage map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "updates", rename_all = "snake_case")]
pub enum StageMapUpdate {
    Acquire(AcquireMap),
    Classify(ClassifyMap),
    Extract(OutputMap),
    Operate(OutputMap),
    Reshape(ReshapeMap),
    Augment(AugmentMap),
    Catalog(CatalogMap),
}

impl StageMapUpdate {
    /// Stage whose map this update targets
    pub fn stage(&self) -> Stage {
        match self {
            Self::Acquire(_) => Stage::Acquire,
            Self::Classify(_) => Stage::Classify,
            Self::Extract(_) => Stage::Extract,
            Self::Operate(_) => Stage::Operate,
            Self::Reshape(_) => Stage::Reshape,
            Self::Augment(_) => Stage::Augment,
            Self::Catalog(_) => Stage::Catalog,
        }
    }

    /// Structural checks run before the update is merged
    pub fn validate(&self) -> Result<(), MapValidationError> {
        let stage = self.stage();
        match self {
            Self::Acquire(map) => check_locator(stage, &map.input),
            Self::Classify(map) => {
                check_locator(stage, &map.stage_output)?;
                check_text(stage, "document_type", &map.document_type)?;
                check_text(stage, "language", &map.language)?;
                check_text(stage, "prompt", &map.prompt)
            }
            Self::Extract(map) | Self::Operate(map) => check_locator(stage, &map.stage_output),
            Self::Reshape(map) => check_locator(stage, &map.stage_output),
            Self::Augment(map) => {
                check_locator(stage, &map.review_input)?;
                check_locator(stage, &map.review_output)?;
                check_text(stage, "workflow_id", &map.workflow_id)?;
                check_text(stage, "review_loop_id", &map.review_loop_id)?;
                if let Some(table_types) = &map.table_types {
                    if let Some(unnamed) = table_types.iter().position(|t| t.name.trim().is_empty()) {
                        return Err(MapValidationError::new(
                            stage,
                            format!("table type #{unnamed} has no name"),
                        ));
                    }
                }
                Ok(())
            }
            Self::Catalog(map) => check_locator(stage, &map.stage_output),
        }
    }
}

/// All stage maps of a document; `None` means the stage has not committed anything
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageMaps {
    #[serde(default)]
    pub acquire: Option<AcquireMap>,
    #[serde(default)]
    pub classify: Option<ClassifyMap>,
    #[serde(default)]
    pub extract: Option<OutputMap>,
    #[serde(default)]
    pub operate: Option<OutputMap>,
    #[serde(default)]
    pub reshape: Option<ReshapeMap>,
    #[serde(default)]
    pub augment: Option<AugmentMap>,
    #[serde(default)]
    pub catalog: Option<CatalogMap>,
}

fn merge_into<M: MergeMap + Default>(slot: &mut Option<M>, update: &M) -> bool {
    match slot {
        Some(map) => map.merge_from(update),
        None => {
            let mut map = M::default();
            map.merge_from(update);
            *slot = Some(map);
            true
        }
    }
}

impl StageMaps {
    /// Merge a partial update into its stage map; returns whether anything changed
    pub fn merge(&mut self, update: &StageMapUpdate) -> bool {
        match update {
            StageMapUpdate::Acquire(map) => merge_into(&mut self.acquire, map),
            StageMapUpdate::Classify(map) => merge_into(&mut self.classify, map),
            StageMapUpdate::Extract(map) => merge_into(&mut self.extract, map),
            StageMapUpdate::Operate(map) => merge_into(&mut self.operate, map),
            StageMapUpdate::Reshape(map) => merge_into(&mut self.reshape, map),
            StageMapUpdate::Augment(map) => merge_into(&mut self.augment, map),
            StageMapUpdate::Catalog(map) => merge_into(&mut self.catalog, map),
        }
    }

    /// Whether the given stage has committed a map
    pub fn has(&self, stage: Stage) -> bool {
        match stage {
            Stage::Acquire => self.acquire.is_some(),
            Stage::Classify => self.classify.is_some(),
            Stage::Extract => self.extract.is_some(),
            Stage::Operate => self.operate.is_some(),
            Stage::Reshape => self.reshape.is_some(),
            Stage::Augment => self.augment.is_some(),
            Stage::Catalog => self.catalog.is_some(),
        }
    }

    /// Drop the given stage's map and every later one
    pub fn clear_from(&mut self, stage: Stage) {
        for stage in stage.this_and_later() {
            match stage {
                Stage::Acquire => self.acquire = None,
                Stage::Classify => self.classify = None,
                Stage::Extract => self.extract = None,
                Stage::Operate => self.operate = None,
                Stage::Reshape => self.reshape = None,
                Stage::Augment => self.augment = None,
                Stage::Catalog => self.catalog = None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locator(key: &str) -> ObjectLocator {
        ObjectLocator::new("store", key)
    }

    #[test]
    fn test_merge_leaves_absent_fields_untouched() {
        let mut maps = StageMaps::default();
        maps.merge(&StageMapUpdate::Classify(ClassifyMap {
            language: Some("Croatian".to_string()),
            prompt: Some("Invoice with supplier and totals".to_string()),
            ..Default::default()
        }));
        maps.merge(&StageMapUpdate::Classify(ClassifyMap {
            document_type: Some("invoice".to_string()),
            ..Default::default()
        }));

        let classify = maps.classify.unwrap();
        assert_eq!(classify.language.as_deref(), Some("Croatian"));
        assert_eq!(classify.document_type.as_deref(), Some("invoice"));
        assert!(classify.stage_output.is_none());
    }

    #[test]
    fn test_repeated_merge_reports_no_change() {
        let update = StageMapUpdate::Extract(OutputMap {
            stage_output: Some(locator("extract/001.json")),
        });
        let mut maps = StageMaps::default();
        assert!(maps.merge(&update));
        let snapshot = maps.clone();
        assert!(!maps.merge(&update));
        assert_eq!(maps, snapshot);
    }

    #[test]
    fn test_clear_from_keeps_earlier_maps() {
        let mut maps = StageMaps::default();
        for update in [
            StageMapUpdate::Extract(OutputMap::default()),
            StageMapUpdate::Operate(OutputMap::default()),
            StageMapUpdate::Reshape(ReshapeMap::default()),
            StageMapUpdate::Catalog(CatalogMap::default()),
        ] {
            maps.merge(&update);
        }

        maps.clear_from(Stage::Operate);
        assert!(maps.has(Stage::Extract));
        assert!(!maps.has(Stage::Operate));
        assert!(!maps.has(Stage::Reshape));
        assert!(!maps.has(Stage::Catalog));
    }

    #[test]
    fn test_validation_rejects_blank_and_bad_locators() {
        let blank_prompt = StageMapUpdate::Classify(ClassifyMap {
            prompt: Some("   ".to_string()),
            ..Default::default()
        });
        assert!(blank_prompt.validate().is_err());

        let bad_locator = StageMapUpdate::Operate(OutputMap {
            stage_output: Some(ObjectLocator::new("", "operate/1.json")),
        });
        assert_eq!(bad_locator.validate().unwrap_err().stage, Stage::Operate);

        let unnamed_table = StageMapUpdate::Augment(AugmentMap {
            table_types: Some(vec![TableType {
                name: String::new(),
                column_types: vec![],
            }]),
            ..Default::default()
        });
        assert!(unnamed_table.validate().is_err());
    }

    #[test]
    fn test_update_wire_format() {
        let update = StageMapUpdate::Augment(AugmentMap {
            table_types: Some(vec![TableType {
                name: "Form".to_string(),
                column_types: vec!["Key".to_string(), "Value".to_string()],
            }]),
            ..Default::default()
        });
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["stage"], "augment");
        assert_eq!(json["updates"]["table_types"][0]["name"], "Form");

        let reviewer: TableType =
            serde_json::from_value(serde_json::json!({"name": "Items", "columnTypes": ["Qty"]}))
                .unwrap();
        assert_eq!(reviewer.column_types, vec!["Qty".to_string()]);
    }
}
