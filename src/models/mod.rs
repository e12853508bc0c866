//! # Models
//!
//! Tracking data for documents moving through the pipeline: the document record, its typed
//! stage maps, and object locators.

pub mod document;
pub mod locator;
pub mod stage_maps;

pub use document::{CurrentMap, DocumentRecord, FailureInfo, OrderStamp, StateTransition};
pub use locator::ObjectLocator;
pub use stage_maps::{
    AcquireMap, AugmentMap, CatalogMap, ClassifyMap, MapValidationError, MergeMap, OutputMap,
    ReshapeMap, ReviewStatus, StageMapUpdate, StageMaps, TableType,
};
