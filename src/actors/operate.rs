//! Operate: convert extracted JSON into the review document format the reviewer UI reads.
//!
//! Nested objects are flattened into `parent_child` keys. Scalars end up as key/value rows
//! of a single `Form` table named `formdata`; every array of objects becomes its own `Table`
//! whose columns are the keys of the first row.

use super::{cell_text, ActorContext, ActorError, StageActor};
use crate::constants::object_keys;
use crate::models::{OutputMap, StageMapUpdate};
use crate::services::{get_json, put_json};
use crate::state_machine::Stage;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::info;

const CELL_CONFIDENCE: f64 = 99.9;
const FORM_TABLE_NAME: &str = "formdata";

/// Collapse nested objects into one level, joining keys with `_`
fn flatten_into(prefix: Option<&str>, object: &Map<String, Value>, out: &mut Vec<(String, Value)>) {
    for (key, value) in object {
        let flat_key = match prefix {
            Some(parent) => format!("{parent}_{key}"),
            None => key.clone(),
        };
        match value {
            Value::Object(nested) => flatten_into(Some(&flat_key), nested, out),
            other => out.push((flat_key, other.clone())),
        }
    }
}

fn bounding_box(top: f64, left: f64, width: f64, height: f64) -> Value {
    json!({ "top": top, "left": left, "width": width, "height": height })
}

fn form_table(name: &str, fields: &[(String, Value)]) -> Value {
    let rows: Vec<Value> = fields
        .iter()
        .map(|(key, value)| {
            let tag = key.to_lowercase();
            json!([
                {
                    "text": key,
                    "confidence": CELL_CONFIDENCE,
                    "boundingBox": bounding_box(0.0, 0.0, 0.1, 0.02),
                    "tag": format!("{tag}-key"),
                },
                {
                    "text": cell_text(value),
                    "confidence": CELL_CONFIDENCE,
                    "boundingBox": bounding_box(0.0, 0.2, 0.3, 0.02),
                    "tag": format!("{tag}-value"),
                }
            ])
        })
        .collect();

    json!({
        "name": name,
        "tableType": "Form",
        "columnTypes": ["Key", "Value"],
        "rows": rows,
    })
}

fn item_table(name: &str, items: &[Map<String, Value>]) -> Value {
    let columns: Vec<String> = items
        .first()
        .map(|first| first.keys().cloned().collect())
        .unwrap_or_default();

    let rows: Vec<Value> = items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let cells: Vec<Value> = columns
                .iter()
                .map(|column| {
                    json!({
                        "text": item.get(column).map(cell_text).unwrap_or_default(),
                        "confidence": CELL_CONFIDENCE,
                        "boundingBox": bounding_box(0.0, 0.0, 0.0, 0.0),
                        "tag": format!("row-{index}-r-br"),
                    })
                })
                .collect();
            Value::Array(cells)
        })
        .collect();

    json!({
        "name": name,
        "tableType": "Table",
        "columnTypes": columns,
        "rows": rows,
    })
}

/// Build the single-page review document for an extracted object
pub fn convert_to_review_document(extracted: &Map<String, Value>, source_document_url: &str) -> Value {
    let mut flat = Vec::new();
    flatten_into(None, extracted, &mut flat);

    let mut tables = Vec::new();
    let mut form_fields = Vec::new();
    for (key, value) in flat {
        match value {
            Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_object) => {
                let rows: Vec<Map<String, Value>> = items
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::Object(row) => Some(row),
                        _ => None,
                    })
                    .collect();
                tables.push(item_table(&key, &rows));
            }
            Value::Array(items) => {
                let joined = items.iter().map(cell_text).collect::<Vec<_>>().join(", ");
                form_fields.push((key, Value::String(joined)));
            }
            scalar => form_fields.push((key, scalar)),
        }
    }
    if !form_fields.is_empty() {
        tables.push(form_table(FORM_TABLE_NAME, &form_fields));
    }

    let table_types: Vec<Value> = tables
        .iter()
        .map(|table| json!({ "name": table["name"], "columnTypes": table["columnTypes"] }))
        .collect();

    json!({
        "numPages": 1,
        "pages": [{ "pageNumber": 1, "tables": tables }],
        "tableTypes": table_types,
        "metadata": { "sourceDocumentUrl": source_document_url },
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OperateActor;

#[async_trait]
impl StageActor for OperateActor {
    fn stage(&self) -> Stage {
        Stage::Operate
    }

    async fn act(&self, ctx: &mut ActorContext) -> Result<StageMapUpdate, ActorError> {
        let source = ctx
            .record
            .maps
            .extract
            .as_ref()
            .and_then(|extract| extract.stage_output.clone())
            .ok_or_else(|| ActorError::missing_input("extract output locator"))?;
        let intake_url = ctx.intake_input()?.url();
        ctx.note("stage_input", Value::String(source.url()));

        let store = ctx.services().object_store.clone();
        let extracted = match get_json::<Value>(store.as_ref(), &source).await? {
            Value::Object(object) => object,
            _ => return Err(ActorError::invalid_output("extracted data is not a JSON object")),
        };

        let review_document = convert_to_review_document(&extracted, &intake_url);
        let output = ctx.locator(object_keys::operate_output(ctx.document_id()));
        put_json(store.as_ref(), &output, &review_document).await?;

        info!(
            document_id = %ctx.document_id(),
            output = %output,
            "✅ Review document built"
        );

        Ok(StageMapUpdate::Operate(OutputMap {
            stage_output: Some(output),
        }))
    }
}
