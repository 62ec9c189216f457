//! Phase 1: Header Classifier.
//!
//! Maps raw headers onto target field names with one inference call, then
//! runs the mandatory schema-membership gate. Entity inference is a separate
//! pure function so the overlap heuristic can be tested on its own.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{info, warn};

use crate::schema::{self, Entity};

use super::error::IngestError;
use super::inference::InferenceClient;
use super::prompt;
use super::sanitize::{extract_json_block, JsonShape};
use super::types::ColumnMapping;

/// Sample rows sent alongside the headers.
pub const SAMPLE_ROWS: usize = 3;

/// Outcome of phase 1.
#[derive(Debug, Clone, Serialize)]
pub struct HeaderClassification {
    pub entity: Entity,
    pub mapping: ColumnMapping,
    /// Headers without a surviving mapping, in header order.
    pub unmapped: Vec<String>,
    /// `(header, target)` pairs removed by validation.
    pub dropped: Vec<(String, String)>,
}

pub struct HeaderClassifier<'a> {
    client: &'a dyn InferenceClient,
}

impl<'a> HeaderClassifier<'a> {
    pub fn new(client: &'a dyn InferenceClient) -> Self {
        Self { client }
    }

    pub fn classify(
        &self,
        headers: &[String],
        sample_rows: &[serde_json::Value],
        target: Option<Entity>,
    ) -> Result<HeaderClassification, IngestError> {
        let samples = &sample_rows[..sample_rows.len().min(SAMPLE_ROWS)];
        let system = prompt::header_system_prompt();
        let user = prompt::header_user_prompt(headers, samples, target);

        let response = self.client.complete(&system, &user)?;
        let mut mapping = parse_mapping_response(&response, headers)?;
        let mut dropped = Vec::new();

        let entity = match target {
            Some(entity) => entity,
            None => {
                dropped.extend(validate_mapping(
                    &mut mapping,
                    &schema::all_target_field_names(),
                    "any table",
                ));
                infer_entity(&mapping)?
            }
        };
        dropped.extend(validate_mapping(
            &mut mapping,
            &schema::target_field_names(entity),
            entity.as_str(),
        ));

        let unmapped: Vec<String> = headers
            .iter()
            .filter(|h| !mapping.contains_header(h))
            .cloned()
            .collect();

        info!(
            entity = %entity,
            inferred = target.is_none(),
            mapped = mapping.len(),
            unmapped = unmapped.len(),
            dropped = dropped.len(),
            model = self.client.model(),
            "Header classification complete"
        );

        Ok(HeaderClassification {
            entity,
            mapping,
            unmapped,
            dropped,
        })
    }
}

/// Parse the phase-1 completion into a mapping ordered by `headers`.
///
/// Keys that are not input headers and non-string values are discarded.
/// Anything that is not a JSON object is a hard failure.
pub fn parse_mapping_response(
    response: &str,
    headers: &[String],
) -> Result<ColumnMapping, IngestError> {
    let block = extract_json_block(response, JsonShape::Object)
        .ok_or_else(|| IngestError::Mapping("no JSON object in inference response".into()))?;

    let value: serde_json::Value = serde_json::from_str(block)
        .map_err(|e| IngestError::Mapping(format!("invalid JSON: {e}")))?;
    let object = value
        .as_object()
        .ok_or_else(|| IngestError::Mapping("inference response is not a JSON object".into()))?;

    for key in object.keys() {
        if !headers.iter().any(|h| h == key) {
            warn!(header = %key, "Ignoring mapping for a header that is not in the file");
        }
    }

    let mut mapping = ColumnMapping::new();
    for header in headers {
        match object.get(header) {
            Some(serde_json::Value::String(target)) => mapping.insert(header.clone(), target.trim()),
            Some(serde_json::Value::Null) | None => {}
            Some(other) => {
                warn!(header = %header, value = %other, "Ignoring non-string mapping target");
            }
        }
    }
    Ok(mapping)
}

/// Drop every entry whose target is not in `valid`. Returns what was dropped.
pub fn validate_mapping(
    mapping: &mut ColumnMapping,
    valid: &BTreeSet<&str>,
    scope: &str,
) -> Vec<(String, String)> {
    let removed = mapping.retain_targets(|target| valid.contains(target));
    for (header, target) in &removed {
        warn!(
            header = %header,
            field = %target,
            scope,
            "Removing invalid mapping: column does not exist"
        );
    }
    removed
}

/// Count of distinct mapped targets that belong to each entity, in registry order.
pub fn score_entities(mapping: &ColumnMapping) -> Vec<(Entity, usize)> {
    let targets = mapping.targets();
    Entity::all()
        .iter()
        .map(|entity| {
            let fields = schema::target_field_names(*entity);
            let score = targets.iter().filter(|t| fields.contains(**t)).count();
            (*entity, score)
        })
        .collect()
}

/// Pick the entity with the strictly greatest overlap with the mapping.
///
/// A shared maximum, or no overlap at all, is ambiguous and returned as an
/// error naming the tied candidates.
pub fn infer_entity(mapping: &ColumnMapping) -> Result<Entity, IngestError> {
    let scores = score_entities(mapping);
    let best = scores.iter().map(|(_, s)| *s).max().unwrap_or(0);
    let leaders: Vec<Entity> = scores
        .iter()
        .filter(|(_, s)| *s == best)
        .map(|(e, _)| *e)
        .collect();

    match leaders.as_slice() {
        [entity] if best > 0 => Ok(*entity),
        _ => Err(IngestError::EntityInferenceAmbiguous {
            candidates: leaders.iter().map(|e| e.to_string()).collect(),
        }),
    }
}
