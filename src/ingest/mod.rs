//! Dedup & FK Resolution Ingestor.
//!
//! Rows are processed one at a time, in input order. A row either inserts,
//! skips as a duplicate, or fails with a `RowError`; no row outcome stops
//! the rows after it.
//!
//! The existence check and the insert are separate statements, so two
//! concurrent uploads of overlapping data can both insert the same row.

mod resolve;

pub use resolve::normalize_temp;

use std::fmt;
use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::pipeline::{CancellationFlag, ColumnMapping, ConversionResult, Record};
use crate::schema::{self, Entity};
use crate::store::{Filter, Store, StoreError};

const TIMESTAMP_COLUMNS: &[&str] = &["created_at", "updated_at", "date_created"];

/// Reason used for every failed foreign-key lookup.
pub const UNRESOLVED_REFERENCE: &str = "unresolved reference";

/// Identity of the request: tenant and acting user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    pub clinic_id: String,
    pub user_id: String,
}

impl TenantContext {
    pub fn new(clinic_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            clinic_id: clinic_id.into(),
            user_id: user_id.into(),
        }
    }
}

/// One failed row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowError {
    /// Zero-based input row index.
    pub row: usize,
    pub reason: String,
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Row {}: {}", self.row, self.reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub entity: Entity,
    pub inserted: usize,
    pub skipped: usize,
    pub errors: Vec<RowError>,
    /// Set when the caller cancelled before every row was processed.
    pub cancelled: bool,
}

impl IngestReport {
    fn new(entity: Entity) -> Self {
        Self {
            entity,
            inserted: 0,
            skipped: 0,
            errors: Vec::new(),
            cancelled: false,
        }
    }
}

/// Why a row was not persisted.
#[derive(Debug)]
pub(crate) enum RowFailure {
    Unresolved(String),
    Store(StoreError),
}

impl RowFailure {
    fn unresolved(detail: impl Into<String>) -> Self {
        Self::Unresolved(detail.into())
    }
}

impl From<StoreError> for RowFailure {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowOutcome {
    Inserted,
    Skipped,
}

pub struct Ingestor<'a> {
    store: &'a dyn Store,
    source_rows: &'a [usize],
}

impl<'a> Ingestor<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self {
            store,
            source_rows: &[],
        }
    }

    /// Report row errors against these upload row indices instead of
    /// record positions.
    pub fn with_source_rows(mut self, source_rows: &'a [usize]) -> Self {
        self.source_rows = source_rows;
        self
    }

    /// Persist `records` into `entity` for the given tenant.
    ///
    /// Cancellation is checked before each row; a cancelled run returns what
    /// was done so far with `cancelled` set.
    pub fn ingest(
        &self,
        entity: Entity,
        records: &[Record],
        tenant: &TenantContext,
        cancel: &CancellationFlag,
    ) -> IngestReport {
        let started = Instant::now();
        let mut report = IngestReport::new(entity);

        for (idx, record) in records.iter().enumerate() {
            let row = self.source_rows.get(idx).copied().unwrap_or(idx);
            if cancel.is_cancelled() {
                warn!(entity = %entity, row, "Ingestion cancelled");
                report.cancelled = true;
                break;
            }

            match self.ingest_row(entity, record, tenant) {
                Ok(RowOutcome::Inserted) => {
                    debug!(entity = %entity, row, "Row inserted");
                    report.inserted += 1;
                }
                Ok(RowOutcome::Skipped) => {
                    debug!(entity = %entity, row, "Duplicate row skipped");
                    report.skipped += 1;
                }
                Err(RowFailure::Unresolved(detail)) => {
                    warn!(entity = %entity, row, detail = %detail, "Unresolved reference");
                    report.errors.push(RowError {
                        row,
                        reason: UNRESOLVED_REFERENCE.to_string(),
                    });
                }
                Err(RowFailure::Store(e)) => {
                    warn!(entity = %entity, row, error = %e, "Row insert failed");
                    report.errors.push(RowError {
                        row,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            entity = %entity,
            rows = records.len(),
            inserted = report.inserted,
            skipped = report.skipped,
            errors = report.errors.len(),
            cancelled = report.cancelled,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Ingestion complete"
        );
        report
    }

    fn ingest_row(
        &self,
        entity: Entity,
        record: &Record,
        tenant: &TenantContext,
    ) -> Result<RowOutcome, RowFailure> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut prepared = prepare_record(entity, record, tenant, &now);

        resolve::resolve_references(self.store, entity, &mut prepared, &tenant.clinic_id)?;
        retain_persisted(entity, &mut prepared);

        if self
            .store
            .find_one(entity, &dedup_filters(entity, &prepared))?
            .is_some()
        {
            return Ok(RowOutcome::Skipped);
        }

        prepared.insert(
            schema::primary_key(entity).to_string(),
            Value::String(Uuid::new_v4().to_string()),
        );
        self.store.insert(entity, &prepared)?;
        Ok(RowOutcome::Inserted)
    }
}

/// Strip the caller's primary key and empty values, then inject tenant,
/// author and creation-time fields.
pub fn prepare_record(entity: Entity, record: &Record, tenant: &TenantContext, now: &str) -> Record {
    let pk = schema::primary_key(entity);
    let mut prepared: Record = record
        .iter()
        .filter(|(field, _)| field.as_str() != pk)
        .filter(|(_, value)| !is_empty_value(value))
        .map(|(field, value)| (field.clone(), value.clone()))
        .collect();

    if schema::is_tenant_scoped(entity) {
        prepared.insert("clinic_id".into(), Value::String(tenant.clinic_id.clone()));
    }
    if schema::is_authored(entity) && !prepared.contains_key("user_id") {
        prepared.insert("user_id".into(), Value::String(tenant.user_id.clone()));
    }
    for column in TIMESTAMP_COLUMNS {
        if schema::is_persisted_column(entity, column) {
            prepared.insert((*column).to_string(), Value::String(now.to_string()));
        }
    }
    prepared
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Drop helper columns and anything else that is not a column of `entity`.
fn retain_persisted(entity: Entity, record: &mut Record) {
    record.retain(|field, _| {
        let keep = schema::is_persisted_column(entity, field);
        if !keep && !schema::is_helper_column(entity, field) {
            warn!(entity = %entity, field = %field, "Dropping non-persisted field before insert");
        }
        keep
    });
}

/// Existence-check filters over the entity's dedup key. Absent columns
/// match as NULL; designated text columns match case-insensitively.
pub fn dedup_filters(entity: Entity, record: &Record) -> Vec<Filter> {
    let key = schema::dedup_key(entity);
    key.columns
        .iter()
        .map(|&column| match record.get(column) {
            None => Filter::IsNull(column),
            Some(Value::String(s)) if key.is_case_insensitive(column) => {
                Filter::EqIgnoreCase(column, s.clone())
            }
            Some(value) => Filter::Eq(column, value.clone()),
        })
        .collect()
}

/// Caller-facing summary of one conversion plus ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct UploadSummary {
    pub entity: Entity,
    pub column_mapping: ColumnMapping,
    pub unmapped_columns: Vec<String>,
    pub mapped_count: usize,
    pub unmapped_count: usize,
    pub degraded_batches: usize,
    pub inserted: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub cancelled: bool,
}

impl UploadSummary {
    pub fn new(conversion: &ConversionResult, report: &IngestReport) -> Self {
        Self {
            entity: conversion.entity,
            column_mapping: conversion.mapping.clone(),
            unmapped_columns: conversion.unmapped.clone(),
            mapped_count: conversion.mapping.len(),
            unmapped_count: conversion.unmapped.len(),
            degraded_batches: conversion.degraded_batches(),
            inserted: report.inserted,
            skipped: report.skipped,
            errors: report.errors.iter().map(RowError::to_string).collect(),
            cancelled: report.cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::inference::MockInferenceClient;
    use crate::pipeline::Converter;
    use crate::store::{open_memory_store, SqliteStore};
    use serde_json::json;

    const CLINIC: &str = "clinic-1";
    const OTHER_CLINIC: &str = "clinic-2";
    const TS: &str = "2025-01-01T00:00:00Z";

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn tenant() -> TenantContext {
        TenantContext::new(CLINIC, "user-1")
    }

    /// One fridge location with drawer AL, plus Lisinopril 10mg.
    fn seeded_store() -> SqliteStore {
        let store = open_memory_store().unwrap();
        store
            .insert(
                Entity::Locations,
                &record(json!({
                    "location_id": "loc-1", "name": "Main Fridge", "temp": "fridge",
                    "clinic_id": CLINIC, "created_at": TS, "updated_at": TS
                })),
            )
            .unwrap();
        store
            .insert(
                Entity::Lots,
                &record(json!({
                    "lot_id": "lot-1", "lot_code": "AL", "location_id": "loc-1",
                    "clinic_id": CLINIC, "date_created": TS
                })),
            )
            .unwrap();
        store
            .insert(
                Entity::Drugs,
                &record(json!({
                    "drug_id": "drug-1", "medication_name": "Lisinopril", "strength": 10,
                    "strength_unit": "mg", "form": "tablet", "created_at": TS
                })),
            )
            .unwrap();
        store
    }

    fn unit(name: &str) -> Record {
        record(json!({
            "medication_name": name,
            "strength": 10,
            "strength_unit": "mg",
            "lot_source": "AL",
            "total_quantity": 30,
            "available_quantity": 30,
            "expiry_date": "2026-06-30"
        }))
    }

    fn ingest(store: &SqliteStore, entity: Entity, records: &[Record]) -> IngestReport {
        Ingestor::new(store).ingest(entity, records, &tenant(), &CancellationFlag::new())
    }

    #[test]
    fn second_ingest_skips_everything() {
        let store = seeded_store();
        let records = vec![unit("Lisinopril"), {
            let mut r = unit("Lisinopril");
            r.insert("expiry_date".into(), json!("2027-01-31"));
            r
        }];

        let first = ingest(&store, Entity::Units, &records);
        assert_eq!((first.inserted, first.skipped), (2, 0));
        assert!(first.errors.is_empty());

        let second = ingest(&store, Entity::Units, &records);
        assert_eq!((second.inserted, second.skipped), (0, first.inserted));
        assert_eq!(store.count(Entity::Units).unwrap(), 2);
    }

    #[test]
    fn drug_lookup_ignores_case() {
        let store = seeded_store();
        let report = ingest(&store, Entity::Units, &[unit("lisinopril")]);
        assert_eq!(report.inserted, 1);

        let stored = store
            .find_one(Entity::Units, &[Filter::Eq("clinic_id", json!(CLINIC))])
            .unwrap()
            .unwrap();
        assert_eq!(stored["drug_id"], json!("drug-1"));
        assert_eq!(stored["lot_id"], json!("lot-1"));
        assert_eq!(stored["user_id"], json!("user-1"));
        assert!(!stored.contains_key("medication_name"));

        let report = ingest(&store, Entity::Units, &[unit("LISINOPRIL")]);
        assert_eq!((report.inserted, report.skipped), (0, 1));
    }

    #[test]
    fn unknown_drug_is_unresolved() {
        let store = seeded_store();
        let acetaminophen = record(json!({
            "medication_name": "Acetaminophen", "strength": 325, "strength_unit": "mg",
            "total_quantity": 5, "available_quantity": 5, "lot_source": "AL"
        }));
        let report = ingest(&store, Entity::Units, &[acetaminophen]);

        assert_eq!((report.inserted, report.skipped), (0, 0));
        let errors: Vec<String> = report.errors.iter().map(ToString::to_string).collect();
        assert_eq!(errors, vec!["Row 0: unresolved reference"]);
        assert_eq!(store.count(Entity::Units).unwrap(), 0);
    }

    #[test]
    fn strength_mismatch_is_unresolved() {
        let store = seeded_store();
        let mut r = unit("Lisinopril");
        r.insert("strength".into(), json!(20));
        let report = ingest(&store, Entity::Units, &[r]);
        assert_eq!(report.errors.len(), 1);
    }

    #[test]
    fn lot_lookup_is_tenant_scoped() {
        let store = seeded_store();
        let report = Ingestor::new(&store).ingest(
            Entity::Units,
            &[unit("Lisinopril")],
            &TenantContext::new(OTHER_CLINIC, "user-2"),
            &CancellationFlag::new(),
        );
        assert_eq!(report.errors[0].reason, UNRESOLVED_REFERENCE);
    }

    #[test]
    fn row_errors_do_not_stop_later_rows() {
        let store = seeded_store();
        let report = ingest(
            &store,
            Entity::Units,
            &[unit("Unknown Drug"), unit("Lisinopril")],
        );
        assert_eq!(report.inserted, 1);
        assert_eq!(report.errors, vec![RowError { row: 0, reason: UNRESOLVED_REFERENCE.into() }]);
    }

    #[test]
    fn row_errors_use_upload_row_indices() {
        let store = seeded_store();
        let report = Ingestor::new(&store).with_source_rows(&[0, 4]).ingest(
            Entity::Units,
            &[unit("Lisinopril"), unit("Unknown Drug")],
            &tenant(),
            &CancellationFlag::new(),
        );
        assert_eq!(report.inserted, 1);
        assert_eq!(report.errors, vec![RowError { row: 4, reason: UNRESOLVED_REFERENCE.into() }]);
        assert_eq!(report.errors[0].to_string(), "Row 4: unresolved reference");
    }

    #[test]
    fn duplicate_lots_are_skipped() {
        let store = seeded_store();
        let lots = vec![
            record(json!({"lot_code": "BR", "location_name": "main fridge"})),
            record(json!({"lot_code": "br", "location_temp": "Refrigerated", "note": "again"})),
        ];
        let report = ingest(&store, Entity::Lots, &lots);
        assert_eq!((report.inserted, report.skipped), (1, 1));

        let report = ingest(&store, Entity::Lots, &lots);
        assert_eq!((report.inserted, report.skipped), (0, 2));
    }

    #[test]
    fn lot_without_location_is_unresolved() {
        let store = seeded_store();
        let report = ingest(
            &store,
            Entity::Lots,
            &[record(json!({"lot_code": "CL", "location_name": "Garage"}))],
        );
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].to_string(), "Row 0: unresolved reference");
    }

    #[test]
    fn supplied_primary_key_is_replaced() {
        let store = seeded_store();
        let mut r = unit("Lisinopril");
        r.insert("unit_id".into(), json!("attacker-chosen"));
        assert_eq!(ingest(&store, Entity::Units, &[r]).inserted, 1);

        assert!(store
            .find_one(Entity::Units, &[Filter::Eq("unit_id", json!("attacker-chosen"))])
            .unwrap()
            .is_none());
        let stored = store
            .find_one(Entity::Units, &[Filter::Eq("clinic_id", json!(CLINIC))])
            .unwrap()
            .unwrap();
        assert!(Uuid::parse_str(stored["unit_id"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn unknown_fields_are_never_persisted() {
        let store = seeded_store();
        let drug = record(json!({
            "medication_name": "Metformin", "strength": 500, "strength_unit": "mg",
            "form": "tablet", "favorite_color": "blue"
        }));
        let report = ingest(&store, Entity::Drugs, &[drug]);
        assert_eq!(report.inserted, 1);
        let stored = store
            .find_one(Entity::Drugs, &[Filter::EqIgnoreCase("medication_name", "metformin".into())])
            .unwrap()
            .unwrap();
        assert!(stored.keys().all(|k| schema::is_persisted_column(Entity::Drugs, k)));
        assert!(stored.contains_key("created_at"));
    }

    #[test]
    fn drugs_dedup_on_case_insensitive_key() {
        let store = seeded_store();
        let drug = record(json!({
            "medication_name": "LISINOPRIL", "strength": 10, "strength_unit": "MG", "form": "Tablet"
        }));
        let report = ingest(&store, Entity::Drugs, &[drug]);
        assert_eq!((report.inserted, report.skipped), (0, 1));
    }

    #[test]
    fn transactions_require_existing_unit() {
        let store = seeded_store();
        ingest(&store, Entity::Units, &[unit("Lisinopril")]);
        let unit_id = store
            .find_one(Entity::Units, &[])
            .unwrap()
            .unwrap()["unit_id"]
            .clone();

        let txs = vec![
            record(json!({
                "timestamp": "2025-03-01T10:00:00", "type": "check_out",
                "quantity": 2, "unit_id": unit_id
            })),
            record(json!({
                "timestamp": "2025-03-01T10:00:00", "type": "check_out",
                "quantity": 2, "unit_id": "missing"
            })),
        ];
        let report = ingest(&store, Entity::Transactions, &txs);
        assert_eq!(report.inserted, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].row, 1);
    }

    #[test]
    fn cancelled_before_first_row() {
        let store = seeded_store();
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let report =
            Ingestor::new(&store).ingest(Entity::Units, &[unit("Lisinopril")], &tenant(), &cancel);
        assert!(report.cancelled);
        assert_eq!(report.inserted + report.skipped + report.errors.len(), 0);
    }

    #[test]
    fn prepare_record_injects_context() {
        let r = record(json!({"lot_code": "AL", "note": "", "clinic_id": "spoofed", "lot_id": "x"}));
        let prepared = prepare_record(Entity::Lots, &r, &tenant(), TS);
        assert_eq!(prepared["clinic_id"], json!(CLINIC));
        assert_eq!(prepared["date_created"], json!(TS));
        assert!(!prepared.contains_key("lot_id"));
        assert!(!prepared.contains_key("note"));
        assert!(!prepared.contains_key("user_id"));
    }

    #[test]
    fn dedup_filters_use_null_for_missing_columns() {
        let r = record(json!({"drug_id": "d", "lot_id": "l", "expiry_date": "2026-01-01", "total_quantity": 3}));
        let filters = dedup_filters(Entity::Units, &r);
        assert!(filters.contains(&Filter::IsNull("manufacturer_lot_number")));
        assert!(filters.contains(&Filter::Eq("total_quantity", json!(3))));
    }

    #[test]
    fn end_to_end_unresolved_acetaminophen() {
        let client = MockInferenceClient::new()
            .respond(r#"{"Drug": "medication_name", "Drawer": "lot_source"}"#)
            .respond(
                r#"[{"medication_name": "Acetaminophen", "strength": 325, "strength_unit": "mg",
                     "total_quantity": 5, "available_quantity": 5, "lot_source": "AL"}]"#,
            );
        let conversion = Converter::new(&client)
            .convert(
                b"Drug,Drawer\nAcetaminophen 325MG (5),AL\n",
                Some(Entity::Units),
                &CancellationFlag::new(),
            )
            .unwrap();

        let store = seeded_store();
        let report = ingest(&store, conversion.entity, &conversion.records);
        let summary = UploadSummary::new(&conversion, &report);

        assert_eq!(summary.inserted, 0);
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.errors, vec!["Row 0: unresolved reference"]);
        assert_eq!(summary.mapped_count, 2);
        assert_eq!(summary.unmapped_count, 0);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["entity"], json!("units"));
        assert_eq!(json["column_mapping"]["Drawer"], json!("lot_source"));
        assert!(json.get("cancelled").is_none());
    }
}
