//! Foreign-key resolution from helper columns.
//!
//! Each resolver either fills in the foreign-key column or reports the row
//! as unresolved. Supplied identifiers are verified, never trusted.

use serde_json::Value;

use crate::pipeline::Record;
use crate::schema::Entity;
use crate::store::{Filter, Store};

use super::RowFailure;

/// Resolve every foreign key `entity` needs. Helper columns are left in
/// place; the caller strips them afterwards.
pub(super) fn resolve_references(
    store: &dyn Store,
    entity: Entity,
    record: &mut Record,
    clinic_id: &str,
) -> Result<(), RowFailure> {
    match entity {
        Entity::Units => {
            let drug_id = resolve_drug(store, record)?;
            let lot_id = resolve_lot(store, record, clinic_id)?;
            record.insert("drug_id".into(), Value::String(drug_id));
            record.insert("lot_id".into(), Value::String(lot_id));
        }
        Entity::Lots => {
            let location_id = resolve_location(store, record, clinic_id)?;
            record.insert("location_id".into(), Value::String(location_id));
        }
        Entity::Transactions => {
            let unit_id = text(record, "unit_id")
                .ok_or_else(|| RowFailure::unresolved("transaction has no unit_id"))?;
            verify(
                store,
                Entity::Units,
                "unit_id",
                &unit_id,
                Some(clinic_id),
            )?;
        }
        Entity::Clinics | Entity::Users | Entity::Locations | Entity::Drugs => {}
    }
    Ok(())
}

/// Drug by case-insensitive `medication_name`, plus exact `strength` when
/// one is present.
fn resolve_drug(store: &dyn Store, record: &Record) -> Result<String, RowFailure> {
    if let Some(drug_id) = text(record, "drug_id") {
        return verify(store, Entity::Drugs, "drug_id", &drug_id, None);
    }

    let name = text(record, "medication_name")
        .ok_or_else(|| RowFailure::unresolved("unit has no medication_name or drug_id"))?;
    let mut filters = vec![Filter::EqIgnoreCase("medication_name", name.clone())];
    if let Some(strength) = record.get("strength") {
        filters.push(Filter::Eq("strength", strength.clone()));
    }

    store
        .find_one(Entity::Drugs, &filters)?
        .and_then(|drug| text(&drug, "drug_id"))
        .ok_or_else(|| {
            RowFailure::unresolved(format!(
                "no drug named '{name}'{}",
                record
                    .get("strength")
                    .map(|s| format!(" with strength {s}"))
                    .unwrap_or_default()
            ))
        })
}

/// Lot by case-insensitive drawer code within the tenant.
fn resolve_lot(store: &dyn Store, record: &Record, clinic_id: &str) -> Result<String, RowFailure> {
    if let Some(lot_id) = text(record, "lot_id") {
        return verify(store, Entity::Lots, "lot_id", &lot_id, Some(clinic_id));
    }

    let code = text(record, "lot_source")
        .ok_or_else(|| RowFailure::unresolved("unit has no lot_source or lot_id"))?;
    let filters = [
        Filter::EqIgnoreCase("lot_code", code.clone()),
        Filter::Eq("clinic_id", Value::String(clinic_id.to_string())),
    ];

    store
        .find_one(Entity::Lots, &filters)?
        .and_then(|lot| text(&lot, "lot_id"))
        .ok_or_else(|| RowFailure::unresolved(format!("no lot with drawer code '{code}'")))
}

/// Location by case-insensitive name and/or normalized temperature within
/// the tenant.
fn resolve_location(
    store: &dyn Store,
    record: &Record,
    clinic_id: &str,
) -> Result<String, RowFailure> {
    if let Some(location_id) = text(record, "location_id") {
        return verify(
            store,
            Entity::Locations,
            "location_id",
            &location_id,
            Some(clinic_id),
        );
    }

    let name = text(record, "location_name");
    let temp = text(record, "location_temp").map(|t| normalize_temp(&t));
    if name.is_none() && temp.is_none() {
        return Err(RowFailure::unresolved(
            "lot has no location_name, location_temp or location_id",
        ));
    }

    let mut filters = vec![Filter::Eq(
        "clinic_id",
        Value::String(clinic_id.to_string()),
    )];
    if let Some(name) = &name {
        filters.push(Filter::EqIgnoreCase("name", name.clone()));
    }
    if let Some(temp) = &temp {
        filters.push(Filter::Eq("temp", Value::String(temp.clone())));
    }

    store
        .find_one(Entity::Locations, &filters)?
        .and_then(|location| text(&location, "location_id"))
        .ok_or_else(|| {
            RowFailure::unresolved(format!(
                "no location matching name {name:?} temp {temp:?}"
            ))
        })
}

/// Confirm `id` exists in `entity`, optionally within a tenant.
fn verify(
    store: &dyn Store,
    entity: Entity,
    pk: &'static str,
    id: &str,
    clinic_id: Option<&str>,
) -> Result<String, RowFailure> {
    let mut filters = vec![Filter::Eq(pk, Value::String(id.to_string()))];
    if let Some(clinic_id) = clinic_id {
        filters.push(Filter::Eq("clinic_id", Value::String(clinic_id.to_string())));
    }
    match store.find_one(entity, &filters)? {
        Some(_) => Ok(id.to_string()),
        None => Err(RowFailure::unresolved(format!("{entity}.{pk} '{id}' does not exist"))),
    }
}

/// Canonical storage temperature label.
pub fn normalize_temp(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    match lowered.as_str() {
        "fridge" | "cold" | "refrigerated" | "refrigerator" | "2-8c" | "2-8 c" | "2-8°c" => {
            "fridge".into()
        }
        "room temp" | "room" | "room temperature" | "ambient" | "rt" | "shelf" => {
            "room temp".into()
        }
        _ => lowered,
    }
}

fn text(record: &Record, field: &str) -> Option<String> {
    match record.get(field)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
