//! Schema Registry: the static description of the Daana-Rx target schema.
//!
//! Read-only. Everything that validates inference output or builds SQL
//! consults this module, so a field name that is not listed here can never
//! reach the store.

pub mod types;

pub use types::*;

use std::collections::BTreeSet;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Unknown {kind}: {value}")]
    UnknownValue { kind: &'static str, value: String },

    #[error("Column '{column}' does not exist in table '{entity}'")]
    UnknownColumn { entity: Entity, column: String },
}

const fn col(
    name: &'static str,
    semantic_type: SemanticType,
    sql_type: &'static str,
    description: &'static str,
) -> ColumnDef {
    ColumnDef {
        name,
        semantic_type,
        sql_type,
        description,
        nullable: false,
        auto: false,
    }
}

impl ColumnDef {
    const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    const fn auto(mut self) -> Self {
        self.auto = true;
        self
    }
}

use self::types::SemanticType::{Boolean, Date, Decimal, Integer, Text, Timestamp, Uuid};

const CLINICS: &[ColumnDef] = &[
    col("clinic_id", Uuid, "UUID", "Primary key for clinic").auto(),
    col("name", Text, "VARCHAR(255)", "Clinic name"),
    col("primary_color", Text, "VARCHAR(7)", "Primary brand color (hex)").nullable(),
    col("secondary_color", Text, "VARCHAR(7)", "Secondary brand color (hex)").nullable(),
    col("logo_url", Text, "TEXT", "URL to clinic logo").nullable(),
    col(
        "require_lot_location",
        Boolean,
        "BOOLEAN",
        "Whether to require L/R location specification for lots",
    )
    .nullable(),
    col("created_at", Timestamp, "TIMESTAMPTZ", "Record creation timestamp").auto(),
    col("updated_at", Timestamp, "TIMESTAMPTZ", "Record last update timestamp").auto(),
];

const USERS: &[ColumnDef] = &[
    col("user_id", Uuid, "UUID", "Primary key for user").auto(),
    col("username", Text, "VARCHAR(255)", "Unique username"),
    col("clinic_id", Uuid, "UUID", "Foreign key to clinics").auto(),
    col("user_role", Text, "VARCHAR(50)", "User role: superadmin, admin, or employee"),
    col("email", Text, "VARCHAR(255)", "User email address"),
    col("created_at", Timestamp, "TIMESTAMPTZ", "Record creation timestamp").auto(),
    col("updated_at", Timestamp, "TIMESTAMPTZ", "Record last update timestamp").auto(),
];

const LOCATIONS: &[ColumnDef] = &[
    col("location_id", Uuid, "UUID", "Primary key for location").auto(),
    col("name", Text, "VARCHAR(255)", "Location name"),
    col("temp", Text, "VARCHAR(50)", "Storage temperature: fridge or room temp"),
    col("clinic_id", Uuid, "UUID", "Foreign key to clinics").auto(),
    col("created_at", Timestamp, "TIMESTAMPTZ", "Record creation timestamp").auto(),
    col("updated_at", Timestamp, "TIMESTAMPTZ", "Record last update timestamp").auto(),
];

const LOTS: &[ColumnDef] = &[
    col("lot_id", Uuid, "UUID", "Primary key for lot").auto(),
    col("source", Text, "VARCHAR(255)", "Source/donation origin of the lot").nullable(),
    col("lot_code", Text, "VARCHAR(2)", "2-letter drawer code (e.g., AL, CR)").nullable(),
    col("note", Text, "TEXT", "Additional notes about the lot").nullable(),
    col("date_created", Timestamp, "TIMESTAMPTZ", "Lot creation date").auto(),
    col("location_id", Uuid, "UUID", "Foreign key to locations"),
    col("clinic_id", Uuid, "UUID", "Foreign key to clinics").auto(),
    col("max_capacity", Integer, "INTEGER", "Maximum capacity of the lot").nullable(),
];

const DRUGS: &[ColumnDef] = &[
    col("drug_id", Uuid, "UUID", "Primary key for drug").auto(),
    col("medication_name", Text, "VARCHAR(255)", "Brand/trade name of medication"),
    col("generic_name", Text, "VARCHAR(255)", "Generic name of medication").nullable(),
    col("strength", Decimal, "DECIMAL(10, 4)", "Medication strength value"),
    col("strength_unit", Text, "VARCHAR(50)", "Unit of strength (mg, ml, etc.)"),
    col("ndc_id", Text, "VARCHAR(50)", "National Drug Code identifier").nullable(),
    col("form", Text, "VARCHAR(100)", "Medication form (tablet, capsule, etc.)"),
    col("created_at", Timestamp, "TIMESTAMPTZ", "Record creation timestamp").auto(),
];

const UNITS: &[ColumnDef] = &[
    col("unit_id", Uuid, "UUID", "Primary key for unit").auto(),
    col("total_quantity", Integer, "INTEGER", "Total quantity in unit"),
    col("available_quantity", Integer, "INTEGER", "Available quantity in unit"),
    col("patient_reference_id", Text, "VARCHAR(255)", "Reference ID for patient").nullable(),
    col("lot_id", Uuid, "UUID", "Foreign key to lots"),
    col("expiry_date", Date, "DATE", "Expiration date"),
    col("date_created", Timestamp, "TIMESTAMPTZ", "Unit creation timestamp").auto(),
    col("user_id", Uuid, "UUID", "Foreign key to users").auto(),
    col("drug_id", Uuid, "UUID", "Foreign key to drugs"),
    col("qr_code", Text, "TEXT", "QR code data").nullable(),
    col("optional_notes", Text, "TEXT", "Optional notes").nullable(),
    col("manufacturer_lot_number", Text, "VARCHAR(255)", "Manufacturer's lot number").nullable(),
    col("clinic_id", Uuid, "UUID", "Foreign key to clinics").auto(),
];

const TRANSACTIONS: &[ColumnDef] = &[
    col("transaction_id", Uuid, "UUID", "Primary key for transaction").auto(),
    col("timestamp", Timestamp, "TIMESTAMPTZ", "Transaction timestamp"),
    col("type", Text, "VARCHAR(50)", "Transaction type: adjust, check_out, or check_in"),
    col("quantity", Integer, "INTEGER", "Quantity involved in transaction"),
    col("unit_id", Uuid, "UUID", "Foreign key to units"),
    col("patient_name", Text, "VARCHAR(255)", "Patient name").nullable(),
    col("patient_reference_id", Text, "VARCHAR(255)", "Patient reference ID").nullable(),
    col("user_id", Uuid, "UUID", "Foreign key to users").auto(),
    col("notes", Text, "TEXT", "Transaction notes").nullable(),
    col("clinic_id", Uuid, "UUID", "Foreign key to clinics").auto(),
];

const UNIT_HELPERS: &[HelperColumn] = &[
    HelperColumn {
        name: "medication_name",
        resolves_to: "drug_id",
        description: "Medication name, used to look up the drug",
    },
    HelperColumn {
        name: "generic_name",
        resolves_to: "drug_id",
        description: "Generic medication name, carried alongside medication_name",
    },
    HelperColumn {
        name: "strength",
        resolves_to: "drug_id",
        description: "Numeric strength, used with medication_name to look up the drug",
    },
    HelperColumn {
        name: "strength_unit",
        resolves_to: "drug_id",
        description: "Unit of strength (mg, ml, mcg, ...)",
    },
    HelperColumn {
        name: "form",
        resolves_to: "drug_id",
        description: "Medication form (tablet, capsule, ...)",
    },
    HelperColumn {
        name: "lot_source",
        resolves_to: "lot_id",
        description: "2-letter drawer code of the lot holding the unit (e.g., AL, CR)",
    },
];

const LOT_HELPERS: &[HelperColumn] = &[
    HelperColumn {
        name: "location_name",
        resolves_to: "location_id",
        description: "Name of the storage location containing the drawer",
    },
    HelperColumn {
        name: "location_temp",
        resolves_to: "location_id",
        description: "Storage temperature of the location: fridge or room temp",
    },
];

/// Columns compared case-insensitively in dedup existence checks.
pub const CASE_INSENSITIVE_COLUMNS: &[&str] = &[
    "medication_name",
    "strength_unit",
    "form",
    "name",
    "email",
    "lot_code",
];

/// Persisted columns of `entity`, auto-managed ones included.
pub fn columns(entity: Entity) -> &'static [ColumnDef] {
    match entity {
        Entity::Clinics => CLINICS,
        Entity::Users => USERS,
        Entity::Locations => LOCATIONS,
        Entity::Lots => LOTS,
        Entity::Drugs => DRUGS,
        Entity::Units => UNITS,
        Entity::Transactions => TRANSACTIONS,
    }
}

pub fn helper_columns(entity: Entity) -> &'static [HelperColumn] {
    match entity {
        Entity::Units => UNIT_HELPERS,
        Entity::Lots => LOT_HELPERS,
        _ => &[],
    }
}

pub fn column(entity: Entity, name: &str) -> Option<&'static ColumnDef> {
    columns(entity).iter().find(|c| c.name == name)
}

pub fn is_persisted_column(entity: Entity, name: &str) -> bool {
    column(entity, name).is_some()
}

pub fn is_helper_column(entity: Entity, name: &str) -> bool {
    helper_columns(entity).iter().any(|h| h.name == name)
}

/// Fields a mapping or extraction may target for `entity`: every non-auto
/// column followed by the helper columns. Names are unique.
pub fn target_fields(entity: Entity) -> Vec<TargetField> {
    let mut fields: Vec<TargetField> = columns(entity)
        .iter()
        .filter(|c| !c.auto)
        .copied()
        .map(TargetField::Column)
        .collect();
    for helper in helper_columns(entity) {
        if !fields.iter().any(|f| f.name() == helper.name) {
            fields.push(TargetField::Helper(*helper));
        }
    }
    fields
}

pub fn target_field_names(entity: Entity) -> BTreeSet<&'static str> {
    target_fields(entity).iter().map(TargetField::name).collect()
}

/// Union of the target field names of every entity.
pub fn all_target_field_names() -> BTreeSet<&'static str> {
    Entity::all()
        .iter()
        .flat_map(|e| target_field_names(*e))
        .collect()
}

pub fn primary_key(entity: Entity) -> &'static str {
    match entity {
        Entity::Clinics => "clinic_id",
        Entity::Users => "user_id",
        Entity::Locations => "location_id",
        Entity::Lots => "lot_id",
        Entity::Drugs => "drug_id",
        Entity::Units => "unit_id",
        Entity::Transactions => "transaction_id",
    }
}

pub fn dedup_key(entity: Entity) -> DedupKey {
    let columns: &'static [&'static str] = match entity {
        Entity::Drugs => &["medication_name", "strength", "strength_unit", "form"],
        Entity::Lots => &["lot_code", "clinic_id"],
        Entity::Locations => &["name", "clinic_id"],
        Entity::Units => &[
            "drug_id",
            "lot_id",
            "expiry_date",
            "manufacturer_lot_number",
            "total_quantity",
        ],
        Entity::Transactions => &["timestamp", "type", "unit_id", "quantity"],
        Entity::Clinics => &["name"],
        Entity::Users => &["email"],
    };
    DedupKey { columns }
}

/// Entities whose rows carry the tenant `clinic_id` from request context.
pub fn is_tenant_scoped(entity: Entity) -> bool {
    matches!(
        entity,
        Entity::Users | Entity::Locations | Entity::Lots | Entity::Units | Entity::Transactions
    )
}

/// Entities whose rows record the acting user.
pub fn is_authored(entity: Entity) -> bool {
    matches!(entity, Entity::Units | Entity::Transactions)
}

/// Render the whole schema for an inference prompt.
pub fn schema_description() -> String {
    let mut text = String::from("Target Database Schema:\n\n");
    for entity in Entity::all() {
        text.push_str(&entity_description(*entity));
        text.push('\n');
    }
    text
}

/// Render one entity: mappable columns, helper columns, auto-managed columns.
pub fn entity_description(entity: Entity) -> String {
    let mut text = format!("Table: {entity}\n");

    text.push_str("Mappable columns:\n");
    for c in columns(entity).iter().filter(|c| !c.auto) {
        let nullable = if c.nullable { ", optional" } else { "" };
        text.push_str(&format!(
            "  - {} ({}{nullable}): {}\n",
            c.name, c.sql_type, c.description
        ));
    }

    let helpers = helper_columns(entity);
    if !helpers.is_empty() {
        text.push_str("Helper columns (not stored, used to resolve foreign keys):\n");
        for h in helpers {
            text.push_str(&format!(
                "  - {} (resolves {}): {}\n",
                h.name, h.resolves_to, h.description
            ));
        }
    }

    let auto: Vec<&str> = columns(entity)
        .iter()
        .filter(|c| c.auto)
        .map(|c| c.name)
        .collect();
    text.push_str(&format!("Auto-managed columns (never map): {}\n", auto.join(", ")));
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_round_trips_through_str() {
        for entity in Entity::all() {
            assert_eq!(entity.as_str().parse::<Entity>().unwrap(), *entity);
        }
        assert!("patients".parse::<Entity>().is_err());
    }

    #[test]
    fn target_fields_exclude_auto_columns() {
        for entity in Entity::all() {
            let names = target_field_names(*entity);
            assert!(!names.contains(primary_key(*entity)), "{entity} exposes its pk");
            assert!(!names.contains("created_at"));
            assert!(!names.contains("date_created"));
            if is_tenant_scoped(*entity) {
                assert!(!names.contains("clinic_id"));
            }
        }
    }

    #[test]
    fn units_targets_include_helpers() {
        let names = target_field_names(Entity::Units);
        for helper in ["medication_name", "strength", "strength_unit", "form", "lot_source"] {
            assert!(names.contains(helper), "missing helper {helper}");
        }
        assert!(names.contains("total_quantity"));
        assert!(names.contains("drug_id"));
        assert!(!names.contains("user_id"));
    }

    #[test]
    fn lots_helpers_resolve_location() {
        assert!(helper_columns(Entity::Lots)
            .iter()
            .all(|h| h.resolves_to == "location_id"));
        assert!(is_helper_column(Entity::Lots, "location_temp"));
        assert!(!is_persisted_column(Entity::Lots, "location_temp"));
    }

    #[test]
    fn all_target_names_is_union() {
        let all = all_target_field_names();
        assert!(all.contains("lot_code"));
        assert!(all.contains("lot_source"));
        assert!(all.contains("patient_name"));
        assert!(!all.contains("transaction_id"));
    }

    #[test]
    fn dedup_key_columns_are_persisted() {
        for entity in Entity::all() {
            for column in dedup_key(*entity).columns {
                assert!(
                    is_persisted_column(*entity, column),
                    "{entity}.{column} is not a column"
                );
            }
        }
    }

    #[test]
    fn case_insensitive_columns() {
        let key = dedup_key(Entity::Lots);
        assert!(key.is_case_insensitive("lot_code"));
        assert!(!key.is_case_insensitive("clinic_id"));
    }

    #[test]
    fn description_lists_sections() {
        let text = entity_description(Entity::Units);
        assert!(text.starts_with("Table: units"));
        assert!(text.contains("Mappable columns:"));
        assert!(text.contains("lot_source (resolves lot_id)"));
        assert!(text.contains("Auto-managed columns (never map): unit_id"));

        let drugs = entity_description(Entity::Drugs);
        assert!(!drugs.contains("Helper columns"));

        let all = schema_description();
        for entity in Entity::all() {
            assert!(all.contains(&format!("Table: {entity}\n")));
        }
    }
}
