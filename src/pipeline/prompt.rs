//! Prompt construction for both mapping phases.
//!
//! Carries the domain vocabulary: drawer codes, units vs drugs, lot number
//! disambiguation by sample value.

use crate::schema::{self, Entity, TargetField};

use super::types::ColumnMapping;

const DOMAIN_CONTEXT: &str = r#"DaanaRx tracks donated medication inventory for free and charitable clinics.

DATA MODEL:
  Clinics -> Locations -> Lots -> Units -> Drugs
  - A Location is a physical storage area ("Fridge", "Room Temp Shelf") with a temperature type: "fridge" or "room temp".
  - A Lot is one storage DRAWER inside a location, identified by a 2-character drawer code XY:
      X = drawer letter (A, B, C, D, ...), Y = side (L = left, R = right).
      Examples: "AL" = drawer A left, "CR" = drawer C right.
  - A Unit is one physical inventory item of a drug stored in a lot, with quantities and an expiry date.
  - A Drug is a medication definition: name, strength, strength unit, form, NDC code.
  - Barcodes look like LotCode-Date-4LettersOfMed-Dosage, e.g. "BL-122225-AMLO-05" (Amlodipine 5mg, drawer B left, 12/22/2025)."#;

const MAPPING_RULES: &str = r#"RULES:
1. Map ONLY to "Mappable columns" or "Helper columns". NEVER map to "Auto-managed columns".
2. Return ONLY a JSON object {"csv_header": "target_column_name"}. No markdown, no explanation.
3. Omit headers that match no mappable or helper column.
4. Target names must match the schema exactly (case-sensitive).
5. Each header maps to at most one target.

DISAMBIGUATION (always look at the sample values):
- "Lot", "Lot #", "Drawer", "Drawer Code":
    2-character values like "AL", "CR" -> "lot_code" for lots, "lot_source" for units.
    Long manufacturer codes like "LOT-2024-001" or "MFG12345" -> "manufacturer_lot_number".
    UUID values -> "lot_id".
- "Med Name", "Medicine", "Drug", "Rx" -> "medication_name"; "Generic" -> "generic_name".
- "Strength", "Dose", "Dosage" with numeric-looking values -> "strength"; "Unit" with mg/ml/mcg values -> "strength_unit".
- "Form", "Dosage Form" with tablet/capsule/injection values -> "form". "NDC" -> "ndc_id".
- "Qty", "Quantity", "Count", "Total" -> "total_quantity"; "Available", "Avail" -> "available_quantity".
- "Exp", "Expiry", "Expiration", "Expires" -> "expiry_date".
- "Patient ID", "MRN", "Patient Ref" -> "patient_reference_id"; "Patient", "Patient Name" -> "patient_name".
- "Location", "Storage Location" -> "location_name" (lots); "Temp", "Storage Temp" -> "location_temp" (lots).
- "Notes", "Comments" -> "optional_notes" (units), "note" (lots), "notes" (transactions).
- "Capacity", "Max" -> "max_capacity". "Source", "Donor", "Origin" -> "source" when the values are not drawer codes.
- "Type", "Action" with check_in/check_out/adjust values -> "type" (transactions).
- A header holding combined values like "Lisinopril 10mg Tablet" still maps to "medication_name"; decomposition happens later.

CHOOSING A TABLE when none is given:
- drawer codes + medication names/dosages -> units
- drawer codes + location/temperature, no medication data -> lots
- medication name + strength + form + NDC, no quantities or expiry -> drugs
- location names + temperatures -> locations
- check_in/check_out/adjust + quantities -> transactions"#;

const EXTRACTION_RULES: &str = r#"PARSING RULES:
1. Decompose compound cells. "Lisinopril 10mg Tablet" -> medication_name "Lisinopril", strength 10, strength_unit "mg", form "tablet".
   "Acetaminophen 325MG (5)" -> medication_name "Acetaminophen", strength 325, strength_unit "mg", total_quantity 5, available_quantity 5.
2. A number in parentheses after a medication is a quantity. When only one quantity is known, use it for both total_quantity and available_quantity.
3. Strength is a bare number; its unit goes to strength_unit, lowercased (mg, mcg, g, ml, units, %).
4. Expand form abbreviations: tab -> tablet, cap -> capsule, inj -> injection, susp -> suspension, soln -> solution, oint -> ointment.
5. Drawer codes are 2 characters, letter + L/R, uppercase: "a l", "al", "A-L" -> "AL".
6. Dates: output ISO YYYY-MM-DD. "12/31/25" -> "2025-12-31"; "Dec 2025" -> "2025-12-01".
7. Temperatures: "cold", "refrigerated", "fridge", "2-8C" -> "fridge"; "ambient", "room", "RT", "shelf" -> "room temp".
8. Use null for anything not present. NEVER invent values.
9. Only use the field names listed above. Never output auto-managed columns.
10. Output a JSON array with EXACTLY one object per input row, in the same order."#;

/// System prompt for phase 1.
pub fn header_system_prompt() -> String {
    format!(
        "You are a healthcare data migration specialist mapping spreadsheet headers onto the DaanaRx inventory schema.\n\n\
{DOMAIN_CONTEXT}\n\n{schema}\n{MAPPING_RULES}",
        schema = schema::schema_description(),
    )
}

/// User prompt for phase 1.
pub fn header_user_prompt(
    headers: &[String],
    sample_rows: &[serde_json::Value],
    target: Option<Entity>,
) -> String {
    let headers_json = serde_json::to_string(headers).unwrap_or_else(|_| "[]".into());

    let mut sample = String::new();
    if !sample_rows.is_empty() {
        sample.push_str("\nSample data (first rows):\n");
        for (i, row) in sample_rows.iter().enumerate() {
            sample.push_str(&format!("  Row {i}: {row}\n"));
        }
    }

    let target_line = match target {
        Some(entity) => format!(
            "Target table: '{entity}'. Map onto this table's mappable and helper columns only."
        ),
        None => "No target table specified. Determine the best table from the data and map accordingly.".to_string(),
    };

    format!("Map these CSV headers to the target schema:\n\nCSV Headers: {headers_json}\n{sample}\n{target_line}")
}

/// System prompt for phase 2, specialized to one entity.
pub fn extraction_system_prompt(entity: Entity) -> String {
    let fields = schema::target_fields(entity)
        .iter()
        .map(format_field)
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are a data extraction engine converting raw spreadsheet rows into structured '{entity}' records.\n\n\
{DOMAIN_CONTEXT}\n\nALLOWED FIELDS for '{entity}':\n{fields}\n\n{EXTRACTION_RULES}"
    )
}

/// User prompt for one phase-2 batch.
pub fn extraction_user_prompt(
    headers: &[String],
    mapping: &ColumnMapping,
    rows: &[serde_json::Value],
) -> String {
    let hints = if mapping.is_empty() {
        "  (none)".to_string()
    } else {
        mapping
            .iter()
            .map(|(h, t)| format!("  \"{h}\" -> {t}"))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let rows_json = serde_json::to_string_pretty(rows).unwrap_or_else(|_| "[]".into());
    let headers_json = serde_json::to_string(headers).unwrap_or_else(|_| "[]".into());

    format!(
        "Column hints from header analysis:\n{hints}\n\n\
CSV Headers: {headers_json}\n\n\
Extract exactly {count} records from these {count} rows:\n{rows_json}\n\n\
Return ONLY the JSON array.",
        count = rows.len(),
    )
}

fn format_field(field: &TargetField) -> String {
    match field {
        TargetField::Column(c) => format!("  - {} ({}): {}", c.name, c.sql_type, c.description),
        TargetField::Helper(h) => format!("  - {} (helper for {}): {}", h.name, h.resolves_to, h.description),
    }
}
