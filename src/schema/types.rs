use serde::{Deserialize, Serialize};

use super::SchemaError;

/// Generates an enum with `as_str`, `Display`, and `FromStr` over fixed wire names.
macro_rules! str_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = SchemaError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(SchemaError::UnknownValue {
                        kind: stringify!($name),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(
    /// One destination table of the Daana-Rx schema.
    Entity {
        Clinics => "clinics",
        Users => "users",
        Locations => "locations",
        Lots => "lots",
        Drugs => "drugs",
        Units => "units",
        Transactions => "transactions",
    }
);

impl Entity {
    /// Registry order. Entity inference and schema rendering iterate in this order.
    pub fn all() -> &'static [Entity] {
        &[
            Self::Clinics,
            Self::Users,
            Self::Locations,
            Self::Lots,
            Self::Drugs,
            Self::Units,
            Self::Transactions,
        ]
    }
}

str_enum!(
    /// Semantic type of a column, independent of the SQL spelling.
    SemanticType {
        Uuid => "uuid",
        Text => "text",
        Integer => "integer",
        Decimal => "decimal",
        Boolean => "boolean",
        Date => "date",
        Timestamp => "timestamp",
    }
);

/// A persisted column of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ColumnDef {
    pub name: &'static str,
    pub semantic_type: SemanticType,
    /// Declared SQL type, shown to the inference service.
    pub sql_type: &'static str,
    pub description: &'static str,
    pub nullable: bool,
    /// Primary keys, timestamps and context-derived ids. Never a mapping target.
    pub auto: bool,
}

/// A virtual field that carries what is needed to resolve a foreign key.
/// Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HelperColumn {
    pub name: &'static str,
    pub resolves_to: &'static str,
    pub description: &'static str,
}

/// A field the header classifier and row extractor may emit for an entity:
/// either a non-auto column or a helper column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetField {
    Column(ColumnDef),
    Helper(HelperColumn),
}

impl TargetField {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Column(c) => c.name,
            Self::Helper(h) => h.name,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Column(c) => c.description,
            Self::Helper(h) => h.description,
        }
    }
}

/// Composite uniqueness key of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DedupKey {
    pub columns: &'static [&'static str],
}

impl DedupKey {
    /// Whether `column` is compared case-insensitively during the existence check.
    pub fn is_case_insensitive(&self, column: &str) -> bool {
        super::CASE_INSENSITIVE_COLUMNS.contains(&column)
    }
}
