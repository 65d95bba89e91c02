//! Target table shapes.
//!
//! The baseline migration and the legacy table rebuild both create tables
//! from these definitions, so a rebuilt table is indistinguishable from a
//! freshly created one.

/// One table's target definition.
#[derive(Debug, Clone, Copy)]
pub struct TableDef {
    pub name: &'static str,
    /// `(column, declaration)` pairs in table order.
    pub columns: &'static [(&'static str, &'static str)],
    /// Trailing table constraints, if any.
    pub constraints: Option<&'static str>,
    /// Columns holding unix-second timestamps.
    pub timestamp_columns: &'static [&'static str],
    /// Whether rows reference `services(id)` through `service_id`.
    pub owned_by_service: bool,
}

impl TableDef {
    /// `CREATE TABLE IF NOT EXISTS` for this shape under `table_name`.
    #[must_use]
    pub fn create_sql(&self, table_name: &str) -> String {
        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|(name, decl)| format!("\"{name}\" {decl}"))
            .collect();
        if let Some(constraints) = self.constraints {
            parts.push(constraints.to_string());
        }
        format!(
            "CREATE TABLE IF NOT EXISTS \"{table_name}\" ({})",
            parts.join(", ")
        )
    }

    /// Column names in table order.
    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|(name, _)| *name)
    }
}

pub const SERVICES: TableDef = TableDef {
    name: "services",
    columns: &[
        ("id", "TEXT PRIMARY KEY NOT NULL"),
        ("name", "TEXT NOT NULL"),
        ("provider", "TEXT NOT NULL"),
        ("api_key", "TEXT"),
        ("bearer_token", "TEXT"),
        ("base_url", "TEXT"),
        ("enabled", "INTEGER NOT NULL DEFAULT 1"),
        ("display_order", "INTEGER NOT NULL DEFAULT 0"),
        ("created_at", "INTEGER NOT NULL"),
        ("updated_at", "INTEGER NOT NULL"),
    ],
    constraints: None,
    timestamp_columns: &["created_at", "updated_at"],
    owned_by_service: false,
};

pub const QUOTAS: TableDef = TableDef {
    name: "quotas",
    columns: &[
        ("id", "TEXT PRIMARY KEY NOT NULL"),
        (
            "service_id",
            "TEXT NOT NULL REFERENCES services(id) ON DELETE CASCADE",
        ),
        ("metric", "TEXT NOT NULL"),
        ("raw_limit", "REAL NOT NULL DEFAULT 0"),
        ("raw_used", "REAL NOT NULL DEFAULT 0"),
        ("raw_remaining", "REAL NOT NULL DEFAULT 0"),
        ("limit", "REAL NOT NULL DEFAULT 0"),
        ("used", "REAL NOT NULL DEFAULT 0"),
        ("remaining", "REAL NOT NULL DEFAULT 0"),
        ("type", "TEXT"),
        ("replenishment_amount", "REAL"),
        ("replenishment_period", "TEXT"),
        ("reset_at", "INTEGER"),
        ("seq", "INTEGER NOT NULL DEFAULT 0"),
        ("created_at", "INTEGER NOT NULL"),
        ("updated_at", "INTEGER NOT NULL"),
    ],
    constraints: None,
    timestamp_columns: &["created_at", "updated_at", "reset_at"],
    owned_by_service: true,
};

pub const USAGE_HISTORY: TableDef = TableDef {
    name: "usage_history",
    columns: &[
        (
            "service_id",
            "TEXT NOT NULL REFERENCES services(id) ON DELETE CASCADE",
        ),
        ("metric", "TEXT NOT NULL"),
        ("ts", "INTEGER NOT NULL"),
        ("value", "REAL NOT NULL"),
    ],
    constraints: Some("PRIMARY KEY (service_id, metric, ts)"),
    timestamp_columns: &["ts"],
    owned_by_service: true,
};

/// Tables in foreign-key dependency order.
pub const TABLES: &[TableDef] = &[SERVICES, QUOTAS, USAGE_HISTORY];

/// Indexes that only need first-release columns.
pub const BASE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_quotas_service ON quotas(service_id)",
    "CREATE INDEX IF NOT EXISTS idx_usage_history_ts ON usage_history(ts)",
];

/// Indexes over the write sequence.
pub const SEQ_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_quotas_current ON quotas(service_id, metric, seq)",
    "CREATE INDEX IF NOT EXISTS idx_quotas_seq ON quotas(seq)",
];

pub const MIGRATIONS_TABLE: &str = "CREATE TABLE IF NOT EXISTS migrations (\
    name TEXT PRIMARY KEY NOT NULL, \
    applied_at INTEGER NOT NULL\
)";

/// Columns added after the first release, per table.
pub const ADDITIVE_COLUMNS: &[(&str, &str, &str)] = &[
    ("services", "bearer_token", "TEXT"),
    ("services", "base_url", "TEXT"),
    ("services", "display_order", "INTEGER NOT NULL DEFAULT 0"),
    ("quotas", "raw_limit", "REAL NOT NULL DEFAULT 0"),
    ("quotas", "raw_used", "REAL NOT NULL DEFAULT 0"),
    ("quotas", "raw_remaining", "REAL NOT NULL DEFAULT 0"),
    ("quotas", "type", "TEXT"),
    ("quotas", "replenishment_amount", "REAL"),
    ("quotas", "replenishment_period", "TEXT"),
    ("quotas", "reset_at", "INTEGER"),
    ("quotas", "seq", "INTEGER NOT NULL DEFAULT 0"),
];
