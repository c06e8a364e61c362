use super::connection::AdaptedConnection;
use super::query::{RowSet, Transport};
use crate::capability::FeatureFlag;
use crate::catalog::TableName;
use crate::error::Result;
use crate::filter::SCHEMA_PURPOSE;

/// One column as reported by the catalog column query.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    pub name: String,
    /// Rendered by `format_type`, e.g. `character varying(255)`.
    pub sql_type: String,
    pub default_value: Option<String>,
    pub nullable: bool,
    pub type_oid: u32,
    pub type_modifier: i32,
    /// Always `None` on backends without collation support.
    pub collation: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableInfo {
    pub name: String,
    pub schema: String,
    pub table_type: TableType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableType {
    Table,
    View,
    MaterializedView,
}

impl TableType {
    fn from_relkind(kind: &str) -> Option<Self> {
        match kind {
            "r" => Some(TableType::Table),
            "v" => Some(TableType::View),
            "m" => Some(TableType::MaterializedView),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TableType::Table => "TABLE",
            TableType::View => "VIEW",
            TableType::MaterializedView => "MVIEW",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKeyInfo {
    pub name: String,
    pub column: String,
    pub to_table: String,
    pub primary_key: String,
    pub on_update: ReferentialAction,
    pub on_delete: ReferentialAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferentialAction {
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ReferentialAction {
    /// Decode a `pg_constraint.confupdtype`/`confdeltype` code.
    fn from_code(code: Option<&str>) -> Self {
        match code {
            Some("r") => ReferentialAction::Restrict,
            Some("c") => ReferentialAction::Cascade,
            Some("n") => ReferentialAction::SetNull,
            Some("d") => ReferentialAction::SetDefault,
            _ => ReferentialAction::NoAction,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
        }
    }
}

/// Catalogs render booleans as `t`/`f` in text mode.
fn is_true(value: Option<&str>) -> bool {
    matches!(value, Some("t" | "true" | "1"))
}

fn columns_from_rows(rows: &RowSet) -> Vec<ColumnDescriptor> {
    (0..rows.len())
        .filter_map(|i| {
            Some(ColumnDescriptor {
                name: rows.get(i, "name")?.to_string(),
                sql_type: rows.get(i, "sql_type").unwrap_or_default().to_string(),
                default_value: rows.get(i, "default_value").map(str::to_string),
                nullable: !is_true(rows.get(i, "not_null")),
                type_oid: rows
                    .get(i, "type_oid")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0),
                type_modifier: rows
                    .get(i, "type_modifier")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(-1),
                collation: rows.get(i, "collation").map(str::to_string),
            })
        })
        .collect()
}

fn tables_from_rows(rows: &RowSet) -> Vec<TableInfo> {
    (0..rows.len())
        .filter_map(|i| {
            Some(TableInfo {
                name: rows.get(i, "name")?.to_string(),
                schema: rows.get(i, "schema").unwrap_or_default().to_string(),
                table_type: TableType::from_relkind(rows.get(i, "kind")?)?,
            })
        })
        .collect()
}

fn foreign_keys_from_rows(rows: &RowSet) -> Vec<ForeignKeyInfo> {
    (0..rows.len())
        .filter_map(|i| {
            Some(ForeignKeyInfo {
                name: rows.get(i, "name")?.to_string(),
                column: rows.get(i, "column")?.to_string(),
                to_table: rows.get(i, "to_table")?.to_string(),
                primary_key: rows.get(i, "primary_key")?.to_string(),
                on_update: ReferentialAction::from_code(rows.get(i, "on_update")),
                on_delete: ReferentialAction::from_code(rows.get(i, "on_delete")),
            })
        })
        .collect()
}

/// Schema introspection. Every query is shaped by the profile's catalog
/// translator and runs as a `SCHEMA` statement; failures are returned as-is.
impl<T: Transport> AdaptedConnection<T> {
    /// Column definitions in attribute order. Builds the type map first so
    /// callers can decode values of the reported `type_oid`s.
    pub async fn introspect_columns(&mut self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        self.ensure_type_map().await?;
        let sql = self.catalog.build_column_query(&TableName::parse(table));
        let rows = self.execute_administrative(&sql, Some(SCHEMA_PURPOSE)).await?;
        Ok(columns_from_rows(&rows))
    }

    /// Primary-key column names in key order. Empty when the table has none.
    pub async fn introspect_primary_keys(&self, table: &str) -> Result<Vec<String>> {
        let sql = self.catalog.build_primary_key_query(&TableName::parse(table));
        let rows = self.execute_administrative(&sql, Some(SCHEMA_PURPOSE)).await?;
        Ok(rows
            .column_values("name")
            .flatten()
            .map(str::to_string)
            .collect())
    }

    pub async fn introspect_tables(&self, schema: &str) -> Result<Vec<TableInfo>> {
        let sql = self.catalog.build_table_list_query(schema);
        let rows = self.execute_administrative(&sql, Some(SCHEMA_PURPOSE)).await?;
        Ok(tables_from_rows(&rows))
    }

    /// Outgoing foreign keys of `table`. Backends that cannot report them
    /// get an empty list without a round trip.
    pub async fn introspect_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyInfo>> {
        if !self.capability(FeatureFlag::ForeignKeys) {
            return Ok(Vec::new());
        }
        let Some(sql) = self.catalog.build_foreign_key_query(&TableName::parse(table)) else {
            return Ok(Vec::new());
        };
        let rows = self.execute_administrative(&sql, Some(SCHEMA_PURPOSE)).await?;
        Ok(foreign_keys_from_rows(&rows))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::db::testing::MockTransport;
    use crate::profile::BackendProfile;

    fn text_rows(columns: &[&str], values: &[&[Option<&str>]]) -> RowSet {
        RowSet::new(
            columns.iter().copied(),
            values
                .iter()
                .map(|row| row.iter().map(|v| v.map(str::to_string)).collect())
                .collect(),
        )
    }

    fn column_rows() -> RowSet {
        text_rows(
            &["name", "sql_type", "default_value", "not_null", "type_oid", "type_modifier", "collation"],
            &[
                &[Some("id"), Some("integer"), Some("nextval('users_id_seq'::regclass)"), Some("t"), Some("23"), Some("-1"), None],
                &[Some("email"), Some("character varying(255)"), None, Some("f"), Some("1043"), Some("259"), None],
            ],
        )
    }

    fn warehouse(transport: MockTransport) -> AdaptedConnection<MockTransport> {
        AdaptedConnection::new(transport, Arc::new(BackendProfile::redshift()))
    }

    #[tokio::test]
    async fn test_introspect_columns_builds_type_map_first() {
        let transport = MockTransport::new()
            .respond("FROM pg_catalog.pg_type", RowSet::new(["oid", "typname"], vec![vec![Some("23".into()), Some("int4".into())]]))
            .respond("FROM pg_catalog.pg_attribute", column_rows());
        let mut conn = warehouse(transport);

        let columns = conn.introspect_columns("users").await.unwrap();
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[0].name, "id");
        assert!(!columns[0].nullable);
        assert_eq!(columns[0].type_oid, 23);
        assert_eq!(columns[1].sql_type, "character varying(255)");
        assert!(columns[1].nullable);
        assert_eq!(columns[1].type_modifier, 259);
        assert_eq!(columns[1].collation, None);

        let executed = conn.transport.executed();
        assert_eq!(executed.len(), 2);
        assert!(executed[0].contains("FROM pg_catalog.pg_type"));
        assert!(executed[1].contains("NULL AS collation"));
        assert!(conn.type_map().unwrap().contains(23));

        // Second call reuses the cached map.
        conn.introspect_columns("users").await.unwrap();
        assert_eq!(conn.transport.executed().len(), 3);
    }

    #[tokio::test]
    async fn test_introspect_columns_of_missing_table_is_empty() {
        let mut conn = warehouse(MockTransport::new());
        assert!(conn.introspect_columns("nothing_here").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_primary_keys_are_stable_across_calls() {
        let pk_rows = text_rows(&["name"], &[&[Some("tenant_id")], &[Some("id")]]);
        let transport = MockTransport::new().respond("key_column_usage", pk_rows);
        let conn = warehouse(transport);

        let first = conn.introspect_primary_keys("sales.orders").await.unwrap();
        let second = conn.introspect_primary_keys("sales.orders").await.unwrap();
        assert_eq!(first, vec!["tenant_id", "id"]);
        assert_eq!(first, second);

        let executed = conn.transport.executed();
        assert!(executed[0].contains("'sales'"));
        assert!(!executed[0].contains("generate_subscripts"));
    }

    #[tokio::test]
    async fn test_table_without_primary_key() {
        let conn = warehouse(MockTransport::new());
        assert!(conn.introspect_primary_keys("events").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_postgresql_primary_keys_use_index_subscripts() {
        let transport = MockTransport::new().respond(
            "generate_subscripts",
            text_rows(&["name"], &[&[Some("id")]]),
        );
        let conn = AdaptedConnection::new(transport, Arc::new(BackendProfile::postgresql()));
        assert_eq!(conn.introspect_primary_keys("users").await.unwrap(), vec!["id"]);
    }

    #[tokio::test]
    async fn test_introspection_failure_is_not_retried() {
        let conn = warehouse(MockTransport::new().fail("key_column_usage"));
        assert!(conn.introspect_primary_keys("users").await.is_err());
        assert_eq!(conn.transport.executed().len(), 1);
    }

    #[tokio::test]
    async fn test_introspect_tables_skips_unknown_kinds() {
        let rows = text_rows(
            &["name", "schema", "kind"],
            &[
                &[Some("users"), Some("public"), Some("r")],
                &[Some("active_users"), Some("public"), Some("v")],
                &[Some("odd"), Some("public"), Some("x")],
            ],
        );
        let conn = warehouse(MockTransport::new().respond("FROM pg_catalog.pg_class", rows));
        let tables = conn.introspect_tables("public").await.unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[1].table_type, TableType::View);
        assert_eq!(tables[1].table_type.label(), "VIEW");
    }

    #[tokio::test]
    async fn test_foreign_keys_skipped_without_support() {
        let conn = warehouse(MockTransport::new());
        assert!(conn.introspect_foreign_keys("orders").await.unwrap().is_empty());
        assert!(conn.transport.executed().is_empty());
    }

    #[tokio::test]
    async fn test_foreign_keys_on_postgresql() {
        let rows = text_rows(
            &["name", "column", "to_table", "primary_key", "on_update", "on_delete"],
            &[&[Some("fk_orders_user"), Some("user_id"), Some("users"), Some("id"), Some("a"), Some("c")]],
        );
        let transport = MockTransport::new().respond("pg_constraint", rows);
        let conn = AdaptedConnection::new(transport, Arc::new(BackendProfile::postgresql()));
        let keys = conn.introspect_foreign_keys("orders").await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].to_table, "users");
        assert_eq!(keys[0].on_update, ReferentialAction::NoAction);
        assert_eq!(keys[0].on_delete.label(), "CASCADE");
    }
}
