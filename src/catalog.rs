//! Backend-specific introspection SQL.
//!
//! System catalogs drift between PostgreSQL-protocol backends: some lack
//! `pg_collation`, `pg_range` or array helpers such as `generate_subscripts`.
//! Every query here is assembled from the [`CapabilitySet`] so that it only
//! touches catalog objects the backend actually has.

use std::collections::BTreeSet;
use std::fmt;

use crate::capability::{CapabilitySet, FeatureFlag};
use crate::types::KNOWN_BASE_TYPES;

/// A possibly schema-qualified relation name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    pub schema: Option<String>,
    pub name: String,
}

impl TableName {
    pub fn new(schema: Option<&str>, name: &str) -> Self {
        Self {
            schema: schema.map(str::to_string),
            name: name.to_string(),
        }
    }

    /// Parse `table`, `schema.table` or their double-quoted forms. Dots inside
    /// quotes belong to the identifier.
    pub fn parse(input: &str) -> Self {
        let mut parts = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;
        let mut chars = input.trim().chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '"' if in_quotes && chars.peek() == Some(&'"') => {
                    current.push('"');
                    chars.next();
                }
                '"' => in_quotes = !in_quotes,
                '.' if !in_quotes => parts.push(std::mem::take(&mut current)),
                _ => current.push(c),
            }
        }
        parts.push(current);

        let name = parts.pop().unwrap_or_default();
        let schema = parts.pop();
        Self { schema, name }
    }

    /// `"schema"."name"` with identifier quoting applied.
    pub fn quoted(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&self.name)),
            None => quote_ident(&self.name),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Quote an identifier, doubling embedded double quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote a string literal, doubling embedded single quotes. Backends without
/// standard-conforming strings treat `\` as an escape, so it is doubled too.
pub fn quote_literal(value: &str, standard_strings: bool) -> String {
    let escaped = value.replace('\'', "''");
    if standard_strings {
        format!("'{}'", escaped)
    } else {
        format!("'{}'", escaped.replace('\\', "\\\\"))
    }
}

/// Renders introspection queries for one backend variant.
#[derive(Debug, Clone)]
pub struct CatalogQueryTranslator {
    collations: bool,
    array_subscripts: bool,
    ranges: bool,
    views: bool,
    materialized_views: bool,
    foreign_keys: bool,
    standard_strings: bool,
}

impl CatalogQueryTranslator {
    pub fn new(capabilities: &CapabilitySet) -> Self {
        Self {
            collations: capabilities.capability(FeatureFlag::Collations),
            array_subscripts: capabilities.capability(FeatureFlag::ArraySubscripts),
            ranges: capabilities.capability(FeatureFlag::Ranges),
            views: capabilities.capability(FeatureFlag::Views),
            materialized_views: capabilities.capability(FeatureFlag::MaterializedViews),
            foreign_keys: capabilities.capability(FeatureFlag::ForeignKeys),
            standard_strings: capabilities.capability(FeatureFlag::StandardConformingStrings),
        }
    }

    fn literal(&self, value: &str) -> String {
        quote_literal(value, self.standard_strings)
    }

    fn regclass(&self, table: &TableName) -> String {
        format!("{}::regclass", self.literal(&table.quoted()))
    }

    /// Schema filter for `table`. An unqualified name resolves through the
    /// search path, the same way `::regclass` does in the column query.
    fn schema_predicate(&self, column: &str, table: &TableName) -> String {
        match &table.schema {
            Some(schema) => format!("{} = {}", column, self.literal(schema)),
            None => format!(
                "{} = (SELECT rn.nspname FROM pg_catalog.pg_class rc \
                 JOIN pg_catalog.pg_namespace rn ON rn.oid = rc.relnamespace \
                 WHERE rc.oid = {})",
                column,
                self.regclass(table)
            ),
        }
    }

    /// Column definitions in ordinal order: name, formatted type, default
    /// expression, NOT NULL flag, type OID, type modifier and collation.
    pub fn build_column_query(&self, table: &TableName) -> String {
        let (collation_column, collation_joins) = if self.collations {
            (
                "c.collname",
                "\nLEFT JOIN pg_catalog.pg_type t ON a.atttypid = t.oid\
                 \nLEFT JOIN pg_catalog.pg_collation c ON a.attcollation = c.oid AND a.attcollation <> t.typcollation",
            )
        } else {
            ("NULL", "")
        };

        format!(
            "SELECT a.attname AS name,\n       \
             format_type(a.atttypid, a.atttypmod) AS sql_type,\n       \
             pg_get_expr(d.adbin, d.adrelid) AS default_value,\n       \
             a.attnotnull AS not_null,\n       \
             a.atttypid AS type_oid,\n       \
             a.atttypmod AS type_modifier,\n       \
             {collation_column} AS collation\n\
             FROM pg_catalog.pg_attribute a\n\
             LEFT JOIN pg_catalog.pg_attrdef d ON a.attrelid = d.adrelid AND a.attnum = d.adnum\
             {collation_joins}\n\
             WHERE a.attrelid = {relation}\n  \
             AND a.attnum > 0\n  \
             AND NOT a.attisdropped\n\
             ORDER BY a.attnum",
            relation = self.regclass(table),
        )
    }

    /// Primary-key column names in key order.
    pub fn build_primary_key_query(&self, table: &TableName) -> String {
        if self.array_subscripts {
            return format!(
                "SELECT a.attname AS name\n\
                 FROM (\n  \
                 SELECT indrelid, indkey, generate_subscripts(indkey, 1) AS idx\n  \
                 FROM pg_catalog.pg_index\n  \
                 WHERE indrelid = {relation}\n    \
                 AND indisprimary\n\
                 ) i\n\
                 JOIN pg_catalog.pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = i.indkey[i.idx]\n\
                 ORDER BY i.idx",
                relation = self.regclass(table),
            );
        }

        format!(
            "SELECT kcu.column_name AS name\n\
             FROM information_schema.table_constraints tc\n\
             JOIN information_schema.key_column_usage kcu\n  \
             ON tc.constraint_schema = kcu.constraint_schema\n  \
             AND tc.constraint_name = kcu.constraint_name\n  \
             AND tc.table_name = kcu.table_name\n\
             WHERE tc.constraint_type = 'PRIMARY KEY'\n  \
             AND {schema}\n  \
             AND tc.table_name = {name}\n\
             ORDER BY kcu.ordinal_position",
            schema = self.schema_predicate("tc.table_schema", table),
            name = self.literal(&table.name),
        )
    }

    /// `pg_type` rows used to seed a type-decode map. With `oids`, only those
    /// types; otherwise every candidate the map initializer understands.
    pub fn build_type_discovery_query(&self, oids: Option<&BTreeSet<u32>>) -> String {
        let mut sql = String::from(
            "SELECT t.oid, t.typname, t.typelem, t.typdelim, t.typinput, t.typtype, t.typbasetype",
        );
        if self.ranges {
            sql.push_str(", r.rngsubtype");
        }
        sql.push_str("\nFROM pg_catalog.pg_type AS t");
        if self.ranges {
            sql.push_str("\nLEFT JOIN pg_catalog.pg_range AS r ON t.oid = r.rngtypid");
        }

        match oids {
            Some(oids) if oids.is_empty() => sql.push_str("\nWHERE 1 = 0"),
            Some(oids) => {
                let list: Vec<String> = oids.iter().map(u32::to_string).collect();
                sql.push_str(&format!("\nWHERE t.oid IN ({})", list.join(", ")));
            }
            None => {
                let names: Vec<String> = KNOWN_BASE_TYPES.iter().map(|n| self.literal(n)).collect();
                let typtypes = if self.ranges { "'e', 'd', 'r'" } else { "'e', 'd'" };
                sql.push_str(&format!(
                    "\nWHERE t.typname IN ({})\n   \
                     OR t.typtype IN ({})\n   \
                     OR t.typinput = 'array_in'::regproc\n   \
                     OR t.typelem <> 0",
                    names.join(", "),
                    typtypes
                ));
            }
        }
        sql.push_str("\nORDER BY t.oid");
        sql
    }

    /// Relations in `schema`, limited to the relation kinds the backend has.
    pub fn build_table_list_query(&self, schema: &str) -> String {
        let mut relkinds = vec!["'r'"];
        if self.views {
            relkinds.push("'v'");
        }
        if self.materialized_views {
            relkinds.push("'m'");
        }

        format!(
            "SELECT c.relname AS name,\n       \
             n.nspname AS schema,\n       \
             c.relkind AS kind\n\
             FROM pg_catalog.pg_class c\n\
             JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace\n\
             WHERE n.nspname = {schema}\n  \
             AND c.relkind IN ({kinds})\n\
             ORDER BY c.relname",
            schema = self.literal(schema),
            kinds = relkinds.join(", "),
        )
    }

    /// Single-column foreign keys declared on `table`. `None` when the backend
    /// does not track foreign keys.
    pub fn build_foreign_key_query(&self, table: &TableName) -> Option<String> {
        if !self.foreign_keys {
            return None;
        }
        Some(format!(
            "SELECT c.conname AS name,\n       \
             a1.attname AS column,\n       \
             t2.relname AS to_table,\n       \
             a2.attname AS primary_key,\n       \
             c.confupdtype AS on_update,\n       \
             c.confdeltype AS on_delete\n\
             FROM pg_catalog.pg_constraint c\n\
             JOIN pg_catalog.pg_class t1 ON c.conrelid = t1.oid\n\
             JOIN pg_catalog.pg_class t2 ON c.confrelid = t2.oid\n\
             JOIN pg_catalog.pg_attribute a1 ON a1.attnum = c.conkey[1] AND a1.attrelid = t1.oid\n\
             JOIN pg_catalog.pg_attribute a2 ON a2.attnum = c.confkey[1] AND a2.attrelid = t2.oid\n\
             JOIN pg_catalog.pg_namespace n ON c.connamespace = n.oid\n\
             WHERE c.contype = 'f'\n  \
             AND t1.relname = {name}\n  \
             AND {schema}\n\
             ORDER BY c.conname",
            name = self.literal(&table.name),
            schema = self.schema_predicate("n.nspname", table),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warehouse() -> CatalogQueryTranslator {
        CatalogQueryTranslator::new(&CapabilitySet::none().with(FeatureFlag::Views, true))
    }

    fn full() -> CatalogQueryTranslator {
        CatalogQueryTranslator::new(&CapabilitySet::all())
    }

    #[test]
    fn test_parse_table_names() {
        assert_eq!(TableName::parse("users"), TableName::new(None, "users"));
        assert_eq!(
            TableName::parse("sales.orders"),
            TableName::new(Some("sales"), "orders")
        );
        assert_eq!(
            TableName::parse("\"My Schema\".\"odd.name\""),
            TableName::new(Some("My Schema"), "odd.name")
        );
        assert_eq!(
            TableName::parse("\"say \"\"hi\"\"\""),
            TableName::new(None, "say \"hi\"")
        );
    }

    #[test]
    fn test_quoting() {
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_literal("o'neil", true), "'o''neil'");
        assert_eq!(quote_literal("a\\b", true), "'a\\b'");
        assert_eq!(quote_literal("a\\b", false), "'a\\\\b'");
    }

    #[test]
    fn test_column_query_without_collations_has_no_collation_join() {
        let sql = warehouse().build_column_query(&TableName::parse("users"));
        assert!(!sql.contains("pg_collation"));
        assert!(sql.contains("NULL AS collation"));
        assert!(sql.contains("'\"users\"'::regclass"));
        assert!(sql.ends_with("ORDER BY a.attnum"));
    }

    #[test]
    fn test_column_query_with_collations_joins_catalog() {
        let sql = full().build_column_query(&TableName::parse("public.users"));
        assert!(sql.contains("LEFT JOIN pg_catalog.pg_collation c"));
        assert!(sql.contains("c.collname AS collation"));
        assert!(sql.contains("'\"public\".\"users\"'::regclass"));
    }

    #[test]
    fn test_column_query_escapes_hostile_names() {
        let sql = warehouse().build_column_query(&TableName::parse("x'; DROP TABLE t; --"));
        assert!(sql.contains("'\"x''; DROP TABLE t; --\"'::regclass"));
    }

    #[test]
    fn test_primary_key_query_without_array_functions() {
        let sql = warehouse().build_primary_key_query(&TableName::parse("sales.orders"));
        assert!(!sql.contains("generate_subscripts"));
        assert!(sql.contains("information_schema.key_column_usage"));
        assert!(sql.contains("tc.table_schema = 'sales'"));
        assert!(sql.contains("tc.table_name = 'orders'"));
        assert!(sql.contains("ORDER BY kcu.ordinal_position"));

        let unqualified = warehouse().build_primary_key_query(&TableName::parse("orders"));
        assert!(!unqualified.contains("current_schema()"));
        assert!(unqualified.contains("WHERE rc.oid = '\"orders\"'::regclass)"));
    }

    #[test]
    fn test_unqualified_tables_resolve_schema_like_column_query() {
        let table = TableName::parse("orders");
        let relation = "'\"orders\"'::regclass";
        assert!(full().build_column_query(&table).contains(relation));
        assert!(warehouse().build_primary_key_query(&table).contains(relation));
        let fk = full().build_foreign_key_query(&table).unwrap();
        assert!(fk.contains("n.nspname = (SELECT rn.nspname"));
        assert!(fk.contains(relation));
    }

    #[test]
    fn test_primary_key_query_with_array_functions() {
        let sql = full().build_primary_key_query(&TableName::parse("orders"));
        assert!(sql.contains("generate_subscripts(indkey, 1)"));
        assert!(!sql.contains("information_schema"));
    }

    #[test]
    fn test_type_discovery_range_join_follows_capability() {
        let without = warehouse().build_type_discovery_query(None);
        assert!(!without.contains("pg_range"));
        assert!(!without.contains("rngsubtype"));
        assert!(without.contains("t.typtype IN ('e', 'd')"));

        let with = full().build_type_discovery_query(None);
        assert!(with.contains("LEFT JOIN pg_catalog.pg_range AS r"));
        assert!(with.contains("r.rngsubtype"));
        assert!(with.contains("'r'"));
    }

    #[test]
    fn test_type_discovery_with_explicit_oids() {
        let oids: BTreeSet<u32> = [1007, 23].into_iter().collect();
        let sql = warehouse().build_type_discovery_query(Some(&oids));
        assert!(sql.contains("WHERE t.oid IN (23, 1007)"));
        assert!(!sql.contains("typname IN"));

        let empty = warehouse().build_type_discovery_query(Some(&BTreeSet::new()));
        assert!(empty.contains("WHERE 1 = 0"));
    }

    #[test]
    fn test_table_list_relkinds() {
        let sql = warehouse().build_table_list_query("public");
        assert!(sql.contains("c.relkind IN ('r', 'v')"));
        let sql = full().build_table_list_query("public");
        assert!(sql.contains("c.relkind IN ('r', 'v', 'm')"));
    }

    #[test]
    fn test_foreign_keys_gated() {
        assert!(warehouse()
            .build_foreign_key_query(&TableName::parse("orders"))
            .is_none());
        let sql = full()
            .build_foreign_key_query(&TableName::parse("orders"))
            .unwrap();
        assert!(sql.contains("c.contype = 'f'"));
    }
}
