//! SQL text for connection schema operations.
//!
//! Every statement the engine sends is assembled here. Identifiers go through
//! [`escape_name`] and string values through [`escape_string`]; nothing else
//! in the crate interpolates user-controlled text into SQL.

use std::collections::BTreeSet;
use std::fmt::Write;

use crate::config::ReconcileConfig;
use crate::types::PluginSchema;

/// Quotes an identifier using PostgreSQL rules.
pub fn escape_name(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quotes a possibly schema-qualified name such as `internal.state`.
pub fn escape_qualified_name(name: &str) -> String {
    name.split('.')
        .map(escape_name)
        .collect::<Vec<_>>()
        .join(".")
}

/// Quotes a string literal using PostgreSQL rules.
///
/// Values containing backslashes use the escape string syntax so the result is
/// correct regardless of `standard_conforming_strings`.
pub fn escape_string(value: &str) -> String {
    let quoted = value.replace('\'', "''");
    if quoted.contains('\\') {
        format!("E'{}'", quoted.replace('\\', "\\\\"))
    } else {
        format!("'{quoted}'")
    }
}

/// Statements that (re)create the schema for a connection and import its
/// foreign tables.
///
/// Default privileges are altered before the import so imported tables inherit
/// the select grant.
pub fn build_create_or_replace(
    connection_name: &str,
    remote_schema: &str,
    config: &ReconcileConfig,
) -> String {
    let schema = escape_name(connection_name);
    let role = escape_name(&config.consumer_role);
    let mut sql = String::new();

    let _ = writeln!(sql, "drop schema if exists {schema} cascade;");
    let _ = writeln!(sql, "create schema {schema};");
    let _ = writeln!(
        sql,
        "comment on schema {schema} is {};",
        escape_string(&format!("schemasync plugin: {remote_schema}"))
    );
    let _ = writeln!(sql, "grant usage on schema {schema} to {role};");
    let _ = writeln!(
        sql,
        "alter default privileges in schema {schema} grant select on tables to {role};"
    );
    let _ = writeln!(
        sql,
        "grant select on all tables in schema {schema} to {role};"
    );
    let _ = writeln!(
        sql,
        "import foreign schema {} from server {} into {schema};",
        escape_name(remote_schema),
        escape_name(&config.foreign_server)
    );
    sql
}

pub fn build_delete(connection_name: &str) -> String {
    format!(
        "drop schema if exists {} cascade;\n",
        escape_name(connection_name)
    )
}

/// Clones the already materialized `exemplar` schema into `connection_name`.
pub fn build_clone(exemplar: &str, connection_name: &str, plugin: &str) -> String {
    format!(
        "select clone_foreign_schema({}, {}, {});\n",
        escape_string(exemplar),
        escape_string(connection_name),
        escape_string(plugin)
    )
}

/// One `comment on` statement per table and column with a description.
///
/// Returns an empty string when the schema carries no descriptions.
pub fn build_comments(connection_name: &str, schema: &PluginSchema) -> String {
    let schema_name = escape_name(connection_name);
    let mut sql = String::new();

    for (table_name, table) in &schema.tables {
        let table_ref = format!("{schema_name}.{}", escape_name(table_name));
        if !table.description.is_empty() {
            let _ = writeln!(
                sql,
                "comment on foreign table {table_ref} is {};",
                escape_string(&table.description)
            );
        }
        for column in table.columns.iter().filter(|c| !c.description.is_empty()) {
            let _ = writeln!(
                sql,
                "comment on column {table_ref}.{} is {};",
                escape_name(&column.name),
                escape_string(&column.description)
            );
        }
    }
    sql
}

/// Taken at the start of the comment transaction.
pub fn lock_namespace_catalog() -> &'static str {
    "lock table pg_namespace;"
}

pub fn foreign_schema_names_query(foreign_server: &str) -> String {
    format!(
        "select distinct foreign_table_schema from information_schema.foreign_tables \
         where foreign_server_name = {} order by 1",
        escape_string(foreign_server)
    )
}

/// Sets the search path for `role` and for the current session.
///
/// Prefix schemas come first in the given order, followed by the connection
/// schemas sorted by name. Duplicates are dropped.
pub fn build_search_path(role: &str, prefix: &[String], schemas: &[String]) -> String {
    let mut seen = BTreeSet::new();
    let sorted: BTreeSet<&String> = schemas.iter().collect();
    let path = prefix
        .iter()
        .chain(sorted)
        .filter(|schema| seen.insert(schema.as_str()))
        .map(|schema| escape_name(schema))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "alter role {} set search_path to {path};\nset search_path to {path};\n",
        escape_name(role)
    )
}

pub fn state_table_ddl(table: &str) -> String {
    format!(
        "create table if not exists {} (\n    \
         name text primary key,\n    \
         state text not null,\n    \
         error_message text,\n    \
         updated_at timestamptz not null\n)",
        escape_qualified_name(table)
    )
}

/// Parameterized upsert of one state row: `$1` name, `$2` state,
/// `$3` error message, `$4` timestamp.
pub fn state_upsert(table: &str) -> String {
    format!(
        "insert into {} (name, state, error_message, updated_at) values ($1, $2, $3, $4) \
         on conflict (name) do update set state = excluded.state, \
         error_message = excluded.error_message, updated_at = excluded.updated_at",
        escape_qualified_name(table)
    )
}
