use duckdb::Connection;
use serde::Serialize;
use tracing::debug;

/// One table with its columns in declaration order.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TableSchema {
    pub name: String,
    /// (column name, declared type)
    pub columns: Vec<(String, String)>,
}

/// Point-in-time view of the database structure.
///
/// Introspected fresh for every query so that SQL generation never runs
/// against a drifted schema. Never cached across queries.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SchemaSnapshot {
    pub tables: Vec<TableSchema>,
}

impl SchemaSnapshot {
    /// Read the current table/column structure from `information_schema`.
    pub fn introspect(conn: &Connection) -> duckdb::Result<Self> {
        let mut stmt = conn.prepare(
            "SELECT table_name, column_name, data_type
             FROM information_schema.columns
             WHERE table_schema = 'main'
             ORDER BY table_name, ordinal_position",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut tables: Vec<TableSchema> = Vec::new();
        for row in rows {
            let (table, column, data_type) = row?;
            match tables.last_mut() {
                Some(last) if last.name == table => last.columns.push((column, data_type)),
                _ => tables.push(TableSchema {
                    name: table,
                    columns: vec![(column, data_type)],
                }),
            }
        }

        debug!("Introspected schema snapshot with {} tables", tables.len());
        Ok(Self { tables })
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.iter().any(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// Render the snapshot as markdown for the model prompt.
    pub fn to_prompt_text(&self) -> String {
        let mut metadata = String::from("# DATABASE SCHEMA\n\n");

        if self.tables.is_empty() {
            metadata.push_str("No tables found.\n");
            return metadata;
        }

        for table in &self.tables {
            metadata.push_str(&format!("### Table: {}\n\n", table.name));
            metadata.push_str("| Column Name | Data Type |\n");
            metadata.push_str("|------------|-----------|\n");
            for (name, data_type) in &table.columns {
                metadata.push_str(&format!("| {} | {} |\n", name, data_type));
            }
            metadata.push('\n');
        }

        metadata
    }
}
