//! Data store gateway: schema introspection and read-only query execution
//! against an embedded SQLite database.

use crate::error::{AgentError, Result};
use crate::state::{ResultSet, Row};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

/// One table of the schema snapshot.
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name: String,
    pub create_sql: String,
    /// Up to 3 example rows, for prompt grounding.
    pub example_rows: Vec<Row>,
}

/// Ordered snapshot of the store's schema, regenerated per pipeline run.
#[derive(Debug, Clone, Default)]
pub struct SchemaSnapshot {
    pub tables: Vec<TableSchema>,
}

impl SchemaSnapshot {
    /// Renders the snapshot into the text block embedded in prompts.
    pub fn to_prompt(&self) -> String {
        let mut out = Vec::new();
        for table in &self.tables {
            out.push(format!("Table: {}", table.name));
            out.push(format!("CREATE statement: {}\n", table.create_sql));
            if !table.example_rows.is_empty() {
                out.push("Example rows:".to_string());
                for row in &table.example_rows {
                    out.push(Value::Array(row.clone()).to_string());
                }
            }
            out.push(String::new());
        }
        out.join("\n")
    }
}

/// Boundary to the storage engine. Read-mostly: the pipeline only ever
/// issues `SELECT` statements.
pub trait DataStore: Send + Sync {
    fn get_schema(&self) -> Result<SchemaSnapshot>;
    fn execute_query(&self, query: &str) -> Result<ResultSet>;
}

/// SQLite-backed data store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| AgentError::Database(format!("Failed to open database: {}", e)))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AgentError::Database(format!("Failed to open database: {}", e)))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Runs arbitrary statements, for dataset seeding. The pipeline itself
    /// only issues `SELECT` through the `DataStore` trait.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(sql)
            .map_err(|e| AgentError::Database(e.to_string()))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AgentError::Database("Connection lock poisoned".to_string()))
    }
}

fn value_ref_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(format!("<blob: {} bytes>", b.len())),
    }
}

fn run_query(conn: &Connection, query: &str) -> Result<ResultSet> {
    let mut stmt = conn
        .prepare(query)
        .map_err(|e| AgentError::Database(e.to_string()))?;
    let column_count = stmt.column_count();

    let mut rows = stmt
        .query([])
        .map_err(|e| AgentError::Database(e.to_string()))?;
    let mut results = Vec::new();
    while let Some(row) = rows.next().map_err(|e| AgentError::Database(e.to_string()))? {
        let mut values = Vec::with_capacity(column_count);
        for i in 0..column_count {
            let value = row
                .get_ref(i)
                .map_err(|e| AgentError::Database(e.to_string()))?;
            values.push(value_ref_to_json(value));
        }
        results.push(values);
    }
    Ok(results)
}

impl DataStore for SqliteStore {
    fn get_schema(&self) -> Result<SchemaSnapshot> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT name, sql FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'")
            .map_err(|e| AgentError::Database(e.to_string()))?;
        let tables: Vec<(String, String)> = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| AgentError::Database(e.to_string()))?
            .collect::<rusqlite::Result<_>>()
            .map_err(|e| AgentError::Database(e.to_string()))?;

        let mut snapshot = SchemaSnapshot::default();
        for (name, create_sql) in tables {
            let example_rows = run_query(&conn, &format!("SELECT * FROM \"{}\" LIMIT 3", name))?;
            snapshot.tables.push(TableSchema {
                name,
                create_sql,
                example_rows,
            });
        }
        debug!(tables = snapshot.tables.len(), "schema snapshot built");
        Ok(snapshot)
    }

    fn execute_query(&self, query: &str) -> Result<ResultSet> {
        let conn = self.lock()?;
        run_query(&conn, query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sales_store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .execute_batch(
                "CREATE TABLE sales (category TEXT, quantity INTEGER);
                 INSERT INTO sales VALUES ('Electronics', 120);
                 INSERT INTO sales VALUES ('Clothing', 80);
                 INSERT INTO sales VALUES ('Food', 200);
                 INSERT INTO sales VALUES ('Toys', 40);",
            )
            .unwrap();
        store
    }

    #[test]
    fn test_schema_snapshot_includes_create_and_samples() {
        let store = sales_store();
        let schema = store.get_schema().unwrap();
        assert_eq!(schema.tables.len(), 1);
        assert_eq!(schema.tables[0].name, "sales");
        assert!(schema.tables[0].create_sql.contains("CREATE TABLE sales"));
        assert_eq!(schema.tables[0].example_rows.len(), 3);

        let prompt = schema.to_prompt();
        assert!(prompt.contains("Table: sales"));
        assert!(prompt.contains("CREATE statement:"));
        assert!(prompt.contains("Example rows:"));
    }

    #[test]
    fn test_execute_query_returns_typed_rows() {
        let store = sales_store();
        let rows = store
            .execute_query("SELECT category, quantity FROM sales ORDER BY quantity DESC")
            .unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0][0], Value::String("Food".to_string()));
        assert_eq!(rows[0][1], Value::from(200));
    }

    #[test]
    fn test_execute_query_surfaces_store_errors() {
        let store = sales_store();
        let err = store.execute_query("SELECT nope FROM missing").unwrap_err();
        assert!(matches!(err, AgentError::Database(_)));
    }
}
