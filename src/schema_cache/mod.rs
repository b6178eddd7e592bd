//! Schema cache (C5). Grounded on `cache/mod.rs`'s `CacheEntry`/TTL idiom, adapted
//! from a string-value `RwLock<HashMap>` store to a `DashMap<String, DatabaseSchema>`
//! with per-key coalesced loading so concurrent misses for the same database trigger
//! exactly one introspection pass.

use dashmap::DashMap;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::models::{ColumnSchema, DatabaseSchema, TableSchema};

struct Entry {
    schema: DatabaseSchema,
    expires_at: Instant,
}

/// Caches introspected `DatabaseSchema`s per database name with a configured TTL.
/// Load coalescing is per-key: concurrent callers miss-racing on the same database
/// share a single introspection query rather than each issuing their own.
pub struct SchemaCache {
    entries: DashMap<String, Entry>,
    load_locks: DashMap<String, Arc<Mutex<()>>>,
    ttl: Duration,
}

#[derive(Debug, thiserror::Error)]
#[error("failed to load schema for database '{database}': {reason}")]
pub struct SchemaLoadError {
    pub database: String,
    pub reason: String,
}

impl SchemaCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            load_locks: DashMap::new(),
            ttl,
        }
    }

    /// Returns the cached schema if fresh, without touching the database.
    pub fn peek(&self, database: &str) -> Option<DatabaseSchema> {
        self.entries.get(database).and_then(|e| {
            if e.expires_at > Instant::now() {
                Some(e.schema.clone())
            } else {
                None
            }
        })
    }

    /// Returns a fresh schema, introspecting `pool` on a cache miss or expiry.
    /// Concurrent calls for the same `database` coalesce onto one introspection.
    pub async fn get_or_load(
        &self,
        database: &str,
        pool: &PgPool,
    ) -> Result<DatabaseSchema, SchemaLoadError> {
        if let Some(schema) = self.peek(database) {
            return Ok(schema);
        }

        let lock = self
            .load_locks
            .entry(database.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Re-check: a concurrent loader may have populated the cache while we
        // waited for the per-key lock.
        if let Some(schema) = self.peek(database) {
            return Ok(schema);
        }

        tracing::info!(database, "introspecting schema");
        let schema = introspect(database, pool).await?;
        self.entries.insert(
            database.to_string(),
            Entry { schema: schema.clone(), expires_at: Instant::now() + self.ttl },
        );
        Ok(schema)
    }

    pub fn invalidate(&self, database: &str) {
        self.entries.remove(database);
    }
}

#[cfg(test)]
impl SchemaCache {
    /// Seeds a cache entry directly, bypassing introspection. Lets orchestrator
    /// tests exercise `get_or_load`'s cache-hit path without a live pool.
    pub(crate) fn prime(&self, database: &str, schema: DatabaseSchema) {
        self.entries.insert(database.to_string(), Entry { schema, expires_at: Instant::now() + self.ttl });
    }
}

async fn introspect(database: &str, pool: &PgPool) -> Result<DatabaseSchema, SchemaLoadError> {
    let err = |reason: sqlx::Error| SchemaLoadError { database: database.to_string(), reason: reason.to_string() };

    let table_rows = sqlx::query_as::<_, (String,)>(
        "SELECT table_name FROM information_schema.tables \
         WHERE table_schema = 'public' AND table_type = 'BASE TABLE' ORDER BY table_name",
    )
    .fetch_all(pool)
    .await
    .map_err(err)?;

    let mut tables = Vec::with_capacity(table_rows.len());
    for (table_name,) in table_rows {
        let column_rows = sqlx::query_as::<_, (String, String, String, Option<String>)>(
            "SELECT column_name, data_type, is_nullable, column_default \
             FROM information_schema.columns \
             WHERE table_schema = 'public' AND table_name = $1 \
             ORDER BY ordinal_position",
        )
        .bind(&table_name)
        .fetch_all(pool)
        .await
        .map_err(err)?;

        let pk_rows = sqlx::query_as::<_, (String,)>(
            "SELECT kcu.column_name \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
               ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
             WHERE tc.table_schema = 'public' AND tc.table_name = $1 AND tc.constraint_type = 'PRIMARY KEY'",
        )
        .bind(&table_name)
        .fetch_all(pool)
        .await
        .map_err(err)?;
        let primary_keys: std::collections::HashSet<String> =
            pk_rows.into_iter().map(|(c,)| c).collect();

        let row_estimate: Option<(f32,)> = sqlx::query_as(
            "SELECT reltuples FROM pg_class WHERE relname = $1",
        )
        .bind(&table_name)
        .fetch_optional(pool)
        .await
        .map_err(err)?;

        let columns = column_rows
            .into_iter()
            .map(|(name, data_type, is_nullable, default_expr)| {
                let is_primary_key = primary_keys.contains(&name);
                ColumnSchema {
                    nullable: is_nullable.eq_ignore_ascii_case("YES"),
                    sql_type: data_type,
                    is_primary_key,
                    default_expr,
                    description: None,
                    name,
                }
            })
            .collect();

        tables.push(TableSchema {
            name: table_name,
            columns,
            row_count_estimate: row_estimate.map(|(r,)| r.max(0.0) as i64),
            description: None,
        });
    }

    Ok(DatabaseSchema { database: database.to_string(), tables })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peek_misses_when_empty() {
        let cache = SchemaCache::new(Duration::from_secs(60));
        assert!(cache.peek("db").is_none());
    }

    #[test]
    fn peek_expires_stale_entries() {
        let cache = SchemaCache::new(Duration::from_millis(0));
        cache.entries.insert(
            "db".to_string(),
            Entry {
                schema: DatabaseSchema { database: "db".into(), tables: vec![] },
                expires_at: Instant::now() - Duration::from_secs(1),
            },
        );
        assert!(cache.peek("db").is_none());
    }
}
