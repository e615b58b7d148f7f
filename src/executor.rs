//! SQL validation probes
//!
//! Before a synthesized query is served or written to the cache it can be
//! checked for executability. The live probe asks PostgreSQL to `EXPLAIN`
//! the query; the offline probe only verifies that the text parses as
//! PostgreSQL, for setups without a database at hand.

use crate::error::{EngineError, Result};
use async_trait::async_trait;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, warn};

/// Answers whether a query is plausibly executable. `Ok(false)` means the
/// query was rejected, not that the probe itself failed.
#[async_trait]
pub trait SqlProbe: Send + Sync {
    async fn explain(&self, query: &str) -> Result<bool>;
}

/// Probe backed by a live pool. `EXPLAIN` plans the query without running
/// it, so even an expensive aggregate stays cheap to validate.
pub struct SqlxProbe {
    pool: PgPool,
}

impl SqlxProbe {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await
            .map_err(|e| EngineError::Database(format!("connection failed: {}", e)))?;

        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(|e| EngineError::Database(format!("connection check failed: {}", e)))?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl SqlProbe for SqlxProbe {
    async fn explain(&self, query: &str) -> Result<bool> {
        let statement = format!("EXPLAIN {}", query);
        match sqlx::query(&statement).fetch_all(&self.pool).await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!(error = %e, "EXPLAIN rejected the query");
                Ok(false)
            }
        }
    }
}

/// Offline probe checking only that the text parses as PostgreSQL.
pub struct SyntaxProbe;

#[async_trait]
impl SqlProbe for SyntaxProbe {
    async fn explain(&self, query: &str) -> Result<bool> {
        match Parser::parse_sql(&PostgreSqlDialect {}, query) {
            Ok(statements) => Ok(!statements.is_empty()),
            Err(e) => {
                debug!(error = %e, "query failed to parse");
                Ok(false)
            }
        }
    }
}
