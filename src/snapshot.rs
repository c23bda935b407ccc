//! Exported source snapshot
//!
//! One dedicated connection holds a repeatable-read transaction open for the
//! whole run; its exported snapshot token is imported by every table read.

use sqlx::{Connection, PgConnection, PgPool};
use tracing::{debug, warn};

use crate::error::Result;

/// Holder of the coordinator connection and its snapshot token
pub struct SourceSnapshot {
    conn: PgConnection,
    token: String,
}

impl SourceSnapshot {
    /// Open the coordinator transaction and export its snapshot
    pub async fn export(pool: &PgPool) -> Result<Self> {
        // detached so the pool never hands this connection to anyone else
        let mut conn = pool.acquire().await?.detach();
        sqlx::raw_sql("BEGIN ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut conn)
            .await?;
        let token: String = sqlx::query_scalar("SELECT pg_export_snapshot()")
            .persistent(false)
            .fetch_one(&mut conn)
            .await?;
        debug!(snapshot = %token, "Exported source snapshot");
        Ok(Self { conn, token })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// End the transaction and close the connection, invalidating the token
    pub async fn release(self) {
        let token = self.token;
        if let Err(e) = self.conn.close().await {
            warn!(snapshot = %token, error = %e, "Failed to close snapshot connection");
        } else {
            debug!(snapshot = %token, "Released source snapshot");
        }
    }
}
