//! Liveness and readiness probes.

use std::collections::HashMap;
use std::time::Instant;

use sqlx::PgPool;
use tracing::warn;

use crate::embedding::QueryEmbedder;
use crate::store::db;

/// Liveness snapshot.
#[derive(Clone, Debug)]
pub struct HealthStatus {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
}

/// Readiness snapshot with per-dependency state.
#[derive(Clone, Debug)]
pub struct Readiness {
    pub ready: bool,
    pub dependency_status: HashMap<String, bool>,
}

pub struct HealthService {
    pool: PgPool,
    embedder: QueryEmbedder,
    started_at: Instant,
}

impl HealthService {
    pub fn new(pool: PgPool, embedder: QueryEmbedder) -> Self {
        Self {
            pool,
            embedder,
            started_at: Instant::now(),
        }
    }

    /// Liveness probe.
    pub fn check(&self) -> HealthStatus {
        HealthStatus {
            status: "healthy",
            version: env!("CARGO_PKG_VERSION"),
            uptime_seconds: self.started_at.elapsed().as_secs(),
        }
    }

    /// Readiness probe: database ping plus a real embedding round trip.
    pub async fn ready(&self) -> Readiness {
        let database = db::health_check(&self.pool).await;

        let embeddings = match self.embedder.embed_query("health check").await {
            Ok(vector) => !vector.is_empty(),
            Err(e) => {
                warn!("embedding readiness check failed: {e}");
                false
            }
        };

        let dependency_status = HashMap::from([
            ("database".to_string(), database),
            ("embeddings".to_string(), embeddings),
        ]);
        let ready = dependency_status.values().all(|ok| *ok);
        if !ready {
            warn!(?dependency_status, "service not ready");
        }

        Readiness {
            ready,
            dependency_status,
        }
    }
}
