// Bootstrap utilities for binary initialization

use crate::config::Settings;
use crate::db::{DbPool, QueryExecutor};
use crate::errors::StartupError;
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Connect every configured database. The first failure aborts startup.
///
/// # Errors
/// Returns `StartupError::DatabaseUnreachable` naming the failing database;
/// pools opened before it are closed
#[tracing::instrument(skip(settings))]
pub async fn connect_databases(settings: &Settings) -> Result<Vec<DbPool>, StartupError> {
    let mut pools = Vec::with_capacity(settings.databases.len());
    for database in &settings.databases {
        info!(database = %database.name, metrics = database.metrics.len(), "Connecting to database");
        match DbPool::new(database).await {
            Ok(pool) => pools.push(pool),
            Err(e) => {
                error!(database = %database.name, error = %e, "Failed to connect to database");
                for pool in &pools {
                    pool.close().await;
                }
                return Err(StartupError::DatabaseUnreachable {
                    database: database.name.clone(),
                    source: e,
                });
            }
        }
    }
    Ok(pools)
}

/// Index pools by database name for the supervisor
pub fn executors(pools: &[DbPool]) -> HashMap<String, Arc<dyn QueryExecutor>> {
    pools
        .iter()
        .map(|pool| {
            let executor: Arc<dyn QueryExecutor> = Arc::new(pool.clone());
            (pool.name().to_string(), executor)
        })
        .collect()
}

/// Socket address of the exposition endpoint
pub fn metrics_addr(settings: &Settings) -> Result<SocketAddr, std::net::AddrParseError> {
    let host: IpAddr = settings.server.host.parse()?;
    Ok(SocketAddr::from((host, settings.server.port)))
}

/// Close every pool
pub async fn close_pools(pools: &[DbPool]) {
    for pool in pools {
        pool.close().await;
    }
}

/// Wait for the exposition server to stop, then close the pools.
///
/// Both steps share one `grace` budget. Returns `false` when it ran out.
pub async fn release_resources(
    server: JoinHandle<io::Result<()>>,
    pools: &[DbPool],
    grace: Duration,
) -> bool {
    let release = async {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Metrics endpoint failed"),
            Err(e) => warn!(error = %e, "Metrics endpoint task panicked"),
        }
        close_pools(pools).await;
    };

    match tokio::time::timeout(grace, release).await {
        Ok(()) => true,
        Err(_) => {
            warn!(
                grace_period_ms = grace.as_millis() as u64,
                "Metrics endpoint and database pools did not close within grace period"
            );
            false
        }
    }
}
