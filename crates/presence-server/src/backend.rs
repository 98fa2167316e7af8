//! Store construction and teardown.
//!
//! [`Backend::open`] builds the entity directory and session store selected
//! by configuration. The `PostgreSQL` pool, when there is one, stays owned
//! here so [`Backend::close`] can drain it after the server stops.

use std::sync::Arc;
use std::time::Duration;

use presence_db::{EntityDirectory, MemoryStore, PostgresConfig, PostgresPool, SessionStore};
use presence_types::BadgeId;
use tracing::{info, warn};

use crate::config::{ConfigError, SeedEntity, StoreBackend, StoreSection};
use crate::error::StartupError;

/// The directory and store handles the ledger runs against.
pub struct Backend {
    /// Badge resolution.
    pub directory: Arc<dyn EntityDirectory>,
    /// Session persistence.
    pub store: Arc<dyn SessionStore>,
    pool: Option<PostgresPool>,
}

impl Backend {
    /// Open the configured backend.
    ///
    /// The memory backend registers `seed`; the `PostgreSQL` backend reads
    /// entities from its own table and ignores `seed`.
    ///
    /// # Errors
    ///
    /// Returns [`StartupError`] if the pool cannot connect, migrations fail,
    /// or a seed entry is blank or duplicated.
    pub async fn open(store: &StoreSection, seed: &[SeedEntity]) -> Result<Self, StartupError> {
        match store.backend {
            StoreBackend::Memory => {
                let memory = Arc::new(seed_memory(seed).await?);
                info!(entities = seed.len(), "Using in-memory session store");
                Ok(Self {
                    directory: memory.clone(),
                    store: memory,
                    pool: None,
                })
            }
            StoreBackend::Postgres => {
                let statement_timeout =
                    store.statement_timeout().ok_or_else(|| ConfigError::Invalid {
                        key: "store.operation_timeout_ms",
                        message: String::from("too short to bound statements server-side"),
                    })?;
                let config = PostgresConfig::new(&store.postgres_url)
                    .with_max_connections(store.max_connections)
                    .with_connect_timeout(Duration::from_millis(store.connect_timeout_ms))
                    .with_idle_timeout(Duration::from_millis(store.idle_timeout_ms))
                    .with_statement_timeout(statement_timeout);
                let pool = PostgresPool::connect(&config).await?;

                if store.run_migrations {
                    pool.run_migrations().await?;
                }
                if !seed.is_empty() {
                    warn!(
                        entries = seed.len(),
                        "directory.seed is ignored by the postgres backend"
                    );
                }

                Ok(Self {
                    directory: Arc::new(pool.entity_directory()),
                    store: Arc::new(pool.session_store()),
                    pool: Some(pool),
                })
            }
        }
    }

    /// Release the connection pool, if any.
    pub async fn close(self) {
        if let Some(pool) = self.pool {
            pool.close().await;
        }
    }
}

async fn seed_memory(seed: &[SeedEntity]) -> Result<MemoryStore, StartupError> {
    let memory = MemoryStore::new();
    for entry in seed {
        let badge_id = BadgeId::parse(&entry.badge_id).ok_or_else(|| ConfigError::Invalid {
            key: "directory.seed",
            message: format!("entry {:?} has a blank badge_id", entry.name),
        })?;
        memory
            .register_entity(badge_id, &entry.name, entry.department.as_deref())
            .await?;
    }
    Ok(memory)
}
