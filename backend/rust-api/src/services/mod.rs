use crate::config::Config;
use mongodb::{Client as MongoClient, Database};
use redis::aio::ConnectionManager;
use std::sync::Arc;

use experiment_service::ExperimentService;
use results_service::{InMemoryResultStore, MongoResultStore, ResultsService};
use sequence_service::{InMemorySequenceCounter, MongoSequenceCounter, SequenceService};
use state_store::{InMemoryStateStore, RedisStateStore};

pub struct AppState {
    pub config: Config,
    /// `None` when running on in-memory backends.
    pub mongo: Option<Database>,
    pub redis: Option<ConnectionManager>,
    pub results: ResultsService,
    pub sequences: SequenceService,
    pub experiments: Arc<ExperimentService>,
}

impl AppState {
    pub async fn new(
        config: Config,
        mongo_client: MongoClient,
        redis_client: redis::Client,
    ) -> anyhow::Result<Self> {
        let mongo = mongo_client.database(&config.mongo_database);

        tracing::info!("Attempting to connect to Redis...");

        let redis = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            ConnectionManager::new(redis_client),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

        tracing::info!("Redis ConnectionManager created, testing with PING...");

        let mut conn = redis.clone();
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

        tracing::info!("Redis connection established successfully");

        let results = ResultsService::new(Arc::new(MongoResultStore::new(&mongo)));
        let sequences = SequenceService::new(Arc::new(MongoSequenceCounter::new(&mongo)));
        let experiments = Arc::new(ExperimentService::new(
            Arc::new(sequences.clone()),
            Arc::new(results.clone()),
            Arc::new(RedisStateStore::new(
                redis.clone(),
                config.state_ttl_seconds,
            )),
            config.experiment_settings(),
        ));

        Ok(Self {
            config,
            mongo: Some(mongo),
            redis: Some(redis),
            results,
            sequences,
            experiments,
        })
    }

    /// Process-local backends, used by the test suite and for offline sessions.
    pub fn in_memory(config: Config) -> Self {
        let results = ResultsService::new(Arc::new(InMemoryResultStore::new()));
        let sequences = SequenceService::new(Arc::new(InMemorySequenceCounter::new()));
        let experiments = Arc::new(ExperimentService::new(
            Arc::new(sequences.clone()),
            Arc::new(results.clone()),
            Arc::new(InMemoryStateStore::new()),
            config.experiment_settings(),
        ));

        Self {
            config,
            mongo: None,
            redis: None,
            results,
            sequences,
            experiments,
        }
    }
}

pub mod audio;
pub mod discontinuation;
pub mod experiment_service;
pub mod export_service;
pub mod presentation;
pub mod response_scorer;
pub mod results_service;
pub mod sequence_generator;
pub mod sequence_service;
pub mod state_store;
pub mod task_controller;
pub mod task_runner;
