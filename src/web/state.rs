use crate::config::AppConfig;
use crate::corpus::retriever::TfIdfIndex;
use crate::corpus::Corpus;
use crate::db::db_pool::DuckDbConnectionManager;
use crate::db::executor::SqlExecutor;
use crate::llm::LlmManager;
use crate::pipeline::generator::{default_exemplars, LlmSqlStrategy, SqlStrategy};
use crate::pipeline::router::{LlmRouter, RouteStrategy, RuleRouter};
use crate::pipeline::synthesizer::Synthesizer;
use crate::pipeline::Pipeline;
use chrono::{DateTime, Utc};
use r2d2::Pool;
use std::sync::Arc;
use std::time::Duration;

/// Shared application state for the web server.
pub struct AppState {
    pub config: AppConfig,
    pub db_pool: Pool<DuckDbConnectionManager>,
    pub pipeline: Arc<Pipeline>,
    pub corpus_chunks: usize,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        db_pool: Pool<DuckDbConnectionManager>,
        corpus: &Corpus,
        llm: Arc<LlmManager>,
    ) -> Self {
        let retriever = Arc::new(TfIdfIndex::build(corpus));

        let router: Box<dyn RouteStrategy> = match config.pipeline.router.as_str() {
            "llm" => Box::new(LlmRouter::new(llm.clone())),
            _ => Box::new(RuleRouter),
        };

        let generator: Box<dyn SqlStrategy> = Box::new(LlmSqlStrategy::new(
            llm.clone(),
            default_exemplars(),
            config.pipeline.cost_of_goods_multiplier,
        ));

        let executor = SqlExecutor::new(
            db_pool.clone(),
            Duration::from_millis(config.database.query_timeout_ms),
        );

        let pipeline = Arc::new(Pipeline::new(
            router,
            retriever,
            generator,
            executor,
            Synthesizer::new(llm),
            config.pipeline.top_k,
        ));

        Self {
            config,
            db_pool,
            pipeline,
            corpus_chunks: corpus.len(),
            startup_time: Utc::now(),
        }
    }
}
