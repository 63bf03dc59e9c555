// The query-answering pipeline: route, retrieve, plan, generate SQL,
// execute, repair within budget, synthesize. Each query is processed
// independently end-to-end; nothing mutable is shared between queries.

pub mod generator;
pub mod planner;
pub mod repair;
pub mod router;
pub mod synthesizer;
pub mod types;

use crate::corpus::retriever::TfIdfIndex;
use crate::db::executor::{ExecutionResult, SqlExecutor};
use crate::db::schema::SchemaSnapshot;
use crate::llm::LlmError;
use crate::pipeline::generator::SqlStrategy;
use crate::pipeline::planner::Planner;
use crate::pipeline::repair::{RepairDecision, RepairTracker, SqlPhase};
use crate::pipeline::router::RouteStrategy;
use crate::pipeline::synthesizer::Synthesizer;
use crate::pipeline::types::{Answer, Classification, PriorFailure, Query, SqlCandidate};
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Errors that abort the current query. Everything else (bad SQL, empty
/// retrieval, incomplete facts) is absorbed inside the pipeline.
#[derive(Debug)]
pub enum PipelineError {
    ModelInvocation(LlmError),
    /// The live schema could not be read; SQL generation must not proceed
    /// against a stale or guessed schema.
    SchemaUnavailable(String),
    Database(String),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::ModelInvocation(err) => write!(f, "model invocation failed: {}", err),
            PipelineError::SchemaUnavailable(msg) => write!(f, "schema unavailable: {}", msg),
            PipelineError::Database(msg) => write!(f, "database error: {}", msg),
        }
    }
}

impl Error for PipelineError {}

impl From<LlmError> for PipelineError {
    fn from(err: LlmError) -> Self {
        PipelineError::ModelInvocation(err)
    }
}

pub struct Pipeline {
    router: Box<dyn RouteStrategy>,
    retriever: Arc<TfIdfIndex>,
    planner: Planner,
    generator: Box<dyn SqlStrategy>,
    executor: SqlExecutor,
    synthesizer: Synthesizer,
    top_k: usize,
}

impl Pipeline {
    pub fn new(
        router: Box<dyn RouteStrategy>,
        retriever: Arc<TfIdfIndex>,
        generator: Box<dyn SqlStrategy>,
        executor: SqlExecutor,
        synthesizer: Synthesizer,
        top_k: usize,
    ) -> Self {
        Self {
            router,
            retriever,
            planner: Planner::new(),
            generator,
            executor,
            synthesizer,
            top_k,
        }
    }

    /// Answer one query end-to-end.
    pub async fn answer(&self, query: &Query) -> Result<Answer, PipelineError> {
        let classification = self.router.classify(&query.question).await?;
        info!("Query classified as {:?}: {}", classification, query.question);

        let needs_retrieval = classification != Classification::Sql;
        let needs_sql = classification != Classification::Retrieval;

        // Retrieval reads the corpus index, schema introspection reads the
        // database; they overlap safely on a hybrid query.
        let (retrieval, snapshot) = tokio::join!(
            async {
                if needs_retrieval {
                    self.retriever.retrieve(&query.question, self.top_k)
                } else {
                    Vec::new()
                }
            },
            async {
                if needs_sql {
                    self.introspect_schema().await.map(Some)
                } else {
                    Ok(None)
                }
            },
        );
        let snapshot = snapshot?;

        if needs_retrieval && retrieval.is_empty() {
            info!("Retrieval returned no chunks; continuing with empty context");
        }

        let facts = self.planner.extract(&query.question, &retrieval);
        if facts.is_empty() {
            debug!("No plan facts extracted; SQL generation runs unconstrained");
        }

        let sql_outcome = match &snapshot {
            Some(schema) => Some(self.run_sql_branch(&query.question, schema, &facts).await?),
            None => None,
        };

        let answer = self
            .synthesizer
            .synthesize(
                &query.question,
                query.format_hint,
                classification,
                &retrieval,
                sql_outcome.as_ref().map(|(c, r)| (c, r)),
            )
            .await?;

        info!(
            "Answer status {:?} with {} citation(s)",
            answer.status,
            answer.citations.len()
        );
        Ok(answer)
    }

    /// A fresh snapshot per query: the schema may drift between queries and
    /// generation must never run against a stale one.
    async fn introspect_schema(&self) -> Result<SchemaSnapshot, PipelineError> {
        let pool = self.executor.pool().clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool
                .get()
                .map_err(|e| PipelineError::SchemaUnavailable(e.to_string()))?;
            SchemaSnapshot::introspect(&conn)
                .map_err(|e| PipelineError::SchemaUnavailable(e.to_string()))
        })
        .await
        .map_err(|e| PipelineError::Database(e.to_string()))?
    }

    /// Generate, execute, and repair within budget. The explicit phase
    /// machine makes the ≤ 3 execution bound structural.
    async fn run_sql_branch(
        &self,
        question: &str,
        schema: &SchemaSnapshot,
        facts: &types::PlanFacts,
    ) -> Result<(SqlCandidate, ExecutionResult), PipelineError> {
        let sql = self.generator.generate(question, schema, facts, None).await?;

        let mut tracker = RepairTracker::new();
        let mut phase = SqlPhase::Generated(SqlCandidate { sql, attempt: 0 });

        loop {
            phase = match phase {
                SqlPhase::Generated(candidate) => {
                    info!("Executing SQL (attempt {}): {}", candidate.attempt, candidate.sql);
                    let result = self.executor.execute(&candidate.sql).await;
                    SqlPhase::Executed { candidate, result }
                }

                SqlPhase::Executed { candidate, result } => {
                    if result.is_success() {
                        return Ok((candidate, result));
                    }
                    let error = result
                        .error_message()
                        .unwrap_or("unknown execution error")
                        .to_string();

                    match tracker.register_failure() {
                        RepairDecision::Retry { next_attempt } => {
                            warn!(
                                "SQL attempt {} failed ({}); repairing as attempt {}",
                                candidate.attempt, error, next_attempt
                            );
                            let prior = PriorFailure {
                                sql: candidate.sql.clone(),
                                error,
                            };
                            let repaired = self
                                .generator
                                .generate(question, schema, facts, Some(&prior))
                                .await?;
                            SqlPhase::Generated(SqlCandidate {
                                sql: repaired,
                                attempt: next_attempt,
                            })
                        }
                        RepairDecision::Exhausted => SqlPhase::Exhausted { candidate, result },
                    }
                }

                SqlPhase::Exhausted { candidate, result } => {
                    warn!(
                        "Repair budget exhausted after {} attempt(s); forwarding failure",
                        tracker.attempts()
                    );
                    return Ok((candidate, result));
                }
            };
        }
    }
}
