//! Query intent classification.
//!
//! Classification is a swappable strategy: the rule-based router is fully
//! deterministic and needs no model; the model-backed router normalizes
//! whatever the model says and falls back to hybrid, the superset behavior.

use crate::llm::{LlmError, LlmManager};
use crate::pipeline::types::Classification;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

#[async_trait]
pub trait RouteStrategy: Send + Sync {
    async fn classify(&self, question: &str) -> Result<Classification, LlmError>;
}

const RETRIEVAL_MARKERS: &[&str] = &[
    "policy",
    "policies",
    "return",
    "refund",
    "defined",
    "definition",
    "mean by",
    "describe",
    "explain",
];

const SQL_MARKERS: &[&str] = &[
    "how many",
    "count",
    "total",
    "sum",
    "average",
    "top ",
    "most",
    "least",
    "revenue",
    "orders",
    "sold",
    "quantity",
    "customers",
    "products",
];

// KPI questions need both the definition docs and the data.
const KPI_MARKERS: &[&str] = &["aov", "average order value", "margin", "kpi"];

pub struct RuleRouter;

#[async_trait]
impl RouteStrategy for RuleRouter {
    async fn classify(&self, question: &str) -> Result<Classification, LlmError> {
        let lower = question.to_lowercase();

        let kpi = KPI_MARKERS.iter().any(|m| lower.contains(m));
        let retrieval = RETRIEVAL_MARKERS.iter().any(|m| lower.contains(m));
        let sql = SQL_MARKERS.iter().any(|m| lower.contains(m));

        let label = if kpi {
            Classification::Hybrid
        } else if retrieval && sql {
            Classification::Hybrid
        } else if retrieval {
            Classification::Retrieval
        } else if sql {
            Classification::Sql
        } else {
            // Ambiguous questions take the superset path.
            Classification::Hybrid
        };

        debug!("Rule router classified question as {:?}", label);
        Ok(label)
    }
}

pub struct LlmRouter {
    llm: Arc<LlmManager>,
}

impl LlmRouter {
    pub fn new(llm: Arc<LlmManager>) -> Self {
        Self { llm }
    }

    fn prepare_prompt(&self, question: &str) -> String {
        format!(
            r#"
### Instructions:
Classify the question into exactly one label:
- retrieval: answered from policy/definition documents alone
- sql: answered from the transactional database alone
- hybrid: needs both (KPI calculations are always hybrid)

Respond with the single label only.

### Question:
{}

### Label:
"#,
            question
        )
    }
}

#[async_trait]
impl RouteStrategy for LlmRouter {
    async fn classify(&self, question: &str) -> Result<Classification, LlmError> {
        let response = self.llm.complete(&self.prepare_prompt(question)).await?;
        let label = normalize_label(&response);
        debug!("LLM router classified question as {:?} (raw: {})", label, response.trim());
        Ok(label)
    }
}

/// Map free-form model output onto a label; anything unrecognized defaults
/// to hybrid rather than failing.
fn normalize_label(raw: &str) -> Classification {
    let lower = raw.to_lowercase();
    if lower.contains("hybrid") || lower.contains("both") {
        Classification::Hybrid
    } else if lower.contains("sql") {
        Classification::Sql
    } else if lower.contains("retrieval") || lower.contains("rag") || lower.contains("doc") {
        Classification::Retrieval
    } else {
        Classification::Hybrid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn classify(question: &str) -> Classification {
        RuleRouter.classify(question).await.unwrap()
    }

    #[tokio::test]
    async fn policy_questions_route_to_retrieval() {
        assert_eq!(
            classify("What is the return policy for damaged goods?").await,
            Classification::Retrieval
        );
    }

    #[tokio::test]
    async fn data_questions_route_to_sql() {
        assert_eq!(
            classify("How many orders were placed in June 2013?").await,
            Classification::Sql
        );
    }

    #[tokio::test]
    async fn kpi_questions_route_to_hybrid() {
        assert_eq!(
            classify("What was the average order value in December 2013?").await,
            Classification::Hybrid
        );
        assert_eq!(
            classify("Which customer had the highest gross margin?").await,
            Classification::Hybrid
        );
    }

    #[tokio::test]
    async fn ambiguous_questions_default_to_hybrid() {
        assert_eq!(classify("Tell me about the business").await, Classification::Hybrid);
    }

    #[tokio::test]
    async fn classification_is_deterministic() {
        let q = "What was total revenue in 2013?";
        let first = classify(q).await;
        for _ in 0..5 {
            assert_eq!(classify(q).await, first);
        }
    }

    #[test]
    fn normalization_defaults_to_hybrid() {
        assert_eq!(normalize_label("SQL"), Classification::Sql);
        assert_eq!(normalize_label("I think retrieval fits"), Classification::Retrieval);
        assert_eq!(normalize_label("both sources"), Classification::Hybrid);
        assert_eq!(normalize_label("gibberish"), Classification::Hybrid);
    }
}
