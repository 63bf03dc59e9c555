//! Schema-grounded SQL generation.
//!
//! The generation strategy is pluggable: the pipeline only depends on the
//! `(question, schema, facts, prior failure?) -> sql` contract. The
//! production strategy conditions a model prompt on the schema snapshot, the
//! planner's facts and a fixed exemplar set produced by offline tuning.

use crate::db::schema::SchemaSnapshot;
use crate::llm::{LlmError, LlmManager};
use crate::pipeline::types::{PlanFacts, PriorFailure};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

#[async_trait]
pub trait SqlStrategy: Send + Sync {
    async fn generate(
        &self,
        question: &str,
        schema: &SchemaSnapshot,
        facts: &PlanFacts,
        prior: Option<&PriorFailure>,
    ) -> Result<String, LlmError>;
}

/// One worked question/SQL pair shown to the model. The set is a build-time
/// artifact of the offline few-shot optimization and is injected at
/// construction.
#[derive(Debug, Clone)]
pub struct Exemplar {
    pub question: String,
    pub sql: String,
}

pub fn default_exemplars() -> Vec<Exemplar> {
    let pairs: &[(&str, &str)] = &[
        (
            "What are the top 3 products by revenue?",
            "SELECT p.ProductName, SUM(od.UnitPrice * od.Quantity * (1 - od.Discount)) AS Revenue\n\
             FROM Products p\n\
             JOIN OrderDetails od ON p.ProductID = od.ProductID\n\
             GROUP BY p.ProductName\n\
             ORDER BY Revenue DESC\n\
             LIMIT 3",
        ),
        (
            "How many orders were placed in June 2013?",
            "SELECT COUNT(DISTINCT OrderID) AS OrderCount\n\
             FROM Orders\n\
             WHERE OrderDate BETWEEN '2013-06-01' AND '2013-06-30'",
        ),
        (
            "What was the total revenue from the Beverages category?",
            "SELECT SUM(od.UnitPrice * od.Quantity * (1 - od.Discount)) AS Revenue\n\
             FROM OrderDetails od\n\
             JOIN Products p ON od.ProductID = p.ProductID\n\
             JOIN Categories c ON p.CategoryID = c.CategoryID\n\
             WHERE c.CategoryName = 'Beverages'",
        ),
        (
            "What is the average order value in December 2013?",
            "SELECT SUM(od.UnitPrice * od.Quantity * (1 - od.Discount)) / COUNT(DISTINCT o.OrderID) AS AOV\n\
             FROM Orders o\n\
             JOIN OrderDetails od ON o.OrderID = od.OrderID\n\
             WHERE o.OrderDate BETWEEN '2013-12-01' AND '2013-12-31'",
        ),
        (
            "Who is the top customer by total revenue in 2013?",
            "SELECT c.CompanyName, SUM(od.UnitPrice * od.Quantity * (1 - od.Discount)) AS Revenue\n\
             FROM Customers c\n\
             JOIN Orders o ON c.CustomerID = o.CustomerID\n\
             JOIN OrderDetails od ON o.OrderID = od.OrderID\n\
             WHERE o.OrderDate BETWEEN '2013-01-01' AND '2013-12-31'\n\
             GROUP BY c.CompanyName\n\
             ORDER BY Revenue DESC\n\
             LIMIT 1",
        ),
    ];

    pairs
        .iter()
        .map(|(q, s)| Exemplar {
            question: q.to_string(),
            sql: s.to_string(),
        })
        .collect()
}

pub struct LlmSqlStrategy {
    llm: Arc<LlmManager>,
    exemplars: Vec<Exemplar>,
    cost_of_goods_multiplier: f64,
}

impl LlmSqlStrategy {
    pub fn new(llm: Arc<LlmManager>, exemplars: Vec<Exemplar>, cost_of_goods_multiplier: f64) -> Self {
        Self {
            llm,
            exemplars,
            cost_of_goods_multiplier,
        }
    }

    fn render_facts(&self, facts: &PlanFacts, schema: &SchemaSnapshot) -> String {
        let mut lines = Vec::new();
        if let Some(range) = &facts.date_range {
            lines.push(format!("- Date range: {} to {}", range.start, range.end));
        }
        if let Some(kpi) = &facts.kpi {
            lines.push(format!(
                "- KPI: {:?} = {}",
                kpi,
                kpi.expression(self.cost_of_goods_multiplier)
            ));
        }
        // Category filters join through Products/Categories; the constraint
        // is unusable against a schema without those tables.
        if !facts.categories.is_empty()
            && schema.has_table("Categories")
            && schema.has_table("Products")
        {
            lines.push(format!("- Categories: {}", facts.categories.join(", ")));
        }

        if lines.is_empty() {
            return "None.".to_string();
        }
        lines.join("\n")
    }

    fn render_exemplars(&self) -> String {
        self.exemplars
            .iter()
            .map(|e| format!("Question: {}\nSQL:\n{}\n", e.question, e.sql))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn prepare_prompt(
        &self,
        question: &str,
        schema: &SchemaSnapshot,
        facts: &PlanFacts,
        prior: Option<&PriorFailure>,
    ) -> String {
        let repair_section = match prior {
            Some(failure) => format!(
                r#"
### Previous attempt failed:
```sql
{}
```
Error: {}
Fix the query. Check every table and column name against the schema.
"#,
                failure.sql, failure.error
            ),
            None => String::new(),
        };

        format!(
            r#"
### Instructions:
Your task is to convert a question into a SQL query for DuckDB, given a database schema.
Adhere to these rules:
- **Be careful with column names - they are case sensitive**
- **Use only tables and columns that appear in the schema below**
- **Use Table Aliases** to prevent ambiguity. For example, `SELECT table1.col1, table2.col1 FROM table1 JOIN table2 ON table1.id = table2.id`.
- When creating a ratio, always cast the numerator as float
- Cost of goods is approximated as {} * UnitPrice; the data has no cost column

### Input:
Generate a SQL query that answers the question `{}`.
This query will run on a DuckDB database with the following tables and columns:

{}

### Known constraints:
{}

### Worked examples:
{}
{}
### Response:
Based on your instructions, here is the SQL query I have generated to answer the question `{}`:
```sql
"#,
            self.cost_of_goods_multiplier,
            question,
            schema.to_prompt_text(),
            self.render_facts(facts, schema),
            self.render_exemplars(),
            repair_section,
            question
        )
    }
}

#[async_trait]
impl SqlStrategy for LlmSqlStrategy {
    async fn generate(
        &self,
        question: &str,
        schema: &SchemaSnapshot,
        facts: &PlanFacts,
        prior: Option<&PriorFailure>,
    ) -> Result<String, LlmError> {
        let prompt = self.prepare_prompt(question, schema, facts, prior);
        debug!("Prepared SQL generation prompt ({} chars)", prompt.len());

        let content = self.llm.complete(&prompt).await?;
        let sql = extract_sql(&content);

        // Ensure we don't return empty SQL
        if sql.trim().is_empty() {
            return Err(LlmError::ResponseError(
                "Failed to extract valid SQL from response".to_string(),
            ));
        }

        info!("Generated SQL: {}", sql);
        Ok(sql)
    }
}

/// Pull a SQL statement out of a model completion: fenced code blocks first,
/// then a keyword scan over the raw lines.
pub fn extract_sql(content: &str) -> String {
    // Try to extract SQL from between ```sql and ``` markers
    if let Some(start) = content.find("```sql") {
        if let Some(end) = content.rfind("```") {
            if end > start + 6 {
                let sql = &content[start + 6..end].trim();
                debug!("Extracted SQL from code block markers");
                return sql.to_string();
            }
        }
    }

    // Try alternate syntax without a language specifier: ``` and ```
    if let Some(start) = content.find("```") {
        let content_after_first = &content[start + 3..];
        if let Some(end) = content_after_first.find("```") {
            let sql = &content_after_first[..end].trim();
            debug!("Extracted SQL using simple code block markers");
            return sql.to_string();
        }
    }

    // If we couldn't find explicit code blocks, try to extract SQL statements
    // directly: look for a line starting with SELECT or WITH
    let sql_keywords = ["SELECT", "WITH"];
    let lines: Vec<&str> = content.lines().collect();

    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim().to_uppercase();
        if sql_keywords.iter().any(|kw| trimmed.starts_with(kw)) {
            // Found a line that looks like SQL - collect until we find the end
            let mut sql = line.trim().to_string();

            for next_line in lines.iter().skip(i + 1) {
                let next_line = next_line.trim();

                // Stop if we hit a markdown code block marker
                if next_line.starts_with("```") {
                    break;
                }

                sql.push(' ');
                sql.push_str(next_line);

                // Stop if we reach the end of the statement (semicolon)
                if next_line.ends_with(';') {
                    break;
                }
            }

            debug!("Extracted SQL using line scanning");
            return sql;
        }
    }

    // If still no SQL found, return the content as-is
    debug!("Could not extract SQL using usual methods, returning full content");
    content.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::{SchemaSnapshot, TableSchema};
    use crate::llm::LlmClient;
    use crate::pipeline::types::KpiFormula;
    use std::time::Duration;

    #[test]
    fn extracts_fenced_sql() {
        let content = "Here you go:\n```sql\nSELECT 1;\n```\nDone.";
        assert_eq!(extract_sql(content), "SELECT 1;");
    }

    #[test]
    fn extracts_plain_fenced_block() {
        let content = "```\nSELECT 2\n```";
        assert_eq!(extract_sql(content), "SELECT 2");
    }

    #[test]
    fn extracts_by_keyword_scan() {
        let content = "The query is\nSELECT a\nFROM t;\nand that's it";
        assert_eq!(extract_sql(content), "SELECT a FROM t;");
    }

    struct EchoClient;

    #[async_trait]
    impl LlmClient for EchoClient {
        async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
            Ok("```sql\nSELECT 1\n```".to_string())
        }
    }

    fn strategy(multiplier: f64) -> LlmSqlStrategy {
        let llm = Arc::new(LlmManager::with_client(
            Arc::new(EchoClient),
            Duration::from_secs(5),
        ));
        LlmSqlStrategy::new(llm, default_exemplars(), multiplier)
    }

    fn schema() -> SchemaSnapshot {
        SchemaSnapshot {
            tables: vec![TableSchema {
                name: "Orders".to_string(),
                columns: vec![("OrderID".to_string(), "INTEGER".to_string())],
            }],
        }
    }

    #[test]
    fn prompt_carries_schema_facts_and_multiplier() {
        let s = strategy(0.65);
        let facts = PlanFacts {
            kpi: Some(KpiFormula::GrossMargin),
            ..Default::default()
        };
        let prompt = s.prepare_prompt("margin by customer", &schema(), &facts, None);
        assert!(prompt.contains("### Table: Orders"));
        assert!(prompt.contains("0.65"));
        assert!(prompt.contains("GrossMargin"));
        assert!(prompt.contains("Worked examples"));
    }

    #[test]
    fn category_constraint_requires_category_tables() {
        let s = strategy(0.7);
        let facts = PlanFacts {
            categories: vec!["Beverages".to_string()],
            ..Default::default()
        };

        // Orders-only schema: the filter has nothing to join against.
        let prompt = s.prepare_prompt("beverage revenue", &schema(), &facts, None);
        assert!(!prompt.contains("- Categories:"));

        let full = SchemaSnapshot {
            tables: vec![
                TableSchema {
                    name: "Categories".to_string(),
                    columns: vec![("CategoryID".to_string(), "INTEGER".to_string())],
                },
                TableSchema {
                    name: "Products".to_string(),
                    columns: vec![("ProductID".to_string(), "INTEGER".to_string())],
                },
            ],
        };
        let prompt = s.prepare_prompt("beverage revenue", &full, &facts, None);
        assert!(prompt.contains("- Categories: Beverages"));
    }

    #[test]
    fn repair_prompt_includes_failed_sql_and_error() {
        let s = strategy(0.7);
        let prior = PriorFailure {
            sql: "SELECT * FROM Nope".to_string(),
            error: "Table with name Nope does not exist".to_string(),
        };
        let prompt = s.prepare_prompt("q", &schema(), &PlanFacts::default(), Some(&prior));
        assert!(prompt.contains("Previous attempt failed"));
        assert!(prompt.contains("SELECT * FROM Nope"));
        assert!(prompt.contains("does not exist"));
    }

    #[tokio::test]
    async fn generate_extracts_sql_from_completion() {
        let s = strategy(0.7);
        let sql = s
            .generate("count orders", &schema(), &PlanFacts::default(), None)
            .await
            .unwrap();
        assert_eq!(sql, "SELECT 1");
    }
}
