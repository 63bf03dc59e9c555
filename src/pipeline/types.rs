use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// An incoming analytics question.
#[derive(Debug, Clone, Deserialize)]
pub struct Query {
    pub question: String,
    /// Expected shape of the answer value. When absent the synthesizer
    /// infers a natural shape from the data.
    pub format_hint: Option<FormatHint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatHint {
    Scalar,
    Table,
    List,
    Record,
}

/// Routing label, produced once per query and never revised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Retrieval,
    Sql,
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// KPI formulas the planner recognizes. The symbolic SQL expression is
/// rendered against the retail order tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KpiFormula {
    Revenue,
    Aov,
    GrossMargin,
}

impl KpiFormula {
    /// Render the formula for the model prompt. Margin depends on the
    /// injected cost-of-goods multiplier since the data has no cost column.
    pub fn expression(&self, cost_of_goods_multiplier: f64) -> String {
        match self {
            KpiFormula::Revenue => "SUM(UnitPrice * Quantity * (1 - Discount))".to_string(),
            KpiFormula::Aov => {
                "SUM(UnitPrice * Quantity * (1 - Discount)) / COUNT(DISTINCT OrderID)".to_string()
            }
            KpiFormula::GrossMargin => format!(
                "SUM((UnitPrice - {} * UnitPrice) * Quantity * (1 - Discount))",
                cost_of_goods_multiplier
            ),
        }
    }
}

/// Structured facts extracted by the planner. Absent fields are explicit
/// unknowns; downstream components treat them as "no constraint".
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlanFacts {
    pub date_range: Option<DateRange>,
    pub kpi: Option<KpiFormula>,
    pub categories: Vec<String>,
}

impl PlanFacts {
    pub fn is_empty(&self) -> bool {
        self.date_range.is_none() && self.kpi.is_none() && self.categories.is_empty()
    }
}

/// A generated SQL query. Attempt 0 is the original generation, 1-2 are
/// repairs.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SqlCandidate {
    pub sql: String,
    pub attempt: u8,
}

/// Context handed back to the SQL strategy on a repair call.
#[derive(Debug, Clone)]
pub struct PriorFailure {
    pub sql: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Citation {
    Chunk { chunk_id: String },
    SqlResult { sql: String, row_count: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerStatus {
    Answered,
    Partial,
    Unanswerable,
}

/// The pipeline's final output: a value shaped per the format hint, the
/// evidence it rests on, and a status flag.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Answer {
    pub value: serde_json::Value,
    pub citations: Vec<Citation>,
    pub status: AnswerStatus,
    pub explanation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_hint_round_trips_lowercase() {
        let hint: FormatHint = serde_json::from_str("\"scalar\"").unwrap();
        assert_eq!(hint, FormatHint::Scalar);
        assert_eq!(serde_json::to_string(&FormatHint::List).unwrap(), "\"list\"");
    }

    #[test]
    fn margin_expression_uses_injected_multiplier() {
        let expr = KpiFormula::GrossMargin.expression(0.7);
        assert!(expr.contains("0.7"));
        let expr = KpiFormula::GrossMargin.expression(0.65);
        assert!(expr.contains("0.65"));
    }

    #[test]
    fn empty_facts_report_empty() {
        assert!(PlanFacts::default().is_empty());
        let facts = PlanFacts {
            kpi: Some(KpiFormula::Revenue),
            ..Default::default()
        };
        assert!(!facts.is_empty());
    }
}
