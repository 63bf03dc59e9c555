//! Fact extraction feeding SQL generation and synthesis.
//!
//! The planner only reports what it can see in the query or the retrieved
//! chunks. Fields it cannot extract stay unknown; it never fabricates a date
//! range or a formula.

use crate::corpus::retriever::RetrievalResult;
use crate::pipeline::types::{DateRange, KpiFormula, PlanFacts};
use chrono::NaiveDate;
use regex::Regex;
use tracing::debug;

/// Retail category vocabulary the planner matches against.
const CATEGORY_VOCAB: &[&str] = &[
    "Beverages",
    "Condiments",
    "Confections",
    "Dairy Products",
    "Grains/Cereals",
    "Meat/Poultry",
    "Produce",
    "Seafood",
];

const MONTH_NAMES: &[&str] = &[
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

pub struct Planner {
    month_year: Regex,
    numeric_month: Regex,
    bare_year: Regex,
}

impl Planner {
    pub fn new() -> Self {
        Self {
            // "June 2013"
            month_year: Regex::new(
                r"(?i)\b(january|february|march|april|may|june|july|august|september|october|november|december)\s+(\d{4})\b",
            )
            .expect("static regex"),
            // "2013-06"
            numeric_month: Regex::new(r"\b(\d{4})-(\d{2})\b").expect("static regex"),
            // "in 2013", "for 2013"
            bare_year: Regex::new(r"\b(19\d{2}|20\d{2})\b").expect("static regex"),
        }
    }

    /// Extract whatever facts the query and retrieved chunks support. The
    /// query text takes precedence over chunk text.
    pub fn extract(&self, question: &str, retrieval: &RetrievalResult) -> PlanFacts {
        let mut texts: Vec<&str> = vec![question];
        for scored in retrieval {
            texts.push(&scored.chunk.text);
        }

        let facts = PlanFacts {
            date_range: texts.iter().find_map(|t| self.extract_date_range(t)),
            kpi: texts.iter().find_map(|t| extract_kpi(t)),
            categories: extract_categories(question),
        };
        debug!("Extracted plan facts: {:?}", facts);
        facts
    }

    fn extract_date_range(&self, text: &str) -> Option<DateRange> {
        if let Some(caps) = self.month_year.captures(text) {
            let month = MONTH_NAMES
                .iter()
                .position(|m| m.eq_ignore_ascii_case(&caps[1]))?
                as u32
                + 1;
            let year: i32 = caps[2].parse().ok()?;
            return month_range(year, month);
        }

        if let Some(caps) = self.numeric_month.captures(text) {
            let year: i32 = caps[1].parse().ok()?;
            let month: u32 = caps[2].parse().ok()?;
            if (1..=12).contains(&month) {
                return month_range(year, month);
            }
        }

        if let Some(caps) = self.bare_year.captures(text) {
            let year: i32 = caps[1].parse().ok()?;
            return Some(DateRange {
                start: NaiveDate::from_ymd_opt(year, 1, 1)?,
                end: NaiveDate::from_ymd_opt(year, 12, 31)?,
            });
        }

        None
    }
}

impl Default for Planner {
    fn default() -> Self {
        Self::new()
    }
}

fn month_range(year: i32, month: u32) -> Option<DateRange> {
    let start = NaiveDate::from_ymd_opt(year, month, 1)?;
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some(DateRange {
        start,
        end: first_of_next.pred_opt()?,
    })
}

fn extract_kpi(text: &str) -> Option<KpiFormula> {
    let lower = text.to_lowercase();
    if lower.contains("aov") || lower.contains("average order value") {
        Some(KpiFormula::Aov)
    } else if lower.contains("gross margin") || lower.contains("margin") {
        Some(KpiFormula::GrossMargin)
    } else if lower.contains("revenue") {
        Some(KpiFormula::Revenue)
    } else {
        None
    }
}

fn extract_categories(question: &str) -> Vec<String> {
    let lower = question.to_lowercase();
    CATEGORY_VOCAB
        .iter()
        .filter(|cat| lower.contains(&cat.to_lowercase()))
        .map(|cat| cat.to_string())
        .collect()
}
