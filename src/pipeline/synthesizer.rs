//! Typed answer synthesis.
//!
//! The synthesizer is the only stage that shapes output for the caller. The
//! value must structurally match the requested format hint; when the
//! available data cannot honor it, the answer is marked partial with
//! best-effort content rather than silently coerced.

use crate::corpus::retriever::RetrievalResult;
use crate::db::executor::ExecutionResult;
use crate::llm::{LlmError, LlmManager};
use crate::pipeline::types::{
    Answer, AnswerStatus, Citation, Classification, FormatHint, SqlCandidate,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::debug;

pub struct Synthesizer {
    llm: Arc<LlmManager>,
}

impl Synthesizer {
    pub fn new(llm: Arc<LlmManager>) -> Self {
        Self { llm }
    }

    pub async fn synthesize(
        &self,
        question: &str,
        format_hint: Option<FormatHint>,
        classification: Classification,
        retrieval: &RetrievalResult,
        sql: Option<(&SqlCandidate, &ExecutionResult)>,
    ) -> Result<Answer, LlmError> {
        debug!(
            "Synthesizing answer for {:?} query ({} chunks, sql: {})",
            classification,
            retrieval.len(),
            sql.is_some()
        );

        match sql {
            Some((candidate, ExecutionResult::Success { columns, rows })) => {
                let shape = format_hint.unwrap_or_else(|| infer_shape(columns, rows));
                let (value, matched) = shape_value(shape, columns, rows);

                let mut citations = vec![Citation::SqlResult {
                    sql: candidate.sql.clone(),
                    row_count: rows.len(),
                }];
                citations.extend(chunk_citations(retrieval));

                Ok(Answer {
                    value,
                    citations,
                    status: if matched {
                        AnswerStatus::Answered
                    } else {
                        AnswerStatus::Partial
                    },
                    explanation: format!("Computed from SQL result with {} row(s).", rows.len()),
                    sql: Some(candidate.sql.clone()),
                })
            }

            Some((candidate, ExecutionResult::Failure { message, .. })) => {
                if retrieval.is_empty() {
                    // No evidence of any kind survives.
                    return Ok(Answer {
                        value: Value::Null,
                        citations: Vec::new(),
                        status: AnswerStatus::Unanswerable,
                        explanation: format!(
                            "SQL execution failed after {} repair attempt(s): {}",
                            candidate.attempt, message
                        ),
                        sql: Some(candidate.sql.clone()),
                    });
                }

                // Fall back to the document context alone.
                let text = self.compose_from_chunks(question, retrieval).await?;
                Ok(Answer {
                    value: Value::String(text),
                    citations: chunk_citations(retrieval),
                    status: AnswerStatus::Partial,
                    explanation: format!(
                        "SQL execution failed after {} repair attempt(s); answered from documents only.",
                        candidate.attempt
                    ),
                    sql: Some(candidate.sql.clone()),
                })
            }

            None => {
                if retrieval.is_empty() {
                    return Ok(Answer {
                        value: Value::Null,
                        citations: Vec::new(),
                        status: AnswerStatus::Unanswerable,
                        explanation: "No relevant documents found.".to_string(),
                        sql: None,
                    });
                }

                let text = self.compose_from_chunks(question, retrieval).await?;
                // A text answer naturally fills a scalar slot; structured
                // hints cannot be honored from prose.
                let matched = matches!(format_hint, None | Some(FormatHint::Scalar));
                Ok(Answer {
                    value: Value::String(text),
                    citations: chunk_citations(retrieval),
                    status: if matched {
                        AnswerStatus::Answered
                    } else {
                        AnswerStatus::Partial
                    },
                    explanation: format!("Answered from {} document chunk(s).", retrieval.len()),
                    sql: None,
                })
            }
        }
    }

    async fn compose_from_chunks(
        &self,
        question: &str,
        retrieval: &RetrievalResult,
    ) -> Result<String, LlmError> {
        let context = retrieval
            .iter()
            .map(|scored| {
                let text: String = scored.chunk.text.chars().take(400).collect();
                format!("[{}] {}", scored.chunk.id, text)
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let prompt = format!(
            r#"
### Instructions:
Answer the question using only the provided context. Be brief and factual.
If the context does not contain the answer, say so.

### Context:
{}

### Question:
{}

### Answer:
"#,
            context, question
        );

        let answer = self.llm.complete(&prompt).await?;
        Ok(answer.trim().to_string())
    }
}

fn chunk_citations(retrieval: &RetrievalResult) -> Vec<Citation> {
    retrieval
        .iter()
        .map(|scored| Citation::Chunk {
            chunk_id: scored.chunk.id.clone(),
        })
        .collect()
}

fn infer_shape(columns: &[String], rows: &[Vec<Value>]) -> FormatHint {
    if rows.len() == 1 && columns.len() == 1 {
        FormatHint::Scalar
    } else {
        FormatHint::Table
    }
}

/// Shape the result set per the hint. Returns the value and whether the data
/// structurally matched the requested shape.
fn shape_value(shape: FormatHint, columns: &[String], rows: &[Vec<Value>]) -> (Value, bool) {
    match shape {
        FormatHint::Scalar => {
            if rows.len() == 1 && columns.len() == 1 {
                (rows[0][0].clone(), true)
            } else if let Some(first) = rows.first() {
                // Best effort: first cell, but the shape did not match.
                (first.first().cloned().unwrap_or(Value::Null), false)
            } else {
                (Value::Null, false)
            }
        }
        FormatHint::Table => (
            json!({
                "columns": columns,
                "rows": rows,
            }),
            true,
        ),
        FormatHint::List => {
            let records: Vec<Value> = rows.iter().map(|row| row_to_record(columns, row)).collect();
            (Value::Array(records), true)
        }
        FormatHint::Record => match rows.first() {
            Some(first) => (row_to_record(columns, first), rows.len() == 1),
            None => (Value::Null, false),
        },
    }
}

fn row_to_record(columns: &[String], row: &[Value]) -> Value {
    let mut record = Map::new();
    for (i, name) in columns.iter().enumerate() {
        record.insert(name.clone(), row.get(i).cloned().unwrap_or(Value::Null));
    }
    Value::Object(record)
}
