use crate::llm::models::Interpretation;
use crate::llm::{prompts, LanguageModel, LlmError};
use crate::pipeline::generator::strip_code_fence;
use crate::pipeline::Row;
use std::sync::Arc;
use tracing::{debug, warn};

/// Explains a query result in natural language.
pub struct ResultInterpreter {
    model: Arc<dyn LanguageModel>,
    preview_rows: usize,
}

impl ResultInterpreter {
    pub fn new(model: Arc<dyn LanguageModel>, preview_rows: usize) -> Self {
        Self {
            model,
            preview_rows,
        }
    }

    /// Only the first `preview_rows` rows are shown to the model, together
    /// with the total count. A reply that is not the expected JSON falls
    /// back to a canned summary; a failed call is an error.
    pub async fn interpret(
        &self,
        question: &str,
        sql: &str,
        rows: &[Row],
    ) -> Result<Interpretation, LlmError> {
        let preview = &rows[..rows.len().min(self.preview_rows)];
        let preview_json = serde_json::to_string_pretty(preview)
            .map_err(|e| LlmError::ResponseError(e.to_string()))?;

        let prompt = prompts::interpretation(question, sql, &preview_json, rows.len());
        let raw = self.model.complete(prompt.system, &prompt.user).await?;
        Ok(parse_interpretation(&raw, rows.len()))
    }
}

pub fn parse_interpretation(raw: &str, row_count: usize) -> Interpretation {
    let body = strip_code_fence(raw);
    match serde_json::from_str::<Interpretation>(&body) {
        Ok(interpretation) => {
            debug!(
                "Interpretation suggests {} with {} insights",
                interpretation.visualization_type,
                interpretation.insights.len()
            );
            interpretation
        }
        Err(e) => {
            warn!("Unparseable interpretation, using fallback: {}", e);
            Interpretation::fallback(row_count)
        }
    }
}
