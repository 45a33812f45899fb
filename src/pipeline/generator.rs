use crate::catalog::descriptor::SchemaDescriptor;
use crate::llm::models::HistoryEntry;
use crate::llm::{prompts, LanguageModel, LlmError};
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::debug;

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:[A-Za-z0-9_+-]*[ \t]*\r?\n)?(.*?)(?:```|\z)").unwrap()
});

/// Removes a surrounding markdown code fence and its language tag.
/// Text without a fence is only trimmed.
pub fn strip_code_fence(raw: &str) -> String {
    let trimmed = raw.trim();
    let inner = match CODE_FENCE.captures(trimmed) {
        Some(captures) => captures.get(1).map_or("", |m| m.as_str()),
        None => trimmed,
    };
    let inner = inner.trim();

    // Models sometimes drop the newline after the tag: ```sql SELECT ...```
    match inner.get(..4) {
        Some(prefix) if prefix.eq_ignore_ascii_case("sql ") => inner[4..].trim().to_string(),
        _ => inner.to_string(),
    }
}

/// Turns questions into SQL, and failing SQL into corrected SQL.
pub struct SqlGenerator {
    model: Arc<dyn LanguageModel>,
}

impl SqlGenerator {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    pub async fn generate(
        &self,
        question: &str,
        schema: &SchemaDescriptor,
        history: &[HistoryEntry],
    ) -> Result<String, LlmError> {
        let prompt = prompts::sql_generation(question, &schema.to_prompt_json(), history);
        let raw = self.model.complete(prompt.system, &prompt.user).await?;
        let sql = non_empty_sql(&raw)?;
        debug!("Generated SQL: {}", sql);
        Ok(sql)
    }

    /// One correction attempt, given the exact database error text.
    pub async fn repair(
        &self,
        original_sql: &str,
        error_text: &str,
        schema: &SchemaDescriptor,
    ) -> Result<String, LlmError> {
        let prompt = prompts::sql_repair(original_sql, error_text, &schema.to_prompt_json());
        let raw = self.model.complete(prompt.system, &prompt.user).await?;
        let sql = non_empty_sql(&raw)?;
        debug!("Repaired SQL: {}", sql);
        Ok(sql)
    }
}

fn non_empty_sql(raw: &str) -> Result<String, LlmError> {
    let sql = strip_code_fence(raw);
    if sql.is_empty() {
        return Err(LlmError::ResponseError("Model returned no SQL".to_string()));
    }
    Ok(sql)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Role;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[test]
    fn fences_and_language_tags_are_removed() {
        assert_eq!(strip_code_fence("```sql\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(strip_code_fence("```\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(strip_code_fence("  SELECT 1  "), "SELECT 1");
        assert_eq!(strip_code_fence("```sql SELECT 1```"), "SELECT 1");
        assert_eq!(
            strip_code_fence("Here you go:\n```SQL\nSELECT *\nFROM data\n```\nEnjoy"),
            "SELECT *\nFROM data"
        );
        assert_eq!(strip_code_fence("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
    }

    #[test]
    fn unterminated_fences_keep_their_body() {
        assert_eq!(strip_code_fence("```sql\nSELECT 2"), "SELECT 2");
    }

    struct Recording {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LanguageModel for Recording {
        async fn complete(&self, _system: &str, user: &str) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(user.to_string());
            Ok(self.reply.clone())
        }
    }

    fn recording(reply: &str) -> Arc<Recording> {
        Arc::new(Recording {
            reply: reply.to_string(),
            prompts: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn generation_includes_history_and_strips_the_reply() {
        let model = recording("```sql\nSELECT COUNT(*) FROM data\n```");
        let generator = SqlGenerator::new(model.clone());
        let history = vec![
            HistoryEntry {
                role: Role::User,
                content: "how many rows?".into(),
            },
            HistoryEntry {
                role: Role::Assistant,
                content: "There are 42 rows.".into(),
            },
        ];

        let sql = generator
            .generate("and by region?", &SchemaDescriptor::default(), &history)
            .await
            .unwrap();

        assert_eq!(sql, "SELECT COUNT(*) FROM data");
        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].contains("user: how many rows?"));
        assert!(prompts[0].contains("assistant: There are 42 rows."));
        assert!(prompts[0].contains("and by region?"));
    }

    #[tokio::test]
    async fn empty_replies_are_generation_failures() {
        let generator = SqlGenerator::new(recording("```sql\n```"));
        let result = generator
            .generate("anything", &SchemaDescriptor::default(), &[])
            .await;
        assert!(matches!(result, Err(LlmError::ResponseError(_))));
    }

    #[tokio::test]
    async fn repair_prompt_carries_sql_and_error_text() {
        let model = recording("SELECT amount FROM data");
        let generator = SqlGenerator::new(model.clone());

        let sql = generator
            .repair(
                "SELECT amout FROM data",
                "Binder Error: column \"amout\" not found",
                &SchemaDescriptor::default(),
            )
            .await
            .unwrap();

        assert_eq!(sql, "SELECT amount FROM data");
        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].contains("SELECT amout FROM data"));
        assert!(prompts[0].contains("Binder Error: column \"amout\" not found"));
    }
}
