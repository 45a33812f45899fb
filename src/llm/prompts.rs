//! Prompt builders for every model call the system makes.
//!
//! Schemas and result previews are embedded as pretty-printed JSON. The
//! descriptor may be stale relative to the physical store, so prompts
//! present it as guidance rather than ground truth.

use crate::llm::models::HistoryEntry;

pub struct Prompt {
    pub system: &'static str,
    pub user: String,
}

const SCHEMA_SYSTEM: &str = "You are a data analyst who documents database schemas.";
const SQL_SYSTEM: &str = "You are a SQL expert who writes DuckDB queries.";
const REPAIR_SYSTEM: &str = "You are a SQL expert who debugs failing DuckDB queries.";
const INTERPRET_SYSTEM: &str = "You are a data analyst who explains query results.";

pub fn schema_seed(physical_tables_json: &str) -> Prompt {
    let user = format!(
        r#"
### Instructions:
Study the tables, column types and sample rows below and describe what the data means.

### Input:
{}

### Expected Output:
A single JSON object with these keys:
- "tables": list of objects with "table_name", "description" and "columns"
  (each column has "name", "type", "description" and "example_values")
- "relationships": how the tables relate to each other
- "insights": first observations about the data

Return ONLY the JSON object, no other text.
"#,
        physical_tables_json
    );

    Prompt {
        system: SCHEMA_SYSTEM,
        user,
    }
}

pub fn sql_generation(question: &str, schema_json: &str, history: &[HistoryEntry]) -> Prompt {
    let mut conversation = String::new();
    if !history.is_empty() {
        conversation.push_str("\n### Previous conversation:\n");
        for entry in history {
            conversation.push_str(&format!("{}: {}\n", entry.role, entry.content));
        }
    }

    let user = format!(
        r#"
### Instructions:
Convert the user's question into one DuckDB SQL statement.
Adhere to these rules:
- Use DuckDB SQL syntax and DuckDB date/time functions
- The schema below describes the data; names may be slightly out of date, so prefer names that appear in it
- Use JOINs, WHERE clauses and aggregations as the question requires
- Add a LIMIT when the result could be very large
- If the question asks for a chart, shape the result for it

### Database Schema:
{}
{}
### Question:
{}

### Response:
Return ONLY the SQL statement. No explanations, no markdown.
"#,
        schema_json, conversation, question
    );

    Prompt {
        system: SQL_SYSTEM,
        user,
    }
}

pub fn sql_repair(failed_sql: &str, error_text: &str, schema_json: &str) -> Prompt {
    let user = format!(
        r#"
### Instructions:
The SQL statement below failed when DuckDB executed it. Fix it so that it runs and still answers the same question.

### Database Schema:
{}

### Failed SQL:
{}

### Error:
{}

### Response:
Return ONLY the corrected SQL statement. No explanations, no markdown.
"#,
        schema_json, failed_sql, error_text
    );

    Prompt {
        system: REPAIR_SYSTEM,
        user,
    }
}

pub fn interpretation(question: &str, sql: &str, preview_json: &str, total_rows: usize) -> Prompt {
    let user = format!(
        r#"
### Instructions:
Explain the query result to the user who asked the question.

### Question:
{}

### SQL Used:
{}

### Result Preview:
{}

### Total Rows:
{}

### Expected Output:
A single JSON object:
{{
    "answer": "concise natural language answer",
    "insights": ["insight 1", "insight 2"],
    "visualization_type": "bar|line|pie|scatter|table"
}}

Return ONLY valid JSON.
"#,
        question, sql, preview_json, total_rows
    );

    Prompt {
        system: INTERPRET_SYSTEM,
        user,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Role;

    #[test]
    fn generation_prompt_lists_history_in_order() {
        let history = vec![
            HistoryEntry {
                role: Role::User,
                content: "Show sales by region".to_string(),
            },
            HistoryEntry {
                role: Role::Assistant,
                content: "West leads with 120.".to_string(),
            },
        ];
        let prompt = sql_generation("And by month?", "{\"tables\": []}", &history);

        let first = prompt.user.find("user: Show sales by region").unwrap();
        let second = prompt.user.find("assistant: West leads with 120.").unwrap();
        assert!(first < second);
        assert!(prompt.user.contains("And by month?"));
    }

    #[test]
    fn generation_prompt_omits_empty_history() {
        let prompt = sql_generation("How many rows?", "{}", &[]);
        assert!(!prompt.user.contains("Previous conversation"));
    }

    #[test]
    fn repair_prompt_carries_the_exact_error() {
        let prompt = sql_repair("SELEC 1", "Parser Error: syntax error at or near \"SELEC\"", "{}");
        assert!(prompt.user.contains("SELEC 1"));
        assert!(prompt.user.contains("syntax error at or near \"SELEC\""));
        assert_eq!(prompt.system, REPAIR_SYSTEM);
    }
}
