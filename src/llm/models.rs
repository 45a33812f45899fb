use crate::conversation::Role;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Advisory chart type suggested alongside an answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VisualizationType {
    Bar,
    Line,
    Pie,
    Scatter,
    #[default]
    Table,
}

impl VisualizationType {
    /// Unknown tags fall back to `Table`.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_lowercase().as_str() {
            "bar" => VisualizationType::Bar,
            "line" => VisualizationType::Line,
            "pie" => VisualizationType::Pie,
            "scatter" => VisualizationType::Scatter,
            _ => VisualizationType::Table,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VisualizationType::Bar => "bar",
            VisualizationType::Line => "line",
            VisualizationType::Pie => "pie",
            VisualizationType::Scatter => "scatter",
            VisualizationType::Table => "table",
        }
    }
}

impl fmt::Display for VisualizationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for VisualizationType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = Option::<String>::deserialize(deserializer)?;
        Ok(tag.map(|t| Self::from_tag(&t)).unwrap_or_default())
    }
}

/// Natural-language reading of a query result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interpretation {
    pub answer: String,
    #[serde(default)]
    pub insights: Vec<String>,
    #[serde(default)]
    pub visualization_type: VisualizationType,
}

impl Interpretation {
    /// Canned summary used when the model's reply cannot be parsed
    pub fn fallback(row_count: usize) -> Self {
        Self {
            answer: format!("Found {} results.", row_count),
            insights: Vec::new(),
            visualization_type: VisualizationType::Table,
        }
    }
}

// One prior turn as shown to the SQL generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpretation_tolerates_missing_optional_fields() {
        let parsed: Interpretation =
            serde_json::from_str(r#"{"answer": "There are 42 rows."}"#).unwrap();
        assert_eq!(parsed.insights, Vec::<String>::new());
        assert_eq!(parsed.visualization_type, VisualizationType::Table);

        let parsed: Interpretation = serde_json::from_str(
            r#"{"answer": "x", "insights": ["a"], "visualization_type": "Histogram"}"#,
        )
        .unwrap();
        assert_eq!(parsed.visualization_type, VisualizationType::Table);
    }

    #[test]
    fn interpretation_requires_an_answer() {
        assert!(serde_json::from_str::<Interpretation>(r#"{"insights": []}"#).is_err());
    }

    #[test]
    fn visualization_tags_serialize_lowercase() {
        assert_eq!(
            serde_json::to_string(&VisualizationType::Scatter).unwrap(),
            "\"scatter\""
        );
        assert_eq!(VisualizationType::from_tag(" LINE "), VisualizationType::Line);
    }
}
