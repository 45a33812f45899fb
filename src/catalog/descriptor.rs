//! Semantic schema descriptor.
//!
//! The descriptor starts life as model output and is then edited by hand,
//! so reading a JSON document never fails: absent or mistyped fields read
//! as empty, table and column entries that cannot be read are dropped, and
//! free-text notes accept strings, lists or objects.

use crate::db::introspect::PhysicalTable;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    #[serde(default, deserialize_with = "lenient_list")]
    pub tables: Vec<TableDescriptor>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub relationships: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub insights: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableDescriptor {
    #[serde(rename = "table_name")]
    pub name: String,
    pub description: String,
    pub columns: Vec<ColumnDescriptor>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    pub description: String,
    pub example_values: Vec<Value>,
}

// Entries are read field by field so that an entry carrying two spellings
// of the same key keeps the first one that has a value.
impl<'de> Deserialize<'de> for TableDescriptor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut fields = Map::<String, Value>::deserialize(deserializer)?;
        Ok(Self {
            name: first_text(&mut fields, &["table_name", "name"]),
            description: first_text(&mut fields, &["description"]),
            columns: fields
                .remove("columns")
                .map(list_from_value)
                .unwrap_or_default(),
        })
    }
}

impl<'de> Deserialize<'de> for ColumnDescriptor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut fields = Map::<String, Value>::deserialize(deserializer)?;
        Ok(Self {
            name: first_text(&mut fields, &["name", "column_name"]),
            column_type: first_text(&mut fields, &["type", "data_type", "column_type"]),
            description: first_text(&mut fields, &["description"]),
            example_values: ["example_values", "examples", "sample_values"]
                .iter()
                .filter_map(|key| fields.remove(*key))
                .map(values_from_value)
                .find(|values| !values.is_empty())
                .unwrap_or_default(),
        })
    }
}

fn first_text(fields: &mut Map<String, Value>, keys: &[&str]) -> String {
    keys.iter()
        .filter_map(|key| fields.remove(*key))
        .map(value_to_text)
        .find(|text| !text.is_empty())
        .unwrap_or_default()
}

impl SchemaDescriptor {
    pub fn from_value(value: Value) -> Self {
        lenient_from_value(value)
    }

    /// Malformed JSON reads as an empty descriptor. Meant for model replies
    /// and stored copies; documents a user hands in go through `parse_document`.
    pub fn from_json_str(text: &str) -> Self {
        serde_json::from_str::<Value>(text)
            .map(Self::from_value)
            .unwrap_or_default()
    }

    /// Fields stay lenient but the document itself has to be JSON.
    pub fn parse_document(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<Value>(text).map(Self::from_value)
    }

    /// Raw descriptor straight from introspection, with no descriptions.
    pub fn from_physical(tables: &[PhysicalTable]) -> Self {
        let tables = tables
            .iter()
            .map(|table| TableDescriptor {
                name: table.table_name.clone(),
                description: String::new(),
                columns: table
                    .columns
                    .iter()
                    .map(|column| ColumnDescriptor {
                        name: column.name.clone(),
                        column_type: column.column_type.clone(),
                        description: String::new(),
                        example_values: table
                            .sample_data
                            .iter()
                            .filter_map(|row| row.get(&column.name).cloned())
                            .filter(|value| !value.is_null())
                            .collect(),
                    })
                    .collect(),
            })
            .collect();

        Self {
            tables,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn to_prompt_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

fn lenient_from_value<T: DeserializeOwned + Default>(value: Value) -> T {
    serde_json::from_value(value).unwrap_or_default()
}

fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(list_from_value(Value::deserialize(deserializer)?))
}

fn list_from_value<T: DeserializeOwned>(value: Value) -> Vec<T> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    }
}

fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(value_to_text(Value::deserialize(deserializer)?))
}

fn value_to_text(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text,
        Value::Array(items) => items
            .into_iter()
            .map(value_to_text)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

fn values_from_value(value: Value) -> Vec<Value> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        single => vec![single],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::introspect::PhysicalColumn;
    use serde_json::json;

    #[test]
    fn reads_model_generated_descriptors() {
        let descriptor = SchemaDescriptor::from_value(json!({
            "tables": [{
                "table_name": "data",
                "description": "Monthly sales",
                "columns": [
                    {"name": "region", "type": "VARCHAR", "description": "Sales region", "example_values": ["west", "east"]},
                    {"name": "amount", "type": "DOUBLE", "description": "Revenue in USD", "example_values": [10.5]}
                ]
            }],
            "relationships": ["none"],
            "insights": {"trend": "growing"}
        }));

        assert_eq!(descriptor.tables.len(), 1);
        let table = &descriptor.tables[0];
        assert_eq!(table.name, "data");
        assert_eq!(table.columns[0].column_type, "VARCHAR");
        assert_eq!(table.columns[1].example_values, vec![json!(10.5)]);
        assert_eq!(descriptor.relationships, "none");
        assert_eq!(descriptor.insights, r#"{"trend":"growing"}"#);
    }

    #[test]
    fn missing_and_mistyped_fields_read_as_empty() {
        let descriptor = SchemaDescriptor::from_value(json!({
            "tables": [
                {"name": "orders", "columns": "not a list"},
                42,
                {"table_name": "customers", "columns": [{"column_name": "id", "data_type": "INTEGER", "examples": 7}]}
            ],
            "relationships": null
        }));

        assert_eq!(descriptor.tables.len(), 2);
        assert_eq!(descriptor.tables[0].name, "orders");
        assert!(descriptor.tables[0].columns.is_empty());
        let id = &descriptor.tables[1].columns[0];
        assert_eq!(id.name, "id");
        assert_eq!(id.column_type, "INTEGER");
        assert_eq!(id.example_values, vec![json!(7)]);
        assert_eq!(descriptor.relationships, "");
        assert_eq!(descriptor.insights, "");
    }

    #[test]
    fn garbage_reads_as_an_empty_descriptor() {
        assert!(SchemaDescriptor::from_json_str("not json at all").is_empty());
        assert!(SchemaDescriptor::from_value(json!([1, 2, 3])).is_empty());
        assert!(SchemaDescriptor::from_value(json!({"tables": {"data": {}}})).is_empty());
    }

    #[test]
    fn serialized_form_reads_back_identically() {
        let descriptor = SchemaDescriptor::from_value(json!({
            "tables": [{"table_name": "data", "description": "d", "columns": [
                {"name": "id", "type": "BIGINT", "description": "", "example_values": [1, 2]}
            ]}],
            "relationships": "r",
            "insights": "i"
        }));
        let text = serde_json::to_string(&descriptor).unwrap();
        assert!(text.contains("\"table_name\":\"data\""));
        assert!(text.contains("\"type\":\"BIGINT\""));
        assert_eq!(SchemaDescriptor::from_json_str(&text), descriptor);
    }

    #[test]
    fn physical_tables_seed_examples_from_samples() {
        let mut first = serde_json::Map::new();
        first.insert("id".into(), json!(1));
        first.insert("city".into(), Value::Null);
        let mut second = serde_json::Map::new();
        second.insert("id".into(), json!(2));
        second.insert("city".into(), json!("Oslo"));

        let table = PhysicalTable {
            table_name: "data".into(),
            columns: vec![
                PhysicalColumn {
                    name: "id".into(),
                    column_type: "INTEGER".into(),
                },
                PhysicalColumn {
                    name: "city".into(),
                    column_type: "VARCHAR".into(),
                },
            ],
            sample_data: vec![first, second],
            row_count: 2,
        };

        let descriptor = SchemaDescriptor::from_physical(&[table]);
        let columns = &descriptor.tables[0].columns;
        assert_eq!(columns[0].example_values, vec![json!(1), json!(2)]);
        assert_eq!(columns[1].example_values, vec![json!("Oslo")]);
        assert!(descriptor.relationships.is_empty());
    }

    #[test]
    fn entries_with_two_spellings_of_a_key_are_kept() {
        let descriptor = SchemaDescriptor::from_value(json!({
            "tables": [{
                "table_name": "data",
                "name": "ignored",
                "columns": [
                    {"name": "", "column_name": "region", "type": "VARCHAR", "data_type": "TEXT"},
                    {"name": "amount", "examples": [], "sample_values": [3, 4]}
                ]
            }]
        }));

        assert_eq!(descriptor.tables.len(), 1);
        let table = &descriptor.tables[0];
        assert_eq!(table.name, "data");
        assert_eq!(table.columns.len(), 2);
        assert_eq!(table.columns[0].name, "region");
        assert_eq!(table.columns[0].column_type, "VARCHAR");
        assert_eq!(table.columns[1].example_values, vec![json!(3), json!(4)]);
    }
}
