use crate::catalog::descriptor::SchemaDescriptor;
use crate::db::introspect::PhysicalTable;
use crate::llm::{prompts, LanguageModel};
use crate::pipeline::generator::strip_code_fence;
use tracing::{info, warn};

/// Builds the first descriptor of a freshly ingested project.
///
/// The model elaborates the physical schema into descriptions and notes.
/// Without a model, or when the call fails or returns something that is not
/// a usable descriptor, the raw physical description is used instead.
pub async fn describe_tables(
    model: Option<&dyn LanguageModel>,
    tables: &[PhysicalTable],
) -> SchemaDescriptor {
    let raw = SchemaDescriptor::from_physical(tables);
    let Some(model) = model else {
        info!("No language model configured, keeping the raw schema");
        return raw;
    };
    if tables.is_empty() {
        return raw;
    }

    let physical_json = match serde_json::to_string_pretty(tables) {
        Ok(json) => json,
        Err(e) => {
            warn!("Could not serialize physical tables: {}", e);
            return raw;
        }
    };

    let prompt = prompts::schema_seed(&physical_json);
    match model.complete(prompt.system, &prompt.user).await {
        Ok(reply) => {
            let described = SchemaDescriptor::from_json_str(&strip_code_fence(&reply));
            if described.is_empty() {
                warn!("Model returned no usable schema description, keeping the raw schema");
                raw
            } else {
                info!("Schema described with {} tables", described.tables.len());
                described
            }
        }
        Err(e) => {
            warn!("Schema description failed, keeping the raw schema: {}", e);
            raw
        }
    }
}
