//! Tool manifest for LLM agents: one tool per REST route, with a JSON
//! Schema describing its parameters.

use serde::Serialize;
use serde_json::{json, Map, Value};

use conduit_core::{TypeSpec, TypeTag};

use super::{operation_name, templated_path};
use crate::routing::table::{RouteEntry, RoutingTable};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub method: String,
    pub path: String,
    pub parameters: Value,
}

/// JSON Schema for a declared type.
#[must_use]
pub fn json_schema(ty: &TypeSpec) -> Value {
    match ty {
        TypeSpec::Scalar(TypeTag::String) => json!({"type": "string"}),
        TypeSpec::Scalar(TypeTag::Number) => json!({"type": "number"}),
        TypeSpec::Scalar(TypeTag::Boolean) => json!({"type": "boolean"}),
        TypeSpec::Scalar(TypeTag::Date) => json!({"type": "string", "format": "date-time"}),
        TypeSpec::Scalar(TypeTag::ObjectId) => json!({"type": "string"}),
        TypeSpec::Scalar(TypeTag::Json) => json!({}),
        TypeSpec::List(inner) => json!({"type": "array", "items": json_schema(inner)}),
        TypeSpec::Object(fields) => {
            let properties: Map<String, Value> = fields
                .iter()
                .map(|(name, field)| (name.clone(), json_schema(&field.ty)))
                .collect();
            let required: Vec<&String> = fields
                .iter()
                .filter(|(_, field)| field.required)
                .map(|(name, _)| name)
                .collect();
            json!({"type": "object", "properties": properties, "required": required})
        }
    }
}

fn tool(entry: &RouteEntry) -> ToolSpec {
    let descriptor = &entry.descriptor;
    let mut properties = Map::new();
    let mut required = Vec::new();
    for (_, name, field) in descriptor.params().iter() {
        properties.insert(name.clone(), json_schema(&field.ty));
        if field.required {
            required.push(Value::String(name.clone()));
        }
    }
    let description = if descriptor.description().is_empty() {
        format!("{} {}", descriptor.action(), entry.public_path)
    } else {
        descriptor.description().to_string()
    };
    ToolSpec {
        name: operation_name(&entry.module, descriptor.handler()),
        description,
        method: descriptor.action().to_string(),
        path: templated_path(&entry.public_path),
        parameters: json!({"type": "object", "properties": properties, "required": required}),
    }
}

/// Every route in `table` as a tool, ordered by module then declaration.
#[must_use]
pub fn build(table: &RoutingTable) -> Vec<ToolSpec> {
    table
        .modules()
        .flat_map(|module| module.routes.iter().map(|entry| tool(entry)))
        .collect()
}
