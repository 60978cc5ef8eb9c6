//! GraphQL SDL projection.
//!
//! `GET` routes become `Query` fields, every other action a `Mutation`
//! field. Only the schema text is produced; queries are not executed.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use conduit_core::proto::{capitalize, normalize_module_name};
use conduit_core::{TypeSpec, TypeTag};

use super::operation_name;
use crate::routing::table::RouteEntry;

/// SDL fragments contributed by one module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphqlProjection {
    /// Object type name -> rendered `type` block.
    pub types: BTreeMap<String, String>,
    /// Rendered `Query` field lines.
    pub queries: Vec<String>,
    /// Rendered `Mutation` field lines.
    pub mutations: Vec<String>,
}

fn scalar(tag: TypeTag) -> &'static str {
    match tag {
        TypeTag::String => "String",
        TypeTag::Number => "Float",
        TypeTag::Boolean => "Boolean",
        TypeTag::Date => "Date",
        TypeTag::ObjectId => "ID",
        TypeTag::Json => "JSON",
    }
}

fn input_type(ty: &TypeSpec) -> String {
    match ty {
        TypeSpec::Scalar(tag) => scalar(*tag).to_string(),
        TypeSpec::List(inner) => format!("[{}]", input_type(inner)),
        TypeSpec::Object(_) => "JSON".to_string(),
    }
}

fn output_type(name: &str, ty: &TypeSpec, types: &mut BTreeMap<String, String>) -> String {
    match ty {
        TypeSpec::Scalar(tag) => scalar(*tag).to_string(),
        TypeSpec::List(inner) => format!("[{}]", output_type(name, inner, types)),
        TypeSpec::Object(fields) => {
            let type_name = capitalize(&normalize_module_name(name));
            let mut block = format!("type {type_name} {{\n");
            for (field, spec) in fields {
                let nested = format!("{type_name}{}", capitalize(field));
                let rendered = output_type(&nested, &spec.ty, types);
                let bang = if spec.required { "!" } else { "" };
                let _ = writeln!(block, "  {field}: {rendered}{bang}");
            }
            block.push('}');
            types.insert(type_name.clone(), block);
            type_name
        }
    }
}

/// Projects one module's routes.
#[must_use]
pub fn project(routes: &[Arc<RouteEntry>]) -> GraphqlProjection {
    let mut projection = GraphqlProjection::default();
    for entry in routes {
        let descriptor = &entry.descriptor;
        let args: Vec<String> = descriptor
            .params()
            .iter()
            .map(|(_, name, field)| {
                let bang = if field.required { "!" } else { "" };
                format!("{name}: {}{bang}", input_type(&field.ty))
            })
            .collect();
        let returns = descriptor.returns().map_or_else(
            || "JSON".to_string(),
            |shape| output_type(&shape.name, &shape.ty, &mut projection.types),
        );
        let name = operation_name(&entry.module, descriptor.handler());
        let line = if args.is_empty() {
            format!("  {name}: {returns}")
        } else {
            format!("  {name}({}): {returns}", args.join(", "))
        };
        if descriptor.action().is_query() {
            projection.queries.push(line);
        } else {
            projection.mutations.push(line);
        }
    }
    projection
}

/// Stitches module projections into one SDL document.
///
/// Object types with the same name keep the first definition seen.
#[must_use]
pub fn render<'a>(projections: impl IntoIterator<Item = &'a GraphqlProjection>) -> String {
    let mut types: BTreeMap<&str, &str> = BTreeMap::new();
    let mut queries: Vec<&str> = Vec::new();
    let mut mutations: Vec<&str> = Vec::new();
    for projection in projections {
        for (name, block) in &projection.types {
            types.entry(name.as_str()).or_insert(block.as_str());
        }
        queries.extend(projection.queries.iter().map(String::as_str));
        mutations.extend(projection.mutations.iter().map(String::as_str));
    }

    let mut sdl = String::from("scalar Date\nscalar JSON\n");
    for block in types.values() {
        let _ = write!(sdl, "\n{block}\n");
    }
    sdl.push_str("\ntype Query {\n");
    if queries.is_empty() {
        sdl.push_str("  _empty: Boolean\n");
    }
    for line in &queries {
        let _ = writeln!(sdl, "{line}");
    }
    sdl.push_str("}\n");
    if !mutations.is_empty() {
        sdl.push_str("\ntype Mutation {\n");
        for line in &mutations {
            let _ = writeln!(sdl, "{line}");
        }
        sdl.push_str("}\n");
    }
    sdl
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use conduit_core::{FieldSpec, ReturnShape, RouteDescriptor};

    use super::*;

    fn entry(descriptor: RouteDescriptor) -> Arc<RouteEntry> {
        Arc::new(RouteEntry {
            module: descriptor.module().to_string(),
            public_path: descriptor.path().to_string(),
            descriptor,
        })
    }

    fn user_shape() -> ReturnShape {
        let mut fields = BTreeMap::new();
        fields.insert("id".to_string(), TypeSpec::required(TypeTag::ObjectId));
        fields.insert("email".to_string(), TypeSpec::optional(TypeTag::String));
        fields.insert(
            "tags".to_string(),
            FieldSpec {
                ty: TypeSpec::List(Box::new(TypeSpec::Scalar(TypeTag::String))),
                required: false,
            },
        );
        ReturnShape::new("User", TypeSpec::Object(fields))
    }

    #[test]
    fn get_routes_become_queries() {
        let route = RouteDescriptor::builder("users", "/users/:id", "GET", "getUser")
            .url("id", TypeSpec::required(TypeTag::ObjectId))
            .returns(user_shape())
            .build()
            .unwrap();
        let projection = project(&[entry(route)]);

        assert_eq!(projection.queries, vec!["  users_getUser(id: ID!): User"]);
        assert!(projection.mutations.is_empty());
        let user = &projection.types["User"];
        assert!(user.contains("  id: ID!"));
        assert!(user.contains("  tags: [String]"));
    }

    #[test]
    fn other_actions_become_mutations() {
        let route = RouteDescriptor::builder("users", "/users", "POST", "createUser")
            .body("email", TypeSpec::required(TypeTag::String))
            .build()
            .unwrap();
        let projection = project(&[entry(route)]);
        assert_eq!(
            projection.mutations,
            vec!["  users_createUser(email: String!): JSON"]
        );
    }

    #[test]
    fn render_without_queries_keeps_schema_valid() {
        let sdl = render(&[GraphqlProjection::default()]);
        assert!(sdl.contains("type Query {\n  _empty: Boolean\n}"));
        assert!(!sdl.contains("type Mutation"));
    }

    #[test]
    fn render_merges_modules() {
        let a = GraphqlProjection {
            queries: vec!["  a_list: JSON".to_string()],
            ..GraphqlProjection::default()
        };
        let b = GraphqlProjection {
            mutations: vec!["  b_create: JSON".to_string()],
            ..GraphqlProjection::default()
        };
        let sdl = render([&a, &b]);
        assert!(sdl.contains("  a_list: JSON"));
        assert!(sdl.contains("type Mutation {\n  b_create: JSON\n}"));
    }
}
