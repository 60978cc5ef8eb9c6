//! OpenAPI 3.1 document built from the current routing table.

use std::collections::BTreeMap;

use utoipa::openapi::content::ContentBuilder;
use utoipa::openapi::path::{
    HttpMethod, OperationBuilder, ParameterBuilder, ParameterIn, PathItemBuilder,
};
use utoipa::openapi::request_body::RequestBodyBuilder;
use utoipa::openapi::response::ResponseBuilder;
use utoipa::openapi::schema::{ArrayBuilder, ObjectBuilder, Schema, SchemaType, Type};
use utoipa::openapi::{InfoBuilder, OpenApi, OpenApiBuilder, PathsBuilder, RefOr, Required};

use conduit_core::{Action, FieldSpec, ParamSchema, RouteDescriptor, TypeSpec, TypeTag};

use super::{operation_name, templated_path};
use crate::routing::table::RoutingTable;

fn http_method(action: Action) -> HttpMethod {
    match action {
        Action::Get => HttpMethod::Get,
        Action::Post => HttpMethod::Post,
        Action::Put => HttpMethod::Put,
        Action::Patch => HttpMethod::Patch,
        Action::Delete => HttpMethod::Delete,
    }
}

fn schema_of(ty: &TypeSpec) -> RefOr<Schema> {
    let schema = match ty {
        TypeSpec::Scalar(tag) => {
            let kind = match tag {
                TypeTag::String | TypeTag::Date | TypeTag::ObjectId => Type::String,
                TypeTag::Number => Type::Number,
                TypeTag::Boolean => Type::Boolean,
                TypeTag::Json => Type::Object,
            };
            Schema::Object(ObjectBuilder::new().schema_type(SchemaType::Type(kind)).build())
        }
        TypeSpec::List(inner) => Schema::Array(ArrayBuilder::new().items(schema_of(inner)).build()),
        TypeSpec::Object(fields) => object_schema(fields),
    };
    RefOr::T(schema)
}

fn object_schema(fields: &BTreeMap<String, FieldSpec>) -> Schema {
    let mut builder = ObjectBuilder::new().schema_type(SchemaType::Type(Type::Object));
    for (name, field) in fields {
        builder = builder.property(name, schema_of(&field.ty));
        if field.required {
            builder = builder.required(name);
        }
    }
    Schema::Object(builder.build())
}

fn required(flag: bool) -> Required {
    if flag {
        Required::True
    } else {
        Required::False
    }
}

fn parameters(
    mut operation: OperationBuilder,
    schema: &ParamSchema,
    location: ParameterIn,
) -> OperationBuilder {
    for (name, field) in schema {
        let in_path = matches!(location, ParameterIn::Path);
        operation = operation.parameter(
            ParameterBuilder::new()
                .name(name)
                .parameter_in(location.clone())
                .required(required(field.required || in_path))
                .schema(Some(schema_of(&field.ty))),
        );
    }
    operation
}

fn route_operation(module: &str, descriptor: &RouteDescriptor) -> OperationBuilder {
    let params = descriptor.params();
    let mut operation = OperationBuilder::new()
        .operation_id(Some(operation_name(module, descriptor.handler())))
        .tag(module);
    if !descriptor.description().is_empty() {
        operation = operation.summary(Some(descriptor.description()));
    }
    operation = parameters(operation, &params.url, ParameterIn::Path);
    operation = parameters(operation, &params.query, ParameterIn::Query);
    if !params.body.is_empty() {
        let body = RequestBodyBuilder::new()
            .content(
                "application/json",
                ContentBuilder::new()
                    .schema(Some(RefOr::T(object_schema(&params.body))))
                    .build(),
            )
            .required(Some(Required::True))
            .build();
        operation = operation.request_body(Some(body));
    }

    let mut response = ResponseBuilder::new().description("Successful response");
    if let Some(shape) = descriptor.returns() {
        response = response.content(
            "application/json",
            ContentBuilder::new().schema(Some(schema_of(&shape.ty))).build(),
        );
    }
    operation.response("200", RefOr::T(response.build()))
}

/// Builds the document for every route and proxy in `table`.
#[must_use]
pub fn build(table: &RoutingTable) -> OpenApi {
    let mut items: BTreeMap<String, PathItemBuilder> = BTreeMap::new();
    for module in table.modules() {
        for entry in &module.routes {
            let path = templated_path(&entry.public_path);
            let operation = route_operation(&module.name, &entry.descriptor).build();
            let item = items.remove(&path).unwrap_or_default();
            items.insert(
                path,
                item.operation(http_method(entry.descriptor.action()), operation),
            );
        }
        for entry in &module.proxies {
            let path = templated_path(&entry.public_path);
            let mut operation = OperationBuilder::new()
                .tag(module.name.as_str())
                .description(Some(format!("Proxied to {}", entry.descriptor.target)))
                .response(
                    "200",
                    RefOr::T(ResponseBuilder::new().description("Upstream response").build()),
                );
            if !entry.descriptor.description.is_empty() {
                operation = operation.summary(Some(entry.descriptor.description.as_str()));
            }
            let item = items.remove(&path).unwrap_or_default();
            items.insert(
                path,
                item.operation(http_method(entry.descriptor.action), operation.build()),
            );
        }
    }

    let mut paths = PathsBuilder::new();
    for (path, item) in items {
        paths = paths.path(path, item.build());
    }

    OpenApiBuilder::new()
        .info(
            InfoBuilder::new()
                .title("Conduit gateway")
                .version(env!("CARGO_PKG_VERSION"))
                .build(),
        )
        .paths(paths.build())
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_tags_map_to_json_types() {
        let RefOr::T(Schema::Object(object)) = schema_of(&TypeSpec::Scalar(TypeTag::Number)) else {
            panic!("expected object schema");
        };
        assert!(matches!(object.schema_type, SchemaType::Type(Type::Number)));
    }

    #[test]
    fn empty_table_yields_empty_paths() {
        let doc = build(&RoutingTable::empty());
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["info"]["title"], "Conduit gateway");
        assert!(json["paths"].as_object().unwrap().is_empty());
    }
}
