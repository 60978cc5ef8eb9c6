//! Documentation surfaces projected from the routing table: GraphQL SDL,
//! OpenAPI and an LLM tool manifest.

pub mod graphql;
pub mod openapi;
pub mod tools;

use conduit_core::proto::normalize_module_name;

/// Identifier for a route function that is unique across modules.
#[must_use]
pub fn operation_name(module: &str, handler: &str) -> String {
    format!("{}_{}", normalize_module_name(module), normalize_module_name(handler))
}

/// Rewrites `:param` segments as `{param}`.
#[must_use]
pub fn templated_path(path: &str) -> String {
    path.split('/')
        .map(|segment| match segment.strip_prefix(':') {
            Some(name) => format!("{{{name}}}"),
            None => segment.to_string(),
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_names_are_module_qualified() {
        assert_eq!(operation_name("user-service", "getUser"), "user_service_getUser");
    }

    #[test]
    fn params_become_templates() {
        assert_eq!(templated_path("/users/:id/posts/:postId"), "/users/{id}/posts/{postId}");
    }
}
