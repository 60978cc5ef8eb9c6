//! Path-segment prefix tree indexing routes by `(action, path)`.
//!
//! Every dynamic segment (`:id`, `:userId`, ...) collapses into a single
//! wildcard edge, so two routes differing only in parameter names collide on
//! insert. Lookups prefer a literal child over the wildcard child and
//! backtrack when the literal branch dead-ends.

use std::collections::HashMap;

use crate::descriptor::Action;

/// Returned by [`RouteTrie::insert`] when the terminal node already holds the action.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{action} {path} conflicts with registered route {existing}")]
pub struct TrieConflict {
    pub action: Action,
    pub path: String,
    /// Canonical key of the route already occupying the slot.
    pub existing: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Segment {
    Literal(String),
    Wildcard,
}

impl Segment {
    fn parse(raw: &str) -> Self {
        if raw.starts_with(':') {
            Segment::Wildcard
        } else {
            Segment::Literal(raw.to_string())
        }
    }
}

#[derive(Debug, Clone, Default)]
struct TrieNode {
    children: HashMap<Segment, TrieNode>,
    routes: HashMap<Action, String>,
}

impl TrieNode {
    fn is_terminal(&self) -> bool {
        !self.routes.is_empty()
    }
}

/// Prefix tree over path segments. O(depth) insert and lookup.
#[derive(Debug, Clone, Default)]
pub struct RouteTrie {
    root: TrieNode,
    len: usize,
}

impl RouteTrie {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `(action, path)` entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Registers `path` for `action`; `path` itself becomes the canonical key.
    ///
    /// # Errors
    ///
    /// Returns [`TrieConflict`] if a structurally identical route (after
    /// wildcard normalization) is already registered for `action`. The trie
    /// is left unchanged in that case.
    pub fn insert(&mut self, action: Action, path: &str) -> Result<(), TrieConflict> {
        let mut node = &mut self.root;
        for raw in split(path) {
            node = node.children.entry(Segment::parse(raw)).or_default();
        }
        if let Some(existing) = node.routes.get(&action) {
            return Err(TrieConflict {
                action,
                path: path.to_string(),
                existing: existing.clone(),
            });
        }
        node.routes.insert(action, path.to_string());
        self.len += 1;
        Ok(())
    }

    /// Resolves a concrete request path to the canonical registered path.
    #[must_use]
    pub fn find(&self, action: Action, path: &str) -> Option<&str> {
        let segments: Vec<&str> = split(path).collect();
        lookup(&self.root, &segments, action)
    }

    /// Whether any action is registered for a path matching `path`.
    #[must_use]
    pub fn contains_path(&self, path: &str) -> bool {
        let segments: Vec<&str> = split(path).collect();
        Action::ALL
            .into_iter()
            .any(|action| lookup(&self.root, &segments, action).is_some())
    }
}

fn lookup<'a>(node: &'a TrieNode, segments: &[&str], action: Action) -> Option<&'a str> {
    let Some((head, rest)) = segments.split_first() else {
        return if node.is_terminal() {
            node.routes.get(&action).map(String::as_str)
        } else {
            None
        };
    };

    if let Some(child) = node.children.get(&Segment::Literal((*head).to_string())) {
        if let Some(found) = lookup(child, rest, action) {
            return Some(found);
        }
    }
    node.children
        .get(&Segment::Wildcard)
        .and_then(|child| lookup(child, rest, action))
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Extracts `:name` parameters from `concrete` using the canonical `pattern`.
///
/// Both paths must have the same number of segments (which holds for any
/// pattern returned by [`RouteTrie::find`] for `concrete`).
#[must_use]
pub fn extract_params(pattern: &str, concrete: &str) -> HashMap<String, String> {
    split(pattern)
        .zip(split(concrete))
        .filter_map(|(p, c)| p.strip_prefix(':').map(|name| (name.to_string(), c.to_string())))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
