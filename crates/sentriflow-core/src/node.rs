//! Parsed configuration tree.
//!
//! The core does not parse device configurations; it consumes a tree an
//! external parser already built. [`ConfigNode`] is the wire contract for
//! that tree (JSON, camelCase fields).

use serde::{Deserialize, Serialize};

/// One node of a parsed configuration tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigNode {
    /// Stable node identifier, matched by rule selectors.
    pub id: String,
    /// Node kind as assigned by the parser (e.g. `interface`, `line`).
    #[serde(default)]
    pub kind: String,
    /// Raw configuration text covered by this node.
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub children: Vec<ConfigNode>,
    /// 1-based source line where this node starts, when the parser knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl ConfigNode {
    /// Create a leaf node with the given id and content.
    pub fn leaf(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: String::new(),
            content: content.into(),
            children: Vec::new(),
            line: None,
        }
    }

    /// Whether this node's id matches a rule selector.
    ///
    /// A selector is an exact node id, or a prefix followed by `*`
    /// (`interface-*` matches `interface-eth0`).
    pub fn matches_selector(&self, selector: &str) -> bool {
        selector_matches(selector, &self.id)
    }

    /// Direct children whose ids match `selector`.
    pub fn children_matching<'a>(
        &'a self,
        selector: &'a str,
    ) -> impl Iterator<Item = &'a ConfigNode> {
        self.children
            .iter()
            .filter(move |child| selector_matches(selector, &child.id))
    }

    /// Depth-first iterator over this node and all descendants.
    pub fn walk(&self) -> Walk<'_> {
        Walk { stack: vec![self] }
    }
}

/// Match a selector against a node id.
pub fn selector_matches(selector: &str, id: &str) -> bool {
    match selector.strip_suffix('*') {
        Some(prefix) => id.starts_with(prefix),
        None => selector == id,
    }
}

/// Depth-first pre-order traversal, children visited in declaration order.
pub struct Walk<'a> {
    stack: Vec<&'a ConfigNode>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a ConfigNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        // Push in reverse so children come off the stack in order.
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}
