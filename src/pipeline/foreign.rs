//! Registry of nodes injected by the host or third-party plugins.
//!
//! Rendered notes carry editor chrome (collapse arrows, copy buttons) and
//! plugin decorations (reference counters, edit buttons) that make no sense
//! in a static copy. Instead of sniffing for each of them inline, every
//! known marker lives in one versioned table. When a host release renames
//! a class, the table changes and nothing else does.

use crate::dom;
use kuchiki::traits::*;
use kuchiki::NodeRef;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Bumped whenever the default entries change.
pub const REGISTRY_VERSION: u32 = 1;

/// How a foreign node is recognized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "kebab-case")]
pub enum NodeMarker {
    Class(String),
    Tag(String),
    /// Elements carrying this attribute, whatever its value.
    Attribute(String),
    /// Any CSS selector.
    Selector(String),
}

impl NodeMarker {
    pub fn to_selector(&self) -> String {
        match self {
            NodeMarker::Class(c) => format!(".{c}"),
            NodeMarker::Tag(t) => t.clone(),
            NodeMarker::Attribute(a) => format!("[{a}]"),
            NodeMarker::Selector(s) => s.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ForeignAction {
    /// Drop the node and its subtree.
    Remove,
    /// Drop the node but keep its children in place.
    Unwrap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignNodeRule {
    pub marker: NodeMarker,
    pub action: ForeignAction,
    /// Who injects these nodes, for log messages.
    pub origin: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignNodeRegistry {
    rules: Vec<ForeignNodeRule>,
}

impl Default for ForeignNodeRegistry {
    fn default() -> Self {
        let remove = |marker: NodeMarker, origin: &str| ForeignNodeRule {
            marker,
            action: ForeignAction::Remove,
            origin: origin.to_string(),
        };
        Self {
            rules: vec![
                remove(NodeMarker::Class("collapse-indicator".into()), "host"),
                remove(NodeMarker::Tag("button".into()), "host"),
                remove(NodeMarker::Class("snw-reference".into()), "strange-new-worlds"),
                remove(NodeMarker::Class("edit-block-button".into()), "host"),
            ],
        }
    }
}

impl ForeignNodeRegistry {
    /// A registry with no rules.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn register(&mut self, rule: ForeignNodeRule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[ForeignNodeRule] {
        &self.rules
    }

    /// Apply every rule to `root`. Returns the number of affected nodes.
    pub fn apply(&self, root: &NodeRef) -> usize {
        let mut affected = 0;
        for rule in &self.rules {
            let selector = rule.marker.to_selector();
            let nodes = match root.descendants().select(&selector) {
                Ok(matches) => matches.map(|m| m.as_node().clone()).collect::<Vec<_>>(),
                Err(()) => {
                    warn!(
                        "Skipping foreign-node rule from '{}': invalid selector '{}'",
                        rule.origin, selector
                    );
                    continue;
                }
            };
            for node in &nodes {
                // Already gone with a removed ancestor.
                if !node.ancestors().any(|a| a == *root) {
                    continue;
                }
                match rule.action {
                    ForeignAction::Remove => node.detach(),
                    ForeignAction::Unwrap => dom::unwrap_node(node),
                }
                affected += 1;
            }
            if !nodes.is_empty() {
                debug!("{:?} {} node(s) matching '{}'", rule.action, nodes.len(), selector);
            }
        }
        affected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_remove_chrome() {
        let root = dom::parse_fragment(
            r#"<h2><div class="collapse-indicator">v</div>Title</h2>
               <pre><code>x</code><button class="copy-code-button">Copy</button></pre>
               <p>Text<span class="snw-reference">3</span></p>
               <div class="edit-block-button">edit</div>"#,
        );
        let affected = ForeignNodeRegistry::default().apply(&root);
        assert_eq!(affected, 4);
        let html = root.to_string();
        assert!(!html.contains("collapse-indicator"));
        assert!(!html.contains("button"));
        assert!(!html.contains("snw-reference"));
        assert!(html.contains("Title"));
        assert!(html.contains("Text"));
    }

    #[test]
    fn unwrap_keeps_children() {
        let mut registry = ForeignNodeRegistry::empty();
        registry.register(ForeignNodeRule {
            marker: NodeMarker::Attribute("data-plugin-wrapper".into()),
            action: ForeignAction::Unwrap,
            origin: "test".into(),
        });
        let root = dom::parse_fragment(r#"<p><span data-plugin-wrapper="1"><b>kept</b></span></p>"#);
        assert_eq!(registry.apply(&root), 1);
        assert_eq!(dom::inner_html(&root), "<p><b>kept</b></p>");
    }

    #[test]
    fn invalid_selector_is_skipped() {
        let mut registry = ForeignNodeRegistry::empty();
        registry.register(ForeignNodeRule {
            marker: NodeMarker::Selector("div[".into()),
            action: ForeignAction::Remove,
            origin: "broken-plugin".into(),
        });
        registry.register(ForeignNodeRule {
            marker: NodeMarker::Class("x".into()),
            action: ForeignAction::Remove,
            origin: "test".into(),
        });
        let root = dom::parse_fragment(r#"<div class="x"></div><div>y</div>"#);
        assert_eq!(registry.apply(&root), 1);
        assert_eq!(dom::inner_html(&root), "<div>y</div>");
    }

    #[test]
    fn nested_removals_count_once() {
        let root = dom::parse_fragment(
            r#"<div class="collapse-indicator"><button>b</button></div>"#,
        );
        assert_eq!(ForeignNodeRegistry::default().apply(&root), 1);
    }

    #[test]
    fn rules_serialize() {
        let json = serde_json::to_string(&ForeignNodeRegistry::default().rules()[0]).unwrap();
        assert!(json.contains(r#""kind":"class""#));
        assert!(json.contains(r#""action":"remove""#));
    }
}
