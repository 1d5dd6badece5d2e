//! Small helpers over the `kuchiki` DOM.
//!
//! New elements are always created by parsing an HTML snippet. Table parts
//! (`tr`, `td`, `th`) only survive parsing inside a `<table>`, so callers
//! build whole tables instead of loose cells.

use kuchiki::traits::*;
use kuchiki::{NodeData, NodeRef};
use tracing::warn;

/// Parse `html` and return it wrapped in a single detached `<div>`.
pub fn parse_fragment(html: &str) -> NodeRef {
    let wrapper = new_element("<div></div>");
    let document = kuchiki::parse_html().one(html);
    if let Ok(body) = document.select_first("body") {
        move_children(body.as_node(), &wrapper);
    }
    wrapper
}

/// Parse `html` and return its first element, detached.
pub fn element_from_html(html: &str) -> Option<NodeRef> {
    let document = kuchiki::parse_html().one(html);
    let body = document.select_first("body").ok()?;
    let element = body.as_node().children().find(|c| c.as_element().is_some())?;
    element.detach();
    Some(element)
}

/// Like [`element_from_html`] for snippets known to produce an element.
///
/// Falls back to an empty `<span>` when `html` has no element, which only
/// happens when the caller passes text.
pub fn new_element(html: &str) -> NodeRef {
    element_from_html(html)
        .or_else(|| element_from_html("<span></span>"))
        .unwrap_or_else(|| NodeRef::new_text(""))
}

/// Independent copy of `node` and its subtree.
pub fn deep_clone(node: &NodeRef) -> NodeRef {
    if node.as_element().is_some() {
        if let Some(copy) = element_from_html(&node.to_string()) {
            return copy;
        }
    }
    NodeRef::new_text(node.text_contents())
}

/// Put `replacement` where `node` is and detach `node`.
pub fn replace_node(node: &NodeRef, replacement: NodeRef) {
    node.insert_before(replacement);
    node.detach();
}

/// Replace `node` with its own children.
pub fn unwrap_node(node: &NodeRef) {
    let children: Vec<NodeRef> = node.children().collect();
    for child in children {
        node.insert_before(child);
    }
    node.detach();
}

/// Move every child of `from` to the end of `to`.
pub fn move_children(from: &NodeRef, to: &NodeRef) {
    let children: Vec<NodeRef> = from.children().collect();
    for child in children {
        to.append(child);
    }
}

/// Serialized children of `node`.
pub fn inner_html(node: &NodeRef) -> String {
    node.children().map(|c| c.to_string()).collect()
}

/// Every element under `root` matching `selector`, collected before the
/// caller starts mutating. An invalid selector yields nothing.
pub fn select_all(root: &NodeRef, selector: &str) -> Vec<NodeRef> {
    match root.descendants().select(selector) {
        Ok(matches) => matches.map(|m| m.as_node().clone()).collect(),
        Err(()) => {
            warn!("Invalid selector '{}'", selector);
            Vec::new()
        }
    }
}

/// Like [`select_all`] but includes `root` itself when it matches.
pub fn select_all_inclusive(root: &NodeRef, selector: &str) -> Vec<NodeRef> {
    match root.select(selector) {
        Ok(matches) => matches.map(|m| m.as_node().clone()).collect(),
        Err(()) => {
            warn!("Invalid selector '{}'", selector);
            Vec::new()
        }
    }
}

pub fn tag_name(node: &NodeRef) -> Option<String> {
    node.as_element().map(|e| e.name.local.to_string())
}

pub fn attr(node: &NodeRef, name: &str) -> Option<String> {
    node.as_element()
        .and_then(|e| e.attributes.borrow().get(name).map(|v| v.to_string()))
}

pub fn set_attr(node: &NodeRef, name: &str, value: &str) {
    if let Some(e) = node.as_element() {
        e.attributes.borrow_mut().insert(name, value.to_string());
    }
}

pub fn remove_attr(node: &NodeRef, name: &str) {
    if let Some(e) = node.as_element() {
        e.attributes.borrow_mut().remove(name);
    }
}

pub fn has_class(node: &NodeRef, class: &str) -> bool {
    attr(node, "class")
        .map(|c| c.split_whitespace().any(|c| c == class))
        .unwrap_or(false)
}

pub fn add_class(node: &NodeRef, class: &str) {
    if has_class(node, class) {
        return;
    }
    let classes = match attr(node, "class") {
        Some(existing) if !existing.trim().is_empty() => format!("{} {}", existing.trim(), class),
        _ => class.to_string(),
    };
    set_attr(node, "class", &classes);
}

// ── Inline style ─────────────────────────────────────────────────────────

fn style_declarations(node: &NodeRef) -> Vec<(String, String)> {
    attr(node, "style")
        .unwrap_or_default()
        .split(';')
        .filter_map(|decl| {
            let (k, v) = decl.split_once(':')?;
            let k = k.trim();
            (!k.is_empty()).then(|| (k.to_ascii_lowercase(), v.trim().to_string()))
        })
        .collect()
}

fn write_style(node: &NodeRef, decls: &[(String, String)]) {
    if decls.is_empty() {
        remove_attr(node, "style");
        return;
    }
    let style = decls
        .iter()
        .map(|(k, v)| format!("{k}: {v};"))
        .collect::<Vec<_>>()
        .join(" ");
    set_attr(node, "style", &style);
}

/// Set one inline style property, keeping the others.
pub fn set_style_property(node: &NodeRef, property: &str, value: &str) {
    let mut decls = style_declarations(node);
    match decls.iter_mut().find(|(k, _)| k == property) {
        Some(slot) => slot.1 = value.to_string(),
        None => decls.push((property.to_string(), value.to_string())),
    }
    write_style(node, &decls);
}

pub fn remove_style_property(node: &NodeRef, property: &str) {
    let mut decls = style_declarations(node);
    let before = decls.len();
    decls.retain(|(k, _)| k != property);
    if decls.len() != before {
        write_style(node, &decls);
    }
}

pub fn style_property(node: &NodeRef, property: &str) -> Option<String> {
    style_declarations(node)
        .into_iter()
        .find(|(k, _)| k == property)
        .map(|(_, v)| v)
}

// ── SVG ──────────────────────────────────────────────────────────────────

/// Serialize an inline `<svg>` subtree as standalone XML.
///
/// HTML serialization drops namespace declarations the SVG parser needs.
pub fn svg_to_xml(node: &NodeRef) -> String {
    let mut out = String::new();
    write_svg_xml(node, &mut out, true);
    out
}

fn write_svg_xml(node: &NodeRef, out: &mut String, is_root: bool) {
    match node.data() {
        NodeData::Element(el) => {
            let tag = el.name.local.as_ref();
            out.push('<');
            out.push_str(tag);

            let attrs = el.attributes.borrow();
            let mut has_xmlns = false;
            let mut has_xlink_ns = false;
            let mut uses_xlink = false;
            for (name, value) in attrs.map.iter() {
                let local = name.local.as_ref();
                let qualified = match &value.prefix {
                    Some(prefix) => format!("{}:{}", prefix.as_ref(), local),
                    None => local.to_string(),
                };
                has_xmlns |= qualified == "xmlns";
                has_xlink_ns |= qualified == "xmlns:xlink";
                uses_xlink |= qualified.starts_with("xlink:");
                out.push(' ');
                out.push_str(&qualified);
                out.push_str("=\"");
                escape_xml(&value.value, out, true);
                out.push('"');
            }
            if is_root && !has_xmlns {
                out.push_str(" xmlns=\"http://www.w3.org/2000/svg\"");
            }
            if is_root && !has_xlink_ns && (uses_xlink || node.to_string().contains("xlink:")) {
                out.push_str(" xmlns:xlink=\"http://www.w3.org/1999/xlink\"");
            }
            out.push('>');

            for child in node.children() {
                write_svg_xml(&child, out, false);
            }

            out.push_str("</");
            out.push_str(tag);
            out.push('>');
        }
        NodeData::Text(t) => escape_xml(&t.borrow(), out, false),
        _ => {}
    }
}

fn escape_xml(input: &str, out: &mut String, in_attr: bool) {
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if in_attr => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
}
