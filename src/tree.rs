//! Read-only navigation over libxml2 nodes
//!
//! Shared by the document handles and the classification proxies. Every function
//! takes raw node pointers and is `unsafe`: callers guarantee the pointer is either
//! null or a live node of a document that outlives the call.

use std::ffi::CString;
use std::fmt;

use libc::c_int;
use serde::Serialize;

use crate::libxml2::{
    XML_CDATA_SECTION_NODE, XML_COMMENT_NODE, XML_ELEMENT_NODE, XML_ENTITY_REF_NODE,
    XML_PI_NODE, XML_TEXT_NODE, XML_XINCLUDE_END, XML_XINCLUDE_START, XmlChar, XmlNode,
    take_xml_str, xml_str, xmlGetLineNo, xmlGetNoNsProp, xmlGetNsProp, xmlNewNs, xmlSearchNs,
};

pub(crate) type NodePtr = *mut XmlNode;

/// Node types that take part in element class lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NodeKind {
    Element,
    Comment,
    ProcessingInstruction,
    EntityReference,
}

impl NodeKind {
    pub(crate) fn from_type(node_type: c_int) -> Option<Self> {
        match node_type {
            XML_ELEMENT_NODE => Some(NodeKind::Element),
            XML_COMMENT_NODE => Some(NodeKind::Comment),
            XML_PI_NODE => Some(NodeKind::ProcessingInstruction),
            XML_ENTITY_REF_NODE => Some(NodeKind::EntityReference),
            _ => None,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeKind::Element => "element",
            NodeKind::Comment => "comment",
            NodeKind::ProcessingInstruction => "processing instruction",
            NodeKind::EntityReference => "entity reference",
        };
        f.write_str(name)
    }
}

/// Split `{namespace}local` into its parts; bare names have no namespace.
///
/// Returns `None` for malformed keys such as `{unterminated` or `{ns}`.
pub fn split_clark(key: &str) -> Option<(Option<&str>, &str)> {
    match key.strip_prefix('{') {
        Some(rest) => {
            let (namespace, local) = rest.split_once('}')?;
            if local.is_empty() {
                return None;
            }
            Some((Some(namespace).filter(|ns| !ns.is_empty()), local))
        }
        None if key.is_empty() => None,
        None => Some((None, key)),
    }
}

pub(crate) unsafe fn kind(node: NodePtr) -> Option<NodeKind> {
    if node.is_null() {
        return None;
    }
    NodeKind::from_type(unsafe { (*node).node_type })
}

pub(crate) unsafe fn is_element(node: NodePtr) -> bool {
    !node.is_null() && unsafe { (*node).node_type } == XML_ELEMENT_NODE
}

/// First element at or after `node` in its sibling chain
unsafe fn element_from(mut node: NodePtr) -> NodePtr {
    while !node.is_null() && !unsafe { is_element(node) } {
        node = unsafe { (*node).next };
    }
    node
}

/// First element at or before `node` in its sibling chain
unsafe fn element_back_from(mut node: NodePtr) -> NodePtr {
    while !node.is_null() && !unsafe { is_element(node) } {
        node = unsafe { (*node).prev };
    }
    node
}

pub(crate) unsafe fn first_child_element(node: NodePtr) -> NodePtr {
    unsafe { element_from((*node).children) }
}

pub(crate) unsafe fn last_child_element(node: NodePtr) -> NodePtr {
    unsafe { element_back_from((*node).last) }
}

pub(crate) unsafe fn next_element(node: NodePtr) -> NodePtr {
    unsafe { element_from((*node).next) }
}

pub(crate) unsafe fn previous_element(node: NodePtr) -> NodePtr {
    unsafe { element_back_from((*node).prev) }
}

pub(crate) unsafe fn parent_element(node: NodePtr) -> NodePtr {
    let parent = unsafe { (*node).parent };
    if unsafe { is_element(parent) } {
        parent
    } else {
        std::ptr::null_mut()
    }
}

pub(crate) unsafe fn count_child_elements(node: NodePtr) -> usize {
    let mut count = 0;
    let mut child = unsafe { first_child_element(node) };
    while !child.is_null() {
        count += 1;
        child = unsafe { next_element(child) };
    }
    count
}

pub(crate) unsafe fn child_elements(node: NodePtr) -> Vec<NodePtr> {
    let mut children = Vec::new();
    let mut child = unsafe { first_child_element(node) };
    while !child.is_null() {
        children.push(child);
        child = unsafe { next_element(child) };
    }
    children
}

/// The `index`th element child; negative indices count from the end.
pub(crate) unsafe fn find_child_element(node: NodePtr, index: isize) -> NodePtr {
    if index >= 0 {
        let mut child = unsafe { first_child_element(node) };
        let mut remaining = index;
        while !child.is_null() && remaining > 0 {
            child = unsafe { next_element(child) };
            remaining -= 1;
        }
        child
    } else {
        let mut child = unsafe { last_child_element(node) };
        let mut remaining = -(index + 1);
        while !child.is_null() && remaining > 0 {
            child = unsafe { previous_element(child) };
            remaining -= 1;
        }
        child
    }
}

/// Next node in document order, staying inside the subtree of `(*node).doc`.
///
/// Only element children are descended into.
pub(crate) unsafe fn next_in_document_order(node: NodePtr) -> NodePtr {
    unsafe {
        if is_element(node) && !(*node).children.is_null() {
            return (*node).children;
        }
        let mut current = node;
        while !current.is_null() {
            if !(*current).next.is_null() {
                return (*current).next;
            }
            let parent = (*current).parent;
            if !is_element(parent) {
                return std::ptr::null_mut();
            }
            current = parent;
        }
        std::ptr::null_mut()
    }
}

/// Element name in Clark notation, `{namespace}local` or `local`
pub(crate) unsafe fn namespaced_name(node: NodePtr) -> String {
    unsafe {
        let local = xml_str((*node).name).unwrap_or_default();
        let ns = (*node).ns;
        let namespace = if ns.is_null() { None } else { xml_str((*ns).href) };
        match namespace {
            Some(href) => format!("{{{href}}}{local}"),
            None => local,
        }
    }
}

pub(crate) unsafe fn prefix(node: NodePtr) -> Option<String> {
    unsafe {
        let ns = (*node).ns;
        if ns.is_null() {
            None
        } else {
            xml_str((*ns).prefix)
        }
    }
}

/// Text of a run of text/CDATA siblings starting at `node`
///
/// `None` when the run is absent, `Some("")` when it only holds empty nodes.
/// XInclude markers inside the run are skipped.
pub(crate) unsafe fn collect_text(node: NodePtr) -> Option<String> {
    unsafe fn text_node_or_skip(mut node: NodePtr) -> NodePtr {
        while !node.is_null() {
            match unsafe { (*node).node_type } {
                XML_TEXT_NODE | XML_CDATA_SECTION_NODE => return node,
                XML_XINCLUDE_START | XML_XINCLUDE_END => node = unsafe { (*node).next },
                _ => return std::ptr::null_mut(),
            }
        }
        node
    }

    let mut current = unsafe { text_node_or_skip(node) };
    if current.is_null() {
        return None;
    }
    let mut text = String::new();
    while !current.is_null() {
        if let Some(content) = unsafe { xml_str((*current).content) } {
            text.push_str(&content);
        }
        current = unsafe { text_node_or_skip((*current).next) };
    }
    Some(text)
}

pub(crate) unsafe fn text(node: NodePtr) -> Option<String> {
    unsafe { collect_text((*node).children) }
}

pub(crate) unsafe fn tail(node: NodePtr) -> Option<String> {
    unsafe { collect_text((*node).next) }
}

pub(crate) unsafe fn source_line(node: NodePtr) -> Option<u64> {
    let line = unsafe { xmlGetLineNo(node) };
    if line > 0 { Some(line as u64) } else { None }
}

/// Namespace-aware attribute lookup by `{namespace}name` or bare `name`
pub(crate) unsafe fn attribute_value(node: NodePtr, key: &str) -> Option<String> {
    let (namespace, local) = split_clark(key)?;
    unsafe { attribute_value_ns(node, namespace, local) }
}

unsafe fn attribute_value_ns(node: NodePtr, namespace: Option<&str>, local: &str) -> Option<String> {
    let c_local = CString::new(local).ok()?;
    let value = match namespace {
        None => unsafe { xmlGetNoNsProp(node, c_local.as_ptr() as *const XmlChar) },
        Some(namespace) => {
            let c_namespace = CString::new(namespace).ok()?;
            unsafe {
                xmlGetNsProp(
                    node,
                    c_local.as_ptr() as *const XmlChar,
                    c_namespace.as_ptr() as *const XmlChar,
                )
            }
        }
    };
    unsafe { take_xml_str(value) }
}

/// All attributes of an element as `(clark name, value)` pairs
pub(crate) unsafe fn attribute_items(node: NodePtr) -> Vec<(String, String)> {
    let mut items = Vec::new();
    unsafe {
        let mut attr = (*node).properties;
        while !attr.is_null() {
            let local = xml_str((*attr).name).unwrap_or_default();
            let ns = (*attr).ns;
            let namespace = if ns.is_null() { None } else { xml_str((*ns).href) };
            if let Some(value) = attribute_value_ns(node, namespace.as_deref(), &local) {
                let key = match &namespace {
                    Some(href) => format!("{{{href}}}{local}"),
                    None => local,
                };
                items.push((key, value));
            }
            attr = (*attr).next;
        }
    }
    items
}

/// Resolve `prefix:local` against the namespaces in scope at `node`
///
/// Unprefixed names are returned unchanged; unknown prefixes yield `None`.
pub(crate) unsafe fn resolve_qname(node: NodePtr, qname: &str) -> Option<String> {
    let Some((prefix, local)) = qname.split_once(':') else {
        return Some(qname.to_string());
    };
    let c_prefix = CString::new(prefix).ok()?;
    unsafe {
        let ns = xmlSearchNs((*node).doc, node, c_prefix.as_ptr() as *const XmlChar);
        if ns.is_null() {
            return None;
        }
        let href = xml_str((*ns).href)?;
        Some(format!("{{{href}}}{local}"))
    }
}

/// Re-declare on `to` every namespace declared by the ancestors of `from`.
///
/// libxml2 skips prefixes `to` already declares.
pub(crate) unsafe fn copy_parent_namespaces(from: NodePtr, to: NodePtr) {
    unsafe {
        let mut parent = (*from).parent;
        while is_element(parent) {
            let mut ns = (*parent).ns_def;
            while !ns.is_null() {
                xmlNewNs(to, (*ns).href, (*ns).prefix);
                ns = (*ns).next;
            }
            parent = (*parent).parent;
        }
    }
}
