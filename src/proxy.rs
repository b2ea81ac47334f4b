//! Read-only element proxies for element class lookup
//!
//! A [`ProxyGraph`] is created for one classification call. Its root [`ProxyNode`]
//! stands in for the element being classified; every proxy reached from it through
//! traversal is registered in the graph. Proxies hold a slot index plus a weak
//! reference to the graph registry, never the native node itself, and own none of
//! the tree's memory.
//!
//! Tearing the graph down nulls every slot and bumps the graph epoch. From then on
//! any access through a proxy of that graph panics, including proxies that were
//! cloned or smuggled out of the classification call.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Range;
use std::rc::{Rc, Weak};

use tracing::trace;

use crate::document::Node;
use crate::error::ProxyError;
use crate::tree::{self, NodePtr};

const INVALIDATED: &str = "element proxy used after its classification call returned";

struct Registry {
    slots: Vec<NodePtr>,
    epoch: u64,
}

/// All proxies spawned during one classification call
pub struct ProxyGraph<'doc> {
    registry: Rc<RefCell<Registry>>,
    root: ProxyNode,
    torn_down: bool,
    _doc: PhantomData<&'doc ()>,
}

impl<'doc> ProxyGraph<'doc> {
    /// Create a graph whose root proxy stands in for `element`
    ///
    /// # Panics
    ///
    /// Panics if `element` is not an element node.
    pub fn new(element: Node<'doc>) -> Self {
        assert!(
            element.is_element(),
            "proxies are only created for element nodes"
        );
        let registry = Rc::new(RefCell::new(Registry {
            slots: vec![element.as_ptr()],
            epoch: 0,
        }));
        let root = ProxyNode {
            registry: Rc::downgrade(&registry),
            slot: 0,
            epoch: 0,
        };
        ProxyGraph {
            registry,
            root,
            torn_down: false,
            _doc: PhantomData,
        }
    }

    pub fn root(&self) -> &ProxyNode {
        &self.root
    }

    /// Number of proxies registered so far, the root included
    pub fn len(&self) -> usize {
        self.registry.borrow().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Invalidate every proxy of this graph
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        let mut registry = self.registry.borrow_mut();
        let spawned = registry.slots.len();
        for slot in registry.slots.iter_mut() {
            *slot = std::ptr::null_mut();
        }
        registry.slots.clear();
        registry.epoch += 1;
        self.torn_down = true;
        trace!(spawned, "proxy graph torn down");
    }
}

impl Drop for ProxyGraph<'_> {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for ProxyGraph<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyGraph")
            .field("proxies", &self.len())
            .field("torn_down", &self.torn_down)
            .finish()
    }
}

/// Read-only stand-in for an element during one classification call
///
/// Every accessor panics once the owning [`ProxyGraph`] has been torn down.
#[derive(Clone)]
pub struct ProxyNode {
    registry: Weak<RefCell<Registry>>,
    slot: usize,
    epoch: u64,
}

impl ProxyNode {
    fn resolve(&self) -> Option<NodePtr> {
        let registry = self.registry.upgrade()?;
        let registry = registry.borrow();
        if registry.epoch != self.epoch {
            return None;
        }
        registry
            .slots
            .get(self.slot)
            .copied()
            .filter(|node| !node.is_null())
    }

    fn node(&self) -> NodePtr {
        match self.resolve() {
            Some(node) => node,
            None => panic!("{}", INVALIDATED),
        }
    }

    /// Register a proxy for `node` in the same graph
    fn spawn(&self, node: NodePtr) -> Option<ProxyNode> {
        if node.is_null() {
            return None;
        }
        let Some(registry) = self.registry.upgrade() else {
            panic!("{}", INVALIDATED);
        };
        let mut registry = registry.borrow_mut();
        assert_eq!(registry.epoch, self.epoch, "{}", INVALIDATED);
        registry.slots.push(node);
        Some(ProxyNode {
            registry: self.registry.clone(),
            slot: registry.slots.len() - 1,
            epoch: registry.epoch,
        })
    }

    /// Whether the owning graph is still alive
    pub fn is_valid(&self) -> bool {
        self.resolve().is_some()
    }

    /// Tag in Clark notation, `{namespace}local` or `local`
    pub fn tag(&self) -> String {
        unsafe { tree::namespaced_name(self.node()) }
    }

    pub fn text(&self) -> Option<String> {
        unsafe { tree::text(self.node()) }
    }

    pub fn tail(&self) -> Option<String> {
        unsafe { tree::tail(self.node()) }
    }

    pub fn prefix(&self) -> Option<String> {
        unsafe { tree::prefix(self.node()) }
    }

    pub fn sourceline(&self) -> Option<u64> {
        unsafe { tree::source_line(self.node()) }
    }

    /// Attribute value by bare name or `{namespace}name`
    pub fn get(&self, key: &str) -> Option<String> {
        unsafe { tree::attribute_value(self.node(), key) }
    }

    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    pub fn keys(&self) -> Vec<String> {
        self.items().into_iter().map(|(key, _)| key).collect()
    }

    pub fn values(&self) -> Vec<String> {
        self.items().into_iter().map(|(_, value)| value).collect()
    }

    /// Attribute `(name, value)` pairs; names use Clark notation
    pub fn items(&self) -> Vec<(String, String)> {
        unsafe { tree::attribute_items(self.node()) }
    }

    pub fn attrib(&self) -> HashMap<String, String> {
        self.items().into_iter().collect()
    }

    /// Resolve `prefix:local` to Clark notation using the namespaces in scope here
    pub fn resolve_qname(&self, qname: &str) -> Option<String> {
        unsafe { tree::resolve_qname(self.node(), qname) }
    }

    /// Number of element children
    pub fn len(&self) -> usize {
        unsafe { tree::count_child_elements(self.node()) }
    }

    pub fn is_empty(&self) -> bool {
        !self.has_children()
    }

    pub fn has_children(&self) -> bool {
        !unsafe { tree::first_child_element(self.node()) }.is_null()
    }

    /// The `index`th element child; negative indices count from the end
    pub fn child(&self, index: isize) -> Result<ProxyNode, ProxyError> {
        let node = self.node();
        let child = unsafe { tree::find_child_element(node, index) };
        self.spawn(child).ok_or_else(|| ProxyError::IndexOutOfRange {
            index,
            len: unsafe { tree::count_child_elements(node) },
        })
    }

    /// Element children in `range`; non-element nodes do not take up positions
    pub fn children_range(&self, range: Range<usize>) -> Vec<ProxyNode> {
        let mut children = Vec::new();
        let mut child = unsafe { tree::first_child_element(self.node()) };
        let mut position = 0;
        while !child.is_null() && position < range.end {
            if position >= range.start {
                children.extend(self.spawn(child));
            }
            position += 1;
            child = unsafe { tree::next_element(child) };
        }
        children
    }

    /// All element children in document order
    pub fn children(&self) -> Vec<ProxyNode> {
        unsafe { tree::child_elements(self.node()) }
            .into_iter()
            .filter_map(|child| self.spawn(child))
            .collect()
    }

    /// Lazy iterator over the element children
    pub fn iter(&self) -> ProxyChildren {
        ProxyChildren {
            parent: self.clone(),
            next: None,
            started: false,
        }
    }

    /// Element children, optionally filtered by exact tag (`*` matches all) and
    /// reversed
    pub fn iter_children(&self, tag: Option<&str>, reversed: bool) -> std::vec::IntoIter<ProxyNode> {
        let mut children = self.children();
        if let Some(tag) = tag.filter(|tag| *tag != "*") {
            children.retain(|child| child.tag() == tag);
        }
        if reversed {
            children.reverse();
        }
        children.into_iter()
    }

    pub fn parent(&self) -> Option<ProxyNode> {
        self.spawn(unsafe { tree::parent_element(self.node()) })
    }

    pub fn next_sibling(&self) -> Option<ProxyNode> {
        self.spawn(unsafe { tree::next_element(self.node()) })
    }

    pub fn previous_sibling(&self) -> Option<ProxyNode> {
        self.spawn(unsafe { tree::previous_element(self.node()) })
    }
}

impl PartialEq for ProxyNode {
    fn eq(&self, other: &Self) -> bool {
        self.node() == other.node()
    }
}

impl fmt::Display for ProxyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let node = self.node();
        write!(f, "<Element {} at {:#x}>", unsafe { tree::namespaced_name(node) }, node as usize)
    }
}

impl fmt::Debug for ProxyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("ProxyNode");
        debug.field("slot", &self.slot);
        match self.resolve() {
            Some(node) => debug.field("tag", &unsafe { tree::namespaced_name(node) }),
            None => debug.field("invalidated", &true),
        };
        debug.finish()
    }
}

impl<'a> IntoIterator for &'a ProxyNode {
    type Item = ProxyNode;
    type IntoIter = ProxyChildren;

    fn into_iter(self) -> ProxyChildren {
        self.iter()
    }
}

/// Lazy iterator over the element children of a [`ProxyNode`]
///
/// Each step checks that the graph is still alive.
pub struct ProxyChildren {
    parent: ProxyNode,
    next: Option<NodePtr>,
    started: bool,
}

impl Iterator for ProxyChildren {
    type Item = ProxyNode;

    fn next(&mut self) -> Option<ProxyNode> {
        let parent = self.parent.node();
        let current = if self.started {
            self.next.take()?
        } else {
            self.started = true;
            unsafe { tree::first_child_element(parent) }
        };
        if current.is_null() {
            return None;
        }
        let following = unsafe { tree::next_element(current) };
        self.next = Some(following);
        self.parent.spawn(current)
    }
}
