//! Element class lookup
//!
//! While a document is built every element, comment, processing instruction and
//! entity reference is assigned an [`ElementClass`]. A [`ClassLookup`] strategy
//! decides which one. [`HookClassLookup`] hands each element to user code as a
//! read-only [`ProxyNode`] and falls back to another strategy when the hook has no
//! opinion.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::document::{Document, Node};
use crate::error::{LookupError, LookupResult};
use crate::proxy::{ProxyGraph, ProxyNode};
use crate::tree::NodeKind;

/// Name of the class a node is materialised as, plus the kind of node it is for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementClass {
    name: Arc<str>,
    kind: NodeKind,
}

impl ElementClass {
    pub fn new(name: impl Into<Arc<str>>, kind: NodeKind) -> Self {
        ElementClass {
            name: name.into(),
            kind,
        }
    }

    pub fn element(name: impl Into<Arc<str>>) -> Self {
        Self::new(name, NodeKind::Element)
    }

    pub fn comment(name: impl Into<Arc<str>>) -> Self {
        Self::new(name, NodeKind::Comment)
    }

    pub fn processing_instruction(name: impl Into<Arc<str>>) -> Self {
        Self::new(name, NodeKind::ProcessingInstruction)
    }

    pub fn entity(name: impl Into<Arc<str>>) -> Self {
        Self::new(name, NodeKind::EntityReference)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    fn ensure_kind(&self, expected: NodeKind) -> LookupResult<()> {
        if self.kind == expected {
            Ok(())
        } else {
            Err(LookupError::IncompatibleClass {
                class: self.name.to_string(),
                expected,
                found: self.kind,
            })
        }
    }
}

impl fmt::Display for ElementClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Strategy choosing the class of a node during document construction
pub trait ClassLookup {
    fn lookup(&self, doc: &Document, node: Node<'_>) -> LookupResult<ElementClass>;
}

/// One fixed class per node kind
#[derive(Debug, Clone)]
pub struct DefaultClassLookup {
    element: ElementClass,
    comment: ElementClass,
    processing_instruction: ElementClass,
    entity: ElementClass,
}

impl DefaultClassLookup {
    pub fn new() -> Self {
        DefaultClassLookup {
            element: ElementClass::element("Element"),
            comment: ElementClass::comment("Comment"),
            processing_instruction: ElementClass::processing_instruction("ProcessingInstruction"),
            entity: ElementClass::entity("Entity"),
        }
    }

    pub fn with_element(mut self, name: impl Into<Arc<str>>) -> Self {
        self.element = ElementClass::element(name);
        self
    }

    pub fn with_comment(mut self, name: impl Into<Arc<str>>) -> Self {
        self.comment = ElementClass::comment(name);
        self
    }

    pub fn with_processing_instruction(mut self, name: impl Into<Arc<str>>) -> Self {
        self.processing_instruction = ElementClass::processing_instruction(name);
        self
    }

    pub fn with_entity(mut self, name: impl Into<Arc<str>>) -> Self {
        self.entity = ElementClass::entity(name);
        self
    }

    pub fn class_for(&self, kind: NodeKind) -> &ElementClass {
        match kind {
            NodeKind::Element => &self.element,
            NodeKind::Comment => &self.comment,
            NodeKind::ProcessingInstruction => &self.processing_instruction,
            NodeKind::EntityReference => &self.entity,
        }
    }
}

impl Default for DefaultClassLookup {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassLookup for DefaultClassLookup {
    fn lookup(&self, _doc: &Document, node: Node<'_>) -> LookupResult<ElementClass> {
        Ok(self.class_for(node.kind()).clone())
    }
}

/// Picks the element class from the value of one attribute
///
/// Elements without the attribute, or with an unmapped value, and all non-element
/// nodes go to the fallback.
pub struct AttributeClassLookup {
    attribute: String,
    classes: HashMap<String, ElementClass>,
    fallback: Box<dyn ClassLookup>,
}

impl AttributeClassLookup {
    /// `attribute` is a bare name or `{namespace}name`
    pub fn new(attribute: impl Into<String>) -> Self {
        AttributeClassLookup {
            attribute: attribute.into(),
            classes: HashMap::new(),
            fallback: Box::new(DefaultClassLookup::new()),
        }
    }

    pub fn with_class(mut self, value: impl Into<String>, class: ElementClass) -> Self {
        self.classes.insert(value.into(), class);
        self
    }

    pub fn with_fallback(mut self, fallback: impl ClassLookup + 'static) -> Self {
        self.fallback = Box::new(fallback);
        self
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }
}

impl ClassLookup for AttributeClassLookup {
    fn lookup(&self, doc: &Document, node: Node<'_>) -> LookupResult<ElementClass> {
        if let Some(class) = node
            .get(&self.attribute)
            .and_then(|value| self.classes.get(&value))
        {
            class.ensure_kind(NodeKind::Element)?;
            return Ok(class.clone());
        }
        self.fallback.lookup(doc, node)
    }
}

impl fmt::Debug for AttributeClassLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeClassLookup")
            .field("attribute", &self.attribute)
            .field("classes", &self.classes)
            .finish_non_exhaustive()
    }
}

/// User logic deciding the class of an element
///
/// Only element nodes reach the hook. Comments, processing instructions and entity
/// references are classified by the fallback lookup without consulting it.
///
/// `element` is only valid for the duration of the call. Returning `Ok(None)` lets
/// the fallback lookup decide.
pub trait ClassificationHook {
    fn lookup(&self, doc: &Document, element: &ProxyNode) -> anyhow::Result<Option<ElementClass>> {
        let _ = (doc, element);
        Ok(None)
    }
}

impl<F> ClassificationHook for F
where
    F: Fn(&Document, &ProxyNode) -> anyhow::Result<Option<ElementClass>>,
{
    fn lookup(&self, doc: &Document, element: &ProxyNode) -> anyhow::Result<Option<ElementClass>> {
        self(doc, element)
    }
}

/// Class lookup that consults a [`ClassificationHook`] for every element
pub struct HookClassLookup<H> {
    hook: H,
    fallback: Box<dyn ClassLookup>,
}

impl<H: ClassificationHook> HookClassLookup<H> {
    pub fn new(hook: H) -> Self {
        HookClassLookup {
            hook,
            fallback: Box::new(DefaultClassLookup::new()),
        }
    }

    pub fn with_fallback(mut self, fallback: impl ClassLookup + 'static) -> Self {
        self.fallback = Box::new(fallback);
        self
    }

    pub fn hook(&self) -> &H {
        &self.hook
    }

    fn consult(&self, doc: &Document, node: Node<'_>) -> LookupResult<Option<ElementClass>> {
        let mut graph = ProxyGraph::new(node);
        let decision = self.hook.lookup(doc, graph.root());
        let spawned = graph.len();
        graph.teardown();
        trace!(tag = %node.tag(), spawned, "classification hook consulted");
        decision.map_err(LookupError::Hook)
    }
}

impl<H: ClassificationHook> ClassLookup for HookClassLookup<H> {
    fn lookup(&self, doc: &Document, node: Node<'_>) -> LookupResult<ElementClass> {
        if node.is_element() {
            if let Some(class) = self.consult(doc, node)? {
                class.ensure_kind(NodeKind::Element)?;
                return Ok(class);
            }
        }
        self.fallback.lookup(doc, node)
    }
}

impl<H> fmt::Debug for HookClassLookup<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookClassLookup").finish_non_exhaustive()
    }
}
