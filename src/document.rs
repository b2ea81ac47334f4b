//! Parsed documents and read-only node handles
//!
//! A [`Document`] owns a libxml2 tree. [`Node`] is a borrowed, read-only view of one
//! of its nodes; the borrow keeps the tree alive for as long as the handle exists.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use crate::error::{DocumentError, DocumentResult};
use crate::libxml2::{
    DocPtr, XmlDoc, xml_str, xmlCopyDoc, xmlDocCopyNode, xmlDocGetRootElement,
    xmlDocSetRootElement, xmlFreeDoc,
};
use crate::lookup::ElementClass;
use crate::tree::{self, NodeKind, NodePtr};

/// A parsed XML document
///
/// The classes computed by the element class lookup while the document was built
/// are kept alongside the tree.
pub struct Document {
    doc: DocPtr,
    classes: HashMap<usize, ElementClass>,
}

impl Document {
    pub(crate) fn new(doc: DocPtr) -> Self {
        Document {
            doc,
            classes: HashMap::new(),
        }
    }

    pub(crate) fn as_ptr(&self) -> *mut XmlDoc {
        self.doc.as_ptr()
    }

    pub(crate) fn set_classes(&mut self, classes: HashMap<usize, ElementClass>) {
        self.classes = classes;
    }

    /// The root element, if the document has one
    pub fn root(&self) -> Option<Node<'_>> {
        let root = unsafe { xmlDocGetRootElement(self.as_ptr()) };
        Node::from_ptr(self, root)
    }

    /// Document URL (the file name for documents parsed from a path)
    pub fn url(&self) -> Option<String> {
        unsafe { xml_str((*self.as_ptr()).url) }
    }

    /// XML version from the declaration, e.g. `1.0`
    pub fn version(&self) -> Option<String> {
        unsafe { xml_str((*self.as_ptr()).version) }
    }

    /// Encoding from the declaration
    pub fn encoding(&self) -> Option<String> {
        unsafe { xml_str((*self.as_ptr()).encoding) }
    }

    /// Elements, comments, processing instructions and entity references in
    /// document order, including those outside the root element.
    pub fn nodes(&self) -> Nodes<'_> {
        Nodes {
            doc: self,
            next: unsafe { (*self.as_ptr()).children },
        }
    }

    /// The class assigned to a node during construction
    pub fn class_of(&self, node: Node<'_>) -> Option<&ElementClass> {
        self.classes.get(&(node.ptr as usize))
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("url", &self.url())
            .field("classified_nodes", &self.classes.len())
            .finish()
    }
}

/// Read-only handle to an element, comment, processing instruction or entity
/// reference of a [`Document`]
#[derive(Clone, Copy)]
pub struct Node<'a> {
    doc: &'a Document,
    ptr: NodePtr,
    kind: NodeKind,
}

impl<'a> Node<'a> {
    fn from_ptr(doc: &'a Document, ptr: NodePtr) -> Option<Self> {
        let kind = unsafe { tree::kind(ptr) }?;
        Some(Node { doc, ptr, kind })
    }

    pub(crate) fn as_ptr(&self) -> NodePtr {
        self.ptr
    }

    pub fn document(&self) -> &'a Document {
        self.doc
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn is_element(&self) -> bool {
        self.kind == NodeKind::Element
    }

    /// Clark-notation tag for elements, the libxml2 node name otherwise
    pub fn tag(&self) -> String {
        if self.is_element() {
            unsafe { tree::namespaced_name(self.ptr) }
        } else {
            unsafe { xml_str((*self.ptr).name) }.unwrap_or_default()
        }
    }

    pub fn prefix(&self) -> Option<String> {
        if self.is_element() {
            unsafe { tree::prefix(self.ptr) }
        } else {
            None
        }
    }

    /// Element text, or the content of comments and processing instructions
    pub fn text(&self) -> Option<String> {
        match self.kind {
            NodeKind::Element => unsafe { tree::text(self.ptr) },
            NodeKind::Comment | NodeKind::ProcessingInstruction => unsafe {
                xml_str((*self.ptr).content)
            },
            NodeKind::EntityReference => None,
        }
    }

    pub fn tail(&self) -> Option<String> {
        unsafe { tree::tail(self.ptr) }
    }

    pub fn sourceline(&self) -> Option<u64> {
        unsafe { tree::source_line(self.ptr) }
    }

    /// Attribute value by bare name or `{namespace}name`
    pub fn get(&self, key: &str) -> Option<String> {
        if self.is_element() {
            unsafe { tree::attribute_value(self.ptr, key) }
        } else {
            None
        }
    }

    pub fn parent(&self) -> Option<Node<'a>> {
        Node::from_ptr(self.doc, unsafe { tree::parent_element(self.ptr) })
    }

    /// Element children in document order
    pub fn children(&self) -> Vec<Node<'a>> {
        if !self.is_element() {
            return Vec::new();
        }
        unsafe { tree::child_elements(self.ptr) }
            .into_iter()
            .filter_map(|child| Node::from_ptr(self.doc, child))
            .collect()
    }

    /// The class assigned to this node during construction
    pub fn class(&self) -> Option<&'a ElementClass> {
        self.doc.class_of(*self)
    }
}

impl PartialEq for Node<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl Eq for Node<'_> {}

impl fmt::Debug for Node<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("kind", &self.kind)
            .field("tag", &self.tag())
            .finish()
    }
}

/// Iterator over the classifiable nodes of a document, see [`Document::nodes`]
pub struct Nodes<'a> {
    doc: &'a Document,
    next: NodePtr,
}

impl<'a> Iterator for Nodes<'a> {
    type Item = Node<'a>;

    fn next(&mut self) -> Option<Node<'a>> {
        while !self.next.is_null() {
            let current = self.next;
            self.next = unsafe { tree::next_in_document_order(current) };
            if let Some(node) = Node::from_ptr(self.doc, current) {
                return Some(node);
            }
        }
        None
    }
}

/// Copy the subtree rooted at `node` into a new, independent document.
pub(crate) fn copy_doc_root(node: Node<'_>) -> DocumentResult<DocPtr> {
    unsafe {
        let copy = DocPtr::from_raw(xmlCopyDoc(node.document().as_ptr(), 0))?;
        let root = xmlDocCopyNode(node.as_ptr(), copy.as_ptr(), 1);
        if root.is_null() {
            return Err(DocumentError::MemoryAllocation);
        }
        xmlDocSetRootElement(copy.as_ptr(), root);
        Ok(copy)
    }
}

/// Artificial single-root view of an element
///
/// Presents `node` as the root of a stand-in document without copying its
/// descendants: a shallow copy of the element becomes the root and temporarily
/// adopts the original children. Dropping the view hands the children back and
/// frees the stand-in. When `node` already is the root element the document itself
/// is used.
pub(crate) struct ArtificialRoot<'a> {
    base: *mut XmlDoc,
    view: *mut XmlDoc,
    original: NodePtr,
    stand_in: NodePtr,
    _doc: PhantomData<&'a Document>,
}

impl<'a> ArtificialRoot<'a> {
    /// Fails for anything but an element: the children of other node kinds can be
    /// declarations owned elsewhere in the document.
    pub(crate) fn new(node: Node<'a>) -> DocumentResult<Self> {
        if !node.is_element() {
            return Err(DocumentError::NotAnElement { kind: node.kind() });
        }
        let base = node.document().as_ptr();
        let original = node.as_ptr();
        unsafe {
            if (*original).prev.is_null()
                && (*original).next.is_null()
                && xmlDocGetRootElement(base) == original
            {
                return Ok(ArtificialRoot {
                    base,
                    view: base,
                    original,
                    stand_in: original,
                    _doc: PhantomData,
                });
            }

            let view = xmlCopyDoc(base, 0);
            if view.is_null() {
                return Err(DocumentError::MemoryAllocation);
            }
            let root = xmlDocCopyNode(original, view, 2);
            if root.is_null() {
                xmlFreeDoc(view);
                return Err(DocumentError::MemoryAllocation);
            }
            xmlDocSetRootElement(view, root);
            tree::copy_parent_namespaces(original, root);

            (*root).children = (*original).children;
            (*root).last = (*original).last;
            (*root).next = std::ptr::null_mut();
            (*root).prev = std::ptr::null_mut();
            let mut child = (*root).children;
            while !child.is_null() {
                (*child).parent = root;
                child = (*child).next;
            }

            Ok(ArtificialRoot {
                base,
                view,
                original,
                stand_in: root,
                _doc: PhantomData,
            })
        }
    }

    pub(crate) fn as_ptr(&self) -> *mut XmlDoc {
        self.view
    }

    pub(crate) fn is_base(&self) -> bool {
        self.view == self.base
    }
}

impl Drop for ArtificialRoot<'_> {
    fn drop(&mut self) {
        if self.is_base() {
            return;
        }
        unsafe {
            let root = self.stand_in;
            let mut child = (*root).children;
            while !child.is_null() {
                (*child).parent = self.original;
                child = (*child).next;
            }
            (*root).children = std::ptr::null_mut();
            (*root).last = std::ptr::null_mut();
            xmlFreeDoc(self.view);
        }
    }
}
