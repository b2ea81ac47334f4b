mod common;

use std::cell::{Cell, RefCell};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use schematron_proxy::{
    AttributeClassLookup, ClassificationHook, DefaultClassLookup, Document, DocumentError,
    ElementClass, HookClassLookup, LookupError, NodeKind, ProxyNode, XmlParser,
};

use common::fixtures::{MIXED, NAMESPACED};

const DOC: &str = r#"<?pi data?><root kind="top"><item n="1"/><!-- c --><item n="2"><leaf/></item></root>"#;

fn class_names(doc: &Document) -> Vec<String> {
    doc.nodes()
        .map(|node| node.class().unwrap().name().to_string())
        .collect()
}

struct Abstain;

impl ClassificationHook for Abstain {}

#[test]
fn test_abstaining_hook_matches_no_hook() {
    let plain = XmlParser::default().parse_str(DOC).unwrap();
    let hooked = XmlParser::default()
        .with_class_lookup(HookClassLookup::new(Abstain))
        .parse_str(DOC)
        .unwrap();
    let closure = XmlParser::default()
        .with_class_lookup(HookClassLookup::new(
            |_: &Document, _: &ProxyNode| -> anyhow::Result<Option<ElementClass>> { Ok(None) },
        ))
        .parse_str(DOC)
        .unwrap();

    assert_eq!(class_names(&plain), class_names(&hooked));
    assert_eq!(class_names(&plain), class_names(&closure));
    assert_eq!(
        class_names(&plain),
        vec!["ProcessingInstruction", "Element", "Element", "Comment", "Element", "Element"]
    );
}

#[test]
fn test_abstaining_hook_uses_configured_fallback() {
    let fallback = DefaultClassLookup::new()
        .with_element("Custom")
        .with_comment("Remark");
    let doc = XmlParser::default()
        .with_class_lookup(HookClassLookup::new(Abstain).with_fallback(fallback))
        .parse_str(MIXED)
        .unwrap();

    assert_eq!(class_names(&doc), vec!["Custom", "Custom", "Remark", "Custom"]);
}

#[test]
fn test_hook_called_once_per_element() {
    let calls = Rc::new(Cell::new(0usize));
    let counter = Rc::clone(&calls);
    let hook = move |_: &Document, _: &ProxyNode| -> anyhow::Result<Option<ElementClass>> {
        counter.set(counter.get() + 1);
        Ok(None)
    };

    XmlParser::default()
        .with_class_lookup(HookClassLookup::new(hook))
        .parse_str(DOC)
        .unwrap();

    assert_eq!(calls.get(), 4);
}

#[test]
fn test_hook_classifies_by_structure() {
    let hook = |_: &Document, element: &ProxyNode| -> anyhow::Result<Option<ElementClass>> {
        let class = if element.parent().is_none() {
            Some(ElementClass::element("Root"))
        } else if element.has_children() {
            Some(ElementClass::element("Branch"))
        } else if element.get("n").is_some() {
            Some(ElementClass::element(format!("Item{}", element.get_or("n", "?"))))
        } else {
            None
        };
        Ok(class)
    };

    let doc = XmlParser::default()
        .with_class_lookup(HookClassLookup::new(hook))
        .parse_str(DOC)
        .unwrap();

    assert_eq!(
        class_names(&doc),
        vec!["ProcessingInstruction", "Root", "Item1", "Comment", "Branch", "Element"]
    );
}

#[test]
fn test_hook_sees_siblings_and_document() {
    let hook = |doc: &Document, element: &ProxyNode| -> anyhow::Result<Option<ElementClass>> {
        assert!(doc.root().is_some());
        let after_first = element
            .previous_sibling()
            .map(|sibling| sibling.tag() == "item")
            .unwrap_or(false);
        Ok(after_first.then(|| ElementClass::element("Second")))
    };

    let doc = XmlParser::default()
        .with_class_lookup(HookClassLookup::new(hook))
        .parse_str(DOC)
        .unwrap();
    let root = doc.root().unwrap();
    let classes: Vec<&str> = root
        .children()
        .iter()
        .map(|child| child.class().unwrap().name())
        .collect();
    assert_eq!(classes, vec!["Element", "Second"]);
}

#[test]
fn test_hook_with_namespaced_lookup() {
    let hook = |_: &Document, element: &ProxyNode| -> anyhow::Result<Option<ElementClass>> {
        let Some(key) = element.resolve_qname("p:kind") else {
            return Ok(None);
        };
        Ok(element
            .get(&key)
            .map(|kind| ElementClass::element(format!("Kind-{kind}"))))
    };

    let doc = XmlParser::default()
        .with_class_lookup(HookClassLookup::new(hook))
        .parse_str(NAMESPACED)
        .unwrap();
    assert_eq!(class_names(&doc), vec!["Element", "Kind-a", "Element"]);
}

#[test]
fn test_incompatible_class_is_rejected() {
    let hook = |_: &Document, _: &ProxyNode| -> anyhow::Result<Option<ElementClass>> {
        Ok(Some(ElementClass::comment("NotAnElement")))
    };

    let err = XmlParser::default()
        .with_class_lookup(HookClassLookup::new(hook))
        .parse_str(MIXED)
        .unwrap_err();

    match err {
        DocumentError::Lookup(LookupError::IncompatibleClass {
            class,
            expected,
            found,
        }) => {
            assert_eq!(class, "NotAnElement");
            assert_eq!(expected, NodeKind::Element);
            assert_eq!(found, NodeKind::Comment);
        }
        other => panic!("Expected incompatible class error, got {other:?}"),
    }
}

#[test]
fn test_hook_error_propagates() {
    let hook = |_: &Document, element: &ProxyNode| -> anyhow::Result<Option<ElementClass>> {
        if element.tag() == "leaf" {
            anyhow::bail!("leaf elements are not allowed");
        }
        Ok(None)
    };

    let err = XmlParser::default()
        .with_class_lookup(HookClassLookup::new(hook))
        .parse_str(DOC)
        .unwrap_err();

    assert!(matches!(err, DocumentError::Lookup(LookupError::Hook(_))));
    assert_eq!(err.to_string(), "leaf elements are not allowed");
}

#[test]
fn test_retained_proxy_is_invalidated() {
    let stash: Rc<RefCell<Vec<ProxyNode>>> = Rc::default();
    let keep = Rc::clone(&stash);
    let hook = move |_: &Document, element: &ProxyNode| -> anyhow::Result<Option<ElementClass>> {
        keep.borrow_mut().push(element.clone());
        keep.borrow_mut().extend(element.children());
        Ok(None)
    };

    let _doc = XmlParser::default()
        .with_class_lookup(HookClassLookup::new(hook))
        .parse_str(DOC)
        .unwrap();

    let stash = stash.borrow();
    assert!(stash.len() > 4);
    assert!(stash.iter().all(|proxy| !proxy.is_valid()));

    let first = stash[0].clone();
    let outcome = catch_unwind(AssertUnwindSafe(|| first.tag()));
    assert!(outcome.is_err());
}

#[test]
fn test_panicking_hook_still_invalidates() {
    let stash: Rc<RefCell<Option<ProxyNode>>> = Rc::default();
    let keep = Rc::clone(&stash);
    let hook = move |_: &Document, element: &ProxyNode| -> anyhow::Result<Option<ElementClass>> {
        *keep.borrow_mut() = Some(element.clone());
        panic!("hook failure");
    };
    let parser = XmlParser::default().with_class_lookup(HookClassLookup::new(hook));

    let outcome = catch_unwind(AssertUnwindSafe(|| parser.parse_str(MIXED)));
    assert!(outcome.is_err());

    let retained = stash.borrow_mut().take().unwrap();
    assert!(!retained.is_valid());
}

#[test]
fn test_attribute_lookup_as_fallback() {
    let fallback = AttributeClassLookup::new("n")
        .with_class("1", ElementClass::element("First"))
        .with_class("2", ElementClass::element("Second"));
    let doc = XmlParser::default()
        .with_class_lookup(HookClassLookup::new(Abstain).with_fallback(fallback))
        .parse_str(DOC)
        .unwrap();

    assert_eq!(
        class_names(&doc),
        vec!["ProcessingInstruction", "Element", "First", "Comment", "Second", "Element"]
    );
}

#[test]
fn test_attribute_lookup_namespaced_key() {
    let lookup = AttributeClassLookup::new("{urn:p}kind")
        .with_class("a", ElementClass::element("KindA"));
    let doc = XmlParser::default()
        .with_class_lookup(lookup)
        .parse_str(NAMESPACED)
        .unwrap();

    assert_eq!(class_names(&doc), vec!["Element", "KindA", "Element"]);
}

#[test]
fn test_attribute_lookup_rejects_non_element_class() {
    let lookup = AttributeClassLookup::new("n").with_class("1", ElementClass::entity("Wrong"));
    let err = XmlParser::default()
        .with_class_lookup(lookup)
        .parse_str(DOC)
        .unwrap_err();

    assert!(matches!(
        err,
        DocumentError::Lookup(LookupError::IncompatibleClass { .. })
    ));
}
