//! # schematron-proxy Library
//!
//! Schematron validation and proxy-based element classification on top of libxml2.
//!
//! Two subsystems share the parsed document model:
//!
//! - [`Schematron`] compiles a rule schema once and validates documents, or single
//!   elements of them, returning whether they conform.
//! - [`HookClassLookup`] consults a user [`ClassificationHook`] for every element
//!   while a document is built. The hook sees a read-only [`ProxyNode`] that is
//!   invalidated as soon as the hook returns.

pub mod config;
pub mod document;
pub mod error;
pub mod error_log;
pub mod libxml2;
pub mod lookup;
pub mod parser;
pub mod proxy;
pub mod schematron;
pub mod tree;

pub use config::{Config, ConfigError, ConfigManager, ParserOptions, ValidationOptions};
pub use document::{Document, Node, Nodes};
pub use error::{
    DocumentError, Error, LookupError, ProxyError, Result, SchematronError,
};
pub use error_log::{ErrorLog, LogEntry, LogLevel};
pub use libxml2::LibraryVersion;
pub use lookup::{
    AttributeClassLookup, ClassLookup, ClassificationHook, DefaultClassLookup, ElementClass,
    HookClassLookup,
};
pub use parser::XmlParser;
pub use proxy::{ProxyChildren, ProxyGraph, ProxyNode};
pub use schematron::{
    SchemaSource, Schematron, SchematronOutput, ValidationOutcome, ValidationReport,
};
pub use tree::NodeKind;
