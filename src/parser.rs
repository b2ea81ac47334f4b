//! Document construction
//!
//! [`XmlParser`] turns XML text or files into a [`Document`] and runs its class
//! lookup over every classifiable node before handing the document out.

use std::collections::HashMap;
use std::ffi::CString;
use std::fmt;
use std::path::Path;

use libc::{c_char, c_int};
use tracing::debug;

use crate::config::{Config, ParserOptions};
use crate::document::Document;
use crate::error::{DocumentError, DocumentResult, summarize};
use crate::error_log::ErrorLog;
use crate::libxml2::{self, DocPtr, XmlDoc, xmlReadFile, xmlReadMemory};
use crate::lookup::{ClassLookup, DefaultClassLookup};

/// XML parser with a pluggable element class lookup
pub struct XmlParser {
    options: ParserOptions,
    lookup: Box<dyn ClassLookup>,
    error_log: ErrorLog,
}

impl XmlParser {
    pub fn new(options: ParserOptions) -> Self {
        XmlParser {
            options,
            lookup: Box::new(DefaultClassLookup::new()),
            error_log: ErrorLog::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        XmlParser {
            options: config.parser.clone(),
            lookup: Box::new(DefaultClassLookup::new()),
            error_log: ErrorLog::with_capacity(config.validation.max_log_entries),
        }
    }

    pub fn with_class_lookup(mut self, lookup: impl ClassLookup + 'static) -> Self {
        self.lookup = Box::new(lookup);
        self
    }

    pub fn options(&self) -> &ParserOptions {
        &self.options
    }

    /// Diagnostics of the most recent parse
    pub fn error_log(&self) -> &ErrorLog {
        &self.error_log
    }

    pub fn parse_str(&self, xml: &str) -> DocumentResult<Document> {
        self.parse_bytes(xml.as_bytes(), None)
    }

    /// Parse an in-memory document; `url` becomes the document URL used in
    /// diagnostics and for resolving relative references.
    pub fn parse_bytes(&self, xml: &[u8], url: Option<&str>) -> DocumentResult<Document> {
        let size = c_int::try_from(xml.len())
            .map_err(|_| DocumentError::InputTooLarge { size: xml.len() })?;
        let c_url = url
            .map(CString::new)
            .transpose()
            .map_err(|_| DocumentError::InvalidPath {
                path: url.unwrap_or_default().into(),
            })?;

        let doc = self.read(|flags| unsafe {
            xmlReadMemory(
                xml.as_ptr() as *const c_char,
                size,
                c_url.as_ref().map_or(std::ptr::null(), |url| url.as_ptr()),
                std::ptr::null(),
                flags,
            )
        })?;
        self.build(doc)
    }

    pub fn parse_file(&self, path: &Path) -> DocumentResult<Document> {
        let c_path = path
            .to_str()
            .and_then(|path| CString::new(path).ok())
            .ok_or_else(|| DocumentError::InvalidPath {
                path: path.to_path_buf(),
            })?;

        let doc = self.read(|flags| unsafe {
            xmlReadFile(c_path.as_ptr(), std::ptr::null(), flags)
        })?;
        self.build(doc)
    }

    fn read(&self, read: impl FnOnce(c_int) -> *mut XmlDoc) -> DocumentResult<DocPtr> {
        libxml2::init();
        self.error_log.clear();
        let raw = {
            let _lock = libxml2::parser_lock();
            let _connection = self.error_log.connect();
            read(self.options.to_flags())
        };

        if raw.is_null() {
            let log = self.error_log.entries();
            return Err(DocumentError::Syntax {
                message: summarize(&log, "document could not be parsed"),
                log,
            });
        }
        unsafe { DocPtr::from_raw(raw) }
    }

    fn build(&self, doc: DocPtr) -> DocumentResult<Document> {
        let mut document = Document::new(doc);
        let mut classes = HashMap::new();
        for node in document.nodes() {
            let class = self.lookup.lookup(&document, node)?;
            classes.insert(node.as_ptr() as usize, class);
        }
        debug!(
            url = document.url().as_deref().unwrap_or("<string>"),
            nodes = classes.len(),
            "document constructed"
        );
        document.set_classes(classes);
        Ok(document)
    }
}

impl Default for XmlParser {
    fn default() -> Self {
        Self::new(ParserOptions::default())
    }
}

impl fmt::Debug for XmlParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XmlParser")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_log::LogLevel;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_str() {
        let doc = XmlParser::default()
            .parse_str(r#"<?xml version="1.0" encoding="UTF-8"?><root/>"#)
            .unwrap();
        assert_eq!(doc.root().unwrap().tag(), "root");
        assert_eq!(doc.version().as_deref(), Some("1.0"));
        assert_eq!(doc.encoding().as_deref(), Some("UTF-8"));
    }

    #[test]
    fn test_syntax_error_collects_log() {
        let parser = XmlParser::default();
        let err = parser.parse_str("<root><unclosed></root>").unwrap_err();
        match err {
            DocumentError::Syntax { log, .. } => {
                assert!(!log.is_empty());
                assert!(log.iter().any(|entry| entry.level >= LogLevel::Error));
            }
            other => panic!("Expected syntax error, got {other:?}"),
        }
        assert!(parser.error_log().last_error().is_some());
    }

    #[test]
    fn test_successful_parse_clears_log() {
        let parser = XmlParser::default();
        assert!(parser.parse_str("<broken").is_err());
        parser.parse_str("<fine/>").unwrap();
        assert!(parser.error_log().last_error().is_none());
    }

    #[test]
    fn test_parse_bytes_with_url() {
        let doc = XmlParser::default()
            .parse_bytes(b"<root/>", Some("memory.xml"))
            .unwrap();
        assert_eq!(doc.url().as_deref(), Some("memory.xml"));
    }

    #[test]
    fn test_parse_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "<root>\n  <child/>\n</root>").unwrap();

        let doc = XmlParser::default().parse_file(file.path()).unwrap();
        let child = doc.root().unwrap().children()[0];
        assert_eq!(child.tag(), "child");
        assert_eq!(child.sourceline(), Some(2));
    }

    #[test]
    fn test_parse_missing_file() {
        let result = XmlParser::default().parse_file(Path::new("/nonexistent/doc.xml"));
        assert!(matches!(result, Err(DocumentError::Syntax { .. })));
    }

    #[test]
    fn test_every_node_is_classified() {
        let doc = XmlParser::default()
            .parse_str("<?pi data?><root><!-- c --><a/></root>")
            .unwrap();
        let classes: Vec<&str> = doc
            .nodes()
            .map(|node| node.class().unwrap().name())
            .collect();
        assert_eq!(
            classes,
            vec!["ProcessingInstruction", "Element", "Comment", "Element"]
        );
    }
}
