//! Schematron validation
//!
//! A [`Schematron`] owns a schema compiled by libxml2 and validates documents, or
//! any element of a document, against it. Compilation holds the crate-wide parser
//! lock; validation does not, so one validator can serve many threads.

use std::ffi::CString;
use std::fmt;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use libc::c_int;
use tracing::debug;

use crate::config::ValidationOptions;
use crate::document::{ArtificialRoot, Document, Node, copy_doc_root};
use crate::error::{DocumentError, SchematronError, SchematronResult, summarize};
use crate::error_log::{ErrorLog, LogEntry, structured_error_callback};
use crate::libxml2::{
    self, DocPtr, LibraryVersion, XML_SCHEMATRON_OUT_ERROR, XML_SCHEMATRON_OUT_QUIET,
    XML_SCHEMATRON_OUT_XML, XmlDoc, XmlSchematron, XmlSchematronParserCtxt,
    XmlSchematronValidCtxt, xmlSchematronFree, xmlSchematronFreeParserCtxt,
    xmlSchematronFreeValidCtxt, xmlSchematronNewDocParserCtxt, xmlSchematronNewParserCtxt,
    xmlSchematronNewValidCtxt, xmlSchematronParse, xmlSchematronSetValidStructuredErrors,
    xmlSchematronValidateDoc,
};

/// Where a schema is compiled from
#[derive(Debug, Clone)]
pub enum SchemaSource<'a> {
    /// A schema element of a parsed document; its subtree is copied
    Element(Node<'a>),
    /// A schema file
    Path(PathBuf),
}

impl<'a> SchemaSource<'a> {
    /// Build a source from optional inputs; exactly one must be given
    pub fn from_parts(element: Option<Node<'a>>, path: Option<&Path>) -> SchematronResult<Self> {
        match (element, path) {
            (Some(element), None) => Ok(SchemaSource::Element(element)),
            (None, Some(path)) => Ok(SchemaSource::Path(path.to_path_buf())),
            (None, None) => Err(SchematronError::Parse {
                message: "no tree or file given".to_string(),
                log: Vec::new(),
            }),
            (Some(_), Some(_)) => Err(SchematronError::Parse {
                message: "either a tree or a file may be given, not both".to_string(),
                log: Vec::new(),
            }),
        }
    }
}

/// libxml2 Schematron reporting flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchematronOutput(c_int);

impl SchematronOutput {
    /// Structured error reporting exists from libxml2 2.6.32 on; older versions can
    /// only be kept quiet.
    pub fn for_version(version: LibraryVersion) -> Self {
        if version >= LibraryVersion::new(2, 6, 32) {
            SchematronOutput(XML_SCHEMATRON_OUT_ERROR)
        } else {
            SchematronOutput(XML_SCHEMATRON_OUT_QUIET | XML_SCHEMATRON_OUT_XML)
        }
    }

    pub fn flags(&self) -> c_int {
        self.0
    }
}

/// Result of evaluating a schema, translated from the libxml2 status code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationOutcome {
    Valid,
    Invalid { code: c_int },
    InternalError { code: c_int },
}

impl ValidationOutcome {
    pub fn from_code(code: c_int) -> Self {
        match code {
            0 => ValidationOutcome::Valid,
            code if code > 0 => ValidationOutcome::Invalid { code },
            code => ValidationOutcome::InternalError { code },
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationOutcome::Valid)
    }
}

/// A compiled schema and the document it was compiled from
///
/// libxml2 keeps pointers into the schema document, so the document is freed only
/// after the schema.
pub(crate) struct CompiledSchema {
    ptr: *mut XmlSchematron,
    schema_doc: Option<DocPtr>,
}

// The compiled schema is never mutated after compilation and validation contexts
// only read from it.
unsafe impl Send for CompiledSchema {}
unsafe impl Sync for CompiledSchema {}

impl Drop for CompiledSchema {
    fn drop(&mut self) {
        unsafe { xmlSchematronFree(self.ptr) };
        self.schema_doc.take();
    }
}

/// Frees the schema parser context on every path
struct ParserContext(*mut XmlSchematronParserCtxt);

impl Drop for ParserContext {
    fn drop(&mut self) {
        unsafe { xmlSchematronFreeParserCtxt(self.0) };
    }
}

/// Per-call validation context
pub(crate) struct ValidationSession<'s> {
    ctxt: *mut XmlSchematronValidCtxt,
    _schema: PhantomData<&'s CompiledSchema>,
}

impl<'s> ValidationSession<'s> {
    fn new(schema: &'s CompiledSchema, output: SchematronOutput) -> SchematronResult<Self> {
        let ctxt = unsafe { xmlSchematronNewValidCtxt(schema.ptr, output.flags()) };
        if ctxt.is_null() {
            return Err(SchematronError::Memory("Schematron validation context"));
        }
        Ok(ValidationSession {
            ctxt,
            _schema: PhantomData,
        })
    }

    fn capture_errors(&self, log: &ErrorLog) {
        unsafe {
            xmlSchematronSetValidStructuredErrors(
                self.ctxt,
                Some(structured_error_callback),
                log.as_user_data(),
            );
        }
    }

    fn run(&self, doc: *mut XmlDoc) -> ValidationOutcome {
        ValidationOutcome::from_code(unsafe { xmlSchematronValidateDoc(self.ctxt, doc) })
    }
}

impl Drop for ValidationSession<'_> {
    fn drop(&mut self) {
        unsafe { xmlSchematronFreeValidCtxt(self.ctxt) };
    }
}

/// A Schematron validator
///
/// # Examples
///
/// ```no_run
/// use schematron_proxy::{Schematron, XmlParser};
///
/// let parser = XmlParser::default();
/// let schema = parser.parse_file("rules.sch".as_ref())?;
/// let validator = Schematron::from_element(schema.root().unwrap())?;
///
/// let doc = parser.parse_str("<AAA><BBB/><CCC/></AAA>")?;
/// assert!(validator.validate_document(&doc)?);
/// # Ok::<(), schematron_proxy::Error>(())
/// ```
pub struct Schematron {
    schema: CompiledSchema,
    log_capacity: usize,
    last_log: Mutex<Vec<LogEntry>>,
    output: SchematronOutput,
}

/// Outcome of one validation call together with the diagnostics it produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub valid: bool,
    pub log: Vec<LogEntry>,
}

impl Schematron {
    pub fn compile(source: SchemaSource<'_>) -> SchematronResult<Self> {
        Self::with_options(source, &ValidationOptions::default())
    }

    pub fn with_options(
        source: SchemaSource<'_>,
        options: &ValidationOptions,
    ) -> SchematronResult<Self> {
        libxml2::init();
        if !libxml2::has_schematron() {
            return Err(SchematronError::Configuration(
                "libxml2 was built without Schematron support".to_string(),
            ));
        }

        let error_log = ErrorLog::with_capacity(options.max_log_entries);
        let (context, schema_doc) = match &source {
            SchemaSource::Element(element) => {
                let doc = copy_doc_root(*element)
                    .map_err(|_| SchematronError::Memory("Schematron schema document copy"))?;
                let ctxt = unsafe { xmlSchematronNewDocParserCtxt(doc.as_ptr()) };
                (ctxt, Some(doc))
            }
            SchemaSource::Path(path) => {
                let c_path = path
                    .to_str()
                    .and_then(|path| CString::new(path).ok())
                    .ok_or_else(|| SchematronError::Parse {
                        message: format!("invalid schema path: {}", path.display()),
                        log: Vec::new(),
                    })?;
                let ctxt = unsafe { xmlSchematronNewParserCtxt(c_path.as_ptr()) };
                (ctxt, None)
            }
        };
        if context.is_null() {
            return Err(SchematronError::Memory("Schematron parser context"));
        }
        let context = ParserContext(context);

        let ptr = {
            let _lock = libxml2::parser_lock();
            let _connection = error_log.connect();
            unsafe { xmlSchematronParse(context.0) }
        };
        drop(context);

        if ptr.is_null() {
            let log = error_log.entries();
            return Err(SchematronError::Parse {
                message: summarize(&log, "Document is not a valid Schematron schema"),
                log,
            });
        }

        debug!(
            source = %SourceLabel(&source),
            version = %LibraryVersion::current(),
            "Schematron schema compiled"
        );

        Ok(Schematron {
            schema: CompiledSchema { ptr, schema_doc },
            log_capacity: options.max_log_entries,
            last_log: Mutex::new(error_log.entries()),
            output: SchematronOutput::for_version(LibraryVersion::current()),
        })
    }

    /// Compile the schema rooted at `element`
    pub fn from_element(element: Node<'_>) -> SchematronResult<Self> {
        Self::compile(SchemaSource::Element(element))
    }

    pub fn from_file(path: impl AsRef<Path>) -> SchematronResult<Self> {
        Self::compile(SchemaSource::Path(path.as_ref().to_path_buf()))
    }

    /// Validate the subtree rooted at `node` as if it were a document of its own
    ///
    /// Returns `Ok(false)` when the subtree violates the schema. Errors are reserved
    /// for failures of the validation machinery and for nodes that are not elements.
    pub fn validate(&self, node: Node<'_>) -> SchematronResult<bool> {
        self.check(node).map(|report| report.valid)
    }

    /// Like [`Schematron::validate`], also returning the diagnostics of this call
    ///
    /// Every call collects into its own log, so concurrent calls on one validator
    /// never see each other's entries.
    pub fn check(&self, node: Node<'_>) -> SchematronResult<ValidationReport> {
        if !node.is_element() {
            return Err(SchematronError::NotAnElement { kind: node.kind() });
        }

        let error_log = ErrorLog::with_capacity(self.log_capacity);
        let outcome = {
            let session = ValidationSession::new(&self.schema, self.output)?;
            let root = ArtificialRoot::new(node).map_err(|err| match err {
                DocumentError::NotAnElement { kind } => SchematronError::NotAnElement { kind },
                _ => SchematronError::Memory("artificial root document"),
            })?;
            let _connection = error_log.connect();
            session.capture_errors(&error_log);
            session.run(root.as_ptr())
        };
        let log = error_log.entries();
        self.remember(&log);

        debug!(
            tag = %node.tag(),
            outcome = ?outcome,
            messages = log.len(),
            "Schematron validation finished"
        );

        match outcome {
            ValidationOutcome::Valid => Ok(ValidationReport { valid: true, log }),
            ValidationOutcome::Invalid { .. } => Ok(ValidationReport { valid: false, log }),
            ValidationOutcome::InternalError { code } => {
                Err(SchematronError::Validate { code, log })
            }
        }
    }

    pub fn validate_document(&self, doc: &Document) -> SchematronResult<bool> {
        let root = doc.root().ok_or(SchematronError::NoRootElement)?;
        self.validate(root)
    }

    /// Diagnostics of the most recently finished compile or validate call
    pub fn error_log(&self) -> Vec<LogEntry> {
        self.last_log
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn remember(&self, log: &[LogEntry]) {
        *self
            .last_log
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = log.to_vec();
    }

    pub fn output(&self) -> SchematronOutput {
        self.output
    }
}

impl fmt::Debug for Schematron {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schematron")
            .field("output", &self.output)
            .field("from_element", &self.schema.schema_doc.is_some())
            .finish_non_exhaustive()
    }
}

struct SourceLabel<'s, 'a>(&'s SchemaSource<'a>);

impl fmt::Display for SourceLabel<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            SchemaSource::Element(element) => write!(f, "element {}", element.tag()),
            SchemaSource::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::XmlParser;

    const SCHEMA: &str = r#"<schema xmlns="http://purl.oclc.org/dsdl/schematron">
  <pattern id="OpenModel">
    <rule context="AAA">
      <assert test="BBB">BBB element is not present</assert>
      <assert test="CCC">CCC element is not present</assert>
    </rule>
  </pattern>
</schema>"#;

    #[test]
    fn test_output_for_version() {
        assert_eq!(
            SchematronOutput::for_version(LibraryVersion::new(2, 9, 14)).flags(),
            XML_SCHEMATRON_OUT_ERROR
        );
        assert_eq!(
            SchematronOutput::for_version(LibraryVersion::new(2, 6, 32)).flags(),
            XML_SCHEMATRON_OUT_ERROR
        );
        assert_eq!(
            SchematronOutput::for_version(LibraryVersion::new(2, 6, 31)).flags(),
            XML_SCHEMATRON_OUT_QUIET | XML_SCHEMATRON_OUT_XML
        );
    }

    #[test]
    fn test_outcome_from_code() {
        assert_eq!(ValidationOutcome::from_code(0), ValidationOutcome::Valid);
        assert_eq!(
            ValidationOutcome::from_code(3),
            ValidationOutcome::Invalid { code: 3 }
        );
        assert_eq!(
            ValidationOutcome::from_code(-1),
            ValidationOutcome::InternalError { code: -1 }
        );
        assert!(ValidationOutcome::Valid.is_valid());
        assert!(!ValidationOutcome::Invalid { code: 1 }.is_valid());
    }

    #[test]
    fn test_source_from_parts() {
        let doc = XmlParser::default().parse_str(SCHEMA).unwrap();
        let root = doc.root().unwrap();
        let path = Path::new("rules.sch");

        assert!(matches!(
            SchemaSource::from_parts(Some(root), None),
            Ok(SchemaSource::Element(_))
        ));
        assert!(matches!(
            SchemaSource::from_parts(None, Some(path)),
            Ok(SchemaSource::Path(_))
        ));

        let err = SchemaSource::from_parts(None, None).unwrap_err();
        assert!(err.to_string().contains("no tree or file given"));
        assert!(matches!(
            SchemaSource::from_parts(Some(root), Some(path)),
            Err(SchematronError::Parse { .. })
        ));
    }

    #[test]
    fn test_schema_outlives_source_document() {
        let validator = {
            let doc = XmlParser::default().parse_str(SCHEMA).unwrap();
            Schematron::from_element(doc.root().unwrap()).unwrap()
        };
        let doc = XmlParser::default()
            .parse_str("<AAA><BBB/></AAA>")
            .unwrap();
        assert!(!validator.validate_document(&doc).unwrap());
    }

    #[test]
    fn test_non_element_is_rejected_before_validation() {
        let validator = {
            let doc = XmlParser::default().parse_str(SCHEMA).unwrap();
            Schematron::from_element(doc.root().unwrap()).unwrap()
        };
        let doc = XmlParser::default()
            .parse_str("<AAA><!-- note --><BBB/><CCC/></AAA>")
            .unwrap();
        let comment = doc.nodes().nth(1).unwrap();

        let err = validator.check(comment).unwrap_err();
        assert!(matches!(
            err,
            SchematronError::NotAnElement {
                kind: crate::tree::NodeKind::Comment
            }
        ));
        assert!(validator.validate_document(&doc).unwrap());
    }

    #[test]
    fn test_check_reports_its_own_log() {
        let validator = {
            let doc = XmlParser::default().parse_str(SCHEMA).unwrap();
            Schematron::from_element(doc.root().unwrap()).unwrap()
        };
        let doc = XmlParser::default().parse_str("<AAA><BBB/></AAA>").unwrap();

        let report = validator.check(doc.root().unwrap()).unwrap();
        assert!(!report.valid);
        assert_eq!(validator.error_log(), report.log);
    }

    #[test]
    fn test_validator_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Schematron>();
    }
}
