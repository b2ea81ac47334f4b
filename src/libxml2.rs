//! LibXML2 FFI Module
//!
//! Direct bindings to the parts of libxml2 this crate builds on: document parsing and
//! copying, the node structures the proxy layer walks, namespace-aware attribute
//! lookup, structured error reporting and the Schematron engine.
//!
//! ## Thread Safety Strategy
//!
//! - **Initialization**: `xmlInitParser` is not thread-safe and runs exactly once,
//!   guarded by `std::sync::Once`.
//! - **Parsing**: document and schema parsing are serialized through [`parser_lock`].
//! - **Validation**: Schematron evaluation runs without the lock; every call owns its
//!   own validation context and the compiled schema is only read.
//!
//! ## Struct layouts
//!
//! `XmlNode`, `XmlNs`, `XmlAttr` and the leading part of `XmlDoc` mirror the public
//! libxml2 headers (`tree.h`). Only pointers handed out by libxml2 are ever
//! dereferenced; none of these structs is constructed from Rust.

use std::ffi::{CStr, c_void};
use std::fmt;
use std::sync::{Mutex, MutexGuard, Once, OnceLock};

use libc::{c_char, c_int, c_long, c_uchar, c_ushort};

use crate::error::{DocumentError, DocumentResult};

/// Global initialization flag for libxml2
static LIBXML2_INIT: Once = Once::new();

/// Serializes calls into the libxml2 parsers (documents and schemas).
static PARSER_LOCK: Mutex<()> = Mutex::new(());

/// libxml2 `xmlChar`
pub type XmlChar = c_uchar;

// xmlElementType
pub const XML_ELEMENT_NODE: c_int = 1;
pub const XML_ATTRIBUTE_NODE: c_int = 2;
pub const XML_TEXT_NODE: c_int = 3;
pub const XML_CDATA_SECTION_NODE: c_int = 4;
pub const XML_ENTITY_REF_NODE: c_int = 5;
pub const XML_PI_NODE: c_int = 7;
pub const XML_COMMENT_NODE: c_int = 8;
pub const XML_DOCUMENT_NODE: c_int = 9;
pub const XML_XINCLUDE_START: c_int = 19;
pub const XML_XINCLUDE_END: c_int = 20;

// xmlParserOption
pub const XML_PARSE_RECOVER: c_int = 1 << 0;
pub const XML_PARSE_NOENT: c_int = 1 << 1;
pub const XML_PARSE_NOBLANKS: c_int = 1 << 8;
pub const XML_PARSE_NONET: c_int = 1 << 11;
pub const XML_PARSE_NOCDATA: c_int = 1 << 14;
pub const XML_PARSE_HUGE: c_int = 1 << 19;
pub const XML_PARSE_BIG_LINES: c_int = 1 << 22;

// xmlSchematronValidOptions
pub const XML_SCHEMATRON_OUT_QUIET: c_int = 1 << 0;
pub const XML_SCHEMATRON_OUT_TEXT: c_int = 1 << 1;
pub const XML_SCHEMATRON_OUT_XML: c_int = 1 << 2;
pub const XML_SCHEMATRON_OUT_ERROR: c_int = 1 << 3;

// xmlFeature
pub const XML_WITH_SCHEMATRON: c_int = 26;

#[repr(C)]
pub struct XmlNs {
    pub next: *mut XmlNs,
    pub ns_type: c_int,
    pub href: *const XmlChar,
    pub prefix: *const XmlChar,
    pub _private: *mut c_void,
    pub context: *mut XmlDoc,
}

#[repr(C)]
pub struct XmlNode {
    pub _private: *mut c_void,
    pub node_type: c_int,
    pub name: *const XmlChar,
    pub children: *mut XmlNode,
    pub last: *mut XmlNode,
    pub parent: *mut XmlNode,
    pub next: *mut XmlNode,
    pub prev: *mut XmlNode,
    pub doc: *mut XmlDoc,
    pub ns: *mut XmlNs,
    pub content: *mut XmlChar,
    pub properties: *mut XmlAttr,
    pub ns_def: *mut XmlNs,
    pub psvi: *mut c_void,
    pub line: c_ushort,
    pub extra: c_ushort,
}

/// Leading fields of `xmlAttr`
#[repr(C)]
pub struct XmlAttr {
    pub _private: *mut c_void,
    pub node_type: c_int,
    pub name: *const XmlChar,
    pub children: *mut XmlNode,
    pub last: *mut XmlNode,
    pub parent: *mut XmlNode,
    pub next: *mut XmlAttr,
    pub prev: *mut XmlAttr,
    pub doc: *mut XmlDoc,
    pub ns: *mut XmlNs,
}

/// Leading fields of `xmlDoc`
#[repr(C)]
pub struct XmlDoc {
    pub _private: *mut c_void,
    pub node_type: c_int,
    pub name: *mut c_char,
    pub children: *mut XmlNode,
    pub last: *mut XmlNode,
    pub parent: *mut XmlNode,
    pub next: *mut XmlNode,
    pub prev: *mut XmlNode,
    pub doc: *mut XmlDoc,
    pub compression: c_int,
    pub standalone: c_int,
    pub int_subset: *mut c_void,
    pub ext_subset: *mut c_void,
    pub old_ns: *mut XmlNs,
    pub version: *const XmlChar,
    pub encoding: *const XmlChar,
    pub ids: *mut c_void,
    pub refs: *mut c_void,
    pub url: *const XmlChar,
}

#[repr(C)]
pub struct XmlSchematron {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlSchematronParserCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlSchematronValidCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlError {
    pub domain: c_int,
    pub code: c_int,
    pub message: *const c_char,
    pub level: c_int,
    pub file: *const c_char,
    pub line: c_int,
    pub str1: *const c_char,
    pub str2: *const c_char,
    pub str3: *const c_char,
    pub int1: c_int,
    pub int2: c_int,
    pub ctxt: *mut c_void,
    pub node: *mut c_void,
}

pub type XmlStructuredErrorFunc =
    Option<unsafe extern "C" fn(user_data: *mut c_void, error: *mut XmlError)>;

pub type XmlFreeFunc = Option<unsafe extern "C" fn(mem: *mut c_void)>;

// External libxml2 FFI declarations
#[cfg_attr(target_os = "windows", link(name = "libxml2"))]
#[cfg_attr(not(target_os = "windows"), link(name = "xml2"))]
unsafe extern "C" {
    #[allow(non_upper_case_globals)]
    pub static xmlParserVersion: *const c_char;
    #[allow(non_upper_case_globals)]
    pub static xmlFree: XmlFreeFunc;

    pub fn xmlInitParser();
    pub fn xmlHasFeature(feature: c_int) -> c_int;

    // Documents
    pub fn xmlReadMemory(
        buffer: *const c_char,
        size: c_int,
        url: *const c_char,
        encoding: *const c_char,
        options: c_int,
    ) -> *mut XmlDoc;
    pub fn xmlReadFile(
        filename: *const c_char,
        encoding: *const c_char,
        options: c_int,
    ) -> *mut XmlDoc;
    pub fn xmlFreeDoc(doc: *mut XmlDoc);
    pub fn xmlCopyDoc(doc: *mut XmlDoc, recursive: c_int) -> *mut XmlDoc;
    pub fn xmlDocCopyNode(node: *mut XmlNode, doc: *mut XmlDoc, extended: c_int) -> *mut XmlNode;
    pub fn xmlDocGetRootElement(doc: *const XmlDoc) -> *mut XmlNode;
    pub fn xmlDocSetRootElement(doc: *mut XmlDoc, root: *mut XmlNode) -> *mut XmlNode;

    // Nodes
    pub fn xmlNewNs(node: *mut XmlNode, href: *const XmlChar, prefix: *const XmlChar)
    -> *mut XmlNs;
    pub fn xmlSearchNs(doc: *mut XmlDoc, node: *mut XmlNode, prefix: *const XmlChar)
    -> *mut XmlNs;
    pub fn xmlGetNsProp(
        node: *const XmlNode,
        name: *const XmlChar,
        namespace: *const XmlChar,
    ) -> *mut XmlChar;
    pub fn xmlGetNoNsProp(node: *const XmlNode, name: *const XmlChar) -> *mut XmlChar;
    pub fn xmlGetLineNo(node: *const XmlNode) -> c_long;

    // Errors
    pub fn xmlSetStructuredErrorFunc(ctx: *mut c_void, handler: XmlStructuredErrorFunc);

    // Schematron
    pub fn xmlSchematronNewParserCtxt(url: *const c_char) -> *mut XmlSchematronParserCtxt;
    pub fn xmlSchematronNewDocParserCtxt(doc: *mut XmlDoc) -> *mut XmlSchematronParserCtxt;
    pub fn xmlSchematronParse(ctxt: *mut XmlSchematronParserCtxt) -> *mut XmlSchematron;
    pub fn xmlSchematronFreeParserCtxt(ctxt: *mut XmlSchematronParserCtxt);
    pub fn xmlSchematronFree(schema: *mut XmlSchematron);
    pub fn xmlSchematronNewValidCtxt(
        schema: *mut XmlSchematron,
        options: c_int,
    ) -> *mut XmlSchematronValidCtxt;
    pub fn xmlSchematronFreeValidCtxt(ctxt: *mut XmlSchematronValidCtxt);
    pub fn xmlSchematronSetValidStructuredErrors(
        ctxt: *mut XmlSchematronValidCtxt,
        serror: XmlStructuredErrorFunc,
        ctx: *mut c_void,
    );
    pub fn xmlSchematronValidateDoc(ctxt: *mut XmlSchematronValidCtxt, doc: *mut XmlDoc) -> c_int;
}

/// Initialize libxml2 exactly once, in a thread-safe manner.
pub fn init() {
    LIBXML2_INIT.call_once(|| unsafe {
        xmlInitParser();
    });
}

/// Acquire the lock that serializes libxml2 parser entry points.
///
/// A poisoned lock is recovered: the guarded state lives inside libxml2, not in the
/// mutex.
pub(crate) fn parser_lock() -> MutexGuard<'static, ()> {
    PARSER_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Whether the linked libxml2 was built with Schematron support.
pub fn has_schematron() -> bool {
    init();
    unsafe { xmlHasFeature(XML_WITH_SCHEMATRON) != 0 }
}

/// Version of the linked libxml2, e.g. `20914` for 2.9.14.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LibraryVersion(u32);

impl LibraryVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        LibraryVersion(major * 10000 + minor * 100 + patch)
    }

    pub const fn from_number(number: u32) -> Self {
        LibraryVersion(number)
    }

    /// Parse the leading digits of a `xmlParserVersion` string such as
    /// `"21004"` or `"20914-GITv2.9.14"`.
    pub fn parse(version: &str) -> Option<Self> {
        let digits: String = version
            .trim()
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits.parse().ok().map(LibraryVersion)
    }

    /// The version of the libxml2 this process is linked against.
    pub fn current() -> Self {
        static VERSION: OnceLock<LibraryVersion> = OnceLock::new();
        *VERSION.get_or_init(|| {
            init();
            let raw = unsafe { xmlParserVersion };
            if raw.is_null() {
                return LibraryVersion(0);
            }
            let version = unsafe { CStr::from_ptr(raw) }.to_string_lossy();
            LibraryVersion::parse(&version).unwrap_or(LibraryVersion(0))
        })
    }

    pub fn number(&self) -> u32 {
        self.0
    }

    pub fn major(&self) -> u32 {
        self.0 / 10000
    }

    pub fn minor(&self) -> u32 {
        (self.0 / 100) % 100
    }

    pub fn patch(&self) -> u32 {
        self.0 % 100
    }
}

impl fmt::Display for LibraryVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major(), self.minor(), self.patch())
    }
}

/// Copy a libxml2 string without taking ownership of it.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string.
pub(crate) unsafe fn xml_str(ptr: *const XmlChar) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    let c_str = unsafe { CStr::from_ptr(ptr as *const c_char) };
    Some(c_str.to_string_lossy().into_owned())
}

/// Copy a string allocated by libxml2 and release it with `xmlFree`.
///
/// # Safety
///
/// `ptr` must be null or a string the caller owns, allocated by libxml2.
pub(crate) unsafe fn take_xml_str(ptr: *mut XmlChar) -> Option<String> {
    let value = unsafe { xml_str(ptr) };
    if !ptr.is_null() {
        if let Some(free) = unsafe { xmlFree } {
            unsafe { free(ptr as *mut c_void) };
        }
    }
    value
}

/// Owning wrapper for a libxml2 document pointer
///
/// The document (and every node in it) is freed with `xmlFreeDoc` when dropped.
#[derive(Debug)]
pub(crate) struct DocPtr {
    ptr: *mut XmlDoc,
}

impl DocPtr {
    /// Take ownership of a document returned by libxml2
    ///
    /// # Safety
    ///
    /// The pointer must be null or a document allocated by libxml2 that nothing else
    /// will free.
    pub(crate) unsafe fn from_raw(ptr: *mut XmlDoc) -> DocumentResult<Self> {
        if ptr.is_null() {
            return Err(DocumentError::MemoryAllocation);
        }
        Ok(DocPtr { ptr })
    }

    pub(crate) fn as_ptr(&self) -> *mut XmlDoc {
        self.ptr
    }
}

impl Drop for DocPtr {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                xmlFreeDoc(self.ptr);
            }
            self.ptr = std::ptr::null_mut();
        }
    }
}
