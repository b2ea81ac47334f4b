//! Capture of libxml2 diagnostics
//!
//! libxml2 reports parser and validation problems through a structured error
//! callback. An [`ErrorLog`] collects those reports instead of letting libxml2 print
//! them to stderr. The log is only attached while a [`LogConnection`] guard is alive,
//! so diagnostics never leak from one call into the next.

use std::collections::VecDeque;
use std::ffi::{CStr, c_void};
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Mutex, MutexGuard};

use libc::c_int;
use serde::Serialize;
use tracing::trace;

use crate::libxml2::{XmlError, xmlSetStructuredErrorFunc};

/// Severity of a libxml2 diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum LogLevel {
    None,
    Warning,
    Error,
    Fatal,
}

impl LogLevel {
    fn from_code(level: c_int) -> Self {
        match level {
            1 => LogLevel::Warning,
            2 => LogLevel::Error,
            3 => LogLevel::Fatal,
            _ => LogLevel::None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::None => "NONE",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
        };
        f.write_str(name)
    }
}

/// A single diagnostic reported by libxml2
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub domain: i32,
    pub code: i32,
    pub message: String,
    pub line: i32,
    pub column: i32,
    pub filename: Option<String>,
}

impl LogEntry {
    /// # Safety
    ///
    /// `error` must point to a valid `xmlError` for the duration of the call.
    unsafe fn from_raw(error: &XmlError) -> Self {
        let text = |ptr: *const libc::c_char| {
            if ptr.is_null() {
                None
            } else {
                Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().trim().to_string())
            }
        };

        LogEntry {
            level: LogLevel::from_code(error.level),
            domain: error.domain,
            code: error.code,
            message: text(error.message).unwrap_or_default(),
            line: error.line,
            column: error.int2,
            filename: text(error.file),
        }
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}: {}",
            self.filename.as_deref().unwrap_or("<string>"),
            self.line,
            self.column,
            self.level,
            self.message
        )
    }
}

/// Bounded collector for libxml2 diagnostics
///
/// When the log is full the oldest entry is dropped.
#[derive(Debug)]
pub struct ErrorLog {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
}

impl ErrorLog {
    pub const DEFAULT_CAPACITY: usize = 1000;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        ErrorLog {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<LogEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Snapshot of the collected entries, oldest first
    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Most recent entry at `Error` level or above
    pub fn last_error(&self) -> Option<LogEntry> {
        self.lock()
            .iter()
            .rev()
            .find(|entry| entry.level >= LogLevel::Error)
            .cloned()
    }

    pub fn push(&self, entry: LogEntry) {
        let mut entries = self.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Route libxml2's structured errors on the current thread into this log until
    /// the returned guard is dropped.
    ///
    /// Connections do not nest: dropping a guard restores libxml2's default handler.
    pub fn connect(&self) -> LogConnection<'_> {
        unsafe {
            xmlSetStructuredErrorFunc(self.as_user_data(), Some(structured_error_callback));
        }
        trace!("error log connected");
        LogConnection {
            _log: self,
            _not_send: PhantomData,
        }
    }

    pub(crate) fn as_user_data(&self) -> *mut c_void {
        self as *const ErrorLog as *mut c_void
    }
}

impl Default for ErrorLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard keeping an [`ErrorLog`] attached to libxml2's error reporting
///
/// The handler is installed per thread, so the guard cannot leave its thread.
pub struct LogConnection<'a> {
    _log: &'a ErrorLog,
    _not_send: PhantomData<*const ()>,
}

impl Drop for LogConnection<'_> {
    fn drop(&mut self) {
        unsafe {
            xmlSetStructuredErrorFunc(std::ptr::null_mut(), None);
        }
        trace!("error log disconnected");
    }
}

/// Callback for libxml2 to report errors (structured)
///
/// `user_data` is always an `ErrorLog` that outlives the registration.
pub(crate) unsafe extern "C" fn structured_error_callback(
    user_data: *mut c_void,
    error: *mut XmlError,
) {
    if user_data.is_null() || error.is_null() {
        return;
    }
    let log = unsafe { &*(user_data as *const ErrorLog) };
    let entry = unsafe { LogEntry::from_raw(&*error) };
    log.push(entry);
}
