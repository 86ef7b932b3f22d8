use crate::status::Status;
use anyhow::Error as AnyError;
use encoding_rs::Encoding;
use std::fmt;
use thiserror::Error;

/// Tether runtime errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid argument: {}", _0)]
    InvalidArgument(&'static str),

    /// The interpreter an [`Interjector`](interjector/struct.Interjector.html) was bound to has
    /// been closed.
    #[error("Invalid handle: interpreter is closed")]
    InvalidHandle,

    /// Misuse of the single hook slot, such as re-entering a drain pass.
    ///
    /// This is never catchable by a script-level protected call.
    #[error("Configuration error: {}", _0)]
    Configuration(String),

    /// Execution was cancelled by a host thread.
    ///
    /// The message is the one passed to
    /// [`Interjector::cancel`](interjector/struct.Interjector.html#method.cancel).
    #[error("Cancelled: {}", _0)]
    Cancelled(Message),

    /// A runtime error raised by the script, by a native function, or by an interjected action.
    #[error("Runtime error: {}", _0)]
    Runtime(Message),

    /// The allocator returned null while growing or creating a block.
    #[error("Not enough memory")]
    Memory,

    /// A facility was requested from a state that was not instrumented for it.
    #[error("Unsupported: {}", _0)]
    Unsupported(String),

    /// A catch-all for internal errors that are likely unrecoverable by the runtime user.
    #[error("Internal error: {}", _0)]
    InternalError(#[source] AnyError),
}

impl Error {
    /// Build a runtime error from UTF-8 text.
    pub fn runtime<S: AsRef<str>>(msg: S) -> Self {
        Error::Runtime(Message::from_str(msg.as_ref(), encoding_rs::UTF_8))
    }

    /// The status code a protected call reports for this error.
    pub fn status(&self) -> Status {
        Status::from(self)
    }

    /// The message an error carries into interpreter-visible state, if it has one.
    pub fn message(&self) -> Option<&Message> {
        match self {
            Error::Cancelled(m) | Error::Runtime(m) => Some(m),
            _ => None,
        }
    }

    /// Can a script-level protected call intercept this error?
    ///
    /// Configuration errors pass through every script boundary to the embedder.
    pub fn is_catchable(&self) -> bool {
        self.status() != Status::ConfigurationError
    }
}

/// An error message in the byte encoding it was raised with.
///
/// Interpreter strings are bytes; the encoding is remembered so the message can be turned back
/// into text at the embedding boundary.
#[derive(Clone, PartialEq)]
pub struct Message {
    bytes: Vec<u8>,
    encoding: &'static Encoding,
}

impl Message {
    pub fn from_str(text: &str, encoding: &'static Encoding) -> Self {
        let (bytes, _, _) = encoding.encode(text);
        Message {
            bytes: bytes.into_owned(),
            encoding,
        }
    }

    pub fn from_bytes(bytes: Vec<u8>, encoding: &'static Encoding) -> Self {
        Message { bytes, encoding }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    /// Decode the message, replacing malformed sequences.
    pub fn to_string_lossy(&self) -> String {
        let (text, _) = self.encoding.decode_without_bom_handling(&self.bytes);
        text.into_owned()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self.to_string_lossy(), self.encoding.name())
    }
}

#[macro_export]
macro_rules! tether_bail {
    ($e:expr) => {
        return Err(tether_format_err!($e));
    };
    ($fmt:expr, $($arg:tt)*) => {
        return Err(tether_format_err!($fmt, $($arg)*));
    };
}

#[macro_export(local_inner_macros)]
macro_rules! tether_ensure {
    ($cond:expr, $e:expr) => {
        if !($cond) {
            tether_bail!($e);
        }
    };
    ($cond:expr, $fmt:expr, $($arg:tt)*) => {
        if !($cond) {
            tether_bail!($fmt, $($arg)*);
        }
    };
}

#[macro_export]
macro_rules! tether_format_err {
    ($($arg:tt)*) => { $crate::error::Error::InternalError(anyhow::format_err!($($arg)*)) }
}

/// Raise a script-level runtime error with a formatted message.
#[macro_export]
macro_rules! bail_runtime {
    ($($arg:tt)*) => { return Err($crate::error::Error::runtime(format!($($arg)*))); }
}
