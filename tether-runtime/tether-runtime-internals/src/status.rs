use crate::error::Error;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

/// The status a protected call reports to its caller.
///
/// The numbering follows the thread status codes of the reference interpreter, with
/// `ConfigurationError` added for misuse that is never recoverable by a script.
#[repr(i32)]
#[derive(Copy, Clone, Debug, FromPrimitive, PartialEq, Eq)]
pub enum Status {
    Ok = 0,
    Yield = 1,
    RuntimeError = 2,
    SyntaxError = 3,
    MemoryError = 4,
    GcError = 5,
    ErrorHandlerError = 6,
    ConfigurationError = 7,
}

impl Status {
    pub fn try_from_i32(v: i32) -> Option<Status> {
        Self::from_i32(v)
    }

    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}

impl From<&Error> for Status {
    fn from(e: &Error) -> Status {
        match e {
            Error::Cancelled(_) | Error::Runtime(_) => Status::RuntimeError,
            Error::Memory => Status::MemoryError,
            Error::InvalidHandle
            | Error::Configuration(_)
            | Error::InvalidArgument(_)
            | Error::Unsupported(_) => Status::ConfigurationError,
            Error::InternalError(_) => Status::ErrorHandlerError,
        }
    }
}
