//! The error taxonomy shared by every layer of the core.
//!
//! Authors of drivers, bus bindings, or config-store clients should
//! map their failures onto one of these variants. Add a new variant
//! only when none of these are a reasonable fit, and keep it generic
//! enough to be useful outside of any one backend.

use std::fmt;

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Error {
    /// Unknown device, command, profile, or watcher.
    NotFound,

    /// The device's admin-state or operating-state forbids the
    /// operation.
    Locked,

    /// Oversize request, invalid value, or an out-of-range `set`.
    BadRequest(String),

    /// Malformed configuration or profile document.
    ConfParse(String),

    /// The registry/config store or message bus was unreachable past
    /// the configured deadline.
    RemoteServerDown(String),

    /// A driver callback returned failure; carries the driver's own
    /// exception value.
    DriverError(String),

    /// A numeric transform produced a non-representable value.
    Overflow,

    /// A resource is already registered under that name.
    InUse,

    /// The peer end of a communication channel has closed.
    MissingPeer(String),

    /// A value of the wrong `Value` variant was supplied.
    TypeError,

    /// An invariant was broken. Callers should log this and
    /// terminate -- see spec §7, "INTERNAL".
    Internal(String),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::NotFound => write!(f, "not found"),
            Error::Locked => write!(f, "device is locked or down"),
            Error::BadRequest(v) => write!(f, "bad request: {}", v),
            Error::ConfParse(v) => write!(f, "config parse error: {}", v),
            Error::RemoteServerDown(v) => {
                write!(f, "remote server unreachable: {}", v)
            }
            Error::DriverError(v) => write!(f, "driver error: {}", v),
            Error::Overflow => write!(f, "transform overflow"),
            Error::InUse => write!(f, "already in use"),
            Error::MissingPeer(v) => write!(f, "{} is missing its peer", v),
            Error::TypeError => write!(f, "incorrect value type"),
            Error::Internal(v) => write!(f, "internal error: {}", v),
        }
    }
}

/// The numeric `errorCode` carried in a response envelope (§4.5/§6).
/// `0` means success; every other value is one of these.
impl Error {
    pub fn code(&self) -> i32 {
        match self {
            Error::NotFound => 404,
            Error::Locked => 423,
            Error::BadRequest(_) => 400,
            Error::ConfParse(_) => 500,
            Error::RemoteServerDown(_) => 503,
            Error::DriverError(_) => 502,
            Error::Overflow => 422,
            Error::InUse => 409,
            Error::MissingPeer(_) => 500,
            Error::TypeError => 400,
            Error::Internal(_) => 500,
        }
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_error: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Error::MissingPeer(String::from("request channel is closed"))
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for Error {
    fn from(_error: tokio::sync::oneshot::error::RecvError) -> Self {
        Error::MissingPeer(String::from("request dropped"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
