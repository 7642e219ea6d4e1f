use thiserror::Error;

use crate::connection::State;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid service name {name:?}: {reason}")]
    InvalidServiceName { name: String, reason: &'static str },

    #[error("Connection already set up")]
    AlreadySetup,

    #[error("Connection not active (state: {state})")]
    NotActive { state: State },

    #[error("Unsupported value at `{}`: {reason}", servlink_core::path::display(.path))]
    UnsupportedValue { path: String, reason: String },

    #[error("Native connection to {service} invalidated: {reason}")]
    NativeInvalidation { service: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Service already registered: {0}")]
    ServiceExists(String),

    #[error("Event loop closed")]
    LoopClosed,

    #[error("{0}")]
    Custom(String),
}

impl From<servlink_core::Error> for Error {
    fn from(err: servlink_core::Error) -> Self {
        match err {
            servlink_core::Error::UnsupportedValue { path, reason } => {
                Error::UnsupportedValue { path, reason }
            }
            servlink_core::Error::Custom(msg) => Error::Custom(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
