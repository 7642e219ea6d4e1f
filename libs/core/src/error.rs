use std::fmt::Display;

use thiserror::Error;

use crate::path;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Unsupported value at `{}`: {reason}", path::display(.path))]
    UnsupportedValue { path: String, reason: String },

    #[error("{0}")]
    Custom(String),
}

impl Error {
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    pub fn unsupported(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnsupportedValue {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl serde::ser::Error for Error {
    fn custom<T: Display>(msg: T) -> Self {
        Self::Custom(msg.to_string())
    }
}

impl serde::de::Error for Error {
    fn custom<T: Display>(msg: T) -> Self {
        Self::Custom(msg.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
