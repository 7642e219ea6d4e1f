//! Servlink Core - application value model
//!
//! [`Value`] is the dynamically typed payload exchanged with services:
//! null, bool, 64-bit integer, double, string, byte buffer, list, and
//! string-keyed map. Any `serde` type can be turned into a `Value` with
//! [`to_value`] and read back with [`from_value`].
//!
//! # Example
//!
//! ```
//! use serde::{Deserialize, Serialize};
//! use servlink_core::{from_value, to_value, Value};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Hello {
//!     name: String,
//!     alert: i32,
//! }
//!
//! let hello = Hello { name: "node".into(), alert: 1 };
//! let value = to_value(&hello).unwrap();
//! assert_eq!(value.get("name"), Some(&Value::from("node")));
//!
//! let back: Hello = from_value(value).unwrap();
//! assert_eq!(back, hello);
//! ```

pub mod de;
pub mod error;
pub mod path;
pub mod ser;
pub mod value;

pub use de::from_value;
pub use error::{Error, Result};
pub use ser::to_value;
pub use value::{Map, Value};
