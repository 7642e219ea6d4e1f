//! Binary form of native objects
//!
//! Used whenever a native object leaves the process or is copied across
//! the in-process bus, so sender and receiver never share an object.

use crate::error::{Error, Result};
use crate::native::NativeObject;

/// Serialize a native object into bytes
pub fn to_bytes(object: &NativeObject) -> Result<Vec<u8>> {
    bincode::serialize(object).map_err(|e| Error::Codec(e.to_string()))
}

/// Deserialize a native object from bytes
pub fn from_bytes(bytes: &[u8]) -> Result<NativeObject> {
    bincode::deserialize(bytes).map_err(|e| Error::Codec(e.to_string()))
}

/// Copy an object the way the facility does when it crosses a boundary
pub fn copy(object: &NativeObject) -> Result<NativeObject> {
    from_bytes(&to_bytes(object)?)
}
