//! Native message objects
//!
//! The representation the host messaging facility works with. Each variant
//! mirrors one object kind of the facility; [`crate::codec`] maps them to
//! and from application [`Value`](servlink_core::Value)s.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, DeserializeSeed, EnumAccess, MapAccess, SeqAccess, VariantAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::config::MAX_DEPTH;

/// Object handed to, or received from, the native messaging facility
///
/// Deserializing refuses arrays and dictionaries nested more than
/// [`MAX_DEPTH`] levels deep, so a hostile peer cannot exhaust the stack.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum NativeObject {
    Null,
    Bool(bool),
    Int64(i64),
    Uint64(u64),
    Double(f64),
    String(String),
    Data(Vec<u8>),
    Uuid([u8; 16]),
    /// Nanoseconds since the Unix epoch
    Date(i64),
    Array(Vec<NativeObject>),
    Dictionary(BTreeMap<String, NativeObject>),
    Error(NativeError),
    /// An object kind with no portable form (file descriptors, endpoints,
    /// shared memory), carried by type name only
    Unsupported(String),
}

impl NativeObject {
    /// Create an empty dictionary
    pub fn dictionary() -> Self {
        NativeObject::Dictionary(BTreeMap::new())
    }

    /// Name of the native object kind
    pub fn type_name(&self) -> &str {
        match self {
            NativeObject::Null => "null",
            NativeObject::Bool(_) => "bool",
            NativeObject::Int64(_) => "int64",
            NativeObject::Uint64(_) => "uint64",
            NativeObject::Double(_) => "double",
            NativeObject::String(_) => "string",
            NativeObject::Data(_) => "data",
            NativeObject::Uuid(_) => "uuid",
            NativeObject::Date(_) => "date",
            NativeObject::Array(_) => "array",
            NativeObject::Dictionary(_) => "dictionary",
            NativeObject::Error(_) => "error",
            NativeObject::Unsupported(kind) => kind,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, NativeObject::Error(_))
    }
}

#[derive(Deserialize)]
#[serde(variant_identifier)]
enum Kind {
    Null,
    Bool,
    Int64,
    Uint64,
    Double,
    String,
    Data,
    Uuid,
    Date,
    Array,
    Dictionary,
    Error,
    Unsupported,
}

const KINDS: &[&str] = &[
    "Null",
    "Bool",
    "Int64",
    "Uint64",
    "Double",
    "String",
    "Data",
    "Uuid",
    "Date",
    "Array",
    "Dictionary",
    "Error",
    "Unsupported",
];

impl<'de> Deserialize<'de> for NativeObject {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        ObjectSeed { depth: 0 }.deserialize(deserializer)
    }
}

/// Deserializes one object sitting inside `depth` containers
#[derive(Clone, Copy)]
struct ObjectSeed {
    depth: usize,
}

impl ObjectSeed {
    fn nested<E: de::Error>(self) -> Result<Self, E> {
        if self.depth >= MAX_DEPTH {
            return Err(E::custom(format!(
                "native object nested deeper than {MAX_DEPTH} levels"
            )));
        }
        Ok(Self {
            depth: self.depth + 1,
        })
    }
}

impl<'de> DeserializeSeed<'de> for ObjectSeed {
    type Value = NativeObject;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<NativeObject, D::Error> {
        deserializer.deserialize_enum("NativeObject", KINDS, self)
    }
}

impl<'de> Visitor<'de> for ObjectSeed {
    type Value = NativeObject;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a native object")
    }

    fn visit_enum<A: EnumAccess<'de>>(self, data: A) -> Result<NativeObject, A::Error> {
        let (kind, variant) = data.variant::<Kind>()?;
        Ok(match kind {
            Kind::Null => {
                variant.unit_variant()?;
                NativeObject::Null
            }
            Kind::Bool => NativeObject::Bool(variant.newtype_variant()?),
            Kind::Int64 => NativeObject::Int64(variant.newtype_variant()?),
            Kind::Uint64 => NativeObject::Uint64(variant.newtype_variant()?),
            Kind::Double => NativeObject::Double(variant.newtype_variant()?),
            Kind::String => NativeObject::String(variant.newtype_variant()?),
            Kind::Data => NativeObject::Data(variant.newtype_variant()?),
            Kind::Uuid => NativeObject::Uuid(variant.newtype_variant()?),
            Kind::Date => NativeObject::Date(variant.newtype_variant()?),
            Kind::Array => {
                let seed = ArraySeed(self.nested::<A::Error>()?);
                NativeObject::Array(variant.newtype_variant_seed(seed)?)
            }
            Kind::Dictionary => {
                let seed = DictionarySeed(self.nested::<A::Error>()?);
                NativeObject::Dictionary(variant.newtype_variant_seed(seed)?)
            }
            Kind::Error => NativeObject::Error(variant.newtype_variant()?),
            Kind::Unsupported => NativeObject::Unsupported(variant.newtype_variant()?),
        })
    }
}

/// Elements of an array, each one level deeper
struct ArraySeed(ObjectSeed);

impl<'de> DeserializeSeed<'de> for ArraySeed {
    type Value = Vec<NativeObject>;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de> Visitor<'de> for ArraySeed {
    type Value = Vec<NativeObject>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an array of native objects")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0).min(1024));
        while let Some(item) = seq.next_element_seed(self.0)? {
            items.push(item);
        }
        Ok(items)
    }
}

/// Entries of a dictionary, each value one level deeper
struct DictionarySeed(ObjectSeed);

impl<'de> DeserializeSeed<'de> for DictionarySeed {
    type Value = BTreeMap<String, NativeObject>;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for DictionarySeed {
    type Value = BTreeMap<String, NativeObject>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a dictionary of native objects")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut entries = BTreeMap::new();
        while let Some(key) = map.next_key::<String>()? {
            let value = map.next_value_seed(self.0)?;
            entries.insert(key, value);
        }
        Ok(entries)
    }
}

/// Error objects delivered by the facility on a connection's event handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NativeError {
    /// The remote side went away; the connection may be used again
    ConnectionInterrupted,
    /// The connection can never be used again
    ConnectionInvalid,
    /// The process is about to be terminated by the system
    TerminationImminent,
    Other(String),
}

impl NativeError {
    /// Whether this error ends the connection for good
    pub fn is_terminal(&self) -> bool {
        matches!(self, NativeError::ConnectionInvalid)
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeError::ConnectionInterrupted => f.write_str("connection interrupted"),
            NativeError::ConnectionInvalid => f.write_str("connection invalid"),
            NativeError::TerminationImminent => f.write_str("termination imminent"),
            NativeError::Other(_) => f.write_str("unknown"),
        }
    }
}
