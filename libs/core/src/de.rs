//! Deserialization of typed data out of a [`Value`] tree.

use serde::de::value::{MapAccessDeserializer, MapDeserializer, SeqDeserializer};
use serde::de::{self, DeserializeOwned, IntoDeserializer, Visitor};
use serde::forward_to_deserialize_any;

use crate::error::{Error, Result};
use crate::value::Value;

/// Interpret a [`Value`] as an instance of `T`
pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T> {
    T::deserialize(value)
}

impl<'de> IntoDeserializer<'de, Error> for Value {
    type Deserializer = Self;

    fn into_deserializer(self) -> Self {
        self
    }
}

impl<'de> de::Deserializer<'de> for Value {
    type Error = Error;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self {
            Value::Null => visitor.visit_unit(),
            Value::Bool(b) => visitor.visit_bool(b),
            Value::Int(i) => visitor.visit_i64(i),
            Value::Double(d) => visitor.visit_f64(d),
            Value::String(s) => visitor.visit_string(s),
            Value::Bytes(b) => visitor.visit_byte_buf(b),
            Value::List(items) => {
                let mut seq = SeqDeserializer::<_, Error>::new(items.into_iter());
                let out = visitor.visit_seq(&mut seq)?;
                seq.end()?;
                Ok(out)
            }
            Value::Map(map) => {
                let mut access = MapDeserializer::<_, Error>::new(map.into_iter());
                let out = visitor.visit_map(&mut access)?;
                access.end()?;
                Ok(out)
            }
        }
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self {
            Value::Null => visitor.visit_none(),
            other => visitor.visit_some(other),
        }
    }

    // Byte buffers can also feed a `Vec<u8>`, which asks for a sequence.
    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self {
            Value::Bytes(bytes) => {
                let mut seq = SeqDeserializer::<_, Error>::new(bytes.into_iter());
                let out = visitor.visit_seq(&mut seq)?;
                seq.end()?;
                Ok(out)
            }
            other => other.deserialize_any(visitor),
        }
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        match self {
            Value::String(variant) => visitor.visit_enum(variant.into_deserializer()),
            Value::Map(map) if map.len() == 1 => {
                visitor.visit_enum(MapAccessDeserializer::new(
                    MapDeserializer::<_, Error>::new(map.into_iter()),
                ))
            }
            other => Err(Error::custom(format!(
                "expected an enum as a string or single-entry map, found {}",
                other.type_name()
            ))),
        }
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf unit unit_struct tuple tuple_struct map struct
        identifier ignored_any
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::value::Map;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Args {
        name: String,
        alert: Option<u8>,
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Event {
        #[serde(rename = "kMsgId")]
        id: u16,
        #[serde(rename = "kMsgArgs")]
        args: Args,
        payload: Vec<u8>,
    }

    #[test]
    fn typed_event_from_value() {
        let value: Value = [
            ("kMsgId", Value::from(1)),
            ("kMsgArgs", [("name", "node")].into_iter().collect()),
            ("payload", Value::from(vec![1u8, 2, 3])),
        ]
        .into_iter()
        .collect();

        let event: Event = from_value(value).unwrap();
        assert_eq!(
            event,
            Event {
                id: 1,
                args: Args {
                    name: "node".into(),
                    alert: None
                },
                payload: vec![1, 2, 3],
            }
        );
    }

    #[derive(Debug, Deserialize, PartialEq)]
    enum Command {
        Ping,
        Move { x: i32 },
    }

    #[test]
    fn enums_from_string_or_single_entry_map() {
        assert_eq!(from_value::<Command>(Value::from("Ping")).unwrap(), Command::Ping);

        let mut inner = Map::new();
        inner.insert("x".into(), Value::Int(-4));
        let mut outer = Map::new();
        outer.insert("Move".into(), Value::Map(inner));
        assert_eq!(
            from_value::<Command>(Value::Map(outer)).unwrap(),
            Command::Move { x: -4 }
        );
    }

    #[test]
    fn out_of_range_integer_is_an_error() {
        assert!(from_value::<u8>(Value::Int(300)).is_err());
    }
}
