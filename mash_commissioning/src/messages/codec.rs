//! Integer-keyed CBOR map plumbing shared by all message schemas.

use ciborium::value::Value;

use super::MessageError;

pub(super) fn uint(value: u64) -> Value {
    Value::Integer(value.into())
}

pub(super) fn bytes(value: &[u8]) -> Value {
    Value::Bytes(value.to_vec())
}

pub(super) fn text(value: &str) -> Value {
    Value::Text(value.to_owned())
}

/// Builds an integer-keyed CBOR map with the message type at key 1.
/// Fields must be added in ascending key order; optional fields are simply
/// not added when absent.
pub(super) struct MapEncoder {
    entries: Vec<(Value, Value)>,
}

impl MapEncoder {
    pub fn new(message_type: u8) -> Self {
        MapEncoder {
            entries: vec![(uint(super::MESSAGE_TYPE_KEY.into()), uint(message_type.into()))],
        }
    }

    pub fn field(mut self, key: u8, value: Value) -> Self {
        self.entries.push((uint(key.into()), value));
        self
    }

    pub fn optional(self, key: u8, value: Option<Value>) -> Self {
        match value {
            Some(value) => self.field(key, value),
            None => self,
        }
    }

    pub fn encode(self) -> Result<Vec<u8>, MessageError> {
        let mut output = Vec::new();
        ciborium::ser::into_writer(&Value::Map(self.entries), &mut output).map_err(MessageError::Encode)?;
        Ok(output)
    }
}

/// Reads typed fields out of a decoded integer-keyed map. Lenient on field
/// order and on unknown keys, strict on the types of known fields.
pub(super) struct MapDecoder<'a> {
    entries: &'a [(Value, Value)],
}

impl<'a> MapDecoder<'a> {
    pub fn new(value: &'a Value) -> Result<Self, MessageError> {
        match value {
            Value::Map(entries) => Ok(MapDecoder { entries }),
            _ => Err(MessageError::NotAMap),
        }
    }

    fn get(&self, key: u8) -> Option<&'a Value> {
        self.entries.iter().find_map(|(entry_key, value)| match entry_key {
            Value::Integer(integer) if u64::try_from(*integer).is_ok_and(|k| k == u64::from(key)) => Some(value),
            _ => None,
        })
    }

    pub fn required_u64(&self, key: u8) -> Result<u64, MessageError> {
        match self.get(key) {
            Some(Value::Integer(integer)) => {
                u64::try_from(*integer).map_err(|_| MessageError::InvalidField { key })
            }
            Some(_) => Err(MessageError::InvalidField { key }),
            None => Err(MessageError::MissingField { key }),
        }
    }

    pub fn required_u8(&self, key: u8) -> Result<u8, MessageError> {
        u8::try_from(self.required_u64(key)?).map_err(|_| MessageError::InvalidField { key })
    }

    pub fn required_u32(&self, key: u8) -> Result<u32, MessageError> {
        u32::try_from(self.required_u64(key)?).map_err(|_| MessageError::InvalidField { key })
    }

    pub fn optional_u32(&self, key: u8) -> Result<Option<u32>, MessageError> {
        match self.get(key) {
            Some(Value::Integer(integer)) => u64::try_from(*integer)
                .ok()
                .and_then(|value| u32::try_from(value).ok())
                .map(Some)
                .ok_or(MessageError::InvalidField { key }),
            Some(_) => Err(MessageError::InvalidField { key }),
            None => Ok(None),
        }
    }

    pub fn required_bytes(&self, key: u8) -> Result<Vec<u8>, MessageError> {
        match self.get(key) {
            Some(Value::Bytes(bytes)) => Ok(bytes.clone()),
            Some(_) => Err(MessageError::InvalidField { key }),
            None => Err(MessageError::MissingField { key }),
        }
    }

    pub fn optional_bytes(&self, key: u8) -> Result<Option<Vec<u8>>, MessageError> {
        match self.get(key) {
            Some(Value::Bytes(bytes)) => Ok(Some(bytes.clone())),
            Some(_) => Err(MessageError::InvalidField { key }),
            None => Ok(None),
        }
    }

    pub fn optional_text(&self, key: u8) -> Result<Option<String>, MessageError> {
        match self.get(key) {
            Some(Value::Text(text)) => Ok(Some(text.clone())),
            Some(_) => Err(MessageError::InvalidField { key }),
            None => Ok(None),
        }
    }

    pub fn required_byte_array<const N: usize>(&self, key: u8) -> Result<[u8; N], MessageError> {
        self.required_bytes(key)?
            .try_into()
            .map_err(|_| MessageError::InvalidField { key })
    }

    pub fn optional_byte_array<const N: usize>(&self, key: u8) -> Result<Option<[u8; N]>, MessageError> {
        self.optional_bytes(key)?
            .map(|bytes| bytes.try_into().map_err(|_| MessageError::InvalidField { key }))
            .transpose()
    }
}
