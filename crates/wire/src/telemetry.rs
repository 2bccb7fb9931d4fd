//! Telemetry batch payloads.
//!
//! Points cross the worker wire in the binary framing like everything else;
//! the serde derives exist for the HTTP upload body the handler posts to the
//! telemetry host.

use bytes::BufMut;
use serde::Serialize;

use crate::codec;
use crate::error::WireError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryPoint {
    pub measurement: String,
    /// Milliseconds since the unix epoch.
    pub timestamp_ms: i64,
    pub tags: Vec<TelemetryTag>,
    pub fields: Vec<TelemetryField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TelemetryTag {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryField {
    pub name: String,
    #[serde(flatten)]
    pub value: TelemetryValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum TelemetryValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

const VALUE_STRING: u8 = 0;
const VALUE_INTEGER: u8 = 1;
const VALUE_FLOAT: u8 = 2;
const VALUE_BOOLEAN: u8 = 3;

impl TelemetryValue {
    fn size(&self) -> usize {
        1 + match self {
            TelemetryValue::String(value) => codec::varstring_len(value),
            TelemetryValue::Integer(_) | TelemetryValue::Float(_) => 8,
            TelemetryValue::Boolean(_) => 1,
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        match self {
            TelemetryValue::String(value) => {
                out.put_u8(VALUE_STRING);
                codec::put_varstring(out, value);
            }
            TelemetryValue::Integer(value) => {
                out.put_u8(VALUE_INTEGER);
                out.put_i64_le(*value);
            }
            TelemetryValue::Float(value) => {
                out.put_u8(VALUE_FLOAT);
                out.put_f64_le(*value);
            }
            TelemetryValue::Boolean(value) => {
                out.put_u8(VALUE_BOOLEAN);
                out.put_u8(*value as u8);
            }
        }
    }

    fn read(buf: &mut &[u8]) -> Result<Self, WireError> {
        match codec::get_u8(buf)? {
            VALUE_STRING => Ok(TelemetryValue::String(codec::get_varstring(buf)?)),
            VALUE_INTEGER => Ok(TelemetryValue::Integer(codec::get_i64(buf)?)),
            VALUE_FLOAT => Ok(TelemetryValue::Float(codec::get_f64(buf)?)),
            VALUE_BOOLEAN => Ok(TelemetryValue::Boolean(codec::get_bool(buf)?)),
            other => Err(WireError::UnknownValueTag(other)),
        }
    }
}

impl TelemetryPoint {
    pub(crate) fn size(&self) -> usize {
        codec::varstring_len(&self.measurement)
            + 8
            + codec::varint_len(self.tags.len() as u64)
            + self
                .tags
                .iter()
                .map(|tag| codec::varstring_len(&tag.name) + codec::varstring_len(&tag.value))
                .sum::<usize>()
            + codec::varint_len(self.fields.len() as u64)
            + self
                .fields
                .iter()
                .map(|field| codec::varstring_len(&field.name) + field.value.size())
                .sum::<usize>()
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>) {
        codec::put_varstring(out, &self.measurement);
        out.put_i64_le(self.timestamp_ms);
        codec::put_varint(out, self.tags.len() as u64);
        for tag in &self.tags {
            codec::put_varstring(out, &tag.name);
            codec::put_varstring(out, &tag.value);
        }
        codec::put_varint(out, self.fields.len() as u64);
        for field in &self.fields {
            codec::put_varstring(out, &field.name);
            field.value.write(out);
        }
    }

    pub(crate) fn read(buf: &mut &[u8]) -> Result<Self, WireError> {
        let measurement = codec::get_varstring(buf)?;
        let timestamp_ms = codec::get_i64(buf)?;
        let tag_count = codec::get_varint(buf)? as usize;
        let mut tags = Vec::with_capacity(tag_count.min(64));
        for _ in 0..tag_count {
            tags.push(TelemetryTag {
                name: codec::get_varstring(buf)?,
                value: codec::get_varstring(buf)?,
            });
        }
        let field_count = codec::get_varint(buf)? as usize;
        let mut fields = Vec::with_capacity(field_count.min(64));
        for _ in 0..field_count {
            fields.push(TelemetryField {
                name: codec::get_varstring(buf)?,
                value: TelemetryValue::read(buf)?,
            });
        }
        Ok(TelemetryPoint {
            measurement,
            timestamp_ms,
            tags,
            fields,
        })
    }
}
