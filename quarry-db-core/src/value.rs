//! Typed values.
//!
//! Every VALUE posting payload is a tagged byte string: the first byte is the
//! [`TypeId`], the remainder is the type-specific encoding. Decoders dispatch
//! on the tag; there is no dynamically-typed escape hatch.
//!
//! Encodings (all integers big-endian):
//! - `Int`: 8-byte two's-complement
//! - `Float`: 8-byte IEEE 754 bit pattern
//! - `Bool`: 1 byte, 0 or 1
//! - `Datetime`: 8-byte signed microseconds since the Unix epoch
//! - `Uid`: 8-byte unsigned
//! - `Default` / `Str` / `Password`: raw UTF-8
//! - `Binary` / `Geo` / `BigInt`: opaque bytes (Geo is WKB, BigInt is a
//!   sign byte plus big-endian magnitude as produced upstream)

use crate::error::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Wildcard object value: a DEL carrying it deletes every posting of a key.
pub const STAR_ALL: &str = "_STAR_ALL";

/// Type tag for a value payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TypeId {
    Default = 0,
    Binary = 1,
    Int = 2,
    Float = 3,
    Bool = 4,
    Datetime = 5,
    Geo = 6,
    Uid = 7,
    Password = 8,
    Str = 9,
    BigInt = 10,
}

impl TypeId {
    /// Decode a tag byte.
    pub fn from_u8(b: u8) -> Option<TypeId> {
        match b {
            0 => Some(TypeId::Default),
            1 => Some(TypeId::Binary),
            2 => Some(TypeId::Int),
            3 => Some(TypeId::Float),
            4 => Some(TypeId::Bool),
            5 => Some(TypeId::Datetime),
            6 => Some(TypeId::Geo),
            7 => Some(TypeId::Uid),
            8 => Some(TypeId::Password),
            9 => Some(TypeId::Str),
            10 => Some(TypeId::BigInt),
            _ => None,
        }
    }

    /// Type name as written in schema definitions.
    pub fn name(self) -> &'static str {
        match self {
            TypeId::Default => "default",
            TypeId::Binary => "binary",
            TypeId::Int => "int",
            TypeId::Float => "float",
            TypeId::Bool => "bool",
            TypeId::Datetime => "datetime",
            TypeId::Geo => "geo",
            TypeId::Uid => "uid",
            TypeId::Password => "password",
            TypeId::Str => "string",
            TypeId::BigInt => "bigint",
        }
    }

    /// Look up a type by its schema name.
    pub fn for_name(name: &str) -> Option<TypeId> {
        match name {
            "default" => Some(TypeId::Default),
            "binary" | "upload" => Some(TypeId::Binary),
            "int" => Some(TypeId::Int),
            "float" => Some(TypeId::Float),
            "bool" => Some(TypeId::Bool),
            "datetime" => Some(TypeId::Datetime),
            "geo" => Some(TypeId::Geo),
            "uid" => Some(TypeId::Uid),
            "password" => Some(TypeId::Password),
            "string" => Some(TypeId::Str),
            "bigint" => Some(TypeId::BigInt),
            _ => None,
        }
    }

    /// Whether the type is scalar (everything except `Uid`).
    pub fn is_scalar(self) -> bool {
        self != TypeId::Uid
    }
}

/// A decoded value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Default(String),
    Binary(Vec<u8>),
    Int(i64),
    Float(f64),
    Bool(bool),
    Datetime(DateTime<Utc>),
    Geo(Vec<u8>),
    Uid(u64),
    Password(String),
    Str(String),
    BigInt(Vec<u8>),
}

impl Value {
    /// The tag this value marshals under.
    pub fn type_id(&self) -> TypeId {
        match self {
            Value::Default(_) => TypeId::Default,
            Value::Binary(_) => TypeId::Binary,
            Value::Int(_) => TypeId::Int,
            Value::Float(_) => TypeId::Float,
            Value::Bool(_) => TypeId::Bool,
            Value::Datetime(_) => TypeId::Datetime,
            Value::Geo(_) => TypeId::Geo,
            Value::Uid(_) => TypeId::Uid,
            Value::Password(_) => TypeId::Password,
            Value::Str(_) => TypeId::Str,
            Value::BigInt(_) => TypeId::BigInt,
        }
    }

    /// Marshal into tagged bytes.
    pub fn marshal(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + 8);
        out.push(self.type_id() as u8);
        match self {
            Value::Default(s) | Value::Password(s) | Value::Str(s) => {
                out.extend_from_slice(s.as_bytes())
            }
            Value::Binary(b) | Value::Geo(b) | Value::BigInt(b) => out.extend_from_slice(b),
            Value::Int(i) => out.extend_from_slice(&i.to_be_bytes()),
            Value::Float(f) => out.extend_from_slice(&f.to_bits().to_be_bytes()),
            Value::Bool(b) => out.push(*b as u8),
            Value::Datetime(dt) => {
                out.extend_from_slice(&dt.timestamp_micros().to_be_bytes())
            }
            Value::Uid(u) => out.extend_from_slice(&u.to_be_bytes()),
        }
        out
    }

    /// Unmarshal tagged bytes.
    pub fn unmarshal(bytes: &[u8]) -> Result<Value> {
        let (tag, body) = bytes
            .split_first()
            .ok_or_else(|| Error::parse("empty value payload"))?;
        let tid = TypeId::from_u8(*tag)
            .ok_or_else(|| Error::parse(format!("unknown type tag {tag:#04x}")))?;
        let utf8 = |b: &[u8]| {
            std::str::from_utf8(b)
                .map(str::to_owned)
                .map_err(|e| Error::parse(format!("invalid UTF-8 in value: {e}")))
        };
        let be8 = |b: &[u8]| -> Result<[u8; 8]> {
            b.try_into()
                .map_err(|_| Error::parse(format!("expected 8-byte payload, got {}", b.len())))
        };
        Ok(match tid {
            TypeId::Default => Value::Default(utf8(body)?),
            TypeId::Str => Value::Str(utf8(body)?),
            TypeId::Password => Value::Password(utf8(body)?),
            TypeId::Binary => Value::Binary(body.to_vec()),
            TypeId::Geo => Value::Geo(body.to_vec()),
            TypeId::BigInt => Value::BigInt(body.to_vec()),
            TypeId::Int => Value::Int(i64::from_be_bytes(be8(body)?)),
            TypeId::Float => Value::Float(f64::from_bits(u64::from_be_bytes(be8(body)?))),
            TypeId::Uid => Value::Uid(u64::from_be_bytes(be8(body)?)),
            TypeId::Bool => match body {
                [0] => Value::Bool(false),
                [1] => Value::Bool(true),
                _ => return Err(Error::parse("bool payload must be one byte, 0 or 1")),
            },
            TypeId::Datetime => {
                let micros = i64::from_be_bytes(be8(body)?);
                let dt = Utc
                    .timestamp_micros(micros)
                    .single()
                    .ok_or_else(|| Error::parse(format!("datetime out of range: {micros}")))?;
                Value::Datetime(dt)
            }
        })
    }

    /// The raw string form, for string-bearing variants.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Default(s) | Value::Password(s) | Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// True if a marshalled payload is the deletion wildcard.
pub fn is_star_all(payload: &[u8]) -> bool {
    if payload.len() < 2 {
        return false;
    }
    matches!(
        TypeId::from_u8(payload[0]),
        Some(TypeId::Default) | Some(TypeId::Str)
    ) && &payload[1..] == STAR_ALL.as_bytes()
}

/// Convert a stored value to the schema's declared type.
///
/// String-ish inputs are parsed; already-typed inputs pass through when the
/// types match. Anything else is a schema error: by the time conversion runs
/// the edge has already been accepted, so a failure here is a data bug.
pub fn convert(value: &Value, dst: TypeId) -> Result<Value> {
    if value.type_id() == dst {
        return Ok(value.clone());
    }
    let fail = || {
        Error::schema(format!(
            "cannot convert {} value to {}",
            value.type_id().name(),
            dst.name()
        ))
    };
    match (value.as_str(), dst) {
        (Some(s), TypeId::Str) => Ok(Value::Str(s.to_owned())),
        (Some(s), TypeId::Default) => Ok(Value::Default(s.to_owned())),
        (Some(s), TypeId::Password) => Ok(Value::Password(s.to_owned())),
        (Some(s), TypeId::Int) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|e| Error::schema(format!("invalid int {s:?}: {e}"))),
        (Some(s), TypeId::Float) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|e| Error::schema(format!("invalid float {s:?}: {e}"))),
        (Some(s), TypeId::Bool) => match s.trim() {
            "true" | "1" => Ok(Value::Bool(true)),
            "false" | "0" => Ok(Value::Bool(false)),
            _ => Err(Error::schema(format!("invalid bool {s:?}"))),
        },
        (Some(s), TypeId::Datetime) => parse_datetime(s).map(Value::Datetime),
        (Some(s), TypeId::Binary) => Ok(Value::Binary(s.as_bytes().to_vec())),
        (None, _) => match (value, dst) {
            (Value::Int(i), TypeId::Float) => Ok(Value::Float(*i as f64)),
            (Value::Int(i), TypeId::Str) => Ok(Value::Str(i.to_string())),
            (Value::Float(f), TypeId::Str) => Ok(Value::Str(f.to_string())),
            (Value::Bool(b), TypeId::Str) => Ok(Value::Str(b.to_string())),
            _ => Err(fail()),
        },
        _ => Err(fail()),
    }
}

/// Parse a datetime in the handful of shapes the loader accepts: a bare
/// year, year-month, date, or RFC 3339.
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    let parsed = match s.len() {
        4 => format!("{s}-01-01T00:00:00Z").parse(),
        7 => format!("{s}-01T00:00:00Z").parse(),
        10 => format!("{s}T00:00:00Z").parse(),
        _ => s
            .parse::<DateTime<Utc>>()
            .or_else(|_| format!("{s}Z").parse()),
    };
    parsed.map_err(|e| Error::schema(format!("invalid datetime {s:?}: {e}")))
}
