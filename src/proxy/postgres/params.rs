//! Binding JSON values as PostgreSQL parameters.
//!
//! Clients send bind values as untyped JSON. The server infers a type for
//! every `$n` placeholder when the statement is prepared, and [`JsonParam`]
//! converts the JSON value to that type at bind time. Strings are accepted
//! for numeric and boolean placeholders, matching what PostgreSQL would
//! accept in a text literal.

use std::borrow::Cow;
use std::error::Error;

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value;
use tokio_postgres::types::{IsNull, Kind, ToSql, Type};

use super::numeric;

type BoxError = Box<dyn Error + Sync + Send>;

/// A JSON value bound to a placeholder of whatever type the server inferred.
#[derive(Debug)]
pub struct JsonParam<'a>(pub &'a Value);

impl JsonParam<'_> {
    fn as_bool(&self) -> Result<bool, BoxError> {
        match self.0 {
            Value::Bool(b) => Ok(*b),
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "t" | "true" | "y" | "yes" | "on" | "1" => Ok(true),
                "f" | "false" | "n" | "no" | "off" | "0" => Ok(false),
                _ => Err(self.mismatch("boolean")),
            },
            _ => Err(self.mismatch("boolean")),
        }
    }

    fn as_i64(&self) -> Result<i64, BoxError> {
        match self.0 {
            Value::Number(n) => n.as_i64().ok_or_else(|| self.mismatch("integer")),
            Value::String(s) => s.trim().parse().map_err(|_| self.mismatch("integer")),
            _ => Err(self.mismatch("integer")),
        }
    }

    fn as_f64(&self) -> Result<f64, BoxError> {
        match self.0 {
            Value::Number(n) => n.as_f64().ok_or_else(|| self.mismatch("number")),
            Value::String(s) => s.trim().parse().map_err(|_| self.mismatch("number")),
            _ => Err(self.mismatch("number")),
        }
    }

    fn as_str(&self) -> Result<&str, BoxError> {
        self.0.as_str().ok_or_else(|| self.mismatch("string"))
    }

    /// Text form: strings as-is, everything else as JSON.
    fn as_text(&self) -> Cow<'_, str> {
        match self.0 {
            Value::String(s) => Cow::Borrowed(s.as_str()),
            other => Cow::Owned(other.to_string()),
        }
    }

    fn mismatch(&self, expected: &str) -> BoxError {
        format!("cannot bind {} as {expected}", self.0).into()
    }
}

fn parse_timestamp(text: &str) -> Result<NaiveDateTime, BoxError> {
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|dt| dt.naive_utc())
        })
        .ok_or_else(|| format!("invalid timestamp '{text}'").into())
}

fn parse_timestamptz(text: &str) -> Result<DateTime<Utc>, BoxError> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| parse_timestamp(text).map(|naive| naive.and_utc()))
        .map_err(|_| format!("invalid timestamptz '{text}'").into())
}

fn parse_bytea(text: &str) -> Result<Vec<u8>, BoxError> {
    let hex_digits = text.strip_prefix("\\x").unwrap_or(text);
    hex::decode(hex_digits).map_err(|e| format!("invalid bytea hex string: {e}").into())
}

impl ToSql for JsonParam<'_> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        if self.0.is_null() {
            return Ok(IsNull::Yes);
        }

        match *ty {
            Type::BOOL => self.as_bool()?.to_sql(ty, out),
            Type::INT2 => i16::try_from(self.as_i64()?)?.to_sql(ty, out),
            Type::INT4 => i32::try_from(self.as_i64()?)?.to_sql(ty, out),
            Type::INT8 => self.as_i64()?.to_sql(ty, out),
            Type::OID => u32::try_from(self.as_i64()?)?.to_sql(ty, out),
            Type::FLOAT4 => (self.as_f64()? as f32).to_sql(ty, out),
            Type::FLOAT8 => self.as_f64()?.to_sql(ty, out),
            Type::NUMERIC => {
                numeric::encode(&self.as_text(), out)?;
                Ok(IsNull::No)
            },
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
                <&str as ToSql>::to_sql(&&*self.as_text(), ty, out)
            },
            Type::JSON | Type::JSONB => self.0.to_sql(ty, out),
            Type::UUID => uuid::Uuid::parse_str(self.as_str()?)?.to_sql(ty, out),
            Type::TIMESTAMP => parse_timestamp(self.as_str()?)?.to_sql(ty, out),
            Type::TIMESTAMPTZ => parse_timestamptz(self.as_str()?)?.to_sql(ty, out),
            Type::DATE => NaiveDate::parse_from_str(self.as_str()?, "%Y-%m-%d")?.to_sql(ty, out),
            Type::TIME => NaiveTime::parse_from_str(self.as_str()?, "%H:%M:%S%.f")?.to_sql(ty, out),
            Type::BYTEA => parse_bytea(self.as_str()?)?.to_sql(ty, out),
            _ => match (ty.kind(), self.0) {
                (Kind::Array(_), Value::Array(items)) => items
                    .iter()
                    .map(JsonParam)
                    .collect::<Vec<_>>()
                    .to_sql(ty, out),
                // Enum labels travel as their text in the binary format.
                (Kind::Enum(_), _) => {
                    <&str as ToSql>::to_sql(&&*self.as_text(), &Type::TEXT, out)
                },
                (Kind::Domain(base), _) => self.to_sql(base, out),
                _ => Err(format!("unsupported parameter type '{ty}'").into()),
            },
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    fn to_sql_checked(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        self.to_sql(ty, out)
    }
}
