//! Converting PostgreSQL rows and column metadata to JSON.
//!
//! Every column is read through [`PgValue`], which decodes the binary wire
//! format by column type. Arrays decode through their element type, domains
//! through their base type, and enum labels come back as text. A type with
//! no decoder fails the row instead of turning into `null`.

use std::error::Error;
use std::net::IpAddr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use tokio_postgres::types::{FromSql, Kind, Type};
use tokio_postgres::{Column, Row as PgRow};

use super::numeric;
use crate::proxy::types::{Field, Row};

type BoxError = Box<dyn Error + Sync + Send>;

/// Describes a result column.
pub fn field(column: &Column) -> Field {
    Field {
        name: column.name().to_string(),
        data_type_id: column.type_().oid(),
        data_type_name: column.type_().name().to_string(),
        table_id: column.table_oid(),
        column_id: column.column_id(),
    }
}

/// Describes a column of a simple-protocol result, where every value is text.
pub fn text_field(name: &str) -> Field {
    Field {
        name: name.to_string(),
        data_type_id: Type::TEXT.oid(),
        data_type_name: Type::TEXT.name().to_string(),
        table_id: None,
        column_id: None,
    }
}

/// Converts a row into a column-name map. Later duplicate names win.
pub fn row_to_json(row: &PgRow) -> Result<Row, tokio_postgres::Error> {
    let mut map = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        let PgValue(value) = row.try_get::<_, PgValue>(index)?;
        map.insert(column.name().to_string(), value);
    }
    Ok(map)
}

/// Any column value as JSON. SQL `NULL` becomes `null`.
struct PgValue(Value);

impl<'a> FromSql<'a> for PgValue {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        decode(ty, raw).map(Self)
    }

    fn from_sql_null(_ty: &Type) -> Result<Self, BoxError> {
        Ok(Self(Value::Null))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

fn decode(ty: &Type, raw: &[u8]) -> Result<Value, BoxError> {
    let value = match *ty {
        Type::BOOL => Value::from(bool::from_sql(ty, raw)?),
        Type::INT2 => Value::from(i16::from_sql(ty, raw)?),
        Type::INT4 => Value::from(i32::from_sql(ty, raw)?),
        Type::INT8 => Value::from(i64::from_sql(ty, raw)?),
        Type::OID => Value::from(u32::from_sql(ty, raw)?),
        // Through the shortest decimal text, so 0.1::float4 reads as 0.1.
        Type::FLOAT4 => Value::from(f32::from_sql(ty, raw)?.to_string().parse::<f64>()?),
        Type::FLOAT8 => Value::from(f64::from_sql(ty, raw)?),
        Type::NUMERIC => Value::from(numeric::decode(raw)?),
        Type::TEXT
        | Type::VARCHAR
        | Type::BPCHAR
        | Type::NAME
        | Type::UNKNOWN
        | Type::XML
        | Type::CHAR => Value::from(text(raw)?),
        Type::JSON | Type::JSONB => Value::from_sql(ty, raw)?,
        Type::UUID => Value::from(uuid::Uuid::from_sql(ty, raw)?.to_string()),
        Type::TIMESTAMP => Value::from(
            NaiveDateTime::from_sql(ty, raw)?
                .format("%Y-%m-%dT%H:%M:%S%.f")
                .to_string(),
        ),
        Type::TIMESTAMPTZ => Value::from(DateTime::<Utc>::from_sql(ty, raw)?.to_rfc3339()),
        Type::DATE => Value::from(NaiveDate::from_sql(ty, raw)?.to_string()),
        Type::TIME => Value::from(clock(read_i64(&mut &raw[..])?)),
        Type::TIMETZ => Value::from(decode_timetz(raw)?),
        Type::INTERVAL => Value::from(decode_interval(raw)?),
        Type::INET => Value::from(decode_inet(raw, false)?),
        Type::CIDR => Value::from(decode_inet(raw, true)?),
        Type::BYTEA => Value::from(format!("\\x{}", hex::encode(raw))),
        Type::VOID => Value::from(""),
        _ => match ty.kind() {
            Kind::Enum(_) => Value::from(text(raw)?),
            Kind::Array(element) => decode_array(element, raw)?,
            Kind::Domain(base) => decode(base, raw)?,
            _ if ty.name() == "citext" => Value::from(text(raw)?),
            _ => return Err(format!("unsupported column type '{ty}'").into()),
        },
    };
    Ok(value)
}

fn text(raw: &[u8]) -> Result<String, BoxError> {
    Ok(std::str::from_utf8(raw)?.to_string())
}

fn read_i32(buf: &mut &[u8]) -> Result<i32, BoxError> {
    let bytes = *buf;
    let (head, rest) = bytes.split_first_chunk::<4>().ok_or("value is truncated")?;
    *buf = rest;
    Ok(i32::from_be_bytes(*head))
}

fn read_i64(buf: &mut &[u8]) -> Result<i64, BoxError> {
    let bytes = *buf;
    let (head, rest) = bytes.split_first_chunk::<8>().ok_or("value is truncated")?;
    *buf = rest;
    Ok(i64::from_be_bytes(*head))
}

/// Array header, one `(length, lower bound)` pair per dimension, then
/// length-prefixed elements in row-major order. Multi-dimensional arrays
/// come back as nested JSON arrays.
fn decode_array(element: &Type, raw: &[u8]) -> Result<Value, BoxError> {
    let mut buf = raw;
    let ndim = read_i32(&mut buf)?;
    let _has_nulls = read_i32(&mut buf)?;
    let _element_oid = read_i32(&mut buf)?;

    let mut dims = Vec::new();
    for _ in 0..ndim {
        let len = read_i32(&mut buf)?;
        let _lower_bound = read_i32(&mut buf)?;
        dims.push(usize::try_from(len).map_err(|_| "negative array length")?);
    }
    if dims.is_empty() {
        return Ok(Value::Array(Vec::new()));
    }

    let total: usize = dims.iter().product();
    let mut items = Vec::with_capacity(total);
    for _ in 0..total {
        let len = read_i32(&mut buf)?;
        let Ok(len) = usize::try_from(len) else {
            items.push(Value::Null);
            continue;
        };
        if buf.len() < len {
            return Err("array element is truncated".into());
        }
        let (item, rest) = buf.split_at(len);
        items.push(decode(element, item)?);
        buf = rest;
    }

    Ok(nest(&dims, &mut items.into_iter()))
}

fn nest(dims: &[usize], items: &mut impl Iterator<Item = Value>) -> Value {
    match dims {
        [] => items.next().unwrap_or(Value::Null),
        [len, inner @ ..] => Value::Array((0..*len).map(|_| nest(inner, items)).collect()),
    }
}

/// `HH:MM:SS` with trailing fractional zeros dropped, as PostgreSQL prints it.
fn clock(micros: i64) -> String {
    let sign = if micros < 0 { "-" } else { "" };
    let micros = micros.unsigned_abs();
    let secs = micros / 1_000_000;
    let frac = micros % 1_000_000;

    let mut out = format!(
        "{sign}{:02}:{:02}:{:02}",
        secs / 3600,
        secs / 60 % 60,
        secs % 60
    );
    if frac != 0 {
        out.push('.');
        out.push_str(format!("{frac:06}").trim_end_matches('0'));
    }
    out
}

/// Microseconds, then days, then months. Rendered in the default
/// `postgres` interval style, e.g. `1 year 2 mons 3 days 04:05:06`.
fn decode_interval(raw: &[u8]) -> Result<String, BoxError> {
    let mut buf = raw;
    let micros = read_i64(&mut buf)?;
    let days = read_i32(&mut buf)?;
    let months = read_i32(&mut buf)?;

    let mut parts = Vec::new();
    for (n, unit) in [(months / 12, "year"), (months % 12, "mon"), (days, "day")] {
        if n != 0 {
            let plural = if n == 1 { "" } else { "s" };
            parts.push(format!("{n} {unit}{plural}"));
        }
    }
    if micros != 0 || parts.is_empty() {
        parts.push(clock(micros));
    }
    Ok(parts.join(" "))
}

/// Time of day, then the zone as seconds west of UTC.
fn decode_timetz(raw: &[u8]) -> Result<String, BoxError> {
    let mut buf = raw;
    let micros = read_i64(&mut buf)?;
    let offset = -read_i32(&mut buf)?;

    let sign = if offset < 0 { '-' } else { '+' };
    let offset = offset.unsigned_abs();
    let mut out = format!("{}{sign}{:02}", clock(micros), offset / 3600);
    if offset % 3600 != 0 {
        out.push_str(&format!(":{:02}", offset / 60 % 60));
    }
    if offset % 60 != 0 {
        out.push_str(&format!(":{:02}", offset % 60));
    }
    Ok(out)
}

/// Family, prefix bits, cidr flag, address length, address bytes.
/// `inet` omits the prefix when it covers the whole address.
fn decode_inet(raw: &[u8], is_cidr: bool) -> Result<String, BoxError> {
    let [family, bits, _, _, addr @ ..] = raw else {
        return Err("inet value is truncated".into());
    };
    let (ip, max_bits) = match *family {
        2 => (IpAddr::from(<[u8; 4]>::try_from(addr)?), 32),
        3 => (IpAddr::from(<[u8; 16]>::try_from(addr)?), 128),
        other => return Err(format!("unknown inet address family {other}").into()),
    };

    if is_cidr || *bits != max_bits {
        Ok(format!("{ip}/{bits}"))
    } else {
        Ok(ip.to_string())
    }
}
