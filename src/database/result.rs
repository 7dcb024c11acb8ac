//! Query result types and row projection.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::Serialize;
use std::net::IpAddr;
use tokio_postgres::types::{FromSql, Kind, Type};
use tracing::debug;
use uuid::Uuid;

/// One row: column name to value, in the database's column order.
pub type Record = IndexMap<String, CellValue>;

/// Rows in the database's order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryResult {
    pub rows: Vec<Record>,
    pub row_count: usize,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(rows: Vec<Record>) -> Self {
        Self {
            row_count: rows.len(),
            rows,
        }
    }
}

/// Cell value that can hold different SQL types.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(#[serde(with = "rust_decimal::serde::float")] Decimal),
    String(String),
    DateTime(DateTime<Utc>),
    Timestamp(NaiveDateTime),
    Date(NaiveDate),
    Time(NaiveTime),
    Uuid(Uuid),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
    Array(Vec<CellValue>),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<bool> for CellValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for CellValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for CellValue {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for CellValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for CellValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for CellValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Zip column names with each row's values. No filtering, renaming or coercion.
pub fn project<I>(columns: &[String], rows: I) -> Vec<Record>
where
    I: IntoIterator<Item = Vec<CellValue>>,
{
    rows.into_iter()
        .map(|values| columns.iter().cloned().zip(values).collect())
        .collect()
}

/// Decode PostgreSQL rows and project them into records.
pub fn project_rows(
    columns: &[tokio_postgres::Column],
    rows: &[tokio_postgres::Row],
) -> Result<QueryResult, tokio_postgres::Error> {
    let names: Vec<String> = columns.iter().map(|c| c.name().to_string()).collect();
    let values = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .enumerate()
                .map(|(i, col)| cell_value(row, i, col.type_()))
                .collect::<Result<Vec<_>, _>>()
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(QueryResult::new(project(&names, values)))
}

type DecodeError = Box<dyn std::error::Error + Sync + Send>;

/// A column value of any type, as the raw bytes the server sent.
struct RawValue<'a>(&'a [u8]);

impl<'a> FromSql<'a> for RawValue<'a> {
    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, DecodeError> {
        Ok(Self(raw))
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

/// Extract one cell using the driver's native mapping for its type.
fn cell_value(
    row: &tokio_postgres::Row,
    index: usize,
    ty: &Type,
) -> Result<CellValue, tokio_postgres::Error> {
    Ok(match row.try_get::<_, Option<RawValue<'_>>>(index)? {
        Some(RawValue(raw)) => decode(ty, raw),
        None => CellValue::Null,
    })
}

/// Decode one non-null value. A value the native mapping cannot read is passed
/// through as text when it is valid UTF-8 and as bytes otherwise.
fn decode(ty: &Type, raw: &[u8]) -> CellValue {
    decode_native(ty, raw).unwrap_or_else(|e| {
        debug!("Could not decode '{}' value natively ({}); passing raw form", ty.name(), e);
        text_or_bytes(raw)
    })
}

fn decode_native(ty: &Type, raw: &[u8]) -> Result<CellValue, DecodeError> {
    let value = match ty.name() {
        "bool" => CellValue::Bool(bool::from_sql(ty, raw)?),
        "int2" => CellValue::Int(i16::from_sql(ty, raw)?.into()),
        "int4" => CellValue::Int(i32::from_sql(ty, raw)?.into()),
        "int8" => CellValue::Int(i64::from_sql(ty, raw)?),
        "oid" => CellValue::Int(u32::from_sql(ty, raw)?.into()),
        "float4" => CellValue::Float(f32::from_sql(ty, raw)?.into()),
        "float8" => CellValue::Float(f64::from_sql(ty, raw)?),
        "numeric" => CellValue::Decimal(Decimal::from_sql(ty, raw)?),
        "text" | "varchar" | "bpchar" | "name" | "unknown" | "citext" => {
            CellValue::String(String::from_sql(ty, raw)?)
        }
        "timestamptz" => CellValue::DateTime(DateTime::<Utc>::from_sql(ty, raw)?),
        "timestamp" => CellValue::Timestamp(NaiveDateTime::from_sql(ty, raw)?),
        "date" => CellValue::Date(NaiveDate::from_sql(ty, raw)?),
        "time" => CellValue::Time(NaiveTime::from_sql(ty, raw)?),
        "uuid" => CellValue::Uuid(Uuid::from_sql(ty, raw)?),
        "json" | "jsonb" => CellValue::Json(serde_json::Value::from_sql(ty, raw)?),
        "bytea" => CellValue::Bytes(Vec::<u8>::from_sql(ty, raw)?),
        "interval" => CellValue::String(interval_text(raw)?),
        "inet" | "cidr" => CellValue::String(inet_text(raw)?),
        _ => match ty.kind() {
            Kind::Array(member) => CellValue::Array(decode_array(member, raw)?),
            Kind::Domain(base) => return decode_native(base, raw),
            _ => text_or_bytes(raw),
        },
    };
    Ok(value)
}

fn text_or_bytes(raw: &[u8]) -> CellValue {
    match std::str::from_utf8(raw) {
        Ok(text) => CellValue::String(text.to_string()),
        Err(_) => CellValue::Bytes(raw.to_vec()),
    }
}

fn take<const N: usize>(buf: &mut &[u8]) -> Result<[u8; N], DecodeError> {
    let current: &[u8] = *buf;
    let (head, rest) = current
        .split_first_chunk::<N>()
        .ok_or("unexpected end of value")?;
    *buf = rest;
    Ok(*head)
}

fn read_i32(buf: &mut &[u8]) -> Result<i32, DecodeError> {
    take::<4>(buf).map(i32::from_be_bytes)
}

fn read_i64(buf: &mut &[u8]) -> Result<i64, DecodeError> {
    take::<8>(buf).map(i64::from_be_bytes)
}

/// Binary array format: header, one (length, lower bound) pair per dimension, then
/// length-prefixed elements in row-major order (length -1 is NULL).
fn decode_array(member: &Type, raw: &[u8]) -> Result<Vec<CellValue>, DecodeError> {
    let mut buf = raw;
    let ndim = read_i32(&mut buf)?;
    let _has_nulls = read_i32(&mut buf)?;
    let _element_oid = read_i32(&mut buf)?;

    let mut dims = Vec::new();
    for _ in 0..ndim {
        let len = read_i32(&mut buf)?;
        let _lower_bound = read_i32(&mut buf)?;
        dims.push(usize::try_from(len)?);
    }

    let total: usize = if dims.is_empty() { 0 } else { dims.iter().product() };
    let mut elements = Vec::with_capacity(total);
    for _ in 0..total {
        let len = read_i32(&mut buf)?;
        if len < 0 {
            elements.push(CellValue::Null);
            continue;
        }
        let len = usize::try_from(len)?;
        if buf.len() < len {
            return Err("array element truncated".into());
        }
        let (element, rest) = buf.split_at(len);
        elements.push(decode(member, element));
        buf = rest;
    }

    Ok(nest(elements, &dims))
}

/// Regroup row-major elements into one nested array per outer dimension.
fn nest(flat: Vec<CellValue>, dims: &[usize]) -> Vec<CellValue> {
    let [_, inner @ ..] = dims else {
        return flat;
    };
    if inner.is_empty() {
        return flat;
    }

    let chunk: usize = inner.iter().product();
    if chunk == 0 {
        return Vec::new();
    }

    let mut elements = flat.into_iter();
    let mut nested = Vec::new();
    loop {
        let part: Vec<CellValue> = elements.by_ref().take(chunk).collect();
        if part.is_empty() {
            break;
        }
        nested.push(CellValue::Array(nest(part, inner)));
    }
    nested
}

/// Render an interval the way PostgreSQL's default output style does,
/// e.g. `1 year 2 mons 3 days 04:05:06.5`.
fn interval_text(raw: &[u8]) -> Result<String, DecodeError> {
    let mut buf = raw;
    let micros = read_i64(&mut buf)?;
    let days = read_i32(&mut buf)?;
    let months = read_i32(&mut buf)?;

    let mut parts = Vec::new();
    for (n, singular, plural) in [
        (months / 12, "year", "years"),
        (months % 12, "mon", "mons"),
        (days, "day", "days"),
    ] {
        if n != 0 {
            parts.push(format!("{n} {}", if n == 1 { singular } else { plural }));
        }
    }

    if micros != 0 || parts.is_empty() {
        let sign = if micros < 0 { "-" } else { "" };
        let total = micros.unsigned_abs();
        let (secs, frac) = (total / 1_000_000, total % 1_000_000);
        let mut time = format!(
            "{sign}{:02}:{:02}:{:02}",
            secs / 3600,
            secs / 60 % 60,
            secs % 60
        );
        if frac != 0 {
            let frac = format!("{frac:06}");
            time.push('.');
            time.push_str(frac.trim_end_matches('0'));
        }
        parts.push(time);
    }

    Ok(parts.join(" "))
}

/// Render `inet`/`cidr`: the prefix length is shown for `cidr` and for `inet`
/// values narrower than a single host.
fn inet_text(raw: &[u8]) -> Result<String, DecodeError> {
    let [family, bits, is_cidr, _len, addr @ ..] = raw else {
        return Err("invalid inet value".into());
    };

    let (ip, host_bits) = match (*family, addr.len()) {
        (2, 4) => {
            let octets: [u8; 4] = addr.try_into()?;
            (IpAddr::from(octets), 32)
        }
        (3, 16) => {
            let octets: [u8; 16] = addr.try_into()?;
            (IpAddr::from(octets), 128)
        }
        _ => return Err("invalid inet address family".into()),
    };

    if *is_cidr != 0 || *bits != host_bits {
        Ok(format!("{ip}/{bits}"))
    } else {
        Ok(ip.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn names(cols: &[&str]) -> Vec<String> {
        cols.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_project_preserves_column_and_row_order() {
        let columns = names(&["zeta", "alpha", "mid"]);
        let rows = vec![
            vec![CellValue::Int(1), "a".into(), CellValue::Null],
            vec![CellValue::Int(2), "b".into(), CellValue::Bool(true)],
        ];

        let records = project(&columns, rows);
        assert_eq!(records.len(), 2);

        let keys: Vec<&str> = records[0].keys().map(String::as_str).collect();
        assert_eq!(keys, ["zeta", "alpha", "mid"]);
        assert_eq!(records[0]["zeta"], CellValue::Int(1));
        assert_eq!(records[1]["zeta"], CellValue::Int(2));

        let body = serde_json::to_string(&records).unwrap();
        assert_eq!(
            body,
            r#"[{"zeta":1,"alpha":"a","mid":null},{"zeta":2,"alpha":"b","mid":true}]"#
        );
    }

    #[test]
    fn test_project_empty() {
        let records = project(&names(&["one"]), Vec::<Vec<CellValue>>::new());
        assert!(records.is_empty());
        assert_eq!(serde_json::to_value(&records).unwrap(), json!([]));

        let result = QueryResult::empty();
        assert_eq!(result.row_count, 0);
        assert_eq!(serde_json::to_value(&result.rows).unwrap(), json!([]));
    }

    #[test]
    fn test_cell_serialization() {
        assert_eq!(serde_json::to_value(CellValue::Int(1)).unwrap(), json!(1));
        assert_eq!(serde_json::to_value(CellValue::Null).unwrap(), json!(null));
        assert_eq!(
            serde_json::to_value(CellValue::Decimal(Decimal::new(125, 2))).unwrap(),
            json!(1.25)
        );
        assert_eq!(
            serde_json::to_value(CellValue::Json(json!({"k": [1, 2]}))).unwrap(),
            json!({"k": [1, 2]})
        );
        assert_eq!(
            serde_json::to_value(CellValue::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()))
                .unwrap(),
            json!("2024-02-29")
        );
    }

    #[test]
    fn test_option_conversion() {
        assert!(CellValue::from(None::<i64>).is_null());
        assert_eq!(CellValue::from(Some(7i64)).as_i64(), Some(7));
        assert_eq!(CellValue::from(Some("x")).as_str(), Some("x"));
    }

    #[test]
    fn test_query_result_counts_rows() {
        let result = QueryResult::new(project(
            &names(&["one"]),
            vec![vec![CellValue::Int(1)], vec![CellValue::Int(2)]],
        ));
        assert_eq!(result.row_count, 2);
    }

    fn int4_array(dims: &[i32], values: &[Option<i32>]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend((dims.len() as i32).to_be_bytes());
        buf.extend(i32::from(values.iter().any(Option::is_none)).to_be_bytes());
        buf.extend(23i32.to_be_bytes());
        for dim in dims {
            buf.extend(dim.to_be_bytes());
            buf.extend(1i32.to_be_bytes());
        }
        for value in values {
            match value {
                Some(v) => {
                    buf.extend(4i32.to_be_bytes());
                    buf.extend(v.to_be_bytes());
                }
                None => buf.extend((-1i32).to_be_bytes()),
            }
        }
        buf
    }

    fn interval(micros: i64, days: i32, months: i32) -> Vec<u8> {
        let mut buf = micros.to_be_bytes().to_vec();
        buf.extend(days.to_be_bytes());
        buf.extend(months.to_be_bytes());
        buf
    }

    #[test]
    fn test_decode_arrays() {
        let flat = decode(&Type::INT4_ARRAY, &int4_array(&[3], &[Some(1), None, Some(3)]));
        assert_eq!(serde_json::to_value(flat).unwrap(), json!([1, null, 3]));

        let grid = decode(
            &Type::INT4_ARRAY,
            &int4_array(&[2, 2], &[Some(1), Some(2), Some(3), Some(4)]),
        );
        assert_eq!(serde_json::to_value(grid).unwrap(), json!([[1, 2], [3, 4]]));

        let empty = decode(&Type::INT4_ARRAY, &int4_array(&[], &[]));
        assert_eq!(empty, CellValue::Array(Vec::new()));

        let mut text = Vec::new();
        text.extend(1i32.to_be_bytes());
        text.extend(0i32.to_be_bytes());
        text.extend(25i32.to_be_bytes());
        text.extend(2i32.to_be_bytes());
        text.extend(1i32.to_be_bytes());
        for item in ["a", "bc"] {
            text.extend((item.len() as i32).to_be_bytes());
            text.extend(item.as_bytes());
        }
        assert_eq!(
            serde_json::to_value(decode(&Type::TEXT_ARRAY, &text)).unwrap(),
            json!(["a", "bc"])
        );
    }

    #[test]
    fn test_decode_interval() {
        let hms = (2 * 3600 + 3 * 60 + 4) * 1_000_000 + 500_000;
        assert_eq!(
            decode(&Type::INTERVAL, &interval(hms, 1, 0)),
            CellValue::from("1 day 02:03:04.5")
        );
        assert_eq!(
            decode(&Type::INTERVAL, &interval(0, 3, 14)),
            CellValue::from("1 year 2 mons 3 days")
        );
        assert_eq!(
            decode(&Type::INTERVAL, &interval(0, 0, 0)),
            CellValue::from("00:00:00")
        );
        assert_eq!(
            decode(&Type::INTERVAL, &interval(-1_000_000, -1, 0)),
            CellValue::from("-1 days -00:00:01")
        );
    }

    #[test]
    fn test_decode_inet() {
        assert_eq!(
            decode(&Type::INET, &[2, 32, 0, 4, 10, 0, 0, 1]),
            CellValue::from("10.0.0.1")
        );
        assert_eq!(
            decode(&Type::CIDR, &[2, 24, 1, 4, 10, 0, 0, 0]),
            CellValue::from("10.0.0.0/24")
        );

        let mut v6 = vec![3, 128, 0, 16];
        v6.extend([0u8; 15]);
        v6.push(1);
        assert_eq!(decode(&Type::INET, &v6), CellValue::from("::1"));
    }

    #[test]
    fn test_decode_enum_and_unknown_types() {
        let mood = Type::new(
            "mood".to_string(),
            90_001,
            Kind::Enum(vec!["happy".to_string()]),
            "public".to_string(),
        );
        assert_eq!(decode(&mood, b"happy"), CellValue::from("happy"));

        let opaque = Type::new("blob".to_string(), 90_002, Kind::Simple, "public".to_string());
        assert_eq!(decode(&opaque, &[0xff, 0x00]), CellValue::Bytes(vec![0xff, 0x00]));
    }
}
