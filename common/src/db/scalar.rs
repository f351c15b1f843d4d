// Scalar extraction from a single result row

use crate::errors::QueryError;
use sqlx::mysql::MySqlRow;
use sqlx::postgres::PgRow;
use sqlx::{ColumnIndex, Row, TypeInfo, ValueRef};

/// Decode the only column of a MySQL row as a float
pub fn mysql_scalar(row: &MySqlRow) -> Result<f64, QueryError> {
    let type_name = single_column_type(row)?;

    let value = match type_name.as_str() {
        "BOOLEAN" => bool_to_f64(row.try_get_unchecked::<bool, _>(0)?),
        "FLOAT" => row.try_get_unchecked::<f32, _>(0)? as f64,
        "DOUBLE" => row.try_get_unchecked::<f64, _>(0)?,
        "DECIMAL" => {
            let text = row.try_get_unchecked::<String, _>(0)?;
            text.trim().parse::<f64>().map_err(|_| QueryError::NonNumeric {
                type_name: format!("DECIMAL ({})", text),
            })?
        }
        name if name.contains("INT") && name.ends_with("UNSIGNED") => {
            row.try_get_unchecked::<u64, _>(0)? as f64
        }
        name if name.contains("INT") => row.try_get_unchecked::<i64, _>(0)? as f64,
        _ => return Err(QueryError::NonNumeric { type_name }),
    };

    Ok(value)
}

/// Decode the only column of a PostgreSQL row as a float
pub fn postgres_scalar(row: &PgRow) -> Result<f64, QueryError> {
    let type_name = single_column_type(row)?;

    let value = match type_name.as_str() {
        "BOOL" => bool_to_f64(row.try_get::<bool, _>(0)?),
        "INT2" => row.try_get::<i16, _>(0)? as f64,
        "INT4" => row.try_get::<i32, _>(0)? as f64,
        "INT8" => row.try_get::<i64, _>(0)? as f64,
        "FLOAT4" => row.try_get::<f32, _>(0)? as f64,
        "FLOAT8" => row.try_get::<f64, _>(0)?,
        "NUMERIC" => {
            let raw = row.try_get_unchecked::<&[u8], _>(0)?;
            decode_pg_numeric(raw).ok_or_else(|| QueryError::NonNumeric {
                type_name: "NUMERIC (NaN or infinite)".to_string(),
            })?
        }
        _ => return Err(QueryError::NonNumeric { type_name }),
    };

    Ok(value)
}

/// Checks the row holds exactly one non-NULL column and returns its SQL type name
fn single_column_type<R>(row: &R) -> Result<String, QueryError>
where
    R: Row,
    usize: ColumnIndex<R>,
{
    let columns = row.len();
    if columns != 1 {
        return Err(QueryError::ColumnCount(columns));
    }

    let raw = row.try_get_raw(0)?;
    if raw.is_null() {
        return Err(QueryError::Null);
    }
    let type_name = raw.type_info().name().to_uppercase();
    Ok(type_name)
}

fn bool_to_f64(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

/// Decode the PostgreSQL binary NUMERIC representation.
///
/// Layout: ndigits, weight, sign, dscale (all 16-bit big endian) followed by
/// `ndigits` base-10000 digits. Returns `None` for NaN, infinities and
/// truncated buffers.
pub fn decode_pg_numeric(buf: &[u8]) -> Option<f64> {
    if buf.len() < 8 {
        return None;
    }

    let read = |offset: usize| [buf[offset], buf[offset + 1]];
    let ndigits = i16::from_be_bytes(read(0));
    let weight = i16::from_be_bytes(read(2)) as i32;
    let sign = match u16::from_be_bytes(read(4)) {
        0x0000 => 1.0,
        0x4000 => -1.0,
        _ => return None,
    };

    if ndigits < 0 || buf.len() < 8 + ndigits as usize * 2 {
        return None;
    }

    let value = (0..ndigits as usize)
        .map(|i| {
            let digit = i16::from_be_bytes(read(8 + i * 2)) as f64;
            digit * 10_000f64.powi(weight - i as i32)
        })
        .sum::<f64>();

    Some(sign * value)
}
