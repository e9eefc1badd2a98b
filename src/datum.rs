//! Defines `Datum`, a SQL value as the host program sees it.
//!
//! Generated code never handles `Datum`s. They are used to populate tables, to write literals into a plan, and
//! to hand result rows back to the caller.  This module also owns the byte encoding of each type in table
//! columns and tuples, which generated code must agree with.

use byteorder::{ByteOrder, NativeEndian};
use enum_as_inner::EnumAsInner;

use crate::sql_type::{SqlType, SqlTypeKind, NULL_SENTINEL_ENCODING};

#[derive(Debug, Clone, PartialEq, EnumAsInner)]
pub enum Datum {
    Null,
    Bool(bool),
    Integer(i32),
    /// Scaled integer and the number of fractional digits: `Numeric(1250, 2)` is 12.50.
    Numeric(i64, u8),
    Char(String),
    Varchar(String),
    /// Days since 1970-01-01.
    Date(i32),
    /// Seconds since 1970-01-01 00:00:00.
    Timestamp(i64),
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("Value {value} does not fit type {ty}.")]
    TypeMismatch { value: String, ty: SqlType },
    #[error("NULL is not allowed for type {0}.")]
    NullNotAllowed(SqlType),
    #[error("Unable to parse {what} from '{text}'.")]
    Parse { what: &'static str, text: String },
    #[error("Value {0} is out of range.")]
    OutOfRange(String),
}

pub fn pow10(n: u8) -> i64 {
    10i64.pow(n as u32)
}

impl Datum {
    /// the type a literal of this value has on its own.
    pub fn natural_type(&self) -> SqlType {
        match self {
            Datum::Null => SqlType::unknown(),
            Datum::Bool(_) => SqlType::bool(),
            Datum::Integer(_) => SqlType::integer(),
            Datum::Numeric(raw, precision) => {
                let digits = raw.unsigned_abs().max(1).ilog10() as u8 + 1;
                SqlType::numeric(digits.max(*precision + 1).min(crate::sql_type::NUMERIC_MAX_DIGITS), *precision)
            }
            Datum::Char(s) => SqlType::char(s.len() as u16),
            Datum::Varchar(s) => SqlType::varchar(s.len() as u16),
            Datum::Date(_) => SqlType::date(),
            Datum::Timestamp(_) => SqlType::timestamp(),
        }
    }

    /// converts this value so it can be stored in a column of type `ty`.
    ///
    /// Integers widen to numerics, numerics are rescaled, and strings are checked against the declared length
    /// and parsed for date and timestamp columns.
    pub fn coerce(&self, ty: SqlType) -> Result<Datum, Error> {
        let mismatch = || Error::TypeMismatch {
            value: self.to_string(),
            ty,
        };
        Ok(match (self, ty.kind) {
            (Datum::Null, _) => match ty.nullable {
                true => Datum::Null,
                false => return Err(Error::NullNotAllowed(ty)),
            },
            (Datum::Bool(b), SqlTypeKind::Bool) => Datum::Bool(*b),
            (Datum::Integer(i), SqlTypeKind::Integer) => Datum::Integer(*i),
            (Datum::Integer(i), SqlTypeKind::Numeric { precision, .. }) => {
                let raw = (*i as i64).checked_mul(pow10(precision)).ok_or_else(mismatch)?;
                Datum::Numeric(raw, precision)
            }
            (Datum::Numeric(raw, p), SqlTypeKind::Numeric { precision, .. }) => {
                Datum::Numeric(rescale(*raw, *p, precision).ok_or_else(mismatch)?, precision)
            }
            (Datum::Char(s) | Datum::Varchar(s), SqlTypeKind::Char { length }) => {
                if s.len() > length as usize {
                    return Err(mismatch());
                }
                Datum::Char(s.clone())
            }
            (Datum::Char(s) | Datum::Varchar(s), SqlTypeKind::Varchar { capacity }) => {
                if s.len() > capacity as usize {
                    return Err(mismatch());
                }
                Datum::Varchar(s.clone())
            }
            (Datum::Date(d), SqlTypeKind::Date) => Datum::Date(*d),
            (Datum::Char(s) | Datum::Varchar(s), SqlTypeKind::Date) => Datum::Date(parse_date(s)?),
            (Datum::Timestamp(t), SqlTypeKind::Timestamp) => Datum::Timestamp(*t),
            (Datum::Date(d), SqlTypeKind::Timestamp) => Datum::Timestamp(*d as i64 * 86_400),
            (Datum::Char(s) | Datum::Varchar(s), SqlTypeKind::Timestamp) => Datum::Timestamp(parse_timestamp(s)?),
            _ => return Err(mismatch()),
        })
    }

    /// parses a numeric literal such as `-12.5` into a value with `precision` fractional digits.
    pub fn parse_numeric(text: &str, precision: u8) -> Result<Datum, Error> {
        let err = || Error::Parse {
            what: "numeric",
            text: text.to_string(),
        };
        let t = text.trim();
        let (neg, t) = match t.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, t),
        };
        let (int_part, frac_part) = t.split_once('.').unwrap_or((t, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(err());
        }
        if frac_part.len() > precision as usize {
            return Err(err());
        }
        let int: i64 = match int_part {
            "" => 0,
            x => x.parse().map_err(|_| err())?,
        };
        let frac: i64 = match frac_part {
            "" => 0,
            x => x.parse::<i64>().map_err(|_| err())? * pow10(precision - frac_part.len() as u8),
        };
        let raw = int
            .checked_mul(pow10(precision))
            .and_then(|v| v.checked_add(frac))
            .ok_or_else(err)?;
        Ok(Datum::Numeric(if neg { -raw } else { raw }, precision))
    }
}

fn rescale(raw: i64, from: u8, to: u8) -> Option<i64> {
    if to >= from {
        raw.checked_mul(pow10(to - from))
    } else {
        Some(raw / pow10(from - to))
    }
}

impl std::fmt::Display for Datum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Datum::Null => "NULL".fmt(f),
            Datum::Bool(b) => b.fmt(f),
            Datum::Integer(i) => i.fmt(f),
            Datum::Numeric(raw, precision) => format_numeric(*raw, *precision).fmt(f),
            Datum::Char(s) | Datum::Varchar(s) => s.fmt(f),
            Datum::Date(d) => format_date(*d).fmt(f),
            Datum::Timestamp(t) => format_timestamp(*t).fmt(f),
        }
    }
}

pub fn format_numeric(raw: i64, precision: u8) -> String {
    if precision == 0 {
        return raw.to_string();
    }
    let scale = pow10(precision) as u64;
    let abs = raw.unsigned_abs();
    format!(
        "{}{}.{:0width$}",
        if raw < 0 { "-" } else { "" },
        abs / scale,
        abs % scale,
        width = precision as usize
    )
}

// Civil date conversions after Howard Hinnant's `days_from_civil` / `civil_from_days`.
pub fn days_from_civil(y: i64, m: u32, d: u32) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = (if y >= 0 { y } else { y - 399 }) / 400;
    let yoe = y - era * 400;
    let mp = (m as i64 + 9) % 12;
    let doy = (153 * mp + 2) / 5 + d as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

pub fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = (if z >= 0 { z } else { z - 146_096 }) / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let y = yoe + era * 400 + if m <= 2 { 1 } else { 0 };
    (y, m, d)
}

pub fn format_date(days: i32) -> String {
    let (y, m, d) = civil_from_days(days as i64);
    format!("{:04}-{:02}-{:02}", y, m, d)
}

pub fn format_timestamp(secs: i64) -> String {
    let days = secs.div_euclid(86_400);
    let rem = secs.rem_euclid(86_400);
    format!(
        "{} {:02}:{:02}:{:02}",
        format_date(days as i32),
        rem / 3600,
        rem % 3600 / 60,
        rem % 60
    )
}

pub fn parse_date(text: &str) -> Result<i32, Error> {
    let err = || Error::Parse {
        what: "date",
        text: text.to_string(),
    };
    let parts: Vec<&str> = text.trim().split('-').collect();
    let [y, m, d] = parts.as_slice() else {
        return Err(err());
    };
    let y: i64 = y.parse().map_err(|_| err())?;
    let m: u32 = m.parse().map_err(|_| err())?;
    let d: u32 = d.parse().map_err(|_| err())?;
    if !(1..=12).contains(&m) || !(1..=31).contains(&d) {
        return Err(err());
    }
    i32::try_from(days_from_civil(y, m, d)).map_err(|_| err())
}

pub fn parse_timestamp(text: &str) -> Result<i64, Error> {
    let err = || Error::Parse {
        what: "timestamp",
        text: text.to_string(),
    };
    let (date, time) = text.trim().split_once(' ').unwrap_or((text.trim(), "00:00:00"));
    let days = parse_date(date)? as i64;
    let hms: Vec<u32> = time
        .split(':')
        .map(|p| p.parse::<u32>().map_err(|_| err()))
        .collect::<Result<_, _>>()?;
    let [h, mi, s] = *hms.as_slice() else {
        return Err(err());
    };
    if h > 23 || mi > 59 || s > 59 {
        return Err(err());
    }
    Ok(days * 86_400 + (h * 3600 + mi * 60 + s) as i64)
}

/// owns the bytes that string handles in a table or a compiled module point to.
/// Strings are never moved or freed before the heap is dropped.
#[derive(Debug, Default)]
pub struct StringHeap {
    strings: Vec<Box<[u8]>>,
}

impl StringHeap {
    pub fn new() -> StringHeap {
        StringHeap { strings: vec![] }
    }

    /// copies `bytes` into the heap and returns the address of the copy.
    pub fn intern(&mut self, bytes: &[u8]) -> u64 {
        if bytes.is_empty() {
            // Empty strings still need a non-null address: a null pointer marks NULL under sentinel encoding.
            self.strings.push(Box::new([0u8]));
        } else {
            self.strings.push(bytes.to_vec().into_boxed_slice());
        }
        self.strings.last().map(|b| b.as_ptr() as u64).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

/// writes the non-null `value` of type `ty` into `out`, which must be `ty.storage_size()` bytes.
/// `value` must already be coerced to `ty`.
pub fn encode(value: &Datum, ty: SqlType, out: &mut [u8], heap: &mut StringHeap) -> Result<(), Error> {
    match (value, ty.kind) {
        (Datum::Null, _) => encode_null(ty, out),
        (Datum::Bool(b), SqlTypeKind::Bool) => out[0] = *b as u8,
        (Datum::Integer(i), SqlTypeKind::Integer) | (Datum::Date(i), SqlTypeKind::Date) => {
            NativeEndian::write_i32(out, *i)
        }
        (Datum::Numeric(raw, _), SqlTypeKind::Numeric { .. }) | (Datum::Timestamp(raw), SqlTypeKind::Timestamp) => {
            NativeEndian::write_i64(out, *raw)
        }
        (Datum::Char(s) | Datum::Varchar(s), SqlTypeKind::Char { .. } | SqlTypeKind::Varchar { .. }) => {
            let ptr = heap.intern(s.as_bytes());
            NativeEndian::write_u64(&mut out[0..8], ptr);
            NativeEndian::write_u64(&mut out[8..16], s.len() as u64);
        }
        _ => {
            return Err(Error::TypeMismatch {
                value: value.to_string(),
                ty,
            })
        }
    }
    Ok(())
}

/// writes the sentinel pattern for NULL (all zeroes when NULL is tracked out-of-band).
pub fn encode_null(ty: SqlType, out: &mut [u8]) {
    out.fill(0);
    if !NULL_SENTINEL_ENCODING {
        return;
    }
    let sentinel = ty.null_sentinel();
    match ty.storage_size() {
        1 => out[0] = sentinel as u8,
        4 => NativeEndian::write_u32(out, sentinel as u32),
        8 | 16 => NativeEndian::write_u64(&mut out[0..8], sentinel),
        _ => {}
    }
}

/// reads a value of type `ty` from `bytes`. Under sentinel encoding a nullable type's sentinel decodes to NULL.
///
/// # Safety
///
/// String handles in `bytes` must point at live memory of the recorded length.
pub unsafe fn decode(ty: SqlType, bytes: &[u8]) -> Datum {
    if NULL_SENTINEL_ENCODING && ty.nullable && is_sentinel(ty, bytes) {
        return Datum::Null;
    }
    match ty.kind {
        SqlTypeKind::Unknown => Datum::Null,
        SqlTypeKind::Bool => Datum::Bool(bytes[0] != 0),
        SqlTypeKind::Integer => Datum::Integer(NativeEndian::read_i32(bytes)),
        SqlTypeKind::Date => Datum::Date(NativeEndian::read_i32(bytes)),
        SqlTypeKind::Numeric { precision, .. } => Datum::Numeric(NativeEndian::read_i64(bytes), precision),
        SqlTypeKind::Timestamp => Datum::Timestamp(NativeEndian::read_i64(bytes)),
        SqlTypeKind::Char { .. } | SqlTypeKind::Varchar { .. } => {
            let ptr = NativeEndian::read_u64(&bytes[0..8]) as *const u8;
            let len = NativeEndian::read_u64(&bytes[8..16]) as usize;
            let s = match len {
                0 => String::new(),
                _ => String::from_utf8_lossy(std::slice::from_raw_parts(ptr, len)).into_owned(),
            };
            match ty.kind {
                SqlTypeKind::Char { .. } => Datum::Char(s),
                _ => Datum::Varchar(s),
            }
        }
    }
}

fn is_sentinel(ty: SqlType, bytes: &[u8]) -> bool {
    let sentinel = ty.null_sentinel();
    match ty.storage_size() {
        1 => bytes[0] as u64 == sentinel,
        4 => NativeEndian::read_u32(bytes) as u64 == sentinel & 0xffff_ffff,
        8 | 16 => NativeEndian::read_u64(&bytes[0..8]) == sentinel,
        _ => true,
    }
}

#[test]
fn test_datum_display() {
    struct Case {
        value: Datum,
        expected: &'static str,
    }
    let cases = vec![
        Case { value: Datum::Null, expected: "NULL" },
        Case { value: Datum::Integer(-7), expected: "-7" },
        Case { value: Datum::Numeric(1250, 2), expected: "12.50" },
        Case { value: Datum::Numeric(-5, 2), expected: "-0.05" },
        Case { value: Datum::Numeric(42, 0), expected: "42" },
        Case { value: Datum::Date(0), expected: "1970-01-01" },
        Case { value: Datum::Date(19_723), expected: "2024-01-01" },
        Case { value: Datum::Timestamp(86_400 + 3_723), expected: "1970-01-02 01:02:03" },
        Case { value: Datum::Varchar("abc".to_string()), expected: "abc" },
        Case { value: Datum::Bool(true), expected: "true" },
    ];
    for case in cases {
        assert_eq!(case.value.to_string(), case.expected);
    }
}

#[test]
fn test_datum_is_null() {
    assert!(Datum::Null.is_null());
    assert!(!Datum::Integer(0).is_null());
    assert!(!Datum::Varchar(String::new()).is_null());
}

#[test]
fn test_datum_coerce() {
    let n = SqlType::numeric(6, 2);
    assert_eq!(Datum::Integer(3).coerce(n), Ok(Datum::Numeric(300, 2)));
    assert_eq!(Datum::Numeric(12345, 3).coerce(n), Ok(Datum::Numeric(1234, 2)));
    assert_eq!(
        Datum::Varchar("2024-01-01".to_string()).coerce(SqlType::date()),
        Ok(Datum::Date(19_723))
    );
    assert!(Datum::Varchar("toolong".to_string()).coerce(SqlType::char(3)).is_err());
    assert_eq!(
        Datum::Null.coerce(SqlType::integer()),
        Err(Error::NullNotAllowed(SqlType::integer()))
    );
    assert_eq!(Datum::Null.coerce(SqlType::integer().as_nullable()), Ok(Datum::Null));
}

#[test]
fn test_parse_numeric() {
    assert_eq!(Datum::parse_numeric("12.5", 2), Ok(Datum::Numeric(1250, 2)));
    assert_eq!(Datum::parse_numeric("-0.25", 2), Ok(Datum::Numeric(-25, 2)));
    assert_eq!(Datum::parse_numeric("7", 1), Ok(Datum::Numeric(70, 1)));
    assert!(Datum::parse_numeric("1.234", 2).is_err());
    assert!(Datum::parse_numeric("x", 2).is_err());
}

#[test]
fn test_date_round_trip_through_civil() {
    for days in [-1_000_000i64, -1, 0, 59, 365, 11_016, 2_932_896] {
        let (y, m, d) = civil_from_days(days);
        assert_eq!(days_from_civil(y, m, d), days);
    }
    assert_eq!(parse_timestamp("1970-01-02 01:02:03"), Ok(86_400 + 3_723));
}

#[test]
fn test_encode_decode_column_bytes() {
    let mut heap = StringHeap::new();
    let cases = vec![
        (Datum::Integer(-12), SqlType::integer()),
        (Datum::Numeric(1250, 2), SqlType::numeric(6, 2)),
        (Datum::Varchar("hello".to_string()), SqlType::varchar(10)),
        (Datum::Char(String::new()), SqlType::char(1)),
        (Datum::Bool(true), SqlType::bool()),
        (Datum::Date(10), SqlType::date()),
    ];
    for (value, ty) in cases {
        let mut buf = vec![0u8; ty.storage_size()];
        encode(&value, ty, &mut buf, &mut heap).unwrap();
        assert_eq!(unsafe { decode(ty, &buf) }, value);
    }
}
