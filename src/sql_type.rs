//! Defines `SqlType`, the compact description of a SQL column or value type, and the type inference rules for
//! arithmetic and comparison.
use std::str::FromStr;
use thiserror::Error;

/// Largest number of decimal digits a `Numeric` can hold in its 64-bit representation.
pub const NUMERIC_MAX_DIGITS: u8 = 18;

/// True when SQL NULL is encoded in-band with a per-type sentinel rather than a separate indicator.
/// This is a build-wide choice (`null-sentinel` feature), never mixed within one binary.
pub const NULL_SENTINEL_ENCODING: bool = cfg!(feature = "null-sentinel");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// The shape of a SQL type, without nullability.
pub enum SqlTypeKind {
    /// Type of the literal `NULL` before it is known what it will be compared or combined with.
    Unknown,
    Bool,
    Integer,
    Char { length: u16 },
    Varchar { capacity: u16 },
    /// Fixed point: `length` total digits, `precision` of them after the decimal point.
    Numeric { length: u8, precision: u8 },
    Date,
    Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SqlType {
    pub kind: SqlTypeKind,
    pub nullable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EqualityMode {
    Full,
    /// Compares only the shape; a nullable and a non-nullable value of the same shape are compatible.
    WithoutNullable,
}

impl SqlType {
    pub const fn new(kind: SqlTypeKind) -> SqlType {
        SqlType {
            kind,
            nullable: false,
        }
    }
    pub const fn unknown() -> SqlType {
        SqlType {
            kind: SqlTypeKind::Unknown,
            nullable: true,
        }
    }
    pub const fn bool() -> SqlType {
        SqlType::new(SqlTypeKind::Bool)
    }
    pub const fn integer() -> SqlType {
        SqlType::new(SqlTypeKind::Integer)
    }
    pub const fn numeric(length: u8, precision: u8) -> SqlType {
        SqlType::new(SqlTypeKind::Numeric { length, precision })
    }
    pub const fn char(length: u16) -> SqlType {
        SqlType::new(SqlTypeKind::Char { length })
    }
    pub const fn varchar(capacity: u16) -> SqlType {
        SqlType::new(SqlTypeKind::Varchar { capacity })
    }
    pub const fn date() -> SqlType {
        SqlType::new(SqlTypeKind::Date)
    }
    pub const fn timestamp() -> SqlType {
        SqlType::new(SqlTypeKind::Timestamp)
    }

    /// the same shape, with `nullable` set.
    pub const fn as_nullable(self) -> SqlType {
        SqlType {
            kind: self.kind,
            nullable: true,
        }
    }

    pub const fn as_not_nullable(self) -> SqlType {
        SqlType {
            kind: self.kind,
            nullable: false,
        }
    }

    pub fn with_nullable(self, nullable: bool) -> SqlType {
        SqlType {
            kind: self.kind,
            nullable,
        }
    }

    pub fn equals(&self, other: &SqlType, mode: EqualityMode) -> bool {
        match mode {
            EqualityMode::Full => self == other,
            EqualityMode::WithoutNullable => self.kind == other.kind,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.kind == SqlTypeKind::Unknown
    }

    pub fn is_string(&self) -> bool {
        matches!(self.kind, SqlTypeKind::Char { .. } | SqlTypeKind::Varchar { .. })
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self.kind, SqlTypeKind::Numeric { .. })
    }

    /// Digits after the decimal point; zero for everything but `Numeric`.
    pub fn precision(&self) -> u8 {
        match self.kind {
            SqlTypeKind::Numeric { precision, .. } => precision,
            _ => 0,
        }
    }

    /// Whether values of the two types can be compared with each other.
    /// Strings compare by content, so `Char`/`Varchar` lengths do not matter here.
    pub fn comparable_with(&self, other: &SqlType) -> bool {
        match (self.kind, other.kind) {
            (SqlTypeKind::Char { .. }, SqlTypeKind::Char { .. }) => true,
            (SqlTypeKind::Varchar { .. }, SqlTypeKind::Varchar { .. }) => true,
            _ => self.equals(other, EqualityMode::WithoutNullable),
        }
    }

    /// size in bytes of a non-null value of this type in table columns and tuples.
    /// Strings are stored as a `{ptr, len}` handle.
    pub fn storage_size(&self) -> usize {
        match self.kind {
            SqlTypeKind::Unknown => 0,
            SqlTypeKind::Bool => 1,
            SqlTypeKind::Integer | SqlTypeKind::Date => 4,
            SqlTypeKind::Numeric { .. } | SqlTypeKind::Timestamp => 8,
            SqlTypeKind::Char { .. } | SqlTypeKind::Varchar { .. } => 16,
        }
    }

    pub fn alignment(&self) -> usize {
        match self.storage_size() {
            0 => 1,
            n => n.min(8),
        }
    }

    /// The bit pattern that marks NULL when `NULL_SENTINEL_ENCODING` is in effect.
    /// For strings this is the pointer half of the handle.
    pub fn null_sentinel(&self) -> u64 {
        match self.kind {
            SqlTypeKind::Unknown => 0,
            SqlTypeKind::Bool => 2,
            SqlTypeKind::Integer | SqlTypeKind::Date => i32::MIN as i64 as u64,
            SqlTypeKind::Numeric { .. } | SqlTypeKind::Timestamp => i64::MIN as u64,
            SqlTypeKind::Char { .. } | SqlTypeKind::Varchar { .. } => 0,
        }
    }
}

impl std::fmt::Display for SqlType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            SqlTypeKind::Unknown => write!(f, "unknown")?,
            SqlTypeKind::Bool => write!(f, "bool")?,
            SqlTypeKind::Integer => write!(f, "integer")?,
            SqlTypeKind::Char { length } => write!(f, "char({})", length)?,
            SqlTypeKind::Varchar { capacity } => write!(f, "varchar({})", capacity)?,
            SqlTypeKind::Numeric { length, precision } => write!(f, "numeric({},{})", length, precision)?,
            SqlTypeKind::Date => write!(f, "date")?,
            SqlTypeKind::Timestamp => write!(f, "timestamp")?,
        }
        if self.nullable && !self.is_unknown() {
            write!(f, " null")?;
        }
        Ok(())
    }
}

#[derive(Error, Debug, PartialEq, Eq, Clone)]
pub enum Error {
    #[error("Unable to parse SqlType from creation SQL: {0}.")]
    ParseSqlTypeError(String),
    #[error("cannot {op} '{lhs}' and '{rhs}'")]
    IncompatibleTypes {
        op: &'static str,
        lhs: SqlType,
        rhs: SqlType,
    },
    #[error("cannot apply {op} to '{ty}'")]
    InvalidOperand { op: &'static str, ty: SqlType },
    #[error("numeric({0},{1}) is out of range")]
    NumericOutOfRange(u8, u8),
}

fn parse_args(s: &str, name: &str) -> Option<Vec<u32>> {
    let rest = s.strip_prefix(name)?.trim();
    let inner = rest.strip_prefix('(')?.strip_suffix(')')?;
    inner.split(',').map(|a| a.trim().parse::<u32>().ok()).collect()
}

impl FromStr for SqlType {
    type Err = Error;

    /// parses names like `integer`, `numeric(10,2)`, `varchar(20) not null`, `date null`.
    /// Column types are nullable unless `not null` is given.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        let (base, nullable) = match lower.strip_suffix("not null") {
            Some(b) => (b.trim(), false),
            None => match lower.strip_suffix("null") {
                Some(b) => (b.trim(), true),
                None => (lower.as_str(), true),
            },
        };
        let err = || Error::ParseSqlTypeError(String::from(s));
        let kind = match base {
            "bool" | "boolean" => SqlTypeKind::Bool,
            "int" | "integer" => SqlTypeKind::Integer,
            "date" => SqlTypeKind::Date,
            "timestamp" => SqlTypeKind::Timestamp,
            x if x.starts_with("numeric") => match parse_args(x, "numeric").as_deref() {
                Some([l, p]) if *l <= NUMERIC_MAX_DIGITS as u32 && p <= l => SqlTypeKind::Numeric {
                    length: *l as u8,
                    precision: *p as u8,
                },
                _ => return Err(err()),
            },
            x if x.starts_with("varchar") => match parse_args(x, "varchar").as_deref() {
                Some([n]) if *n <= u16::MAX as u32 => SqlTypeKind::Varchar { capacity: *n as u16 },
                _ => return Err(err()),
            },
            x if x.starts_with("char") => match parse_args(x, "char").as_deref() {
                Some([n]) if *n <= u16::MAX as u32 => SqlTypeKind::Char { length: *n as u16 },
                _ => return Err(err()),
            },
            _ => return Err(err()),
        };
        Ok(SqlType { kind, nullable })
    }
}

// Shared handling of the NULL literal: adopt the other side's type, made nullable.
fn unknown_operand(lhs: SqlType, rhs: SqlType) -> Option<SqlType> {
    match (lhs.is_unknown(), rhs.is_unknown()) {
        (true, true) => Some(SqlType::unknown()),
        (true, false) => Some(rhs.as_nullable()),
        (false, true) => Some(lhs.as_nullable()),
        (false, false) => None,
    }
}

fn additive(op: &'static str, lhs: SqlType, rhs: SqlType) -> Result<SqlType, Error> {
    if let Some(t) = unknown_operand(lhs, rhs) {
        return Ok(t);
    }
    use SqlTypeKind::*;
    let nullable = lhs.nullable || rhs.nullable;
    let kind = match (lhs.kind, rhs.kind) {
        (Integer, Integer) => Integer,
        (Integer, n @ Numeric { .. }) | (n @ Numeric { .. }, Integer) => n,
        (
            Numeric {
                length: l1,
                precision: p1,
            },
            Numeric {
                length: l2,
                precision: p2,
            },
        ) => {
            if (p1, l1) >= (p2, l2) {
                lhs.kind
            } else {
                rhs.kind
            }
        }
        _ => return Err(Error::IncompatibleTypes { op, lhs, rhs }),
    };
    Ok(SqlType { kind, nullable })
}

pub fn infer_add_ty(lhs: SqlType, rhs: SqlType) -> Result<SqlType, Error> {
    additive("add", lhs, rhs)
}

pub fn infer_sub_ty(lhs: SqlType, rhs: SqlType) -> Result<SqlType, Error> {
    additive("subtract", lhs, rhs)
}

// Integers take part in mixed numeric arithmetic as numeric(10,0).
fn as_numeric_parts(t: SqlType) -> Option<(u8, u8)> {
    match t.kind {
        SqlTypeKind::Integer => Some((10, 0)),
        SqlTypeKind::Numeric { length, precision } => Some((length, precision)),
        _ => None,
    }
}

/// Multiplication adds up the fractional digits of both sides; the total length grows with them, capped at
/// `NUMERIC_MAX_DIGITS`.
pub fn infer_mul_ty(lhs: SqlType, rhs: SqlType) -> Result<SqlType, Error> {
    if let Some(t) = unknown_operand(lhs, rhs) {
        return Ok(t);
    }
    let nullable = lhs.nullable || rhs.nullable;
    if lhs.kind == SqlTypeKind::Integer && rhs.kind == SqlTypeKind::Integer {
        return Ok(SqlType::integer().with_nullable(nullable));
    }
    let err = || Error::IncompatibleTypes {
        op: "multiply",
        lhs,
        rhs,
    };
    let (l1, p1) = as_numeric_parts(lhs).ok_or_else(err)?;
    let (l2, p2) = as_numeric_parts(rhs).ok_or_else(err)?;
    let precision = p1 + p2;
    if precision > NUMERIC_MAX_DIGITS {
        return Err(Error::NumericOutOfRange(l1.saturating_add(l2), precision));
    }
    let length = (l1 + l2).clamp(precision, NUMERIC_MAX_DIGITS);
    Ok(SqlType::numeric(length, precision).with_nullable(nullable))
}

/// Division keeps the larger number of fractional digits of the two sides; it does not add them up.
pub fn infer_div_ty(lhs: SqlType, rhs: SqlType) -> Result<SqlType, Error> {
    if let Some(t) = unknown_operand(lhs, rhs) {
        return Ok(t);
    }
    use SqlTypeKind::*;
    let nullable = lhs.nullable || rhs.nullable;
    let kind = match (lhs.kind, rhs.kind) {
        (Integer, Integer) => Integer,
        (Integer, n @ Numeric { .. }) | (n @ Numeric { .. }, Integer) => n,
        (
            Numeric {
                length: l1,
                precision: p1,
            },
            Numeric {
                length: l2,
                precision: p2,
            },
        ) => Numeric {
            length: l1.max(l2),
            precision: p1.max(p2),
        },
        _ => {
            return Err(Error::IncompatibleTypes {
                op: "divide",
                lhs,
                rhs,
            })
        }
    };
    Ok(SqlType { kind, nullable })
}

pub fn infer_compare_ty(lhs: SqlType, rhs: SqlType) -> Result<SqlType, Error> {
    if lhs.is_unknown() || rhs.is_unknown() {
        return Ok(SqlType::bool().as_nullable());
    }
    if !lhs.comparable_with(&rhs) {
        return Err(Error::IncompatibleTypes {
            op: "compare",
            lhs,
            rhs,
        });
    }
    Ok(SqlType::bool().with_nullable(lhs.nullable || rhs.nullable))
}

#[test]
fn test_sql_type_is_compact() {
    assert!(std::mem::size_of::<SqlType>() <= 8);
}

#[test]
fn test_sql_type_equality_modes() {
    let a = SqlType::integer();
    let b = SqlType::integer().as_nullable();
    assert!(!a.equals(&b, EqualityMode::Full));
    assert!(a.equals(&b, EqualityMode::WithoutNullable));
    assert!(!a.equals(&SqlType::date(), EqualityMode::WithoutNullable));
}

#[test]
fn test_sql_type_from_str() {
    struct Case {
        input: &'static str,
        expected: Result<SqlType, ()>,
    }
    let cases = vec![
        Case { input: "integer", expected: Ok(SqlType::integer().as_nullable()) },
        Case { input: "INT NOT NULL", expected: Ok(SqlType::integer()) },
        Case { input: "numeric(10, 2) not null", expected: Ok(SqlType::numeric(10, 2)) },
        Case { input: "varchar(20)", expected: Ok(SqlType::varchar(20).as_nullable()) },
        Case { input: "char(1) not null", expected: Ok(SqlType::char(1)) },
        Case { input: "date null", expected: Ok(SqlType::date().as_nullable()) },
        Case { input: "timestamp not null", expected: Ok(SqlType::timestamp()) },
        Case { input: "numeric(2,4)", expected: Err(()) },
        Case { input: "numeric(40,4)", expected: Err(()) },
        Case { input: "blob", expected: Err(()) },
    ];
    for case in cases {
        let actual = SqlType::from_str(case.input).map_err(|_| ());
        assert_eq!(actual, case.expected, "input: {}", case.input);
    }
}

#[test]
fn test_infer_add_ty() {
    let int = SqlType::integer();
    let n42 = SqlType::numeric(4, 2);
    let n103 = SqlType::numeric(10, 3);
    assert_eq!(infer_add_ty(int, int), Ok(int));
    assert_eq!(infer_add_ty(int, n42), Ok(n42));
    assert_eq!(infer_add_ty(n42, int.as_nullable()), Ok(n42.as_nullable()));
    assert_eq!(infer_add_ty(n42, n103), Ok(n103));
    assert_eq!(infer_sub_ty(n103, n42), Ok(n103));
    assert_eq!(infer_add_ty(SqlType::unknown(), int), Ok(int.as_nullable()));
    assert!(infer_add_ty(int, SqlType::varchar(3)).is_err());
}

#[test]
fn test_infer_mul_and_div_precision() {
    let n42 = SqlType::numeric(4, 2);
    let mul = infer_mul_ty(n42, n42).unwrap();
    assert_eq!(mul.precision(), 4);
    assert_eq!(mul, SqlType::numeric(8, 4));
    let div = infer_div_ty(n42, n42).unwrap();
    assert_eq!(div.precision(), 2);
    assert_eq!(infer_mul_ty(SqlType::integer(), SqlType::integer()), Ok(SqlType::integer()));
    assert_eq!(infer_mul_ty(SqlType::integer(), n42), Ok(SqlType::numeric(14, 2)));
    assert_eq!(infer_div_ty(n42, SqlType::integer()), Ok(n42));
    assert_eq!(
        infer_mul_ty(SqlType::numeric(18, 10), SqlType::numeric(18, 8)),
        Ok(SqlType::numeric(18, 18))
    );
    assert!(infer_mul_ty(SqlType::numeric(18, 10), SqlType::numeric(18, 9)).is_err());
}

#[test]
fn test_infer_compare_ty() {
    let int = SqlType::integer();
    assert_eq!(infer_compare_ty(int, int.as_nullable()), Ok(SqlType::bool().as_nullable()));
    assert_eq!(infer_compare_ty(SqlType::varchar(3), SqlType::varchar(10)), Ok(SqlType::bool()));
    assert_eq!(infer_compare_ty(SqlType::char(8), SqlType::char(2)), Ok(SqlType::bool()));
    assert!(infer_compare_ty(SqlType::char(2), SqlType::varchar(2)).is_err());
    let err = infer_compare_ty(int, SqlType::varchar(10)).unwrap_err();
    assert_eq!(err.to_string(), "cannot compare 'integer' and 'varchar(10)'");
    assert!(infer_compare_ty(int, SqlType::numeric(4, 2)).is_err());
}
