//! Defines `SqlValue`, a SQL value held in the registers of generated code.
//!
//! Every operation on a `SqlValue` emits instructions through a `FunctionBuilder`; nothing is computed at compile
//! time. A `Value` is a value that cannot be NULL, one variant per type. A `SqlValue` is either such a value, a
//! nullable value (a `Value` plus an `I1` null flag, see `nullable`), or the NULL literal whose type is not known.
//!
//! Operations that combine nullable values propagate NULL: the operation itself runs only on the path where all
//! operands are present, and the result is merged with a placeholder on the path where one is missing.

pub mod nullable;

use crate::codegen::ir::{BinOp, IntPredicate, IrType, OverflowOp, ValueId};
use crate::codegen::FunctionBuilder;
use crate::datum::{pow10, Datum};
use crate::hashing;
use crate::sql_type::{self, SqlType, SqlTypeKind};
use nullable::{NullEncoding, NullableValue};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Codegen(#[from] crate::codegen::Error),
    #[error(transparent)]
    Type(#[from] sql_type::Error),
    #[error(transparent)]
    Datum(#[from] crate::datum::Error),
    #[error("Not implemented: {0}.")]
    NotImplemented(String),
    #[error("Invalid operation: {0}.")]
    InvalidOperation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonMode {
    Less,
    Leq,
    Eq,
    Geq,
    Gtr,
}

impl ComparisonMode {
    fn predicate(&self) -> IntPredicate {
        match self {
            ComparisonMode::Less => IntPredicate::Slt,
            ComparisonMode::Leq => IntPredicate::Sle,
            ComparisonMode::Eq => IntPredicate::Eq,
            ComparisonMode::Geq => IntPredicate::Sge,
            ComparisonMode::Gtr => IntPredicate::Sgt,
        }
    }
}

impl std::fmt::Display for ComparisonMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ComparisonMode::Less => "<",
            ComparisonMode::Leq => "<=",
            ComparisonMode::Eq => "=",
            ComparisonMode::Geq => ">=",
            ComparisonMode::Gtr => ">",
        };
        s.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithOp {
    fn name(&self) -> &'static str {
        match self {
            ArithOp::Add => "add",
            ArithOp::Sub => "subtract",
            ArithOp::Mul => "multiply",
            ArithOp::Div => "divide",
        }
    }
}

impl std::fmt::Display for ArithOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArithOp::Add => "+".fmt(f),
            ArithOp::Sub => "-".fmt(f),
            ArithOp::Mul => "*".fmt(f),
            ArithOp::Div => "/".fmt(f),
        }
    }
}

/// A value that is known not to be NULL.
///
/// `Bool` is an `I8` holding 0 or 1; `Integer` and `Date` are `I32`; `Numeric` (a scaled integer) and
/// `Timestamp` are `I64`; strings are a pointer and an `I64` length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Bool(ValueId),
    Integer(ValueId),
    Numeric { raw: ValueId, length: u8, precision: u8 },
    Char { ptr: ValueId, len: ValueId, length: u16 },
    Varchar { ptr: ValueId, len: ValueId, capacity: u16 },
    Date(ValueId),
    Timestamp(ValueId),
}

/// register type and byte offset of each part of a stored value.
fn parts(ty: SqlType) -> Result<&'static [(IrType, usize)], Error> {
    Ok(match ty.kind {
        SqlTypeKind::Unknown => {
            return Err(Error::InvalidOperation(
                "a value of unknown type has no representation".to_string(),
            ))
        }
        SqlTypeKind::Bool => &[(IrType::I8, 0)],
        SqlTypeKind::Integer | SqlTypeKind::Date => &[(IrType::I32, 0)],
        SqlTypeKind::Numeric { .. } | SqlTypeKind::Timestamp => &[(IrType::I64, 0)],
        SqlTypeKind::Char { .. } | SqlTypeKind::Varchar { .. } => &[(IrType::Ptr, 0), (IrType::I64, 8)],
    })
}

/// emits `op` and a check that reports an overflow when the result does not fit.
fn checked(fb: &mut FunctionBuilder, op: ArithOp, a: ValueId, b: ValueId) -> Result<ValueId, Error> {
    let (bin, ovf) = match op {
        ArithOp::Add => (BinOp::Add, OverflowOp::Add),
        ArithOp::Sub => (BinOp::Sub, OverflowOp::Sub),
        ArithOp::Mul => (BinOp::Mul, OverflowOp::Mul),
        ArithOp::Div => return divide(fb, a, b),
    };
    let r = fb.binary(bin, a, b);
    let overflowed = fb.overflows(ovf, a, b);
    let message = format!("overflow in {} of {}", op.name(), fb.value_type(a));
    report_if(fb, overflowed, "report_overflow", &message)?;
    Ok(r)
}

fn report_if(fb: &mut FunctionBuilder, cond: ValueId, routine: &str, message: &str) -> Result<(), Error> {
    fb.if_then::<Error, _>(cond, |fb| {
        let (ptr, len) = fb.const_bytes(message.as_bytes());
        fb.call(routine, &[ptr, len])?;
        Ok(())
    })
}

/// signed division that reports division by zero and yields 0 in that case.
fn divide(fb: &mut FunctionBuilder, a: ValueId, b: ValueId) -> Result<ValueId, Error> {
    let ty = fb.value_type(b);
    let zero = fb.const_int(ty, 0);
    let one = fb.const_int(ty, 1);
    let is_zero = fb.icmp(IntPredicate::Eq, b, zero);
    report_if(fb, is_zero, "report_division_by_zero", "division by zero")?;
    let divisor = fb.select(is_zero, one, b);
    let q = fb.binary(BinOp::SDiv, a, divisor);
    Ok(fb.select(is_zero, zero, q))
}

/// changes the number of fractional digits of a scaled `I64`.
fn rescale(fb: &mut FunctionBuilder, raw: ValueId, from: u8, to: u8) -> Result<ValueId, Error> {
    match to.cmp(&from) {
        std::cmp::Ordering::Equal => Ok(raw),
        std::cmp::Ordering::Greater => {
            let factor = fb.const_int(IrType::I64, pow10(to - from));
            checked(fb, ArithOp::Mul, raw, factor)
        }
        std::cmp::Ordering::Less => {
            let factor = fb.const_int(IrType::I64, pow10(from - to));
            Ok(fb.binary(BinOp::SDiv, raw, factor))
        }
    }
}

/// three-way comparison of two strings as an `I64`: negative, zero or positive.
fn string_order(fb: &mut FunctionBuilder, a: (ValueId, ValueId), b: (ValueId, ValueId)) -> Result<ValueId, Error> {
    let shorter = fb.icmp(IntPredicate::Ult, a.1, b.1);
    let n = fb.select(shorter, a.1, b.1);
    let c = fb.call_value("memcmp", &[a.0, b.0, n])?;
    let c = fb.resize(c, IrType::I64, true);
    let zero = fb.const_int(IrType::I64, 0);
    let same_prefix = fb.icmp(IntPredicate::Eq, c, zero);
    let len_diff = fb.binary(BinOp::Sub, a.1, b.1);
    Ok(fb.select(same_prefix, len_diff, c))
}

impl Value {
    pub fn ty(&self) -> SqlType {
        match *self {
            Value::Bool(_) => SqlType::bool(),
            Value::Integer(_) => SqlType::integer(),
            Value::Numeric { length, precision, .. } => SqlType::numeric(length, precision),
            Value::Char { length, .. } => SqlType::char(length),
            Value::Varchar { capacity, .. } => SqlType::varchar(capacity),
            Value::Date(_) => SqlType::date(),
            Value::Timestamp(_) => SqlType::timestamp(),
        }
    }

    /// the emitted values this value consists of, in storage order.
    pub fn raw_values(&self) -> Vec<ValueId> {
        match *self {
            Value::Bool(v) | Value::Integer(v) | Value::Date(v) | Value::Timestamp(v) => vec![v],
            Value::Numeric { raw, .. } => vec![raw],
            Value::Char { ptr, len, .. } | Value::Varchar { ptr, len, .. } => vec![ptr, len],
        }
    }

    pub fn from_raw_values(ty: SqlType, raw: &[ValueId]) -> Result<Value, Error> {
        Ok(match (ty.kind, raw) {
            (SqlTypeKind::Bool, [v]) => Value::Bool(*v),
            (SqlTypeKind::Integer, [v]) => Value::Integer(*v),
            (SqlTypeKind::Numeric { length, precision }, [v]) => Value::Numeric {
                raw: *v,
                length,
                precision,
            },
            (SqlTypeKind::Char { length }, [p, l]) => Value::Char {
                ptr: *p,
                len: *l,
                length,
            },
            (SqlTypeKind::Varchar { capacity }, [p, l]) => Value::Varchar {
                ptr: *p,
                len: *l,
                capacity,
            },
            (SqlTypeKind::Date, [v]) => Value::Date(*v),
            (SqlTypeKind::Timestamp, [v]) => Value::Timestamp(*v),
            _ => {
                return Err(Error::InvalidOperation(format!(
                    "{} emitted values do not make a {}",
                    raw.len(),
                    ty
                )))
            }
        })
    }

    fn build<F>(fb: &mut FunctionBuilder, ty: SqlType, mut part: F) -> Result<Value, Error>
    where
        F: FnMut(&mut FunctionBuilder, IrType, usize) -> ValueId,
    {
        let raw: Vec<ValueId> = parts(ty)?.iter().map(|(t, off)| part(fb, *t, *off)).collect();
        Value::from_raw_values(ty, &raw)
    }

    /// a placeholder of type `ty`: zero, or the empty string at the null address.
    pub fn zero(fb: &mut FunctionBuilder, ty: SqlType) -> Result<Value, Error> {
        Value::build(fb, ty, |fb, t, _| fb.const_int(t, 0))
    }

    /// emits the literal `datum`, which is converted to `ty` first.
    pub fn constant(fb: &mut FunctionBuilder, datum: &Datum, ty: SqlType) -> Result<Value, Error> {
        let ty = ty.as_not_nullable();
        let d = datum.coerce(ty)?;
        Ok(match (&d, ty.kind) {
            (Datum::Bool(b), _) => Value::Bool(fb.const_int(IrType::I8, *b as i64)),
            (Datum::Integer(i), _) => Value::Integer(fb.const_int(IrType::I32, *i as i64)),
            (Datum::Date(i), _) => Value::Date(fb.const_int(IrType::I32, *i as i64)),
            (Datum::Timestamp(t), _) => Value::Timestamp(fb.const_int(IrType::I64, *t)),
            (Datum::Numeric(raw, _), _) => {
                let raw = fb.const_int(IrType::I64, *raw);
                Value::from_raw_values(ty, &[raw])?
            }
            (Datum::Char(s) | Datum::Varchar(s), _) => {
                let (ptr, len) = fb.const_bytes(s.as_bytes());
                Value::from_raw_values(ty, &[ptr, len])?
            }
            (Datum::Null, _) => return Err(Error::Datum(crate::datum::Error::NullNotAllowed(ty))),
        })
    }

    pub fn load(fb: &mut FunctionBuilder, ty: SqlType, ptr: ValueId) -> Result<Value, Error> {
        Value::build(fb, ty, |fb, t, off| {
            let p = fb.ptr_offset(ptr, off);
            fb.load(t, p)
        })
    }

    pub fn store(&self, fb: &mut FunctionBuilder, ptr: ValueId) -> Result<(), Error> {
        for (v, (_, off)) in self.raw_values().into_iter().zip(parts(self.ty())?) {
            let p = fb.ptr_offset(ptr, *off);
            fb.store(v, p);
        }
        Ok(())
    }

    /// picks `a` where `cond` is true, `b` otherwise, part by part.
    pub fn select(fb: &mut FunctionBuilder, cond: ValueId, a: &Value, b: &Value) -> Result<Value, Error> {
        let raw: Vec<ValueId> = a
            .raw_values()
            .into_iter()
            .zip(b.raw_values())
            .map(|(x, y)| fb.select(cond, x, y))
            .collect();
        Value::from_raw_values(a.ty(), &raw)
    }

    pub fn hash(&self, fb: &mut FunctionBuilder) -> Result<ValueId, Error> {
        Ok(match *self {
            Value::Bool(v) => {
                let w = fb.resize(v, IrType::I64, false);
                hashing::emit_mix64(fb, w)
            }
            Value::Integer(v) | Value::Date(v) => {
                let w = fb.resize(v, IrType::I64, true);
                hashing::emit_mix64(fb, w)
            }
            Value::Numeric { raw: v, .. } | Value::Timestamp(v) => hashing::emit_mix64(fb, v),
            Value::Char { ptr, len, .. } | Value::Varchar { ptr, len, .. } => fb.call_value("hash_bytes", &[ptr, len])?,
        })
    }

    /// compares with `other`, yielding an `I1`.
    pub fn compare(&self, fb: &mut FunctionBuilder, other: &Value, mode: ComparisonMode) -> Result<ValueId, Error> {
        let pred = mode.predicate();
        Ok(match (*self, *other) {
            (Value::Bool(a), Value::Bool(b))
            | (Value::Integer(a), Value::Integer(b))
            | (Value::Date(a), Value::Date(b))
            | (Value::Timestamp(a), Value::Timestamp(b)) => fb.icmp(pred, a, b),
            (
                Value::Numeric {
                    raw: a, precision: pa, ..
                },
                Value::Numeric {
                    raw: b, precision: pb, ..
                },
            ) => {
                let p = pa.max(pb);
                let a = rescale(fb, a, pa, p)?;
                let b = rescale(fb, b, pb, p)?;
                fb.icmp(pred, a, b)
            }
            (
                Value::Char { ptr: p1, len: l1, .. } | Value::Varchar { ptr: p1, len: l1, .. },
                Value::Char { ptr: p2, len: l2, .. } | Value::Varchar { ptr: p2, len: l2, .. },
            ) if self.ty().comparable_with(&other.ty()) => {
                let order = string_order(fb, (p1, l1), (p2, l2))?;
                let zero = fb.const_int(IrType::I64, 0);
                fb.icmp(pred, order, zero)
            }
            _ => {
                return Err(Error::Type(sql_type::Error::IncompatibleTypes {
                    op: "compare",
                    lhs: self.ty(),
                    rhs: other.ty(),
                }))
            }
        })
    }

    fn arith(&self, fb: &mut FunctionBuilder, other: &Value, op: ArithOp, result_ty: SqlType) -> Result<Value, Error> {
        let incompatible = || {
            Error::Type(sql_type::Error::IncompatibleTypes {
                op: op.name(),
                lhs: self.ty(),
                rhs: other.ty(),
            })
        };
        let (length, precision) = match result_ty.kind {
            SqlTypeKind::Numeric { length, precision } => (length, precision),
            SqlTypeKind::Integer => (0, 0),
            _ => return Err(incompatible()),
        };
        let numeric = |raw| Value::Numeric {
            raw,
            length,
            precision,
        };
        // Integers take part in mixed arithmetic as numeric(10,0).
        Ok(match (*self, *other) {
            (Value::Integer(a), Value::Integer(b)) if result_ty.kind == SqlTypeKind::Integer => {
                Value::Integer(checked(fb, op, a, b)?)
            }
            (Value::Integer(a), Value::Integer(b)) => {
                let a = fb.resize(a, IrType::I64, true);
                let b = fb.resize(b, IrType::I64, true);
                let a = Value::Numeric {
                    raw: a,
                    length: 10,
                    precision: 0,
                };
                let b = Value::Numeric {
                    raw: b,
                    length: 10,
                    precision: 0,
                };
                return a.arith(fb, &b, op, result_ty);
            }
            (Value::Integer(a), b @ Value::Numeric { .. }) => {
                let a = fb.resize(a, IrType::I64, true);
                let a = Value::Numeric {
                    raw: a,
                    length: 10,
                    precision: 0,
                };
                return a.arith(fb, &b, op, result_ty);
            }
            (a @ Value::Numeric { .. }, Value::Integer(b)) => {
                let b = fb.resize(b, IrType::I64, true);
                let b = Value::Numeric {
                    raw: b,
                    length: 10,
                    precision: 0,
                };
                return a.arith(fb, &b, op, result_ty);
            }
            (
                Value::Numeric {
                    raw: a, precision: pa, ..
                },
                Value::Numeric {
                    raw: b, precision: pb, ..
                },
            ) if result_ty.is_numeric() => match op {
                ArithOp::Add | ArithOp::Sub => {
                    let a = rescale(fb, a, pa, precision)?;
                    let b = rescale(fb, b, pb, precision)?;
                    numeric(checked(fb, op, a, b)?)
                }
                ArithOp::Mul => {
                    let product = checked(fb, op, a, b)?;
                    numeric(rescale(fb, product, pa + pb, precision)?)
                }
                ArithOp::Div => {
                    // a / b with `precision` fractional digits is a * 10^(precision + pb - pa) / b on the raw values.
                    let scale = (precision + pb).saturating_sub(pa);
                    let numerator = rescale(fb, a, 0, scale)?;
                    numeric(divide(fb, numerator, b)?)
                }
            },
            _ => return Err(incompatible()),
        })
    }

    /// converts to `ty`, which must not be nullable.
    pub fn cast(&self, fb: &mut FunctionBuilder, ty: SqlType) -> Result<Value, Error> {
        let not_implemented = || Error::NotImplemented(format!("cast from {} to {}", self.ty(), ty));
        Ok(match (*self, ty.kind) {
            (v, _) if v.ty().equals(&ty, sql_type::EqualityMode::WithoutNullable) => v,
            (Value::Integer(v), SqlTypeKind::Numeric { length, precision }) => {
                let wide = fb.resize(v, IrType::I64, true);
                Value::Numeric {
                    raw: rescale(fb, wide, 0, precision)?,
                    length,
                    precision,
                }
            }
            (Value::Numeric { raw, precision: from, .. }, SqlTypeKind::Numeric { length, precision }) => Value::Numeric {
                raw: rescale(fb, raw, from, precision)?,
                length,
                precision,
            },
            (Value::Numeric { raw, precision, .. }, SqlTypeKind::Integer) => {
                let whole = rescale(fb, raw, precision, 0)?;
                Value::Integer(fb.resize(whole, IrType::I32, true))
            }
            (Value::Char { ptr, len, .. } | Value::Varchar { ptr, len, .. }, SqlTypeKind::Char { length }) => {
                Value::Char { ptr, len, length }
            }
            (Value::Char { ptr, len, .. } | Value::Varchar { ptr, len, .. }, SqlTypeKind::Varchar { capacity }) => {
                Value::Varchar { ptr, len, capacity }
            }
            (Value::Date(d), SqlTypeKind::Timestamp) => {
                let wide = fb.resize(d, IrType::I64, true);
                let day = fb.const_int(IrType::I64, 86_400);
                Value::Timestamp(checked(fb, ArithOp::Mul, wide, day)?)
            }
            _ => return Err(not_implemented()),
        })
    }

    pub fn print(&self, fb: &mut FunctionBuilder) -> Result<(), Error> {
        match *self {
            Value::Bool(v) => fb.call("print_bool", &[v])?,
            Value::Integer(v) => fb.call("print_integer", &[v])?,
            Value::Numeric { raw, precision, .. } => {
                let p = fb.const_int(IrType::I32, precision as i64);
                fb.call("print_numeric", &[raw, p])?
            }
            Value::Char { ptr, len, .. } | Value::Varchar { ptr, len, .. } => fb.call("print_string", &[ptr, len])?,
            Value::Date(v) => fb.call("print_date", &[v])?,
            Value::Timestamp(v) => fb.call("print_timestamp", &[v])?,
        };
        Ok(())
    }
}

/// A SQL value in generated code.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// the NULL literal before it is known what it will be combined with.
    Unknown,
    NotNull(Value),
    Nullable(NullableValue),
}

/// runs `f` on the operands' values when none of them is NULL; the result is NULL otherwise.
fn propagate<F>(fb: &mut FunctionBuilder, operands: &[&SqlValue], result_ty: SqlType, f: F) -> Result<SqlValue, Error>
where
    F: FnOnce(&mut FunctionBuilder, &[Value]) -> Result<Value, Error>,
{
    let result_ty = result_ty.as_not_nullable();
    let mut values = Vec::with_capacity(operands.len());
    let mut flags = vec![];
    for op in operands {
        match op {
            SqlValue::Unknown => return SqlValue::null(fb, result_ty),
            SqlValue::NotNull(v) => values.push(*v),
            SqlValue::Nullable(n) => {
                values.push(n.value);
                flags.push(n.is_null);
            }
        }
    }
    let Some((first, rest)) = flags.split_first() else {
        return Ok(SqlValue::NotNull(f(fb, &values)?));
    };
    let any_null = rest.iter().fold(*first, |acc, flag| fb.binary(BinOp::Or, acc, *flag));
    let merged = fb.if_then_else::<Error, _, _>(
        any_null,
        |fb| Ok(Value::zero(fb, result_ty)?.raw_values()),
        |fb| Ok(f(fb, &values)?.raw_values()),
    )?;
    Ok(SqlValue::Nullable(NullableValue {
        value: Value::from_raw_values(result_ty, &merged)?,
        is_null: any_null,
    }))
}

fn expect_bool(v: &SqlValue, op: &'static str) -> Result<(), Error> {
    match v.ty().kind {
        SqlTypeKind::Bool | SqlTypeKind::Unknown => Ok(()),
        _ => Err(Error::Type(sql_type::Error::InvalidOperand { op, ty: v.ty() })),
    }
}

impl SqlValue {
    pub fn ty(&self) -> SqlType {
        match self {
            SqlValue::Unknown => SqlType::unknown(),
            SqlValue::NotNull(v) => v.ty(),
            SqlValue::Nullable(n) => n.value.ty().as_nullable(),
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            SqlValue::Unknown => None,
            SqlValue::NotNull(v) => Some(v),
            SqlValue::Nullable(n) => Some(&n.value),
        }
    }

    /// NULL of type `ty`.
    pub fn null(fb: &mut FunctionBuilder, ty: SqlType) -> Result<SqlValue, Error> {
        if ty.is_unknown() {
            return Ok(SqlValue::Unknown);
        }
        Ok(SqlValue::Nullable(NullableValue {
            value: Value::zero(fb, ty)?,
            is_null: fb.const_bool(true),
        }))
    }

    pub fn constant(fb: &mut FunctionBuilder, datum: &Datum, ty: SqlType) -> Result<SqlValue, Error> {
        if datum.is_null() {
            return SqlValue::null(fb, ty);
        }
        let v = Value::constant(fb, datum, ty)?;
        SqlValue::NotNull(v).with_type_nullability(fb, ty)
    }

    /// `I1` that is true when the value is NULL.
    pub fn is_null(&self, fb: &mut FunctionBuilder) -> ValueId {
        match self {
            SqlValue::Unknown => fb.const_bool(true),
            SqlValue::NotNull(_) => fb.const_bool(false),
            SqlValue::Nullable(n) => n.is_null,
        }
    }

    /// the emitted values this value consists of; a nullable value ends with its null flag.
    pub fn raw_values(&self) -> Vec<ValueId> {
        match self {
            SqlValue::Unknown => vec![],
            SqlValue::NotNull(v) => v.raw_values(),
            SqlValue::Nullable(n) => {
                let mut raw = n.value.raw_values();
                raw.push(n.is_null);
                raw
            }
        }
    }

    /// rebuilds a value from `raw_values` of a value of type `ty`, e.g. after merging them with phis.
    pub fn from_raw_values(ty: SqlType, raw: &[ValueId]) -> Result<SqlValue, Error> {
        if ty.is_unknown() {
            return Ok(SqlValue::Unknown);
        }
        if !ty.nullable {
            return Ok(SqlValue::NotNull(Value::from_raw_values(ty, raw)?));
        }
        match raw.split_last() {
            Some((is_null, rest)) => Ok(SqlValue::Nullable(NullableValue {
                value: Value::from_raw_values(ty, rest)?,
                is_null: *is_null,
            })),
            None => Err(Error::InvalidOperation(format!("no emitted values for a {}", ty))),
        }
    }

    /// gives the value the representation of type `ty`: a value that cannot be NULL is wrapped when `ty` is
    /// nullable, so that values from different code paths have the same shape.
    pub fn with_type_nullability(self, fb: &mut FunctionBuilder, ty: SqlType) -> Result<SqlValue, Error> {
        match (self, ty.nullable) {
            (SqlValue::Unknown, _) => SqlValue::null(fb, ty.as_nullable()),
            (SqlValue::NotNull(value), true) => Ok(SqlValue::Nullable(NullableValue {
                value,
                is_null: fb.const_bool(false),
            })),
            (v @ SqlValue::NotNull(_), false) => Ok(v),
            (v @ SqlValue::Nullable(_), true) => Ok(v),
            (SqlValue::Nullable(n), false) => Err(Error::InvalidOperation(format!(
                "a nullable {} where {} is expected",
                n.value.ty(),
                ty
            ))),
        }
    }

    /// loads a value of type `ty` from `ptr`. `indicator` is the null flag read from separate storage, for
    /// encodings that keep one.
    pub fn load(
        fb: &mut FunctionBuilder,
        ty: SqlType,
        ptr: ValueId,
        indicator: Option<ValueId>,
    ) -> Result<SqlValue, Error> {
        if ty.is_unknown() {
            return Ok(SqlValue::Unknown);
        }
        let value = Value::load(fb, ty, ptr)?;
        if !ty.nullable {
            return Ok(SqlValue::NotNull(value));
        }
        let is_null = nullable::Active::null_flag_after_load(fb, &value, indicator)?;
        Ok(SqlValue::Nullable(NullableValue { value, is_null }))
    }

    /// stores the value as a field of type `ty` at `ptr`; `indicator_ptr` is where the field's null flag byte
    /// goes, if it has one.
    pub fn store(
        &self,
        fb: &mut FunctionBuilder,
        ty: SqlType,
        ptr: ValueId,
        indicator_ptr: Option<ValueId>,
    ) -> Result<(), Error> {
        if ty.is_unknown() {
            return Ok(());
        }
        if let Some(v) = self.value() {
            if v.ty().storage_size() != ty.storage_size() || v.ty().precision() != ty.precision() {
                return Err(Error::InvalidOperation(format!("cannot store a {} as {}", v.ty(), ty)));
            }
        }
        let stored = match (self, ty.nullable) {
            (SqlValue::Unknown, _) => SqlValue::null(fb, ty.as_nullable())?,
            (v, _) => v.clone().with_type_nullability(fb, ty)?,
        };
        match stored {
            SqlValue::Unknown => Ok(()),
            SqlValue::NotNull(v) => v.store(fb, ptr),
            SqlValue::Nullable(n) => {
                nullable::Active::value_to_store(fb, &n)?.store(fb, ptr)?;
                if let Some(ip) = indicator_ptr {
                    let flag = fb.resize(n.is_null, IrType::I8, false);
                    fb.store(flag, ip);
                }
                Ok(())
            }
        }
    }

    /// hash of the value; every NULL hashes to `hashing::NULL_HASH`.
    pub fn hash(&self, fb: &mut FunctionBuilder) -> Result<ValueId, Error> {
        match self {
            SqlValue::Unknown => Ok(fb.const_int(IrType::I64, hashing::NULL_HASH as i64)),
            SqlValue::NotNull(v) => v.hash(fb),
            SqlValue::Nullable(n) => {
                let h = n.value.hash(fb)?;
                let null_hash = fb.const_int(IrType::I64, hashing::NULL_HASH as i64);
                Ok(fb.select(n.is_null, null_hash, h))
            }
        }
    }

    /// identity comparison as used for grouping: two NULLs are equal, NULL and a value are not.
    pub fn equals(&self, fb: &mut FunctionBuilder, other: &SqlValue) -> Result<ValueId, Error> {
        sql_type::infer_compare_ty(self.ty(), other.ty())?;
        if let (SqlValue::NotNull(a), SqlValue::NotNull(b)) = (self, other) {
            return a.compare(fb, b, ComparisonMode::Eq);
        }
        let a_null = self.is_null(fb);
        let b_null = other.is_null(fb);
        let both_null = fb.binary(BinOp::And, a_null, b_null);
        let either_null = fb.binary(BinOp::Or, a_null, b_null);
        let same = match (self.value(), other.value()) {
            (Some(a), Some(b)) => a.compare(fb, b, ComparisonMode::Eq)?,
            _ => fb.const_bool(false),
        };
        let neither_null = fb.not(either_null);
        let same_values = fb.binary(BinOp::And, neither_null, same);
        Ok(fb.binary(BinOp::Or, both_null, same_values))
    }

    /// SQL comparison: a `Bool` that is NULL when either side is.
    pub fn compare(&self, fb: &mut FunctionBuilder, other: &SqlValue, mode: ComparisonMode) -> Result<SqlValue, Error> {
        sql_type::infer_compare_ty(self.ty(), other.ty())?;
        propagate(fb, &[self, other], SqlType::bool(), |fb, v| {
            let c = v[0].compare(fb, &v[1], mode)?;
            Ok(Value::Bool(fb.resize(c, IrType::I8, false)))
        })
    }

    /// `I1` that is true only for a `Bool` that is not NULL and true.
    pub fn is_true(&self, fb: &mut FunctionBuilder) -> Result<ValueId, Error> {
        expect_bool(self, "a condition")?;
        let zero = fb.const_int(IrType::I8, 0);
        Ok(match self {
            SqlValue::Unknown => fb.const_bool(false),
            SqlValue::NotNull(Value::Bool(v)) => fb.icmp(IntPredicate::Ne, *v, zero),
            SqlValue::Nullable(NullableValue {
                value: Value::Bool(v),
                is_null,
            }) => {
                let set = fb.icmp(IntPredicate::Ne, *v, zero);
                let present = fb.not(*is_null);
                fb.binary(BinOp::And, present, set)
            }
            _ => unreachable!("checked by expect_bool"),
        })
    }

    pub fn add(&self, fb: &mut FunctionBuilder, other: &SqlValue, result_ty: SqlType) -> Result<SqlValue, Error> {
        self.arith(fb, other, ArithOp::Add, result_ty)
    }

    pub fn sub(&self, fb: &mut FunctionBuilder, other: &SqlValue, result_ty: SqlType) -> Result<SqlValue, Error> {
        self.arith(fb, other, ArithOp::Sub, result_ty)
    }

    pub fn mul(&self, fb: &mut FunctionBuilder, other: &SqlValue, result_ty: SqlType) -> Result<SqlValue, Error> {
        self.arith(fb, other, ArithOp::Mul, result_ty)
    }

    pub fn div(&self, fb: &mut FunctionBuilder, other: &SqlValue, result_ty: SqlType) -> Result<SqlValue, Error> {
        self.arith(fb, other, ArithOp::Div, result_ty)
    }

    fn arith(&self, fb: &mut FunctionBuilder, other: &SqlValue, op: ArithOp, result_ty: SqlType) -> Result<SqlValue, Error> {
        propagate(fb, &[self, other], result_ty, |fb, v| v[0].arith(fb, &v[1], op, result_ty.as_not_nullable()))
    }

    /// converts to the shape of `ty`. NULL stays NULL.
    pub fn cast(&self, fb: &mut FunctionBuilder, ty: SqlType) -> Result<SqlValue, Error> {
        if let SqlValue::Unknown = self {
            return SqlValue::null(fb, ty);
        }
        let target = ty.as_not_nullable();
        let r = propagate(fb, &[self], target, |fb, v| v[0].cast(fb, target))?;
        match ty.nullable {
            true => r.with_type_nullability(fb, ty),
            false => Ok(r),
        }
    }

    pub fn not(&self, fb: &mut FunctionBuilder) -> Result<SqlValue, Error> {
        expect_bool(self, "not")?;
        propagate(fb, &[self], SqlType::bool(), |fb, v| match v[0] {
            Value::Bool(b) => {
                let one = fb.const_int(IrType::I8, 1);
                Ok(Value::Bool(fb.binary(BinOp::Xor, b, one)))
            }
            _ => unreachable!("checked by expect_bool"),
        })
    }

    // Splits a Bool operand into its truth value and null flag, both `I1`.
    fn truth(&self, fb: &mut FunctionBuilder) -> (ValueId, ValueId) {
        let is_null = self.is_null(fb);
        let value = match self.value() {
            Some(Value::Bool(v)) => {
                let zero = fb.const_int(IrType::I8, 0);
                fb.icmp(IntPredicate::Ne, *v, zero)
            }
            _ => fb.const_bool(false),
        };
        (value, is_null)
    }

    fn connective(&self, fb: &mut FunctionBuilder, other: &SqlValue, is_and: bool) -> Result<SqlValue, Error> {
        let op = if is_and { "and" } else { "or" };
        expect_bool(self, op)?;
        expect_bool(other, op)?;
        let bin = if is_and { BinOp::And } else { BinOp::Or };
        if let (SqlValue::NotNull(Value::Bool(a)), SqlValue::NotNull(Value::Bool(b))) = (self, other) {
            return Ok(SqlValue::NotNull(Value::Bool(fb.binary(bin, *a, *b))));
        }
        // The value that decides the result on its own: false for AND, true for OR.
        let (a, a_null) = self.truth(fb);
        let (b, b_null) = other.truth(fb);
        let (a_decides, b_decides) = if is_and {
            let not_a = fb.not(a);
            let not_b = fb.not(b);
            (not_a, not_b)
        } else {
            (a, b)
        };
        let a_present = fb.not(a_null);
        let b_present = fb.not(b_null);
        let a_decides = fb.binary(BinOp::And, a_present, a_decides);
        let b_decides = fb.binary(BinOp::And, b_present, b_decides);
        let decided = fb.binary(BinOp::Or, a_decides, b_decides);
        let any_null = fb.binary(BinOp::Or, a_null, b_null);
        let undecided = fb.not(decided);
        let is_null = fb.binary(BinOp::And, undecided, any_null);
        // Decided: false for AND, true for OR. Otherwise both are present and neither decides.
        let result = if is_and { undecided } else { decided };
        Ok(SqlValue::Nullable(NullableValue {
            value: Value::Bool(fb.resize(result, IrType::I8, false)),
            is_null,
        }))
    }

    pub fn and(&self, fb: &mut FunctionBuilder, other: &SqlValue) -> Result<SqlValue, Error> {
        self.connective(fb, other, true)
    }

    pub fn or(&self, fb: &mut FunctionBuilder, other: &SqlValue) -> Result<SqlValue, Error> {
        self.connective(fb, other, false)
    }

    /// prints the value, or `NULL`.
    pub fn print(&self, fb: &mut FunctionBuilder) -> Result<(), Error> {
        match self {
            SqlValue::Unknown => {
                fb.call("print_null", &[])?;
                Ok(())
            }
            SqlValue::NotNull(v) => v.print(fb),
            SqlValue::Nullable(n) => {
                fb.if_then_else::<Error, _, _>(
                    n.is_null,
                    |fb| {
                        fb.call("print_null", &[])?;
                        Ok(vec![])
                    },
                    |fb| {
                        n.value.print(fb)?;
                        Ok(vec![])
                    },
                )?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn eval_to_word<F>(ret: IrType, body: F) -> u64
where
    F: FnOnce(&mut FunctionBuilder) -> Result<ValueId, Error>,
{
    let mut module = crate::codegen::Module::new("test");
    let mut fb = FunctionBuilder::new(&mut module, "f", &[], Some(ret));
    let v = body(&mut fb).unwrap();
    fb.ret(Some(v));
    fb.finish().unwrap();
    let mut db = crate::database::Database::new();
    let mut ctx = crate::runtime::ExecContext::new(&mut db, &module, &crate::config::Config::default());
    crate::codegen::interpreter::run_function(&module, "f", &[], &mut ctx)
        .unwrap()
        .unwrap()
}

#[test]
fn test_numeric_arithmetic() {
    struct Case {
        lhs: Datum,
        lhs_ty: SqlType,
        rhs: Datum,
        rhs_ty: SqlType,
        op: ArithOp,
        expected: i64,
    }
    let n42 = SqlType::numeric(4, 2);
    let cases = vec![
        // 1.50 + 2.25
        Case { lhs: Datum::Numeric(150, 2), lhs_ty: n42, rhs: Datum::Numeric(225, 2), rhs_ty: n42, op: ArithOp::Add, expected: 375 },
        // 1.50 * 2.00 = 3.0000
        Case { lhs: Datum::Numeric(150, 2), lhs_ty: n42, rhs: Datum::Numeric(200, 2), rhs_ty: n42, op: ArithOp::Mul, expected: 30000 },
        // 1.50 / 0.50 = 3.00
        Case { lhs: Datum::Numeric(150, 2), lhs_ty: n42, rhs: Datum::Numeric(50, 2), rhs_ty: n42, op: ArithOp::Div, expected: 300 },
        // 3 * 1.50 = 4.50
        Case { lhs: Datum::Integer(3), lhs_ty: SqlType::integer(), rhs: Datum::Numeric(150, 2), rhs_ty: n42, op: ArithOp::Mul, expected: 450 },
        // 1.00 / 0 reports and yields 0
        Case { lhs: Datum::Numeric(100, 2), lhs_ty: n42, rhs: Datum::Numeric(0, 2), rhs_ty: n42, op: ArithOp::Div, expected: 0 },
    ];
    for case in cases {
        let result_ty = match case.op {
            ArithOp::Add => sql_type::infer_add_ty(case.lhs_ty, case.rhs_ty),
            ArithOp::Sub => sql_type::infer_sub_ty(case.lhs_ty, case.rhs_ty),
            ArithOp::Mul => sql_type::infer_mul_ty(case.lhs_ty, case.rhs_ty),
            ArithOp::Div => sql_type::infer_div_ty(case.lhs_ty, case.rhs_ty),
        }
        .unwrap();
        let got = eval_to_word(IrType::I64, |fb| {
            let a = SqlValue::constant(fb, &case.lhs, case.lhs_ty)?;
            let b = SqlValue::constant(fb, &case.rhs, case.rhs_ty)?;
            let r = a.arith(fb, &b, case.op, result_ty)?;
            Ok(r.raw_values()[0])
        });
        assert_eq!(got as i64, case.expected, "{:?} {:?} {:?}", case.lhs, case.op, case.rhs);
    }
}

#[test]
fn test_null_propagates_through_arithmetic() {
    let ty = SqlType::integer().as_nullable();
    let got = eval_to_word(IrType::I1, |fb| {
        let a = SqlValue::null(fb, ty)?;
        let b = SqlValue::constant(fb, &Datum::Integer(i32::MAX), SqlType::integer())?;
        let r = a.add(fb, &b, ty)?;
        Ok(r.is_null(fb))
    });
    assert_eq!(got, 1);
}

#[test]
fn test_equal_values_hash_equal() {
    let cases = vec![
        (Datum::Integer(7), SqlType::integer()),
        (Datum::Numeric(1250, 2), SqlType::numeric(6, 2)),
        (Datum::Varchar("abc".to_string()), SqlType::varchar(5)),
        (Datum::Bool(true), SqlType::bool()),
        (Datum::Date(100), SqlType::date()),
    ];
    for (d, ty) in cases {
        // Same content, one side nullable: equal, and equal hashes.
        let same = eval_to_word(IrType::I1, |fb| {
            let a = SqlValue::constant(fb, &d, ty)?;
            let b = SqlValue::constant(fb, &d, ty.as_nullable())?;
            let ha = a.hash(fb)?;
            let hb = b.hash(fb)?;
            let eq = a.equals(fb, &b)?;
            let heq = fb.icmp(IntPredicate::Eq, ha, hb);
            Ok(fb.binary(BinOp::And, eq, heq))
        });
        assert_eq!(same, 1, "{:?}", d);
    }
    let differ = eval_to_word(IrType::I1, |fb| {
        let a = SqlValue::constant(fb, &Datum::Varchar("abc".to_string()), SqlType::varchar(5))?;
        let b = SqlValue::constant(fb, &Datum::Varchar("abd".to_string()), SqlType::varchar(5))?;
        a.equals(fb, &b)
    });
    assert_eq!(differ, 0);
}

#[test]
fn test_hash_matches_host_hash() {
    let got = eval_to_word(IrType::I64, |fb| {
        SqlValue::constant(fb, &Datum::Integer(-3), SqlType::integer())?.hash(fb)
    });
    assert_eq!(got, hashing::mix64(-3i64 as u64));
    let got = eval_to_word(IrType::I64, |fb| {
        SqlValue::constant(fb, &Datum::Varchar("xy".to_string()), SqlType::varchar(2))?.hash(fb)
    });
    assert_eq!(got, hashing::hash_bytes(b"xy"));
}

#[test]
fn test_string_ordering() {
    struct Case {
        a: &'static str,
        b: &'static str,
        mode: ComparisonMode,
        expected: u64,
    }
    let cases = vec![
        Case { a: "abc", b: "abd", mode: ComparisonMode::Less, expected: 1 },
        Case { a: "ab", b: "abc", mode: ComparisonMode::Less, expected: 1 },
        Case { a: "abc", b: "abc", mode: ComparisonMode::Eq, expected: 1 },
        Case { a: "b", b: "abc", mode: ComparisonMode::Gtr, expected: 1 },
        Case { a: "", b: "a", mode: ComparisonMode::Geq, expected: 0 },
    ];
    for case in cases {
        let got = eval_to_word(IrType::I1, |fb| {
            let a = SqlValue::constant(fb, &Datum::Varchar(case.a.to_string()), SqlType::varchar(5))?;
            let b = SqlValue::constant(fb, &Datum::Varchar(case.b.to_string()), SqlType::varchar(5))?;
            a.compare(fb, &b, case.mode)?.is_true(fb)
        });
        assert_eq!(got, case.expected, "{} {} {}", case.a, case.mode, case.b);
    }
}

#[test]
fn test_char_compares_by_content_across_lengths() {
    struct Case {
        a: &'static str,
        a_len: u16,
        b: &'static str,
        b_len: u16,
        expected: u64,
    }
    let cases = vec![
        Case { a: "ab", a_len: 8, b: "ab", b_len: 2, expected: 1 },
        Case { a: "ab", a_len: 2, b: "ab", b_len: 8, expected: 1 },
        Case { a: "ab", a_len: 8, b: "abc", b_len: 3, expected: 0 },
    ];
    for case in cases {
        let got = eval_to_word(IrType::I1, |fb| {
            let a = SqlValue::constant(fb, &Datum::Char(case.a.to_string()), SqlType::char(case.a_len))?;
            let b = SqlValue::constant(fb, &Datum::Char(case.b.to_string()), SqlType::char(case.b_len))?;
            a.compare(fb, &b, ComparisonMode::Eq)?.is_true(fb)
        });
        assert_eq!(got, case.expected, "char({}) {} = char({}) {}", case.a_len, case.a, case.b_len, case.b);
    }
}

#[test]
fn test_three_valued_logic() {
    // (value, is null) for true, false, NULL
    let inputs = [Some(true), Some(false), None];
    for a in inputs {
        for b in inputs {
            let expected_and = match (a, b) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            };
            let expected_or = match (a, b) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            };
            for (is_and, expected) in [(true, expected_and), (false, expected_or)] {
                let to_datum = |x: Option<bool>| x.map(Datum::Bool).unwrap_or(Datum::Null);
                let got = eval_to_word(IrType::I8, |fb| {
                    let ty = SqlType::bool().as_nullable();
                    let x = SqlValue::constant(fb, &to_datum(a), ty)?;
                    let y = SqlValue::constant(fb, &to_datum(b), ty)?;
                    let r = if is_and { x.and(fb, &y)? } else { x.or(fb, &y)? };
                    // 0 false, 1 true, 2 NULL
                    let is_true = r.is_true(fb)?;
                    let is_null = r.is_null(fb);
                    let t = fb.resize(is_true, IrType::I8, false);
                    let two = fb.const_int(IrType::I8, 2);
                    Ok(fb.select(is_null, two, t))
                });
                let expected = match expected {
                    Some(v) => v as u64,
                    None => 2,
                };
                assert_eq!(got, expected, "{:?} {} {:?}", a, if is_and { "and" } else { "or" }, b);
            }
        }
    }
}
