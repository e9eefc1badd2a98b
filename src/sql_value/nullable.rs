//! Nullable values and the two ways of storing NULL.
//!
//! In registers, a nullable value is always a value plus an `I1` flag. In memory, the flag is either a separate
//! indicator byte next to the value (the default) or folded into the value as a sentinel bit pattern (the
//! `null-sentinel` feature). The choice is made once for the whole build.

use super::{Error, SqlValue, Value};
use crate::codegen::ir::{BinOp, IntPredicate, ValueId};
use crate::codegen::FunctionBuilder;
use crate::sql_type::SqlType;
#[cfg(test)]
use crate::codegen::ir::IrType;

/// A value that may be NULL. When `is_null` is set, `value` holds a placeholder that must not be looked at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NullableValue {
    pub value: Value,
    pub is_null: ValueId,
}

pub trait NullEncoding {
    /// whether stored nullable fields carry an indicator byte.
    const INDICATOR_BYTES: bool;

    /// the null flag of a value just loaded from memory, given the indicator byte if there is one.
    fn null_flag_after_load(fb: &mut FunctionBuilder, value: &Value, indicator: Option<ValueId>) -> Result<ValueId, Error>;

    /// the bits to write to memory for `v`.
    fn value_to_store(fb: &mut FunctionBuilder, v: &NullableValue) -> Result<Value, Error>;
}

pub struct IndicatorEncoding;

impl NullEncoding for IndicatorEncoding {
    const INDICATOR_BYTES: bool = true;

    fn null_flag_after_load(fb: &mut FunctionBuilder, value: &Value, indicator: Option<ValueId>) -> Result<ValueId, Error> {
        let flag = indicator.ok_or_else(|| {
            Error::InvalidOperation(format!("no null indicator for a nullable {}", value.ty()))
        })?;
        let ty = fb.value_type(flag);
        let zero = fb.const_int(ty, 0);
        Ok(fb.icmp(IntPredicate::Ne, flag, zero))
    }

    fn value_to_store(_fb: &mut FunctionBuilder, v: &NullableValue) -> Result<Value, Error> {
        Ok(v.value)
    }
}

/// NULL is a reserved bit pattern of the value's first part: the minimum integer, 2 for Bool, or the null
/// address for strings. A real value equal to the sentinel reads back as NULL.
pub struct SentinelEncoding;

fn sentinel(fb: &mut FunctionBuilder, value: &Value) -> (ValueId, ValueId) {
    let first = value.raw_values()[0];
    let ty = fb.value_type(first);
    let s = fb.const_int(ty, value.ty().null_sentinel() as i64);
    (first, s)
}

impl NullEncoding for SentinelEncoding {
    const INDICATOR_BYTES: bool = false;

    fn null_flag_after_load(fb: &mut FunctionBuilder, value: &Value, _indicator: Option<ValueId>) -> Result<ValueId, Error> {
        let (first, s) = sentinel(fb, value);
        Ok(fb.icmp(IntPredicate::Eq, first, s))
    }

    fn value_to_store(fb: &mut FunctionBuilder, v: &NullableValue) -> Result<Value, Error> {
        let (first, s) = sentinel(fb, &v.value);
        let mut raw = v.value.raw_values();
        raw[0] = fb.select(v.is_null, s, first);
        Value::from_raw_values(v.value.ty(), &raw)
    }
}

#[cfg(not(feature = "null-sentinel"))]
pub type Active = IndicatorEncoding;
#[cfg(feature = "null-sentinel")]
pub type Active = SentinelEncoding;

/// combines two values of type `ty` ignoring NULLs: if one side is NULL the other is taken, and only when
/// both are NULL is the result NULL. Otherwise `pick` chooses.
pub fn merge_non_null<F>(fb: &mut FunctionBuilder, a: &SqlValue, b: &SqlValue, ty: SqlType, pick: F) -> Result<SqlValue, Error>
where
    F: FnOnce(&mut FunctionBuilder, &Value, &Value) -> Result<Value, Error>,
{
    let ty = ty.as_nullable();
    let a = a.clone().with_type_nullability(fb, ty)?;
    let b = b.clone().with_type_nullability(fb, ty)?;
    let (SqlValue::Nullable(a), SqlValue::Nullable(b)) = (a, b) else {
        return SqlValue::null(fb, ty);
    };
    let picked = pick(fb, &a.value, &b.value)?;
    let if_b_present = Value::select(fb, b.is_null, &a.value, &picked)?;
    let value = Value::select(fb, a.is_null, &b.value, &if_b_present)?;
    Ok(SqlValue::Nullable(NullableValue {
        value,
        is_null: fb.binary(BinOp::And, a.is_null, b.is_null),
    }))
}

/// the smaller of two values; used by `min`.
pub fn smaller(fb: &mut FunctionBuilder, a: &Value, b: &Value) -> Result<Value, Error> {
    let less = a.compare(fb, b, super::ComparisonMode::Less)?;
    Value::select(fb, less, a, b)
}

#[test]
fn test_min_ignores_null() {
    use crate::datum::Datum;
    let ty = SqlType::integer().as_nullable();
    struct Case {
        a: Datum,
        b: Datum,
        expected: Option<i32>,
    }
    let cases = vec![
        Case { a: Datum::Integer(5), b: Datum::Integer(3), expected: Some(3) },
        Case { a: Datum::Null, b: Datum::Integer(3), expected: Some(3) },
        Case { a: Datum::Integer(5), b: Datum::Null, expected: Some(5) },
        Case { a: Datum::Null, b: Datum::Null, expected: None },
    ];
    for case in cases {
        // Encodes NULL as i64::MIN in the returned word.
        let got = super::eval_to_word(IrType::I64, |fb| {
            let a = SqlValue::constant(fb, &case.a, ty)?;
            let b = SqlValue::constant(fb, &case.b, ty)?;
            let m = merge_non_null(fb, &a, &b, ty, smaller)?;
            let is_null = m.is_null(fb);
            let raw = fb.resize(m.raw_values()[0], IrType::I64, true);
            let null_word = fb.const_int(IrType::I64, i64::MIN);
            Ok(fb.select(is_null, null_word, raw))
        });
        let expected = case.expected.map(|v| v as i64).unwrap_or(i64::MIN);
        assert_eq!(got as i64, expected, "min({:?}, {:?})", case.a, case.b);
    }
}

#[test]
fn test_store_and_load_nullable_roundtrip_keeps_null() {
    let ty = SqlType::integer().as_nullable();
    let got = super::eval_to_word(IrType::I1, |fb| {
        let slot = fb.stack_slot(8);
        let flag = fb.ptr_offset(slot, 4);
        let v = SqlValue::null(fb, ty)?;
        v.store(fb, ty, slot, Some(flag))?;
        let indicator = fb.load(IrType::I8, flag);
        let back = SqlValue::load(fb, ty, slot, Some(indicator))?;
        Ok(back.is_null(fb))
    });
    assert_eq!(got, 1);
}
