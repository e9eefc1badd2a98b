//! Defines `SqlTuple`, an ordered group of `SqlValue`s, and `TupleLayout`, how such a group sits in memory.
//!
//! Tuples are how operators hand rows to each other through memory: hashtable payloads, join build entries,
//! and the buffers passed to runtime routines all hold tuples.

use itertools::Itertools;

use crate::codegen::ir::{IrType, ValueId};
use crate::codegen::{FunctionBuilder, LayoutId};
use crate::datum::{self, Datum};
use crate::hashing;
use crate::sql_type::SqlType;
use crate::sql_value::nullable::{Active, NullEncoding};
use crate::sql_value::{Error, SqlValue};
use crate::typed_row::Row;

/// field offsets of a tuple type.
///
/// Each field sits at its natural alignment. Under indicator encoding, a nullable field is followed by a one
/// byte null flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleLayout {
    pub types: Vec<SqlType>,
    pub offsets: Vec<usize>,
    pub null_offsets: Vec<Option<usize>>,
    pub size: usize,
    pub align: usize,
}

fn align_to(n: usize, align: usize) -> usize {
    (n + align - 1) / align * align
}

impl TupleLayout {
    pub fn new(types: &[SqlType]) -> TupleLayout {
        let mut offsets = Vec::with_capacity(types.len());
        let mut null_offsets = Vec::with_capacity(types.len());
        let mut size = 0;
        let mut align = 1;
        for ty in types {
            size = align_to(size, ty.alignment());
            align = align.max(ty.alignment());
            offsets.push(size);
            size += ty.storage_size();
            if ty.nullable && !ty.is_unknown() && Active::INDICATOR_BYTES {
                null_offsets.push(Some(size));
                size += 1;
            } else {
                null_offsets.push(None);
            }
        }
        TupleLayout {
            types: types.to_vec(),
            offsets,
            null_offsets,
            size: align_to(size, align),
            align,
        }
    }

    /// structural name of a tuple type; two tuple types with the same name share a layout.
    pub fn type_name(types: &[SqlType]) -> String {
        format!("tuple({})", types.iter().join(", "))
    }

    /// reads the tuple at `ptr` back into host values.
    ///
    /// # Safety
    ///
    /// `ptr` must point at `self.size` readable bytes holding a tuple of this layout.
    pub unsafe fn decode(&self, ptr: *const u8) -> Row {
        let bytes = std::slice::from_raw_parts(ptr, self.size);
        let items = self
            .types
            .iter()
            .enumerate()
            .map(|(i, ty)| {
                if ty.is_unknown() {
                    return Datum::Null;
                }
                if let Some(n) = self.null_offsets[i] {
                    if bytes[n] != 0 {
                        return Datum::Null;
                    }
                }
                let off = self.offsets[i];
                datum::decode(*ty, &bytes[off..off + ty.storage_size()])
            })
            .collect();
        Row::new(items)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqlTuple {
    pub values: Vec<SqlValue>,
}

fn layout_of(fb: &mut FunctionBuilder, id: LayoutId) -> Result<TupleLayout, Error> {
    fb.module()
        .layout(id)
        .cloned()
        .ok_or_else(|| Error::InvalidOperation(format!("no tuple layout {}", id)))
}

impl SqlTuple {
    pub fn new(values: Vec<SqlValue>) -> SqlTuple {
        SqlTuple { values }
    }

    pub fn types(&self) -> Vec<SqlType> {
        self.values.iter().map(|v| v.ty()).collect()
    }

    /// writes every member at its offset in layout `id`, starting at `ptr`.
    pub fn store(&self, fb: &mut FunctionBuilder, id: LayoutId, ptr: ValueId) -> Result<(), Error> {
        let layout = layout_of(fb, id)?;
        if layout.types.len() != self.values.len() {
            return Err(Error::InvalidOperation(format!(
                "storing {} values as {}",
                self.values.len(),
                TupleLayout::type_name(&layout.types)
            )));
        }
        for (i, v) in self.values.iter().enumerate() {
            let field = fb.ptr_offset(ptr, layout.offsets[i]);
            let flag = layout.null_offsets[i].map(|n| fb.ptr_offset(ptr, n));
            v.store(fb, layout.types[i], field, flag)?;
        }
        Ok(())
    }

    /// reads a tuple of layout `id` from `ptr`.
    pub fn load(fb: &mut FunctionBuilder, id: LayoutId, ptr: ValueId) -> Result<SqlTuple, Error> {
        let layout = layout_of(fb, id)?;
        let mut values = Vec::with_capacity(layout.types.len());
        for (i, ty) in layout.types.iter().enumerate() {
            let field = fb.ptr_offset(ptr, layout.offsets[i]);
            let indicator = layout.null_offsets[i].map(|n| {
                let p = fb.ptr_offset(ptr, n);
                fb.load(IrType::I8, p)
            });
            values.push(SqlValue::load(fb, *ty, field, indicator)?);
        }
        Ok(SqlTuple { values })
    }

    /// hash of all members: the first member's hash combined with each following one in order.
    pub fn hash(&self, fb: &mut FunctionBuilder) -> Result<ValueId, Error> {
        let mut acc: Option<ValueId> = None;
        for v in &self.values {
            let h = v.hash(fb)?;
            acc = Some(match acc {
                None => h,
                Some(a) => hashing::emit_combine(fb, a, h),
            });
        }
        Ok(match acc {
            Some(h) => h,
            None => fb.const_int(IrType::I64, 0),
        })
    }

    /// `I1` that is true when the tuples are equal member by member, NULL matching NULL.
    pub fn equals(&self, fb: &mut FunctionBuilder, other: &SqlTuple) -> Result<ValueId, Error> {
        if self.values.len() != other.values.len() {
            return Err(Error::InvalidOperation(format!(
                "comparing tuples of {} and {} values",
                self.values.len(),
                other.values.len()
            )));
        }
        let mut acc = fb.const_bool(true);
        for (a, b) in self.values.iter().zip(&other.values) {
            let eq = a.equals(fb, b)?;
            acc = fb.binary(crate::codegen::ir::BinOp::And, acc, eq);
        }
        Ok(acc)
    }
}

#[test]
fn test_layout_offsets() {
    struct Case {
        types: Vec<SqlType>,
        offsets: Vec<usize>,
        size: usize,
    }
    let indicator = Active::INDICATOR_BYTES as usize;
    let cases = vec![
        Case {
            types: vec![SqlType::integer(), SqlType::numeric(10, 2)],
            offsets: vec![0, 8],
            size: 16,
        },
        Case {
            types: vec![SqlType::bool(), SqlType::integer(), SqlType::varchar(3)],
            offsets: vec![0, 4, 8],
            size: 24,
        },
        Case {
            types: vec![SqlType::integer().as_nullable(), SqlType::integer()],
            offsets: vec![0, if indicator == 1 { 8 } else { 4 }],
            size: if indicator == 1 { 12 } else { 8 },
        },
    ];
    for case in cases {
        let layout = TupleLayout::new(&case.types);
        assert_eq!(layout.offsets, case.offsets, "{}", TupleLayout::type_name(&case.types));
        assert_eq!(layout.size, case.size, "{}", TupleLayout::type_name(&case.types));
    }
    assert_eq!(
        TupleLayout::type_name(&[SqlType::integer(), SqlType::varchar(3).as_nullable()]),
        "tuple(integer, varchar(3) null)"
    );
}

#[test]
fn test_tuple_roundtrip_through_memory() {
    use crate::sql_value::eval_to_word;
    let types = vec![SqlType::integer(), SqlType::varchar(4).as_nullable(), SqlType::numeric(6, 2).as_nullable()];
    let datums = vec![Datum::Integer(9), Datum::Varchar("ab".to_string()), Datum::Null];
    let got = eval_to_word(IrType::I1, |fb| {
        let id = fb.module().tuple_layout(&types);
        let size = fb.module().layout(id).map(|l| l.size).unwrap_or(0);
        let values = types
            .iter()
            .zip(&datums)
            .map(|(ty, d)| SqlValue::constant(fb, d, *ty))
            .collect::<Result<Vec<_>, _>>()?;
        let tuple = SqlTuple::new(values);
        let slot = fb.stack_slot(size);
        tuple.store(fb, id, slot)?;
        let back = SqlTuple::load(fb, id, slot)?;
        let same = tuple.equals(fb, &back)?;
        let h1 = tuple.hash(fb)?;
        let h2 = back.hash(fb)?;
        let same_hash = fb.icmp(crate::codegen::ir::IntPredicate::Eq, h1, h2);
        Ok(fb.binary(crate::codegen::ir::BinOp::And, same, same_hash))
    });
    assert_eq!(got, 1);
}
