use super::{table_handle, Emitter, Error, IuValueMap, PhysicalId};
use crate::codegen::ir::{BinOp, IntPredicate, IrType};
use crate::codegen::FunctionBuilder;
use crate::iu::IuRef;
use crate::sql_type::SqlType;
use crate::sql_value::nullable::{Active, NullEncoding};
use crate::sql_value::{SqlValue, Value};

/// reads the rows of a table that are visible in `branch`, in row id order.
#[derive(Debug, Clone)]
pub struct TableScan {
    pub table: String,
    /// the columns to read: index, type and the IU each is read into.
    pub columns: Vec<(usize, SqlType, IuRef)>,
    /// the row id, if anything above needs it.
    pub tid: Option<IuRef>,
    pub branch: usize,
}

impl TableScan {
    pub(super) fn produce(&self, em: &mut Emitter, fb: &mut FunctionBuilder, id: PhysicalId) -> Result<(), Error> {
        let handle = table_handle(fb, &self.table);
        let count = fb.call_value("table_row_count", &[handle])?;
        let mut bases = Vec::with_capacity(self.columns.len());
        for (col, _, _) in &self.columns {
            let c = fb.const_int(IrType::I64, *col as i64);
            bases.push(fb.call_value("table_column", &[handle, c])?);
        }
        let needs_indicators = Active::INDICATOR_BYTES && self.columns.iter().any(|(_, ty, _)| ty.nullable);
        let indicators = match needs_indicators {
            true => Some(fb.call_value("table_null_indicators", &[handle])?),
            false => None,
        };
        let bitmap = fb.call_value("table_branch_bitmap", &[handle])?;
        let zero = fb.const_int(IrType::I64, 0);
        fb.for_range::<Error, _>(zero, count, |fb, tid| {
            let eight = fb.const_int(IrType::I64, 8);
            let word_offset = fb.binary(BinOp::Mul, tid, eight);
            let word_ptr = fb.ptr_add(bitmap, word_offset);
            let word = fb.load(IrType::I64, word_ptr);
            let branch = fb.const_int(IrType::I64, self.branch as i64);
            let shifted = fb.binary(BinOp::LShr, word, branch);
            let one = fb.const_int(IrType::I64, 1);
            let bit = fb.binary(BinOp::And, shifted, one);
            let visible = fb.icmp(IntPredicate::Ne, bit, zero);
            fb.if_then::<Error, _>(visible, |fb| {
                let null_word = match indicators {
                    Some(base) => {
                        let p = fb.ptr_add(base, word_offset);
                        Some(fb.load(IrType::I64, p))
                    }
                    None => None,
                };
                let mut values = IuValueMap::new();
                for ((col, ty, iu), base) in self.columns.iter().zip(&bases) {
                    let size = fb.const_int(IrType::I64, ty.storage_size() as i64);
                    let offset = fb.binary(BinOp::Mul, tid, size);
                    let ptr = fb.ptr_add(*base, offset);
                    let indicator = match (null_word, ty.nullable) {
                        (Some(w), true) => {
                            let shift = fb.const_int(IrType::I64, *col as i64);
                            let shifted = fb.binary(BinOp::LShr, w, shift);
                            Some(fb.binary(BinOp::And, shifted, one))
                        }
                        _ => None,
                    };
                    values.insert(*iu, SqlValue::load(fb, *ty, ptr, indicator)?);
                }
                if let Some(iu) = self.tid {
                    let row_id = fb.resize(tid, IrType::I32, false);
                    values.insert(iu, SqlValue::NotNull(Value::Integer(row_id)));
                }
                em.consume_parent(fb, id, &values)
            })
        })
    }
}
