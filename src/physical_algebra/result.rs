use super::{increment, layout_size, lookup, new_counter, printf, Emitter, Error, IuValueMap, PhysicalId, State};
use crate::codegen::ir::{IntPredicate, IrType};
use crate::codegen::FunctionBuilder;
use crate::iu::IuRef;
use crate::sql_tuple::SqlTuple;
use crate::sql_type::SqlType;

/// prints the selected IUs of every row, tab separated, then how many rows there were.
#[derive(Debug, Clone)]
pub struct Print {
    pub child: PhysicalId,
    pub selection: Vec<IuRef>,
}

impl Print {
    pub(super) fn produce(&self, em: &mut Emitter, fb: &mut FunctionBuilder, id: PhysicalId) -> Result<(), Error> {
        let rows = new_counter(fb);
        em.set_state(id, State::Counter(rows));
        em.produce(fb, self.child)?;
        let n = fb.load(IrType::I64, rows);
        let zero = fb.const_int(IrType::I64, 0);
        let empty = fb.icmp(IntPredicate::Eq, n, zero);
        fb.if_then_else::<Error, _, _>(
            empty,
            |fb| {
                printf(fb, "Empty result set\n", n)?;
                Ok(vec![])
            },
            |fb| {
                printf(fb, "%ld tuples\n", n)?;
                Ok(vec![])
            },
        )?;
        Ok(())
    }

    pub(super) fn consume(
        &self,
        em: &mut Emitter,
        fb: &mut FunctionBuilder,
        id: PhysicalId,
        values: &IuValueMap,
    ) -> Result<(), Error> {
        let rows = em.counter(id)?;
        for (i, v) in lookup(values, &self.selection)?.iter().enumerate() {
            if i > 0 {
                let tab = fb.const_int(IrType::I8, b'\t' as i64);
                fb.call("print_char", &[tab])?;
            }
            v.print(fb)?;
        }
        let newline = fb.const_int(IrType::I8, b'\n' as i64);
        fb.call("print_char", &[newline])?;
        increment(fb, rows);
        Ok(())
    }
}

/// hands the selected IUs of every row to the runtime as a tuple.
#[derive(Debug, Clone)]
pub struct ResultSink {
    pub child: PhysicalId,
    pub selection: Vec<IuRef>,
}

impl ResultSink {
    pub(super) fn produce(&self, em: &mut Emitter, fb: &mut FunctionBuilder) -> Result<(), Error> {
        em.produce(fb, self.child)
    }

    pub(super) fn consume(&self, fb: &mut FunctionBuilder, values: &IuValueMap) -> Result<(), Error> {
        let types: Vec<SqlType> = self.selection.iter().map(|iu| iu.ty()).collect();
        let layout = fb.module().tuple_layout(&types);
        let size = layout_size(fb, layout)?;
        let tuple = fb.stack_slot(size.max(1));
        SqlTuple::new(lookup(values, &self.selection)?).store(fb, layout, tuple)?;
        let layout_id = fb.const_int(IrType::I64, layout as i64);
        fb.call("result_row", &[layout_id, tuple])?;
        Ok(())
    }
}
