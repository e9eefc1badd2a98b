//! Operators that change tables. Each one prints how many rows it touched when it is done.

use super::{
    evaluate, increment, layout_size, lookup, new_counter, print_affected, printf, table_handle, Emitter, Error,
    IuValueMap, PhysicalId, State,
};
use crate::codegen::ir::{IrType, ValueId};
use crate::codegen::FunctionBuilder;
use crate::expr::Expression;
use crate::iu::IuRef;
use crate::logical_algebra::Assignment;
use crate::sql_tuple::SqlTuple;
use crate::sql_type::SqlType;
use crate::sql_value::SqlValue;

/// inserts one row of constant expressions.
#[derive(Debug, Clone)]
pub struct Insert {
    pub table: String,
    pub column_types: Vec<SqlType>,
    pub values: Vec<Expression>,
}

impl Insert {
    pub(super) fn produce(&self, fb: &mut FunctionBuilder) -> Result<(), Error> {
        let no_input = IuValueMap::new();
        let mut row = vec![];
        for v in &self.values {
            row.push(evaluate(fb, v, &no_input)?);
        }
        let layout = fb.module().tuple_layout(&self.column_types);
        let size = layout_size(fb, layout)?;
        let tuple = fb.stack_slot(size.max(1));
        SqlTuple::new(row).store(fb, layout, tuple)?;
        let handle = table_handle(fb, &self.table);
        let layout_id = fb.const_int(IrType::I64, layout as i64);
        fb.call("table_insert", &[handle, layout_id, tuple])?;
        let one = fb.const_int(IrType::I64, 1);
        printf(fb, "%ld rows inserted\n", one)
    }
}

// The row id of the current row as an `I64`.
fn row_id(fb: &mut FunctionBuilder, values: &IuValueMap, tid: IuRef) -> Result<ValueId, Error> {
    let raw = match lookup(values, &[tid])?.remove(0) {
        SqlValue::NotNull(v) => v.raw_values(),
        other => return Err(Error::InvalidOperation(format!("a row id of type {}", other.ty()))),
    };
    let id = raw
        .first()
        .copied()
        .ok_or_else(|| Error::InvalidOperation("an empty row id".to_string()))?;
    Ok(fb.resize(id, IrType::I64, false))
}

/// overwrites columns of the rows its input produces.
#[derive(Debug, Clone)]
pub struct Update {
    pub child: PhysicalId,
    pub table: String,
    pub tid: IuRef,
    pub assignments: Vec<Assignment>,
}

impl Update {
    pub(super) fn produce(&self, em: &mut Emitter, fb: &mut FunctionBuilder, id: PhysicalId) -> Result<(), Error> {
        let rows = new_counter(fb);
        em.set_state(id, State::Counter(rows));
        em.produce(fb, self.child)?;
        print_affected(fb, rows, "updated")
    }

    pub(super) fn consume(
        &self,
        em: &mut Emitter,
        fb: &mut FunctionBuilder,
        id: PhysicalId,
        values: &IuValueMap,
    ) -> Result<(), Error> {
        let rows = em.counter(id)?;
        let tid = row_id(fb, values, self.tid)?;
        let mut new_values = vec![];
        for a in &self.assignments {
            new_values.push(evaluate(fb, &a.value, values)?);
        }
        let types: Vec<SqlType> = self.assignments.iter().map(|a| a.ty).collect();
        let columns: Vec<usize> = self.assignments.iter().map(|a| a.column).collect();
        let layout = fb.module().tuple_layout(&types);
        let size = layout_size(fb, layout)?;
        let tuple = fb.stack_slot(size.max(1));
        SqlTuple::new(new_values).store(fb, layout, tuple)?;
        let column_list = fb.module().column_list(&columns);
        let handle = table_handle(fb, &self.table);
        let column_list = fb.const_int(IrType::I64, column_list as i64);
        let layout_id = fb.const_int(IrType::I64, layout as i64);
        fb.call("table_update", &[handle, column_list, layout_id, tid, tuple])?;
        increment(fb, rows);
        Ok(())
    }
}

/// hides the rows its input produces from the query's branch.
#[derive(Debug, Clone)]
pub struct Delete {
    pub child: PhysicalId,
    pub table: String,
    pub tid: IuRef,
}

impl Delete {
    pub(super) fn produce(&self, em: &mut Emitter, fb: &mut FunctionBuilder, id: PhysicalId) -> Result<(), Error> {
        let rows = new_counter(fb);
        em.set_state(id, State::Counter(rows));
        em.produce(fb, self.child)?;
        print_affected(fb, rows, "deleted")
    }

    pub(super) fn consume(
        &self,
        em: &mut Emitter,
        fb: &mut FunctionBuilder,
        id: PhysicalId,
        values: &IuValueMap,
    ) -> Result<(), Error> {
        let rows = em.counter(id)?;
        let tid = row_id(fb, values, self.tid)?;
        let handle = table_handle(fb, &self.table);
        fb.call("table_delete", &[handle, tid])?;
        increment(fb, rows);
        Ok(())
    }
}
