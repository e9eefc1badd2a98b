//! `HashJoin` joins its two inputs on equalities between them.
//!
//! The left input is the build side. While it is produced, each of its rows is appended to a join list as a
//! tuple of its key values followed by the columns carried up, under the hash of the keys. The list is then
//! turned into a static hashtable, and the right input, the probe side, is produced. For every probe row,
//! each build tuple with the same hash is checked key by key, and a row is handed up only when all keys are
//! equal. Hash collisions cost a comparison, never a match.

use super::{evaluate, layout_size, lookup, Emitter, Error, IuValueMap, PhysicalId, State};
use crate::codegen::ir::{IntPredicate, ValueId};
use crate::codegen::{FunctionBuilder, LayoutId};
use crate::expr::Expression;
use crate::hashtable::NODE_HEADER_SIZE;
use crate::iu::IuRef;
use crate::sql_tuple::SqlTuple;
use crate::sql_type::SqlType;
use crate::sql_value::{ComparisonMode, SqlValue};

#[derive(Debug, Clone)]
pub struct HashJoin {
    pub left: PhysicalId,
    pub right: PhysicalId,
    /// `(build side, probe side)` expressions that must be equal.
    pub keys: Vec<(Expression, Expression)>,
    /// the build side IUs handed up with every match.
    pub build_ius: Vec<IuRef>,
}

#[derive(Debug, Clone)]
pub(crate) struct JoinState {
    list: ValueId,
    table: Option<ValueId>,
    layout: LayoutId,
    size: usize,
}

impl HashJoin {
    fn tuple_types(&self) -> Vec<SqlType> {
        self.keys
            .iter()
            .map(|(build, _)| build.ty())
            .chain(self.build_ius.iter().map(|iu| iu.ty()))
            .collect()
    }

    fn state(&self, em: &Emitter, id: PhysicalId) -> Result<JoinState, Error> {
        match em.state(id) {
            State::Join(s) => Ok(s.clone()),
            _ => Err(Error::InvalidOperation(format!("join {} consumed before it produced", id))),
        }
    }

    pub(super) fn produce(&self, em: &mut Emitter, fb: &mut FunctionBuilder, id: PhysicalId) -> Result<(), Error> {
        let layout = fb.module().tuple_layout(&self.tuple_types());
        let size = layout_size(fb, layout)?;
        let list = fb.call_value("join_list_create", &[])?;
        em.set_state(
            id,
            State::Join(JoinState {
                list,
                table: None,
                layout,
                size,
            }),
        );
        em.produce(fb, self.left)?;
        let table = fb.call_value("sht_build", &[list])?;
        em.set_state(
            id,
            State::Join(JoinState {
                list,
                table: Some(table),
                layout,
                size,
            }),
        );
        em.produce(fb, self.right)?;
        fb.call("sht_free", &[table])?;
        Ok(())
    }

    pub(super) fn consume(
        &self,
        em: &mut Emitter,
        fb: &mut FunctionBuilder,
        id: PhysicalId,
        values: &IuValueMap,
        source: PhysicalId,
    ) -> Result<(), Error> {
        let state = self.state(em, id)?;
        if source == self.left {
            self.consume_build(fb, &state, values)
        } else if source == self.right {
            self.consume_probe(em, fb, id, &state, values)
        } else {
            Err(Error::InvalidOperation(format!("join {} got a row from {}", id, source)))
        }
    }

    fn consume_build(&self, fb: &mut FunctionBuilder, state: &JoinState, values: &IuValueMap) -> Result<(), Error> {
        let mut tuple = vec![];
        for (build, _) in &self.keys {
            tuple.push(evaluate(fb, build, values)?);
        }
        let hash = SqlTuple::new(tuple.clone()).hash(fb)?;
        tuple.extend(lookup(values, &self.build_ius)?);
        let size = fb.const_int(crate::codegen::ir::IrType::I64, state.size as i64);
        let payload = fb.call_value("join_list_append", &[state.list, hash, size])?;
        SqlTuple::new(tuple).store(fb, state.layout, payload)?;
        Ok(())
    }

    fn consume_probe(
        &self,
        em: &mut Emitter,
        fb: &mut FunctionBuilder,
        id: PhysicalId,
        state: &JoinState,
        values: &IuValueMap,
    ) -> Result<(), Error> {
        let table = state
            .table
            .ok_or_else(|| Error::InvalidOperation(format!("join {} probed before it was built", id)))?;
        let mut probe_keys = vec![];
        for (_, probe) in &self.keys {
            probe_keys.push(evaluate(fb, probe, values)?);
        }
        let hash = SqlTuple::new(probe_keys.clone()).hash(fb)?;
        let first = fb.call_value("sht_lookup", &[table, hash])?;
        fb.while_loop::<Error, _, _>(
            &[first],
            |fb, node| {
                let null = fb.null_ptr();
                Ok(fb.icmp(IntPredicate::Ne, node[0], null))
            },
            |fb, node| {
                let payload = fb.ptr_offset(node[0], NODE_HEADER_SIZE);
                let stored = SqlTuple::load(fb, state.layout, payload)?;
                self.match_keys(em, fb, id, &stored.values, &probe_keys, 0, values)?;
                Ok(vec![fb.call_value("sht_next_same_hash", &[table, node[0], hash])?])
            },
        )?;
        Ok(())
    }

    /// emits one nested check per key; the innermost hands the joined row up.
    #[allow(clippy::too_many_arguments)]
    fn match_keys(
        &self,
        em: &mut Emitter,
        fb: &mut FunctionBuilder,
        id: PhysicalId,
        stored: &[SqlValue],
        probe_keys: &[SqlValue],
        key: usize,
        values: &IuValueMap,
    ) -> Result<(), Error> {
        if key == probe_keys.len() {
            let mut joined = values.clone();
            for (iu, v) in self.build_ius.iter().zip(&stored[self.keys.len()..]) {
                joined.insert(*iu, v.clone());
            }
            return em.consume_parent(fb, id, &joined);
        }
        let equal = stored[key].compare(fb, &probe_keys[key], ComparisonMode::Eq)?.is_true(fb)?;
        fb.if_then::<Error, _>(equal, |fb| self.match_keys(em, fb, id, stored, probe_keys, key + 1, values))
    }
}
