//! `GroupBy` folds the rows of its input into groups and hands up one row per group.
//!
//! Each group has a state tuple with one field per aggregator; `avg` keeps two, its running sum and its row
//! count. With grouping keys the states live in a hashtable under the hash of the keys, and the groups are
//! handed up by iterating the table once the input is exhausted. Without keys there is a single state in the
//! function's frame, and a row is handed up only if the input had any.

use super::{evaluate, layout_size, lookup, new_counter, Emitter, Error, IuValueMap, PhysicalId, State};
use crate::codegen::ir::{IntPredicate, IrType, ValueId};
use crate::codegen::{FunctionBuilder, LayoutId};
use crate::datum::Datum;
use crate::hashtable::NODE_HEADER_SIZE;
use crate::iu::IuRef;
use crate::logical_algebra::Aggregator;
use crate::sql_tuple::SqlTuple;
use crate::sql_type::SqlType;
use crate::sql_value::nullable::{merge_non_null, smaller};
use crate::sql_value::SqlValue;

#[derive(Debug, Clone)]
pub struct GroupBy {
    pub child: PhysicalId,
    pub aggregators: Vec<Aggregator>,
}

#[derive(Debug, Clone, Copy)]
enum Groups {
    Hashed(ValueId),
    /// the state tuple and an `I64` that turns non-zero with the first row.
    Single { slot: ValueId, seen: ValueId },
}

#[derive(Debug, Clone)]
pub(crate) struct GroupState {
    groups: Groups,
    layout: LayoutId,
    size: usize,
}

fn one(fb: &mut FunctionBuilder) -> Result<SqlValue, Error> {
    Ok(SqlValue::constant(fb, &Datum::Integer(1), SqlType::integer())?)
}

impl GroupBy {
    fn keys(&self) -> Vec<IuRef> {
        self.aggregators.iter().filter_map(|a| a.as_keep().copied()).collect()
    }

    fn state_types(&self) -> Vec<SqlType> {
        let mut types = vec![];
        for a in &self.aggregators {
            types.push(a.iu().ty());
            if let Aggregator::Avg { .. } = a {
                types.push(SqlType::integer());
            }
        }
        types
    }

    /// where each grouping key sits in the state tuple.
    fn key_positions(&self) -> Vec<usize> {
        let mut positions = vec![];
        let mut field = 0;
        for a in &self.aggregators {
            if let Aggregator::Keep(_) = a {
                positions.push(field);
            }
            field += match a {
                Aggregator::Avg { .. } => 2,
                _ => 1,
            };
        }
        positions
    }

    fn state(&self, em: &Emitter, id: PhysicalId) -> Result<GroupState, Error> {
        match em.state(id) {
            State::Group(s) => Ok(s.clone()),
            _ => Err(Error::InvalidOperation(format!("group by {} consumed before it produced", id))),
        }
    }

    /// the state of a group whose first row is `values`.
    fn initial(&self, fb: &mut FunctionBuilder, values: &IuValueMap) -> Result<Vec<SqlValue>, Error> {
        let mut state = vec![];
        for a in &self.aggregators {
            match a {
                Aggregator::Keep(iu) => {
                    let v = lookup(values, &[*iu])?.remove(0);
                    state.push(v.with_type_nullability(fb, iu.ty())?);
                }
                Aggregator::Sum { argument, iu } | Aggregator::Min { argument, iu } => {
                    state.push(evaluate(fb, argument, values)?.with_type_nullability(fb, iu.ty())?);
                }
                Aggregator::Avg { argument, iu } => {
                    state.push(evaluate(fb, argument, values)?.with_type_nullability(fb, iu.ty())?);
                    state.push(one(fb)?);
                }
                Aggregator::CountAll { .. } => state.push(one(fb)?),
            }
        }
        Ok(state)
    }

    /// folds one more row of the group into `state`.
    fn update(&self, fb: &mut FunctionBuilder, state: &[SqlValue], values: &IuValueMap) -> Result<Vec<SqlValue>, Error> {
        let mut next = vec![];
        let mut fields = state.iter();
        let mut field = || {
            fields
                .next()
                .cloned()
                .ok_or_else(|| Error::InvalidOperation("group state is too short".to_string()))
        };
        for a in &self.aggregators {
            match a {
                Aggregator::Keep(_) => next.push(field()?),
                Aggregator::Sum { argument, iu } => {
                    let v = evaluate(fb, argument, values)?;
                    next.push(field()?.add(fb, &v, iu.ty())?);
                }
                Aggregator::Avg { argument, iu } => {
                    let v = evaluate(fb, argument, values)?;
                    next.push(field()?.add(fb, &v, iu.ty())?);
                    let n = one(fb)?;
                    next.push(field()?.add(fb, &n, SqlType::integer())?);
                }
                Aggregator::CountAll { .. } => {
                    let n = one(fb)?;
                    next.push(field()?.add(fb, &n, SqlType::integer())?);
                }
                Aggregator::Min { argument, iu } => {
                    let current = field()?;
                    let v = evaluate(fb, argument, values)?.with_type_nullability(fb, iu.ty())?;
                    let min = match (&current, &v) {
                        (SqlValue::NotNull(a), SqlValue::NotNull(b)) => SqlValue::NotNull(smaller(fb, a, b)?),
                        _ => merge_non_null(fb, &current, &v, iu.ty(), smaller)?,
                    };
                    next.push(min);
                }
            }
        }
        Ok(next)
    }

    /// the output row of a group.
    fn finalize(&self, fb: &mut FunctionBuilder, state: &[SqlValue]) -> Result<IuValueMap, Error> {
        let mut out = IuValueMap::new();
        let mut fields = state.iter();
        for a in &self.aggregators {
            let v = fields
                .next()
                .ok_or_else(|| Error::InvalidOperation("group state is too short".to_string()))?;
            let v = match a {
                Aggregator::Avg { iu, .. } => {
                    let count = fields
                        .next()
                        .ok_or_else(|| Error::InvalidOperation("group state is too short".to_string()))?;
                    v.div(fb, count, iu.ty())?
                }
                _ => v.clone(),
            };
            out.insert(a.iu(), v);
        }
        Ok(out)
    }

    pub(super) fn produce(&self, em: &mut Emitter, fb: &mut FunctionBuilder, id: PhysicalId) -> Result<(), Error> {
        let layout = fb.module().tuple_layout(&self.state_types());
        let size = layout_size(fb, layout)?;
        if self.keys().is_empty() {
            let slot = fb.stack_slot(size.max(1));
            let seen = new_counter(fb);
            em.set_state(
                id,
                State::Group(GroupState {
                    groups: Groups::Single { slot, seen },
                    layout,
                    size,
                }),
            );
            em.produce(fb, self.child)?;
            let n = fb.load(IrType::I64, seen);
            let zero = fb.const_int(IrType::I64, 0);
            let any = fb.icmp(IntPredicate::Ne, n, zero);
            return fb.if_then::<Error, _>(any, |fb| {
                let state = SqlTuple::load(fb, layout, slot)?;
                let row = self.finalize(fb, &state.values)?;
                em.consume_parent(fb, id, &row)
            });
        }
        let table = fb.call_value("ht_create", &[])?;
        em.set_state(
            id,
            State::Group(GroupState {
                groups: Groups::Hashed(table),
                layout,
                size,
            }),
        );
        em.produce(fb, self.child)?;
        let first = fb.call_value("ht_first", &[table])?;
        fb.while_loop::<Error, _, _>(
            &[first],
            |fb, node| {
                let null = fb.null_ptr();
                Ok(fb.icmp(IntPredicate::Ne, node[0], null))
            },
            |fb, node| {
                let payload = fb.ptr_offset(node[0], NODE_HEADER_SIZE);
                let state = SqlTuple::load(fb, layout, payload)?;
                let row = self.finalize(fb, &state.values)?;
                em.consume_parent(fb, id, &row)?;
                Ok(vec![fb.call_value("ht_next", &[table, node[0]])?])
            },
        )?;
        fb.call("ht_free", &[table])?;
        Ok(())
    }

    pub(super) fn consume(
        &self,
        em: &mut Emitter,
        fb: &mut FunctionBuilder,
        id: PhysicalId,
        values: &IuValueMap,
    ) -> Result<(), Error> {
        let state = self.state(em, id)?;
        match state.groups {
            Groups::Single { slot, seen } => self.consume_single(fb, &state, slot, seen, values),
            Groups::Hashed(table) => self.consume_hashed(fb, &state, table, values),
        }
    }

    fn consume_single(
        &self,
        fb: &mut FunctionBuilder,
        state: &GroupState,
        slot: ValueId,
        seen: ValueId,
        values: &IuValueMap,
    ) -> Result<(), Error> {
        let n = fb.load(IrType::I64, seen);
        let zero = fb.const_int(IrType::I64, 0);
        let first_row = fb.icmp(IntPredicate::Eq, n, zero);
        fb.if_then_else::<Error, _, _>(
            first_row,
            |fb| {
                let initial = self.initial(fb, values)?;
                SqlTuple::new(initial).store(fb, state.layout, slot)?;
                let flag = fb.const_int(IrType::I64, 1);
                fb.store(flag, seen);
                Ok(vec![])
            },
            |fb| {
                let current = SqlTuple::load(fb, state.layout, slot)?;
                let next = self.update(fb, &current.values, values)?;
                SqlTuple::new(next).store(fb, state.layout, slot)?;
                Ok(vec![])
            },
        )?;
        Ok(())
    }

    fn consume_hashed(
        &self,
        fb: &mut FunctionBuilder,
        state: &GroupState,
        table: ValueId,
        values: &IuValueMap,
    ) -> Result<(), Error> {
        let mut keys = vec![];
        for iu in self.keys() {
            keys.push(lookup(values, &[iu])?.remove(0).with_type_nullability(fb, iu.ty())?);
        }
        let keys = SqlTuple::new(keys);
        let hash = keys.hash(fb)?;
        let node = self.find_group(fb, state, table, hash, &keys)?;
        let null = fb.null_ptr();
        let missing = fb.icmp(IntPredicate::Eq, node, null);
        fb.if_then_else::<Error, _, _>(
            missing,
            |fb| {
                let size = fb.const_int(IrType::I64, state.size as i64);
                let payload = fb.call_value("ht_insert", &[table, hash, size])?;
                let initial = self.initial(fb, values)?;
                SqlTuple::new(initial).store(fb, state.layout, payload)?;
                Ok(vec![])
            },
            |fb| {
                let payload = fb.ptr_offset(node, NODE_HEADER_SIZE);
                let current = SqlTuple::load(fb, state.layout, payload)?;
                let next = self.update(fb, &current.values, values)?;
                SqlTuple::new(next).store(fb, state.layout, payload)?;
                Ok(vec![])
            },
        )?;
        Ok(())
    }

    /// the node of the group with `keys`, or the null address.
    fn find_group(
        &self,
        fb: &mut FunctionBuilder,
        state: &GroupState,
        table: ValueId,
        hash: ValueId,
        keys: &SqlTuple,
    ) -> Result<ValueId, Error> {
        let positions = self.key_positions();
        let first = fb.call_value("ht_lookup", &[table, hash])?;
        let found = fb.while_loop::<Error, _, _>(
            &[first],
            |fb, node| {
                let null = fb.null_ptr();
                let present = fb.icmp(IntPredicate::Ne, node[0], null);
                let keep_looking = fb.if_then_else::<Error, _, _>(
                    present,
                    |fb| {
                        let payload = fb.ptr_offset(node[0], NODE_HEADER_SIZE);
                        let stored = SqlTuple::load(fb, state.layout, payload)?;
                        let stored_keys = SqlTuple::new(positions.iter().map(|p| stored.values[*p].clone()).collect());
                        let same = stored_keys.equals(fb, keys)?;
                        Ok(vec![fb.not(same)])
                    },
                    |fb| Ok(vec![fb.const_bool(false)]),
                )?;
                Ok(keep_looking[0])
            },
            |fb, node| Ok(vec![fb.call_value("ht_next_same_hash", &[table, node[0], hash])?]),
        )?;
        Ok(found[0])
    }
}
