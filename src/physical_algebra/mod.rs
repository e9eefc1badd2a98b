//! `physical_algebra` turns a plan into code with the produce/consume model.
//!
//! Each physical operator has two halves. `produce` emits the code that makes the operator's rows flow: a scan
//! emits its loop, a join emits its build and probe phases. `consume` is called while code for one row of a
//! child is being emitted, with that row's values in an `IuValueMap`, and emits what the operator does with
//! the row. Rows are never materialized between operators; an operator hands a row on by calling its parent's
//! `consume` from inside the loop or branch that holds the row.
//! ```text
//! Print.produce
//!   Select.produce
//!     TableScan.produce         for tid in 0..count {
//!                                 if visible(tid) {
//!       Select.consume              if predicate {
//!         Print.consume               print row
//!                                   }
//!                                 }
//!                               }
//! ```
//! Operators live in an arena and find their parent by id. State an operator sets up in `produce` and needs
//! again in `consume`, such as the address of its hashtable, is kept per operator in the `Emitter`.

mod dml;
mod expression;
mod group_by;
mod hash_join;
mod map;
mod result;
mod select;
mod table_scan;

use std::collections::BTreeMap;

use crate::codegen::ir::{BinOp, IrType, ValueId};
use crate::codegen::{self, FunctionBuilder, LayoutId};
use crate::iu::IuRef;
use crate::sql_value::{self, SqlValue};

pub use dml::{Delete, Insert, Update};
pub use expression::evaluate;
pub use group_by::GroupBy;
pub use hash_join::HashJoin;
pub use map::Map;
pub use result::{Print, ResultSink};
pub use select::Select;
pub use table_scan::TableScan;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Value(#[from] sql_value::Error),
    #[error(transparent)]
    Codegen(#[from] codegen::Error),
    #[error("No value for {0} in the row.")]
    MissingValue(IuRef),
    #[error("Invalid operation: {0}.")]
    InvalidOperation(String),
}

/// the values of one row, by IU.
pub type IuValueMap = BTreeMap<IuRef, SqlValue>;

pub type PhysicalId = usize;

#[derive(Debug, Clone)]
pub enum PhysicalOperator {
    TableScan(TableScan),
    Select(Select),
    Map(Map),
    HashJoin(HashJoin),
    GroupBy(GroupBy),
    Print(Print),
    Result(ResultSink),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
}

impl PhysicalOperator {
    pub fn children(&self) -> Vec<PhysicalId> {
        match self {
            PhysicalOperator::TableScan(_) | PhysicalOperator::Insert(_) => vec![],
            PhysicalOperator::Select(s) => vec![s.child],
            PhysicalOperator::Map(m) => vec![m.child],
            PhysicalOperator::HashJoin(j) => vec![j.left, j.right],
            PhysicalOperator::GroupBy(g) => vec![g.child],
            PhysicalOperator::Print(p) => vec![p.child],
            PhysicalOperator::Result(r) => vec![r.child],
            PhysicalOperator::Update(u) => vec![u.child],
            PhysicalOperator::Delete(d) => vec![d.child],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PhysicalOperator::TableScan(_) => "TableScan",
            PhysicalOperator::Select(_) => "Select",
            PhysicalOperator::Map(_) => "Map",
            PhysicalOperator::HashJoin(_) => "HashJoin",
            PhysicalOperator::GroupBy(_) => "GroupBy",
            PhysicalOperator::Print(_) => "Print",
            PhysicalOperator::Result(_) => "Result",
            PhysicalOperator::Insert(_) => "Insert",
            PhysicalOperator::Update(_) => "Update",
            PhysicalOperator::Delete(_) => "Delete",
        }
    }
}

#[derive(Debug)]
struct PhysicalNode {
    op: PhysicalOperator,
    parent: Option<PhysicalId>,
}

/// a tree of physical operators, ready to be emitted.
#[derive(Debug, Default)]
pub struct PhysicalPlan {
    nodes: Vec<PhysicalNode>,
    root: Option<PhysicalId>,
}

impl PhysicalPlan {
    pub fn new() -> PhysicalPlan {
        PhysicalPlan::default()
    }

    /// adds `op`, which becomes the parent of its children.
    pub fn add(&mut self, op: PhysicalOperator) -> Result<PhysicalId, Error> {
        let id = self.nodes.len();
        for c in op.children() {
            match self.nodes.get_mut(c) {
                Some(n) if n.parent.is_none() => n.parent = Some(id),
                _ => return Err(Error::InvalidOperation(format!("operator {} cannot become a child", c))),
            }
        }
        self.nodes.push(PhysicalNode { op, parent: None });
        Ok(id)
    }

    pub fn set_root(&mut self, id: PhysicalId) {
        self.root = Some(id);
    }

    pub fn root(&self) -> Option<PhysicalId> {
        self.root
    }

    pub fn operator(&self, id: PhysicalId) -> Option<&PhysicalOperator> {
        self.nodes.get(id).map(|n| &n.op)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// emits the whole plan into `fb` by producing its root.
    pub fn emit(&self, fb: &mut FunctionBuilder) -> Result<(), Error> {
        let root = self
            .root
            .ok_or_else(|| Error::InvalidOperation("the plan has no root".to_string()))?;
        let mut emitter = Emitter {
            plan: self,
            states: (0..self.nodes.len()).map(|_| State::None).collect(),
        };
        emitter.produce(fb, root)
    }
}

/// what an operator set up in `produce` for its `consume` to use.
#[derive(Debug, Clone)]
pub(crate) enum State {
    None,
    /// a stack slot holding a running `I64` count.
    Counter(ValueId),
    Join(hash_join::JoinState),
    Group(group_by::GroupState),
}

pub(crate) struct Emitter<'p> {
    plan: &'p PhysicalPlan,
    states: Vec<State>,
}

impl<'p> Emitter<'p> {
    fn node(&self, id: PhysicalId) -> Result<&'p PhysicalNode, Error> {
        let plan = self.plan;
        plan.nodes
            .get(id)
            .ok_or_else(|| Error::InvalidOperation(format!("no physical operator {}", id)))
    }

    pub(crate) fn produce(&mut self, fb: &mut FunctionBuilder, id: PhysicalId) -> Result<(), Error> {
        let node = self.node(id)?;
        tracing::trace!(operator = node.op.name(), id, "produce");
        match &node.op {
            PhysicalOperator::TableScan(op) => op.produce(self, fb, id),
            PhysicalOperator::Select(op) => op.produce(self, fb),
            PhysicalOperator::Map(op) => op.produce(self, fb),
            PhysicalOperator::HashJoin(op) => op.produce(self, fb, id),
            PhysicalOperator::GroupBy(op) => op.produce(self, fb, id),
            PhysicalOperator::Print(op) => op.produce(self, fb, id),
            PhysicalOperator::Result(op) => op.produce(self, fb),
            PhysicalOperator::Insert(op) => op.produce(fb),
            PhysicalOperator::Update(op) => op.produce(self, fb, id),
            PhysicalOperator::Delete(op) => op.produce(self, fb, id),
        }
    }

    pub(crate) fn consume(
        &mut self,
        fb: &mut FunctionBuilder,
        id: PhysicalId,
        values: &IuValueMap,
        source: PhysicalId,
    ) -> Result<(), Error> {
        let node = self.node(id)?;
        match &node.op {
            PhysicalOperator::TableScan(_) | PhysicalOperator::Insert(_) => Err(Error::InvalidOperation(format!(
                "{} has no input to consume",
                node.op.name()
            ))),
            PhysicalOperator::Select(op) => op.consume(self, fb, id, values),
            PhysicalOperator::Map(op) => op.consume(self, fb, id, values),
            PhysicalOperator::HashJoin(op) => op.consume(self, fb, id, values, source),
            PhysicalOperator::GroupBy(op) => op.consume(self, fb, id, values),
            PhysicalOperator::Print(op) => op.consume(self, fb, id, values),
            PhysicalOperator::Result(op) => op.consume(fb, values),
            PhysicalOperator::Update(op) => op.consume(self, fb, id, values),
            PhysicalOperator::Delete(op) => op.consume(self, fb, id, values),
        }
    }

    /// hands a row of operator `id` to its parent.
    pub(crate) fn consume_parent(&mut self, fb: &mut FunctionBuilder, id: PhysicalId, values: &IuValueMap) -> Result<(), Error> {
        let parent = self
            .node(id)?
            .parent
            .ok_or_else(|| Error::InvalidOperation(format!("operator {} has no parent to hand rows to", id)))?;
        self.consume(fb, parent, values, id)
    }

    fn set_state(&mut self, id: PhysicalId, state: State) {
        self.states[id] = state;
    }

    fn state(&self, id: PhysicalId) -> &State {
        &self.states[id]
    }

    fn counter(&self, id: PhysicalId) -> Result<ValueId, Error> {
        match self.state(id) {
            State::Counter(slot) => Ok(*slot),
            _ => Err(Error::InvalidOperation(format!("operator {} consumed before it produced", id))),
        }
    }
}

/// the values of `ius` in `values`, in order.
fn lookup(values: &IuValueMap, ius: &[IuRef]) -> Result<Vec<SqlValue>, Error> {
    ius.iter()
        .map(|iu| values.get(iu).cloned().ok_or(Error::MissingValue(*iu)))
        .collect()
}

fn table_handle(fb: &mut FunctionBuilder, table: &str) -> ValueId {
    let handle = fb.module().table_handle(table);
    fb.const_int(IrType::I64, handle as i64)
}

fn layout_size(fb: &mut FunctionBuilder, layout: LayoutId) -> Result<usize, Error> {
    fb.module()
        .layout(layout)
        .map(|l| l.size)
        .ok_or_else(|| Error::InvalidOperation(format!("no tuple layout {}", layout)))
}

/// a zeroed `I64` counter in the function's frame.
fn new_counter(fb: &mut FunctionBuilder) -> ValueId {
    fb.stack_slot(8)
}

fn increment(fb: &mut FunctionBuilder, slot: ValueId) {
    let n = fb.load(IrType::I64, slot);
    let one = fb.const_int(IrType::I64, 1);
    let next = fb.binary(BinOp::Add, n, one);
    fb.store(next, slot);
}

/// emits a call of the runtime `printf` with one integer argument.
fn printf(fb: &mut FunctionBuilder, format: &str, value: ValueId) -> Result<(), Error> {
    let (ptr, len) = fb.const_bytes(format.as_bytes());
    let value = fb.resize(value, IrType::I64, true);
    fb.call("printf", &[ptr, len, value])?;
    Ok(())
}

/// prints how many rows a data modifying operator touched.
fn print_affected(fb: &mut FunctionBuilder, slot: ValueId, verb: &str) -> Result<(), Error> {
    let n = fb.load(IrType::I64, slot);
    printf(fb, &format!("%ld rows {}\n", verb), n)
}
