//! `logical_algebra` defines the logical operator tree a query is planned as.
//!
//! The tree is held in a `LogicalPlan`, an arena of operators that refer to their children and their parent by
//! `OperatorId`.  Every operator knows which IUs it *produces* (makes available to its parent) and which it
//! *requires* (needs from below).  A scan of `t(a, b)` filtered on `a` and returning `b`:
//! ```text
//! Result [b]                    required {b}
//!   Select (a = 1)              required {a, b}         produced {a, b, tid}
//!     TableScan t               required {a, b}         produced {a, b, tid}
//! ```
//! Produced sets are computed bottom up, required sets top down: an operator's required set starts from what
//! its parent expects of it.  Both are computed once, on first use, and kept.  The tree must not change after
//! that, so all operators are added before anything asks for a set.
//!
//! `verify_dependencies` checks that every operator gets what it requires from its children. It is the last
//! check before code is generated.

use std::cell::{Cell, OnceCell};

use enum_as_inner::EnumAsInner;

use crate::expr::{self, Expression};
use crate::iu::{format_set, IuFactory, IuRef, IuSet};
use crate::sql_type::{self, SqlType, SqlTypeKind};

pub type OperatorId = usize;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("No operator {0} in the plan.")]
    UnknownOperator(OperatorId),
    #[error("Operator {0} already has a parent.")]
    AlreadyAttached(OperatorId),
    #[error("The plan has no result operator.")]
    NoRoot,
    #[error("{operator} requires {missing}, which its input does not produce.")]
    UnsatisfiedDependency { operator: String, missing: String },
    #[error("{operator} needs a bool condition, got {ty}.")]
    NotACondition { operator: &'static str, ty: SqlType },
    #[error(transparent)]
    Expression(#[from] expr::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinMethod {
    Hash,
    /// lookups in an index on the right side's join column.
    Index,
}

/// reads every visible row of `table`.
#[derive(Debug, Clone, PartialEq)]
pub struct TableScan {
    pub table: String,
    pub scan: u32,
    /// column index and the IU it is read into.
    pub columns: Vec<(usize, IuRef)>,
    pub tid: IuRef,
    pub branch: usize,
}

/// computes `iu` from `expression`.
#[derive(Debug, Clone, PartialEq)]
pub struct Mapping {
    pub iu: IuRef,
    pub expression: Expression,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub column: usize,
    pub ty: SqlType,
    pub value: Expression,
}

/// one output column of a `GroupBy`.
#[derive(Debug, Clone, PartialEq, EnumAsInner)]
pub enum Aggregator {
    /// a grouping key, passed through unchanged.
    Keep(IuRef),
    Sum { argument: Expression, iu: IuRef },
    /// `argument` is always numeric; anything else is cast when the aggregator is made.
    Avg { argument: Expression, iu: IuRef },
    CountAll { iu: IuRef },
    Min { argument: Expression, iu: IuRef },
}

/// type `Avg` widens non-numeric arguments to.
pub const AVG_TYPE: SqlType = SqlType::numeric(18, 2);

fn summable(op: &'static str, argument: &Expression) -> Result<(), Error> {
    match argument.ty().kind {
        SqlTypeKind::Integer | SqlTypeKind::Numeric { .. } => Ok(()),
        _ => Err(Error::Expression(expr::Error::Type(sql_type::Error::InvalidOperand {
            op,
            ty: argument.ty(),
        }))),
    }
}

impl Aggregator {
    pub fn keep(iu: IuRef) -> Aggregator {
        Aggregator::Keep(iu)
    }

    pub fn sum(ius: &mut IuFactory, argument: Expression) -> Result<Aggregator, Error> {
        summable("sum", &argument)?;
        let iu = ius.named_value_ref("sum", argument.ty());
        Ok(Aggregator::Sum { argument, iu })
    }

    pub fn avg(ius: &mut IuFactory, argument: Expression) -> Result<Aggregator, Error> {
        summable("avg", &argument)?;
        let ty = argument.ty();
        let argument = match ty.is_numeric() {
            true => argument,
            false => argument.cast(AVG_TYPE.with_nullable(ty.nullable)),
        };
        let iu = ius.named_value_ref("avg", argument.ty());
        Ok(Aggregator::Avg { argument, iu })
    }

    pub fn count_all(ius: &mut IuFactory) -> Aggregator {
        Aggregator::CountAll {
            iu: ius.named_value_ref("count", SqlType::integer()),
        }
    }

    pub fn min(ius: &mut IuFactory, argument: Expression) -> Result<Aggregator, Error> {
        if argument.ty().is_unknown() || argument.ty().kind == SqlTypeKind::Bool {
            return Err(Error::Expression(expr::Error::Type(sql_type::Error::InvalidOperand {
                op: "min",
                ty: argument.ty(),
            })));
        }
        let iu = ius.named_value_ref("min", argument.ty());
        Ok(Aggregator::Min { argument, iu })
    }

    /// the IU this aggregator's result is available as.
    pub fn iu(&self) -> IuRef {
        match self {
            Aggregator::Keep(iu) => *iu,
            Aggregator::Sum { iu, .. }
            | Aggregator::Avg { iu, .. }
            | Aggregator::CountAll { iu }
            | Aggregator::Min { iu, .. } => *iu,
        }
    }

    pub fn required(&self) -> IuSet {
        match self {
            Aggregator::Keep(iu) => [*iu].into_iter().collect(),
            Aggregator::CountAll { .. } => IuSet::new(),
            Aggregator::Sum { argument, .. } | Aggregator::Avg { argument, .. } | Aggregator::Min { argument, .. } => {
                argument.ius()
            }
        }
    }
}

impl std::fmt::Display for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Aggregator::Keep(iu) => write!(f, "keep({})", iu),
            Aggregator::Sum { argument, iu } => write!(f, "{} = sum({})", iu, argument),
            Aggregator::Avg { argument, iu } => write!(f, "{} = avg({})", iu, argument),
            Aggregator::CountAll { iu } => write!(f, "{} = count(*)", iu),
            Aggregator::Min { argument, iu } => write!(f, "{} = min({})", iu, argument),
        }
    }
}

#[derive(Debug, Clone, PartialEq, EnumAsInner)]
pub enum Operator {
    TableScan(TableScan),
    /// passes on the rows for which `predicate` is true.
    Select {
        child: OperatorId,
        predicate: Expression,
    },
    /// passes on every row with the values of `mappings` added.
    Map {
        child: OperatorId,
        mappings: Vec<Mapping>,
    },
    Join {
        left: OperatorId,
        right: OperatorId,
        predicate: Expression,
        method: JoinMethod,
    },
    GroupBy {
        child: OperatorId,
        aggregators: Vec<Aggregator>,
    },
    /// adds one row built from `values`, one per column of `table`.
    Insert {
        table: String,
        column_types: Vec<SqlType>,
        values: Vec<Expression>,
        branch: usize,
    },
    /// rewrites columns of the rows its child produces, identified by `tid`.
    Update {
        child: OperatorId,
        table: String,
        tid: IuRef,
        assignments: Vec<Assignment>,
        branch: usize,
    },
    /// hides the rows its child produces from `branch`.
    Delete {
        child: OperatorId,
        table: String,
        tid: IuRef,
        branch: usize,
    },
    /// the root: hands `selection` of every row to the caller.
    Result {
        child: OperatorId,
        selection: Vec<IuRef>,
    },
}

impl Operator {
    pub fn name(&self) -> &'static str {
        match self {
            Operator::TableScan(_) => "TableScan",
            Operator::Select { .. } => "Select",
            Operator::Map { .. } => "Map",
            Operator::Join { .. } => "Join",
            Operator::GroupBy { .. } => "GroupBy",
            Operator::Insert { .. } => "Insert",
            Operator::Update { .. } => "Update",
            Operator::Delete { .. } => "Delete",
            Operator::Result { .. } => "Result",
        }
    }

    pub fn children(&self) -> Vec<OperatorId> {
        match self {
            Operator::TableScan(_) | Operator::Insert { .. } => vec![],
            Operator::Select { child, .. }
            | Operator::Map { child, .. }
            | Operator::GroupBy { child, .. }
            | Operator::Update { child, .. }
            | Operator::Delete { child, .. }
            | Operator::Result { child, .. } => vec![*child],
            Operator::Join { left, right, .. } => vec![*left, *right],
        }
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operator::TableScan(s) => write!(f, "TableScan {} (scan {})", s.table, s.scan),
            Operator::Select { predicate, .. } => write!(f, "Select {}", predicate),
            Operator::Map { mappings, .. } => write!(
                f,
                "Map {}",
                itertools::join(mappings.iter().map(|m| format!("{} = {}", m.iu, m.expression)), ", ")
            ),
            Operator::Join { predicate, method, .. } => write!(f, "Join {:?} {}", method, predicate),
            Operator::GroupBy { aggregators, .. } => write!(f, "GroupBy {}", itertools::join(aggregators, ", ")),
            Operator::Insert { table, values, .. } => write!(f, "Insert {} ({})", table, itertools::join(values, ", ")),
            Operator::Update { table, assignments, .. } => write!(
                f,
                "Update {} {}",
                table,
                itertools::join(assignments.iter().map(|a| format!("#{} = {}", a.column, a.value)), ", ")
            ),
            Operator::Delete { table, .. } => write!(f, "Delete {}", table),
            Operator::Result { selection, .. } => write!(f, "Result [{}]", itertools::join(selection, ", ")),
        }
    }
}

#[derive(Debug)]
struct Node {
    op: Operator,
    parent: Option<OperatorId>,
    produced: OnceCell<IuSet>,
    required: OnceCell<IuSet>,
}

#[derive(Debug, Default)]
pub struct LogicalPlan {
    nodes: Vec<Node>,
    root: Option<OperatorId>,
    computed: Cell<usize>,
}

impl LogicalPlan {
    pub fn new() -> LogicalPlan {
        LogicalPlan::default()
    }

    fn node(&self, id: OperatorId) -> Result<&Node, Error> {
        self.nodes.get(id).ok_or(Error::UnknownOperator(id))
    }

    fn add(&mut self, op: Operator) -> Result<OperatorId, Error> {
        let children = op.children();
        for c in &children {
            if self.node(*c)?.parent.is_some() {
                return Err(Error::AlreadyAttached(*c));
            }
        }
        let id = self.nodes.len();
        for c in children {
            self.nodes[c].parent = Some(id);
        }
        self.nodes.push(Node {
            op,
            parent: None,
            produced: OnceCell::new(),
            required: OnceCell::new(),
        });
        Ok(id)
    }

    pub fn table_scan(&mut self, scan: TableScan) -> OperatorId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            op: Operator::TableScan(scan),
            parent: None,
            produced: OnceCell::new(),
            required: OnceCell::new(),
        });
        id
    }

    pub fn select(&mut self, child: OperatorId, predicate: Expression) -> Result<OperatorId, Error> {
        check_condition("Select", &predicate)?;
        self.add(Operator::Select { child, predicate })
    }

    pub fn map(&mut self, child: OperatorId, mappings: Vec<Mapping>) -> Result<OperatorId, Error> {
        self.add(Operator::Map { child, mappings })
    }

    pub fn join(
        &mut self,
        left: OperatorId,
        right: OperatorId,
        predicate: Expression,
        method: JoinMethod,
    ) -> Result<OperatorId, Error> {
        check_condition("Join", &predicate)?;
        self.add(Operator::Join {
            left,
            right,
            predicate,
            method,
        })
    }

    pub fn group_by(&mut self, child: OperatorId, aggregators: Vec<Aggregator>) -> Result<OperatorId, Error> {
        self.add(Operator::GroupBy { child, aggregators })
    }

    pub fn insert(
        &mut self,
        table: &str,
        column_types: Vec<SqlType>,
        values: Vec<Expression>,
        branch: usize,
    ) -> Result<OperatorId, Error> {
        self.add(Operator::Insert {
            table: table.to_string(),
            column_types,
            values,
            branch,
        })
    }

    pub fn update(
        &mut self,
        child: OperatorId,
        table: &str,
        tid: IuRef,
        assignments: Vec<Assignment>,
        branch: usize,
    ) -> Result<OperatorId, Error> {
        self.add(Operator::Update {
            child,
            table: table.to_string(),
            tid,
            assignments,
            branch,
        })
    }

    pub fn delete(&mut self, child: OperatorId, table: &str, tid: IuRef, branch: usize) -> Result<OperatorId, Error> {
        self.add(Operator::Delete {
            child,
            table: table.to_string(),
            tid,
            branch,
        })
    }

    /// adds the result operator and makes it the root of the plan.
    pub fn result(&mut self, child: OperatorId, selection: Vec<IuRef>) -> Result<OperatorId, Error> {
        let id = self.add(Operator::Result { child, selection })?;
        self.root = Some(id);
        Ok(id)
    }

    /// makes a data modifying operator the root of the plan.
    pub fn set_root(&mut self, id: OperatorId) -> Result<(), Error> {
        if self.node(id)?.parent.is_some() {
            return Err(Error::AlreadyAttached(id));
        }
        self.root = Some(id);
        Ok(())
    }

    pub fn root(&self) -> Option<OperatorId> {
        self.root
    }

    pub fn operator(&self, id: OperatorId) -> Result<&Operator, Error> {
        Ok(&self.node(id)?.op)
    }

    pub fn parent(&self, id: OperatorId) -> Result<Option<OperatorId>, Error> {
        Ok(self.node(id)?.parent)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// how many produced and required sets have been computed so far.
    pub fn computed_sets(&self) -> usize {
        self.computed.get()
    }

    pub fn produced(&self, id: OperatorId) -> Result<&IuSet, Error> {
        let node = self.node(id)?;
        if let Some(set) = node.produced.get() {
            return Ok(set);
        }
        let set = self.compute_produced(&node.op)?;
        self.computed.set(self.computed.get() + 1);
        Ok(node.produced.get_or_init(|| set))
    }

    fn compute_produced(&self, op: &Operator) -> Result<IuSet, Error> {
        Ok(match op {
            Operator::TableScan(s) => s.columns.iter().map(|(_, iu)| *iu).chain([s.tid]).collect(),
            Operator::Select { child, .. } => self.produced(*child)?.clone(),
            Operator::Map { child, mappings } => {
                let mut set = self.produced(*child)?.clone();
                set.extend(mappings.iter().map(|m| m.iu));
                set
            }
            Operator::Join { left, right, .. } => {
                let mut set = self.produced(*left)?.clone();
                set.extend(self.produced(*right)?.iter().copied());
                set
            }
            Operator::GroupBy { aggregators, .. } => aggregators.iter().map(|a| a.iu()).collect(),
            Operator::Insert { .. } | Operator::Update { .. } | Operator::Delete { .. } | Operator::Result { .. } => {
                IuSet::new()
            }
        })
    }

    /// what the parent of `id` needs `id` to produce. Under a join, each side is expected to deliver the part
    /// of the join's required set it produces.
    pub fn expected(&self, id: OperatorId) -> Result<IuSet, Error> {
        let parent = match self.node(id)?.parent {
            None => return Ok(IuSet::new()),
            Some(p) => p,
        };
        let required = self.required(parent)?;
        match &self.node(parent)?.op {
            Operator::Join { .. } => {
                let produced = self.produced(id)?;
                Ok(required.intersection(produced).copied().collect())
            }
            _ => Ok(required.clone()),
        }
    }

    pub fn required(&self, id: OperatorId) -> Result<&IuSet, Error> {
        let node = self.node(id)?;
        if let Some(set) = node.required.get() {
            return Ok(set);
        }
        let set = self.compute_required(id, &node.op)?;
        self.computed.set(self.computed.get() + 1);
        Ok(node.required.get_or_init(|| set))
    }

    fn compute_required(&self, id: OperatorId, op: &Operator) -> Result<IuSet, Error> {
        Ok(match op {
            Operator::TableScan(_) => {
                let produced = self.produced(id)?;
                self.expected(id)?.intersection(produced).copied().collect()
            }
            Operator::Select { predicate, .. } => {
                let mut set = self.expected(id)?;
                set.extend(predicate.ius());
                set
            }
            Operator::Map { mappings, .. } => {
                let mut set = self.expected(id)?;
                for m in mappings {
                    set.remove(&m.iu);
                }
                for m in mappings {
                    set.extend(m.expression.ius());
                }
                set
            }
            Operator::Join { predicate, .. } => {
                let mut set = self.expected(id)?;
                set.extend(predicate.ius());
                set
            }
            Operator::GroupBy { aggregators, .. } => aggregators.iter().flat_map(|a| a.required()).collect(),
            Operator::Insert { values, .. } => values.iter().flat_map(|v| v.ius()).collect(),
            Operator::Update { tid, assignments, .. } => {
                let mut set: IuSet = assignments.iter().flat_map(|a| a.value.ius()).collect();
                set.insert(*tid);
                set
            }
            Operator::Delete { tid, .. } => [*tid].into_iter().collect(),
            Operator::Result { selection, .. } => selection.iter().copied().collect(),
        })
    }

    /// checks, from the root down, that every operator's children produce everything it requires.
    pub fn verify_dependencies(&self) -> Result<(), Error> {
        let root = self.root.ok_or(Error::NoRoot)?;
        self.verify_below(root)
    }

    fn verify_below(&self, id: OperatorId) -> Result<(), Error> {
        let op = self.operator(id)?;
        let children = op.children();
        if children.is_empty() {
            return Ok(());
        }
        let mut available = IuSet::new();
        for c in &children {
            available.extend(self.produced(*c)?.iter().copied());
        }
        let missing: IuSet = self.required(id)?.difference(&available).copied().collect();
        if !missing.is_empty() {
            return Err(Error::UnsatisfiedDependency {
                operator: format!("{} (operator {})", op.name(), id),
                missing: format_set(&missing),
            });
        }
        for c in children {
            self.verify_below(c)?;
        }
        Ok(())
    }

    /// the plan as an indented tree, one operator per line, with IU names from `ius`.
    pub fn explain(&self, ius: &IuFactory) -> String {
        let mut out = String::new();
        if let Some(root) = self.root {
            self.explain_below(root, 0, ius, &mut out);
        }
        out
    }

    fn explain_below(&self, id: OperatorId, depth: usize, ius: &IuFactory, out: &mut String) {
        let Ok(op) = self.operator(id) else {
            return;
        };
        let produced = match self.produced(id) {
            Ok(set) => itertools::join(set.iter().map(|iu| ius.describe(*iu)), ", "),
            Err(_) => String::new(),
        };
        out.push_str(&format!("{}{} -> [{}]\n", "  ".repeat(depth), op, produced));
        for c in op.children() {
            self.explain_below(c, depth + 1, ius, out);
        }
    }
}

fn check_condition(operator: &'static str, e: &Expression) -> Result<(), Error> {
    match e.ty().kind {
        SqlTypeKind::Bool | SqlTypeKind::Unknown => Ok(()),
        _ => Err(Error::NotACondition { operator, ty: e.ty() }),
    }
}

#[cfg(test)]
fn scan_of(plan: &mut LogicalPlan, ius: &mut IuFactory, table: &str, columns: &[&str]) -> (OperatorId, Vec<IuRef>) {
    let scan = ius.new_scan_id();
    let cols: Vec<(usize, IuRef)> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| (i, ius.column_ref(scan, table, i, c, SqlType::integer())))
        .collect();
    let tid = ius.tid_ref(scan, table);
    let out = cols.iter().map(|(_, iu)| *iu).collect();
    let id = plan.table_scan(TableScan {
        table: table.to_string(),
        scan,
        columns: cols,
        tid,
        branch: 0,
    });
    (id, out)
}

#[test]
fn test_produced_and_required_sets() {
    use crate::datum::Datum;
    let mut plan = LogicalPlan::new();
    let mut ius = IuFactory::new();
    let (scan, cols) = scan_of(&mut plan, &mut ius, "t", &["a", "b", "c"]);
    let (a, b) = (cols[0], cols[1]);
    let pred = Expression::equal(Expression::identifier(a), Expression::constant(Datum::Integer(1))).unwrap();
    let select = plan.select(scan, pred).unwrap();
    let root = plan.result(select, vec![b]).unwrap();
    plan.verify_dependencies().unwrap();
    let ab: IuSet = [a, b].into_iter().collect();
    assert_eq!(plan.required(root).unwrap(), &[b].into_iter().collect());
    assert_eq!(plan.required(select).unwrap(), &ab);
    assert_eq!(plan.required(scan).unwrap(), &ab);
    assert_eq!(plan.produced(select).unwrap().len(), 4);
    assert!(plan.produced(root).unwrap().is_empty());
}

#[test]
fn test_sets_are_computed_once() {
    let mut plan = LogicalPlan::new();
    let mut ius = IuFactory::new();
    let (scan, cols) = scan_of(&mut plan, &mut ius, "t", &["a"]);
    let root = plan.result(scan, cols.clone()).unwrap();
    let first = plan.required(scan).unwrap().clone();
    let count = plan.computed_sets();
    assert_eq!(plan.required(scan).unwrap(), &first);
    assert_eq!(plan.produced(scan).unwrap().len(), 2);
    plan.required(root).unwrap();
    assert_eq!(plan.computed_sets(), count);
}

#[test]
fn test_join_sides_get_their_share() {
    let mut plan = LogicalPlan::new();
    let mut ius = IuFactory::new();
    let (l, lc) = scan_of(&mut plan, &mut ius, "l", &["k", "x"]);
    let (r, rc) = scan_of(&mut plan, &mut ius, "r", &["k", "y"]);
    let pred = Expression::equal(Expression::identifier(lc[0]), Expression::identifier(rc[0])).unwrap();
    let join = plan.join(l, r, pred, JoinMethod::Hash).unwrap();
    plan.result(join, vec![lc[1], rc[1]]).unwrap();
    plan.verify_dependencies().unwrap();
    assert_eq!(plan.required(l).unwrap(), &[lc[0], lc[1]].into_iter().collect());
    assert_eq!(plan.required(r).unwrap(), &[rc[0], rc[1]].into_iter().collect());
    assert_eq!(plan.required(join).unwrap().len(), 4);
}

#[test]
fn test_verify_finds_missing_iu() {
    let mut plan = LogicalPlan::new();
    let mut ius = IuFactory::new();
    let (scan, _) = scan_of(&mut plan, &mut ius, "t", &["a"]);
    let (_, other) = scan_of(&mut plan, &mut ius, "u", &["b"]);
    plan.result(scan, other).unwrap();
    assert!(matches!(
        plan.verify_dependencies(),
        Err(Error::UnsatisfiedDependency { .. })
    ));
    assert_eq!(LogicalPlan::new().verify_dependencies(), Err(Error::NoRoot));
}

#[test]
fn test_group_by_requires_only_aggregator_inputs() {
    let mut plan = LogicalPlan::new();
    let mut ius = IuFactory::new();
    let (scan, cols) = scan_of(&mut plan, &mut ius, "t", &["k", "v", "w"]);
    let sum = Aggregator::sum(&mut ius, Expression::identifier(cols[1])).unwrap();
    let count = Aggregator::count_all(&mut ius);
    let outputs = vec![cols[0], sum.iu(), count.iu()];
    let gb = plan.group_by(scan, vec![Aggregator::keep(cols[0]), sum, count]).unwrap();
    plan.result(gb, outputs.clone()).unwrap();
    plan.verify_dependencies().unwrap();
    assert_eq!(plan.required(gb).unwrap(), &[cols[0], cols[1]].into_iter().collect());
    assert_eq!(plan.produced(gb).unwrap(), &outputs.into_iter().collect());
}

#[test]
fn test_builder_rejects_bad_trees() {
    let mut plan = LogicalPlan::new();
    let mut ius = IuFactory::new();
    let (scan, cols) = scan_of(&mut plan, &mut ius, "t", &["a"]);
    assert!(matches!(
        plan.select(scan, Expression::identifier(cols[0])),
        Err(Error::NotACondition { operator: "Select", .. })
    ));
    plan.result(scan, vec![]).unwrap();
    assert_eq!(plan.result(scan, vec![]), Err(Error::AlreadyAttached(scan)));
    assert_eq!(plan.select(42, Expression::null()), Err(Error::UnknownOperator(42)));
    let avg = Aggregator::avg(&mut ius, Expression::identifier(cols[0])).unwrap();
    assert_eq!(avg.iu().ty(), AVG_TYPE);
}
