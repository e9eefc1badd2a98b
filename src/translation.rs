//! Translates a logical plan into a physical one.
//!
//! The translation is one to one, with two choices made on the way. Scans only read the columns someone above
//! them requires, and a join carries only the build side IUs its parent expects. A join predicate must be a
//! conjunction of equalities, each between an expression over one side and an expression over the other.

use crate::config::{Config, ResultMode};
use crate::expr::Expression;
use crate::iu::IuRef;
use crate::logical_algebra::{self, JoinMethod, LogicalPlan, Operator, OperatorId};
use crate::physical_algebra::{self as physical, PhysicalId, PhysicalOperator, PhysicalPlan};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Plan(#[from] logical_algebra::Error),
    #[error(transparent)]
    Physical(#[from] physical::Error),
    #[error("Join method {0:?} is not implemented.")]
    UnsupportedJoinMethod(JoinMethod),
    #[error("Cannot hash join on {0}: not a conjunction of equalities between the two inputs.")]
    NonEquiJoin(String),
}

pub fn translate(plan: &LogicalPlan, config: &Config) -> Result<PhysicalPlan, Error> {
    let root = plan.root().ok_or(logical_algebra::Error::NoRoot)?;
    let mut out = PhysicalPlan::new();
    let id = translate_node(plan, root, config, &mut out)?;
    out.set_root(id);
    tracing::debug!(operators = out.len(), "translated plan");
    Ok(out)
}

// Orients each equality of `predicate` as `(left side, right side)`.
fn join_keys(plan: &LogicalPlan, left: OperatorId, right: OperatorId, predicate: &Expression) -> Result<Vec<(Expression, Expression)>, Error> {
    let non_equi = || Error::NonEquiJoin(predicate.to_string());
    let pairs = predicate.equality_pairs().ok_or_else(non_equi)?;
    let left_ius = plan.produced(left)?;
    let right_ius = plan.produced(right)?;
    let mut keys = vec![];
    for (a, b) in pairs {
        let (a_ius, b_ius) = (a.ius(), b.ius());
        if a_ius.is_subset(left_ius) && b_ius.is_subset(right_ius) {
            keys.push((a.clone(), b.clone()));
        } else if b_ius.is_subset(left_ius) && a_ius.is_subset(right_ius) {
            keys.push((b.clone(), a.clone()));
        } else {
            return Err(non_equi());
        }
    }
    Ok(keys)
}

fn translate_node(plan: &LogicalPlan, id: OperatorId, config: &Config, out: &mut PhysicalPlan) -> Result<PhysicalId, Error> {
    let op = match plan.operator(id)? {
        Operator::TableScan(scan) => {
            let required = plan.required(id)?;
            PhysicalOperator::TableScan(physical::TableScan {
                table: scan.table.clone(),
                columns: scan
                    .columns
                    .iter()
                    .filter(|(_, iu)| required.contains(iu))
                    .map(|(col, iu)| (*col, iu.ty(), *iu))
                    .collect(),
                tid: required.contains(&scan.tid).then_some(scan.tid),
                branch: scan.branch,
            })
        }
        Operator::Select { child, predicate } => PhysicalOperator::Select(physical::Select {
            child: translate_node(plan, *child, config, out)?,
            predicate: predicate.clone(),
        }),
        Operator::Map { child, mappings } => PhysicalOperator::Map(physical::Map {
            child: translate_node(plan, *child, config, out)?,
            mappings: mappings.iter().map(|m| (m.iu, m.expression.clone())).collect(),
        }),
        Operator::Join {
            left,
            right,
            predicate,
            method,
        } => {
            if *method != JoinMethod::Hash {
                return Err(Error::UnsupportedJoinMethod(*method));
            }
            let keys = join_keys(plan, *left, *right, predicate)?;
            let left_ius = plan.produced(*left)?;
            let build_ius: Vec<IuRef> = plan.expected(id)?.intersection(left_ius).copied().collect();
            PhysicalOperator::HashJoin(physical::HashJoin {
                left: translate_node(plan, *left, config, out)?,
                right: translate_node(plan, *right, config, out)?,
                keys,
                build_ius,
            })
        }
        Operator::GroupBy { child, aggregators } => PhysicalOperator::GroupBy(physical::GroupBy {
            child: translate_node(plan, *child, config, out)?,
            aggregators: aggregators.clone(),
        }),
        Operator::Insert {
            table,
            column_types,
            values,
            ..
        } => PhysicalOperator::Insert(physical::Insert {
            table: table.clone(),
            column_types: column_types.clone(),
            values: values.clone(),
        }),
        Operator::Update {
            child,
            table,
            tid,
            assignments,
            ..
        } => PhysicalOperator::Update(physical::Update {
            child: translate_node(plan, *child, config, out)?,
            table: table.clone(),
            tid: *tid,
            assignments: assignments.clone(),
        }),
        Operator::Delete { child, table, tid, .. } => PhysicalOperator::Delete(physical::Delete {
            child: translate_node(plan, *child, config, out)?,
            table: table.clone(),
            tid: *tid,
        }),
        Operator::Result { child, selection } => {
            let child = translate_node(plan, *child, config, out)?;
            let selection = selection.clone();
            match config.result_mode {
                ResultMode::Print => PhysicalOperator::Print(physical::Print { child, selection }),
                ResultMode::Collect => PhysicalOperator::Result(physical::ResultSink { child, selection }),
            }
        }
    };
    tracing::trace!(logical = id, operator = op.name(), "translated operator");
    Ok(out.add(op)?)
}
