//! jitql compiles relational query plans into code and runs it against in-memory tables.
//!
//! A query is built as a `LogicalPlan` through a `QueryContext`, checked for IU dependencies, translated into
//! physical operators, and emitted into a single function with the produce/consume model. The function runs
//! on `codegen::interpreter` and calls back into `runtime` for everything that is not straight-line code:
//! hashtables, printing, and table access.

pub mod codegen;
pub mod config;
pub mod database;
pub mod datum;
pub mod expr;
pub mod formatting;
mod hashing;
pub mod hashtable;
pub mod iu;
pub mod logical_algebra;
pub mod memory_pool;
pub mod physical_algebra;
pub mod query_context;
pub mod runtime;
pub mod sql_tuple;
pub mod sql_type;
pub mod sql_value;
pub mod static_hashtable;
pub mod table;
pub mod table_traits;
pub mod translation;
pub mod typed_row;
pub mod vector;

use anyhow::{bail, Context, Result};

use codegen::{FunctionBuilder, Module};
use config::Config;
use database::Database;
use logical_algebra::LogicalPlan;
use query_context::QueryContext;
use runtime::{ExecContext, QueryOutcome};
use typed_row::Row;

/// name of the function a compiled query is emitted as.
pub const QUERY_FUNCTION: &str = "query";

/// a query ready to run, possibly many times.
#[derive(Debug)]
pub struct CompiledQuery {
    module: Module,
    config: Config,
}

/// checks `plan`'s dependencies, translates it and emits its code. The query runs in `ctx`'s branch.
pub fn compile_query(ctx: &QueryContext, plan: &LogicalPlan, config: &Config) -> Result<CompiledQuery> {
    let span = tracing::debug_span!("compile_query", operators = plan.len());
    let _guard = span.enter();
    if plan.root().is_none() {
        bail!("Cannot compile a plan without a root.");
    }
    plan.verify_dependencies().context("IU dependencies of the plan")?;
    tracing::debug!(plan = %plan.explain(ctx.iu_factory()), "plan verified");
    let physical = translation::translate(plan, config)?;
    let mut module = Module::new(QUERY_FUNCTION);
    let mut fb = FunctionBuilder::new(&mut module, QUERY_FUNCTION, &[], None);
    physical.emit(&mut fb).context("emitting code for the plan")?;
    fb.finish()?;
    Ok(CompiledQuery {
        module,
        config: config.clone().branch(ctx.branch()),
    })
}

impl CompiledQuery {
    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// runs the query. Collected rows, printed output and diagnostics come back in the outcome.
    pub fn execute(&self, db: &mut Database) -> Result<QueryOutcome> {
        let mut ctx = ExecContext::new(db, &self.module, &self.config);
        self.run(&mut ctx)?;
        Ok(ctx.finish()?)
    }

    /// runs the query, handing each collected row to `callback` instead of the outcome.
    pub fn execute_with_callback<'a>(
        &'a self,
        db: &'a mut Database,
        callback: &'a mut dyn FnMut(&Row),
    ) -> Result<QueryOutcome> {
        let mut ctx = ExecContext::new(db, &self.module, &self.config);
        ctx.set_callback(callback);
        self.run(&mut ctx)?;
        Ok(ctx.finish()?)
    }

    fn run(&self, ctx: &mut ExecContext) -> Result<()> {
        let span = tracing::debug_span!("execute", branch = self.config.branch);
        let _guard = span.enter();
        codegen::interpreter::run_function(&self.module, QUERY_FUNCTION, &[], ctx)?;
        if ctx.overflow() {
            tracing::info!("query finished with arithmetic overflow");
        }
        Ok(())
    }
}
