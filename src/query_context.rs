//! `QueryContext` carries what building a plan for one query needs: the database, the IU factory, the scope
//! that resolves `alias.column` names to IUs, and the branch the query runs in.
//!
//! Plans are built through it so that every scan registers its columns in the scope, and data modifying
//! operators check their values against the target table.

use std::collections::BTreeMap;

use crate::config::Config;
use crate::database::{self, Database};
use crate::expr::{self, Expression};
use crate::iu::{IuFactory, IuRef};
use crate::logical_algebra::{self, Assignment, LogicalPlan, OperatorId, TableScan};
use crate::sql_type::SqlType;
use crate::table;
use crate::table_traits::TableMeta;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Invalid operation: {0}.")]
    InvalidOperation(String),
    #[error("Alias {0} is already in use.")]
    DuplicateAlias(String),
    #[error("No branch with id {0}.")]
    UnknownBranch(usize),
    #[error("Table {table} has {expected} columns, got {got} values.")]
    ArityMismatch { table: String, expected: usize, got: usize },
    #[error("Column {column} of {table} cannot hold a {ty} value.")]
    NotNullable { table: String, column: String, ty: SqlType },
    #[error(transparent)]
    Database(#[from] database::Error),
    #[error(transparent)]
    Table(#[from] table::Error),
    #[error(transparent)]
    Plan(#[from] logical_algebra::Error),
    #[error(transparent)]
    Expression(#[from] expr::Error),
}

/// names visible to a query.
#[derive(Debug, Default)]
pub struct Scope {
    symbols: BTreeMap<String, IuRef>,
    aliases: BTreeMap<String, (String, IuRef)>,
}

impl Scope {
    pub fn lookup(&self, symbol: &str) -> Result<IuRef, Error> {
        self.symbols
            .get(symbol)
            .copied()
            .ok_or_else(|| Error::InvalidOperation(format!("unknown symbol {}", symbol)))
    }

    /// the table an alias stands for and the IU of its row id.
    pub fn alias(&self, alias: &str) -> Result<(&str, IuRef), Error> {
        self.aliases
            .get(alias)
            .map(|(t, tid)| (t.as_str(), *tid))
            .ok_or_else(|| Error::InvalidOperation(format!("unknown alias {}", alias)))
    }
}

pub struct QueryContext<'a> {
    db: &'a Database,
    ius: IuFactory,
    scope: Scope,
    branch: usize,
}

// A value of type `ty` may go into a column of type `column` once cast, unless it could be NULL and the
// column cannot.
fn fit_to_column(value: Expression, column: SqlType) -> Option<Expression> {
    let ty = value.ty();
    if ty.nullable && !column.nullable {
        return None;
    }
    if ty.is_unknown() || ty == column {
        return Some(value);
    }
    Some(value.cast(column.with_nullable(ty.nullable)))
}

impl<'a> QueryContext<'a> {
    /// a context for queries against `db` in the branch `config` names.
    pub fn new(db: &'a Database, config: &Config) -> Result<QueryContext<'a>, Error> {
        if !db.branches().iter().any(|b| b.id == config.branch) {
            return Err(Error::UnknownBranch(config.branch));
        }
        Ok(QueryContext {
            db,
            ius: IuFactory::new(),
            scope: Scope::default(),
            branch: config.branch,
        })
    }

    pub fn database(&self) -> &Database {
        self.db
    }

    pub fn branch(&self) -> usize {
        self.branch
    }

    pub fn ius(&mut self) -> &mut IuFactory {
        &mut self.ius
    }

    pub fn iu_factory(&self) -> &IuFactory {
        &self.ius
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// the IU named `alias.column`; `alias.tid` is the row id.
    pub fn iu(&self, symbol: &str) -> Result<IuRef, Error> {
        self.scope.lookup(symbol)
    }

    /// an expression reading `alias.column`.
    pub fn column(&self, symbol: &str) -> Result<Expression, Error> {
        Ok(Expression::identifier(self.iu(symbol)?))
    }

    /// a fresh IU for a computed value, also visible as `name`.
    pub fn value_iu(&mut self, name: &str, ty: SqlType) -> IuRef {
        let iu = self.ius.named_value_ref(name, ty);
        self.scope.symbols.insert(name.to_string(), iu);
        iu
    }

    /// adds a scan of every column of `table` to `plan`, with the columns named `alias.column`.
    pub fn scan(&mut self, plan: &mut LogicalPlan, table_name: &str, alias: &str) -> Result<OperatorId, Error> {
        if self.scope.aliases.contains_key(alias) {
            return Err(Error::DuplicateAlias(alias.to_string()));
        }
        let table = self.db.table(table_name)?;
        let scan = self.ius.new_scan_id();
        let mut columns = vec![];
        for (i, (name, ty)) in table.column_names().iter().zip(table.column_types()).enumerate() {
            let iu = self.ius.column_ref(scan, table_name, i, name, ty);
            self.scope.symbols.insert(format!("{}.{}", alias, name), iu);
            columns.push((i, iu));
        }
        let tid = self.ius.tid_ref(scan, table_name);
        self.scope.symbols.insert(format!("{}.tid", alias), tid);
        self.scope
            .aliases
            .insert(alias.to_string(), (table_name.to_string(), tid));
        tracing::trace!(table = table_name, alias, scan, "scan added");
        Ok(plan.table_scan(TableScan {
            table: table_name.to_string(),
            scan,
            columns,
            tid,
            branch: self.branch,
        }))
    }

    /// adds an insert of one row into `table`. `values` holds one expression per column, cast where needed.
    pub fn insert(&mut self, plan: &mut LogicalPlan, table_name: &str, values: Vec<Expression>) -> Result<OperatorId, Error> {
        let table = self.db.table(table_name)?;
        let types = table.column_types();
        let names = table.column_names();
        if values.len() != types.len() {
            return Err(Error::ArityMismatch {
                table: table_name.to_string(),
                expected: types.len(),
                got: values.len(),
            });
        }
        let mut fitted = vec![];
        for ((value, ty), name) in values.into_iter().zip(&types).zip(&names) {
            let value_ty = value.ty();
            fitted.push(fit_to_column(value, *ty).ok_or_else(|| Error::NotNullable {
                table: table_name.to_string(),
                column: name.clone(),
                ty: value_ty,
            })?);
        }
        let id = plan.insert(table_name, types, fitted, self.branch)?;
        plan.set_root(id)?;
        Ok(id)
    }

    /// adds an update of the rows `child` produces from the scan named `alias`.
    pub fn update(
        &mut self,
        plan: &mut LogicalPlan,
        child: OperatorId,
        alias: &str,
        assignments: Vec<(&str, Expression)>,
    ) -> Result<OperatorId, Error> {
        let (table_name, tid) = self.scope.alias(alias)?;
        let table_name = table_name.to_string();
        let table = self.db.table(&table_name)?;
        let mut fitted = vec![];
        for (column_name, value) in assignments {
            let column = table.column_index(column_name)?;
            let ty = table.column_type(column).ok_or_else(|| table::Error::ColumnNotFound {
                table: table_name.clone(),
                column: column_name.to_string(),
            })?;
            let value_ty = value.ty();
            let value = fit_to_column(value, ty).ok_or_else(|| Error::NotNullable {
                table: table_name.clone(),
                column: column_name.to_string(),
                ty: value_ty,
            })?;
            fitted.push(Assignment { column, ty, value });
        }
        let id = plan.update(child, &table_name, tid, fitted, self.branch)?;
        plan.set_root(id)?;
        Ok(id)
    }

    /// adds a delete of the rows `child` produces from the scan named `alias`.
    pub fn delete(&mut self, plan: &mut LogicalPlan, child: OperatorId, alias: &str) -> Result<OperatorId, Error> {
        let (table_name, tid) = self.scope.alias(alias)?;
        let table_name = table_name.to_string();
        let id = plan.delete(child, &table_name, tid, self.branch)?;
        plan.set_root(id)?;
        Ok(id)
    }
}

#[cfg(test)]
fn test_db() -> Database {
    let mut db = Database::new();
    db.create_table(
        "t",
        &[("a", SqlType::integer()), ("b", SqlType::varchar(8).as_nullable())],
    )
    .unwrap();
    db
}

#[test]
fn test_scan_registers_symbols() {
    let db = test_db();
    let mut ctx = QueryContext::new(&db, &Config::default()).unwrap();
    let mut plan = LogicalPlan::new();
    let s1 = ctx.scan(&mut plan, "t", "x").unwrap();
    let s2 = ctx.scan(&mut plan, "t", "y").unwrap();
    assert_ne!(s1, s2);
    assert_ne!(ctx.iu("x.a").unwrap(), ctx.iu("y.a").unwrap());
    assert_eq!(ctx.iu("x.b").unwrap().ty(), SqlType::varchar(8).as_nullable());
    assert_eq!(ctx.iu("x.tid").unwrap().ty(), SqlType::integer());
    assert!(matches!(ctx.iu("x.c"), Err(Error::InvalidOperation(_))));
    assert_eq!(ctx.scan(&mut plan, "t", "x"), Err(Error::DuplicateAlias("x".to_string())));
    assert!(matches!(ctx.scan(&mut plan, "nope", "z"), Err(Error::Database(_))));
}

#[test]
fn test_insert_checks_values() {
    use crate::datum::Datum;
    let db = test_db();
    let mut ctx = QueryContext::new(&db, &Config::default()).unwrap();
    let mut plan = LogicalPlan::new();
    assert!(matches!(
        ctx.insert(&mut plan, "t", vec![Expression::constant(Datum::Integer(1))]),
        Err(Error::ArityMismatch { expected: 2, got: 1, .. })
    ));
    assert!(matches!(
        ctx.insert(&mut plan, "t", vec![Expression::null(), Expression::null()]),
        Err(Error::NotNullable { .. })
    ));
    let id = ctx
        .insert(
            &mut plan,
            "t",
            vec![Expression::constant(Datum::Integer(1)), Expression::constant(Datum::Varchar("hi".to_string()))],
        )
        .unwrap();
    assert_eq!(plan.root(), Some(id));
    let (_, _, values, _) = plan.operator(id).unwrap().as_insert().unwrap();
    assert_eq!(values[1].ty(), SqlType::varchar(8));
}

#[test]
fn test_unknown_branch() {
    let db = test_db();
    assert!(matches!(
        QueryContext::new(&db, &Config::default().branch(3)),
        Err(Error::UnknownBranch(3))
    ));
}
