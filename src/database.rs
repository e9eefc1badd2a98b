//! Defines `Database`, the tables, indexes and branches queries run against.
//!
//! Branches are named views of the data. Every row carries one visibility bit per branch, so a new branch starts
//! out seeing exactly what its parent sees, and rows added or deleted in one branch afterwards do not show up in
//! the other.

use std::collections::BTreeMap;

use crate::datum::Datum;
use crate::sql_type::SqlType;
use crate::table::{self, Table, MASTER_BRANCH, MAX_BRANCHES};
use crate::table_traits::TableMeta;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Table name not found: {0}.")]
    TableNameNotFound(String),
    #[error("Table {0} already exists.")]
    TableExists(String),
    #[error("Index {0} already exists.")]
    IndexExists(String),
    #[error("Branch name not found: {0}.")]
    BranchNotFound(String),
    #[error("Branch {0} already exists.")]
    BranchExists(String),
    #[error("No more than {} branches are supported.", MAX_BRANCHES)]
    TooManyBranches,
    #[error(transparent)]
    Table(#[from] table::Error),
}

/// An index over one column of a table. Indexes are recorded but queries do not use them yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    pub name: String,
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    pub name: String,
    pub id: usize,
    pub parent: Option<usize>,
}

pub struct Database {
    tables: BTreeMap<String, Table>,
    indexes: BTreeMap<String, Index>,
    branches: Vec<Branch>,
}

impl Database {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Database {
            tables: BTreeMap::new(),
            indexes: BTreeMap::new(),
            branches: vec![Branch {
                name: "master".to_string(),
                id: MASTER_BRANCH,
                parent: None,
            }],
        }
    }

    pub fn create_table(&mut self, name: &str, columns: &[(&str, SqlType)]) -> Result<&mut Table, Error> {
        if self.tables.contains_key(name) {
            return Err(Error::TableExists(name.to_string()));
        }
        let table = Table::create(name, columns)?;
        Ok(self.tables.entry(name.to_string()).or_insert(table))
    }

    pub fn table(&self, name: &str) -> Result<&Table, Error> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::TableNameNotFound(name.to_string()))
    }

    pub fn table_mut(&mut self, name: &str) -> Result<&mut Table, Error> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| Error::TableNameNotFound(name.to_string()))
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    /// adds rows to master.
    pub fn insert_rows(&mut self, table_name: &str, rows: &[Vec<Datum>]) -> Result<(), Error> {
        let table = self.table_mut(table_name)?;
        for row in rows {
            table.add_row(row)?;
        }
        Ok(())
    }

    pub fn create_index(&mut self, name: &str, table_name: &str, column: &str) -> Result<&Index, Error> {
        if self.indexes.contains_key(name) {
            return Err(Error::IndexExists(name.to_string()));
        }
        self.table(table_name)?.column_index(column)?;
        let index = Index {
            name: name.to_string(),
            table: table_name.to_string(),
            column: column.to_string(),
        };
        Ok(self.indexes.entry(name.to_string()).or_insert(index))
    }

    pub fn index(&self, name: &str) -> Option<&Index> {
        self.indexes.get(name)
    }

    /// creates a branch that sees every row `parent` sees, and returns its id.
    pub fn create_branch(&mut self, name: &str, parent: &str) -> Result<usize, Error> {
        if self.branches.iter().any(|b| b.name == name) {
            return Err(Error::BranchExists(name.to_string()));
        }
        let parent = self.branch_id(parent)?;
        let id = self.branches.len();
        if id >= MAX_BRANCHES {
            return Err(Error::TooManyBranches);
        }
        for table in self.tables.values_mut() {
            table.copy_visibility(parent, id)?;
        }
        self.branches.push(Branch {
            name: name.to_string(),
            id,
            parent: Some(parent),
        });
        tracing::debug!(branch = name, id, parent, "created branch");
        Ok(id)
    }

    pub fn branch_id(&self, name: &str) -> Result<usize, Error> {
        self.branches
            .iter()
            .find(|b| b.name == name)
            .map(|b| b.id)
            .ok_or_else(|| Error::BranchNotFound(name.to_string()))
    }

    pub fn branches(&self) -> &[Branch] {
        &self.branches
    }

    /// one `CREATE TABLE` statement per table.
    pub fn schema(&self) -> String {
        use itertools::Itertools;
        self.tables
            .values()
            .map(|t| {
                format!(
                    "CREATE TABLE {} ({});\n",
                    t.name(),
                    t.column_names()
                        .iter()
                        .zip(t.column_types())
                        .map(|(n, ty)| format!("{} {}", n, ty))
                        .join(", ")
                )
            })
            .collect()
    }
}

#[test]
fn test_tables_and_indexes() {
    let mut db = Database::new();
    db.create_table("t", &[("a", SqlType::integer())]).unwrap();
    assert_eq!(
        db.create_table("t", &[]).err(),
        Some(Error::TableExists("t".to_string()))
    );
    db.insert_rows("t", &[vec![Datum::Integer(1)], vec![Datum::Integer(2)]]).unwrap();
    assert_eq!(db.table("t").unwrap().row_count(), 2);
    assert!(matches!(db.table("u"), Err(Error::TableNameNotFound(_))));
    db.create_index("t_a", "t", "a").unwrap();
    assert_eq!(db.index("t_a").map(|i| i.column.as_str()), Some("a"));
    assert!(db.create_index("t_b", "t", "b").is_err());
    assert_eq!(db.schema(), "CREATE TABLE t (a integer);\n");
}

#[test]
fn test_branch_sees_parent_rows() {
    let mut db = Database::new();
    db.create_table("t", &[("a", SqlType::integer())]).unwrap();
    db.insert_rows("t", &[vec![Datum::Integer(1)]]).unwrap();
    let dev = db.create_branch("dev", "master").unwrap();
    assert_eq!(dev, 1);
    db.table_mut("t").unwrap().delete_row(0, dev).unwrap();
    let t = db.table("t").unwrap();
    assert!(t.is_visible(0, MASTER_BRANCH));
    assert!(!t.is_visible(0, dev));
    assert!(matches!(db.create_branch("x", "nope"), Err(Error::BranchNotFound(_))));
}
