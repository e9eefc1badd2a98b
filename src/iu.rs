//! Defines information units (IUs), the handles that name one column of data flowing through a query plan.
//!
//! An IU is either a `ColumnRef`, bound to a column of a table scan, or a `ValueRef`, a value computed by a
//! map or an aggregate.  IUs are created by an `IuFactory` and never change afterwards.  Two IUs are the same
//! only if they came from the same call to the factory: a table scanned twice yields two distinct IUs for
//! each of its columns.

use std::collections::BTreeSet;

use crate::sql_type::SqlType;

/// handle of an IU. Equality and ordering look only at the identity, never at the type.
#[derive(Debug, Clone, Copy)]
pub struct IuRef {
    id: u32,
    ty: SqlType,
}

impl IuRef {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn ty(&self) -> SqlType {
        self.ty
    }
}

impl PartialEq for IuRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for IuRef {}

impl PartialOrd for IuRef {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IuRef {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

impl std::hash::Hash for IuRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl std::fmt::Display for IuRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{}", self.id)
    }
}

/// ordered set of IUs, as produced and required by operators.
pub type IuSet = BTreeSet<IuRef>;

pub fn format_set(set: &IuSet) -> String {
    format!("{{{}}}", itertools::join(set.iter(), ", "))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IuKind {
    /// a column of the table read by scan `scan`. `column` is `None` for the scan's row id.
    ColumnRef {
        scan: u32,
        table: String,
        column: Option<usize>,
        name: String,
    },
    ValueRef { name: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IuInfo {
    pub kind: IuKind,
    pub ty: SqlType,
}

/// owns the description of every IU of a query.
#[derive(Debug, Default)]
pub struct IuFactory {
    ius: Vec<IuInfo>,
    scans: u32,
}

impl IuFactory {
    pub fn new() -> IuFactory {
        IuFactory::default()
    }

    fn create(&mut self, kind: IuKind, ty: SqlType) -> IuRef {
        self.ius.push(IuInfo { kind, ty });
        IuRef {
            id: self.ius.len() as u32 - 1,
            ty,
        }
    }

    /// a fresh id for one table scan in the plan.
    pub fn new_scan_id(&mut self) -> u32 {
        self.scans += 1;
        self.scans - 1
    }

    pub fn column_ref(&mut self, scan: u32, table: &str, column: usize, name: &str, ty: SqlType) -> IuRef {
        self.create(
            IuKind::ColumnRef {
                scan,
                table: table.to_string(),
                column: Some(column),
                name: name.to_string(),
            },
            ty,
        )
    }

    /// the row id of scan `scan`; an `Integer` that is never NULL.
    pub fn tid_ref(&mut self, scan: u32, table: &str) -> IuRef {
        self.create(
            IuKind::ColumnRef {
                scan,
                table: table.to_string(),
                column: None,
                name: "tid".to_string(),
            },
            SqlType::integer(),
        )
    }

    pub fn value_ref(&mut self, ty: SqlType) -> IuRef {
        self.create(IuKind::ValueRef { name: None }, ty)
    }

    pub fn named_value_ref(&mut self, name: &str, ty: SqlType) -> IuRef {
        self.create(
            IuKind::ValueRef {
                name: Some(name.to_string()),
            },
            ty,
        )
    }

    pub fn info(&self, iu: IuRef) -> Option<&IuInfo> {
        self.ius.get(iu.id as usize)
    }

    /// human readable name: `table.column` for columns, the given name or `%id` for values.
    pub fn describe(&self, iu: IuRef) -> String {
        match self.info(iu).map(|i| &i.kind) {
            Some(IuKind::ColumnRef { table, name, .. }) => format!("{}.{}", table, name),
            Some(IuKind::ValueRef { name: Some(name) }) => name.clone(),
            _ => iu.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.ius.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ius.is_empty()
    }
}

#[test]
fn test_ius_compare_by_identity() {
    let mut f = IuFactory::new();
    let s1 = f.new_scan_id();
    let s2 = f.new_scan_id();
    let a1 = f.column_ref(s1, "t", 0, "a", SqlType::integer());
    let a2 = f.column_ref(s2, "t", 0, "a", SqlType::integer());
    assert_ne!(a1, a2);
    assert_eq!(a1, a1);
    let set: IuSet = [a2, a1, a1].into_iter().collect();
    assert_eq!(set.len(), 2);
    assert_eq!(set.iter().next(), Some(&a1));
    assert_eq!(f.describe(a1), "t.a");
    let tid = f.tid_ref(s1, "t");
    assert_eq!(f.describe(tid), "t.tid");
    assert_eq!(tid.ty(), SqlType::integer());
    let v = f.value_ref(SqlType::bool());
    assert_eq!(f.describe(v), format!("%{}", v.id()));
    assert_eq!(format_set(&[a1, v].into_iter().collect()), format!("{{%0, %{}}}", v.id()));
}
