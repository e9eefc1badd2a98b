//! represents an in-memory table in column layout.
//!
//! Each column is a `Vector` of fixed-size elements, so generated code can find the value of row `tid` at
//! `base + tid * size`. Strings are stored as `{ptr, len}` handles into a string heap owned by the table.
//! Next to the columns, every row has two 64-bit words: its null indicators (bit `i` is set when column `i` is
//! NULL) and its branch bitmap (bit `b` is set when the row is visible in branch `b`). Rows are never removed;
//! deleting a row clears its bit for one branch.

use byteorder::{ByteOrder, NativeEndian};
use streaming_iterator::StreamingIterator;

use crate::datum::{self, Datum, StringHeap};
use crate::sql_type::SqlType;
use crate::table_traits::TableMeta;
use crate::typed_row::{self, Row};
use crate::vector::Vector;

/// Most columns a table can have: one bit each in the null indicator word.
pub const MAX_COLUMNS: usize = 64;
/// Most branches a database can have: one bit each in the branch bitmap.
pub const MAX_BRANCHES: usize = 64;
pub const MASTER_BRANCH: usize = 0;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Table {0} has too many columns.")]
    TooManyColumns(String),
    #[error("Table {table} has more than one column named {column}.")]
    DuplicateColumn { table: String, column: String },
    #[error("Column {column} of table {table} cannot hold values of type {ty}.")]
    UnstorableType { table: String, column: String, ty: SqlType },
    #[error("Column {column} not found in table {table}.")]
    ColumnNotFound { table: String, column: String },
    #[error("Row {tid} is out of range for table {table} with {rows} rows.")]
    TidOutOfRange { table: String, tid: usize, rows: usize },
    #[error("Branch {0} does not exist.")]
    BadBranch(usize),
    #[error(transparent)]
    Row(#[from] typed_row::Error),
    #[error(transparent)]
    Datum(#[from] datum::Error),
}

struct Column {
    name: String,
    ty: SqlType,
    data: Vector,
}

pub struct Table {
    name: String,
    columns: Vec<Column>,
    null_indicators: Vector,
    branch_bitmap: Vector,
    strings: StringHeap,
}

impl TableMeta for Table {
    fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    fn column_types(&self) -> Vec<SqlType> {
        self.columns.iter().map(|c| c.ty).collect()
    }
}

impl Table {
    pub fn create(name: &str, columns: &[(&str, SqlType)]) -> Result<Table, Error> {
        if columns.len() > MAX_COLUMNS {
            return Err(Error::TooManyColumns(name.to_string()));
        }
        let mut cols: Vec<Column> = Vec::with_capacity(columns.len());
        for (cname, ty) in columns {
            if cols.iter().any(|c| c.name == *cname) {
                return Err(Error::DuplicateColumn {
                    table: name.to_string(),
                    column: cname.to_string(),
                });
            }
            if ty.is_unknown() {
                return Err(Error::UnstorableType {
                    table: name.to_string(),
                    column: cname.to_string(),
                    ty: *ty,
                });
            }
            cols.push(Column {
                name: cname.to_string(),
                ty: *ty,
                data: Vector::new(ty.storage_size()),
            });
        }
        Ok(Table {
            name: name.to_string(),
            columns: cols,
            null_indicators: Vector::new(8),
            branch_bitmap: Vector::new(8),
            strings: StringHeap::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn row_count(&self) -> usize {
        self.branch_bitmap.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, column: &str) -> Result<usize, Error> {
        self.columns
            .iter()
            .position(|c| c.name == column)
            .ok_or_else(|| Error::ColumnNotFound {
                table: self.name.clone(),
                column: column.to_string(),
            })
    }

    pub fn column_type(&self, col: usize) -> Option<SqlType> {
        self.columns.get(col).map(|c| c.ty)
    }

    /// appends a row visible in master and returns its tid.
    pub fn add_row(&mut self, values: &[Datum]) -> Result<usize, Error> {
        self.add_row_in_branch(values, MASTER_BRANCH)
    }

    /// appends a row visible only in `branch` and returns its tid.
    pub fn add_row_in_branch(&mut self, values: &[Datum], branch: usize) -> Result<usize, Error> {
        if branch >= MAX_BRANCHES {
            return Err(Error::BadBranch(branch));
        }
        let row = typed_row::coerce_row(&self.column_types(), values)?;
        let mut nulls = 0u64;
        for (i, (col, value)) in self.columns.iter_mut().zip(&row.items).enumerate() {
            let slot = col.data.reserve_back();
            // Safety: reserve_back returned storage_size() writable bytes.
            let out = unsafe { std::slice::from_raw_parts_mut(slot.as_ptr(), col.ty.storage_size()) };
            match value {
                Datum::Null => {
                    datum::encode_null(col.ty, out);
                    nulls |= 1 << i;
                }
                v => datum::encode(v, col.ty, out, &mut self.strings)?,
            }
        }
        let mut word = [0u8; 8];
        NativeEndian::write_u64(&mut word, nulls);
        self.null_indicators.push_back(&word);
        NativeEndian::write_u64(&mut word, 1 << branch);
        self.branch_bitmap.push_back(&word);
        Ok(self.row_count() - 1)
    }

    fn check_tid(&self, tid: usize) -> Result<(), Error> {
        match tid < self.row_count() {
            true => Ok(()),
            false => Err(Error::TidOutOfRange {
                table: self.name.clone(),
                tid,
                rows: self.row_count(),
            }),
        }
    }

    fn branch_word(&self, tid: usize) -> u64 {
        NativeEndian::read_u64(self.branch_bitmap.at(tid))
    }

    fn set_branch_word(&mut self, tid: usize, word: u64) {
        NativeEndian::write_u64(self.branch_bitmap.at_mut(tid), word);
    }

    pub fn is_visible(&self, tid: usize, branch: usize) -> bool {
        tid < self.row_count() && branch < MAX_BRANCHES && self.branch_word(tid) & (1 << branch) != 0
    }

    /// hides row `tid` from `branch`. The row's storage stays.
    pub fn delete_row(&mut self, tid: usize, branch: usize) -> Result<(), Error> {
        self.check_tid(tid)?;
        if branch >= MAX_BRANCHES {
            return Err(Error::BadBranch(branch));
        }
        let word = self.branch_word(tid) & !(1 << branch);
        self.set_branch_word(tid, word);
        Ok(())
    }

    /// makes every row visible in `parent` visible in `branch` too.
    pub fn copy_visibility(&mut self, parent: usize, branch: usize) -> Result<(), Error> {
        if parent >= MAX_BRANCHES || branch >= MAX_BRANCHES {
            return Err(Error::BadBranch(parent.max(branch)));
        }
        for tid in 0..self.row_count() {
            let word = self.branch_word(tid);
            if word & (1 << parent) != 0 {
                self.set_branch_word(tid, word | (1 << branch));
            }
        }
        Ok(())
    }

    /// overwrites the value of column `col` in row `tid`.
    pub fn update_value(&mut self, tid: usize, col: usize, value: &Datum) -> Result<(), Error> {
        self.check_tid(tid)?;
        let ty = self.column_type(col).ok_or_else(|| Error::ColumnNotFound {
            table: self.name.clone(),
            column: format!("#{}", col),
        })?;
        let value = value.coerce(ty)?;
        let mut nulls = NativeEndian::read_u64(self.null_indicators.at(tid));
        let out = self.columns[col].data.at_mut(tid);
        match value {
            Datum::Null => {
                datum::encode_null(ty, out);
                nulls |= 1 << col;
            }
            v => {
                datum::encode(&v, ty, out, &mut self.strings)?;
                nulls &= !(1 << col);
            }
        }
        NativeEndian::write_u64(self.null_indicators.at_mut(tid), nulls);
        Ok(())
    }

    pub fn get_value(&self, tid: usize, col: usize) -> Result<Datum, Error> {
        self.check_tid(tid)?;
        let ty = self.column_type(col).ok_or_else(|| Error::ColumnNotFound {
            table: self.name.clone(),
            column: format!("#{}", col),
        })?;
        let nulls = NativeEndian::read_u64(self.null_indicators.at(tid));
        if nulls & (1 << col) != 0 {
            return Ok(Datum::Null);
        }
        // Safety: string handles in the column point into self.strings.
        Ok(unsafe { datum::decode(ty, self.columns[col].data.at(tid)) })
    }

    pub fn get_row(&self, tid: usize) -> Result<Row, Error> {
        let items = (0..self.columns.len())
            .map(|col| self.get_value(tid, col))
            .collect::<Result<Vec<Datum>, Error>>()?;
        Ok(Row::new(items))
    }

    /// base address of the elements of column `col`. Valid until the next row is added.
    pub fn column_ptr(&self, col: usize) -> Option<*const u8> {
        self.columns.get(col).map(|c| c.data.as_ptr())
    }

    /// base address of the null indicator words. Valid until the next row is added.
    pub fn null_indicators_ptr(&self) -> *const u8 {
        self.null_indicators.as_ptr()
    }

    /// base address of the branch bitmap words. Valid until the next row is added.
    pub fn branch_bitmap_ptr(&self) -> *const u8 {
        self.branch_bitmap.as_ptr()
    }

    /// iterates over the rows visible in `branch`, in tid order.
    pub fn streaming_iterator(&self, branch: usize) -> TableStreamingIterator<'_> {
        TableStreamingIterator {
            table: self,
            branch,
            next_tid: 0,
            item: None,
        }
    }
}

/// iterates over the visible rows of a `Table`, decoding each into a `Row`.
pub struct TableStreamingIterator<'t> {
    table: &'t Table,
    branch: usize,
    next_tid: usize,
    item: Option<Row>,
}

impl<'t> StreamingIterator for TableStreamingIterator<'t> {
    type Item = Row;

    #[inline]
    fn advance(&mut self) {
        self.item = None;
        while self.next_tid < self.table.row_count() {
            let tid = self.next_tid;
            self.next_tid += 1;
            if self.table.is_visible(tid, self.branch) {
                self.item = self.table.get_row(tid).ok();
                return;
            }
        }
    }

    #[inline]
    fn get(&self) -> Option<&Self::Item> {
        self.item.as_ref()
    }
}

#[cfg(test)]
fn people() -> Table {
    let mut t = Table::create(
        "people",
        &[
            ("id", SqlType::integer()),
            ("name", SqlType::varchar(10).as_nullable()),
            ("balance", SqlType::numeric(8, 2)),
        ],
    )
    .unwrap();
    t.add_row(&[Datum::Integer(1), Datum::Varchar("ann".to_string()), Datum::Integer(5)])
        .unwrap();
    t.add_row(&[Datum::Integer(2), Datum::Null, Datum::Numeric(125, 2)]).unwrap();
    t
}

#[test]
fn test_table_rows() {
    let t = people();
    assert_eq!(t.row_count(), 2);
    assert_eq!(t.column_names(), vec!["id", "name", "balance"]);
    assert_eq!(
        t.get_row(0).unwrap().items,
        vec![Datum::Integer(1), Datum::Varchar("ann".to_string()), Datum::Numeric(500, 2)]
    );
    assert_eq!(t.get_value(1, 1), Ok(Datum::Null));
    assert!(matches!(t.get_value(2, 0), Err(Error::TidOutOfRange { tid: 2, .. })));
    assert_eq!(t.column_index("balance"), Ok(2));
    assert!(t.column_index("nope").is_err());
}

#[test]
fn test_table_rejects_bad_rows() {
    let mut t = people();
    assert!(matches!(t.add_row(&[Datum::Null, Datum::Null, Datum::Integer(1)]), Err(Error::Row(_))));
    assert!(matches!(t.add_row(&[Datum::Integer(1)]), Err(Error::Row(_))));
    assert_eq!(t.row_count(), 2);
}

#[test]
fn test_delete_and_branch_visibility() {
    let mut t = people();
    t.copy_visibility(MASTER_BRANCH, 1).unwrap();
    t.delete_row(0, MASTER_BRANCH).unwrap();
    assert!(!t.is_visible(0, MASTER_BRANCH));
    assert!(t.is_visible(0, 1));
    let tid = t.add_row_in_branch(&[Datum::Integer(3), Datum::Null, Datum::Integer(0)], 1).unwrap();
    assert!(!t.is_visible(tid, MASTER_BRANCH));

    let mut it = t.streaming_iterator(MASTER_BRANCH);
    let mut ids = vec![];
    while let Some(row) = it.next() {
        ids.push(row.items[0].clone());
    }
    assert_eq!(ids, vec![Datum::Integer(2)]);
    assert_eq!(t.streaming_iterator(1).count(), 3);
}

#[test]
fn test_update_value() {
    let mut t = people();
    t.update_value(1, 1, &Datum::Varchar("bob".to_string())).unwrap();
    t.update_value(0, 1, &Datum::Null).unwrap();
    assert_eq!(t.get_value(1, 1), Ok(Datum::Varchar("bob".to_string())));
    assert_eq!(t.get_value(0, 1), Ok(Datum::Null));
    assert!(t.update_value(0, 0, &Datum::Null).is_err());
}
