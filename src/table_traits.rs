//! Traits for anything that describes a table's columns.

use crate::sql_type::SqlType;

pub trait TableMeta {
    fn column_names(&self) -> Vec<String>;
    fn column_types(&self) -> Vec<SqlType>;
}
