//! the runtime routines generated code may call.
//!
//! Each declaration pairs the signature the code generator checks calls against with the address of the Rust
//! function that implements it. Calls are bound through that address, never by looking a symbol up.

use std::collections::HashMap;

use lazy_static::lazy_static;

use super::ir::{ExternId, IrType};
use crate::runtime::{self, ExecContext};

/// native calling convention of every runtime routine: arguments and result are raw 64-bit words.
pub type RuntimeFn = fn(&mut ExecContext, &[u64]) -> u64;

pub struct ExternDecl {
    pub name: &'static str,
    pub params: &'static [IrType],
    pub ret: Option<IrType>,
    pub address: RuntimeFn,
}

use IrType::{Ptr, I32, I64, I8};

macro_rules! decl {
    ($name:ident, [$($p:expr),*], $ret:expr) => {
        ExternDecl {
            name: stringify!($name),
            params: &[$($p),*],
            ret: $ret,
            address: runtime::$name,
        }
    };
}

lazy_static! {
    static ref EXTERNS: Vec<ExternDecl> = vec![
        decl!(pool_create, [], Some(Ptr)),
        decl!(pool_malloc, [Ptr, I64], Some(Ptr)),
        decl!(pool_free, [Ptr], None),
        decl!(ht_create, [], Some(Ptr)),
        decl!(ht_insert, [Ptr, I64, I64], Some(Ptr)),
        decl!(ht_lookup, [Ptr, I64], Some(Ptr)),
        decl!(ht_next_same_hash, [Ptr, Ptr, I64], Some(Ptr)),
        decl!(ht_first, [Ptr], Some(Ptr)),
        decl!(ht_next, [Ptr, Ptr], Some(Ptr)),
        decl!(ht_free, [Ptr], None),
        decl!(join_list_create, [], Some(Ptr)),
        decl!(join_list_append, [Ptr, I64, I64], Some(Ptr)),
        decl!(sht_build, [Ptr], Some(Ptr)),
        decl!(sht_lookup, [Ptr, I64], Some(Ptr)),
        decl!(sht_next_same_hash, [Ptr, Ptr, I64], Some(Ptr)),
        decl!(sht_free, [Ptr], None),
        decl!(printf, [Ptr, I64, I64], Some(I32)),
        decl!(print_char, [I8], None),
        decl!(print_bool, [I8], None),
        decl!(print_integer, [I32], None),
        decl!(print_numeric, [I64, I32], None),
        decl!(print_string, [Ptr, I64], None),
        decl!(print_date, [I32], None),
        decl!(print_timestamp, [I64], None),
        decl!(print_null, [], None),
        decl!(memcmp, [Ptr, Ptr, I64], Some(I32)),
        decl!(hash_bytes, [Ptr, I64], Some(I64)),
        decl!(malloc, [I64], Some(Ptr)),
        decl!(free, [Ptr], None),
        decl!(report_overflow, [Ptr, I64], None),
        decl!(report_division_by_zero, [Ptr, I64], None),
        decl!(result_row, [I64, Ptr], None),
        decl!(table_row_count, [I64], Some(I64)),
        decl!(table_column, [I64, I64], Some(Ptr)),
        decl!(table_null_indicators, [I64], Some(Ptr)),
        decl!(table_branch_bitmap, [I64], Some(Ptr)),
        decl!(table_insert, [I64, I64, Ptr], None),
        decl!(table_update, [I64, I64, I64, I64, Ptr], None),
        decl!(table_delete, [I64, I64], None),
    ];
    static ref BY_NAME: HashMap<&'static str, ExternId> = EXTERNS
        .iter()
        .enumerate()
        .map(|(i, d)| (d.name, ExternId(i as u32)))
        .collect();
}

pub fn lookup(name: &str) -> Option<ExternId> {
    BY_NAME.get(name).copied()
}

/// # Panics
///
/// Panics if `id` did not come from `lookup`.
pub fn decl(id: ExternId) -> &'static ExternDecl {
    &EXTERNS[id.0 as usize]
}

pub fn name_of(id: ExternId) -> &'static str {
    decl(id).name
}

#[test]
fn test_extern_names_are_unique() {
    assert_eq!(BY_NAME.len(), EXTERNS.len());
    let id = lookup("ht_insert").unwrap();
    assert_eq!(name_of(id), "ht_insert");
    assert_eq!(decl(id).params, &[Ptr, I64, I64]);
    assert!(lookup("system").is_none());
}
