//! the routines compiled queries call, and the state they run against.
//!
//! Every routine has the same native signature, `fn(&mut ExecContext, &[u64]) -> u64`: arguments and result are
//! raw 64-bit words, pointers included. Objects that generated code holds on to (pools, hashtables, join lists)
//! are boxed and owned by the `ExecContext`; generated code only sees their addresses. Anything still alive when
//! the query ends is dropped with the context.
//!
//! A routine that fails records the error in the context and returns 0. The interpreter checks for a recorded
//! error after every call and stops the query.

use std::collections::HashMap;
use std::ptr::NonNull;

use enum_as_inner::EnumAsInner;

use crate::codegen::Module;
use crate::config::Config;
use crate::database::{self, Database};
use crate::datum::{self, Datum};
use crate::hashtable::{Hashtable, Node};
use crate::memory_pool::MemoryPool;
use crate::static_hashtable::{JoinList, StaticHashtable};
use crate::table;
use crate::typed_row::Row;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("No runtime object at address {0:#x}.")]
    UnknownObject(u64),
    #[error("Object at address {addr:#x} is not a {expected}.")]
    WrongObject { addr: u64, expected: &'static str },
    #[error("No table with handle {0}.")]
    UnknownTable(u64),
    #[error("No tuple layout {0}.")]
    UnknownLayout(u64),
    #[error("No column list {0}.")]
    UnknownColumnList(u64),
    #[error("Table {table} has no column {column}.")]
    UnknownColumn { table: String, column: u64 },
    #[error(transparent)]
    Database(#[from] database::Error),
    #[error(transparent)]
    Table(#[from] table::Error),
}

#[derive(EnumAsInner)]
enum RuntimeObject {
    Pool(Box<MemoryPool>),
    Hashtable(Box<Hashtable>),
    JoinList(Box<JoinList>),
    StaticHashtable(Box<StaticHashtable>),
    Buffer(Box<[u64]>),
}

/// What running a query produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutcome {
    /// everything the query printed.
    pub output: String,
    /// set when any arithmetic overflowed.
    pub overflow: bool,
    pub diagnostics: Vec<String>,
    /// result rows, when they were collected and no callback took them.
    pub rows: Vec<Row>,
}

/// state of one query execution.
pub struct ExecContext<'a> {
    db: &'a mut Database,
    module: &'a Module,
    outcome: QueryOutcome,
    echo: bool,
    callback: Option<&'a mut dyn FnMut(&Row)>,
    error: Option<Error>,
    objects: HashMap<u64, RuntimeObject>,
    pending_inserts: Vec<(String, Row)>,
    pool_block_size: usize,
    hashtable_initial_buckets: usize,
    branch: usize,
}

impl<'a> ExecContext<'a> {
    pub fn new(db: &'a mut Database, module: &'a Module, config: &Config) -> ExecContext<'a> {
        ExecContext {
            db,
            module,
            outcome: QueryOutcome::default(),
            echo: config.echo_output,
            callback: None,
            error: None,
            objects: HashMap::new(),
            pending_inserts: vec![],
            pool_block_size: config.pool_block_size,
            hashtable_initial_buckets: config.hashtable_initial_buckets,
            branch: config.branch,
        }
    }

    /// hands every result row to `callback` instead of collecting it.
    pub fn set_callback(&mut self, callback: &'a mut dyn FnMut(&Row)) {
        self.callback = Some(callback);
    }

    /// the first error a routine recorded, if any. Clears it.
    pub fn take_error(&mut self) -> Option<Error> {
        self.error.take()
    }

    pub fn output(&self) -> &str {
        &self.outcome.output
    }

    pub fn overflow(&self) -> bool {
        self.outcome.overflow
    }

    /// number of runtime objects that have not been freed.
    pub fn live_objects(&self) -> usize {
        self.objects.len()
    }

    /// applies the rows inserted while the query ran and returns what it produced.
    ///
    /// Inserted rows are appended only now, so a query never sees rows it inserted itself and the column
    /// addresses generated code read stay valid while it runs.
    pub fn finish(self) -> Result<QueryOutcome, Error> {
        for (table_name, row) in self.pending_inserts {
            self.db.table_mut(&table_name)?.add_row_in_branch(&row.items, self.branch)?;
        }
        if !self.objects.is_empty() {
            tracing::warn!(leaked = self.objects.len(), "runtime objects still alive at end of query");
        }
        Ok(self.outcome)
    }

    fn fail(&mut self, e: Error) -> u64 {
        tracing::debug!(error = %e, "runtime routine failed");
        if self.error.is_none() {
            self.error = Some(e);
        }
        0
    }

    fn write(&mut self, s: &str) {
        if self.echo {
            print!("{}", s);
        }
        self.outcome.output.push_str(s);
    }

    fn adopt(&mut self, addr: u64, object: RuntimeObject) -> u64 {
        self.objects.insert(addr, object);
        addr
    }

    fn object(&mut self, addr: u64) -> Result<&mut RuntimeObject, Error> {
        self.objects.get_mut(&addr).ok_or(Error::UnknownObject(addr))
    }

    fn hashtable(&mut self, addr: u64) -> Result<&mut Hashtable, Error> {
        self.object(addr)?
            .as_hashtable_mut()
            .map(|b| b.as_mut())
            .ok_or(Error::WrongObject {
                addr,
                expected: "hashtable",
            })
    }

    fn static_hashtable(&mut self, addr: u64) -> Result<&mut StaticHashtable, Error> {
        self.object(addr)?
            .as_static_hashtable_mut()
            .map(|b| b.as_mut())
            .ok_or(Error::WrongObject {
                addr,
                expected: "static hashtable",
            })
    }

    fn table_name(&self, handle: u64) -> Result<String, Error> {
        self.module
            .table_name(handle as usize)
            .map(|s| s.to_string())
            .ok_or(Error::UnknownTable(handle))
    }

    fn table(&self, handle: u64) -> Result<&table::Table, Error> {
        let name = self.table_name(handle)?;
        Ok(self.db.table(&name)?)
    }

    fn decode_tuple(&self, layout: u64, ptr: u64) -> Result<Row, Error> {
        let layout = self
            .module
            .layout(layout as usize)
            .ok_or(Error::UnknownLayout(layout))?;
        // Safety: generated code passes the address of a tuple it stored with this layout.
        Ok(unsafe { layout.decode(ptr as *const u8) })
    }
}

fn guarded<F>(ctx: &mut ExecContext, f: F) -> u64
where
    F: FnOnce(&mut ExecContext) -> Result<u64, Error>,
{
    match f(ctx) {
        Ok(v) => v,
        Err(e) => ctx.fail(e),
    }
}

fn node_addr(node: Option<NonNull<Node>>) -> u64 {
    node.map(|n| n.as_ptr() as u64).unwrap_or(0)
}

fn node_ptr(addr: u64) -> Option<NonNull<Node>> {
    NonNull::new(addr as *mut Node)
}

/// # Safety
///
/// `ptr` must point at `len` readable bytes unless `len` is 0.
unsafe fn bytes<'b>(ptr: u64, len: u64) -> &'b [u8] {
    match len {
        0 => &[],
        _ => std::slice::from_raw_parts(ptr as *const u8, len as usize),
    }
}

pub fn pool_create(ctx: &mut ExecContext, _args: &[u64]) -> u64 {
    let pool = Box::new(MemoryPool::with_block_size(ctx.pool_block_size));
    let addr = &*pool as *const MemoryPool as u64;
    ctx.adopt(addr, RuntimeObject::Pool(pool))
}

pub fn pool_malloc(ctx: &mut ExecContext, args: &[u64]) -> u64 {
    guarded(ctx, |ctx| {
        let addr = args[0];
        let pool = ctx.object(addr)?.as_pool_mut().ok_or(Error::WrongObject {
            addr,
            expected: "memory pool",
        })?;
        Ok(pool.malloc(args[1] as usize).as_ptr() as u64)
    })
}

pub fn pool_free(ctx: &mut ExecContext, args: &[u64]) -> u64 {
    guarded(ctx, |ctx| {
        ctx.objects.remove(&args[0]).ok_or(Error::UnknownObject(args[0]))?;
        Ok(0)
    })
}

pub fn ht_create(ctx: &mut ExecContext, _args: &[u64]) -> u64 {
    let ht = Box::new(Hashtable::with_buckets(ctx.hashtable_initial_buckets));
    let addr = &*ht as *const Hashtable as u64;
    ctx.adopt(addr, RuntimeObject::Hashtable(ht))
}

/// `(table, hash, size)`: returns the address of a fresh payload of `size` bytes.
pub fn ht_insert(ctx: &mut ExecContext, args: &[u64]) -> u64 {
    guarded(ctx, |ctx| {
        let ht = ctx.hashtable(args[0])?;
        Ok(ht.insert(args[1], args[2] as usize).as_ptr() as u64)
    })
}

/// `(table, hash)`: returns the first node with the hash, or 0.
pub fn ht_lookup(ctx: &mut ExecContext, args: &[u64]) -> u64 {
    guarded(ctx, |ctx| Ok(node_addr(ctx.hashtable(args[0])?.lookup(args[1]))))
}

/// `(table, node, hash)`
pub fn ht_next_same_hash(ctx: &mut ExecContext, args: &[u64]) -> u64 {
    guarded(ctx, |ctx| {
        let ht = ctx.hashtable(args[0])?;
        Ok(node_addr(node_ptr(args[1]).and_then(|n| ht.next_same_hash(n, args[2]))))
    })
}

pub fn ht_first(ctx: &mut ExecContext, args: &[u64]) -> u64 {
    guarded(ctx, |ctx| Ok(node_addr(ctx.hashtable(args[0])?.first())))
}

/// `(table, node)`
pub fn ht_next(ctx: &mut ExecContext, args: &[u64]) -> u64 {
    guarded(ctx, |ctx| {
        let ht = ctx.hashtable(args[0])?;
        Ok(node_addr(node_ptr(args[1]).and_then(|n| ht.next(n))))
    })
}

pub fn ht_free(ctx: &mut ExecContext, args: &[u64]) -> u64 {
    guarded(ctx, |ctx| {
        ctx.hashtable(args[0])?;
        if let Some(RuntimeObject::Hashtable(ht)) = ctx.objects.remove(&args[0]) {
            tracing::debug!(entries = ht.len(), rehashes = ht.rehash_count(), "freed hashtable");
        }
        Ok(0)
    })
}

pub fn join_list_create(ctx: &mut ExecContext, _args: &[u64]) -> u64 {
    let list = Box::new(JoinList::with_pool(MemoryPool::with_block_size(ctx.pool_block_size)));
    let addr = &*list as *const JoinList as u64;
    ctx.adopt(addr, RuntimeObject::JoinList(list))
}

/// `(list, hash, size)`: returns the address of a fresh payload of `size` bytes.
pub fn join_list_append(ctx: &mut ExecContext, args: &[u64]) -> u64 {
    guarded(ctx, |ctx| {
        let addr = args[0];
        let list = ctx.object(addr)?.as_join_list_mut().ok_or(Error::WrongObject {
            addr,
            expected: "join list",
        })?;
        Ok(list.append(args[1], args[2] as usize).as_ptr() as u64)
    })
}

/// `(list)`: consumes the list and returns the static hashtable built from it.
pub fn sht_build(ctx: &mut ExecContext, args: &[u64]) -> u64 {
    guarded(ctx, |ctx| {
        let addr = args[0];
        let list = match ctx.objects.remove(&addr) {
            Some(RuntimeObject::JoinList(list)) => list,
            Some(other) => {
                ctx.objects.insert(addr, other);
                return Err(Error::WrongObject {
                    addr,
                    expected: "join list",
                });
            }
            None => return Err(Error::UnknownObject(addr)),
        };
        let table = Box::new((*list).build());
        tracing::debug!(entries = table.len(), buckets = table.bucket_count(), "built join hashtable");
        let table_addr = &*table as *const StaticHashtable as u64;
        Ok(ctx.adopt(table_addr, RuntimeObject::StaticHashtable(table)))
    })
}

/// `(table, hash)`: returns the first node with the hash, or 0.
pub fn sht_lookup(ctx: &mut ExecContext, args: &[u64]) -> u64 {
    guarded(ctx, |ctx| Ok(node_addr(ctx.static_hashtable(args[0])?.lookup(args[1]))))
}

/// `(table, node, hash)`
pub fn sht_next_same_hash(ctx: &mut ExecContext, args: &[u64]) -> u64 {
    guarded(ctx, |ctx| {
        let t = ctx.static_hashtable(args[0])?;
        Ok(node_addr(node_ptr(args[1]).and_then(|n| t.next_same_hash(n, args[2]))))
    })
}

pub fn sht_free(ctx: &mut ExecContext, args: &[u64]) -> u64 {
    guarded(ctx, |ctx| {
        ctx.static_hashtable(args[0])?;
        ctx.objects.remove(&args[0]);
        Ok(0)
    })
}

/// replaces the first integer conversion (`%d`, `%i`, `%ld`, `%lu`, ...) in `fmt` with `v`, and `%%` with `%`.
fn format_one(fmt: &str, v: i64) -> String {
    let mut out = String::with_capacity(fmt.len() + 8);
    let mut chars = fmt.chars().peekable();
    let mut used = false;
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }
        while chars.peek() == Some(&'l') {
            chars.next();
        }
        match chars.next() {
            Some('d') | Some('i') if !used => {
                out.push_str(&v.to_string());
                used = true;
            }
            Some('u') if !used => {
                out.push_str(&(v as u64).to_string());
                used = true;
            }
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    out
}

/// `(format, format length, value)`: prints the format with one integer filled in; returns the bytes written.
pub fn printf(ctx: &mut ExecContext, args: &[u64]) -> u64 {
    // Safety: generated code passes a constant of the module and its length.
    let fmt = String::from_utf8_lossy(unsafe { bytes(args[0], args[1]) }).into_owned();
    let s = format_one(&fmt, args[2] as i64);
    ctx.write(&s);
    s.len() as u64
}

pub fn print_char(ctx: &mut ExecContext, args: &[u64]) -> u64 {
    ctx.write(&(args[0] as u8 as char).to_string());
    0
}

pub fn print_bool(ctx: &mut ExecContext, args: &[u64]) -> u64 {
    ctx.write(&Datum::Bool(args[0] & 0xff != 0).to_string());
    0
}

pub fn print_integer(ctx: &mut ExecContext, args: &[u64]) -> u64 {
    ctx.write(&(args[0] as i32).to_string());
    0
}

/// `(raw, precision)`
pub fn print_numeric(ctx: &mut ExecContext, args: &[u64]) -> u64 {
    ctx.write(&datum::format_numeric(args[0] as i64, args[1] as u8));
    0
}

/// `(ptr, len)`
pub fn print_string(ctx: &mut ExecContext, args: &[u64]) -> u64 {
    // Safety: string values always point at `len` live bytes.
    let s = String::from_utf8_lossy(unsafe { bytes(args[0], args[1]) }).into_owned();
    ctx.write(&s);
    0
}

pub fn print_date(ctx: &mut ExecContext, args: &[u64]) -> u64 {
    ctx.write(&datum::format_date(args[0] as i32));
    0
}

pub fn print_timestamp(ctx: &mut ExecContext, args: &[u64]) -> u64 {
    ctx.write(&datum::format_timestamp(args[0] as i64));
    0
}

pub fn print_null(ctx: &mut ExecContext, _args: &[u64]) -> u64 {
    ctx.write("NULL");
    0
}

/// `(a, b, n)`: negative, zero or positive as the first `n` bytes of `a` sort before, equal or after `b`'s.
pub fn memcmp(_ctx: &mut ExecContext, args: &[u64]) -> u64 {
    // Safety: both sides are string values at least `n` bytes long.
    let (a, b) = unsafe { (bytes(args[0], args[2]), bytes(args[1], args[2])) };
    match a.cmp(b) {
        std::cmp::Ordering::Less => -1i64 as u64,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    }
}

/// `(ptr, len)`
pub fn hash_bytes(_ctx: &mut ExecContext, args: &[u64]) -> u64 {
    // Safety: as in `print_string`.
    crate::hashing::hash_bytes(unsafe { bytes(args[0], args[1]) })
}

/// `(size)`: zeroed memory that lives until `free` or the end of the query.
pub fn malloc(ctx: &mut ExecContext, args: &[u64]) -> u64 {
    let words = ((args[0] as usize + 7) / 8).max(1);
    let buf = vec![0u64; words].into_boxed_slice();
    let addr = buf.as_ptr() as u64;
    ctx.adopt(addr, RuntimeObject::Buffer(buf))
}

pub fn free(ctx: &mut ExecContext, args: &[u64]) -> u64 {
    guarded(ctx, |ctx| {
        let addr = args[0];
        ctx.object(addr)?.as_buffer().ok_or(Error::WrongObject { addr, expected: "buffer" })?;
        ctx.objects.remove(&addr);
        Ok(0)
    })
}

/// `(message, length)`: records an arithmetic overflow. The query keeps running.
pub fn report_overflow(ctx: &mut ExecContext, args: &[u64]) -> u64 {
    // Safety: generated code passes a constant of the module and its length.
    let message = String::from_utf8_lossy(unsafe { bytes(args[0], args[1]) }).into_owned();
    tracing::warn!(%message, "arithmetic overflow");
    if ctx.echo {
        eprintln!("{}", message);
    }
    ctx.outcome.overflow = true;
    ctx.outcome.diagnostics.push(message);
    0
}

/// `(message, length)`: records a division by zero. The query keeps running.
pub fn report_division_by_zero(ctx: &mut ExecContext, args: &[u64]) -> u64 {
    // Safety: as in `report_overflow`.
    let message = String::from_utf8_lossy(unsafe { bytes(args[0], args[1]) }).into_owned();
    tracing::warn!(%message, "division by zero");
    if ctx.echo {
        eprintln!("{}", message);
    }
    ctx.outcome.diagnostics.push(message);
    0
}

/// `(layout, tuple)`: delivers one result row.
pub fn result_row(ctx: &mut ExecContext, args: &[u64]) -> u64 {
    guarded(ctx, |ctx| {
        let row = ctx.decode_tuple(args[0], args[1])?;
        match ctx.callback.as_mut() {
            Some(cb) => (*cb)(&row),
            None => ctx.outcome.rows.push(row),
        }
        Ok(0)
    })
}

/// `(table)`
pub fn table_row_count(ctx: &mut ExecContext, args: &[u64]) -> u64 {
    guarded(ctx, |ctx| Ok(ctx.table(args[0])?.row_count() as u64))
}

/// `(table, column)`: address of the column's first element.
pub fn table_column(ctx: &mut ExecContext, args: &[u64]) -> u64 {
    guarded(ctx, |ctx| {
        let t = ctx.table(args[0])?;
        t.column_ptr(args[1] as usize)
            .map(|p| p as u64)
            .ok_or_else(|| Error::UnknownColumn {
                table: t.name().to_string(),
                column: args[1],
            })
    })
}

/// `(table)`: address of the first row's null indicator word.
pub fn table_null_indicators(ctx: &mut ExecContext, args: &[u64]) -> u64 {
    guarded(ctx, |ctx| Ok(ctx.table(args[0])?.null_indicators_ptr() as u64))
}

/// `(table)`: address of the first row's branch bitmap word.
pub fn table_branch_bitmap(ctx: &mut ExecContext, args: &[u64]) -> u64 {
    guarded(ctx, |ctx| Ok(ctx.table(args[0])?.branch_bitmap_ptr() as u64))
}

/// `(table, layout, tuple)`: queues a row for insertion into the current branch when the query finishes.
pub fn table_insert(ctx: &mut ExecContext, args: &[u64]) -> u64 {
    guarded(ctx, |ctx| {
        let name = ctx.table_name(args[0])?;
        let row = ctx.decode_tuple(args[1], args[2])?;
        ctx.pending_inserts.push((name, row));
        Ok(0)
    })
}

/// `(table, column list, layout, tid, tuple)`: overwrites the listed columns of row `tid` with the tuple's values.
pub fn table_update(ctx: &mut ExecContext, args: &[u64]) -> u64 {
    guarded(ctx, |ctx| {
        let name = ctx.table_name(args[0])?;
        let columns = ctx
            .module
            .column_list_at(args[1] as usize)
            .ok_or(Error::UnknownColumnList(args[1]))?
            .to_vec();
        let row = ctx.decode_tuple(args[2], args[4])?;
        let table = ctx.db.table_mut(&name)?;
        for (col, value) in columns.iter().zip(&row.items) {
            table.update_value(args[3] as usize, *col, value)?;
        }
        Ok(0)
    })
}

/// `(table, tid)`: hides row `tid` from the current branch.
pub fn table_delete(ctx: &mut ExecContext, args: &[u64]) -> u64 {
    guarded(ctx, |ctx| {
        let name = ctx.table_name(args[0])?;
        let branch = ctx.branch;
        ctx.db.table_mut(&name)?.delete_row(args[1] as usize, branch)?;
        Ok(0)
    })
}

#[cfg(test)]
fn with_context<F: FnOnce(&mut ExecContext)>(f: F) {
    let mut db = Database::new();
    let module = Module::new("test");
    let mut ctx = ExecContext::new(&mut db, &module, &Config::default().hashtable_initial_buckets(2));
    f(&mut ctx);
}

#[test]
fn test_hashtable_routines() {
    with_context(|ctx| {
        let ht = ht_create(ctx, &[]);
        for k in 0..20u64 {
            let p = ht_insert(ctx, &[ht, k * 7, 8]);
            unsafe { (p as *mut u64).write(k) };
        }
        for k in 0..20u64 {
            let node = ht_lookup(ctx, &[ht, k * 7]);
            assert_ne!(node, 0);
            let payload = node + crate::hashtable::NODE_HEADER_SIZE as u64;
            assert_eq!(unsafe { (payload as *const u64).read() }, k);
            assert_eq!(ht_next_same_hash(ctx, &[ht, node, k * 7]), 0);
        }
        assert_eq!(ht_lookup(ctx, &[ht, 3]), 0);
        let mut seen = 0;
        let mut node = ht_first(ctx, &[ht]);
        while node != 0 {
            seen += 1;
            node = ht_next(ctx, &[ht, node]);
        }
        assert_eq!(seen, 20);
        ht_free(ctx, &[ht]);
        assert_eq!(ctx.live_objects(), 0);
        assert!(ctx.take_error().is_none());
    });
}

#[test]
fn test_join_list_routines() {
    with_context(|ctx| {
        let list = join_list_create(ctx, &[]);
        for k in [1u64, 2, 1] {
            join_list_append(ctx, &[list, k, 8]);
        }
        let t = sht_build(ctx, &[list]);
        let first = sht_lookup(ctx, &[t, 1]);
        assert_ne!(first, 0);
        assert_ne!(sht_next_same_hash(ctx, &[t, first, 1]), 0);
        assert_eq!(sht_lookup(ctx, &[t, 5]), 0);
        // The list is gone once built.
        assert_eq!(join_list_append(ctx, &[list, 1, 8]), 0);
        assert!(matches!(ctx.take_error(), Some(Error::UnknownObject(_))));
        sht_free(ctx, &[t]);
        assert_eq!(ctx.live_objects(), 0);
    });
}

#[test]
fn test_wrong_object_is_an_error() {
    with_context(|ctx| {
        let pool = pool_create(ctx, &[]);
        assert_eq!(ht_insert(ctx, &[pool, 1, 8]), 0);
        assert!(matches!(ctx.take_error(), Some(Error::WrongObject { expected: "hashtable", .. })));
        assert_ne!(pool_malloc(ctx, &[pool, 24]), 0);
        pool_free(ctx, &[pool]);
        assert!(ctx.take_error().is_none());
    });
}

#[test]
fn test_format_one() {
    struct Case {
        fmt: &'static str,
        v: i64,
        expected: &'static str,
    }
    let cases = vec![
        Case { fmt: "%lu tuples\n", v: 3, expected: "3 tuples\n" },
        Case { fmt: "n=%d, %d", v: -1, expected: "n=-1, %d" },
        Case { fmt: "100%%", v: 0, expected: "100%" },
        Case { fmt: "plain", v: 9, expected: "plain" },
    ];
    for case in cases {
        assert_eq!(format_one(case.fmt, case.v), case.expected);
    }
}

#[test]
fn test_print_and_report_routines() {
    with_context(|ctx| {
        print_integer(ctx, &[-5i64 as u64]);
        print_char(ctx, &[b'\t' as u64]);
        print_numeric(ctx, &[1250, 2]);
        print_char(ctx, &[b'\t' as u64]);
        print_null(ctx, &[]);
        assert_eq!(ctx.output(), "-5\t12.50\tNULL");
        let msg = b"overflow in add of i32";
        report_overflow(ctx, &[msg.as_ptr() as u64, msg.len() as u64]);
        assert!(ctx.overflow());
        let a = b"abc";
        let b = b"abd";
        assert_eq!(memcmp(ctx, &[a.as_ptr() as u64, b.as_ptr() as u64, 3]) as i64, -1);
        assert_eq!(memcmp(ctx, &[0, 0, 0]), 0);
    });
}
