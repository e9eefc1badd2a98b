//! `codegen` is the code-emission service that physical operators compile queries with.
//!
//! A `Module` collects the functions of one query together with everything their code refers to by number or
//! address: constant bytes, tables, tuple layouts, and the runtime routines they call.  A `FunctionBuilder`
//! borrows the module while one function is being emitted and only adds the function to it in `finish`, so a
//! compilation that fails halfway leaves nothing behind that could be executed.
//!
//! Structured control flow is emitted with closures. `if_then_else` runs one closure per branch and merges the
//! values both branches hand back with phis; `while_loop` threads loop-carried values through phis at the top
//! of the loop.  When a closure returns, its blocks are closed whether it succeeded or not.

pub mod externs;
pub mod interpreter;
pub mod ir;

use std::collections::{BTreeSet, HashMap};

use itertools::Itertools;

use crate::datum::StringHeap;
use crate::sql_tuple::TupleLayout;
use crate::sql_type::SqlType;
use ir::{BinOp, Block, BlockId, CastOp, ExternId, Function, Inst, Instruction, IntPredicate, IrType, OverflowOp};
use ir::{StackSlot, Terminator, ValueId};

pub type LayoutId = usize;
pub type TableHandle = usize;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("Unknown runtime routine {0}.")]
    UnknownExtern(String),
    #[error("Bad call to {name}: {detail}.")]
    BadCall { name: String, detail: String },
    #[error("Branches merge different numbers of values: {0} and {1}.")]
    MergeCountMismatch(usize, usize),
    #[error("Merge slot {slot} is {first} on one path and {second} on another.")]
    MergeTypeMismatch { slot: usize, first: IrType, second: IrType },
    #[error("Function {0} already exists in the module.")]
    DuplicateFunction(String),
    #[error("Function has no parameter {0}.")]
    NoSuchParam(usize),
    #[error(transparent)]
    Ir(#[from] ir::Error),
}

/// container of compiled functions and the data their code refers to.
#[derive(Debug)]
pub struct Module {
    name: String,
    functions: Vec<Function>,
    declared: BTreeSet<ExternId>,
    constants: StringHeap,
    tables: Vec<String>,
    column_lists: Vec<Vec<usize>>,
    layouts: Vec<TupleLayout>,
    layout_ids: HashMap<String, LayoutId>,
}

impl Module {
    pub fn new(name: &str) -> Module {
        Module {
            name: name.to_string(),
            functions: vec![],
            declared: BTreeSet::new(),
            constants: StringHeap::new(),
            tables: vec![],
            column_lists: vec![],
            layouts: vec![],
            layout_ids: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    /// copies `bytes` into the module's constant pool and returns their address.
    pub fn intern_constant(&mut self, bytes: &[u8]) -> u64 {
        self.constants.intern(bytes)
    }

    /// the handle generated code passes to table routines for `table_name`.
    pub fn table_handle(&mut self, table_name: &str) -> TableHandle {
        match self.tables.iter().position(|t| t == table_name) {
            Some(h) => h,
            None => {
                self.tables.push(table_name.to_string());
                self.tables.len() - 1
            }
        }
    }

    pub fn table_name(&self, handle: TableHandle) -> Option<&str> {
        self.tables.get(handle).map(|s| s.as_str())
    }

    /// registers a list of column indexes (the targets of an update) and returns its id.
    pub fn column_list(&mut self, columns: &[usize]) -> usize {
        self.column_lists.push(columns.to_vec());
        self.column_lists.len() - 1
    }

    pub fn column_list_at(&self, id: usize) -> Option<&[usize]> {
        self.column_lists.get(id).map(|c| c.as_slice())
    }

    /// returns the id of the layout for a tuple of `types`, creating it the first time a tuple type with the same
    /// structural name is seen.
    pub fn tuple_layout(&mut self, types: &[SqlType]) -> LayoutId {
        let name = TupleLayout::type_name(types);
        if let Some(id) = self.layout_ids.get(&name) {
            return *id;
        }
        self.layouts.push(TupleLayout::new(types));
        let id = self.layouts.len() - 1;
        self.layout_ids.insert(name, id);
        id
    }

    pub fn layout(&self, id: LayoutId) -> Option<&TupleLayout> {
        self.layouts.get(id)
    }

    pub fn layout_count(&self) -> usize {
        self.layouts.len()
    }
}

impl std::fmt::Display for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "; module {}", self.name)?;
        for id in &self.declared {
            let decl = externs::decl(*id);
            let ret = decl.ret.map(|t| t.to_string()).unwrap_or_else(|| "void".to_string());
            writeln!(f, "declare {} @{}({})", ret, decl.name, decl.params.iter().join(", "))?;
        }
        for func in &self.functions {
            write!(f, "\n{}", func)?;
        }
        Ok(())
    }
}

/// emits one function into a `Module`.
pub struct FunctionBuilder<'m> {
    module: &'m mut Module,
    function: Function,
    current: BlockId,
}

impl<'m> FunctionBuilder<'m> {
    pub fn new(module: &'m mut Module, name: &str, params: &[IrType], ret: Option<IrType>) -> FunctionBuilder<'m> {
        FunctionBuilder {
            module,
            function: Function {
                name: name.to_string(),
                params: params.to_vec(),
                ret,
                blocks: vec![Block::default()],
                value_types: vec![],
                stack_slots: vec![],
            },
            current: BlockId(0),
        }
    }

    pub fn module(&mut self) -> &mut Module {
        &mut *self.module
    }

    /// terminates the last block with `ret void` if needed, verifies the function and adds it to the module.
    pub fn finish(mut self) -> Result<(), Error> {
        if self.function.ret.is_none() {
            self.terminate(Terminator::Ret(None));
        }
        self.function.verify()?;
        if self.module.function(&self.function.name).is_some() {
            return Err(Error::DuplicateFunction(self.function.name));
        }
        tracing::trace!(function = %self.function, "function emitted");
        self.module.functions.push(self.function);
        Ok(())
    }

    pub fn value_type(&self, v: ValueId) -> IrType {
        self.function.value_type(v)
    }

    pub fn current_block(&self) -> BlockId {
        self.current
    }

    fn new_value(&mut self, ty: IrType) -> ValueId {
        self.function.value_types.push(ty);
        ValueId(self.function.value_types.len() as u32 - 1)
    }

    fn new_block(&mut self) -> BlockId {
        self.function.blocks.push(Block::default());
        BlockId(self.function.blocks.len() as u32 - 1)
    }

    fn block_mut(&mut self, b: BlockId) -> &mut Block {
        &mut self.function.blocks[b.0 as usize]
    }

    fn push(&mut self, result: Option<ValueId>, inst: Inst) {
        let current = self.current;
        self.block_mut(current).instructions.push(Instruction { result, inst });
    }

    fn define(&mut self, ty: IrType, inst: Inst) -> ValueId {
        let v = self.new_value(ty);
        self.push(Some(v), inst);
        v
    }

    fn terminate(&mut self, t: Terminator) {
        let current = self.current;
        let block = self.block_mut(current);
        if block.terminator.is_none() {
            block.terminator = Some(t);
        }
    }

    pub fn param(&mut self, index: usize) -> Result<ValueId, Error> {
        let ty = *self.function.params.get(index).ok_or(Error::NoSuchParam(index))?;
        Ok(self.define(ty, Inst::Param { index }))
    }

    pub fn const_int(&mut self, ty: IrType, v: i64) -> ValueId {
        self.define(
            ty,
            Inst::Const {
                ty,
                bits: ty.normalize(v as u64),
            },
        )
    }

    pub fn const_bool(&mut self, b: bool) -> ValueId {
        self.const_int(IrType::I1, b as i64)
    }

    pub fn null_ptr(&mut self) -> ValueId {
        self.const_int(IrType::Ptr, 0)
    }

    /// places `bytes` in the module's constant pool; returns the address and the length as `I64`.
    pub fn const_bytes(&mut self, bytes: &[u8]) -> (ValueId, ValueId) {
        let addr = self.module.intern_constant(bytes);
        let ptr = self.const_int(IrType::Ptr, addr as i64);
        let len = self.const_int(IrType::I64, bytes.len() as i64);
        (ptr, len)
    }

    pub fn binary(&mut self, op: BinOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.value_type(lhs);
        self.define(ty, Inst::Binary { op, lhs, rhs })
    }

    pub fn overflows(&mut self, op: OverflowOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.define(IrType::I1, Inst::Overflows { op, lhs, rhs })
    }

    pub fn icmp(&mut self, pred: IntPredicate, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.define(IrType::I1, Inst::Cmp { pred, lhs, rhs })
    }

    /// logical negation of an `I1`.
    pub fn not(&mut self, v: ValueId) -> ValueId {
        let one = self.const_int(IrType::I1, 1);
        self.binary(BinOp::Xor, v, one)
    }

    pub fn select(&mut self, cond: ValueId, then_value: ValueId, else_value: ValueId) -> ValueId {
        let ty = self.value_type(then_value);
        self.define(
            ty,
            Inst::Select {
                cond,
                then_value,
                else_value,
            },
        )
    }

    pub fn cast(&mut self, op: CastOp, value: ValueId, to: IrType) -> ValueId {
        self.define(to, Inst::Cast { op, value, to })
    }

    /// widens or narrows `value` to `to`, sign-extending when `signed`.
    pub fn resize(&mut self, value: ValueId, to: IrType, signed: bool) -> ValueId {
        let from = self.value_type(value);
        match from.bits().cmp(&to.bits()) {
            std::cmp::Ordering::Equal => value,
            std::cmp::Ordering::Less if signed => self.cast(CastOp::SExt, value, to),
            std::cmp::Ordering::Less => self.cast(CastOp::ZExt, value, to),
            std::cmp::Ordering::Greater => self.cast(CastOp::Trunc, value, to),
        }
    }

    pub fn load(&mut self, ty: IrType, ptr: ValueId) -> ValueId {
        self.define(ty, Inst::Load { ty, ptr })
    }

    pub fn store(&mut self, value: ValueId, ptr: ValueId) {
        self.push(None, Inst::Store { value, ptr })
    }

    pub fn ptr_add(&mut self, ptr: ValueId, offset: ValueId) -> ValueId {
        self.define(IrType::Ptr, Inst::PtrAdd { ptr, offset })
    }

    pub fn ptr_offset(&mut self, ptr: ValueId, offset: usize) -> ValueId {
        if offset == 0 {
            return ptr;
        }
        let off = self.const_int(IrType::I64, offset as i64);
        self.ptr_add(ptr, off)
    }

    /// reserves `size` zeroed bytes in the function's frame and returns their address.
    pub fn stack_slot(&mut self, size: usize) -> ValueId {
        let ptr = self.new_value(IrType::Ptr);
        self.function.stack_slots.push(StackSlot { ptr, size });
        ptr
    }

    /// emits a call of the named runtime routine after checking the arguments against its declaration.
    pub fn call(&mut self, name: &str, args: &[ValueId]) -> Result<Option<ValueId>, Error> {
        let id = externs::lookup(name).ok_or_else(|| Error::UnknownExtern(name.to_string()))?;
        let decl = externs::decl(id);
        let bad_call = |detail: String| Error::BadCall {
            name: name.to_string(),
            detail,
        };
        if decl.params.len() != args.len() {
            return Err(bad_call(format!("expected {} arguments, got {}", decl.params.len(), args.len())));
        }
        for (i, (param, arg)) in decl.params.iter().zip(args).enumerate() {
            let ty = self.value_type(*arg);
            if ty != *param {
                return Err(bad_call(format!("argument {} is {}, expected {}", i, ty, param)));
            }
        }
        self.module.declared.insert(id);
        let inst = Inst::Call {
            callee: id,
            args: args.to_vec(),
        };
        Ok(match decl.ret {
            Some(ty) => Some(self.define(ty, inst)),
            None => {
                self.push(None, inst);
                None
            }
        })
    }

    /// like `call`, for routines that return a value.
    pub fn call_value(&mut self, name: &str, args: &[ValueId]) -> Result<ValueId, Error> {
        self.call(name, args)?.ok_or_else(|| Error::BadCall {
            name: name.to_string(),
            detail: "routine returns nothing".to_string(),
        })
    }

    pub fn ret(&mut self, value: Option<ValueId>) {
        self.terminate(Terminator::Ret(value))
    }

    /// runs `body` with `entry` as the current block, then branches from wherever it ended to `exit`.
    /// Returns what the body returned and the block it ended in.
    fn scoped<R, E, F>(&mut self, entry: BlockId, exit: BlockId, body: F) -> Result<(R, BlockId), E>
    where
        F: FnOnce(&mut Self) -> Result<R, E>,
    {
        self.current = entry;
        let result = body(self);
        let end = self.current;
        self.terminate(Terminator::Br(exit));
        match result {
            Ok(r) => Ok((r, end)),
            Err(e) => {
                self.current = exit;
                Err(e)
            }
        }
    }

    fn check_merge(&self, first: &[ValueId], second: &[ValueId]) -> Result<(), Error> {
        if first.len() != second.len() {
            return Err(Error::MergeCountMismatch(first.len(), second.len()));
        }
        for (slot, (a, b)) in first.iter().zip(second).enumerate() {
            let (ta, tb) = (self.value_type(*a), self.value_type(*b));
            if ta != tb {
                return Err(Error::MergeTypeMismatch {
                    slot,
                    first: ta,
                    second: tb,
                });
            }
        }
        Ok(())
    }

    /// emits a two-way branch on the `I1` value `cond`. Each branch returns the values it contributes to the
    /// merge; both must return the same number of values of the same types. The merged values are returned.
    pub fn if_then_else<E, T, F>(&mut self, cond: ValueId, then_fn: T, else_fn: F) -> Result<Vec<ValueId>, E>
    where
        E: From<Error>,
        T: FnOnce(&mut Self) -> Result<Vec<ValueId>, E>,
        F: FnOnce(&mut Self) -> Result<Vec<ValueId>, E>,
    {
        let then_block = self.new_block();
        let else_block = self.new_block();
        let merge_block = self.new_block();
        self.terminate(Terminator::CondBr {
            cond,
            then_block,
            else_block,
        });
        let (then_values, then_end) = self.scoped(then_block, merge_block, then_fn)?;
        let (else_values, else_end) = self.scoped(else_block, merge_block, else_fn)?;
        self.current = merge_block;
        self.check_merge(&then_values, &else_values)?;
        Ok(then_values
            .iter()
            .zip(&else_values)
            .map(|(t, e)| {
                let ty = self.value_type(*t);
                self.define(
                    ty,
                    Inst::Phi {
                        ty,
                        incoming: vec![(then_end, *t), (else_end, *e)],
                    },
                )
            })
            .collect())
    }

    /// emits code that runs only when `cond` is true.
    pub fn if_then<E, T>(&mut self, cond: ValueId, then_fn: T) -> Result<(), E>
    where
        E: From<Error>,
        T: FnOnce(&mut Self) -> Result<(), E>,
    {
        self.if_then_else::<E, _, _>(
            cond,
            |fb| {
                then_fn(fb)?;
                Ok(vec![])
            },
            |_| Ok(vec![]),
        )?;
        Ok(())
    }

    /// emits a loop. `init` seeds the loop-carried values; `cond_fn` sees their current values and decides
    /// whether to run the body once more; `body_fn` returns their values for the next iteration. Returns the
    /// loop-carried values as they are when the loop exits.
    pub fn while_loop<E, C, B>(&mut self, init: &[ValueId], cond_fn: C, body_fn: B) -> Result<Vec<ValueId>, E>
    where
        E: From<Error>,
        C: FnOnce(&mut Self, &[ValueId]) -> Result<ValueId, E>,
        B: FnOnce(&mut Self, &[ValueId]) -> Result<Vec<ValueId>, E>,
    {
        let header = self.new_block();
        let body = self.new_block();
        let exit = self.new_block();
        let preheader = self.current;
        self.terminate(Terminator::Br(header));
        self.current = header;
        let carried: Vec<ValueId> = init
            .iter()
            .map(|v| {
                let ty = self.value_type(*v);
                self.define(
                    ty,
                    Inst::Phi {
                        ty,
                        incoming: vec![(preheader, *v)],
                    },
                )
            })
            .collect();
        let cond = match cond_fn(self, &carried) {
            Ok(c) => c,
            Err(e) => {
                self.terminate(Terminator::Br(exit));
                self.current = exit;
                return Err(e);
            }
        };
        self.terminate(Terminator::CondBr {
            cond,
            then_block: body,
            else_block: exit,
        });
        let (next, latch) = self.scoped(body, header, |fb| body_fn(fb, &carried))?;
        self.current = exit;
        self.check_merge(&carried, &next)?;
        for (phi, v) in carried.iter().zip(&next) {
            self.add_phi_incoming(header, *phi, latch, *v);
        }
        Ok(carried)
    }

    fn add_phi_incoming(&mut self, block: BlockId, phi: ValueId, from: BlockId, value: ValueId) {
        for ins in self.block_mut(block).instructions.iter_mut() {
            if ins.result == Some(phi) {
                if let Inst::Phi { incoming, .. } = &mut ins.inst {
                    incoming.push((from, value));
                }
                return;
            }
        }
    }

    /// emits `for (i = start; i < end; i++) body(i)` over `I64` counters.
    pub fn for_range<E, B>(&mut self, start: ValueId, end: ValueId, body: B) -> Result<(), E>
    where
        E: From<Error>,
        B: FnOnce(&mut Self, ValueId) -> Result<(), E>,
    {
        self.while_loop::<E, _, _>(
            &[start],
            |fb, v| Ok(fb.icmp(IntPredicate::Slt, v[0], end)),
            |fb, v| {
                body(fb, v[0])?;
                let one = fb.const_int(IrType::I64, 1);
                Ok(vec![fb.binary(BinOp::Add, v[0], one)])
            },
        )?;
        Ok(())
    }
}

#[test]
fn test_if_then_else_rejects_mismatched_merge() {
    let mut module = Module::new("m");
    let mut fb = FunctionBuilder::new(&mut module, "f", &[], None);
    let cond = fb.const_bool(true);
    let r: Result<Vec<ValueId>, Error> = fb.if_then_else(
        cond,
        |fb| Ok(vec![fb.const_int(IrType::I32, 1)]),
        |fb| Ok(vec![fb.const_int(IrType::I64, 1)]),
    );
    assert!(matches!(r, Err(Error::MergeTypeMismatch { slot: 0, .. })));
    let r: Result<Vec<ValueId>, Error> = fb.if_then_else(cond, |fb| Ok(vec![fb.const_bool(false)]), |_| Ok(vec![]));
    assert_eq!(r, Err(Error::MergeCountMismatch(1, 0)));
}

#[test]
fn test_call_checks_declaration() {
    let mut module = Module::new("m");
    let mut fb = FunctionBuilder::new(&mut module, "f", &[], None);
    let x = fb.const_int(IrType::I32, 1);
    assert!(matches!(fb.call("no_such_routine", &[]), Err(Error::UnknownExtern(_))));
    assert!(matches!(fb.call("hash_bytes", &[x]), Err(Error::BadCall { .. })));
    assert!(fb.call("print_integer", &[x]).unwrap().is_none());
    fb.finish().unwrap();
    assert!(module.to_string().contains("declare void @print_integer(i32)"));
}

#[test]
fn test_unfinished_function_is_not_registered() {
    let mut module = Module::new("m");
    {
        let mut fb = FunctionBuilder::new(&mut module, "f", &[], None);
        let _ = fb.const_int(IrType::I32, 1);
    }
    assert!(module.function("f").is_none());
    FunctionBuilder::new(&mut module, "f", &[], None).finish().unwrap();
    assert!(matches!(
        FunctionBuilder::new(&mut module, "f", &[], None).finish(),
        Err(Error::DuplicateFunction(_))
    ));
}

#[test]
fn test_tuple_layouts_are_cached_by_type_name() {
    let mut module = Module::new("m");
    let a = module.tuple_layout(&[SqlType::integer(), SqlType::varchar(3)]);
    let b = module.tuple_layout(&[SqlType::integer(), SqlType::varchar(3)]);
    let c = module.tuple_layout(&[SqlType::integer().as_nullable()]);
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(module.layout_count(), 2);
}
