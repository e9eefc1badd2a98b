//! executes compiled functions.
//!
//! A frame holds one 64-bit slot per SSA value plus the function's stack slots. When control enters a block,
//! all of its phis are evaluated together against the block that was left, and only then assigned, so phis that
//! read each other see the values from before the jump.

use super::externs;
use super::ir::{BinOp, BlockId, CastOp, Function, Inst, IntPredicate, IrType, OverflowOp, Terminator, ValueId};
use super::Module;
use crate::runtime::ExecContext;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("No function named {0} in the module.")]
    UnknownFunction(String),
    #[error("Function {name} takes {expected} arguments, {given} given.")]
    ArgumentCount {
        name: String,
        expected: usize,
        given: usize,
    },
    #[error("Null pointer dereferenced in {0}.")]
    NullPointer(String),
    #[error("Phi in {block} has no value for the edge from {from}.")]
    MissingPhiEdge { block: BlockId, from: BlockId },
    #[error("Runtime routine failed: {0}")]
    Runtime(#[from] crate::runtime::Error),
}

struct Frame {
    values: Vec<u64>,
    // Owns the stack slot memory; addresses of these boxes are in `values`.
    _slots: Vec<Box<[u64]>>,
}

/// runs the function `name` from `module` to completion and returns its result, if it has one.
pub fn run_function(module: &Module, name: &str, args: &[u64], ctx: &mut ExecContext) -> Result<Option<u64>, Error> {
    let func = module
        .function(name)
        .ok_or_else(|| Error::UnknownFunction(name.to_string()))?;
    if func.params.len() != args.len() {
        return Err(Error::ArgumentCount {
            name: name.to_string(),
            expected: func.params.len(),
            given: args.len(),
        });
    }
    let mut frame = Frame {
        values: vec![0; func.value_types.len()],
        _slots: vec![],
    };
    for slot in &func.stack_slots {
        let mem = vec![0u64; (slot.size + 7) / 8].into_boxed_slice();
        frame.values[slot.ptr.0 as usize] = mem.as_ptr() as u64;
        frame._slots.push(mem);
    }
    tracing::debug!(function = name, "running compiled function");

    let mut prev = BlockId(0);
    let mut cur = BlockId(0);
    loop {
        let block = &func.blocks[cur.0 as usize];
        let phi_count = block
            .instructions
            .iter()
            .take_while(|i| matches!(i.inst, Inst::Phi { .. }))
            .count();
        if phi_count > 0 {
            let mut incoming_values = Vec::with_capacity(phi_count);
            for ins in &block.instructions[..phi_count] {
                if let Inst::Phi { incoming, .. } = &ins.inst {
                    let (_, v) = incoming
                        .iter()
                        .find(|(b, _)| *b == prev)
                        .ok_or(Error::MissingPhiEdge { block: cur, from: prev })?;
                    incoming_values.push(frame.values[v.0 as usize]);
                }
            }
            for (ins, v) in block.instructions[..phi_count].iter().zip(incoming_values) {
                if let Some(r) = ins.result {
                    frame.values[r.0 as usize] = v;
                }
            }
        }
        for ins in &block.instructions[phi_count..] {
            let result = execute(func, &frame, &ins.inst, args, ctx)?;
            if let Some(r) = ins.result {
                frame.values[r.0 as usize] = func.value_type(r).normalize(result);
            }
        }
        let next = match &block.terminator {
            Some(Terminator::Br(b)) => *b,
            Some(Terminator::CondBr {
                cond,
                then_block,
                else_block,
            }) => match frame.values[cond.0 as usize] & 1 {
                1 => *then_block,
                _ => *else_block,
            },
            Some(Terminator::Ret(v)) => return Ok(v.map(|v| frame.values[v.0 as usize])),
            // `FunctionBuilder::finish` verifies that every block is terminated.
            None => return Ok(None),
        };
        prev = cur;
        cur = next;
    }
}

fn signed(ty: IrType, v: u64) -> i64 {
    ty.normalize(v) as i64
}

fn fits(ty: IrType, v: i128) -> bool {
    match ty {
        IrType::I1 => (0..=1).contains(&v),
        IrType::I8 => i8::try_from(v).is_ok(),
        IrType::I32 => i32::try_from(v).is_ok(),
        IrType::I64 | IrType::Ptr => i64::try_from(v).is_ok(),
    }
}

fn execute(func: &Function, frame: &Frame, inst: &Inst, args: &[u64], ctx: &mut ExecContext) -> Result<u64, Error> {
    let val = |v: &ValueId| frame.values[v.0 as usize];
    let ty_of = |v: &ValueId| func.value_type(*v);
    Ok(match inst {
        Inst::Const { bits, .. } => *bits,
        Inst::Param { index } => args[*index],
        Inst::Binary { op, lhs, rhs } => {
            let ty = ty_of(lhs);
            let (a, b) = (val(lhs), val(rhs));
            match op {
                BinOp::Add => a.wrapping_add(b),
                BinOp::Sub => a.wrapping_sub(b),
                BinOp::Mul => a.wrapping_mul(b),
                BinOp::SDiv => match signed(ty, b) {
                    0 => 0,
                    d => signed(ty, a).wrapping_div(d) as u64,
                },
                BinOp::SRem => match signed(ty, b) {
                    0 => 0,
                    d => signed(ty, a).wrapping_rem(d) as u64,
                },
                BinOp::And => a & b,
                BinOp::Or => a | b,
                BinOp::Xor => a ^ b,
                BinOp::Shl => a.wrapping_shl(b as u32),
                BinOp::LShr => ty.zero_extend(a).wrapping_shr(b as u32),
            }
        }
        Inst::Overflows { op, lhs, rhs } => {
            let ty = ty_of(lhs);
            let (a, b) = (signed(ty, val(lhs)) as i128, signed(ty, val(rhs)) as i128);
            let exact = match op {
                OverflowOp::Add => a + b,
                OverflowOp::Sub => a - b,
                OverflowOp::Mul => a * b,
            };
            !fits(ty, exact) as u64
        }
        Inst::Cmp { pred, lhs, rhs } => {
            let ty = ty_of(lhs);
            let (sa, sb) = (signed(ty, val(lhs)), signed(ty, val(rhs)));
            let (ua, ub) = (ty.zero_extend(val(lhs)), ty.zero_extend(val(rhs)));
            (match pred {
                IntPredicate::Eq => ua == ub,
                IntPredicate::Ne => ua != ub,
                IntPredicate::Slt => sa < sb,
                IntPredicate::Sle => sa <= sb,
                IntPredicate::Sgt => sa > sb,
                IntPredicate::Sge => sa >= sb,
                IntPredicate::Ult => ua < ub,
                IntPredicate::Ule => ua <= ub,
                IntPredicate::Ugt => ua > ub,
                IntPredicate::Uge => ua >= ub,
            }) as u64
        }
        Inst::Select {
            cond,
            then_value,
            else_value,
        } => match val(cond) & 1 {
            1 => val(then_value),
            _ => val(else_value),
        },
        Inst::Cast { op, value, .. } => {
            let from = ty_of(value);
            match op {
                CastOp::ZExt => from.zero_extend(val(value)),
                // Registers are kept sign-extended, so both of these are settled by normalizing the result.
                CastOp::SExt | CastOp::Trunc => val(value),
            }
        }
        Inst::Load { ty, ptr } => {
            let p = val(ptr) as *const u8;
            if p.is_null() {
                return Err(Error::NullPointer(func.name.clone()));
            }
            // Safety: generated code only loads from table storage, runtime allocations, stack slots and the
            // module's constant pool, all of which outlive the call.
            unsafe {
                match ty {
                    IrType::I1 | IrType::I8 => std::ptr::read_unaligned(p) as u64,
                    IrType::I32 => std::ptr::read_unaligned(p as *const u32) as u64,
                    IrType::I64 | IrType::Ptr => std::ptr::read_unaligned(p as *const u64),
                }
            }
        }
        Inst::Store { value, ptr } => {
            let p = val(ptr) as *mut u8;
            if p.is_null() {
                return Err(Error::NullPointer(func.name.clone()));
            }
            let v = val(value);
            // Safety: see `Inst::Load`.
            unsafe {
                match ty_of(value) {
                    IrType::I1 | IrType::I8 => std::ptr::write_unaligned(p, v as u8),
                    IrType::I32 => std::ptr::write_unaligned(p as *mut u32, v as u32),
                    IrType::I64 | IrType::Ptr => std::ptr::write_unaligned(p as *mut u64, v),
                }
            }
            0
        }
        Inst::PtrAdd { ptr, offset } => val(ptr).wrapping_add(val(offset)),
        Inst::Call { callee, args: call_args } => {
            let decl = externs::decl(*callee);
            let argv: Vec<u64> = call_args.iter().map(val).collect();
            let r = (decl.address)(ctx, &argv);
            if let Some(e) = ctx.take_error() {
                return Err(Error::Runtime(e));
            }
            r
        }
        // Phis are resolved on block entry.
        Inst::Phi { .. } => 0,
    })
}

#[cfg(test)]
fn run_in_empty_db(module: &Module, name: &str, args: &[u64]) -> Option<u64> {
    let mut db = crate::database::Database::new();
    let mut ctx = ExecContext::new(&mut db, module, &crate::config::Config::default());
    run_function(module, name, args, &mut ctx).unwrap()
}

#[test]
fn test_loop_sums_range() {
    use super::FunctionBuilder;
    let mut module = Module::new("t");
    let mut fb = FunctionBuilder::new(&mut module, "sum", &[IrType::I64], Some(IrType::I64));
    let n = fb.param(0).unwrap();
    let zero = fb.const_int(IrType::I64, 0);
    let out = fb
        .while_loop::<super::Error, _, _>(
            &[zero, zero],
            |fb, v| Ok(fb.icmp(IntPredicate::Slt, v[0], n)),
            |fb, v| {
                let one = fb.const_int(IrType::I64, 1);
                let i = fb.binary(BinOp::Add, v[0], one);
                let acc = fb.binary(BinOp::Add, v[1], v[0]);
                Ok(vec![i, acc])
            },
        )
        .unwrap();
    fb.ret(Some(out[1]));
    fb.finish().unwrap();
    assert_eq!(run_in_empty_db(&module, "sum", &[10]), Some(45));
    assert_eq!(run_in_empty_db(&module, "sum", &[0]), Some(0));
}

#[test]
fn test_if_then_else_merges_values() {
    use super::FunctionBuilder;
    let mut module = Module::new("t");
    let mut fb = FunctionBuilder::new(&mut module, "max", &[IrType::I32, IrType::I32], Some(IrType::I32));
    let a = fb.param(0).unwrap();
    let b = fb.param(1).unwrap();
    let c = fb.icmp(IntPredicate::Sgt, a, b);
    let merged = fb
        .if_then_else::<super::Error, _, _>(c, |_| Ok(vec![a]), |_| Ok(vec![b]))
        .unwrap();
    fb.ret(Some(merged[0]));
    fb.finish().unwrap();
    let minus_one = IrType::I32.normalize(-1i64 as u64);
    assert_eq!(run_in_empty_db(&module, "max", &[minus_one, 3]), Some(3));
    assert_eq!(run_in_empty_db(&module, "max", &[7, minus_one]), Some(7));
}

#[test]
fn test_overflow_detection() {
    struct Case {
        op: OverflowOp,
        ty: IrType,
        a: i64,
        b: i64,
        overflows: bool,
    }
    let cases = vec![
        Case { op: OverflowOp::Add, ty: IrType::I32, a: i32::MAX as i64, b: 1, overflows: true },
        Case { op: OverflowOp::Add, ty: IrType::I32, a: -5, b: 3, overflows: false },
        Case { op: OverflowOp::Sub, ty: IrType::I32, a: i32::MIN as i64, b: 1, overflows: true },
        Case { op: OverflowOp::Mul, ty: IrType::I64, a: i64::MAX / 2, b: 3, overflows: true },
        Case { op: OverflowOp::Mul, ty: IrType::I64, a: -4, b: 5, overflows: false },
    ];
    for case in cases {
        let mut module = Module::new("t");
        let mut fb = super::FunctionBuilder::new(&mut module, "f", &[], Some(IrType::I1));
        let a = fb.const_int(case.ty, case.a);
        let b = fb.const_int(case.ty, case.b);
        let o = fb.overflows(case.op, a, b);
        fb.ret(Some(o));
        fb.finish().unwrap();
        assert_eq!(run_in_empty_db(&module, "f", &[]), Some(case.overflows as u64), "{:?} {} {}", case.op, case.a, case.b);
    }
}

#[test]
fn test_emitted_hash_matches_host_hash() {
    let mut module = Module::new("t");
    let mut fb = super::FunctionBuilder::new(&mut module, "h", &[IrType::I64, IrType::I64], Some(IrType::I64));
    let a = fb.param(0).unwrap();
    let b = fb.param(1).unwrap();
    let ha = crate::hashing::emit_mix64(&mut fb, a);
    let hb = crate::hashing::emit_mix64(&mut fb, b);
    let h = crate::hashing::emit_combine(&mut fb, ha, hb);
    fb.ret(Some(h));
    fb.finish().unwrap();
    for (a, b) in [(0u64, 0u64), (1, 2), (u64::MAX, 12345)] {
        let expected = crate::hashing::combine(crate::hashing::mix64(a), crate::hashing::mix64(b));
        assert_eq!(run_in_empty_db(&module, "h", &[a, b]), Some(expected));
    }
}

#[test]
fn test_stack_slot_load_store() {
    let mut module = Module::new("t");
    let mut fb = super::FunctionBuilder::new(&mut module, "f", &[], Some(IrType::I32));
    let slot = fb.stack_slot(8);
    let v = fb.const_int(IrType::I32, -9);
    let p = fb.ptr_offset(slot, 4);
    fb.store(v, p);
    let loaded = fb.load(IrType::I32, p);
    fb.ret(Some(loaded));
    fb.finish().unwrap();
    assert_eq!(run_in_empty_db(&module, "f", &[]), Some(-9i64 as u64));
}
