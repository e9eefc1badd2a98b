//! `ir` defines the instruction set that queries are compiled into.
//!
//! Functions are in SSA form: every instruction that yields a value defines a fresh `ValueId`, and values that
//! differ depending on the path taken through the control flow are merged with `Phi` instructions at the top of
//! the block where the paths meet.
//!
//! Registers hold 64-bit words. Integers are kept sign-extended from their width (`I1` is 0 or 1), pointers are
//! plain addresses. Memory accesses are byte addressed and need no alignment.
//!
//! A small query that counts rows compiles to something like:
//! ```text
//! define void @query() {
//! bb0:
//!   %0 = const i64 0
//!   %1 = call @table_row_count(i64 %0)
//!   br bb1
//! bb1:
//!   %2 = phi i64 [bb0: %0] [bb2: %4]
//!   %3 = icmp slt %2, %1
//!   condbr %3, bb2, bb3
//!   ...
//! ```

use itertools::Itertools;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IrType {
    I1,
    I8,
    I32,
    I64,
    Ptr,
}

impl IrType {
    pub fn bits(&self) -> u32 {
        match self {
            IrType::I1 => 1,
            IrType::I8 => 8,
            IrType::I32 => 32,
            IrType::I64 | IrType::Ptr => 64,
        }
    }

    /// bytes occupied in memory by a load or store of this type.
    pub fn store_size(&self) -> usize {
        match self {
            IrType::I1 | IrType::I8 => 1,
            IrType::I32 => 4,
            IrType::I64 | IrType::Ptr => 8,
        }
    }

    /// brings a raw 64-bit word into the canonical register form for this type.
    pub fn normalize(&self, v: u64) -> u64 {
        match self {
            IrType::I1 => v & 1,
            IrType::I8 => v as i8 as i64 as u64,
            IrType::I32 => v as i32 as i64 as u64,
            IrType::I64 | IrType::Ptr => v,
        }
    }

    /// the value with bits above the width cleared, for unsigned operations.
    pub fn zero_extend(&self, v: u64) -> u64 {
        match self.bits() {
            64 => v,
            n => v & ((1u64 << n) - 1),
        }
    }
}

impl std::fmt::Display for IrType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IrType::I1 => "i1",
            IrType::I8 => "i8",
            IrType::I32 => "i32",
            IrType::I64 => "i64",
            IrType::Ptr => "ptr",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

/// index into the table of runtime routines in `codegen::externs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExternId(pub u32);

impl std::fmt::Display for ValueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{}", self.0)
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// Wrapping integer arithmetic. Division is signed; division by zero yields zero, so callers that care check
/// the divisor first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    SDiv,
    SRem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
}

/// The overflow half of the "arithmetic with overflow" intrinsics: yields `I1` true when the signed operation
/// would not fit the operands' width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowOp {
    Add,
    Sub,
    Mul,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntPredicate {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
    Ult,
    Ule,
    Ugt,
    Uge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastOp {
    ZExt,
    SExt,
    Trunc,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inst {
    Const { ty: IrType, bits: u64 },
    Param { index: usize },
    Binary { op: BinOp, lhs: ValueId, rhs: ValueId },
    Overflows { op: OverflowOp, lhs: ValueId, rhs: ValueId },
    Cmp { pred: IntPredicate, lhs: ValueId, rhs: ValueId },
    Select { cond: ValueId, then_value: ValueId, else_value: ValueId },
    Cast { op: CastOp, value: ValueId, to: IrType },
    Load { ty: IrType, ptr: ValueId },
    Store { value: ValueId, ptr: ValueId },
    /// pointer plus a byte offset (`I64`).
    PtrAdd { ptr: ValueId, offset: ValueId },
    Call { callee: ExternId, args: Vec<ValueId> },
    Phi { ty: IrType, incoming: Vec<(BlockId, ValueId)> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    Br(BlockId),
    CondBr { cond: ValueId, then_block: BlockId, else_block: BlockId },
    Ret(Option<ValueId>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub result: Option<ValueId>,
    pub inst: Inst,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub instructions: Vec<Instruction>,
    pub terminator: Option<Terminator>,
}

/// A stack slot: `size` zeroed bytes owned by the function's frame, addressed by `ptr`.
#[derive(Debug, Clone, PartialEq)]
pub struct StackSlot {
    pub ptr: ValueId,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<IrType>,
    pub ret: Option<IrType>,
    pub blocks: Vec<Block>,
    /// type of every value, indexed by `ValueId`.
    pub value_types: Vec<IrType>,
    /// stack slots are allocated once when the function is entered, wherever they were requested.
    pub stack_slots: Vec<StackSlot>,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("Block {block} of function {function} has no terminator.")]
    Unterminated { function: String, block: BlockId },
    #[error("Malformed instruction in {function}, {block}: {detail}.")]
    Malformed {
        function: String,
        block: BlockId,
        detail: String,
    },
}

impl Function {
    pub fn value_type(&self, v: ValueId) -> IrType {
        self.value_types[v.0 as usize]
    }

    /// checks the structural rules the interpreter relies on: every block is terminated, phis only appear at
    /// the top of a block, and operands of arithmetic, comparisons and phis agree in type.
    pub fn verify(&self) -> Result<(), Error> {
        for (i, block) in self.blocks.iter().enumerate() {
            let id = BlockId(i as u32);
            let malformed = |detail: String| Error::Malformed {
                function: self.name.clone(),
                block: id,
                detail,
            };
            if block.terminator.is_none() {
                return Err(Error::Unterminated {
                    function: self.name.clone(),
                    block: id,
                });
            }
            let mut seen_non_phi = false;
            for ins in &block.instructions {
                match &ins.inst {
                    Inst::Phi { ty, incoming } => {
                        if seen_non_phi {
                            return Err(malformed(format!("phi {:?} after a non-phi instruction", ins.result)));
                        }
                        if let Some((_, v)) = incoming.iter().find(|(_, v)| self.value_type(*v) != *ty) {
                            return Err(malformed(format!("phi incoming {} is not {}", v, ty)));
                        }
                    }
                    Inst::Binary { lhs, rhs, .. } | Inst::Overflows { lhs, rhs, .. } | Inst::Cmp { lhs, rhs, .. } => {
                        seen_non_phi = true;
                        if self.value_type(*lhs) != self.value_type(*rhs) {
                            return Err(malformed(format!(
                                "operands {} ({}) and {} ({}) differ in type",
                                lhs,
                                self.value_type(*lhs),
                                rhs,
                                self.value_type(*rhs)
                            )));
                        }
                    }
                    Inst::Select {
                        then_value, else_value, ..
                    } => {
                        seen_non_phi = true;
                        if self.value_type(*then_value) != self.value_type(*else_value) {
                            return Err(malformed(format!("select arms {} and {} differ in type", then_value, else_value)));
                        }
                    }
                    _ => seen_non_phi = true,
                }
            }
        }
        Ok(())
    }
}

fn fmt_inst(f: &mut std::fmt::Formatter<'_>, func: &Function, inst: &Inst) -> std::fmt::Result {
    match inst {
        Inst::Const { ty, bits } => write!(f, "const {} {}", ty, *bits as i64),
        Inst::Param { index } => write!(f, "param {}", index),
        Inst::Binary { op, lhs, rhs } => {
            write!(f, "{} {} {}, {}", format!("{:?}", op).to_lowercase(), func.value_type(*lhs), lhs, rhs)
        }
        Inst::Overflows { op, lhs, rhs } => {
            write!(f, "overflows.{} {}, {}", format!("{:?}", op).to_lowercase(), lhs, rhs)
        }
        Inst::Cmp { pred, lhs, rhs } => write!(f, "icmp {} {}, {}", format!("{:?}", pred).to_lowercase(), lhs, rhs),
        Inst::Select {
            cond,
            then_value,
            else_value,
        } => write!(f, "select {}, {}, {}", cond, then_value, else_value),
        Inst::Cast { op, value, to } => write!(f, "{} {} to {}", format!("{:?}", op).to_lowercase(), value, to),
        Inst::Load { ty, ptr } => write!(f, "load {}, {}", ty, ptr),
        Inst::Store { value, ptr } => write!(f, "store {}, {}", value, ptr),
        Inst::PtrAdd { ptr, offset } => write!(f, "ptradd {}, {}", ptr, offset),
        Inst::Call { callee, args } => write!(
            f,
            "call @{}({})",
            super::externs::name_of(*callee),
            args.iter().map(|a| format!("{} {}", func.value_type(*a), a)).join(", ")
        ),
        Inst::Phi { ty, incoming } => write!(
            f,
            "phi {} {}",
            ty,
            incoming.iter().map(|(b, v)| format!("[{}: {}]", b, v)).join(" ")
        ),
    }
}

impl std::fmt::Display for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ret = self.ret.map(|t| t.to_string()).unwrap_or_else(|| "void".to_string());
        writeln!(f, "define {} @{}({}) {{", ret, self.name, self.params.iter().join(", "))?;
        for slot in &self.stack_slots {
            writeln!(f, "  {} = alloca {}", slot.ptr, slot.size)?;
        }
        for (i, block) in self.blocks.iter().enumerate() {
            writeln!(f, "{}:", BlockId(i as u32))?;
            for ins in &block.instructions {
                write!(f, "  ")?;
                if let Some(r) = ins.result {
                    write!(f, "{} = ", r)?;
                }
                fmt_inst(f, self, &ins.inst)?;
                writeln!(f)?;
            }
            match &block.terminator {
                Some(Terminator::Br(b)) => writeln!(f, "  br {}", b)?,
                Some(Terminator::CondBr {
                    cond,
                    then_block,
                    else_block,
                }) => writeln!(f, "  condbr {}, {}, {}", cond, then_block, else_block)?,
                Some(Terminator::Ret(Some(v))) => writeln!(f, "  ret {}", v)?,
                Some(Terminator::Ret(None)) => writeln!(f, "  ret void")?,
                None => writeln!(f, "  <unterminated>")?,
            }
        }
        writeln!(f, "}}")
    }
}

#[test]
fn test_normalize() {
    struct Case {
        ty: IrType,
        input: u64,
        expected: u64,
    }
    let cases = vec![
        Case { ty: IrType::I1, input: 3, expected: 1 },
        Case { ty: IrType::I8, input: 0xff, expected: u64::MAX },
        Case { ty: IrType::I32, input: 0x8000_0000, expected: i32::MIN as i64 as u64 },
        Case { ty: IrType::I32, input: 0x1_0000_0005, expected: 5 },
        Case { ty: IrType::I64, input: 42, expected: 42 },
    ];
    for case in cases {
        assert_eq!(case.ty.normalize(case.input), case.expected, "{:?}", case.ty);
    }
    assert_eq!(IrType::I32.zero_extend(u64::MAX), 0xffff_ffff);
}

#[test]
fn test_verify_rejects_unterminated_block() {
    let f = Function {
        name: "f".to_string(),
        params: vec![],
        ret: None,
        blocks: vec![Block::default()],
        value_types: vec![],
        stack_slots: vec![],
    };
    assert_eq!(
        f.verify(),
        Err(Error::Unterminated {
            function: "f".to_string(),
            block: BlockId(0)
        })
    );
}
