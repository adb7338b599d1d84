//! Operation codes of the register VM.
//!
//! The numbering, addressing formats and argument modes follow the Lua 5.3
//! instruction set, so the emitted words can be executed by any VM that reads
//! that format. Each opcode occupies the low 6 bits of a 32-bit word.

use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Register VM operation codes.
///
/// Comments give the operation in the usual notation: `R(x)` is a register,
/// `Kst(x)` a constant, `RK(x)` register-or-constant, `UpValue[x]` an upvalue
/// of the running closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum OpCode {
    /// `R(A) := R(B)`
    Move = 0,
    /// `R(A) := Kst(Bx)`
    LoadK,
    /// `R(A) := Kst(extra arg)`
    LoadKx,
    /// `R(A) := (Bool)B; if (C) pc++`
    LoadBool,
    /// `R(A), R(A+1), ..., R(A+B) := nil`
    LoadNil,
    /// `R(A) := UpValue[B]`
    GetUpval,

    /// `R(A) := UpValue[B][RK(C)]`
    GetTabUp,
    /// `R(A) := R(B)[RK(C)]`
    GetTable,

    /// `UpValue[A][RK(B)] := RK(C)`
    SetTabUp,
    /// `UpValue[B] := R(A)`
    SetUpval,
    /// `R(A)[RK(B)] := RK(C)`
    SetTable,

    /// `R(A) := {}` (size = B,C)
    NewTable,

    /// `R(A+1) := R(B); R(A) := R(B)[RK(C)]`
    SelfOp,

    Add,
    Sub,
    Mul,
    Mod,
    Pow,
    Div,
    IDiv,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
    Unm,
    BNot,
    Not,
    Len,

    /// `R(A) := R(B).. ... ..R(C)`
    Concat,

    /// `pc += sBx; if (A) close all upvalues >= R(A - 1)`
    Jmp,
    /// `if ((RK(B) == RK(C)) ~= A) then pc++`
    Eq,
    /// `if ((RK(B) <  RK(C)) ~= A) then pc++`
    Lt,
    /// `if ((RK(B) <= RK(C)) ~= A) then pc++`
    Le,

    /// `if not (R(A) <=> C) then pc++`
    Test,
    /// `if (R(B) <=> C) then R(A) := R(B) else pc++`
    TestSet,

    /// `R(A), ... ,R(A+C-2) := R(A)(R(A+1), ... ,R(A+B-1))`
    Call,
    /// `return R(A)(R(A+1), ... ,R(A+B-1))`
    TailCall,
    /// `return R(A), ... ,R(A+B-2)`
    Return,

    /// `R(A)+=R(A+2); if R(A) <?= R(A+1) then { pc+=sBx; R(A+3)=R(A) }`
    ForLoop,
    /// `R(A)-=R(A+2); pc+=sBx`
    ForPrep,

    /// `R(A+3), ... ,R(A+2+C) := R(A)(R(A+1), R(A+2))`
    TForCall,
    /// `if R(A+1) ~= nil then { R(A)=R(A+1); pc += sBx }`
    TForLoop,

    /// `R(A)[(C-1)*FPF+i] := R(A+i), 1 <= i <= B`
    SetList,

    /// `R(A) := closure(KPROTO[Bx])`
    Closure,

    /// `R(A), R(A+1), ..., R(A+B-2) = vararg`
    VarArg,

    /// extra (larger) argument for previous opcode
    ExtraArg,
}

/// Number of opcodes in the instruction set.
pub const NUM_OPCODES: usize = OpCode::ExtraArg as usize + 1;

/// Addressing format of an instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpMode {
    /// 8-bit A, 9-bit B, 9-bit C.
    ABC,
    /// 8-bit A, 18-bit unsigned Bx.
    ABx,
    /// 8-bit A, 18-bit signed sBx.
    AsBx,
    /// 26-bit Ax.
    Ax,
}

/// How an operand field is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpArgMode {
    /// Argument is not used.
    N,
    /// Argument is used as a plain unsigned value.
    U,
    /// Argument is a register or a jump offset.
    R,
    /// Argument is a constant or register/constant.
    K,
}

bitflags! {
    /// Static properties of an opcode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpFlags: u8 {
        /// Instruction is a test; the next instruction must be a jump.
        const TEST = 1 << 0;
        /// Instruction writes register A.
        const SETS_A = 1 << 1;
    }
}

impl OpCode {
    /// Convert a raw opcode number.
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::try_from(value).ok()
    }

    /// Iterate over every opcode in numbering order.
    pub fn all() -> impl Iterator<Item = OpCode> {
        (0..NUM_OPCODES as u8).filter_map(OpCode::from_u8)
    }

    /// Addressing format of this opcode.
    pub fn mode(&self) -> OpMode {
        match self {
            OpCode::LoadK | OpCode::LoadKx | OpCode::Closure => OpMode::ABx,
            OpCode::Jmp | OpCode::ForLoop | OpCode::ForPrep | OpCode::TForLoop => OpMode::AsBx,
            OpCode::ExtraArg => OpMode::Ax,
            _ => OpMode::ABC,
        }
    }

    /// Interpretation of the B (or Bx/sBx) field.
    pub fn arg_b(&self) -> OpArgMode {
        use OpArgMode::*;
        match self {
            OpCode::Move => R,
            OpCode::LoadK => K,
            OpCode::LoadKx => N,
            OpCode::LoadBool | OpCode::LoadNil | OpCode::GetUpval | OpCode::GetTabUp => U,
            OpCode::GetTable => R,
            OpCode::SetTabUp => K,
            OpCode::SetUpval => U,
            OpCode::SetTable => K,
            OpCode::NewTable => U,
            OpCode::SelfOp => R,
            OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Mod
            | OpCode::Pow
            | OpCode::Div
            | OpCode::IDiv
            | OpCode::BAnd
            | OpCode::BOr
            | OpCode::BXor
            | OpCode::Shl
            | OpCode::Shr => K,
            OpCode::Unm | OpCode::BNot | OpCode::Not | OpCode::Len | OpCode::Concat => R,
            OpCode::Jmp => R,
            OpCode::Eq | OpCode::Lt | OpCode::Le => K,
            OpCode::Test => N,
            OpCode::TestSet => R,
            OpCode::Call | OpCode::TailCall | OpCode::Return => U,
            OpCode::ForLoop | OpCode::ForPrep => R,
            OpCode::TForCall => N,
            OpCode::TForLoop => R,
            OpCode::SetList | OpCode::Closure | OpCode::VarArg | OpCode::ExtraArg => U,
        }
    }

    /// Interpretation of the C field.
    pub fn arg_c(&self) -> OpArgMode {
        use OpArgMode::*;
        match self {
            OpCode::LoadBool | OpCode::NewTable => U,
            OpCode::GetTabUp | OpCode::GetTable | OpCode::SelfOp => K,
            OpCode::SetTabUp | OpCode::SetTable => K,
            OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Mod
            | OpCode::Pow
            | OpCode::Div
            | OpCode::IDiv
            | OpCode::BAnd
            | OpCode::BOr
            | OpCode::BXor
            | OpCode::Shl
            | OpCode::Shr => K,
            OpCode::Concat => R,
            OpCode::Eq | OpCode::Lt | OpCode::Le => K,
            OpCode::Test | OpCode::TestSet => U,
            OpCode::Call | OpCode::TailCall => U,
            OpCode::TForCall | OpCode::SetList | OpCode::ExtraArg => U,
            _ => N,
        }
    }

    pub fn flags(&self) -> OpFlags {
        match self {
            OpCode::Eq | OpCode::Lt | OpCode::Le | OpCode::Test => OpFlags::TEST,
            OpCode::TestSet => OpFlags::TEST | OpFlags::SETS_A,
            OpCode::SetTabUp
            | OpCode::SetUpval
            | OpCode::SetTable
            | OpCode::Jmp
            | OpCode::Return
            | OpCode::TForCall
            | OpCode::SetList
            | OpCode::ExtraArg => OpFlags::empty(),
            _ => OpFlags::SETS_A,
        }
    }

    /// Whether this is a jump whose sBx is a pc-relative offset.
    pub fn is_jump(&self) -> bool {
        self.mode() == OpMode::AsBx
    }

    /// Get the name of this opcode for debugging.
    pub fn name(&self) -> &'static str {
        match self {
            OpCode::Move => "MOVE",
            OpCode::LoadK => "LOADK",
            OpCode::LoadKx => "LOADKX",
            OpCode::LoadBool => "LOADBOOL",
            OpCode::LoadNil => "LOADNIL",
            OpCode::GetUpval => "GETUPVAL",
            OpCode::GetTabUp => "GETTABUP",
            OpCode::GetTable => "GETTABLE",
            OpCode::SetTabUp => "SETTABUP",
            OpCode::SetUpval => "SETUPVAL",
            OpCode::SetTable => "SETTABLE",
            OpCode::NewTable => "NEWTABLE",
            OpCode::SelfOp => "SELF",
            OpCode::Add => "ADD",
            OpCode::Sub => "SUB",
            OpCode::Mul => "MUL",
            OpCode::Mod => "MOD",
            OpCode::Pow => "POW",
            OpCode::Div => "DIV",
            OpCode::IDiv => "IDIV",
            OpCode::BAnd => "BAND",
            OpCode::BOr => "BOR",
            OpCode::BXor => "BXOR",
            OpCode::Shl => "SHL",
            OpCode::Shr => "SHR",
            OpCode::Unm => "UNM",
            OpCode::BNot => "BNOT",
            OpCode::Not => "NOT",
            OpCode::Len => "LEN",
            OpCode::Concat => "CONCAT",
            OpCode::Jmp => "JMP",
            OpCode::Eq => "EQ",
            OpCode::Lt => "LT",
            OpCode::Le => "LE",
            OpCode::Test => "TEST",
            OpCode::TestSet => "TESTSET",
            OpCode::Call => "CALL",
            OpCode::TailCall => "TAILCALL",
            OpCode::Return => "RETURN",
            OpCode::ForLoop => "FORLOOP",
            OpCode::ForPrep => "FORPREP",
            OpCode::TForCall => "TFORCALL",
            OpCode::TForLoop => "TFORLOOP",
            OpCode::SetList => "SETLIST",
            OpCode::Closure => "CLOSURE",
            OpCode::VarArg => "VARARG",
            OpCode::ExtraArg => "EXTRAARG",
        }
    }
}
