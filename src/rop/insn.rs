use super::RegisterSpec;
use crate::jvm::{ClassId, Constant, OrdComparison};
use std::fmt;

/// Operation performed by a register instruction
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum RopOpcode {
    Nop,
    Move,
    MoveParam,
    MoveException,
    MoveResult,
    MoveResultPseudo,
    Const,
    Goto,

    /// Compare against zero/null (one source) or against another register (two sources)
    If(OrdComparison),
    Switch,

    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Neg,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Ushr,

    /// Compare, with NaN (or `long` comparison) giving -1
    Cmpl,

    /// Compare, with NaN giving 1
    Cmpg,
    Conv,
    ToByte,
    ToChar,
    ToShort,

    Return,
    ArrayLength,
    Throw,
    MonitorEnter,
    MonitorExit,
    Aget,
    Aput,
    NewInstance,
    NewArray,
    FilledNewArray,
    CheckCast,
    InstanceOf,
    GetField,
    GetStatic,
    PutField,
    PutStatic,
    InvokeStatic,
    InvokeVirtual,
    InvokeSuper,
    InvokeDirect,
    InvokeInterface,
    InvokePolymorphic,
    InvokeCustom,
    FillArrayData,
}

impl RopOpcode {
    /// Does the instruction end its block with an explicit transfer of control?
    pub fn is_branch(&self) -> bool {
        matches!(
            self,
            RopOpcode::Goto
                | RopOpcode::If(_)
                | RopOpcode::Switch
                | RopOpcode::Return
                | RopOpcode::Throw
        )
    }

    /// Are results delivered by a following `move-result`?
    pub fn is_call_like(&self) -> bool {
        matches!(
            self,
            RopOpcode::InvokeStatic
                | RopOpcode::InvokeVirtual
                | RopOpcode::InvokeSuper
                | RopOpcode::InvokeDirect
                | RopOpcode::InvokeInterface
                | RopOpcode::InvokePolymorphic
                | RopOpcode::InvokeCustom
                | RopOpcode::FilledNewArray
        )
    }
}

/// Exception type a catch edge handles
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CatchType<'g> {
    /// Catch-all (`finally` blocks, synchronized method unlocking)
    Any,
    Class(ClassId<'g>),
}

impl<'g> fmt::Debug for CatchType<'g> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatchType::Any => f.write_str("<any>"),
            CatchType::Class(class) => class.fmt(f),
        }
    }
}

/// Bytecode offset an instruction came from (synthesized instructions have none)
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct SourcePosition(pub Option<usize>);

impl SourcePosition {
    pub const NONE: SourcePosition = SourcePosition(None);

    pub fn at(offset: usize) -> SourcePosition {
        SourcePosition(Some(offset))
    }
}

impl fmt::Debug for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(offset) => write!(f, "@{:04x}", offset),
            None => f.write_str("@????"),
        }
    }
}

/// Register-based instruction
///
/// Throwing variants never have a result register: whatever they produce is picked up by a
/// `move-result-pseudo` (or `move-result`, for calls) at the start of the next block. Their catch
/// list lines up with the first successors of the block they end.
#[derive(Clone, PartialEq)]
pub enum RopInsn<'g> {
    Plain {
        opcode: RopOpcode,
        position: SourcePosition,
        result: Option<RegisterSpec<'g>>,
        sources: Vec<RegisterSpec<'g>>,
    },
    PlainCst {
        opcode: RopOpcode,
        position: SourcePosition,
        result: Option<RegisterSpec<'g>>,
        sources: Vec<RegisterSpec<'g>>,
        constant: Constant<'g>,
    },
    Throwing {
        opcode: RopOpcode,
        position: SourcePosition,
        sources: Vec<RegisterSpec<'g>>,
        catches: Vec<CatchType<'g>>,
    },
    ThrowingCst {
        opcode: RopOpcode,
        position: SourcePosition,
        sources: Vec<RegisterSpec<'g>>,
        catches: Vec<CatchType<'g>>,
        constant: Constant<'g>,
    },

    /// Successors are the case targets in order, then the default
    Switch {
        position: SourcePosition,
        source: RegisterSpec<'g>,
        cases: Vec<i32>,
    },

    /// Method calls and `filled-new-array`
    Call {
        opcode: RopOpcode,
        position: SourcePosition,
        sources: Vec<RegisterSpec<'g>>,
        catches: Vec<CatchType<'g>>,
        constant: Constant<'g>,
    },

    /// Store constant elements into a freshly allocated array
    FillArrayData {
        position: SourcePosition,
        array: RegisterSpec<'g>,
        values: Vec<Constant<'g>>,
    },
}

impl<'g> RopInsn<'g> {
    pub fn opcode(&self) -> RopOpcode {
        match self {
            RopInsn::Plain { opcode, .. }
            | RopInsn::PlainCst { opcode, .. }
            | RopInsn::Throwing { opcode, .. }
            | RopInsn::ThrowingCst { opcode, .. }
            | RopInsn::Call { opcode, .. } => *opcode,
            RopInsn::Switch { .. } => RopOpcode::Switch,
            RopInsn::FillArrayData { .. } => RopOpcode::FillArrayData,
        }
    }

    pub fn position(&self) -> SourcePosition {
        match self {
            RopInsn::Plain { position, .. }
            | RopInsn::PlainCst { position, .. }
            | RopInsn::Throwing { position, .. }
            | RopInsn::ThrowingCst { position, .. }
            | RopInsn::Switch { position, .. }
            | RopInsn::Call { position, .. }
            | RopInsn::FillArrayData { position, .. } => *position,
        }
    }

    pub fn result(&self) -> Option<&RegisterSpec<'g>> {
        match self {
            RopInsn::Plain { result, .. } | RopInsn::PlainCst { result, .. } => result.as_ref(),
            _ => None,
        }
    }

    pub fn sources(&self) -> &[RegisterSpec<'g>] {
        match self {
            RopInsn::Plain { sources, .. }
            | RopInsn::PlainCst { sources, .. }
            | RopInsn::Throwing { sources, .. }
            | RopInsn::ThrowingCst { sources, .. }
            | RopInsn::Call { sources, .. } => sources,
            RopInsn::Switch { source, .. } => std::slice::from_ref(source),
            RopInsn::FillArrayData { array, .. } => std::slice::from_ref(array),
        }
    }

    pub fn constant(&self) -> Option<&Constant<'g>> {
        match self {
            RopInsn::PlainCst { constant, .. }
            | RopInsn::ThrowingCst { constant, .. }
            | RopInsn::Call { constant, .. } => Some(constant),
            _ => None,
        }
    }

    pub fn catches(&self) -> &[CatchType<'g>] {
        match self {
            RopInsn::Throwing { catches, .. }
            | RopInsn::ThrowingCst { catches, .. }
            | RopInsn::Call { catches, .. } => catches,
            _ => &[],
        }
    }

    /// Can this instruction throw (and so must end its block)?
    pub fn can_throw(&self) -> bool {
        matches!(
            self,
            RopInsn::Throwing { .. } | RopInsn::ThrowingCst { .. } | RopInsn::Call { .. }
        )
    }

    /// Unconditional `goto` (with no position)
    pub fn goto() -> RopInsn<'g> {
        RopInsn::Plain {
            opcode: RopOpcode::Goto,
            position: SourcePosition::NONE,
            result: None,
            sources: vec![],
        }
    }
}

impl<'g> fmt::Debug for RopInsn<'g> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {:?}", self.position(), self.opcode())?;
        if let Some(result) = self.result() {
            write!(f, " {:?} <-", result)?;
        }
        for source in self.sources() {
            write!(f, " {:?}", source)?;
        }
        if let Some(constant) = self.constant() {
            write!(f, " {:?}", constant)?;
        }
        match self {
            RopInsn::Switch { cases, .. } => write!(f, " {:?}", cases)?,
            RopInsn::FillArrayData { values, .. } => write!(f, " {:?}", values)?,
            _ => (),
        }
        if self.can_throw() {
            write!(f, " catch{:?}", self.catches())?;
        }
        Ok(())
    }
}
