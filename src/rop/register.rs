use crate::analysis::AbstractType;
use crate::jvm::UnqualifiedName;
use crate::util::Width;
use std::fmt;

/// Register, together with the type of value it holds at some instruction
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RegisterSpec<'g> {
    pub reg: usize,
    pub typ: AbstractType<'g>,

    /// Source-level local variable the register holds, if known
    pub local: Option<LocalItem>,
}

/// Debug information about a local variable
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct LocalItem {
    pub name: UnqualifiedName,
}

impl<'g> RegisterSpec<'g> {
    pub fn new(reg: usize, typ: AbstractType<'g>) -> RegisterSpec<'g> {
        RegisterSpec {
            reg,
            typ,
            local: None,
        }
    }

    pub fn with_local(mut self, local: Option<LocalItem>) -> RegisterSpec<'g> {
        self.local = local;
        self
    }

    /// Same register, different type
    pub fn with_type(&self, typ: AbstractType<'g>) -> RegisterSpec<'g> {
        RegisterSpec {
            reg: self.reg,
            typ,
            local: self.local.clone(),
        }
    }

    /// First register after this one (category 2 values take a pair of registers)
    pub fn next_reg(&self) -> usize {
        self.reg + self.typ.width()
    }
}

impl<'g> fmt::Debug for RegisterSpec<'g> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}:{:?}", self.reg, self.typ)?;
        if let Some(local) = &self.local {
            write!(f, "{{{:?}}}", local.name)?;
        }
        Ok(())
    }
}

/// How registers are assigned to the simulated frame
///
///   - local variable `n` is register `n`
///   - the stack slot at offset `s` is register `max_locals + s`
///   - synchronized methods keep the monitor object in register `max_locals + max_stack`
///   - temporaries (for stack shuffles) come after that
///
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct RegisterLayout {
    pub max_locals: usize,
    pub max_stack: usize,
}

impl RegisterLayout {
    pub fn local(&self, index: u16) -> usize {
        index as usize
    }

    pub fn stack(&self, offset: usize) -> usize {
        self.max_locals + offset
    }

    pub fn synch(&self) -> usize {
        self.max_locals + self.max_stack
    }

    /// First register free for temporaries
    pub fn temporaries(&self) -> usize {
        self.synch() + 1
    }
}
