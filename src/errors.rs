use crate::rop::Label;
use std::fmt;

/// Reasons translation of a method can fail
///
/// Errors start out as one of the three root kinds and pick up positional context (instruction,
/// block, method) on the way out. Rendering an error prints the root cause first, followed by the
/// context outward towards the entry point.
#[derive(Debug)]
pub enum Error {
    /// The bytecode would be rejected by a verifier
    Verify(VerifyErrorKind),

    /// The control-flow structure of the method is inconsistent
    Structural(StructuralErrorKind),

    /// A construct needs a newer runtime than the configured minimum API level
    Unsupported(UnsupportedConstruct),

    /// Some other error, with extra context about where it happened
    InContext {
        context: ErrorContext,
        cause: Box<Error>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyErrorKind {
    StackUnderflow,
    StackOverflow { max_stack: usize },
    IncompatibleTypes { expected: String, found: String },

    /// Reading a local that has no usable value
    InvalidLocal(u16),
    LocalOutOfRange(u16),

    NotReference(String),
    NotArray(String),
    NotReturnAddress(String),

    /// Uninitialized value used somewhere other than a constructor call
    UninitializedMisuse(String),

    /// Stack shuffle over values of the wrong category
    InvalidWidth(usize),

    BadSwitch { low: i32, high: i32 },
    FallOffEnd(usize),
    InvalidOpcode(u8),
    TruncatedInstruction,
    BadBranchTarget(usize),

    /// Constant pool index is missing or has the wrong kind of entry
    BadConstant(u16),
    BadDescriptor(String),
    ConstantPoolOverflow,

    /// Return instruction does not agree with the method's return type
    BadReturn(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuralErrorKind {
    /// A successor label with no block
    DanglingLabel(Label),

    /// A `ret` returning from a subroutine other than the innermost active one
    SubroutineReturnMismatch {
        expected: Label,
        found: Option<Label>,
    },

    /// Two frames flowing into the same label have different stack depths
    StackDepthMismatch { left: usize, right: usize },

    /// Two frames flowing into the same label disagree on the active subroutines
    SubroutineOrder {
        existing: Vec<Label>,
        incoming: Vec<Label>,
    },

    /// A block has successors that do not fit its last instruction
    BadSuccessors(Label),
}

/// A construct that needs a runtime newer than the minimum targeted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedConstruct {
    /// What was found (eg. `invoke-custom`)
    pub construct: String,

    /// Lowest API level supporting the construct
    pub required_api: u32,

    /// Minimum API level being targeted
    pub min_api: u32,
}

/// Where an error happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorContext {
    Instruction { offset: usize },
    Block(Label),
    MergingInto(Label),
    Subroutine(Label),
    Method(String),
}

impl Error {
    /// Wrap the error with some context
    pub fn with_context(self, context: ErrorContext) -> Error {
        Error::InContext {
            context,
            cause: Box::new(self),
        }
    }

    /// Strip off all the context
    pub fn root_cause(&self) -> &Error {
        let mut error = self;
        while let Error::InContext { cause, .. } = error {
            error = cause;
        }
        error
    }

    /// Context, from the innermost (closest to the root cause) outwards
    pub fn contexts(&self) -> Vec<&ErrorContext> {
        let mut contexts = vec![];
        let mut error = self;
        while let Error::InContext { context, cause } = error {
            contexts.push(context);
            error = cause;
        }
        contexts.reverse();
        contexts
    }

    /// Offset of the innermost instruction mentioned in the context
    pub fn offset(&self) -> Option<usize> {
        self.contexts().into_iter().find_map(|context| match context {
            ErrorContext::Instruction { offset } => Some(*offset),
            _ => None,
        })
    }

    /// Label of the innermost block mentioned in the context
    pub fn block(&self) -> Option<Label> {
        self.contexts().into_iter().find_map(|context| match context {
            ErrorContext::Block(label) => Some(*label),
            _ => None,
        })
    }
}

impl From<VerifyErrorKind> for Error {
    fn from(kind: VerifyErrorKind) -> Error {
        Error::Verify(kind)
    }
}

impl From<StructuralErrorKind> for Error {
    fn from(kind: StructuralErrorKind) -> Error {
        Error::Structural(kind)
    }
}

impl From<UnsupportedConstruct> for Error {
    fn from(unsupported: UnsupportedConstruct) -> Error {
        Error::Unsupported(unsupported)
    }
}

/// Attach context to the error side of a result
pub trait ErrorContextExt<T> {
    fn context(self, context: ErrorContext) -> Result<T, Error>;

    fn with_context(self, context: impl FnOnce() -> ErrorContext) -> Result<T, Error>;
}

impl<T, E: Into<Error>> ErrorContextExt<T> for Result<T, E> {
    fn context(self, context: ErrorContext) -> Result<T, Error> {
        self.map_err(|err| Into::<Error>::into(err).with_context(context))
    }

    fn with_context(self, context: impl FnOnce() -> ErrorContext) -> Result<T, Error> {
        self.map_err(|err| Into::<Error>::into(err).with_context(context()))
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorContext::Instruction { offset } => write!(f, "at instruction {:04x}", offset),
            ErrorContext::Block(label) => write!(f, "in block {}", label),
            ErrorContext::MergingInto(label) => write!(f, "merging into block {}", label),
            ErrorContext::Subroutine(label) => write!(f, "in subroutine {}", label),
            ErrorContext::Method(name) => write!(f, "in method {}", name),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.root_cause() {
            Error::Verify(kind) => write!(f, "verification error: {:?}", kind)?,
            Error::Structural(kind) => write!(f, "structural error: {:?}", kind)?,
            Error::Unsupported(unsupported) => write!(
                f,
                "unsupported: {} needs API level {} (targeting {})",
                unsupported.construct, unsupported.required_api, unsupported.min_api
            )?,
            Error::InContext { .. } => (),
        }
        for context in self.contexts() {
            write!(f, "\n  {}", context)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn context_chain_reads_inside_out() {
        let error: Result<(), Error> = Err(VerifyErrorKind::StackUnderflow)
            .context(ErrorContext::Instruction { offset: 3 })
            .context(ErrorContext::Block(Label(0)))
            .context(ErrorContext::Method("foo".to_string()));
        let error = error.unwrap_err();

        assert!(
            matches!(error.root_cause(), Error::Verify(VerifyErrorKind::StackUnderflow)),
            "unexpected root cause {:?}",
            error.root_cause()
        );
        assert_eq!(error.offset(), Some(3));
        assert_eq!(error.block(), Some(Label(0)));
        assert_eq!(
            error.to_string(),
            "verification error: StackUnderflow\n  at instruction 0003\n  in block 0000\n  in method foo"
        );
    }
}
