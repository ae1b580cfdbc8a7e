use super::{AbstractType, ExecutionStack, LocalsArray};
use crate::errors::{Error, StructuralErrorKind, VerifyErrorKind};
use crate::jvm::JavaLibrary;
use crate::rop::Label;

/// Simulated machine state at the start of a block (or anywhere inside one)
///
/// Frames are plain values: merging produces a new frame, and the analysis decides whether a
/// successor needs to be revisited by comparing the merged frame with what was recorded before.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Frame<'g> {
    pub locals: LocalsArray<'g>,
    pub stack: ExecutionStack<'g>,

    /// Start labels of the subroutines we are inside of, outermost first
    pub subroutines: Vec<Label>,
}

impl<'g> Frame<'g> {
    /// Empty frame for a method with the given limits
    pub fn new(max_locals: usize, max_stack: usize) -> Frame<'g> {
        Frame {
            locals: LocalsArray::new(max_locals),
            stack: ExecutionStack::new(max_stack),
            subroutines: vec![],
        }
    }

    /// Merge two frames flowing into the same block
    pub fn merge(&self, other: &Frame<'g>, java: &JavaLibrary<'g>) -> Result<Frame<'g>, Error> {
        let stack = self.stack.merge(&other.stack, java)?;
        let subroutines = merge_subroutine_lists(&self.subroutines, &other.subroutines);
        let mut locals = self.locals.merge(&other.locals, java);
        if subroutines.is_empty() {
            locals = locals.collapse_to_primary();
        }
        Ok(Frame {
            locals,
            stack,
            subroutines,
        })
    }

    /// Merge the frame of a block calling into subroutine `subroutine` from block `caller`
    pub fn merge_with_subroutine_caller(
        &self,
        other: &Frame<'g>,
        subroutine: Label,
        caller: Label,
        java: &JavaLibrary<'g>,
    ) -> Result<Frame<'g>, Error> {
        let locals = self
            .locals
            .merge_with_subroutine_caller(&other.locals, caller, java);
        let stack = self.stack.merge(&other.stack, java)?;

        let mut other_subroutines = other.subroutines.clone();
        other_subroutines.push(subroutine);

        // One list must be a suffix of the other
        let subroutines = if self.subroutines == other_subroutines {
            other_subroutines
        } else {
            let (longer, shorter) = if self.subroutines.len() > other_subroutines.len() {
                (&self.subroutines, &other_subroutines)
            } else {
                (&other_subroutines, &self.subroutines)
            };
            if !longer.ends_with(shorter) {
                return Err(Error::from(StructuralErrorKind::SubroutineOrder {
                    existing: self.subroutines.clone(),
                    incoming: other_subroutines.clone(),
                }));
            }
            longer.clone()
        };

        Ok(Frame {
            locals,
            stack,
            subroutines,
        })
    }

    /// Frame at the start of subroutine `subroutine`, entered from block `caller`
    pub fn make_new_subroutine_start_frame(
        &self,
        subroutine: Label,
        caller: Label,
        java: &JavaLibrary<'g>,
    ) -> Result<Frame<'g>, Error> {
        let mut subroutines = self.subroutines.clone();
        subroutines.push(subroutine);
        let start = Frame {
            locals: LocalsArray::One(self.locals.primary().clone()),
            stack: self.stack.clone(),
            subroutines,
        };
        start.merge_with_subroutine_caller(self, subroutine, caller, java)
    }

    /// Frame to continue with in `caller` after returning from `subroutine`
    ///
    /// Returns `Ok(None)` if the subroutine has not yet been analyzed with locals for that caller.
    pub fn sub_frame_for_label(
        &self,
        subroutine: Label,
        caller: Label,
    ) -> Result<Option<Frame<'g>>, Error> {
        let mut subroutines = self.subroutines.clone();
        match subroutines.pop() {
            Some(innermost) if innermost == subroutine => (),
            found => {
                return Err(Error::from(StructuralErrorKind::SubroutineReturnMismatch {
                    expected: subroutine,
                    found,
                }))
            }
        }

        Ok(self.locals.sub_array_for_label(caller).map(|locals| Frame {
            locals,
            stack: self.stack.clone(),
            subroutines,
        }))
    }

    /// Frame at the start of an exception handler (only the exception is on the stack)
    pub fn make_exception_handler_start_frame(
        &self,
        exception: AbstractType<'g>,
    ) -> Result<Frame<'g>, VerifyErrorKind> {
        let mut stack = self.stack.clone();
        stack.clear();
        stack.push(exception)?;
        Ok(Frame {
            locals: self.locals.clone(),
            stack,
            subroutines: self.subroutines.clone(),
        })
    }

    /// Rewrite every occurrence of an uninitialized value to its initialized type
    pub fn make_initialized(&mut self, uninitialized: &AbstractType<'g>) {
        let initialized = uninitialized.initialized();
        self.stack.replace_all(uninitialized, initialized);
        self.locals.replace_all(uninitialized, initialized);
    }
}

/// Longest common prefix
fn merge_subroutine_lists(left: &[Label], right: &[Label]) -> Vec<Label> {
    left.iter()
        .zip(right.iter())
        .take_while(|(l, r)| l == r)
        .map(|(l, _)| *l)
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::{ClassGraph, ClassGraphArenas};

    #[test]
    fn merge_is_idempotent() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let java = graph.insert_java_library_types();

        let mut left = Frame::new(3, 2);
        left.locals.set(0, AbstractType::Byte).unwrap();
        left.locals.set(1, AbstractType::Long).unwrap();
        left.stack.push(AbstractType::Null).unwrap();
        let mut right = Frame::new(3, 2);
        right.locals.set(0, AbstractType::Short).unwrap();
        right.locals.set(2, AbstractType::Float).unwrap();
        right
            .stack
            .push(AbstractType::object(java.throwable))
            .unwrap();

        let merged = left.merge(&right, &java).unwrap();
        assert_eq!(merged.locals.get_optional(0), Some(AbstractType::Int));
        assert_eq!(merged.locals.get_optional(1), None);
        assert_eq!(merged.locals.get_optional(2), None);

        assert_eq!(merged.merge(&right, &java).unwrap(), merged);
        assert_eq!(merged.merge(&left, &java).unwrap(), merged);
        assert_eq!(merged.merge(&merged, &java).unwrap(), merged);
    }

    #[test]
    fn initializing_rewrites_every_copy() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let java = graph.insert_java_library_types();

        let fresh = AbstractType::Uninitialized {
            class: java.string,
            offset: 0,
        };
        let other = AbstractType::Uninitialized {
            class: java.string,
            offset: 7,
        };
        let mut frame = Frame::new(2, 3);
        frame.locals.set(0, fresh).unwrap();
        frame.locals.set(1, other).unwrap();
        frame.stack.push(fresh).unwrap();
        frame.stack.push(fresh).unwrap();

        frame.make_initialized(&fresh);
        assert_eq!(frame.locals.get_optional(0), Some(AbstractType::object(java.string)));
        assert_eq!(frame.locals.get_optional(1), Some(other));
        assert!(frame
            .stack
            .iter()
            .all(|(_, entry)| entry.value == AbstractType::object(java.string)));
    }

    #[test]
    fn subroutine_return_frames() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let java = graph.insert_java_library_types();

        let mut caller = Frame::new(2, 1);
        caller.locals.set(0, AbstractType::Int).unwrap();
        let mut start = caller
            .make_new_subroutine_start_frame(Label(20), Label(5), &java)
            .unwrap();
        assert_eq!(start.subroutines, vec![Label(20)]);

        start.locals.set(1, AbstractType::Float).unwrap();
        let back = start
            .sub_frame_for_label(Label(20), Label(5))
            .unwrap()
            .unwrap();
        assert!(back.subroutines.is_empty());
        assert_eq!(back.locals.get(0), Ok(AbstractType::Int));
        assert_eq!(back.locals.get(1), Ok(AbstractType::Float));

        assert!(start.sub_frame_for_label(Label(20), Label(8)).unwrap().is_none());

        let error = start.sub_frame_for_label(Label(30), Label(5)).unwrap_err();
        assert!(
            matches!(
                error,
                Error::Structural(StructuralErrorKind::SubroutineReturnMismatch {
                    expected: Label(30),
                    found: Some(Label(20)),
                })
            ),
            "unexpected error {:?}",
            error
        );

        // Leaving every subroutine drops the per-caller tracking
        let outside = back.merge(&caller, &java).unwrap();
        assert!(matches!(outside.locals, LocalsArray::One(_)));
    }

    #[test]
    fn handler_frames_hold_only_the_exception() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let java = graph.insert_java_library_types();

        let mut frame = Frame::new(1, 2);
        frame.stack.push(AbstractType::Int).unwrap();
        frame.stack.push(AbstractType::Float).unwrap();
        let handler = frame
            .make_exception_handler_start_frame(AbstractType::object(java.exception))
            .unwrap();
        let values: Vec<AbstractType> = handler.stack.iter().map(|(_, e)| e.value).collect();
        assert_eq!(values, vec![AbstractType::object(java.exception)]);
    }
}
