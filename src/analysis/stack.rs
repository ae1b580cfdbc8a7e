use super::{merge_type, AbstractType};
use crate::errors::{Error, StructuralErrorKind, VerifyErrorKind};
use crate::jvm::JavaLibrary;
use crate::util::{Offset, OffsetVec, Width};
use std::fmt;

/// Entry on the simulated operand stack
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct StackEntry<'g> {
    pub value: AbstractType<'g>,

    /// Is this value also sitting (unmodified) in a local variable?
    pub is_local_copy: bool,
}

impl<'g> Width for StackEntry<'g> {
    fn width(&self) -> usize {
        self.value.width()
    }
}

impl<'g> fmt::Debug for StackEntry<'g> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_local_copy {
            write!(f, "{:?}*", self.value)
        } else {
            self.value.fmt(f)
        }
    }
}

/// Simulated operand stack
///
/// Offsets into the stack are measured in slots, so `long` and `double` entries take up two
/// offsets. Values are always pushed and popped whole.
#[derive(Clone, PartialEq, Eq)]
pub struct ExecutionStack<'g> {
    entries: OffsetVec<StackEntry<'g>>,
    max_stack: usize,
}

impl<'g> ExecutionStack<'g> {
    pub fn new(max_stack: usize) -> ExecutionStack<'g> {
        ExecutionStack {
            entries: OffsetVec::new(),
            max_stack,
        }
    }

    /// Number of values on the stack
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of slots used
    pub fn depth(&self) -> usize {
        self.entries.offset_len().0
    }

    pub fn max_stack(&self) -> usize {
        self.max_stack
    }

    /// Push a value, returning the stack offset at which it landed
    pub fn push(&mut self, value: AbstractType<'g>) -> Result<Offset, VerifyErrorKind> {
        self.push_entry(StackEntry {
            value,
            is_local_copy: false,
        })
    }

    /// Push a value that was just loaded from a local variable
    pub fn push_local_copy(&mut self, value: AbstractType<'g>) -> Result<Offset, VerifyErrorKind> {
        self.push_entry(StackEntry {
            value,
            is_local_copy: true,
        })
    }

    pub fn push_entry(&mut self, entry: StackEntry<'g>) -> Result<Offset, VerifyErrorKind> {
        if self.depth() + entry.width() > self.max_stack {
            return Err(VerifyErrorKind::StackOverflow {
                max_stack: self.max_stack,
            });
        }
        Ok(self.entries.push(entry))
    }

    /// Pop the top value, along with the offset it was at
    pub fn pop(&mut self) -> Result<(Offset, StackEntry<'g>), VerifyErrorKind> {
        self.entries.pop().ok_or(VerifyErrorKind::StackUnderflow)
    }

    /// Pop the top value, checking it is of the expected category
    pub fn pop_width(&mut self, width: usize) -> Result<(Offset, StackEntry<'g>), VerifyErrorKind> {
        let (offset, entry) = self.pop()?;
        if entry.width() == width {
            Ok((offset, entry))
        } else {
            Err(VerifyErrorKind::InvalidWidth(entry.width()))
        }
    }

    /// Look at a value without popping it (`0` is the top)
    pub fn peek(&self, depth: usize) -> Result<(Offset, &StackEntry<'g>), VerifyErrorKind> {
        self.entries
            .peek(depth)
            .ok_or(VerifyErrorKind::StackUnderflow)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Entries from the bottom of the stack up
    pub fn iter(&self) -> impl Iterator<Item = (Offset, &StackEntry<'g>)> {
        self.entries.iter()
    }

    /// Forget which values are copies of locals
    ///
    /// Used whenever the local the copy came from may have changed.
    pub fn clear_local_copies(&mut self) {
        for (_, entry) in self.entries.iter_mut() {
            entry.is_local_copy = false;
        }
    }

    /// Rewrite every occurrence of a value (used when a constructor initializes an object)
    pub fn replace_all(&mut self, original: &AbstractType<'g>, updated: AbstractType<'g>) {
        for (_, entry) in self.entries.iter_mut() {
            if entry.value == *original {
                entry.value = updated;
            }
        }
    }

    /// Slotwise merge
    ///
    /// The depths must agree (or it is a structural problem with the code), and every pair of
    /// values must merge.
    pub fn merge(
        &self,
        other: &ExecutionStack<'g>,
        java: &JavaLibrary<'g>,
    ) -> Result<ExecutionStack<'g>, Error> {
        if self.len() != other.len() || self.depth() != other.depth() {
            return Err(Error::from(StructuralErrorKind::StackDepthMismatch {
                left: self.depth(),
                right: other.depth(),
            }));
        }

        let mut merged = ExecutionStack::new(self.max_stack.max(other.max_stack));
        for ((_, left), (_, right)) in self.iter().zip(other.iter()) {
            let value = merge_type(java, &left.value, &right.value).ok_or_else(|| {
                VerifyErrorKind::IncompatibleTypes {
                    expected: left.value.render(),
                    found: right.value.render(),
                }
            })?;
            merged.entries.push(StackEntry {
                value,
                is_local_copy: left.is_local_copy && right.is_local_copy,
            });
        }
        Ok(merged)
    }
}

impl<'g> fmt::Debug for ExecutionStack<'g> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.entries.fmt(f)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::{ClassGraph, ClassGraphArenas};

    #[test]
    fn category2_values_move_whole() {
        let mut stack = ExecutionStack::new(6);
        assert_eq!(stack.push(AbstractType::Int), Ok(Offset(0)));
        assert_eq!(stack.push(AbstractType::Long), Ok(Offset(1)));
        assert_eq!(stack.push(AbstractType::Float), Ok(Offset(3)));
        assert_eq!(stack.depth(), 4);

        let (offset, entry) = stack.pop().unwrap();
        assert_eq!((offset, entry.value), (Offset(3), AbstractType::Float));

        let depth_before = stack.depth();
        let (offset, entry) = stack.pop().unwrap();
        assert_eq!((offset, entry.value), (Offset(1), AbstractType::Long));
        assert_eq!(stack.depth(), depth_before - 2);

        assert_eq!(stack.push(AbstractType::Double), Ok(Offset(1)));
        assert_eq!(
            stack.pop_width(1).err(),
            Some(VerifyErrorKind::InvalidWidth(2))
        );
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn interleaved_push_pop_keeps_offsets() {
        let sequence = [
            AbstractType::Double,
            AbstractType::Int,
            AbstractType::Long,
            AbstractType::Null,
            AbstractType::Float,
            AbstractType::Double,
        ];
        let mut stack = ExecutionStack::new(16);
        let mut expected_depth = 0;
        for (i, value) in sequence.iter().enumerate() {
            assert_eq!(stack.push(*value), Ok(Offset(expected_depth)));
            expected_depth += value.width();
            if i % 2 == 1 {
                let (offset, popped) = stack.pop().unwrap();
                assert_eq!(popped.value, *value);
                expected_depth -= value.width();
                assert_eq!(offset.0, expected_depth);
            }
        }
        assert_eq!(stack.depth(), expected_depth);
        let widths: usize = stack.iter().map(|(_, entry)| entry.width()).sum();
        assert_eq!(widths, expected_depth);
    }

    #[test]
    fn overflow_and_underflow() {
        let mut stack = ExecutionStack::new(2);
        assert!(stack.push(AbstractType::Int).is_ok());
        assert_eq!(
            stack.push(AbstractType::Long),
            Err(VerifyErrorKind::StackOverflow { max_stack: 2 })
        );
        assert!(stack.pop().is_ok());
        assert_eq!(stack.pop().err(), Some(VerifyErrorKind::StackUnderflow));
    }

    #[test]
    fn merging_stacks() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let java = graph.insert_java_library_types();

        let mut left = ExecutionStack::new(4);
        left.push_local_copy(AbstractType::Byte).unwrap();
        left.push(AbstractType::Null).unwrap();
        let mut right = ExecutionStack::new(4);
        right.push_local_copy(AbstractType::Char).unwrap();
        right.push(AbstractType::object(java.string)).unwrap();

        let merged = left.merge(&right, &java).unwrap();
        let values: Vec<(AbstractType, bool)> = merged
            .iter()
            .map(|(_, entry)| (entry.value, entry.is_local_copy))
            .collect();
        assert_eq!(
            values,
            vec![
                (AbstractType::Int, true),
                (AbstractType::object(java.string), false)
            ]
        );
        assert_eq!(merged.merge(&right, &java).unwrap(), merged);

        right.pop().unwrap();
        let error = left.merge(&right, &java).unwrap_err();
        assert!(
            matches!(
                error,
                Error::Structural(StructuralErrorKind::StackDepthMismatch { left: 2, right: 1 })
            ),
            "unexpected error {:?}",
            error
        );

        right.push(AbstractType::Float).unwrap();
        let error = left.merge(&right, &java).unwrap_err();
        assert!(
            matches!(error, Error::Verify(VerifyErrorKind::IncompatibleTypes { .. })),
            "unexpected error {:?}",
            error
        );
    }
}
