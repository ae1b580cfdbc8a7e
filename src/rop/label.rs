use std::fmt;

/// Block label
///
/// Blocks decoded from bytecode are labelled with their starting offset. Synthesized blocks (the
/// parameter-binding entry, return blocks, move-result and exception-setup stubs, inlined
/// subroutine copies) get labels past the end of the code.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Label(pub usize);

impl Label {
    /// Label for the block at the first bytecode offset
    pub const START: Label = Label(0);

    /// Get the next fresh label
    pub fn next(&self) -> Label {
        Label(self.0 + 1)
    }

    /// Bytecode offset of a block label
    pub fn offset(&self) -> usize {
        self.0
    }
}

/// Generates new labels
pub trait LabelGenerator<L> {
    /// Generate a fresh label
    fn fresh_label(&mut self) -> L;
}

/// Label generator for [`Label`]
///
/// Cloning does not split the generator source - the cloned generator will produce the same
/// sequence of labels as the original.
#[derive(Clone, Debug)]
pub struct LabelAllocator(Label);

impl LabelAllocator {
    pub fn new(start: Label) -> LabelAllocator {
        LabelAllocator(start)
    }

    /// Smallest label not yet handed out
    pub fn peek(&self) -> Label {
        self.0
    }
}

impl LabelGenerator<Label> for LabelAllocator {
    fn fresh_label(&mut self) -> Label {
        let to_return = self.0;
        self.0 = self.0.next();
        to_return
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_fmt(format_args!("l{}", self.0))
    }
}

impl fmt::Display for Label {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_fmt(format_args!("{:04x}", self.0))
    }
}
