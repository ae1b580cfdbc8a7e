use super::{Label, RopInsn};
use crate::errors::{Error, StructuralErrorKind};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Basic block of register instructions
///
/// Only the last instruction may branch or throw. When it throws, the first successors are the
/// handlers for its catch types, in the same order, and the primary successor (if any) comes last.
#[derive(Clone, PartialEq)]
pub struct RopBlock<'g> {
    pub label: Label,
    pub insns: Vec<RopInsn<'g>>,
    pub successors: Vec<Label>,

    /// Successor taken when nothing is thrown and no branch is taken
    pub primary_successor: Option<Label>,

    /// Tag shared by all blocks inlined from the same subroutine call
    pub subroutine: Option<Label>,
}

impl<'g> RopBlock<'g> {
    pub fn last_insn(&self) -> Option<&RopInsn<'g>> {
        self.insns.last()
    }

    /// Does the block end with an instruction that can throw?
    pub fn can_throw(&self) -> bool {
        self.last_insn().map_or(false, RopInsn::can_throw)
    }
}

impl<'g> fmt::Debug for RopBlock<'g> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:", self.label)?;
        if let Some(subroutine) = self.subroutine {
            write!(f, " (in {:?})", subroutine)?;
        }
        for insn in &self.insns {
            write!(f, "\n  {:?}", insn)?;
        }
        write!(f, "\n  -> {:?}", self.successors)?;
        if let Some(primary) = self.primary_successor {
            write!(f, " primary {:?}", primary)?;
        }
        Ok(())
    }
}

/// Control flow graph of a translated method
pub struct RopMethod<'g> {
    blocks: BTreeMap<Label, RopBlock<'g>>,
    entry: Label,
}

impl<'g> RopMethod<'g> {
    /// Build a method, checking that every successor names a block
    pub fn new(blocks: BTreeMap<Label, RopBlock<'g>>, entry: Label) -> Result<RopMethod<'g>, Error> {
        if !blocks.contains_key(&entry) {
            return Err(Error::from(StructuralErrorKind::DanglingLabel(entry)));
        }
        for block in blocks.values() {
            for successor in block.successors.iter().chain(&block.primary_successor) {
                if !blocks.contains_key(successor) {
                    return Err(Error::from(StructuralErrorKind::DanglingLabel(*successor)));
                }
            }
        }
        Ok(RopMethod { blocks, entry })
    }

    pub fn entry(&self) -> Label {
        self.entry
    }

    pub fn block(&self, label: Label) -> Option<&RopBlock<'g>> {
        self.blocks.get(&label)
    }

    /// Blocks in label order
    pub fn blocks(&self) -> impl Iterator<Item = &RopBlock<'g>> {
        self.blocks.values()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Labels reachable from the entry
    pub fn reachable_labels(&self) -> BTreeSet<Label> {
        reachable_from(self.entry, &self.blocks)
    }

    /// Predecessors of every block
    pub fn predecessors(&self) -> HashMap<Label, Vec<Label>> {
        let mut predecessors: HashMap<Label, Vec<Label>> = HashMap::new();
        for block in self.blocks.values() {
            let mut seen = BTreeSet::new();
            for successor in &block.successors {
                if seen.insert(*successor) {
                    predecessors.entry(*successor).or_default().push(block.label);
                }
            }
        }
        predecessors
    }
}

impl<'g> fmt::Debug for RopMethod<'g> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "entry {:?}", self.entry)?;
        for block in self.blocks.values() {
            writeln!(f, "{:?}", block)?;
        }
        Ok(())
    }
}

/// Depth-first walk over successor edges (missing blocks are skipped)
pub fn reachable_from<'g>(entry: Label, blocks: &BTreeMap<Label, RopBlock<'g>>) -> BTreeSet<Label> {
    let mut reached = BTreeSet::new();
    let mut to_visit = vec![entry];
    while let Some(label) = to_visit.pop() {
        if !reached.insert(label) {
            continue;
        }
        if let Some(block) = blocks.get(&label) {
            to_visit.extend(block.successors.iter().rev().copied());
        }
    }
    reached
}

#[cfg(test)]
mod test {
    use super::*;

    fn goto_block(label: usize, successors: &[usize]) -> RopBlock<'static> {
        RopBlock {
            label: Label(label),
            insns: vec![RopInsn::goto()],
            successors: successors.iter().copied().map(Label).collect(),
            primary_successor: successors.first().copied().map(Label),
            subroutine: None,
        }
    }

    #[test]
    fn reachability_and_predecessors() {
        let mut blocks = BTreeMap::new();
        for block in vec![
            goto_block(0, &[1]),
            goto_block(1, &[2]),
            goto_block(2, &[1]),
            goto_block(3, &[2]),
        ] {
            blocks.insert(block.label, block);
        }
        let method = RopMethod::new(blocks, Label(0)).unwrap();

        let reached: Vec<Label> = method.reachable_labels().into_iter().collect();
        assert_eq!(reached, vec![Label(0), Label(1), Label(2)]);

        let predecessors = method.predecessors();
        assert_eq!(predecessors[&Label(2)], vec![Label(1), Label(3)]);
        assert_eq!(predecessors[&Label(1)], vec![Label(0), Label(2)]);
        assert!(!predecessors.contains_key(&Label(0)));
        assert!(!method.block(Label(0)).unwrap().can_throw());
    }

    #[test]
    fn dangling_successors_are_rejected() {
        let mut blocks = BTreeMap::new();
        blocks.insert(Label(0), goto_block(0, &[7]));
        let error = RopMethod::new(blocks, Label(0)).unwrap_err();
        assert!(
            matches!(error, Error::Structural(StructuralErrorKind::DanglingLabel(Label(7)))),
            "unexpected error {:?}",
            error
        );
    }
}
