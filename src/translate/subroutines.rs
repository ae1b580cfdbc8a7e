use crate::errors::{Error, ErrorContext, ErrorContextExt, StructuralErrorKind};
use crate::rop::{reachable_from, Label, LabelAllocator, LabelGenerator, RopBlock};
use std::collections::{BTreeMap, BTreeSet};

/// Subroutine (the target of one or more `jsr` instructions)
#[derive(Clone, Debug)]
pub struct Subroutine {
    pub start: Label,

    /// Blocks ending in a `jsr` to this subroutine
    pub callers: BTreeSet<Label>,

    /// Blocks ending in a `ret` from this subroutine
    pub ret_blocks: BTreeSet<Label>,
}

impl Subroutine {
    pub fn new(start: Label) -> Subroutine {
        Subroutine {
            start,
            callers: BTreeSet::new(),
            ret_blocks: BTreeSet::new(),
        }
    }
}

/// Block ending in a `jsr`
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct CallSite {
    pub subroutine: Label,

    /// Where the matching `ret` comes back to
    pub return_site: Label,
}

/// Replaces every subroutine call with a private copy of the subroutine's blocks
///
/// Call blocks are expected to end in a `goto` to the subroutine start, and `ret` blocks in a
/// `goto` with no successors yet. In each copy, `ret` blocks are pointed at the return site of
/// the call being inlined. Calls nested inside a subroutine are only inlined once the copy
/// containing them is reachable, so every nesting path gets its own copies.
pub struct SubroutineInliner<'r> {
    subroutines: &'r BTreeMap<Label, Subroutine>,

    /// Subroutines each original block belongs to
    membership: &'r BTreeMap<Label, Vec<Label>>,

    /// Call blocks from the analysis (by original label)
    original_calls: &'r BTreeMap<Label, CallSite>,
}

impl<'r> SubroutineInliner<'r> {
    pub fn new(
        subroutines: &'r BTreeMap<Label, Subroutine>,
        membership: &'r BTreeMap<Label, Vec<Label>>,
        original_calls: &'r BTreeMap<Label, CallSite>,
    ) -> SubroutineInliner<'r> {
        SubroutineInliner {
            subroutines,
            membership,
            original_calls,
        }
    }

    /// Inline all calls reachable from `entry`, then drop blocks that are no longer reachable
    pub fn inline_all<'g>(
        &self,
        blocks: &mut BTreeMap<Label, RopBlock<'g>>,
        entry: Label,
        labels: &mut LabelAllocator,
    ) -> Result<(), Error> {
        let mut pending: BTreeMap<Label, CallSite> = self.original_calls.clone();

        loop {
            let calls = reachable_calls(entry, blocks, &pending);
            if calls.is_empty() {
                break;
            }
            for caller in calls {
                if let Some(call) = pending.remove(&caller) {
                    self.inline_call(blocks, caller, call, labels, &mut pending)
                        .context(ErrorContext::Subroutine(call.subroutine))?;
                }
            }
        }

        let reachable = reachable_from(entry, blocks);
        let before = blocks.len();
        blocks.retain(|label, _| reachable.contains(label));
        log::debug!(
            "Pruned {} unreachable blocks after inlining",
            before - blocks.len()
        );
        Ok(())
    }

    fn is_member(&self, label: Label, subroutine: Label) -> bool {
        self.membership
            .get(&label)
            .map_or(false, |subroutines| subroutines.contains(&subroutine))
    }

    fn inline_call<'g>(
        &self,
        blocks: &mut BTreeMap<Label, RopBlock<'g>>,
        caller: Label,
        call: CallSite,
        labels: &mut LabelAllocator,
        pending: &mut BTreeMap<Label, CallSite>,
    ) -> Result<(), Error> {
        let subroutine = self
            .subroutines
            .get(&call.subroutine)
            .ok_or(StructuralErrorKind::DanglingLabel(call.subroutine))?;

        let copy_start = labels.fresh_label();
        log::debug!(
            "Inlining subroutine {:?} called from {:?} as {:?}",
            call.subroutine,
            caller,
            copy_start
        );

        // Original label to label of the copy
        let mut copies: BTreeMap<Label, Label> = BTreeMap::new();
        copies.insert(subroutine.start, copy_start);
        let mut to_copy = vec![subroutine.start];
        let mut copied = vec![];

        while let Some(original) = to_copy.pop() {
            let block = blocks
                .get(&original)
                .ok_or(StructuralErrorKind::DanglingLabel(original))?;
            let copy_label = copies[&original];
            let mut copy = RopBlock {
                label: copy_label,
                insns: block.insns.clone(),
                successors: vec![],
                primary_successor: None,
                subroutine: Some(copy_start),
            };

            let mut map_label = |label: Label| -> Label {
                if !self.is_member(label, subroutine.start) {
                    return label;
                }
                *copies.entry(label).or_insert_with(|| {
                    to_copy.push(label);
                    labels.fresh_label()
                })
            };

            if subroutine.ret_blocks.contains(&original) {
                copy.successors = vec![call.return_site];
                copy.primary_successor = Some(call.return_site);
            } else if let Some(nested) = self.original_calls.get(&original) {
                // Left in place until this copy is reachable
                copy.successors = block.successors.clone();
                copy.primary_successor = block.primary_successor;
                let return_site = map_label(nested.return_site);
                pending.insert(
                    copy_label,
                    CallSite {
                        subroutine: nested.subroutine,
                        return_site,
                    },
                );
            } else {
                copy.successors = block.successors.iter().map(|label| map_label(*label)).collect();
                copy.primary_successor = block.primary_successor.map(&mut map_label);
            }
            copied.push(copy);
        }

        for copy in copied {
            blocks.insert(copy.label, copy);
        }
        let caller_block = blocks
            .get_mut(&caller)
            .ok_or(StructuralErrorKind::DanglingLabel(caller))?;
        caller_block.successors = vec![copy_start];
        caller_block.primary_successor = Some(copy_start);
        Ok(())
    }
}

/// Call blocks reachable from the entry, without going through any call
fn reachable_calls<'g>(
    entry: Label,
    blocks: &BTreeMap<Label, RopBlock<'g>>,
    pending: &BTreeMap<Label, CallSite>,
) -> Vec<Label> {
    let mut reached = BTreeSet::new();
    let mut calls = vec![];
    let mut to_visit = vec![entry];
    while let Some(label) = to_visit.pop() {
        if !reached.insert(label) {
            continue;
        }
        if pending.contains_key(&label) {
            calls.push(label);
            continue;
        }
        if let Some(block) = blocks.get(&label) {
            to_visit.extend(block.successors.iter().rev().copied());
        }
    }
    calls.sort();
    calls
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::rop::RopInsn;

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
    fn each_call_gets_its_own_copy() {
        // 0 calls 10 (returning to 1), 1 calls 10 (returning to 2), 10 -> 11 which returns
        let mut blocks = BTreeMap::new();
        for block in vec![
            goto_block(0, &[10]),
            goto_block(1, &[10]),
            goto_block(2, &[]),
            goto_block(10, &[11]),
            goto_block(11, &[]),
        ] {
            blocks.insert(block.label, block);
        }

        let mut start = Subroutine::new(Label(10));
        start.callers.extend([Label(0), Label(1)]);
        start.ret_blocks.insert(Label(11));
        let subroutines: BTreeMap<Label, Subroutine> =
            vec![(Label(10), start)].into_iter().collect();
        let membership: BTreeMap<Label, Vec<Label>> = vec![
            (Label(0), vec![]),
            (Label(1), vec![]),
            (Label(2), vec![]),
            (Label(10), vec![Label(10)]),
            (Label(11), vec![Label(10)]),
        ]
        .into_iter()
        .collect();
        let calls: BTreeMap<Label, CallSite> = vec![
            (
                Label(0),
                CallSite {
                    subroutine: Label(10),
                    return_site: Label(1),
                },
            ),
            (
                Label(1),
                CallSite {
                    subroutine: Label(10),
                    return_site: Label(2),
                },
            ),
        ]
        .into_iter()
        .collect();

        let mut labels = LabelAllocator::new(Label(100));
        SubroutineInliner::new(&subroutines, &membership, &calls)
            .inline_all(&mut blocks, Label(0), &mut labels)
            .unwrap();

        assert!(!blocks.contains_key(&Label(10)));
        assert!(!blocks.contains_key(&Label(11)));

        let copies: Vec<&RopBlock> = blocks
            .values()
            .filter(|block| block.subroutine.is_some())
            .collect();
        assert_eq!(copies.len(), 4);

        let mut return_edges: Vec<(Label, Vec<Label>)> = copies
            .iter()
            .filter(|block| block.successors.iter().all(|label| label.0 < 10))
            .map(|block| (block.subroutine.unwrap(), block.successors.clone()))
            .collect();
        return_edges.sort();
        assert_eq!(return_edges.len(), 2);
        assert_ne!(return_edges[0].0, return_edges[1].0);
        assert_eq!(return_edges[0].1, vec![Label(1)]);
        assert_eq!(return_edges[1].1, vec![Label(2)]);

        let reachable = reachable_from(Label(0), &blocks);
        assert_eq!(reachable.len(), blocks.len());
    }
}
