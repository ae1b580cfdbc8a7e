use crate::errors::{Error, ErrorContext, VerifyErrorKind};
use crate::jvm::{BytecodeArray, ExceptionHandler, ExceptionTable, Instruction};
use crate::rop::Label;
use std::collections::{BTreeMap, BTreeSet};

/// Basic block of the original bytecode
#[derive(Clone, Debug)]
pub struct SourceBlock<'g> {
    /// Label (the same as the starting offset)
    pub label: Label,

    /// First offset in the block
    pub start: usize,

    /// Offset just past the last instruction in the block
    pub end: usize,

    /// Offset of the last instruction in the block
    pub last: usize,

    /// Successors in the normal flow of control
    ///
    ///   - conditional branches: `[fallthrough, target]`
    ///   - switches: case targets in order, then the default target
    ///   - `jsr`: `[return site, subroutine start]`
    ///   - returns, `athrow`, `ret`: empty
    ///
    pub successors: Vec<Label>,

    /// Handlers for exceptions thrown by the last instruction, in the order they are tried
    pub catches: Vec<ExceptionHandler<'g>>,
}

/// All live basic blocks in a method body
#[derive(Debug)]
pub struct SourceBlocks<'g> {
    blocks: BTreeMap<Label, SourceBlock<'g>>,
}

impl<'g> SourceBlocks<'g> {
    pub fn get(&self, label: Label) -> Option<&SourceBlock<'g>> {
        self.blocks.get(&label)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceBlock<'g>> {
        self.blocks.values()
    }
}

/// Does the instruction have to be the last one in its block?
fn ends_block(insn: &Instruction) -> bool {
    insn.can_throw() || insn.is_terminal() || !insn.jump_targets().is_empty()
}

/// Split a method body into basic blocks
///
/// Only code reachable from the entry point (or from handlers protecting reachable code) ends up
/// in a block. Every instruction that can throw ends its block, so that the exception edges of a
/// block all leave from its last instruction.
pub fn identify_blocks<'g>(
    bytecode: &BytecodeArray<'_, 'g>,
    exceptions: &ExceptionTable<'g>,
) -> Result<SourceBlocks<'g>, Error> {
    validate_exception_table(bytecode, exceptions)?;

    let mut starts: BTreeSet<usize> = BTreeSet::new();
    let mut live: BTreeSet<usize> = BTreeSet::new();
    let mut work: Vec<usize> = vec![0];
    starts.insert(0);

    loop {
        while let Some(offset) = work.pop() {
            trace_live_code(bytecode, offset, &mut starts, &mut live, &mut work)?;
        }

        // Exception ranges covering any live code become live too
        for handler in exceptions.handlers() {
            let protects_live_code = live
                .range(handler.start_pc..handler.end_pc)
                .next()
                .is_some();
            if protects_live_code {
                starts.insert(handler.start_pc);
                if handler.end_pc < bytecode.len() {
                    starts.insert(handler.end_pc);
                }
                starts.insert(handler.handler_pc);
                if !live.contains(&handler.handler_pc) {
                    work.push(handler.handler_pc);
                }
            }
        }

        if work.is_empty() {
            break;
        }
    }

    let mut blocks = BTreeMap::new();
    for start in starts.iter().copied().filter(|start| live.contains(start)) {
        let block = build_block(bytecode, exceptions, &starts, start)?;
        log::trace!(
            "Source block {:?} [{:04x}, {:04x}) -> {:?}",
            block.label,
            block.start,
            block.end,
            block.successors
        );
        blocks.insert(block.label, block);
    }

    Ok(SourceBlocks { blocks })
}

/// Follow straight-line code from `offset`, marking instructions live
fn trace_live_code(
    bytecode: &BytecodeArray,
    offset: usize,
    starts: &mut BTreeSet<usize>,
    live: &mut BTreeSet<usize>,
    work: &mut Vec<usize>,
) -> Result<(), Error> {
    let mut pc = offset;
    while live.insert(pc) {
        let (insn, length) = bytecode.decode(pc)?;
        let next = pc + length;

        for target in insn.jump_targets() {
            starts.insert(target);
            work.push(target);
        }
        if let Instruction::Jsr(_) = insn {
            if next >= bytecode.len() {
                return Err(Error::from(VerifyErrorKind::FallOffEnd(next))
                    .with_context(ErrorContext::Instruction { offset: pc }));
            }
            starts.insert(next);
            work.push(next);
        }

        if insn.is_terminal() {
            break;
        }
        if next >= bytecode.len() {
            return Err(Error::from(VerifyErrorKind::FallOffEnd(next))
                .with_context(ErrorContext::Instruction { offset: pc }));
        }
        if ends_block(&insn) {
            starts.insert(next);
            work.push(next);
            break;
        }
        pc = next;
    }
    Ok(())
}

fn build_block<'g>(
    bytecode: &BytecodeArray<'_, 'g>,
    exceptions: &ExceptionTable<'g>,
    starts: &BTreeSet<usize>,
    start: usize,
) -> Result<SourceBlock<'g>, Error> {
    let mut pc = start;
    loop {
        let (insn, length) = bytecode.decode(pc)?;
        let next = pc + length;

        if !ends_block(&insn) && !starts.contains(&next) {
            pc = next;
            continue;
        }

        let successors: Vec<usize> = match &insn {
            Instruction::Jsr(target) => vec![next, *target],
            Instruction::Ret(_) => vec![],
            Instruction::TableSwitch {
                default, targets, ..
            } => targets.iter().copied().chain(Some(*default)).collect(),
            Instruction::LookupSwitch { default, targets } => targets
                .iter()
                .map(|(_, target)| *target)
                .chain(Some(*default))
                .collect(),
            Instruction::Goto(target) => vec![*target],
            Instruction::If(_, target)
            | Instruction::IfICmp(_, target)
            | Instruction::IfACmp(_, target)
            | Instruction::IfNull(_, target) => vec![next, *target],
            other if other.is_terminal() => vec![],
            _ => vec![next],
        };

        let catches = if insn.can_throw() {
            exceptions.catches_at(pc)
        } else {
            vec![]
        };

        return Ok(SourceBlock {
            label: Label(start),
            start,
            end: next,
            last: pc,
            successors: successors.into_iter().map(Label).collect(),
            catches,
        });
    }
}

fn validate_exception_table(
    bytecode: &BytecodeArray,
    exceptions: &ExceptionTable,
) -> Result<(), Error> {
    for handler in exceptions.handlers() {
        let end_is_valid =
            handler.end_pc == bytecode.len() || bytecode.is_instruction_start(handler.end_pc);
        if !bytecode.is_instruction_start(handler.start_pc)
            || handler.start_pc >= handler.end_pc
            || !end_is_valid
        {
            return Err(Error::from(VerifyErrorKind::BadBranchTarget(handler.start_pc))
                .with_context(ErrorContext::Instruction {
                    offset: handler.start_pc,
                }));
        }
        if !bytecode.is_instruction_start(handler.handler_pc) {
            return Err(Error::from(VerifyErrorKind::BadBranchTarget(handler.handler_pc))
                .with_context(ErrorContext::Instruction {
                    offset: handler.handler_pc,
                }));
        }
    }
    Ok(())
}
