use super::subroutines::{CallSite, Subroutine, SubroutineInliner};
use super::{BlockExit, EmittedBlock, RopEmitter, Settings, Simulator};
use crate::analysis::{identify_blocks, AbstractType, Frame, SourceBlock, SourceBlocks};
use crate::errors::{Error, ErrorContext, ErrorContextExt, StructuralErrorKind};
use crate::jvm::{BytecodeArray, Constant, JavaLibrary, Method, RefType};
use crate::rop::{
    CatchType, Label, LabelAllocator, LabelGenerator, LocalItem, RegisterLayout, RegisterSpec,
    RopBlock, RopInsn, RopMethod, RopOpcode, SourcePosition,
};
use crate::util::Width;
use std::collections::{BTreeMap, BTreeSet};

/// Translate the body of a method into a register-based control flow graph
///
/// The translation is all or nothing: any verification, structural, or API level problem in the
/// method aborts it, with context on where the problem was found.
pub fn translate_method<'g>(
    java: &JavaLibrary<'g>,
    method: &Method<'g>,
    settings: &Settings,
) -> Result<RopMethod<'g>, Error> {
    let translated = Ropper::new(java, method, settings)
        .and_then(Ropper::translate)
        .with_context(|| ErrorContext::Method(method.display_name()))?;
    log::info!(
        "Translated {} into {} blocks",
        method.display_name(),
        translated.len()
    );
    Ok(translated)
}

/// Labels of the synthesized blocks, which come right after the last bytecode offset
#[derive(Copy, Clone, Debug)]
struct SpecialLabels {
    /// Entry: moves the parameters into their registers
    param_assignment: Label,

    /// Shared return for synchronized methods: releases the monitor
    synch_return_exit: Label,

    /// Returns after the monitor is released
    synch_return: Label,

    /// Loads the class literal (static synchronized methods)
    synch_setup_1: Label,

    /// Enters the monitor
    synch_setup_2: Label,

    /// Catch-all handler releasing the monitor
    synch_catch_1: Label,

    /// Rethrows after the monitor is released
    synch_catch_2: Label,
}

impl SpecialLabels {
    const COUNT: usize = 7;

    fn new(code_len: usize) -> SpecialLabels {
        SpecialLabels {
            param_assignment: Label(code_len),
            synch_return_exit: Label(code_len + 1),
            synch_return: Label(code_len + 2),
            synch_setup_1: Label(code_len + 3),
            synch_setup_2: Label(code_len + 4),
            synch_catch_1: Label(code_len + 5),
            synch_catch_2: Label(code_len + 6),
        }
    }
}

/// Catch edge of a block
#[derive(Copy, Clone, Debug)]
struct CatchEdge<'g> {
    catch_type: CatchType<'g>,

    /// Block the edge goes to (an exception setup stub, or the monitor release handler)
    target: Label,

    /// Source block handling the exception, past the stub
    handler: Option<Label>,
}

/// Per-method state of the translation
struct Ropper<'a, 'g> {
    java: &'a JavaLibrary<'g>,
    method: &'a Method<'g>,
    settings: &'a Settings,
    bytecode: BytecodeArray<'a, 'g>,
    source_blocks: SourceBlocks<'g>,
    layout: RegisterLayout,
    special: SpecialLabels,
    labels: LabelAllocator,

    /// Frames at the start of source blocks
    start_frames: BTreeMap<Label, Frame<'g>>,

    /// Source blocks whose start frame changed since they were last simulated
    worklist: BTreeSet<Label>,

    /// Output blocks, keyed by label
    result: BTreeMap<Label, RopBlock<'g>>,

    /// Subroutines each output block is in, outermost first
    label_subroutines: BTreeMap<Label, Vec<Label>>,

    subroutines: BTreeMap<Label, Subroutine>,

    /// Blocks ending in a `jsr`
    call_sites: BTreeMap<Label, CallSite>,

    /// Exception setup stub for each handler and caught type
    stubs: BTreeMap<(Label, CatchType<'g>), Label>,

    /// Labels for the segments (past the first) of source blocks
    segment_labels: BTreeMap<(Label, usize), Label>,
}

impl<'a, 'g> Ropper<'a, 'g> {
    fn new(
        java: &'a JavaLibrary<'g>,
        method: &'a Method<'g>,
        settings: &'a Settings,
    ) -> Result<Ropper<'a, 'g>, Error> {
        let code = &method.code;
        let bytecode = BytecodeArray::new(
            &code.bytecode,
            code.constants.as_ref(),
            code.exception_table.offsets(),
            settings.compact_array_literals,
        )?;
        let source_blocks = identify_blocks(&bytecode, &code.exception_table)?;
        let code_len = bytecode.len();

        Ok(Ropper {
            java,
            method,
            settings,
            bytecode,
            source_blocks,
            layout: RegisterLayout {
                max_locals: code.max_locals as usize,
                max_stack: code.max_stack as usize,
            },
            special: SpecialLabels::new(code_len),
            labels: LabelAllocator::new(Label(code_len + SpecialLabels::COUNT)),
            start_frames: BTreeMap::new(),
            worklist: BTreeSet::new(),
            result: BTreeMap::new(),
            label_subroutines: BTreeMap::new(),
            subroutines: BTreeMap::new(),
            call_sites: BTreeMap::new(),
            stubs: BTreeMap::new(),
            segment_labels: BTreeMap::new(),
        })
    }

    fn translate(mut self) -> Result<RopMethod<'g>, Error> {
        let parameters = self.parameter_types();
        let mut entry_frame = Frame::new(self.layout.max_locals, self.layout.max_stack);
        let mut slot = 0;
        for parameter in &parameters {
            entry_frame.locals.set(slot, *parameter)?;
            slot += parameter.width() as u16;
        }
        self.update_frame(Label::START, entry_frame);

        while let Some(label) = self.pop_worklist() {
            self.process_block(label)
                .context(ErrorContext::Block(label))?;
        }
        log::debug!(
            "Analysis done: {} blocks, {} subroutines",
            self.result.len(),
            self.subroutines.len()
        );

        self.add_param_block(&parameters);
        if self.method.is_synchronized() {
            self.add_synch_blocks();
        }
        self.add_stubs();

        let entry = self.special.param_assignment;
        SubroutineInliner::new(&self.subroutines, &self.label_subroutines, &self.call_sites)
            .inline_all(&mut self.result, entry, &mut self.labels)?;
        RopMethod::new(self.result, entry)
    }

    /// Types of the parameters (receiver first), as they are at method entry
    fn parameter_types(&self) -> Vec<AbstractType<'g>> {
        let mut types = vec![];
        if !self.method.is_static() {
            let class = self.method.class;
            types.push(if self.method.is_constructor() && class != self.java.object {
                AbstractType::UninitializedThis(class)
            } else {
                AbstractType::object(class)
            });
        }
        for parameter in &self.method.descriptor.parameters {
            types.push(AbstractType::from_field_type(parameter));
        }
        types
    }

    fn pop_worklist(&mut self) -> Option<Label> {
        let label = *self.worklist.iter().next()?;
        self.worklist.remove(&label);
        Some(label)
    }

    /// Record a new start frame, queueing the block if it changed
    fn update_frame(&mut self, label: Label, frame: Frame<'g>) {
        if self.start_frames.get(&label) != Some(&frame) {
            log::debug!("Enqueueing {:?}", label);
            log::trace!("Start frame of {:?} is now {:?}", label, frame);
            self.start_frames.insert(label, frame);
            self.worklist.insert(label);
        }
    }

    fn merge_into(&mut self, label: Label, incoming: Frame<'g>) -> Result<(), Error> {
        let merged = match self.start_frames.get(&label) {
            None => incoming,
            Some(existing) => existing
                .merge(&incoming, self.java)
                .context(ErrorContext::MergingInto(label))?,
        };
        self.update_frame(label, merged);
        Ok(())
    }

    fn local_item(&self, pc: usize, index: usize) -> Option<LocalItem> {
        if !self.settings.keep_local_info {
            return None;
        }
        self.method
            .code
            .local_variables
            .lookup(pc, index as u16)
            .map(|variable| LocalItem {
                name: variable.name.clone(),
            })
    }

    /// Label of one of the segments of a source block
    fn segment_label(&mut self, label: Label, segment: usize) -> Label {
        if segment == 0 {
            return label;
        }
        let labels = &mut self.labels;
        *self
            .segment_labels
            .entry((label, segment))
            .or_insert_with(|| labels.fresh_label())
    }

    /// Catch edges of a block, with the first handler for any given type winning
    fn catch_edges(&mut self, block: &SourceBlock<'g>) -> Vec<CatchEdge<'g>> {
        let mut edges: Vec<CatchEdge<'g>> = vec![];
        for handler in &block.catches {
            let catch_type = handler.catch_type.map_or(CatchType::Any, CatchType::Class);
            if edges.iter().any(|edge| edge.catch_type == catch_type) {
                continue;
            }
            let handler_label = Label(handler.handler_pc);
            let labels = &mut self.labels;
            let stub = *self
                .stubs
                .entry((handler_label, catch_type))
                .or_insert_with(|| labels.fresh_label());
            edges.push(CatchEdge {
                catch_type,
                target: stub,
                handler: Some(handler_label),
            });
        }

        let catches_everything = edges.iter().any(|edge| edge.catch_type == CatchType::Any);
        if self.method.is_synchronized() && !catches_everything {
            edges.push(CatchEdge {
                catch_type: CatchType::Any,
                target: self.special.synch_catch_1,
                handler: None,
            });
        }
        edges
    }

    fn process_block(&mut self, label: Label) -> Result<(), Error> {
        let block = self
            .source_blocks
            .get(label)
            .cloned()
            .ok_or(StructuralErrorKind::DanglingLabel(label))?;
        let mut frame = self
            .start_frames
            .get(&label)
            .cloned()
            .ok_or(StructuralErrorKind::DanglingLabel(label))?;
        let subroutines = frame.subroutines.clone();
        log::debug!("Processing block {:?}", label);
        log::trace!("Simulating {:?} from {:?}", label, frame);

        let catches = self.catch_edges(&block);
        let catch_types = catches.iter().map(|edge| edge.catch_type).collect();
        let mut emitter = RopEmitter::new(
            self.java,
            self.settings,
            self.method,
            self.layout,
            catch_types,
        );
        Simulator::new(
            self.java,
            self.method,
            &self.bytecode,
            self.layout,
            self.settings.keep_local_info,
        )
        .simulate(&block, &mut frame, &mut emitter)?;
        let emitted = emitter.finish();

        let can_throw = emitted
            .segments
            .iter()
            .flatten()
            .any(RopInsn::can_throw);
        let exit = emitted.exit;
        self.add_blocks(&block, emitted, &catches, &subroutines)?;

        if can_throw {
            for edge in &catches {
                if let Some(handler) = edge.handler {
                    let exception = match edge.catch_type {
                        CatchType::Any => AbstractType::object(self.java.throwable),
                        CatchType::Class(class) => AbstractType::object(class),
                    };
                    let handler_frame = frame.make_exception_handler_start_frame(exception)?;
                    self.merge_into(handler, handler_frame)?;
                }
            }
        }

        match exit {
            BlockExit::Normal => {
                let mut seen = BTreeSet::new();
                for successor in &block.successors {
                    if seen.insert(*successor) {
                        self.merge_into(*successor, frame.clone())?;
                    }
                }
            }
            BlockExit::Return | BlockExit::Throw => (),
            BlockExit::Jsr(subroutine) => self.enter_subroutine(&block, subroutine, frame)?,
            BlockExit::Ret(subroutine) => self.leave_subroutine(label, subroutine, frame)?,
        }
        Ok(())
    }

    /// Split emitted segments into output blocks
    fn add_blocks(
        &mut self,
        block: &SourceBlock<'g>,
        emitted: EmittedBlock<'g>,
        catches: &[CatchEdge<'g>],
        subroutines: &[Label],
    ) -> Result<(), Error> {
        let EmittedBlock { segments, exit } = emitted;
        let segment_count = segments.len();
        let catch_targets: Vec<Label> = catches.iter().map(|edge| edge.target).collect();

        for (index, mut insns) in segments.into_iter().enumerate() {
            let label = self.segment_label(block.label, index);

            let (mut successors, primary_successor) = if index + 1 < segment_count {
                let next = self.segment_label(block.label, index + 1);
                (vec![next], Some(next))
            } else {
                let (successors, primary) = match exit {
                    BlockExit::Normal => {
                        let ends_in_switch =
                            matches!(insns.last(), Some(RopInsn::Switch { .. }));
                        let primary = if ends_in_switch {
                            block.successors.last()
                        } else {
                            block.successors.first()
                        };
                        (block.successors.clone(), primary.copied())
                    }
                    BlockExit::Return if self.method.is_synchronized() => {
                        let shared = self.special.synch_return_exit;
                        (vec![shared], Some(shared))
                    }
                    BlockExit::Return | BlockExit::Throw | BlockExit::Ret(_) => (vec![], None),
                    BlockExit::Jsr(subroutine) => (vec![subroutine], Some(subroutine)),
                };
                let ends_block = insns
                    .last()
                    .map_or(false, |insn| insn.opcode().is_branch() || insn.can_throw());
                if !ends_block {
                    insns.push(RopInsn::Plain {
                        opcode: RopOpcode::Goto,
                        position: SourcePosition::at(block.last),
                        result: None,
                        sources: vec![],
                    });
                }
                (successors, primary)
            };

            let can_throw = insns.last().map_or(false, RopInsn::can_throw);
            if can_throw {
                successors.splice(0..0, catch_targets.iter().copied());
            } else if successors.len() > 1
                && !matches!(
                    insns.last().map(RopInsn::opcode),
                    Some(RopOpcode::If(_)) | Some(RopOpcode::Switch)
                )
            {
                return Err(Error::from(StructuralErrorKind::BadSuccessors(label)));
            }

            self.label_subroutines.insert(label, subroutines.to_vec());
            self.result.insert(
                label,
                RopBlock {
                    label,
                    insns,
                    successors,
                    primary_successor,
                    subroutine: None,
                },
            );
        }
        Ok(())
    }

    fn enter_subroutine(
        &mut self,
        block: &SourceBlock<'g>,
        subroutine: Label,
        frame: Frame<'g>,
    ) -> Result<(), Error> {
        if frame.subroutines.contains(&subroutine) {
            return Err(Error::from(StructuralErrorKind::SubroutineOrder {
                existing: frame.subroutines.clone(),
                incoming: vec![subroutine],
            }));
        }
        let return_site = *block
            .successors
            .first()
            .ok_or(StructuralErrorKind::BadSuccessors(block.label))?;

        let caller = block.label;
        self.call_sites.insert(
            caller,
            CallSite {
                subroutine,
                return_site,
            },
        );
        self.subroutines
            .entry(subroutine)
            .or_insert_with(|| Subroutine::new(subroutine))
            .callers
            .insert(caller);

        let start_frame = match self.start_frames.get(&subroutine) {
            None => frame.make_new_subroutine_start_frame(subroutine, caller, self.java),
            Some(existing) => {
                existing.merge_with_subroutine_caller(&frame, subroutine, caller, self.java)
            }
        }
        .context(ErrorContext::MergingInto(subroutine))?;
        self.update_frame(subroutine, start_frame);
        Ok(())
    }

    fn leave_subroutine(
        &mut self,
        label: Label,
        subroutine: Label,
        frame: Frame<'g>,
    ) -> Result<(), Error> {
        let callers: Vec<Label> = {
            let entry = self
                .subroutines
                .get_mut(&subroutine)
                .ok_or(StructuralErrorKind::DanglingLabel(subroutine))?;
            entry.ret_blocks.insert(label);
            entry.callers.iter().copied().collect()
        };

        for caller in callers {
            let return_site = self
                .call_sites
                .get(&caller)
                .map(|call| call.return_site)
                .ok_or(StructuralErrorKind::DanglingLabel(caller))?;
            match frame
                .sub_frame_for_label(subroutine, caller)
                .context(ErrorContext::Subroutine(subroutine))?
            {
                Some(return_frame) => self.merge_into(return_site, return_frame)?,
                None => {
                    log::trace!("No locals for {:?} returning from {:?} yet", caller, subroutine);
                    self.worklist.insert(caller);
                }
            }
        }
        Ok(())
    }

    /// Synchronized methods hold the monitor object in a dedicated register
    fn synch_reg(&self) -> RegisterSpec<'g> {
        let monitor = if self.method.is_static() {
            AbstractType::object(self.java.class)
        } else {
            AbstractType::object(self.method.class)
        };
        RegisterSpec::new(self.layout.synch(), monitor)
    }

    fn add_block(
        &mut self,
        label: Label,
        insns: Vec<RopInsn<'g>>,
        successors: Vec<Label>,
        primary_successor: Option<Label>,
    ) {
        self.label_subroutines.insert(label, vec![]);
        self.result.insert(
            label,
            RopBlock {
                label,
                insns,
                successors,
                primary_successor,
                subroutine: None,
            },
        );
    }

    /// Entry block, which moves the parameters into their registers
    fn add_param_block(&mut self, parameters: &[AbstractType<'g>]) {
        let mut insns = vec![];
        let mut reg = 0;
        for parameter in parameters {
            let result = RegisterSpec::new(self.layout.local(reg as u16), *parameter)
                .with_local(self.local_item(0, reg));
            insns.push(RopInsn::PlainCst {
                opcode: RopOpcode::MoveParam,
                position: SourcePosition::NONE,
                result: Some(result),
                sources: vec![],
                constant: Constant::Integer(reg as i32),
            });
            reg += parameter.width();
        }

        let next = if !self.method.is_synchronized() {
            Label::START
        } else if self.method.is_static() {
            self.special.synch_setup_1
        } else {
            let this = parameters
                .first()
                .map_or(AbstractType::object(self.method.class), |this| *this);
            insns.push(RopInsn::Plain {
                opcode: RopOpcode::Move,
                position: SourcePosition::NONE,
                result: Some(self.synch_reg()),
                sources: vec![RegisterSpec::new(self.layout.local(0), this)],
            });
            self.special.synch_setup_2
        };
        insns.push(RopInsn::goto());

        self.add_block(self.special.param_assignment, insns, vec![next], Some(next));
    }

    /// Monitor enter before the body, monitor exit on the way out (normally or exceptionally)
    fn add_synch_blocks(&mut self) {
        let synch = self.synch_reg();
        let special = self.special;

        let mut enter = vec![];
        if self.method.is_static() {
            let class_literal = RopInsn::ThrowingCst {
                opcode: RopOpcode::Const,
                position: SourcePosition::NONE,
                sources: vec![],
                catches: vec![],
                constant: Constant::Class(RefType::Object(self.method.class)),
            };
            self.add_block(
                special.synch_setup_1,
                vec![class_literal],
                vec![special.synch_setup_2],
                Some(special.synch_setup_2),
            );
            enter.push(RopInsn::Plain {
                opcode: RopOpcode::MoveResultPseudo,
                position: SourcePosition::NONE,
                result: Some(synch.clone()),
                sources: vec![],
            });
        }
        enter.push(RopInsn::Throwing {
            opcode: RopOpcode::MonitorEnter,
            position: SourcePosition::NONE,
            sources: vec![synch.clone()],
            catches: vec![],
        });
        self.add_block(
            special.synch_setup_2,
            enter,
            vec![Label::START],
            Some(Label::START),
        );

        let monitor_exit = RopInsn::Throwing {
            opcode: RopOpcode::MonitorExit,
            position: SourcePosition::NONE,
            sources: vec![synch],
            catches: vec![],
        };
        self.add_block(
            special.synch_return_exit,
            vec![monitor_exit.clone()],
            vec![special.synch_return],
            Some(special.synch_return),
        );
        let returned: Vec<RegisterSpec<'g>> = self
            .method
            .descriptor
            .return_type
            .as_ref()
            .map(|return_type| RegisterSpec::new(0, AbstractType::from_field_type(return_type)))
            .into_iter()
            .collect();
        let ret = RopInsn::Plain {
            opcode: RopOpcode::Return,
            position: SourcePosition::NONE,
            result: None,
            sources: returned,
        };
        self.add_block(special.synch_return, vec![ret], vec![], None);

        let exception = RegisterSpec::new(
            self.layout.temporaries(),
            AbstractType::object(self.java.throwable),
        );
        let move_exception = RopInsn::Plain {
            opcode: RopOpcode::MoveException,
            position: SourcePosition::NONE,
            result: Some(exception.clone()),
            sources: vec![],
        };
        self.add_block(
            special.synch_catch_1,
            vec![move_exception, monitor_exit],
            vec![special.synch_catch_2],
            Some(special.synch_catch_2),
        );
        let rethrow = RopInsn::Throwing {
            opcode: RopOpcode::Throw,
            position: SourcePosition::NONE,
            sources: vec![exception],
            catches: vec![],
        };
        self.add_block(special.synch_catch_2, vec![rethrow], vec![], None);
    }

    /// One block per handler and caught type, moving the exception onto the handler's stack
    fn add_stubs(&mut self) {
        let stubs: Vec<((Label, CatchType<'g>), Label)> =
            self.stubs.iter().map(|(key, stub)| (*key, *stub)).collect();
        for ((handler, catch_type), stub) in stubs {
            let handler_subroutines = match self.start_frames.get(&handler) {
                Some(frame) => frame.subroutines.clone(),
                None => continue,
            };
            let exception = match catch_type {
                CatchType::Any => AbstractType::object(self.java.throwable),
                CatchType::Class(class) => AbstractType::object(class),
            };
            let move_exception = RopInsn::Plain {
                opcode: RopOpcode::MoveException,
                position: SourcePosition::at(handler.offset()),
                result: Some(RegisterSpec::new(self.layout.stack(0), exception)),
                sources: vec![],
            };
            self.add_block(stub, vec![move_exception, RopInsn::goto()], vec![handler], Some(handler));
            self.label_subroutines.insert(stub, handler_subroutines);
        }
    }
}
