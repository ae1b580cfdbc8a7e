use super::Settings;
use crate::analysis::AbstractType;
use crate::errors::{Error, VerifyErrorKind};
use crate::jvm::{
    ClassId, CompareMode, Constant, FieldRef, FieldType, Instruction, InvokeType, JavaLibrary,
    Method, MethodDescriptor, MethodRef, RefType, ShiftType, UnqualifiedName,
};
use crate::rop::{CatchType, Label, RegisterLayout, RegisterSpec, RopInsn, RopOpcode, SourcePosition};

/// Instruction after simulation, with the registers it reads and writes
#[derive(Debug)]
pub struct Simulated<'a, 'g> {
    /// Bytecode offset of the instruction
    pub offset: usize,
    pub insn: &'a Instruction<'g>,

    /// Registers read, in operand order (receiver first for calls, array first for array stores)
    pub sources: Vec<RegisterSpec<'g>>,

    /// Register written, for instructions producing one value
    pub result: Option<RegisterSpec<'g>>,

    /// For stack shuffles (the `dup` family and `swap`): each pushed value, along with the index
    /// in `sources` of the value it copies
    pub shuffle: Vec<(RegisterSpec<'g>, usize)>,
}

/// How control leaves a simulated block
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum BlockExit {
    /// Falls through or branches to the successors of the source block
    Normal,

    /// Returns from the method (through the shared return block, in synchronized methods)
    Return,

    /// Only leaves by throwing
    Throw,

    /// Calls the subroutine starting at the label
    Jsr(Label),

    /// Returns from the subroutine starting at the label
    Ret(Label),
}

/// Consumer of simulated instructions
pub trait Emitter<'g> {
    fn emit(&mut self, simulated: Simulated<'_, 'g>) -> Result<(), Error>;
}

/// Output of a `RopEmitter` for one block
#[derive(Debug)]
pub struct EmittedBlock<'g> {
    /// Straight-line runs of instructions
    ///
    /// Every segment but the last ends in an instruction that can throw. The segments after the
    /// first each become their own block.
    pub segments: Vec<Vec<RopInsn<'g>>>,
    pub exit: BlockExit,
}

/// Emitter producing register IR
///
/// One emitter is used per block: the catch types given at construction apply to every throwing
/// instruction it emits.
pub struct RopEmitter<'a, 'g> {
    java: &'a JavaLibrary<'g>,
    settings: &'a Settings,
    method: &'a Method<'g>,
    layout: RegisterLayout,
    catches: Vec<CatchType<'g>>,
    segments: Vec<Vec<RopInsn<'g>>>,

    /// Has the last segment been ended by a throwing instruction?
    segment_closed: bool,
    exit: BlockExit,
}

impl<'a, 'g> RopEmitter<'a, 'g> {
    pub fn new(
        java: &'a JavaLibrary<'g>,
        settings: &'a Settings,
        method: &'a Method<'g>,
        layout: RegisterLayout,
        catches: Vec<CatchType<'g>>,
    ) -> RopEmitter<'a, 'g> {
        RopEmitter {
            java,
            settings,
            method,
            layout,
            catches,
            segments: vec![vec![]],
            segment_closed: false,
            exit: BlockExit::Normal,
        }
    }

    pub fn finish(self) -> EmittedBlock<'g> {
        EmittedBlock {
            segments: self.segments,
            exit: self.exit,
        }
    }

    fn push(&mut self, insn: RopInsn<'g>) {
        if self.segment_closed {
            self.segments.push(vec![]);
            self.segment_closed = false;
        }
        self.segment_closed = insn.can_throw();
        if let Some(segment) = self.segments.last_mut() {
            segment.push(insn);
        }
    }

    fn plain(
        &mut self,
        opcode: RopOpcode,
        position: SourcePosition,
        result: Option<RegisterSpec<'g>>,
        sources: Vec<RegisterSpec<'g>>,
    ) {
        self.push(RopInsn::Plain {
            opcode,
            position,
            result,
            sources,
        });
    }

    fn plain_cst(
        &mut self,
        opcode: RopOpcode,
        position: SourcePosition,
        result: Option<RegisterSpec<'g>>,
        sources: Vec<RegisterSpec<'g>>,
        constant: Constant<'g>,
    ) {
        self.push(RopInsn::PlainCst {
            opcode,
            position,
            result,
            sources,
            constant,
        });
    }

    /// Throwing instruction, whose result (if any) is picked up by a `move-result-pseudo`
    fn throwing(
        &mut self,
        opcode: RopOpcode,
        position: SourcePosition,
        result: Option<RegisterSpec<'g>>,
        sources: Vec<RegisterSpec<'g>>,
        constant: Option<Constant<'g>>,
    ) {
        let catches = self.catches.clone();
        self.push(match constant {
            None => RopInsn::Throwing {
                opcode,
                position,
                sources,
                catches,
            },
            Some(constant) => RopInsn::ThrowingCst {
                opcode,
                position,
                sources,
                catches,
                constant,
            },
        });
        if let Some(result) = result {
            self.plain(RopOpcode::MoveResultPseudo, position, Some(result), vec![]);
        }
    }

    /// Call-like instruction, whose result (if any) is picked up by a `move-result`
    fn call(
        &mut self,
        opcode: RopOpcode,
        position: SourcePosition,
        result: Option<RegisterSpec<'g>>,
        sources: Vec<RegisterSpec<'g>>,
        constant: Constant<'g>,
    ) {
        let catches = self.catches.clone();
        self.push(RopInsn::Call {
            opcode,
            position,
            sources,
            catches,
            constant,
        });
        if let Some(result) = result {
            self.plain(RopOpcode::MoveResult, position, Some(result), vec![]);
        }
    }

    fn goto(&mut self, position: SourcePosition) {
        self.plain(RopOpcode::Goto, position, None, vec![]);
    }

    /// Move every shuffled value through temporaries, so that no move clobbers a value another
    /// move still has to read
    fn shuffle(
        &mut self,
        position: SourcePosition,
        sources: &[RegisterSpec<'g>],
        shuffle: &[(RegisterSpec<'g>, usize)],
    ) -> Result<(), Error> {
        let mut moves = vec![];
        for (result, index) in shuffle {
            let source = sources
                .get(*index)
                .ok_or(VerifyErrorKind::StackUnderflow)?;
            let is_return_address = matches!(source.typ, AbstractType::ReturnAddress(_));
            if result.reg != source.reg && !is_return_address {
                moves.push((result.clone(), *index));
            }
        }
        if moves.is_empty() {
            return Ok(());
        }

        let mut next_temporary = self.layout.temporaries();
        let mut temporaries = Vec::with_capacity(sources.len());
        for source in sources {
            let temporary = RegisterSpec::new(next_temporary, source.typ);
            next_temporary = temporary.next_reg();
            if !matches!(source.typ, AbstractType::ReturnAddress(_)) {
                self.plain(
                    RopOpcode::Move,
                    position,
                    Some(temporary.clone()),
                    vec![source.clone()],
                );
            }
            temporaries.push(temporary);
        }
        for (result, index) in moves {
            let temporary = temporaries[index].clone();
            self.plain(RopOpcode::Move, position, Some(result), vec![temporary]);
        }
        Ok(())
    }

    fn invoke_opcode(&self, kind: InvokeType, method: &MethodRef<'g>) -> Result<RopOpcode, Error> {
        Ok(match kind {
            InvokeType::Static => {
                if method.is_interface {
                    self.settings.require_api(
                        "invoke-static on an interface method",
                        Settings::INTERFACE_METHOD_API,
                    )?;
                }
                RopOpcode::InvokeStatic
            }
            InvokeType::Special => {
                if method.is_interface {
                    self.settings.require_api(
                        "invoke-special on an interface method",
                        Settings::INTERFACE_METHOD_API,
                    )?;
                }
                if method.name == UnqualifiedName::INIT
                    || method.class == RefType::Object(self.method.class)
                {
                    RopOpcode::InvokeDirect
                } else {
                    RopOpcode::InvokeSuper
                }
            }
            InvokeType::Virtual => {
                let is_signature_polymorphic = method.class
                    == RefType::Object(self.java.method_handle)
                    && (method.name == UnqualifiedName::INVOKE
                        || method.name == UnqualifiedName::INVOKEEXACT);
                if is_signature_polymorphic {
                    self.settings.require_api(
                        "invoke-polymorphic",
                        Settings::INVOKE_POLYMORPHIC_API,
                    )?;
                    RopOpcode::InvokePolymorphic
                } else {
                    RopOpcode::InvokeVirtual
                }
            }
            InvokeType::Interface(_) => RopOpcode::InvokeInterface,
        })
    }

    /// `multianewarray` has no register counterpart, so it goes through reflection:
    ///
    /// ```text
    /// filled-new-array {dims...}, [I
    /// const-class <component>            (or `sget` of `TYPE` for primitive components)
    /// invoke-static {class, dims}, java/lang/reflect/Array.newInstance
    /// check-cast <array type>
    /// ```
    fn multi_new_array(
        &mut self,
        position: SourcePosition,
        array_type: &RefType<ClassId<'g>>,
        dimensions: usize,
        result: RegisterSpec<'g>,
        sources: Vec<RegisterSpec<'g>>,
    ) -> Result<(), Error> {
        let int_array = RefType::array(FieldType::int());
        let dimensions_reg = RegisterSpec::new(
            self.layout.temporaries(),
            AbstractType::Object(int_array),
        );
        let class_reg = RegisterSpec::new(
            dimensions_reg.next_reg(),
            AbstractType::object(self.java.class),
        );

        let mut component = FieldType::Ref(*array_type);
        for _ in 0..dimensions {
            component = match component {
                FieldType::Ref(ref_type) => ref_type.component_type(),
                FieldType::Base(_) => None,
            }
            .ok_or_else(|| VerifyErrorKind::IncompatibleTypes {
                expected: format!("array with at least {} dimensions", dimensions),
                found: format!("{:?}", array_type),
            })?;
        }

        self.call(
            RopOpcode::FilledNewArray,
            position,
            Some(dimensions_reg.clone()),
            sources,
            Constant::Class(int_array),
        );
        match component {
            FieldType::Base(base_type) => self.throwing(
                RopOpcode::GetStatic,
                position,
                Some(class_reg.clone()),
                vec![],
                Some(Constant::FieldRef(FieldRef {
                    class: self.java.box_class(base_type),
                    name: UnqualifiedName::TYPE,
                    descriptor: FieldType::object(self.java.class),
                })),
            ),
            FieldType::Ref(ref_type) => self.throwing(
                RopOpcode::Const,
                position,
                Some(class_reg.clone()),
                vec![],
                Some(Constant::Class(ref_type)),
            ),
        }

        let new_instance = MethodRef {
            class: RefType::Object(self.java.reflect_array),
            name: UnqualifiedName::NEWINSTANCE,
            descriptor: MethodDescriptor {
                parameters: vec![FieldType::object(self.java.class), FieldType::Ref(int_array)],
                return_type: Some(FieldType::object(self.java.object)),
            },
            is_interface: false,
        };
        let untyped = result.with_type(AbstractType::object(self.java.object));
        self.call(
            RopOpcode::InvokeStatic,
            position,
            Some(untyped.clone()),
            vec![class_reg, dimensions_reg],
            Constant::MethodRef(new_instance),
        );
        self.throwing(
            RopOpcode::CheckCast,
            position,
            Some(result),
            vec![untyped],
            Some(Constant::Class(*array_type)),
        );
        Ok(())
    }
}

/// Class constant naming the type of a freshly allocated array
fn array_class<'g>(result: &RegisterSpec<'g>) -> Result<Constant<'g>, Error> {
    match result.typ {
        AbstractType::Object(ref_type) if ref_type.is_array() => Ok(Constant::Class(ref_type)),
        other => Err(Error::from(VerifyErrorKind::NotArray(other.render()))),
    }
}

fn expect_result<'g>(result: Option<RegisterSpec<'g>>) -> Result<RegisterSpec<'g>, Error> {
    result.ok_or_else(|| Error::from(VerifyErrorKind::StackUnderflow))
}

impl<'a, 'g> Emitter<'g> for RopEmitter<'a, 'g> {
    fn emit(&mut self, simulated: Simulated<'_, 'g>) -> Result<(), Error> {
        use Instruction::*;

        let position = SourcePosition::at(simulated.offset);
        let Simulated {
            insn,
            sources,
            result,
            shuffle,
            ..
        } = simulated;

        match insn {
            Nop | Pop | Pop2 => (),

            AConstNull => self.plain_cst(RopOpcode::Const, position, result, sources, Constant::Null),
            IConst(value) => self.plain_cst(
                RopOpcode::Const,
                position,
                result,
                sources,
                Constant::Integer(*value),
            ),
            LConst(value) => {
                self.plain_cst(RopOpcode::Const, position, result, sources, Constant::Long(*value))
            }
            FConst(value) => self.plain_cst(
                RopOpcode::Const,
                position,
                result,
                sources,
                Constant::Float(*value),
            ),
            DConst(value) => self.plain_cst(
                RopOpcode::Const,
                position,
                result,
                sources,
                Constant::Double(*value),
            ),
            Ldc(constant) => {
                if constant.is_primitive() {
                    self.plain_cst(RopOpcode::Const, position, result, sources, constant.clone());
                } else {
                    match constant {
                        Constant::MethodHandle(_) => self.settings.require_api(
                            "const-method-handle",
                            Settings::CONST_METHOD_HANDLE_API,
                        )?,
                        Constant::MethodType(_) => self.settings.require_api(
                            "const-method-type",
                            Settings::CONST_METHOD_HANDLE_API,
                        )?,
                        _ => (),
                    }
                    self.throwing(
                        RopOpcode::Const,
                        position,
                        result,
                        sources,
                        Some(constant.clone()),
                    );
                }
            }

            ILoad(_) | LLoad(_) | FLoad(_) | DLoad(_) | ALoad(_) | IStore(_) | LStore(_)
            | FStore(_) | DStore(_) | AStore(_) => {
                let result = expect_result(result)?;
                if !matches!(result.typ, AbstractType::ReturnAddress(_)) {
                    self.plain(RopOpcode::Move, position, Some(result), sources);
                }
            }
            IInc(_, increment) => self.plain_cst(
                RopOpcode::Add,
                position,
                result,
                sources,
                Constant::Integer(*increment as i32),
            ),

            IALoad | LALoad | FALoad | DALoad | AALoad | BALoad | CALoad | SALoad => {
                self.throwing(RopOpcode::Aget, position, result, sources, None)
            }
            IAStore | LAStore | FAStore | DAStore | AAStore | BAStore | CAStore | SAStore => {
                // Stores take the value first
                let mut sources = sources;
                sources.rotate_right(1);
                self.throwing(RopOpcode::Aput, position, None, sources, None)
            }

            Dup | DupX1 | DupX2 | Dup2 | Dup2X1 | Dup2X2 | Swap => {
                self.shuffle(position, &sources, &shuffle)?
            }

            IAdd | LAdd | FAdd | DAdd => self.plain(RopOpcode::Add, position, result, sources),
            ISub | LSub | FSub | DSub => self.plain(RopOpcode::Sub, position, result, sources),
            IMul | LMul | FMul | DMul => self.plain(RopOpcode::Mul, position, result, sources),
            FDiv | DDiv => self.plain(RopOpcode::Div, position, result, sources),
            FRem | DRem => self.plain(RopOpcode::Rem, position, result, sources),
            IDiv | LDiv => self.throwing(RopOpcode::Div, position, result, sources, None),
            IRem | LRem => self.throwing(RopOpcode::Rem, position, result, sources, None),
            INeg | LNeg | FNeg | DNeg => self.plain(RopOpcode::Neg, position, result, sources),
            ISh(shift) | LSh(shift) => {
                let opcode = match shift {
                    ShiftType::Left => RopOpcode::Shl,
                    ShiftType::ArithmeticRight => RopOpcode::Shr,
                    ShiftType::LogicalRight => RopOpcode::Ushr,
                };
                self.plain(opcode, position, result, sources)
            }
            IAnd | LAnd => self.plain(RopOpcode::And, position, result, sources),
            IOr | LOr => self.plain(RopOpcode::Or, position, result, sources),
            IXor | LXor => self.plain(RopOpcode::Xor, position, result, sources),

            I2L | I2F | I2D | L2I | L2F | L2D | F2I | F2L | F2D | D2I | D2L | D2F => {
                self.plain(RopOpcode::Conv, position, result, sources)
            }
            I2B => self.plain(RopOpcode::ToByte, position, result, sources),
            I2C => self.plain(RopOpcode::ToChar, position, result, sources),
            I2S => self.plain(RopOpcode::ToShort, position, result, sources),
            LCmp | FCmp(CompareMode::L) | DCmp(CompareMode::L) => {
                self.plain(RopOpcode::Cmpl, position, result, sources)
            }
            FCmp(CompareMode::G) | DCmp(CompareMode::G) => {
                self.plain(RopOpcode::Cmpg, position, result, sources)
            }

            If(comparison, _) | IfICmp(comparison, _) => {
                self.plain(RopOpcode::If(*comparison), position, None, sources)
            }
            IfACmp(comparison, _) | IfNull(comparison, _) => {
                self.plain(RopOpcode::If((*comparison).into()), position, None, sources)
            }
            Goto(_) => self.goto(position),
            Jsr(target) => self.exit = BlockExit::Jsr(Label(*target)),
            Ret(_) => match sources.first().map(|source| source.typ) {
                Some(AbstractType::ReturnAddress(subroutine)) => {
                    self.exit = BlockExit::Ret(subroutine)
                }
                other => {
                    let found = other.map_or_else(|| "nothing".to_string(), |typ| typ.render());
                    return Err(Error::from(VerifyErrorKind::NotReturnAddress(found)));
                }
            },
            TableSwitch { low, targets, .. } => {
                let source = sources
                    .into_iter()
                    .next()
                    .ok_or(VerifyErrorKind::StackUnderflow)?;
                let cases = (0..targets.len() as i32).map(|case| low + case).collect();
                self.push(RopInsn::Switch {
                    position,
                    source,
                    cases,
                });
            }
            LookupSwitch { targets, .. } => {
                let source = sources
                    .into_iter()
                    .next()
                    .ok_or(VerifyErrorKind::StackUnderflow)?;
                let cases = targets.iter().map(|(key, _)| *key).collect();
                self.push(RopInsn::Switch {
                    position,
                    source,
                    cases,
                });
            }
            IReturn | LReturn | FReturn | DReturn | AReturn | Return => {
                let source = sources.into_iter().next();
                if self.method.is_synchronized() {
                    // The monitor has to be released first, in the shared return block
                    if let Some(source) = source {
                        let return_type = self
                            .method
                            .descriptor
                            .return_type
                            .as_ref()
                            .map_or(source.typ, AbstractType::from_field_type);
                        let returned = RegisterSpec::new(0, return_type);
                        self.plain(RopOpcode::Move, position, Some(returned), vec![source]);
                    }
                    self.goto(position);
                } else {
                    self.plain(RopOpcode::Return, position, None, source.into_iter().collect());
                }
                self.exit = BlockExit::Return;
            }

            GetStatic(field) => self.throwing(
                RopOpcode::GetStatic,
                position,
                result,
                sources,
                Some(Constant::FieldRef(field.clone())),
            ),
            PutStatic(field) => self.throwing(
                RopOpcode::PutStatic,
                position,
                None,
                sources,
                Some(Constant::FieldRef(field.clone())),
            ),
            GetField(field) => self.throwing(
                RopOpcode::GetField,
                position,
                result,
                sources,
                Some(Constant::FieldRef(field.clone())),
            ),
            PutField(field) => self.throwing(
                RopOpcode::PutField,
                position,
                None,
                sources,
                Some(Constant::FieldRef(field.clone())),
            ),
            Invoke(kind, method) => {
                let opcode = self.invoke_opcode(*kind, method)?;
                self.call(
                    opcode,
                    position,
                    result,
                    sources,
                    Constant::MethodRef(method.clone()),
                );
            }
            InvokeDynamic(call_site) => {
                self.settings
                    .require_api("invoke-custom", Settings::INVOKE_CUSTOM_API)?;
                self.call(
                    RopOpcode::InvokeCustom,
                    position,
                    result,
                    sources,
                    Constant::InvokeDynamic(call_site.clone()),
                );
            }

            New(class) => self.throwing(
                RopOpcode::NewInstance,
                position,
                result,
                sources,
                Some(Constant::Class(RefType::Object(*class))),
            ),
            NewArray { initializer, .. } => {
                let result = expect_result(result)?;
                let class = array_class(&result)?;
                self.throwing(
                    RopOpcode::NewArray,
                    position,
                    Some(result.clone()),
                    sources,
                    Some(class),
                );
                if let Some(values) = initializer {
                    self.push(RopInsn::FillArrayData {
                        position,
                        array: result,
                        values: values.clone(),
                    });
                }
            }
            ANewArray(_) => {
                let result = expect_result(result)?;
                let class = array_class(&result)?;
                self.throwing(RopOpcode::NewArray, position, Some(result), sources, Some(class));
            }
            MultiANewArray(array_type, dimensions) => {
                let result = expect_result(result)?;
                self.multi_new_array(position, array_type, *dimensions as usize, result, sources)?;
            }
            ArrayLength => self.throwing(RopOpcode::ArrayLength, position, result, sources, None),
            AThrow => {
                self.throwing(RopOpcode::Throw, position, None, sources, None);
                self.exit = BlockExit::Throw;
            }
            CheckCast(ref_type) => self.throwing(
                RopOpcode::CheckCast,
                position,
                result,
                sources,
                Some(Constant::Class(*ref_type)),
            ),
            InstanceOf(ref_type) => self.throwing(
                RopOpcode::InstanceOf,
                position,
                result,
                sources,
                Some(Constant::Class(*ref_type)),
            ),
            MonitorEnter => self.throwing(RopOpcode::MonitorEnter, position, None, sources, None),
            MonitorExit => self.throwing(RopOpcode::MonitorExit, position, None, sources, None),
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::{
        ClassGraph, ClassGraphArenas, Code, ConstantsPool, ExceptionTable, LocalVariableTable,
        MethodAccessFlags, Name,
    };
    use std::rc::Rc;

    fn test_method<'g>(class: crate::jvm::ClassId<'g>) -> Method<'g> {
        Method {
            class,
            name: UnqualifiedName::from_string("test".to_string()).unwrap(),
            descriptor: MethodDescriptor {
                parameters: vec![],
                return_type: Some(FieldType::int()),
            },
            access_flags: MethodAccessFlags::STATIC,
            code: Code {
                max_stack: 4,
                max_locals: 2,
                bytecode: vec![],
                exception_table: ExceptionTable::new(),
                constants: Rc::new(ConstantsPool::new()),
                local_variables: LocalVariableTable::new(),
            },
        }
    }

    #[test]
    fn throwing_results_start_new_segments() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let java = graph.insert_java_library_types();
        let settings = Settings::new();
        let method = test_method(java.string);
        let layout = RegisterLayout {
            max_locals: 2,
            max_stack: 4,
        };
        let mut emitter =
            RopEmitter::new(&java, &settings, &method, layout, vec![CatchType::Any]);

        let a = RegisterSpec::new(layout.stack(0), AbstractType::Int);
        let b = RegisterSpec::new(layout.stack(1), AbstractType::Int);
        let idiv = Instruction::IDiv;
        emitter
            .emit(Simulated {
                offset: 3,
                insn: &idiv,
                sources: vec![a.clone(), b],
                result: Some(a.clone()),
                shuffle: vec![],
            })
            .unwrap();
        let ireturn = Instruction::IReturn;
        emitter
            .emit(Simulated {
                offset: 4,
                insn: &ireturn,
                sources: vec![a.clone()],
                result: None,
                shuffle: vec![],
            })
            .unwrap();

        let emitted = emitter.finish();
        assert_eq!(emitted.exit, BlockExit::Return);
        assert_eq!(emitted.segments.len(), 2);

        let first = &emitted.segments[0];
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].opcode(), RopOpcode::Div);
        assert_eq!(first[0].catches(), &[CatchType::Any]);

        let opcodes: Vec<RopOpcode> = emitted.segments[1].iter().map(RopInsn::opcode).collect();
        assert_eq!(opcodes, vec![RopOpcode::MoveResultPseudo, RopOpcode::Return]);
        assert_eq!(emitted.segments[1][1].sources(), &[a]);
    }

    #[test]
    fn dup_moves_go_through_temporaries() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let java = graph.insert_java_library_types();
        let settings = Settings::new();
        let method = test_method(java.string);
        let layout = RegisterLayout {
            max_locals: 2,
            max_stack: 4,
        };
        let mut emitter = RopEmitter::new(&java, &settings, &method, layout, vec![]);

        // `dup_x1` over `b a`, producing `a b a`
        let b = RegisterSpec::new(layout.stack(0), AbstractType::Int);
        let a = RegisterSpec::new(layout.stack(1), AbstractType::Float);
        let dup_x1 = Instruction::DupX1;
        emitter
            .emit(Simulated {
                offset: 0,
                insn: &dup_x1,
                sources: vec![b.clone(), a.clone()],
                result: None,
                shuffle: vec![
                    (RegisterSpec::new(layout.stack(0), AbstractType::Float), 1),
                    (RegisterSpec::new(layout.stack(1), AbstractType::Int), 0),
                    (RegisterSpec::new(layout.stack(2), AbstractType::Float), 1),
                ],
            })
            .unwrap();

        let emitted = emitter.finish();
        assert_eq!(emitted.segments.len(), 1);
        let moves: Vec<(usize, usize)> = emitted.segments[0]
            .iter()
            .map(|insn| (insn.result().unwrap().reg, insn.sources()[0].reg))
            .collect();
        let temp = layout.temporaries();
        assert_eq!(
            moves,
            vec![
                (temp, layout.stack(0)),
                (temp + 1, layout.stack(1)),
                (layout.stack(0), temp + 1),
                (layout.stack(1), temp),
                (layout.stack(2), temp + 1),
            ]
        );
    }

    #[test]
    fn multianewarray_goes_through_reflection() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let java = graph.insert_java_library_types();
        let settings = Settings::new();
        let method = test_method(java.string);
        let layout = RegisterLayout {
            max_locals: 0,
            max_stack: 2,
        };
        let mut emitter = RopEmitter::new(&java, &settings, &method, layout, vec![]);

        let array_type = RefType::array(FieldType::array(FieldType::int()));
        let insn = Instruction::MultiANewArray(array_type, 2);
        emitter
            .emit(Simulated {
                offset: 0,
                insn: &insn,
                sources: vec![
                    RegisterSpec::new(0, AbstractType::Int),
                    RegisterSpec::new(1, AbstractType::Int),
                ],
                result: Some(RegisterSpec::new(0, AbstractType::Object(array_type))),
                shuffle: vec![],
            })
            .unwrap();

        let emitted = emitter.finish();
        let opcodes: Vec<Vec<RopOpcode>> = emitted
            .segments
            .iter()
            .map(|segment| segment.iter().map(RopInsn::opcode).collect())
            .collect();
        assert_eq!(
            opcodes,
            vec![
                vec![RopOpcode::FilledNewArray],
                vec![RopOpcode::MoveResult, RopOpcode::GetStatic],
                vec![RopOpcode::MoveResultPseudo, RopOpcode::InvokeStatic],
                vec![RopOpcode::MoveResult, RopOpcode::CheckCast],
                vec![RopOpcode::MoveResultPseudo],
            ]
        );
        assert_eq!(
            emitted.segments[1][1].constant(),
            Some(&Constant::FieldRef(FieldRef {
                class: java.boxes.integer,
                name: UnqualifiedName::TYPE,
                descriptor: FieldType::object(java.class),
            }))
        );
    }

    #[test]
    fn invokedynamic_is_gated() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let java = graph.insert_java_library_types();
        let settings = Settings::new();
        let method = test_method(java.string);
        let layout = RegisterLayout {
            max_locals: 0,
            max_stack: 1,
        };
        let mut emitter = RopEmitter::new(&java, &settings, &method, layout, vec![]);

        let insn = Instruction::InvokeDynamic(crate::jvm::InvokeDynamicRef {
            bootstrap_method_attr_index: 0,
            name: UnqualifiedName::from_string("run".to_string()).unwrap(),
            descriptor: MethodDescriptor {
                parameters: vec![],
                return_type: None,
            },
        });
        let error = emitter
            .emit(Simulated {
                offset: 0,
                insn: &insn,
                sources: vec![],
                result: None,
                shuffle: vec![],
            })
            .unwrap_err();
        assert!(
            matches!(error, Error::Unsupported(_)),
            "unexpected error {:?}",
            error
        );
    }
}
