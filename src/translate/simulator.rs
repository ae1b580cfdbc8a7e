use super::{Emitter, Simulated};
use crate::analysis::{is_possibly_assignable, AbstractType, Frame, SourceBlock, StackEntry};
use crate::errors::{Error, ErrorContext, ErrorContextExt, VerifyErrorKind};
use crate::jvm::{
    BytecodeArray, ClassId, Constant, FieldType, Instruction, InvokeType, JavaLibrary, Method,
    RefType, UnqualifiedName,
};
use crate::rop::{Label, LocalItem, RegisterLayout, RegisterSpec};
use crate::util::Width;

/// Abstract interpreter over the instructions of one source block
///
/// Simulation updates the frame in place and hands every instruction, with the registers it
/// reads and writes, to an emitter.
pub struct Simulator<'a, 'g> {
    java: &'a JavaLibrary<'g>,
    method: &'a Method<'g>,
    bytecode: &'a BytecodeArray<'a, 'g>,
    layout: RegisterLayout,
    keep_local_info: bool,
}

/// Stack shapes accepted by a shuffle instruction
///
/// Each shape is the widths of the values it consumes (bottom-most first), and the indices of
/// those values to push back, in push order.
type ShuffleShape = (&'static [usize], &'static [usize]);

const DUP: &[ShuffleShape] = &[(&[1], &[0, 0])];
const DUP_X1: &[ShuffleShape] = &[(&[1, 1], &[1, 0, 1])];
const DUP_X2: &[ShuffleShape] = &[(&[1, 1, 1], &[2, 0, 1, 2]), (&[2, 1], &[1, 0, 1])];
const DUP2: &[ShuffleShape] = &[(&[1, 1], &[0, 1, 0, 1]), (&[2], &[0, 0])];
const DUP2_X1: &[ShuffleShape] = &[(&[1, 1, 1], &[1, 2, 0, 1, 2]), (&[1, 2], &[1, 0, 1])];
const DUP2_X2: &[ShuffleShape] = &[
    (&[1, 1, 1, 1], &[2, 3, 0, 1, 2, 3]),
    (&[1, 1, 2], &[2, 0, 1, 2]),
    (&[2, 1, 1], &[1, 2, 0, 1, 2]),
    (&[2, 2], &[1, 0, 1]),
];
const SWAP: &[ShuffleShape] = &[(&[1, 1], &[1, 0])];

impl<'a, 'g> Simulator<'a, 'g> {
    pub fn new(
        java: &'a JavaLibrary<'g>,
        method: &'a Method<'g>,
        bytecode: &'a BytecodeArray<'a, 'g>,
        layout: RegisterLayout,
        keep_local_info: bool,
    ) -> Simulator<'a, 'g> {
        Simulator {
            java,
            method,
            bytecode,
            layout,
            keep_local_info,
        }
    }

    /// Run through a block, starting from (and updating) `frame`
    pub fn simulate<E: Emitter<'g>>(
        &self,
        block: &SourceBlock<'g>,
        frame: &mut Frame<'g>,
        emitter: &mut E,
    ) -> Result<(), Error> {
        let mut offset = block.start;
        while offset < block.end {
            let (insn, length) = self.bytecode.decode(offset)?;
            log::trace!("{:04x}: {:?} with stack {:?}", offset, insn, frame.stack);
            let next = offset + length;
            self.simulate_insn(offset, next, &insn, frame, emitter)
                .context(ErrorContext::Instruction { offset })?;
            offset = next;
        }
        Ok(())
    }

    fn local_item(&self, pc: usize, index: u16) -> Option<LocalItem> {
        if !self.keep_local_info {
            return None;
        }
        self.method
            .code
            .local_variables
            .lookup(pc, index)
            .map(|variable| LocalItem {
                name: variable.name.clone(),
            })
    }

    fn simulate_insn<E: Emitter<'g>>(
        &self,
        offset: usize,
        next: usize,
        insn: &Instruction<'g>,
        frame: &mut Frame<'g>,
        emitter: &mut E,
    ) -> Result<(), Error> {
        use Instruction::*;

        let java = self.java;
        let mut machine = Machine {
            java,
            layout: self.layout,
            frame,
            sources: vec![],
        };
        let mut shuffle = vec![];

        let result: Option<RegisterSpec<'g>> = match insn {
            Nop | Goto(_) => None,

            AConstNull => Some(machine.push(AbstractType::Null)?),
            IConst(_) => Some(machine.push(AbstractType::Int)?),
            LConst(_) => Some(machine.push(AbstractType::Long)?),
            FConst(_) => Some(machine.push(AbstractType::Float)?),
            DConst(_) => Some(machine.push(AbstractType::Double)?),
            Ldc(constant) => {
                let typ = match constant {
                    Constant::Integer(_) => AbstractType::Int,
                    Constant::Float(_) => AbstractType::Float,
                    Constant::Long(_) => AbstractType::Long,
                    Constant::Double(_) => AbstractType::Double,
                    Constant::String(_) => AbstractType::object(java.string),
                    Constant::Class(_) => AbstractType::object(java.class),
                    Constant::MethodType(_) => AbstractType::object(java.method_type),
                    Constant::MethodHandle(_) => AbstractType::object(java.method_handle),
                    other => {
                        return Err(Error::from(VerifyErrorKind::IncompatibleTypes {
                            expected: "loadable constant".to_string(),
                            found: format!("{:?}", other),
                        }))
                    }
                };
                Some(machine.push(typ)?)
            }

            ILoad(index) | LLoad(index) | FLoad(index) | DLoad(index) | ALoad(index) => {
                let value = machine.frame.locals.get(*index)?;
                let matches_kind = match insn {
                    ILoad(_) => value.is_int_like(),
                    LLoad(_) => value == AbstractType::Long,
                    FLoad(_) => value == AbstractType::Float,
                    DLoad(_) => value == AbstractType::Double,
                    _ => value.is_reference(),
                };
                if !matches_kind {
                    return Err(Error::from(VerifyErrorKind::IncompatibleTypes {
                        expected: load_store_kind(insn).to_string(),
                        found: value.render(),
                    }));
                }
                let source = RegisterSpec::new(self.layout.local(*index), value)
                    .with_local(self.local_item(offset, *index));
                machine.sources.push(source);
                let stack_offset = machine.frame.stack.push_local_copy(value)?;
                Some(RegisterSpec::new(self.layout.stack(stack_offset.0), value))
            }
            IStore(index) | LStore(index) | FStore(index) | DStore(index) | AStore(index) => {
                let value = match insn {
                    IStore(_) => machine.pop(AbstractType::Int)?,
                    LStore(_) => machine.pop(AbstractType::Long)?,
                    FStore(_) => machine.pop(AbstractType::Float)?,
                    DStore(_) => machine.pop(AbstractType::Double)?,
                    _ => {
                        let value = machine.pop_any(1)?.value;
                        if !value.is_reference() && !matches!(value, AbstractType::ReturnAddress(_))
                        {
                            return Err(Error::from(VerifyErrorKind::NotReference(value.render())));
                        }
                        value
                    }
                };
                machine.frame.locals.set(*index, value)?;
                machine.frame.stack.clear_local_copies();
                let result = RegisterSpec::new(self.layout.local(*index), value)
                    .with_local(self.local_item(next, *index));
                Some(result)
            }
            IInc(index, _) => {
                let value = machine.frame.locals.get(*index)?;
                if !value.is_int_like() {
                    return Err(Error::from(VerifyErrorKind::IncompatibleTypes {
                        expected: "int".to_string(),
                        found: value.render(),
                    }));
                }
                let local = self.local_item(offset, *index);
                machine.sources.push(
                    RegisterSpec::new(self.layout.local(*index), value).with_local(local.clone()),
                );
                machine.frame.locals.set(*index, AbstractType::Int)?;
                machine.frame.stack.clear_local_copies();
                Some(RegisterSpec::new(self.layout.local(*index), AbstractType::Int).with_local(local))
            }

            IALoad | LALoad | FALoad | DALoad | AALoad | BALoad | CALoad | SALoad => {
                machine.pop(AbstractType::Int)?;
                let array = machine.pop_array()?;
                let element = match array.component_type() {
                    None => null_array_element(insn),
                    Some(component) => {
                        if !array_kind_matches(insn, &component) {
                            return Err(Error::from(VerifyErrorKind::IncompatibleTypes {
                                expected: array_kind(insn).to_string(),
                                found: array.render(),
                            }));
                        }
                        component
                    }
                };
                Some(machine.push(element)?)
            }
            IAStore | LAStore | FAStore | DAStore | AAStore | BAStore | CAStore | SAStore => {
                match insn {
                    LAStore => machine.pop(AbstractType::Long)?,
                    FAStore => machine.pop(AbstractType::Float)?,
                    DAStore => machine.pop(AbstractType::Double)?,
                    AAStore => machine.pop_reference(false)?,
                    _ => machine.pop(AbstractType::Int)?,
                };
                machine.pop(AbstractType::Int)?;
                let array = machine.pop_array()?;
                if let Some(component) = array.component_type() {
                    if !array_kind_matches(insn, &component) {
                        return Err(Error::from(VerifyErrorKind::IncompatibleTypes {
                            expected: array_kind(insn).to_string(),
                            found: array.render(),
                        }));
                    }
                }
                None
            }

            Pop => {
                machine.pop_any(1)?;
                None
            }
            Pop2 => {
                let (_, top) = machine.frame.stack.peek(0)?;
                if top.width() == 2 {
                    machine.pop_any(2)?;
                } else {
                    machine.pop_any(1)?;
                    machine.pop_any(1)?;
                }
                None
            }
            Dup => {
                shuffle = machine.shuffle(DUP)?;
                None
            }
            DupX1 => {
                shuffle = machine.shuffle(DUP_X1)?;
                None
            }
            DupX2 => {
                shuffle = machine.shuffle(DUP_X2)?;
                None
            }
            Dup2 => {
                shuffle = machine.shuffle(DUP2)?;
                None
            }
            Dup2X1 => {
                shuffle = machine.shuffle(DUP2_X1)?;
                None
            }
            Dup2X2 => {
                shuffle = machine.shuffle(DUP2_X2)?;
                None
            }
            Swap => {
                shuffle = machine.shuffle(SWAP)?;
                None
            }

            IAdd | ISub | IMul | IDiv | IRem | IAnd | IOr | IXor => {
                Some(machine.binary(AbstractType::Int, AbstractType::Int)?)
            }
            LAdd | LSub | LMul | LDiv | LRem | LAnd | LOr | LXor => {
                Some(machine.binary(AbstractType::Long, AbstractType::Long)?)
            }
            FAdd | FSub | FMul | FDiv | FRem => {
                Some(machine.binary(AbstractType::Float, AbstractType::Float)?)
            }
            DAdd | DSub | DMul | DDiv | DRem => {
                Some(machine.binary(AbstractType::Double, AbstractType::Double)?)
            }
            ISh(_) => Some(machine.binary(AbstractType::Int, AbstractType::Int)?),
            LSh(_) => Some(machine.binary(AbstractType::Long, AbstractType::Int)?),
            INeg => Some(machine.unary(AbstractType::Int, AbstractType::Int)?),
            LNeg => Some(machine.unary(AbstractType::Long, AbstractType::Long)?),
            FNeg => Some(machine.unary(AbstractType::Float, AbstractType::Float)?),
            DNeg => Some(machine.unary(AbstractType::Double, AbstractType::Double)?),

            I2L => Some(machine.unary(AbstractType::Int, AbstractType::Long)?),
            I2F => Some(machine.unary(AbstractType::Int, AbstractType::Float)?),
            I2D => Some(machine.unary(AbstractType::Int, AbstractType::Double)?),
            L2I => Some(machine.unary(AbstractType::Long, AbstractType::Int)?),
            L2F => Some(machine.unary(AbstractType::Long, AbstractType::Float)?),
            L2D => Some(machine.unary(AbstractType::Long, AbstractType::Double)?),
            F2I => Some(machine.unary(AbstractType::Float, AbstractType::Int)?),
            F2L => Some(machine.unary(AbstractType::Float, AbstractType::Long)?),
            F2D => Some(machine.unary(AbstractType::Float, AbstractType::Double)?),
            D2I => Some(machine.unary(AbstractType::Double, AbstractType::Int)?),
            D2L => Some(machine.unary(AbstractType::Double, AbstractType::Long)?),
            D2F => Some(machine.unary(AbstractType::Double, AbstractType::Float)?),
            I2B => Some(machine.unary(AbstractType::Int, AbstractType::Byte)?),
            I2C => Some(machine.unary(AbstractType::Int, AbstractType::Char)?),
            I2S => Some(machine.unary(AbstractType::Int, AbstractType::Short)?),
            LCmp => Some(machine.comparison(AbstractType::Long)?),
            FCmp(_) => Some(machine.comparison(AbstractType::Float)?),
            DCmp(_) => Some(machine.comparison(AbstractType::Double)?),

            If(_, _) | TableSwitch { .. } | LookupSwitch { .. } => {
                machine.pop(AbstractType::Int)?;
                None
            }
            IfICmp(_, _) => {
                machine.pop(AbstractType::Int)?;
                machine.pop(AbstractType::Int)?;
                None
            }
            IfACmp(_, _) => {
                machine.pop_reference(true)?;
                machine.pop_reference(true)?;
                None
            }
            IfNull(_, _) => {
                machine.pop_reference(true)?;
                None
            }
            Jsr(target) => Some(machine.push(AbstractType::ReturnAddress(Label(*target)))?),
            Ret(index) => {
                let value = machine.frame.locals.get(*index)?;
                if !matches!(value, AbstractType::ReturnAddress(_)) {
                    return Err(Error::from(VerifyErrorKind::NotReturnAddress(value.render())));
                }
                machine
                    .sources
                    .push(RegisterSpec::new(self.layout.local(*index), value));
                None
            }

            IReturn | LReturn | FReturn | DReturn | AReturn | Return => {
                let return_type = self.method.descriptor.return_type.as_ref();
                let expected = return_type.map(AbstractType::from_field_type);
                let kind_matches = match (insn, expected) {
                    (Return, None) => true,
                    (IReturn, Some(expected)) => expected.is_int_like(),
                    (LReturn, Some(AbstractType::Long)) => true,
                    (FReturn, Some(AbstractType::Float)) => true,
                    (DReturn, Some(AbstractType::Double)) => true,
                    (AReturn, Some(AbstractType::Object(_))) => true,
                    _ => false,
                };
                if !kind_matches {
                    let declared = return_type.map_or_else(|| "V".to_string(), |typ| {
                        AbstractType::from_field_type(typ).render()
                    });
                    return Err(Error::from(VerifyErrorKind::BadReturn(format!(
                        "{} in method returning {}",
                        load_store_kind(insn),
                        declared
                    ))));
                }
                if let Some(expected) = expected {
                    machine.pop(expected)?;
                }
                None
            }

            GetStatic(field) => {
                Some(machine.push(AbstractType::from_field_type(&field.descriptor))?)
            }
            PutStatic(field) => {
                machine.pop(AbstractType::from_field_type(&field.descriptor))?;
                None
            }
            GetField(field) => {
                machine.pop(AbstractType::object(field.class))?;
                Some(machine.push(AbstractType::from_field_type(&field.descriptor))?)
            }
            PutField(field) => {
                machine.pop(AbstractType::from_field_type(&field.descriptor))?;
                let receiver = machine.pop_any(1)?.value;
                let is_own_uninitialized_this = matches!(
                    receiver,
                    AbstractType::UninitializedThis(class) if class == field.class
                );
                if !is_own_uninitialized_this
                    && !is_possibly_assignable(java, &AbstractType::object(field.class), &receiver)
                {
                    return Err(Error::from(VerifyErrorKind::IncompatibleTypes {
                        expected: AbstractType::object(field.class).render(),
                        found: receiver.render(),
                    }));
                }
                None
            }
            Invoke(kind, method) => {
                machine.pop_arguments(&method.descriptor.parameters)?;
                match kind {
                    InvokeType::Static => (),
                    InvokeType::Special if method.name == UnqualifiedName::INIT => {
                        let receiver = machine.pop_reference(true)?;
                        // `this` may also be handed to a superclass constructor
                        let constructs_receiver = match (&receiver, &method.class) {
                            (
                                AbstractType::Uninitialized { class, .. },
                                RefType::Object(target),
                            ) => class == target,
                            (AbstractType::UninitializedThis(class), RefType::Object(target)) => {
                                class == target || class.superclass == Some(*target)
                            }
                            _ => false,
                        };
                        if !constructs_receiver {
                            return Err(Error::from(VerifyErrorKind::IncompatibleTypes {
                                expected: format!(
                                    "uninitialized {}",
                                    AbstractType::Object(method.class).render()
                                ),
                                found: receiver.render(),
                            }));
                        }
                        machine.frame.make_initialized(&receiver);
                    }
                    InvokeType::Interface(_) => {
                        machine.pop_reference(false)?;
                    }
                    InvokeType::Special | InvokeType::Virtual => {
                        machine.pop(AbstractType::Object(method.class))?;
                    }
                }
                match &method.descriptor.return_type {
                    Some(return_type) => {
                        Some(machine.push(AbstractType::from_field_type(return_type))?)
                    }
                    None => None,
                }
            }
            InvokeDynamic(call_site) => {
                machine.pop_arguments(&call_site.descriptor.parameters)?;
                match &call_site.descriptor.return_type {
                    Some(return_type) => {
                        Some(machine.push(AbstractType::from_field_type(return_type))?)
                    }
                    None => None,
                }
            }

            New(class) => Some(machine.push(AbstractType::Uninitialized {
                class: *class,
                offset,
            })?),
            NewArray { element_type, .. } => {
                machine.pop(AbstractType::Int)?;
                Some(machine.push(AbstractType::array_of(&FieldType::Base(*element_type)))?)
            }
            ANewArray(component) => {
                machine.pop(AbstractType::Int)?;
                Some(machine.push(AbstractType::array_of(&FieldType::Ref(*component)))?)
            }
            MultiANewArray(array_type, dimensions) => {
                if *dimensions == 0 || array_type.dimensions() < *dimensions as usize {
                    return Err(Error::from(VerifyErrorKind::IncompatibleTypes {
                        expected: format!("array with at least {} dimensions", dimensions),
                        found: AbstractType::Object(*array_type).render(),
                    }));
                }
                for _ in 0..*dimensions {
                    machine.pop(AbstractType::Int)?;
                }
                Some(machine.push(AbstractType::Object(*array_type))?)
            }
            ArrayLength => {
                machine.pop_array()?;
                Some(machine.push(AbstractType::Int)?)
            }
            AThrow => {
                machine.pop(AbstractType::object(java.throwable))?;
                None
            }
            CheckCast(ref_type) => {
                machine.pop_reference(false)?;
                Some(machine.push(AbstractType::Object(*ref_type))?)
            }
            InstanceOf(_) => {
                machine.pop_reference(false)?;
                Some(machine.push(AbstractType::Int)?)
            }
            MonitorEnter | MonitorExit => {
                machine.pop_reference(false)?;
                None
            }
        };

        let sources = machine.sources;
        emitter.emit(Simulated {
            offset,
            insn,
            sources,
            result,
            shuffle,
        })
    }
}

/// Frame being stepped through one instruction, collecting the registers it reads
struct Machine<'f, 'a, 'g> {
    java: &'a JavaLibrary<'g>,
    layout: RegisterLayout,
    frame: &'f mut Frame<'g>,

    /// Registers read, bottom of the stack first
    sources: Vec<RegisterSpec<'g>>,
}

impl<'f, 'a, 'g> Machine<'f, 'a, 'g> {
    fn push(&mut self, value: AbstractType<'g>) -> Result<RegisterSpec<'g>, VerifyErrorKind> {
        let offset = self.frame.stack.push(value)?;
        Ok(RegisterSpec::new(self.layout.stack(offset.0), value))
    }

    /// Pop a value of a given width, whatever its type
    fn pop_any(&mut self, width: usize) -> Result<StackEntry<'g>, VerifyErrorKind> {
        let (offset, entry) = self.frame.stack.pop_width(width)?;
        self.sources
            .insert(0, RegisterSpec::new(self.layout.stack(offset.0), entry.value));
        Ok(entry)
    }

    /// Pop a value that must be usable as `expected`
    fn pop(&mut self, expected: AbstractType<'g>) -> Result<AbstractType<'g>, VerifyErrorKind> {
        let value = self.pop_any(expected.width())?.value;
        if is_possibly_assignable(self.java, &expected, &value) {
            Ok(value)
        } else {
            Err(VerifyErrorKind::IncompatibleTypes {
                expected: expected.render(),
                found: value.render(),
            })
        }
    }

    fn pop_reference(&mut self, allow_uninitialized: bool) -> Result<AbstractType<'g>, VerifyErrorKind> {
        let value = self.pop_any(1)?.value;
        match value {
            AbstractType::Null | AbstractType::Object(_) => Ok(value),
            _ if value.is_uninitialized() => {
                if allow_uninitialized {
                    Ok(value)
                } else {
                    Err(VerifyErrorKind::UninitializedMisuse(value.render()))
                }
            }
            _ => Err(VerifyErrorKind::NotReference(value.render())),
        }
    }

    /// Pop an array (or `null`)
    fn pop_array(&mut self) -> Result<AbstractType<'g>, VerifyErrorKind> {
        let value = self.pop_any(1)?.value;
        if value == AbstractType::Null || value.is_array() {
            Ok(value)
        } else {
            Err(VerifyErrorKind::NotArray(value.render()))
        }
    }

    /// Pop call arguments (last one first)
    fn pop_arguments(
        &mut self,
        parameters: &[FieldType<ClassId<'g>>],
    ) -> Result<(), VerifyErrorKind> {
        for parameter in parameters.iter().rev() {
            self.pop(AbstractType::from_field_type(parameter))?;
        }
        Ok(())
    }

    fn unary(
        &mut self,
        operand: AbstractType<'g>,
        result: AbstractType<'g>,
    ) -> Result<RegisterSpec<'g>, VerifyErrorKind> {
        self.pop(operand)?;
        self.push(result)
    }

    /// Binary operation whose result has the type of the first operand
    fn binary(
        &mut self,
        first: AbstractType<'g>,
        second: AbstractType<'g>,
    ) -> Result<RegisterSpec<'g>, VerifyErrorKind> {
        self.pop(second)?;
        self.pop(first)?;
        self.push(first)
    }

    fn comparison(&mut self, operand: AbstractType<'g>) -> Result<RegisterSpec<'g>, VerifyErrorKind> {
        self.pop(operand)?;
        self.pop(operand)?;
        self.push(AbstractType::Int)
    }

    /// Rearrange the top of the stack according to the first matching shape
    fn shuffle(
        &mut self,
        shapes: &[ShuffleShape],
    ) -> Result<Vec<(RegisterSpec<'g>, usize)>, VerifyErrorKind> {
        let (widths, pushes) = shapes
            .iter()
            .find(|(widths, _)| self.top_widths_match(widths))
            .copied()
            .ok_or_else(|| match self.frame.stack.peek(0) {
                Ok((_, top)) => VerifyErrorKind::InvalidWidth(top.width()),
                Err(err) => err,
            })?;

        let mut entries = Vec::with_capacity(widths.len());
        for width in widths.iter().rev() {
            entries.insert(0, self.pop_any(*width)?);
        }

        let mut shuffled = Vec::with_capacity(pushes.len());
        for index in pushes {
            let entry = entries[*index];
            let offset = self.frame.stack.push_entry(entry)?;
            shuffled.push((
                RegisterSpec::new(self.layout.stack(offset.0), entry.value),
                *index,
            ));
        }
        Ok(shuffled)
    }

    /// Do the values at the top of the stack have these widths (bottom-most first)?
    fn top_widths_match(&self, widths: &[usize]) -> bool {
        widths.iter().rev().enumerate().all(|(depth, width)| {
            self.frame
                .stack
                .peek(depth)
                .map_or(false, |(_, entry)| entry.width() == *width)
        })
    }
}

/// Name of the kind of value a load, store, or return instruction expects
fn load_store_kind(insn: &Instruction) -> &'static str {
    use Instruction::*;
    match insn {
        ILoad(_) | IStore(_) | IReturn => "int",
        LLoad(_) | LStore(_) | LReturn => "long",
        FLoad(_) | FStore(_) | FReturn => "float",
        DLoad(_) | DStore(_) | DReturn => "double",
        Return => "void",
        _ => "reference",
    }
}

/// Name of the kind of array an array instruction expects
fn array_kind(insn: &Instruction) -> &'static str {
    use Instruction::*;
    match insn {
        IALoad | IAStore => "int[]",
        LALoad | LAStore => "long[]",
        FALoad | FAStore => "float[]",
        DALoad | DAStore => "double[]",
        BALoad | BAStore => "byte[] or boolean[]",
        CALoad | CAStore => "char[]",
        SALoad | SAStore => "short[]",
        _ => "reference array",
    }
}

fn array_kind_matches(insn: &Instruction, component: &AbstractType) -> bool {
    use Instruction::*;
    match insn {
        IALoad | IAStore => *component == AbstractType::Int,
        LALoad | LAStore => *component == AbstractType::Long,
        FALoad | FAStore => *component == AbstractType::Float,
        DALoad | DAStore => *component == AbstractType::Double,
        BALoad | BAStore => matches!(component, AbstractType::Byte | AbstractType::Boolean),
        CALoad | CAStore => *component == AbstractType::Char,
        SALoad | SAStore => *component == AbstractType::Short,
        _ => matches!(component, AbstractType::Object(_)),
    }
}

/// Element loaded out of an array known only to be `null`
fn null_array_element<'g>(insn: &Instruction) -> AbstractType<'g> {
    use Instruction::*;
    match insn {
        IALoad => AbstractType::Int,
        LALoad => AbstractType::Long,
        FALoad => AbstractType::Float,
        DALoad => AbstractType::Double,
        BALoad => AbstractType::Byte,
        CALoad => AbstractType::Char,
        SALoad => AbstractType::Short,
        _ => AbstractType::Null,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::bytecode::opcodes;
    use crate::jvm::{
        ClassGraph, ClassGraphArenas, Code, ConstantsPool, ExceptionTable, LocalVariableTable,
        MethodAccessFlags, MethodDescriptor, Name,
    };
    use std::rc::Rc;

    /// Emitter remembering everything it is given
    #[derive(Default)]
    struct Recorder<'g> {
        emitted: Vec<(usize, Vec<RegisterSpec<'g>>, Option<RegisterSpec<'g>>, Vec<(usize, usize)>)>,
    }

    impl<'g> Emitter<'g> for Recorder<'g> {
        fn emit(&mut self, simulated: Simulated<'_, 'g>) -> Result<(), Error> {
            let shuffle = simulated
                .shuffle
                .iter()
                .map(|(reg, index)| (reg.reg, *index))
                .collect();
            self.emitted
                .push((simulated.offset, simulated.sources, simulated.result, shuffle));
            Ok(())
        }
    }

    fn static_method<'g>(
        class: ClassId<'g>,
        parameters: Vec<FieldType<ClassId<'g>>>,
        code: Vec<u8>,
        max_locals: u16,
        max_stack: u16,
    ) -> Method<'g> {
        Method {
            class,
            name: UnqualifiedName::from_string("test".to_string()).unwrap(),
            descriptor: MethodDescriptor {
                parameters,
                return_type: None,
            },
            access_flags: MethodAccessFlags::STATIC,
            code: Code {
                max_stack,
                max_locals,
                bytecode: code,
                exception_table: ExceptionTable::new(),
                constants: Rc::new(ConstantsPool::new()),
                local_variables: LocalVariableTable::new(),
            },
        }
    }

    fn whole_block<'g>(code_len: usize) -> SourceBlock<'g> {
        SourceBlock {
            label: Label::START,
            start: 0,
            end: code_len,
            last: code_len - 1,
            successors: vec![],
            catches: vec![],
        }
    }

    #[test]
    fn category2_values_shuffle_as_one() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let java = graph.insert_java_library_types();

        // lload 0; iconst_1; dup_x2; pop; dup2; return
        let code = vec![
            opcodes::LLOAD,
            0,
            opcodes::ICONST_0 + 1,
            opcodes::DUP_X2,
            opcodes::POP,
            opcodes::DUP2,
            opcodes::RETURN,
        ];
        let method = static_method(java.string, vec![FieldType::long()], code, 2, 6);
        let constants = ConstantsPool::new();
        let bytecode = BytecodeArray::new(&method.code.bytecode, &constants, vec![], false).unwrap();
        let layout = RegisterLayout {
            max_locals: 2,
            max_stack: 6,
        };
        let simulator = Simulator::new(&java, &method, &bytecode, layout, false);

        let mut frame = Frame::new(2, 6);
        frame.locals.set(0, AbstractType::Long).unwrap();
        let mut recorder = Recorder::default();
        simulator
            .simulate(&whole_block(method.code.bytecode.len()), &mut frame, &mut recorder)
            .unwrap();

        // `dup_x2` on `long, int` copies the int beneath the long
        let (offset, sources, _, shuffle) = &recorder.emitted[2];
        assert_eq!(*offset, 3);
        assert_eq!(sources.iter().map(|reg| reg.reg).collect::<Vec<_>>(), vec![2, 4]);
        assert_eq!(shuffle, &vec![(2, 1), (3, 0), (5, 1)]);

        // `dup2` on a long duplicates a single value
        let (_, sources, _, shuffle) = &recorder.emitted[4];
        assert_eq!(sources.len(), 1);
        assert_eq!(shuffle, &vec![(3, 0), (5, 0)]);
        assert_eq!(frame.stack.depth(), 5);
    }

    #[test]
    fn splitting_a_category2_value_is_rejected() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let java = graph.insert_java_library_types();

        // lconst_0; swap
        let code = vec![opcodes::LCONST_0, opcodes::SWAP, opcodes::RETURN];
        let method = static_method(java.string, vec![], code, 0, 2);
        let constants = ConstantsPool::new();
        let bytecode = BytecodeArray::new(&method.code.bytecode, &constants, vec![], false).unwrap();
        let layout = RegisterLayout {
            max_locals: 0,
            max_stack: 2,
        };
        let simulator = Simulator::new(&java, &method, &bytecode, layout, false);

        let mut frame = Frame::new(0, 2);
        let error = simulator
            .simulate(
                &whole_block(method.code.bytecode.len()),
                &mut frame,
                &mut Recorder::default(),
            )
            .unwrap_err();
        assert_eq!(error.offset(), Some(1));
        assert!(
            matches!(error.root_cause(), Error::Verify(VerifyErrorKind::InvalidWidth(2))),
            "unexpected error {:?}",
            error
        );
    }

    #[test]
    fn loads_record_local_copies() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let java = graph.insert_java_library_types();

        // iload_0; iload_0; iadd; istore_0; return
        let code = vec![
            opcodes::ILOAD_0,
            opcodes::ILOAD_0,
            opcodes::IADD,
            opcodes::ISTORE_0,
            opcodes::RETURN,
        ];
        let method = static_method(java.string, vec![FieldType::int()], code, 1, 2);
        let constants = ConstantsPool::new();
        let bytecode = BytecodeArray::new(&method.code.bytecode, &constants, vec![], false).unwrap();
        let layout = RegisterLayout {
            max_locals: 1,
            max_stack: 2,
        };
        let simulator = Simulator::new(&java, &method, &bytecode, layout, false);

        let mut frame = Frame::new(1, 2);
        frame.locals.set(0, AbstractType::Byte).unwrap();
        let mut recorder = Recorder::default();
        simulator
            .simulate(&whole_block(method.code.bytecode.len()), &mut frame, &mut recorder)
            .unwrap();

        let (_, sources, result, _) = &recorder.emitted[1];
        assert_eq!(sources, &vec![RegisterSpec::new(0, AbstractType::Byte)]);
        assert_eq!(result, &Some(RegisterSpec::new(2, AbstractType::Byte)));

        let (_, sources, result, _) = &recorder.emitted[2];
        assert_eq!(sources.iter().map(|reg| reg.reg).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(result, &Some(RegisterSpec::new(1, AbstractType::Int)));

        assert_eq!(frame.locals.get(0), Ok(AbstractType::Int));
        assert!(frame.stack.is_empty());
    }
}
