use super::bytecode::opcodes;
use super::bytecode::opcodes::*;
use super::{
    BaseType, CompareMode, Constant, ConstantIndex, ConstantsPool, EqComparison, Instruction,
    InvokeType, OrdComparison, RefType, ShiftType,
};
use crate::errors::{Error, ErrorContext, ErrorContextExt, VerifyErrorKind};
use byteorder::{BigEndian, ReadBytesExt};
use std::collections::BTreeSet;
use std::io::Cursor;

/// Random-access decoder over the bytes of a `Code` attribute
///
/// Construction makes one linear pass over the code, which checks that every byte belongs to a
/// well-formed instruction, resolves every constant pool reference, and checks that every branch
/// target lands on an instruction boundary. After that, `decode` can be called at any boundary.
///
/// When array literal fusion is enabled, `decode` on a `newarray` recognizes the initializer
/// sequence `javac` emits for array literals and returns it as a single instruction spanning the
/// whole sequence.
pub struct BytecodeArray<'a, 'g> {
    code: &'a [u8],
    constants: &'a ConstantsPool<'g>,

    /// Indexed by offset: does a raw instruction start here?
    boundaries: Vec<bool>,

    /// Offsets something else may jump into (branch targets, exception range bounds, handlers)
    entry_points: BTreeSet<usize>,

    fuse_array_literals: bool,
}

impl<'a, 'g> BytecodeArray<'a, 'g> {
    /// Decode and validate code
    ///
    /// `protected_offsets` are the offsets mentioned by the exception table: they are considered
    /// entry points, so no fused array literal spans across them.
    pub fn new(
        code: &'a [u8],
        constants: &'a ConstantsPool<'g>,
        protected_offsets: impl IntoIterator<Item = usize>,
        fuse_array_literals: bool,
    ) -> Result<BytecodeArray<'a, 'g>, Error> {
        let mut array = BytecodeArray {
            code,
            constants,
            boundaries: vec![false; code.len()],
            entry_points: protected_offsets.into_iter().collect(),
            fuse_array_literals,
        };

        let mut branches: Vec<(usize, usize)> = vec![];
        let mut offset = 0;
        while offset < code.len() {
            let (insn, length) = array.decode_raw(offset)?;
            array.boundaries[offset] = true;
            for target in insn.jump_targets() {
                branches.push((offset, target));
            }
            offset += length;
        }

        for (offset, target) in branches {
            if !array.is_instruction_start(target) {
                return Err(Error::from(VerifyErrorKind::BadBranchTarget(target))
                    .with_context(ErrorContext::Instruction { offset }));
            }
            array.entry_points.insert(target);
        }

        Ok(array)
    }

    /// Length of the code in bytes
    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Does an instruction start at this offset?
    pub fn is_instruction_start(&self, offset: usize) -> bool {
        self.boundaries.get(offset).copied().unwrap_or(false)
    }

    /// Offset of the raw instruction immediately before the one at `offset`
    pub fn previous_offset(&self, offset: usize) -> Option<usize> {
        let upto = offset.min(self.boundaries.len());
        self.boundaries[..upto].iter().rposition(|is_start| *is_start)
    }

    /// Decode the instruction at an offset, returning it and its length in bytes
    pub fn decode(&self, offset: usize) -> Result<(Instruction<'g>, usize), Error> {
        let (insn, length) = self.decode_raw(offset)?;
        if let Instruction::NewArray {
            element_type,
            initializer: None,
        } = insn
        {
            if self.fuse_array_literals {
                if let Some((values, fused_length)) =
                    self.array_literal(offset, element_type, length)
                {
                    log::trace!(
                        "Fused {} element array literal at {:04x}",
                        values.len(),
                        offset
                    );
                    let fused = Instruction::NewArray {
                        element_type,
                        initializer: Some(values),
                    };
                    return Ok((fused, fused_length));
                }
            }
        }
        Ok((insn, length))
    }

    /// Recognize `iconst n; newarray T; (dup; iconst i; <value>; Tastore){n}`
    ///
    /// Returns the element values and the length of the sequence starting from the `newarray`.
    fn array_literal(
        &self,
        offset: usize,
        element_type: BaseType,
        newarray_length: usize,
    ) -> Option<(Vec<Constant<'g>>, usize)> {
        let count = match self.decode_raw(self.previous_offset(offset)?).ok()?.0 {
            Instruction::IConst(count) if count > 0 => count as usize,
            _ => return None,
        };

        let mut cursor = offset + newarray_length;
        let mut values = Vec::with_capacity(count);
        let next = |expected_entry: &mut usize| -> Option<Instruction<'g>> {
            if self.entry_points.contains(&*expected_entry) {
                return None;
            }
            let (insn, length) = self.decode_raw(*expected_entry).ok()?;
            *expected_entry += length;
            Some(insn)
        };

        for index in 0..count {
            if next(&mut cursor)? != Instruction::Dup {
                return None;
            }
            match next(&mut cursor)? {
                Instruction::IConst(i) if i as usize == index => (),
                _ => return None,
            }
            let value = match (element_type, next(&mut cursor)?) {
                (
                    BaseType::Int
                    | BaseType::Short
                    | BaseType::Char
                    | BaseType::Byte
                    | BaseType::Boolean,
                    Instruction::IConst(i),
                ) => Constant::Integer(i),
                (BaseType::Long, Instruction::LConst(l)) => Constant::Long(l),
                (BaseType::Float, Instruction::FConst(f)) => Constant::Float(f),
                (BaseType::Double, Instruction::DConst(d)) => Constant::Double(d),
                (
                    BaseType::Int
                    | BaseType::Short
                    | BaseType::Char
                    | BaseType::Byte
                    | BaseType::Boolean,
                    Instruction::Ldc(constant @ Constant::Integer(_)),
                ) => constant,
                (BaseType::Long, Instruction::Ldc(constant @ Constant::Long(_))) => constant,
                (BaseType::Float, Instruction::Ldc(constant @ Constant::Float(_))) => constant,
                (BaseType::Double, Instruction::Ldc(constant @ Constant::Double(_))) => constant,
                _ => return None,
            };
            let store_matches = matches!(
                (element_type, next(&mut cursor)?),
                (BaseType::Int, Instruction::IAStore)
                    | (BaseType::Long, Instruction::LAStore)
                    | (BaseType::Float, Instruction::FAStore)
                    | (BaseType::Double, Instruction::DAStore)
                    | (BaseType::Byte | BaseType::Boolean, Instruction::BAStore)
                    | (BaseType::Char, Instruction::CAStore)
                    | (BaseType::Short, Instruction::SAStore)
            );
            if !store_matches {
                return None;
            }
            values.push(value);
        }

        Some((values, cursor - offset))
    }

    /// Decode exactly one instruction from the class file, without any fusing
    fn decode_raw(&self, offset: usize) -> Result<(Instruction<'g>, usize), Error> {
        self.decode_raw_kind(offset)
            .context(ErrorContext::Instruction { offset })
    }

    fn decode_raw_kind(&self, offset: usize) -> Result<(Instruction<'g>, usize), VerifyErrorKind> {
        use Instruction::*;

        let mut cursor = Cursor::new(self.code);
        cursor.set_position(offset as u64);
        let bytes = &mut cursor;

        let opcode = read_u8(bytes)?;
        let insn = match opcode {
            NOP => Nop,
            ACONST_NULL => AConstNull,
            ICONST_M1..=ICONST_5 => IConst(opcode as i32 - ICONST_0 as i32),
            LCONST_0 | LCONST_1 => LConst((opcode - LCONST_0) as i64),
            FCONST_0..=FCONST_2 => FConst((opcode - FCONST_0) as f32),
            DCONST_0 | DCONST_1 => DConst((opcode - DCONST_0) as f64),
            BIPUSH => IConst(read_i8(bytes)? as i32),
            SIPUSH => IConst(read_i16(bytes)? as i32),
            LDC => {
                let index = ConstantIndex(read_u8(bytes)? as u16);
                Ldc(self.constants.get_loadable(index)?.clone())
            }
            LDC_W => {
                let index = ConstantIndex(read_u16(bytes)?);
                Ldc(self.constants.get_loadable(index)?.clone())
            }
            LDC2_W => {
                let index = ConstantIndex(read_u16(bytes)?);
                Ldc(self.constants.get_loadable_wide(index)?.clone())
            }

            ILOAD..=ALOAD => local_insn(opcode - ILOAD, read_u8(bytes)? as u16, true),
            ILOAD_0..=ALOAD_3 => {
                let shifted = opcode - ILOAD_0;
                local_insn(shifted / 4, (shifted % 4) as u16, true)
            }
            IALOAD => IALoad,
            LALOAD => LALoad,
            FALOAD => FALoad,
            DALOAD => DALoad,
            AALOAD => AALoad,
            BALOAD => BALoad,
            CALOAD => CALoad,
            SALOAD => SALoad,
            ISTORE..=ASTORE => local_insn(opcode - ISTORE, read_u8(bytes)? as u16, false),
            ISTORE_0..=ASTORE_3 => {
                let shifted = opcode - ISTORE_0;
                local_insn(shifted / 4, (shifted % 4) as u16, false)
            }
            IASTORE => IAStore,
            LASTORE => LAStore,
            FASTORE => FAStore,
            DASTORE => DAStore,
            AASTORE => AAStore,
            BASTORE => BAStore,
            CASTORE => CAStore,
            SASTORE => SAStore,

            POP => Pop,
            POP2 => Pop2,
            DUP => Dup,
            DUP_X1 => DupX1,
            DUP_X2 => DupX2,
            DUP2 => Dup2,
            DUP2_X1 => Dup2X1,
            DUP2_X2 => Dup2X2,
            SWAP => Swap,

            IADD => IAdd,
            LADD => LAdd,
            FADD => FAdd,
            DADD => DAdd,
            ISUB => ISub,
            LSUB => LSub,
            FSUB => FSub,
            DSUB => DSub,
            IMUL => IMul,
            LMUL => LMul,
            FMUL => FMul,
            DMUL => DMul,
            IDIV => IDiv,
            LDIV => LDiv,
            FDIV => FDiv,
            DDIV => DDiv,
            IREM => IRem,
            LREM => LRem,
            FREM => FRem,
            DREM => DRem,
            INEG => INeg,
            LNEG => LNeg,
            FNEG => FNeg,
            DNEG => DNeg,
            ISHL => ISh(ShiftType::Left),
            LSHL => LSh(ShiftType::Left),
            ISHR => ISh(ShiftType::ArithmeticRight),
            LSHR => LSh(ShiftType::ArithmeticRight),
            IUSHR => ISh(ShiftType::LogicalRight),
            LUSHR => LSh(ShiftType::LogicalRight),
            IAND => IAnd,
            LAND => LAnd,
            IOR => IOr,
            LOR => LOr,
            IXOR => IXor,
            LXOR => LXor,
            IINC => IInc(read_u8(bytes)? as u16, read_i8(bytes)? as i16),

            opcodes::I2L => I2L,
            opcodes::I2F => I2F,
            opcodes::I2D => I2D,
            opcodes::L2I => L2I,
            opcodes::L2F => L2F,
            opcodes::L2D => L2D,
            opcodes::F2I => F2I,
            opcodes::F2L => F2L,
            opcodes::F2D => F2D,
            opcodes::D2I => D2I,
            opcodes::D2L => D2L,
            opcodes::D2F => D2F,
            opcodes::I2B => I2B,
            opcodes::I2C => I2C,
            opcodes::I2S => I2S,
            LCMP => LCmp,
            FCMPL => FCmp(CompareMode::L),
            FCMPG => FCmp(CompareMode::G),
            DCMPL => DCmp(CompareMode::L),
            DCMPG => DCmp(CompareMode::G),

            IFEQ..=IFLE => If(ord_comparison(opcode - IFEQ), self.branch16(offset, bytes)?),
            IF_ICMPEQ..=IF_ICMPLE => IfICmp(
                ord_comparison(opcode - IF_ICMPEQ),
                self.branch16(offset, bytes)?,
            ),
            IF_ACMPEQ => IfACmp(EqComparison::EQ, self.branch16(offset, bytes)?),
            IF_ACMPNE => IfACmp(EqComparison::NE, self.branch16(offset, bytes)?),
            IFNULL => IfNull(EqComparison::EQ, self.branch16(offset, bytes)?),
            IFNONNULL => IfNull(EqComparison::NE, self.branch16(offset, bytes)?),
            GOTO => Goto(self.branch16(offset, bytes)?),
            JSR => Jsr(self.branch16(offset, bytes)?),
            GOTO_W => Goto(self.branch32(offset, bytes)?),
            JSR_W => Jsr(self.branch32(offset, bytes)?),
            RET => Ret(read_u8(bytes)? as u16),
            TABLESWITCH => {
                skip_switch_padding(offset, bytes)?;
                let default = self.branch32(offset, bytes)?;
                let low = read_i32(bytes)?;
                let high = read_i32(bytes)?;
                if low > high {
                    return Err(VerifyErrorKind::BadSwitch { low, high });
                }
                let count = (high as i64 - low as i64 + 1) as usize;
                let mut targets = Vec::with_capacity(count.min(self.code.len()));
                for _ in 0..count {
                    targets.push(self.branch32(offset, bytes)?);
                }
                TableSwitch {
                    default,
                    low,
                    targets,
                }
            }
            LOOKUPSWITCH => {
                skip_switch_padding(offset, bytes)?;
                let default = self.branch32(offset, bytes)?;
                let pair_count = read_i32(bytes)?;
                if pair_count < 0 {
                    return Err(VerifyErrorKind::TruncatedInstruction);
                }
                let mut targets: Vec<(i32, usize)> = vec![];
                for _ in 0..pair_count {
                    let key = read_i32(bytes)?;
                    if let Some((last_key, _)) = targets.last() {
                        if *last_key >= key {
                            return Err(VerifyErrorKind::BadSwitch {
                                low: *last_key,
                                high: key,
                            });
                        }
                    }
                    targets.push((key, self.branch32(offset, bytes)?));
                }
                LookupSwitch { default, targets }
            }
            IRETURN => IReturn,
            LRETURN => LReturn,
            FRETURN => FReturn,
            DRETURN => DReturn,
            ARETURN => AReturn,
            RETURN => Return,

            GETSTATIC => GetStatic(self.constants.get_field(read_index(bytes)?)?.clone()),
            PUTSTATIC => PutStatic(self.constants.get_field(read_index(bytes)?)?.clone()),
            GETFIELD => GetField(self.constants.get_field(read_index(bytes)?)?.clone()),
            PUTFIELD => PutField(self.constants.get_field(read_index(bytes)?)?.clone()),
            INVOKEVIRTUAL | INVOKESPECIAL | INVOKESTATIC => {
                let method = self.constants.get_method(read_index(bytes)?)?.clone();
                let invoke_type = match opcode {
                    INVOKEVIRTUAL => InvokeType::Virtual,
                    INVOKESPECIAL => InvokeType::Special,
                    _ => InvokeType::Static,
                };
                Invoke(invoke_type, method)
            }
            INVOKEINTERFACE => {
                let method = self.constants.get_method(read_index(bytes)?)?.clone();
                let count = read_u8(bytes)?;
                let _zero = read_u8(bytes)?;
                Invoke(InvokeType::Interface(count), method)
            }
            INVOKEDYNAMIC => {
                let index = read_index(bytes)?;
                let _zero = read_u16(bytes)?;
                InvokeDynamic(self.constants.get_invoke_dynamic(index)?.clone())
            }
            NEW => {
                let index = read_index(bytes)?;
                match self.constants.get_class(index)? {
                    RefType::Object(class) => New(*class),
                    _ => return Err(VerifyErrorKind::BadConstant(index.0)),
                }
            }
            NEWARRAY => {
                let code = read_u8(bytes)?;
                let element_type = BaseType::from_array_type_code(code)
                    .ok_or(VerifyErrorKind::InvalidOpcode(code))?;
                NewArray {
                    element_type,
                    initializer: None,
                }
            }
            ANEWARRAY => ANewArray(self.constants.get_class(read_index(bytes)?)?.clone()),
            ARRAYLENGTH => ArrayLength,
            ATHROW => AThrow,
            CHECKCAST => CheckCast(self.constants.get_class(read_index(bytes)?)?.clone()),
            INSTANCEOF => InstanceOf(self.constants.get_class(read_index(bytes)?)?.clone()),
            MONITORENTER => MonitorEnter,
            MONITOREXIT => MonitorExit,
            MULTIANEWARRAY => {
                let index = read_index(bytes)?;
                let array_type = self.constants.get_class(index)?.clone();
                let dimensions = read_u8(bytes)?;
                if dimensions == 0 || dimensions as usize > array_type.dimensions() {
                    return Err(VerifyErrorKind::BadConstant(index.0));
                }
                MultiANewArray(array_type, dimensions)
            }
            WIDE => {
                let modified = read_u8(bytes)?;
                let index = read_u16(bytes)?;
                match modified {
                    ILOAD..=ALOAD => local_insn(modified - ILOAD, index, true),
                    ISTORE..=ASTORE => local_insn(modified - ISTORE, index, false),
                    RET => Ret(index),
                    IINC => IInc(index, read_i16(bytes)?),
                    other => return Err(VerifyErrorKind::InvalidOpcode(other)),
                }
            }
            other => return Err(VerifyErrorKind::InvalidOpcode(other)),
        };

        let length = bytes.position() as usize - offset;
        Ok((insn, length))
    }

    fn branch16(&self, offset: usize, bytes: &mut Cursor<&[u8]>) -> Result<usize, VerifyErrorKind> {
        let relative = read_i16(bytes)? as i64;
        self.branch_target(offset, relative)
    }

    fn branch32(&self, offset: usize, bytes: &mut Cursor<&[u8]>) -> Result<usize, VerifyErrorKind> {
        let relative = read_i32(bytes)? as i64;
        self.branch_target(offset, relative)
    }

    fn branch_target(&self, offset: usize, relative: i64) -> Result<usize, VerifyErrorKind> {
        let target = offset as i64 + relative;
        if target < 0 || target >= self.code.len() as i64 {
            Err(VerifyErrorKind::BadBranchTarget(target.max(0) as usize))
        } else {
            Ok(target as usize)
        }
    }
}

/// Load or store of a local variable, `kind` counting from the `i` variant
fn local_insn<'g>(kind: u8, index: u16, is_load: bool) -> Instruction<'g> {
    match (is_load, kind) {
        (true, 0) => Instruction::ILoad(index),
        (true, 1) => Instruction::LLoad(index),
        (true, 2) => Instruction::FLoad(index),
        (true, 3) => Instruction::DLoad(index),
        (true, _) => Instruction::ALoad(index),
        (false, 0) => Instruction::IStore(index),
        (false, 1) => Instruction::LStore(index),
        (false, 2) => Instruction::FStore(index),
        (false, 3) => Instruction::DStore(index),
        (false, _) => Instruction::AStore(index),
    }
}

fn ord_comparison(shifted_opcode: u8) -> OrdComparison {
    match shifted_opcode {
        0 => OrdComparison::EQ,
        1 => OrdComparison::NE,
        2 => OrdComparison::LT,
        3 => OrdComparison::GE,
        4 => OrdComparison::GT,
        _ => OrdComparison::LE,
    }
}

/// Switch operands start at the next offset that is a multiple of 4
fn skip_switch_padding(offset: usize, bytes: &mut Cursor<&[u8]>) -> Result<(), VerifyErrorKind> {
    let padding = (4 - (offset + 1) % 4) % 4;
    for _ in 0..padding {
        read_u8(bytes)?;
    }
    Ok(())
}

fn read_u8(bytes: &mut Cursor<&[u8]>) -> Result<u8, VerifyErrorKind> {
    bytes
        .read_u8()
        .map_err(|_| VerifyErrorKind::TruncatedInstruction)
}

fn read_i8(bytes: &mut Cursor<&[u8]>) -> Result<i8, VerifyErrorKind> {
    bytes
        .read_i8()
        .map_err(|_| VerifyErrorKind::TruncatedInstruction)
}

fn read_u16(bytes: &mut Cursor<&[u8]>) -> Result<u16, VerifyErrorKind> {
    bytes
        .read_u16::<BigEndian>()
        .map_err(|_| VerifyErrorKind::TruncatedInstruction)
}

fn read_i16(bytes: &mut Cursor<&[u8]>) -> Result<i16, VerifyErrorKind> {
    bytes
        .read_i16::<BigEndian>()
        .map_err(|_| VerifyErrorKind::TruncatedInstruction)
}

fn read_i32(bytes: &mut Cursor<&[u8]>) -> Result<i32, VerifyErrorKind> {
    bytes
        .read_i32::<BigEndian>()
        .map_err(|_| VerifyErrorKind::TruncatedInstruction)
}

fn read_index(bytes: &mut Cursor<&[u8]>) -> Result<ConstantIndex, VerifyErrorKind> {
    read_u16(bytes).map(ConstantIndex)
}

#[cfg(test)]
mod test {
    use super::*;

    fn decode_all<'g>(array: &BytecodeArray<'_, 'g>) -> Vec<(usize, Instruction<'g>)> {
        let mut offset = 0;
        let mut insns = vec![];
        while offset < array.len() {
            let (insn, length) = array.decode(offset).unwrap();
            insns.push((offset, insn));
            offset += length;
        }
        insns
    }

    #[test]
    fn short_forms_are_normalized() {
        let pool = ConstantsPool::new();
        let code = [
            ICONST_M1,
            BIPUSH,
            0xfe,
            SIPUSH,
            0x01,
            0x00,
            ILOAD_0 + 5, // lload_1
            ASTORE_3,
            WIDE,
            ILOAD,
            0x01,
            0x02,
            WIDE,
            IINC,
            0x00,
            0x03,
            0xff,
            0xff,
            RETURN,
        ];
        let array = BytecodeArray::new(&code, &pool, vec![], true).unwrap();
        let insns: Vec<Instruction> = decode_all(&array).into_iter().map(|(_, i)| i).collect();
        assert_eq!(
            insns,
            vec![
                Instruction::IConst(-1),
                Instruction::IConst(-2),
                Instruction::IConst(256),
                Instruction::LLoad(1),
                Instruction::AStore(3),
                Instruction::ILoad(0x0102),
                Instruction::IInc(3, -1),
                Instruction::Return,
            ]
        );
        assert_eq!(array.previous_offset(8), Some(7));
        assert_eq!(array.previous_offset(0), None);
    }

    #[test]
    fn switch_padding_and_targets() {
        let pool = ConstantsPool::new();
        // 0: iconst_0
        // 1: tableswitch (pad to 4) default=+23 low=0 high=0 [+22]
        // 23: return
        // 24: return
        let mut code = vec![ICONST_0, TABLESWITCH, 0, 0];
        code.extend_from_slice(&23i32.to_be_bytes());
        code.extend_from_slice(&0i32.to_be_bytes());
        code.extend_from_slice(&0i32.to_be_bytes());
        code.extend_from_slice(&22i32.to_be_bytes());
        assert_eq!(code.len(), 20);
        code.extend_from_slice(&[NOP, NOP, NOP, RETURN, RETURN]);

        let array = BytecodeArray::new(&code, &pool, vec![], true).unwrap();
        let (insn, length) = array.decode(1).unwrap();
        assert_eq!(length, 19);
        assert_eq!(
            insn,
            Instruction::TableSwitch {
                default: 24,
                low: 0,
                targets: vec![23],
            }
        );
    }

    #[test]
    fn branch_into_middle_of_instruction() {
        let pool = ConstantsPool::new();
        let code = [GOTO, 0x00, 0x04, SIPUSH, 0x00, 0x01, RETURN];
        let error = BytecodeArray::new(&code, &pool, vec![], true)
            .err()
            .unwrap();
        assert!(
            matches!(
                error.root_cause(),
                Error::Verify(VerifyErrorKind::BadBranchTarget(4))
            ),
            "unexpected error {:?}",
            error
        );
        assert_eq!(error.offset(), Some(0));
    }

    #[test]
    fn invalid_and_truncated() {
        let pool = ConstantsPool::new();
        let error = BytecodeArray::new(&[0xcb], &pool, vec![], true)
            .err()
            .unwrap();
        assert!(matches!(
            error.root_cause(),
            Error::Verify(VerifyErrorKind::InvalidOpcode(0xcb))
        ));

        let error = BytecodeArray::new(&[SIPUSH, 0x01], &pool, vec![], true)
            .err()
            .unwrap();
        assert!(matches!(
            error.root_cause(),
            Error::Verify(VerifyErrorKind::TruncatedInstruction)
        ));

        let error = BytecodeArray::new(&[LDC, 0x01], &pool, vec![], true)
            .err()
            .unwrap();
        assert!(matches!(
            error.root_cause(),
            Error::Verify(VerifyErrorKind::BadConstant(1))
        ));
    }

    #[test]
    fn array_literals_fuse() {
        let pool = ConstantsPool::new();
        // new int[] { 7, 9 }
        let code = [
            ICONST_0 + 2,
            NEWARRAY,
            10,
            DUP,
            ICONST_0,
            BIPUSH,
            7,
            IASTORE,
            DUP,
            ICONST_0 + 1,
            BIPUSH,
            9,
            IASTORE,
            ARETURN,
        ];

        let fused = BytecodeArray::new(&code, &pool, vec![], true).unwrap();
        let (insn, length) = fused.decode(1).unwrap();
        assert_eq!(length, 12);
        assert_eq!(
            insn,
            Instruction::NewArray {
                element_type: BaseType::Int,
                initializer: Some(vec![Constant::Integer(7), Constant::Integer(9)]),
            }
        );

        let unfused = BytecodeArray::new(&code, &pool, vec![], false).unwrap();
        let (_, length) = unfused.decode(1).unwrap();
        assert_eq!(length, 2);

        // An exception range starting inside the sequence blocks fusion
        let protected = BytecodeArray::new(&code, &pool, vec![8], true).unwrap();
        let (_, length) = protected.decode(1).unwrap();
        assert_eq!(length, 2);
    }
}
