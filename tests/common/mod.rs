#![allow(dead_code)]

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use jvm2rop::jvm::bytecode::opcodes;
use jvm2rop::jvm::{
    ClassGraph, ClassId, Code, ConstantsPool, ExceptionHandler, ExceptionTable, JavaLibrary,
    LocalVariableTable, Method, MethodAccessFlags, Name, UnqualifiedName,
};
use jvm2rop::rop::{RopBlock, RopInsn, RopMethod, RopOpcode};
use std::collections::HashMap;
use std::rc::Rc;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Minimal bytecode assembler, with named branch targets
#[derive(Default)]
pub struct Assembler {
    bytes: Vec<u8>,
    labels: HashMap<&'static str, usize>,

    /// Instruction start, position of the 16-bit offset to patch, and target
    fixups: Vec<(usize, usize, &'static str)>,

    /// Same, for the 32-bit offsets in switches
    wide_fixups: Vec<(usize, usize, &'static str)>,
}

impl Assembler {
    pub fn new() -> Assembler {
        Assembler::default()
    }

    pub fn op(&mut self, opcode: u8) -> &mut Assembler {
        self.bytes.push(opcode);
        self
    }

    pub fn op_u8(&mut self, opcode: u8, operand: u8) -> &mut Assembler {
        self.bytes.push(opcode);
        self.bytes.push(operand);
        self
    }

    pub fn op_u16(&mut self, opcode: u8, operand: u16) -> &mut Assembler {
        self.bytes.push(opcode);
        self.bytes.write_u16::<BigEndian>(operand).unwrap();
        self
    }

    /// Branch with a 16-bit relative offset to a label (placed before or after)
    pub fn branch(&mut self, opcode: u8, target: &'static str) -> &mut Assembler {
        let start = self.bytes.len();
        self.bytes.push(opcode);
        self.fixups.push((start, self.bytes.len(), target));
        self.bytes.write_i16::<BigEndian>(0).unwrap();
        self
    }

    /// `tableswitch` over `low..low + targets.len()`
    pub fn table_switch(
        &mut self,
        low: i32,
        targets: &[&'static str],
        default: &'static str,
    ) -> &mut Assembler {
        let start = self.switch_header(opcodes::TABLESWITCH, default);
        self.bytes.write_i32::<BigEndian>(low).unwrap();
        self.bytes
            .write_i32::<BigEndian>(low + targets.len() as i32 - 1)
            .unwrap();
        for target in targets {
            self.wide_offset(start, *target);
        }
        self
    }

    /// `lookupswitch` (keys must already be sorted)
    pub fn lookup_switch(
        &mut self,
        pairs: &[(i32, &'static str)],
        default: &'static str,
    ) -> &mut Assembler {
        let start = self.switch_header(opcodes::LOOKUPSWITCH, default);
        self.bytes
            .write_i32::<BigEndian>(pairs.len() as i32)
            .unwrap();
        for (key, target) in pairs {
            self.bytes.write_i32::<BigEndian>(*key).unwrap();
            self.wide_offset(start, *target);
        }
        self
    }

    fn switch_header(&mut self, opcode: u8, default: &'static str) -> usize {
        let start = self.bytes.len();
        self.bytes.push(opcode);
        while self.bytes.len() % 4 != 0 {
            self.bytes.push(0);
        }
        self.wide_offset(start, default);
        start
    }

    fn wide_offset(&mut self, start: usize, target: &'static str) {
        self.wide_fixups.push((start, self.bytes.len(), target));
        self.bytes.write_i32::<BigEndian>(0).unwrap();
    }

    pub fn label(&mut self, name: &'static str) -> &mut Assembler {
        let here = self.bytes.len();
        assert!(
            self.labels.insert(name, here).is_none(),
            "label {} placed twice",
            name
        );
        self
    }

    pub fn offset_of(&self, name: &'static str) -> usize {
        self.labels[name]
    }

    pub fn finish(&self) -> Vec<u8> {
        let mut bytes = self.bytes.clone();
        for (start, position, target) in &self.fixups {
            let target = self.labels[target];
            let relative = target as i64 - *start as i64;
            BigEndian::write_i16(&mut bytes[*position..*position + 2], relative as i16);
        }
        for (start, position, target) in &self.wide_fixups {
            let relative = self.labels[target] as i64 - *start as i64;
            BigEndian::write_i32(&mut bytes[*position..*position + 4], relative as i32);
        }
        bytes
    }
}

pub fn code<'g>(assembler: &Assembler, max_locals: u16, max_stack: u16) -> Code<'g> {
    Code {
        max_stack,
        max_locals,
        bytecode: assembler.finish(),
        exception_table: ExceptionTable::new(),
        constants: Rc::new(ConstantsPool::new()),
        local_variables: LocalVariableTable::new(),
    }
}

pub fn handler<'g>(
    start_pc: usize,
    end_pc: usize,
    handler_pc: usize,
    catch_type: Option<ClassId<'g>>,
) -> ExceptionHandler<'g> {
    ExceptionHandler {
        start_pc,
        end_pc,
        handler_pc,
        catch_type,
    }
}

pub fn method<'g>(
    graph: &'g ClassGraph<'g>,
    class: ClassId<'g>,
    name: &str,
    descriptor: &str,
    access_flags: MethodAccessFlags,
    code: Code<'g>,
) -> Method<'g> {
    Method {
        class,
        name: UnqualifiedName::from_string(name.to_string()).unwrap(),
        descriptor: graph.parse_method_descriptor(descriptor).unwrap(),
        access_flags,
        code,
    }
}

/// Class for test methods to live in
pub fn test_class<'g>(graph: &'g ClassGraph<'g>, java: &JavaLibrary<'g>) -> ClassId<'g> {
    use jvm2rop::jvm::BinaryName;
    graph.add_class(
        BinaryName::from_string("demo/Sample".to_string()).unwrap(),
        Some(java.object),
        false,
    )
}

pub fn blocks_ending_in<'m, 'g>(
    method: &'m RopMethod<'g>,
    opcode: RopOpcode,
) -> Vec<&'m RopBlock<'g>> {
    method
        .blocks()
        .filter(|block| block.last_insn().map(RopInsn::opcode) == Some(opcode))
        .collect()
}

pub fn blocks_containing<'m, 'g>(
    method: &'m RopMethod<'g>,
    opcode: RopOpcode,
) -> Vec<&'m RopBlock<'g>> {
    method
        .blocks()
        .filter(|block| block.insns.iter().any(|insn| insn.opcode() == opcode))
        .collect()
}
