use super::{ClassId, FieldType, MethodDescriptor, RefType, UnqualifiedName};
use crate::errors::VerifyErrorKind;
use crate::util::{Offset, OffsetResult, OffsetVec, Width};
use std::borrow::Cow;
use std::fmt;

/// Index into the constant pool
#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct ConstantIndex(pub u16);

/// A field reference, resolved against the class graph
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct FieldRef<'g> {
    pub class: ClassId<'g>,
    pub name: UnqualifiedName,
    pub descriptor: FieldType<ClassId<'g>>,
}

/// A method reference, resolved against the class graph
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct MethodRef<'g> {
    pub class: RefType<ClassId<'g>>,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor<ClassId<'g>>,

    /// Did this come from an `InterfaceMethodref` entry?
    pub is_interface: bool,
}

/// Call site of an `invokedynamic`
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct InvokeDynamicRef<'g> {
    pub bootstrap_method_attr_index: u16,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor<ClassId<'g>>,
}

/// Kinds of method handle constants
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-5.html#jvms-5.4.3.5
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum HandleKind {
    GetField,
    GetStatic,
    PutField,
    PutStatic,
    InvokeVirtual,
    InvokeStatic,
    InvokeSpecial,
    NewInvokeSpecial,
    InvokeInterface,
}

/// Method handle constant
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct MethodHandleRef<'g> {
    pub kind: HandleKind,
    pub class: ClassId<'g>,
    pub name: UnqualifiedName,
}

/// Constant, either sitting in the pool or embedded in an instruction or IR instruction
///
/// Pool entries are already resolved: class names are interned into the class graph and
/// descriptors are parsed.
#[derive(Clone, PartialEq)]
pub enum Constant<'g> {
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),

    /// Only ever embedded (eg. `aconst_null`), never in the pool
    Null,
    String(Cow<'static, str>),
    Class(RefType<ClassId<'g>>),
    FieldRef(FieldRef<'g>),
    MethodRef(MethodRef<'g>),
    InvokeDynamic(InvokeDynamicRef<'g>),
    MethodType(MethodDescriptor<ClassId<'g>>),
    MethodHandle(MethodHandleRef<'g>),
}

impl<'g> Constant<'g> {
    /// Can this constant be pushed by `ldc` and friends?
    pub fn is_loadable(&self) -> bool {
        !matches!(
            self,
            Constant::FieldRef(_) | Constant::MethodRef(_) | Constant::InvokeDynamic(_)
        )
    }

    /// Is this a numeric constant?
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Constant::Integer(_) | Constant::Float(_) | Constant::Long(_) | Constant::Double(_)
        )
    }
}

impl<'g> Width for Constant<'g> {
    fn width(&self) -> usize {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }
}

impl<'g> fmt::Debug for Constant<'g> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Integer(integer) => write!(f, "{}", integer),
            Constant::Float(float) => write!(f, "{}f", float),
            Constant::Long(long) => write!(f, "{}L", long),
            Constant::Double(double) => write!(f, "{}d", double),
            Constant::Null => f.write_str("null"),
            Constant::String(string) => write!(f, "{:?}", string),
            Constant::Class(class) => write!(f, "{:?}.class", class),
            Constant::FieldRef(field) => field.fmt(f),
            Constant::MethodRef(method) => method.fmt(f),
            Constant::InvokeDynamic(indy) => indy.fmt(f),
            Constant::MethodType(descriptor) => write!(f, "MethodType{:?}", descriptor),
            Constant::MethodHandle(handle) => handle.fmt(f),
        }
    }
}

impl<'g> fmt::Debug for FieldRef<'g> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}.{:?}:{:?}", self.class, self.name, self.descriptor)
    }
}

impl<'g> fmt::Debug for MethodRef<'g> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}.{:?}{:?}", self.class, self.name, self.descriptor)
    }
}

impl<'g> fmt::Debug for InvokeDynamicRef<'g> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[bsm#{}]{:?}{:?}",
            self.bootstrap_method_attr_index, self.name, self.descriptor
        )
    }
}

impl<'g> fmt::Debug for MethodHandleRef<'g> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{:?}.{:?}", self.kind, self.class, self.name)
    }
}

/// Resolved constant pool of the class a method belongs to
///
/// Reading and resolving the raw class file pool is the container reader's job; this just holds
/// the result and answers lookups by index the way the bytecode refers to them.
pub struct ConstantsPool<'g> {
    constants: OffsetVec<Constant<'g>>,
}

impl<'g> ConstantsPool<'g> {
    /// Make a fresh empty constants pool
    pub fn new() -> ConstantsPool<'g> {
        ConstantsPool {
            constants: OffsetVec::new_starting_at(Offset(1)),
        }
    }

    /// Push a constant into the constant pool, provided there is space for it
    ///
    /// Note: the largest valid index is 65535, indexing starts at 1, and some constants take two
    /// spaces.
    pub fn push(&mut self, constant: Constant<'g>) -> Result<ConstantIndex, VerifyErrorKind> {
        let Offset(offset) = self.constants.offset_len();

        if offset + constant.width() <= u16::MAX.into() {
            let _ = self.constants.push(constant);
            Ok(ConstantIndex(offset as u16))
        } else {
            Err(VerifyErrorKind::ConstantPoolOverflow)
        }
    }

    /// Get a constant from the pool
    pub fn get(&self, index: ConstantIndex) -> Result<&Constant<'g>, VerifyErrorKind> {
        match self.constants.get_offset(Offset(index.0 as usize)) {
            OffsetResult::Ok(constant) => Ok(constant),
            OffsetResult::InvalidOffset(_) | OffsetResult::TooLarge => {
                Err(VerifyErrorKind::BadConstant(index.0))
            }
        }
    }

    pub fn get_field(&self, index: ConstantIndex) -> Result<&FieldRef<'g>, VerifyErrorKind> {
        match self.get(index)? {
            Constant::FieldRef(field) => Ok(field),
            _ => Err(VerifyErrorKind::BadConstant(index.0)),
        }
    }

    pub fn get_method(&self, index: ConstantIndex) -> Result<&MethodRef<'g>, VerifyErrorKind> {
        match self.get(index)? {
            Constant::MethodRef(method) => Ok(method),
            _ => Err(VerifyErrorKind::BadConstant(index.0)),
        }
    }

    pub fn get_class(
        &self,
        index: ConstantIndex,
    ) -> Result<&RefType<ClassId<'g>>, VerifyErrorKind> {
        match self.get(index)? {
            Constant::Class(class) => Ok(class),
            _ => Err(VerifyErrorKind::BadConstant(index.0)),
        }
    }

    pub fn get_invoke_dynamic(
        &self,
        index: ConstantIndex,
    ) -> Result<&InvokeDynamicRef<'g>, VerifyErrorKind> {
        match self.get(index)? {
            Constant::InvokeDynamic(indy) => Ok(indy),
            _ => Err(VerifyErrorKind::BadConstant(index.0)),
        }
    }

    /// Constant pushed by `ldc` or `ldc_w` (single-slot loadable constants)
    pub fn get_loadable(&self, index: ConstantIndex) -> Result<&Constant<'g>, VerifyErrorKind> {
        match self.get(index)? {
            constant if constant.is_loadable() && constant.width() == 1 => Ok(constant),
            _ => Err(VerifyErrorKind::BadConstant(index.0)),
        }
    }

    /// Constant pushed by `ldc2_w`
    pub fn get_loadable_wide(
        &self,
        index: ConstantIndex,
    ) -> Result<&Constant<'g>, VerifyErrorKind> {
        match self.get(index)? {
            constant @ (Constant::Long(_) | Constant::Double(_)) => Ok(constant),
            _ => Err(VerifyErrorKind::BadConstant(index.0)),
        }
    }
}

impl<'g> Default for ConstantsPool<'g> {
    fn default() -> Self {
        ConstantsPool::new()
    }
}
