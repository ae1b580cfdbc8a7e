use super::{BinaryName, Name};
use crate::errors::VerifyErrorKind;
use crate::util::{RefId, Width};

/// Utility trait for converting descriptors to their string representations
pub trait RenderDescriptor {
    /// Turn the descriptor into a string
    fn render(&self) -> String {
        let mut string = String::new();
        self.render_to(&mut string);
        string
    }

    /// Write the descriptor to a string
    fn render_to(&self, write_to: &mut String);
}

impl<'g, T: RenderDescriptor> RenderDescriptor for RefId<'g, T> {
    fn render_to(&self, write_to: &mut String) {
        self.0.render_to(write_to)
    }
}

/// Descriptors found in the constant pool
///
/// A malformed descriptor is a verification failure of the method referring to it.
pub trait ParseDescriptor: Sized {
    fn parse(source: &str) -> Result<Self, VerifyErrorKind> {
        let mut cursor = DescriptorCursor {
            source,
            position: 0,
        };
        let parsed = Self::parse_from(&mut cursor)?;
        if cursor.peek().is_some() {
            return Err(cursor.error("trailing input"));
        }
        Ok(parsed)
    }

    fn parse_from(cursor: &mut DescriptorCursor<'_>) -> Result<Self, VerifyErrorKind>;
}

/// Position inside a descriptor being parsed
pub struct DescriptorCursor<'s> {
    source: &'s str,
    position: usize,
}

impl<'s> DescriptorCursor<'s> {
    fn peek(&self) -> Option<u8> {
        self.source.as_bytes().get(self.position).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let next = self.peek()?;
        self.position += 1;
        Some(next)
    }

    /// Consume up to and including `terminator`, returning what came before it
    fn take_until(&mut self, terminator: char) -> Option<&'s str> {
        let rest = &self.source[self.position..];
        let length = rest.find(terminator)?;
        self.position += length + terminator.len_utf8();
        Some(&rest[..length])
    }

    fn error(&self, problem: &str) -> VerifyErrorKind {
        VerifyErrorKind::BadDescriptor(format!(
            "{} at {} in {:?}",
            problem, self.position, self.source
        ))
    }
}

/// Primitive value types
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub enum BaseType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
}

impl BaseType {
    /// Decode the `atype` operand of `newarray`
    pub fn from_array_type_code(code: u8) -> Option<BaseType> {
        Some(match code {
            4 => BaseType::Boolean,
            5 => BaseType::Char,
            6 => BaseType::Float,
            7 => BaseType::Double,
            8 => BaseType::Byte,
            9 => BaseType::Short,
            10 => BaseType::Int,
            11 => BaseType::Long,
            _ => return None,
        })
    }

    fn descriptor_char(&self) -> u8 {
        match self {
            BaseType::Byte => b'B',
            BaseType::Char => b'C',
            BaseType::Double => b'D',
            BaseType::Float => b'F',
            BaseType::Int => b'I',
            BaseType::Long => b'J',
            BaseType::Short => b'S',
            BaseType::Boolean => b'Z',
        }
    }

    fn from_descriptor_char(c: u8) -> Option<BaseType> {
        Some(match c {
            b'B' => BaseType::Byte,
            b'C' => BaseType::Char,
            b'D' => BaseType::Double,
            b'F' => BaseType::Float,
            b'I' => BaseType::Int,
            b'J' => BaseType::Long,
            b'S' => BaseType::Short,
            b'Z' => BaseType::Boolean,
            _ => return None,
        })
    }
}

impl Width for BaseType {
    fn width(&self) -> usize {
        match self {
            BaseType::Byte
            | BaseType::Char
            | BaseType::Float
            | BaseType::Int
            | BaseType::Short
            | BaseType::Boolean => 1,
            BaseType::Double | BaseType::Long => 2,
        }
    }
}

impl RenderDescriptor for BaseType {
    fn render_to(&self, write_to: &mut String) {
        write_to.push(self.descriptor_char() as char);
    }
}

impl ParseDescriptor for BaseType {
    fn parse_from(cursor: &mut DescriptorCursor<'_>) -> Result<Self, VerifyErrorKind> {
        match cursor.peek().and_then(BaseType::from_descriptor_char) {
            Some(base_type) => {
                cursor.bump();
                Ok(base_type)
            }
            None => Err(cursor.error("expected a primitive type")),
        }
    }
}

/// Reference type
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub enum RefType<Class> {
    Object(Class),
    ObjectArray(ArrayType<Class>),
    PrimitiveArray(ArrayType<BaseType>),
}

/// Generic array type
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct ArrayType<T> {
    /// Additional dimensions (`A[]` has 0 additional dimensions, `A[][][][]` has 3)
    pub additional_dimensions: usize,

    /// Underlying element type (`A` is the underlying element type of `A[][]`)
    pub element_type: T,
}

impl<T> ArrayType<T> {
    pub fn map<T2>(&self, map_element: impl FnOnce(&T) -> T2) -> ArrayType<T2> {
        ArrayType {
            additional_dimensions: self.additional_dimensions,
            element_type: map_element(&self.element_type),
        }
    }
}

impl<T: RenderDescriptor> RenderDescriptor for ArrayType<T> {
    fn render_to(&self, write_to: &mut String) {
        for _ in 0..=self.additional_dimensions {
            write_to.push('[');
        }
        self.element_type.render_to(write_to);
    }
}

impl RenderDescriptor for BinaryName {
    fn render_to(&self, write_to: &mut String) {
        write_to.push('L');
        write_to.push_str(self.as_str());
        write_to.push(';');
    }
}

impl ParseDescriptor for BinaryName {
    fn parse_from(cursor: &mut DescriptorCursor<'_>) -> Result<Self, VerifyErrorKind> {
        if cursor.bump() != Some(b'L') {
            return Err(cursor.error("expected `L`"));
        }
        let name = cursor
            .take_until(';')
            .ok_or_else(|| cursor.error("unterminated class name"))?;
        BinaryName::from_string(name.to_string()).map_err(|msg| cursor.error(&msg))
    }
}

impl<C: RenderDescriptor> RenderDescriptor for RefType<C> {
    fn render_to(&self, write_to: &mut String) {
        match self {
            RefType::Object(cls) => cls.render_to(write_to),
            RefType::PrimitiveArray(arr) => arr.render_to(write_to),
            RefType::ObjectArray(arr) => arr.render_to(write_to),
        }
    }
}

impl<C: ParseDescriptor> ParseDescriptor for RefType<C> {
    fn parse_from(cursor: &mut DescriptorCursor<'_>) -> Result<Self, VerifyErrorKind> {
        let mut dimensions = 0;
        while cursor.peek() == Some(b'[') {
            cursor.bump();
            dimensions += 1;
        }
        if dimensions > 255 {
            return Err(cursor.error("more than 255 array dimensions"));
        }

        let is_object = cursor.peek() == Some(b'L');
        Ok(match (dimensions, is_object) {
            (0, true) => RefType::Object(C::parse_from(cursor)?),
            (0, false) => return Err(cursor.error("expected a reference type")),
            (n, true) => RefType::ObjectArray(ArrayType {
                additional_dimensions: n - 1,
                element_type: C::parse_from(cursor)?,
            }),
            (n, false) => RefType::PrimitiveArray(ArrayType {
                additional_dimensions: n - 1,
                element_type: BaseType::parse_from(cursor)?,
            }),
        })
    }
}

impl<C> RefType<C> {
    pub fn map<C2>(&self, map_class: impl FnOnce(&C) -> C2) -> RefType<C2> {
        match self {
            RefType::Object(cls) => RefType::Object(map_class(cls)),
            RefType::PrimitiveArray(arr) => RefType::PrimitiveArray(*arr),
            RefType::ObjectArray(arr) => RefType::ObjectArray(arr.map(map_class)),
        }
    }

    pub fn array(field_type: FieldType<C>) -> RefType<C> {
        match field_type {
            FieldType::Base(element_type) => RefType::PrimitiveArray(ArrayType {
                additional_dimensions: 0,
                element_type,
            }),
            FieldType::Ref(RefType::Object(element_type)) => RefType::ObjectArray(ArrayType {
                additional_dimensions: 0,
                element_type,
            }),
            FieldType::Ref(RefType::PrimitiveArray(arr)) => RefType::PrimitiveArray(ArrayType {
                additional_dimensions: arr.additional_dimensions + 1,
                element_type: arr.element_type,
            }),
            FieldType::Ref(RefType::ObjectArray(arr)) => RefType::ObjectArray(ArrayType {
                additional_dimensions: arr.additional_dimensions + 1,
                element_type: arr.element_type,
            }),
        }
    }

    pub fn is_array(&self) -> bool {
        !matches!(self, RefType::Object(_))
    }

    /// Number of array dimensions (`0` for a plain class)
    pub fn dimensions(&self) -> usize {
        match self {
            RefType::Object(_) => 0,
            RefType::PrimitiveArray(arr) => arr.additional_dimensions + 1,
            RefType::ObjectArray(arr) => arr.additional_dimensions + 1,
        }
    }
}

impl<C: Clone> RefType<C> {
    /// Type of the elements of an array type (`None` for a plain class)
    ///
    /// This strips only one dimension: the component type of `int[][]` is `int[]`.
    pub fn component_type(&self) -> Option<FieldType<C>> {
        match self {
            RefType::Object(_) => None,
            RefType::PrimitiveArray(arr) => Some(match arr.additional_dimensions {
                0 => FieldType::Base(arr.element_type),
                n => FieldType::Ref(RefType::PrimitiveArray(ArrayType {
                    additional_dimensions: n - 1,
                    element_type: arr.element_type,
                })),
            }),
            RefType::ObjectArray(arr) => Some(match arr.additional_dimensions {
                0 => FieldType::Ref(RefType::Object(arr.element_type.clone())),
                n => FieldType::Ref(RefType::ObjectArray(ArrayType {
                    additional_dimensions: n - 1,
                    element_type: arr.element_type.clone(),
                })),
            }),
        }
    }
}

/// Type of a class, instance, or local variable
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum FieldType<Class> {
    Base(BaseType),
    Ref(RefType<Class>),
}

impl<C> Width for FieldType<C> {
    fn width(&self) -> usize {
        match self {
            FieldType::Base(base_type) => base_type.width(),
            FieldType::Ref(_) => 1,
        }
    }
}

impl<C> FieldType<C> {
    pub fn array(field_type: FieldType<C>) -> FieldType<C> {
        FieldType::Ref(RefType::array(field_type))
    }

    pub const fn object(class_name: C) -> FieldType<C> {
        FieldType::Ref(RefType::Object(class_name))
    }

    pub const fn int() -> FieldType<C> {
        FieldType::Base(BaseType::Int)
    }

    pub const fn long() -> FieldType<C> {
        FieldType::Base(BaseType::Long)
    }

    pub fn map<C2>(&self, map_class: impl FnOnce(&C) -> C2) -> FieldType<C2> {
        match self {
            FieldType::Base(base_type) => FieldType::Base(*base_type),
            FieldType::Ref(ref_type) => FieldType::Ref(ref_type.map(map_class)),
        }
    }
}

impl<C: RenderDescriptor> RenderDescriptor for FieldType<C> {
    fn render_to(&self, write_to: &mut String) {
        match self {
            FieldType::Base(base_type) => base_type.render_to(write_to),
            FieldType::Ref(reference_type) => reference_type.render_to(write_to),
        }
    }
}

impl<C: ParseDescriptor> ParseDescriptor for FieldType<C> {
    fn parse_from(cursor: &mut DescriptorCursor<'_>) -> Result<Self, VerifyErrorKind> {
        match cursor.peek() {
            Some(b'L' | b'[') => RefType::parse_from(cursor).map(FieldType::Ref),
            _ => BaseType::parse_from(cursor).map(FieldType::Base),
        }
    }
}

/// Signature of a method
#[derive(PartialEq, Eq, Hash, Debug, Clone)]
pub struct MethodDescriptor<Class> {
    pub parameters: Vec<FieldType<Class>>,
    pub return_type: Option<FieldType<Class>>, // `None` is for `void` (ie. no return)
}

impl<C> MethodDescriptor<C> {
    /// Total length of parameters (not the same as the length of the vector),
    /// which must be 255 or less for it to be valid
    pub fn parameter_length(&self, has_this_param: bool) -> usize {
        let this_len = if has_this_param { 1 } else { 0 };
        this_len + self.parameters.iter().map(Width::width).sum::<usize>()
    }

    pub fn map<C2>(&self, map_class: impl Fn(&C) -> C2) -> MethodDescriptor<C2> {
        MethodDescriptor {
            parameters: self
                .parameters
                .iter()
                .map(|param| param.map(&map_class))
                .collect(),
            return_type: self.return_type.as_ref().map(|ret| ret.map(&map_class)),
        }
    }
}

impl<C: RenderDescriptor> RenderDescriptor for MethodDescriptor<C> {
    fn render_to(&self, write_to: &mut String) {
        write_to.push('(');
        for parameter in &self.parameters {
            parameter.render_to(write_to);
        }
        write_to.push(')');
        match &self.return_type {
            None => write_to.push('V'),
            Some(typ) => typ.render_to(write_to),
        };
    }
}

impl<C: ParseDescriptor> ParseDescriptor for MethodDescriptor<C> {
    fn parse_from(cursor: &mut DescriptorCursor<'_>) -> Result<Self, VerifyErrorKind> {
        if cursor.bump() != Some(b'(') {
            return Err(cursor.error("expected `(`"));
        }
        let mut parameters = vec![];
        loop {
            match cursor.peek() {
                Some(b')') => break,
                None => return Err(cursor.error("unterminated parameter list")),
                Some(_) => parameters.push(FieldType::parse_from(cursor)?),
            }
        }
        cursor.bump();

        let return_type = if cursor.peek() == Some(b'V') {
            cursor.bump();
            None
        } else {
            Some(FieldType::parse_from(cursor)?)
        };
        Ok(MethodDescriptor {
            parameters,
            return_type,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn method_descriptor_round_trip() {
        let source = "(I[[JLjava/lang/String;)[Ljava/lang/Object;";
        let descriptor = MethodDescriptor::<BinaryName>::parse(source).unwrap();
        assert_eq!(descriptor.parameters.len(), 3);
        assert_eq!(descriptor.parameter_length(true), 4);
        assert_eq!(descriptor.render(), source);
    }

    #[test]
    fn component_types() {
        let ints = RefType::<BinaryName>::parse("[[I").unwrap();
        let component = ints.component_type().unwrap();
        assert_eq!(component.render(), "[I");
        assert!(matches!(
            RefType::<BinaryName>::parse("[I")
                .unwrap()
                .component_type(),
            Some(FieldType::Base(BaseType::Int))
        ));
        let objects = RefType::<BinaryName>::parse("[Ljava/lang/String;").unwrap();
        assert_eq!(objects.component_type().unwrap().render(), "Ljava/lang/String;");
        assert_eq!(objects.dimensions(), 1);
    }

    #[test]
    fn bad_descriptors() {
        assert!(FieldType::<BinaryName>::parse("Q").is_err());
        assert!(FieldType::<BinaryName>::parse("Ljava/lang/String").is_err());
        assert!(FieldType::<BinaryName>::parse("[").is_err());
        assert!(MethodDescriptor::<BinaryName>::parse("I)V").is_err());
        assert!(MethodDescriptor::<BinaryName>::parse("(I").is_err());

        let error = MethodDescriptor::<BinaryName>::parse("(I)VV").unwrap_err();
        assert!(
            matches!(&error, VerifyErrorKind::BadDescriptor(msg) if msg.contains("trailing")),
            "unexpected error {:?}",
            error
        );
    }
}
