use crate::jvm::{BaseType, ClassGraph, ClassId, FieldType, JavaLibrary, RefType, RenderDescriptor};
use crate::rop::Label;
use crate::util::Width;
use std::fmt;

/// Type of a value on the operand stack or in a local variable, as tracked by the type-flow
/// analysis
///
/// Unlike the verification types of the class file format, the small integer types are kept
/// apart (so that a `byte` parameter is still known to be a `byte`) but they all collapse to
/// `Int` when two of them meet at a join.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub enum AbstractType<'g> {
    Int,
    Boolean,
    Byte,
    Char,
    Short,
    Float,
    Long,
    Double,

    /// Known to be `null`
    Null,

    /// Initialized class or array type
    Object(RefType<ClassId<'g>>),

    /// Result of the `new` instruction at `offset`, before its constructor has been called
    Uninitialized { class: ClassId<'g>, offset: usize },

    /// Receiver of a constructor, before the super (or other `this`) constructor call
    UninitializedThis(ClassId<'g>),

    /// Pushed by `jsr`: where to go back to, tagged with the start of the subroutine
    ReturnAddress(Label),
}

impl<'g> AbstractType<'g> {
    /// Type of values of a given field type
    pub fn from_field_type(field_type: &FieldType<ClassId<'g>>) -> AbstractType<'g> {
        match field_type {
            FieldType::Base(BaseType::Int) => AbstractType::Int,
            FieldType::Base(BaseType::Boolean) => AbstractType::Boolean,
            FieldType::Base(BaseType::Byte) => AbstractType::Byte,
            FieldType::Base(BaseType::Char) => AbstractType::Char,
            FieldType::Base(BaseType::Short) => AbstractType::Short,
            FieldType::Base(BaseType::Float) => AbstractType::Float,
            FieldType::Base(BaseType::Long) => AbstractType::Long,
            FieldType::Base(BaseType::Double) => AbstractType::Double,
            FieldType::Ref(ref_type) => AbstractType::Object(*ref_type),
        }
    }

    /// Field type of values of this type (if there is one)
    pub fn to_field_type(&self) -> Option<FieldType<ClassId<'g>>> {
        Some(match self {
            AbstractType::Int => FieldType::Base(BaseType::Int),
            AbstractType::Boolean => FieldType::Base(BaseType::Boolean),
            AbstractType::Byte => FieldType::Base(BaseType::Byte),
            AbstractType::Char => FieldType::Base(BaseType::Char),
            AbstractType::Short => FieldType::Base(BaseType::Short),
            AbstractType::Float => FieldType::Base(BaseType::Float),
            AbstractType::Long => FieldType::Base(BaseType::Long),
            AbstractType::Double => FieldType::Base(BaseType::Double),
            AbstractType::Object(ref_type) => FieldType::Ref(*ref_type),
            AbstractType::Null
            | AbstractType::Uninitialized { .. }
            | AbstractType::UninitializedThis(_)
            | AbstractType::ReturnAddress(_) => return None,
        })
    }

    pub fn object(class: ClassId<'g>) -> AbstractType<'g> {
        AbstractType::Object(RefType::Object(class))
    }

    /// Array whose elements have the given type
    pub fn array_of(element: &FieldType<ClassId<'g>>) -> AbstractType<'g> {
        AbstractType::Object(RefType::array(*element))
    }

    /// Does a value of this type take two slots?
    pub fn is_category2(&self) -> bool {
        matches!(self, AbstractType::Long | AbstractType::Double)
    }

    pub fn is_int_like(&self) -> bool {
        matches!(
            self,
            AbstractType::Int
                | AbstractType::Boolean
                | AbstractType::Byte
                | AbstractType::Char
                | AbstractType::Short
        )
    }

    /// Reference types, including `null` and uninitialized values
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            AbstractType::Null
                | AbstractType::Object(_)
                | AbstractType::Uninitialized { .. }
                | AbstractType::UninitializedThis(_)
        )
    }

    pub fn is_uninitialized(&self) -> bool {
        matches!(
            self,
            AbstractType::Uninitialized { .. } | AbstractType::UninitializedThis(_)
        )
    }

    pub fn is_array(&self) -> bool {
        matches!(self, AbstractType::Object(ref_type) if ref_type.is_array())
    }

    /// Type of the elements of an array type
    pub fn component_type(&self) -> Option<AbstractType<'g>> {
        match self {
            AbstractType::Object(ref_type) => ref_type
                .component_type()
                .map(|component| AbstractType::from_field_type(&component)),
            _ => None,
        }
    }

    /// Type once the constructor has been called
    pub fn initialized(&self) -> AbstractType<'g> {
        match self {
            AbstractType::Uninitialized { class, .. } | AbstractType::UninitializedThis(class) => {
                AbstractType::object(*class)
            }
            other => *other,
        }
    }

    /// Rendered type, for error messages
    pub fn render(&self) -> String {
        format!("{:?}", self)
    }
}

impl<'g> Width for AbstractType<'g> {
    fn width(&self) -> usize {
        if self.is_category2() {
            2
        } else {
            1
        }
    }
}

impl<'g> fmt::Debug for AbstractType<'g> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbstractType::Int => f.write_str("I"),
            AbstractType::Boolean => f.write_str("Z"),
            AbstractType::Byte => f.write_str("B"),
            AbstractType::Char => f.write_str("C"),
            AbstractType::Short => f.write_str("S"),
            AbstractType::Float => f.write_str("F"),
            AbstractType::Long => f.write_str("J"),
            AbstractType::Double => f.write_str("D"),
            AbstractType::Null => f.write_str("null"),
            AbstractType::Object(ref_type) => f.write_str(&ref_type.render()),
            AbstractType::Uninitialized { class, offset } => {
                write!(f, "uninit({:?}@{:04x})", class, offset)
            }
            AbstractType::UninitializedThis(class) => write!(f, "uninitThis({:?})", class),
            AbstractType::ReturnAddress(label) => write!(f, "ret({:?})", label),
        }
    }
}

/// Least type both inputs can be treated as at a control-flow join
///
/// Returns `None` when no such type exists (eg. `int` and `float`). Uninitialized values and
/// return addresses only merge with themselves.
pub fn merge_type<'g>(
    java: &JavaLibrary<'g>,
    left: &AbstractType<'g>,
    right: &AbstractType<'g>,
) -> Option<AbstractType<'g>> {
    if left == right {
        return Some(*left);
    }

    match (left, right) {
        (AbstractType::Null, AbstractType::Object(_)) => Some(*right),
        (AbstractType::Object(_), AbstractType::Null) => Some(*left),
        (AbstractType::Object(left_ref), AbstractType::Object(right_ref)) => {
            let object = AbstractType::object(java.object);
            match (left_ref.component_type(), right_ref.component_type()) {
                (Some(left_component), Some(right_component)) => {
                    let merged = merge_type(
                        java,
                        &AbstractType::from_field_type(&left_component),
                        &AbstractType::from_field_type(&right_component),
                    );
                    match merged.and_then(|merged| merged.to_field_type()) {
                        Some(merged) => Some(AbstractType::array_of(&merged)),
                        None => Some(object),
                    }
                }
                _ => Some(object),
            }
        }
        _ if left.is_int_like() && right.is_int_like() => Some(AbstractType::Int),
        _ => None,
    }
}

/// Could a value of type `sub_type` be used where `super_type` is expected?
///
/// This is permissive where the class hierarchy is unknown: two classes whose relationship the
/// class graph cannot decide are considered possibly assignable.
pub fn is_possibly_assignable<'g>(
    java: &JavaLibrary<'g>,
    super_type: &AbstractType<'g>,
    sub_type: &AbstractType<'g>,
) -> bool {
    if super_type == sub_type {
        return true;
    }
    if super_type.is_int_like() && sub_type.is_int_like() {
        return true;
    }

    match (super_type, sub_type) {
        (AbstractType::Null, _) => false,
        (AbstractType::Object(_), AbstractType::Null) => true,
        (AbstractType::Object(super_ref), AbstractType::Object(sub_ref)) => {
            is_ref_possibly_assignable(java, super_ref, sub_ref)
        }
        _ => false,
    }
}

fn is_ref_possibly_assignable<'g>(
    java: &JavaLibrary<'g>,
    super_ref: &RefType<ClassId<'g>>,
    sub_ref: &RefType<ClassId<'g>>,
) -> bool {
    match (super_ref, sub_ref) {
        (RefType::Object(super_class), _) if *super_class == java.object => true,
        // Merges widen distinct classes to `Object` and never look at interfaces
        (RefType::Object(_), RefType::Object(sub_class)) if *sub_class == java.object => true,
        (RefType::Object(super_class), RefType::Object(_)) if super_class.is_interface => true,
        (RefType::Object(super_class), RefType::Object(sub_class)) => {
            ClassGraph::is_java_assignable(sub_class, super_class).unwrap_or(true)
        }
        (RefType::Object(super_class), _) => {
            *super_class == java.cloneable || *super_class == java.serializable
        }
        (_, RefType::Object(_)) => false,
        _ => {
            // Both arrays: peel off dimensions pairwise
            let mut super_component = super_ref.component_type();
            let mut sub_component = sub_ref.component_type();
            loop {
                match (super_component, sub_component) {
                    (
                        Some(FieldType::Ref(next_super @ RefType::ObjectArray(_)))
                        | Some(FieldType::Ref(next_super @ RefType::PrimitiveArray(_))),
                        Some(FieldType::Ref(next_sub @ RefType::ObjectArray(_)))
                        | Some(FieldType::Ref(next_sub @ RefType::PrimitiveArray(_))),
                    ) => {
                        super_component = next_super.component_type();
                        sub_component = next_sub.component_type();
                    }
                    (Some(super_elem), Some(sub_elem)) => {
                        return is_possibly_assignable(
                            java,
                            &AbstractType::from_field_type(&super_elem),
                            &AbstractType::from_field_type(&sub_elem),
                        );
                    }
                    _ => return false,
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::{BinaryName, ClassGraphArenas, Name};

    fn universe<'g>(graph: &'g ClassGraph<'g>, java: &JavaLibrary<'g>) -> Vec<AbstractType<'g>> {
        let foo = graph.add_class(
            BinaryName::from_string("a/Foo".to_string()).unwrap(),
            Some(java.exception),
            false,
        );
        let unknown = graph.intern_class(BinaryName::from_string("b/Unknown".to_string()).unwrap());
        let object_array = |class: ClassId<'g>| AbstractType::array_of(&FieldType::object(class));
        vec![
            AbstractType::Int,
            AbstractType::Boolean,
            AbstractType::Byte,
            AbstractType::Char,
            AbstractType::Short,
            AbstractType::Float,
            AbstractType::Long,
            AbstractType::Double,
            AbstractType::Null,
            AbstractType::object(java.object),
            AbstractType::object(java.string),
            AbstractType::object(java.throwable),
            AbstractType::object(java.runtime_exception),
            AbstractType::object(java.cloneable),
            AbstractType::object(foo),
            AbstractType::object(unknown),
            AbstractType::array_of(&FieldType::int()),
            AbstractType::array_of(&FieldType::Base(BaseType::Byte)),
            AbstractType::array_of(&FieldType::long()),
            AbstractType::array_of(&FieldType::array(FieldType::int())),
            object_array(java.string),
            object_array(java.object),
            object_array(foo),
            AbstractType::Uninitialized {
                class: foo,
                offset: 3,
            },
            AbstractType::Uninitialized {
                class: foo,
                offset: 9,
            },
            AbstractType::UninitializedThis(foo),
            AbstractType::ReturnAddress(Label(4)),
            AbstractType::ReturnAddress(Label(12)),
        ]
    }

    #[test]
    fn merge_is_commutative() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let java = graph.insert_java_library_types();
        let types = universe(&graph, &java);

        for left in &types {
            for right in &types {
                assert_eq!(
                    merge_type(&java, left, right),
                    merge_type(&java, right, left),
                    "merging {:?} and {:?}",
                    left,
                    right
                );
            }
        }
    }

    #[test]
    fn merge_accepts_both_inputs() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let java = graph.insert_java_library_types();
        let types = universe(&graph, &java);

        for left in &types {
            for right in &types {
                if let Some(merged) = merge_type(&java, left, right) {
                    assert!(
                        is_possibly_assignable(&java, &merged, left),
                        "{:?} (merge of {:?} and {:?}) does not accept {:?}",
                        merged,
                        left,
                        right,
                        left
                    );
                    assert!(
                        is_possibly_assignable(&java, &merged, right),
                        "{:?} (merge of {:?} and {:?}) does not accept {:?}",
                        merged,
                        left,
                        right,
                        right
                    );
                    assert_eq!(merge_type(&java, &merged, left), Some(merged));
                }
            }
        }
    }

    #[test]
    fn specific_merges() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let java = graph.insert_java_library_types();
        let object = AbstractType::object(java.object);
        let string = AbstractType::object(java.string);

        assert_eq!(
            merge_type(&java, &AbstractType::Byte, &AbstractType::Char),
            Some(AbstractType::Int)
        );
        assert_eq!(merge_type(&java, &AbstractType::Int, &AbstractType::Float), None);
        assert_eq!(merge_type(&java, &AbstractType::Null, &string), Some(string));
        assert_eq!(
            merge_type(&java, &string, &AbstractType::object(java.throwable)),
            Some(object)
        );
        assert_eq!(merge_type(&java, &AbstractType::Null, &AbstractType::Int), None);
        assert_eq!(
            merge_type(
                &java,
                &AbstractType::Null,
                &AbstractType::UninitializedThis(java.object)
            ),
            None
        );

        let strings = AbstractType::array_of(&FieldType::object(java.string));
        let throwables = AbstractType::array_of(&FieldType::object(java.throwable));
        assert_eq!(
            merge_type(&java, &strings, &throwables),
            Some(AbstractType::array_of(&FieldType::object(java.object)))
        );
        assert_eq!(
            merge_type(&java, &strings, &AbstractType::array_of(&FieldType::int())),
            Some(object)
        );
    }

    #[test]
    fn assignability() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let java = graph.insert_java_library_types();
        let unknown = graph.intern_class(BinaryName::from_string("b/Unknown".to_string()).unwrap());

        let throwable = AbstractType::object(java.throwable);
        let ints = AbstractType::array_of(&FieldType::int());

        assert!(is_possibly_assignable(&java, &AbstractType::Int, &AbstractType::Boolean));
        assert!(!is_possibly_assignable(&java, &AbstractType::Long, &AbstractType::Int));
        assert!(is_possibly_assignable(&java, &throwable, &AbstractType::Null));
        assert!(!is_possibly_assignable(&java, &AbstractType::Null, &throwable));
        assert!(is_possibly_assignable(
            &java,
            &throwable,
            &AbstractType::object(java.runtime_exception)
        ));
        assert!(!is_possibly_assignable(
            &java,
            &throwable,
            &AbstractType::object(java.string)
        ));
        assert!(is_possibly_assignable(
            &java,
            &throwable,
            &AbstractType::object(unknown)
        ));
        assert!(is_possibly_assignable(
            &java,
            &throwable,
            &AbstractType::object(java.object)
        ));
        assert!(is_possibly_assignable(
            &java,
            &AbstractType::object(java.cloneable),
            &AbstractType::object(java.string)
        ));
        assert!(is_possibly_assignable(
            &java,
            &AbstractType::object(java.cloneable),
            &ints
        ));
        assert!(!is_possibly_assignable(&java, &throwable, &ints));
        assert!(!is_possibly_assignable(&java, &ints, &throwable));
        assert!(!is_possibly_assignable(
            &java,
            &AbstractType::object(java.object),
            &AbstractType::UninitializedThis(java.object)
        ));
    }
}
