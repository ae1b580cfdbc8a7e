use super::{
    BaseType, BinaryName, FieldType, MethodDescriptor, ParseDescriptor, RefType, RenderDescriptor,
};
use crate::errors::VerifyErrorKind;
use crate::util::RefId;
use elsa::map::FrozenMap;
use elsa::FrozenVec;
use std::collections::HashSet;
use std::fmt;
use std::fmt::Debug;
use typed_arena::Arena;

/// Classes are compared by identity: the graph allocates exactly one `ClassData` per name
pub type ClassId<'g> = RefId<'g, ClassData<'g>>;

pub struct ClassGraphArenas<'g> {
    class_arena: Arena<ClassData<'g>>,
}

impl<'g> ClassGraphArenas<'g> {
    pub fn new() -> Self {
        ClassGraphArenas {
            class_arena: Arena::new(),
        }
    }
}

impl<'g> Default for ClassGraphArenas<'g> {
    fn default() -> Self {
        ClassGraphArenas::new()
    }
}

/// Tracks the classes and interfaces mentioned by the methods being translated
///
/// Every class name that shows up in a constant pool or descriptor gets interned here, so that
/// abstract types can refer to classes by cheap pointer identity. Only some classes have a known
/// place in the hierarchy: the standard library types added by `insert_java_library_types`, and
/// whatever the caller adds with `add_class`. Everything else is interned as an unresolved class,
/// about which assignability questions only have "possibly" as an answer.
pub struct ClassGraph<'g> {
    arenas: &'g ClassGraphArenas<'g>,
    classes: FrozenMap<&'g BinaryName, ClassId<'g>>,
}

impl<'g> ClassGraph<'g> {
    /// New empty graph
    pub fn new(arenas: &'g ClassGraphArenas<'g>) -> Self {
        ClassGraph {
            arenas,
            classes: FrozenMap::new(),
        }
    }

    /// Query if one class type is known to be a subtype of another
    ///
    /// Returns `None` when the answer depends on part of the hierarchy that isn't in the graph.
    pub fn is_java_assignable(sub_type: &ClassData<'g>, super_type: &ClassData<'g>) -> Option<bool> {
        let mut supertypes_to_visit: Vec<&ClassData<'g>> = vec![sub_type];
        let mut dont_revisit: HashSet<&BinaryName> = HashSet::new();
        dont_revisit.insert(&sub_type.name);
        let mut saw_unresolved = false;

        // Optimization: if the super type is a class, then skip visiting interfaces
        let super_is_class: bool = super_type.is_resolved && !super_type.is_interface;

        while let Some(class_data) = supertypes_to_visit.pop() {
            if class_data.name == super_type.name {
                return Some(true);
            }
            if !class_data.is_resolved {
                saw_unresolved = true;
                continue;
            }

            // Enqueue next types to visit
            if let Some(superclass) = &class_data.superclass {
                if dont_revisit.insert(&superclass.name) {
                    supertypes_to_visit.push(superclass);
                }
            }
            if !super_is_class {
                for interface in &class_data.interfaces {
                    if dont_revisit.insert(&interface.name) {
                        supertypes_to_visit.push(interface);
                    }
                }
            }
        }

        if saw_unresolved || !super_type.is_resolved {
            None
        } else {
            Some(false)
        }
    }

    /// Check if arrays can be assigned to a super type
    ///
    /// This bakes in knowledge of the small, finite set of super types arrays have.
    pub fn is_array_type_assignable(super_type: &BinaryName) -> bool {
        super_type == &BinaryName::OBJECT
            || super_type == &BinaryName::CLONEABLE
            || super_type == &BinaryName::SERIALIZABLE
    }

    pub fn lookup_class(&'g self, name: &BinaryName) -> Option<ClassId<'g>> {
        self.classes.get(name).map(RefId)
    }

    /// Add a class with a known position in the hierarchy
    ///
    /// If the name is already in the graph, the existing class is returned unchanged.
    pub fn add_class(
        &'g self,
        name: BinaryName,
        superclass: Option<ClassId<'g>>,
        is_interface: bool,
    ) -> ClassId<'g> {
        if let Some(existing) = self.lookup_class(&name) {
            log::warn!("Class {:?} is already in the class graph", existing);
            return existing;
        }
        self.alloc_class(ClassData {
            name,
            superclass,
            interfaces: FrozenVec::new(),
            is_interface,
            is_resolved: true,
        })
    }

    /// Record that a class implements (or an interface extends) some interface
    pub fn add_interface(&'g self, class: ClassId<'g>, interface: ClassId<'g>) {
        class.0.interfaces.push(interface);
    }

    /// Find a class by name, adding it as an unresolved class if it is not already there
    pub fn intern_class(&'g self, name: BinaryName) -> ClassId<'g> {
        if let Some(existing) = self.lookup_class(&name) {
            return existing;
        }
        self.alloc_class(ClassData {
            name,
            superclass: None,
            interfaces: FrozenVec::new(),
            is_interface: false,
            is_resolved: false,
        })
    }

    fn alloc_class(&'g self, data: ClassData<'g>) -> ClassId<'g> {
        let data: &'g ClassData<'g> = self.arenas.class_arena.alloc(data);
        self.classes.insert(&data.name, RefId(data));
        RefId(data)
    }

    pub fn intern_field_type(&'g self, field_type: &FieldType<BinaryName>) -> FieldType<ClassId<'g>> {
        field_type.map(|name| self.intern_class(name.clone()))
    }

    pub fn intern_ref_type(&'g self, ref_type: &RefType<BinaryName>) -> RefType<ClassId<'g>> {
        ref_type.map(|name| self.intern_class(name.clone()))
    }

    pub fn intern_method_descriptor(
        &'g self,
        descriptor: &MethodDescriptor<BinaryName>,
    ) -> MethodDescriptor<ClassId<'g>> {
        descriptor.map(|name| self.intern_class(name.clone()))
    }

    /// Parse a field descriptor (eg. `[Ljava/lang/String;`), interning the classes in it
    pub fn parse_field_type(
        &'g self,
        descriptor: &str,
    ) -> Result<FieldType<ClassId<'g>>, VerifyErrorKind> {
        Ok(self.intern_field_type(&FieldType::parse(descriptor)?))
    }

    /// Parse a method descriptor (eg. `(IJ)V`), interning the classes in it
    pub fn parse_method_descriptor(
        &'g self,
        descriptor: &str,
    ) -> Result<MethodDescriptor<ClassId<'g>>, VerifyErrorKind> {
        Ok(self.intern_method_descriptor(&MethodDescriptor::parse(descriptor)?))
    }

    /// Add standard types to the class graph
    pub fn insert_java_library_types(&'g self) -> JavaLibrary<'g> {
        let object = self.add_class(BinaryName::OBJECT, None, false);
        let cloneable = self.add_class(BinaryName::CLONEABLE, Some(object), true);
        let serializable = self.add_class(BinaryName::SERIALIZABLE, Some(object), true);
        let throwable = self.add_class(BinaryName::THROWABLE, Some(object), false);
        self.add_interface(throwable, serializable);
        let exception = self.add_class(BinaryName::EXCEPTION, Some(throwable), false);
        let runtime_exception =
            self.add_class(BinaryName::RUNTIMEEXCEPTION, Some(exception), false);
        let error = self.add_class(BinaryName::ERROR, Some(throwable), false);
        let string = self.add_class(BinaryName::STRING, Some(object), false);
        self.add_interface(string, serializable);
        let class = self.add_class(BinaryName::CLASS, Some(object), false);
        self.add_interface(class, serializable);
        let method_handle = self.add_class(BinaryName::METHODHANDLE, Some(object), false);
        let method_type = self.add_class(BinaryName::METHODTYPE, Some(object), false);
        self.add_interface(method_type, serializable);
        let reflect_array = self.add_class(BinaryName::ARRAY, Some(object), false);

        let boxed = |name: BinaryName| {
            let class = self.add_class(name, Some(object), false);
            self.add_interface(class, serializable);
            class
        };
        let boxes = BoxClasses {
            boolean: boxed(BinaryName::BOOLEAN),
            byte: boxed(BinaryName::BYTE),
            character: boxed(BinaryName::CHARACTER),
            short: boxed(BinaryName::SHORT),
            integer: boxed(BinaryName::INTEGER),
            long: boxed(BinaryName::LONG),
            float: boxed(BinaryName::FLOAT),
            double: boxed(BinaryName::DOUBLE),
        };

        JavaLibrary {
            object,
            cloneable,
            serializable,
            throwable,
            exception,
            runtime_exception,
            error,
            string,
            class,
            method_handle,
            method_type,
            reflect_array,
            boxes,
        }
    }
}

/// Standard library classes the translator refers to directly
#[derive(Copy, Clone, Debug)]
pub struct JavaLibrary<'g> {
    pub object: ClassId<'g>,
    pub cloneable: ClassId<'g>,
    pub serializable: ClassId<'g>,
    pub throwable: ClassId<'g>,
    pub exception: ClassId<'g>,
    pub runtime_exception: ClassId<'g>,
    pub error: ClassId<'g>,
    pub string: ClassId<'g>,
    pub class: ClassId<'g>,
    pub method_handle: ClassId<'g>,
    pub method_type: ClassId<'g>,
    pub reflect_array: ClassId<'g>,
    pub boxes: BoxClasses<'g>,
}

impl<'g> JavaLibrary<'g> {
    /// Wrapper class of a primitive type (whose `TYPE` field holds the primitive class object)
    pub fn box_class(&self, base_type: BaseType) -> ClassId<'g> {
        match base_type {
            BaseType::Boolean => self.boxes.boolean,
            BaseType::Byte => self.boxes.byte,
            BaseType::Char => self.boxes.character,
            BaseType::Short => self.boxes.short,
            BaseType::Int => self.boxes.integer,
            BaseType::Long => self.boxes.long,
            BaseType::Float => self.boxes.float,
            BaseType::Double => self.boxes.double,
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct BoxClasses<'g> {
    pub boolean: ClassId<'g>,
    pub byte: ClassId<'g>,
    pub character: ClassId<'g>,
    pub short: ClassId<'g>,
    pub integer: ClassId<'g>,
    pub long: ClassId<'g>,
    pub float: ClassId<'g>,
    pub double: ClassId<'g>,
}

pub struct ClassData<'g> {
    /// Name of the class
    pub name: BinaryName,

    /// Superclass is missing for `java/lang/Object` and for unresolved classes
    pub superclass: Option<ClassId<'g>>,

    /// Interfaces implemented (or super-interfaces)
    pub interfaces: FrozenVec<ClassId<'g>>,

    /// Is this an interface?
    pub is_interface: bool,

    /// Is the position of this class in the hierarchy known?
    pub is_resolved: bool,
}

impl<'g> RenderDescriptor for ClassData<'g> {
    fn render_to(&self, write_to: &mut String) {
        self.name.render_to(write_to)
    }
}

impl<'g> Debug for ClassData<'g> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name.as_ref())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::Name;

    #[test]
    fn interning_is_idempotent() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let java = graph.insert_java_library_types();

        let foo = graph.intern_class(BinaryName::from_string("a/Foo".to_string()).unwrap());
        let foo_again = graph.intern_class(BinaryName::from_string("a/Foo".to_string()).unwrap());
        assert_eq!(foo, foo_again);
        assert_eq!(graph.intern_class(BinaryName::OBJECT), java.object);
        assert!(!foo.is_resolved);
    }

    #[test]
    fn assignability_through_known_hierarchy() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let java = graph.insert_java_library_types();

        assert_eq!(
            ClassGraph::is_java_assignable(&java.runtime_exception, &java.throwable),
            Some(true)
        );
        assert_eq!(
            ClassGraph::is_java_assignable(&java.throwable, &java.serializable),
            Some(true)
        );
        assert_eq!(
            ClassGraph::is_java_assignable(&java.string, &java.throwable),
            Some(false)
        );

        let unknown = graph.intern_class(BinaryName::from_string("a/Bar".to_string()).unwrap());
        assert_eq!(ClassGraph::is_java_assignable(&unknown, &java.throwable), None);
        assert_eq!(ClassGraph::is_java_assignable(&java.string, &unknown), None);
    }

    #[test]
    fn descriptors_intern_classes() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let java = graph.insert_java_library_types();

        let descriptor = graph
            .parse_method_descriptor("(Ljava/lang/String;I)[Ljava/lang/Object;")
            .unwrap();
        assert_eq!(descriptor.parameters[0], FieldType::object(java.string));
        assert_eq!(descriptor.render(), "(Ljava/lang/String;I)[Ljava/lang/Object;");
    }
}
