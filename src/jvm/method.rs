use super::{
    ClassId, ConstantsPool, ExceptionTable, FieldType, MethodAccessFlags, MethodDescriptor,
    RenderDescriptor, UnqualifiedName,
};
use std::rc::Rc;

/// Method whose body is to be translated
pub struct Method<'g> {
    /// Class declaring the method
    pub class: ClassId<'g>,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor<ClassId<'g>>,
    pub access_flags: MethodAccessFlags,
    pub code: Code<'g>,
}

impl<'g> Method<'g> {
    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }

    pub fn is_synchronized(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::SYNCHRONIZED)
    }

    /// Is this an instance initializer (`<init>`)?
    pub fn is_constructor(&self) -> bool {
        self.name == UnqualifiedName::INIT
    }

    /// Number of local variable slots taken by the parameters (including the receiver)
    pub fn parameter_slots(&self) -> usize {
        self.descriptor.parameter_length(!self.is_static())
    }

    /// Human readable name, used in error contexts and logs
    pub fn display_name(&self) -> String {
        format!(
            "{:?}.{:?}{}",
            self.class,
            self.name,
            self.descriptor.render()
        )
    }
}

/// Contents of a `Code` attribute
pub struct Code<'g> {
    pub max_stack: u16,
    pub max_locals: u16,
    pub bytecode: Vec<u8>,
    pub exception_table: ExceptionTable<'g>,

    /// Constant pool of the declaring class
    pub constants: Rc<ConstantsPool<'g>>,

    /// Optional debug information
    pub local_variables: LocalVariableTable<'g>,
}

/// Entry in the `LocalVariableTable` attribute
#[derive(Clone, PartialEq, Debug)]
pub struct LocalVariable<'g> {
    pub start_pc: usize,
    pub length: usize,
    pub name: UnqualifiedName,
    pub descriptor: FieldType<ClassId<'g>>,
    pub index: u16,
}

#[derive(Clone, Default, Debug)]
pub struct LocalVariableTable<'g> {
    entries: Vec<LocalVariable<'g>>,
}

impl<'g> LocalVariableTable<'g> {
    pub fn new() -> LocalVariableTable<'g> {
        LocalVariableTable { entries: vec![] }
    }

    pub fn push(&mut self, entry: LocalVariable<'g>) {
        self.entries.push(entry);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find the variable stored in slot `index` whose scope includes `pc`
    pub fn lookup(&self, pc: usize, index: u16) -> Option<&LocalVariable<'g>> {
        self.entries.iter().find(|entry| {
            entry.index == index && entry.start_pc <= pc && pc < entry.start_pc + entry.length
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::{ClassGraph, ClassGraphArenas, Name};

    #[test]
    fn local_variable_scopes() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let java = graph.insert_java_library_types();

        let mut table = LocalVariableTable::new();
        table.push(LocalVariable {
            start_pc: 2,
            length: 4,
            name: UnqualifiedName::from_string("count".to_string()).unwrap(),
            descriptor: FieldType::int(),
            index: 1,
        });
        table.push(LocalVariable {
            start_pc: 6,
            length: 10,
            name: UnqualifiedName::from_string("message".to_string()).unwrap(),
            descriptor: FieldType::object(java.string),
            index: 1,
        });

        assert!(table.lookup(1, 1).is_none());
        assert_eq!(table.lookup(5, 1).map(|v| v.name.as_ref()), Some("count"));
        assert_eq!(table.lookup(6, 1).map(|v| v.name.as_ref()), Some("message"));
        assert!(table.lookup(6, 2).is_none());
    }
}
