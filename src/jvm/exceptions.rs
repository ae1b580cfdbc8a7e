use super::ClassId;

/// One entry of a `Code` attribute's exception table
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.3
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ExceptionHandler<'g> {
    /// Start of the protected range (inclusive)
    pub start_pc: usize,

    /// End of the protected range (exclusive)
    pub end_pc: usize,

    /// Start of the handler
    pub handler_pc: usize,

    /// Type of exception caught (`None` catches everything)
    pub catch_type: Option<ClassId<'g>>,
}

impl<'g> ExceptionHandler<'g> {
    /// Does the protected range cover this offset?
    pub fn covers(&self, pc: usize) -> bool {
        self.start_pc <= pc && pc < self.end_pc
    }
}

/// Ordered exception table
#[derive(Clone, Default, Debug)]
pub struct ExceptionTable<'g> {
    handlers: Vec<ExceptionHandler<'g>>,
}

impl<'g> ExceptionTable<'g> {
    pub fn new() -> ExceptionTable<'g> {
        ExceptionTable { handlers: vec![] }
    }

    pub fn push(&mut self, handler: ExceptionHandler<'g>) {
        self.handlers.push(handler);
    }

    pub fn handlers(&self) -> &[ExceptionHandler<'g>] {
        &self.handlers
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Handlers that may catch an exception thrown at `pc`, in the order they are tried
    ///
    /// An exception type caught by an earlier entry shadows later entries for the same type, and
    /// nothing after a catch-all entry can ever be reached.
    pub fn catches_at(&self, pc: usize) -> Vec<ExceptionHandler<'g>> {
        let mut catches: Vec<ExceptionHandler<'g>> = vec![];
        for handler in self.handlers.iter().filter(|handler| handler.covers(pc)) {
            if catches
                .iter()
                .any(|existing| existing.catch_type == handler.catch_type)
            {
                continue;
            }
            catches.push(*handler);
            if handler.catch_type.is_none() {
                break;
            }
        }
        catches
    }

    /// Every offset the table mentions (range bounds and handlers)
    pub fn offsets(&self) -> Vec<usize> {
        self.handlers
            .iter()
            .flat_map(|handler| [handler.start_pc, handler.end_pc, handler.handler_pc])
            .collect()
    }
}
