use super::{merge_type, AbstractType};
use crate::errors::VerifyErrorKind;
use crate::jvm::JavaLibrary;
use crate::rop::Label;
use std::collections::BTreeMap;
use std::fmt;

/// Simulated local variables: one optional type per slot
///
/// A `None` slot holds nothing usable, either because nothing was ever stored there, because two
/// incompatible values met at a join, or because a neighbouring `long`/`double` overwrote part of
/// it.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct OneLocalsArray<'g> {
    locals: Vec<Option<AbstractType<'g>>>,
}

impl<'g> OneLocalsArray<'g> {
    /// All slots start empty
    pub fn new(max_locals: usize) -> OneLocalsArray<'g> {
        OneLocalsArray {
            locals: vec![None; max_locals],
        }
    }

    pub fn max_locals(&self) -> usize {
        self.locals.len()
    }

    /// Read a slot that must hold a value
    pub fn get(&self, index: u16) -> Result<AbstractType<'g>, VerifyErrorKind> {
        match self.locals.get(index as usize) {
            None => Err(VerifyErrorKind::LocalOutOfRange(index)),
            Some(None) => Err(VerifyErrorKind::InvalidLocal(index)),
            Some(Some(value)) => Ok(*value),
        }
    }

    /// Read a slot, which may be empty
    pub fn get_optional(&self, index: u16) -> Option<AbstractType<'g>> {
        self.locals.get(index as usize).copied().flatten()
    }

    /// Store a value into a slot
    ///
    /// A category 2 value also claims the following slot, and overwriting the second half of a
    /// category 2 value invalidates the first half.
    pub fn set(&mut self, index: u16, value: AbstractType<'g>) -> Result<(), VerifyErrorKind> {
        let idx = index as usize;
        let last_slot = if value.is_category2() { idx + 1 } else { idx };
        if last_slot >= self.locals.len() {
            return Err(VerifyErrorKind::LocalOutOfRange(index));
        }

        self.locals[idx] = Some(value);
        if value.is_category2() {
            self.locals[idx + 1] = None;
        }
        if idx > 0 && matches!(self.locals[idx - 1], Some(prev) if prev.is_category2()) {
            self.locals[idx - 1] = None;
        }
        Ok(())
    }

    /// Mark a slot as holding nothing
    pub fn invalidate(&mut self, index: u16) {
        let idx = index as usize;
        if idx < self.locals.len() {
            self.locals[idx] = None;
            if idx > 0 && matches!(self.locals[idx - 1], Some(prev) if prev.is_category2()) {
                self.locals[idx - 1] = None;
            }
        }
    }

    pub fn replace_all(&mut self, original: &AbstractType<'g>, updated: AbstractType<'g>) {
        for slot in self.locals.iter_mut().flatten() {
            if slot == original {
                *slot = updated;
            }
        }
    }

    /// Slotwise merge, where slots that don't merge become empty
    pub fn merge(&self, other: &OneLocalsArray<'g>, java: &JavaLibrary<'g>) -> OneLocalsArray<'g> {
        let locals = self
            .locals
            .iter()
            .zip(other.locals.iter())
            .map(|(left, right)| match (left, right) {
                (Some(left), Some(right)) => merge_type(java, left, right),
                _ => None,
            })
            .collect();
        OneLocalsArray { locals }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Option<AbstractType<'g>>> {
        self.locals.iter()
    }
}

impl<'g> fmt::Debug for OneLocalsArray<'g> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for slot in &self.locals {
            match slot {
                None => list.entry(&format_args!("-")),
                Some(value) => list.entry(value),
            };
        }
        list.finish()
    }
}

/// Locals inside a subroutine
///
/// A subroutine is analyzed once for all of its callers, but a slot the subroutine never touches
/// may hold different types depending on which caller jumped in. So besides the primary array
/// (the merge over all callers, which is what instructions read from), there is one secondary
/// array per caller, keyed by the label of the calling block. Writes go to all of them, so that
/// on `ret` each caller gets back exactly the locals it should see.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct LocalsArraySet<'g> {
    primary: OneLocalsArray<'g>,
    secondaries: BTreeMap<Label, LocalsArray<'g>>,
}

/// Either a plain locals array or one set up for subroutine callers
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum LocalsArray<'g> {
    One(OneLocalsArray<'g>),
    Set(Box<LocalsArraySet<'g>>),
}

impl<'g> LocalsArraySet<'g> {
    /// Wrap a plain array, with no callers yet
    pub fn new(primary: OneLocalsArray<'g>) -> LocalsArraySet<'g> {
        LocalsArraySet {
            primary,
            secondaries: BTreeMap::new(),
        }
    }

    pub fn primary(&self) -> &OneLocalsArray<'g> {
        &self.primary
    }

    /// Locals as seen by a particular caller
    pub fn secondary_for_label(&self, label: Label) -> Option<&LocalsArray<'g>> {
        self.secondaries.get(&label)
    }

    fn set(&mut self, index: u16, value: AbstractType<'g>) -> Result<(), VerifyErrorKind> {
        self.primary.set(index, value)?;
        for secondary in self.secondaries.values_mut() {
            secondary.set(index, value)?;
        }
        Ok(())
    }

    fn invalidate(&mut self, index: u16) {
        self.primary.invalidate(index);
        for secondary in self.secondaries.values_mut() {
            secondary.invalidate(index);
        }
    }

    fn replace_all(&mut self, original: &AbstractType<'g>, updated: AbstractType<'g>) {
        self.primary.replace_all(original, updated);
        for secondary in self.secondaries.values_mut() {
            secondary.replace_all(original, updated);
        }
    }

    /// Merge in plain locals, which apply to every caller
    fn merge_with_one(&self, other: &OneLocalsArray<'g>, java: &JavaLibrary<'g>) -> LocalsArraySet<'g> {
        let other_one = LocalsArray::One(other.clone());
        LocalsArraySet {
            primary: self.primary.merge(other, java),
            secondaries: self
                .secondaries
                .iter()
                .map(|(label, secondary)| (*label, secondary.merge(&other_one, java)))
                .collect(),
        }
    }

    /// Merge caller by caller
    fn merge_with_set(&self, other: &LocalsArraySet<'g>, java: &JavaLibrary<'g>) -> LocalsArraySet<'g> {
        let mut secondaries = self.secondaries.clone();
        for (label, other_secondary) in &other.secondaries {
            let merged = match secondaries.get(label) {
                None => other_secondary.clone(),
                Some(secondary) if secondary == other_secondary => continue,
                Some(secondary) => secondary.merge(other_secondary, java),
            };
            secondaries.insert(*label, merged);
        }
        LocalsArraySet {
            primary: self.primary.merge(&other.primary, java),
            secondaries,
        }
    }

    /// Merge in the locals of a caller jumping into the subroutine from block `caller`
    ///
    /// The primary array is recomputed as the merge of the primaries of all the callers.
    fn merge_with_subroutine_caller(
        &self,
        other: &LocalsArray<'g>,
        caller: Label,
        java: &JavaLibrary<'g>,
    ) -> LocalsArraySet<'g> {
        let new_secondary = match self.secondaries.get(&caller) {
            None => other.clone(),
            Some(mine) if mine == other => mine.clone(),
            Some(mine) => mine.merge(other, java),
        };

        let unchanged_secondary = self.secondaries.get(&caller) == Some(&new_secondary);
        let new_primary = self.primary.merge(other.primary(), java);
        if unchanged_secondary && new_primary == self.primary {
            return self.clone();
        }

        let mut secondaries = self.secondaries.clone();
        secondaries.insert(caller, new_secondary);
        let mut primaries = secondaries.values().map(LocalsArray::primary);
        let mut primary = match primaries.next() {
            Some(first) => first.clone(),
            None => new_primary,
        };
        for other_primary in primaries {
            primary = primary.merge(other_primary, java);
        }

        LocalsArraySet {
            primary,
            secondaries,
        }
    }
}

impl<'g> fmt::Debug for LocalsArraySet<'g> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "primary: {:?}", self.primary)?;
        for (label, secondary) in &self.secondaries {
            write!(f, ", {:?}: {:?}", label, secondary)?;
        }
        Ok(())
    }
}

impl<'g> LocalsArray<'g> {
    pub fn new(max_locals: usize) -> LocalsArray<'g> {
        LocalsArray::One(OneLocalsArray::new(max_locals))
    }

    /// The array instructions read from
    pub fn primary(&self) -> &OneLocalsArray<'g> {
        match self {
            LocalsArray::One(one) => one,
            LocalsArray::Set(set) => &set.primary,
        }
    }

    pub fn max_locals(&self) -> usize {
        self.primary().max_locals()
    }

    pub fn get(&self, index: u16) -> Result<AbstractType<'g>, VerifyErrorKind> {
        self.primary().get(index)
    }

    pub fn get_optional(&self, index: u16) -> Option<AbstractType<'g>> {
        self.primary().get_optional(index)
    }

    pub fn set(&mut self, index: u16, value: AbstractType<'g>) -> Result<(), VerifyErrorKind> {
        match self {
            LocalsArray::One(one) => one.set(index, value),
            LocalsArray::Set(set) => set.set(index, value),
        }
    }

    pub fn invalidate(&mut self, index: u16) {
        match self {
            LocalsArray::One(one) => one.invalidate(index),
            LocalsArray::Set(set) => set.invalidate(index),
        }
    }

    pub fn replace_all(&mut self, original: &AbstractType<'g>, updated: AbstractType<'g>) {
        match self {
            LocalsArray::One(one) => one.replace_all(original, updated),
            LocalsArray::Set(set) => set.replace_all(original, updated),
        }
    }

    /// Merge locals flowing into the same block
    pub fn merge(&self, other: &LocalsArray<'g>, java: &JavaLibrary<'g>) -> LocalsArray<'g> {
        match (self, other) {
            (LocalsArray::One(left), LocalsArray::One(right)) => {
                LocalsArray::One(left.merge(right, java))
            }
            (LocalsArray::Set(set), LocalsArray::One(one))
            | (LocalsArray::One(one), LocalsArray::Set(set)) => {
                LocalsArray::Set(Box::new(set.merge_with_one(one, java)))
            }
            (LocalsArray::Set(left), LocalsArray::Set(right)) => {
                LocalsArray::Set(Box::new(left.merge_with_set(right, java)))
            }
        }
    }

    /// Merge in the locals of a block calling into a subroutine
    pub fn merge_with_subroutine_caller(
        &self,
        other: &LocalsArray<'g>,
        caller: Label,
        java: &JavaLibrary<'g>,
    ) -> LocalsArray<'g> {
        let set = match self {
            LocalsArray::One(one) => LocalsArraySet::new(one.clone()),
            LocalsArray::Set(set) => (**set).clone(),
        };
        LocalsArray::Set(Box::new(set.merge_with_subroutine_caller(other, caller, java)))
    }

    /// Locals to hand back to the caller `caller` when returning from a subroutine
    pub fn sub_array_for_label(&self, caller: Label) -> Option<LocalsArray<'g>> {
        match self {
            LocalsArray::One(_) => None,
            LocalsArray::Set(set) => set.secondary_for_label(caller).cloned(),
        }
    }

    /// Drop caller tracking once outside of every subroutine
    pub fn collapse_to_primary(self) -> LocalsArray<'g> {
        match self {
            LocalsArray::Set(set) => LocalsArray::One(set.primary),
            one => one,
        }
    }
}

impl<'g> fmt::Debug for LocalsArray<'g> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalsArray::One(one) => one.fmt(f),
            LocalsArray::Set(set) => write!(f, "{{{:?}}}", set),
        }
    }
}
