//! Symbol interning for task names, feature names, and state-element names.
//!
//! Each table stores unique strings in a vector and hands back a small `u32`
//! id, so that comparing two symbols is a single integer comparison instead
//! of a string comparison. These tables are process-wide and
//! grow monotonically; a [`Module`](crate::module::Module) owns one `Interns`
//! instance so re-entrant parsing of several files into the same module is
//! safe (symbols are looked up by string, never assumed pre-registered).

use ahash::AHashMap;

/// Interned task name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u32);

/// Interned feature-structure field name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeatureId(u32);

/// Interned symbol (atom) value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(u32);

/// Interned state-element key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateElementId(u32);

impl TaskId {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl FeatureId {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl SymbolId {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl StateElementId {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A generic string interner: unique strings in, stable small ids out.
///
/// Lookups during parsing go string -> id (via the hash map); lookups during
/// error formatting and reflection go id -> string (via the vector). Both
/// directions are O(1).
#[derive(Debug, Default)]
struct Table<Id> {
    strings: Vec<Box<str>>,
    by_name: AHashMap<Box<str>, Id>,
}

impl<Id: Copy + From<u32>> Table<Id> {
    fn intern(&mut self, name: &str) -> Id {
        if let Some(id) = self.by_name.get(name) {
            return *id;
        }
        let id = Id::from(u32::try_from(self.strings.len()).expect("interned more than u32::MAX symbols"));
        self.strings.push(name.into());
        self.by_name.insert(name.into(), id);
        id
    }

    fn resolve(&self, id: Id) -> &str
    where
        Id: Into<u32>,
    {
        &self.strings[id.into() as usize]
    }

    fn lookup(&self, name: &str) -> Option<Id> {
        self.by_name.get(name).copied()
    }
}

impl From<u32> for TaskId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}
impl From<TaskId> for u32 {
    fn from(value: TaskId) -> Self {
        value.0
    }
}
impl From<u32> for FeatureId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}
impl From<FeatureId> for u32 {
    fn from(value: FeatureId) -> Self {
        value.0
    }
}
impl From<u32> for SymbolId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}
impl From<SymbolId> for u32 {
    fn from(value: SymbolId) -> Self {
        value.0
    }
}
impl From<u32> for StateElementId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}
impl From<StateElementId> for u32 {
    fn from(value: StateElementId) -> Self {
        value.0
    }
}

/// The process/module-wide symbol tables.
///
/// One `Interns` is owned by each [`Module`](crate::module::Module). Kept
/// separate from the task/method tables so the parser (which only knows
/// names) and the interpreter (which only wants to compare ids) can each use
/// the half they need.
#[derive(Debug, Default)]
pub struct Interns {
    tasks: Table<TaskId>,
    features: Table<FeatureId>,
    symbols: Table<SymbolId>,
    state_elements: Table<StateElementId>,
}

impl Interns {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern_task(&mut self, name: &str) -> TaskId {
        self.tasks.intern(name)
    }

    #[must_use]
    pub fn task_name(&self, id: TaskId) -> &str {
        self.tasks.resolve(id)
    }

    #[must_use]
    pub fn lookup_task(&self, name: &str) -> Option<TaskId> {
        self.tasks.lookup(name)
    }

    pub fn intern_feature(&mut self, name: &str) -> FeatureId {
        self.features.intern(name)
    }

    #[must_use]
    pub fn feature_name(&self, id: FeatureId) -> &str {
        self.features.resolve(id)
    }

    pub fn intern_symbol(&mut self, name: &str) -> SymbolId {
        self.symbols.intern(name)
    }

    #[must_use]
    pub fn symbol_name(&self, id: SymbolId) -> &str {
        self.symbols.resolve(id)
    }

    pub fn intern_state_element(&mut self, name: &str) -> StateElementId {
        self.state_elements.intern(name)
    }

    #[must_use]
    pub fn state_element_name(&self, id: StateElementId) -> &str {
        self.state_elements.resolve(id)
    }

    #[must_use]
    pub fn lookup_state_element(&self, name: &str) -> Option<StateElementId> {
        self.state_elements.lookup(name)
    }

    /// Every currently-interned task name, in interning order (i.e. roughly
    /// first-use order). Used by reflection's "enumerate defined tasks".
    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.tasks.strings.iter().map(AsRef::as_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_stable_and_deduplicates() {
        let mut interns = Interns::new();
        let a = interns.intern_task("Greet");
        let b = interns.intern_task("Greet");
        let c = interns.intern_task("Farewell");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(interns.task_name(a), "Greet");
    }
}
