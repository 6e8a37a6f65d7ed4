//! Tasks: named, multi-method, pattern-dispatched procedures.

use std::rc::Rc;

use crate::{frame::CodeLoc, intern::TaskId, step_chain::{Step, Term}, value::Value};

/// Declared properties of a task, set by `[...]` annotations at the start
/// of its definition block. A plain bitset over `u16`; hand-rolled rather
/// than pulled in from a crate since there are only a handful of flags and
/// no set-algebra beyond union/contains is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskFlags(u16);

impl TaskFlags {
    /// May legitimately have no matching method; callers get `false`/
    /// `null` rather than `CallFailed`.
    pub const FALLIBLE: Self = Self(1 << 0);
    /// Backtracks into further methods/choice points on redo.
    pub const GENERATOR: Self = Self(1 << 1);
    /// Called for its boolean result rather than any emitted text.
    pub const PREDICATE: Self = Self(1 << 2);
    /// Called for a single return value bound out of its last argument.
    pub const FUNCTION: Self = Self(1 << 3);
    /// Can be chained as `subject.task` in text.
    pub const FLUENT: Self = Self(1 << 4);
    /// Entry point lint-checked for being called at all (never flagged as
    /// unreachable).
    pub const MAIN: Self = Self(1 << 5);
    /// Methods are tried in random order (optionally weighted) rather than
    /// declaration order.
    pub const RANDOMLY: Self = Self(1 << 6);
    /// The method chosen on a successful call is remembered per argument
    /// tuple and preferred on future calls.
    pub const REMEMBERED: Self = Self(1 << 7);

    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

impl std::ops::BitOr for TaskFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// One method: a head pattern, local-variable slots, and a compiled body.
#[derive(Debug, Clone)]
pub struct Method {
    /// Patterns matched against call arguments, positionally.
    pub head: Rc<[Term]>,
    /// Number of local variable slots this method's body references.
    pub local_count: usize,
    pub body: Rc<Step>,
    /// Relative weight used when the owning task is `[randomly]`.
    pub weight: f32,
    pub loc: Option<CodeLoc>,
}

/// A task: either a set of user-defined methods, or a primitive implemented
/// in Rust, identified by [`crate::primitives::PrimitiveKind`] so dispatch
/// is a match rather than a name lookup on every call.
#[derive(Debug, Clone)]
pub enum TaskBody {
    Methods(Vec<Method>),
    Primitive(crate::primitives::PrimitiveKind),
}

/// A named, callable task.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub arity: usize,
    pub flags: TaskFlags,
    pub body: TaskBody,
}

impl Task {
    #[must_use]
    pub fn new_methods(id: TaskId, arity: usize, flags: TaskFlags) -> Self {
        Self {
            id,
            arity,
            flags,
            body: TaskBody::Methods(Vec::new()),
        }
    }

    #[must_use]
    pub fn new_primitive(id: TaskId, arity: usize, flags: TaskFlags, kind: crate::primitives::PrimitiveKind) -> Self {
        Self {
            id,
            arity,
            flags,
            body: TaskBody::Primitive(kind),
        }
    }

    pub fn add_method(&mut self, method: Method) {
        match &mut self.body {
            TaskBody::Methods(methods) => methods.push(method),
            TaskBody::Primitive(_) => panic!("cannot add a method to a primitive task"),
        }
    }

    #[must_use]
    pub fn methods(&self) -> &[Method] {
        match &self.body {
            TaskBody::Methods(methods) => methods,
            TaskBody::Primitive(_) => &[],
        }
    }

    #[must_use]
    pub fn is_predicate(&self) -> bool {
        self.flags.contains(TaskFlags::PREDICATE)
    }

    #[must_use]
    pub fn is_function(&self) -> bool {
        self.flags.contains(TaskFlags::FUNCTION)
    }

    #[must_use]
    pub fn is_fallible(&self) -> bool {
        self.flags.contains(TaskFlags::FALLIBLE)
    }
}

/// Convenience alias for a primitive's argument slice.
pub type PrimitiveArgs<'a> = &'a [Value];

/// The set of all tasks known to a module, keyed by [`TaskId`].
#[derive(Debug, Default)]
pub struct TaskTable {
    tasks: indexmap::IndexMap<TaskId, Task, ahash::RandomState>,
}

impl TaskTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, task: Task) {
        self.tasks.insert(task.id, task);
    }

    #[must_use]
    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(&id)
    }

    #[must_use]
    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TaskId, &Task)> {
        self.tasks.iter()
    }
}
