//! Method call frames: the dynamic call stack.

use std::rc::Rc;

use crate::{intern::TaskId, value::{LogicVar, Value}};

/// A source location, attached to frames for error messages and reflection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeLoc {
    pub path: Rc<str>,
    pub line: u32,
}

/// One frame of the dynamic call stack.
///
/// Frames form a linked list via `caller` (an `Rc` chain), which is what
/// [`crate::primitives::reflection`]'s `CallerChainAncestor` and
/// `GoalChainAncestor` walk. A frame is pushed on method entry and becomes
/// unreachable (and so its locals become
/// unreachable) once nothing holds a reference to it anymore -- there is no
/// explicit "pop", Rust's reference counting does it.
#[derive(Debug)]
pub struct Frame {
    pub caller: Option<Rc<Frame>>,
    pub task: TaskId,
    pub method_index: usize,
    pub locals: Vec<Rc<LogicVar>>,
    pub args: Vec<Value>,
    pub call_site: Option<CodeLoc>,
    pub depth: u32,
}

impl Frame {
    #[must_use]
    pub fn root() -> Rc<Self> {
        Rc::new(Self {
            caller: None,
            task: TaskId::from(0u32),
            method_index: 0,
            locals: Vec::new(),
            args: Vec::new(),
            call_site: None,
            depth: 0,
        })
    }

    #[must_use]
    pub fn child(
        caller: &Rc<Frame>,
        task: TaskId,
        method_index: usize,
        locals: Vec<Rc<LogicVar>>,
        args: Vec<Value>,
        call_site: Option<CodeLoc>,
    ) -> Rc<Self> {
        Rc::new(Self {
            caller: Some(caller.clone()),
            task,
            method_index,
            locals,
            args,
            call_site,
            depth: caller.depth + 1,
        })
    }

    /// Walks caller frames, innermost first.
    pub fn callers(self: &Rc<Self>) -> impl Iterator<Item = Rc<Frame>> {
        let mut current = self.caller.clone();
        std::iter::from_fn(move || {
            let next = current.clone()?;
            current = next.caller.clone();
            Some(next)
        })
    }
}
