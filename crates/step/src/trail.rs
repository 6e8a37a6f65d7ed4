//! The trail: an immutable singly-linked binding list.
//!
//! A choice point captures nothing more than the current `Trail` handle (an
//! `Rc` pointer) -- restoring on backtrack is just reassigning that handle
//! back, exactly the "remember the head pointer" idiom for backtracking.
//! A whole session can be snapshotted just as cheaply by cloning a handle;
//! here the unit of snapshot is smaller (one linked list head) because only
//! bindings need it.

use std::rc::Rc;

use crate::value::{LogicVar, Value};

enum Node {
    Nil,
    Entry { var: Rc<LogicVar>, value: Value, parent: Trail },
}

/// An immutable binding list. Cloning is `Rc::clone` (O(1)); the only way to
/// "grow" a trail is [`Trail::bind`], which returns a new handle sharing the
/// old list as its parent.
#[derive(Clone)]
pub struct Trail(Rc<Node>);

impl Trail {
    #[must_use]
    pub fn empty() -> Self {
        Self(Rc::new(Node::Nil))
    }

    /// Prepends a binding, returning the extended trail. The original trail
    /// handle is untouched and remains valid -- this is what lets a choice
    /// point "restore" simply by holding onto its old `Trail` clone.
    #[must_use]
    pub fn bind(&self, var: Rc<LogicVar>, value: Value) -> Self {
        Self(Rc::new(Node::Entry {
            var,
            value,
            parent: self.clone(),
        }))
    }

    /// Walks from newest to oldest looking for `var`'s binding.
    #[must_use]
    pub fn lookup(&self, var: &LogicVar) -> Option<Value> {
        let mut node = self;
        loop {
            match &*node.0 {
                Node::Nil => return None,
                Node::Entry {
                    var: bound_var,
                    value,
                    parent,
                } => {
                    if bound_var.id == var.id {
                        return Some(value.clone());
                    }
                    node = parent;
                }
            }
        }
    }

    /// Dereferences a term: follows variable -> value chains until a
    /// non-variable or an unbound variable is reached.
    #[must_use]
    pub fn deref(&self, term: &Value) -> Value {
        let mut current = term.clone();
        loop {
            match current {
                Value::Var(ref v) => match self.lookup(v) {
                    Some(next) => current = next,
                    None => return current,
                },
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::VarCounter;

    #[test]
    fn backtracking_restores_by_reverting_the_handle() {
        let mut counter = VarCounter::new();
        let x = Rc::new(counter.fresh(0, "?x"));

        let before = Trail::empty();
        assert!(matches!(before.deref(&Value::Var(x.clone())), Value::Var(_)));

        let after = before.bind(x.clone(), Value::Int(42));
        assert!(matches!(after.deref(&Value::Var(x.clone())), Value::Int(42)));

        // "Backtracking" is just going back to using `before`.
        assert!(matches!(before.deref(&Value::Var(x)), Value::Var(_)));
    }
}
