//! Reflection primitives: inspecting the call stack and the task table from
//! running code.
//!
//! These read [`crate::frame::Frame`]'s caller chain and
//! [`crate::intern::Interns`]'s task table rather than exposing anything
//! about the trail or choice points, so a program can introspect on *what
//! called it* without being able to peek at bindings it doesn't already
//! have.

use std::rc::Rc;

use crate::{
    error::StepError,
    interp::{Cont, Env, Interpreter, StepResult},
    resource::ResourceTracker,
    tracer::Tracer,
    unify::unify,
    value::Value,
};

fn nth_ancestor(env: &Env, n: u32) -> Option<Rc<crate::frame::Frame>> {
    env.frame.callers().nth(n as usize)
}

fn ancestor_index(args: &[Value], env: &Env) -> Result<u32, StepError> {
    match crate::unify::resolve(&args[0], &env.trail, false) {
        Value::Int(n) if n >= 0 => Ok(n as u32),
        other => Err(StepError::ArgumentType {
            task: String::new(),
            expected: "nonnegative integer",
            found: other.type_name(),
        }),
    }
}

/// `CallerChainAncestor(N, TaskRef)`: binds `TaskRef` to the task that made
/// the call `N` frames up (0 is the immediate caller).
pub fn caller_chain_ancestor<'m, R: ResourceTracker, T: Tracer>(
    interp: &mut Interpreter<'m, R, T>,
    args: &[Value],
    env: &mut Env,
    k: &mut Cont<'_, 'm, R, T>,
) -> StepResult {
    let n = ancestor_index(args, env)?;
    let Some(frame) = nth_ancestor(env, n) else {
        return Ok(false);
    };
    match unify(&args[1], &Value::Task(frame.task), &env.trail) {
        Some(trail) => {
            env.trail = trail;
            k(interp, env)
        }
        None => Ok(false),
    }
}

/// `GoalChainAncestor(N, TaskRef, ArgsTuple)`: like
/// [`caller_chain_ancestor`] but also binds the arguments that ancestor was
/// called with, giving the full goal rather than just which task it was.
pub fn goal_chain_ancestor<'m, R: ResourceTracker, T: Tracer>(
    interp: &mut Interpreter<'m, R, T>,
    args: &[Value],
    env: &mut Env,
    k: &mut Cont<'_, 'm, R, T>,
) -> StepResult {
    let n = ancestor_index(args, env)?;
    let Some(frame) = nth_ancestor(env, n) else {
        return Ok(false);
    };
    let Some(trail) = unify(&args[1], &Value::Task(frame.task), &env.trail) else {
        return Ok(false);
    };
    let call_args = Value::tuple(frame.args.clone());
    match unify(&args[2], &call_args, &trail) {
        Some(trail) => {
            env.trail = trail;
            k(interp, env)
        }
        None => Ok(false),
    }
}

/// `PreviousCall(TaskRef, ArgsTuple)`: the immediate caller's goal, the
/// common case of [`goal_chain_ancestor`] at distance 0.
pub fn previous_call<'m, R: ResourceTracker, T: Tracer>(
    interp: &mut Interpreter<'m, R, T>,
    args: &[Value],
    env: &mut Env,
    k: &mut Cont<'_, 'm, R, T>,
) -> StepResult {
    let Some(frame) = nth_ancestor(env, 0) else {
        return Ok(false);
    };
    let Some(trail) = unify(&args[0], &Value::Task(frame.task), &env.trail) else {
        return Ok(false);
    };
    let call_args = Value::tuple(frame.args.clone());
    match unify(&args[1], &call_args, &trail) {
        Some(trail) => {
            env.trail = trail;
            k(interp, env)
        }
        None => Ok(false),
    }
}

/// `DefinedTasks(List)`: binds every currently-defined task name as a list
/// of strings, used by lint tooling and introspective error messages
/// written in the language itself.
pub fn defined_tasks<'m, R: ResourceTracker, T: Tracer>(
    interp: &mut Interpreter<'m, R, T>,
    args: &[Value],
    env: &mut Env,
    k: &mut Cont<'_, 'm, R, T>,
) -> StepResult {
    let names: Vec<Value> = interp.interns.task_names().map(|n| Value::String(Rc::from(n))).collect();
    match unify(&args[0], &Value::list(names), &env.trail) {
        Some(trail) => {
            env.trail = trail;
            k(interp, env)
        }
        None => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{frame::Frame, intern::TaskId};

    #[test]
    fn nth_ancestor_walks_caller_chain() {
        let root = Frame::root();
        let mid = Frame::child(&root, TaskId::from(1u32), 0, Vec::new(), Vec::new(), None);
        let leaf = Frame::child(&mid, TaskId::from(2u32), 0, Vec::new(), Vec::new(), None);
        let env = Env::new(leaf);
        assert_eq!(nth_ancestor(&env, 0).unwrap().task, TaskId::from(1u32));
    }
}
