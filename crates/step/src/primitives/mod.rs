//! Built-in tasks: comparison, arithmetic-as-relation, higher-order calls,
//! list/feature-structure accessors, exclusion-logic operations, a minimal
//! I/O hook, and reflection.
//!
//! Each primitive is looked up by [`PrimitiveKind`] rather than by name, so
//! a call to a primitive task costs one match instead of a string lookup.

mod reflection;

use std::rc::Rc;

use crate::{
    error::StepError,
    exclusion::{ElNode, PathSegment},
    interp::{Cont, Env, Interpreter, StepResult},
    intern::SymbolId,
    output::Token,
    resource::ResourceTracker,
    tracer::Tracer,
    unify::{resolve, unify},
    value::{Value, numeric_partial_cmp},
};

/// Which built-in a primitive task implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveKind {
    Lt,
    Le,
    Gt,
    Ge,
    Unify,
    NotUnifiable,
    Plus,
    Minus,
    Times,
    Divide,
    Apply,
    Head,
    Tail,
    ConsPrim,
    ListLength,
    Member,
    Append,
    FeatureGet,
    FeaturePut,
    ElStore,
    ElDelete,
    ElContains,
    Print,
    CallerChainAncestor,
    GoalChainAncestor,
    PreviousCall,
    DefinedTasks,
    Paragraph,
}

/// Dispatches a call to a primitive task. Every primitive is deterministic
/// in the number of solutions it offers (0 or 1), so each arm either
/// returns `Ok(false)` or calls `k` exactly once and returns its result.
pub fn dispatch<'m, R: ResourceTracker, T: Tracer>(
    interp: &mut Interpreter<'m, R, T>,
    kind: PrimitiveKind,
    task_name: &str,
    args: &[Value],
    env: &mut Env,
    k: &mut Cont<'_, 'm, R, T>,
) -> StepResult {
    let result = match kind {
        PrimitiveKind::Lt | PrimitiveKind::Le | PrimitiveKind::Gt | PrimitiveKind::Ge => compare(kind, interp, args, env, k),
        PrimitiveKind::Unify => unify_task(interp, args, env, k),
        PrimitiveKind::NotUnifiable => not_unifiable_task(interp, args, env, k),
        PrimitiveKind::Plus | PrimitiveKind::Minus | PrimitiveKind::Times | PrimitiveKind::Divide => arithmetic_relation(kind, interp, args, env, k),
        PrimitiveKind::Apply => apply(interp, args, env, k),
        PrimitiveKind::Head => decompose_head(interp, args, env, k),
        PrimitiveKind::Tail => decompose_tail(interp, args, env, k),
        PrimitiveKind::ConsPrim => cons(interp, args, env, k),
        PrimitiveKind::ListLength => list_length(interp, args, env, k),
        PrimitiveKind::Member => member(interp, args, env, k),
        PrimitiveKind::Append => append(interp, args, env, k),
        PrimitiveKind::FeatureGet => feature_get(interp, args, env, k),
        PrimitiveKind::FeaturePut => feature_put(interp, args, env, k),
        PrimitiveKind::ElStore => el_store(interp, args, env, k),
        PrimitiveKind::ElDelete => el_delete(interp, args, env, k),
        PrimitiveKind::ElContains => el_contains(interp, args, env, k),
        PrimitiveKind::Print => print(interp, args, env, k),
        PrimitiveKind::CallerChainAncestor => reflection::caller_chain_ancestor(interp, args, env, k),
        PrimitiveKind::GoalChainAncestor => reflection::goal_chain_ancestor(interp, args, env, k),
        PrimitiveKind::PreviousCall => reflection::previous_call(interp, args, env, k),
        PrimitiveKind::DefinedTasks => reflection::defined_tasks(interp, args, env, k),
        PrimitiveKind::Paragraph => paragraph(interp, args, env, k),
    };
    result.map_err(|e| wrap_task_name(task_name, e))
}

fn wrap_task_name(task_name: &str, err: StepError) -> StepError {
    match err {
        StepError::ArgumentType { expected, found, task } if task.is_empty() => StepError::ArgumentType {
            task: task_name.to_owned(),
            expected,
            found,
        },
        other => other,
    }
}

fn type_err(expected: &'static str, found: &'static str) -> StepError {
    StepError::ArgumentType {
        task: String::new(),
        expected,
        found,
    }
}

fn compare<'m, R: ResourceTracker, T: Tracer>(
    kind: PrimitiveKind,
    interp: &mut Interpreter<'m, R, T>,
    args: &[Value],
    env: &mut Env,
    k: &mut Cont<'_, 'm, R, T>,
) -> StepResult {
    let a = resolve(&args[0], &env.trail, false);
    let b = resolve(&args[1], &env.trail, false);
    let Some(ord) = numeric_partial_cmp(&a, &b) else {
        return Ok(false);
    };
    let ok = match kind {
        PrimitiveKind::Lt => ord.is_lt(),
        PrimitiveKind::Le => ord.is_le(),
        PrimitiveKind::Gt => ord.is_gt(),
        PrimitiveKind::Ge => ord.is_ge(),
        _ => unreachable!(),
    };
    if ok { k(interp, env) } else { Ok(false) }
}

/// `=(A, B)`: general unification, not just numeric equality -- binds an
/// unbound side the way the `firstOf`/`case` family's pattern matching
/// does, so `[= ?x Y]` both tests and binds depending on which side is
/// already ground.
fn unify_task<'m, R: ResourceTracker, T: Tracer>(
    interp: &mut Interpreter<'m, R, T>,
    args: &[Value],
    env: &mut Env,
    k: &mut Cont<'_, 'm, R, T>,
) -> StepResult {
    match unify(&args[0], &args[1], &env.trail) {
        Some(trail) => {
            env.trail = trail;
            k(interp, env)
        }
        None => Ok(false),
    }
}

/// `!=(A, B)`: structural inequality -- succeeds iff the two resolved terms
/// do not unify, without keeping any bindings the attempt would have made.
fn not_unifiable_task<'m, R: ResourceTracker, T: Tracer>(
    interp: &mut Interpreter<'m, R, T>,
    args: &[Value],
    env: &mut Env,
    k: &mut Cont<'_, 'm, R, T>,
) -> StepResult {
    let a = resolve(&args[0], &env.trail, false);
    let b = resolve(&args[1], &env.trail, false);
    if unify(&a, &b, &env.trail).is_some() { Ok(false) } else { k(interp, env) }
}

/// `Plus(A, B, C)` and friends: an arithmetic operator exposed as a
/// three-argument relation, in the Prolog `is/2`-as-relation tradition --
/// binds the result argument via unification rather than returning a value
/// directly, so it composes with the rest of the unification engine.
fn arithmetic_relation<'m, R: ResourceTracker, T: Tracer>(
    kind: PrimitiveKind,
    interp: &mut Interpreter<'m, R, T>,
    args: &[Value],
    env: &mut Env,
    k: &mut Cont<'_, 'm, R, T>,
) -> StepResult {
    let a = resolve(&args[0], &env.trail, false);
    let b = resolve(&args[1], &env.trail, false);
    let result = match (&a, &b) {
        (Value::Int(x), Value::Int(y)) => match kind {
            PrimitiveKind::Plus => Value::Int(x.wrapping_add(*y)),
            PrimitiveKind::Minus => Value::Int(x.wrapping_sub(*y)),
            PrimitiveKind::Times => Value::Int(x.wrapping_mul(*y)),
            PrimitiveKind::Divide if *y != 0 && x % y == 0 => Value::Int(x / y),
            PrimitiveKind::Divide if *y != 0 => Value::Float(*x as f32 / *y as f32),
            PrimitiveKind::Divide => return Ok(false),
            _ => unreachable!(),
        },
        _ => {
            let (Some(x), Some(y)) = (as_f32(&a), as_f32(&b)) else {
                let bad = if as_f32(&a).is_none() { a.type_name() } else { b.type_name() };
                return Err(type_err("number", bad));
            };
            match kind {
                PrimitiveKind::Plus => Value::Float(x + y),
                PrimitiveKind::Minus => Value::Float(x - y),
                PrimitiveKind::Times => Value::Float(x * y),
                PrimitiveKind::Divide => Value::Float(x / y),
                _ => unreachable!(),
            }
        }
    };
    match unify(&args[2], &result, &env.trail) {
        Some(trail) => {
            env.trail = trail;
            k(interp, env)
        }
        None => Ok(false),
    }
}

fn as_f32(v: &Value) -> Option<f32> {
    match v {
        Value::Int(i) => Some(*i as f32),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

/// `Apply(TaskRef, ArgsTuple)`: calls a first-class task reference with
/// arguments supplied as a tuple, the higher-order escape hatch for code
/// that wants to pass a task around as a value.
fn apply<'m, R: ResourceTracker, T: Tracer>(interp: &mut Interpreter<'m, R, T>, args: &[Value], env: &mut Env, k: &mut Cont<'_, 'm, R, T>) -> StepResult {
    let target = resolve(&args[0], &env.trail, false);
    let Value::Task(task_id) = target else {
        return Err(type_err("task reference", target.type_name()));
    };
    let call_args = match resolve(&args[1], &env.trail, false) {
        Value::Tuple(items) => items.to_vec(),
        other => return Err(type_err("tuple", other.type_name())),
    };
    interp.call(task_id, &call_args, env, k)
}

fn decompose_head<'m, R: ResourceTracker, T: Tracer>(
    interp: &mut Interpreter<'m, R, T>,
    args: &[Value],
    env: &mut Env,
    k: &mut Cont<'_, 'm, R, T>,
) -> StepResult {
    match resolve(&args[0], &env.trail, false) {
        Value::Pair(pair) => match unify(&args[1], &pair.first, &env.trail) {
            Some(trail) => {
                env.trail = trail;
                k(interp, env)
            }
            None => Ok(false),
        },
        _ => Ok(false),
    }
}

fn decompose_tail<'m, R: ResourceTracker, T: Tracer>(
    interp: &mut Interpreter<'m, R, T>,
    args: &[Value],
    env: &mut Env,
    k: &mut Cont<'_, 'm, R, T>,
) -> StepResult {
    match resolve(&args[0], &env.trail, false) {
        Value::Pair(pair) => match unify(&args[1], &pair.rest, &env.trail) {
            Some(trail) => {
                env.trail = trail;
                k(interp, env)
            }
            None => Ok(false),
        },
        _ => Ok(false),
    }
}

fn cons<'m, R: ResourceTracker, T: Tracer>(interp: &mut Interpreter<'m, R, T>, args: &[Value], env: &mut Env, k: &mut Cont<'_, 'm, R, T>) -> StepResult {
    let pair = Value::cons(args[0].clone(), args[1].clone());
    match unify(&args[2], &pair, &env.trail) {
        Some(trail) => {
            env.trail = trail;
            k(interp, env)
        }
        None => Ok(false),
    }
}

fn list_length<'m, R: ResourceTracker, T: Tracer>(
    interp: &mut Interpreter<'m, R, T>,
    args: &[Value],
    env: &mut Env,
    k: &mut Cont<'_, 'm, R, T>,
) -> StepResult {
    let mut current = resolve(&args[0], &env.trail, false);
    let mut count = 0i32;
    loop {
        match current {
            Value::Null => break,
            Value::Pair(pair) => {
                count += 1;
                current = resolve(&pair.rest, &env.trail, false);
            }
            Value::Tuple(items) => {
                count = items.len() as i32;
                break;
            }
            _ => return Ok(false),
        }
    }
    match unify(&args[1], &Value::Int(count), &env.trail) {
        Some(trail) => {
            env.trail = trail;
            k(interp, env)
        }
        None => Ok(false),
    }
}

fn member<'m, R: ResourceTracker, T: Tracer>(interp: &mut Interpreter<'m, R, T>, args: &[Value], env: &mut Env, k: &mut Cont<'_, 'm, R, T>) -> StepResult {
    let items = list_items(&resolve(&args[1], &env.trail, false));
    for item in items {
        let mark = env.trail.clone();
        if let Some(trail) = unify(&args[0], &item, &env.trail) {
            env.trail = trail;
            if k(interp, env)? {
                return Ok(true);
            }
        }
        env.trail = mark;
    }
    Ok(false)
}

fn append<'m, R: ResourceTracker, T: Tracer>(interp: &mut Interpreter<'m, R, T>, args: &[Value], env: &mut Env, k: &mut Cont<'_, 'm, R, T>) -> StepResult {
    let mut items = list_items(&resolve(&args[0], &env.trail, false));
    items.extend(list_items(&resolve(&args[1], &env.trail, false)));
    let joined = Value::list(items);
    match unify(&args[2], &joined, &env.trail) {
        Some(trail) => {
            env.trail = trail;
            k(interp, env)
        }
        None => Ok(false),
    }
}

fn list_items(value: &Value) -> Vec<Value> {
    let mut items = Vec::new();
    let mut current = value.clone();
    loop {
        match current {
            Value::Null => break,
            Value::Pair(pair) => {
                items.push(pair.first.clone());
                current = pair.rest.clone();
            }
            Value::Tuple(values) => {
                items.extend(values.iter().cloned());
                break;
            }
            _ => break,
        }
    }
    items
}

fn symbol_arg(term: &Value, env: &Env) -> Result<SymbolId, StepError> {
    match resolve(term, &env.trail, false) {
        Value::Symbol(s) => Ok(s),
        other => Err(type_err("symbol", other.type_name())),
    }
}

/// `FeatureGet(FS, Key, Value)`: looks up a named feature, falling through
/// to the structure's open "next" tail the same way unification does.
fn feature_get<'m, R: ResourceTracker, T: Tracer>(
    interp: &mut Interpreter<'m, R, T>,
    args: &[Value],
    env: &mut Env,
    k: &mut Cont<'_, 'm, R, T>,
) -> StepResult {
    let key_sym = symbol_arg(&args[1], env)?;
    let mut current = resolve(&args[0], &env.trail, false);
    loop {
        match current {
            Value::FeatureStructure(fs) => {
                if let Some((_, v)) = fs.features.iter().find(|(k, _)| *k == key_sym) {
                    let v = v.clone();
                    return match unify(&args[2], &v, &env.trail) {
                        Some(trail) => {
                            env.trail = trail;
                            k(interp, env)
                        }
                        None => Ok(false),
                    };
                }
                current = resolve(&fs.next, &env.trail, false);
            }
            _ => return Ok(false),
        }
    }
}

/// `FeaturePut(FS, Key, Value, FS2)`: builds a new feature structure with
/// `Key` rebound to `Value`, unifying the result into `FS2`. Never mutates
/// `FS` in place, consistent with every other persistent structure here.
fn feature_put<'m, R: ResourceTracker, T: Tracer>(
    interp: &mut Interpreter<'m, R, T>,
    args: &[Value],
    env: &mut Env,
    k: &mut Cont<'_, 'm, R, T>,
) -> StepResult {
    let key_sym = symbol_arg(&args[1], env)?;
    let base = resolve(&args[0], &env.trail, false);
    let Value::FeatureStructure(fs) = base else {
        return Err(type_err("feature-structure", base.type_name()));
    };
    let mut features: Vec<(SymbolId, Value)> = fs.features.iter().filter(|(k, _)| *k != key_sym).cloned().collect();
    features.push((key_sym, args[2].clone()));
    let updated = Value::FeatureStructure(Rc::new(crate::value::FeatureStructure {
        features: Rc::from(features),
        next: fs.next.clone(),
    }));
    match unify(&args[3], &updated, &env.trail) {
        Some(trail) => {
            env.trail = trail;
            k(interp, env)
        }
        None => Ok(false),
    }
}

/// State element used as the exclusion-logic root; `ElStore`/`ElDelete`/
/// `ElContains` all read and (for the first two) write through it.
fn el_path(value: &Value, env: &Env) -> Result<Vec<PathSegment>, StepError> {
    let resolved = resolve(value, &env.trail, false);
    let items = list_items(&resolved);
    let mut path = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Tuple(pair) if pair.len() == 2 => {
                let exclusive = matches!(resolve(&pair[0], &env.trail, false), Value::Bool(true));
                let key = symbol_arg(&pair[1], env)?;
                path.push(if exclusive { PathSegment::Exclusive(key) } else { PathSegment::Inclusive(key) });
            }
            _ => return Err(type_err("exclusion-logic path", "malformed path element")),
        }
    }
    Ok(path)
}

/// The exclusion-logic store lives in one reserved state element. Module
/// setup interns its name (`__ElRoot`) before compiling any user code, which
/// guarantees it id 0 since interning is first-come-first-served.
fn el_root_element() -> crate::intern::StateElementId {
    crate::intern::StateElementId::from(0u32)
}

fn current_el_root(env: &Env) -> ElNode {
    match env.state.get(el_root_element()) {
        Some(Value::Opaque(opaque)) => opaque.downcast_ref::<ElNode>().cloned().unwrap_or_default(),
        _ => ElNode::empty(),
    }
}

fn el_store<'m, R: ResourceTracker, T: Tracer>(
    interp: &mut Interpreter<'m, R, T>,
    args: &[Value],
    env: &mut Env,
    k: &mut Cont<'_, 'm, R, T>,
) -> StepResult {
    let path = el_path(&args[0], env)?;
    let root = current_el_root(env).store(&path);
    env.state = env.state.set(el_root_element(), Value::Opaque(Rc::new(root)));
    k(interp, env)
}

fn el_delete<'m, R: ResourceTracker, T: Tracer>(
    interp: &mut Interpreter<'m, R, T>,
    args: &[Value],
    env: &mut Env,
    k: &mut Cont<'_, 'm, R, T>,
) -> StepResult {
    let path = el_path(&args[0], env)?;
    let root = current_el_root(env).delete(&path);
    env.state = env.state.set(el_root_element(), Value::Opaque(Rc::new(root)));
    k(interp, env)
}

fn el_contains<'m, R: ResourceTracker, T: Tracer>(
    interp: &mut Interpreter<'m, R, T>,
    args: &[Value],
    env: &mut Env,
    k: &mut Cont<'_, 'm, R, T>,
) -> StepResult {
    let path = el_path(&args[0], env)?;
    if current_el_root(env).contains(&path) { k(interp, env) } else { Ok(false) }
}

/// `Print(Text)`: a debug side-channel distinct from `Emit` -- it writes
/// through the tracer rather than the output buffer, so it's visible in a
/// trace log without perturbing the text a program actually generates.
fn print<'m, R: ResourceTracker, T: Tracer>(interp: &mut Interpreter<'m, R, T>, args: &[Value], env: &mut Env, k: &mut Cont<'_, 'm, R, T>) -> StepResult {
    let value = resolve(&args[0], &env.trail, false);
    eprintln!("{value:?}");
    k(interp, env)
}

/// `Paragraph`: emits a blank-line break, two newline tokens, between
/// generated passages.
fn paragraph<'m, R: ResourceTracker, T: Tracer>(
    interp: &mut Interpreter<'m, R, T>,
    _args: &[Value],
    env: &mut Env,
    k: &mut Cont<'_, 'm, R, T>,
) -> StepResult {
    env.output.push(Token::Newline);
    env.output.push(Token::Newline);
    k(interp, env)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_items_reads_proper_list() {
        let v = Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let items = list_items(&v);
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn list_items_reads_tuple_as_flat_items() {
        let v = Value::tuple(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(list_items(&v).len(), 2);
    }
}
