//! The continuation-passing interpreter.
//!
//! There are no preemption points inside a step; a step either returns
//! immediately or recursively invokes sub-steps, so suspension (checked via
//! [`ResourceTracker`]) only happens at method entry. A success
//! continuation `k` is a Rust closure capturing the remaining work; calling
//! it realizes the "continue with the next step" half of backtracking, and
//! it returning `false` (because the caller wants another solution) drives
//! the search back into whichever step produced the binding, the same way
//! the underlying call stack would unwind regardless.
//!
//! Every step here is a free function taking the interpreter as an explicit
//! argument rather than a method on `Interpreter`. A method that captured
//! `&mut self` inside the continuation closure it then passes back into
//! `self.something(...)` would need two live mutable borrows of `self` at
//! once; threading `interp: &mut Interpreter<..>` through as a plain
//! parameter sidesteps that, since each continuation only captures the
//! smaller pieces of state it actually needs and receives `interp` fresh
//! each time it's invoked.

use std::rc::Rc;

use rand::{Rng, SeedableRng, seq::SliceRandom};
use rand_chacha::ChaCha8Rng;

use crate::{
    error::StepError,
    frame::Frame,
    intern::{Interns, StateElementId, TaskId},
    output::{OutputBuffer, RenderOptions, Token, render_with_options, untokenize},
    resource::ResourceTracker,
    state::{State, StateElementRegistry},
    step_chain::{BinOp, CaseArm, CompoundTerm, Expr, ExtremumKind, FindMode, Step, Term},
    task::{Task, TaskBody, TaskFlags, TaskTable},
    tracer::Tracer,
    trail::Trail,
    unify::{resolve, unify},
    value::{LogicVar, Value, VarCounter, numeric_partial_cmp},
};

/// Mutable environment threaded through every step of a single call: logic
/// variables, bindings, persistent state, and emitted output. Distinct from
/// [`Interpreter`], which holds configuration shared across many calls.
pub struct Env {
    pub trail: Trail,
    pub state: State,
    pub output: OutputBuffer,
    pub locals: Vec<Rc<LogicVar>>,
    pub frame: Rc<Frame>,
    pub var_counter: VarCounter,
}

impl Env {
    #[must_use]
    pub fn new(frame: Rc<Frame>) -> Self {
        Self {
            trail: Trail::empty(),
            state: State::empty(),
            output: OutputBuffer::new(),
            locals: Vec::new(),
            frame,
            var_counter: VarCounter::new(),
        }
    }
}

/// A fallible, possibly-partial outcome: `Ok(true)` means "succeeded and `k`
/// accepted the first solution it was offered"; `Ok(false)` means every
/// alternative was exhausted without `k` accepting.
pub type StepResult = Result<bool, StepError>;

/// Continuation invoked on each candidate solution; returns whether the
/// overall call should stop searching (`true`) or backtrack for another
/// solution (`false`). Takes the interpreter as an explicit argument for
/// the reason given in the module doc comment.
pub type Cont<'k, 'm, R, T> = dyn FnMut(&mut Interpreter<'m, R, T>, &mut Env) -> StepResult + 'k;

/// Shared, read-only interpreter configuration: the task table, symbol
/// tables, resource limits, and tracing hook.
pub struct Interpreter<'m, R: ResourceTracker, T: Tracer> {
    pub tasks: &'m TaskTable,
    pub interns: &'m Interns,
    pub state_decls: &'m StateElementRegistry,
    pub resources: R,
    pub tracer: T,
    pub rng: ChaCha8Rng,
}

impl<'m, R: ResourceTracker, T: Tracer> Interpreter<'m, R, T> {
    pub fn new(tasks: &'m TaskTable, interns: &'m Interns, state_decls: &'m StateElementRegistry, resources: R, tracer: T, seed: u64) -> Self {
        Self {
            tasks,
            interns,
            state_decls,
            resources,
            tracer,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Calls `task` with `args` bound in a fresh frame, offering every
    /// solution to `k` until it accepts one or they're exhausted.
    pub fn call(&mut self, task_id: TaskId, args: &[Value], env: &mut Env, k: &mut Cont<'_, 'm, R, T>) -> StepResult {
        call(self, task_id, args, env, k)
    }

    /// Executes a single compiled step, invoking `k` on each solution.
    pub fn exec(&mut self, step: &Step, env: &mut Env, k: &mut Cont<'_, 'm, R, T>) -> StepResult {
        exec(self, step, env, k)
    }
}

fn call<'m, R: ResourceTracker, T: Tracer>(
    interp: &mut Interpreter<'m, R, T>,
    task_id: TaskId,
    args: &[Value],
    env: &mut Env,
    k: &mut Cont<'_, 'm, R, T>,
) -> StepResult {
    interp.resources.enter_frame(env.frame.depth as usize).map_err(StepError::from)?;
    interp.tracer.on_enter(task_id, args);

    let Some(task) = interp.tasks.get(task_id) else {
        return Err(StepError::CallFailed {
            task: interp.interns.task_name(task_id).to_owned(),
            args: args.to_vec(),
        });
    };

    if args.len() != task.arity {
        return Err(StepError::ArgumentCount {
            task: interp.interns.task_name(task_id).to_owned(),
            expected: task.arity,
            found: args.len(),
        });
    }

    let result = match &task.body {
        TaskBody::Primitive(kind) => {
            let name = interp.interns.task_name(task_id).to_owned();
            crate::primitives::dispatch(interp, *kind, &name, args, env, k)
        }
        TaskBody::Methods(methods) => call_methods(interp, task, task_id, methods, args, env, k),
    };

    match &result {
        Ok(true) => interp.tracer.on_succeed(task_id),
        Ok(false) => interp.tracer.on_call_fail(task_id),
        Err(_) => {}
    }
    interp.resources.exit_frame();
    result
}

fn call_methods<'m, R: ResourceTracker, T: Tracer>(
    interp: &mut Interpreter<'m, R, T>,
    task: &Task,
    task_id: TaskId,
    methods: &[crate::task::Method],
    args: &[Value],
    env: &mut Env,
    k: &mut Cont<'_, 'm, R, T>,
) -> StepResult {
    if methods.is_empty() {
        return total_failure(interp, task, task_id, args);
    }
    let mut order: Vec<usize> = (0..methods.len()).collect();
    if task.flags.contains(TaskFlags::RANDOMLY) {
        order = weighted_order(&mut interp.rng, methods, order);
    }

    for method_index in order {
        interp.resources.enter_method().map_err(StepError::from)?;
        let method = &methods[method_index];
        let mark = env.trail.clone();
        let state_mark = env.state.clone();
        let output_mark = env.output.watermark();
        let locals_mark = env.locals.len();

        match try_method(interp, task_id, method_index, method, args, env, k) {
            Ok(true) => return Ok(true),
            Ok(false) => {
                interp.tracer.on_method_fail(task_id, method_index);
                env.trail = mark;
                env.state = state_mark;
                env.output.restore(output_mark);
                env.locals.truncate(locals_mark);
            }
            Err(e) => return Err(e),
        }
    }
    total_failure(interp, task, task_id, args)
}

/// No method matched (or succeeded): a call failure, unless the task is
/// declared `[fallible]`, in which case it's just `false`/no solution.
fn total_failure<'m, R: ResourceTracker, T: Tracer>(interp: &Interpreter<'m, R, T>, task: &Task, task_id: TaskId, args: &[Value]) -> StepResult {
    if task.is_fallible() {
        Ok(false)
    } else {
        Err(StepError::CallFailed {
            task: interp.interns.task_name(task_id).to_owned(),
            args: args.to_vec(),
        })
    }
}

/// Efraimidis-Spirakis weighted random permutation: each index gets a key
/// `u^(1/weight)` for `u` uniform on `(0, 1]`, then indices sort by
/// descending key. Reduces to a plain shuffle when all weights are equal.
fn weighted_order(rng: &mut ChaCha8Rng, methods: &[crate::task::Method], indices: Vec<usize>) -> Vec<usize> {
    let mut keyed: Vec<(f32, usize)> = indices
        .into_iter()
        .map(|i| {
            let weight = methods[i].weight.max(f32::MIN_POSITIVE);
            let u: f32 = rng.gen_range(f32::MIN_POSITIVE..1.0);
            (u.powf(1.0 / weight), i)
        })
        .collect();
    keyed.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    keyed.into_iter().map(|(_, i)| i).collect()
}

#[allow(clippy::too_many_arguments)]
fn try_method<'m, R: ResourceTracker, T: Tracer>(
    interp: &mut Interpreter<'m, R, T>,
    task_id: TaskId,
    method_index: usize,
    method: &crate::task::Method,
    args: &[Value],
    env: &mut Env,
    k: &mut Cont<'_, 'm, R, T>,
) -> StepResult {
    let child_frame = Frame::child(&env.frame, task_id, method_index, Vec::new(), args.to_vec(), method.loc.clone());
    let parent_frame = std::mem::replace(&mut env.frame, child_frame);

    let mut trail = env.trail.clone();
    let mut locals: Vec<Rc<LogicVar>> = Vec::with_capacity(method.local_count);
    for i in 0..method.local_count {
        locals.push(Rc::new(env.var_counter.fresh(env.frame.depth, &format!("?L{i}"))));
    }

    let mut ok = true;
    for (pattern, arg) in method.head.iter().zip(args.iter()) {
        let term = instantiate_term(pattern, &locals, &env.state, interp.state_decls);
        match unify(&term, arg, &trail) {
            Some(t) => trail = t,
            None => {
                ok = false;
                break;
            }
        }
    }
    if !ok {
        env.frame = parent_frame;
        return Ok(false);
    }
    env.trail = trail;
    let saved_locals = std::mem::replace(&mut env.locals, locals);

    let result = exec(interp, &method.body, env, k);

    env.frame = parent_frame;
    env.locals = saved_locals;
    result
}

fn exec<'m, R: ResourceTracker, T: Tracer>(interp: &mut Interpreter<'m, R, T>, step: &Step, env: &mut Env, k: &mut Cont<'_, 'm, R, T>) -> StepResult {
    match step {
        Step::Emit(tokens) => {
            env.output.extend(tokens.iter().cloned());
            k(interp, env)
        }
        Step::NoOp => k(interp, env),
        Step::Fail => Ok(false),
        Step::Call { task, args, .. } => {
            let resolved: Vec<Value> = args.iter().map(|t| instantiate_term(t, &env.locals, &env.state, interp.state_decls)).collect();
            call(interp, *task, &resolved, env, k)
        }
        Step::Assignment { element, expr } => {
            let value = eval_expr(expr, &env.locals, &env.trail, &env.state, interp.state_decls)?;
            env.state = env.state.set(*element, value);
            k(interp, env)
        }
        Step::Seq(steps) => exec_seq(interp, steps, 0, env, k),
        Step::Or(alternatives) => exec_alternatives(interp, alternatives, env, k),
        Step::FirstOf(alternatives) => exec_first_of(interp, alternatives, env, k),
        Step::Randomly(alternatives) => {
            let mut order: Vec<usize> = (0..alternatives.len()).collect();
            order.shuffle(&mut interp.rng);
            let shuffled: Vec<Step> = order.iter().map(|&i| alternatives[i].clone()).collect();
            exec_alternatives(interp, &shuffled, env, k)
        }
        Step::Sequence { alternatives, position_element } => exec_sequence(interp, alternatives, *position_element, env, k),
        Step::Cool { alternatives, cycle, history_element } => exec_cool(interp, alternatives, *cycle, *history_element, env, k),
        Step::Not(inner) => exec_not(interp, inner, env, k),
        Step::NotAny(alternatives) => {
            let combined = Step::Or(alternatives.clone());
            exec_not(interp, &combined, env, k)
        }
        Step::Once(inner) => exec_once(interp, inner, env, k, false),
        Step::ExactlyOnce(inner) => exec_once(interp, inner, env, k, true),
        Step::CountAttempts { local, limit } => exec_count_attempts(interp, *local, *limit, env, k),
        Step::ForEach { generator, body } => exec_for_each(interp, generator, body, env, k),
        Step::Implies { generator, body } => exec_implies(interp, generator, body, env, k),
        Step::FindAll { generator, local, mode } => exec_find_all(interp, generator, *local, *mode, env, k),
        Step::Extremum { kind, generator, score_local } => exec_extremum(interp, *kind, generator, *score_local, env, k),
        Step::Case { scrutinee, arms } => exec_case(interp, scrutinee, arms, env, k),
        Step::Parse { call: inner, text } => exec_parse(interp, inner, text, env, k),
        Step::SaveText { call: inner, local } => exec_save_text(interp, inner, *local, env, k),
        Step::CallDiscardingStateChanges(inner) => {
            let state_mark = env.state.clone();
            let result = exec(interp, inner, env, k)?;
            if result {
                env.state = state_mark;
            }
            Ok(result)
        }
        Step::Throw { message, bail_out } => exec_throw(interp, message, *bail_out, env),
    }
}

fn exec_seq<'m, R: ResourceTracker, T: Tracer>(
    interp: &mut Interpreter<'m, R, T>,
    steps: &[Step],
    idx: usize,
    env: &mut Env,
    k: &mut Cont<'_, 'm, R, T>,
) -> StepResult {
    match steps.get(idx) {
        None => k(interp, env),
        Some(first) => exec(interp, first, env, &mut |interp, env| exec_seq(interp, steps, idx + 1, env, k)),
    }
}

fn exec_alternatives<'m, R: ResourceTracker, T: Tracer>(interp: &mut Interpreter<'m, R, T>, alternatives: &[Step], env: &mut Env, k: &mut Cont<'_, 'm, R, T>) -> StepResult {
    for alt in alternatives {
        let mark = env.trail.clone();
        let state_mark = env.state.clone();
        let output_mark = env.output.watermark();
        if exec(interp, alt, env, k)? {
            return Ok(true);
        }
        env.trail = mark;
        env.state = state_mark;
        env.output.restore(output_mark);
    }
    Ok(false)
}

fn exec_first_of<'m, R: ResourceTracker, T: Tracer>(interp: &mut Interpreter<'m, R, T>, alternatives: &[Step], env: &mut Env, k: &mut Cont<'_, 'm, R, T>) -> StepResult {
    for alt in alternatives {
        let mark = env.trail.clone();
        let state_mark = env.state.clone();
        let output_mark = env.output.watermark();
        let mut matched = false;
        let result = exec(interp, alt, env, &mut |interp, env| {
            matched = true;
            k(interp, env)
        })?;
        if matched {
            return Ok(result);
        }
        env.trail = mark;
        env.state = state_mark;
        env.output.restore(output_mark);
    }
    Ok(false)
}

fn exec_sequence<'m, R: ResourceTracker, T: Tracer>(
    interp: &mut Interpreter<'m, R, T>,
    alternatives: &[Step],
    position_element: StateElementId,
    env: &mut Env,
    k: &mut Cont<'_, 'm, R, T>,
) -> StepResult {
    if alternatives.is_empty() {
        return Ok(false);
    }
    let position = match env.state.get(position_element) {
        Some(Value::Int(n)) => n as usize % alternatives.len(),
        _ => 0,
    };
    env.state = env.state.set(position_element, Value::Int(((position + 1) % alternatives.len()) as i32));
    exec(interp, &alternatives[position], env, k)
}

/// `cool N`: picks uniformly at random among alternatives not chosen in the
/// last `cycle` picks (tracked as a window of indices in `history_element`),
/// so no alternative repeats within `cycle` invocations.
fn exec_cool<'m, R: ResourceTracker, T: Tracer>(
    interp: &mut Interpreter<'m, R, T>,
    alternatives: &[Step],
    cycle: u32,
    history_element: StateElementId,
    env: &mut Env,
    k: &mut Cont<'_, 'm, R, T>,
) -> StepResult {
    if alternatives.is_empty() {
        return Ok(false);
    }
    let window = (cycle as usize).min(alternatives.len() - 1);
    let history: Vec<i32> = match env.state.get(history_element) {
        Some(Value::Tuple(items)) => items.iter().filter_map(|v| if let Value::Int(i) = v { Some(*i) } else { None }).collect(),
        _ => Vec::new(),
    };
    let eligible: Vec<usize> = (0..alternatives.len()).filter(|i| !history.contains(&(*i as i32))).collect();
    let chosen = *eligible.choose(&mut interp.rng).unwrap_or(&(alternatives.len() - 1));

    let mut next_history = history;
    next_history.push(chosen as i32);
    if next_history.len() > window {
        next_history.remove(0);
    }
    env.state = env.state.set(history_element, Value::tuple(next_history.into_iter().map(Value::Int).collect()));
    exec(interp, &alternatives[chosen], env, k)
}

fn exec_not<'m, R: ResourceTracker, T: Tracer>(interp: &mut Interpreter<'m, R, T>, inner: &Step, env: &mut Env, k: &mut Cont<'_, 'm, R, T>) -> StepResult {
    let mark = env.trail.clone();
    let state_mark = env.state.clone();
    let output_mark = env.output.watermark();
    let succeeded = exec(interp, inner, env, &mut |_interp, _env| Ok(true))?;
    env.trail = mark;
    env.state = state_mark;
    env.output.restore(output_mark);
    if succeeded { Ok(false) } else { k(interp, env) }
}

fn exec_once<'m, R: ResourceTracker, T: Tracer>(interp: &mut Interpreter<'m, R, T>, inner: &Step, env: &mut Env, k: &mut Cont<'_, 'm, R, T>, required: bool) -> StepResult {
    let mut found = false;
    let accepted = exec(interp, inner, env, &mut |interp, env| {
        found = true;
        k(interp, env)
    })?;
    if !found && required {
        return Err(StepError::CallFailed {
            task: "exactlyOnce".to_owned(),
            args: Vec::new(),
        });
    }
    Ok(accepted)
}

fn exec_count_attempts<'m, R: ResourceTracker, T: Tracer>(
    interp: &mut Interpreter<'m, R, T>,
    local: usize,
    limit: Option<u32>,
    env: &mut Env,
    k: &mut Cont<'_, 'm, R, T>,
) -> StepResult {
    let max = limit.unwrap_or(u32::MAX);
    for n in 0..max {
        let var = env.locals[local].clone();
        let mark = env.trail.clone();
        env.trail = env.trail.bind(var, Value::Int(n as i32));
        if k(interp, env)? {
            return Ok(true);
        }
        env.trail = mark;
    }
    Ok(false)
}

/// `forEach`/`doAll`: runs `body` once per solution of `generator`, each
/// time discarding only `generator`'s own bindings before the next
/// iteration; text and state changes survive across iterations.
fn exec_for_each<'m, R: ResourceTracker, T: Tracer>(
    interp: &mut Interpreter<'m, R, T>,
    generator: &Step,
    body: &Step,
    env: &mut Env,
    k: &mut Cont<'_, 'm, R, T>,
) -> StepResult {
    let gen_mark = env.trail.clone();
    let result = exec(interp, generator, env, &mut |interp, env| {
        let body_mark = env.trail.clone();
        exec(interp, body, env, &mut |_interp, _env| Ok(true))?;
        env.trail = body_mark;
        Ok(false)
    });
    env.trail = gen_mark;
    result?;
    k(interp, env)
}

/// `implies`: if `generator` has at least one solution, `body` must succeed
/// for every one of them (like `forEach`, but the whole step fails if any
/// iteration's body fails); if `generator` has none, succeeds trivially.
fn exec_implies<'m, R: ResourceTracker, T: Tracer>(
    interp: &mut Interpreter<'m, R, T>,
    generator: &Step,
    body: &Step,
    env: &mut Env,
    k: &mut Cont<'_, 'm, R, T>,
) -> StepResult {
    let gen_mark = env.trail.clone();
    let mut failed = false;
    let result = exec(interp, generator, env, &mut |interp, env| {
        let body_mark = env.trail.clone();
        let succeeded = exec(interp, body, env, &mut |_interp, _env| Ok(true))?;
        env.trail = body_mark;
        if !succeeded {
            failed = true;
            return Ok(true);
        }
        Ok(false)
    });
    env.trail = gen_mark;
    result?;
    if failed {
        Ok(false)
    } else {
        k(interp, env)
    }
}

fn exec_find_all<'m, R: ResourceTracker, T: Tracer>(
    interp: &mut Interpreter<'m, R, T>,
    generator: &Step,
    local: usize,
    mode: FindMode,
    env: &mut Env,
    k: &mut Cont<'_, 'm, R, T>,
) -> StepResult {
    let mut witnesses: Vec<Value> = Vec::new();
    let mark = env.trail.clone();
    let state_mark = env.state.clone();
    let output_mark = env.output.watermark();
    exec(interp, generator, env, &mut |_interp, env| {
        let text = untokenize(env.output.tokens_since(output_mark));
        witnesses.push(Value::String(Rc::from(text.as_str())));
        let enough = matches!(mode, FindMode::FirstN(n) if witnesses.len() as u32 >= n);
        Ok(enough)
    })?;
    env.trail = mark;
    env.state = state_mark;
    env.output.restore(output_mark);

    if matches!(mode, FindMode::Unique) {
        let mut seen = std::collections::HashSet::new();
        witnesses.retain(|v| match v {
            Value::String(s) => seen.insert(s.clone()),
            _ => true,
        });
    }
    if let FindMode::AtMostN(n) = mode {
        witnesses.truncate(n as usize);
    }

    let var = env.locals[local].clone();
    env.trail = env.trail.bind(var, Value::list(witnesses));
    k(interp, env)
}

fn exec_extremum<'m, R: ResourceTracker, T: Tracer>(
    interp: &mut Interpreter<'m, R, T>,
    kind: ExtremumKind,
    generator: &Step,
    score_local: usize,
    env: &mut Env,
    k: &mut Cont<'_, 'm, R, T>,
) -> StepResult {
    let mut best: Option<(f32, Trail, State, Vec<Token>)> = None;
    let mark = env.trail.clone();
    let state_mark = env.state.clone();
    let output_mark = env.output.watermark();
    exec(interp, generator, env, &mut |_interp, env| {
        let score_var = env.locals[score_local].clone();
        let score = match env.trail.deref(&Value::Var(score_var)) {
            Value::Int(i) => i as f32,
            Value::Float(f) => f,
            _ => 0.0,
        };
        let better = match &best {
            None => true,
            Some((b, ..)) => match kind {
                ExtremumKind::Max => score > *b,
                ExtremumKind::Min => score < *b,
            },
        };
        if better {
            best = Some((score, env.trail.clone(), env.state.clone(), env.output.tokens_since(output_mark).to_vec()));
        }
        Ok(false)
    })?;
    env.trail = mark;
    env.state = state_mark;
    env.output.restore(output_mark);

    match best {
        None => Ok(false),
        Some((_, trail, state, tokens)) => {
            env.trail = trail;
            env.state = state;
            env.output.extend(tokens);
            k(interp, env)
        }
    }
}

fn exec_case<'m, R: ResourceTracker, T: Tracer>(
    interp: &mut Interpreter<'m, R, T>,
    scrutinee: &Term,
    arms: &[CaseArm],
    env: &mut Env,
    k: &mut Cont<'_, 'm, R, T>,
) -> StepResult {
    let value = instantiate_term(scrutinee, &env.locals, &env.state, interp.state_decls);
    for arm in arms {
        let pattern = instantiate_term(&arm.pattern, &env.locals, &env.state, interp.state_decls);
        let mark = env.trail.clone();
        if let Some(trail) = unify(&pattern, &value, &env.trail) {
            env.trail = trail;
            return exec(interp, &arm.body, env, k);
        }
        env.trail = mark;
    }
    Ok(false)
}

/// Runs `call`, then succeeds only if the text it rendered matches `text`
/// byte-for-byte. Used to parse input by driving ordinary generation
/// against it.
fn exec_parse<'m, R: ResourceTracker, T: Tracer>(
    interp: &mut Interpreter<'m, R, T>,
    call: &Step,
    text: &Term,
    env: &mut Env,
    k: &mut Cont<'_, 'm, R, T>,
) -> StepResult {
    let target = instantiate_term(text, &env.locals, &env.state, interp.state_decls);
    let target_text = match resolve(&target, &env.trail, false) {
        Value::String(s) => s.to_string(),
        other => {
            return Err(StepError::ArgumentType {
                task: "Parse".to_owned(),
                expected: "string",
                found: other.type_name(),
            });
        }
    };
    let output_mark = env.output.watermark();
    let mut accepted = false;
    exec(interp, call, env, &mut |interp, env| {
        let produced = untokenize(env.output.tokens_since(output_mark));
        if produced == target_text {
            accepted = true;
            k(interp, env)
        } else {
            Ok(false)
        }
    })?;
    if !accepted {
        env.output.restore(output_mark);
    }
    Ok(accepted)
}

fn exec_save_text<'m, R: ResourceTracker, T: Tracer>(
    interp: &mut Interpreter<'m, R, T>,
    call: &Step,
    local: usize,
    env: &mut Env,
    k: &mut Cont<'_, 'm, R, T>,
) -> StepResult {
    let output_mark = env.output.watermark();
    let mut accepted = false;
    exec(interp, call, env, &mut |interp, env| {
        let text = render_with_options(env.output.tokens_since(output_mark), &RenderOptions::default());
        env.output.restore(output_mark);
        let var = env.locals[local].clone();
        env.trail = env.trail.bind(var, Value::String(Rc::from(text.as_str())));
        accepted = true;
        k(interp, env)
    })?;
    Ok(accepted)
}

fn exec_throw<'m, R: ResourceTracker, T: Tracer>(interp: &mut Interpreter<'m, R, T>, message: &Step, bail_out: bool, env: &mut Env) -> StepResult {
    let output_mark = env.output.watermark();
    exec(interp, message, env, &mut |_interp, _env| Ok(true))?;
    let text = render_with_options(env.output.tokens_since(output_mark), &RenderOptions::default());
    env.output.restore(output_mark);
    if bail_out {
        Err(StepError::BailOut { message: text })
    } else {
        Err(StepError::UserThrow { message: text })
    }
}

/// Materializes a compiled [`Term`] into a runtime [`Value`], reading locals
/// and state elements as needed.
fn instantiate_term(term: &Term, locals: &[Rc<LogicVar>], state: &State, decls: &StateElementRegistry) -> Value {
    match term {
        Term::Literal(v) => v.clone(),
        Term::Local(i) => Value::Var(locals[*i].clone()),
        Term::StateElement(id) => state.get(*id).or_else(|| decls.default_for(*id)).unwrap_or(Value::Null),
        Term::Compound(CompoundTerm::Tuple(items)) => Value::tuple(items.iter().map(|t| instantiate_term(t, locals, state, decls)).collect()),
        Term::Compound(CompoundTerm::Cons(first, rest)) => {
            Value::cons(instantiate_term(first, locals, state, decls), instantiate_term(rest, locals, state, decls))
        }
    }
}

fn eval_expr(expr: &Expr, locals: &[Rc<LogicVar>], trail: &Trail, state: &State, decls: &StateElementRegistry) -> Result<Value, StepError> {
    match expr {
        Expr::Term(t) => Ok(resolve(&instantiate_term(t, locals, state, decls), trail, false)),
        Expr::Not(inner) => match eval_expr(inner, locals, trail, state, decls)? {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            other => Err(StepError::ArgumentType {
                task: "not".to_owned(),
                expected: "boolean",
                found: other.type_name(),
            }),
        },
        Expr::BinOp(op, lhs, rhs) => {
            let l = eval_expr(lhs, locals, trail, state, decls)?;
            let r = eval_expr(rhs, locals, trail, state, decls)?;
            eval_binop(*op, &l, &r)
        }
    }
}

fn eval_binop(op: BinOp, l: &Value, r: &Value) -> Result<Value, StepError> {
    use BinOp::{Add, And, Div, Eq as OpEq, Ge, Gt, Le, Lt, Mod, Mul, Ne, Or, Sub};
    match op {
        Add | Sub | Mul | Div | Mod => arith(op, l, r),
        OpEq | Ne | Lt | Le | Gt | Ge => {
            let cmp = numeric_partial_cmp(l, r);
            let result = match (op, cmp) {
                (OpEq, _) => values_equal(l, r),
                (Ne, _) => !values_equal(l, r),
                (Lt, Some(o)) => o.is_lt(),
                (Le, Some(o)) => o.is_le(),
                (Gt, Some(o)) => o.is_gt(),
                (Ge, Some(o)) => o.is_ge(),
                _ => false,
            };
            Ok(Value::Bool(result))
        }
        And => Ok(Value::Bool(as_bool(l)? && as_bool(r)?)),
        Or => Ok(Value::Bool(as_bool(l)? || as_bool(r)?)),
    }
}

fn as_bool(v: &Value) -> Result<bool, StepError> {
    match v {
        Value::Bool(b) => Ok(*b),
        other => Err(StepError::ArgumentType {
            task: "and/or".to_owned(),
            expected: "boolean",
            found: other.type_name(),
        }),
    }
}

fn values_equal(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => crate::value::floats_equal(*a, *b),
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => crate::value::floats_equal(*a as f32, *b),
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Symbol(a), Value::Symbol(b)) => a == b,
        (Value::Null, Value::Null) => true,
        _ => false,
    }
}

fn arith(op: BinOp, l: &Value, r: &Value) -> Result<Value, StepError> {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => match op {
            BinOp::Add => Ok(Value::Int(a.wrapping_add(*b))),
            BinOp::Sub => Ok(Value::Int(a.wrapping_sub(*b))),
            BinOp::Mul => Ok(Value::Int(a.wrapping_mul(*b))),
            BinOp::Div if *b != 0 => {
                if a % b == 0 {
                    Ok(Value::Int(a / b))
                } else {
                    Ok(Value::Float(*a as f32 / *b as f32))
                }
            }
            BinOp::Mod if *b != 0 => Ok(Value::Int(a % b)),
            BinOp::Div | BinOp::Mod => Err(StepError::ArgumentType {
                task: "arithmetic".to_owned(),
                expected: "nonzero divisor",
                found: "0",
            }),
            _ => unreachable!(),
        },
        _ => {
            let a = as_f32(l)?;
            let b = as_f32(r)?;
            match op {
                BinOp::Add => Ok(Value::Float(a + b)),
                BinOp::Sub => Ok(Value::Float(a - b)),
                BinOp::Mul => Ok(Value::Float(a * b)),
                BinOp::Div => Ok(Value::Float(a / b)),
                BinOp::Mod => Ok(Value::Float(a % b)),
                _ => unreachable!(),
            }
        }
    }
}

fn as_f32(v: &Value) -> Result<f32, StepError> {
    match v {
        Value::Int(i) => Ok(*i as f32),
        Value::Float(f) => Ok(*f),
        other => Err(StepError::ArgumentType {
            task: "arithmetic".to_owned(),
            expected: "number",
            found: other.type_name(),
        }),
    }
}
