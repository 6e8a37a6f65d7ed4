//! The embedding API: load a module, call tasks, thread persistent state.
//!
//! `Engine` is the synchronous entry point most hosts use directly.
//! `BackgroundEvaluator` wraps an independent copy of a module on a
//! dedicated thread for hosts that want calls to run off their own thread.
//! `Value`'s `Rc`-based terms can't cross a thread boundary, so the
//! evaluator re-parses its own sources on the worker thread and only ever
//! exchanges owned strings over the channel.

use std::{
    rc::Rc,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
        mpsc,
    },
    thread,
};

use crate::{
    error::{StepError, StepRuntimeError},
    frame::Frame,
    interp::{Env, Interpreter},
    module::Module,
    resource::{ABORT_SENTINEL, LimitedTracker, ResourceError, ResourceLimits, ResourceTracker},
    serialize,
    state::State,
    tracer::{NoopTracer, Tracer},
    value::Value,
};

/// Converts a resolved [`Value`] into a native Rust return type for
/// [`Engine::call_function`]. `None` signals a type mismatch, reported as
/// [`StepError::ArgumentType`].
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(n) => Some(*n),
            Value::Float(f) => Some(*f as i32),
            _ => None,
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Float(f) => Some(*f),
            Value::Int(n) => Some(*n as f32),
            _ => None,
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(s.to_string()),
            _ => None,
        }
    }
}

/// Process-wide named-option dispatch: `searchLimit` and
/// `defaultSearchLimit` are the only names the core itself understands.
/// A host embedding additional options can layer its own dispatch on top
/// using the same string-keyed convention.
#[derive(Debug, Clone, Copy)]
pub struct OptionsTable {
    pub default_search_limit: i64,
}

impl OptionsTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            default_search_limit: crate::resource::DEFAULT_SEARCH_LIMIT,
        }
    }
}

impl Default for OptionsTable {
    fn default() -> Self {
        Self::new()
    }
}

/// The synchronous evaluation API over a loaded [`Module`].
///
/// `T` is the tracer type threaded through every call; it's carried across
/// calls (rather than reset each time) so a [`crate::tracer::RecordingTracer`]
/// accumulates events for the engine's whole lifetime.
pub struct Engine<T: Tracer + Default = NoopTracer> {
    module: Module,
    options: OptionsTable,
    seed: u64,
    tracer: T,
}

impl<T: Tracer + Default> Engine<T> {
    #[must_use]
    pub fn new(module: Module) -> Self {
        Self {
            module,
            options: OptionsTable::new(),
            seed: 0,
            tracer: T::default(),
        }
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    #[must_use]
    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn module_mut(&mut self) -> &mut Module {
        &mut self.module
    }

    #[must_use]
    pub fn tracer(&self) -> &T {
        &self.tracer
    }

    /// Dispatches a named environment option. Returns `false` for a
    /// name this engine doesn't recognize.
    pub fn set_option(&mut self, name: &str, value: i64) -> bool {
        match name {
            "searchLimit" | "defaultSearchLimit" => {
                self.options.default_search_limit = value;
                true
            }
            _ => false,
        }
    }

    /// Calls `task_name` with `args` against fresh state, returning the
    /// generated text, or `None` if the call had no solution.
    pub fn call(&mut self, task_name: &str, args: &[Value]) -> Result<Option<String>, StepRuntimeError> {
        let (text, _) = self.call_with_state(State::empty(), task_name, args)?;
        Ok(text)
    }

    /// Calls `task_name` with `args` against `state`, returning the
    /// generated text (or `None`) and the state produced by the call.
    pub fn call_with_state(
        &mut self,
        state: State,
        task_name: &str,
        args: &[Value],
    ) -> Result<(Option<String>, State), StepRuntimeError> {
        let task_id = self
            .module
            .interns
            .lookup_task(task_name)
            .ok_or_else(|| undefined_task(task_name, args))?;

        let limits = ResourceLimits::new().search_limit(self.options.default_search_limit);
        let resources = LimitedTracker::new(limits);
        let tracer = std::mem::take(&mut self.tracer);
        let mut interp = Interpreter::new(
            &self.module.tasks,
            &self.module.interns,
            &self.module.state_decls,
            resources,
            tracer,
            self.seed,
        );
        let mut env = Env::new(Frame::root());
        env.state = state;

        let mut solved = false;
        let outcome = interp.call(task_id, args, &mut env, &mut |_interp, _env| {
            solved = true;
            Ok(true)
        });
        self.tracer = interp.tracer;
        outcome?;

        if solved {
            Ok((Some(env.output.render()), env.state))
        } else {
            Ok((None, env.state))
        }
    }

    /// Calls `task_name` purely for its success/failure, discarding any
    /// generated text.
    pub fn call_predicate(&mut self, task_name: &str, args: &[Value]) -> Result<bool, StepRuntimeError> {
        let (text, _) = self.call_with_state(State::empty(), task_name, args)?;
        Ok(text.is_some())
    }

    /// Calls `task_name` as a function task: `args` are bound to every
    /// parameter but the last, a fresh variable is bound to the last, and
    /// the first solution's resolved value is converted to `R`.
    pub fn call_function<R: FromValue>(&mut self, task_name: &str, args: &[Value]) -> Result<R, StepRuntimeError> {
        let task_id = self
            .module
            .interns
            .lookup_task(task_name)
            .ok_or_else(|| undefined_task(task_name, args))?;

        let limits = ResourceLimits::new().search_limit(self.options.default_search_limit);
        let resources = LimitedTracker::new(limits);
        let tracer = std::mem::take(&mut self.tracer);
        let mut interp = Interpreter::new(
            &self.module.tasks,
            &self.module.interns,
            &self.module.state_decls,
            resources,
            tracer,
            self.seed,
        );
        let mut env = Env::new(Frame::root());

        let result_var = Rc::new(env.var_counter.fresh(env.frame.depth, "?result"));
        let mut call_args = args.to_vec();
        call_args.push(Value::Var(result_var.clone()));

        let mut resolved = None;
        let outcome = interp.call(task_id, &call_args, &mut env, &mut |_interp, env| {
            resolved = Some(crate::unify::resolve(&Value::Var(result_var.clone()), &env.trail, true));
            Ok(true)
        });
        self.tracer = interp.tracer;
        outcome?;

        let value = resolved.ok_or_else(|| undefined_task(task_name, args))?;
        R::from_value(&value).ok_or_else(|| {
            StepRuntimeError::Runtime(StepError::ArgumentType {
                task: task_name.to_owned(),
                expected: "a value convertible to the requested return type",
                found: value.type_name(),
            })
        })
    }
}

fn undefined_task(task_name: &str, args: &[Value]) -> StepRuntimeError {
    StepRuntimeError::Runtime(StepError::CallFailed {
        task: task_name.to_owned(),
        args: args.to_vec(),
    })
}

/// A `ResourceTracker` whose remaining counter lives behind a shared handle
/// (grounded on [`crate::resource::LimitedTracker`], generalized so a
/// controller thread can read or reset it mid-run).
#[derive(Clone)]
pub struct SharedLimitTracker {
    remaining: Arc<Mutex<i64>>,
    limits: ResourceLimits,
}

impl SharedLimitTracker {
    #[must_use]
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            remaining: Arc::new(Mutex::new(limits.search_limit)),
            limits,
        }
    }

    #[must_use]
    pub fn handle(&self) -> SearchLimitHandle {
        SearchLimitHandle(self.remaining.clone())
    }
}

impl ResourceTracker for SharedLimitTracker {
    fn enter_method(&mut self) -> Result<(), ResourceError> {
        let mut remaining = self.remaining.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if *remaining == ABORT_SENTINEL || *remaining == 0 {
            return Err(ResourceError::SearchLimitExhausted);
        }
        *remaining -= 1;
        Ok(())
    }

    fn enter_frame(&mut self, depth: usize) -> Result<(), ResourceError> {
        if depth >= self.limits.max_recursion_depth {
            return Err(ResourceError::StackOverflow {
                limit: self.limits.max_recursion_depth,
            });
        }
        Ok(())
    }

    fn exit_frame(&mut self) {}
}

/// A handle a controller thread uses to adjust or abort a
/// [`BackgroundEvaluator`]'s in-flight call.
#[derive(Clone)]
pub struct SearchLimitHandle(Arc<Mutex<i64>>);

impl SearchLimitHandle {
    pub fn set(&self, value: i64) {
        *self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = value;
    }

    /// Aborts the run at its next method entry.
    pub fn abort(&self) {
        self.set(ABORT_SENTINEL);
    }
}

/// A value a [`BackgroundEvaluator`] job can carry across the thread
/// boundary. Deliberately smaller than [`Value`]: task-level terms hold
/// `Rc`, which cannot cross threads, so jobs only exchange owned, `Send`
/// scalars -- a host needing richer arguments encodes them into source text
/// and loads them as facts instead.
#[derive(Debug, Clone)]
pub enum PlainValue {
    Null,
    Int(i32),
    Float(f32),
    Bool(bool),
    String(String),
}

impl PlainValue {
    fn into_value(self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Int(n) => Value::Int(n),
            Self::Float(f) => Value::Float(f),
            Self::Bool(b) => Value::Bool(b),
            Self::String(s) => Value::String(Rc::from(s)),
        }
    }
}

struct Job {
    task_name: String,
    args: Vec<PlainValue>,
    state_text: String,
    reply: mpsc::Sender<Result<(Option<String>, String), String>>,
}

/// Runs an independent copy of a module on a dedicated thread so a host can
/// drive calls off its own thread and abort a run in progress via
/// [`SearchLimitHandle`]. At most one evaluator may be active at a time,
/// enforced with a process-wide flag.
pub struct BackgroundEvaluator {
    jobs: Option<mpsc::Sender<Job>>,
    limit_handle: SearchLimitHandle,
    worker: Option<thread::JoinHandle<()>>,
}

static EVALUATOR_ACTIVE: AtomicBool = AtomicBool::new(false);

impl BackgroundEvaluator {
    /// Spawns the worker thread, which parses `sources` into its own
    /// `Module` before taking jobs. Fails if another evaluator is already
    /// active.
    pub fn spawn(sources: Vec<(String, String)>, limits: ResourceLimits) -> Result<Self, StepRuntimeError> {
        if EVALUATOR_ACTIVE.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return Err(StepRuntimeError::Runtime(StepError::CallFailed {
                task: "BackgroundEvaluator".to_owned(),
                args: Vec::new(),
            }));
        }

        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let tracker = SharedLimitTracker::new(limits);
        let limit_handle = tracker.handle();

        let worker = thread::spawn(move || worker_loop(sources, tracker, &job_rx));

        Ok(Self {
            jobs: Some(job_tx),
            limit_handle,
            worker: Some(worker),
        })
    }

    #[must_use]
    pub fn limit_handle(&self) -> SearchLimitHandle {
        self.limit_handle.clone()
    }

    /// Runs one call on the worker thread and blocks for its result.
    pub fn call(
        &self,
        task_name: &str,
        args: Vec<PlainValue>,
        state_text: &str,
    ) -> Result<(Option<String>, String), StepRuntimeError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        let job = Job {
            task_name: task_name.to_owned(),
            args,
            state_text: state_text.to_owned(),
            reply: reply_tx,
        };
        self.jobs
            .as_ref()
            .expect("jobs channel only taken in Drop")
            .send(job)
            .map_err(|_| StepRuntimeError::Runtime(StepError::BailOut {
                message: "background evaluator worker has stopped".to_owned(),
            }))?;
        reply_rx
            .recv()
            .map_err(|_| StepRuntimeError::Runtime(StepError::BailOut {
                message: "background evaluator worker dropped the reply channel".to_owned(),
            }))?
            .map_err(|message| StepRuntimeError::Runtime(StepError::BailOut { message }))
    }
}

impl Drop for BackgroundEvaluator {
    fn drop(&mut self) {
        // Drop the sender first to close the channel -- otherwise the
        // worker's `recv` loop never ends and `join` below hangs forever,
        // since struct fields are dropped only after this body returns.
        drop(self.jobs.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        EVALUATOR_ACTIVE.store(false, Ordering::SeqCst);
    }
}

fn worker_loop(sources: Vec<(String, String)>, tracker: SharedLimitTracker, jobs: &mpsc::Receiver<Job>) {
    let mut module = Module::new();
    for (path, source) in &sources {
        if module.add_definitions(path, source).is_err() {
            // Load errors surface to the caller the first time they try a
            // call against a task that never got defined.
            continue;
        }
    }

    while let Ok(job) = jobs.recv() {
        let result = run_job(&mut module, &tracker, &job);
        let _ = job.reply.send(result);
    }
}

fn run_job(module: &mut Module, tracker: &SharedLimitTracker, job: &Job) -> Result<(Option<String>, String), String> {
    let state = serialize::parse_state(&job.state_text, &mut module.interns).map_err(|e| e.to_string())?;

    let Some(task_id) = module.interns.lookup_task(&job.task_name) else {
        return Err(format!("undefined task `{}`", job.task_name));
    };
    let args: Vec<Value> = job.args.iter().cloned().map(PlainValue::into_value).collect();

    let mut interp = Interpreter::new(&module.tasks, &module.interns, &module.state_decls, tracker.clone(), NoopTracer, 0);
    let mut env = Env::new(Frame::root());
    env.state = state;

    let mut solved = false;
    interp
        .call(task_id, &args, &mut env, &mut |_interp, _env| {
            solved = true;
            Ok(true)
        })
        .map_err(|e| e.to_string())?;

    let text = solved.then(|| env.output.render());
    let state_text = serialize::render_state(&env.state, &module.interns);
    Ok((text, state_text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_returns_none_when_task_has_no_solution() {
        let mut module = Module::new();
        module.add_definitions("a.step", "[fallible] Greet X: hit.\n").unwrap();
        let mut engine: Engine<NoopTracer> = Engine::new(module);
        let result = engine.call("Greet", &[Value::Int(2)]).unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn call_renders_matching_method() {
        let mut module = Module::new();
        module.add_definitions("a.step", "Greet X: hit.\nGreet ?x: miss.\n").unwrap();
        let mut engine: Engine<NoopTracer> = Engine::new(module);
        assert_eq!(engine.call("Greet", &[Value::Int(2)]).unwrap(), Some("Hit".to_owned()));
    }

    #[test]
    fn call_function_binds_the_last_argument() {
        let module = Module::new();
        let mut engine: Engine<NoopTracer> = Engine::new(module);
        let sum: i32 = engine.call_function("+", &[Value::Int(2), Value::Int(3)]).unwrap();
        assert_eq!(sum, 5);
    }

    #[test]
    fn call_predicate_reports_success() {
        let module = Module::new();
        let mut engine: Engine<NoopTracer> = Engine::new(module);
        assert!(engine.call_predicate("<", &[Value::Int(1), Value::Int(2)]).unwrap());
        assert!(!engine.call_predicate("<", &[Value::Int(2), Value::Int(1)]).unwrap());
    }

    #[test]
    fn unknown_task_name_is_a_call_failure() {
        let module = Module::new();
        let mut engine: Engine<NoopTracer> = Engine::new(module);
        assert!(engine.call("NoSuchTask", &[]).is_err());
    }
}
