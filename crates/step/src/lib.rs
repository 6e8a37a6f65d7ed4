#![doc = include_str!("../../../README.md")]
#![expect(clippy::cast_possible_truncation, reason = "numeric narrowing is checked at call sites")]
#![expect(clippy::cast_precision_loss, reason = "f32 narrowing matches the language's numeric tower")]
#![expect(clippy::module_name_repetitions, reason = "some names mirror their module by design")]
#![expect(clippy::too_many_arguments, reason = "primitive dispatch signatures stay uniform")]

mod error;
mod exclusion;
mod frame;
mod intern;
mod interp;
mod module;
mod output;
mod parser;
mod primitives;
mod resource;
mod serialize;
mod state;
mod step_chain;
mod task;
mod tracer;
mod trail;
mod unify;
mod value;

pub mod engine;

pub use crate::{
    engine::{BackgroundEvaluator, Engine, FromValue, OptionsTable, PlainValue, SearchLimitHandle},
    error::{StepError, StepRuntimeError},
    frame::{CodeLoc, Frame},
    intern::{FeatureId, Interns, StateElementId, SymbolId, TaskId},
    interp::{Env, Interpreter},
    module::Module,
    output::{RenderOptions, Token, render_tokens, render_with_options, untokenize},
    parser::ParseError,
    parser::compiler::LintWarning,
    resource::{
        DEFAULT_MAX_RECURSION_DEPTH, DEFAULT_SEARCH_LIMIT, LimitedTracker, NoLimitTracker, ResourceError,
        ResourceLimits, ResourceTracker,
    },
    serialize::{parse_state, render_state},
    state::{State, StateElementDecl, StateElementRegistry},
    step_chain::{BinOp, CaseArm, CompoundTerm, Expr, ExtremumKind, FindMode, Step, Term},
    task::{Method, Task, TaskBody, TaskFlags, TaskTable},
    tracer::{NoopTracer, RecordingTracer, StderrTracer, TraceEvent, Tracer},
    value::{FeatureStructure, Hashtable, LogicVar, Pair, Tuple, Value, VarCounter},
};
