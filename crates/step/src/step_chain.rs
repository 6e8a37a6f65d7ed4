//! The compiled method body: terms, expressions, and the `Step` tree.
//!
//! A method body compiles down to a single `Step`. Sequencing (`And`/
//! `Begin`) is itself a `Step` variant holding a list of sub-steps, rather
//! than a separate "next" field threaded through every other variant --
//! this keeps the interpreter's recursion structurally simple: executing a
//! step either succeeds and calls its continuation, or fails and returns,
//! and composite steps build their continuation out of their children.

use std::rc::Rc;

use crate::{
    frame::CodeLoc,
    intern::{StateElementId, TaskId},
    output::Token,
    value::Value,
};

/// A term as it appears in compiled code: a literal value, a reference to a
/// local variable slot, or a state-element read.
#[derive(Debug, Clone)]
pub enum Term {
    Literal(Value),
    Local(usize),
    StateElement(StateElementId),
    /// Builds a tuple or feature structure at call time from sub-terms, used
    /// for `[...]` literals containing variables.
    Compound(CompoundTerm),
}

#[derive(Debug, Clone)]
pub enum CompoundTerm {
    Tuple(Rc<[Term]>),
    Cons(Rc<Term>, Rc<Term>),
}

/// A side-effect-free expression, used on the right-hand side of `set X =
/// E` assignments and in comparisons.
#[derive(Debug, Clone)]
pub enum Expr {
    Term(Term),
    BinOp(BinOp, Rc<Expr>, Rc<Expr>),
    Not(Rc<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// Which extremum [`Step::Extremum`] is looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtremumKind {
    Max,
    Min,
}

/// How many solutions [`Step::FindAll`]-family steps collect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindMode {
    All,
    Unique,
    FirstN(u32),
    AtMostN(u32),
}

/// One arm of a `case` step: a pattern term to unify the scrutinee against,
/// and the body to run if it matches.
#[derive(Debug, Clone)]
pub struct CaseArm {
    pub pattern: Term,
    pub body: Rc<Step>,
}

/// A compiled method body or sub-expression of one.
///
/// Control primitives that take an inner call (`Not`, `Once`, `Parse`, ...)
/// hold it as `Rc<Step>` so the same compiled sub-tree can be shared between
/// a definition and any closures built over it at interpretation time.
#[derive(Debug, Clone)]
pub enum Step {
    /// Emits literal output tokens.
    Emit(Rc<[Token]>),
    /// Calls another task with the given argument terms.
    Call {
        task: TaskId,
        args: Rc<[Term]>,
        loc: Option<CodeLoc>,
    },
    /// `set Element = Expr`.
    Assignment { element: StateElementId, expr: Expr },
    /// Sequential composition: `And`/`Begin`. Each step tries in order;
    /// backtracking into an earlier step retries later ones.
    Seq(Rc<[Step]>),
    /// `Or`: tries each alternative in order on backtracking.
    Or(Rc<[Step]>),
    /// `firstOf`: commits to the first alternative that succeeds at all,
    /// but still offers that alternative's own backtracking.
    FirstOf(Rc<[Step]>),
    /// `randomly`: tries alternatives in a random order, weighted if the
    /// method carries weights (handled by the caller building this step).
    Randomly(Rc<[Step]>),
    /// `sequence`: advances through alternatives one per outer call,
    /// remembering position in a given state element.
    Sequence {
        alternatives: Rc<[Step]>,
        position_element: StateElementId,
    },
    /// `cool N`: a choice point that cycles through alternatives, excluding
    /// whichever ones were picked in the last `cycle` selections (tracked in
    /// `history_element`) so none repeats within `cycle` invocations.
    Cool {
        alternatives: Rc<[Step]>,
        cycle: u32,
        history_element: StateElementId,
    },
    /// Negation as failure: succeeds (with no bindings) iff the inner call
    /// fails; otherwise fails. Any output emitted by the inner call is
    /// discarded regardless of outcome.
    Not(Rc<Step>),
    /// Like `Not`, but for `notAny`: succeeds iff none of the alternatives
    /// has any solution.
    NotAny(Rc<[Step]>),
    /// Commits to the inner call's first solution; later backtracking into
    /// this step fails without retrying it.
    Once(Rc<Step>),
    /// Like `Once`, but raises `CallFailed` if the inner call has no
    /// solution at all, rather than failing silently.
    ExactlyOnce(Rc<Step>),
    /// Always fails.
    Fail,
    /// Always succeeds with no effect.
    NoOp,
    /// Binds `local` to successive small integers (0, 1, 2, ...) on each
    /// backtrack into this step, used to bound retry loops.
    CountAttempts { local: usize, limit: Option<u32> },
    /// `forEach`/`doAll`: runs `body` once per solution of `generator`,
    /// discarding `generator`'s bindings (but not `body`'s text or state
    /// changes) between iterations and succeeding once after the last one.
    ForEach { generator: Rc<Step>, body: Rc<Step> },
    /// `implies`: if `generator` has at least one solution, requires `body`
    /// to succeed for every one of them, like `forEach` but failing the
    /// whole step the first time an iteration's body fails; if `generator`
    /// has no solution, succeeds trivially.
    Implies { generator: Rc<Step>, body: Rc<Step> },
    /// Collects every solution of `generator` as rendered text witnesses
    /// into `local`, per `mode`.
    FindAll {
        generator: Rc<Step>,
        local: usize,
        mode: FindMode,
    },
    /// `max`/`min`: runs `generator` to exhaustion, keeping the solution
    /// whose `score` local is largest/smallest, then re-establishes that
    /// solution's bindings and output.
    Extremum {
        kind: ExtremumKind,
        generator: Rc<Step>,
        score_local: usize,
    },
    /// Unifies `scrutinee` against each arm's pattern in order, running the
    /// first arm that matches.
    Case { scrutinee: Term, arms: Rc<[CaseArm]> },
    /// Runs `call`, then unifies the rendered output it produced against
    /// `text` as a sequence of tokens (parsing).
    Parse { call: Rc<Step>, text: Term },
    /// Runs `call`, binding the text it renders (rather than emitting it)
    /// into `local`.
    SaveText { call: Rc<Step>, local: usize },
    /// Runs `call`; on success, discards any state-element assignments it
    /// made (but keeps its output and bindings).
    CallDiscardingStateChanges(Rc<Step>),
    /// Raises a user exception carrying the rendered text of `message`.
    Throw { message: Rc<Step>, bail_out: bool },
}
