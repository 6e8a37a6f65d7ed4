//! End-to-end scenarios driven entirely through the public `Module`/`Engine`
//! API, one per concrete case this language's behavior is pinned against.

use step::{Engine, Module, NoopTracer, State, StepError, StepRuntimeError, Value};

fn engine(source: &str) -> Engine<NoopTracer> {
    let mut module = Module::new();
    module.add_definitions("test.step", source).expect("source compiles");
    Engine::new(module)
}

#[test]
fn method_selection_picks_the_matching_head_first() {
    let mut eng = engine(
        "Test 1: hit.\n\
         Test ?x: miss.\n",
    );
    assert_eq!(eng.call("Test", &[Value::Int(1)]).unwrap(), Some("Hit".to_owned()));
    assert_eq!(eng.call("Test", &[Value::Int(2)]).unwrap(), Some("Miss".to_owned()));
}

#[test]
fn path_call_pipes_a_value_through_two_stages() {
    // `Method ?x: ?x/Map/Write` calls Map(?x, tmp) then Write(tmp) for
    // effect, chaining the intermediate local the parser allocates between
    // stages.
    let mut eng = engine(
        "Map 1 2: .\n\
         Map 2 3: .\n\
         Write 2: 2.\n\
         Write 3: 3.\n\
         Method ?x: ?x/Map/Write.\n\
         Test: [Method 1].\n",
    );
    assert_eq!(eng.call("Test", &[]).unwrap(), Some("2".to_owned()));
}

#[test]
fn do_all_runs_body_once_per_generator_solution_in_source_order() {
    let mut eng = engine(
        "Generate: a.\n\
         Generate: b.\n\
         Generate: c.\n\
         Test: [DoAll [Generate]].\n",
    );
    assert_eq!(eng.call("Test", &[]).unwrap(), Some("A b c".to_owned()));
}

#[test]
fn paragraph_inserts_a_blank_line_between_generator_iterations() {
    let mut eng = engine(
        "Generate: a.\n\
         Generate: b.\n\
         Generate: c.\n\
         Test: [DoAll [Generate] [Paragraph]].\n",
    );
    assert_eq!(eng.call("Test", &[]).unwrap(), Some("A\n\nB\n\nC\n\n".to_owned()));
}

#[test]
fn arithmetic_expression_threads_through_set_and_binds_the_function_result() {
    let mut eng = engine("Test ?x: [set X = 2] [set Y = X + 1] [= ?x Y].\n");
    let result: i32 = eng.call_function("Test", &[]).unwrap();
    assert_eq!(result, 3);
}

#[test]
fn integer_division_promotes_to_float_only_when_inexact() {
    let mut eng = engine("Test ?result: [set X = 6 / 2] [set Y = 7 / 2] [= ?result [X Y]].\n");
    let result: Value = eng.call_function("Test", &[]).unwrap();
    let Value::Tuple(items) = result else {
        panic!("expected a tuple, got {result:?}");
    };
    assert!(matches!(items[0], Value::Int(3)));
    assert!(matches!(items[1], Value::Float(f) if (f - 3.5).abs() < f32::EPSILON));
}

#[test]
fn for_each_lets_state_changes_survive_across_iterations() {
    // Each `Generate` solution's binding is discarded between iterations, but
    // the `Bump` body's state change to `N` must accumulate across all three.
    let mut eng = engine(
        "Generate: a.\n\
         Generate: b.\n\
         Generate: c.\n\
         Bump: [set N = N + 1].\n\
         Test ?n: [set N = 0] [forEach [Generate] [Bump]] [= ?n N].\n",
    );
    let result: i32 = eng.call_function("Test", &[]).unwrap();
    assert_eq!(result, 3);
}

#[test]
fn implies_fails_if_any_generator_solution_fails_the_body() {
    let mut eng = engine(
        "[fallible] Known a: .\n\
         Known b: .\n\
         Generate: a.\n\
         Generate: b.\n\
         Generate: c.\n\
         Test: [implies [Generate ?x] [Known ?x]].\n",
    );
    assert_eq!(eng.call("Test", &[]).unwrap(), None);
}

#[test]
fn implies_succeeds_when_every_generator_solution_passes_the_body() {
    let mut eng = engine(
        "Known a: .\n\
         Known b: .\n\
         Generate: a.\n\
         Generate: b.\n\
         Test: [implies [Generate ?x] [Known ?x]].\n",
    );
    assert!(eng.call("Test", &[]).unwrap().is_some());
}

#[test]
fn exclusion_logic_replaces_the_exclusive_subtree_on_conflicting_writes() {
    let module = Module::new();
    let mut eng = Engine::new(module);

    let a = Value::Symbol(eng.module_mut().interns.intern_symbol("a"));
    let b = Value::Symbol(eng.module_mut().interns.intern_symbol("b"));
    let c = Value::Symbol(eng.module_mut().interns.intern_symbol("c"));
    let d = Value::Symbol(eng.module_mut().interns.intern_symbol("d"));
    let e = Value::Symbol(eng.module_mut().interns.intern_symbol("e"));

    let inclusive = |key: &Value| Value::tuple(vec![Value::Bool(false), key.clone()]);
    let exclusive = |key: &Value| Value::tuple(vec![Value::Bool(true), key.clone()]);

    let path_a = Value::list(vec![inclusive(&a)]);
    let path_ab = Value::list(vec![inclusive(&a), inclusive(&b)]);
    let path_cd = Value::list(vec![exclusive(&c), exclusive(&d)]);
    let path_ce = Value::list(vec![exclusive(&c), exclusive(&e)]);

    assert!(eng.call_predicate("ElStore", &[path_a]).unwrap());
    assert!(eng.call_predicate("ElStore", &[path_ab.clone()]).unwrap());
    assert!(eng.call_predicate("ElStore", &[path_cd.clone()]).unwrap());
    assert!(eng.call_predicate("ElStore", &[path_ce.clone()]).unwrap());

    // `/c!d` was displaced by the later `/c!e` write under the same
    // exclusive parent.
    assert!(eng.call_predicate("ElContains", &[path_ab]).unwrap());
    assert!(eng.call_predicate("ElContains", &[path_ce]).unwrap());
    assert!(!eng.call_predicate("ElContains", &[path_cd]).unwrap());
}

#[test]
fn max_retains_the_bindings_of_the_highest_scoring_solution() {
    let mut eng = engine(
        "Generate a 1: .\n\
         Generate b 2: .\n\
         Generate c 1: .\n\
         Test ?result: [max ?score [Generate ?x ?score]] [= ?result [?x ?score]].\n",
    );
    let winner: Value = eng.call_function("Test", &[]).unwrap();
    let Value::Tuple(items) = winner else {
        panic!("expected a [x score] tuple, got {winner:?}");
    };
    assert_eq!(items.len(), 2);
    let Value::Symbol(x) = items[0] else {
        panic!("expected ?x bound to a symbol, got {:?}", items[0]);
    };
    assert_eq!(eng.module().interns.symbol_name(x), "b");
    assert!(matches!(items[1], Value::Int(2)));
}

#[test]
fn parse_matches_an_html_tag_token_by_its_raw_text() {
    // `<br/>` lexes as a single HTML-tag token; `Parse` must compare it
    // against the literal text verbatim rather than re-tokenizing it.
    let mut eng = engine(
        "Greet: <br/>.\n\
         Test: [parse [Greet] <br/>].\n",
    );
    assert_eq!(eng.call("Test", &[]).unwrap(), Some("<br/>".to_owned()));
}

#[test]
fn set_option_updates_the_default_search_limit() {
    let mut eng: Engine<NoopTracer> = Engine::new(Module::new());
    assert!(eng.set_option("searchLimit", 500));
    assert!(eng.set_option("defaultSearchLimit", 10));
    assert!(!eng.set_option("someUnknownOption", 1));
}

#[test]
fn undefined_task_is_reported_as_a_call_failure_not_a_panic() {
    let mut eng: Engine<NoopTracer> = Engine::new(Module::new());
    assert!(eng.call("ThisTaskDoesNotExist", &[]).is_err());
}

#[test]
fn non_fallible_task_raises_call_failed_on_total_method_mismatch() {
    // `Known` is declared (unlike the previous test's entirely-unregistered
    // task name) but none of its methods match `b`, and it carries no
    // `[fallible]` flag, so the call must raise `StepError::CallFailed`.
    let mut eng = engine(
        "Known a: .\n\
         Test: [Known b].\n",
    );
    let err = eng.call("Test", &[]).unwrap_err();
    assert!(matches!(
        err,
        StepRuntimeError::Runtime(StepError::CallFailed { .. })
    ));
}

#[test]
fn state_persists_across_calls_through_call_with_state() {
    let mut eng = engine(
        "Remember: [set Seen = 1].\n\
         Bump: [set Seen = Seen + 1].\n",
    );
    let seen = eng.module_mut().interns.intern_state_element("Seen");

    let (_, state) = eng.call_with_state(State::empty(), "Remember", &[]).unwrap();
    assert!(matches!(state.get(seen), Some(Value::Int(1))));

    let (_, state) = eng.call_with_state(state, "Bump", &[]).unwrap();
    assert!(matches!(state.get(seen), Some(Value::Int(2))));
}
