//! A module: the task table, interning tables, and state-element registry
//! that together make up everything compiled from one set of source files.
//!
//! This is the layer that turns `.step`/`.csv`/`.tsv` files on disk into a
//! [`crate::task::TaskTable`] ready for [`crate::engine::Engine`] to call
//! into, plus the static lint pass that catches undefined and unreachable
//! tasks before anything runs.

use std::path::Path;

use crate::{
    error::StepRuntimeError,
    intern::{Interns, TaskId},
    parser::{self, ParseError, compiler::LintWarning},
    primitives::PrimitiveKind,
    state::StateElementRegistry,
    step_chain::Step,
    task::{Task, TaskFlags, TaskTable},
};

/// Everything compiled from a set of source files: tasks, interned names,
/// and declared state elements. Parsing several files into one `Module` is
/// safe and expected -- later files can call tasks defined in earlier ones
/// and vice versa, since lint runs only after everything is loaded.
pub struct Module {
    pub tasks: TaskTable,
    pub interns: Interns,
    pub state_decls: StateElementRegistry,
}

impl Module {
    /// A fresh module with every primitive task registered and no user
    /// definitions loaded yet.
    #[must_use]
    pub fn new() -> Self {
        let mut interns = Interns::new();
        // Must happen before any user source is compiled: this reserves
        // state element id 0 for the exclusion-logic store, a convention
        // `crate::primitives::el_root_element` depends on.
        interns.intern_state_element("__ElRoot");

        let mut tasks = TaskTable::new();
        register_primitives(&mut tasks, &mut interns);

        Self {
            tasks,
            interns,
            state_decls: StateElementRegistry::new(),
        }
    }

    /// Compiles `source` (already read into memory, e.g. a file's contents
    /// or a string built programmatically) and merges its methods into this
    /// module. `path` is attached to errors and locations; for `.csv`/
    /// `.tsv` content it also supplies the basename the fact predicate is
    /// named after.
    pub fn add_definitions(&mut self, path: &str, source: &str) -> Result<Vec<LintWarning>, StepRuntimeError> {
        let file = if is_table(path) {
            let basename = stem(path);
            parser::csv::compile_csv(path, &basename, source, &mut self.interns)?
        } else {
            parser::compile_source(path, source, &mut self.interns, &mut self.state_decls)?
        };
        Ok(self.merge(file))
    }

    /// Reads and compiles one file from disk.
    pub fn load_file(&mut self, path: &Path) -> Result<Vec<LintWarning>, StepRuntimeError> {
        let display = path.display().to_string();
        let source = std::fs::read_to_string(path).map_err(|e| {
            StepRuntimeError::Parse(ParseError::Syntax {
                path: display.clone(),
                line: 0,
                message: format!("could not read file: {e}"),
            })
        })?;
        self.add_definitions(&display, &source)
    }

    /// Recursively loads every `.step`, `.csv`, and `.tsv` file under `dir`.
    pub fn load_directory(&mut self, dir: &Path) -> Result<Vec<LintWarning>, StepRuntimeError> {
        let mut warnings = Vec::new();
        let mut pending = vec![dir.to_path_buf()];
        while let Some(current) = pending.pop() {
            let entries = std::fs::read_dir(&current).map_err(|e| {
                StepRuntimeError::Parse(ParseError::Syntax {
                    path: current.display().to_string(),
                    line: 0,
                    message: format!("could not read directory: {e}"),
                })
            })?;
            for entry in entries {
                let entry = entry.map_err(|e| {
                    StepRuntimeError::Parse(ParseError::Syntax {
                        path: current.display().to_string(),
                        line: 0,
                        message: format!("could not read directory entry: {e}"),
                    })
                })?;
                let path = entry.path();
                if path.is_dir() {
                    pending.push(path);
                } else if is_loadable(&path) {
                    warnings.extend(self.load_file(&path)?);
                }
            }
        }
        Ok(warnings)
    }

    fn merge(&mut self, file: parser::compiler::CompiledFile) -> Vec<LintWarning> {
        for compiled in file.methods {
            let id = self.interns.intern_task(&compiled.task_name);
            if !self.tasks.contains(id) {
                self.tasks.insert(Task::new_methods(id, compiled.arity, compiled.flags));
            } else if let Some(task) = self.tasks.get_mut(id) {
                task.flags.insert(compiled.flags);
            }
            if let Some(task) = self.tasks.get_mut(id) {
                task.add_method(compiled.method);
            }
        }
        file.warnings
    }

    /// Static lint: flags calls to tasks that were never defined, and tasks
    /// that were defined but are never called from anywhere and aren't
    /// `[main]`. Run once after every source file has been loaded.
    #[must_use]
    pub fn lint(&self) -> Vec<LintWarning> {
        let mut warnings = Vec::new();
        let mut called = std::collections::HashSet::new();

        for (_, task) in self.tasks.iter() {
            for method in task.methods() {
                walk_step(&method.body, &mut |callee| {
                    called.insert(callee);
                    if !self.tasks.contains(callee) {
                        warnings.push(LintWarning {
                            path: method.loc.as_ref().map(|l| l.path.to_string()).unwrap_or_default(),
                            line: method.loc.as_ref().map(|l| l.line).unwrap_or(0),
                            message: format!("call to undefined task `{}`", self.interns.task_name(callee)),
                        });
                    }
                });
            }
        }

        for (id, task) in self.tasks.iter() {
            let is_primitive = matches!(task.body, crate::task::TaskBody::Primitive(_));
            if is_primitive || task.flags.contains(TaskFlags::MAIN) || called.contains(id) {
                continue;
            }
            if task.methods().is_empty() {
                continue;
            }
            let loc = task.methods().first().and_then(|m| m.loc.as_ref());
            warnings.push(LintWarning {
                path: loc.map(|l| l.path.to_string()).unwrap_or_default(),
                line: loc.map(|l| l.line).unwrap_or(0),
                message: format!("task `{}` is defined but never called", self.interns.task_name(*id)),
            });
        }

        warnings
    }
}

impl Default for Module {
    fn default() -> Self {
        Self::new()
    }
}

fn walk_step(step: &Step, visit: &mut impl FnMut(TaskId)) {
    match step {
        Step::Emit(_) | Step::Assignment { .. } | Step::Fail | Step::NoOp | Step::CountAttempts { .. } => {}
        Step::Case { arms, .. } => {
            for arm in arms.iter() {
                walk_step(&arm.body, visit);
            }
        }
        Step::Call { task, .. } => visit(*task),
        Step::Seq(steps) | Step::Or(steps) | Step::FirstOf(steps) | Step::Randomly(steps) | Step::NotAny(steps) => {
            for s in steps.iter() {
                walk_step(s, visit);
            }
        }
        Step::Sequence { alternatives, .. } | Step::Cool { alternatives, .. } => {
            for s in alternatives.iter() {
                walk_step(s, visit);
            }
        }
        Step::Not(inner) | Step::Once(inner) | Step::ExactlyOnce(inner) | Step::CallDiscardingStateChanges(inner) => walk_step(inner, visit),
        Step::ForEach { generator, body } | Step::Implies { generator, body } => {
            walk_step(generator, visit);
            walk_step(body, visit);
        }
        Step::FindAll { generator, .. } | Step::Extremum { generator, .. } => walk_step(generator, visit),
        Step::Parse { call, .. } | Step::SaveText { call, .. } => walk_step(call, visit),
        Step::Throw { message, .. } => walk_step(message, visit),
    }
}

fn is_table(path: &str) -> bool {
    path.ends_with(".csv") || path.ends_with(".tsv")
}

fn is_loadable(path: &Path) -> bool {
    matches!(path.extension().and_then(|e| e.to_str()), Some("step" | "csv" | "tsv"))
}

fn stem(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(path)
        .to_owned()
}

macro_rules! register {
    ($tasks:expr, $interns:expr, $name:expr, $arity:expr, $flags:expr, $kind:expr) => {
        let id = $interns.intern_task($name);
        $tasks.insert(Task::new_primitive(id, $arity, $flags, $kind));
    };
}

fn register_primitives(tasks: &mut TaskTable, interns: &mut Interns) {
    let predicate = TaskFlags::PREDICATE;
    let function = TaskFlags::FUNCTION;
    let fallible = TaskFlags::FALLIBLE;
    let generator = TaskFlags::GENERATOR;

    register!(tasks, interns, "<", 2, predicate, PrimitiveKind::Lt);
    register!(tasks, interns, "<=", 2, predicate, PrimitiveKind::Le);
    register!(tasks, interns, ">", 2, predicate, PrimitiveKind::Gt);
    register!(tasks, interns, ">=", 2, predicate, PrimitiveKind::Ge);
    register!(tasks, interns, "=", 2, predicate, PrimitiveKind::Unify);
    register!(tasks, interns, "!=", 2, predicate, PrimitiveKind::NotUnifiable);

    register!(tasks, interns, "+", 3, function, PrimitiveKind::Plus);
    register!(tasks, interns, "-", 3, function, PrimitiveKind::Minus);
    register!(tasks, interns, "*", 3, function, PrimitiveKind::Times);
    register!(tasks, interns, "/", 3, function.union(fallible), PrimitiveKind::Divide);

    register!(tasks, interns, "Apply", 2, fallible.union(generator), PrimitiveKind::Apply);
    register!(tasks, interns, "Head", 2, function.union(fallible), PrimitiveKind::Head);
    register!(tasks, interns, "Tail", 2, function.union(fallible), PrimitiveKind::Tail);
    register!(tasks, interns, "Cons", 3, function, PrimitiveKind::ConsPrim);
    register!(tasks, interns, "Length", 2, function, PrimitiveKind::ListLength);
    register!(tasks, interns, "Member", 2, fallible.union(generator), PrimitiveKind::Member);
    register!(tasks, interns, "Append", 3, function, PrimitiveKind::Append);

    register!(tasks, interns, "FeatureGet", 3, function.union(fallible), PrimitiveKind::FeatureGet);
    register!(tasks, interns, "FeaturePut", 4, function, PrimitiveKind::FeaturePut);

    register!(tasks, interns, "ElStore", 1, TaskFlags::empty(), PrimitiveKind::ElStore);
    register!(tasks, interns, "ElDelete", 1, TaskFlags::empty(), PrimitiveKind::ElDelete);
    register!(tasks, interns, "ElContains", 1, predicate.union(fallible), PrimitiveKind::ElContains);

    register!(tasks, interns, "Print", 1, TaskFlags::empty(), PrimitiveKind::Print);
    register!(tasks, interns, "Paragraph", 0, TaskFlags::empty(), PrimitiveKind::Paragraph);

    register!(tasks, interns, "CallerChainAncestor", 2, function.union(fallible), PrimitiveKind::CallerChainAncestor);
    register!(tasks, interns, "GoalChainAncestor", 3, function.union(fallible), PrimitiveKind::GoalChainAncestor);
    register!(tasks, interns, "PreviousCall", 2, function.union(fallible), PrimitiveKind::PreviousCall);
    register!(tasks, interns, "DefinedTasks", 1, function, PrimitiveKind::DefinedTasks);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_module_reserves_el_root_as_state_element_zero() {
        let module = Module::new();
        let id = module.interns.lookup_state_element("__ElRoot").unwrap();
        assert_eq!(u32::from(id), 0);
    }

    #[test]
    fn primitives_are_registered_and_callable_by_name() {
        let module = Module::new();
        let plus = module.interns.lookup_task("+").unwrap();
        assert!(module.tasks.contains(plus));
        assert_eq!(module.tasks.get(plus).unwrap().arity, 3);
    }

    #[test]
    fn loading_two_files_lets_the_first_call_the_second() {
        let mut module = Module::new();
        module.add_definitions("a.step", "[main] Greet ?x: [Hello ?x].\n").unwrap();
        module.add_definitions("b.step", "Hello ?x: hi there.\n").unwrap();
        assert_eq!(module.tasks.len(), 2 + count_primitives());
        assert!(module.lint().is_empty());
    }

    #[test]
    fn lint_flags_calls_to_undefined_tasks() {
        let mut module = Module::new();
        module.add_definitions("a.step", "Greet: [Missing].\n").unwrap();
        let warnings = module.lint();
        assert!(warnings.iter().any(|w| w.message.contains("Missing")));
    }

    #[test]
    fn lint_flags_unreachable_tasks_unless_main() {
        let mut module = Module::new();
        module.add_definitions("a.step", "[main] Start: ok.\n\nUnused: never called.\n").unwrap();
        let warnings = module.lint();
        assert!(warnings.iter().any(|w| w.message.contains("Unused")));
        assert!(!warnings.iter().any(|w| w.message.contains("Start")));
    }

    fn count_primitives() -> usize {
        let module = Module::new();
        module.tasks.len()
    }
}
