use std::{env, path::Path, process::ExitCode, rc::Rc, time::Instant};

use step::{Engine, Module, StderrTracer, Value};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let mut trace = false;
    let mut positional = Vec::new();
    for arg in args.into_iter().skip(1) {
        if arg == "--trace" {
            trace = true;
        } else {
            positional.push(arg);
        }
    }

    let Some(path) = positional.first() else {
        eprintln!("usage: step <file.step> <task> [args...] [--trace]");
        return ExitCode::FAILURE;
    };
    let Some(task_name) = positional.get(1) else {
        eprintln!("usage: step <file.step> <task> [args...] [--trace]");
        return ExitCode::FAILURE;
    };

    let mut module = Module::new();
    let warnings = match module.load_file(Path::new(path)) {
        Ok(warnings) => warnings,
        Err(err) => {
            eprintln!("error loading {path}: {err}");
            return ExitCode::FAILURE;
        }
    };
    for warning in &warnings {
        eprintln!("warning: {}:{}: {}", warning.path, warning.line, warning.message);
    }

    let task_args: Vec<Value> = positional[2..].iter().map(|raw| parse_arg(raw, &mut module)).collect();

    let start = Instant::now();
    if trace {
        let mut engine: Engine<StderrTracer> = Engine::new(module);
        run(&mut engine, task_name, &task_args, start)
    } else {
        let mut engine: Engine = Engine::new(module);
        run(&mut engine, task_name, &task_args, start)
    }
}

fn run<T: step::Tracer + Default>(engine: &mut Engine<T>, task_name: &str, task_args: &[Value], start: Instant) -> ExitCode {
    match engine.call(task_name, task_args) {
        Ok(Some(text)) => {
            println!("{text}");
            eprintln!("solved in {:?}", start.elapsed());
            ExitCode::SUCCESS
        }
        Ok(None) => {
            eprintln!("{task_name} had no solution ({:?})", start.elapsed());
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Parses one bare command-line token into a term: `true`/`false`/`null`
/// keywords, a quoted string, a number, or else a symbol.
fn parse_arg(raw: &str, module: &mut Module) -> Value {
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        _ => {
            if let Some(inner) = raw.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
                Value::String(Rc::from(inner))
            } else if let Ok(n) = raw.parse::<i32>() {
                Value::Int(n)
            } else if let Ok(f) = raw.parse::<f32>() {
                Value::Float(f)
            } else {
                Value::Symbol(module.interns.intern_symbol(raw))
            }
        }
    }
}
