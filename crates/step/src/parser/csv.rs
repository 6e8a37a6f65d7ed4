//! CSV/TSV fact tables: each row becomes a method of a predicate task named
//! after the file's basename, following the header-sigil rules in
//! `module::load_file`'s external-interface contract.
//!
//! Grounded in the same "sniff the dialect, honor quoted fields" shape as
//! a conventional CSV loader, simplified to this format's needs: no
//! multi-line quoted fields, one row per physical line.

use std::rc::Rc;

use super::ParseError;
use crate::{
    frame::CodeLoc,
    intern::Interns,
    parser::compiler::{CompiledFile, CompiledMethod},
    step_chain::{Step, Term},
    task::{Method, TaskFlags},
    value::Value,
};

enum Column {
    Positional,
    /// Unary predicate: `name?`. Asserted for a row when its cell is truthy.
    Unary(String),
    /// Binary predicate: `@name`. Asserted as `(key, cell)` when non-empty.
    Binary(String),
    /// `#`: the method weight, not a call argument.
    Weight,
}

/// Compiles one `.csv`/`.tsv` source into fact-table methods. `basename` is
/// the file's capitalized stem, used as the primary predicate's task name.
pub fn compile_csv(path: &str, basename: &str, source: &str, interns: &mut Interns) -> Result<CompiledFile, ParseError> {
    let delimiter = sniff_delimiter(path, source);
    let mut lines = source.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());

    let Some((_, header_line)) = lines.next() else {
        return Ok(CompiledFile { methods: Vec::new(), warnings: Vec::new() });
    };
    let header_cells = split_row(header_line, delimiter);
    let columns: Vec<Column> = header_cells.iter().map(|cell| classify_column(cell)).collect();

    let main_task = capitalize(basename);
    let key_index = columns.iter().position(|c| matches!(c, Column::Positional));

    let mut methods = Vec::new();
    for (line_no, row) in lines {
        let line = u32::try_from(line_no + 1).unwrap_or(u32::MAX);
        let cells = split_row(row, delimiter);
        if cells.len() != columns.len() {
            return Err(ParseError::Syntax {
                path: path.to_owned(),
                line,
                message: format!("row has {} cells, header has {}", cells.len(), columns.len()),
            });
        }

        let mut weight = 1.0f32;
        let mut positional = Vec::new();
        let key_value = key_index.and_then(|idx| cells.get(idx)).cloned();

        for (cell, column) in cells.iter().zip(&columns) {
            match column {
                Column::Positional => positional.push(cell_value(cell, interns)),
                Column::Weight => weight = cell.trim().parse().unwrap_or(1.0),
                Column::Unary(name) => {
                    if is_truthy(cell) {
                        if let Some(key) = &key_value {
                            let key_val = cell_value(key, interns);
                            methods.push(fact_method(name, path, vec![key_val], line, weight));
                        }
                    }
                }
                Column::Binary(name) => {
                    if !cell.trim().is_empty() {
                        if let Some(key) = &key_value {
                            let key_val = cell_value(key, interns);
                            let cell_val = cell_value(cell, interns);
                            methods.push(fact_method(name, path, vec![key_val, cell_val], line, weight));
                        }
                    }
                }
            }
        }

        methods.push(CompiledMethod {
            task_name: main_task.clone(),
            arity: positional.len(),
            flags: TaskFlags::PREDICATE | TaskFlags::FALLIBLE | TaskFlags::GENERATOR,
            method: Method {
                head: Rc::from(positional.into_iter().map(Term::Literal).collect::<Vec<_>>()),
                local_count: 0,
                body: Rc::new(Step::NoOp),
                weight,
                loc: Some(CodeLoc { path: Rc::from(path), line }),
            },
        });
    }

    Ok(CompiledFile { methods, warnings: Vec::new() })
}

fn fact_method(task_name: &str, path: &str, args: Vec<Value>, line: u32, weight: f32) -> CompiledMethod {
    CompiledMethod {
        task_name: task_name.to_owned(),
        arity: args.len(),
        flags: TaskFlags::PREDICATE | TaskFlags::FALLIBLE | TaskFlags::GENERATOR,
        method: Method {
            head: Rc::from(args.into_iter().map(Term::Literal).collect::<Vec<_>>()),
            local_count: 0,
            body: Rc::new(Step::NoOp),
            weight,
            loc: Some(CodeLoc { path: Rc::from(path), line }),
        },
    }
}

fn classify_column(cell: &str) -> Column {
    let trimmed = cell.trim();
    if trimmed == "#" {
        Column::Weight
    } else if let Some(name) = trimmed.strip_suffix('?') {
        Column::Unary(name.to_owned())
    } else if let Some(name) = trimmed.strip_prefix('@') {
        Column::Binary(name.to_owned())
    } else {
        Column::Positional
    }
}

fn is_truthy(cell: &str) -> bool {
    matches!(cell.trim().to_ascii_lowercase().as_str(), "yes" | "y" | "true" | "t" | "x")
}

fn cell_value(cell: &str, interns: &mut Interns) -> Value {
    let trimmed = cell.trim();
    if let Ok(n) = trimmed.parse::<i32>() {
        Value::Int(n)
    } else if let Ok(f) = trimmed.parse::<f32>() {
        Value::Float(f)
    } else {
        Value::Symbol(interns.intern_symbol(trimmed))
    }
}

fn sniff_delimiter(path: &str, source: &str) -> char {
    if path.ends_with(".tsv") {
        return '\t';
    }
    let first_line = source.lines().next().unwrap_or("");
    let tabs = first_line.matches('\t').count();
    let commas = first_line.matches(',').count();
    if tabs > commas { '\t' } else { ',' }
}

/// Splits one row on `delimiter`, honoring `"..."` quoting with `""` as an
/// escaped quote. No support for quoted fields spanning multiple lines.
fn split_row(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(c);
            }
        } else if c == '"' && current.is_empty() {
            in_quotes = true;
        } else if c == delimiter {
            fields.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    fields.push(current);
    fields
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_columns_become_positional_facts() {
        let mut interns = Interns::new();
        let file = compile_csv("animals.csv", "animals", "Name,Legs\ndog,4\nbird,2\n", &mut interns).unwrap();
        assert_eq!(file.methods.len(), 2);
        assert_eq!(file.methods[0].task_name, "Animals");
        assert_eq!(file.methods[0].arity, 2);
    }

    #[test]
    fn unary_sigil_column_asserts_auxiliary_predicate() {
        let mut interns = Interns::new();
        let file = compile_csv("animals.csv", "animals", "Name,flies?\ndog,no\nbird,yes\n", &mut interns).unwrap();
        let flies_facts: Vec<_> = file.methods.iter().filter(|m| m.task_name == "flies").collect();
        assert_eq!(flies_facts.len(), 1);
    }

    #[test]
    fn quoted_fields_may_contain_the_delimiter() {
        let row = split_row("\"a,b\",c", ',');
        assert_eq!(row, vec!["a,b".to_owned(), "c".to_owned()]);
    }

    #[test]
    fn weight_column_sets_method_weight_without_becoming_an_argument() {
        let mut interns = Interns::new();
        let file = compile_csv("animals.csv", "animals", "#,Name\n3,dog\n", &mut interns).unwrap();
        assert_eq!(file.methods[0].arity, 1);
        assert_eq!(file.methods[0].method.weight, 3.0);
    }
}
