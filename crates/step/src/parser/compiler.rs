//! Expressions to method definitions: the third parser stage.
//!
//! Consumes the flat, bracket-grouped [`Obj`] stream for a whole file and
//! produces one [`CompiledMethod`] per `Head : body` definition, threading
//! symbol interning and state-element declaration through the module's
//! shared tables.

use std::rc::Rc;

use super::{ParseError, grouper::Obj, tokenizer::Lexeme};
use crate::{
    frame::CodeLoc,
    intern::Interns,
    output::Token,
    state::StateElementRegistry,
    step_chain::{BinOp, CaseArm, CompoundTerm, Expr, ExtremumKind, FindMode, Step, Term},
    task::{Method, TaskFlags},
    value::Value,
};

/// One compiled `Head : body` definition, not yet registered with a
/// [`crate::task::TaskTable`] (the caller decides how to merge it in,
/// since several files may contribute methods to the same task).
pub struct CompiledMethod {
    pub task_name: String,
    pub arity: usize,
    pub flags: TaskFlags,
    pub method: Method,
}

#[derive(Debug, Clone)]
pub struct LintWarning {
    pub path: String,
    pub line: u32,
    pub message: String,
}

pub struct CompiledFile {
    pub methods: Vec<CompiledMethod>,
    pub warnings: Vec<LintWarning>,
}

struct LocalSlot {
    name: String,
    uses: u32,
}

struct Compiler<'a> {
    path: Rc<str>,
    interns: &'a mut Interns,
    state_decls: &'a mut StateElementRegistry,
    warnings: Vec<LintWarning>,
    auto_counter: u32,
    locals: Vec<LocalSlot>,
}

pub fn compile_file(path: &str, objs: &[Obj], interns: &mut Interns, state_decls: &mut StateElementRegistry) -> Result<CompiledFile, ParseError> {
    let mut compiler = Compiler {
        path: Rc::from(path),
        interns,
        state_decls,
        warnings: Vec::new(),
        auto_counter: 0,
        locals: Vec::new(),
    };
    let mut methods = Vec::new();
    let mut i = 0;
    skip_blank(objs, &mut i);
    while i < objs.len() {
        methods.push(compiler.compile_definition(objs, &mut i)?);
        skip_blank(objs, &mut i);
    }
    Ok(CompiledFile {
        methods,
        warnings: compiler.warnings,
    })
}

fn skip_blank(objs: &[Obj], i: &mut usize) {
    while matches!(objs.get(*i), Some(Obj::Leaf(Lexeme::Newline, _))) {
        *i += 1;
    }
}

fn is_blank_run(objs: &[Obj], i: usize) -> bool {
    matches!(objs.get(i), Some(Obj::Leaf(Lexeme::Newline, _))) && matches!(objs.get(i + 1), Some(Obj::Leaf(Lexeme::Newline, _)))
}

impl<'a> Compiler<'a> {
    fn err(&self, line: u32, message: impl Into<String>) -> ParseError {
        ParseError::Syntax {
            path: self.path.to_string(),
            line,
            message: message.into(),
        }
    }

    fn local_slot(&mut self, name: &str) -> usize {
        if let Some(idx) = self.locals.iter().position(|l| l.name == name) {
            self.locals[idx].uses += 1;
            return idx;
        }
        self.locals.push(LocalSlot {
            name: name.to_owned(),
            uses: 1,
        });
        self.locals.len() - 1
    }

    fn auto_state_element(&mut self, prefix: &str) -> crate::intern::StateElementId {
        self.auto_counter += 1;
        let name = format!("__{prefix}{}", self.auto_counter);
        let id = self.interns.intern_state_element(&name);
        self.state_decls.declare(id, None);
        id
    }

    fn compile_definition(&mut self, objs: &[Obj], i: &mut usize) -> Result<CompiledMethod, ParseError> {
        self.locals.clear();
        let mut flags = TaskFlags::empty();
        let mut weight = 1.0f32;

        while let Some(Obj::Tuple(inner, _)) = objs.get(*i) {
            if looks_like_annotation(inner) {
                apply_annotation(inner, &mut flags, &mut weight);
                *i += 1;
            } else {
                break;
            }
        }

        let (task_name, head_line) = match objs.get(*i) {
            Some(Obj::Leaf(Lexeme::Word(w), line)) => (w.clone(), *line),
            Some(other) => return Err(self.err(other.line(), "expected a task name to start a method definition")),
            None => return Err(self.err(0, "unexpected end of file, expected a method definition")),
        };
        *i += 1;

        let mut head_args = Vec::new();
        loop {
            match objs.get(*i) {
                Some(Obj::Leaf(Lexeme::Punct(':'), _)) => {
                    *i += 1;
                    break;
                }
                Some(obj) => {
                    head_args.push(self.compile_term(obj)?);
                    *i += 1;
                }
                None => return Err(self.err(head_line, format!("method `{task_name}` is missing `:`"))),
            }
        }

        let body_line = objs.get(*i).map_or(head_line, Obj::line);
        let body = if matches!(objs.get(*i), Some(Obj::Leaf(Lexeme::Newline, _))) {
            self.compile_multiline_body(objs, i)?
        } else {
            self.compile_single_line_body(objs, i)?
        };

        for local in &self.locals {
            if local.uses == 1 && !local.name.starts_with("?_") {
                self.warnings.push(LintWarning {
                    path: self.path.to_string(),
                    line: body_line,
                    message: format!("singleton variable `{}` in method `{task_name}`", local.name),
                });
            }
        }

        let arity = head_args.len();
        let method = Method {
            head: Rc::from(head_args),
            local_count: self.locals.len(),
            body: Rc::new(body),
            weight,
            loc: Some(CodeLoc { path: self.path.clone(), line: head_line }),
        };
        Ok(CompiledMethod { task_name, arity, flags, method })
    }

    fn compile_single_line_body(&mut self, objs: &[Obj], i: &mut usize) -> Result<Step, ParseError> {
        let start = *i;
        while !matches!(objs.get(*i), Some(Obj::Leaf(Lexeme::Punct('.'), _)) | Some(Obj::Leaf(Lexeme::Newline, _)) | None) {
            *i += 1;
        }
        let items = &objs[start..*i];
        if matches!(objs.get(*i), Some(Obj::Leaf(Lexeme::Punct('.'), _))) {
            *i += 1;
        }
        self.compile_body_items(items)
    }

    fn compile_multiline_body(&mut self, objs: &[Obj], i: &mut usize) -> Result<Step, ParseError> {
        *i += 1; // consume the newline right after `:`
        let start = *i;
        while *i < objs.len() {
            if is_blank_run(objs, *i) {
                break;
            }
            if let Obj::Tuple(inner, _) = &objs[*i] {
                if matches!(inner.as_slice(), [Obj::Leaf(Lexeme::Word(w), _)] if w == "end") {
                    break;
                }
            }
            *i += 1;
        }
        let items = &objs[start..*i];
        if matches!(objs.get(*i), Some(Obj::Tuple(_, _))) {
            *i += 1; // consume the `[end]` marker
        }
        self.compile_body_items(items)
    }

    fn compile_body_items(&mut self, items: &[Obj]) -> Result<Step, ParseError> {
        let mut steps = Vec::new();
        let mut idx = 0;
        while idx < items.len() {
            if matches!(&items[idx], Obj::Leaf(Lexeme::Newline, _)) {
                steps.push(Step::Emit(Rc::from(vec![Token::Newline])));
                idx += 1;
                continue;
            }
            if let Obj::Leaf(Lexeme::Word(w), _) = &items[idx] {
                if w.starts_with('?') && matches!(items.get(idx + 1), Some(Obj::Leaf(Lexeme::Punct('/'), _))) {
                    let (step, consumed) = self.compile_path_call(items, idx)?;
                    steps.push(step);
                    idx += consumed;
                    continue;
                }
            }
            steps.push(self.compile_body_item(&items[idx])?);
            idx += 1;
        }
        Ok(match steps.len() {
            0 => Step::NoOp,
            1 => steps.into_iter().next().expect("len checked"),
            _ => Step::Seq(Rc::from(steps)),
        })
    }

    /// `?var/Task1/Task2`: pipes `?var` through each stage, binding a fresh
    /// local between stages and calling the final stage for effect (e.g. to
    /// emit output) rather than to bind a further result.
    fn compile_path_call(&mut self, items: &[Obj], start: usize) -> Result<(Step, usize), ParseError> {
        let Obj::Leaf(Lexeme::Word(head), line) = &items[start] else {
            unreachable!("caller checked this is a local word");
        };
        let line = *line;
        let mut current = Term::Local(self.local_slot(head));
        let mut idx = start + 1;
        let mut stages = Vec::new();
        loop {
            if !matches!(items.get(idx), Some(Obj::Leaf(Lexeme::Punct('/'), _))) {
                break;
            }
            idx += 1;
            let Some(Obj::Leaf(Lexeme::Word(stage), stage_line)) = items.get(idx) else {
                return Err(self.err(line, "expected a task name after `/` in a path call"));
            };
            stages.push((stage.clone(), *stage_line));
            idx += 1;
        }
        if stages.is_empty() {
            return Err(self.err(line, "path call has no stages after `/`"));
        }
        let mut calls = Vec::new();
        for (pos, (stage, stage_line)) in stages.iter().enumerate() {
            let task = self.interns.intern_task(stage);
            let args: Rc<[Term]> = if pos + 1 == stages.len() {
                Rc::from(vec![current.clone()])
            } else {
                let out_slot = self.local_slot(&format!("?__pipe{}", self.auto_counter_bump()));
                let out = Term::Local(out_slot);
                let args = Rc::from(vec![current.clone(), out.clone()]);
                current = out;
                args
            };
            calls.push(Step::Call {
                task,
                args,
                loc: Some(CodeLoc { path: self.path.clone(), line: *stage_line }),
            });
        }
        let step = if calls.len() == 1 {
            calls.into_iter().next().expect("len checked")
        } else {
            Step::Seq(Rc::from(calls))
        };
        Ok((step, idx - start))
    }

    fn auto_counter_bump(&mut self) -> u32 {
        self.auto_counter += 1;
        self.auto_counter
    }

    fn compile_body_item(&mut self, obj: &Obj) -> Result<Step, ParseError> {
        match obj {
            Obj::Leaf(Lexeme::Word(w), _) => Ok(Step::Emit(Rc::from(vec![Token::Word(w.clone())]))),
            Obj::Leaf(Lexeme::Int(n), _) => Ok(Step::Emit(Rc::from(vec![Token::Word(n.to_string())]))),
            Obj::Leaf(Lexeme::Float(f), _) => Ok(Step::Emit(Rc::from(vec![Token::Word(f.to_string())]))),
            Obj::Leaf(Lexeme::Quoted(s), _) => Ok(Step::Emit(Rc::from(vec![Token::Word(s.clone())]))),
            Obj::Leaf(Lexeme::Html(s), _) => Ok(Step::Emit(Rc::from(vec![Token::Html(s.clone())]))),
            Obj::Leaf(Lexeme::Punct(c), _) => Ok(Step::Emit(Rc::from(vec![Token::Punctuation(*c)]))),
            Obj::Leaf(Lexeme::Newline, _) => Ok(Step::Emit(Rc::from(vec![Token::Newline]))),
            Obj::Tuple(inner, line) => self.compile_tuple(inner, *line),
        }
    }

    fn compile_tuple(&mut self, inner: &[Obj], line: u32) -> Result<Step, ParseError> {
        let Some(head) = inner.first() else {
            return Ok(Step::NoOp);
        };
        let keyword = match head {
            Obj::Leaf(Lexeme::Word(w), _) => Some(w.as_str()),
            _ => None,
        };
        match keyword {
            Some("set") => self.compile_assignment(&inner[1..], line),
            Some("not") | Some("Not") => Ok(Step::Not(Rc::new(self.compile_body_items(&inner[1..])?))),
            Some("notAny") | Some("NotAny") => {
                let alts = self.compile_or_branches(&inner[1..])?;
                Ok(Step::NotAny(Rc::from(alts)))
            }
            Some("once") | Some("Once") => Ok(Step::Once(Rc::new(self.compile_body_items(&inner[1..])?))),
            Some("exactlyOnce") | Some("ExactlyOnce") => Ok(Step::ExactlyOnce(Rc::new(self.compile_body_items(&inner[1..])?))),
            Some("fail") | Some("Fail") => Ok(Step::Fail),
            Some("firstOf") => Ok(Step::FirstOf(Rc::from(self.compile_or_branches(&inner[1..])?))),
            Some("randomly") => Ok(Step::Randomly(Rc::from(self.compile_or_branches(&inner[1..])?))),
            Some("sequence") => {
                let alts = self.compile_then_branches(&inner[1..])?;
                let element = self.auto_state_element("seq");
                Ok(Step::Sequence {
                    alternatives: Rc::from(alts),
                    position_element: element,
                })
            }
            Some("cool") => {
                let (cycle, rest) = match inner.get(1) {
                    Some(Obj::Leaf(Lexeme::Int(n), _)) => (*n as u32, &inner[2..]),
                    _ => (1, &inner[1..]),
                };
                let alts = self.compile_or_branches(rest)?;
                let element = self.auto_state_element("cool");
                Ok(Step::Cool {
                    alternatives: Rc::from(alts),
                    cycle,
                    history_element: element,
                })
            }
            Some("countAttempts") | Some("CountAttempts") => self.compile_count_attempts(&inner[1..], line),
            Some("forEach") | Some("ForEach") | Some("doAll") | Some("DoAll") => self.compile_for_each_like(&inner[1..], line, false),
            Some("implies") | Some("Implies") => self.compile_for_each_like(&inner[1..], line, true),
            Some("findAll") | Some("FindAll") => self.compile_find_all(&inner[1..], line, FindMode::All),
            Some("findUnique") | Some("FindUnique") => self.compile_find_all(&inner[1..], line, FindMode::Unique),
            Some("findFirstNUnique") | Some("FindFirstNUnique") => self.compile_find_all_n(&inner[1..], line, FindMode::FirstN),
            Some("findAtMostNUnique") | Some("FindAtMostNUnique") => self.compile_find_all_n(&inner[1..], line, FindMode::AtMostN),
            Some("max") | Some("Max") => self.compile_extremum(&inner[1..], line, ExtremumKind::Max),
            Some("min") | Some("Min") => self.compile_extremum(&inner[1..], line, ExtremumKind::Min),
            Some("case") => self.compile_case(&inner[1..], line),
            Some("parse") | Some("Parse") => self.compile_parse(&inner[1..], line),
            Some("saveText") | Some("SaveText") => self.compile_save_text(&inner[1..], line),
            Some("callDiscardingStateChanges") | Some("CallDiscardingStateChanges") => {
                Ok(Step::CallDiscardingStateChanges(Rc::new(self.compile_body_items(&inner[1..])?)))
            }
            Some("throw") | Some("Throw") => Ok(Step::Throw {
                message: Rc::new(self.compile_body_items(&inner[1..])?),
                bail_out: false,
            }),
            Some("bailOut") | Some("BailOut") => Ok(Step::Throw {
                message: Rc::new(self.compile_body_items(&inner[1..])?),
                bail_out: true,
            }),
            _ => self.compile_call(inner, line),
        }
    }

    fn compile_call(&mut self, inner: &[Obj], line: u32) -> Result<Step, ParseError> {
        let Some(name) = obj_task_name(&inner[0]) else {
            return Err(self.err(line, "expected a task name to start a call"));
        };
        let task = self.interns.intern_task(&name);
        let args = inner[1..].iter().map(|o| self.compile_term(o)).collect::<Result<Vec<_>, _>>()?;
        Ok(Step::Call {
            task,
            args: Rc::from(args),
            loc: Some(CodeLoc { path: self.path.clone(), line }),
        })
    }

    /// Splits on top-level `or` markers, dropping a trailing `end`.
    fn compile_or_branches(&mut self, items: &[Obj]) -> Result<Vec<Step>, ParseError> {
        self.split_and_compile(items, "or")
    }

    fn compile_then_branches(&mut self, items: &[Obj]) -> Result<Vec<Step>, ParseError> {
        self.split_and_compile(items, "then")
    }

    fn split_and_compile(&mut self, items: &[Obj], sep: &str) -> Result<Vec<Step>, ParseError> {
        let trimmed = strip_trailing_end(items);
        let mut branches = Vec::new();
        let mut start = 0;
        for (idx, obj) in trimmed.iter().enumerate() {
            if matches!(obj, Obj::Leaf(Lexeme::Word(w), _) if w == sep) {
                branches.push(self.compile_body_items(&trimmed[start..idx])?);
                start = idx + 1;
            }
        }
        branches.push(self.compile_body_items(&trimmed[start..])?);
        Ok(branches)
    }

    fn compile_assignment(&mut self, items: &[Obj], line: u32) -> Result<Step, ParseError> {
        let Some(Obj::Leaf(Lexeme::Word(target), _)) = items.first() else {
            return Err(self.err(line, "`set` requires a target"));
        };
        if !target.chars().next().is_some_and(char::is_uppercase) {
            return Err(self.err(line, "`set` target must be a capitalized state element"));
        }
        if !matches!(items.get(1), Some(Obj::Leaf(Lexeme::Punct('='), _))) {
            return Err(self.err(line, "`set` requires `=` after its target"));
        }
        let element = self.interns.intern_state_element(target);
        self.state_decls.declare(element, None);
        let expr = self.compile_expr(&items[2..], line)?;
        Ok(Step::Assignment { element, expr })
    }

    fn compile_count_attempts(&mut self, items: &[Obj], line: u32) -> Result<Step, ParseError> {
        let Some(Obj::Leaf(Lexeme::Word(name), _)) = items.first() else {
            return Err(self.err(line, "`countAttempts` requires a local variable"));
        };
        let local = self.local_slot(name);
        let limit = match items.get(1) {
            Some(Obj::Leaf(Lexeme::Int(n), _)) => Some(*n as u32),
            _ => None,
        };
        Ok(Step::CountAttempts { local, limit })
    }

    /// Accepts `[GEN]` or `[GEN] [BODY]`; a missing body defaults to
    /// `NoOp`, which relies on the generator's own emitted text
    /// accumulating across solutions.
    fn compile_for_each_like(&mut self, items: &[Obj], line: u32, implies: bool) -> Result<Step, ParseError> {
        let Some(Obj::Tuple(gen_inner, _)) = items.first() else {
            return Err(self.err(line, "expected a bracketed generator"));
        };
        let generator = Rc::new(self.compile_body_items(gen_inner)?);
        let body = match items.get(1) {
            Some(Obj::Tuple(body_inner, _)) => Rc::new(self.compile_body_items(body_inner)?),
            _ => Rc::new(Step::NoOp),
        };
        Ok(if implies {
            Step::Implies { generator, body }
        } else {
            Step::ForEach { generator, body }
        })
    }

    fn compile_find_all(&mut self, items: &[Obj], line: u32, mode: FindMode) -> Result<Step, ParseError> {
        let Some(Obj::Tuple(gen_inner, _)) = items.first() else {
            return Err(self.err(line, "expected a bracketed generator"));
        };
        let Some(Obj::Leaf(Lexeme::Word(name), _)) = items.get(1) else {
            return Err(self.err(line, "expected a local variable to receive the solutions"));
        };
        let generator = Rc::new(self.compile_body_items(gen_inner)?);
        let local = self.local_slot(name);
        Ok(Step::FindAll { generator, local, mode })
    }

    fn compile_find_all_n(&mut self, items: &[Obj], line: u32, mode_ctor: fn(u32) -> FindMode) -> Result<Step, ParseError> {
        let Some(Obj::Leaf(Lexeme::Int(n), _)) = items.first() else {
            return Err(self.err(line, "expected a count"));
        };
        self.compile_find_all(&items[1..], line, mode_ctor(*n as u32))
    }

    fn compile_extremum(&mut self, items: &[Obj], line: u32, kind: ExtremumKind) -> Result<Step, ParseError> {
        let Some(Obj::Leaf(Lexeme::Word(name), _)) = items.first() else {
            return Err(self.err(line, "expected a score local variable"));
        };
        let score_local = self.local_slot(name);
        let Some(Obj::Tuple(gen_inner, _)) = items.get(1) else {
            return Err(self.err(line, "expected a bracketed generator"));
        };
        let generator = Rc::new(self.compile_body_items(gen_inner)?);
        Ok(Step::Extremum { kind, generator, score_local })
    }

    /// `case V [pat1] [body1] [pat2] [body2] ... end`: patterns and bodies
    /// must both be bracketed so the arm boundary is unambiguous.
    fn compile_case(&mut self, items: &[Obj], line: u32) -> Result<Step, ParseError> {
        let Some(scrutinee_obj) = items.first() else {
            return Err(self.err(line, "`case` requires a scrutinee"));
        };
        let scrutinee = self.compile_term(scrutinee_obj)?;
        let rest = strip_trailing_end(&items[1..]);
        let mut arms = Vec::new();
        let mut idx = 0;
        while idx < rest.len() {
            let Obj::Tuple(pat_inner, _) = &rest[idx] else {
                return Err(self.err(line, "`case` arm pattern must be bracketed"));
            };
            let Some(Obj::Tuple(body_inner, _)) = rest.get(idx + 1) else {
                return Err(self.err(line, "`case` arm body must be bracketed"));
            };
            let pattern = if pat_inner.len() == 1 {
                self.compile_term(&pat_inner[0])?
            } else {
                Term::Compound(CompoundTerm::Tuple(Rc::from(pat_inner.iter().map(|o| self.compile_term(o)).collect::<Result<Vec<_>, _>>()?)))
            };
            let body = Rc::new(self.compile_body_items(body_inner)?);
            arms.push(CaseArm { pattern, body });
            idx += 2;
        }
        Ok(Step::Case { scrutinee, arms: Rc::from(arms) })
    }

    fn compile_parse(&mut self, items: &[Obj], line: u32) -> Result<Step, ParseError> {
        let Some(Obj::Tuple(call_inner, _)) = items.first() else {
            return Err(self.err(line, "`parse` requires a bracketed call"));
        };
        let Some(text_obj) = items.get(1) else {
            return Err(self.err(line, "`parse` requires target text"));
        };
        let call = Rc::new(self.compile_body_items(call_inner)?);
        let text = self.compile_term(text_obj)?;
        Ok(Step::Parse { call, text })
    }

    fn compile_save_text(&mut self, items: &[Obj], line: u32) -> Result<Step, ParseError> {
        let Some(Obj::Tuple(call_inner, _)) = items.first() else {
            return Err(self.err(line, "`saveText` requires a bracketed call"));
        };
        let Some(Obj::Leaf(Lexeme::Word(name), _)) = items.get(1) else {
            return Err(self.err(line, "`saveText` requires a local variable"));
        };
        let call = Rc::new(self.compile_body_items(call_inner)?);
        let local = self.local_slot(name);
        Ok(Step::SaveText { call, local })
    }

    fn compile_expr(&mut self, items: &[Obj], line: u32) -> Result<Expr, ParseError> {
        let mut pos = 0;
        let expr = self.parse_expr_bp(items, &mut pos, 0, line)?;
        Ok(expr)
    }

    fn parse_expr_bp(&mut self, items: &[Obj], pos: &mut usize, min_bp: u8, line: u32) -> Result<Expr, ParseError> {
        let Some(first) = items.get(*pos) else {
            return Err(self.err(line, "expected an expression"));
        };
        *pos += 1;
        let mut lhs = if matches!(first, Obj::Leaf(Lexeme::Word(w), _) if w == "not") {
            Expr::Not(Rc::new(self.parse_expr_bp(items, pos, 9, line)?))
        } else {
            Expr::Term(self.compile_term(first)?)
        };

        loop {
            let Some(op_obj) = items.get(*pos) else { break };
            let Some((op, bp)) = binop_of(op_obj) else { break };
            if bp < min_bp {
                break;
            }
            *pos += 1;
            let rhs = self.parse_expr_bp(items, pos, bp + 1, line)?;
            lhs = Expr::BinOp(op, Rc::new(lhs), Rc::new(rhs));
        }
        Ok(lhs)
    }

    fn compile_term(&mut self, obj: &Obj) -> Result<Term, ParseError> {
        match obj {
            Obj::Leaf(Lexeme::Word(w), _) if w.starts_with('?') => Ok(Term::Local(self.local_slot(w))),
            Obj::Leaf(Lexeme::Word(w), _) if w.chars().next().is_some_and(char::is_uppercase) => {
                let id = self.interns.intern_state_element(w);
                self.state_decls.declare(id, None);
                Ok(Term::StateElement(id))
            }
            Obj::Leaf(Lexeme::Word(w), _) => Ok(Term::Literal(Value::Symbol(self.interns.intern_symbol(w)))),
            Obj::Leaf(Lexeme::Int(n), _) => Ok(Term::Literal(Value::Int(*n))),
            Obj::Leaf(Lexeme::Float(f), _) => Ok(Term::Literal(Value::Float(*f))),
            Obj::Leaf(Lexeme::Quoted(s), _) => Ok(Term::Literal(Value::Symbol(self.interns.intern_symbol(s)))),
            Obj::Leaf(Lexeme::Html(s), _) => Ok(Term::Literal(Value::String(Rc::from(s.as_str())))),
            Obj::Leaf(Lexeme::Punct(c), line) => Err(self.err(*line, format!("unexpected `{c}` in term position"))),
            Obj::Leaf(Lexeme::Newline, line) => Err(self.err(*line, "unexpected newline in term position")),
            Obj::Tuple(inner, _) => Ok(Term::Compound(CompoundTerm::Tuple(Rc::from(
                inner.iter().map(|o| self.compile_term(o)).collect::<Result<Vec<_>, _>>()?,
            )))),
        }
    }
}

fn obj_task_name(obj: &Obj) -> Option<String> {
    match obj {
        Obj::Leaf(Lexeme::Word(w), _) => Some(w.clone()),
        Obj::Leaf(Lexeme::Punct(c), _) => Some(c.to_string()),
        _ => None,
    }
}

fn strip_trailing_end(items: &[Obj]) -> &[Obj] {
    match items.last() {
        Some(Obj::Leaf(Lexeme::Word(w), _)) if w == "end" => &items[..items.len() - 1],
        _ => items,
    }
}

fn binop_of(obj: &Obj) -> Option<(BinOp, u8)> {
    match obj {
        Obj::Leaf(Lexeme::Word(w), _) if w == "and" => Some((BinOp::And, 1)),
        Obj::Leaf(Lexeme::Word(w), _) if w == "or" => Some((BinOp::Or, 1)),
        Obj::Leaf(Lexeme::Punct('='), _) => Some((BinOp::Eq, 2)),
        Obj::Leaf(Lexeme::Punct('!'), _) => Some((BinOp::Ne, 2)),
        Obj::Leaf(Lexeme::Punct('<'), _) => Some((BinOp::Lt, 2)),
        Obj::Leaf(Lexeme::Punct('>'), _) => Some((BinOp::Gt, 2)),
        Obj::Leaf(Lexeme::Punct('+'), _) => Some((BinOp::Add, 3)),
        Obj::Leaf(Lexeme::Punct('-'), _) => Some((BinOp::Sub, 3)),
        Obj::Leaf(Lexeme::Punct('*'), _) => Some((BinOp::Mul, 4)),
        Obj::Leaf(Lexeme::Punct('/'), _) => Some((BinOp::Div, 4)),
        Obj::Leaf(Lexeme::Punct('%'), _) => Some((BinOp::Mod, 4)),
        _ => None,
    }
}

fn looks_like_annotation(inner: &[Obj]) -> bool {
    inner.iter().all(|o| matches!(o, Obj::Leaf(Lexeme::Word(w), _) if KNOWN_FLAGS.contains(&w.as_str())) || matches!(o, Obj::Leaf(Lexeme::Int(_), _)))
}

const KNOWN_FLAGS: &[&str] = &["fallible", "generator", "predicate", "function", "fluent", "main", "randomly", "remembered"];

fn apply_annotation(inner: &[Obj], flags: &mut TaskFlags, weight: &mut f32) {
    for obj in inner {
        match obj {
            Obj::Leaf(Lexeme::Word(w), _) => {
                let flag = match w.as_str() {
                    "fallible" => TaskFlags::FALLIBLE,
                    "generator" => TaskFlags::GENERATOR,
                    "predicate" => TaskFlags::PREDICATE,
                    "function" => TaskFlags::FUNCTION,
                    "fluent" => TaskFlags::FLUENT,
                    "main" => TaskFlags::MAIN,
                    "randomly" => TaskFlags::RANDOMLY,
                    "remembered" => TaskFlags::REMEMBERED,
                    _ => TaskFlags::empty(),
                };
                flags.insert(flag);
            }
            Obj::Leaf(Lexeme::Int(n), _) => *weight = *n as f32,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateElementRegistry;

    fn compile(src: &str) -> CompiledFile {
        let mut interns = Interns::new();
        let mut decls = StateElementRegistry::new();
        super::super::compile_source("t", src, &mut interns, &mut decls).unwrap()
    }

    #[test]
    fn compiles_two_methods_with_different_head_shapes() {
        let file = compile("Test X: hit.\nTest ?x: miss.\n");
        assert_eq!(file.methods.len(), 2);
        assert_eq!(file.methods[0].task_name, "Test");
        assert_eq!(file.methods[0].arity, 1);
    }

    #[test]
    fn multiline_body_ends_at_blank_line() {
        let file = compile("Test:\nhello world\n\nTest2: ok.\n");
        assert_eq!(file.methods.len(), 2);
    }

    #[test]
    fn set_assignment_compiles_to_assignment_step() {
        let file = compile("Test ?x: [set X = 2] [set Y = X + 1] [= ?x Y].\n");
        assert!(matches!(*file.methods[0].method.body, Step::Seq(_)));
    }

    #[test]
    fn singleton_local_produces_a_warning() {
        let file = compile("Test ?unused: ok.\n");
        assert_eq!(file.warnings.len(), 1);
    }

    #[test]
    fn annotation_tuple_sets_flags() {
        let file = compile("[generator] Gen: a.\n");
        assert!(file.methods[0].flags.contains(TaskFlags::GENERATOR));
    }
}
