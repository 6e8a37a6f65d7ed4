//! Source parsing: tokenizer -> expression grouper -> method compiler,
//! plus the CSV/TSV fact-table variant.

pub mod compiler;
pub mod csv;
pub mod grouper;
pub mod tokenizer;

use std::fmt;

/// A parse-time failure, always carrying the offending file path and line.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    Syntax { path: String, line: u32, message: String },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax { path, line, message } => write!(f, "{path}:{line}: {message}"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Compiles one `.step` source file into method definitions, threading
/// interning and state-element declaration through the module's shared
/// tables. `path` is attached to errors and `CodeLoc`s, not read from disk.
pub fn compile_source(
    path: &str,
    source: &str,
    interns: &mut crate::intern::Interns,
    state_decls: &mut crate::state::StateElementRegistry,
) -> Result<compiler::CompiledFile, ParseError> {
    let path_rc: std::rc::Rc<str> = std::rc::Rc::from(path);
    let tokens = tokenizer::tokenize(&path_rc, source)?;
    let objs = grouper::group(path, &tokens)?;
    compiler::compile_file(path, &objs, interns, state_decls)
}
