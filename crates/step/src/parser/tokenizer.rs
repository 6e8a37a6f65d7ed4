//! Characters to tokens: the first of the three layered parser stages.

use std::rc::Rc;

use super::ParseError;

/// One lexical token, carrying enough to distinguish numbers and quoted
/// atoms from ordinary words -- distinctions the method compiler needs but
/// [`crate::output::Token`] (an *emitted* token) doesn't.
#[derive(Debug, Clone, PartialEq)]
pub enum Lexeme {
    Word(String),
    Int(i32),
    Float(f32),
    /// `|quoted text|`.
    Quoted(String),
    Punct(char),
    Newline,
    /// `<...>` passed through verbatim.
    Html(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub lexeme: Lexeme,
    pub line: u32,
}

/// Tokenizes one source file. `path` is carried only for error messages.
pub fn tokenize(path: &Rc<str>, source: &str) -> Result<Vec<Spanned>, ParseError> {
    let mut out = Vec::new();
    let mut line: u32 = 1;
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\n' => {
                out.push(Spanned { lexeme: Lexeme::Newline, line });
                line += 1;
                i += 1;
            }
            c if c.is_whitespace() => {
                i += 1;
            }
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '|' => {
                let start_line = line;
                i += 1;
                let start = i;
                while i < chars.len() && chars[i] != '|' {
                    if chars[i] == '\n' {
                        line += 1;
                    }
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(ParseError::Syntax {
                        path: path.to_string(),
                        line: start_line,
                        message: "unterminated quoted atom".to_owned(),
                    });
                }
                out.push(Spanned {
                    lexeme: Lexeme::Quoted(chars[start..i].iter().collect()),
                    line: start_line,
                });
                i += 1;
            }
            '<' => {
                let start_line = line;
                let start = i;
                i += 1;
                while i < chars.len() && chars[i] != '>' {
                    if chars[i] == '\n' {
                        line += 1;
                    }
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(ParseError::Syntax {
                        path: path.to_string(),
                        line: start_line,
                        message: "unterminated HTML tag".to_owned(),
                    });
                }
                i += 1;
                out.push(Spanned {
                    lexeme: Lexeme::Html(chars[start..i].iter().collect()),
                    line: start_line,
                });
            }
            '?' if chars.get(i + 1).is_some_and(|c| c.is_alphanumeric() || *c == '_') => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                out.push(Spanned {
                    lexeme: Lexeme::Word(chars[start..i].iter().collect()),
                    line,
                });
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) => {
                let start = i;
                if c == '-' {
                    i += 1;
                }
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let mut is_float = false;
                if chars.get(i) == Some(&'.') && chars.get(i + 1).is_some_and(char::is_ascii_digit) {
                    is_float = true;
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let lexeme = if is_float {
                    Lexeme::Float(text.parse().map_err(|_| ParseError::Syntax {
                        path: path.to_string(),
                        line,
                        message: format!("malformed number literal `{text}`"),
                    })?)
                } else {
                    Lexeme::Int(text.parse().map_err(|_| ParseError::Syntax {
                        path: path.to_string(),
                        line,
                        message: format!("malformed number literal `{text}`"),
                    })?)
                };
                out.push(Spanned { lexeme, line });
            }
            c if c.is_alphanumeric() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                out.push(Spanned {
                    lexeme: Lexeme::Word(chars[start..i].iter().collect()),
                    line,
                });
            }
            other => {
                out.push(Spanned { lexeme: Lexeme::Punct(other), line });
                i += 1;
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(src: &str) -> Vec<Lexeme> {
        tokenize(&Rc::from("test"), src).unwrap().into_iter().map(|s| s.lexeme).collect()
    }

    #[test]
    fn words_numbers_and_punctuation() {
        let tokens = lex("Test ?x: hit.");
        assert_eq!(
            tokens,
            vec![
                Lexeme::Word("Test".into()),
                Lexeme::Word("?x".into()),
                Lexeme::Punct(':'),
                Lexeme::Word("hit".into()),
                Lexeme::Punct('.'),
            ]
        );
    }

    #[test]
    fn negative_and_float_numbers() {
        assert_eq!(lex("-3"), vec![Lexeme::Int(-3)]);
        assert_eq!(lex("3.5"), vec![Lexeme::Float(3.5)]);
    }

    #[test]
    fn quoted_atom_and_html_passthrough() {
        assert_eq!(lex("|hello world|"), vec![Lexeme::Quoted("hello world".into())]);
        assert_eq!(lex("<br/>"), vec![Lexeme::Html("<br/>".into())]);
    }

    #[test]
    fn line_comment_is_dropped() {
        assert_eq!(lex("a # comment\nb"), vec![Lexeme::Word("a".into()), Lexeme::Newline, Lexeme::Word("b".into())]);
    }
}
