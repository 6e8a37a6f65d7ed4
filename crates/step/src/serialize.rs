//! Persistent `State` file format: `{State k1=v1 k2=v2 ...}`.
//!
//! A small hand-rolled reader, deliberately separate from the source
//! tokenizer: this grammar is a flat `key=value` list with no tasks, no
//! variables, and no nested calls, so sharing the full tokenizer would pull
//! in rules (comments, operators, keywords) this format never uses.

use std::fmt::Write as _;

use crate::{
    intern::Interns,
    parser::ParseError,
    state::State,
    value::Value,
};

/// Renders `state` as `{State k1=v1 k2=v2 ...}`, one entry per key currently
/// bound, most-recently-set order undone (sorted by key name for a stable,
/// diffable encoding).
#[must_use]
pub fn render_state(state: &State, interns: &Interns) -> String {
    let mut entries: Vec<(String, Value)> = state
        .iter_latest()
        .map(|(key, value)| (interns.state_element_name(key).to_owned(), value))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut out = String::from("{State");
    for (name, value) in &entries {
        let _ = write!(out, " {name}={}", render_value(value, interns));
    }
    out.push('}');
    out
}

fn render_value(value: &Value, interns: &Interns) -> String {
    match value {
        Value::Null => "null".to_owned(),
        Value::Int(n) => n.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::String(s) => render_quoted(s),
        Value::Symbol(id) => interns.symbol_name(*id).to_owned(),
        Value::Tuple(items) => {
            let rendered: Vec<String> = items.iter().map(|v| render_value(v, interns)).collect();
            format!("[{}]", rendered.join(" "))
        }
        other => panic!("state values of kind {} are not serializable", other.type_name()),
    }
}

fn render_quoted(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

/// Parses a `{State k1=v1 ...}` snapshot back into a [`State`], interning
/// any new symbol and state-element names it encounters.
pub fn parse_state(text: &str, interns: &mut Interns) -> Result<State, ParseError> {
    let mut chars = text.char_indices().peekable();
    skip_ws(&mut chars, text);
    expect_char(&mut chars, text, '{')?;
    expect_word(&mut chars, text, "State")?;

    let mut state = State::empty();
    loop {
        skip_ws(&mut chars, text);
        match chars.peek() {
            Some(&(_, '}')) => {
                chars.next();
                break;
            }
            Some(_) => {
                let key = read_key(&mut chars, text)?;
                expect_char(&mut chars, text, '=')?;
                let value = read_value(&mut chars, text, interns)?;
                let id = interns.intern_state_element(&key);
                state = state.set(id, value);
            }
            None => {
                return Err(ParseError::Syntax {
                    path: "<state>".to_owned(),
                    line: 0,
                    message: "unterminated state snapshot".to_owned(),
                });
            }
        }
    }
    Ok(state)
}

type Chars<'a> = std::iter::Peekable<std::str::CharIndices<'a>>;

fn err(message: impl Into<String>) -> ParseError {
    ParseError::Syntax {
        path: "<state>".to_owned(),
        line: 0,
        message: message.into(),
    }
}

fn skip_ws(chars: &mut Chars, _text: &str) {
    while matches!(chars.peek(), Some((_, c)) if c.is_whitespace()) {
        chars.next();
    }
}

fn expect_char(chars: &mut Chars, _text: &str, expected: char) -> Result<(), ParseError> {
    match chars.next() {
        Some((_, c)) if c == expected => Ok(()),
        Some((_, c)) => Err(err(format!("expected '{expected}', found '{c}'"))),
        None => Err(err(format!("expected '{expected}', found end of input"))),
    }
}

fn expect_word(chars: &mut Chars, text: &str, word: &str) -> Result<(), ParseError> {
    let start = chars.peek().map_or(text.len(), |&(i, _)| i);
    for expected in word.chars() {
        match chars.next() {
            Some((_, c)) if c == expected => {}
            _ => return Err(err(format!("expected `{word}`"))),
        }
    }
    let _ = start;
    Ok(())
}

fn read_key(chars: &mut Chars, _text: &str) -> Result<String, ParseError> {
    let mut key = String::new();
    while matches!(chars.peek(), Some((_, c)) if c.is_alphanumeric() || *c == '_') {
        key.push(chars.next().unwrap().1);
    }
    if key.is_empty() {
        return Err(err("expected a state-element name"));
    }
    Ok(key)
}

fn read_value(chars: &mut Chars, text: &str, interns: &mut Interns) -> Result<Value, ParseError> {
    skip_ws(chars, text);
    match chars.peek().copied() {
        Some((_, '"')) => read_string(chars),
        Some((_, '[')) => read_tuple(chars, text, interns),
        Some((_, c)) if c.is_ascii_digit() || c == '-' => read_number(chars),
        Some(_) => read_bare_word(chars).and_then(|word| match word.as_str() {
            "null" => Ok(Value::Null),
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            other => Ok(Value::Symbol(interns.intern_symbol(other))),
        }),
        None => Err(err("expected a value, found end of input")),
    }
}

fn read_string(chars: &mut Chars) -> Result<Value, ParseError> {
    chars.next(); // opening quote
    let mut s = String::new();
    loop {
        match chars.next() {
            Some((_, '"')) => break,
            Some((_, '\\')) => match chars.next() {
                Some((_, '"')) => s.push('"'),
                Some((_, '\\')) => s.push('\\'),
                Some((_, other)) => s.push(other),
                None => return Err(err("unterminated escape in string")),
            },
            Some((_, c)) => s.push(c),
            None => return Err(err("unterminated string")),
        }
    }
    Ok(Value::String(std::rc::Rc::from(s)))
}

fn read_number(chars: &mut Chars) -> Result<Value, ParseError> {
    let mut raw = String::new();
    let mut is_float = false;
    if matches!(chars.peek(), Some((_, '-'))) {
        raw.push(chars.next().unwrap().1);
    }
    while let Some(&(_, c)) = chars.peek() {
        if c.is_ascii_digit() {
            raw.push(c);
            chars.next();
        } else if c == '.' && !is_float {
            is_float = true;
            raw.push(c);
            chars.next();
        } else {
            break;
        }
    }
    if is_float {
        raw.parse::<f32>().map(Value::Float).map_err(|_| err(format!("invalid float `{raw}`")))
    } else {
        raw.parse::<i32>().map(Value::Int).map_err(|_| err(format!("invalid integer `{raw}`")))
    }
}

fn read_tuple(chars: &mut Chars, text: &str, interns: &mut Interns) -> Result<Value, ParseError> {
    chars.next(); // '['
    let mut items = Vec::new();
    loop {
        skip_ws(chars, text);
        match chars.peek() {
            Some(&(_, ']')) => {
                chars.next();
                break;
            }
            Some(_) => {
                items.push(read_value(chars, text, interns)?);
                skip_ws(chars, text);
            }
            None => return Err(err("unterminated tuple")),
        }
    }
    Ok(Value::tuple(items))
}

fn read_bare_word(chars: &mut Chars) -> Result<String, ParseError> {
    let mut word = String::new();
    while matches!(chars.peek(), Some((_, c)) if !c.is_whitespace() && *c != ']' && *c != '}') {
        word.push(chars.next().unwrap().1);
    }
    if word.is_empty() {
        return Err(err("expected a value"));
    }
    Ok(word)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_scalar_values() {
        let mut interns = Interns::new();
        let x = interns.intern_state_element("X");
        let name = interns.intern_state_element("Name");
        let state = State::empty()
            .set(x, Value::Int(3))
            .set(name, Value::String(std::rc::Rc::from("hi \"there\"")));

        let text = render_state(&state, &interns);
        let parsed = parse_state(&text, &mut interns).unwrap();

        assert!(matches!(parsed.get(x), Some(Value::Int(3))));
        match parsed.get(name) {
            Some(Value::String(s)) => assert_eq!(s.as_ref(), "hi \"there\""),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn round_trips_tuples_and_booleans_and_null() {
        let mut interns = Interns::new();
        let k = interns.intern_state_element("K");
        let state = State::empty().set(
            k,
            Value::tuple(vec![Value::Int(1), Value::Bool(true), Value::Null]),
        );
        let text = render_state(&state, &interns);
        let parsed = parse_state(&text, &mut interns).unwrap();
        match parsed.get(k) {
            Some(Value::Tuple(items)) => {
                assert!(matches!(items[0], Value::Int(1)));
                assert!(matches!(items[1], Value::Bool(true)));
                assert!(matches!(items[2], Value::Null));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_state_round_trips_to_braces_only() {
        let mut interns = Interns::new();
        let state = State::empty();
        assert_eq!(render_state(&state, &interns), "{State}");
        let parsed = parse_state("{State}", &mut interns).unwrap();
        assert!(parsed.iter_latest().next().is_none());
    }
}
