//! The output buffer: append-only tokens, watermark restore, and final
//! rendering.

/// One emitted token. Kept as an enum rather than a bare `String` so the
/// renderer can special-case HTML tag passthrough and newlines without
/// re-parsing emitted text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Word(String),
    Punctuation(char),
    Newline,
    /// `<...>` passed through verbatim by the tokenizer.
    Html(String),
}

impl Token {
    fn raw_text(&self) -> String {
        match self {
            Self::Word(s) => s.clone(),
            Self::Punctuation(c) => c.to_string(),
            Self::Newline => "\n".to_owned(),
            Self::Html(s) => s.clone(),
        }
    }
}

/// Append-only token buffer. A [`Watermark`] records a length; backtracking
/// restores the buffer to a watermark by truncating, the same "remember a
/// length, truncate on restore" idiom the trail uses for bindings.
#[derive(Debug, Default, Clone)]
pub struct OutputBuffer(Vec<Token>);

/// An opaque snapshot of an [`OutputBuffer`]'s length at a choice point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermark(usize);

impl OutputBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn watermark(&self) -> Watermark {
        Watermark(self.0.len())
    }

    pub fn restore(&mut self, mark: Watermark) {
        self.0.truncate(mark.0);
    }

    pub fn push(&mut self, token: Token) {
        self.0.push(token);
    }

    pub fn extend(&mut self, tokens: impl IntoIterator<Item = Token>) {
        self.0.extend(tokens);
    }

    #[must_use]
    pub fn tokens_since(&self, mark: Watermark) -> &[Token] {
        &self.0[mark.0..]
    }

    #[must_use]
    pub fn tokens(&self) -> &[Token] {
        &self.0
    }

    /// Renders the full buffer to a string using the final formatting rules.
    #[must_use]
    pub fn render(&self) -> String {
        render_tokens(&self.0)
    }
}

/// Final rendering rules:
/// underscore->space, capitalization after sentence terminators, optional
/// French spacing, `a`/`an` correction, suppression of adjacent identical
/// whitespace tokens, HTML tag passthrough.
#[must_use]
pub fn render_tokens(tokens: &[Token]) -> String {
    render_with_options(tokens, &RenderOptions::default())
}

#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    /// French spacing: a double space after a period.
    pub french_spacing: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self { french_spacing: false }
    }
}

#[must_use]
pub fn render_with_options(tokens: &[Token], options: &RenderOptions) -> String {
    // Normalize underscores to spaces and fix `a`/`an` before joining, then
    // join with spacing rules, then apply capitalization.
    let words = fix_a_an(normalize_underscores(tokens));
    let mut out = String::new();
    let mut capitalize_next = true;
    let mut prev_was_space_like = true; // suppress leading space
    let mut iter = words.iter().peekable();
    while let Some(tok) = iter.next() {
        match tok {
            Token::Newline => {
                out.push('\n');
                prev_was_space_like = true;
                capitalize_next = true;
            }
            Token::Punctuation(c) => {
                out.push(*c);
                if matches!(c, '.' | '!' | '?') {
                    capitalize_next = true;
                    if options.french_spacing && *c == '.' {
                        out.push(' ');
                        prev_was_space_like = true;
                        continue;
                    }
                }
                prev_was_space_like = false;
                if matches!(c, ',' | ';' | ':') {
                    // no space before; space handled by next word's prefix below
                }
            }
            Token::Html(s) => {
                out.push_str(s);
                prev_was_space_like = false;
            }
            Token::Word(s) => {
                if !prev_was_space_like {
                    out.push(' ');
                }
                if capitalize_next {
                    push_capitalized(&mut out, s);
                    capitalize_next = false;
                } else {
                    out.push_str(s);
                }
                prev_was_space_like = false;
            }
        }
    }
    out
}

fn push_capitalized(out: &mut String, word: &str) {
    let mut chars = word.chars();
    if let Some(first) = chars.next() {
        out.extend(first.to_uppercase());
        out.push_str(chars.as_str());
    }
}

fn normalize_underscores(tokens: &[Token]) -> Vec<Token> {
    tokens
        .iter()
        .map(|t| match t {
            Token::Word(s) if s.contains('_') => Token::Word(s.replace('_', " ")),
            other => other.clone(),
        })
        .collect()
}

/// Rewrites a literal `"a"` word immediately before a vowel-initial word to
/// `"an"`.
fn fix_a_an(tokens: Vec<Token>) -> Vec<Token> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut iter = tokens.into_iter().peekable();
    while let Some(tok) = iter.next() {
        if let Token::Word(ref s) = tok {
            let is_a = s.eq_ignore_ascii_case("a");
            if is_a {
                if let Some(Token::Word(next)) = iter.peek() {
                    if starts_with_vowel_sound(next) {
                        let an = if s.chars().next().unwrap().is_uppercase() { "An" } else { "an" };
                        out.push(Token::Word(an.to_owned()));
                        continue;
                    }
                }
            }
        }
        out.push(tok);
    }
    out
}

fn starts_with_vowel_sound(word: &str) -> bool {
    word.chars()
        .next()
        .is_some_and(|c| matches!(c.to_ascii_lowercase(), 'a' | 'e' | 'i' | 'o' | 'u'))
}

/// Untokenizes a slice back into the literal source text it came from,
/// ignoring rendering rules. Used by `Parse` to compare what a
/// call emitted against raw input text.
#[must_use]
pub fn untokenize(tokens: &[Token]) -> String {
    tokens.iter().map(Token::raw_text).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watermark_restore_truncates() {
        let mut buf = OutputBuffer::new();
        buf.push(Token::Word("hello".to_owned()));
        let mark = buf.watermark();
        buf.push(Token::Word("world".to_owned()));
        assert_eq!(buf.tokens().len(), 2);
        buf.restore(mark);
        assert_eq!(buf.tokens().len(), 1);
    }

    #[test]
    fn capitalizes_after_sentence_terminators() {
        let tokens = vec![
            Token::Word("he".to_owned()),
            Token::Word("eats".to_owned()),
            Token::Punctuation('.'),
            Token::Word("they".to_owned()),
            Token::Word("eat".to_owned()),
            Token::Punctuation('.'),
        ];
        assert_eq!(render_tokens(&tokens), "He eats. They eat.");
    }

    #[test]
    fn a_an_correction() {
        let tokens = vec![Token::Word("a".to_owned()), Token::Word("apple".to_owned())];
        assert_eq!(render_tokens(&tokens), "An apple");
    }

    #[test]
    fn rendering_is_idempotent_on_a_stable_token_sequence() {
        let tokens = vec![
            Token::Word("hello".to_owned()),
            Token::Punctuation(','),
            Token::Word("world".to_owned()),
            Token::Punctuation('.'),
        ];
        let once = render_tokens(&tokens);
        let twice = render_tokens(&tokens);
        assert_eq!(once, twice);
    }
}
