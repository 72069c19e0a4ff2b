//! Tokenizer for the surface language.

use std::sync::Arc;

use super::SurfaceError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Tok {
    Num(f64),
    Str(String),
    /// A template literal: interleaved literal text and raw `${...}` source
    /// segments. The segments are re-lexed by the parser.
    Template(Vec<TplPart>),
    Ident(Arc<str>),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TplPart {
    Lit(String),
    Src(String),
}

#[derive(Debug, Clone)]
pub(crate) struct Token {
    pub tok: Tok,
    pub line: u32,
    pub column: u32,
}

/// Multi-character punctuation, longest first so maximal munch works.
const PUNCT: &[&str] = &[
    "?.", "=>", "===", "!==", "==", "!=", "<=", ">=", "**=", "**", "+=", "-=", "*=", "/=", "%=", "&&=", "||=", "??=",
    "&&", "||", "??", "(", ")", "[", "]", "{", "}", ",", ";", ":", ".", "?", "!", "=", "<", ">", "+", "-", "*", "/",
    "%", "&", "|",
];

pub(crate) struct Lexer<'s> {
    src: &'s [u8],
    pos: usize,
    line: u32,
    column: u32,
}

impl<'s> Lexer<'s> {
    pub fn new(source: &'s str) -> Self {
        Self {
            src: source.as_bytes(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    /// Tokenizes the whole input, ending with an `Eof` token.
    pub fn tokenize(mut self) -> Result<Vec<Token>, SurfaceError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia()?;
            let (line, column) = (self.line, self.column);
            let Some(&c) = self.src.get(self.pos) else {
                tokens.push(Token {
                    tok: Tok::Eof,
                    line,
                    column,
                });
                return Ok(tokens);
            };
            let tok = if c.is_ascii_digit() {
                self.number()?
            } else if c == b'"' || c == b'\'' {
                Tok::Str(self.quoted_string(c)?)
            } else if c == b'`' {
                self.template()?
            } else if c.is_ascii_alphabetic() || c == b'_' || c == b'$' {
                self.identifier()
            } else {
                self.punct()?
            };
            tokens.push(Token { tok, line, column });
        }
    }

    fn error(&self, message: impl Into<String>) -> SurfaceError {
        SurfaceError::parse(message, self.line, self.column)
    }

    fn bump(&mut self) -> u8 {
        let c = self.src[self.pos];
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        c
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn skip_trivia(&mut self) -> Result<(), SurfaceError> {
        loop {
            match self.peek() {
                Some(c) if c.is_ascii_whitespace() => {
                    self.bump();
                }
                Some(b'/') if self.src.get(self.pos + 1) == Some(&b'/') => {
                    while self.peek().is_some_and(|c| c != b'\n') {
                        self.bump();
                    }
                }
                Some(b'/') if self.src.get(self.pos + 1) == Some(&b'*') => {
                    self.bump();
                    self.bump();
                    loop {
                        match self.peek() {
                            None => return Err(self.error("unterminated block comment")),
                            Some(b'*') if self.src.get(self.pos + 1) == Some(&b'/') => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            _ => {
                                self.bump();
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn number(&mut self) -> Result<Tok, SurfaceError> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        if self.peek() == Some(b'.') && self.src.get(self.pos + 1).is_some_and(u8::is_ascii_digit) {
            self.bump();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            self.bump();
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.bump();
            }
            if !self.peek().is_some_and(|c| c.is_ascii_digit()) {
                return Err(self.error("malformed exponent"));
            }
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).expect("ascii digits");
        text.parse::<f64>()
            .map(Tok::Num)
            .map_err(|_| self.error(format!("malformed number '{text}'")))
    }

    fn quoted_string(&mut self, quote: u8) -> Result<String, SurfaceError> {
        self.bump();
        let mut out = String::new();
        loop {
            match self.peek() {
                None | Some(b'\n') => return Err(self.error("unterminated string")),
                Some(c) if c == quote => {
                    self.bump();
                    return Ok(out);
                }
                Some(b'\\') => {
                    self.bump();
                    self.escape(&mut out)?;
                }
                Some(_) => out.push(self.char_at_pos()?),
            }
        }
    }

    /// Consumes one (possibly multi-byte) character and returns it.
    fn char_at_pos(&mut self) -> Result<char, SurfaceError> {
        let rest = std::str::from_utf8(&self.src[self.pos..]).map_err(|_| self.error("invalid utf-8"))?;
        let c = rest.chars().next().expect("peeked non-empty");
        for _ in 0..c.len_utf8() {
            self.bump();
        }
        Ok(c)
    }

    fn escape(&mut self, out: &mut String) -> Result<(), SurfaceError> {
        let Some(c) = self.peek() else {
            return Err(self.error("unterminated escape"));
        };
        self.bump();
        match c {
            b'n' => out.push('\n'),
            b't' => out.push('\t'),
            b'r' => out.push('\r'),
            b'0' => out.push('\0'),
            b'u' => {
                if self.peek() != Some(b'{') {
                    return Err(self.error("expected '{' in unicode escape"));
                }
                self.bump();
                let mut code = 0u32;
                while let Some(d) = self.peek().and_then(|c| (c as char).to_digit(16)) {
                    code = code * 16 + d;
                    self.bump();
                }
                if self.peek() != Some(b'}') {
                    return Err(self.error("expected '}' in unicode escape"));
                }
                self.bump();
                out.push(char::from_u32(code).ok_or_else(|| self.error("invalid unicode escape"))?);
            }
            other => out.push(other as char),
        }
        Ok(())
    }

    fn template(&mut self) -> Result<Tok, SurfaceError> {
        self.bump();
        let mut parts = Vec::new();
        let mut lit = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated template literal")),
                Some(b'`') => {
                    self.bump();
                    if !lit.is_empty() || parts.is_empty() {
                        parts.push(TplPart::Lit(lit));
                    }
                    return Ok(Tok::Template(parts));
                }
                Some(b'\\') => {
                    self.bump();
                    self.escape(&mut lit)?;
                }
                Some(b'$') if self.src.get(self.pos + 1) == Some(&b'{') => {
                    if !lit.is_empty() {
                        parts.push(TplPart::Lit(std::mem::take(&mut lit)));
                    }
                    self.bump();
                    self.bump();
                    parts.push(TplPart::Src(self.template_expr()?));
                }
                Some(_) => lit.push(self.char_at_pos()?),
            }
        }
    }

    /// Captures the raw source of a `${...}` segment, balancing braces and
    /// skipping string contents.
    fn template_expr(&mut self) -> Result<String, SurfaceError> {
        let start = self.pos;
        let mut depth = 1usize;
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated template expression")),
                Some(b'{') => {
                    depth += 1;
                    self.bump();
                }
                Some(b'}') => {
                    depth -= 1;
                    if depth == 0 {
                        let source = std::str::from_utf8(&self.src[start..self.pos])
                            .map_err(|_| self.error("invalid utf-8"))?
                            .to_owned();
                        self.bump();
                        return Ok(source);
                    }
                    self.bump();
                }
                Some(q @ (b'"' | b'\'' | b'`')) => {
                    self.quoted_or_template_raw(q)?;
                }
                Some(_) => {
                    self.bump();
                }
            }
        }
    }

    /// Skips over a string/template body without interpreting it.
    fn quoted_or_template_raw(&mut self, quote: u8) -> Result<(), SurfaceError> {
        self.bump();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated string")),
                Some(b'\\') => {
                    self.bump();
                    if self.peek().is_some() {
                        self.bump();
                    }
                }
                Some(c) if c == quote => {
                    self.bump();
                    return Ok(());
                }
                Some(_) => {
                    self.bump();
                }
            }
        }
    }

    fn identifier(&mut self) -> Tok {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_' || c == b'$')
        {
            self.bump();
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).expect("ascii identifier");
        Tok::Ident(Arc::from(text))
    }

    fn punct(&mut self) -> Result<Tok, SurfaceError> {
        let rest = &self.src[self.pos..];
        for candidate in PUNCT {
            if rest.starts_with(candidate.as_bytes()) {
                for _ in 0..candidate.len() {
                    self.bump();
                }
                return Ok(Tok::Punct(candidate));
            }
        }
        Err(self.error(format!("unexpected character '{}'", self.src[self.pos] as char)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        Lexer::new(src).tokenize().unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn punctuation_uses_maximal_munch() {
        assert_eq!(
            toks("a ??= b"),
            vec![
                Tok::Ident("a".into()),
                Tok::Punct("??="),
                Tok::Ident("b".into()),
                Tok::Eof
            ]
        );
        assert_eq!(toks("a?.b")[1], Tok::Punct("?."));
        assert_eq!(toks("x ** 2")[1], Tok::Punct("**"));
    }

    #[test]
    fn template_segments() {
        let tokens = toks("`a ${x + 1} b`");
        let Tok::Template(parts) = &tokens[0] else {
            panic!("expected template");
        };
        assert_eq!(
            parts,
            &vec![
                TplPart::Lit("a ".into()),
                TplPart::Src("x + 1".into()),
                TplPart::Lit(" b".into())
            ]
        );
    }

    #[test]
    fn comments_and_numbers() {
        assert_eq!(
            toks("1.5e2 // end\n/* mid */ 3"),
            vec![Tok::Num(150.0), Tok::Num(3.0), Tok::Eof]
        );
    }
}
