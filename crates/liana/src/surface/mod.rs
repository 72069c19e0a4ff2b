//! The surface syntax: a typed, curly-brace expression-and-statement
//! language that transpiles to the s-expression AST and back.
//!
//! `transpile` lowers source text to an AST; `decompile` renders an AST as
//! source that transpiles back to the same tree (for any tree the
//! transpiler could have produced). `type_definitions` emits ambient
//! declarations for a registry so authors get static checking before
//! transpilation.

mod emit;
mod lexer;
mod lower;
mod parser;
mod typedefs;

pub use emit::decompile;
pub use lower::transpile;
pub use typedefs::type_definitions;

use std::fmt;

/// A failure in the surface layer. These are authoring-time errors; they
/// never reach script runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceError {
    /// The source text does not parse.
    Parse { message: String, line: u32, column: u32 },
    /// The source parses but uses a construct with no AST mapping.
    Unsupported { construct: String, line: u32, column: u32 },
    /// The left side of an assignment is not a variable or member access.
    InvalidAssignment { line: u32, column: u32 },
}

impl SurfaceError {
    pub(crate) fn parse(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self::Parse {
            message: message.into(),
            line,
            column,
        }
    }

    pub(crate) fn unsupported(construct: impl Into<String>, line: u32, column: u32) -> Self {
        Self::Unsupported {
            construct: construct.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for SurfaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse { message, line, column } => {
                write!(f, "parse error at {line}:{column}: {message}")
            }
            Self::Unsupported { construct, line, column } => {
                write!(f, "unsupported construct at {line}:{column}: {construct}")
            }
            Self::InvalidAssignment { line, column } => {
                write!(f, "invalid assignment target at {line}:{column}")
            }
        }
    }
}

impl std::error::Error for SurfaceError {}

/// Symbolic opcode names and their identifier aliases. The transpiler
/// resolves alias calls (`lt(a, b, c)`) to the symbolic opcode; the
/// type-definition emitter and the decompiler use the aliases where an
/// identifier is required.
pub const OPERATOR_ALIASES: &[(&str, &str)] = &[
    ("+", "add"),
    ("-", "sub"),
    ("*", "mul"),
    ("/", "div"),
    ("%", "mod"),
    ("^", "pow"),
    ("==", "eq"),
    ("!=", "neq"),
    ("<", "lt"),
    (">", "gt"),
    ("<=", "lte"),
    (">=", "gte"),
];

/// Words the surface language reserves. An author calls an opcode whose
/// name collides with one by appending `_` (`if_(c, t, e)`); the trailing
/// underscore is stripped before opcode lookup.
pub const RESERVED_WORDS: &[&str] = &[
    "break", "case", "catch", "class", "const", "continue", "debugger", "default", "delete", "do", "else", "enum",
    "export", "extends", "false", "finally", "for", "function", "if", "import", "in", "instanceof", "let", "new",
    "null", "return", "static", "super", "switch", "this", "throw", "true", "try", "typeof", "undefined", "var",
    "void", "while", "with", "yield",
];

#[must_use]
pub fn is_reserved_word(word: &str) -> bool {
    RESERVED_WORDS.contains(&word)
}

/// Maps a symbolic opcode to its identifier alias, if it has one.
#[must_use]
pub fn alias_of(op: &str) -> Option<&'static str> {
    OPERATOR_ALIASES.iter().find(|(sym, _)| *sym == op).map(|(_, alias)| *alias)
}

/// Maps an identifier alias back to its symbolic opcode.
#[must_use]
pub fn op_of_alias(alias: &str) -> Option<&'static str> {
    OPERATOR_ALIASES.iter().find(|(_, a)| *a == alias).map(|(sym, _)| *sym)
}

/// Makes a script name usable as a surface identifier: characters outside
/// `[A-Za-z0-9_$]` become `_`, a leading digit gains a `_` prefix, and
/// reserved words gain a `_` suffix (reversed by the transpiler's call
/// resolution).
#[must_use]
pub fn sanitize_identifier(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '$' { c } else { '_' })
        .collect();
    if out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    if is_reserved_word(&out) {
        out.push('_');
    }
    if out.is_empty() {
        out.push('_');
    }
    out
}

/// Whether a key can be written with dot notation / a bare object key.
#[must_use]
pub fn is_identifier_like(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else { return false };
    (first.is_ascii_alphabetic() || first == '_' || first == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        && !is_reserved_word(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitization() {
        assert_eq!(sanitize_identifier("if"), "if_");
        assert_eq!(sanitize_identifier("3d"), "_3d");
        assert_eq!(sanitize_identifier("a-b"), "a_b");
        assert_eq!(sanitize_identifier("ok"), "ok");
    }

    #[test]
    fn alias_round_trip() {
        for (symbol, alias) in OPERATOR_ALIASES {
            assert_eq!(op_of_alias(alias), Some(*symbol));
            assert_eq!(alias_of(symbol), Some(*alias));
        }
    }
}
