//! Script errors, control-flow signals, and the evaluation result type.
//!
//! Evaluation uses a single unwinding channel, [`Unwind`], with variants that
//! are *not* errors: `break`/`continue`/`return` signals and host-call
//! suspension travel alongside [`ScriptError`] but are never wrapped into one
//! and are never caught by `std.try`.

use std::fmt;

use strum::{Display, EnumString, IntoStaticStr};

use crate::{datum::Datum, value::Value};

/// Result alias for operations that can unwind out of evaluation.
pub type EvalResult<T> = Result<T, Unwind>;

/// Classification of a runtime or compile-time script failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum ErrorKind {
    /// An expression head (or dynamic dispatch target) is not in the registry.
    UnknownOpcode,
    /// Wrong number of arguments for a declared opcode signature.
    ArgumentCount,
    /// An argument's runtime type does not match the declared parameter type.
    ArgumentType,
    /// The gas budget went negative. Uncatchable.
    GasExhausted,
    /// `std.set` on a name with no existing binding.
    UndefinedVariable,
    /// Attribute access on a reserved reflective key.
    DisallowedKey,
    /// A user `std.throw`.
    UserThrow,
    /// `time.offset` with an unrecognized unit name.
    UnknownUnit,
    /// Anything else: malformed expressions, handler-specific failures.
    Custom,
}

/// One frame of a script stack trace: the opcode and its rendered arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    pub op: String,
    pub args: Vec<String>,
}

impl TraceFrame {
    #[must_use]
    pub fn new(op: impl Into<String>, args: Vec<String>) -> Self {
        Self { op: op.into(), args }
    }
}

impl fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.op, self.args.join(", "))
    }
}

/// A failure raised during compilation or evaluation of a script.
///
/// Carries the frame trace accumulated the first time the error crossed the
/// interpreter (or compiled code), plus the most recent opcode context.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptError {
    pub kind: ErrorKind,
    pub message: String,
    /// Innermost frame first.
    pub stack: Vec<TraceFrame>,
    /// The opcode that was executing when the error surfaced.
    pub context: Option<String>,
}

impl ScriptError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stack: Vec::new(),
            context: None,
        }
    }

    pub fn unknown_opcode(name: &str) -> Self {
        Self::new(ErrorKind::UnknownOpcode, format!("unknown opcode '{name}'"))
    }

    pub fn argument_count(op: &str, detail: impl fmt::Display) -> Self {
        Self::new(ErrorKind::ArgumentCount, format!("{op}: {detail}"))
    }

    pub fn argument_type(op: &str, detail: impl fmt::Display) -> Self {
        Self::new(ErrorKind::ArgumentType, format!("{op}: {detail}"))
    }

    pub fn gas_exhausted() -> Self {
        Self::new(ErrorKind::GasExhausted, "gas budget exhausted")
    }

    pub fn undefined_variable(name: &str) -> Self {
        Self::new(ErrorKind::UndefinedVariable, format!("variable '{name}' is not defined"))
    }

    pub fn disallowed_key(key: &str) -> Self {
        Self::new(ErrorKind::DisallowedKey, format!("access to key '{key}' is not allowed"))
    }

    pub fn user_throw(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UserThrow, message)
    }

    pub fn unknown_unit(unit: &str) -> Self {
        Self::new(ErrorKind::UnknownUnit, format!("unknown time unit '{unit}'"))
    }

    pub fn custom(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Custom, message)
    }

    /// Whether `std.try` may catch this error.
    ///
    /// Gas exhaustion aborts unconditionally so scripts cannot swallow their
    /// own budget violations.
    #[must_use]
    pub fn is_catchable(&self) -> bool {
        self.kind != ErrorKind::GasExhausted
    }

    /// Records the frame trace if no earlier catch point recorded one.
    pub(crate) fn fill_trace(&mut self, frames: Vec<TraceFrame>) {
        if self.stack.is_empty() {
            self.context = frames.first().map(|frame| frame.op.clone());
            self.stack = frames;
        }
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        for frame in &self.stack {
            write!(f, "\n  in {frame}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ScriptError {}

/// A request to the host, produced when a suspending opcode has no cached
/// result for its call ordinal.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingHostCall {
    /// Host function name.
    pub function: String,
    /// Arguments, rendered to boundary data.
    pub args: Vec<Datum>,
    /// Ordinal of this call within the evaluation, for async correlation.
    pub call_id: u32,
}

/// The unwinding channel of evaluation.
///
/// `Break`/`Continue`/`Return` are control-flow signals: loops and lambda
/// bodies absorb them, `std.try` must let them pass, and reaching the root
/// with one is a script bug. `HostCall` suspends the evaluation. Only the
/// `Error` variant represents a failure.
#[derive(Debug)]
pub enum Unwind {
    Error(Box<ScriptError>),
    Break,
    Continue,
    Return(Value),
    HostCall(Box<PendingHostCall>),
}

impl Unwind {
    /// Converts a signal that escaped its defining construct into the error
    /// it represents at the evaluation root.
    #[must_use]
    pub fn into_root_error(self) -> ScriptError {
        match self {
            Self::Error(err) => *err,
            Self::Break => ScriptError::custom("'break' used outside of a loop"),
            Self::Continue => ScriptError::custom("'continue' used outside of a loop"),
            Self::Return(_) => ScriptError::custom("'return' used outside of a lambda"),
            Self::HostCall(call) => {
                ScriptError::custom(format!("host call '{}' suspended outside the interpreter", call.function))
            }
        }
    }
}

impl From<ScriptError> for Unwind {
    fn from(err: ScriptError) -> Self {
        Self::Error(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gas_exhaustion_is_not_catchable() {
        assert!(!ScriptError::gas_exhausted().is_catchable());
        assert!(ScriptError::user_throw("oops").is_catchable());
        assert!(ScriptError::disallowed_key("__proto__").is_catchable());
    }

    #[test]
    fn display_includes_trace() {
        let mut err = ScriptError::undefined_variable("x");
        err.fill_trace(vec![
            TraceFrame::new("std.set", vec!["\"x\"".into(), "1".into()]),
            TraceFrame::new("std.seq", vec![]),
        ]);
        let rendered = err.to_string();
        assert!(rendered.starts_with("UndefinedVariable: variable 'x' is not defined"));
        assert!(rendered.contains("in std.set(\"x\", 1)"));
        assert_eq!(err.context.as_deref(), Some("std.set"));
    }

    #[test]
    fn second_fill_keeps_first_trace() {
        let mut err = ScriptError::custom("boom");
        err.fill_trace(vec![TraceFrame::new("inner", vec![])]);
        err.fill_trace(vec![TraceFrame::new("outer", vec![])]);
        assert_eq!(err.stack.len(), 1);
        assert_eq!(err.stack[0].op, "inner");
    }
}
