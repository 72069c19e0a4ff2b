//! The host-facing script interface.
//!
//! A [`Script`] wraps a parsed AST. Evaluation consumes a [`ScriptContext`]
//! and yields a [`Progress`]: either a completed result (with the warnings
//! the run accumulated) or a pending host call with a resumable state.
//! Host-call suspension uses deterministic replay — see
//! `ScriptContext::host_call` — so resuming is just answering and running
//! again.

use std::sync::Arc;

use crate::{
    compile::{CompiledScript, compile},
    context::ScriptContext,
    datum::Datum,
    error::{ScriptError, Unwind},
    interp::evaluate,
    optimize::optimize,
    registry::OpRegistry,
    surface::{SurfaceError, decompile, transpile},
};

/// A parsed script: an AST plus the operations to run, compile, optimize,
/// and decompile it.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    ast: Datum,
}

impl Script {
    #[must_use]
    pub fn from_ast(ast: Datum) -> Self {
        Self { ast }
    }

    /// Parses the JSON wire form of an AST.
    pub fn parse(json: &str) -> Result<Self, ScriptError> {
        let ast = Datum::from_json_str(json).map_err(|err| ScriptError::custom(format!("invalid script JSON: {err}")))?;
        Ok(Self { ast })
    }

    /// Transpiles surface source into a script.
    pub fn transpile(source: &str) -> Result<Self, SurfaceError> {
        Ok(Self {
            ast: transpile(source)?,
        })
    }

    #[must_use]
    pub fn ast(&self) -> &Datum {
        &self.ast
    }

    /// Serializes the AST to its JSON wire form.
    pub fn to_json(&self) -> Result<String, ScriptError> {
        self.ast
            .to_json_string()
            .map_err(|err| ScriptError::custom(format!("script serialization failed: {err}")))
    }

    /// Renders the script as surface source.
    #[must_use]
    pub fn decompile(&self) -> String {
        decompile(&self.ast)
    }

    /// Constant-folds pure subtrees.
    #[must_use]
    pub fn optimize(self) -> Self {
        Self {
            ast: optimize(&self.ast),
        }
    }

    /// Compiles against an explicit registry.
    pub fn compile(&self, ops: &Arc<OpRegistry>) -> Result<CompiledScript, ScriptError> {
        compile(&self.ast, ops)
    }

    /// Interprets the script in the given context.
    pub fn evaluate(&self, ctx: ScriptContext) -> Result<Progress, ScriptError> {
        run(self.ast.clone(), ctx)
    }
}

/// Outcome of driving a script until it completes or suspends.
#[derive(Debug)]
pub enum Progress {
    /// The script finished. The value is rendered to boundary data
    /// (lambdas and capabilities render as opaque markers).
    Complete {
        value: Datum,
        warnings: Vec<String>,
    },
    /// The script needs a host function result to continue.
    HostCall {
        /// Host function name.
        function: String,
        /// Arguments, rendered to boundary data.
        args: Vec<Datum>,
        /// Ordinal of this call within the evaluation.
        call_id: u32,
        /// Resumable state; call [`Suspended::resume`] with the result.
        state: Suspended,
    },
}

impl Progress {
    /// Consumes the progress and returns the completed value, if done.
    #[must_use]
    pub fn into_complete(self) -> Option<Datum> {
        match self {
            Self::Complete { value, .. } => Some(value),
            Self::HostCall { .. } => None,
        }
    }
}

/// A suspended evaluation, waiting on one host call.
#[derive(Debug)]
pub struct Suspended {
    ast: Datum,
    ctx: ScriptContext,
}

impl Suspended {
    /// Supplies the host call's result and continues to the next suspension
    /// point or completion.
    pub fn resume(mut self, result: Datum) -> Result<Progress, ScriptError> {
        self.ctx.answer_host_call(result);
        run(self.ast, self.ctx)
    }
}

fn run(ast: Datum, mut ctx: ScriptContext) -> Result<Progress, ScriptError> {
    match evaluate(&ast, &mut ctx) {
        Ok(value) => Ok(Progress::Complete {
            value: ctx.heap().render_datum(value),
            warnings: ctx.take_warnings(),
        }),
        Err(Unwind::HostCall(call)) => Ok(Progress::HostCall {
            function: call.function,
            args: call.args,
            call_id: call.call_id,
            state: Suspended { ast, ctx },
        }),
        Err(unwind) => Err(unwind.into_root_error()),
    }
}
