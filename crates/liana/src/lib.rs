#![doc = include_str!("../../../README.md")]

mod compile;
mod context;
mod datum;
mod error;
mod heap;
mod interp;
mod ops;
mod optimize;
mod registry;
mod scope;
mod script;
mod surface;
mod trace;
mod value;

pub use crate::{
    compile::{CompiledFn, CompiledScript, compile},
    context::{EvalLimits, ScriptContext, SendFn},
    datum::Datum,
    error::{ErrorKind, EvalResult, PendingHostCall, ScriptError, TraceFrame, Unwind},
    heap::{CapabilityToken, Heap, HeapData, HeapId, Lambda},
    interp::{call_lambda, evaluate},
    ops::{
        FORBIDDEN_KEYS, PURE_OPS, check_key, core_lib, json_lib, list_lib, math_lib, object_lib, opt_param, param,
        string_lib, time_lib, variadic,
    },
    optimize::{optimize, optimize_with, pure_registry},
    registry::{LazyFn, OpDef, OpHandler, OpLayout, OpMeta, OpRegistry, ParamSpec, StrictFn, validate_args},
    scope::ScopeChain,
    script::{Progress, Script, Suspended},
    surface::{
        OPERATOR_ALIASES, RESERVED_WORDS, SurfaceError, decompile, sanitize_identifier, transpile, type_definitions,
    },
    trace::{EvalTracer, FoldOutcome, NoopTracer, RecordingTracer, StderrTracer, TraceEvent},
    value::Value,
};
