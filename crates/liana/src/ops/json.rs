//! The `json.*` opcodes.

use crate::{
    context::ScriptContext,
    datum::Datum,
    error::{EvalResult, ScriptError},
    ops::{opt_param, param, strict_op},
    registry::{OpDef, OpMeta},
    value::Value,
};

const CAT: &str = "json";

pub fn json_lib() -> Vec<OpDef> {
    vec![
        strict_op(
            OpMeta::op("json.stringify", CAT, "Serializes a value to JSON text; lambdas and capabilities fail.")
                .params(vec![param("value", "any"), opt_param("indent", "number")])
                .returns("string"),
            stringify_op,
        ),
        strict_op(
            OpMeta::op("json.parse", CAT, "Parses JSON text into a value.")
                .params(vec![param("text", "string")]),
            parse_op,
        ),
    ]
}

pub(crate) fn stringify_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let datum = ctx.heap().render_json(args[0])?;
    let indent = match args.get(1) {
        Some(value) => Some(
            value
                .as_num()
                .ok_or_else(|| ScriptError::argument_type("json.stringify", "indent must be a number"))?,
        ),
        None => None,
    };
    let text = if indent.is_some_and(|n| n > 0.0) {
        datum.to_json_pretty()
    } else {
        datum.to_json_string()
    }
    .map_err(|err| ScriptError::custom(format!("json.stringify: {err}")))?;
    ctx.alloc_str(text)
}

pub(crate) fn parse_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let Some(text) = args[0].as_str(ctx.heap()) else {
        return Err(ScriptError::argument_type("json.parse", "expected a string").into());
    };
    let datum = Datum::from_json_str(text).map_err(|err| ScriptError::custom(format!("json.parse: {err}")))?;
    ctx.load_datum(&datum)
}
