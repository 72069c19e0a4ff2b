//! The `time.*` opcodes.
//!
//! Instants are millisecond timestamps; `time.parse`/`time.format` convert
//! to and from ISO-8601 text. `time.offset` shifts by calendar units —
//! years and months through calendar arithmetic, the rest through fixed
//! durations — and accepts singular or plural unit names.

use chrono::{DateTime, Duration, Months, Utc};

use crate::{
    context::ScriptContext,
    error::{EvalResult, ScriptError},
    ops::{opt_param, param, strict_op},
    registry::{OpDef, OpMeta},
    value::Value,
};

const CAT: &str = "time";

pub fn time_lib() -> Vec<OpDef> {
    vec![
        strict_op(
            OpMeta::op("time.now", CAT, "The current instant as a millisecond timestamp.").returns("number"),
            now_op,
        ),
        strict_op(
            OpMeta::op("time.parse", CAT, "Parses an ISO-8601 string into a millisecond timestamp.")
                .params(vec![param("text", "string")])
                .returns("number"),
            parse_op,
        ),
        strict_op(
            OpMeta::op("time.format", CAT, "Formats a millisecond timestamp as ISO-8601 (UTC).")
                .params(vec![param("timestamp", "number")])
                .returns("string"),
            format_op,
        ),
        strict_op(
            OpMeta::op("time.offset", CAT, "Shifts an instant by an amount of calendar units; defaults to now.")
                .params(vec![
                    param("amount", "number"),
                    param("unit", "string"),
                    opt_param("base", "number|string"),
                ])
                .returns("number"),
            offset_op,
        ),
    ]
}

pub(crate) fn now_op(_args: Vec<Value>, _ctx: &mut ScriptContext) -> EvalResult<Value> {
    Ok(Value::Num(Utc::now().timestamp_millis() as f64))
}

pub(crate) fn parse_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let Some(text) = args[0].as_str(ctx.heap()) else {
        return Err(ScriptError::argument_type("time.parse", "expected a string").into());
    };
    let instant = parse_instant(text)?;
    Ok(Value::Num(instant.timestamp_millis() as f64))
}

pub(crate) fn format_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let instant = instant_from_millis("time.format", args[0])?;
    ctx.alloc_str(format_instant(instant))
}

fn parse_instant(text: &str) -> EvalResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|instant| instant.with_timezone(&Utc))
        .map_err(|err| ScriptError::argument_type("time.parse", format!("'{text}' is not ISO-8601: {err}")).into())
}

fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn instant_from_millis(op: &str, value: Value) -> EvalResult<DateTime<Utc>> {
    let Some(millis) = value.as_num() else {
        return Err(ScriptError::argument_type(op, "expected a millisecond timestamp").into());
    };
    if !millis.is_finite() {
        return Err(ScriptError::argument_type(op, "timestamp must be finite").into());
    }
    DateTime::from_timestamp_millis(millis as i64)
        .ok_or_else(|| ScriptError::argument_type(op, "timestamp out of range").into())
}

pub(crate) fn offset_op(args: Vec<Value>, ctx: &mut ScriptContext) -> EvalResult<Value> {
    let Some(amount) = args[0].as_num() else {
        return Err(ScriptError::argument_type("time.offset", "amount must be a number").into());
    };
    let Some(unit) = args[1].as_str(ctx.heap()) else {
        return Err(ScriptError::argument_type("time.offset", "unit must be a string").into());
    };

    let base = match args.get(2) {
        None => Utc::now(),
        Some(value) => {
            if let Some(text) = value.as_str(ctx.heap()) {
                parse_instant(text)?
            } else {
                instant_from_millis("time.offset", *value)?
            }
        }
    };

    let shifted = shift(base, amount, unit)?;
    Ok(Value::Num(shifted.timestamp_millis() as f64))
}

fn shift(base: DateTime<Utc>, amount: f64, unit: &str) -> EvalResult<DateTime<Utc>> {
    let months = |per_unit: f64| -> EvalResult<DateTime<Utc>> {
        let total = amount * per_unit;
        if total.fract() != 0.0 {
            return Err(ScriptError::argument_type("time.offset", "year/month offsets must be whole numbers").into());
        }
        let total = total as i64;
        let span = Months::new(u32::try_from(total.unsigned_abs()).unwrap_or(u32::MAX));
        let shifted = if total >= 0 {
            base.checked_add_months(span)
        } else {
            base.checked_sub_months(span)
        };
        shifted.ok_or_else(|| ScriptError::argument_type("time.offset", "offset out of range").into())
    };
    let fixed = |millis_per_unit: f64| -> EvalResult<DateTime<Utc>> {
        let millis = amount * millis_per_unit;
        if !millis.is_finite() {
            return Err(ScriptError::argument_type("time.offset", "offset out of range").into());
        }
        base.checked_add_signed(Duration::milliseconds(millis as i64))
            .ok_or_else(|| ScriptError::argument_type("time.offset", "offset out of range").into())
    };

    match unit {
        "year" | "years" => months(12.0),
        "month" | "months" => months(1.0),
        "day" | "days" => fixed(86_400_000.0),
        "hour" | "hours" => fixed(3_600_000.0),
        "minute" | "minutes" => fixed(60_000.0),
        "second" | "seconds" => fixed(1_000.0),
        other => Err(ScriptError::unknown_unit(other).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_by_months_crosses_year_boundaries() {
        let base = parse_instant("2025-11-15T00:00:00Z").unwrap();
        let shifted = shift(base, 3.0, "months").unwrap();
        assert_eq!(format_instant(shifted), "2026-02-15T00:00:00.000Z");
        let back = shift(base, -1.0, "year").unwrap();
        assert_eq!(format_instant(back), "2024-11-15T00:00:00.000Z");
    }

    #[test]
    fn unknown_unit_fails() {
        let base = Utc::now();
        let err = shift(base, 1.0, "fortnight").unwrap_err();
        match err {
            crate::error::Unwind::Error(err) => {
                assert_eq!(err.kind, crate::error::ErrorKind::UnknownUnit);
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn fractional_days_are_allowed() {
        let base = parse_instant("2025-01-01T00:00:00Z").unwrap();
        let shifted = shift(base, 1.5, "days").unwrap();
        assert_eq!(format_instant(shifted), "2025-01-02T12:00:00.000Z");
    }
}
