use std::{env, fs, process::ExitCode, sync::Arc, time::Instant};

use liana::{Datum, EvalLimits, OpRegistry, Progress, Script, ScriptContext, StderrTracer, type_definitions};

const USAGE: &str = "\
usage: liana <command> [args]

commands:
  run <file> [gas]      evaluate a script (.ln surface source or .json AST)
  transpile <file>      print the AST of a surface-syntax file as JSON
  decompile <file>      print the surface source of a JSON AST file
  optimize <file>       constant-fold a script and print the reduced AST
  typedefs              print ambient type definitions for the standard ops
";

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let Some(command) = args.get(1) else {
        eprint!("{USAGE}");
        return ExitCode::FAILURE;
    };
    let result = match command.as_str() {
        "run" => run(args.get(2), args.get(3)),
        "transpile" => transpile(args.get(2)),
        "decompile" => decompile(args.get(2)),
        "optimize" => optimize(args.get(2)),
        "typedefs" => {
            print!("{}", type_definitions(&OpRegistry::standard()));
            Ok(())
        }
        other => Err(format!("unknown command '{other}'\n{USAGE}")),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn load_script(path: Option<&String>) -> Result<Script, String> {
    let Some(path) = path else {
        return Err(format!("missing file argument\n{USAGE}"));
    };
    let source = fs::read_to_string(path).map_err(|err| format!("{path}: {err}"))?;
    if path.ends_with(".json") {
        Script::parse(&source).map_err(|err| err.to_string())
    } else {
        Script::transpile(&source).map_err(|err| err.to_string())
    }
}

fn run(path: Option<&String>, gas: Option<&String>) -> Result<(), String> {
    let script = load_script(path)?;
    let gas = match gas {
        Some(text) => text.parse::<i64>().map_err(|_| format!("invalid gas budget '{text}'"))?,
        None => EvalLimits::default().gas,
    };

    let ops = Arc::new(OpRegistry::standard());
    let ctx = ScriptContext::minimal(Arc::clone(&ops), EvalLimits::with_gas(gas))
        .with_tracer(Box::new(StderrTracer))
        .with_send(Box::new(|channel: &str, payload: &Datum| {
            eprintln!("[send:{channel}] {payload}");
        }));

    let start = Instant::now();
    let mut progress = script.evaluate(ctx).map_err(|err| err.to_string())?;
    loop {
        match progress {
            Progress::Complete { value, warnings } => {
                let elapsed = start.elapsed();
                for warning in warnings {
                    eprintln!("warning: {warning}");
                }
                eprintln!("done in {elapsed:?}");
                println!("{value}");
                return Ok(());
            }
            Progress::HostCall { function, args, state, .. } => {
                // The CLI host answers every external call with null.
                eprintln!("host call: {function}({})", render_args(&args));
                progress = state.resume(Datum::Null).map_err(|err| err.to_string())?;
            }
        }
    }
}

fn render_args(args: &[Datum]) -> String {
    args.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

fn transpile(path: Option<&String>) -> Result<(), String> {
    let script = load_script(path)?;
    println!("{}", script.to_json().map_err(|err| err.to_string())?);
    Ok(())
}

fn decompile(path: Option<&String>) -> Result<(), String> {
    let script = load_script(path)?;
    println!("{}", script.decompile());
    Ok(())
}

fn optimize(path: Option<&String>) -> Result<(), String> {
    let script = load_script(path)?.optimize();
    println!("{}", script.to_json().map_err(|err| err.to_string())?);
    Ok(())
}
