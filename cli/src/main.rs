//! Interactive REPL and batch driver for the modlang interpreter.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::warn;

use modlang::error::ModlangError;
use modlang::tokenizer::Tokenizer;
use modlang::{format_value, ItemOutcome, Session};
use modlang_asm::{Instruction, Op, Ref, RefKind};

#[derive(Parser)]
#[command(name = "modlang", about = "Tokenize, compile, and run modlang source")]
struct Cli {
    /// Print a disassembly of each compiled statement before running it,
    /// plus a `State:` header before newly-bound globals.
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    /// Source file to run. Omit to start an interactive session reading
    /// from standard input.
    input_path: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let result = match &cli.input_path {
        Some(path) => run_file(path, cli.debug),
        None => run_repl(cli.debug),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

fn run_file(path: &std::path::Path, debug: bool) -> Result<(), ModlangError> {
    let source = fs::read_to_string(path)?;
    let mut session = Session::new();
    let mut tz = Tokenizer::new(source.as_bytes());
    loop {
        let outcome = session.run_next_item(&mut tz)?;
        if matches!(outcome, ItemOutcome::Eof) {
            return Ok(());
        }
        report(&session, outcome, debug, false);
    }
}

/// One line at a time: blank lines after the prompt are skipped, and a
/// line may hold more than one `;`-terminated statement.
fn run_repl(debug: bool) -> Result<(), ModlangError> {
    let mut rl = DefaultEditor::new().map_err(|e| std::io::Error::other(e.to_string()))?;
    let mut session = Session::new();
    println!("Unmatched Perspicacity Prompt");

    loop {
        let line = match next_nonblank_line(&mut rl) {
            Some(line) => line,
            None => return Ok(()),
        };
        let _ = rl.add_history_entry(line.as_str());

        let mut tz = Tokenizer::new(line.as_bytes());
        loop {
            let outcome = session.run_next_item(&mut tz)?;
            if matches!(outcome, ItemOutcome::Eof) {
                break;
            }
            report(&session, outcome, debug, true);
        }
    }
}

fn next_nonblank_line(rl: &mut DefaultEditor) -> Option<String> {
    loop {
        match rl.readline("> ") {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => return Some(line),
            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => return None,
            Err(err) => {
                warn!(%err, "line editor error, ending session");
                return None;
            }
        }
    }
}

fn report(session: &Session, outcome: ItemOutcome, debug: bool, repl: bool) {
    match outcome {
        ItemOutcome::Eof => {}
        ItemOutcome::ProcedureDefined { instructions, .. } => {
            if debug {
                println!();
                disassemble(&instructions);
            }
        }
        ItemOutcome::Statement(st) => {
            if debug {
                println!();
                disassemble(&st.instructions);
            }
            if debug && !st.bound.is_empty() {
                println!("\nState:");
            }
            for bound in &st.bound {
                let value = session.vm().peek(bound.global_index as usize).value;
                println!("{} = {}", bound.name, format_value(session.vm(), value, &bound.ty));
            }
            if repl && !st.result_values.is_empty() {
                let rendered: Vec<String> = st.result_values.iter().map(|(v, ty)| format_value(session.vm(), *v, ty)).collect();
                println!("result = {}", rendered.join(", "));
            }
        }
    }
}

fn format_ref(r: Ref) -> String {
    match r.kind {
        RefKind::Null => "NULL".to_string(),
        RefKind::StaticPointer => format!("0x{:x}", r.x),
        RefKind::Constant => format!("{}", r.x),
        RefKind::Global => format!("g{}", r.x),
        RefKind::Local => format!("l{}", r.x),
        RefKind::Temporary => format!("v{}", r.x),
    }
}

/// `MOV`, `ARRAY_ALLOC`, and `ARRAY_STORE` get custom infix formatting;
/// everything else falls back to `out = Op arg1, arg2`.
fn disassemble(instructions: &[Instruction]) {
    for ins in instructions {
        match ins.op {
            Op::Mov => println!("{} = {}", format_ref(ins.output), format_ref(ins.arg1)),
            Op::ArrayAlloc => println!("{} = alloc_array({}, {})", format_ref(ins.output), format_ref(ins.arg1), format_ref(ins.arg2)),
            Op::ArrayStore => println!("{}[{}] = {}", format_ref(ins.output), format_ref(ins.arg1), format_ref(ins.arg2)),
            op => println!("{} = {:?} {}, {}", format_ref(ins.output), op, format_ref(ins.arg1), format_ref(ins.arg2)),
        }
    }
}
