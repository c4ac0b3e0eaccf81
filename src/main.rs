use anyhow::Context;
use clap::Parser;
use lox_bytecode::{InterpretResult, Vm};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Bytecode compiler and stack VM for the Lox scripting language.
#[derive(Parser)]
#[command(name = "loxbc", version, about)]
struct Cli {
    /// Script to run; starts a REPL when omitted
    file: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(64);
        }
    };

    match cli.file {
        Some(path) => run_file(&path),
        None => run_prompt(),
    }
}

fn run_file(path: &Path) -> ExitCode {
    let source = match fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))
    {
        Ok(source) => source,
        Err(err) => {
            eprintln!("{:#}", err);
            return ExitCode::from(74);
        }
    };

    let mut stdout = io::stdout();
    let result = Vm::new().interpret(&source, &mut stdout);
    let _ = stdout.flush();

    match result {
        InterpretResult::Ok => ExitCode::SUCCESS,
        InterpretResult::CompileError => ExitCode::from(65),
        InterpretResult::RuntimeError => ExitCode::from(70),
    }
}

fn run_prompt() -> ExitCode {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(err) => {
            eprintln!("failed to start repl: {}", err);
            return ExitCode::from(74);
        }
    };

    // one VM for the whole session, so definitions carry across lines
    let mut vm = Vm::new();
    loop {
        match editor.readline("> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line.as_str());

                let mut stdout = io::stdout();
                let _ = vm.interpret(&line, &mut stdout);
                let _ = stdout.flush();
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("repl error: {}", err);
                break;
            }
        }
    }
    ExitCode::SUCCESS
}
