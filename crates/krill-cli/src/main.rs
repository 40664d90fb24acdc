use std::{env, fs, process::ExitCode};

use krill::{Lexer, TokenKind, Vm};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let (path, dump_tokens) = match parse_args(&args) {
        Ok(parsed) => parsed,
        Err(message) => {
            eprintln!("{message}");
            eprintln!("usage: krill <file> [--tokens]");
            return ExitCode::FAILURE;
        }
    };

    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error: cannot read '{path}': {err}");
            return ExitCode::FAILURE;
        }
    };

    if dump_tokens {
        return dump_token_stream(path, &source);
    }

    let mut vm = Vm::new();
    match vm.load_module(path, &source) {
        Ok(_entry) => {
            // The entry closure is ready for an interpreter to run.
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn parse_args(args: &[String]) -> Result<(&str, bool), String> {
    let mut path = None;
    let mut dump_tokens = false;
    for arg in &args[1..] {
        match arg.as_str() {
            "--tokens" => dump_tokens = true,
            other if other.starts_with("--") => return Err(format!("unknown flag '{other}'")),
            other => {
                if path.replace(other).is_some() {
                    return Err("expected exactly one input file".to_owned());
                }
            }
        }
    }
    match path {
        Some(path) => Ok((path, dump_tokens)),
        None => Err("missing input file".to_owned()),
    }
}

/// Prints one line per token, the way the compiler will see them.
fn dump_token_stream(path: &str, source: &str) -> ExitCode {
    let mut lexer = Lexer::new(path, source);
    loop {
        if let Err(err) = lexer.advance() {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
        let token = lexer.peek().clone();
        if token.kind == TokenKind::Eof {
            return ExitCode::SUCCESS;
        }
        let kind: &'static str = token.kind.into();
        println!("{}L: {} [{}]", token.line, kind, lexer.text(&token));
    }
}
