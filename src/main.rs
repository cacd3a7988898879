use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, WrapErr};
use minilang::*;
use std::path::{Path, PathBuf};
use std::{
    fs,
    io::{self, Write},
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the tokens of a program, one per line
    Tokenize { filename: PathBuf },
    /// Print the syntax tree of a program
    Parse { filename: PathBuf },
    /// Evaluate a program, printing its output and final value
    Run { filename: PathBuf },
    /// Read and evaluate one program per line
    Repl,
}

/// Installs the log subscriber when `RUST_LOG` is set, e.g. `RUST_LOG=minilang=trace`.
fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(io::stderr).with_target(true))
            .with(EnvFilter::from_default_env())
            .init();
    }
}

fn read_source(filename: &Path) -> miette::Result<String> {
    fs::read_to_string(filename)
        .into_diagnostic()
        .wrap_err_with(|| format!("reading '{}' failed", filename.display()))
}

fn report(err: impl miette::Diagnostic + Send + Sync + 'static, source: &str) -> miette::Report {
    miette::Report::new(err).with_source_code(source.to_string())
}

fn print_outcome(output: &[Option<Value>], value: Option<&Value>, prefix: &str) {
    for entry in output {
        println!("{}", describe(entry.as_ref()));
    }
    if let Some(value) = value {
        println!("{prefix}{value}");
    }
}

fn repl() -> miette::Result<()> {
    let mut evaluator = Evaluator::new();
    let stdin = io::stdin();

    loop {
        print!("minilang> ");
        io::stdout().flush().into_diagnostic()?;

        let mut input = String::new();
        if stdin.read_line(&mut input).into_diagnostic()? == 0 {
            break;
        }
        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("exit") {
            break;
        }

        let program = match minilang::Parser::new(input).parse() {
            Ok(program) => program,
            Err(e) => {
                eprintln!("{:?}", report(e, input));
                continue;
            }
        };

        match evaluator.eval(&program) {
            Ok(value) => print_outcome(evaluator.output(), value.as_ref(), "> "),
            Err(err) => {
                print_outcome(evaluator.output(), None, "");
                eprintln!("{:?}", report(err, input));
            }
        }
        evaluator.clear_output();
    }

    Ok(())
}

fn main() -> miette::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Tokenize { filename } => {
            let file_contents = read_source(&filename)?;

            for token in Lexer::new(&file_contents) {
                println!("{:?}", token);
            }
        }
        Commands::Parse { filename } => {
            let file_contents = read_source(&filename)?;

            let mut parser = minilang::Parser::new(&file_contents);
            match parser.parse() {
                Ok(program) => println!("{program}"),
                Err(e) => return Err(report(e, &file_contents)),
            }
        }
        Commands::Run { filename } => {
            let file_contents = read_source(&filename)?;

            let program = minilang::Parser::new(&file_contents)
                .parse()
                .map_err(|e| report(e, &file_contents))?;
            let mut evaluator = Evaluator::new();
            let result = evaluator.eval(&program);
            print_outcome(evaluator.output(), None, "");
            let value = result.map_err(|e| report(e, &file_contents))?;
            print_outcome(&[], value.as_ref(), "");
        }
        Commands::Repl => repl()?,
    }

    Ok(())
}
