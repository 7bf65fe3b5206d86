use std::error::Error;
use std::fmt;
use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::thread;

use clap::Parser;
use cppif::cpp::{Config, Preprocessor};
use cppif::symbols::SymbolMap;

/// Evaluate C preprocessor conditionals and print the lines that survive.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Input files. Standard input is read when none are given.
    files: Vec<PathBuf>,
    /// `NAME[=VALUE]`. A bare name is defined as `1`.
    #[arg(short = 'D', long)]
    define: Vec<Define>,
    /// Undefine `NAME`, after all `-D` options.
    #[arg(short = 'U', long)]
    undefine: Vec<String>,
    /// Reject unknown directives.
    #[arg(long)]
    strict: bool,
    /// Keep an empty line in place of each stripped line.
    #[arg(long)]
    preserve_lines: bool,
    /// Print one line per event instead of the filtered text.
    #[arg(long)]
    events: bool,
    /// Write output here instead of standard output.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Clone)]
struct Define { name: String, value: Option<String> }

/// A preprocessing error in one input.
#[derive(Debug)]
struct Failed { file: String, error: cppif::Error }

type Output = Result<Vec<u8>, Box<dyn Error + Send + Sync>>;

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match run(&args) {
        Ok(()) => { ExitCode::SUCCESS }
        Err(error) => {
            eprintln!("{}", error);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), Box<dyn Error>> {
    let mut inputs = Vec::default();
    if args.files.is_empty() {
        let mut text = Vec::default();
        io::stdin().read_to_end(&mut text)?;
        inputs.push(("<stdin>".to_string(), text));
    }
    for path in &args.files {
        let text = fs::read(path).map_err(|error| format!("{}: {}", path.display(), error))?;
        inputs.push((path.display().to_string(), text));
    }

    let config = Config { strict: args.strict, preserve_lines: args.preserve_lines };
    let outputs: Vec<Output> = thread::scope(|scope| {
        let handles: Vec<_> = inputs.iter()
            .map(|(file, text)| (file, scope.spawn(move || preprocess(args, config, file, text))))
            .collect();
        handles.into_iter()
            .map(|(file, handle)| match handle.join() {
                Ok(output) => { output }
                Err(_) => { Err(format!("{}: preprocessing panicked", file).into()) }
            })
            .collect()
    });

    let mut out: Box<dyn Write> = match args.output {
        Some(ref path) => { Box::new(io::BufWriter::new(fs::File::create(path)?)) }
        None => { Box::new(io::stdout().lock()) }
    };
    for output in outputs {
        match output {
            Ok(text) => { out.write_all(&text)?; }
            Err(error) => {
                out.flush()?;
                let error: Box<dyn Error> = error;
                return Err(error);
            }
        }
    }
    out.flush()?;
    Ok(())
}

/// Run one input through its own session.
fn preprocess(args: &Args, config: Config, file: &str, text: &[u8]) -> Output {
    let symbols = &SymbolMap::default();
    let mut cpp = Preprocessor::new(symbols, config);
    cpp.set_file(file.as_bytes());
    for define in &args.define {
        let value = define.value.as_deref().unwrap_or("1");
        cpp.define(define.name.as_bytes(), Some(value.as_bytes()));
    }
    for name in &args.undefine {
        cpp.undef(name.as_bytes());
    }
    log::debug!("{}: {} predefined macros", file, cpp.macros().len());

    let failed = |error| Failed { file: file.to_string(), error };
    if !args.events {
        return Ok(cpp.process(text).map_err(failed)?);
    }

    let mut out = Vec::default();
    for event in cpp.events(text) {
        let event = event.map_err(failed)?;
        writeln!(out, "{}", event)?;
    }
    Ok(out)
}

impl FromStr for Define {
    type Err = String;

    fn from_str(arg: &str) -> Result<Define, String> {
        let (name, value) = match arg.split_once('=') {
            Some((name, value)) => { (name, Some(value.to_string())) }
            None => { (arg, None) }
        };
        if name.is_empty() {
            return Err(format!("missing macro name in \"{}\"", arg));
        }
        Ok(Define { name: name.to_string(), value })
    }
}

impl fmt::Display for Failed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.error)
    }
}

impl Error for Failed {
    fn source(&self) -> Option<&(dyn Error + 'static)> { Some(&self.error) }
}
