use argh::FromArgs;
use forklisp::printer::StdoutOutput;
use forklisp::{ArgumentStrategy, EvalConfig, Error, run_program};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::io::Read;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter, e.g. `FORKLISP_LOG=forklisp=trace`
const LOG_ENV: &str = "FORKLISP_LOG";

#[derive(FromArgs)]
/// Evaluate one S-expression program and print its result
struct Args {
    /// evaluate application operands in parallel
    #[argh(switch, short = 'p')]
    parallel: bool,
    /// read the program from this file instead of standard input
    #[argh(option, short = 'f')]
    file: Option<String>,
    /// do not echo the program before its result
    #[argh(switch, short = 'q')]
    quiet: bool,
    /// start an interactive session
    #[argh(switch, short = 'i')]
    interactive: bool,
    /// maximum non-tail evaluation depth
    #[argh(option)]
    max_depth: Option<usize>,
    /// maximum number of concurrent argument workers in parallel mode
    #[argh(option)]
    max_workers: Option<usize>,
}

impl Args {
    fn eval_config(&self) -> EvalConfig {
        let mut config = EvalConfig::default()
            .with_strategy(ArgumentStrategy::from_parallel_flag(self.parallel));
        if let Some(max_depth) = self.max_depth {
            config = config.with_max_depth(max_depth);
        }
        if let Some(max_workers) = self.max_workers {
            config = config.with_max_workers(max_workers);
        }
        config
    }
}

fn main() {
    let args: Args = argh::from_env();
    init_logging();

    let config = args.eval_config();
    if args.interactive {
        run_repl(&config);
        return;
    }

    let source = match read_program(args.file.as_deref()) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error: cannot read program: {e}");
            process::exit(1);
        }
    };
    if !args.quiet {
        println!("{source}");
    }

    match run_program(&source, &config, Arc::new(StdoutOutput)) {
        Ok(result) => println!("{result}"),
        Err(e) => exit_with(&e),
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_program(file: Option<&str>) -> std::io::Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path),
        None => {
            let mut source = String::new();
            std::io::stdin().read_to_string(&mut source)?;
            Ok(source)
        }
    }
}

fn exit_with(error: &Error) -> ! {
    eprintln!("Error: {error}");
    process::exit(1);
}

fn run_repl(config: &EvalConfig) {
    println!("forklisp: one S-expression per line, each in a fresh global environment");
    println!("Argument evaluation: {:?}", config.strategy);
    println!("Type :help for more commands, or Ctrl+D to exit.");
    println!();

    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("Error: could not initialize line editor: {e}");
            process::exit(1);
        }
    };

    loop {
        match rl.readline("forklisp> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                match line {
                    ":help" => {
                        print_help();
                        continue;
                    }
                    ":quit" | ":exit" => {
                        println!("Goodbye!");
                        break;
                    }
                    _ => {}
                }

                match run_program(line, config, Arc::new(StdoutOutput)) {
                    Ok(result) => println!("{result}"),
                    Err(e) => println!("Error: {e}"),
                }
            }

            Err(ReadlineError::Eof | ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }
}

fn print_help() {
    println!("Special forms: quote list prog2 if lambda letrec");
    println!("Primitives:    car cdr cons atom null not and or == + - * / < > print");
    println!("Selectors:     (k list) returns the k-th element, counting from 1");
    println!("Commands:      :help  :quit");
    println!();
    println!("Example: (letrec ((f (lambda (n) (if (== n 0) 1 (* n (f (- n 1))))))) (f 10))");
}
