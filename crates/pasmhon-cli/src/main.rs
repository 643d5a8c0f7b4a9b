//! pasmhon CLI - run a pasmhon source file

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pasmhon_core::{aot, bytecode, compile_source, with_output_capture, CodeObject, RuntimeConfig, Vm};

/// Exit status for compile errors and uncaught exceptions
const EXIT_FAILURE: u8 = 1;
/// Exit status for usage errors and unreadable inputs, matching clap
const EXIT_USAGE: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "pasmhon")]
#[command(version = pasmhon_core::VERSION)]
#[command(about = "Run a pasmhon program", long_about = None)]
struct Cli {
    /// Source file (.pa or .py)
    file: PathBuf,

    /// Interpret everything, never compile
    #[arg(long)]
    no_jit: bool,

    /// Calls or loop iterations before compiling
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    jit_threshold: Option<u32>,

    /// TOML runtime configuration
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print the bytecode of every code object and exit
    #[arg(long)]
    dump_bytecode: bool,

    /// Raise the log level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Also write a static x86-64 Linux executable replaying the output
    #[arg(long, value_name = "PATH")]
    emit_elf: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(EXIT_USAGE)
        }
    }
}

/// `RUST_LOG` wins; otherwise `-v` picks the level
fn init_logging(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// `-v` raises only our own crates; dependencies stay at `warn`
fn default_directives(verbose: u8) -> String {
    let level = match verbose {
        0 => return "warn".to_string(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    format!("warn,pasmhon={level},pasmhon_core={level}")
}

fn load_config(cli: &Cli) -> Result<RuntimeConfig> {
    let mut config = match &cli.config {
        Some(path) => RuntimeConfig::from_file(path)?,
        None => RuntimeConfig::default(),
    };
    if cli.no_jit {
        config.jit.enabled = false;
    }
    if let Some(threshold) = cli.jit_threshold {
        config.jit.call_threshold = threshold;
        config.jit.loop_threshold = threshold;
    }
    Ok(config.with_env_overrides())
}

/// Errors returned here are environment problems; program failures are
/// reported directly and turned into the exit status
fn run(cli: &Cli) -> Result<ExitCode> {
    let config = load_config(cli)?;
    let source = std::fs::read_to_string(&cli.file)
        .with_context(|| format!("cannot read '{}'", cli.file.display()))?;
    let filename = cli.file.display().to_string();

    let code = match compile_source(&source, &filename) {
        Ok(code) => code,
        Err(failure) => {
            eprint!("{}", failure.render(&filename, &source));
            return Ok(ExitCode::from(EXIT_FAILURE));
        }
    };

    if cli.dump_bytecode {
        print!("{}", bytecode::disassemble(&code));
        return Ok(ExitCode::SUCCESS);
    }

    match &cli.emit_elf {
        Some(path) => emit_elf(code, &config, path),
        None => Ok(execute(code, &config)),
    }
}

fn execute(code: std::rc::Rc<CodeObject>, config: &RuntimeConfig) -> ExitCode {
    let mut vm = Vm::new(config);
    let result = vm.run_module(code);
    log_jit_stats(&vm);
    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

/// Run with output captured, echo it, then bake it into an image
fn emit_elf(code: std::rc::Rc<CodeObject>, config: &RuntimeConfig, path: &Path) -> Result<ExitCode> {
    let mut vm = Vm::new(config);
    let (result, output) = with_output_capture(|| vm.run_module(code));
    log_jit_stats(&vm);

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(output.stdout.as_bytes())?;
    stdout.flush()?;

    if let Err(err) = result {
        eprintln!("{err}");
        eprintln!("no image written: the program did not finish normally");
        return Ok(ExitCode::from(EXIT_FAILURE));
    }
    aot::write_image(path, output.stdout.as_bytes())?;
    Ok(ExitCode::SUCCESS)
}

fn log_jit_stats(vm: &Vm) {
    if let Some(stats) = vm.jit_stats() {
        info!(
            compiled = stats.compiled,
            failed = stats.failed,
            deopts = stats.deopts,
            native_runs = stats.native_runs,
            "jit summary"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("pasmhon").chain(args.iter().copied())).expect("valid arguments")
    }

    #[test]
    fn flags_override_the_defaults() {
        let cli = parse(&["--no-jit", "--jit-threshold", "5", "prog.pa"]);
        let config = load_config(&cli).unwrap();
        assert!(!config.jit.enabled);
        assert_eq!(config.jit.call_threshold, 5);
        assert_eq!(config.jit.loop_threshold, 5);
    }

    #[test]
    fn verbosity_counts() {
        assert_eq!(parse(&["-vvv", "prog.pa"]).verbose, 3);
        assert_eq!(parse(&["prog.pa"]).verbose, 0);
    }

    #[test]
    fn verbosity_is_scoped_to_our_crates() {
        assert_eq!(default_directives(0), "warn");
        assert_eq!(default_directives(1), "warn,pasmhon=info,pasmhon_core=info");
        assert_eq!(default_directives(5), "warn,pasmhon=trace,pasmhon_core=trace");
        for verbose in 0..4 {
            assert!(default_directives(verbose).parse::<EnvFilter>().is_ok());
        }
    }

    #[test]
    fn exactly_one_file_is_required() {
        assert!(Cli::try_parse_from(["pasmhon"]).is_err());
        assert!(Cli::try_parse_from(["pasmhon", "a.pa", "b.pa"]).is_err());
        assert!(Cli::try_parse_from(["pasmhon", "--jit-threshold", "0", "a.pa"]).is_err());
    }

    #[test]
    fn config_file_is_read_before_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pasmhon.toml");
        std::fs::write(&path, "[jit]\ncall_threshold = 7\nloop_threshold = 9\n").unwrap();
        let path = path.display().to_string();

        let config = load_config(&parse(&["--config", &path, "prog.pa"])).unwrap();
        assert_eq!((config.jit.call_threshold, config.jit.loop_threshold), (7, 9));

        let config = load_config(&parse(&["--config", &path, "--jit-threshold", "3", "prog.pa"])).unwrap();
        assert_eq!((config.jit.call_threshold, config.jit.loop_threshold), (3, 3));
    }
}
