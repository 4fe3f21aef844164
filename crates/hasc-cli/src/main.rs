//! The `hasc` command line driver.
//!
//! Thin by design: argument parsing, reading the source (or generating it
//! with `--generate`), driving [`hasc::compile`], printing diagnostics to
//! stderr and writing the assembly. All compiler behavior lives in the
//! `hasc` library crate.

use std::{
    fs,
    path::PathBuf,
    process::{Command, ExitCode, Stdio},
    time::{Duration, Instant},
};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// High Assembler 68000 compiler.
#[derive(Parser)]
#[command(name = "hasc", version, about = "Compiles HAS source to Motorola 68000 assembly")]
struct Args {
    /// Input .has file
    input: PathBuf,

    /// Output assembly file
    #[arg(short, long, default_value = "out.s")]
    output: PathBuf,

    /// Run a generation script and compile its standard output instead of
    /// reading the input file
    #[arg(long, value_name = "SCRIPT")]
    generate: Option<PathBuf>,

    /// Skip validation checks (back-end debugging)
    #[arg(long)]
    no_validate: bool,
}

const GENERATE_TIMEOUT: Duration = Duration::from_secs(30);

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("Error: {error:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let (source, base_dir) = if let Some(script) = &args.generate {
        eprintln!("Generating code with {}...", script.display());
        let source = run_generator(script)?;
        eprintln!("Generated {} bytes of HAS code", source.len());
        (source, None)
    } else {
        let source = fs::read_to_string(&args.input)
            .with_context(|| format!("failed to read input file {}", args.input.display()))?;
        let base_dir = args
            .input
            .canonicalize()
            .ok()
            .and_then(|p| p.parent().map(std::path::Path::to_path_buf));
        (source, base_dir)
    };

    let output = hasc::compile(&source, base_dir.as_deref(), !args.no_validate)
        .map_err(|error| anyhow::anyhow!("in {}:\n  {error}", args.input.display()))?;

    for warning in &output.warnings {
        eprintln!("Warning: {warning}");
    }

    fs::write(&args.output, output.assembly)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    println!("Wrote assembly to {}", args.output.display());
    Ok(())
}

/// Runs a generation script under python3 with a hard timeout, returning
/// its standard output as the source text.
fn run_generator(script: &std::path::Path) -> Result<String> {
    if !script.exists() {
        bail!("generation script not found: {}", script.display());
    }
    let mut child = Command::new("python3")
        .arg(script)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to run generation script {}", script.display()))?;

    let started = Instant::now();
    loop {
        match child.try_wait().context("failed waiting for generation script")? {
            Some(status) => {
                let output = child.wait_with_output().context("failed reading generation script output")?;
                if !status.success() {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    if stderr.trim().is_empty() {
                        bail!("generation script failed with {status}");
                    }
                    bail!("generation script failed with {status}\nstderr: {}", stderr.trim());
                }
                return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
            }
            None => {
                if started.elapsed() > GENERATE_TIMEOUT {
                    let _ = child.kill();
                    let _ = child.wait();
                    bail!("generation script timed out (30 seconds)");
                }
                std::thread::sleep(Duration::from_millis(50));
            }
        }
    }
}
