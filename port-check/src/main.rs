use std::{io::Write, path::PathBuf, process::ExitCode};

use anyhow::{Context, Result};
use clap::Parser;
use hello_sre::{config::DEFAULT_PORT, deploy};

/// Verify that every declaration of the service port agrees.
///
/// Reads:
/// - the application's compiled-in default port
/// - `Dockerfile` (EXPOSE, ENV PORT) in the final stage
/// - every `k8s/*.yaml` (containerPort, env PORT, readiness/liveness probes, Service targetPort)
///
/// Exits 1 when any declaration disagrees, a required one is missing,
/// or an HTTP probe does not target `/healthz`.
#[derive(Parser, Debug)]
#[command(name = "port-check", version, about)]
struct Args {
    /// Repository root containing `Dockerfile` and `k8s/`
    #[arg(long, value_name = "DIR", default_value = ".")]
    root: PathBuf,

    /// Port every declaration must use
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Print only violations
    #[arg(long, default_value_t = false)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Consistent,
    Drift,
}

impl From<Outcome> for ExitCode {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Consistent => ExitCode::SUCCESS,
            Outcome::Drift => ExitCode::FAILURE,
        }
    }
}

/// Declarations go to `out`, violations to `err`.
fn run(args: &Args, out: &mut impl Write, err: &mut impl Write) -> Result<Outcome> {
    let inventory = deploy::collect(&args.root)
        .with_context(|| format!("reading port declarations under {}", args.root.display()))?;

    if !args.quiet {
        writeln!(out, "{:<22} {:>5}  ORIGIN", "SOURCE", "PORT")?;
        for d in &inventory.declarations {
            writeln!(out, "{:<22} {:>5}  {}", d.source.to_string(), d.port, d.origin)?;
        }
        if !inventory.probe_paths.is_empty() {
            writeln!(out)?;
            writeln!(out, "{:<22} {:<10}  ORIGIN", "PROBE", "PATH")?;
            for p in &inventory.probe_paths {
                writeln!(
                    out,
                    "{:<22} {:<10}  {}",
                    p.source.probe_kind().unwrap_or("probe"),
                    p.path.as_deref().unwrap_or("-"),
                    p.origin
                )?;
            }
        }
    }

    match deploy::check(&inventory, args.port) {
        Ok(port) => {
            if !args.quiet {
                writeln!(out, "ok: all declarations use port {port}")?;
            }
            Ok(Outcome::Consistent)
        }
        Err(drift) => {
            writeln!(err, "port drift against {}:", drift.expected)?;
            for v in &drift.violations {
                writeln!(err, "  - {v}")?;
            }
            Ok(Outcome::Drift)
        }
    }
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let outcome = run(&args, &mut std::io::stdout(), &mut std::io::stderr())?;
    Ok(outcome.into())
}
