use anyhow::Result;
use clap::Parser;
use tbpipe::cmd::worker::Args;
use tbpipe::{worker, workload};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // stdout may carry records; logs go to stderr only.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args = Args::parse();
    let app = workload::named(&args.workload)?;
    let code = worker::run(app, args.command)?;
    std::process::exit(code);
}
