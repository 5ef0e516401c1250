use std::process::ExitCode;

use clap::Parser;
use sed_opal::args::Cli;
use sed_opal::{status, BlockDevices, Outcome, TerminalPrompt};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let (device, request) = cli.command.into_parts();

    match sed_opal::run(&BlockDevices, &mut TerminalPrompt, &device, &request) {
        Ok(Outcome::Discovered(discovery)) => {
            print!("{}", discovery.report(request.discovery_style()));
            ExitCode::SUCCESS
        }
        Ok(Outcome::Completed) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(line) = status::report(request.verb, &err) {
                eprintln!("{line}");
            }
            ExitCode::from(err.kind().exit_code())
        }
    }
}
