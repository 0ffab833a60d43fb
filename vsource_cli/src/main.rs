mod cli;
mod commands;
mod error_fmt;
mod logging;

use clap::Parser;

use crate::cli::{Cli, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    if let Err(err) = color_eyre::install() {
        eprintln!("failed to install error hooks: {err}");
    }

    let guard = match logging::init(&cli.log_level, cli.json, cli.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(err) => fail(&err),
    };

    if let Err(err) = commands::run(&cli) {
        tracing::error!(error = %err, "command failed");
        // flush the log file before exiting
        drop(guard);
        fail(&err);
    }
}

fn fail(err: &eyre::Report) -> ! {
    if JSON_MODE.get().copied().unwrap_or(false) {
        eprintln!("{}", format_error_json(err));
    } else {
        eprintln!("{}", humanize(err));
    }
    std::process::exit(exit_code_for_error(err));
}
