mod cli;
mod commands;
mod error;
mod output;
mod server;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};
use crate::error::{CliError, exit_code};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose, cli.global.log_json);

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            let code = err.exit_code();
            eprintln!("{:?}", miette::Report::new(err));
            std::process::exit(code);
        }
    }
}

fn init_tracing(verbosity: u8, json: bool) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}

async fn run(cli: Cli) -> Result<i32, CliError> {
    match cli.command {
        Command::Serve(args) => commands::serve::handle(args, &cli.global).await,
        Command::Presence => commands::presence::handle(&cli.global)
            .await
            .map(|()| exit_code::SUCCESS),
        Command::Probe(args) => commands::probe::handle(args, &cli.global)
            .await
            .map(|()| exit_code::SUCCESS),
        Command::Config(args) => {
            commands::config_cmd::handle(args, &cli.global).map(|()| exit_code::SUCCESS)
        }
        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "presenza", &mut std::io::stdout());
            Ok(exit_code::SUCCESS)
        }
    }
}
