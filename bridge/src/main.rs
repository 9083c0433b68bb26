use std::process::ExitCode;

use clap::Parser;

use args::Args;

mod args;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    server::logger::init(&args.log_level, args.logging_disabled);

    let config = match config::Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            log::error!("configuration error: {err}");
            return ExitCode::from(1);
        }
    };

    log::info!("claude-bridge {}", env!("CARGO_PKG_VERSION"));

    match server::serve(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err @ server::Error::Bind(_)) => {
            log::error!("{err}");
            ExitCode::from(2)
        }
        Err(err) => {
            log::error!("{err}");
            ExitCode::from(1)
        }
    }
}
