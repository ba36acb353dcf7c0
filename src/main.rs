use std::env;
use std::fs::File;
use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use donation_ledger::auth::StaticTokens;
use donation_ledger::csv::{read_commands, write_aggregates};
use donation_ledger::{Config, Engine};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(LevelFilter::WARN.into()))
        .with_writer(std::io::stderr)
        .init();

    let Some(path) = env::args().nth(1) else {
        error!("usage: donation-ledger <commands.csv>");
        return ExitCode::FAILURE;
    };

    if !path.ends_with(".csv") {
        warn!(path, "input file seems to not be a csv file");
    }

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let mut engine = Engine::new(config.clone());
    if let Some(tokens_file) = &config.tokens_file {
        let tokens = File::open(tokens_file)
            .map_err(csv::Error::from)
            .and_then(StaticTokens::from_reader);
        match tokens {
            Ok(tokens) => {
                info!(count = tokens.len(), "loaded static tokens");
                engine = engine.with_tokens(Arc::new(tokens));
            }
            Err(e) => {
                error!(path = %tokens_file.display(), "failed to load tokens: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    let commands = match read_commands(path.clone()) {
        Ok(commands) => commands,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let (cmd_sender, cmd_receiver) = tokio::sync::mpsc::channel(16);

    tokio::spawn(async move {
        for result in commands {
            match result {
                Ok(command) => {
                    if cmd_sender.send(command).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    engine.run(ReceiverStream::new(cmd_receiver)).await;

    let aggregates = match engine.aggregates().await {
        Ok(aggregates) => aggregates,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = write_aggregates(io::stdout().lock(), aggregates) {
        error!("failed to write aggregates: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
