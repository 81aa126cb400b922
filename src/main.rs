//! Parley CLI binary entry point.

use clap::Parser;
use parley::audio::{CpalMicrophone, CpalSpeaker};
use parley::cli::{render_update, Cli, Commands, ConsoleArgs};
use parley::config::SessionConfig;
use parley::realtime::WebSocketTransport;
use parley::session::SessionController;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("parley=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Console(args) => handle_console(args).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn handle_console(args: ConsoleArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = SessionConfig::from_env();
    if let Some(relay_url) = args.relay_url {
        config.relay_url = Some(relay_url);
    }
    if let Some(model) = args.model {
        config.model = model;
    }
    if args.no_greeting {
        config.greeting = None;
    }

    let transport = WebSocketTransport::from_config(&config)?;
    let mut session =
        SessionController::new(config, transport, CpalMicrophone::new(), CpalSpeaker::new())?;
    let mut updates = session.subscribe();

    session.connect().await?;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let outcome = loop {
        tokio::select! {
            _ = &mut ctrl_c => break Ok(()),
            step = session.process_next() => match step {
                Ok(true) => {}
                Ok(false) => break Ok(()),
                Err(error) => break Err(error),
            },
        }
        for update in updates.drain() {
            if let Some(line) = render_update(&update, args.verbose) {
                println!("{line}");
            }
        }
    };

    session.disconnect().await;
    for update in updates.drain() {
        if let Some(line) = render_update(&update, args.verbose) {
            println!("{line}");
        }
    }
    outcome.map_err(Into::into)
}
