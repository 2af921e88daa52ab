//! Threadline CLI binary entry point.

use std::io::Write;
use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use threadline::cli::render::LivePrinter;
use threadline::cli::{ChatArgs, Cli, Commands, ConnectionArgs, VoteArgs};
use threadline::gateway::{HttpMessageGateway, MessageGateway};
use threadline::notify::ChannelNotifier;
use threadline::session::{Collaborators, Composer, SubmitOutcome};
use threadline::transport::HttpSseTransport;
use threadline::types::{MessageId, ThreadId, VoteValue};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Chat(args) => handle_chat(&cli.connection, args).await,
        Commands::Vote(args) => handle_vote(&cli.connection, args).await,
        Commands::Config => handle_config(&cli.connection),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("threadline=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn handle_chat(
    connection: &ConnectionArgs,
    args: ChatArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let Some(message) = args.message else {
        eprintln!("Usage: threadline chat --thread <ID> \"your message\"");
        std::process::exit(1);
    };

    let config = connection.resolve()?;
    let (notifier, mut notifications) = ChannelNotifier::new();
    let collaborators = Collaborators {
        transport: Arc::new(HttpSseTransport::new(config.clone())?),
        gateway: Arc::new(HttpMessageGateway::new(config.clone())?),
        notifier: Arc::new(notifier),
    };
    let composer = Arc::new(Composer::new(ThreadId(args.thread), config, collaborators));

    let mut snapshots = composer.snapshot_stream();
    let done = CancellationToken::new();
    let printer_done = done.clone();
    let printer = tokio::spawn(async move {
        let mut printer = LivePrinter::new();
        loop {
            let snapshot = tokio::select! {
                biased;
                _ = printer_done.cancelled() => break,
                next = snapshots.next() => match next {
                    Some(snapshot) => snapshot,
                    None => break,
                },
            };
            if let Some(out) = printer.render(&snapshot) {
                print!("{out}");
                let _ = std::io::stdout().flush();
            }
        }
    });

    let turn = match composer.submit(message).await? {
        SubmitOutcome::Started(turn) => turn,
        SubmitOutcome::AlreadyStreaming => return Err("a reply is already streaming".into()),
    };

    let stopper = Arc::clone(&composer);
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stopper.stop();
        }
    });

    let report = turn.finished().await?;
    ctrl_c.abort();
    done.cancel();
    let _ = printer.await;
    println!();

    while let Ok(notification) = notifications.try_recv() {
        eprintln!("{}: {}", notification.severity, notification.message);
    }
    eprintln!(
        "{} message(s) saved, {} failed, {} interpretation pass(es), final state {}",
        report.persisted.len(),
        report.failures.len(),
        report.interpretation_passes,
        report.final_status
    );

    if let Some(error) = report.error {
        return Err(error.into());
    }
    Ok(())
}

async fn handle_vote(
    connection: &ConnectionArgs,
    args: VoteArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let value = VoteValue::try_from(args.value)?;
    let gateway = HttpMessageGateway::new(connection.resolve()?)?;
    gateway.vote(MessageId(args.message), value).await?;
    println!("Recorded vote {value} on message {}", args.message);
    Ok(())
}

fn handle_config(connection: &ConnectionArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = connection.resolve()?;
    if let Some(path) = threadline::config::ThreadlineConfig::default_path() {
        eprintln!("# config file: {}", path.display());
    }
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
