//! CLI definitions for threadline.

pub mod render;

use clap::{Args, Parser, Subcommand};

use crate::config::ThreadlineConfig;
use crate::error::Result;

/// Threadline CLI
#[derive(Parser, Debug)]
#[command(name = "threadline", version, about = "Chat with an LLM inside a message thread")]
pub struct Cli {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send a message and stream the reply
    Chat(ChatArgs),
    /// Rate a persisted message
    Vote(VoteArgs),
    /// Print the effective configuration
    Config,
}

/// Overrides applied on top of file and environment configuration.
#[derive(Args, Debug, Default)]
pub struct ConnectionArgs {
    /// Base URL of the host application
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// CSRF token sent with every request
    #[arg(long, global = true)]
    pub csrf_token: Option<String>,

    /// Follow-up passes allowed after tool results
    #[arg(long, global = true)]
    pub max_interpretation_passes: Option<u32>,
}

impl ConnectionArgs {
    /// Layered config with command-line overrides on top.
    pub fn resolve(&self) -> Result<ThreadlineConfig> {
        let mut config = ThreadlineConfig::load()?;
        if let Some(url) = &self.base_url {
            config.set_base_url(url.clone());
        }
        if let Some(token) = &self.csrf_token {
            config.set_csrf_token(token.clone());
        }
        if let Some(passes) = self.max_interpretation_passes {
            config.max_interpretation_passes = passes;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Arguments for `threadline chat`.
#[derive(Parser, Debug)]
pub struct ChatArgs {
    /// Thread to post into
    #[arg(short, long)]
    pub thread: u64,

    /// Message text (positional)
    pub message: Option<String>,
}

/// Arguments for `threadline vote`.
#[derive(Parser, Debug)]
pub struct VoteArgs {
    /// Message id
    #[arg(short, long)]
    pub message: u64,

    /// -1, 0 or 1
    #[arg(long, allow_hyphen_values = true)]
    pub value: i8,
}
