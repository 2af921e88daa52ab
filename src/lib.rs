//! Threadline: streaming LLM replies for threaded chat.
//!
//! A [`Composer`](session::Composer) per thread submits the user's message,
//! opens a server-push event stream, folds text chunks and tool calls into a
//! live entry, and persists the finished reply and tool results through a
//! [`MessageGateway`](gateway::MessageGateway). When tool results land, one
//! follow-up "interpretation" stream lets the model narrate them.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use threadline::prelude::*;
//!
//! # async fn example() -> threadline::error::Result<()> {
//! let config = ThreadlineConfig::load()?;
//! let collaborators = Collaborators {
//!     transport: Arc::new(HttpSseTransport::new(config.clone())?),
//!     gateway: Arc::new(HttpMessageGateway::new(config.clone())?),
//!     notifier: Arc::new(TracingNotifier),
//! };
//! let composer = Composer::new(ThreadId(42), config, collaborators);
//! if let SubmitOutcome::Started(turn) = composer.submit("Summarise this thread").await? {
//!     let report = turn.finished().await?;
//!     println!("{} messages saved", report.persisted.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod gateway;
pub mod notify;
pub mod prelude;
pub mod session;
pub mod thread;
pub mod transport;
pub mod types;

#[cfg(feature = "cli")]
pub mod cli;
