//! # cabin-cli
//!
//! Terminal console for live cabin agent sessions.
//!
//! ```text
//! cabin console --voice Puck          # type to the agent, hear nothing
//! cabin console --audio               # speak and listen (desktop-audio build)
//! cabin config                        # print the effective configuration
//! ```
//!
//! Configuration comes from `<config dir>/cabin/config.toml` (or `--config`),
//! then `GOOGLE_API_KEY`/`GEMINI_API_KEY` (a `.env` file is honored), then
//! command-line flags.

pub mod cli;
pub mod config;
pub mod console;

pub use config::CliConfig;
