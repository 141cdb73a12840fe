//! Command dispatch: bridges CLI args -> session operations -> output.

pub mod auth;
pub mod config_cmd;
pub mod discover;
pub mod health;
pub mod live;

use tillpoint_config::Config;
use tillpoint_core::Session;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a server-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    session: &Session,
    config: &Config,
    profile_name: &str,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Discover(args) => discover::handle(session, &args, global).await,
        Command::Login(args) => auth::login(session, &args, config, profile_name, global).await,
        Command::Logout => auth::logout(session, global).await,
        Command::Whoami => auth::whoami(session, global),
        Command::Health => health::handle(session, global).await,
        Command::Live(args) => live::handle(session, &args, config, profile_name, global).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => Ok(()),
    }
}
