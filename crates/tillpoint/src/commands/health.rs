//! One-shot health probe.

use owo_colors::OwoColorize;
use tillpoint_core::{HealthMonitor, ServerStatus, Session};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output::Printer;

pub async fn handle(session: &Session, global: &GlobalOpts) -> Result<(), CliError> {
    let monitor = HealthMonitor::new(session.api().clone());
    let status = monitor.check().await;

    if !global.quiet {
        let label = status.to_string();
        if Printer::new(global).color() {
            match status {
                ServerStatus::Online => println!("{}", label.green()),
                _ => println!("{}", label.red()),
            }
        } else {
            println!("{label}");
        }
    }

    match status {
        ServerStatus::Online => Ok(()),
        _ => Err(CliError::ServerOffline {
            url: session.config().server.to_string(),
        }),
    }
}
