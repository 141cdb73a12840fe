//! Run the session and stream live traffic until Ctrl-C.
//!
//! Typing `r` and Enter reconnects the live channel by hand.

use std::io::BufRead;

use owo_colors::OwoColorize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tillpoint_api::LiveEvent;
use tillpoint_config::Config;
use tillpoint_core::health::DEFAULT_HEALTH_INTERVAL;
use tillpoint_core::{HealthMonitor, LiveStatus, ServerStatus, Session};

use crate::cli::{GlobalOpts, LiveArgs};
use crate::config;
use crate::error::CliError;
use crate::output::Printer;

pub async fn handle(
    session: &Session,
    args: &LiveArgs,
    cfg: &Config,
    profile_name: &str,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    session.start();
    let result = run(session, args, cfg, profile_name, global).await;
    session.shutdown().await;
    result
}

async fn run(
    session: &Session,
    args: &LiveArgs,
    cfg: &Config,
    profile_name: &str,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let mut notices = session.notices();
    let mut status_rx = session.subscribe_status();
    let mut events = session.live().subscribe();

    if let Some(ref id) = args.service {
        select_service(session, id).await?;
    }

    let wants_login =
        args.login.username.is_some() || config::has_credentials(&args.login, cfg, profile_name);
    if wants_login {
        let (username, password) = config::resolve_credentials(&args.login, cfg, profile_name)?;
        session.login(&username, &password).await?;
    } else if session.restore().await?.is_none() {
        return Err(CliError::NotLoggedIn);
    }

    let health = HealthMonitor::new(session.api().clone());
    let cancel = CancellationToken::new();
    let health_task = health.spawn(DEFAULT_HEALTH_INTERVAL, cancel.clone());
    let mut server_rx = health.subscribe();

    let printer = Printer::new(global);
    let color = printer.color();
    let mut input = spawn_input_reader();
    let mut last_label = "";
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = status_rx.borrow_and_update().clone();
                if status.label() != last_label {
                    last_label = status.label();
                    if !global.quiet {
                        eprintln!("{}", status_line(&status, color));
                    }
                }
            }
            notice = notices.recv() => match notice {
                Ok(notice) => eprintln!("! {notice}"),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
            event = events.recv() => match event {
                Ok(LiveEvent::Message(message)) => printer.message(&message),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "dropped live messages");
                }
                Err(RecvError::Closed) => break,
            },
            Some(line) = input.recv() => {
                if parse_input(&line) == Some(InputCommand::Reconnect) {
                    if session.status().can_reconnect() {
                        eprintln!("Reconnecting...");
                        session.reconnect().await;
                    } else {
                        eprintln!("Live channel is already up or connecting");
                    }
                }
            }
            changed = server_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let server = *server_rx.borrow_and_update();
                if !global.quiet {
                    eprintln!("Server: {}", server_label(server, color));
                }
            }
        }
    }

    cancel.cancel();
    let _ = health_task.await;
    Ok(())
}

async fn select_service(session: &Session, id: &str) -> Result<(), CliError> {
    let Some(discovery) = session.discovery() else {
        return Err(CliError::Validation {
            field: "service".into(),
            reason: "service discovery is disabled for this profile".into(),
        });
    };
    discovery
        .start_discovery(session.config().discovery_timeout)
        .await;
    if session.select_service(id) {
        Ok(())
    } else {
        Err(CliError::NotFound {
            resource_type: "service".into(),
            identifier: id.into(),
            list_command: "discover".into(),
        })
    }
}

fn status_line(status: &LiveStatus, color: bool) -> String {
    let label = status.label();
    let label = match (color, label) {
        (false, _) => label.to_owned(),
        (true, "Connected") => label.green().to_string(),
        (true, "Disconnected") => label.red().to_string(),
        (true, _) => label.yellow().to_string(),
    };

    let mut line = format!("Live: {label}");
    if !status.discovered_services.is_empty() {
        let names: Vec<_> = status
            .discovered_services
            .iter()
            .map(|s| s.label())
            .collect();
        line.push_str(&format!(" (services: {})", names.join(", ")));
    }
    if status.can_reconnect() {
        line.push_str(" -- type r and Enter to reconnect");
    }
    line
}

#[derive(Debug, PartialEq, Eq)]
enum InputCommand {
    Reconnect,
}

fn parse_input(line: &str) -> Option<InputCommand> {
    match line.trim() {
        "r" | "reconnect" => Some(InputCommand::Reconnect),
        _ => None,
    }
}

/// Blocking stdin reads live on their own thread so they never hold up
/// runtime shutdown.
fn spawn_input_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn server_label(status: ServerStatus, color: bool) -> String {
    let label = status.to_string();
    match (color, status) {
        (false, _) => label,
        (true, ServerStatus::Online) => label.green().to_string(),
        (true, _) => label.red().to_string(),
    }
}
