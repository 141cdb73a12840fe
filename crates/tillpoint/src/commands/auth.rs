//! Login, logout and whoami.

use tillpoint_config::Config;
use tillpoint_core::{ProfileStore, Session, UserProfile};

use crate::cli::{GlobalOpts, LoginArgs};
use crate::config;
use crate::error::CliError;
use crate::output::Printer;

fn detail(user: &UserProfile) -> String {
    let mut lines = vec![
        format!("Name:      {}", user.display_name()),
        format!("Username:  {}", user.username),
    ];
    if let Some(ref role) = user.role {
        lines.push(format!("Role:      {role}"));
    }
    if let Some(ref email) = user.email {
        lines.push(format!("Email:     {email}"));
    }
    if let Some(id) = user.id {
        lines.push(format!("ID:        {id}"));
    }
    lines.join("\n")
}

pub async fn login(
    session: &Session,
    args: &LoginArgs,
    cfg: &Config,
    profile_name: &str,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let (username, password) = config::resolve_credentials(args, cfg, profile_name)?;
    let user = session
        .login(&username, &password)
        .await
        .map_err(|e| match CliError::from(e) {
            CliError::AuthFailed { message, .. } => CliError::AuthFailed {
                profile: profile_name.into(),
                message,
            },
            other => other,
        })?;

    Printer::new(global).record(&user, detail, |u| u.username.clone());
    Ok(())
}

pub async fn logout(session: &Session, global: &GlobalOpts) -> Result<(), CliError> {
    session.logout().await;
    if !global.quiet {
        eprintln!("Logged out");
    }
    Ok(())
}

/// Print the profile remembered by the last `login`.
pub fn whoami(session: &Session, global: &GlobalOpts) -> Result<(), CliError> {
    let Some(path) = session.config().profile_path.as_ref() else {
        return Err(CliError::NotLoggedIn);
    };
    let user = ProfileStore::new(path)
        .load()?
        .ok_or(CliError::NotLoggedIn)?;

    Printer::new(global).record(&user, detail, |u| u.username.clone());
    Ok(())
}
