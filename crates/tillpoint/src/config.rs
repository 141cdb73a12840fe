//! CLI-aware configuration: applies global flags on top of the shared
//! `tillpoint-config` profiles and resolves login credentials.
//!
//! Core never sees these types -- it receives a pre-built `SessionConfig`.

use std::io::IsTerminal;
use std::time::Duration;

use secrecy::SecretString;

use tillpoint_config::{self as shared, Config};
use tillpoint_core::{SessionConfig, TlsVerification};

use crate::cli::{GlobalOpts, LoginArgs};
use crate::error::CliError;

/// Session settings plus the profile they came from.
pub struct Resolved {
    pub profile_name: String,
    pub session: SessionConfig,
}

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Build a `SessionConfig` from the config file, profile, and CLI overrides.
pub fn resolve_session(global: &GlobalOpts, config: &Config) -> Result<Resolved, CliError> {
    let profile_name = active_profile_name(global, config);

    let mut session = if let Some(profile) = config.profiles.get(&profile_name) {
        shared::profile_to_session_config(profile, &profile_name, &config.defaults)?
    } else if global.server.is_some() {
        // No profile -- run from flags alone, remembering the login under
        // the profile name anyway.
        let mut session = SessionConfig::new(parse_server(global)?);
        session.timeout = Duration::from_secs(config.defaults.timeout);
        session.use_discovery = config.defaults.use_discovery;
        session.heartbeat = config.defaults.heartbeat;
        session.profile_path = Some(shared::session_path(&profile_name));
        session
    } else if global.profile.is_some() {
        let mut available: Vec<_> = config.profiles.keys().cloned().collect();
        available.sort();
        return Err(CliError::ProfileNotFound {
            name: profile_name,
            available: available.join(", "),
        });
    } else {
        return Err(CliError::NoConfig {
            path: shared::config_path().display().to_string(),
        });
    };

    if global.server.is_some() {
        session.server = parse_server(global)?;
    }
    if global.insecure {
        session.tls = TlsVerification::DangerAcceptInvalid;
    }
    if let Some(secs) = global.timeout {
        session.timeout = Duration::from_secs(secs);
    }
    if global.no_discovery {
        session.use_discovery = false;
    }

    Ok(Resolved {
        profile_name,
        session,
    })
}

fn parse_server(global: &GlobalOpts) -> Result<url::Url, CliError> {
    let raw = global.server.as_deref().unwrap_or_default();
    raw.parse().map_err(|_| CliError::Validation {
        field: "server".into(),
        reason: format!("invalid URL: {raw}"),
    })
}

// ── Credentials ─────────────────────────────────────────────────────

/// Username and password: flag > profile chain > interactive prompt.
pub fn resolve_credentials(
    args: &LoginArgs,
    config: &Config,
    profile_name: &str,
) -> Result<(String, SecretString), CliError> {
    let profile = config.profiles.get(profile_name);

    let username = match (&args.username, profile) {
        (Some(username), _) => username.clone(),
        (None, Some(profile)) => shared::resolve_username(profile, profile_name)?,
        (None, None) => {
            return Err(CliError::NoCredentials {
                profile: profile_name.into(),
            });
        }
    };

    if let Some(ref password) = args.password {
        return Ok((username, SecretString::from(password.clone())));
    }
    if let Some(profile) = profile {
        if let Ok(password) = shared::resolve_password(profile, profile_name) {
            return Ok((username, password));
        }
    }
    if std::io::stdin().is_terminal() {
        let password = rpassword::prompt_password(format!("Password for {username}: "))?;
        return Ok((username, SecretString::from(password)));
    }

    Err(CliError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Whether any credential source is configured without prompting.
pub fn has_credentials(args: &LoginArgs, config: &Config, profile_name: &str) -> bool {
    let profile = config.profiles.get(profile_name);
    let has_user = args.username.is_some()
        || profile.is_some_and(|p| shared::resolve_username(p, profile_name).is_ok());
    let has_password = args.password.is_some()
        || profile.is_some_and(|p| shared::resolve_password(p, profile_name).is_ok());
    has_user && has_password
}
