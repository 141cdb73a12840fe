//! Config subcommand handlers.

use tillpoint_config::{self as shared, Config};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config;
use crate::error::CliError;
use crate::output::Printer;

const MASK: &str = "********";

fn keyring_err(e: &keyring::Error) -> CliError {
    CliError::Validation {
        field: "keyring".into(),
        reason: format!("failed to access keyring: {e}"),
    }
}

fn profile_not_found(name: String, cfg: &Config) -> CliError {
    let mut available: Vec<_> = cfg.profiles.keys().cloned().collect();
    available.sort();
    CliError::ProfileNotFound {
        name,
        available: if available.is_empty() {
            "(none)".into()
        } else {
            available.join(", ")
        },
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts, cfg: &Config) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            println!("{}", shared::config_path().display());
            Ok(())
        }

        // ── Show ────────────────────────────────────────────────────
        ConfigCommand::Show => {
            let mut shown = shared::load_config()?;
            for profile in shown.profiles.values_mut() {
                if profile.password.is_some() {
                    profile.password = Some(MASK.into());
                }
            }
            Printer::new(global).record(
                &shown,
                |c| format!("{c:#?}"),
                |_| shared::config_path().display().to_string(),
            );
            Ok(())
        }

        // ── Profiles ────────────────────────────────────────────────
        ConfigCommand::Profiles => {
            let default = config::active_profile_name(global, cfg);
            if cfg.profiles.is_empty() {
                eprintln!(
                    "No profiles configured. Add one to {}",
                    shared::config_path().display()
                );
                return Ok(());
            }
            let mut names: Vec<_> = cfg.profiles.keys().collect();
            names.sort();
            for name in names {
                let marker = if *name == default { " *" } else { "" };
                println!("{name}{marker}");
            }
            Ok(())
        }

        // ── Use <name> ─────────────────────────────────────────────
        ConfigCommand::Use { name } => {
            if !cfg.profiles.contains_key(&name) {
                return Err(profile_not_found(name, cfg));
            }
            let mut updated = shared::load_config()?;
            updated.default_profile = Some(name.clone());
            shared::save_config(&updated)?;
            if !global.quiet {
                eprintln!("Default profile set to '{name}'");
            }
            Ok(())
        }

        // ── SetPassword ─────────────────────────────────────────────
        ConfigCommand::SetPassword => {
            let profile_name = config::active_profile_name(global, cfg);
            if !cfg.profiles.contains_key(&profile_name) {
                return Err(profile_not_found(profile_name, cfg));
            }

            let secret = rpassword::prompt_password(format!("Password for '{profile_name}': "))?;
            if secret.is_empty() {
                return Err(CliError::Validation {
                    field: "password".into(),
                    reason: "value cannot be empty".into(),
                });
            }

            let entry = keyring::Entry::new(shared::KEYRING_SERVICE, &format!("{profile_name}/password"))
                .map_err(|e| keyring_err(&e))?;
            entry.set_password(&secret).map_err(|e| keyring_err(&e))?;

            if !global.quiet {
                eprintln!("Password stored in system keyring for profile '{profile_name}'");
            }
            Ok(())
        }
    }
}
