//! Service discovery listing.

use std::time::Duration;

use tabled::Tabled;
use tillpoint_core::{ServiceAdvertisement, Session};

use crate::cli::{DiscoverArgs, GlobalOpts};
use crate::error::CliError;
use crate::output::Printer;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct ServiceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Address")]
    address: String,
}

impl From<&ServiceAdvertisement> for ServiceRow {
    fn from(s: &ServiceAdvertisement) -> Self {
        Self {
            id: s.id.clone(),
            name: s.name.clone().unwrap_or_default(),
            address: format!("{}:{}", s.ip, s.port),
        }
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(
    session: &Session,
    args: &DiscoverArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let Some(discovery) = session.discovery() else {
        return Err(CliError::Validation {
            field: "discovery".into(),
            reason: "service discovery is disabled for this profile".into(),
        });
    };

    let services = if args.refresh {
        discovery.force_refresh().await
    } else {
        discovery
            .start_discovery(Duration::from_millis(args.timeout_ms))
            .await
    };

    if services.is_empty() && !global.quiet {
        eprintln!("No services discovered; the live channel will use the default endpoint");
    }
    Printer::new(global).list(&services, |s| ServiceRow::from(s), |s| s.id.clone());
    Ok(())
}
