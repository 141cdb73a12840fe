// ── Checkout ──
//
// Create the sale, fetch its receipt, refresh the session takings, clear
// the cart. Steps run in order; the first failure stops the sequence and
// leaves the cart as it was. Nothing is rolled back: a sale created before
// a failed receipt fetch stays recorded on the server.

use chrono::Utc;
use tillpoint_api::ApiClient;
use tillpoint_api::rest::models::{Receipt, ReportType, Sale, SessionReport};
use tracing::{info, warn};

use crate::cart::Cart;
use crate::error::CoreError;

/// Everything produced by a completed checkout.
#[derive(Debug, Clone)]
pub struct CompletedSale {
    pub sale: Sale,
    pub receipt: Receipt,
    /// Session takings after the sale; `None` when the report could not
    /// be fetched.
    pub session: Option<SessionReport>,
}

pub struct Checkout {
    api: ApiClient,
}

impl Checkout {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub async fn complete(&self, cart: &mut Cart) -> Result<CompletedSale, CoreError> {
        if cart.is_empty() {
            return Err(CoreError::ValidationFailed {
                message: "Cart is empty".into(),
            });
        }

        let request = cart.to_sale_request(Utc::now());
        let sale = self
            .api
            .create_sale(&request)
            .await
            .map_err(|e| step_failed("create the sale", &e))?;

        let receipt = self
            .api
            .receipt(sale.id)
            .await
            .map_err(|e| step_failed("fetch the receipt", &e))?;
        if receipt.receipt_number.is_empty() {
            return Err(CoreError::Checkout {
                step: "fetch the receipt",
                message: "receipt has no number".into(),
            });
        }

        // The till header summary is informational; a failure here does not
        // undo a completed sale.
        let session = match self.api.user_session_report(ReportType::Sales).await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "failed to fetch session summary");
                None
            }
        };

        cart.clear();
        info!(
            sale_id = %sale.id,
            receipt = %receipt.receipt_number,
            total = sale.total_amount,
            "sale completed"
        );
        Ok(CompletedSale {
            sale,
            receipt,
            session,
        })
    }
}

fn step_failed(step: &'static str, err: &tillpoint_api::Error) -> CoreError {
    CoreError::Checkout {
        step,
        message: err.to_string(),
    }
}
