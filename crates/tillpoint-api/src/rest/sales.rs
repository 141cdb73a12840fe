// Sales endpoints
//
// The checkout path only: create a sale, read it back, fetch its receipt,
// and read the session takings shown on the till header.

use tracing::debug;
use uuid::Uuid;

use crate::error::Error;
use crate::rest::client::ApiClient;
use crate::rest::models::{Receipt, ReportType, Sale, SaleRequest, SessionReport};

impl ApiClient {
    /// Record a sale for the logged-in cashier's session.
    ///
    /// `POST /api/v1/sales/create`
    pub async fn create_sale(&self, sale: &SaleRequest) -> Result<Sale, Error> {
        let url = self.api_url("sales/create")?;
        debug!(items = sale.items.len(), "creating sale");
        self.post(url, sale).await
    }

    /// `GET /api/v1/sales/{id}`
    pub async fn sale(&self, id: Uuid) -> Result<Sale, Error> {
        let url = self.api_url(&format!("sales/{id}"))?;
        self.get(url, &[]).await
    }

    /// `GET /api/v1/sales/receipt/{id}`
    pub async fn receipt(&self, sale_id: Uuid) -> Result<Receipt, Error> {
        let url = self.api_url(&format!("sales/receipt/{sale_id}"))?;
        debug!(%sale_id, "fetching receipt");
        self.get(url, &[]).await
    }

    /// Report for the store's current session.
    ///
    /// `GET /api/v1/sales/report/current-session?report_type=...`
    pub async fn current_session_report(
        &self,
        report_type: ReportType,
    ) -> Result<SessionReport, Error> {
        let url = self.api_url("sales/report/current-session")?;
        self.get(url, &[("report_type", report_type.as_str())]).await
    }

    /// Report for the logged-in user's session.
    ///
    /// `GET /api/v1/sales/report/user-session/?report_type=...`
    pub async fn user_session_report(
        &self,
        report_type: ReportType,
    ) -> Result<SessionReport, Error> {
        let url = self.api_url("sales/report/user-session/")?;
        self.get(url, &[("report_type", report_type.as_str())]).await
    }
}
