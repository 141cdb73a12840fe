// REST response and request types
//
// Models for the store backend's `/api/v1` JSON surface. Monetary fields are
// serialized by the backend from decimals, so they may arrive as numbers or
// as numeric strings; both decode to `f64`. Unmodelled fields are kept in
// `extra` so nothing the server sends is lost on a round trip to disk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ── User ─────────────────────────────────────────────────────────────

/// The authenticated user, as returned by `GET /user/me`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub username: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// admin, manager, supervisor or cashier.
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub is_enabled: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserProfile {
    /// "First Last" when both are known, otherwise the username.
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{first} {last}"),
            (Some(first), None) => first.clone(),
            _ => self.username.clone(),
        }
    }
}

/// Body of `POST /user/login`. Newer backends embed the user.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub user: Option<UserProfile>,
}

// ── Sales ────────────────────────────────────────────────────────────

/// One cart line sent to `POST /sales/create`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaleItemRequest {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: f64,
    pub total_price: f64,
}

/// Body of `POST /sales/create`. The server prices items itself; totals
/// are informational.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaleRequest {
    pub items: Vec<SaleItemRequest>,
    pub total: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRef {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleItem {
    pub id: Uuid,
    #[serde(default)]
    pub sale_id: Option<Uuid>,
    pub product: ProductRef,
    pub quantity: u32,
    #[serde(deserialize_with = "amount")]
    pub unit_price: f64,
    #[serde(deserialize_with = "amount")]
    pub total_price: f64,
}

/// A recorded sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sale {
    pub id: Uuid,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(deserialize_with = "amount")]
    pub total_amount: f64,
    pub timestamp: DateTime<Utc>,
    pub receipt_number: String,
    #[serde(default)]
    pub items: Vec<SaleItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub product: String,
    pub quantity: u32,
    #[serde(deserialize_with = "amount")]
    pub unit_price: f64,
    #[serde(deserialize_with = "amount")]
    pub total: f64,
}

/// Printable receipt for one sale, from `GET /sales/receipt/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub receipt_number: String,
    #[serde(default)]
    pub date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub session_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cashier: Option<String>,
    #[serde(default)]
    pub items: Vec<ReceiptLine>,
    #[serde(deserialize_with = "amount")]
    pub total_amount: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Which session report to fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    #[default]
    Sales,
    Items,
}

impl ReportType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sales => "sales",
            Self::Items => "items",
        }
    }
}

/// Session report: table rows plus a loosely-typed summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    #[serde(default)]
    pub rows: Vec<Value>,
    #[serde(default)]
    pub summary: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SessionReport {
    /// Takings for the session; 0 when the summary omits them.
    pub fn total_amount(&self) -> f64 {
        self.summary
            .get("total_amount")
            .and_then(value_as_amount)
            .unwrap_or(0.0)
    }

    /// Number of sales in the session; 0 when the summary omits it.
    pub fn total_sales(&self) -> u64 {
        self.summary
            .get("total_sales")
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }
}

// ── Health ───────────────────────────────────────────────────────────

/// Body of `GET /health`. Any 2xx counts as healthy; the fields are
/// informational.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ── Helpers ──────────────────────────────────────────────────────────

fn value_as_amount(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn amount<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    value_as_amount(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("expected an amount, got {value}")))
}
