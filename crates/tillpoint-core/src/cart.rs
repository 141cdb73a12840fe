// ── Till cart ──
//
// Line items for the sale in progress. Adding a product already in the cart
// bumps its quantity; line totals are always unit price times quantity.

use chrono::{DateTime, Utc};
use tillpoint_api::rest::models::{SaleItemRequest, SaleRequest};
use uuid::Uuid;

use crate::error::CoreError;

#[derive(Debug, Clone, PartialEq)]
pub struct CartItem {
    pub product_id: Uuid,
    pub name: String,
    pub unit_price: f64,
    pub quantity: u32,
}

impl CartItem {
    pub fn total(&self) -> f64 {
        self.unit_price * f64::from(self.quantity)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Cart {
    items: Vec<CartItem>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one unit of a product. Returns the line's new quantity.
    pub fn add(&mut self, product_id: Uuid, name: impl Into<String>, unit_price: f64) -> u32 {
        if let Some(item) = self.items.iter_mut().find(|i| i.product_id == product_id) {
            item.quantity = item.quantity.saturating_add(1);
            return item.quantity;
        }
        self.items.push(CartItem {
            product_id,
            name: name.into(),
            unit_price,
            quantity: 1,
        });
        1
    }

    /// Set a line's quantity. Zero is rejected; use [`remove`](Self::remove).
    pub fn update_quantity(&mut self, product_id: Uuid, quantity: u32) -> Result<(), CoreError> {
        if quantity == 0 {
            return Err(CoreError::ValidationFailed {
                message: "quantity must be at least 1".into(),
            });
        }
        let item = self
            .items
            .iter_mut()
            .find(|i| i.product_id == product_id)
            .ok_or_else(|| CoreError::NotFound {
                entity_type: "Cart item".into(),
                identifier: product_id.to_string(),
            })?;
        item.quantity = quantity;
        Ok(())
    }

    pub fn remove(&mut self, product_id: Uuid) -> bool {
        let before = self.items.len();
        self.items.retain(|i| i.product_id != product_id);
        self.items.len() != before
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.items.iter().map(CartItem::total).sum()
    }

    pub fn to_sale_request(&self, timestamp: DateTime<Utc>) -> SaleRequest {
        SaleRequest {
            items: self
                .items
                .iter()
                .map(|item| SaleItemRequest {
                    product_id: item.product_id,
                    product_name: item.name.clone(),
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    total_price: item.total(),
                })
                .collect(),
            total: self.total(),
            timestamp,
        }
    }
}
