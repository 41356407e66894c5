//! Customers, products, orders and order lines (CSV-sourced)

use super::Record;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Customer {
    #[serde(rename = "CustomerID")]
    pub customer_id: i64,
    #[serde(rename = "FirstName")]
    pub first_name: Option<String>,
    #[serde(rename = "LastName")]
    pub last_name: Option<String>,
    #[serde(rename = "Email")]
    pub email: Option<String>,
    #[serde(rename = "Phone")]
    pub phone: Option<String>,
    #[serde(rename = "City")]
    pub city: Option<String>,
    #[serde(rename = "Country")]
    pub country: Option<String>,
}

impl Record for Customer {
    const TABLE: &'static str = "Customers";
    const PRIMARY_KEY: &'static str = "CustomerID";
    const FIELDS: &'static [&'static str] = &[
        "CustomerID",
        "FirstName",
        "LastName",
        "Email",
        "Phone",
        "City",
        "Country",
    ];

    type Key = i64;

    fn key(&self) -> i64 {
        self.customer_id
    }

    /// A customer needs at least one non-blank name part.
    fn is_valid(&self) -> bool {
        let present = |s: &Option<String>| s.as_deref().is_some_and(|s| !s.trim().is_empty());
        present(&self.first_name) || present(&self.last_name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Product {
    #[serde(rename = "ProductID")]
    pub product_id: i64,
    #[serde(rename = "ProductName")]
    pub product_name: Option<String>,
    #[serde(rename = "Category")]
    pub category: Option<String>,
    #[serde(rename = "Price", deserialize_with = "super::finite::deserialize")]
    pub price: f64,
    #[serde(rename = "Stock")]
    pub stock: i64,
}

impl Record for Product {
    const TABLE: &'static str = "Products";
    const PRIMARY_KEY: &'static str = "ProductID";
    const FIELDS: &'static [&'static str] =
        &["ProductID", "ProductName", "Category", "Price", "Stock"];

    type Key = i64;

    fn key(&self) -> i64 {
        self.product_id
    }

    fn is_valid(&self) -> bool {
        self.price.is_finite() && self.price >= 0.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Order {
    #[serde(rename = "OrderID")]
    pub order_id: i64,
    #[serde(rename = "CustomerID")]
    pub customer_id: i64,
    #[serde(rename = "OrderDate", with = "super::datetime")]
    pub order_date: NaiveDateTime,
    #[serde(rename = "Status")]
    pub status: Option<String>,
}

impl Record for Order {
    const TABLE: &'static str = "Orders";
    const PRIMARY_KEY: &'static str = "OrderID";
    const FIELDS: &'static [&'static str] = &["OrderID", "CustomerID", "OrderDate", "Status"];

    type Key = i64;

    fn key(&self) -> i64 {
        self.order_id
    }
}

/// An order line. Lines have no identity worth de-duplicating on, but the
/// destination still numbers them, so they carry a key for identity inserts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderDetail {
    #[serde(rename = "OrderDetailID")]
    pub order_detail_id: i64,
    #[serde(rename = "OrderID")]
    pub order_id: i64,
    #[serde(rename = "ProductID")]
    pub product_id: i64,
    #[serde(rename = "Quantity")]
    pub quantity: i64,
    #[serde(rename = "TotalPrice", deserialize_with = "super::finite::deserialize")]
    pub total_price: f64,
}

impl Record for OrderDetail {
    const TABLE: &'static str = "OrderDetails";
    const PRIMARY_KEY: &'static str = "OrderDetailID";
    const FIELDS: &'static [&'static str] = &[
        "OrderDetailID",
        "OrderID",
        "ProductID",
        "Quantity",
        "TotalPrice",
    ];

    type Key = i64;

    fn key(&self) -> i64 {
        self.order_detail_id
    }
}
