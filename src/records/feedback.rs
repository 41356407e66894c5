//! Reviews (database and API sourced) and comments (API sourced)

use super::Record;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Review {
    #[serde(rename = "ReviewID")]
    pub review_id: i64,
    #[serde(rename = "OrderID")]
    pub order_id: i64,
    #[serde(rename = "CustomerID")]
    pub customer_id: i64,
    #[serde(rename = "ProductID")]
    pub product_id: i64,
    #[serde(rename = "Rating")]
    pub rating: i64,
    #[serde(rename = "Comment")]
    pub comment: Option<String>,
    #[serde(rename = "ReviewDate", with = "super::datetime")]
    pub review_date: NaiveDateTime,
}

impl Record for Review {
    const TABLE: &'static str = "Reviews";
    const PRIMARY_KEY: &'static str = "ReviewID";
    const FIELDS: &'static [&'static str] = &[
        "ReviewID",
        "OrderID",
        "CustomerID",
        "ProductID",
        "Rating",
        "Comment",
        "ReviewDate",
    ];

    type Key = i64;

    fn key(&self) -> i64 {
        self.review_id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Comment {
    #[serde(rename = "CommentID")]
    pub comment_id: i64,
    #[serde(rename = "OrderID")]
    pub order_id: i64,
    #[serde(rename = "CustomerID")]
    pub customer_id: i64,
    #[serde(rename = "Content")]
    pub content: Option<String>,
    #[serde(rename = "CreatedDate", with = "super::datetime")]
    pub created_date: NaiveDateTime,
    #[serde(rename = "Status")]
    pub status: Option<String>,
}

impl Record for Comment {
    const TABLE: &'static str = "Comments";
    const PRIMARY_KEY: &'static str = "CommentID";
    const FIELDS: &'static [&'static str] = &[
        "CommentID",
        "OrderID",
        "CustomerID",
        "Content",
        "CreatedDate",
        "Status",
    ];

    type Key = i64;

    fn key(&self) -> i64 {
        self.comment_id
    }
}
