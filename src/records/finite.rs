//! `f64` fields that only accept finite numbers
//!
//! `NaN` and infinities parse from CSV but cannot be staged as JSON, so a row
//! carrying one is rejected at mapping time.

use serde::{Deserialize, Deserializer};

pub fn deserialize<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(serde::de::Error::custom(format!(
            "expected a finite number, got {value}"
        )))
    }
}
