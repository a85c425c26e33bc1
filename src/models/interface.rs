// Interface row: identity, flags, lifetime totals

use serde::{Deserialize, Serialize};

/// One row of the `interface` table. Timestamps are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceRecord {
    pub id: i64,
    pub name: String,
    pub alias: Option<String>,
    pub active: bool,
    pub created: i64,
    pub updated: i64,
    pub rx_total: i64,
    pub tx_total: i64,
}
