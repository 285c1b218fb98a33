use std::fmt::Display;

use alloy::primitives::{Address, B256, Bytes, U256};
use serde::{Deserialize, Serialize};

/// Identifier of the chain or network a transaction was created against
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct NetworkId(pub String);

impl NetworkId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl Display for NetworkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for NetworkId {
    fn from(chain_id: u64) -> Self {
        Self(chain_id.to_string())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    #[default]
    Unapproved,
    Signed,
    Submitted,
    Confirmed,
    Failed,
}

impl TransactionStatus {
    /// Signed or submitted, but not yet observed in a block
    pub fn is_pending(&self) -> bool {
        matches!(self, TransactionStatus::Signed | TransactionStatus::Submitted)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Confirmed | TransactionStatus::Failed)
    }
}

impl Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionStatus::Unapproved => write!(f, "unapproved"),
            TransactionStatus::Signed => write!(f, "signed"),
            TransactionStatus::Submitted => write!(f, "submitted"),
            TransactionStatus::Confirmed => write!(f, "confirmed"),
            TransactionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// ### TransactionRecord
/// One transaction tracked by this process, from signing until it is observed mined.
///
/// Upstream producers send the gas limit under either `gas` or `gasLimit`; both are
/// kept as received and [`TransactionRecord::gas_limit`] resolves them, preferring `gas`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub id: String,
    pub sender: Address,
    pub nonce: u64,

    #[serde(default)]
    pub value: U256,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<U256>,

    #[serde(default, skip_serializing_if = "Option::is_none", rename = "gasLimit")]
    pub gas_limit_field: Option<U256>,

    #[serde(default)]
    pub gas_price: U256,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_signed_transaction: Option<Bytes>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<B256>,

    #[serde(default)]
    pub retry_count: u32,

    pub network_id: NetworkId,

    #[serde(default)]
    pub status: TransactionStatus,

    /// Last failure reported for this record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Last inconclusive check reported for this record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl TransactionRecord {
    pub fn new(
        id: impl Into<String>,
        sender: Address,
        nonce: u64,
        network_id: impl Into<NetworkId>,
    ) -> Self {
        Self {
            id: id.into(),
            sender,
            nonce,
            network_id: network_id.into(),
            ..Default::default()
        }
    }

    /// Gas limit, taken from `gas` when present, otherwise `gasLimit`, otherwise zero
    pub fn gas_limit(&self) -> U256 {
        self.gas.or(self.gas_limit_field).unwrap_or_default()
    }

    /// Maximum wei this transaction can spend: `value + gas_limit * gas_price`
    pub fn total_cost(&self) -> U256 {
        self.value
            .saturating_add(self.gas_limit().saturating_mul(self.gas_price))
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn with_gas(mut self, gas_limit: U256, gas_price: U256) -> Self {
        self.gas_limit_field = Some(gas_limit);
        self.gas_price = gas_price;
        self
    }

    pub fn with_status(mut self, status: TransactionStatus) -> Self {
        self.status = status;
        self
    }

    /// Marks the record as broadcast under `hash`
    pub fn submitted(mut self, hash: B256, raw: Bytes) -> Self {
        self.hash = Some(hash);
        self.raw_signed_transaction = Some(raw);
        self.status = TransactionStatus::Submitted;
        self
    }
}

impl From<&str> for NetworkId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    #[test]
    fn gas_wins_over_gas_limit() {
        let json = serde_json::json!({
            "id": "1",
            "sender": "0x1678a085c290ebd122dc42cba69373b5953b831d",
            "nonce": 1,
            "gas": "0x5",
            "gasLimit": "0x9",
            "networkId": "1"
        });
        let record: TransactionRecord = serde_json::from_value(json).unwrap();
        assert_eq!(record.gas_limit(), U256::from(5));
    }

    #[test]
    fn gas_limit_alone_is_accepted() {
        let json = serde_json::json!({
            "id": "1",
            "sender": "0x1678a085c290ebd122dc42cba69373b5953b831d",
            "nonce": 1,
            "gasLimit": "0x9",
            "networkId": "1"
        });
        let record: TransactionRecord = serde_json::from_value(json).unwrap();
        assert_eq!(record.gas_limit(), U256::from(9));
        assert_eq!(record.status, TransactionStatus::Unapproved);
    }

    #[test]
    fn total_cost_covers_value_and_fee() {
        let record = TransactionRecord::new(
            "1",
            address!("1678a085c290ebd122dc42cba69373b5953b831d"),
            0,
            "1",
        )
        .with_value(U256::from(10))
        .with_gas(U256::from(5), U256::from(2));

        assert_eq!(record.total_cost(), U256::from(20));
    }

    #[test]
    fn total_cost_saturates() {
        let record = TransactionRecord::default()
            .with_value(U256::MAX)
            .with_gas(U256::from(2), U256::from(2));
        assert_eq!(record.total_cost(), U256::MAX);
    }
}
