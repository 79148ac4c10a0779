//! Core types for the settlement pipeline

use chrono::{DateTime, Utc};
use ledger_core::{Transfer, TransferId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Parameter holding the largest accepted amount
pub const PARAM_MAX_TRANSFER_AMOUNT: &str = "MAX_TRANSFER_AMOUNT";

/// Parameter holding the smallest accepted amount
pub const PARAM_MIN_TRANSFER_AMOUNT: &str = "MIN_TRANSFER_AMOUNT";

/// Rejection and settlement reasons reported to the subscriber
pub mod reasons {
    /// Ledger answered `exists`: an earlier delivery already settled it
    pub const ALREADY_PROCESSED: &str = "already processed";
    /// Currency is not in state Active
    pub const CURRENCY_NOT_ACTIVE: &str = "currency is not active";
    /// Currency unknown to the metadata store
    pub const UNKNOWN_CURRENCY: &str = "unknown currency";
    /// Currency without a provisioned company account
    pub const NO_COMPANY_ACCOUNT: &str = "currency has no company account";
    /// Debit or credit account missing on the ledger
    pub const ACCOUNT_NOT_FOUND: &str = "account not found";
    /// Debit account closed
    pub const DEBIT_ACCOUNT_CLOSED: &str = "debit account is closed";
    /// No-overdraft simulation failed
    pub const INSUFFICIENT_FUNDS: &str = "insufficient funds";
    /// Reversal target not found on the ledger
    pub const ORIGINAL_NOT_FOUND: &str = "original transfer not found";
    /// Account has no transfer history
    pub const NOTHING_TO_REVERT: &str = "account has no transfers to revert";
    /// Latest transfer is itself a reversal
    pub const CANNOT_REVERT_REVERSAL: &str = "cannot revert a reversal";
    /// Reversal target is not the latest transfer
    pub const ONLY_MOST_RECENT: &str = "only the most recent transfer on an account may be reverted";
}

/// Direction of a requested movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MovementKind {
    /// Company account pays the user
    CreditIn,
    /// User pays the company account
    DebitOut,
    /// Undo the most recent transfer of an account
    Reversal,
}

impl MovementKind {
    /// Wire name
    pub fn as_str(self) -> &'static str {
        match self {
            MovementKind::CreditIn => "credit-in",
            MovementKind::DebitOut => "debit-out",
            MovementKind::Reversal => "reversal",
        }
    }

    /// Parse the wire name
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "credit-in" => Some(MovementKind::CreditIn),
            "debit-out" => Some(MovementKind::DebitOut),
            "reversal" => Some(MovementKind::Reversal),
            _ => None,
        }
    }
}

impl fmt::Display for MovementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Integer that producers may send either as a JSON number or a decimal string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Numeric {
    /// JSON number
    Number(u64),
    /// Decimal string
    Text(String),
}

impl Numeric {
    /// Textual form for reporting
    pub fn to_text(&self) -> String {
        match self {
            Numeric::Number(n) => n.to_string(),
            Numeric::Text(s) => s.trim().to_string(),
        }
    }
}

impl From<u128> for Numeric {
    fn from(value: u128) -> Self {
        match u64::try_from(value) {
            Ok(n) => Numeric::Number(n),
            Err(_) => Numeric::Text(value.to_string()),
        }
    }
}

/// Movement request as published on the queue.
///
/// Every field is optional so a malformed request can still be reported with
/// whatever could be read from it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementRequest {
    /// Transfer id; for reversals, the id of the transfer to undo
    #[serde(default)]
    pub transfer_id: Option<Numeric>,
    /// Owner of the user account
    #[serde(default)]
    pub owner_id: Option<u64>,
    /// Amount in minor units (ignored for reversals)
    #[serde(default)]
    pub amount: Option<u64>,
    /// Currency id
    #[serde(default)]
    pub currency: Option<u32>,
    /// `credit-in`, `debit-out` or `reversal`
    #[serde(default)]
    pub kind: Option<String>,
    /// Free business category
    #[serde(default)]
    pub category: Option<u64>,
    /// Business date, see [`ledger_core::ids::parse_date_marker`]
    #[serde(default)]
    pub date: Option<String>,
}

/// Identifying fields of a movement, as far as they could be read
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementSummary {
    /// Transfer id as received
    pub id: Option<String>,
    /// Owner id
    pub owner_id: Option<u64>,
    /// Amount in minor units
    pub amount: Option<u64>,
    /// Currency id
    pub currency: Option<u32>,
    /// Kind as received
    pub kind: Option<String>,
    /// Category
    pub category: Option<u64>,
}

impl MovementSummary {
    /// Summary of a parsed request, falling back to the queue key for the id
    pub fn from_request(request: &MovementRequest, key: Option<&str>) -> Self {
        Self {
            id: request
                .transfer_id
                .as_ref()
                .map(Numeric::to_text)
                .or_else(|| key.map(str::to_string)),
            owner_id: request.owner_id,
            amount: request.amount,
            currency: request.currency,
            kind: request.kind.clone(),
            category: request.category,
        }
    }
}

/// Decoded movement ready for validation and submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Position of the source message in its batch
    pub position: usize,
    /// Fields for reporting
    pub summary: MovementSummary,
    /// Kind
    pub kind: MovementKind,
    /// Owner of the user account
    pub owner_id: u64,
    /// Currency id
    pub currency_id: u32,
    /// Transfer to submit
    pub transfer: Transfer,
    /// Transfer being undone, for reversals
    pub reverses: Option<TransferId>,
}

impl Candidate {
    /// Whether this candidate undoes an earlier transfer
    pub fn is_reversal(&self) -> bool {
        self.kind == MovementKind::Reversal
    }
}

/// Permanent per-message rejection from decoding or pre-validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Position of the source message in its batch
    pub position: usize,
    /// Fields for reporting
    pub summary: MovementSummary,
    /// Human readable reason
    pub reason: String,
}

impl Rejection {
    /// Reject `candidate` with `reason`
    pub fn of(candidate: &Candidate, reason: impl Into<String>) -> Self {
        Self {
            position: candidate.position,
            summary: candidate.summary.clone(),
            reason: reason.into(),
        }
    }
}

/// Final status of a movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    /// Applied by the ledger, now or by an earlier delivery
    Settled,
    /// Will never be applied
    Rejected,
}

impl OutcomeStatus {
    /// Metric label
    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeStatus::Settled => "settled",
            OutcomeStatus::Rejected => "rejected",
        }
    }
}

/// Outcome of one queue message as reported to the subscriber
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    /// Transfer id
    pub id: Option<String>,
    /// Owner id
    pub owner_id: Option<u64>,
    /// Amount in minor units
    pub amount: Option<u64>,
    /// Currency id
    pub currency: Option<u32>,
    /// Kind
    pub kind: Option<String>,
    /// Category
    pub category: Option<u64>,
    /// Status
    pub status: OutcomeStatus,
    /// Reason for rejections and idempotent replays
    pub reason: Option<String>,
    /// Processing time of the batch
    pub processed_at: DateTime<Utc>,
}

impl NotificationRecord {
    /// Build a record from a summary
    pub fn new(
        summary: MovementSummary,
        status: OutcomeStatus,
        reason: Option<String>,
        processed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: summary.id,
            owner_id: summary.owner_id,
            amount: summary.amount,
            currency: summary.currency,
            kind: summary.kind,
            category: summary.category,
            status,
            reason,
            processed_at,
        }
    }
}

/// Body of the per-batch notification POST
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationBatch {
    /// Number of messages in the batch
    pub processed_count: usize,
    /// One record per message, in queue order
    pub transfers: Vec<NotificationRecord>,
}

impl NotificationBatch {
    /// Wrap records
    pub fn new(transfers: Vec<NotificationRecord>) -> Self {
        Self {
            processed_count: transfers.len(),
            transfers,
        }
    }
}

/// Currency lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CurrencyState {
    /// Row created, company account not yet confirmed
    #[serde(rename = "P")]
    Pending,
    /// Usable for movements
    #[serde(rename = "A")]
    Active,
    /// Disabled by an operator
    #[serde(rename = "I")]
    Inactive,
}

impl CurrencyState {
    /// Single-letter code stored in the metadata store
    pub fn code(self) -> &'static str {
        match self {
            CurrencyState::Pending => "P",
            CurrencyState::Active => "A",
            CurrencyState::Inactive => "I",
        }
    }

    /// Parse the stored code
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "P" => Some(CurrencyState::Pending),
            "A" => Some(CurrencyState::Active),
            "I" => Some(CurrencyState::Inactive),
            _ => None,
        }
    }
}

/// Currency row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Currency {
    /// Currency id, also the ledger id
    pub id: u32,
    /// Short code such as `USD`
    pub code: String,
    /// Display name
    pub name: String,
    /// Lifecycle state
    pub state: CurrencyState,
    /// Company account once provisioned
    #[serde(with = "opt_u128_string", default)]
    pub company_account_id: Option<u128>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Currency {
    /// Whether movements may use this currency
    pub fn is_active(&self) -> bool {
        self.state == CurrencyState::Active
    }
}

/// Input for currency creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCurrency {
    /// Currency id
    pub id: u32,
    /// Short code such as `USD`
    pub code: String,
    /// Display name
    pub name: String,
}

/// Runtime parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    /// Key
    pub name: String,
    /// Raw value
    pub value: String,
    /// Free text description
    pub description: String,
    /// Whether operators may change it
    pub modifiable: bool,
}

/// 128-bit values travel as decimal strings in JSON
pub mod u128_string {
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize
    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    /// Deserialize
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.trim().parse().map_err(serde::de::Error::custom)
    }
}

/// Optional variant of [`u128_string`]
pub mod opt_u128_string {
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize
    pub fn serialize<S: Serializer>(value: &Option<u128>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_str(&v.to_string()),
            None => serializer.serialize_none(),
        }
    }

    /// Deserialize
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u128>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|s| s.parse().map_err(serde::de::Error::custom)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_accepts_numeric_or_text_ids() {
        let request: MovementRequest = serde_json::from_str(
            r#"{"transferId":"340282366920938463463374607431768211000","ownerId":7,"amount":100,"currency":1,"kind":"credit-in"}"#,
        )
        .unwrap();
        assert_eq!(
            request.transfer_id,
            Some(Numeric::Text("340282366920938463463374607431768211000".into()))
        );

        let request: MovementRequest =
            serde_json::from_str(r#"{"transferId":55,"kind":"reversal"}"#).unwrap();
        assert_eq!(request.transfer_id, Some(Numeric::Number(55)));
        assert_eq!(request.amount, None);
    }

    #[test]
    fn test_summary_falls_back_to_key() {
        let summary = MovementSummary::from_request(&MovementRequest::default(), Some("991"));
        assert_eq!(summary.id.as_deref(), Some("991"));
    }

    #[test]
    fn test_notification_wire_shape() {
        let record = NotificationRecord::new(
            MovementSummary {
                id: Some("1".into()),
                owner_id: Some(7),
                amount: Some(250),
                currency: Some(840),
                kind: Some("debit-out".into()),
                category: None,
            },
            OutcomeStatus::Rejected,
            Some(reasons::INSUFFICIENT_FUNDS.into()),
            DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
        );
        let json = serde_json::to_value(NotificationBatch::new(vec![record])).unwrap();
        assert_eq!(json["processedCount"], 1);
        assert_eq!(json["transfers"][0]["ownerId"], 7);
        assert_eq!(json["transfers"][0]["status"], "rejected");
        assert_eq!(json["transfers"][0]["reason"], "insufficient funds");
    }

    #[test]
    fn test_currency_state_codes() {
        assert_eq!(CurrencyState::from_code("A"), Some(CurrencyState::Active));
        assert_eq!(serde_json::to_string(&CurrencyState::Pending).unwrap(), "\"P\"");
        assert_eq!(CurrencyState::from_code("X"), None);
    }
}
