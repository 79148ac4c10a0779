//! Identifier codec
//!
//! Account ids are composed from a currency and an owner:
//!
//! ```text
//! bits 127..64  currency id
//! bits  63..0   owner id (0 = company account of the currency)
//! ```
//!
//! A reversal id is the original transfer id with bit 64 set. On the ledger's
//! little-endian 16-byte layout this is the lowest bit of byte 8. Non-reversal
//! transfer ids must keep that bit clear so the two spaces never collide.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::error::{Error, Result};
use crate::types::{AccountId, TransferId};

/// Owner id reserved for a currency's company account
pub const COMPANY_OWNER_ID: u64 = 0;

/// Bit that marks a transfer id as a reversal
pub const REVERSAL_MARKER: u128 = 1 << 64;

const DATE_TIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Compose an account id from currency and owner
pub fn account_id(currency_id: u32, owner_id: u64) -> AccountId {
    ((currency_id as u128) << 64) | owner_id as u128
}

/// Company account id of a currency
pub fn company_account_id(currency_id: u32) -> AccountId {
    account_id(currency_id, COMPANY_OWNER_ID)
}

/// Split an account id back into currency and owner.
///
/// Returns `None` when the high half does not fit a currency id.
pub fn split_account_id(id: AccountId) -> Option<(u32, u64)> {
    let currency = u32::try_from(id >> 64).ok()?;
    Some((currency, id as u64))
}

/// Id of the transfer that reverses `original`
pub fn reversal_id(original: TransferId) -> TransferId {
    original | REVERSAL_MARKER
}

/// Whether the reversal marker bit is set
pub fn has_reversal_marker(id: TransferId) -> bool {
    id & REVERSAL_MARKER != 0
}

/// Parse a decimal 128-bit identifier.
///
/// Zero and `u128::MAX` are reserved by the ledger and rejected.
pub fn parse_id(raw: &str) -> Result<u128> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidId("identifier is empty".to_string()));
    }
    let id: u128 = trimmed
        .parse()
        .map_err(|_| Error::InvalidId(format!("'{}' is not a decimal 128-bit integer", trimmed)))?;
    match id {
        0 => Err(Error::InvalidId("identifier must not be zero".to_string())),
        u128::MAX => Err(Error::InvalidId("identifier must not be the maximum value".to_string())),
        id => Ok(id),
    }
}

/// Decimal representation used on every external surface
pub fn format_id(id: u128) -> String {
    id.to_string()
}

/// Ledger wire layout
pub fn to_le_bytes(value: u128) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

/// Read a ledger wire value; an empty buffer decodes as zero
pub fn from_le_bytes(bytes: &[u8]) -> Result<u128> {
    if bytes.is_empty() {
        return Ok(0);
    }
    let array: [u8; 16] = bytes
        .try_into()
        .map_err(|_| Error::Decode(format!("expected 16 bytes, got {}", bytes.len())))?;
    Ok(u128::from_le_bytes(array))
}

/// Parse a date into the 32-bit seconds marker stored in `user_data_32`.
///
/// Accepts `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS` (all UTC)
/// and RFC 3339.
pub fn parse_date_marker(raw: &str) -> Result<u32> {
    let raw = raw.trim();
    let parsed = DATE_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
        .or_else(|| {
            NaiveDate::parse_from_str(raw, DATE_FORMAT)
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|naive| Utc.from_utc_datetime(&naive))
        })
        .ok_or_else(|| Error::InvalidDate(format!("unrecognised date '{}'", raw)))?;

    u32::try_from(parsed.timestamp())
        .map_err(|_| Error::InvalidDate(format!("'{}' does not fit the 32-bit marker", raw)))
}

/// Marker for the current instant
pub fn date_marker_now() -> u32 {
    u32::try_from(Utc::now().timestamp()).unwrap_or(u32::MAX)
}

/// Render a 32-bit date marker
pub fn format_date_marker(marker: u32) -> String {
    Utc.timestamp_opt(marker as i64, 0)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

/// Render a ledger timestamp (nanoseconds since epoch)
pub fn format_ledger_timestamp(nanos: u64) -> String {
    let secs = (nanos / 1_000_000_000) as i64;
    let sub = (nanos % 1_000_000_000) as u32;
    Utc.timestamp_opt(secs, sub)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}
