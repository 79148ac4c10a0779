//! Core types for the ledger
//!
//! Accounts and transfers mirror the fixed-layout records of the external
//! accounting engine:
//! - 128-bit identifiers and amounts (integer minor units, never floats)
//! - `ledger` partitions records by currency
//! - `user_data_*` fields carry our own business metadata

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;

/// Composite account identifier (currency in the high 64 bits, owner in the low 64)
pub type AccountId = u128;

/// Transfer identifier
pub type TransferId = u128;

/// Account code used for every account this system creates
pub const ACCOUNT_CODE: u16 = 1;

macro_rules! flag_set {
    ($(#[$meta:meta])* $name:ident { $($(#[$fmeta:meta])* $flag:ident = $bit:expr,)* }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(u16);

        impl $name {
            /// No flags set
            pub const NONE: Self = Self(0);
            $($(#[$fmeta])* pub const $flag: Self = Self($bit);)*

            /// Raw bit representation
            pub const fn bits(self) -> u16 {
                self.0
            }

            /// Build from raw bits, keeping unknown bits
            pub const fn from_bits(bits: u16) -> Self {
                Self(bits)
            }

            /// Whether every bit of `other` is set
            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }
    };
}

flag_set! {
    /// Account flags
    AccountFlags {
        /// Chain with the next event in the batch
        LINKED = 1 << 0,
        /// Debits may never exceed posted credits (no overdraft)
        DEBITS_MUST_NOT_EXCEED_CREDITS = 1 << 1,
        /// Credits may never exceed posted debits
        CREDITS_MUST_NOT_EXCEED_DEBITS = 1 << 2,
        /// Keep a balance snapshot after every transfer
        HISTORY = 1 << 3,
        /// Account is closed for new movements
        CLOSED = 1 << 5,
    }
}

flag_set! {
    /// Transfer flags
    TransferFlags {
        /// Chain with the next event in the batch
        LINKED = 1 << 0,
    }
}

flag_set! {
    /// Flags for [`AccountFilter`]
    AccountFilterFlags {
        /// Include transfers where the account is debited
        DEBITS = 1 << 0,
        /// Include transfers where the account is credited
        CREDITS = 1 << 1,
        /// Newest first
        REVERSED = 1 << 2,
    }
}

flag_set! {
    /// Flags for [`QueryFilter`]
    QueryFilterFlags {
        /// Newest first
        REVERSED = 1 << 0,
    }
}

/// Ledger account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Composite identifier
    pub id: AccountId,
    /// Pending debits (unused by this system)
    pub debits_pending: u128,
    /// Posted debits
    pub debits_posted: u128,
    /// Pending credits (unused by this system)
    pub credits_pending: u128,
    /// Posted credits
    pub credits_posted: u128,
    /// Free-form 128-bit metadata
    pub user_data_128: u128,
    /// Owner identifier
    pub user_data_64: u64,
    /// Creation date marker (seconds since epoch)
    pub user_data_32: u32,
    /// Currency identifier
    pub ledger: u32,
    /// Account code
    pub code: u16,
    /// Flags
    pub flags: AccountFlags,
    /// Ledger-assigned timestamp in nanoseconds, zero before creation
    pub timestamp: u64,
}

impl Account {
    /// Owner identifier stored on the account
    pub fn owner_id(&self) -> u64 {
        self.user_data_64
    }

    /// Whether the account is closed
    pub fn is_closed(&self) -> bool {
        self.flags.contains(AccountFlags::CLOSED)
    }

    /// Whether debits are capped by posted credits
    pub fn forbids_overdraft(&self) -> bool {
        self.flags.contains(AccountFlags::DEBITS_MUST_NOT_EXCEED_CREDITS)
    }

    /// Posted credits minus posted debits, saturating at zero
    pub fn available_balance(&self) -> u128 {
        self.credits_posted.saturating_sub(self.debits_posted)
    }
}

/// Transfer code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferCode {
    /// Regular movement
    Normal,
    /// Compensating movement for a previous transfer
    Reversal,
}

impl TransferCode {
    /// Wire value
    pub const fn as_u16(self) -> u16 {
        match self {
            TransferCode::Normal => 1,
            TransferCode::Reversal => 2,
        }
    }

    /// Parse the wire value
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            1 => Some(TransferCode::Normal),
            2 => Some(TransferCode::Reversal),
            _ => None,
        }
    }
}

/// Ledger transfer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    /// Transfer identifier
    pub id: TransferId,
    /// Account to debit
    pub debit_account_id: AccountId,
    /// Account to credit
    pub credit_account_id: AccountId,
    /// Amount in minor units
    pub amount: u128,
    /// Pending transfer reference (unused by this system)
    pub pending_id: u128,
    /// Original transfer id on reversals
    pub user_data_128: u128,
    /// Category
    pub user_data_64: u64,
    /// Creation date marker (seconds since epoch)
    pub user_data_32: u32,
    /// Pending timeout (unused by this system)
    pub timeout: u32,
    /// Currency identifier
    pub ledger: u32,
    /// Transfer code, see [`TransferCode`]
    pub code: u16,
    /// Flags
    pub flags: TransferFlags,
    /// Ledger-assigned timestamp in nanoseconds, zero before creation
    pub timestamp: u64,
}

impl Transfer {
    /// Whether this transfer compensates an earlier one
    pub fn is_reversal(&self) -> bool {
        self.code == TransferCode::Reversal.as_u16()
    }

    /// Category stored on the transfer
    pub fn category(&self) -> u64 {
        self.user_data_64
    }
}

/// Balance snapshot of an account with history enabled
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    /// Pending debits
    pub debits_pending: u128,
    /// Posted debits
    pub debits_posted: u128,
    /// Pending credits
    pub credits_pending: u128,
    /// Posted credits
    pub credits_posted: u128,
    /// Timestamp of the transfer that produced this snapshot
    pub timestamp: u64,
}

/// Filter for per-account transfer and balance queries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountFilter {
    /// Account to inspect
    pub account_id: AccountId,
    /// Inclusive lower bound, zero for none
    pub timestamp_min: u64,
    /// Inclusive upper bound, zero for none
    pub timestamp_max: u64,
    /// Maximum number of results
    pub limit: u32,
    /// Direction and side selection
    pub flags: AccountFilterFlags,
}

/// Filter for account queries by metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFilter {
    /// Match on `user_data_128`, zero for any
    pub user_data_128: u128,
    /// Match on `user_data_64`, zero for any
    pub user_data_64: u64,
    /// Match on `user_data_32`, zero for any
    pub user_data_32: u32,
    /// Match on ledger, zero for any
    pub ledger: u32,
    /// Match on code, zero for any
    pub code: u16,
    /// Inclusive lower bound, zero for none
    pub timestamp_min: u64,
    /// Inclusive upper bound, zero for none
    pub timestamp_max: u64,
    /// Maximum number of results
    pub limit: u32,
    /// Direction
    pub flags: QueryFilterFlags,
}

macro_rules! result_codes {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident = $code:literal => $text:literal,)* }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* $variant,)*
            /// Code not known to this client
            Unknown(u32),
        }

        impl $name {
            /// Wire value
            pub fn code(self) -> u32 {
                match self {
                    $($name::$variant => $code,)*
                    $name::Unknown(code) => code,
                }
            }

            /// Parse the wire value
            pub fn from_code(code: u32) -> Self {
                match code {
                    $($code => $name::$variant,)*
                    other => $name::Unknown(other),
                }
            }

            /// Stable snake_case name
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text,)*
                    $name::Unknown(_) => "unknown",
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $name::Unknown(code) => write!(f, "unknown ({})", code),
                    other => f.write_str(other.as_str()),
                }
            }
        }
    };
}

result_codes! {
    /// Per-event outcome of `create_accounts`
    CreateAccountResult {
        /// Created
        Ok = 0 => "ok",
        /// A linked event in the chain failed
        LinkedEventFailed = 1 => "linked_event_failed",
        /// Id was zero
        IdMustNotBeZero = 6 => "id_must_not_be_zero",
        /// Id was u128::MAX
        IdMustNotBeIntMax = 7 => "id_must_not_be_int_max",
        /// Both balance constraints were requested
        FlagsAreMutuallyExclusive = 8 => "flags_are_mutually_exclusive",
        /// Ledger was zero
        LedgerMustNotBeZero = 13 => "ledger_must_not_be_zero",
        /// Code was zero
        CodeMustNotBeZero = 14 => "code_must_not_be_zero",
        /// Same id with other flags
        ExistsWithDifferentFlags = 15 => "exists_with_different_flags",
        /// Same id with other user_data_128
        ExistsWithDifferentUserData128 = 16 => "exists_with_different_user_data_128",
        /// Same id with other user_data_64
        ExistsWithDifferentUserData64 = 17 => "exists_with_different_user_data_64",
        /// Same id with other user_data_32
        ExistsWithDifferentUserData32 = 18 => "exists_with_different_user_data_32",
        /// Same id on another ledger
        ExistsWithDifferentLedger = 19 => "exists_with_different_ledger",
        /// Same id with another code
        ExistsWithDifferentCode = 20 => "exists_with_different_code",
        /// Identical account already present
        Exists = 21 => "exists",
    }
}

result_codes! {
    /// Per-event outcome of `create_transfers`
    CreateTransferResult {
        /// Applied
        Ok = 0 => "ok",
        /// A linked event in the chain failed
        LinkedEventFailed = 1 => "linked_event_failed",
        /// Id was zero
        IdMustNotBeZero = 5 => "id_must_not_be_zero",
        /// Id was u128::MAX
        IdMustNotBeIntMax = 6 => "id_must_not_be_int_max",
        /// Debit account id was zero
        DebitAccountIdMustNotBeZero = 8 => "debit_account_id_must_not_be_zero",
        /// Credit account id was zero
        CreditAccountIdMustNotBeZero = 10 => "credit_account_id_must_not_be_zero",
        /// Debit and credit account were the same
        AccountsMustBeDifferent = 12 => "accounts_must_be_different",
        /// Ledger was zero
        LedgerMustNotBeZero = 19 => "ledger_must_not_be_zero",
        /// Code was zero
        CodeMustNotBeZero = 20 => "code_must_not_be_zero",
        /// Debit account does not exist
        DebitAccountNotFound = 21 => "debit_account_not_found",
        /// Credit account does not exist
        CreditAccountNotFound = 22 => "credit_account_not_found",
        /// Accounts live on different ledgers
        AccountsMustHaveTheSameLedger = 23 => "accounts_must_have_the_same_ledger",
        /// Transfer ledger differs from the accounts' ledger
        TransferMustHaveTheSameLedgerAsAccounts = 24 => "transfer_must_have_the_same_ledger_as_accounts",
        /// Same id with other flags
        ExistsWithDifferentFlags = 36 => "exists_with_different_flags",
        /// Same id with another debit account
        ExistsWithDifferentDebitAccountId = 37 => "exists_with_different_debit_account_id",
        /// Same id with another credit account
        ExistsWithDifferentCreditAccountId = 38 => "exists_with_different_credit_account_id",
        /// Same id with another amount
        ExistsWithDifferentAmount = 39 => "exists_with_different_amount",
        /// Same id with other user_data_128
        ExistsWithDifferentUserData128 = 41 => "exists_with_different_user_data_128",
        /// Same id with other user_data_64
        ExistsWithDifferentUserData64 = 42 => "exists_with_different_user_data_64",
        /// Same id with other user_data_32
        ExistsWithDifferentUserData32 = 43 => "exists_with_different_user_data_32",
        /// Same id with another code
        ExistsWithDifferentCode = 45 => "exists_with_different_code",
        /// Identical transfer already applied
        Exists = 46 => "exists",
        /// Debits would exceed posted credits
        ExceedsCredits = 54 => "exceeds_credits",
        /// Credits would exceed posted debits
        ExceedsDebits = 55 => "exceeds_debits",
        /// Debit account is closed
        DebitAccountAlreadyClosed = 64 => "debit_account_already_closed",
        /// Credit account is closed
        CreditAccountAlreadyClosed = 65 => "credit_account_already_closed",
    }
}

impl CreateAccountResult {
    /// An identical account was created earlier
    pub fn is_exists(self) -> bool {
        self == CreateAccountResult::Exists
    }
}

impl CreateTransferResult {
    /// The transfer was applied by an earlier submission with identical fields
    pub fn is_exists(self) -> bool {
        self == CreateTransferResult::Exists
    }
}
