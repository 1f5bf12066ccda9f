use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A structured, operator-facing outcome suitable for printing or emitting as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportNotice {
    pub ok: bool,
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl ImportNotice {
    pub fn failure(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            code,
            message: message.into(),
            address: None,
        }
    }

    pub fn imported(address: &str) -> Self {
        Self {
            ok: true,
            code: "imported",
            message: format!("imported private key for {address}"),
            address: Some(address.to_owned()),
        }
    }
}

/// Local input problems. The operator can correct the text and resubmit.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FormatError {
    #[error("private key is empty")]
    Empty,

    #[error("private key is not a valid WIF encoding")]
    InvalidEncoding,

    #[error("only compressed private keys are supported")]
    Uncompressed,
}

/// The classification service could not be reached or answered with garbage.
///
/// Unreachable hosts, timeouts and malformed bodies are deliberately not distinguished.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("address classification unavailable: {detail}")]
pub struct TransportError {
    pub detail: String,
}

impl TransportError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecryptionError {
    #[error("passphrase is empty")]
    EmptyPassphrase,

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("sealing key material failed: {0}")]
    Seal(String),

    #[error("sealed key material does not match the decoded public key")]
    Mismatch,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("address registry busy")]
    Busy,

    #[error("address already known: {0}")]
    Duplicate(String),

    #[error("address registry write without its lease")]
    NotLeased,

    #[error("address registry io: {0}")]
    Io(String),
}

impl StoreError {
    pub fn io(e: &eyre::Report) -> Self {
        Self::Io(format!("{e:#}"))
    }
}

/// Why an import attempt ended in `Failed`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FailureReason {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("network or connection error")]
    Connectivity,

    #[error("address is a special address and cannot be imported")]
    SpecialAddress,

    #[error("address has too many transactions to import")]
    TxTooMuch,

    #[error(transparent)]
    Decryption(#[from] DecryptionError),

    #[error("address is already monitored as watch-only")]
    WatchOnlyDuplicate,

    #[error("private key is already imported")]
    AlreadyImported,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// User-visible message buckets. Every failure lands in exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageCategory {
    Format,
    Connectivity,
    SpecialAddress,
    TooManyTransactions,
    WatchOnlyDuplicate,
    AlreadyImported,
    ImportFailed,
}

impl FailureReason {
    pub const fn category(&self) -> MessageCategory {
        match self {
            Self::Format(_) => MessageCategory::Format,
            Self::Connectivity => MessageCategory::Connectivity,
            Self::SpecialAddress => MessageCategory::SpecialAddress,
            Self::TxTooMuch => MessageCategory::TooManyTransactions,
            Self::WatchOnlyDuplicate => MessageCategory::WatchOnlyDuplicate,
            Self::AlreadyImported => MessageCategory::AlreadyImported,
            Self::Decryption(_) | Self::Store(_) => MessageCategory::ImportFailed,
        }
    }

    /// Whether resubmitting the same key can succeed without operator changes.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Connectivity | Self::Decryption(_))
    }
}

impl From<&FailureReason> for ImportNotice {
    fn from(reason: &FailureReason) -> Self {
        match reason {
            FailureReason::Format(FormatError::Uncompressed) => Self::failure(
                "uncompressed_key",
                "only compressed private keys are supported",
            ),
            FailureReason::Format(_) => {
                Self::failure("invalid_format", "private key format error")
            }
            FailureReason::Connectivity => {
                Self::failure("connectivity", "network or connection error; retry the import")
            }
            FailureReason::SpecialAddress => Self::failure(
                "special_address",
                "import failed: this is a special address",
            ),
            FailureReason::TxTooMuch => Self::failure(
                "too_many_transactions",
                "import failed: this address has too many transactions",
            ),
            FailureReason::WatchOnlyDuplicate => Self::failure(
                "watch_only_duplicate",
                "import failed: this address is already monitored as watch-only",
            ),
            FailureReason::AlreadyImported => Self::failure(
                "already_imported",
                "import failed: this private key is already imported",
            ),
            FailureReason::Decryption(_) | FailureReason::Store(_) => {
                Self::failure("import_failed", "import private key failed")
            }
        }
    }
}
