//! Classification of network failures for retry decisions.
//!
//! All string matching on error text lives here. Retry loops only ever see
//! an [`ErrorClass`].

use crate::network::NetworkError;

/// Classification of a failed network call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Connectivity failure: timeout, DNS, refused connection.
    TransientNetwork,
    /// One or more storage nodes failed to accept or serve the data.
    TransientNode,
    /// The paying account cannot cover storage. Never retried.
    BalanceInsufficient,
    /// The upload relay rejected the request or could not be reached.
    RelayFault,
    /// Anything else. Never retried.
    Fatal,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::TransientNetwork => "transient-network",
            ErrorClass::TransientNode => "transient-node",
            ErrorClass::BalanceInsufficient => "balance-insufficient",
            ErrorClass::RelayFault => "relay-fault",
            ErrorClass::Fatal => "fatal",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorClass::TransientNetwork | ErrorClass::TransientNode | ErrorClass::RelayFault
        )
    }

    /// Whether the failure suggests picking a different access point.
    pub fn suggests_reprobe(&self) -> bool {
        matches!(self, ErrorClass::TransientNetwork | ErrorClass::TransientNode)
    }

    /// Remediation text shown to whoever ends up holding the error.
    pub fn guidance(&self) -> Option<&'static str> {
        match self {
            ErrorClass::BalanceInsufficient => Some(
                "fund the publishing wallet with WAL to pay for storage and SUI for gas, then \
                 retry the upload",
            ),
            ErrorClass::TransientNode => Some(
                "storage nodes are temporarily failing to confirm data; retry the operation later",
            ),
            ErrorClass::TransientNetwork => Some(
                "check connectivity to the configured publisher and aggregator endpoints, then \
                 retry",
            ),
            ErrorClass::RelayFault => Some(
                "the upload relay is rejecting requests; check its tip configuration or disable \
                 the relay",
            ),
            ErrorClass::Fatal => None,
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of the client a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Upload,
    Retrieval,
}

/// Context of the failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationContext {
    pub operation: Operation,
    /// 1-based attempt number within the current retry loop.
    pub attempt: u32,
    /// Whether the call went through the upload relay.
    pub via_relay: bool,
}

impl OperationContext {
    pub fn upload(attempt: u32, via_relay: bool) -> Self {
        Self {
            operation: Operation::Upload,
            attempt,
            via_relay,
        }
    }

    pub fn retrieval(attempt: u32) -> Self {
        Self {
            operation: Operation::Retrieval,
            attempt,
            via_relay: false,
        }
    }
}

const BALANCE_PHRASES: &[&str] = &[
    "insufficient balance",
    "insufficient funds",
    "insufficient wal",
    "not enough wal",
    "sufficient balance",
    "insufficientcoinbalance",
    "insufficientgas",
    "insufficient gas",
];

const RELAY_PHRASES: &[&str] = &[
    "tip",
    "payment",
    "nonce",
    "query parameter",
    "query param",
    "upload relay",
    "relay",
];

const NODE_PHRASES: &[&str] = &[
    "too many failures",
    "not available for consumption",
    "not enough confirmations",
    "insufficient confirmations",
    "version mismatch",
    "incompatible version",
    "epoch change",
    "current epoch",
    "clock skew",
    "out of sync",
    "storage node failed",
    "storage nodes failed",
    "storage node version",
    "storage node unavailable",
];

/// Assigns a class to a failed call.
pub fn classify(error: &NetworkError, context: OperationContext) -> ErrorClass {
    let text = error.detail().to_ascii_lowercase();
    let mentions = |phrases: &[&str]| phrases.iter().any(|p| text.contains(p));

    if mentions(BALANCE_PHRASES) {
        return ErrorClass::BalanceInsufficient;
    }

    if context.via_relay {
        match error {
            NetworkError::Timeout { .. } | NetworkError::Connect { .. } => {
                return ErrorClass::RelayFault;
            }
            _ if mentions(RELAY_PHRASES) => return ErrorClass::RelayFault,
            _ => {}
        }
    }

    if mentions(NODE_PHRASES) {
        return ErrorClass::TransientNode;
    }

    match error {
        NetworkError::Timeout { .. } | NetworkError::Connect { .. } => {
            ErrorClass::TransientNetwork
        }
        NetworkError::Status { status, .. } => match status {
            408 | 429 | 502 | 503 | 504 => ErrorClass::TransientNetwork,
            // The publisher reports node-side failures as internal errors.
            500 => ErrorClass::TransientNode,
            _ => ErrorClass::Fatal,
        },
        NetworkError::Protocol { .. } => ErrorClass::Fatal,
    }
}

/// Pulls the amount the network says is required out of a balance error.
///
/// Looks for a number following `required`, `needed` or `need`, keeping a
/// unit word (`WAL`, `FROST`, `MIST`, `SUI`) when one follows.
pub fn required_amount(error: &NetworkError) -> Option<String> {
    let tokens: Vec<&str> = error
        .detail()
        .split(|c: char| c.is_whitespace() || c == ':' || c == '=' || c == ',' || c == '(')
        .filter(|t| !t.is_empty())
        .collect();

    let keyword_at = tokens.iter().position(|t| {
        let t = t.to_ascii_lowercase();
        t == "required" || t == "needed" || t == "need"
    })?;

    let (idx, amount) = tokens
        .iter()
        .enumerate()
        .skip(keyword_at + 1)
        .find_map(|(i, t)| {
            let trimmed = t.trim_end_matches(|c: char| !c.is_ascii_digit());
            (!trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit() || c == '.'))
                .then(|| (i, trimmed.to_string()))
        })?;

    let unit = tokens
        .get(idx + 1)
        .map(|u| u.trim_end_matches(|c: char| !c.is_ascii_alphabetic()))
        .filter(|u| matches!(u.to_ascii_uppercase().as_str(), "WAL" | "FROST" | "MIST" | "SUI"));

    Some(match unit {
        Some(unit) => format!("{amount} {unit}"),
        None => amount,
    })
}
