use std::fmt;
use thiserror::Error;

/// Enumerated reason attached to a business rejection.
///
/// Rejections are return values, never errors; the wire string is stable
/// and appears verbatim in order_update events and WAL records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    DuplicateClientOrderId,
    InsufficientFunds,
    PriceBand,
    RateLimit,
    SizeLimit,
    RiskRejected,
    UnknownSymbol,
    StrategyFrozen,
    CircuitBreaker,
    UnknownOrder,
    NoExecutionReportFromRouter,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::DuplicateClientOrderId => "duplicate_client_order_id",
            RejectReason::InsufficientFunds => "insufficient_funds",
            RejectReason::PriceBand => "price_band",
            RejectReason::RateLimit => "rate_limit",
            RejectReason::SizeLimit => "size_limit",
            RejectReason::RiskRejected => "risk_rejected",
            RejectReason::UnknownSymbol => "unknown_symbol",
            RejectReason::StrategyFrozen => "strategy_frozen",
            RejectReason::CircuitBreaker => "circuit_breaker",
            RejectReason::UnknownOrder => "unknown_order",
            RejectReason::NoExecutionReportFromRouter => "no_execution_report_from_router",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors from the write-ahead log.
#[derive(Debug, Error)]
pub enum WalError {
    #[error("WAL I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAL is unhealthy, refusing write")]
    Unhealthy,
}

/// Errors from the order/position core.
///
/// `InvariantViolation` is a programmer error: the core refuses to
/// continue with corrupt accounting state.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Wal(#[from] WalError),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_wire_strings() {
        assert_eq!(RejectReason::InsufficientFunds.as_str(), "insufficient_funds");
        assert_eq!(
            RejectReason::NoExecutionReportFromRouter.to_string(),
            "no_execution_report_from_router"
        );
    }
}
