//! Shared exchange-error classifier.
//!
//! Every runner hits the gateway at one call site or another; this crate is
//! the single place that decides what *kind* of failure a [`gateway::Error`]
//! represents, so the three strategy runners don't each reinvent the same
//! code/status matching. It is a pure function over the error — no state, no
//! I/O — the runner still owns what to *do* about each class.

use gateway::Error as GatewayError;

/// Exchange codes treated as logical-benign across every runner: the
/// exchange rejected the request for a reason the strategy can compensate
/// for locally, not a sign of something broken.
///
/// -2010 insufficient balance, -2011 unknown order (already gone, fine on a
/// cancel), -2013 no such order, -1013 filter failure (likely slippage).
const BENIGN_CODES: &[i64] = &[-2010, -2011, -2013, -1013];

/// The four-way split from the error handling design: transient failures are
/// retried by the gateway itself and should never reach here; logical-benign
/// and fatal-to-bot are distinguished per exchange code; fatal-to-process
/// conditions (missing credentials, persistence failure) never flow through
/// a `GatewayError` at all and are raised directly by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    LogicalBenign,
    FatalToBot,
    FatalToProcess,
    /// Anything else: not known to be benign or fatal. Runners treat this as
    /// "mark the order `error` and log", per the grid runner's catch-all.
    Other,
}

/// Classifies `err` given the caller's own set of fatal exchange codes (the
/// grid runner and the DCA runners disagree on exactly which codes are
/// fatal-to-bot: grid stops on `{-2014, -2015}`, DCA additionally stops on
/// `-1102`).
pub fn classify(err: &GatewayError, fatal_codes: &[i64]) -> ErrorClass {
    match err {
        GatewayError::Network(_) | GatewayError::Server5xx { .. } => ErrorClass::Transient,
        GatewayError::Exchange { code, .. } => {
            if fatal_codes.contains(code) {
                ErrorClass::FatalToBot
            } else if BENIGN_CODES.contains(code) {
                ErrorClass::LogicalBenign
            } else {
                ErrorClass::Other
            }
        }
        GatewayError::Deserialization(_) | GatewayError::InvalidData(_) | GatewayError::WebSocket(_) => {
            ErrorClass::Other
        }
    }
}

/// Grid runner's fatal set: `-2014` (bad API key format), `-2015` (invalid
/// API key/IP/permissions).
pub const GRID_FATAL_CODES: &[i64] = &[-2014, -2015];

/// DCA runners additionally treat `-1102` (mandatory parameter missing) as
/// fatal-to-bot.
pub const DCA_FATAL_CODES: &[i64] = &[-2014, -2015, -1102];

/// `true` for an exchange code specifically meaning "insufficient balance" —
/// the one benign code with its own compensation path (`ignored_balance`)
/// rather than a generic retry/skip.
pub fn is_insufficient_balance(err: &GatewayError) -> bool {
    matches!(err, GatewayError::Exchange { code, .. } if *code == -2010)
}

/// `true` for an exchange code meaning "filter failure" (likely slippage) —
/// the one benign code that gets a single delayed retry with a fresh
/// `clientOrderId` rather than being skipped outright.
pub fn is_filter_failure(err: &GatewayError) -> bool {
    matches!(err, GatewayError::Exchange { code, .. } if *code == -1013)
}

/// `true` for "unknown order" / "no such order" — safe to ignore when
/// cancelling, since the order is already gone.
pub fn is_unknown_order(err: &GatewayError) -> bool {
    matches!(err, GatewayError::Exchange { code, .. } if *code == -2011 || *code == -2013)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange_err(code: i64) -> GatewayError {
        GatewayError::Exchange { code, message: "x".to_string() }
    }

    #[test]
    fn network_and_5xx_are_transient() {
        assert_eq!(
            classify(&GatewayError::Server5xx { status: 503, body: String::new() }, GRID_FATAL_CODES),
            ErrorClass::Transient
        );
    }

    #[test]
    fn grid_fatal_codes_classify_as_fatal_to_bot() {
        assert_eq!(classify(&exchange_err(-2015), GRID_FATAL_CODES), ErrorClass::FatalToBot);
        assert_eq!(classify(&exchange_err(-2014), GRID_FATAL_CODES), ErrorClass::FatalToBot);
    }

    #[test]
    fn dca_fatal_set_includes_missing_parameter() {
        assert_eq!(classify(&exchange_err(-1102), GRID_FATAL_CODES), ErrorClass::Other);
        assert_eq!(classify(&exchange_err(-1102), DCA_FATAL_CODES), ErrorClass::FatalToBot);
    }

    #[test]
    fn benign_codes_classify_as_logical_benign() {
        for code in [-2010, -2011, -2013, -1013] {
            assert_eq!(classify(&exchange_err(code), GRID_FATAL_CODES), ErrorClass::LogicalBenign);
        }
    }

    #[test]
    fn unknown_exchange_code_is_other() {
        assert_eq!(classify(&exchange_err(-9999), GRID_FATAL_CODES), ErrorClass::Other);
    }

    #[test]
    fn insufficient_balance_and_filter_failure_predicates() {
        assert!(is_insufficient_balance(&exchange_err(-2010)));
        assert!(!is_insufficient_balance(&exchange_err(-1013)));
        assert!(is_filter_failure(&exchange_err(-1013)));
        assert!(is_unknown_order(&exchange_err(-2011)));
        assert!(is_unknown_order(&exchange_err(-2013)));
    }
}
