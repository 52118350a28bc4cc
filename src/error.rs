use std::time::Duration;

/// Failure taxonomy for everything that crosses the broker boundary plus the
/// two engine-internal terminal cases.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    /// The command channel itself failed (connection, IO, bad HTTP status).
    #[error("transport failure: {0}")]
    Transport(String),

    /// The operation exceeded its time budget.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The broker answered with success=false or a negative acknowledgement.
    #[error("broker rejected: {reason}")]
    BrokerRejected { reason: String },

    /// The response was missing required fields or had the wrong shape.
    #[error("malformed broker response: {0}")]
    Malformed(String),

    /// A precondition inside the engine was violated. Fatal: the control
    /// loop stops and no further orders are issued.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Shutdown was signaled while the operation was pending.
    #[error("cancelled by shutdown")]
    Cancelled,
}

impl BrokerError {
    /// Transient failures that read operations may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BrokerError::Transport(_) | BrokerError::Timeout(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, BrokerError::Invariant(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_and_timeout_retry() {
        assert!(BrokerError::Transport("boom".into()).is_retryable());
        assert!(BrokerError::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(!BrokerError::BrokerRejected {
            reason: "off quotes".into()
        }
        .is_retryable());
        assert!(!BrokerError::Malformed("no ticket".into()).is_retryable());
    }

    #[test]
    fn invariant_is_fatal() {
        assert!(BrokerError::Invariant("duplicate ticket".into()).is_fatal());
        assert!(!BrokerError::Cancelled.is_fatal());
    }
}
