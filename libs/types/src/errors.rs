//! Error types for identifiers and amounts
//!
//! Both error families are raised while parsing or combining values that
//! arrive from decoded stream payloads.

use thiserror::Error;

/// Identifier construction errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid transaction hash: {0}")]
    InvalidHash(String),
}

/// Amount parsing and arithmetic errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("Invalid amount: {0}")]
    Invalid(String),

    #[error("Amount overflow: {left} + {right}")]
    Overflow { left: String, right: String },

    #[error("Amount underflow: balance {balance}, delta {delta}")]
    Underflow { balance: String, delta: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_error_display() {
        let err = IdError::InvalidAddress("0xzz".to_string());
        assert_eq!(err.to_string(), "Invalid address: 0xzz");
    }

    #[test]
    fn test_amount_underflow_display() {
        let err = AmountError::Underflow {
            balance: "10".to_string(),
            delta: "-40".to_string(),
        };
        assert!(err.to_string().contains("balance 10"));
        assert!(err.to_string().contains("-40"));
    }
}
