//! Engine configuration.

use std::time::Duration;

use crate::session::EngineError;

/// Configuration for the reorder engine.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Number of session slots shared across all peers and traffic classes.
    pub max_sessions: usize,
    /// How long to wait for a missing frame before forcing the window past
    /// it.
    pub aging_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_sessions: 16,
            aging_timeout: Duration::from_millis(100),
        }
    }
}

impl EngineConfig {
    /// Validate configuration parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `max_sessions` is 0
    /// - `aging_timeout` is 0
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_sessions == 0 {
            return Err(EngineError::InvalidParameter(
                "max_sessions must be greater than 0",
            ));
        }
        if self.aging_timeout.is_zero() {
            return Err(EngineError::InvalidParameter(
                "aging_timeout must be greater than 0",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
        assert_eq!(EngineConfig::default().max_sessions, 16);
    }

    #[test]
    fn rejects_zero_sessions() {
        let config = EngineConfig {
            max_sessions: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(EngineError::InvalidParameter(_))
        ));
    }

    #[test]
    fn rejects_zero_timeout() {
        let config = EngineConfig {
            aging_timeout: Duration::ZERO,
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(EngineError::InvalidParameter(_))
        ));
    }
}
