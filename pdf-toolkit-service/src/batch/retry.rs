//! Retry classification and backoff for batch file attempts.

use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::error::{OllamaError, ProcessingError, ServiceError};

/// Whether another attempt could succeed where this one failed
pub fn is_transient(error: &ServiceError) -> bool {
    matches!(
        error,
        ServiceError::Processing(
            ProcessingError::Timeout { .. } | ProcessingError::Io(_) | ProcessingError::Render { .. }
        ) | ServiceError::Ollama(OllamaError::Connection { .. })
    )
}

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
/// capped at `max`, plus up to 25% jitter derived from `seed`.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration, seed: &str) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let delay = base.saturating_mul(1u32 << exponent).min(max);

    let digest = Sha256::new()
        .chain_update(seed.as_bytes())
        .chain_update(attempt.to_le_bytes())
        .finalize();
    let fraction = f64::from(u16::from_le_bytes([digest[0], digest[1]])) / f64::from(u16::MAX);
    let jitter = delay.mul_f64(0.25 * fraction);

    (delay + jitter).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(is_transient(&ServiceError::Processing(ProcessingError::Timeout {
            secs: 5
        })));
        assert!(is_transient(&ServiceError::Processing(ProcessingError::Io(
            std::io::Error::other("disk")
        ))));
        assert!(!is_transient(&ServiceError::Processing(
            ProcessingError::InvalidPassword
        )));
        assert!(!is_transient(&ServiceError::Processing(
            ProcessingError::UnsupportedFormat {
                format: "docx".into()
            }
        )));
        assert!(!is_transient(&ServiceError::invalid("bad page range")));
    }

    #[test]
    fn test_backoff_grows_and_is_capped() {
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(1);

        let first = backoff_delay(1, base, max, "job:file");
        let second = backoff_delay(2, base, max, "job:file");
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(125));
        assert!(second >= Duration::from_millis(200) && second <= Duration::from_millis(250));
        assert_eq!(backoff_delay(10, base, max, "job:file"), max);
    }

    #[test]
    fn test_backoff_jitter_is_deterministic() {
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(10);
        assert_eq!(
            backoff_delay(3, base, max, "a"),
            backoff_delay(3, base, max, "a")
        );
    }
}
