use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Failure of an external capability call. Every stage recovers from these.
#[derive(Error, Debug)]
pub enum CapabilityError {
    #[error("Service error: {0:#}")]
    Service(anyhow::Error),

    #[error("Invalid structured output: {0}")]
    InvalidOutput(String),

    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Service returned no result")]
    EmptyResponse,
}

impl From<anyhow::Error> for CapabilityError {
    fn from(err: anyhow::Error) -> Self {
        CapabilityError::Service(err)
    }
}

impl From<serde_json::Error> for CapabilityError {
    fn from(err: serde_json::Error) -> Self {
        CapabilityError::InvalidOutput(err.to_string())
    }
}

/// Bound a capability call; an elapsed deadline becomes `CapabilityError::Timeout`.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, CapabilityError>
where
    F: Future<Output = Result<T, CapabilityError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(CapabilityError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_hung_call_times_out() {
        let hung = async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok::<_, CapabilityError>(())
        };

        let result = with_timeout(Duration::from_secs(5), hung).await;
        assert!(matches!(result, Err(CapabilityError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_fast_call_passes_through() {
        let result = with_timeout(Duration::from_secs(5), async { Ok::<_, CapabilityError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
