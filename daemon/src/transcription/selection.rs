use super::EngineKind;
use crate::error::{EngineError, PipelineError};

/// Picks the engine to run from the initialization outcomes.
///
/// `fallback` is `None` when the fallback was never attempted, which only
/// happens when the primary came up.
pub fn select_engine(
    primary: Result<(), EngineError>,
    fallback: Option<Result<(), EngineError>>,
) -> Result<EngineKind, PipelineError> {
    let primary_error = match primary {
        Ok(()) => return Ok(EngineKind::PrimaryOnDevice),
        Err(e) => e,
    };

    match fallback {
        Some(Ok(())) => Ok(EngineKind::FallbackPlatform),
        Some(Err(fallback_error)) => Err(PipelineError::InitFailed {
            primary: primary_error,
            fallback: fallback_error,
        }),
        None => Err(PipelineError::InitFailed {
            primary: primary_error,
            fallback: EngineError::unavailable(EngineKind::FallbackPlatform, "not attempted"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unavailable(kind: EngineKind) -> EngineError {
        EngineError::unavailable(kind, "missing")
    }

    #[test]
    fn test_primary_wins_when_available() {
        assert_eq!(
            select_engine(Ok(()), None).unwrap(),
            EngineKind::PrimaryOnDevice
        );
        assert_eq!(
            select_engine(Ok(()), Some(Ok(()))).unwrap(),
            EngineKind::PrimaryOnDevice
        );
    }

    #[test]
    fn test_fallback_after_primary_failure() {
        let selected = select_engine(Err(unavailable(EngineKind::PrimaryOnDevice)), Some(Ok(())));
        assert_eq!(selected.unwrap(), EngineKind::FallbackPlatform);
    }

    #[test]
    fn test_both_failing_reports_both_errors() {
        let err = select_engine(
            Err(unavailable(EngineKind::PrimaryOnDevice)),
            Some(Err(unavailable(EngineKind::FallbackPlatform))),
        )
        .unwrap_err();

        match err {
            PipelineError::InitFailed { primary, fallback } => {
                assert_eq!(primary, unavailable(EngineKind::PrimaryOnDevice));
                assert_eq!(fallback, unavailable(EngineKind::FallbackPlatform));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
