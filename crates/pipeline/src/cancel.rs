use std::sync::Arc;

pub use tokio_util::sync::CancellationToken;

use crate::ingestion::IngestPhase;

/// Progress callback supplied by the caller: `(percent, message, phase)`.
/// The transport layer typically forwards these to the client; tests use
/// them to observe phase transitions.
pub type ProgressCallback = Arc<dyn Fn(f32, &str, IngestPhase) + Send + Sync>;

/// Optional progress reporting around the ingestion loop.
#[derive(Clone, Default)]
pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
}

impl ProgressReporter {
    pub fn new(callback: ProgressCallback) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    pub fn disabled() -> Self {
        Self { callback: None }
    }

    pub fn report(&self, percent: f32, message: &str, phase: IngestPhase) {
        if let Some(callback) = &self.callback {
            callback(percent.clamp(0.0, 100.0), message, phase);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_reporter_invokes_callback_with_clamped_percent() {
        let seen: Arc<Mutex<Vec<(f32, IngestPhase)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let reporter = ProgressReporter::new(Arc::new(move |percent, _msg, phase| {
            sink.lock().unwrap().push((percent, phase));
        }));

        reporter.report(42.0, "extracting", IngestPhase::Extracting);
        reporter.report(140.0, "done", IngestPhase::Complete);

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], (42.0, IngestPhase::Extracting));
        assert_eq!(seen[1], (100.0, IngestPhase::Complete));
    }

    #[test]
    fn test_disabled_reporter_is_a_no_op() {
        ProgressReporter::disabled().report(10.0, "msg", IngestPhase::Parsing);
    }
}
