//! Logging and run counters
//!
//! Counters go through the `metrics` facade and are no-ops until the host
//! installs a recorder.

use crate::config::TelemetryConfig;
use crate::error::TelemetryError;
use crate::types::{RunMetrics, StepResult};
use tracing_subscriber::EnvFilter;

/// Reviewer tool calls, summed across steps
pub const REVIEWER_TOOL_CALLS: &str = "sva_reviewer_tool_calls_total";
/// Reviewer model turns, summed across steps
pub const REVIEWER_ITERATIONS: &str = "sva_reviewer_iterations_total";
/// Steps answered from the evidence cache
pub const STEPS_REUSED: &str = "sva_steps_reused_total";
/// Story verdicts, labelled by `result`
pub const STORY_VERDICTS: &str = "sva_story_verdicts_total";

/// Install the global `tracing` subscriber
///
/// `RUST_LOG` takes precedence over `config.default_filter`.
///
/// # Errors
/// Fails if the filter does not parse or a subscriber is already set.
pub fn init_tracing(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.default_filter)
            .map_err(|e| TelemetryError::Filter(e.to_string()))?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| TelemetryError::AlreadyInitialised(e.to_string()))
}

/// Emit the counters of one finished run
pub fn record_run(metrics: &RunMetrics, verdict: StepResult) {
    metrics::counter!(REVIEWER_TOOL_CALLS).increment(u64::from(metrics.reviewer_tool_calls));
    metrics::counter!(REVIEWER_ITERATIONS).increment(u64::from(metrics.reviewer_iterations));
    metrics::counter!(STEPS_REUSED).increment(u64::from(metrics.steps_reused));
    metrics::counter!(STORY_VERDICTS, "result" => verdict.label()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_fails_instead_of_panicking() {
        let config = TelemetryConfig {
            default_filter: "warn".to_string(),
            json: false,
        };
        // another test may have installed a subscriber already; either way
        // the second call must be an error
        let _ = init_tracing(&config);
        assert!(matches!(
            init_tracing(&config),
            Err(TelemetryError::AlreadyInitialised(_))
        ));
    }

    #[test]
    fn recording_without_recorder_is_a_no_op() {
        record_run(&RunMetrics::default(), StepResult::Pass);
    }
}
