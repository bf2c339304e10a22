//! Jobs as seen by service methods, and their engine-side settings.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::Value;

use crate::error::{EngineError, JobFailure};
use crate::options::JobOption;

/// Retry delay strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Backoff {
    /// Retry right away.
    #[default]
    Immediate,
    /// Wait the same delay before every retry.
    Fixed(Duration),
    /// Double the delay after every retry, starting from the given one.
    Exponential(Duration),
}

impl Backoff {
    /// Delay before retry number `retry` (1-based).
    #[must_use]
    pub fn delay(self, retry: u32) -> Duration {
        match self {
            Self::Immediate => Duration::ZERO,
            Self::Fixed(delay) => delay,
            Self::Exponential(base) => {
                let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
                base.saturating_mul(factor)
            }
        }
    }
}

/// Engine-side interpretation of the recognized job options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobSettings {
    pub id: Option<String>,
    pub retries: u32,
    pub backoff: Backoff,
    pub delay_until: Option<SystemTime>,
    pub timeout: Option<Duration>,
}

impl JobSettings {
    /// Apply one configurator call.
    ///
    /// # Errors
    ///
    /// `InvalidJobOption` when the arguments do not fit the option.
    pub fn configure(&mut self, option: JobOption, args: &[Value]) -> Result<(), EngineError> {
        let invalid = |reason: &str| EngineError::InvalidJobOption {
            option: option.key(),
            reason: reason.to_string(),
        };
        let first = args.first();

        match option {
            JobOption::SetId => {
                self.id = match first {
                    Some(Value::String(id)) if !id.is_empty() => Some(id.clone()),
                    Some(Value::Number(n)) => Some(n.to_string()),
                    _ => return Err(invalid("expected a non-empty string or number")),
                };
            }
            JobOption::Retries => {
                let retries = first
                    .and_then(whole_number)
                    .ok_or_else(|| invalid("retries cannot be negative"))?;
                self.retries = u32::try_from(retries).map_err(|_| invalid("retries out of range"))?;
            }
            JobOption::Backoff => {
                let strategy = first
                    .and_then(Value::as_str)
                    .ok_or_else(|| invalid("missing strategy"))?;
                let delay = match args.get(1) {
                    None | Some(Value::Null) => Duration::ZERO,
                    Some(v) => Duration::from_millis(
                        whole_number(v)
                            .ok_or_else(|| invalid("delay must be a non-negative integer"))?,
                    ),
                };
                self.backoff = match strategy {
                    "immediate" => Backoff::Immediate,
                    "fixed" => Backoff::Fixed(delay),
                    "exponential" => Backoff::Exponential(delay),
                    other => return Err(invalid(&format!("unknown strategy {other:?}"))),
                };
            }
            JobOption::DelayUntil => {
                let epoch_ms = first
                    .and_then(whole_number)
                    .ok_or_else(|| invalid("expected epoch milliseconds"))?;
                self.delay_until = Some(UNIX_EPOCH + Duration::from_millis(epoch_ms));
            }
            JobOption::Timeout => {
                let ms = first
                    .and_then(whole_number)
                    .ok_or_else(|| invalid("timeout must be a non-negative integer"))?;
                self.timeout = (ms > 0).then(|| Duration::from_millis(ms));
            }
        }
        Ok(())
    }

    /// Time left until `delay_until`, if it lies in the future.
    #[must_use]
    pub fn remaining_delay(&self) -> Option<Duration> {
        self.delay_until
            .and_then(|at| at.duration_since(SystemTime::now()).ok())
            .filter(|d| !d.is_zero())
    }
}

/// A non-negative integer, also when it arrives as an integral float such as
/// `100.0`.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::float_cmp
)]
fn whole_number(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.is_finite() && f.fract() == 0.0 && *f >= 0.0 && *f <= u64::MAX as f64)
            .map(|f| f as u64)
    })
}

/// Callback a job uses to publish progress.
pub type ProgressSink = Arc<dyn Fn(u8) + Send + Sync>;

/// A job delivered to a service method.
#[derive(Clone)]
pub struct Job {
    pub id: String,
    pub data: Value,
    pub settings: JobSettings,
    progress: Option<ProgressSink>,
}

impl Job {
    #[must_use]
    pub fn new(id: impl Into<String>, data: Value, settings: JobSettings) -> Self {
        Self {
            id: id.into(),
            data,
            settings,
            progress: None,
        }
    }

    #[must_use]
    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Report completion percentage. Values above 100 are clamped.
    pub fn report_progress(&self, percent: u8) {
        if let Some(sink) = &self.progress {
            sink(percent.min(100));
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("data", &self.data)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Terminal outcome of a job.
pub type JobOutcome = Result<Value, JobFailure>;
