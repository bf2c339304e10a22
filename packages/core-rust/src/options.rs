//! Per-call job options.
//!
//! Call options are an open JSON object, but only the keys in [`JobOption`]
//! reach the job builder. Anything else is ignored without error.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EngineError, RpcError};
use crate::traits::JobBuilder;

/// The closed set of recognized job configurators, in application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobOption {
    SetId,
    Retries,
    Backoff,
    DelayUntil,
    Timeout,
}

impl JobOption {
    /// All options in the order they are applied to a job.
    pub const ALL: [JobOption; 5] = [
        Self::SetId,
        Self::Retries,
        Self::Backoff,
        Self::DelayUntil,
        Self::Timeout,
    ];

    /// Key used in call options.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::SetId => "setId",
            Self::Retries => "retries",
            Self::Backoff => "backoff",
            Self::DelayUntil => "delayUntil",
            Self::Timeout => "timeout",
        }
    }

    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|opt| opt.key() == key)
    }
}

impl std::fmt::Display for JobOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Options attached to a single call.
///
/// ```
/// use jobwire_core::CallOptions;
///
/// let opts = CallOptions::new().retries(2).timeout(100).backoff("fixed", 50);
/// assert_eq!(opts.get("retries"), Some(&serde_json::json!(2)));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallOptions(Map<String, Value>);

impl CallOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn set_id(self, id: impl Into<String>) -> Self {
        self.set(JobOption::SetId.key(), Value::String(id.into()))
    }

    #[must_use]
    pub fn retries(self, retries: u32) -> Self {
        self.set(JobOption::Retries.key(), Value::from(retries))
    }

    /// `strategy` is one of `immediate`, `fixed`, `exponential`.
    #[must_use]
    pub fn backoff(self, strategy: &str, delay_ms: u64) -> Self {
        self.set(
            JobOption::Backoff.key(),
            Value::Array(vec![Value::from(strategy), Value::from(delay_ms)]),
        )
    }

    /// Epoch milliseconds before which the job must not run.
    #[must_use]
    pub fn delay_until(self, epoch_ms: u64) -> Self {
        self.set(JobOption::DelayUntil.key(), Value::from(epoch_ms))
    }

    #[must_use]
    pub fn timeout(self, timeout_ms: u64) -> Self {
        self.set(JobOption::Timeout.key(), Value::from(timeout_ms))
    }

    /// Set an arbitrary key. Unrecognized keys are carried but never applied.
    #[must_use]
    pub fn set(mut self, key: impl Into<String>, value: Value) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Recognized options present in this set, in application order, with
    /// their positional arguments.
    pub fn recognized(&self) -> impl Iterator<Item = (JobOption, Vec<Value>)> + '_ {
        JobOption::ALL.into_iter().filter_map(|opt| {
            self.0.get(opt.key()).map(|value| {
                let args = match value {
                    Value::Array(items) => items.clone(),
                    scalar => vec![scalar.clone()],
                };
                (opt, args)
            })
        })
    }

    /// Configure `job` with every recognized option.
    ///
    /// # Errors
    ///
    /// Returns the builder's error for a recognized option with an invalid
    /// value.
    pub fn apply(&self, job: &mut dyn JobBuilder) -> Result<(), EngineError> {
        for (opt, args) in self.recognized() {
            job.configure(opt, &args)?;
        }
        Ok(())
    }
}

impl TryFrom<Value> for CallOptions {
    type Error = RpcError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(RpcError::InvalidOptions(format!(
                "call options must be an object, got {other}"
            ))),
        }
    }
}

impl From<Map<String, Value>> for CallOptions {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::traits::JobHandle;

    #[derive(Default)]
    struct RecordingBuilder {
        calls: Vec<(JobOption, Vec<Value>)>,
    }

    #[async_trait::async_trait]
    impl JobBuilder for RecordingBuilder {
        fn configure(&mut self, option: JobOption, args: &[Value]) -> Result<(), EngineError> {
            self.calls.push((option, args.to_vec()));
            Ok(())
        }

        async fn save(self: Box<Self>) -> Result<JobHandle, EngineError> {
            Err(EngineError::Closed)
        }
    }

    #[test]
    fn applies_in_enumeration_order() {
        let opts = CallOptions::new()
            .timeout(100)
            .retries(2)
            .set_id("job-1")
            .backoff("fixed", 10);

        let mut builder = RecordingBuilder::default();
        opts.apply(&mut builder).unwrap();

        let order: Vec<JobOption> = builder.calls.iter().map(|(o, _)| *o).collect();
        assert_eq!(
            order,
            vec![
                JobOption::SetId,
                JobOption::Retries,
                JobOption::Backoff,
                JobOption::Timeout
            ]
        );
    }

    #[test]
    fn arrays_spread_and_scalars_pass_single() {
        let opts = CallOptions::new().backoff("exponential", 25).retries(3);
        let mut builder = RecordingBuilder::default();
        opts.apply(&mut builder).unwrap();

        assert_eq!(builder.calls[0], (JobOption::Retries, vec![json!(3)]));
        assert_eq!(
            builder.calls[1],
            (JobOption::Backoff, vec![json!("exponential"), json!(25)])
        );
    }

    #[test]
    fn unrecognized_keys_are_ignored() {
        let opts = CallOptions::new()
            .set("priority", json!("high"))
            .set("attempts", json!(9));
        let mut builder = RecordingBuilder::default();
        opts.apply(&mut builder).unwrap();
        assert!(builder.calls.is_empty());
    }

    #[test]
    fn try_from_rejects_non_objects() {
        assert!(CallOptions::try_from(json!({ "timeout": 5 })).is_ok());
        let err = CallOptions::try_from(json!([1])).unwrap_err();
        assert!(matches!(err, RpcError::InvalidOptions(_)));
    }

    #[test]
    fn keys_round_trip() {
        for opt in JobOption::ALL {
            assert_eq!(JobOption::from_key(opt.key()), Some(opt));
        }
        assert_eq!(JobOption::from_key("priority"), None);
    }
}
