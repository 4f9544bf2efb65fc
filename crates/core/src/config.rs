//! Pipeline configuration surface
//!
//! Named TOML sections supply per-kind policy options plus pipeline-wide
//! settings (default timeout, correlation header). Parsing and validation
//! happen up front at setup time; realized policies land in a
//! [`PolicyRegistry`](crate::policy::PolicyRegistry).
//!
//! Runtime reload goes through [`ConfigHandle`]: settings are published over
//! a `tokio::sync::watch` channel, subscribers sample the current value per
//! operation, and anything already in flight keeps the values it derived at
//! start. Policy *instances* are not hot-swapped — registration is a
//! setup-time activity.
//!
//! ```toml
//! [pipeline]
//! default_timeout_ms = 30000          # 0 disables the bound entirely
//! correlation_header = "x-correlation-id"
//! echo_correlation = true
//!
//! [policies.upstream-retry]
//! kind = "retry"
//! max_attempts = 4
//! backoff = "exponential"
//! initial_delay_ms = 100
//! base = 2.0
//! max_delay_ms = 5000
//! jitter = "full"
//!
//! [policies.upstream-breaker]
//! kind = "circuit_breaker"
//! failure_threshold = 5
//! break_duration_ms = 30000
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::watch;
use tracing::info;

use crate::correlation::DEFAULT_CORRELATION_HEADER;
use crate::error::{PipelineError, PipelineResult};
use crate::policy::{
    BulkheadConfig, CircuitBreakerConfig, FallbackConfig, Jitter, PolicyDescriptor,
    PolicyRegistry, RetryConfig, TimeoutConfig,
};
use crate::policy::retry::BackoffStrategy;

/// Pipeline-wide settings sampled by handlers per operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Default per-request bound; `None` means unbounded (no timer at all)
    pub default_timeout: Option<Duration>,
    /// Header carrying the correlation id
    pub correlation_header: String,
    /// Whether to echo the correlation header onto responses
    pub echo_correlation: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            default_timeout: Some(Duration::from_secs(30)),
            correlation_header: DEFAULT_CORRELATION_HEADER.to_string(),
            echo_correlation: false,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    pipeline: RawPipeline,
    #[serde(default)]
    policies: BTreeMap<String, RawPolicy>,
}

#[derive(Debug, Deserialize, Default)]
struct RawPipeline {
    default_timeout_ms: Option<u64>,
    correlation_header: Option<String>,
    echo_correlation: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum RawPolicy {
    Retry {
        max_attempts: Option<u32>,
        backoff: Option<String>,
        delay_ms: Option<u64>,
        initial_delay_ms: Option<u64>,
        base: Option<f64>,
        max_delay_ms: Option<u64>,
        jitter: Option<String>,
    },
    CircuitBreaker {
        failure_threshold: Option<u64>,
        success_threshold: Option<u64>,
        break_duration_ms: Option<u64>,
        half_open_max_calls: Option<u64>,
    },
    Timeout {
        timeout_ms: u64,
    },
    Fallback {
        value: serde_json::Value,
    },
    Bulkhead {
        max_concurrent: Option<usize>,
        max_queue: Option<usize>,
        acquire_timeout_ms: Option<u64>,
    },
}

/// Parsed, validated pipeline configuration
#[derive(Debug)]
pub struct PipelineConfig {
    settings: PipelineSettings,
    descriptors: Vec<(String, PolicyDescriptor)>,
}

impl PipelineConfig {
    /// Parse a TOML document into settings plus policy descriptors
    pub fn from_toml_str(input: &str) -> PipelineResult<Self> {
        let raw: RawConfig = toml::from_str(input)
            .map_err(|err| PipelineError::InvalidConfiguration { message: err.to_string() })?;

        let settings = PipelineSettings {
            default_timeout: match raw.pipeline.default_timeout_ms {
                // 0 = "infinite": disable the bound entirely.
                Some(0) => None,
                Some(ms) => Some(Duration::from_millis(ms)),
                None => PipelineSettings::default().default_timeout,
            },
            correlation_header: raw
                .pipeline
                .correlation_header
                .unwrap_or_else(|| DEFAULT_CORRELATION_HEADER.to_string()),
            echo_correlation: raw.pipeline.echo_correlation.unwrap_or(false),
        };

        let mut descriptors = Vec::with_capacity(raw.policies.len());
        for (name, raw_policy) in raw.policies {
            let descriptor = realize_descriptor(&name, raw_policy)?;
            descriptors.push((name, descriptor));
        }

        Ok(Self { settings, descriptors })
    }

    /// The pipeline-wide settings
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// The named policy descriptors, in section order
    pub fn descriptors(&self) -> &[(String, PolicyDescriptor)] {
        &self.descriptors
    }

    /// Realize every descriptor into the given registry
    pub fn apply_policies(&self, registry: &PolicyRegistry) -> PipelineResult<()> {
        for (name, descriptor) in &self.descriptors {
            registry.register(name.clone(), descriptor)?;
        }
        Ok(())
    }
}

fn realize_descriptor(name: &str, raw: RawPolicy) -> PipelineResult<PolicyDescriptor> {
    let invalid = |message: String| PipelineError::InvalidConfiguration {
        message: format!("policy '{name}': {message}"),
    };

    match raw {
        RawPolicy::Retry {
            max_attempts,
            backoff,
            delay_ms,
            initial_delay_ms,
            base,
            max_delay_ms,
            jitter,
        } => {
            let defaults = RetryConfig::default();
            let backoff = match backoff.as_deref() {
                Some("fixed") => BackoffStrategy::Fixed {
                    delay: Duration::from_millis(delay_ms.unwrap_or(100)),
                },
                Some("exponential") | None => BackoffStrategy::Exponential {
                    initial_delay: Duration::from_millis(initial_delay_ms.unwrap_or(100)),
                    base: base.unwrap_or(2.0),
                    max_delay: Duration::from_millis(max_delay_ms.unwrap_or(30_000)),
                },
                Some(other) => return Err(invalid(format!("unknown backoff '{other}'"))),
            };
            let jitter = match jitter.as_deref() {
                None | Some("none") => Jitter::None,
                Some("full") => Jitter::Full,
                Some("equal") => Jitter::Equal,
                Some(other) => return Err(invalid(format!("unknown jitter '{other}'"))),
            };
            Ok(PolicyDescriptor::Retry(RetryConfig {
                max_attempts: max_attempts.unwrap_or(defaults.max_attempts),
                backoff,
                jitter,
            }))
        }
        RawPolicy::CircuitBreaker {
            failure_threshold,
            success_threshold,
            break_duration_ms,
            half_open_max_calls,
        } => {
            let defaults = CircuitBreakerConfig::default();
            Ok(PolicyDescriptor::CircuitBreaker(CircuitBreakerConfig {
                failure_threshold: failure_threshold.unwrap_or(defaults.failure_threshold),
                success_threshold: success_threshold.unwrap_or(defaults.success_threshold),
                break_duration: break_duration_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.break_duration),
                half_open_max_calls: half_open_max_calls
                    .unwrap_or(defaults.half_open_max_calls),
            }))
        }
        RawPolicy::Timeout { timeout_ms } => {
            Ok(PolicyDescriptor::Timeout(TimeoutConfig::new(Duration::from_millis(timeout_ms))))
        }
        RawPolicy::Fallback { value } => Ok(PolicyDescriptor::Fallback(FallbackConfig { value })),
        RawPolicy::Bulkhead { max_concurrent, max_queue, acquire_timeout_ms } => {
            let defaults = BulkheadConfig::default();
            Ok(PolicyDescriptor::Bulkhead(BulkheadConfig {
                max_concurrent: max_concurrent.unwrap_or(defaults.max_concurrent),
                max_queue: max_queue.unwrap_or(defaults.max_queue),
                acquire_timeout: acquire_timeout_ms
                    .map(Duration::from_millis)
                    .or(defaults.acquire_timeout),
            }))
        }
    }
}

/// Live-reloadable settings handle
///
/// The owner calls [`ConfigHandle::update`] when new configuration arrives;
/// handlers hold a receiver from [`ConfigHandle::subscribe`] and sample the
/// current settings at the start of each operation. In-flight operations
/// keep whatever they already derived.
#[derive(Debug)]
pub struct ConfigHandle {
    tx: watch::Sender<PipelineSettings>,
}

impl ConfigHandle {
    /// Create a handle publishing the given initial settings
    pub fn new(settings: PipelineSettings) -> Self {
        let (tx, _rx) = watch::channel(settings);
        Self { tx }
    }

    /// Subscribe to settings updates
    pub fn subscribe(&self) -> watch::Receiver<PipelineSettings> {
        self.tx.subscribe()
    }

    /// Publish new settings, applying to subsequent operations only
    pub fn update(&self, settings: PipelineSettings) {
        info!(?settings, "pipeline settings updated");
        self.tx.send_replace(settings);
    }

    /// The currently published settings
    pub fn current(&self) -> PipelineSettings {
        self.tx.borrow().clone()
    }
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self::new(PipelineSettings::default())
    }
}
