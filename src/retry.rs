use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::config::RetrySettings;
use crate::error::{PrDraftError, is_transient_reqwest};

type ShouldRetry<E> = Arc<dyn Fn(&E, u32) -> bool + Send + Sync>;
type OnRetry<E> = Arc<dyn Fn(&E, u32, Duration) + Send + Sync>;

/// How a failing operation is re-invoked.
///
/// `max_attempts` counts total tries, so 3 means at most two waits. The delay
/// before retry `n` (1-based failed attempt) is
/// `min(max_delay, initial_delay * backoff_multiplier^(n-1))`, scaled by a
/// random factor drawn from `jitter`.
pub struct RetryPolicy<E> {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Multiplicative jitter bounds, inclusive. Default `(0.9, 1.1)`.
    pub jitter: (f64, f64),
    should_retry: Option<ShouldRetry<E>>,
    on_retry: Option<OnRetry<E>>,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            backoff_multiplier: self.backoff_multiplier,
            jitter: self.jitter,
            should_retry: self.should_retry.clone(),
            on_retry: self.on_retry.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("jitter", &self.jitter)
            .field("should_retry", &self.should_retry.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl<E> Default for RetryPolicy<E> {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: (0.9, 1.1),
            should_retry: None,
            on_retry: None,
        }
    }
}

impl<E> RetryPolicy<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            backoff_multiplier: settings.backoff_multiplier,
            ..Self::default()
        }
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    pub fn initial_delay(mut self, d: Duration) -> Self {
        self.initial_delay = d;
        self
    }

    pub fn max_delay(mut self, d: Duration) -> Self {
        self.max_delay = d;
        self
    }

    pub fn backoff_multiplier(mut self, m: f64) -> Self {
        self.backoff_multiplier = m;
        self
    }

    pub fn jitter(mut self, low: f64, high: f64) -> Self {
        self.jitter = (low, high);
        self
    }

    /// Disable jitter entirely (factor fixed at 1.0).
    pub fn without_jitter(self) -> Self {
        self.jitter(1.0, 1.0)
    }

    pub fn should_retry(mut self, f: impl Fn(&E, u32) -> bool + Send + Sync + 'static) -> Self {
        self.should_retry = Some(Arc::new(f));
        self
    }

    pub fn on_retry(mut self, f: impl Fn(&E, u32, Duration) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(f));
        self
    }

    /// Nominal delay after failed attempt `attempt` (1-based), before jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.backoff_multiplier.max(0.0).powi(exp);
        let nominal = self.initial_delay.as_nanos() as f64 * factor;
        if !nominal.is_finite() || nominal >= self.max_delay.as_nanos() as f64 {
            self.max_delay
        } else {
            Duration::from_nanos(nominal.round() as u64)
        }
    }

    /// Base delay scaled by a jitter factor drawn from the policy's range.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let (low, high) = self.jitter;
        let factor = if high > low {
            rand::rng().random_range(low..=high)
        } else {
            low
        };
        let nanos = self.base_delay(attempt).as_nanos() as f64 * factor.max(0.0);
        Duration::from_nanos(nanos.round() as u64)
    }

    fn wants_retry(&self, error: &E, attempt: u32) -> bool {
        self.should_retry.as_ref().is_none_or(|f| f(error, attempt))
    }
}

/// Run `operation` until it succeeds or the policy gives up.
///
/// On final failure the error from the last attempt is returned as-is.
/// `should_retry` is consulted before the attempt budget, so a `false` there
/// returns immediately even when attempts remain.
pub async fn retry<F, Fut, T, E>(mut operation: F, policy: &RetryPolicy<E>) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt: u32 = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !policy.wants_retry(&error, attempt) || attempt >= max_attempts {
                    return Err(error);
                }
                let delay = policy.jittered_delay(attempt);
                if let Some(hook) = &policy.on_retry {
                    hook(&error, attempt, delay);
                }
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// A named retry wrapper that can be applied to any async call.
///
/// Each retry is logged as one line naming the operation, on top of the
/// policy's own `on_retry` hook.
pub struct WithRetry<E> {
    name: String,
    policy: RetryPolicy<E>,
}

/// Wrap calls named `name` with `policy`.
pub fn with_retry<E>(name: impl Into<String>, policy: RetryPolicy<E>) -> WithRetry<E>
where
    E: fmt::Display + 'static,
{
    let name = name.into();
    let user_hook = policy.on_retry.clone();
    let log_name = name.clone();
    let policy = policy.on_retry(move |error: &E, attempt, delay| {
        tracing::warn!(
            operation = %log_name,
            attempt = attempt,
            delay_ms = delay.as_millis() as u64,
            "{log_name} failed (attempt {attempt}), retrying: {error}"
        );
        if let Some(hook) = &user_hook {
            hook(error, attempt, delay);
        }
    });
    WithRetry { name, policy }
}

impl<E> WithRetry<E> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn run<F, Fut, T>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        retry(operation, &self.policy).await
    }
}

/// Whether an error is worth retrying: transport failures (reset, timeout,
/// DNS) and HTTP 429/5xx are; other 4xx and unrecognized errors are not.
///
/// The error and its `source()` chain are checked for known error types.
pub fn is_retryable_error(error: &(dyn StdError + 'static)) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(error);
    while let Some(e) = current {
        if let Some(e) = e.downcast_ref::<PrDraftError>() {
            return e.is_retryable();
        }
        if let Some(e) = e.downcast_ref::<reqwest::Error>() {
            return is_transient_reqwest(e);
        }
        if let Some(e) = e.downcast_ref::<std::io::Error>() {
            return is_transient_io(e);
        }
        current = e.source();
    }
    false
}

fn is_transient_io(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        e.kind(),
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionRefused
            | ErrorKind::BrokenPipe
            | ErrorKind::TimedOut
            | ErrorKind::UnexpectedEof
            | ErrorKind::NotConnected
    )
}
