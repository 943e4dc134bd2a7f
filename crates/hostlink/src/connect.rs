//! Connection management with a retry/timeout policy
//!
//! Freshly provisioned hosts refuse connections, drop handshakes and reject
//! keys for a while after boot. [`ConnectionManager`] keeps trying through
//! those failures until the attempt cap or the deadline is hit, and gives up
//! immediately on anything that retrying cannot fix.

use crate::error::LinkError;
use crate::session::LinkSession;
use crate::Outcome;
use hostlink_ssh::{
    duration_secs, ConnectOptions, Connector, KeyMaterial, TransportError, TransportErrorKind, TransportHandle,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default number of connect attempts
pub const DEFAULT_MAX_ATTEMPTS: u32 = 200;

/// Default wall-clock budget for connecting
pub const DEFAULT_CONNECT_DEADLINE: Duration = Duration::from_secs(60);

/// Retry policy for connecting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of connect attempts; must be at least 1
    pub max_attempts: u32,
    /// Give up once this much time has passed since the first attempt
    #[serde(with = "duration_secs", rename = "timeout_seconds")]
    pub timeout: Duration,
    /// Delay after the first failed attempt
    #[serde(with = "duration_secs", rename = "initial_backoff_seconds")]
    pub initial_backoff: Duration,
    /// Upper bound for the delay between attempts
    #[serde(with = "duration_secs", rename = "max_backoff_seconds")]
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            timeout: DEFAULT_CONNECT_DEADLINE,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Policy with the given attempt cap and deadline and the default backoff
    pub fn new(max_attempts: u32, timeout: Duration) -> Self {
        Self {
            max_attempts,
            timeout,
            ..Default::default()
        }
    }

    /// Set the backoff window
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Check the policy before connecting
    pub fn validate(&self) -> Result<(), LinkError> {
        if self.max_attempts == 0 {
            return Err(LinkError::Configuration("max_attempts must be at least 1".to_string()));
        }
        if self.initial_backoff > self.max_backoff {
            return Err(LinkError::Configuration(format!(
                "initial backoff {:?} exceeds max backoff {:?}",
                self.initial_backoff, self.max_backoff
            )));
        }
        Ok(())
    }

    /// Delay after failed attempt number `attempt` (1-based).
    ///
    /// The window doubles per attempt up to `max_backoff`; the delay is drawn
    /// from the upper half of the window.
    pub fn backoff_delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        let window = self.initial_backoff.saturating_mul(factor).min(self.max_backoff);
        let upper = u64::try_from(window.as_nanos()).unwrap_or(u64::MAX);
        if upper == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(rng.gen_range(upper / 2..=upper))
    }
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectState {
    /// No connect attempted yet. Closing a session does not return the
    /// manager to this state.
    #[default]
    Disconnected,
    /// A connect is in progress
    Connecting,
    /// The last connect produced a session
    Connected,
    /// The last connect gave up
    Failed,
}

/// Opens [`LinkSession`]s, retrying transient failures
pub struct ConnectionManager {
    /// Transport backend
    connector: Box<dyn Connector>,
    /// Options used by [`ConnectionManager::connect_host`]
    defaults: ConnectOptions,
    /// Policy used by [`ConnectionManager::connect_host`]
    policy: RetryPolicy,
    /// Loaded keys by path
    keys: HashMap<PathBuf, Arc<KeyMaterial>>,
    /// State of the last connect
    state: ConnectState,
}

impl ConnectionManager {
    /// Create a manager over `connector`
    pub fn new(connector: impl Connector + 'static) -> Self {
        Self {
            connector: Box::new(connector),
            defaults: ConnectOptions::default(),
            policy: RetryPolicy::default(),
            keys: HashMap::new(),
            state: ConnectState::Disconnected,
        }
    }

    /// Create a manager using the libssh2 transport
    #[cfg(feature = "ssh2")]
    #[cfg_attr(docsrs, doc(cfg(feature = "ssh2")))]
    pub fn ssh2() -> Self {
        Self::new(hostlink_ssh::Ssh2Connector::new())
    }

    /// Set the options used by [`ConnectionManager::connect_host`]
    pub fn with_defaults(mut self, options: ConnectOptions) -> Self {
        self.defaults = options;
        self
    }

    /// Set the policy used by [`ConnectionManager::connect_host`]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// State of the last connect
    pub fn state(&self) -> ConnectState {
        self.state
    }

    /// Default retry policy
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Load the key at `path`, reusing an earlier load of the same path
    pub fn load_key(&mut self, path: &Path) -> Outcome<Arc<KeyMaterial>> {
        if let Some(key) = self.keys.get(path) {
            return Outcome::Success(Arc::clone(key));
        }
        Outcome::attempt(|| KeyMaterial::load(path)).map(|key| {
            let key = Arc::new(key);
            self.keys.insert(path.to_path_buf(), Arc::clone(&key));
            key
        })
    }

    /// Connect to the default options' user and key at `host:port` with the
    /// default policy
    pub fn connect_host(&mut self, host: &str, port: u16) -> Outcome<LinkSession> {
        let options = self.defaults.clone().with_host(host, port);
        let policy = self.policy.clone();
        self.connect_with_policy(&options, &policy)
    }

    /// Connect with at most `max_attempts` attempts within `timeout`
    pub fn connect(&mut self, options: &ConnectOptions, max_attempts: u32, timeout: Duration) -> Outcome<LinkSession> {
        let policy = RetryPolicy {
            max_attempts,
            timeout,
            ..self.policy.clone()
        };
        self.connect_with_policy(options, &policy)
    }

    /// Close `session` and connect again with the same options, reusing its key
    pub fn reconnect(&mut self, session: LinkSession) -> Outcome<LinkSession> {
        let options = session.options().clone();
        self.keys
            .entry(options.private_key_path.clone())
            .or_insert_with(|| Arc::clone(session.key()));
        if let Outcome::Failure(err) = session.close() {
            warn!("Error closing session before reconnect: {}", err);
        }
        let policy = self.policy.clone();
        self.connect_with_policy(&options, &policy)
    }

    /// Connect with an explicit policy
    pub fn connect_with_policy(&mut self, options: &ConnectOptions, policy: &RetryPolicy) -> Outcome<LinkSession> {
        let outcome = Outcome::<(), LinkError>::from(policy.validate())
            .then(|| Outcome::attempt(|| options.validate()))
            .then(|| {
                info!(
                    "Connecting to {}@{}:{} (max {} attempts, {:?})",
                    options.username, options.hostname, options.port, policy.max_attempts, policy.timeout
                );
                self.state = ConnectState::Connecting;
                self.retry_loop(options, policy)
            });

        match &outcome {
            Outcome::Success(session) => {
                info!("Session {} connected to {}:{}", session.id(), options.hostname, options.port);
                self.state = ConnectState::Connected;
            }
            Outcome::Failure(err) => {
                warn!("Giving up on {}:{}: {}", options.hostname, options.port, err);
                self.state = ConnectState::Failed;
            }
        }
        outcome
    }

    fn retry_loop(&mut self, options: &ConnectOptions, policy: &RetryPolicy) -> Outcome<LinkSession> {
        let start = Instant::now();
        let mut rng = rand::thread_rng();
        let mut attempt: u32 = 1;

        loop {
            debug!("Connect attempt {} of {} to {}", attempt, policy.max_attempts, options.hostname);

            let key = match self.load_key(&options.private_key_path) {
                Outcome::Success(key) => key,
                Outcome::Failure(err) => return Outcome::Failure(err),
            };

            match self.attempt_once(options, &key) {
                Outcome::Success(Some(handle)) => {
                    return Outcome::Success(LinkSession::new(options.clone(), key, handle));
                }
                Outcome::Success(None) => {}
                Outcome::Failure(err) => return Outcome::Failure(LinkError::from(err)),
            }

            let elapsed = start.elapsed();
            if elapsed > policy.timeout {
                return Outcome::Failure(LinkError::ConnectTimeoutExceeded {
                    timeout: policy.timeout,
                    attempts: attempt,
                });
            }
            if attempt >= policy.max_attempts {
                return Outcome::Failure(LinkError::ConnectRetriesExceeded { attempts: attempt });
            }

            let delay = policy
                .backoff_delay(attempt, &mut rng)
                .min(policy.timeout.saturating_sub(elapsed));
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            attempt += 1;
        }
    }

    /// One transport connect. `Success(None)` is a retryable failure.
    fn attempt_once(
        &self,
        options: &ConnectOptions,
        key: &KeyMaterial,
    ) -> Outcome<Option<Box<dyn TransportHandle>>, TransportError> {
        TransportErrorKind::RETRYABLE.iter().fold(
            Outcome::from(self.connector.connect(options, key)).map(Some),
            |outcome, kind| outcome.catch_error(*kind, retry),
        )
    }
}

fn retry<T>(err: TransportError) -> Outcome<Option<T>, TransportError> {
    debug!("Retryable connect failure: {}", err);
    Outcome::Success(None)
}
