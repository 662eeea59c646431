use std::fmt;
use std::str::FromStr;

use crate::error::{DeviceError, Result};
use crate::plan::DEFAULT_CUTOFF;

/// Environment variable overriding [`EngineConfig::cutoff`].
pub const ENV_CUTOFF: &str = "ASYNC_MATH_CUTOFF";
/// Environment variable overriding [`EngineConfig::session_policy`].
pub const ENV_SESSION: &str = "ASYNC_MATH_SESSION";
/// Environment variable overriding [`EngineConfig::device_filter`].
pub const ENV_DEVICE: &str = "ASYNC_MATH_DEVICE";

/// Largest accepted cutoff; reduction depths beyond this are meaningless for
/// any buffer a device can hold.
pub const MAX_CUTOFF: u32 = 32;

/// What happens to the device session once a multiplication finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPolicy {
    /// Keep the compiled session for later calls.
    #[default]
    Persistent,
    /// Release the session after every call, recompiling on the next one.
    PerCall,
}

impl fmt::Display for SessionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPolicy::Persistent => write!(f, "persistent"),
            SessionPolicy::PerCall => write!(f, "per-call"),
        }
    }
}

impl FromStr for SessionPolicy {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "persistent" => Ok(SessionPolicy::Persistent),
            "per-call" | "per_call" | "percall" => Ok(SessionPolicy::PerCall),
            other => Err(DeviceError::InvalidConfig(format!(
                "unknown session policy '{}'",
                other
            ))),
        }
    }
}

/// Tuning and lifecycle options for a `MatmulEngine`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// log2 of the live-layer count below which the tree reduction stops.
    pub cutoff: u32,
    /// Session reuse across calls.
    pub session_policy: SessionPolicy,
    /// Restrict device selection to names containing this substring.
    pub device_filter: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cutoff: DEFAULT_CUTOFF,
            session_policy: SessionPolicy::default(),
            device_filter: None,
        }
    }
}

impl EngineConfig {
    /// Builder-style cutoff override.
    pub fn with_cutoff(mut self, cutoff: u32) -> Self {
        self.cutoff = cutoff;
        self
    }

    /// Builder-style session policy override.
    pub fn with_session_policy(mut self, policy: SessionPolicy) -> Self {
        self.session_policy = policy;
        self
    }

    /// Builder-style device filter.
    pub fn with_device_filter(mut self, filter: impl Into<String>) -> Self {
        self.device_filter = Some(filter.into());
        self
    }

    /// Defaults, overridden by `ASYNC_MATH_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults, overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = EngineConfig::default();
        if let Some(raw) = lookup(ENV_CUTOFF) {
            config.cutoff = raw.trim().parse().map_err(|_| {
                DeviceError::InvalidConfig(format!("{}='{}' is not an integer", ENV_CUTOFF, raw))
            })?;
        }
        if let Some(raw) = lookup(ENV_SESSION) {
            config.session_policy = raw.parse()?;
        }
        if let Some(raw) = lookup(ENV_DEVICE) {
            if !raw.trim().is_empty() {
                config.device_filter = Some(raw.trim().to_string());
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Checks that the options are usable.
    pub fn validate(&self) -> Result<()> {
        if self.cutoff == 0 || self.cutoff > MAX_CUTOFF {
            return Err(DeviceError::InvalidConfig(format!(
                "cutoff must be in 1..={}, got {}",
                MAX_CUTOFF, self.cutoff
            )));
        }
        Ok(())
    }
}
