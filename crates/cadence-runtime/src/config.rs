//! Runtime configuration

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use cadence_core::{CadenceError, CadenceResult};
use cadence_transport::{DEFAULT_INBOX_CAPACITY, DEFAULT_OUTBOUND_CAPACITY};

use crate::ChannelFilter;

/// Default limit on semi-naive passes per stratum
pub const DEFAULT_MAX_FIXPOINT_PASSES: usize = 10_000;

/// Runtime configuration
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Address the instance binds; port 0 picks a free port
    pub bind_addr: SocketAddr,
    /// Inbox capacity, in frames
    pub max_inbound: usize,
    /// Outbound queue capacity, in datagrams
    pub max_outbound: usize,
    pub max_fixpoint_passes: usize,
    /// Periodic tick for background instances, e.g. `"50ms"`
    #[serde(deserialize_with = "deserialize_interval")]
    pub tick_interval: Option<Duration>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            max_inbound: DEFAULT_INBOX_CAPACITY,
            max_outbound: DEFAULT_OUTBOUND_CAPACITY,
            max_fixpoint_passes: DEFAULT_MAX_FIXPOINT_PASSES,
            tick_interval: None,
        }
    }
}

impl RuntimeConfig {
    pub fn from_json(json: &str) -> CadenceResult<Self> {
        let config: RuntimeConfig =
            serde_json::from_str(json).map_err(|e| CadenceError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CadenceResult<()> {
        if self.max_fixpoint_passes == 0 {
            return Err(CadenceError::ConfigError(
                "max_fixpoint_passes must be at least 1".into(),
            ));
        }
        if self.max_inbound == 0 || self.max_outbound == 0 {
            return Err(CadenceError::ConfigError(
                "queue capacities must be at least 1".into(),
            ));
        }
        if self.tick_interval == Some(Duration::ZERO) {
            return Err(CadenceError::ConfigError("tick_interval must be positive".into()));
        }
        Ok(())
    }

    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = Some(interval);
        self
    }

    pub fn with_max_fixpoint_passes(mut self, passes: usize) -> Self {
        self.max_fixpoint_passes = passes;
        self
    }
}

fn deserialize_interval<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    raw.map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
        .transpose()
}

/// Options for binding an [`crate::Instance`]
#[derive(Clone, Default)]
pub struct InstanceOptions {
    pub config: RuntimeConfig,
    pub channel_filter: Option<ChannelFilter>,
}

impl InstanceOptions {
    pub fn new(config: RuntimeConfig) -> Self {
        InstanceOptions {
            config,
            channel_filter: None,
        }
    }

    pub fn with_channel_filter(mut self, filter: ChannelFilter) -> Self {
        self.channel_filter = Some(filter);
        self
    }
}

impl std::fmt::Debug for InstanceOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceOptions")
            .field("config", &self.config)
            .field("channel_filter", &self.channel_filter.is_some())
            .finish()
    }
}
