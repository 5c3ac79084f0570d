//! Adapter configuration: JSON I/O and the read-once key/value store.
//!
//! Configuration is consumed exactly once at adapter creation. The store is
//! treated as read-only input; nothing here writes it back.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::constants::{ETHERNET_MTU, MAXIMUM_MTU, MINIMUM_MTU};
use crate::error::{TapError, TapResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Stable instance identifier (GUID-like). Generated when empty.
    #[serde(default)]
    pub instance_id: String,
    #[serde(default = "default_mtu")]
    pub mtu: usize,
    /// Report the media as connected even with no open device handle.
    #[serde(default)]
    pub media_always_connected: bool,
    /// MAC address override, "xx:xx:xx:xx:xx:xx". Random when absent.
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub allow_non_admin: bool,
}

fn default_mtu() -> usize {
    ETHERNET_MTU
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            instance_id: String::new(),
            mtu: ETHERNET_MTU,
            media_always_connected: false,
            mac: None,
            allow_non_admin: false,
        }
    }
}

impl AdapterConfig {
    /// Build from a key/value store, defaulting anything absent or
    /// unparsable. Key names match the historical registry parameters.
    pub fn from_store(store: &HashMap<String, String>) -> Self {
        let mut config = Self::default();

        if let Some(id) = store.get("NetCfgInstanceId") {
            config.instance_id = id.clone();
        }
        if let Some(mtu) = store.get("MTU").and_then(|v| v.parse::<usize>().ok()) {
            config.mtu = mtu;
        }
        if let Some(v) = store.get("MediaStatus").and_then(|v| v.parse::<u32>().ok()) {
            config.media_always_connected = v != 0;
        }
        if let Some(mac) = store.get("MAC") {
            config.mac = Some(mac.clone());
        }
        if let Some(v) = store
            .get("AllowNonAdmin")
            .and_then(|v| v.parse::<u32>().ok())
        {
            config.allow_non_admin = v != 0;
        }

        config.normalize();
        config
    }

    pub fn from_json(json: &str) -> TapResult<Self> {
        let mut config: Self = serde_json::from_str(json)
            .map_err(|e| TapError::InvalidParameter(format!("config json: {e}")))?;
        config.normalize();
        Ok(config)
    }

    /// Clamp the MTU into the supported range.
    pub fn normalize(&mut self) {
        self.mtu = self.mtu.clamp(MINIMUM_MTU, MAXIMUM_MTU);
    }
}
