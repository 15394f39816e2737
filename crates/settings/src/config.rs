//! Configuration types

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use hopwire_core::ConfigError;
use hopwire_store::{names, Store, StoreExt};

use crate::Result;

/// Environment variable forcing the protocol used to reach destinations
pub const TARGET_PROTOCOL_ENV: &str = "HOPWIRE_TARGET_PROTOCOL";

/// Main configuration record (`config.json`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Dial timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Service contract URL. Adopted from the first imported accesskey when unset.
    #[serde(default)]
    pub contract: Option<String>,

    #[serde(default)]
    pub accesskey: AccesskeySettings,

    #[serde(default)]
    pub circuit: CircuitSettings,

    #[serde(default)]
    pub address: AddressSettings,

    /// Where to download accesskey bundles when the token set runs dry
    #[serde(default)]
    pub pof_url: Option<String>,

    #[serde(default)]
    pub tun: TunSettings,
}

fn default_timeout() -> u64 {
    5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            contract: None,
            accesskey: AccesskeySettings::default(),
            circuit: CircuitSettings::default(),
            address: AddressSettings::default(),
            pof_url: None,
            tun: TunSettings::default(),
        }
    }
}

/// Accesskey handling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccesskeySettings {
    /// Exchange proof tokens for credentials automatically when needed
    #[serde(default = "default_true")]
    pub use_on_demand: bool,
}

fn default_true() -> bool {
    true
}

impl Default for AccesskeySettings {
    fn default() -> Self {
        Self {
            use_on_demand: true,
        }
    }
}

/// Circuit shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitSettings {
    /// Number of relay hops
    #[serde(default = "default_hops")]
    pub hops: usize,

    /// Relay addresses to use exclusively. Empty or absent means all relays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whitelist: Option<Vec<String>>,
}

fn default_hops() -> usize {
    1
}

impl Default for CircuitSettings {
    fn default() -> Self {
        Self {
            hops: default_hops(),
            whitelist: None,
        }
    }
}

/// Local listening addresses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSettings {
    /// SOCKSv5 listening address
    #[serde(default)]
    pub socks: Option<String>,
    /// h2c listening address
    #[serde(default)]
    pub h2c: Option<String>,
    /// TUN device address (not loopback)
    #[serde(default)]
    pub tun: Option<String>,
}

impl Default for AddressSettings {
    fn default() -> Self {
        Self {
            socks: Some("127.0.0.1:13491".to_string()),
            h2c: Some("127.0.0.1:13492".to_string()),
            tun: Some("10.13.49.0:13493".to_string()),
        }
    }
}

/// Auxiliary tunneling helper
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunSettings {
    /// Helper executable; no helper is started when unset
    #[serde(default)]
    pub binary: Option<String>,
}

/// Value kind of a dotted configuration option
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    Str,
    Int,
    Bool,
    List,
}

/// Describes one settable option for external tooling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionMeta {
    pub name: &'static str,
    pub kind: OptionKind,
    pub description: &'static str,
}

const OPTIONS: &[OptionMeta] = &[
    OptionMeta { name: "timeout", kind: OptionKind::Int, description: "Dial timeout in seconds" },
    OptionMeta { name: "contract", kind: OptionKind::Str, description: "Service contract associated with accesskeys" },
    OptionMeta { name: "pof_url", kind: OptionKind::Str, description: "Accesskey bundle download URL" },
    OptionMeta { name: "address.socks", kind: OptionKind::Str, description: "SOCKS5 proxy address of the daemon" },
    OptionMeta { name: "address.h2c", kind: OptionKind::Str, description: "H2C proxy address of the daemon" },
    OptionMeta { name: "address.tun", kind: OptionKind::Str, description: "TUN device address (not loopback)" },
    OptionMeta { name: "circuit.hops", kind: OptionKind::Int, description: "Number of relay hops to use in a circuit" },
    OptionMeta { name: "circuit.whitelist", kind: OptionKind::List, description: "Whitelist of relays to use" },
    OptionMeta { name: "accesskey.use_on_demand", kind: OptionKind::Bool, description: "Activate accesskeys as needed" },
    OptionMeta { name: "tun.binary", kind: OptionKind::Str, description: "Auxiliary tunneling helper executable" },
];

impl Config {
    /// Load from the store; a missing config yields defaults
    pub fn load(store: &dyn Store) -> Result<Self> {
        match store.get::<Config>(names::CONFIG)? {
            Some(config) => {
                info!("Loaded settings from {}", names::CONFIG);
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn save(&self, store: &dyn Store) -> Result<()> {
        store.set(names::CONFIG, self)?;
        info!("Saved settings to {}", names::CONFIG);
        Ok(())
    }

    /// Check what the daemon needs before it can start
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.contract.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::MissingContract);
        }
        if self.address.socks.is_none() && self.address.h2c.is_none() {
            return Err(ConfigError::MissingListenAddress);
        }
        if self.circuit.hops == 0 {
            return Err(ConfigError::InvalidHops(self.circuit.hops));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "timeout".to_string(),
                reason: "must be at least 1 second".to_string(),
            });
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Configured whitelist, empty when unrestricted
    pub fn whitelist(&self) -> &[String] {
        self.circuit.whitelist.as_deref().unwrap_or(&[])
    }

    /// Whether switching to `other` changes how circuits are built
    pub fn circuit_changed(&self, other: &Config) -> bool {
        self.circuit.hops != other.circuit.hops
            || self.whitelist() != other.whitelist()
            || self.contract != other.contract
    }

    /// Protocol override from the environment, if set and non-empty
    pub fn target_protocol_override() -> Option<String> {
        std::env::var(TARGET_PROTOCOL_ENV)
            .ok()
            .filter(|p| !p.is_empty())
    }

    /// Settable options, by dotted name
    pub fn metadata() -> &'static [OptionMeta] {
        OPTIONS
    }

    /// Set a dotted option from its textual form.
    ///
    /// Lists are JSON arrays (`["tcp://a:1","tcp://b:2"]`); `null` clears
    /// optional values.
    pub fn set_option(&mut self, name: &str, raw: &str) -> std::result::Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidValue {
            key: name.to_string(),
            reason,
        };
        let opt_str = |raw: &str| -> Option<String> {
            match raw.trim() {
                "" | "null" => None,
                s => Some(s.trim_matches('"').to_string()),
            }
        };

        match name {
            "timeout" => {
                let secs: u64 = raw.trim().parse().map_err(|e| invalid(format!("{}", e)))?;
                if secs == 0 {
                    return Err(invalid("must be at least 1 second".to_string()));
                }
                self.timeout_secs = secs;
            }
            "contract" => self.contract = opt_str(raw),
            "pof_url" => self.pof_url = opt_str(raw),
            "address.socks" => self.address.socks = opt_str(raw),
            "address.h2c" => self.address.h2c = opt_str(raw),
            "address.tun" => self.address.tun = opt_str(raw),
            "tun.binary" => self.tun.binary = opt_str(raw),
            "circuit.hops" => {
                let hops: usize = raw.trim().parse().map_err(|e| invalid(format!("{}", e)))?;
                if hops == 0 {
                    return Err(ConfigError::InvalidHops(hops));
                }
                self.circuit.hops = hops;
            }
            "circuit.whitelist" => {
                self.circuit.whitelist =
                    serde_json::from_str(raw).map_err(|e| invalid(e.to_string()))?;
            }
            "accesskey.use_on_demand" => {
                self.accesskey.use_on_demand =
                    raw.trim().parse().map_err(|e| invalid(format!("{}", e)))?;
            }
            _ => return Err(invalid("unknown option".to_string())),
        }
        Ok(())
    }
}
