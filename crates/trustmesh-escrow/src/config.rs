//! Escrow engine configuration.
//!
//! Fixes the agent identity, the custody account the engine holds funds
//! in, the extension cap, and when release becomes permitted. Build one
//! explicitly or load it from environment variables.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use trustmesh_core::Address;

/// Default cap on a single deadline extension: seven days.
pub const DEFAULT_MAX_EXTENSION_SECS: u64 = 7 * 24 * 60 * 60;

/// When `release_funds` may pay the seller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseGate {
    /// As soon as a shipment is linked.
    #[default]
    Immediate,
    /// Only once the escrow's deadline has passed.
    AfterDeadline,
}

impl ReleaseGate {
    /// Return the canonical string name of this gate.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::AfterDeadline => "after_deadline",
        }
    }
}

impl FromStr for ReleaseGate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "immediate" => Ok(Self::Immediate),
            "after_deadline" => Ok(Self::AfterDeadline),
            other => Err(format!(
                "expected 'immediate' or 'after_deadline', got '{other}'"
            )),
        }
    }
}

/// Configuration for an [`EscrowEngine`](crate::EscrowEngine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// The arbiter authorized to extend, release, and refund.
    pub agent: Address,
    /// Ledger account holding escrowed funds.
    pub custody_account: Address,
    /// Upper bound on a single extension, in seconds.
    #[serde(default = "default_max_extension_secs")]
    pub max_extension_secs: u64,
    /// When release becomes permitted.
    #[serde(default)]
    pub release_gate: ReleaseGate,
}

fn default_max_extension_secs() -> u64 {
    DEFAULT_MAX_EXTENSION_SECS
}

impl EngineConfig {
    /// Configuration with default extension cap and immediate release.
    pub fn new(agent: Address, custody_account: Address) -> Self {
        Self {
            agent,
            custody_account,
            max_extension_secs: DEFAULT_MAX_EXTENSION_SECS,
            release_gate: ReleaseGate::Immediate,
        }
    }

    /// Override the extension cap.
    pub fn with_max_extension_secs(mut self, secs: u64) -> Self {
        self.max_extension_secs = secs;
        self
    }

    /// Override the release gate.
    pub fn with_release_gate(mut self, gate: ReleaseGate) -> Self {
        self.release_gate = gate;
        self
    }

    /// Load configuration from environment variables.
    ///
    /// Variables:
    /// - `TRUSTMESH_AGENT` (required)
    /// - `TRUSTMESH_CUSTODY_ACCOUNT` (required)
    /// - `TRUSTMESH_MAX_EXTENSION_SECS` (default: 604800)
    /// - `TRUSTMESH_RELEASE_GATE` (`immediate` or `after_deadline`, default: `immediate`)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let agent = required_address(&lookup, "TRUSTMESH_AGENT")?;
        let custody_account = required_address(&lookup, "TRUSTMESH_CUSTODY_ACCOUNT")?;

        let max_extension_secs = match lookup("TRUSTMESH_MAX_EXTENSION_SECS") {
            Some(raw) => raw.parse::<u64>().map_err(|_| ConfigError::Invalid {
                var: "TRUSTMESH_MAX_EXTENSION_SECS",
                reason: format!("expected whole seconds, got '{raw}'"),
            })?,
            None => DEFAULT_MAX_EXTENSION_SECS,
        };

        let release_gate = match lookup("TRUSTMESH_RELEASE_GATE") {
            Some(raw) => raw.parse::<ReleaseGate>().map_err(|reason| ConfigError::Invalid {
                var: "TRUSTMESH_RELEASE_GATE",
                reason,
            })?,
            None => ReleaseGate::default(),
        };

        let config = Self {
            agent,
            custody_account,
            max_extension_secs,
            release_gate,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Conflict`] if the agent is the custody
    /// account or the extension cap is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent == self.custody_account {
            return Err(ConfigError::Conflict(
                "agent and custody account must differ".to_string(),
            ));
        }
        if self.max_extension_secs == 0 {
            return Err(ConfigError::Conflict(
                "max_extension_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn required_address(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Address, ConfigError> {
    let raw = lookup(var).ok_or(ConfigError::Missing(var))?;
    Address::new(raw).map_err(|e| ConfigError::Invalid {
        var,
        reason: e.to_string(),
    })
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
    #[error("conflicting configuration: {0}")]
    Conflict(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup<'a>(
        vars: &'a HashMap<&'static str, &'static str>,
    ) -> impl Fn(&str) -> Option<String> + 'a {
        move |k| vars.get(k).map(|v| v.to_string())
    }

    #[test]
    fn defaults_apply_when_optional_vars_absent() {
        let vars = HashMap::from([
            ("TRUSTMESH_AGENT", "agent"),
            ("TRUSTMESH_CUSTODY_ACCOUNT", "escrow"),
        ]);
        let cfg = EngineConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(cfg.agent.as_str(), "agent");
        assert_eq!(cfg.max_extension_secs, 604_800);
        assert_eq!(cfg.release_gate, ReleaseGate::Immediate);
    }

    #[test]
    fn overrides_parse() {
        let vars = HashMap::from([
            ("TRUSTMESH_AGENT", "agent"),
            ("TRUSTMESH_CUSTODY_ACCOUNT", "escrow"),
            ("TRUSTMESH_MAX_EXTENSION_SECS", "3600"),
            ("TRUSTMESH_RELEASE_GATE", "after_deadline"),
        ]);
        let cfg = EngineConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(cfg.max_extension_secs, 3600);
        assert_eq!(cfg.release_gate, ReleaseGate::AfterDeadline);
    }

    #[test]
    fn missing_agent_rejected() {
        let vars = HashMap::from([("TRUSTMESH_CUSTODY_ACCOUNT", "escrow")]);
        let err = EngineConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("TRUSTMESH_AGENT")));
    }

    #[test]
    fn bad_values_rejected() {
        let vars = HashMap::from([
            ("TRUSTMESH_AGENT", "agent"),
            ("TRUSTMESH_CUSTODY_ACCOUNT", "escrow"),
            ("TRUSTMESH_RELEASE_GATE", "eventually"),
        ]);
        assert!(matches!(
            EngineConfig::from_lookup(lookup(&vars)),
            Err(ConfigError::Invalid { var: "TRUSTMESH_RELEASE_GATE", .. })
        ));

        let vars = HashMap::from([
            ("TRUSTMESH_AGENT", "agent"),
            ("TRUSTMESH_CUSTODY_ACCOUNT", "escrow"),
            ("TRUSTMESH_MAX_EXTENSION_SECS", "-5"),
        ]);
        assert!(EngineConfig::from_lookup(lookup(&vars)).is_err());
    }

    #[test]
    fn agent_cannot_be_custody_account() {
        let vars = HashMap::from([
            ("TRUSTMESH_AGENT", "same"),
            ("TRUSTMESH_CUSTODY_ACCOUNT", "same"),
        ]);
        assert!(matches!(
            EngineConfig::from_lookup(lookup(&vars)),
            Err(ConfigError::Conflict(_))
        ));
    }

    #[test]
    fn serde_defaults() {
        let cfg: EngineConfig =
            serde_json::from_str(r#"{"agent":"a","custody_account":"c"}"#).unwrap();
        assert_eq!(cfg, EngineConfig::new(Address::new("a").unwrap(), Address::new("c").unwrap()));
    }
}
