use anyhow::{Context, Result};

pub const ENV_MEMORY_BUDGET: &str = "MCULOAD_MEMORY_BUDGET";
pub const ENV_DEVICE_CMD: &str = "MCULOAD_DEVICE_CMD";

/// Device settings taken from the environment; command-line flags are applied
/// on top with [`DeviceConfig::with_flags`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceConfig {
    pub memory_budget: Option<u64>,
    pub device_cmd: Option<String>,
}

impl DeviceConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let memory_budget = match non_empty(ENV_MEMORY_BUDGET) {
            Some(raw) => Some(
                raw.trim()
                    .parse::<u64>()
                    .with_context(|| format!("{ENV_MEMORY_BUDGET}={raw:?} is not a byte count"))?,
            ),
            None => None,
        };
        Ok(Self {
            memory_budget,
            device_cmd: non_empty(ENV_DEVICE_CMD),
        })
    }

    #[must_use]
    pub fn with_flags(self, memory_budget: Option<u64>, device_cmd: Option<String>) -> Self {
        Self {
            memory_budget: memory_budget.or(self.memory_budget),
            device_cmd: device_cmd.or(self.device_cmd),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn reads_budget_and_device_command() {
        let cfg = DeviceConfig::from_lookup(lookup(&[
            (ENV_MEMORY_BUDGET, " 4096 "),
            (ENV_DEVICE_CMD, "mcuload-device-sim --capacity 4096"),
        ]))
        .unwrap();
        assert_eq!(cfg.memory_budget, Some(4096));
        assert_eq!(
            cfg.device_cmd.as_deref(),
            Some("mcuload-device-sim --capacity 4096")
        );
    }

    #[test]
    fn empty_values_count_as_unset() {
        let cfg =
            DeviceConfig::from_lookup(lookup(&[(ENV_MEMORY_BUDGET, ""), (ENV_DEVICE_CMD, "  ")]))
                .unwrap();
        assert_eq!(cfg, DeviceConfig::default());
    }

    #[test]
    fn bad_budget_is_an_error() {
        let err = DeviceConfig::from_lookup(lookup(&[(ENV_MEMORY_BUDGET, "lots")])).unwrap_err();
        assert!(format!("{err:#}").contains(ENV_MEMORY_BUDGET));
    }

    #[test]
    fn flags_win_over_environment() {
        let env = DeviceConfig {
            memory_budget: Some(10),
            device_cmd: Some("a".to_string()),
        };
        let cfg = env.with_flags(Some(20), None);
        assert_eq!(cfg.memory_budget, Some(20));
        assert_eq!(cfg.device_cmd.as_deref(), Some("a"));
    }
}
