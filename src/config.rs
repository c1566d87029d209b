use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::types::StreamTarget;

/// What a worker does with a log source failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Deliver an `ErrorNotification` to the subscriber, then stop.
    #[default]
    Reporting,
    /// Stop without telling the subscriber anything.
    Silent,
}

pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// Settings shared by every worker a host creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub error_policy: ErrorPolicy,
    /// Bound on queued commands and source events per worker.
    pub mailbox_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            error_policy: ErrorPolicy::default(),
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
        }
    }
}

impl WorkerConfig {
    pub fn with_error_policy(mut self, error_policy: ErrorPolicy) -> Self {
        self.error_policy = error_policy;
        self
    }
}

/// Parameters passed to the Kubernetes log endpoint. `follow` is always on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub tail_lines: Option<i64>,
    pub since_seconds: Option<i64>,
    pub timestamps: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TargetConfig {
    pub pod: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub container: Option<String>,
}

impl TargetConfig {
    pub fn to_target(&self) -> StreamTarget {
        StreamTarget {
            pod_name: self.pod.clone(),
            container_name: self.container.clone(),
            pod_namespace: self.namespace.clone(),
        }
    }
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_mailbox_capacity() -> usize {
    DEFAULT_MAILBOX_CAPACITY
}

/// Top-level configuration for the spooler binary.
#[derive(Debug, Clone, Deserialize)]
pub struct SpoolConfig {
    /// Kubeconfig context; the current context when absent.
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub error_policy: ErrorPolicy,
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

impl SpoolConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: SpoolConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mailbox_capacity == 0 {
            return Err(ConfigError::Invalid(
                "mailbox_capacity must be greater than zero".to_string(),
            ));
        }
        if let Some(tail) = self.source.tail_lines
            && tail < 0
        {
            return Err(ConfigError::Invalid(format!(
                "source.tail_lines must not be negative (got {})",
                tail
            )));
        }
        if let Some(since) = self.source.since_seconds
            && since < 0
        {
            return Err(ConfigError::Invalid(format!(
                "source.since_seconds must not be negative (got {})",
                since
            )));
        }
        for (idx, target) in self.targets.iter().enumerate() {
            target.to_target().validate().map_err(|e| {
                ConfigError::Invalid(format!("targets[{}]: {}", idx, e))
            })?;
        }
        Ok(())
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            error_policy: self.error_policy,
            mailbox_capacity: self.mailbox_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_defaults() {
        let config = SpoolConfig::from_yaml_str("targets:\n  - pod: web-1\n").unwrap();
        assert_eq!(config.error_policy, ErrorPolicy::Reporting);
        assert_eq!(config.mailbox_capacity, DEFAULT_MAILBOX_CAPACITY);
        assert_eq!(config.log_level, "info");
        assert!(config.context.is_none());
        assert_eq!(config.source, SourceConfig::default());
        assert_eq!(
            config.targets[0].to_target(),
            StreamTarget::new("web-1", "default")
        );
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
context: staging
log_level: debug
error_policy: silent
mailbox_capacity: 16
source:
  tail_lines: 100
  timestamps: true
targets:
  - pod: web-1
    namespace: shop
    container: nginx
"#;
        let config = SpoolConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.context.as_deref(), Some("staging"));
        assert_eq!(config.error_policy, ErrorPolicy::Silent);
        assert_eq!(config.source.tail_lines, Some(100));
        assert!(config.source.timestamps);
        assert_eq!(
            config.worker_config(),
            WorkerConfig {
                error_policy: ErrorPolicy::Silent,
                mailbox_capacity: 16,
            }
        );
        assert_eq!(
            config.targets[0].to_target(),
            StreamTarget::new("web-1", "shop").with_container("nginx")
        );
    }

    #[test]
    fn test_rejects_zero_mailbox() {
        let err = SpoolConfig::from_yaml_str("mailbox_capacity: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_negative_since_seconds() {
        let err = SpoolConfig::from_yaml_str("source:\n  since_seconds: -30\n").unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("since_seconds")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_rejects_empty_pod() {
        let err = SpoolConfig::from_yaml_str("targets:\n  - pod: \"\"\n").unwrap_err();
        assert!(err.to_string().contains("targets[0]"));
    }

    #[test]
    fn test_rejects_unknown_policy() {
        let err = SpoolConfig::from_yaml_str("error_policy: loud\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
