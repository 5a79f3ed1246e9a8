use serde::Deserialize;
use std::path::PathBuf;

use crate::sandbox::ResourceLimits;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub agent: AgentConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model: String,
    /// Base URL of the provider API.
    #[serde(default = "default_llm_host")]
    pub host: String,
    /// Supports ${ENV_VAR} substitution. Unused by local providers.
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OrchestratorConfig {
    /// Skills whose execution is gated behind human approval.
    #[serde(default = "default_privileged_skills")]
    pub privileged_skills: Vec<String>,
    /// How long shutdown waits for executing actions to finish.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SandboxConfig {
    /// Where per-instance OCI bundles are materialized.
    #[serde(default = "default_sandbox_root")]
    pub root_dir: PathBuf,
    /// State root passed to the runtime control binary (`--root`).
    #[serde(default = "default_runtime_root")]
    pub runtime_root: PathBuf,
    /// Directory holding skill payloads, one subdirectory per skill id.
    #[serde(default = "default_skills_dir")]
    pub skills_dir: PathBuf,
    /// Hard cap on concurrently tracked instances.
    #[serde(default = "default_max_instances")]
    pub max_instances: usize,
    /// Wall-clock deadline for a single exec.
    #[serde(default = "default_exec_timeout")]
    pub exec_timeout_secs: u64,
    /// Grace window between TERM and KILL on non-forced stop.
    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u64,
    #[serde(default)]
    pub limits: ResourceLimits,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClassifierConfig {
    /// Inputs longer than this are flagged as a structural anomaly.
    #[serde(default = "default_max_input_len")]
    pub max_input_len: usize,
    /// Requests allowed per caller key per window.
    #[serde(default = "default_rate_limit_max")]
    pub rate_limit_max: u32,
    #[serde(default = "default_rate_limit_window")]
    pub rate_limit_window_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuditConfig {
    /// Optional JSONL file sink. Write failures are logged, never fatal.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_llm_host() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_privileged_skills() -> Vec<String> {
    vec!["filesystem".to_string(), "system".to_string()]
}

fn default_shutdown_grace() -> u64 {
    2
}

fn default_sandbox_root() -> PathBuf {
    PathBuf::from("/tmp/warden-sandboxes")
}

fn default_runtime_root() -> PathBuf {
    PathBuf::from("/var/run/warden")
}

fn default_skills_dir() -> PathBuf {
    PathBuf::from("./skills")
}

fn default_max_instances() -> usize {
    10
}

fn default_exec_timeout() -> u64 {
    30
}

fn default_stop_grace() -> u64 {
    2
}

fn default_max_input_len() -> usize {
    10_000
}

fn default_rate_limit_max() -> u32 {
    60
}

fn default_rate_limit_window() -> u64 {
    60
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            privileged_skills: default_privileged_skills(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            root_dir: default_sandbox_root(),
            runtime_root: default_runtime_root(),
            skills_dir: default_skills_dir(),
            max_instances: default_max_instances(),
            exec_timeout_secs: default_exec_timeout(),
            stop_grace_secs: default_stop_grace(),
            limits: ResourceLimits::default(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            max_input_len: default_max_input_len(),
            rate_limit_max: default_rate_limit_max(),
            rate_limit_window_secs: default_rate_limit_window(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parses TOML content after expanding ${ENV_VAR} references.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let expanded = shellexpand::env(content)?;
        let config: Config = toml::from_str(&expanded)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [agent]
        name = "Test Warden"

        [llm]
        model = "llama3.2:3b"
    "#;

    #[test]
    fn test_parse_minimal_config_applies_defaults() {
        let config = Config::parse(MINIMAL).unwrap();
        assert_eq!(config.agent.name, "Test Warden");
        assert_eq!(config.llm.provider, "ollama");
        assert_eq!(config.llm.host, "http://127.0.0.1:11434");
        assert_eq!(config.sandbox.max_instances, 10);
        assert_eq!(config.sandbox.exec_timeout_secs, 30);
        assert_eq!(config.classifier.rate_limit_max, 60);
        assert!(config.audit.file.is_none());
    }

    #[test]
    fn test_default_privileged_skills() {
        let config = Config::parse(MINIMAL).unwrap();
        assert!(config
            .orchestrator
            .privileged_skills
            .contains(&"filesystem".to_string()));
        assert!(config
            .orchestrator
            .privileged_skills
            .contains(&"system".to_string()));
    }

    #[test]
    fn test_default_limits_disable_network() {
        let config = Config::parse(MINIMAL).unwrap();
        assert!(!config.sandbox.limits.network_enabled);
        assert_eq!(config.sandbox.limits.memory_mb, 512);
    }

    #[test]
    fn test_parse_overrides() {
        let content = r#"
            [agent]
            name = "W"

            [llm]
            provider = "ollama"
            model = "m"

            [sandbox]
            max_instances = 3
            exec_timeout_secs = 5

            [sandbox.limits]
            cpu_cores = 0.5
            memory_mb = 128
            network_enabled = true

            [orchestrator]
            privileged_skills = ["shell"]

            [audit]
            file = "/tmp/warden-audit.jsonl"
        "#;
        let config = Config::parse(content).unwrap();
        assert_eq!(config.sandbox.max_instances, 3);
        assert_eq!(config.sandbox.limits.memory_mb, 128);
        assert!(config.sandbox.limits.network_enabled);
        assert_eq!(config.orchestrator.privileged_skills, vec!["shell"]);
        assert!(config.audit.file.is_some());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("WARDEN_TEST_MODEL", "phi3:mini");
        let content = r#"
            [agent]
            name = "W"

            [llm]
            model = "${WARDEN_TEST_MODEL}"
        "#;
        let config = Config::parse(content).unwrap();
        assert_eq!(config.llm.model, "phi3:mini");
    }

    #[test]
    fn test_missing_required_section_fails() {
        assert!(Config::parse("[agent]\nname = \"W\"").is_err());
    }
}
