//! Process-wide configuration for patchwright.
//!
//! Read once at startup into an immutable [`Config`] and passed explicitly to
//! every component. Layered lowest to highest:
//! defaults → `patchwright.toml` → environment (`.env` honoured) → CLI flags.
//!
//! ```toml
//! [limits]
//! max_iterations = 6
//! max_context_chars = 60000
//! max_diff_chars = 200000
//! generation_timeout_secs = 300
//! max_concurrent_jobs = 1
//!
//! [preflight]
//! timeout_secs = 600
//! install = "npm ci"
//! typecheck = "npx tsc --noEmit"
//! test = "npm test"
//!
//! [generator]
//! kind = "command"
//! command = "claude"
//! args = ["--print"]
//!
//! [sandbox]
//! clone_timeout_secs = 300
//! failed_patch_dir = ".patchwright/failed-patches"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::preflight::{PreflightPlan, PreflightStage, PreflightStageConfig};
use crate::sandbox::url::is_valid_github_token;

/// Default config file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "patchwright.toml";

const ENV_PREFIX: &str = "PATCHWRIGHT_";

/// Iteration and size budgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_iterations: u32,
    pub max_context_chars: usize,
    pub max_diff_chars: usize,
    pub generation_timeout_secs: u64,
    pub max_concurrent_jobs: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_iterations: 6,
            max_context_chars: 60_000,
            max_diff_chars: 200_000,
            generation_timeout_secs: 300,
            max_concurrent_jobs: 1,
        }
    }
}

/// Externally supplied verification commands. An absent command skips its stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreflightSettings {
    pub timeout_secs: u64,
    pub repair_verify_timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typecheck: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smoke: Option<String>,
}

impl Default for PreflightSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 600,
            repair_verify_timeout_secs: 300,
            install: None,
            typecheck: None,
            lint: None,
            test: None,
            smoke: None,
        }
    }
}

impl PreflightSettings {
    pub fn command_for(&self, stage: PreflightStage) -> Option<&str> {
        let cmd = match stage {
            PreflightStage::Install => &self.install,
            PreflightStage::Typecheck => &self.typecheck,
            PreflightStage::Lint => &self.lint,
            PreflightStage::Test => &self.test,
            PreflightStage::Smoke => &self.smoke,
        };
        cmd.as_deref()
    }

    fn slot_mut(&mut self, stage: PreflightStage) -> &mut Option<String> {
        match stage {
            PreflightStage::Install => &mut self.install,
            PreflightStage::Typecheck => &mut self.typecheck,
            PreflightStage::Lint => &mut self.lint,
            PreflightStage::Test => &mut self.test,
            PreflightStage::Smoke => &mut self.smoke,
        }
    }
}

/// Which generation backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorKind {
    /// Pipe the prompt to a local CLI and read the diff from stdout.
    #[default]
    Command,
    /// OpenAI-compatible chat completions endpoint.
    Http,
}

impl std::str::FromStr for GeneratorKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "command" | "cli" => Ok(GeneratorKind::Command),
            "http" | "openai" => Ok(GeneratorKind::Http),
            _ => bail!("Invalid generator kind '{}'. Valid values: command, http", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub kind: GeneratorKind,
    pub command: String,
    pub args: Vec<String>,
    pub endpoint: String,
    pub model: String,
    /// Name of the env var holding the HTTP API key (never the key itself).
    pub api_key_env: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            kind: GeneratorKind::Command,
            command: "claude".to_string(),
            args: vec!["--print".to_string()],
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4.1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Parent directory for sandboxes; system temp dir when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,
    pub clone_timeout_secs: u64,
    pub failed_patch_dir: PathBuf,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            work_dir: None,
            clone_timeout_secs: 300,
            failed_patch_dir: PathBuf::from(".patchwright/failed-patches"),
        }
    }
}

/// Raw `patchwright.toml`. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub limits: Option<LimitsConfig>,
    #[serde(default)]
    pub preflight: Option<PreflightSettings>,
    #[serde(default)]
    pub generator: Option<GeneratorConfig>,
    #[serde(default)]
    pub sandbox: Option<SandboxConfig>,
}

impl ConfigFile {
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse patchwright config")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }
}

/// Resolved, immutable configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Config {
    pub limits: LimitsConfig,
    pub preflight: PreflightSettings,
    pub generator: GeneratorConfig,
    pub sandbox: SandboxConfig,
    #[serde(skip)]
    github_token: Option<String>,
}

impl Config {
    /// Load from `explicit` (must exist) or `./patchwright.toml` (optional),
    /// then apply the process environment.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let file = match explicit {
            Some(path) => Some(ConfigFile::load(path)?),
            None => {
                let default_path = Path::new(CONFIG_FILE_NAME);
                if default_path.exists() {
                    Some(ConfigFile::load(default_path)?)
                } else {
                    None
                }
            }
        };

        Self::resolve(file, |key| std::env::var(key).ok())
    }

    /// Merge a parsed file with an environment lookup. Empty values count as unset.
    pub fn resolve<F>(file: Option<ConfigFile>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| env(key).filter(|v| !v.trim().is_empty());
        let prefixed = |suffix: &str| lookup(&format!("{ENV_PREFIX}{suffix}"));

        let file = file.unwrap_or_default();
        let mut config = Config {
            limits: file.limits.unwrap_or_default(),
            preflight: file.preflight.unwrap_or_default(),
            generator: file.generator.unwrap_or_default(),
            sandbox: file.sandbox.unwrap_or_default(),
            github_token: None,
        };

        if let Some(v) = prefixed("MAX_ITERATIONS") {
            config.limits.max_iterations = parse_num("MAX_ITERATIONS", &v)?;
        }
        if let Some(v) = prefixed("MAX_CONTEXT_CHARS") {
            config.limits.max_context_chars = parse_num("MAX_CONTEXT_CHARS", &v)?;
        }
        if let Some(v) = prefixed("MAX_DIFF_CHARS") {
            config.limits.max_diff_chars = parse_num("MAX_DIFF_CHARS", &v)?;
        }
        if let Some(v) = prefixed("GENERATION_TIMEOUT_SECS") {
            config.limits.generation_timeout_secs = parse_num("GENERATION_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = prefixed("MAX_CONCURRENT_JOBS") {
            config.limits.max_concurrent_jobs = parse_num("MAX_CONCURRENT_JOBS", &v)?;
        }
        if let Some(v) = prefixed("PREFLIGHT_TIMEOUT_SECS") {
            config.preflight.timeout_secs = parse_num("PREFLIGHT_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = prefixed("REPAIR_VERIFY_TIMEOUT_SECS") {
            config.preflight.repair_verify_timeout_secs =
                parse_num("REPAIR_VERIFY_TIMEOUT_SECS", &v)?;
        }
        for stage in PreflightStage::ALL {
            let slot = config.preflight.slot_mut(stage);
            if slot.as_deref().is_some_and(|cmd| cmd.trim().is_empty()) {
                *slot = None;
            }
            let key = format!("PREFLIGHT_{}_CMD", stage.as_str().to_uppercase());
            if let Some(cmd) = prefixed(&key) {
                *config.preflight.slot_mut(stage) = Some(cmd);
            }
        }
        if let Some(v) = prefixed("GENERATOR") {
            config.generator.kind = v.parse()?;
        }
        if let Some(v) = prefixed("GENERATOR_CMD") {
            config.generator.command = v;
        }
        if let Some(v) = prefixed("GENERATOR_ENDPOINT") {
            config.generator.endpoint = v;
        }
        if let Some(v) = prefixed("GENERATOR_MODEL") {
            config.generator.model = v;
        }
        if let Some(v) = prefixed("WORK_DIR") {
            config.sandbox.work_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = prefixed("CLONE_TIMEOUT_SECS") {
            config.sandbox.clone_timeout_secs = parse_num("CLONE_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = prefixed("FAILED_PATCH_DIR") {
            config.sandbox.failed_patch_dir = PathBuf::from(v);
        }

        config.github_token = lookup("GITHUB_TOKEN").or_else(|| lookup("GH_TOKEN"));

        Ok(config)
    }

    pub fn with_max_iterations(mut self, n: u32) -> Self {
        self.limits.max_iterations = n;
        self
    }

    pub fn with_preflight_command(mut self, stage: PreflightStage, cmd: Option<String>) -> Self {
        *self.preflight.slot_mut(stage) = cmd;
        self
    }

    pub fn with_github_token(mut self, token: Option<String>) -> Self {
        self.github_token = token;
        self
    }

    pub fn github_token(&self) -> Option<&str> {
        self.github_token.as_deref()
    }

    /// The fixed-order preflight stage list with the shared timeout.
    pub fn preflight_plan(&self) -> PreflightPlan {
        let stages = PreflightStage::ALL
            .into_iter()
            .map(|stage| PreflightStageConfig {
                stage,
                command: self.preflight.command_for(stage).map(str::to_string),
            })
            .collect();
        PreflightPlan {
            stages,
            timeout: Duration::from_secs(self.preflight.timeout_secs),
        }
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.limits.generation_timeout_secs)
    }

    pub fn repair_verify_timeout(&self) -> Duration {
        Duration::from_secs(self.preflight.repair_verify_timeout_secs)
    }

    pub fn clone_timeout(&self) -> Duration {
        Duration::from_secs(self.sandbox.clone_timeout_secs)
    }

    /// Human-readable warnings; an empty list means the config is sane.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.limits.max_iterations == 0 {
            warnings.push("limits.max_iterations is 0: every job will fail immediately".into());
        }
        if self.limits.max_context_chars == 0 {
            warnings.push("limits.max_context_chars is 0: the generator sees no files".into());
        }
        if self.limits.max_diff_chars == 0 {
            warnings.push("limits.max_diff_chars is 0: every diff will be rejected".into());
        }
        if self.limits.max_concurrent_jobs == 0 {
            warnings.push("limits.max_concurrent_jobs is 0: treated as 1".into());
        }
        if self.preflight_plan().configured() == 0 {
            warnings.push("no preflight commands configured: patches are accepted unverified".into());
        }
        if let Some(token) = &self.github_token
            && !is_valid_github_token(token)
        {
            warnings.push("GITHUB_TOKEN does not look like a GitHub token".into());
        }
        warnings
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("{ENV_PREFIX}{key} must be a number, got '{}'", value))
}
