use crate::services::process::ProcessConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub terminal: TerminalConfig,

    #[serde(default)]
    pub layout: LayoutConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Defaults applied to every terminal process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalConfig {
    /// How long shutdown waits for a process before killing it
    #[serde(default = "default_exit_timeout")]
    pub exit_timeout_ms: u64,

    /// Program used when a launch does not name one
    #[serde(default = "default_program")]
    pub default_program: PathBuf,

    /// Environment overrides applied to every launch; a launch's own `env` wins
    #[serde(default)]
    pub env: HashMap<String, String>,
}

fn default_exit_timeout() -> u64 {
    5000
}

fn default_program() -> PathBuf {
    std::env::var_os("SHELL")
        .filter(|shell| !shell.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/bin/sh"))
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            exit_timeout_ms: default_exit_timeout(),
            default_program: default_program(),
            env: HashMap::new(),
        }
    }
}

impl TerminalConfig {
    pub fn exit_timeout(&self) -> Duration {
        Duration::from_millis(self.exit_timeout_ms)
    }
}

/// Startup layout: each entry is one group, each group a list of launches
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayoutConfig {
    #[serde(default)]
    pub groups: Vec<Vec<LaunchConfig>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Write logs here instead of stderr
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

/// One terminal to launch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LaunchConfig {
    /// Label shown for the terminal; defaults to the program name
    #[serde(default)]
    pub title: Option<String>,

    /// Program to run; defaults to `terminal.default_program`
    #[serde(default)]
    pub program: Option<PathBuf>,

    /// Runtime flags placed before `module_path`
    #[serde(default)]
    pub exec_argv: Vec<String>,

    #[serde(default)]
    pub module_path: Option<PathBuf>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// The runtime opens a debugger on `SIGUSR1`
    #[serde(default)]
    pub inspectable: bool,

    #[serde(default)]
    pub allow_loading_unsigned_libraries: bool,
}

impl LaunchConfig {
    /// Launch `program` with `args`
    pub fn command<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: Some(program.into()),
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Title to display, falling back to the program's file name
    pub fn display_title(&self, defaults: &TerminalConfig) -> String {
        if let Some(title) = &self.title {
            return title.clone();
        }
        let program = self.program.as_ref().unwrap_or(&defaults.default_program);
        program
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| program.to_string_lossy().into_owned())
    }

    /// Resolve against the terminal defaults into a spawnable configuration
    pub fn to_process_config(&self, defaults: &TerminalConfig, name: &str) -> ProcessConfig {
        let program = self
            .program
            .clone()
            .unwrap_or_else(|| defaults.default_program.clone());

        let mut env = defaults.env.clone();
        env.extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut config = ProcessConfig::new(name, program);
        config.exec_argv = self.exec_argv.clone();
        config.module_path = self.module_path.clone();
        config.args = self.args.clone();
        config.env = env;
        config.cwd = self.cwd.clone();
        config.inspectable = self.inspectable;
        config.allow_loading_unsigned_libraries = self.allow_loading_unsigned_libraries;
        config
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_json::from_str(&contents).map_err(ConfigError::Parse)?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path.as_ref(), contents)?;
        Ok(())
    }

    /// Configuration printed by `termgroups print-default-config`: one group
    /// running the default shell
    pub fn example() -> Self {
        let mut config = Self::default();
        config.layout.groups = vec![vec![LaunchConfig::default().with_title("shell")]];
        config
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.terminal.exit_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "terminal.exit_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.terminal.default_program.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "terminal.default_program cannot be empty".to_string(),
            ));
        }

        for (group_index, group) in self.layout.groups.iter().enumerate() {
            // Groups are never empty
            if group.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "layout.groups[{group_index}] must contain at least one terminal"
                )));
            }
            for (launch_index, launch) in group.iter().enumerate() {
                if launch
                    .program
                    .as_ref()
                    .is_some_and(|program| program.as_os_str().is_empty())
                {
                    return Err(ConfigError::Validation(format!(
                        "layout.groups[{group_index}][{launch_index}].program cannot be empty"
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(serde_json::Error),
    #[error("Serialize error: {0}")]
    Serialize(serde_json::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}
