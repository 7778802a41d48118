//! Child process lifecycle service
//!
//! A [`ProcessHandle`] owns exactly one external process and turns everything that
//! happens to it into [`ProcessEvent`]s:
//!
//! - `Spawn` once the OS reported a pid
//! - `Stdout` / `Stderr` as UTF-8 text, decoded incrementally per stream
//! - `Message` for structured messages the child sends over its message channel
//! - `Exit` exactly once, whichever exit source fires first
//!
//! ## Exit sources
//!
//! The handle watches the child itself and also listens on a
//! [`ProcessGoneNotifier`] for out-of-band reports keyed by its generated service
//! name. Both feed one [`ExitLatch`]; the first report wins and is the only one
//! forwarded as `Exit`.
//!
//! ## Module Responsibilities
//!
//! - `handle.rs`: spawning, kill, wait-for-exit, inspector signal
//! - `decoder.rs`: incremental UTF-8 decoding of stdout/stderr
//! - `exit_latch.rs`: set-once exit state shared by all producers
//! - `channel.rs`: message frames, socket bridge and message port handoff
//! - `gone.rs`: out-of-band exit notifications

pub mod channel;
pub mod decoder;
pub mod exit_latch;
pub mod gone;
mod handle;

pub use channel::{IpcFrame, MessageChannel, MessagePort};
pub use decoder::Utf8StreamDecoder;
pub use exit_latch::ExitLatch;
pub use gone::{ChildGone, ProcessGoneNotifier};
pub use handle::ProcessHandle;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Environment variable carrying the generated service name into the child
pub const SERVICE_NAME_ENV: &str = "TERMGROUPS_SERVICE_NAME";

/// Lifecycle state of a process handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    NotStarted,
    Running,
    Exited,
}

/// How a process ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ExitReason {
    /// The child exited on its own
    Exited,
    /// The child exited after a kill request from this handle
    Killed,
    /// An out-of-band report said the child is gone
    Gone(String),
    /// The process could not be spawned at all
    SpawnFailed(String),
}

/// Payload of the exit notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
    pub pid: Option<u32>,
    pub code: Option<i32>,
    /// Always "unknown": signals are not observable through the exit contract
    pub signal: String,
    pub reason: ExitReason,
}

impl ExitInfo {
    pub fn new(pid: Option<u32>, code: Option<i32>, reason: ExitReason) -> Self {
        Self {
            pid,
            code,
            signal: "unknown".to_string(),
            reason,
        }
    }
}

/// Everything a process handle reports
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessEvent {
    Spawn { pid: u32 },
    Stdout(String),
    Stderr(String),
    Message(Value),
    Exit(ExitInfo),
}

/// Callback receiving process events; called from background tasks
pub type ProcessEventSink = Arc<dyn Fn(ProcessEvent) + Send + Sync>;

/// The party that requested a process and gets the message port handed to it
pub trait ResponseTarget: Send + Sync {
    /// Identifier of the requesting window/context, used in diagnostics
    fn id(&self) -> u64;

    /// Whether the requester can still receive the response
    fn is_alive(&self) -> bool;

    /// Receive the requester's end of the process message channel. The nonce is
    /// the one from the original request, so the receiver can correlate them.
    fn deliver_port(&self, channel: &str, nonce: &str, port: MessagePort);
}

/// Where to hand the message port once the process is up
#[derive(Clone)]
pub struct ResponseRoute {
    pub target: Arc<dyn ResponseTarget>,
    pub channel: String,
    pub nonce: String,
}

impl std::fmt::Debug for ResponseRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseRoute")
            .field("window_id", &self.target.id())
            .field("channel", &self.channel)
            .field("nonce", &self.nonce)
            .finish()
    }
}

/// Everything needed to spawn one process
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Name used in diagnostics and as the base of the service name
    pub name: String,
    pub program: PathBuf,
    /// Runtime flags placed before the module path
    pub exec_argv: Vec<String>,
    /// Script/module the runtime should load, if any
    pub module_path: Option<PathBuf>,
    pub args: Vec<String>,
    /// Overrides on top of the inherited environment; never mutated by the handle
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
    /// Only meaningful for hardened-runtime hosts (macOS); logged elsewhere
    pub allow_loading_unsigned_libraries: bool,
    /// Whether the runtime opens a debugger when it receives `SIGUSR1`
    pub inspectable: bool,
    pub response: Option<ResponseRoute>,
}

impl ProcessConfig {
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            exec_argv: Vec::new(),
            module_path: None,
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            allow_loading_unsigned_libraries: false,
            inspectable: false,
            response: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_response(mut self, route: ResponseRoute) -> Self {
        self.response = Some(route);
        self
    }

    /// Full argument list: exec flags, module path, then the arguments
    pub fn command_args(&self) -> Vec<String> {
        let mut argv = self.exec_argv.clone();
        if let Some(module) = &self.module_path {
            argv.push(module.to_string_lossy().into_owned());
        }
        argv.extend(self.args.iter().cloned());
        argv
    }

    /// Environment for the child: inherited variables, then the overrides, then
    /// the service name. Works on a copy.
    pub fn command_env(&self, service_name: &str) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = std::env::vars().collect();
        env.extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env.insert(SERVICE_NAME_ENV.to_string(), service_name.to_string());
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_args_order() {
        let mut config = ProcessConfig::new("node-host", "node").with_args(["--port", "9"]);
        config.exec_argv = vec!["--max-old-space-size=512".into()];
        config.module_path = Some(PathBuf::from("/opt/host/main.js"));

        assert_eq!(
            config.command_args(),
            vec!["--max-old-space-size=512", "/opt/host/main.js", "--port", "9"]
        );
    }

    #[test]
    fn test_command_env_does_not_touch_caller_map() {
        let config = ProcessConfig::new("env-test", "sh").with_env("FOO", "bar");
        let env = config.command_env("env-test#1");

        assert_eq!(env.get("FOO").map(String::as_str), Some("bar"));
        assert_eq!(
            env.get(SERVICE_NAME_ENV).map(String::as_str),
            Some("env-test#1")
        );
        assert_eq!(config.env.len(), 1);
        assert!(!config.env.contains_key(SERVICE_NAME_ENV));
    }

    #[test]
    fn test_exit_info_signal_is_unknown() {
        let info = ExitInfo::new(Some(1), Some(0), ExitReason::Exited);
        assert_eq!(info.signal, "unknown");
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["reason"]["kind"], "exited");
    }
}
