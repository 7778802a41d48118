use std::process::Stdio;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::channel::IpcFrame;
use super::decoder::Utf8StreamDecoder;
use super::exit_latch::ExitLatch;
use super::gone::ProcessGoneNotifier;
use super::{
    ExitInfo, ExitReason, ProcessConfig, ProcessEvent, ProcessEventSink, ProcessState,
    ResponseRoute,
};

/// How long the exit report waits for stdout/stderr to drain after the child
/// exited. Grandchildren may keep the pipes open forever.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// After a timed-out wait, how long to wait for the killed process to be reaped
const KILL_REAP_GRACE: Duration = Duration::from_millis(500);

const READ_BUFFER_SIZE: usize = 8192;

static NEXT_SERVICE_ID: AtomicU64 = AtomicU64::new(1);

/// Bookkeeping for a spawned process
struct Attached {
    pid: Option<u32>,
    kill_sender: mpsc::UnboundedSender<()>,
    message_sender: Option<mpsc::UnboundedSender<IpcFrame>>,
    /// Listener and channel writer tasks; the supervisor is not tracked here
    /// since it must keep running until the child is reaped
    background: Vec<JoinHandle<()>>,
}

/// Routes every exit source into the latch and forwards the winner
#[derive(Clone)]
struct ExitReporter {
    name: Arc<str>,
    latch: ExitLatch,
    sink: ProcessEventSink,
}

impl ExitReporter {
    fn report(&self, info: ExitInfo) -> bool {
        if !self.latch.set(info.clone()) {
            tracing::debug!(
                "ignoring duplicate exit of {} ({:?})",
                self.name,
                info.reason
            );
            return false;
        }

        match &info.reason {
            ExitReason::Exited | ExitReason::Killed => tracing::info!(
                "process {} (pid {:?}) exited with code {:?}",
                self.name,
                info.pid,
                info.code
            ),
            ExitReason::Gone(reason) => tracing::error!(
                "process {} (pid {:?}) is gone: {}",
                self.name,
                info.pid,
                reason
            ),
            ExitReason::SpawnFailed(error) => {
                tracing::error!("process {} failed to spawn: {}", self.name, error)
            }
        }
        (self.sink)(ProcessEvent::Exit(info));
        true
    }
}

/// Owner of exactly one external process
pub struct ProcessHandle {
    name: String,
    service_name: Option<String>,
    sink: ProcessEventSink,
    gone: ProcessGoneNotifier,
    latch: ExitLatch,
    attached: Option<Attached>,
    inspectable: bool,
    kill_requests: Arc<AtomicUsize>,
}

impl ProcessHandle {
    /// Create an idle handle that reports through `sink`
    pub fn new(sink: ProcessEventSink) -> Self {
        Self {
            name: String::new(),
            service_name: None,
            sink,
            gone: ProcessGoneNotifier::global(),
            latch: ExitLatch::new(),
            attached: None,
            inspectable: false,
            kill_requests: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create an idle handle together with a receiver for its events
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProcessEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let sink: ProcessEventSink = Arc::new(move |event| {
            let _ = sender.send(event);
        });
        (Self::new(sink), receiver)
    }

    /// Listen for out-of-band exit reports on `notifier` instead of the global one
    pub fn with_gone_notifier(mut self, notifier: ProcessGoneNotifier) -> Self {
        self.gone = notifier;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unique name generated when the process was started
    pub fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref()
    }

    pub fn pid(&self) -> Option<u32> {
        self.attached.as_ref().and_then(|a| a.pid)
    }

    pub fn state(&self) -> ProcessState {
        if self.latch.is_set() {
            ProcessState::Exited
        } else if self.attached.is_some() {
            ProcessState::Running
        } else {
            ProcessState::NotStarted
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == ProcessState::Running
    }

    pub fn exit_info(&self) -> Option<ExitInfo> {
        self.latch.get()
    }

    /// Number of kill requests issued so far
    pub fn kill_requests(&self) -> usize {
        self.kill_requests.load(Ordering::SeqCst)
    }

    /// Spawn the process described by `config`.
    ///
    /// Returns `false` without spawning when a process was already started on this
    /// handle, when the requester is no longer alive, or when no tokio runtime is
    /// available. A spawn error is reported as an `Exit` with
    /// [`ExitReason::SpawnFailed`] and also returns `false`.
    pub fn start(&mut self, config: ProcessConfig) -> bool {
        if self.attached.is_some() || self.latch.is_set() {
            tracing::error!(
                "cannot start {}: handle already owns process {}",
                config.name,
                self.name
            );
            return false;
        }

        if let Some(route) = &config.response {
            if !route.target.is_alive() {
                tracing::warn!(
                    "not starting {}: requesting window {} is gone",
                    config.name,
                    route.target.id()
                );
                return false;
            }
        }

        if tokio::runtime::Handle::try_current().is_err() {
            tracing::error!("cannot start {}: no tokio runtime", config.name);
            return false;
        }

        let service_name = format!(
            "{}#{}",
            config.name,
            NEXT_SERVICE_ID.fetch_add(1, Ordering::Relaxed)
        );
        self.name = config.name.clone();
        self.service_name = Some(service_name.clone());
        self.inspectable = config.inspectable;

        let reporter = ExitReporter {
            name: Arc::from(config.name.as_str()),
            latch: self.latch.clone(),
            sink: self.sink.clone(),
        };

        let mut cmd = Command::new(&config.program);
        cmd.args(config.command_args())
            .env_clear()
            .envs(config.command_env(&service_name))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }
        if config.allow_loading_unsigned_libraries {
            tracing::debug!(
                "{}: unsigned library loading only applies to hardened runtimes",
                config.name
            );
        }

        #[cfg(unix)]
        let channel = match super::channel::ChildChannel::attach(&mut cmd) {
            Ok(channel) => Some(channel),
            Err(e) => {
                tracing::warn!("{}: no message channel: {}", config.name, e);
                None
            }
        };

        // Subscribe before spawning so no report can slip through
        let gone_receiver = self.gone.subscribe();

        tracing::info!(
            "spawning {} ({}): {:?} {:?}",
            config.name,
            service_name,
            config.program,
            config.command_args()
        );
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                reporter.report(ExitInfo::new(
                    None,
                    None,
                    ExitReason::SpawnFailed(e.to_string()),
                ));
                return false;
            }
        };

        let pid = child.id();
        if let Some(pid) = pid {
            (self.sink)(ProcessEvent::Spawn { pid });
        }

        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            let sink = self.sink.clone();
            readers.push(tokio::spawn(pump_stream(stdout, move |text| {
                sink(ProcessEvent::Stdout(text))
            })));
        }
        if let Some(stderr) = child.stderr.take() {
            let sink = self.sink.clone();
            readers.push(tokio::spawn(pump_stream(stderr, move |text| {
                sink(ProcessEvent::Stderr(text))
            })));
        }

        let mut background = Vec::new();

        #[cfg(unix)]
        let message_sender = channel.and_then(|channel| {
            self.open_message_channel(
                channel,
                config.response.as_ref(),
                &mut readers,
                &mut background,
            )
        });
        #[cfg(not(unix))]
        let message_sender = {
            tracing::debug!("{}: message channel unsupported on this platform", config.name);
            None
        };

        let (kill_sender, kill_receiver) = mpsc::unbounded_channel();
        tokio::spawn(supervise(
            child,
            pid,
            kill_receiver,
            readers,
            reporter.clone(),
        ));
        background.push(tokio::spawn(listen_for_gone(
            service_name,
            pid,
            gone_receiver,
            reporter,
        )));

        self.attached = Some(Attached {
            pid,
            kill_sender,
            message_sender,
            background,
        });
        true
    }

    /// Bridge the socket to the handle and hand the port off to the requester
    #[cfg(unix)]
    fn open_message_channel(
        &self,
        channel: super::channel::ChildChannel,
        route: Option<&ResponseRoute>,
        readers: &mut Vec<JoinHandle<()>>,
        background: &mut Vec<JoinHandle<()>>,
    ) -> Option<mpsc::UnboundedSender<IpcFrame>> {
        let stream = match channel.into_parent() {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("{}: failed to open message channel: {}", self.name, e);
                return None;
            }
        };

        let port = route.and_then(|route| {
            let super::MessageChannel { port1, port2 } = super::MessageChannel::new();
            if route.target.is_alive() {
                route.target.deliver_port(&route.channel, &route.nonce, port2);
                Some(port1)
            } else {
                tracing::warn!(
                    "{}: window {} went away before the port handoff",
                    self.name,
                    route.target.id()
                );
                None
            }
        });

        let (sender, receiver) = mpsc::unbounded_channel();
        let (reader, writer) = super::channel::spawn_bridge(
            self.name.clone(),
            stream,
            self.sink.clone(),
            receiver,
            port,
        );
        // Messages must be delivered before the exit is reported
        readers.push(reader);
        background.push(writer);
        Some(sender)
    }

    /// Request termination of the attached process.
    pub fn kill(&self) -> bool {
        match &self.attached {
            Some(attached) if !self.latch.is_set() => {
                self.kill_requests.fetch_add(1, Ordering::SeqCst);
                tracing::info!("killing process {} (pid {:?})", self.name, attached.pid);
                attached.kill_sender.send(()).is_ok()
            }
            _ => {
                tracing::warn!("kill requested for {} but no process is running", self.name);
                false
            }
        }
    }

    /// Wait until the process exits, killing it if `max_wait` elapses first.
    pub async fn wait_for_exit(&self, max_wait: Duration) {
        if !self.is_running() {
            return;
        }

        if tokio::time::timeout(max_wait, self.latch.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                "process {} did not exit within {:?}, killing it",
                self.name,
                max_wait
            );
            self.kill();
            if tokio::time::timeout(KILL_REAP_GRACE, self.latch.wait())
                .await
                .is_err()
            {
                tracing::warn!("process {} still not reaped after kill", self.name);
            }
        }
    }

    /// Ask the runtime inside the process to open its debugger port.
    ///
    /// Only attempted for processes started as `inspectable`; runtimes that do not
    /// handle `SIGUSR1` would be terminated by it.
    pub fn enable_inspect_port(&self) -> bool {
        let Some(pid) = self.pid() else {
            return false;
        };
        if !self.is_running() || !self.inspectable {
            return false;
        }

        tracing::info!("enabling inspect port of {} (pid {})", self.name, pid);
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            match kill(Pid::from_raw(pid as i32), Signal::SIGUSR1) {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!("failed to signal {} for inspection: {}", self.name, e);
                    false
                }
            }
        }
        #[cfg(not(unix))]
        {
            false
        }
    }

    /// Send a structured message to the process over its message channel
    pub fn post_message(&self, message: serde_json::Value) -> bool {
        let Some(sender) = self
            .attached
            .as_ref()
            .and_then(|a| a.message_sender.as_ref())
        else {
            tracing::debug!("{} has no message channel", self.name);
            return false;
        };
        sender
            .send(IpcFrame {
                port: false,
                data: message,
            })
            .is_ok()
    }

    /// The single exit entry point shared by every exit source. Only the first call
    /// is forwarded as an `Exit` event; returns whether this call won.
    pub fn handle_did_exit(&self, code: Option<i32>, reason: ExitReason) -> bool {
        ExitReporter {
            name: Arc::from(self.name.as_str()),
            latch: self.latch.clone(),
            sink: self.sink.clone(),
        }
        .report(ExitInfo::new(self.pid(), code, reason))
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if let Some(attached) = self.attached.take() {
            // Also covers a child reported gone that is in fact still around; the
            // send fails once the supervisor has reaped it
            if self.kill_requests() == 0 && attached.kill_sender.send(()).is_ok() {
                tracing::debug!("disposing process {}", self.name);
            }
            for task in &attached.background {
                task.abort();
            }
        }
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("name", &self.name)
            .field("service_name", &self.service_name)
            .field("pid", &self.pid())
            .field("state", &self.state())
            .finish()
    }
}

/// Read a stream to the end, forwarding decoded text
async fn pump_stream<R, F>(mut reader: R, emit: F)
where
    R: AsyncRead + Unpin,
    F: Fn(String),
{
    let mut decoder = Utf8StreamDecoder::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let text = decoder.decode(&buf[..n]);
                if !text.is_empty() {
                    emit(text);
                }
            }
            Err(e) => {
                tracing::debug!("output stream closed: {}", e);
                break;
            }
        }
    }
    let tail = decoder.finish();
    if !tail.is_empty() {
        emit(tail);
    }
}

/// Own the child until it exits, honoring kill requests
async fn supervise(
    mut child: Child,
    pid: Option<u32>,
    mut kill_receiver: mpsc::UnboundedReceiver<()>,
    readers: Vec<JoinHandle<()>>,
    reporter: ExitReporter,
) {
    let mut killed = false;
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            Some(()) = kill_receiver.recv() => {
                killed = true;
                if let Err(e) = child.start_kill() {
                    tracing::warn!("failed to kill {}: {}", reporter.name, e);
                }
            }
        }
    };

    let deadline = tokio::time::Instant::now() + OUTPUT_DRAIN_GRACE;
    for mut reader in readers {
        if tokio::time::timeout_at(deadline, &mut reader).await.is_err() {
            tracing::debug!("output of {} still open after exit", reporter.name);
            reader.abort();
        }
    }

    let reason = if killed {
        ExitReason::Killed
    } else {
        ExitReason::Exited
    };
    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            tracing::warn!("failed to wait for {}: {}", reporter.name, e);
            None
        }
    };
    reporter.report(ExitInfo::new(pid, code, reason));
}

/// Forward an out-of-band report for this service, until the process exits
async fn listen_for_gone(
    service_name: String,
    pid: Option<u32>,
    mut receiver: tokio::sync::broadcast::Receiver<super::ChildGone>,
    reporter: ExitReporter,
) {
    use tokio::sync::broadcast::error::RecvError;

    loop {
        let gone = tokio::select! {
            received = receiver.recv() => match received {
                Ok(gone) => gone,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("{} skipped {} gone reports", service_name, skipped);
                    continue;
                }
                Err(RecvError::Closed) => return,
            },
            _ = reporter.latch.wait() => return,
        };

        if gone.service_name == service_name {
            reporter.report(ExitInfo::new(
                gone.pid.or(pid),
                gone.code,
                ExitReason::Gone(gone.reason),
            ));
            return;
        }
    }
}
