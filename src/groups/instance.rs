use crate::model::InstanceId;
use crate::services::process::{ProcessHandle, ProcessState};

/// One terminal session: an id, a label and the process it owns
#[derive(Debug)]
pub struct TerminalInstance {
    id: InstanceId,
    title: String,
    process: ProcessHandle,
    focused: bool,
}

impl TerminalInstance {
    pub fn new(id: InstanceId, title: impl Into<String>, process: ProcessHandle) -> Self {
        Self {
            id,
            title: title.into(),
            process,
            focused: false,
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn process(&self) -> &ProcessHandle {
        &self.process
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    pub fn state(&self) -> ProcessState {
        self.process.state()
    }

    /// Whether this is the active instance of the active group
    pub fn is_focused(&self) -> bool {
        self.focused
    }

    pub(crate) fn set_focused(&mut self, focused: bool) {
        self.focused = focused;
    }

    /// Release the process. Returns whether a kill was requested.
    pub fn dispose(&mut self) -> bool {
        self.focused = false;
        if self.process.is_running() && self.process.kill_requests() == 0 {
            tracing::debug!("disposing {} ({})", self.id, self.title);
            return self.process.kill();
        }
        false
    }
}
