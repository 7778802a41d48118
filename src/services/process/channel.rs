//! Message channel between the parent and a spawned process.
//!
//! On Unix the child inherits one end of a socket pair as file descriptor 3 (its
//! number is also published in `TERMGROUPS_CHANNEL_FD`). Both directions carry
//! newline-delimited JSON frames:
//!
//! ```text
//! {"data": {...}}               message for the process handle itself
//! {"port": true, "data": {...}} message travelling through the handed-off port
//! ```
//!
//! The handed-off port is one half of an in-process [`MessageChannel`]; the other
//! half is delivered to whoever requested the process, so the two can talk
//! without going through the handle.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Environment variable announcing the channel descriptor to the child
pub const CHANNEL_FD_ENV: &str = "TERMGROUPS_CHANNEL_FD";

/// Descriptor number the child sees its end of the channel on
pub const CHILD_CHANNEL_FD: i32 = 3;

/// One line on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpcFrame {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub port: bool,
    pub data: Value,
}

/// One end of a bidirectional in-process message channel
#[derive(Debug)]
pub struct MessagePort {
    sender: mpsc::UnboundedSender<Value>,
    receiver: mpsc::UnboundedReceiver<Value>,
}

impl MessagePort {
    /// Send a message to the other end. Returns `false` if it was dropped.
    pub fn post_message(&self, message: Value) -> bool {
        self.sender.send(message).is_ok()
    }

    /// Receive the next message from the other end
    pub async fn recv(&mut self) -> Option<Value> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Value> {
        self.receiver.try_recv().ok()
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        mpsc::UnboundedSender<Value>,
        mpsc::UnboundedReceiver<Value>,
    ) {
        (self.sender, self.receiver)
    }
}

/// Two connected ports: what is posted on one is received on the other
#[derive(Debug)]
pub struct MessageChannel {
    pub port1: MessagePort,
    pub port2: MessagePort,
}

impl MessageChannel {
    pub fn new() -> Self {
        let (to_port2, from_port1) = mpsc::unbounded_channel();
        let (to_port1, from_port2) = mpsc::unbounded_channel();
        Self {
            port1: MessagePort {
                sender: to_port2,
                receiver: from_port2,
            },
            port2: MessagePort {
                sender: to_port1,
                receiver: from_port1,
            },
        }
    }
}

impl Default for MessageChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
pub(crate) use unix::{spawn_bridge, ChildChannel};

#[cfg(unix)]
mod unix {
    use super::{IpcFrame, MessagePort, CHANNEL_FD_ENV, CHILD_CHANNEL_FD};
    use crate::services::process::{ProcessEvent, ProcessEventSink};
    use serde_json::Value;
    use std::io;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::process::Command;
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;

    /// Socket pair prepared for a command that has not been spawned yet
    pub(crate) struct ChildChannel {
        parent: UnixStream,
        child: UnixStream,
    }

    impl ChildChannel {
        /// Create the socket pair and arrange for the child end to appear as
        /// descriptor 3 in the spawned process.
        pub(crate) fn attach(cmd: &mut Command) -> io::Result<Self> {
            let (parent, child) = UnixStream::pair()?;
            let child_fd = child.as_raw_fd();
            cmd.env(CHANNEL_FD_ENV, CHILD_CHANNEL_FD.to_string());

            // SAFETY: only async-signal-safe libc calls run between fork and exec
            unsafe {
                cmd.pre_exec(move || {
                    if child_fd == CHILD_CHANNEL_FD {
                        // Already in place; only the close-on-exec flag must go
                        if libc::fcntl(child_fd, libc::F_SETFD, 0) == -1 {
                            return Err(io::Error::last_os_error());
                        }
                    } else if libc::dup2(child_fd, CHILD_CHANNEL_FD) == -1 {
                        return Err(io::Error::last_os_error());
                    }
                    Ok(())
                });
            }

            Ok(Self { parent, child })
        }

        /// Close the child's end in this process and return the parent's end
        pub(crate) fn into_parent(self) -> io::Result<tokio::net::UnixStream> {
            drop(self.child);
            self.parent.set_nonblocking(true)?;
            tokio::net::UnixStream::from_std(self.parent)
        }
    }

    /// Pump frames between the socket, the handle and the handed-off port.
    /// Returns the reader and writer tasks.
    pub(crate) fn spawn_bridge(
        name: String,
        stream: tokio::net::UnixStream,
        sink: ProcessEventSink,
        mut outbound: mpsc::UnboundedReceiver<IpcFrame>,
        port: Option<MessagePort>,
    ) -> (JoinHandle<()>, JoinHandle<()>) {
        let (read_half, mut write_half) = stream.into_split();
        let (port_sender, mut port_receiver) = match port.map(MessagePort::into_parts) {
            Some((sender, receiver)) => (Some(sender), Some(receiver)),
            None => (None, None),
        };

        let reader_name = name.clone();
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!("message channel of {} closed: {}", reader_name, e);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<IpcFrame>(&line) {
                    Ok(IpcFrame { port: false, data }) => sink(ProcessEvent::Message(data)),
                    Ok(IpcFrame { port: true, data }) => match &port_sender {
                        Some(sender) => {
                            if sender.send(data).is_err() {
                                tracing::debug!(
                                    "port peer of {} is gone, dropping message",
                                    reader_name
                                );
                            }
                        }
                        None => tracing::debug!(
                            "{} sent a port message but no port was handed off",
                            reader_name
                        ),
                    },
                    Err(e) => {
                        tracing::warn!("invalid message frame from {}: {}", reader_name, e)
                    }
                }
            }
        });

        let writer = tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    Some(frame) = outbound.recv() => frame,
                    Some(data) = recv_port(&mut port_receiver) => IpcFrame { port: true, data },
                    else => break,
                };
                let mut line = match serde_json::to_vec(&frame) {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::warn!("failed to encode message for {}: {}", name, e);
                        continue;
                    }
                };
                line.push(b'\n');
                if let Err(e) = write_half.write_all(&line).await {
                    tracing::debug!("message channel of {} closed for writing: {}", name, e);
                    break;
                }
            }
        });

        (reader, writer)
    }

    async fn recv_port(receiver: &mut Option<mpsc::UnboundedReceiver<Value>>) -> Option<Value> {
        match receiver {
            Some(receiver) => receiver.recv().await,
            None => None,
        }
    }
}
