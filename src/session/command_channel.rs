use anyhow::{anyhow, Result};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio::time::{sleep, Duration};

use crate::protocol::Command;
use crate::transport::{Peripheral, COMMAND_CHAR_UUID};

/// Pause after every completed write, to respect peripheral write-buffering
/// limits.
pub const INTER_COMMAND_DELAY: Duration = Duration::from_millis(100);

struct QueuedWrite {
    bytes: Vec<u8>,
    done: oneshot::Sender<Result<()>>,
}

struct ChannelState {
    writer: Option<Arc<dyn Peripheral>>,
    queue: VecDeque<QueuedWrite>,
    draining: bool,
}

/// Serializes outbound command writes to the write characteristic.
///
/// FIFO queue with a single drain worker: at most one write is in flight at
/// a time, and each completed write is followed by [`INTER_COMMAND_DELAY`]
/// before the next is issued. Clonable handle over shared state.
#[derive(Clone)]
pub struct CommandChannel {
    state: Arc<Mutex<ChannelState>>,
}

impl Default for CommandChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandChannel {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ChannelState {
                writer: None,
                queue: VecDeque::new(),
                draining: false,
            })),
        }
    }

    /// Bind the write target; called by the session once connected
    pub fn bind(&self, peripheral: Arc<dyn Peripheral>) {
        self.state.lock().unwrap().writer = Some(peripheral);
    }

    /// Drop the write target; queued commands are rejected by `clear`
    pub fn unbind(&self) {
        self.state.lock().unwrap().writer = None;
    }

    pub fn is_bound(&self) -> bool {
        self.state.lock().unwrap().writer.is_some()
    }

    pub fn queued_len(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    /// Discard all queued-but-not-yet-sent commands.
    ///
    /// Their awaiting callers observe a rejection. An in-flight write is not
    /// interrupted; its caller sees the write's own outcome.
    pub fn clear(&self) {
        let dropped: Vec<QueuedWrite> = {
            let mut state = self.state.lock().unwrap();
            state.queue.drain(..).collect()
        };
        if !dropped.is_empty() {
            log::debug!("Clearing {} queued commands", dropped.len());
        }
        for item in dropped {
            let _ = item.done.send(Err(anyhow!("Command queue cleared")));
        }
    }

    /// Queue a command and wait for its write to complete.
    ///
    /// Rejects immediately, without queueing, when no write characteristic
    /// is bound.
    pub async fn send(&self, cmd: &str, payload: Value) -> Result<()> {
        self.send_command(Command::new(cmd, payload)).await
    }

    pub async fn send_command(&self, command: Command) -> Result<()> {
        let bytes = command.encode()?;
        let (tx, rx) = oneshot::channel();

        {
            let mut state = self.state.lock().unwrap();
            if state.writer.is_none() {
                return Err(anyhow!("Not connected: no write characteristic bound"));
            }
            state.queue.push_back(QueuedWrite { bytes, done: tx });
            if !state.draining {
                state.draining = true;
                let channel = self.clone();
                tokio::spawn(async move { channel.drain().await });
            }
        }

        rx.await
            .map_err(|_| anyhow!("Command dropped before transmission"))?
    }

    async fn drain(self) {
        loop {
            enum Step {
                Write(Arc<dyn Peripheral>, QueuedWrite),
                RejectAll(Vec<QueuedWrite>),
                Done,
            }

            let step = {
                let mut state = self.state.lock().unwrap();
                match (state.writer.clone(), state.queue.pop_front()) {
                    (_, None) => {
                        state.draining = false;
                        Step::Done
                    }
                    (Some(writer), Some(item)) => Step::Write(writer, item),
                    (None, Some(item)) => {
                        state.draining = false;
                        let mut items = vec![item];
                        items.extend(state.queue.drain(..));
                        Step::RejectAll(items)
                    }
                }
            };

            match step {
                Step::Done => return,
                Step::RejectAll(items) => {
                    for item in items {
                        let _ = item
                            .done
                            .send(Err(anyhow!("Not connected: write target unbound")));
                    }
                    return;
                }
                Step::Write(writer, item) => {
                    let result = writer.write_characteristic(COMMAND_CHAR_UUID, &item.bytes).await;
                    if let Err(e) = &result {
                        log::warn!("Command write failed: {:#}", e);
                    }
                    let _ = item.done.send(result);
                    sleep(INTER_COMMAND_DELAY).await;
                }
            }
        }
    }
}
