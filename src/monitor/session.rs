// ABOUTME: MonitorSession - one per monitoring client; submits tasks, answers
// ABOUTME: queries, pumps the bus feed, and cancels or reaps only runs it owns.

use std::collections::HashSet;
use std::sync::Arc;

use futures::{Sink, SinkExt, Stream, StreamExt};

use crate::dispatch::Dispatcher;

use super::{ClientCommand, ServerMessage};

/// Per-client view of the dispatcher.
pub struct MonitorSession {
    dispatcher: Arc<Dispatcher>,
    owned: HashSet<String>,
}

impl MonitorSession {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            owned: HashSet::new(),
        }
    }

    /// Top-level runs this client submitted.
    pub fn owned(&self) -> impl Iterator<Item = &String> {
        self.owned.iter()
    }

    /// Whether the client may act on `run_id`: it submitted the run or one of
    /// its ancestors.
    pub fn owns(&self, run_id: &str) -> bool {
        self.owned
            .iter()
            .any(|root| self.dispatcher.is_within(run_id, root))
    }

    /// The bus feed to forward to this client.
    pub fn events(&self) -> impl Stream<Item = ServerMessage> + Send + 'static {
        self.dispatcher.bus().subscribe().map(ServerMessage::from)
    }

    /// Handle one command and produce its reply.
    pub async fn handle(&mut self, command: ClientCommand) -> ServerMessage {
        match command {
            ClientCommand::Ping => ServerMessage::Pong,
            ClientCommand::Submit { agent, task } => {
                match self.dispatcher.submit(&agent, task) {
                    Ok(run_id) => {
                        tracing::info!(run_id = %run_id, agent = %agent, "monitor client submitted run");
                        self.owned.insert(run_id.clone());
                        ServerMessage::Submitted { run_id, agent }
                    }
                    Err(e) => ServerMessage::error(e.to_string()),
                }
            }
            ClientCommand::Status { run_id } => match self.dispatcher.snapshot(&run_id) {
                Some(state) => ServerMessage::status(&state),
                None => ServerMessage::error(format!("unknown run: {}", run_id)),
            },
            ClientCommand::Tree => ServerMessage::Tree {
                runs: self.dispatcher.tree(),
            },
            ClientCommand::Steps { run_id } => match self.dispatcher.snapshot(&run_id) {
                Some(state) => ServerMessage::Steps {
                    run_id,
                    steps: state.steps,
                },
                None => ServerMessage::error(format!("unknown run: {}", run_id)),
            },
            ClientCommand::Cancel { run_id } => {
                if !self.owns(&run_id) {
                    tracing::warn!(run_id = %run_id, "monitor client tried to cancel a run it does not own");
                    return ServerMessage::error(format!("run {} is not owned by this client", run_id));
                }
                match self.dispatcher.cancel(&run_id).await {
                    Ok(run_ids) => ServerMessage::Cancelled { run_ids },
                    Err(e) => ServerMessage::error(e.to_string()),
                }
            }
            ClientCommand::Reap { run_id } => {
                if !self.owns(&run_id) {
                    return ServerMessage::error(format!("run {} is not owned by this client", run_id));
                }
                let run_ids = self.dispatcher.reap(&run_id);
                if run_ids.is_empty() {
                    return ServerMessage::error(format!("run {} is still active", run_id));
                }
                self.owned.remove(&run_id);
                ServerMessage::Reaped { run_ids }
            }
        }
    }

    /// Parse a text frame and handle it.
    pub async fn handle_text(&mut self, text: &str) -> ServerMessage {
        match super::parse_command(text) {
            Ok(command) => self.handle(command).await,
            Err(e) => ServerMessage::error(format!("bad command: {}", e)),
        }
    }

    /// Serve one client until `frames` ends or `sink` fails. Replies and bus
    /// items are written straight into `sink`, so a client that reads slowly
    /// falls behind on its bounded bus subscription and is sent a `gap`.
    /// Owned runs are released on the way out.
    pub async fn pump<F, S>(mut self, mut frames: F, mut sink: S) -> Result<(), S::Error>
    where
        F: Stream<Item = String> + Unpin,
        S: Sink<ServerMessage> + Unpin,
    {
        let mut events = Box::pin(self.events());
        let result = loop {
            let message = tokio::select! {
                frame = frames.next() => match frame {
                    Some(text) => self.handle_text(&text).await,
                    None => break Ok(()),
                },
                item = events.next() => match item {
                    Some(message) => message,
                    None => break Ok(()),
                },
            };
            if let Err(e) = sink.send(message).await {
                break Err(e);
            }
        };

        tracing::debug!(owned = self.owned.len(), "monitor client disconnected");
        self.close();
        result
    }

    /// Release the runs this client submitted: finished trees are reaped now,
    /// the rest once they settle.
    pub fn close(self) {
        let Self { dispatcher, owned } = self;
        for root in owned {
            if !dispatcher.reap(&root).is_empty() || dispatcher.status(&root).is_none() {
                continue;
            }
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                settle(&dispatcher, &root).await;
                let removed = dispatcher.reap(&root);
                tracing::debug!(run_id = %root, removed = removed.len(), "reaped runs of a departed client");
            });
        }
    }
}

/// Wait for a run and every descendant to reach a terminal status.
async fn settle(dispatcher: &Dispatcher, root: &str) {
    let mut pending = vec![root.to_string()];
    while let Some(run_id) = pending.pop() {
        let _ = dispatcher.await_run(&run_id).await;
        pending.extend(dispatcher.children_of(&run_id));
    }
}
