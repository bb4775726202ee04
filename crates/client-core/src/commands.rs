//! Command queue
//!
//! Every session-mutating operation is wrapped in a [`Command`] and executed
//! single file. A command is not started while a renegotiation is outstanding
//! or while the transport connection is unstable, and the queue only moves on
//! once the current command's [`ResolvePolicy`] is satisfied:
//!
//! - [`ResolvePolicy::Immediately`] - the notifier fires as soon as the handler
//!   is invoked; the queue still waits for the handler before starting the next
//!   command.
//! - [`ResolvePolicy::OnHandlerResolve`] - the notifier carries the handler's
//!   own result.
//! - [`ResolvePolicy::AfterRenegotiation`] - if the handler requested a
//!   renegotiation, the notifier fires once an answer for an offer sent after
//!   the request has been applied. Until then the queue stays blocked.
//!
//! A failing handler rejects its notifier and the queue advances. An offer
//! that cannot be produced rejects the command waiting for it. Tearing the
//! queue down drops pending notifiers without resolving them.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, Weak};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};

/// When a command's notifier fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvePolicy {
    Immediately,
    OnHandlerResolve,
    AfterRenegotiation,
}

/// What a handler reports on success
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Nothing left to wait for
    Completed,
    /// The transport must renegotiate; the next offer after `offer_seq` carries the change
    RenegotiationRequested { offer_seq: u64 },
}

pub type CommandHandler =
    Box<dyn FnOnce() -> BoxFuture<'static, ClientResult<CommandOutcome>> + Send>;

/// Receiving side of a command's completion signal
pub type CommandNotifier = oneshot::Receiver<ClientResult<()>>;

/// A queued mutation
pub struct Command {
    name: &'static str,
    resolve: ResolvePolicy,
    handler: CommandHandler,
    notifier: oneshot::Sender<ClientResult<()>>,
}

impl Command {
    pub fn new<F>(name: &'static str, resolve: ResolvePolicy, handler: F) -> (Self, CommandNotifier)
    where
        F: FnOnce() -> BoxFuture<'static, ClientResult<CommandOutcome>> + Send + 'static,
    {
        let (notifier, receiver) = oneshot::channel();
        let command = Self { name, resolve, handler: Box::new(handler), notifier };
        (command, receiver)
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("resolve", &self.resolve)
            .finish()
    }
}

/// Wait for a command's completion signal
///
/// A notifier dropped by a teardown surfaces as [`ClientError::SessionClosed`].
pub async fn wait(notifier: CommandNotifier) -> ClientResult<()> {
    notifier.await.unwrap_or(Err(ClientError::SessionClosed))
}

enum Phase {
    Idle,
    Running,
    AwaitingRenegotiation {
        name: &'static str,
        notifier: oneshot::Sender<ClientResult<()>>,
        offer_seq: u64,
    },
}

struct QueueState {
    pending: VecDeque<Command>,
    phase: Phase,
    offer_seq: u64,
    /// An offer is being built but has not been sent yet
    offer_in_flight: bool,
    negotiating: bool,
    connection_unstable: bool,
    generation: u64,
}

/// Single-file executor for session mutations
pub struct CommandQueue {
    state: Mutex<QueueState>,
    this: Weak<CommandQueue>,
}

impl CommandQueue {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                phase: Phase::Idle,
                offer_seq: 0,
                offer_in_flight: false,
                negotiating: false,
                connection_unstable: false,
                generation: 0,
            }),
            this: this.clone(),
        })
    }

    /// Append a command and start it if the queue is idle
    pub fn push_command(&self, command: Command) {
        let mut state = self.lock_state();
        debug!(command = command.name, pending = state.pending.len(), "Queueing command");
        state.pending.push_back(command);
        self.advance(&mut state);
    }

    /// A renegotiation completed; resume the queue
    pub fn process_next_command(&self) {
        let mut state = self.lock_state();
        state.negotiating = false;
        self.advance(&mut state);
    }

    /// The local side started building an offer
    ///
    /// New commands stay queued until its answer is applied. A change made by
    /// a command that is already running misses this offer and waits for the
    /// following one.
    pub fn begin_offer(&self) {
        let mut state = self.lock_state();
        state.offer_in_flight = true;
        state.negotiating = true;
    }

    /// An offer left for the server
    pub fn on_offer_sent(&self) {
        let mut state = self.lock_state();
        state.offer_seq += 1;
        state.offer_in_flight = false;
        state.negotiating = true;
    }

    /// The offer being built could not be produced or sent
    ///
    /// A command waiting for renegotiation is rejected with `error` and the
    /// queue resumes.
    pub fn fail_renegotiation(&self, error: ClientError) {
        let mut state = self.lock_state();
        state.offer_in_flight = false;
        state.negotiating = false;
        if matches!(state.phase, Phase::AwaitingRenegotiation { .. }) {
            if let Phase::AwaitingRenegotiation { name, notifier, .. } =
                std::mem::replace(&mut state.phase, Phase::Idle)
            {
                warn!(command = name, error = %error, "Renegotiation failed, rejecting command");
                let _ = notifier.send(Err(error));
            }
        }
        self.advance(&mut state);
    }

    /// The server announced a change that an answer will follow
    pub fn mark_negotiating(&self) {
        self.lock_state().negotiating = true;
    }

    /// Number of offers sent so far
    pub fn offer_seq(&self) -> u64 {
        self.lock_state().offer_seq
    }

    /// Last offer that cannot carry a change made now
    pub fn change_baseline(&self) -> u64 {
        let state = self.lock_state();
        state.offer_seq + u64::from(state.offer_in_flight)
    }

    pub fn is_negotiating(&self) -> bool {
        self.lock_state().negotiating
    }

    /// Hold back new commands while the connection is unstable
    pub fn set_connection_unstable(&self, unstable: bool) {
        let mut state = self.lock_state();
        state.connection_unstable = unstable;
        if !unstable {
            self.advance(&mut state);
        }
    }

    /// Commands not yet started
    pub fn pending_len(&self) -> usize {
        self.lock_state().pending.len()
    }

    /// Abandon every pending command and reset the negotiation state
    pub fn clean_up(&self) {
        let mut state = self.lock_state();
        let abandoned = state.pending.len();
        state.pending.clear();
        state.phase = Phase::Idle;
        state.offer_in_flight = false;
        state.negotiating = false;
        state.connection_unstable = false;
        state.generation += 1;
        if abandoned > 0 {
            debug!(abandoned, "Command queue cleaned up");
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn advance(&self, state: &mut QueueState) {
        match &state.phase {
            Phase::Running => return,
            Phase::AwaitingRenegotiation { offer_seq, .. } => {
                if state.negotiating || state.offer_seq <= *offer_seq {
                    return;
                }
                if let Phase::AwaitingRenegotiation { name, notifier, .. } =
                    std::mem::replace(&mut state.phase, Phase::Idle)
                {
                    debug!(command = name, "Renegotiation applied, command resolved");
                    let _ = notifier.send(Ok(()));
                }
            }
            Phase::Idle => {}
        }

        if state.negotiating || state.connection_unstable {
            return;
        }

        let Some(command) = state.pending.pop_front() else {
            return;
        };

        let Ok(handle) = Handle::try_current() else {
            warn!(command = command.name, "No runtime available to run command");
            let _ = command.notifier.send(Err(ClientError::internal_error("no async runtime")));
            return self.advance(state);
        };

        state.phase = Phase::Running;
        let generation = state.generation;
        let queue = self.this.clone();
        handle.spawn(async move {
            let Command { name, resolve, handler, notifier } = command;
            debug!(command = name, "Running command");

            let mut notifier = Some(notifier);
            if resolve == ResolvePolicy::Immediately {
                if let Some(notifier) = notifier.take() {
                    let _ = notifier.send(Ok(()));
                }
            }

            let result = AssertUnwindSafe(handler())
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(ClientError::internal_error("command handler panicked")));

            if let Some(queue) = queue.upgrade() {
                queue.on_handler_finished(generation, name, resolve, notifier, result);
            }
        });
    }

    fn on_handler_finished(
        &self,
        generation: u64,
        name: &'static str,
        resolve: ResolvePolicy,
        notifier: Option<oneshot::Sender<ClientResult<()>>>,
        result: ClientResult<CommandOutcome>,
    ) {
        let mut state = self.lock_state();
        let current = state.generation == generation;

        match (result, notifier) {
            (Err(e), notifier) => {
                warn!(command = name, error = %e, "Command failed");
                if let Some(notifier) = notifier {
                    let _ = notifier.send(Err(e));
                }
            }
            (Ok(CommandOutcome::RenegotiationRequested { offer_seq }), Some(notifier))
                if resolve == ResolvePolicy::AfterRenegotiation =>
            {
                if !current {
                    let _ = notifier.send(Err(ClientError::SessionClosed));
                    return;
                }
                debug!(command = name, offer_seq, "Command waiting for renegotiation");
                state.phase = Phase::AwaitingRenegotiation { name, notifier, offer_seq };
                return self.advance(&mut state);
            }
            (Ok(_), Some(notifier)) => {
                let _ = notifier.send(Ok(()));
            }
            (Ok(_), None) => {}
        }

        if current {
            state.phase = Phase::Idle;
            self.advance(&mut state);
        }
    }
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("CommandQueue")
            .field("pending", &state.pending.len())
            .field("offer_seq", &state.offer_seq)
            .field("negotiating", &state.negotiating)
            .finish()
    }
}
