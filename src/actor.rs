//! Concurrent access to a [`Kernel`] by message passing.
//!
//! One worker thread owns the kernel and drains an unbounded queue of
//! commands in arrival order. Each caller attaches a private one-shot reply
//! channel to its command and waits on it, so any number of threads can share
//! an `&Actor` while exactly one of them ever touches the handle.

use crate::error::{Error, Result};
use crate::kernel::{ExecutionResult, Executor, Kernel, Request};
use crate::locator::Target;
use futures::channel::{mpsc, oneshot};
use rusqlite::ErrorCode;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info, warn};

type Reply = oneshot::Sender<Result<ExecutionResult>>;

enum Command {
    Execute { request: Request, reply: Reply },
    Stop,
}

/// Lifecycle of the worker behind an [`Actor`].
///
/// [`Actor::shutdown`] consumes the actor, so callers only ever observe
/// `Running` or `Poisoned`. `Draining` and `Stopped` show up in the shutdown
/// logs. Poisoning is never overwritten by `Draining`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ActorState {
    /// Accepting and serving commands.
    Running,
    /// The handle reported it is unusable; every command now fails.
    Poisoned,
    /// Stop was sent; earlier commands are still being served.
    Draining,
    /// The worker closed the kernel and exited.
    Stopped,
}

impl ActorState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ActorState::Running,
            1 => ActorState::Poisoned,
            2 => ActorState::Draining,
            _ => ActorState::Stopped,
        }
    }
}

#[derive(Debug, Clone)]
struct SharedState(Arc<AtomicU8>);

impl SharedState {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(ActorState::Running as u8)))
    }

    fn get(&self) -> ActorState {
        ActorState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: ActorState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Moves a running worker to `Draining`; any other state is kept.
    fn begin_draining(&self) -> ActorState {
        match self.0.compare_exchange(
            ActorState::Running as u8,
            ActorState::Draining as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => ActorState::Draining,
            Err(current) => ActorState::from_u8(current),
        }
    }
}

/// A kernel living on its own worker thread.
pub struct Actor {
    commands: mpsc::UnboundedSender<Command>,
    worker: JoinHandle<Result<()>>,
    state: SharedState,
    target: Target,
}

impl Actor {
    /// Starts the worker, which opens the database itself. Returns once the
    /// kernel is open, or with the error that prevented opening it.
    pub fn spawn(target: &Target) -> Result<Self> {
        let (commands, queue) = mpsc::unbounded();
        let (ready_tx, ready_rx) = oneshot::channel();
        let state = SharedState::new();

        let worker = thread::Builder::new()
            .name("storage-worker".to_string())
            .spawn({
                let target = target.clone();
                let state = state.clone();
                move || serve(&target, queue, ready_tx, &state)
            })?;

        match futures::executor::block_on(ready_rx) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                let _ = worker.join();
                return Err(err);
            }
            Err(oneshot::Canceled) => {
                return Err(match worker.join() {
                    Ok(Err(err)) => err,
                    _ => Error::WorkerPanicked,
                });
            }
        }

        info!(target = %target, "storage actor started");
        Ok(Self {
            commands,
            worker,
            state,
            target: target.clone(),
        })
    }

    pub fn state(&self) -> ActorState {
        self.state.get()
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    fn enqueue(&self, request: Request) -> Result<oneshot::Receiver<Result<ExecutionResult>>> {
        let (reply, receiver) = oneshot::channel();
        self.commands
            .unbounded_send(Command::Execute { request, reply })
            .map_err(|_| Error::WorkerGone)?;
        Ok(receiver)
    }

    /// Queues the request and blocks the calling thread until the worker has
    /// run it.
    pub fn run(&self, request: Request) -> Result<ExecutionResult> {
        let receiver = self.enqueue(request)?;
        futures::executor::block_on(receiver).map_err(|_| Error::WorkerGone)?
    }

    /// Like [`Actor::run`], for callers that are themselves async.
    pub async fn execute_async(&self, request: Request) -> Result<ExecutionResult> {
        let receiver = self.enqueue(request)?;
        receiver.await.map_err(|_| Error::WorkerGone)?
    }

    /// Stops the worker after everything queued before this call has been
    /// served, then joins it.
    ///
    /// Returns the kernel's close error, or the last failure that could not be
    /// delivered to its caller, or [`Error::WorkerPanicked`].
    pub fn shutdown(self) -> Result<()> {
        let state = self.state.begin_draining();
        info!(target = %self.target, ?state, "stopping storage actor");
        // a send error means the worker is already gone; join reports why
        let _ = self.commands.unbounded_send(Command::Stop);

        let outcome = self.worker.join().unwrap_or(Err(Error::WorkerPanicked));
        self.state.set(ActorState::Stopped);
        match &outcome {
            Ok(()) => info!(target = %self.target, "storage actor stopped"),
            Err(err) => error!(target = %self.target, %err, "storage actor failed during shutdown"),
        }
        outcome
    }
}

impl Executor for Actor {
    fn execute(&self, request: Request) -> Result<ExecutionResult> {
        self.run(request)
    }

    fn close(self) -> Result<()> {
        self.shutdown()
    }
}

impl std::fmt::Debug for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Actor")
            .field("target", &self.target)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

fn serve(
    target: &Target,
    queue: mpsc::UnboundedReceiver<Command>,
    ready: oneshot::Sender<Result<()>>,
    state: &SharedState,
) -> Result<()> {
    let kernel = match Kernel::open(target) {
        Ok(kernel) => {
            let _ = ready.send(Ok(()));
            kernel
        }
        Err(err) => {
            let _ = ready.send(Err(err));
            state.set(ActorState::Stopped);
            return Ok(());
        }
    };

    let mut poisoned: Option<String> = None;
    let mut undelivered: Option<Error> = None;

    for command in futures::executor::block_on_stream(queue) {
        let (request, reply) = match command {
            Command::Stop => break,
            Command::Execute { request, reply } => (request, reply),
        };

        let result = match &poisoned {
            Some(reason) => Err(Error::Poisoned(reason.clone())),
            None => kernel.run(&request),
        };

        if let Err(Error::Sqlite(err)) = &result {
            if handle_unusable(err) {
                warn!(target = %target, %err, "storage handle is unusable, poisoning worker");
                poisoned = Some(err.to_string());
                state.set(ActorState::Poisoned);
            }
        }

        if let Err(Err(err)) = reply.send(result) {
            warn!(statement = %request.statement, %err, "caller went away before its failure was delivered");
            undelivered = Some(err);
        }
    }

    let closed = kernel.close();
    state.set(ActorState::Stopped);
    closed?;
    undelivered.map_or(Ok(()), Err)
}

fn handle_unusable(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(failure, _) => matches!(
            failure.code,
            ErrorCode::DatabaseCorrupt
                | ErrorCode::NotADatabase
                | ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure
        ),
        _ => false,
    }
}
