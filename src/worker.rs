//! The worker pool: the only cross-thread path into the reactor.
//!
//! Each worker blocks on the submission queue
//! (`crossbeam_channel::Receiver<Task>`), runs exactly one `Handler`
//! callback per task, and pushes the resulting `Response` onto the response
//! queue (`sync::signal::SignalSender`), which wakes the reactor thread
//! through its `mio::Registration` self-pipe.
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use mio::tcp::TcpStream;

use crate::decoder::Decoder;
use crate::handler::{Handler, Request};
use crate::message::Response;
use crate::sid::Sid;
use crate::sync::signal::SignalSender;

/// One unit of work handed from the reactor to a worker thread.
///
/// Carries the handler and request state by value: while a task is in
/// flight the session's `handler`/`request` fields are `None` (see
/// `Session`), which is what makes "workers only touch handler/request while
/// running" a type-level property rather than a convention.
pub enum Task<H: Handler> {
    /// Run once, right after a session is admitted.
    Start {
        sid: Sid,
        handler: H,
        request: Request<H::Decoder>,
    },
    /// Run once a full request has been decoded.
    Work {
        sid: Sid,
        handler: H,
        request: Request<H::Decoder>,
    },
    /// The session's socket errored with no worker in flight.
    ///
    /// Carries the socket itself (not just the handler): the fd closes
    /// strictly after `handler.error()`/`handler.close()` run, on the worker
    /// thread — moving it here rather than letting the reactor drop it with
    /// the rest of the `Session` is what makes that ordering hold.
    Error { sid: Sid, handler: H, stream: TcpStream },
    /// A read or write registration timed out with no worker in flight.
    /// Same fd-close-after-callbacks ordering as `Error`.
    Timeout { sid: Sid, handler: H, stream: TcpStream },
}

/// Outcome of a task, handed back to the reactor alongside its `Response` so
/// `on_response`/`on_start_response` can restore `handler`/`request` (for
/// `Start`/`Work`) or finish tearing the session down (for `Error`/
/// `Timeout`, which also call `close`).
pub struct TaskOutcome<H: Handler> {
    pub sid: Sid,
    pub response: Response,
    pub kind: TaskOutcomeKind<H>,
}

/// Kind-specific leftovers of a finished task.
pub enum TaskOutcomeKind<H: Handler> {
    Start {
        handler: H,
        request: Request<H::Decoder>,
        would_exit: bool,
    },
    Work {
        handler: H,
        request: Request<H::Decoder>,
        would_exit: bool,
    },
    /// `error`/`timeout`/`close` have already run by the time this reaches
    /// the reactor; the session is gone.
    Terminal,
    /// Not attributed to any registered session. Carries no handler/request
    /// to restore and never touches the registry; used for responses the
    /// host emits directly (outside the normal accept/decode/handle path)
    /// addressed with the system `Sid`.
    System,
}

fn run_task<H: Handler>(task: Task<H>) -> TaskOutcome<H> {
    match task {
        Task::Start {
            sid,
            mut handler,
            mut request,
        } => {
            let mut response = Response::new(sid);
            let would_exit = handler.start(&mut request, &mut response);
            TaskOutcome {
                sid,
                response,
                kind: TaskOutcomeKind::Start {
                    handler,
                    request,
                    would_exit,
                },
            }
        }
        Task::Work {
            sid,
            mut handler,
            mut request,
        } => {
            let mut response = Response::new(sid);
            let would_exit = handler.handle(&mut request, &mut response);
            TaskOutcome {
                sid,
                response,
                kind: TaskOutcomeKind::Work {
                    handler,
                    request,
                    would_exit,
                },
            }
        }
        Task::Error { sid, mut handler, stream } => {
            let mut response = Response::new(sid);
            handler.error(&mut response);
            handler.close();
            // fd closes here, after both callbacks, on this worker thread.
            drop(stream);
            TaskOutcome {
                sid,
                response,
                kind: TaskOutcomeKind::Terminal,
            }
        }
        Task::Timeout { sid, mut handler, stream } => {
            let mut response = Response::new(sid);
            handler.timeout(&mut response);
            handler.close();
            // fd closes here, after both callbacks, on this worker thread.
            drop(stream);
            TaskOutcome {
                sid,
                response,
                kind: TaskOutcomeKind::Terminal,
            }
        }
    }
}

/// A pool of `N` threads draining the submission queue.
pub struct Pool<H: Handler> {
    submit_tx: Option<Sender<Task<H>>>,
    handles: Vec<JoinHandle<()>>,
}

impl<H: Handler> Pool<H> {
    /// Spawn `worker_threads` threads. Each pushes its finished `TaskOutcome`
    /// onto `response_tx` — a single send that both queues the value and
    /// flips the reactor's self-pipe readiness (`SignalSender::send`), which
    /// is what wakes the reactor thread out of `poll`.
    pub fn spawn(worker_threads: usize, response_tx: SignalSender<TaskOutcome<H>>) -> Self {
        let (submit_tx, submit_rx): (Sender<Task<H>>, Receiver<Task<H>>) = channel::unbounded();

        let handles = (0..worker_threads.max(1))
            .map(|_| {
                let submit_rx = submit_rx.clone();
                let response_tx = response_tx.clone();
                thread::spawn(move || {
                    while let Ok(task) = submit_rx.recv() {
                        let outcome = run_task(task);
                        if response_tx.send(outcome).is_err() {
                            break;
                        }
                    }
                })
            })
            .collect();

        Self {
            submit_tx: Some(submit_tx),
            handles,
        }
    }

    /// Current length of the submission queue, used by admission control at
    /// accept time to refuse new sessions once the backlog is too deep.
    pub fn submission_len(&self) -> usize {
        self.submit_tx.as_ref().map(Sender::len).unwrap_or(0)
    }

    /// Submit a task. Never blocks: the submission queue is unbounded (the
    /// reactor enforces its own backpressure via `req_queue_size` at
    /// admission time rather than blocking here, since the reactor thread
    /// must never block on anything but `poll`).
    pub fn submit(&self, task: Task<H>) {
        if let Some(submit_tx) = &self.submit_tx {
            let _ = submit_tx.send(task);
        }
    }
}

impl<H: Handler> Drop for Pool<H> {
    fn drop(&mut self) {
        // Drop the sending half first so every worker's blocking `recv`
        // returns `Err` once the queue drains, instead of joining threads
        // that are still waiting on a channel this `Pool` itself keeps open.
        self.submit_tx.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

/// The output completion queue: fully delivered (or fully failed) `Message`s
/// the host drains for delivery accounting. A plain unbounded channel;
/// unlike the submission queue this one is never consulted for backpressure.
pub struct CompletionQueue {
    tx: Sender<crate::message::Message>,
    rx: Receiver<crate::message::Message>,
}

impl CompletionQueue {
    /// Create a fresh, empty completion queue.
    pub fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        Self { tx, rx }
    }

    /// Clone of the sending half, held by the reactor.
    pub fn sender(&self) -> Sender<crate::message::Message> {
        self.tx.clone()
    }

    /// Clone of the receiving half, handed to the host so it can drain the
    /// queue from any thread (independent of the reactor, which owns `self`
    /// but never reads from it).
    pub fn receiver(&self) -> Receiver<crate::message::Message> {
        self.rx.clone()
    }

    /// Non-blocking drain for the host.
    pub fn try_recv(&self) -> Option<crate::message::Message> {
        self.rx.try_recv().ok()
    }

    /// Blocking receive for the host.
    pub fn recv(&self) -> Option<crate::message::Message> {
        self.rx.recv().ok()
    }
}

impl Default for CompletionQueue {
    fn default() -> Self {
        Self::new()
    }
}
