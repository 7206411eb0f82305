//! Per-connection state machine.
use std::collections::VecDeque;

use mio::tcp::TcpStream;

use crate::buffer::Buffer;
use crate::decoder::{DecodeStatus, Decoder};
use crate::handler::{Handler, Request};
use crate::message::SharedMessage;
use crate::sid::Sid;

/// Lifecycle state of a `Session`.
///
/// Transitions are monotonic in the direction `Normal -> WouldExit -> Exit`;
/// there is no public way to move a session backwards. `WouldExit` means
/// "finish draining outbound, then destroy"; `Exit` means "drain complete (or
/// forced), destroy on the next safe point."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Accepting reads and writes normally.
    Normal,
    /// A handler requested shutdown; still draining outbound.
    WouldExit,
    /// Drain complete (or forced); destroy at the next safe point.
    Exit,
}

impl SessionStatus {
    /// Advance `Normal -> WouldExit`. No-op (does not move backwards) if
    /// already past `Normal`.
    pub fn request_exit(&mut self) {
        if *self == SessionStatus::Normal {
            *self = SessionStatus::WouldExit;
        }
    }

    /// Advance `WouldExit -> Exit`. No-op if not currently `WouldExit`.
    pub fn advance_to_exit(&mut self) {
        if *self == SessionStatus::WouldExit {
            *self = SessionStatus::Exit;
        }
    }

    /// Force straight to `Exit` regardless of current state (used by the
    /// error/timeout/admission-refusal paths, which terminate immediately).
    pub fn force_exit(&mut self) {
        *self = SessionStatus::Exit;
    }
}

/// Which of a session's two event registrations a timer entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// The read registration.
    Read,
    /// The write registration.
    Write,
}

/// Per-connection state: inbound buffer, outbound queue, status, and the
/// bookkeeping the reactor needs to arm/re-arm events and gate destructive
/// transitions on `running`.
pub struct Session<H: Handler> {
    sid: Sid,
    stream: TcpStream,
    status: SessionStatus,
    running: bool,
    writing: bool,
    in_buffer: Buffer,
    out_list: VecDeque<SharedMessage>,
    out_offset: usize,
    /// `None` exactly while a worker task for this session is in flight —
    /// `do_start`/`do_work` hand ownership of the handler and request state
    /// to the worker pool over the submission queue, and `on_response`
    /// restores it when the matching outcome comes back. This makes "a
    /// worker only touches handler/request while running" a type-level
    /// invariant instead of a convention.
    handler: Option<H>,
    request: Option<Request<H::Decoder>>,
    /// Arm-stamp of the current read registration; bumped every re-arm so a
    /// stale timer-heap entry can be told apart from the live one.
    read_arm_stamp: u64,
    /// Arm-stamp of the current write registration.
    write_arm_stamp: u64,
    /// Set once `on_response` sees this session in a non-`Normal` status, at
    /// which point reads are no longer ingested. Read events and read
    /// timeouts are silently ignored once this is set.
    reading_stopped: bool,
}

impl<H: Handler> Session<H> {
    /// Construct a freshly accepted session. Not yet registered with the
    /// event loop or admitted into a registry — the reactor does both right
    /// after construction.
    pub fn new(sid: Sid, stream: TcpStream, handler: H, request: Request<H::Decoder>) -> Self {
        Self {
            sid,
            stream,
            status: SessionStatus::Normal,
            running: false,
            writing: false,
            in_buffer: Buffer::with_capacity(4 * 1024),
            out_list: VecDeque::new(),
            out_offset: 0,
            handler: Some(handler),
            request: Some(request),
            read_arm_stamp: 0,
            write_arm_stamp: 0,
            reading_stopped: false,
        }
    }

    /// This session's identity.
    pub fn sid(&self) -> Sid {
        self.sid
    }

    /// The underlying socket.
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    /// Mutable access to the underlying socket (transmit path, reads).
    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// Current lifecycle state.
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Mutable access to lifecycle state (monotonic transitions only, see
    /// `SessionStatus`).
    pub fn status_mut(&mut self) -> &mut SessionStatus {
        &mut self.status
    }

    /// `true` while a worker task for this session is in flight.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Mark a worker task as in flight. Called by `do_start`/`do_work`
    /// before submission.
    pub fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    /// `true` if a write registration is currently armed.
    pub fn is_writing(&self) -> bool {
        self.writing
    }

    /// Record whether a write registration is armed. Prevents
    /// `add_event(EV_WRITE)` from double-arming.
    pub fn set_writing(&mut self, writing: bool) {
        self.writing = writing;
    }

    /// The session's inbound buffer.
    pub fn in_buffer(&mut self) -> &mut Buffer {
        &mut self.in_buffer
    }

    /// The session's outbound queue.
    pub fn out_list(&mut self) -> &mut VecDeque<SharedMessage> {
        &mut self.out_list
    }

    /// Immutable view of the outbound queue (boundary checks, tests).
    pub fn out_list_ref(&self) -> &VecDeque<SharedMessage> {
        &self.out_list
    }

    /// Byte offset into the head of `out_list` already written.
    pub fn out_offset(&self) -> usize {
        self.out_offset
    }

    /// Set the byte offset into the head of `out_list`.
    pub fn set_out_offset(&mut self, offset: usize) {
        self.out_offset = offset;
    }

    /// Borrow the stream, outbound queue and head offset together — the
    /// transmit path needs all three at once, and taking them as three
    /// separate `&mut self` method calls would conflict under the borrow
    /// checker even though the underlying fields are disjoint.
    pub fn io_parts(&mut self) -> (&mut TcpStream, &mut VecDeque<SharedMessage>, &mut usize) {
        (&mut self.stream, &mut self.out_list, &mut self.out_offset)
    }

    /// The bound handler.
    ///
    /// Panics if called while a worker task for this session is in flight
    /// (`handler`/`request` are `None` between `take_for_task` and
    /// `restore`) — the reactor never calls this during that window.
    pub fn handler_mut(&mut self) -> &mut H {
        self.handler
            .as_mut()
            .expect("handler is owned by the worker pool while a task is in flight")
    }

    /// The session's request state (peer address + decoder). Same panic
    /// discipline as `handler_mut`.
    pub fn request_mut(&mut self) -> &mut Request<H::Decoder> {
        self.request
            .as_mut()
            .expect("request is owned by the worker pool while a task is in flight")
    }

    /// Take ownership of `handler`/`request` to hand them to a worker task.
    /// Leaves both `None` until `restore` is called.
    pub fn take_for_task(&mut self) -> (H, Request<H::Decoder>) {
        let handler = self
            .handler
            .take()
            .expect("take_for_task called while a task was already in flight");
        let request = self
            .request
            .take()
            .expect("take_for_task called while a task was already in flight");
        (handler, request)
    }

    /// Restore `handler`/`request` after a worker task completes.
    pub fn restore(&mut self, handler: H, request: Request<H::Decoder>) {
        self.handler = Some(handler);
        self.request = Some(request);
    }

    /// Take ownership of just the handler, for `do_error`/`do_timeout`: the
    /// session is being removed from the registry either way, so `request`
    /// is simply dropped along with the rest of the `Session`.
    pub fn take_handler(&mut self) -> H {
        self.handler
            .take()
            .expect("take_handler called while a task was already in flight")
    }

    /// Decompose a removed session into its socket and handler, for
    /// `do_error`/`do_timeout`: both are handed to the worker pool so the fd
    /// is closed on the worker thread only after `error`/`timeout`/`close`
    /// run there, instead of closing it here as a side effect of dropping
    /// the rest of the session. Everything else (`in_buffer`, `out_list` —
    /// already drained by the caller — `request`) is simply dropped on the
    /// reactor thread; only the fd's close needs deferring.
    pub fn into_stream_and_handler(mut self) -> (TcpStream, H) {
        let handler = self.take_handler();
        (self.stream, handler)
    }

    /// Run the decoder over the current `in_buffer`. Only called while
    /// `handler`/`request` are owned by the session (`running == false`).
    pub fn decode(&mut self) -> DecodeStatus {
        let request = self
            .request
            .as_mut()
            .expect("decode called while a task was already in flight");
        request.decoder().decode(&mut self.in_buffer)
    }

    /// `true` once `on_response` has stopped this session's read side
    /// (status moved past `Normal`). Read events and read timeouts become
    /// no-ops from then on.
    pub fn is_reading_stopped(&self) -> bool {
        self.reading_stopped
    }

    /// Stop ingesting further input. Idempotent.
    pub fn stop_reading(&mut self) {
        self.reading_stopped = true;
    }

    /// Current arm-stamp for `kind`.
    pub fn arm_stamp(&self, kind: EventKind) -> u64 {
        match kind {
            EventKind::Read => self.read_arm_stamp,
            EventKind::Write => self.write_arm_stamp,
        }
    }

    /// Bump and return the new arm-stamp for `kind`. Called every time
    /// `add_event` (re-)arms that registration.
    pub fn bump_arm_stamp(&mut self, kind: EventKind) -> u64 {
        let stamp = match kind {
            EventKind::Read => &mut self.read_arm_stamp,
            EventKind::Write => &mut self.write_arm_stamp,
        };
        *stamp += 1;
        *stamp
    }
}
