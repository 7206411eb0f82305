//! The event loop: accept, read, write, response dispatch and the lifecycle
//! helpers that gate destructive transitions on `running`.
//!
//! A single `Poll`/`Events` loop drives five callbacks over one registry of
//! sessions, rather than a pipeline of combinator values — the callbacks
//! share cross-cutting state (admission control, the `running` flag, timer
//! rearming) that doesn't decompose into a linear chain.
use std::io::{self, ErrorKind, Read};
use std::time::Instant;

use mio::tcp::TcpListener;
use mio::{Events, Poll, PollOpt, Ready, Token};

use crate::config::ReactorConfig;
use crate::decoder::DecodeStatus;
use crate::errors::{Error, Result};
use crate::handler::{Handler, Request};
use crate::listen;
use crate::message::{unwrap_or_clone, Message, Response};
use crate::registry::SessionRegistry;
use crate::session::{EventKind, Session, SessionStatus};
use crate::sid::Sid;
use crate::sync::signal::{SignalReceiver, SignalSender};
use crate::timers::TimerWheel;
use crate::transmit;
use crate::worker::{CompletionQueue, Pool, Task, TaskOutcome, TaskOutcomeKind};

/// Registration token for the listening socket. Placed just below
/// `Sid::SYSTEM_SID`'s reserved `Token(usize::MAX)` so it can never collide
/// with a registry-assigned session token (those start at zero and would
/// need ~2^64 live sessions to reach here).
const LISTENER_TOKEN: Token = Token(usize::max_value() - 1);
/// Registration token for the response queue's self-pipe wakeup.
const WAKE_TOKEN: Token = Token(usize::max_value() - 2);

/// Which terminal handler callback a teardown should dispatch to the
/// worker pool.
enum TerminalKind {
    Error,
    Timeout,
}

/// The reactor: owns the listener, the session registry, the per-event
/// timer wheel, and the worker pool. `H` is the host's `Handler`
/// implementation; one reactor drives exactly one handler type.
pub struct Reactor<H: Handler> {
    poll: Poll,
    listener: TcpListener,
    registry: SessionRegistry<Session<H>>,
    timers: TimerWheel,
    response_rx: SignalReceiver<TaskOutcome<H>>,
    /// A clone of the response queue's sending half, kept so the host can
    /// emit a system-originated `Response` without going through a worker
    /// task (see `emit_system_response`).
    system_tx: SignalSender<TaskOutcome<H>>,
    pool: Pool<H>,
    completion: CompletionQueue,
    config: ReactorConfig,
    handler_factory: Box<dyn Fn() -> H + Send>,
}

impl<H: Handler> Reactor<H> {
    /// Bind a listener at `address:port` and build a reactor around it.
    /// `handler_factory` is called once per accepted connection to produce
    /// the `Handler` bound to that session.
    pub fn bind<F>(address: &str, port: u16, config: ReactorConfig, handler_factory: F) -> Result<Self>
    where
        F: Fn() -> H + Send + 'static,
    {
        let listener = listen::tcp_listen(address, port)?;
        let poll = Poll::new()?;
        poll.register(&listener, LISTENER_TOKEN, Ready::readable(), PollOpt::edge())?;

        let response_rx: SignalReceiver<TaskOutcome<H>> = SignalReceiver::unbounded();
        poll.register(&response_rx, WAKE_TOKEN, Ready::readable(), PollOpt::edge())?;
        let response_tx: SignalSender<TaskOutcome<H>> = response_rx.sender();
        let system_tx = response_tx.clone();

        let pool = Pool::spawn(config.worker_threads, response_tx);
        let completion = CompletionQueue::new();

        Ok(Self {
            poll,
            listener,
            registry: SessionRegistry::with_capacity(config.max_connections.max(16)),
            timers: TimerWheel::new(),
            response_rx,
            system_tx,
            pool,
            completion,
            config,
            handler_factory: Box::new(handler_factory),
        })
    }

    /// Emit a `Response` not attributed to any registered session — its
    /// `from_sid` should be `crate::sid::SYSTEM_SID`. Queued exactly like a
    /// worker's outcome and fanned out by `on_response` on the next pass
    /// through the event loop; unlike a worker-produced response it never
    /// touches the registry for its own origin, only for each message's
    /// recipients.
    pub fn emit_system_response(&self, response: Response) {
        let outcome = TaskOutcome {
            sid: response.from_sid(),
            response,
            kind: TaskOutcomeKind::System,
        };
        let _ = self.system_tx.send(outcome);
    }

    /// A clone of the completion queue's receiving half, for the host to
    /// drain independently of the reactor thread.
    pub fn completion_receiver(&self) -> crossbeam::channel::Receiver<Message> {
        self.completion.receiver()
    }

    /// The listener's actual bound address. Mostly useful when `bind` was
    /// called with port `0` and the host needs to learn which ephemeral port
    /// the kernel picked.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the event loop. Blocks forever; returns only on a `Poll` error.
    pub fn run(&mut self) -> Result<()> {
        let mut events = Events::with_capacity(self.config.events_capacity);

        loop {
            let timeout = self.timers.next_timeout(Instant::now());
            self.poll.poll(&mut events, timeout)?;

            for event in &events {
                let token = event.token();
                if token == LISTENER_TOKEN {
                    self.on_accept();
                } else if token == WAKE_TOKEN {
                    while let Ok(outcome) = self.response_rx.try_recv() {
                        self.on_response(outcome);
                    }
                } else if let Some(sid) = self.token_to_sid(token) {
                    let readiness = event.readiness();
                    if readiness.is_readable() {
                        self.on_read(sid, true);
                    }
                    if readiness.is_writable() {
                        self.on_write(sid, true);
                    }
                }
            }

            self.fire_expired_timers();
        }
    }

    fn token_to_sid(&self, token: Token) -> Option<Sid> {
        self.registry.get(token).map(|(_, seq)| Sid::new(token, seq))
    }

    // -------------------------------------------------------------------
    // 		- on_accept -
    // -------------------------------------------------------------------
    fn on_accept(&mut self) {
        loop {
            let (stream, addr) = match self.listener.accept() {
                Ok(pair) => pair,
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) => {
                    warn!("accept failed: {}", e);
                    return;
                }
            };

            if let Err(e) = listen::configure_stream(&stream) {
                warn!("failed to configure accepted stream: {}", e);
                continue;
            }

            let sid = self.registry.next_sid();
            let handler = (self.handler_factory)();
            let decoder = H::Decoder::default();
            let request = Request::new(addr, decoder);
            let session = Session::new(sid, stream, handler, request);
            let assigned = self.registry.put(session);
            debug_assert_eq!(sid, assigned, "next_sid() must predict put()");

            if let Err(e) = self.poll.register(
                self.registry.get(assigned.key).unwrap().0.stream(),
                assigned.key,
                Ready::readable() | Ready::writable(),
                PollOpt::edge(),
            ) {
                warn!("failed to register accepted stream: {}", e);
                self.registry.remove(assigned.key);
                continue;
            }

            if let Some((session, _)) = self.registry.get_mut(assigned.key) {
                session.set_writing(true);
                let read_stamp = session.bump_arm_stamp(EventKind::Read);
                let write_stamp = session.bump_arm_stamp(EventKind::Write);
                let now = Instant::now();
                self.timers
                    .schedule(now + self.config.read_timeout, assigned, EventKind::Read, read_stamp);
                self.timers
                    .schedule(now + self.config.write_timeout, assigned, EventKind::Write, write_stamp);
            }

            let over_capacity = self.registry.count() > self.config.max_connections
                || self.pool.submission_len() >= self.config.req_queue_size;

            if over_capacity {
                info!("refusing session {}: over capacity", assigned);
                let mut body = self.config.refused_msg.clone();
                body.extend_from_slice(b"\r\n");
                let message = Message::new(body).to(assigned).into_shared();
                if let Some((session, _)) = self.registry.get_mut(assigned.key) {
                    session.out_list().push_back(message);
                    session.status_mut().force_exit();
                }
            } else {
                self.do_start(assigned);
            }
        }
    }

    // -------------------------------------------------------------------
    // 		- on_read -
    // -------------------------------------------------------------------
    fn on_read(&mut self, sid: Sid, readable: bool) {
        if !self.is_live(sid) || self.is_reading_stopped(sid) {
            return;
        }

        if !readable {
            if !self.is_running(sid) {
                self.do_timeout(sid);
            } else {
                let _ = self.add_event(sid, EventKind::Read);
            }
            return;
        }

        let mut buf = [0u8; 8 * 1024];
        let read_result = match self.registry.get_mut(sid.key) {
            Some((session, seq)) if seq == sid.seq => session.stream_mut().read(&mut buf),
            _ => return,
        };

        match read_result {
            Ok(n) if n > 0 => {
                let running = match self.registry.get_mut(sid.key) {
                    Some((session, _)) => {
                        session.in_buffer().extend(&buf[..n]);
                        session.is_running()
                    }
                    None => return,
                };

                if !running {
                    let status = match self.registry.get_mut(sid.key) {
                        Some((session, _)) => session.decode(),
                        None => return,
                    };
                    // DecodeStatus::Error is folded into More at this call
                    // site: the core never calls do_error on a decode
                    // failure, only on a socket-level read/write error.
                    if status == DecodeStatus::Ok {
                        self.do_work(sid);
                    }
                }

                let _ = self.add_event(sid, EventKind::Read);
            }
            Ok(_) => {
                // Zero-length read: peer closed its write half.
                if !self.is_running(sid) {
                    self.do_error(sid);
                } else {
                    let _ = self.add_event(sid, EventKind::Read);
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {
                let _ = self.add_event(sid, EventKind::Read);
            }
            Err(_e) => {
                if !self.is_running(sid) {
                    self.do_error(sid);
                } else {
                    let _ = self.add_event(sid, EventKind::Read);
                }
            }
        }
    }

    // -------------------------------------------------------------------
    // 		- on_write -
    // -------------------------------------------------------------------
    fn on_write(&mut self, sid: Sid, writable: bool) {
        if !self.is_live(sid) {
            return;
        }

        if let Some((session, _)) = self.registry.get_mut(sid.key) {
            session.set_writing(false);
        }

        if !writable {
            if !self.is_running(sid) {
                self.do_timeout(sid);
            } else {
                let _ = self.add_event(sid, EventKind::Write);
            }
            return;
        }

        if self.out_list_non_empty(sid) {
            match self.transmit_session(sid) {
                Ok(n) if n > 0 && self.out_list_non_empty(sid) => {
                    let _ = self.add_event(sid, EventKind::Write);
                }
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {}
                Err(_e) => {
                    if !self.is_running(sid) {
                        self.do_error(sid);
                    } else {
                        let _ = self.add_event(sid, EventKind::Write);
                    }
                    return;
                }
            }
        }

        let drained_and_exiting = match self.registry.get(sid.key) {
            Some((session, seq)) if seq == sid.seq => {
                session.out_list_ref().is_empty() && session.status() == SessionStatus::Exit
            }
            _ => return,
        };

        if drained_and_exiting {
            if !self.is_running(sid) {
                self.destroy_session(sid);
            } else {
                let _ = self.add_event(sid, EventKind::Write);
            }
            return;
        }

        if !self.is_running(sid) {
            let status = match self.registry.get_mut(sid.key) {
                Some((session, _)) => session.decode(),
                None => return,
            };
            if status == DecodeStatus::Ok {
                self.do_work(sid);
            }
        }
    }

    // -------------------------------------------------------------------
    // 		- on_response -
    // -------------------------------------------------------------------
    fn on_response(&mut self, outcome: TaskOutcome<H>) {
        let TaskOutcome { sid, mut response, kind } = outcome;

        let rearm_write = match kind {
            TaskOutcomeKind::Start { handler, request, would_exit }
            | TaskOutcomeKind::Work { handler, request, would_exit } => {
                match self.registry.get_mut(sid.key) {
                    Some((session, seq)) if seq == sid.seq => {
                        session.set_running(false);
                        session.restore(handler, request);
                        if would_exit {
                            session.status_mut().request_exit();
                        }
                        session.status_mut().advance_to_exit();
                        if session.status() != SessionStatus::Normal {
                            session.stop_reading();
                        }
                        true
                    }
                    _ => {
                        debug!("response for stale or missing session {}", sid);
                        false
                    }
                }
            }
            TaskOutcomeKind::Terminal => {
                // `do_error`/`do_timeout` already removed the session from
                // the registry before submitting this task; there is
                // nothing left to update on the origin side.
                false
            }
            // Not attributed to any registered session; nothing to restore
            // or re-arm on the origin side, only the messages' recipients
            // matter.
            TaskOutcomeKind::System => false,
        };
        if rearm_write {
            let _ = self.add_event(sid, EventKind::Write);
        }

        while let Some(message) = response.pop_front() {
            self.distribute(sid, message);
        }
    }

    /// Fan a single `Message` out to its recipients.
    fn distribute(&mut self, from_sid: Sid, mut message: Message) {
        if message.total_size() == 0 {
            message.fail_all_remaining();
        } else {
            // Reverse iteration lets entries be removed by index safely.
            let mut index = message.to_list().len();
            while index > 0 {
                index -= 1;
                let dest = message.to_list()[index];
                let deliverable = match self.registry.get_by_sid(dest) {
                    Some(session) => !(session.status() == SessionStatus::Exit && dest != from_sid),
                    None => false,
                };
                if !deliverable {
                    message.fail_at(index);
                }
                // Else: left in `to_list` as-is. Success is only recorded
                // once `transmit` actually puts the bytes on the wire
                // (message.rs `mark_success`), not at fan-out time.
            }
        }

        if message.is_complete() {
            self.do_completion(message);
            return;
        }

        // Whatever is left in `to_list` is the set of live destinations;
        // hand each one a clone-free shared handle so completion can be
        // observed independently from every recipient's outbound queue.
        let shared = message.into_shared();
        let recipients: Vec<Sid> = shared.borrow().to_list().to_vec();
        for dest in recipients {
            if let Some((session, _)) = self.registry.get_mut(dest.key) {
                session.out_list().push_back(shared.clone());
            }
            let _ = self.add_event(dest, EventKind::Write);
        }
    }

    // -------------------------------------------------------------------
    // 		- add_event -
    // -------------------------------------------------------------------
    /// The single arming point for a session's read or write registration.
    /// Idempotent for `EventKind::Write` (a no-op once already armed);
    /// always resets the timer for `EventKind::Read`.
    fn add_event(&mut self, sid: Sid, kind: EventKind) -> Result<()> {
        let ready = {
            let (session, seq) = self
                .registry
                .get_mut(sid.key)
                .ok_or(Error::NoConnection(sid))?;
            if seq != sid.seq {
                return Err(Error::NoConnection(sid));
            }

            if kind == EventKind::Write {
                if session.is_writing() {
                    return Ok(());
                }
                session.set_writing(true);
            }

            let stamp = session.bump_arm_stamp(kind);
            let deadline = Instant::now()
                + match kind {
                    EventKind::Read => self.config.read_timeout,
                    EventKind::Write => self.config.write_timeout,
                };
            self.timers.schedule(deadline, sid, kind, stamp);

            let mut ready = Ready::empty();
            if !session.is_reading_stopped() {
                ready |= Ready::readable();
            }
            if session.is_writing() {
                ready |= Ready::writable();
            }
            ready
        };

        let (session, _) = self.registry.get(sid.key).ok_or(Error::NoConnection(sid))?;
        self.poll.reregister(session.stream(), sid.key, ready, PollOpt::edge())?;
        Ok(())
    }

    fn fire_expired_timers(&mut self) {
        let now = Instant::now();
        for entry in self.timers.pop_expired(now) {
            let current_stamp = match self.registry.get(entry.sid.key) {
                Some((session, seq)) if seq == entry.sid.seq => session.arm_stamp(entry.kind),
                _ => continue,
            };
            if current_stamp != entry.arm_stamp {
                // Superseded by a later re-arm; stale.
                continue;
            }
            match entry.kind {
                EventKind::Read => self.on_read(entry.sid, false),
                EventKind::Write => self.on_write(entry.sid, false),
            }
        }
    }

    // -------------------------------------------------------------------
    // 		- Lifecycle helpers -
    // -------------------------------------------------------------------
    fn do_start(&mut self, sid: Sid) {
        if let Some((session, _)) = self.registry.get_mut(sid.key) {
            session.set_running(true);
            let (handler, request) = session.take_for_task();
            self.pool.submit(Task::Start { sid, handler, request });
        }
    }

    fn do_work(&mut self, sid: Sid) {
        match self.registry.get_mut(sid.key) {
            Some((session, _)) if session.status() == SessionStatus::Normal => {
                session.set_running(true);
                let (handler, request) = session.take_for_task();
                self.pool.submit(Task::Work { sid, handler, request });
            }
            Some((session, _)) => {
                // Dying session: ignore input rather than decode it.
                let len = session.in_buffer().len();
                if len > 0 {
                    debug!("discarding {} bytes of input from a dying session {}", len, sid);
                }
                session.in_buffer().clear();
            }
            None => {}
        }
    }

    fn do_error(&mut self, sid: Sid) {
        self.terminal_teardown(sid, TerminalKind::Error);
    }

    fn do_timeout(&mut self, sid: Sid) {
        self.terminal_teardown(sid, TerminalKind::Timeout);
    }

    fn terminal_teardown(&mut self, sid: Sid, kind: TerminalKind) {
        match self.registry.get(sid.key) {
            Some((session, seq)) if seq == sid.seq => {
                let _ = self.poll.deregister(session.stream());
            }
            _ => return,
        }

        let mut completed = Vec::new();
        if let Some((session, _)) = self.registry.get_mut(sid.key) {
            let drained: Vec<_> = session.out_list().drain(..).collect();
            for shared in drained {
                shared.borrow_mut().fail_one(sid);
                if shared.borrow().is_complete() {
                    completed.push(unwrap_or_clone(shared));
                }
            }
        }
        for message in completed {
            self.do_completion(message);
        }

        if let Some(session) = self.registry.remove(sid.key) {
            // The stream moves to the worker pool along with the handler so
            // the fd is closed only after `error`/`timeout`/`close` run on
            // the worker thread, not here as a side effect of dropping the
            // rest of the session.
            let (stream, handler) = session.into_stream_and_handler();
            match kind {
                TerminalKind::Error => self.pool.submit(Task::Error { sid, handler, stream }),
                TerminalKind::Timeout => self.pool.submit(Task::Timeout { sid, handler, stream }),
            }
        }
    }

    fn destroy_session(&mut self, sid: Sid) {
        match self.registry.get(sid.key) {
            Some((session, seq)) if seq == sid.seq => {
                let _ = self.poll.deregister(session.stream());
            }
            _ => return,
        }
        if let Some(mut session) = self.registry.remove(sid.key) {
            // Normal-exit close runs on the reactor thread; error/timeout
            // closes run on the worker thread instead.
            session.handler_mut().close();
        }
    }

    fn do_completion(&mut self, message: Message) {
        let _ = self.completion.sender().send(message);
    }

    // -------------------------------------------------------------------
    // 		- Small registry-lookup helpers -
    // -------------------------------------------------------------------
    fn is_live(&self, sid: Sid) -> bool {
        match self.registry.get(sid.key) {
            Some((_, seq)) => seq == sid.seq,
            None => false,
        }
    }

    fn is_running(&self, sid: Sid) -> bool {
        match self.registry.get(sid.key) {
            Some((session, seq)) if seq == sid.seq => session.is_running(),
            _ => false,
        }
    }

    fn is_reading_stopped(&self, sid: Sid) -> bool {
        match self.registry.get(sid.key) {
            Some((session, seq)) if seq == sid.seq => session.is_reading_stopped(),
            _ => true,
        }
    }

    fn out_list_non_empty(&self, sid: Sid) -> bool {
        match self.registry.get(sid.key) {
            Some((session, seq)) if seq == sid.seq => !session.out_list_ref().is_empty(),
            _ => false,
        }
    }

    fn transmit_session(&mut self, sid: Sid) -> io::Result<usize> {
        let mut completed = Vec::new();
        let result = match self.registry.get_mut(sid.key) {
            Some((session, seq)) if seq == sid.seq => {
                let (stream, out_list, out_offset) = session.io_parts();
                transmit::transmit(stream, out_list, out_offset, sid, |msg| completed.push(msg))
            }
            _ => Ok(0),
        };
        for message in completed {
            self.do_completion(message);
        }
        result
    }
}
