//! The handler contract: user code executed on the worker pool.
use crate::decoder::Decoder;
use crate::message::Response;

/// Per-connection request state: the client's address, whatever the decoder
/// has parsed so far, and the decoder itself.
///
/// `D` is the concrete `Decoder` the host wired up for this handler; the core
/// never interprets the parsed state, it only drives `D::decode`.
pub struct Request<D> {
    peer: std::net::SocketAddr,
    decoder: D,
}

impl<D: Decoder> Request<D> {
    /// Construct request state for a freshly accepted connection.
    pub fn new(peer: std::net::SocketAddr, decoder: D) -> Self {
        Self { peer, decoder }
    }

    /// The connecting client's address.
    pub fn peer_addr(&self) -> std::net::SocketAddr {
        self.peer
    }

    /// The decoder bound to this connection.
    pub fn decoder(&mut self) -> &mut D {
        &mut self.decoder
    }
}

/// User-supplied request handler, bound to a session at accept time and
/// invoked on the worker pool.
///
/// A `true` return from `start`/`handle` requests a graceful shutdown of the
/// session: its status moves to `WouldExit`, its outbound queue is allowed
/// to drain, and it is destroyed once empty. `error`/`timeout`/`close` are
/// each called exactly once per session over its lifetime.
pub trait Handler: Send + 'static {
    /// The decoder this handler's requests are parsed with.
    ///
    /// `Send` because `Request<Self::Decoder>` crosses the worker-pool
    /// submission/response channels alongside the handler itself.
    type Decoder: Decoder + Default + Send;

    /// Called once, immediately after a session is admitted.
    ///
    /// Returning `true` requests a graceful shutdown before the handler ever
    /// sees a decoded request.
    fn start(&mut self, request: &mut Request<Self::Decoder>, response: &mut Response) -> bool {
        let _ = (request, response);
        false
    }

    /// Called once per decoded request.
    ///
    /// Returning `true` requests a graceful shutdown: the session finishes
    /// draining its outbound queue and is then destroyed.
    fn handle(&mut self, request: &mut Request<Self::Decoder>, response: &mut Response) -> bool;

    /// Called when the session's socket errors out on a read or write with
    /// no handler in flight. Always runs on the worker thread; `close`
    /// follows immediately after on the same thread.
    fn error(&mut self, response: &mut Response) {
        let _ = response;
    }

    /// Called when a read or write event times out with no handler in
    /// flight. Always runs on the worker thread; `close` follows immediately
    /// after on the same thread.
    fn timeout(&mut self, response: &mut Response) {
        let _ = response;
    }

    /// Called exactly once per session, as the final step of its lifecycle:
    /// on the reactor thread for a normal (`Exit`-drain) close, on the worker
    /// thread for an error or timeout close.
    fn close(&mut self) {}
}
