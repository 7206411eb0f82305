//! Shared plumbing for the scenario tests: spin up a real `Reactor` on a
//! background thread and hand the test a loopback address to connect to
//! (spawn a thread, sleep briefly for bind to land, then drive the rest
//! from the test thread as a plain client).
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use switchboard::{Handler, Reactor, ReactorConfig};

/// Bind `handler_factory` on an ephemeral loopback port and run it forever on
/// a detached background thread. Returns the address once the listener is
/// confirmed bound.
///
/// `Reactor` is deliberately not `Send` (its registry holds `Rc`-based
/// outbound queues; registry-mutating operations happen only on the reactor
/// thread), so `bind` and `run` both have to happen inside the spawned
/// thread rather than building the reactor here and moving it in.
pub fn spawn_reactor<H, F>(config: ReactorConfig, handler_factory: F) -> SocketAddr
where
    H: Handler,
    F: Fn() -> H + Send + 'static,
{
    let (addr_tx, addr_rx) = mpsc::channel();

    thread::spawn(move || {
        let mut reactor = Reactor::bind("127.0.0.1", 0, config, handler_factory)
            .expect("bind a reactor on an ephemeral loopback port");
        let addr = reactor.local_addr().expect("bound listener has a local addr");
        addr_tx.send(addr).expect("report the bound address back to the test thread");

        // `run` never returns under normal operation; the thread is simply
        // abandoned when the test process exits.
        let _ = reactor.run();
    });

    let addr = addr_rx.recv().expect("reactor thread reported its bound address");
    // Give the listener registration a moment to fully settle before the
    // first client connects.
    thread::sleep(Duration::from_millis(50));
    addr
}

/// Connect a plain blocking client to `addr`.
pub fn connect(addr: SocketAddr) -> TcpStream {
    TcpStream::connect(addr).expect("connect to the test reactor")
}

/// Read one `\n`-terminated line (matches `LineDecoder`/the handlers below).
pub fn read_line(stream: &mut TcpStream) -> String {
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .expect("set a read timeout");
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).expect("read one line from the server");
    line
}

/// Read until EOF, with a bounded timeout so a hung connection fails the
/// test rather than the test binary.
pub fn read_to_eof(stream: &mut TcpStream) -> Vec<u8> {
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .expect("set a read timeout");
    let mut buf = Vec::new();
    let _ = stream.read_to_end(&mut buf);
    buf
}

/// Write a line, matching `LineDecoder`'s `\n` terminator.
pub fn write_line(stream: &mut TcpStream, line: &str) {
    stream.write_all(line.as_bytes()).expect("write to the server");
}
