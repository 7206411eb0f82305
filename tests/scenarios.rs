//! End-to-end scenario coverage: a real `Reactor` bound to a loopback port,
//! driven by real `TcpStream` clients.
mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use switchboard::decoder::{DecodeStatus, Decoder};
use switchboard::handler::Request;
use switchboard::{Buffer, Message, ReactorConfig, Response, Sid};

use common::{connect, read_line, read_to_eof, spawn_reactor, write_line};

/// Treats `\n` as a request terminator, same convention as the crate's own
/// internal test decoder.
#[derive(Default)]
struct LineDecoder {
    last: Vec<u8>,
}

impl Decoder for LineDecoder {
    fn decode(&mut self, buffer: &mut Buffer) -> DecodeStatus {
        match buffer.as_slice().iter().position(|&b| b == b'\n') {
            Some(pos) => {
                self.last = buffer.as_slice()[..pos].to_vec();
                buffer.consume(pos + 1);
                DecodeStatus::Ok
            }
            None => DecodeStatus::More,
        }
    }
}

// -----------------------------------------------------------------------------
// 		- Scenario 1: echo single recipient -
// -----------------------------------------------------------------------------
struct EchoHandler;

impl switchboard::Handler for EchoHandler {
    type Decoder = LineDecoder;

    fn handle(&mut self, _request: &mut Request<Self::Decoder>, response: &mut Response) -> bool {
        response.push(Message::new(&b"PONG"[..]).with_block(&b"\r\n"[..]).to(response.from_sid()));
        false
    }
}

#[test]
fn echo_single_recipient() {
    let addr = spawn_reactor(ReactorConfig::default(), || EchoHandler);
    let mut client = connect(addr);
    write_line(&mut client, "ping\n");
    assert_eq!(read_line(&mut client), "PONG\r\n");

    // Connection remains open: a second round-trip still works.
    write_line(&mut client, "ping again\n");
    assert_eq!(read_line(&mut client), "PONG\r\n");
}

// -----------------------------------------------------------------------------
// 		- Scenario 2: busy refusal -
// -----------------------------------------------------------------------------
struct NoopHandler;

impl switchboard::Handler for NoopHandler {
    type Decoder = LineDecoder;

    fn handle(&mut self, _request: &mut Request<Self::Decoder>, _response: &mut Response) -> bool {
        false
    }
}

#[test]
fn busy_refusal() {
    let mut config = ReactorConfig::default();
    config.max_connections = 1;
    config.req_queue_size = 1;
    config.refused_msg = b"BUSY".to_vec();
    let addr = spawn_reactor(config, || NoopHandler);

    let _first = connect(addr);
    thread::sleep(Duration::from_millis(50));

    let mut second = connect(addr);
    assert_eq!(read_line(&mut second), "BUSY\r\n");
    let rest = read_to_eof(&mut second);
    assert!(rest.is_empty(), "refused connection should close after BUSY");
}

// -----------------------------------------------------------------------------
// 		- Scenario 3: peer delivery with one stale recipient -
// -----------------------------------------------------------------------------
struct PeerHandler {
    peers: Arc<Mutex<Vec<Sid>>>,
}

impl switchboard::Handler for PeerHandler {
    type Decoder = LineDecoder;

    fn start(&mut self, _request: &mut Request<Self::Decoder>, response: &mut Response) -> bool {
        self.peers.lock().unwrap().push(response.from_sid());
        false
    }

    fn handle(&mut self, _request: &mut Request<Self::Decoder>, response: &mut Response) -> bool {
        let targets: Vec<Sid> = self.peers.lock().unwrap().clone();
        response.push(Message::new(&b"HI"[..]).with_block(&b"\r\n"[..]).to_all(targets));
        false
    }
}

#[test]
fn peer_delivery_with_one_stale_recipient() {
    let peers = Arc::new(Mutex::new(Vec::new()));
    let addr = spawn_reactor(ReactorConfig::default(), {
        let peers = Arc::clone(&peers);
        move || PeerHandler { peers: Arc::clone(&peers) }
    });

    let mut a = connect(addr);
    thread::sleep(Duration::from_millis(50));
    let b = connect(addr);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(peers.lock().unwrap().len(), 2, "both sessions must have registered in start()");

    drop(b);
    thread::sleep(Duration::from_millis(150));

    write_line(&mut a, "hi\n");
    assert_eq!(read_line(&mut a), "HI\r\n");
}

// -----------------------------------------------------------------------------
// 		- Scenario 4: running-deferred error -
// -----------------------------------------------------------------------------
struct DeferredErrorHandler {
    delay: Duration,
    error_calls: Arc<AtomicUsize>,
    close_calls: Arc<AtomicUsize>,
}

impl switchboard::Handler for DeferredErrorHandler {
    type Decoder = LineDecoder;

    fn handle(&mut self, _request: &mut Request<Self::Decoder>, response: &mut Response) -> bool {
        thread::sleep(self.delay);
        response.push(Message::new(&b"OK"[..]).with_block(&b"\r\n"[..]).to(response.from_sid()));
        false
    }

    fn error(&mut self, _response: &mut Response) {
        self.error_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&mut self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn running_deferred_error_closes_exactly_once() {
    let error_calls = Arc::new(AtomicUsize::new(0));
    let close_calls = Arc::new(AtomicUsize::new(0));
    let delay = Duration::from_millis(250);

    let addr = spawn_reactor(ReactorConfig::default(), {
        let error_calls = Arc::clone(&error_calls);
        let close_calls = Arc::clone(&close_calls);
        move || DeferredErrorHandler {
            delay,
            error_calls: Arc::clone(&error_calls),
            close_calls: Arc::clone(&close_calls),
        }
    });

    let mut client = connect(addr);
    write_line(&mut client, "go\n");
    // Drop the connection while the handler is still "running" (sleeping):
    // onRead should see EOF with running == 1 and defer, not destroy.
    drop(client);

    thread::sleep(delay + Duration::from_millis(500));
    assert_eq!(error_calls.load(Ordering::SeqCst), 1);
    assert_eq!(close_calls.load(Ordering::SeqCst), 1);
}

// -----------------------------------------------------------------------------
// 		- Scenario 5: partial write resumption -
// -----------------------------------------------------------------------------
struct BigMessageHandler;

impl switchboard::Handler for BigMessageHandler {
    type Decoder = LineDecoder;

    fn handle(&mut self, _request: &mut Request<Self::Decoder>, response: &mut Response) -> bool {
        let body = vec![b'x'; 200_000];
        response.push(Message::new(body).with_block(&b"\r\n"[..]).to(response.from_sid()));
        false
    }
}

#[test]
fn partial_write_resumption_delivers_every_byte() {
    let addr = spawn_reactor(ReactorConfig::default(), || BigMessageHandler);
    let mut client = connect(addr);
    write_line(&mut client, "go\n");

    // Stall before reading to encourage the server to fill the socket
    // buffer and hit a partial `write_vectored` before the client drains it.
    thread::sleep(Duration::from_millis(100));

    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match std::io::Read::read(&mut client, &mut buf) {
            Ok(0) => break,
            Ok(n) => {
                received.extend_from_slice(&buf[..n]);
                if received.len() >= 200_002 {
                    break;
                }
            }
            Err(e) => panic!("unexpected read error: {}", e),
        }
    }

    assert_eq!(received.len(), 200_002);
    assert_eq!(&received[200_000..], b"\r\n");
    assert!(received[..200_000].iter().all(|&b| b == b'x'));
}

// -----------------------------------------------------------------------------
// 		- Scenario 6: WouldExit drain -
// -----------------------------------------------------------------------------
struct ShutdownHandler;

impl switchboard::Handler for ShutdownHandler {
    type Decoder = LineDecoder;

    fn handle(&mut self, _request: &mut Request<Self::Decoder>, response: &mut Response) -> bool {
        response.push(Message::new(&b"BYE"[..]).with_block(&b"\r\n"[..]).to(response.from_sid()));
        true
    }
}

#[test]
fn would_exit_drains_outbound_then_closes() {
    let addr = spawn_reactor(ReactorConfig::default(), || ShutdownHandler);
    let mut client = connect(addr);
    write_line(&mut client, "quit\n");
    assert_eq!(read_line(&mut client), "BYE\r\n");

    let rest = read_to_eof(&mut client);
    assert!(rest.is_empty(), "session must close once outList drains and running == 0");
}
