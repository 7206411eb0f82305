//! Scatter-gather transmit path.
use std::cell::Ref;
use std::collections::VecDeque;
use std::io::{self, ErrorKind, IoSlice, Write};

use crate::message::{unwrap_or_clone, Message, SharedMessage};
use crate::sid::Sid;

/// Upper bound on how many `IoSlice`s a single `write_vectored` call builds.
///
/// Queried via `sysconf(_SC_IOV_MAX)` on unix, falling back to 8 where the
/// query fails or on non-unix targets; a message with more fragments than
/// this is simply written across more than one `transmit` call, resumed via
/// `out_offset` exactly like any other partial write.
#[cfg(unix)]
pub fn iov_max() -> usize {
    let max = unsafe { libc::sysconf(libc::_SC_IOV_MAX) };
    if max > 0 {
        max as usize
    } else {
        8
    }
}

#[cfg(not(unix))]
pub fn iov_max() -> usize {
    8
}

/// Attempt to drain `out_list` onto `stream`, honoring `out_offset` (bytes of
/// the head message already written) and reporting per-message completion
/// through `on_completion`.
///
/// Returns the total number of bytes written this call. A `WouldBlock` error
/// from the underlying write is swallowed and treated as a natural stopping
/// point (the return value reflects whatever was written before it); any
/// other I/O error is propagated so the caller (`Reactor::on_write`) can
/// decide between retry and `do_error`.
pub fn transmit<W: Write>(
    stream: &mut W,
    out_list: &mut VecDeque<SharedMessage>,
    out_offset: &mut usize,
    self_sid: Sid,
    mut on_completion: impl FnMut(Message),
) -> io::Result<usize> {
    let max_iov = iov_max();
    let mut total_written = 0usize;

    loop {
        if out_list.is_empty() {
            return Ok(total_written);
        }

        let refs: Vec<Ref<Message>> = out_list.iter().map(|m| m.borrow()).collect();
        let mut slices: Vec<IoSlice> = Vec::with_capacity(max_iov);
        let mut skip = *out_offset;

        'build: for msg in refs.iter() {
            let header = msg.header().as_slice();
            if skip >= header.len() {
                skip -= header.len();
            } else {
                slices.push(IoSlice::new(&header[skip..]));
                skip = 0;
                if slices.len() >= max_iov {
                    break 'build;
                }
            }

            for block in msg.follow_blocks() {
                let bytes = block.as_slice();
                if skip >= bytes.len() {
                    skip -= bytes.len();
                } else {
                    slices.push(IoSlice::new(&bytes[skip..]));
                    skip = 0;
                    if slices.len() >= max_iov {
                        break 'build;
                    }
                }
            }
        }

        let built_total: usize = slices.iter().map(|s| s.len()).sum();
        let write_result = stream.write_vectored(&slices);
        drop(slices);
        drop(refs);

        let written = match write_result {
            Ok(n) => n,
            Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(total_written),
            Err(e) => return Err(e),
        };

        if written == 0 {
            return Ok(total_written);
        }

        total_written += written;
        *out_offset += written;

        // Pop every message fully covered by the new out_offset.
        loop {
            let head_total = match out_list.front() {
                Some(msg) => msg.borrow().total_size(),
                None => break,
            };
            if *out_offset < head_total {
                break;
            }
            let msg_rc = out_list.pop_front().expect("checked non-empty above");
            *out_offset -= head_total;
            msg_rc.borrow_mut().mark_success(self_sid);
            let complete = msg_rc.borrow().is_complete();
            if complete {
                on_completion(unwrap_or_clone(msg_rc));
            }
        }

        if written < built_total {
            // Partial write: stop here, the remainder waits for the next
            // writable event.
            return Ok(total_written);
        }
        // The whole built batch was accepted; loop to see if more is queued.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use mio::Token;

    fn sid(n: usize) -> Sid {
        Sid::new(Token(n), 0)
    }

    struct VecWriter(Vec<u8>);
    impl Write for VecWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn empty_out_list_is_a_noop() {
        let mut stream = VecWriter(Vec::new());
        let mut out_list = VecDeque::new();
        let mut offset = 0;
        let n = transmit(&mut stream, &mut out_list, &mut offset, sid(1), |_| {}).unwrap();
        assert_eq!(n, 0);
        assert!(stream.0.is_empty());
    }

    #[test]
    fn single_recipient_message_completes_and_is_reported() {
        let mut stream = VecWriter(Vec::new());
        let mut out_list = VecDeque::new();
        let self_sid = sid(1);
        let msg = Message::new(&b"PONG\r\n"[..]).to(self_sid).into_shared();
        out_list.push_back(msg);
        let mut offset = 0;
        let mut completed = None;
        transmit(&mut stream, &mut out_list, &mut offset, self_sid, |m| {
            completed = Some(m);
        })
        .unwrap();

        assert_eq!(stream.0, b"PONG\r\n");
        assert!(out_list.is_empty());
        let completed = completed.expect("message should have completed");
        assert_eq!(completed.success(), &[self_sid]);
        assert!(completed.failure().is_empty());
    }

    #[test]
    fn partial_write_resumes_from_out_offset() {
        struct Throttled(Vec<u8>);
        impl Write for Throttled {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                let n = buf.len().min(4);
                self.0.extend_from_slice(&buf[..n]);
                Ok(n)
            }
            fn write_vectored(&mut self, bufs: &[IoSlice]) -> io::Result<usize> {
                let buf = bufs[0];
                self.write(&buf)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut stream = Throttled(Vec::new());
        let mut out_list = VecDeque::new();
        let self_sid = sid(7);
        let payload = vec![b'x'; 10_000];
        out_list.push_back(Message::new(payload.clone()).to(self_sid).into_shared());
        let mut offset = 0;

        let first = transmit(&mut stream, &mut out_list, &mut offset, self_sid, |_| {}).unwrap();
        assert_eq!(first, 4);
        assert_eq!(offset, 4);
        assert_eq!(out_list.len(), 1, "message stays at the head, not popped yet");

        // Drain the rest.
        let mut total = first;
        while !out_list.is_empty() {
            total += transmit(&mut stream, &mut out_list, &mut offset, self_sid, |_| {}).unwrap();
        }
        assert_eq!(total, payload.len());
        assert_eq!(stream.0.len(), payload.len());
    }

    #[test]
    fn zero_size_message_completes_with_all_failures() {
        let self_sid = sid(1);
        let other = sid(2);
        let msg = Message::new(Vec::new()).to(self_sid).to(other).into_shared();
        // Mirrors on_response's handling of a totalSize == 0 message: every
        // recipient fails immediately rather than being handed to transmit.
        msg.borrow_mut().fail_all_remaining();
        assert!(msg.borrow().is_complete());
        assert_eq!(msg.borrow().failure().len(), 2);
    }
}
