//! The decoder contract: turning bytes in a session's inbound buffer into a
//! ready-to-handle request.
//!
//! The concrete wire format is a host concern; this module only defines the
//! seam the reactor calls through.
use crate::buffer::Buffer;

/// Outcome of a single decode attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// A full request is ready; the handler can be invoked.
    Ok,
    /// Not enough bytes yet; wait for more reads.
    More,
    /// The bytes in the buffer can never form a valid request.
    ///
    /// The core itself folds this into `More` at the call site (a request
    /// that can never complete just waits forever for more bytes that won't
    /// fix it), but the variant is kept distinct so a host gets the option
    /// to treat it differently without a trait change.
    Error,
}

/// A pluggable decoder, owned by a session's `Request`.
///
/// `decode` is called by the reactor every time new bytes land in the
/// session's inbound buffer (and, eagerly, once more after a write cycle in
/// case bytes arrived while a write was being drained). It is responsible for
/// consuming the bytes of a complete request from `buffer` via
/// `Buffer::consume` once it returns `Ok`, and for holding onto whatever
/// parsed state the handler should see next.
pub trait Decoder {
    /// Attempt to decode one request out of the front of `buffer`.
    fn decode(&mut self, buffer: &mut Buffer) -> DecodeStatus;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A decoder that treats `\n` as a request terminator, used by unit and
    /// integration tests throughout the crate.
    #[derive(Default)]
    pub struct LineDecoder {
        pub last: Vec<u8>,
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
}
