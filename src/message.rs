//! Outbound messages and the responses that carry them.
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::buffer::Buffer;
use crate::sid::Sid;

/// A `Message` addressed to more than one session is delivered independently
/// to each destination's outbound queue, but completion (`to_list` draining
/// to `success`/`failure`) is shared state: the message is complete only once
/// *every* destination has resolved it. `SharedMessage` is the handle placed
/// on each destination session's `outList`; the reactor is single-threaded so
/// `Rc<RefCell<_>>` (rather than an `Arc<Mutex<_>>`) is sufficient.
pub type SharedMessage = Rc<RefCell<Message>>;

// -----------------------------------------------------------------------------
// 		- Message -
// -----------------------------------------------------------------------------
/// One outbound unit, addressed to one or more sessions.
///
/// A `Message` owns its recipients as `to_list`; as the reactor processes it,
/// entries move from `to_list` into either `success` or `failure`. Once
/// `to_list` is empty the message is complete and `success ∪ failure`
/// partitions the original recipient set.
#[derive(Debug, Clone)]
pub struct Message {
    header: Buffer,
    follow_blocks: Vec<Buffer>,
    to_list: Vec<Sid>,
    success: Vec<Sid>,
    failure: Vec<Sid>,
}

impl Message {
    /// Build a message with a header and no recipients yet.
    pub fn new(header: impl Into<Buffer>) -> Self {
        Self {
            header: header.into(),
            follow_blocks: Vec::new(),
            to_list: Vec::new(),
            success: Vec::new(),
            failure: Vec::new(),
        }
    }

    /// Append a scatter-gather follow block (written after the header, and
    /// after any earlier follow blocks).
    pub fn with_block(mut self, block: impl Into<Buffer>) -> Self {
        self.follow_blocks.push(block.into());
        self
    }

    /// Address the message to `sid`. Duplicates are permitted; the recipient
    /// then receives the header+blocks once per occurrence.
    pub fn to(mut self, sid: Sid) -> Self {
        self.to_list.push(sid);
        self
    }

    /// Address the message to every `Sid` in `sids`.
    pub fn to_all(mut self, sids: impl IntoIterator<Item = Sid>) -> Self {
        self.to_list.extend(sids);
        self
    }

    /// Header bytes.
    pub fn header(&self) -> &Buffer {
        &self.header
    }

    /// Follow blocks, in write order.
    pub fn follow_blocks(&self) -> &[Buffer] {
        &self.follow_blocks
    }

    /// Total byte size: header plus every follow block.
    pub fn total_size(&self) -> usize {
        self.header.len() + self.follow_blocks.iter().map(|b| b.len()).sum::<usize>()
    }

    /// Remaining, not-yet-resolved recipients.
    pub fn to_list(&self) -> &[Sid] {
        &self.to_list
    }

    /// Recipients the message was fully delivered to.
    pub fn success(&self) -> &[Sid] {
        &self.success
    }

    /// Recipients the message could not be delivered to.
    pub fn failure(&self) -> &[Sid] {
        &self.failure
    }

    /// `true` once every original recipient has resolved to success or
    /// failure.
    pub fn is_complete(&self) -> bool {
        self.to_list.is_empty()
    }

    /// Remove `sid` from `to_list` (if present) and record it as delivered.
    pub(crate) fn mark_success(&mut self, sid: Sid) {
        if let Some(pos) = self.to_list.iter().position(|&s| s == sid) {
            self.to_list.remove(pos);
            self.success.push(sid);
        }
    }

    /// Remove the recipient at `index` from `to_list` and record it as
    /// failed. `index` must be a valid index into `to_list`.
    pub(crate) fn fail_at(&mut self, index: usize) {
        let sid = self.to_list.remove(index);
        self.failure.push(sid);
    }

    /// Remove one occurrence of `sid` from `to_list` (if present) and record
    /// it as failed. Used when a session is torn down (error/timeout) while
    /// still holding pending outbound messages.
    pub(crate) fn fail_one(&mut self, sid: Sid) {
        if let Some(pos) = self.to_list.iter().position(|&s| s == sid) {
            self.to_list.remove(pos);
            self.failure.push(sid);
        }
    }

    /// Move every remaining recipient straight to `failure` (used for a
    /// zero-size message, which can never be delivered).
    pub(crate) fn fail_all_remaining(&mut self) {
        self.failure.append(&mut self.to_list);
    }

    /// Wrap the message for placement on one or more sessions' `outList`.
    pub fn into_shared(self) -> SharedMessage {
        Rc::new(RefCell::new(self))
    }
}

/// Release a fully-resolved `SharedMessage` back to an owned `Message`.
///
/// `transmit` and the reactor's error/timeout teardown path both reach this
/// point only once `is_complete()` holds, but other sessions' `out_list`s may
/// still hold a clone of the same `Rc` (a multi-recipient message resolves
/// for each recipient independently). `Rc::try_unwrap` succeeds only once the
/// last reference is dropped; until then this falls back to cloning the
/// `Message` out from behind the `RefCell` rather than waiting.
pub fn unwrap_or_clone(msg_rc: SharedMessage) -> Message {
    match Rc::try_unwrap(msg_rc) {
        Ok(cell) => cell.into_inner(),
        Err(rc) => rc.borrow().clone(),
    }
}

// -----------------------------------------------------------------------------
// 		- Response -
// -----------------------------------------------------------------------------
/// Produced by a single handler invocation and handed to the reactor over the
/// response queue.
#[derive(Debug, Clone)]
pub struct Response {
    from_sid: Sid,
    messages: VecDeque<Message>,
}

impl Response {
    /// Create an empty response attributed to `from_sid`.
    pub fn new(from_sid: Sid) -> Self {
        Self {
            from_sid,
            messages: VecDeque::new(),
        }
    }

    /// The session this response was produced for (or `SYSTEM_SID`).
    pub fn from_sid(&self) -> Sid {
        self.from_sid
    }

    /// Append a message to the end of the response's ordered message list.
    pub fn push(&mut self, message: Message) {
        self.messages.push_back(message);
    }

    /// Take the next message, in the order it was pushed.
    pub fn pop_front(&mut self) -> Option<Message> {
        self.messages.pop_front()
    }

    /// `true` if every message in this response has been taken.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
