//! Cross-thread wakeup: a crossbeam channel paired with a `mio::Registration`
//! self-pipe, so a value sent from any thread both queues behind the channel
//! and flips the reactor's own `Poll` readable. This is how a worker thread
//! wakes the reactor's event loop to deliver a completed task's response.
use std::fmt::{self, Debug};
use std::io;

use crossbeam::channel::{bounded, unbounded as channel};
use crossbeam::channel::{Receiver, Sender, TrySendError};
use mio::{Evented, Poll, PollOpt, Ready, Registration, SetReadiness, Token};

use crate::errors;

// -----------------------------------------------------------------------------
// 		- Signal sender -
// -----------------------------------------------------------------------------
/// The sending half. Cheap to clone; every worker thread holds one.
pub struct SignalSender<T> {
    sender: Sender<T>,
    set_readiness: SetReadiness,
}

impl<T> SignalSender<T> {
    fn new(sender: Sender<T>, set_readiness: SetReadiness) -> Self {
        Self {
            sender,
            set_readiness,
        }
    }

    /// Queue `val` and mark the paired `SignalReceiver` readable in one call.
    pub fn send(&self, val: T) -> Result<(), TrySendError<T>> {
        let _ = self.set_readiness.set_readiness(Ready::readable());
        self.sender.send(val)?;
        Ok(())
    }
}

impl<T> Clone for SignalSender<T> {
    fn clone(&self) -> Self {
        SignalSender::new(self.sender.clone(), self.set_readiness.clone())
    }
}

impl<T> Debug for SignalSender<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SignalSender").finish()
    }
}

// -----------------------------------------------------------------------------
// 		- Signal receiver -
// -----------------------------------------------------------------------------
/// The receiving half, registered directly with the reactor's `Poll`.
pub struct SignalReceiver<T> {
    receiver: Receiver<T>,
    registration: Registration,

    set_readiness: SetReadiness,
    sender: Sender<T>,
}

impl<T> SignalReceiver<T> {
    /// An unbounded channel — used for the response queue, since a worker
    /// must never block handing an outcome back to the reactor.
    pub fn unbounded() -> Self {
        let (sender, receiver) = channel();
        Self::with_sender_receiver(sender, receiver)
    }

    /// A bounded channel, capacity `capacity`.
    pub fn bounded(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self::with_sender_receiver(sender, receiver)
    }

    fn with_sender_receiver(sender: Sender<T>, receiver: Receiver<T>) -> Self {
        let (registration, set_readiness) = Registration::new2();
        Self {
            receiver,
            registration,

            sender,
            set_readiness,
        }
    }

    /// Drain one value, if any is queued.
    pub fn try_recv(&self) -> errors::Result<T> {
        let res = self.receiver.try_recv();
        Ok(res?)
    }

    /// A new sending half paired with this receiver.
    pub fn sender(&self) -> SignalSender<T> {
        SignalSender {
            set_readiness: self.set_readiness.clone(),
            sender: self.sender.clone(),
        }
    }
}

impl<T> Evented for SignalReceiver<T> {
    fn register(&self, poll: &Poll, token: Token, interest: Ready, opts: PollOpt) -> io::Result<()> {
        self.registration.register(poll, token, interest, opts)
    }

    fn reregister(&self, poll: &Poll, token: Token, interest: Ready, opts: PollOpt) -> io::Result<()> {
        self.registration.reregister(poll, token, interest, opts)
    }

    fn deregister(&self, poll: &Poll) -> io::Result<()> {
        poll.deregister(&self.registration)
    }
}
