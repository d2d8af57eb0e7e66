//! # Operation State Machine
//!
//! Purpose: Track one request/response exchange from encoding to its single
//! terminal outcome, independent of the transport underneath.
//!
//! ## Design Principles
//! 1. **Immutable Frames**: the request is encoded once; a partial write
//!    resumes from a cursor over the same bytes.
//! 2. **Explicit Transitions**: [`next_state`] is the only place that decides
//!    which state follows which event.
//! 3. **One-Shot Results**: the outcome travels through a
//!    `tokio::sync::oneshot` sender that is consumed on delivery, so a second
//!    completion cannot be expressed.
//! 4. **Cooperative Cancel**: [`CancelHandle`] flips a flag from any thread;
//!    the driving thread acts on it at its next state check.
//!
//! ## State Diagram
//!
//! ```text
//!  Writing ──Flushed──► Reading ──Decoded──► Complete
//!     │                    │
//!     ├──TimedOut──────────┴──TimedOut──► Complete (TIMEDOUT)
//!     └──Cancel────────────┴──Cancel────► Cancelled
//! ```

pub mod binary;
pub mod text;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use memtls_common::{OperationStatus, ProtocolError};
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::error::{ClientError, ClientResult};

/// Lifecycle of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Writing,
    Reading,
    Complete,
    Cancelled,
}

impl OperationState {
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, OperationState::Complete | OperationState::Cancelled)
    }
}

/// Inputs that move an operation between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationEvent {
    /// Every frame byte reached the transport.
    Flushed,
    /// The decoder produced a complete response.
    Decoded,
    TimedOut,
    Cancel,
}

/// Transition function. `None` marks an illegal transition.
pub fn next_state(state: OperationState, event: OperationEvent) -> Option<OperationState> {
    use OperationEvent::*;
    use OperationState::*;
    match (state, event) {
        (Writing, Flushed) => Some(Reading),
        (Reading, Decoded) => Some(Complete),
        (Writing | Reading, TimedOut) => Some(Complete),
        (Writing | Reading, Cancel) => Some(Cancelled),
        _ => None,
    }
}

/// Store command family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreType {
    Set,
    Add,
    Replace,
    Append,
    Prepend,
}

impl StoreType {
    /// Text protocol command word.
    pub fn command(self) -> &'static str {
        match self {
            StoreType::Set => "set",
            StoreType::Add => "add",
            StoreType::Replace => "replace",
            StoreType::Append => "append",
            StoreType::Prepend => "prepend",
        }
    }

    /// Append and prepend carry no flags or expiry.
    pub fn is_concat(self) -> bool {
        matches!(self, StoreType::Append | StoreType::Prepend)
    }
}

/// Counter direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutator {
    Incr,
    Decr,
}

/// Decoded response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Empty,
    Value { flags: u32, data: Bytes },
    Counter(u64),
    Text(String),
}

/// Terminal result delivered to the caller exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub status: OperationStatus,
    pub cas: Option<u64>,
    pub payload: Payload,
}

impl Outcome {
    pub fn status(status: OperationStatus) -> Self {
        Outcome {
            status,
            cas: None,
            payload: Payload::Empty,
        }
    }

    pub fn with_cas(mut self, cas: u64) -> Self {
        self.cas = Some(cas);
        self
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }
}

/// Response grammar of one operation type.
pub trait Decode: Send {
    /// Parses one response from the front of `input`.
    ///
    /// Returns `Ok(None)` and consumes nothing while the response is
    /// incomplete; called again once more bytes arrive.
    fn decode(&mut self, input: &mut BytesMut) -> Result<Option<Outcome>, ProtocolError>;
}

/// An encoded request and the decoder for its response.
pub struct Request {
    pub name: &'static str,
    pub frame: Bytes,
    pub decoder: Box<dyn Decode>,
}

impl Request {
    pub fn new(name: &'static str, frame: Bytes, decoder: impl Decode + 'static) -> Self {
        Request {
            name,
            frame,
            decoder: Box::new(decoder),
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("name", &self.name)
            .field("frame_len", &self.frame.len())
            .finish()
    }
}

/// Requests cancellation of an in-flight operation from any thread.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Caller side of an operation: the result slot and the cancel switch.
#[derive(Debug)]
pub struct OperationHandle {
    result: oneshot::Receiver<Outcome>,
    cancel: CancelHandle,
}

impl OperationHandle {
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Outcome of an operation that already reached a terminal state.
    pub fn outcome(mut self) -> ClientResult<Outcome> {
        self.result.try_recv().map_err(|_| ClientError::ResultDropped)
    }

    /// Blocks the calling thread until the outcome arrives.
    ///
    /// Must not be called from inside an async runtime.
    pub fn wait(self) -> ClientResult<Outcome> {
        self.result.blocking_recv().map_err(|_| ClientError::ResultDropped)
    }
}

/// Driving side of one in-flight operation.
pub struct Operation {
    name: &'static str,
    frame: Bytes,
    cursor: Bytes,
    state: OperationState,
    decoder: Box<dyn Decode>,
    result: Option<oneshot::Sender<Outcome>>,
    cancel: CancelHandle,
}

impl Operation {
    pub fn new(request: Request) -> (Operation, OperationHandle) {
        let (tx, rx) = oneshot::channel();
        let cancel = CancelHandle::default();
        let op = Operation {
            name: request.name,
            cursor: request.frame.clone(),
            frame: request.frame,
            state: OperationState::Writing,
            decoder: request.decoder,
            result: Some(tx),
            cancel: cancel.clone(),
        };
        (op, OperationHandle { result: rx, cancel })
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn state(&self) -> OperationState {
        self.state
    }

    /// The full request as built.
    pub fn frame(&self) -> &Bytes {
        &self.frame
    }

    /// Frame bytes not yet handed to the transport.
    pub fn unwritten(&mut self) -> &mut Bytes {
        &mut self.cursor
    }

    /// Replays the frame from its first byte.
    pub fn rewind(&mut self) {
        debug_assert_eq!(self.state, OperationState::Writing);
        self.cursor = self.frame.clone();
    }

    /// Marks `n` more frame bytes as written; switches to reading once the
    /// frame is drained.
    pub fn wrote(&mut self, n: usize) {
        self.cursor.advance(n.min(self.cursor.len()));
        if self.cursor.is_empty() && self.state == OperationState::Writing {
            self.apply(OperationEvent::Flushed);
        }
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Feeds buffered response bytes to the decoder.
    ///
    /// Returns true once the operation is terminal. Bytes belonging to a
    /// following response stay in `input`.
    pub fn read(&mut self, input: &mut BytesMut) -> Result<bool, ProtocolError> {
        if self.state != OperationState::Reading {
            debug_assert!(false, "{} read in state {:?}", self.name, self.state);
            return Ok(self.state.is_terminal());
        }
        match self.decoder.decode(input)? {
            Some(outcome) => {
                trace!(op = self.name, status = %outcome.status, "decoded response");
                self.finish(OperationEvent::Decoded, outcome);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Consumes this operation's response without delivering it; used after
    /// a cancel so the stream stays aligned for the next operation.
    pub fn discard(&mut self, input: &mut BytesMut) -> Result<bool, ProtocolError> {
        Ok(self.decoder.decode(input)?.is_some())
    }

    pub fn cancel(&mut self) {
        debug!(op = self.name, state = ?self.state, "operation cancelled");
        self.finish(
            OperationEvent::Cancel,
            Outcome::status(OperationStatus::cancelled()),
        );
    }

    pub fn time_out(&mut self) {
        debug!(op = self.name, state = ?self.state, "operation timed out");
        self.finish(
            OperationEvent::TimedOut,
            Outcome::status(OperationStatus::timed_out()),
        );
    }

    fn apply(&mut self, event: OperationEvent) -> bool {
        match next_state(self.state, event) {
            Some(next) => {
                self.state = next;
                true
            }
            None => {
                debug_assert!(
                    false,
                    "{}: illegal transition {:?} on {:?}",
                    self.name, self.state, event
                );
                false
            }
        }
    }

    fn finish(&mut self, event: OperationEvent, outcome: Outcome) {
        if !self.apply(event) {
            return;
        }
        if let Some(tx) = self.result.take() {
            // A dropped receiver means nobody is waiting any more.
            let _ = tx.send(outcome);
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("unwritten", &self.cursor.len())
            .finish()
    }
}
