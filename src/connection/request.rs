//! A single enqueued request: the message to send and the callback that
//! consumes its responses.

use crate::message::ClientMessage;
use crate::value::Value;
use crate::value::ValueMap;

/// What a [`Request`]'s callback is told about its outcome.
///
/// A RUN/PULL_ALL/DISCARD_ALL request may see any number of `Record`
/// callbacks before exactly one of `Success`/`Failure`; INIT, ACK_FAILURE
/// and RESET only ever see the terminal variants.
#[derive(Debug)]
pub enum RequestOutcome {
    Record(Vec<Value>),
    Success(ValueMap),
    Failure(ValueMap),
    /// The session was reset while this request was still queued or
    /// in-flight; the connection remains usable and the caller may retry.
    Reset,
    /// The connection closed while this request was still in flight; it
    /// had already been sent but no further callbacks for it will follow.
    Ended,
    /// The connection closed or failed while this request was still
    /// queued; it was never sent.
    Drained,
}

pub type Callback = Box<dyn FnMut(RequestOutcome) + Send>;

pub struct Request {
    pub message: ClientMessage,
    pub callback: Callback,
}

impl Request {
    pub fn new(message: ClientMessage, callback: Callback) -> Self {
        Request { message, callback }
    }

    pub fn notify(&mut self, outcome: RequestOutcome) { (self.callback)(outcome) }
}
