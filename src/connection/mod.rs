//! The connection state machine (§4.6): handshake, INIT, pipelined
//! request queue, failure drain, reset, close.

pub mod handshake;
pub mod job;
pub mod queue;
pub mod request;

use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, error, info, trace, warn};

use crate::byte_stream::ByteStream;
use crate::error::{Error, ErrorKind, Fallible};
use crate::message::{ClientMessage, ServerMessage};
use crate::message_codec::MessageCodec;
use crate::value::ValueMap;

use job::{Job, JobCallback, JobId, JobOutcome};
use queue::RequestQueue;
use request::{Request, RequestOutcome};

/// Where a connection sits in its lifecycle (§4.6 "States").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Opening,
    Negotiating,
    Initializing,
    Ready,
    FailureDraining,
    Closed,
    /// Terminal absorbing state reached on any fatal error.
    Failed,
}

/// Tuning knobs a `ConnectionCore` needs; taken from [`crate::config::Config`]
/// at connect time rather than borrowed from it, so the core doesn't carry
/// a config lifetime.
pub struct ConnectionOptions {
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub max_pipelined_requests: usize,
    pub session_request_queue_size: usize,
    pub snd_min_chunk_size: usize,
    pub snd_max_chunk_size: usize,
}

pub struct ConnectionCore<S> {
    id: u64,
    stream: Option<S>,
    codec: MessageCodec<S>,
    state: State,
    processing: AtomicBool,
    reset_requested: AtomicBool,
    max_pipelined_requests: usize,
    queue: RequestQueue,
    inflight: std::collections::VecDeque<Request>,
    jobs: Vec<Job>,
    next_job_id: u64,
    server_id: Option<String>,
    credentials_expired: bool,
}

impl<S: ByteStream> ConnectionCore<S> {
    pub fn open(id: u64, stream: S, options: &ConnectionOptions) -> Fallible<Self> {
        let mut core = ConnectionCore {
            id,
            stream: Some(stream),
            codec: MessageCodec::new(options.snd_min_chunk_size, options.snd_max_chunk_size),
            state: State::Opening,
            processing: AtomicBool::new(false),
            reset_requested: AtomicBool::new(false),
            max_pipelined_requests: options.max_pipelined_requests.max(1),
            queue: RequestQueue::new(options.session_request_queue_size),
            inflight: std::collections::VecDeque::new(),
            jobs: Vec::new(),
            next_job_id: 0,
            server_id: None,
            credentials_expired: false,
        };
        core.negotiate()?;
        core.init(options)?;
        Ok(core)
    }

    pub fn state(&self) -> State { self.state }

    pub fn server_id(&self) -> Option<&str> { self.server_id.as_deref() }

    fn negotiate(&mut self) -> Fallible<()> {
        self.state = State::Negotiating;
        info!("connection {}: negotiating protocol version", self.id);
        let stream = self.stream.as_mut().expect("stream present before Closed");
        match handshake::negotiate(stream) {
            Ok(version) => {
                debug!("connection {}: negotiated version {}", self.id, version);
                Ok(())
            }
            Err(e) => {
                error!("connection {}: handshake failed: {}", self.id, e);
                self.state = State::Failed;
                Err(e)
            }
        }
    }

    fn init(&mut self, options: &ConnectionOptions) -> Fallible<()> {
        self.state = State::Initializing;
        let mut auth = ValueMap::new();
        auth.insert("scheme", crate::value::Value::string("basic"));
        if let Some(username) = &options.username {
            auth.insert("principal", crate::value::Value::string(username.clone()));
        }
        if let Some(password) = &options.password {
            auth.insert("credentials", crate::value::Value::string(password.clone()));
        }

        let init_msg = ClientMessage::Init {
            client_name: options.client_id.clone(),
            auth_token: auth,
        };

        let stream = self.stream.take().expect("stream present before Closed");
        let roundtrip = self
            .codec
            .write_message(stream, &init_msg)
            .and_then(|s| self.codec.read_message(s));
        let (stream, response) = match roundtrip {
            Ok(pair) => pair,
            Err(e) => {
                self.state = State::Failed;
                return Err(e);
            }
        };
        self.stream = Some(stream);

        match response {
            ServerMessage::Success(meta) => {
                if let Some(server) = meta.get("server").and_then(|v| v.as_str()) {
                    self.server_id = Some(server.to_owned());
                }
                if let Some(expired) = meta.get("credentials_expired").and_then(|v| v.as_bool()) {
                    self.credentials_expired = expired;
                }
                self.state = State::Ready;
                info!(
                    "connection {}: initialized (server={:?}, credentials_expired={})",
                    self.id, self.server_id, self.credentials_expired
                );
                Ok(())
            }
            ServerMessage::Failure(meta) => {
                let code = meta.get("code").and_then(|v| v.as_str()).unwrap_or("");
                self.state = State::Failed;
                let kind = match code {
                    "Neo.ClientError.Security.Unauthorized" => ErrorKind::InvalidCredentials,
                    "Neo.ClientError.Security.AuthenticationRateLimit" => ErrorKind::AuthRateLimit,
                    "Neo.ClientError.Security.EncryptionRequired" => ErrorKind::ServerRequiresSecure,
                    _ => ErrorKind::UnexpectedError,
                };
                warn!("connection {}: INIT failed with code {:?}", self.id, code);
                Err(Error::with_context(kind, format!("INIT failed: {}", code)))
            }
            other => {
                self.state = State::Failed;
                Err(Error::with_context(
                    ErrorKind::UnexpectedError,
                    format!("unexpected reply to INIT: {:?}", other),
                ))
            }
        }
    }

    fn check_usable(&self) -> Fallible<()> {
        match self.state {
            State::Failed => Err(Error::from(ErrorKind::SessionFailed)),
            State::Closed => Err(Error::from(ErrorKind::SessionEnded)),
            _ => Ok(()),
        }
    }

    /// Attaches a job: a scope that spans several requests and wants to
    /// know if the connection resets or closes out from under it. Returns
    /// a handle for [`Self::detach_job`].
    pub fn attach_job(&mut self, callback: JobCallback) -> JobId {
        let id = JobId(self.next_job_id);
        self.next_job_id += 1;
        self.jobs.push(Job::new(id, callback));
        id
    }

    /// Detaches a job that ended normally; no further notifications are
    /// sent to it. A no-op if `id` isn't attached (already notified and
    /// removed by a reset or close).
    pub fn detach_job(&mut self, id: JobId) {
        self.jobs.retain(|job| job.id != id);
    }

    fn notify_jobs(&mut self, outcome: JobOutcome) {
        for job in &mut self.jobs {
            job.notify(outcome);
        }
    }

    /// Enqueues a request; its callback will be invoked from a later
    /// `sync` call. Fails immediately (without touching the wire) if the
    /// queue is full or the connection is unusable.
    pub fn enqueue(
        &mut self,
        message: ClientMessage,
        callback: request::Callback,
    ) -> Fallible<()> {
        self.check_usable()?;
        self.queue.push(Request::new(message, callback))
    }

    /// Runs the processing loop until `condition` requests have completed
    /// or the queue drains, whichever comes first. Guarded by the
    /// `processing` flag: a concurrent call returns `SessionBusy`.
    pub fn sync(&mut self, mut condition: usize) -> Fallible<()> {
        self.check_usable()?;
        if self.processing.compare_and_swap(false, true, Ordering::SeqCst) {
            return Err(Error::from(ErrorKind::SessionBusy));
        }
        let result = self.drive(&mut condition);
        self.processing.store(false, Ordering::SeqCst);
        result
    }

    fn drive(&mut self, condition: &mut usize) -> Fallible<()> {
        loop {
            if self.reset_requested.swap(false, Ordering::SeqCst) {
                self.run_reset_drain()?;
                return Ok(());
            }

            if *condition == 0 && self.inflight.is_empty() {
                return Ok(());
            }

            while self.inflight.len() < self.max_pipelined_requests.min(self.queue.len() + self.inflight.len())
                && !self.queue.is_empty()
            {
                let request = self.queue.pop().expect("checked non-empty");
                self.send_request(&request.message)?;
                self.inflight.push_back(request);
            }

            if self.inflight.is_empty() {
                return Ok(());
            }

            self.receive_one()?;
            if *condition > 0 {
                *condition -= 1;
            }
        }
    }

    fn send_request(&mut self, message: &ClientMessage) -> Fallible<()> {
        trace!("connection {}: sending {:?}", self.id, message.signature());
        let stream = self.stream.take().expect("stream present before Closed");
        let stream = self.codec.write_message(stream, message).map_err(|e| {
            self.state = State::Failed;
            e
        })?;
        self.stream = Some(stream);
        Ok(())
    }

    fn receive_one(&mut self) -> Fallible<()> {
        let stream = self.stream.take().expect("stream present before Closed");
        let (stream, response) = self.codec.read_message(stream).map_err(|e| {
            self.state = State::Failed;
            e
        })?;
        self.stream = Some(stream);

        match response {
            ServerMessage::Record(fields) => {
                if let Some(head) = self.inflight.front_mut() {
                    head.notify(RequestOutcome::Record(fields));
                }
                Ok(())
            }
            ServerMessage::Success(meta) => self.complete_head(RequestOutcome::Success(meta)),
            ServerMessage::Failure(meta) => {
                self.complete_head(RequestOutcome::Failure(meta.clone()))?;
                self.run_failure_drain()
            }
            ServerMessage::Ignored => {
                if self.state == State::FailureDraining {
                    self.complete_head(RequestOutcome::Failure(ValueMap::new()))
                } else {
                    self.state = State::Failed;
                    Err(Error::with_context(
                        ErrorKind::UnexpectedError,
                        "unexpected IGNORED reply outside failure drain",
                    ))
                }
            }
        }
    }

    fn complete_head(&mut self, outcome: RequestOutcome) -> Fallible<()> {
        if let Some(mut request) = self.inflight.pop_front() {
            request.notify(outcome);
        }
        Ok(())
    }

    /// Drains every remaining in-flight response as IGNORED, then sends a
    /// synthesized ACK_FAILURE and requires its SUCCESS (§4.6).
    fn run_failure_drain(&mut self) -> Fallible<()> {
        self.state = State::FailureDraining;
        info!("connection {}: entering failure drain", self.id);
        while !self.inflight.is_empty() {
            let stream = self.stream.take().expect("stream present before Closed");
            let (stream, response) = self.codec.read_message(stream)?;
            self.stream = Some(stream);
            match response {
                ServerMessage::Ignored => self.complete_head(RequestOutcome::Failure(ValueMap::new()))?,
                other => {
                    self.state = State::Failed;
                    return Err(Error::with_context(
                        ErrorKind::UnexpectedError,
                        format!("expected IGNORED during failure drain, got {:?}", other),
                    ));
                }
            }
        }

        let stream = self.stream.take().expect("stream present before Closed");
        let stream = self.codec.write_message(stream, &ClientMessage::AckFailure)?;
        let (stream, response) = self.codec.read_message(stream)?;
        self.stream = Some(stream);

        match response {
            ServerMessage::Success(_) => {
                self.state = State::Ready;
                info!("connection {}: failure drain complete, ACK_FAILURE succeeded", self.id);
                Ok(())
            }
            other => {
                self.state = State::Failed;
                Err(Error::with_context(
                    ErrorKind::UnexpectedError,
                    format!("ACK_FAILURE expected SUCCESS, got {:?}", other),
                ))
            }
        }
    }

    /// Sends a RESET message immediately, bypassing the queue, and marks
    /// the reset flag so an active or future `sync` performs the drain.
    pub fn reset(&mut self) -> Fallible<()> {
        self.check_usable()?;
        info!("connection {}: reset requested", self.id);
        let stream = self.stream.take().expect("stream present before Closed");
        let stream = self.codec.write_message(stream, &ClientMessage::Reset)?;
        self.stream = Some(stream);
        self.reset_requested.store(true, Ordering::SeqCst);

        if !self.processing.compare_and_swap(false, true, Ordering::SeqCst) {
            let result = self.run_reset_drain();
            self.processing.store(false, Ordering::SeqCst);
            result
        } else {
            Ok(())
        }
    }

    fn run_reset_drain(&mut self) -> Fallible<()> {
        info!("connection {}: running reset drain", self.id);
        self.notify_jobs(JobOutcome::Reset);
        while let Some(mut request) = self.inflight.pop_front() {
            request.notify(RequestOutcome::Reset);
        }

        // Consume replies to requests that were already in flight before
        // the RESET landed; discrepancies are logged, not fatal.
        loop {
            let stream = self.stream.take().expect("stream present before Closed");
            match self.codec.read_message(stream) {
                Ok((stream, ServerMessage::Ignored)) => {
                    self.stream = Some(stream);
                    continue;
                }
                Ok((stream, ServerMessage::Success(_))) => {
                    self.stream = Some(stream);
                    break;
                }
                Ok((stream, other)) => {
                    self.stream = Some(stream);
                    warn!(
                        "connection {}: unexpected reply during reset drain: {:?}",
                        self.id, other
                    );
                    return Err(Error::with_context(
                        ErrorKind::UnexpectedError,
                        "non-SUCCESS reply to RESET",
                    ));
                }
                Err(e) => return Err(e),
            }
        }

        for mut request in self.queue.drain() {
            request.notify(RequestOutcome::Drained);
        }

        self.state = State::Ready;
        Ok(())
    }

    /// Idempotent-per-connection close: notifies attached jobs that the
    /// connection is gone, drains inflight and queued requests, then
    /// closes the stream.
    pub fn close(&mut self) -> Fallible<()> {
        if self.state == State::Closed {
            return Ok(());
        }
        if self.processing.compare_and_swap(false, true, Ordering::SeqCst) {
            return Err(Error::from(ErrorKind::SessionBusy));
        }

        self.notify_jobs(JobOutcome::Ended);
        self.jobs.clear();

        while let Some(mut request) = self.inflight.pop_front() {
            request.notify(RequestOutcome::Ended);
        }
        for mut request in self.queue.drain() {
            request.notify(RequestOutcome::Drained);
        }

        if let Some(mut stream) = self.stream.take() {
            stream.close()?;
        }
        self.state = State::Closed;
        self.processing.store(false, Ordering::SeqCst);
        info!("connection {}: closed", self.id);
        Ok(())
    }
}
