//! The circular request queue (§4.6, "Request pipelining").

use std::collections::VecDeque;

use crate::connection::request::Request;
use crate::error::{Error, ErrorKind, Fallible};

pub struct RequestQueue {
    capacity: usize,
    entries: VecDeque<Request>,
}

impl RequestQueue {
    pub fn new(capacity: usize) -> Self {
        RequestQueue {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, request: Request) -> Fallible<()> {
        if self.entries.len() >= self.capacity {
            return Err(Error::from(ErrorKind::NoBufs));
        }
        self.entries.push_back(request);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Request> { self.entries.pop_front() }

    pub fn front_mut(&mut self) -> Option<&mut Request> { self.entries.front_mut() }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn drain(&mut self) -> impl Iterator<Item = Request> + '_ { self.entries.drain(..) }
}
