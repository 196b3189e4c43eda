//! Scripted half-duplex transport for tests

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{Transport, TransportError, ASCII_CR_CODE};

/// What the next `read_line` returns
#[derive(Debug, Clone)]
pub(crate) enum MockReply {
    /// A complete line; the terminator is appended
    Line(String),
    /// Bytes returned as-is, e.g. a truncated line
    Raw(Vec<u8>),
    Timeout,
    IoError,
    /// From a responder: a line that only arrives during the next write,
    /// like a reply that missed its deadline
    Delayed(String),
}

impl MockReply {
    pub(crate) fn line(s: &str) -> Self {
        MockReply::Line(s.to_string())
    }
}

type Responder = Box<dyn Fn(&str) -> Vec<MockReply> + Send + Sync>;

#[derive(Default)]
struct Inner {
    writes: Mutex<Vec<String>>,
    /// Scripted with `push`, read after `buffered` and never cleared
    replies: Mutex<VecDeque<MockReply>>,
    /// Input that already arrived; responder output lands here
    buffered: Mutex<VecDeque<MockReply>>,
    delayed: Mutex<VecDeque<MockReply>>,
    clears: AtomicUsize,
    responder: Option<Responder>,
    fail_writes: Mutex<bool>,
    outstanding: AtomicUsize,
    max_outstanding: AtomicUsize,
    write_delay: Option<Duration>,
}

/// Cloneable handle; clones share the same script and write log
#[derive(Clone, Default)]
pub(crate) struct MockTransport {
    inner: Arc<Inner>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Replies are generated from each written line
    pub(crate) fn with_responder(
        responder: impl Fn(&str) -> Vec<MockReply> + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                responder: Some(Box::new(responder)),
                write_delay: Some(Duration::from_micros(200)),
                ..Inner::default()
            }),
        }
    }

    pub(crate) fn push(&self, reply: MockReply) {
        self.inner.replies.lock().push_back(reply);
    }

    pub(crate) fn push_line(&self, line: &str) {
        self.push(MockReply::line(line));
    }

    pub(crate) fn fail_writes(&self) {
        *self.inner.fail_writes.lock() = true;
    }

    pub(crate) fn writes(&self) -> Vec<String> {
        self.inner.writes.lock().clone()
    }

    pub(crate) fn write_count(&self) -> usize {
        self.inner.writes.lock().len()
    }

    /// How often the input buffer was cleared
    pub(crate) fn clear_count(&self) -> usize {
        self.inner.clears.load(Ordering::SeqCst)
    }

    /// Highest number of writes seen without a reply read in between
    pub(crate) fn max_outstanding(&self) -> usize {
        self.inner.max_outstanding.load(Ordering::SeqCst)
    }

    pub(crate) fn boxed(&self) -> Box<dyn Transport> {
        Box::new(self.clone())
    }
}

impl Transport for MockTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if *self.inner.fail_writes.lock() {
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "mock write failure",
            )));
        }

        let line = String::from_utf8_lossy(bytes)
            .trim_end_matches(ASCII_CR_CODE as char)
            .to_string();

        let now = self.inner.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_outstanding.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.inner.write_delay {
            std::thread::sleep(delay);
        }

        {
            let mut buffered = self.inner.buffered.lock();
            buffered.extend(self.inner.delayed.lock().drain(..));
            if let Some(responder) = &self.inner.responder {
                for reply in responder(&line) {
                    match reply {
                        MockReply::Delayed(late) => {
                            self.inner.delayed.lock().push_back(MockReply::Line(late))
                        }
                        other => buffered.push_back(other),
                    }
                }
            }
        }
        self.inner.writes.lock().push(line);
        Ok(())
    }

    fn read_line(&mut self, _timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let buffered = self.inner.buffered.lock().pop_front();
        let reply = buffered.or_else(|| self.inner.replies.lock().pop_front());
        match reply {
            Some(MockReply::Line(line)) => {
                // Echo lines do not complete the exchange
                let is_echo = line.starts_with('!') || line.starts_with('?');
                if !is_echo {
                    let _ = self.inner.outstanding.fetch_update(
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                        |n| n.checked_sub(1),
                    );
                }
                let mut bytes = line.into_bytes();
                bytes.push(ASCII_CR_CODE);
                Ok(bytes)
            }
            Some(MockReply::Raw(bytes)) => Ok(bytes),
            Some(MockReply::Timeout) | Some(MockReply::Delayed(_)) | None => {
                Err(TransportError::Timeout)
            }
            Some(MockReply::IoError) => Err(TransportError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "mock read failure",
            ))),
        }
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        self.inner.clears.fetch_add(1, Ordering::SeqCst);
        self.inner.buffered.lock().clear();
        // Whatever was still unanswered is abandoned
        self.inner.outstanding.store(0, Ordering::SeqCst);
        Ok(())
    }
}
