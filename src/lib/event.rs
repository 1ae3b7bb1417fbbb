//! Events and their payloads.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CORRELATION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier attached to an event for its whole life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(u64);

impl CorrelationId {
    /// Allocate the next id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CORRELATION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Body of an event plus the metadata routing decisions look at.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Payload {
    data: Vec<u8>,
    streaming: bool,
    byte_length: Option<u64>,
}

impl Payload {
    /// A fully materialized payload whose length is known.
    #[must_use]
    pub fn bytes(data: Vec<u8>) -> Self {
        let byte_length = Some(data.len() as u64);
        Self { data, streaming: false, byte_length }
    }

    /// A streamed payload with an optional declared length.
    ///
    /// `data` holds whatever has been buffered so far; the declared length is what
    /// routing uses, and `None` means the length is unknown.
    #[must_use]
    pub fn stream(data: Vec<u8>, byte_length: Option<u64>) -> Self {
        Self { data, streaming: true, byte_length }
    }

    /// The payload bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Take the payload bytes.
    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// True if the payload is a stream.
    #[must_use]
    pub fn is_stream(&self) -> bool {
        self.streaming
    }

    /// Declared or known length, if any.
    #[must_use]
    pub fn byte_length(&self) -> Option<u64> {
        self.byte_length
    }
}

/// A unit of work moving through a pipeline.
///
/// Not `Clone`: exactly one stage owns an event at a time and ownership moves
/// with every hand-off.
#[derive(Debug)]
pub struct Event {
    id: CorrelationId,
    payload: Payload,
    execution_context: Option<String>,
}

impl Event {
    /// Wrap `payload` in a new event with a fresh correlation id.
    #[must_use]
    pub fn new(payload: Payload) -> Self {
        Self { id: CorrelationId::next(), payload, execution_context: None }
    }

    /// Correlation id.
    #[must_use]
    pub fn id(&self) -> CorrelationId {
        self.id
    }

    /// Current payload.
    #[must_use]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Replace the payload, keeping identity and context.
    #[must_use]
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Name of the pool that last executed a stage for this event.
    #[must_use]
    pub fn execution_context(&self) -> Option<&str> {
        self.execution_context.as_deref()
    }

    pub(crate) fn set_execution_context(&mut self, pool: &str) {
        match &mut self.execution_context {
            Some(current) if current == pool => {}
            Some(current) => {
                current.clear();
                current.push_str(pool);
            }
            None => self.execution_context = Some(pool.to_string()),
        }
    }
}
