use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

use crate::jsonrpc::message::RequestId;

/// Produces a fresh correlation id for every outbound call.
pub trait RequestIdGenerator: Send + Sync {
    fn generate(&self) -> RequestId;
}

/// Random v4 UUIDs rendered as strings. Default for clients.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl UuidGenerator {
    pub fn new() -> Self {
        Self
    }
}

impl RequestIdGenerator for UuidGenerator {
    fn generate(&self) -> RequestId {
        RequestId::String(Uuid::new_v4().to_string())
    }
}

/// Numeric ids counting up from a starting value.
#[derive(Debug, Default)]
pub struct SequenceGenerator {
    next: AtomicU64,
}

impl SequenceGenerator {
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }
}

impl RequestIdGenerator for SequenceGenerator {
    fn generate(&self) -> RequestId {
        RequestId::from(self.next.fetch_add(1, Ordering::Relaxed))
    }
}
