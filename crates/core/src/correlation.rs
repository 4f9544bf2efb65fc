//! Correlation identifiers scoped to a logical call tree
//!
//! A [`CorrelationScope`] is an explicit context object threaded through the
//! request flow: every asynchronous sub-operation spawned within the same
//! logical operation shares the scope (cheap `Arc` clone), while unrelated
//! concurrent operations hold distinct scopes. There is no thread-local or
//! task-local storage involved; the scope travels as an ordinary value, so
//! propagation is cancellation-safe by construction.
//!
//! The id inside a scope is generated lazily, at most once: whichever
//! sub-operation needs it first wins, and every later reader observes the
//! same value.

use once_cell::sync::OnceCell;
use std::sync::Arc;

/// Default header carrying the correlation id
///
/// Deliberately distinct from standard tracing headers (`traceparent`,
/// `x-b3-*`) so the two systems never collide.
pub const DEFAULT_CORRELATION_HEADER: &str = "x-correlation-id";

/// A correlation identifier plus the header name it travels under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationContext {
    /// Opaque identifier linking all requests of one logical operation
    pub id: String,
    /// HTTP header name the id is carried in
    pub header_name: String,
}

impl CorrelationContext {
    /// Create a context with the given id and the default header name
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), header_name: DEFAULT_CORRELATION_HEADER.to_string() }
    }

    /// Create a context with an explicit header name
    pub fn with_header(id: impl Into<String>, header_name: impl Into<String>) -> Self {
        Self { id: id.into(), header_name: header_name.into() }
    }
}

/// Generate a fresh opaque correlation id
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Lazily-initialized correlation id shared across one logical call tree
///
/// Clones share the underlying cell: a child operation cloning its parent's
/// scope observes (or supplies) the same id. Two scopes created
/// independently never share anything.
#[derive(Debug, Clone, Default)]
pub struct CorrelationScope {
    cell: Arc<OnceCell<String>>,
}

impl CorrelationScope {
    /// Create an empty scope for a new logical operation
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a scope pre-seeded with a known id (e.g. from an inbound
    /// request header)
    pub fn seeded(id: impl Into<String>) -> Self {
        let cell = OnceCell::new();
        // A fresh cell cannot already be set.
        let _ = cell.set(id.into());
        Self { cell: Arc::new(cell) }
    }

    /// The id, if one has been assigned to this call tree yet
    pub fn get(&self) -> Option<&str> {
        self.cell.get().map(String::as_str)
    }

    /// The id for this call tree, generating one on first use
    pub fn get_or_generate(&self) -> &str {
        self.cell.get_or_init(generate_id)
    }

    /// Record an externally supplied id; returns false if the scope already
    /// holds a (different or identical) id, in which case the existing value
    /// stays authoritative
    pub fn try_seed(&self, id: impl Into<String>) -> bool {
        self.cell.set(id.into()).is_ok()
    }
}
