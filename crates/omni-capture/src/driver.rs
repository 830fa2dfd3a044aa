//! Page driver abstraction.
//!
//! Everything the capture pipeline needs from a live page goes through
//! [`PageDriver`]: reading the address and markup, activating a node,
//! scrolling a container and asking whether the host is still alive.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DriverError;

/// The `index`-th node matched by `selector`, in document order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTarget {
    pub selector: String,
    pub index: usize,
}

impl NodeTarget {
    pub fn new(selector: impl Into<String>, index: usize) -> Self {
        Self {
            selector: selector.into(),
            index,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollEdge {
    Top,
    End,
}

/// Measurements taken right after a scroll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrollMetrics {
    pub scroll_height: u64,
}

#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn current_address(&self) -> Result<String, DriverError>;

    /// Serialized markup of the whole document.
    async fn document_html(&self) -> Result<String, DriverError>;

    /// Activates the target. `Ok(false)` when no such node exists.
    async fn click(&self, target: &NodeTarget) -> Result<bool, DriverError>;

    /// Scrolls the first node matching `selector`. `Ok(None)` when it is missing.
    async fn scroll(
        &self,
        selector: &str,
        edge: ScrollEdge,
    ) -> Result<Option<ScrollMetrics>, DriverError>;

    /// Whether the first node matching `selector` is moved out of the viewport.
    async fn is_offscreen(&self, selector: &str) -> Result<Option<bool>, DriverError>;

    /// Liveness check done before any write.
    async fn is_alive(&self) -> bool;
}
