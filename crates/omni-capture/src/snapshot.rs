//! # Snapshot Driver
//!
//! 以磁盘上的 HTML 快照代替真实页面。每次读取都重新加载文件，
//! 外部程序覆盖文件即相当于页面内容发生变化；文件被删除视为页面关闭。

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::driver::{NodeTarget, PageDriver, ScrollEdge, ScrollMetrics};
use crate::error::DriverError;

/// 基于文件快照的页面驱动
#[derive(Debug)]
pub struct SnapshotDriver {
    address: RwLock<String>,
    path: PathBuf,
}

impl SnapshotDriver {
    pub fn new(address: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            address: RwLock::new(address.into()),
            path: path.into(),
        }
    }

    /// 模拟页面内导航
    pub fn set_address(&self, address: impl Into<String>) {
        *self.address.write() = address.into();
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PageDriver for SnapshotDriver {
    async fn current_address(&self) -> Result<String, DriverError> {
        Ok(self.address.read().clone())
    }

    async fn document_html(&self) -> Result<String, DriverError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(html) => Ok(html),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(DriverError::ContextInvalidated),
            Err(e) => Err(DriverError::other(format!("{:?}: {}", self.path, e))),
        }
    }

    async fn click(&self, target: &NodeTarget) -> Result<bool, DriverError> {
        debug!("Snapshot ignores click on {}[{}]", target.selector, target.index);
        Ok(false)
    }

    async fn scroll(
        &self,
        _selector: &str,
        _edge: ScrollEdge,
    ) -> Result<Option<ScrollMetrics>, DriverError> {
        Ok(None)
    }

    async fn is_offscreen(&self, _selector: &str) -> Result<Option<bool>, DriverError> {
        Ok(None)
    }

    async fn is_alive(&self) -> bool {
        self.path.exists()
    }
}
