//! # Memory Store
//!
//! 进程内的会话与检查点存储，用于测试和一次性运行。

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, warn};

use omni_core::{CheckpointRecord, Session};

use crate::error::{StoreError, StoreResult};
use crate::store::{merge_for_save, sort_recent_first, CheckpointStore, SessionStore};

/// 内存存储
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: DashMap<String, Session>,
    checkpoint: RwLock<Option<CheckpointRecord>>,
    invalidated: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟宿主环境失效，之后所有调用都返回 `ContextInvalidated`
    pub fn invalidate(&self) {
        warn!("Memory store invalidated");
        self.invalidated.store(true, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn ensure_valid(&self) -> StoreResult<()> {
        if self.invalidated.load(Ordering::SeqCst) {
            Err(StoreError::ContextInvalidated)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get_session(&self, id: &str) -> StoreResult<Option<Session>> {
        self.ensure_valid()?;
        Ok(self.sessions.get(id).map(|entry| entry.value().clone()))
    }

    async fn save_session_optimized(&self, session: Session) -> StoreResult<Session> {
        self.ensure_valid()?;
        let existing = self.sessions.get(&session.id).map(|e| e.value().clone());
        let merged = merge_for_save(existing.as_ref(), session);
        self.sessions.insert(merged.id.clone(), merged.clone());
        debug!("Saved session: {}", merged.id);
        Ok(merged)
    }

    async fn delete_session(&self, id: &str) -> StoreResult<()> {
        self.ensure_valid()?;
        self.sessions
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::SessionNotFound { id: id.to_string() })
    }

    async fn get_all_sessions(&self) -> StoreResult<Vec<Session>> {
        self.ensure_valid()?;
        let mut sessions: Vec<Session> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        sort_recent_first(&mut sessions);
        Ok(sessions)
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn save_checkpoint(&self, record: &CheckpointRecord) -> StoreResult<()> {
        self.ensure_valid()?;
        *self.checkpoint.write() = Some(record.clone());
        Ok(())
    }

    async fn load_checkpoint(&self) -> StoreResult<Option<CheckpointRecord>> {
        self.ensure_valid()?;
        Ok(self.checkpoint.read().clone())
    }

    async fn clear_checkpoint(&self) -> StoreResult<()> {
        self.ensure_valid()?;
        *self.checkpoint.write() = None;
        Ok(())
    }
}
