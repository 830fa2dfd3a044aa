//! # Store Traits
//!
//! 会话存储与批量检查点存储的契约。捕获流水线只依赖这两个 trait。

use async_trait::async_trait;
use chrono::Utc;

use omni_core::{CheckpointRecord, Platform, Session};

use crate::error::{StoreError, StoreResult};

/// 会话存储 trait
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// 按 id 获取会话
    async fn get_session(&self, id: &str) -> StoreResult<Option<Session>>;

    /// 保存会话
    ///
    /// 已存在的会话保留原有 `created_at`，`updated_at` 更新为当前时间。
    async fn save_session_optimized(&self, session: Session) -> StoreResult<Session>;

    /// 删除会话，不存在时返回 `SessionNotFound`
    async fn delete_session(&self, id: &str) -> StoreResult<()>;

    /// 获取所有会话，按 `updated_at` 降序
    async fn get_all_sessions(&self) -> StoreResult<Vec<Session>>;

    /// 获取某个平台的会话
    async fn get_sessions_by_platform(&self, platform: Platform) -> StoreResult<Vec<Session>> {
        let sessions = self.get_all_sessions().await?;
        Ok(sessions
            .into_iter()
            .filter(|s| s.platform == platform)
            .collect())
    }

    /// 修改会话标题
    async fn update_session_title(&self, id: &str, title: &str) -> StoreResult<Session> {
        let mut session = self
            .get_session(id)
            .await?
            .ok_or_else(|| StoreError::SessionNotFound { id: id.to_string() })?;
        session.title = title.to_string();
        self.save_session_optimized(session).await
    }
}

/// 批量遍历检查点存储 trait
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save_checkpoint(&self, record: &CheckpointRecord) -> StoreResult<()>;

    async fn load_checkpoint(&self) -> StoreResult<Option<CheckpointRecord>>;

    async fn clear_checkpoint(&self) -> StoreResult<()>;
}

/// 合并即将写入的会话与已存在的会话
pub fn merge_for_save(existing: Option<&Session>, mut incoming: Session) -> Session {
    if let Some(existing) = existing {
        incoming.created_at = existing.created_at;
        incoming.updated_at = Utc::now();
    }
    incoming.message_count = incoming.messages.len();
    incoming
}

/// 按最近更新排序
pub(crate) fn sort_recent_first(sessions: &mut [Session]) {
    sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
}
