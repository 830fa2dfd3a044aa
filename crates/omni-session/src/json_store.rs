//! # JsonFileStore Implementation
//!
//! 基于 JSON 文件的会话存储实现。
//!
//! 存储结构:
//! ```text
//! <base_path>/
//! ├── sessions/
//! │   ├── <session_id>-<hash>.json   # 会话及消息
//! │   └── ...
//! └── batch_capture_state.json   # 批量遍历检查点
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::fs;
use tracing::{debug, info, warn};

use omni_core::{stable_path_hash, CheckpointRecord, Platform, Session, BATCH_CHECKPOINT_KEY};

use crate::error::{StoreError, StoreResult};
use crate::store::{merge_for_save, sort_recent_first, CheckpointStore, SessionStore};

/// JsonFileStore 配置
#[derive(Debug, Clone)]
pub struct JsonFileStoreConfig {
    /// 存储根目录
    pub base_path: PathBuf,
    /// 写入时是否格式化 JSON
    pub pretty: bool,
}

impl JsonFileStoreConfig {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            pretty: true,
        }
    }

    /// 紧凑格式写入
    pub fn compact(mut self) -> Self {
        self.pretty = false;
        self
    }
}

impl Default for JsonFileStoreConfig {
    fn default() -> Self {
        Self::new("~/.omnicontext/store")
    }
}

/// 索引条目
#[derive(Debug, Clone)]
struct IndexEntry {
    platform: Platform,
    updated_at: DateTime<Utc>,
}

/// JsonFileStore 实现
pub struct JsonFileStore {
    config: JsonFileStoreConfig,
    sessions_path: PathBuf,
    checkpoint_path: PathBuf,
    index: Arc<RwLock<HashMap<String, IndexEntry>>>,
}

impl JsonFileStore {
    /// 打开存储目录，不存在时创建
    pub async fn new(config: JsonFileStoreConfig) -> StoreResult<Self> {
        let base_path_str = config.base_path.to_string_lossy().to_string();
        let base_path = shellexpand::tilde(&base_path_str);
        let base_path = PathBuf::from(base_path.as_ref());

        let sessions_path = base_path.join("sessions");
        fs::create_dir_all(&sessions_path).await?;

        let store = Self {
            config,
            checkpoint_path: base_path.join(format!("{}.json", BATCH_CHECKPOINT_KEY)),
            sessions_path,
            index: Arc::new(RwLock::new(HashMap::new())),
        };
        store.rebuild_index().await?;

        info!("JsonFileStore initialized at {:?}", base_path);
        Ok(store)
    }

    /// 会话文件路径，id 中的非法文件名字符会被替换
    fn session_file_path(&self, session_id: &str) -> PathBuf {
        self.sessions_path
            .join(format!("{}.json", file_stem(session_id)))
    }

    /// 某个平台在索引中的会话 id
    pub fn ids_for_platform(&self, platform: Platform) -> Vec<String> {
        self.index
            .read()
            .iter()
            .filter(|(_, entry)| entry.platform == platform)
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn to_json<T: serde::Serialize>(&self, value: &T) -> StoreResult<String> {
        let content = if self.config.pretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        };
        Ok(content)
    }

    async fn read_session_file(&self, path: &Path) -> StoreResult<Option<Session>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path).await?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// 重建内存索引，无法解析的文件只记录警告
    async fn rebuild_index(&self) -> StoreResult<()> {
        let mut entries = fs::read_dir(&self.sessions_path).await?;
        let mut rebuilt = HashMap::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path).await?;
            match serde_json::from_str::<Session>(&content) {
                Ok(session) => {
                    rebuilt.insert(
                        session.id.clone(),
                        IndexEntry {
                            platform: session.platform,
                            updated_at: session.updated_at,
                        },
                    );
                }
                Err(e) => {
                    warn!("Failed to parse session file {:?}: {}", path, e);
                }
            }
        }

        let count = rebuilt.len();
        *self.index.write() = rebuilt;
        debug!("Rebuilt index with {} sessions", count);
        Ok(())
    }
}

#[async_trait]
impl SessionStore for JsonFileStore {
    async fn get_session(&self, id: &str) -> StoreResult<Option<Session>> {
        self.read_session_file(&self.session_file_path(id)).await
    }

    async fn save_session_optimized(&self, session: Session) -> StoreResult<Session> {
        let path = self.session_file_path(&session.id);
        let existing = self.read_session_file(&path).await?;
        let merged = merge_for_save(existing.as_ref(), session);

        fs::write(&path, self.to_json(&merged)?).await?;
        self.index.write().insert(
            merged.id.clone(),
            IndexEntry {
                platform: merged.platform,
                updated_at: merged.updated_at,
            },
        );

        debug!("Saved session: {}", merged.id);
        Ok(merged)
    }

    async fn delete_session(&self, id: &str) -> StoreResult<()> {
        let path = self.session_file_path(id);
        if !path.exists() {
            return Err(StoreError::SessionNotFound { id: id.to_string() });
        }
        fs::remove_file(&path).await?;
        self.index.write().remove(id);
        info!("Deleted session: {}", id);
        Ok(())
    }

    async fn get_all_sessions(&self) -> StoreResult<Vec<Session>> {
        let ids: Vec<String> = self.index.read().keys().cloned().collect();
        let mut sessions = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_session(&id).await {
                Ok(Some(session)) => sessions.push(session),
                Ok(None) => {
                    warn!("Indexed session {} has no file", id);
                    self.index.write().remove(&id);
                }
                Err(e) => warn!("Failed to load session {}: {}", id, e),
            }
        }
        sort_recent_first(&mut sessions);
        Ok(sessions)
    }

    async fn get_sessions_by_platform(&self, platform: Platform) -> StoreResult<Vec<Session>> {
        let mut sessions = Vec::new();
        for id in self.ids_for_platform(platform) {
            if let Some(session) = self.get_session(&id).await? {
                sessions.push(session);
            }
        }
        sort_recent_first(&mut sessions);
        Ok(sessions)
    }
}

#[async_trait]
impl CheckpointStore for JsonFileStore {
    async fn save_checkpoint(&self, record: &CheckpointRecord) -> StoreResult<()> {
        fs::write(&self.checkpoint_path, self.to_json(record)?).await?;
        Ok(())
    }

    async fn load_checkpoint(&self) -> StoreResult<Option<CheckpointRecord>> {
        if !self.checkpoint_path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.checkpoint_path).await?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    async fn clear_checkpoint(&self) -> StoreResult<()> {
        if self.checkpoint_path.exists() {
            fs::remove_file(&self.checkpoint_path).await?;
        }
        Ok(())
    }
}

/// 替换非法字符后附加原始 id 的哈希，替换后相同的 id 不会落到同一个文件
fn file_stem(id: &str) -> String {
    let sanitized: String = id
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    format!("{}-{}", sanitized, stable_path_hash(id))
}
