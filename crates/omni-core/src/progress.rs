//! # Batch Progress
//!
//! 批量遍历的状态、进度与检查点记录。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Platform;

/// 检查点在存储中的键
pub const BATCH_CHECKPOINT_KEY: &str = "batch_capture_state";

/// 批量遍历状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Running,
    Paused,
    Cancelled,
    Completed,
    Error,
}

impl BatchStatus {
    /// 是否为终止状态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Cancelled | BatchStatus::Completed | BatchStatus::Error
        )
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BatchStatus::Running => "running",
            BatchStatus::Paused => "paused",
            BatchStatus::Cancelled => "cancelled",
            BatchStatus::Completed => "completed",
            BatchStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// 批量遍历进度
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchProgress {
    /// 会话总数
    pub total: usize,
    /// 当前序号（从 1 开始，0 表示尚未开始）
    pub current: usize,
    /// 当前会话标题
    pub current_title: String,
    /// 已捕获消息数
    pub captured: usize,
    /// 失败的会话数
    #[serde(default)]
    pub failed: usize,
    pub status: BatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchProgress {
    /// 初始进度
    pub fn starting(title: impl Into<String>) -> Self {
        Self {
            total: 0,
            current: 0,
            current_title: title.into(),
            captured: 0,
            failed: 0,
            status: BatchStatus::Running,
            error: None,
        }
    }

    /// 切换到错误状态
    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = BatchStatus::Error;
        self.error = Some(message.into());
    }
}

/// 持久化的检查点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub progress: BatchProgress,
    pub platform: Platform,
    pub written_at: DateTime<Utc>,
}

impl CheckpointRecord {
    pub fn new(progress: BatchProgress, platform: Platform) -> Self {
        Self {
            progress,
            platform,
            written_at: Utc::now(),
        }
    }
}
