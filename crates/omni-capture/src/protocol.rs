//! # Control Protocol
//!
//! 批量遍历的控制消息。所有消息以 `type` 字段区分，使用 snake_case。

use serde::{Deserialize, Serialize};

use omni_core::{BatchProgress, CheckpointRecord, Platform};

/// 控制请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlRequest {
    StartBatchCapture,
    PauseBatchCapture,
    ResumeBatchCapture,
    CancelBatchCapture,
    GetBatchCaptureStatus,
}

/// 控制响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlResponse {
    /// 遍历已启动
    Started { platform: Platform },
    /// 暂停/恢复/取消的确认，没有活动遍历时 `success` 为 false
    Ack { success: bool },
    /// 当前状态
    Status {
        running: bool,
        checkpoint: Option<CheckpointRecord>,
    },
    Error { message: String },
}

impl ControlResponse {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// 遍历过程中广播的通知
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchNotification {
    BatchCaptureProgress { progress: BatchProgress },
}
