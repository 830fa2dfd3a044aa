//! # Store Error Types
//!
//! 定义会话存储相关的错误类型。

use thiserror::Error;

/// 存储错误类型
#[derive(Error, Debug)]
pub enum StoreError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 序列化/反序列化错误
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 会话不存在
    #[error("Session not found: {id}")]
    SessionNotFound { id: String },

    /// 宿主环境已失效，之后的任何写入都不会成功
    #[error("Extension context invalidated")]
    ContextInvalidated,
}

impl StoreError {
    /// 是否因宿主环境失效导致
    pub fn is_context_invalidated(&self) -> bool {
        matches!(self, StoreError::ContextInvalidated)
    }
}

/// 存储结果类型
pub type StoreResult<T> = Result<T, StoreError>;
