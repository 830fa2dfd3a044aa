//! # Capture Error Types

use thiserror::Error;

use omni_core::CoreError;
use omni_session::StoreError;

/// 页面驱动错误
#[derive(Error, Debug)]
pub enum DriverError {
    /// 宿主页面已销毁
    #[error("Host context invalidated")]
    ContextInvalidated,

    #[error("Driver error: {message}")]
    Other { message: String },
}

impl DriverError {
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

/// 捕获错误类型
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Core(#[from] CoreError),

    /// 点击目标不存在
    #[error("Node not found: {selector}[{index}]")]
    TargetNotFound { selector: String, index: usize },
}

impl CaptureError {
    /// 宿主环境是否已失效
    pub fn is_context_invalidated(&self) -> bool {
        match self {
            CaptureError::Driver(DriverError::ContextInvalidated) => true,
            CaptureError::Store(e) => e.is_context_invalidated(),
            _ => false,
        }
    }
}

/// 捕获结果类型
pub type CaptureResult<T> = Result<T, CaptureError>;
