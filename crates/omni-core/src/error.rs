//! # Core Error Types
//!
//! 平台识别与数据模型相关的错误类型。

use thiserror::Error;

/// 核心错误类型
#[derive(Error, Debug)]
pub enum CoreError {
    /// 地址无法解析
    #[error("Invalid address: {address}")]
    InvalidAddress { address: String },

    /// 未知平台
    #[error("Unknown platform: {name}")]
    UnknownPlatform { name: String },

    /// 未知注入模式
    #[error("Unknown injection mode: {name}")]
    UnknownMode { name: String },
}

impl CoreError {
    /// 创建地址错误
    pub fn invalid_address(address: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
        }
    }
}

/// 核心结果类型
pub type CoreResult<T> = Result<T, CoreError>;
