//! # OmniContext Core
//!
//! 捕获流水线的核心：数据模型、平台规则、平台识别、变更检测和上下文注入格式化。
//!
//! ## 模块
//!
//! - **types**：平台、消息、会话
//! - **registry**：每个平台的静态提取规则
//! - **detector**：地址 -> 平台 / 会话 id
//! - **fingerprint**：消息列表指纹与变更判断
//! - **progress**：批量遍历状态与检查点
//! - **injection**：会话 -> 上下文引用文本

pub mod detector;
pub mod error;
pub mod fingerprint;
pub mod injection;
pub mod progress;
pub mod registry;
pub mod types;

// 重新导出主要类型
pub use detector::{derive_session_id, detect_platform, is_unsaved_session_id, stable_path_hash};
pub use error::{CoreError, CoreResult};
pub use fingerprint::{fingerprint, has_changed, Fingerprint};
pub use injection::{format_session_for_injection, format_timestamp, InjectionMode};
pub use progress::{BatchProgress, BatchStatus, CheckpointRecord, BATCH_CHECKPOINT_KEY};
pub use registry::{platform_config, PlatformConfig};
pub use types::{Extraction, Message, Platform, Role, Session};
