//! OmniContext Observability
//!
//! 基于 tracing 的结构化日志：可重载的级别过滤、纯文本或 JSON 输出、可选的文件输出。

pub mod error;
pub mod logging;

pub use error::{ObservabilityError, Result};
pub use logging::{build_filter, capture_span, LogManager};

/// 便捷导入模块
pub mod prelude {
    //! 常用类型的便捷导入

    pub use crate::{LogManager, ObservabilityError, Result};

    // 日志
    pub use tracing::{debug, error, info, instrument, trace, warn, Span};
}
