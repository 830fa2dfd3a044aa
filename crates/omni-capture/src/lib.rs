//! # OmniContext Capture
//!
//! 实时捕获与批量遍历。
//!
//! - [`CaptureScheduler`]：监听页面变化与导航，合并突发变化后防抖保存
//! - [`BatchTraversal`]：遍历侧边栏中的所有会话，可暂停、恢复、取消
//! - [`BatchController`]：单例控制器，处理控制协议并广播进度
//!
//! 页面访问全部经由 [`PageDriver`]，[`SnapshotDriver`] 以磁盘上的 HTML 文件实现它。

pub mod batch;
pub mod controller;
pub mod driver;
pub mod error;
pub mod protocol;
pub mod scheduler;
pub mod snapshot;
pub mod stability;

pub use batch::{BatchTraversal, ProgressSink, SessionItem, TraversalControl, NO_SESSION_LIST};
pub use controller::BatchController;
pub use driver::{NodeTarget, PageDriver, ScrollEdge, ScrollMetrics};
pub use error::{CaptureError, CaptureResult, DriverError};
pub use protocol::{BatchNotification, ControlRequest, ControlResponse};
pub use scheduler::{
    CaptureContext, CaptureOutcome, CaptureScheduler, CaptureTrigger, FlushOutcome,
};
pub use snapshot::SnapshotDriver;
pub use stability::{stabilize, StabilityOutcome, StabilityPolicy};
