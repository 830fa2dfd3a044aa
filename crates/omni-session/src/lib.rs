//! # OmniContext Session Storage
//!
//! 捕获到的会话与批量遍历检查点的持久化。
//!
//! ## 功能特性
//!
//! - **会话存储**：按 id 覆盖写入，保留首次创建时间
//! - **平台查询**：按平台列出会话，最近更新的在前
//! - **检查点**：批量遍历进度的单一记录
//! - **宿主失效**：存储不可用时返回 `ContextInvalidated`
//!
//! ## 存储结构
//!
//! ```text
//! <base_path>/
//! ├── sessions/
//! │   └── <session_id>.json
//! └── batch_capture_state.json
//! ```

pub mod error;
pub mod json_store;
pub mod memory_store;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use json_store::{JsonFileStore, JsonFileStoreConfig};
pub use memory_store::MemoryStore;
pub use store::{merge_for_save, CheckpointStore, SessionStore};


