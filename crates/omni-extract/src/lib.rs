//! # OmniContext Extract
//!
//! 从聊天页面的 HTML 中提取会话转录。
//!
//! - **document**：HTML 解析、选择器与正则缓存、文本工具
//! - **extractor**：三级提取级联
//! - **thinking**：助手消息的思考内容过滤
//! - **title**：会话标题
//! - **diagnostics**：选择器命中情况报告

pub mod diagnostics;
pub mod document;
pub mod extractor;
pub mod thinking;
pub mod title;

pub use diagnostics::{diagnose, SelectorGroup, SelectorProbe, SelectorReport};
pub use document::Document;
pub use extractor::{ExtractionStage, TranscriptExtractor};
pub use thinking::{final_answer, looks_like_thinking};
