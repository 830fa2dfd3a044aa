//! # Change Detector
//!
//! 用消息数与首尾消息摘要构造廉价指纹，判断两次提取之间是否有变化。

use serde::{Deserialize, Serialize};

use crate::types::Message;

/// 摘要截取的字符数
pub const EXCERPT_CHARS: usize = 50;

/// 会话内容指纹
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 计算消息列表的指纹
pub fn fingerprint(messages: &[Message]) -> Fingerprint {
    let (first, last) = match (messages.first(), messages.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Fingerprint("0".to_string()),
    };

    let head: String = first.content.chars().take(EXCERPT_CHARS).collect();
    let tail = tail_chars(&last.content, EXCERPT_CHARS);

    Fingerprint(format!(
        "{}|{}:{}|{}:{}",
        messages.len(),
        first.role,
        head,
        last.role,
        tail
    ))
}

/// 两个指纹是否不同；没有上一次指纹时总是视为变化
pub fn has_changed(previous: Option<&Fingerprint>, next: &Fingerprint) -> bool {
    previous.map_or(true, |prev| prev != next)
}

fn tail_chars(text: &str, n: usize) -> &str {
    let count = text.chars().count();
    if count <= n {
        return text;
    }
    match text.char_indices().nth(count - n) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}
