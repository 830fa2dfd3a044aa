use chrono::Local;

use omni_core::{Message, PlatformConfig, Role, Session};

use crate::document::{trimmed_text, Document};

const TITLE_FALLBACK_CHARS: usize = 20;

/// 会话标题：标题选择器 -> 第一条用户消息 -> 日期
pub fn extract_title(doc: &Document, config: &PlatformConfig, messages: &[Message]) -> String {
    let from_selectors = config.title_selectors.iter().find_map(|css| {
        let text = trimmed_text(doc.select_first(css)?);
        (!text.is_empty()).then_some(text)
    });
    if let Some(title) = from_selectors {
        return title;
    }

    if let Some(first) = messages.iter().find(|m| m.role == Role::User) {
        return truncate_title(&first.content);
    }

    format!("{} - {}", Session::UNTITLED, Local::now().format("%Y-%m-%d"))
}

fn truncate_title(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() > TITLE_FALLBACK_CHARS {
        let head: String = text.chars().take(TITLE_FALLBACK_CHARS).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}
