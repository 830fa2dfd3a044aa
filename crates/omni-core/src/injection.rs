//! # Context Injection
//!
//! 把已保存的会话格式化为可以粘贴到其他平台的上下文引用文本。

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{Role, Session};

const SUMMARY_CHARS: usize = 100;

/// 注入模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionMode {
    /// 完整对话
    #[default]
    Full,
    /// 只取第一条用户消息作为摘要
    Summary,
}

impl std::str::FromStr for InjectionMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" => Ok(InjectionMode::Full),
            "summary" => Ok(InjectionMode::Summary),
            _ => Err(CoreError::UnknownMode {
                name: s.to_string(),
            }),
        }
    }
}

/// `YYYY-MM-DD HH:MM`，本地时区
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M")
        .to_string()
}

/// 生成上下文引用文本
pub fn format_session_for_injection(session: &Session, mode: InjectionMode) -> String {
    let platform_name = session.platform.display_name();
    let timestamp = format_timestamp(session.created_at);

    let content = match mode {
        InjectionMode::Full => session
            .messages
            .iter()
            .map(|msg| {
                let role = match msg.role {
                    Role::User => "用户",
                    Role::Assistant => platform_name,
                };
                format!("[{}] {}", role, msg.content)
            })
            .collect::<Vec<_>>()
            .join("\n\n"),
        InjectionMode::Summary => match session.first_user_message() {
            Some(msg) => {
                let mut summary: String = msg.content.chars().take(SUMMARY_CHARS).collect();
                if msg.content.chars().count() > SUMMARY_CHARS {
                    summary.push_str("...");
                }
                summary
            }
            None => "无内容".to_string(),
        },
    };

    format!(
        "【上下文引用】\n以下是我之前在{platform}的对话记录：\n\n---\n会话: {title}\n来源: {platform}\n日期: {timestamp}\n消息数: {count}\n\n{content}\n---\n\n基于以上背景，请帮我继续...\n",
        platform = platform_name,
        title = session.title,
        timestamp = timestamp,
        count = session.message_count,
        content = content,
    )
}
