//! # OmniContext Types
//!
//! 定义捕获流水线的核心类型：平台、消息、会话。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// 支持的聊天平台
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Doubao,
    Yuanbao,
    Claude,
}

impl Platform {
    /// 注册顺序，平台识别按此顺序匹配
    pub const ALL: [Platform; 3] = [Platform::Doubao, Platform::Yuanbao, Platform::Claude];

    /// 平台标识
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Doubao => "doubao",
            Platform::Yuanbao => "yuanbao",
            Platform::Claude => "claude",
        }
    }

    /// 展示名称
    pub fn display_name(&self) -> &'static str {
        match self {
            Platform::Doubao => "豆包",
            Platform::Yuanbao => "元宝",
            Platform::Claude => "Claude",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "doubao" => Ok(Platform::Doubao),
            "yuanbao" => Ok(Platform::Yuanbao),
            "claude" => Ok(Platform::Claude),
            _ => Err(CoreError::UnknownPlatform {
                name: s.to_string(),
            }),
        }
    }
}

/// 消息角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// 消息结构
///
/// 一次提取结果中的一条消息，`content` 只包含最终回答文本。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// 创建消息，id 由平台与候选序号组成
    pub fn new(platform: Platform, index: usize, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: format!("{}-msg-{}", platform.as_str(), index),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// 创建用户消息
    pub fn user(platform: Platform, index: usize, content: impl Into<String>) -> Self {
        Self::new(platform, index, Role::User, content)
    }

    /// 创建助手消息
    pub fn assistant(platform: Platform, index: usize, content: impl Into<String>) -> Self {
        Self::new(platform, index, Role::Assistant, content)
    }
}

/// 一次提取的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub title: String,
    pub messages: Vec<Message>,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// 会话
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub platform: Platform,
    pub title: String,
    pub source_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<Message>,
    pub message_count: usize,
}

impl Session {
    /// 默认标题
    pub const UNTITLED: &'static str = "未命名对话";

    /// 由一次提取结果构造会话
    pub fn from_extraction(
        id: impl Into<String>,
        platform: Platform,
        source_url: impl Into<String>,
        extraction: Extraction,
    ) -> Self {
        let now = Utc::now();
        let title = if extraction.title.trim().is_empty() {
            Self::UNTITLED.to_string()
        } else {
            extraction.title
        };
        let message_count = extraction.messages.len();
        Self {
            id: id.into(),
            platform,
            title,
            source_url: source_url.into(),
            created_at: now,
            updated_at: now,
            messages: extraction.messages,
            message_count,
        }
    }

    /// 替换消息并同步计数
    pub fn set_messages(&mut self, messages: Vec<Message>) {
        self.message_count = messages.len();
        self.messages = messages;
    }

    /// 第一条用户消息
    pub fn first_user_message(&self) -> Option<&Message> {
        self.messages.iter().find(|m| m.role == Role::User)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_from_str() {
        assert_eq!("doubao".parse::<Platform>().unwrap(), Platform::Doubao);
        assert_eq!(" Claude ".parse::<Platform>().unwrap(), Platform::Claude);
        assert!("chatgpt".parse::<Platform>().is_err());
    }

    #[test]
    fn test_message_id_format() {
        let msg = Message::assistant(Platform::Yuanbao, 3, "hi");
        assert_eq!(msg.id, "yuanbao-msg-3");
        assert_eq!(msg.role, Role::Assistant);
    }

    #[test]
    fn test_session_from_extraction() {
        let extraction = Extraction {
            title: "  ".to_string(),
            messages: vec![
                Message::user(Platform::Claude, 0, "question"),
                Message::assistant(Platform::Claude, 1, "answer"),
            ],
        };
        let session =
            Session::from_extraction("abc", Platform::Claude, "https://claude.ai/chat/abc", extraction);

        assert_eq!(session.title, Session::UNTITLED);
        assert_eq!(session.message_count, 2);
        assert_eq!(session.created_at, session.updated_at);
        assert_eq!(session.first_user_message().unwrap().content, "question");
    }

    #[test]
    fn test_session_serialization() {
        let session = Session::from_extraction(
            "s1",
            Platform::Doubao,
            "https://www.doubao.com/chat/s1",
            Extraction {
                title: "t".to_string(),
                messages: vec![Message::user(Platform::Doubao, 0, "你好")],
            },
        );
        let json = serde_json::to_string(&session).unwrap();
        assert!(json.contains("\"platform\":\"doubao\""));
        assert!(json.contains("\"role\":\"user\""));

        let back: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(back, session);
    }
}
