//! # Platform Registry
//!
//! 每个平台的提取规则都是一份静态数据，新增平台只需要新增一条记录。
//! 选择器使用 CSS 语法，正则使用 `regex` crate 语法（不支持前瞻）。

use crate::types::Platform;

/// 平台规则
#[derive(Debug)]
pub struct PlatformConfig {
    pub platform: Platform,
    /// 匹配地址 host 的片段
    pub host_fragment: &'static str,
    pub session_id: SessionIdRules,
    /// 标题选择器，第一个非空结果生效
    pub title_selectors: &'static [&'static str],
    /// 消息容器候选
    pub container_selectors: &'static [&'static str],
    /// 结构化消息块规则
    pub message_block: Option<BlockRule>,
    pub user_selectors: &'static [&'static str],
    pub assistant_selectors: &'static [&'static str],
    /// 用户消息正文所在位置
    pub user_content_selectors: &'static [&'static str],
    pub thinking: ThinkingRules,
    pub role_tokens: RoleTokens,
    /// 批量遍历用的会话列表规则
    pub session_list: Option<SessionListRules>,
}

/// 结构化消息块
#[derive(Debug)]
pub struct BlockRule {
    pub selector: &'static str,
    pub role: RoleIndicator,
    /// 为 true 时只在第一个消息容器内查找
    pub within_container: bool,
}

/// 判断消息块是否为用户消息
#[derive(Debug)]
pub enum RoleIndicator {
    /// 存在匹配的后代节点即为用户消息
    UserMarker(&'static str),
    /// class / data-testid 含用户角色词，或存在匹配的后代节点
    Tokens { user_descendant: &'static str },
}

/// 角色关键词
#[derive(Debug)]
pub struct RoleTokens {
    pub user: &'static [&'static str],
    pub assistant: &'static [&'static str],
}

/// 清理用正则及替换模板
#[derive(Debug)]
pub struct CleanupRule {
    pub pattern: &'static str,
    pub replacement: &'static str,
}

/// 思考内容过滤规则
#[derive(Debug)]
pub struct ThinkingRules {
    /// 助手正文根节点，分隔符、子节点、子树、清理策略都在其中进行
    pub content_root: Option<&'static str>,
    /// 最终回答节点
    pub answer_selectors: &'static [&'static str],
    /// 判定文本是否为思考内容（作用于去除首尾空白后的文本）
    pub markers: &'static [&'static str],
    /// 思考与回答之间的分隔符
    pub separators: &'static [&'static str],
    /// class 中出现即视为思考节点
    pub class_hints: &'static [&'static str],
    /// 思考子树
    pub subtree: Option<&'static str>,
    pub cleanup: &'static [CleanupRule],
}

/// 会话 id 候选来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSource {
    Query,
    Fragment,
    Path { min_len: usize },
}

/// 会话 id 推导规则
#[derive(Debug)]
pub struct SessionIdRules {
    pub precedence: &'static [IdSource],
    pub query_params: &'static [&'static str],
    /// 不可作为 id 的通用路径片段
    pub generic_tokens: &'static [&'static str],
    /// 新建（未保存）会话的路径标记
    pub new_markers: &'static [&'static str],
}

/// 会话列表规则
#[derive(Debug)]
pub struct SessionListRules {
    pub sidebar_selectors: &'static [&'static str],
    pub toggle_selectors: &'static [&'static str],
    pub item_selectors: &'static [&'static str],
    pub item_title_selectors: &'static [&'static str],
    pub history_selectors: &'static [&'static str],
}

const QUERY_PARAMS: &[&str] = &["chatId", "id", "session"];
const GENERIC_TOKENS: &[&str] = &["chat", "c", "new"];
const NEW_MARKERS: &[&str] = &["new"];

const DOUBAO: PlatformConfig = PlatformConfig {
    platform: Platform::Doubao,
    host_fragment: "doubao.com",
    session_id: SessionIdRules {
        precedence: &[IdSource::Path { min_len: 4 }, IdSource::Query, IdSource::Fragment],
        query_params: QUERY_PARAMS,
        generic_tokens: GENERIC_TOKENS,
        new_markers: NEW_MARKERS,
    },
    title_selectors: &[
        r#"[class*="chat-title"]"#,
        r#"[class*="header-title"]"#,
        r#"h1[class*="title"]"#,
        r#"[data-testid="chat-title"]"#,
        r#"[class*="conversation-title"]"#,
        r#"[class*="session-title"]"#,
        "title",
    ],
    container_selectors: &[
        r#"[class*="message-list"]"#,
        r#"[class*="chat-container"]"#,
        r#"[class*="conversation-content"]"#,
        r#"[class*="message-container"]"#,
    ],
    message_block: Some(BlockRule {
        selector: r#"[class*="message-block-container"]"#,
        role: RoleIndicator::UserMarker(r#"[class*="bg-s-color-bg-trans"]"#),
        within_container: false,
    }),
    user_selectors: &[r#"[class*="user-message"]"#, r#"[data-role="user"]"#],
    assistant_selectors: &[
        r#"[class*="bot-message"]"#,
        r#"[class*="ai-message"]"#,
        r#"[data-role="assistant"]"#,
    ],
    user_content_selectors: &[r#"[class*="container-"]"#, ".content", "p"],
    thinking: ThinkingRules {
        content_root: Some(r#"[class*="container-"]"#),
        answer_selectors: &[
            r#"[class*="answer-content"]"#,
            r#"[class*="final-answer"]"#,
            r#"[class*="message-content"]:last-child"#,
        ],
        markers: &["思考中", r"(?i) thinking[.。]+"],
        separators: &["</think>", "正式回答：", "回答：", "最终答案："],
        class_hints: &["thinking", "thought"],
        subtree: Some(r#"[class*="thinking"], [class*="thought"]"#),
        cleanup: &[
            CleanupRule {
                pattern: r"(?s)<think>.*?</think>",
                replacement: "",
            },
            CleanupRule {
                pattern: r"思考中[.。]+",
                replacement: "",
            },
        ],
    },
    role_tokens: RoleTokens {
        user: &["user"],
        assistant: &["bot", "ai-message", "assistant"],
    },
    session_list: Some(SessionListRules {
        sidebar_selectors: &[
            "#flow_chat_sidebar",
            r#"[data-testid="flow_chat_sidebar"]"#,
            r#"[class*="sidebar"]"#,
        ],
        toggle_selectors: &[
            r#"[class*="menu-button"]"#,
            r#"[class*="sidebar-toggle"]"#,
            r#"[class*="hamburger"]"#,
            r#"[data-testid="sidebar-toggle"]"#,
            r#"button[aria-label*="菜单"]"#,
            r#"button[aria-label*="侧边栏"]"#,
        ],
        item_selectors: &[
            r#"#flow_chat_sidebar [class*="chat-item"]"#,
            r#"[data-testid="flow_chat_sidebar"] [class*="chat-item"]"#,
            r#"[class*="chat-item"]"#,
        ],
        item_title_selectors: &[
            r#"[class*="title"]"#,
            r#"[class*="name"]"#,
            r#"span[class*="text"]"#,
            "span",
        ],
        history_selectors: &[
            r#"[class*="message-list"]"#,
            r#"[class*="chat-container"]"#,
            r#"[class*="conversation-content"]"#,
        ],
    }),
};

const YUANBAO: PlatformConfig = PlatformConfig {
    platform: Platform::Yuanbao,
    host_fragment: "yuanbao.tencent.com",
    session_id: SessionIdRules {
        precedence: &[
            IdSource::Query,
            IdSource::Fragment,
            IdSource::Path { min_len: 8 },
            IdSource::Path { min_len: 4 },
        ],
        query_params: &["chatId", "id"],
        generic_tokens: GENERIC_TOKENS,
        new_markers: NEW_MARKERS,
    },
    title_selectors: &[
        ".session-title",
        ".chat-title",
        ".active .title",
        r#"[data-testid="session-title"]"#,
        r#"[class*="chat-title"]"#,
        r#"[class*="session-title"]"#,
        "title",
    ],
    container_selectors: &[
        r#"[class*="agent-chat__list"]"#,
        r#"[class*="chat-list"]"#,
        r#"[class*="message-list"]"#,
    ],
    message_block: None,
    user_selectors: &[r#"[class*="bubble--human"]"#, r#"[class*="chat__bubble--human"]"#],
    assistant_selectors: &[r#"[class*="bubble--ai"]"#, r#"[class*="chat__bubble--ai"]"#],
    user_content_selectors: &[
        r#"[class*="content"]"#,
        r#"[class*="text"]"#,
        r#"[class*="message-body"]"#,
        ".content",
        "p",
    ],
    thinking: ThinkingRules {
        content_root: None,
        answer_selectors: &[
            r#"[class*="answer"]"#,
            r#"[class*="final"]"#,
            r#"[class*="response"]"#,
            r#"[class*="result"]"#,
            r#"[class*="output"]"#,
        ],
        markers: &["^思考[过程中]", r"(?i)^Think(ing)?[:：]", "^正在分析", "^推理过程"],
        separators: &["【回答】", "</thinking>"],
        class_hints: &["thinking", "thought", "reasoning", "process"],
        subtree: Some(r#"[class*="thinking"], [class*="thought"], [class*="reasoning"]"#),
        cleanup: &[
            CleanupRule {
                pattern: r"【思考】[\s\S]*?【回答】",
                replacement: "",
            },
            CleanupRule {
                pattern: r"(?i)<thinking>[\s\S]*?</thinking>",
                replacement: "",
            },
            CleanupRule {
                pattern: r"思考过程：[\s\S]*?(\n\n|回答)",
                replacement: "$1",
            },
        ],
    },
    role_tokens: RoleTokens {
        user: &["human"],
        assistant: &["bubble--ai"],
    },
    session_list: None,
};

const CLAUDE: PlatformConfig = PlatformConfig {
    platform: Platform::Claude,
    host_fragment: "claude.ai",
    session_id: SessionIdRules {
        precedence: &[IdSource::Path { min_len: 4 }, IdSource::Query, IdSource::Fragment],
        query_params: QUERY_PARAMS,
        generic_tokens: GENERIC_TOKENS,
        new_markers: NEW_MARKERS,
    },
    title_selectors: &[
        ".conversation-title",
        r#"[aria-selected="true"] .title"#,
        ".chat-title",
        r#"[class*="conversation-title"]"#,
        r#"[class*="chat-title"]"#,
        "h1",
        "title",
    ],
    container_selectors: &[
        r#"[class*="conversation"]"#,
        r#"[class*="messages"]"#,
        r#"[data-testid="conversation"]"#,
        ".prose",
        "main",
    ],
    message_block: Some(BlockRule {
        selector: r#"[class*="message"], [data-testid*="message"], [class*="turn"]"#,
        role: RoleIndicator::Tokens {
            user_descendant: r#"[class*="human"], [class*="user"]"#,
        },
        within_container: true,
    }),
    user_selectors: &[r#"[class*="human"]"#, r#"[class*="user-message"]"#],
    assistant_selectors: &[r#"[class*="assistant"]"#, r#"[class*="claude-message"]"#],
    user_content_selectors: &[r#"[class*="content"]"#, r#"[class*="text"]"#, ".prose", "p"],
    thinking: ThinkingRules {
        content_root: None,
        answer_selectors: &[
            r#"[class*="response"]"#,
            r#"[class*="answer"]"#,
            r#"[class*="content"]:not([class*="thinking"])"#,
            ".prose",
        ],
        markers: &[
            r"(?i)^Thinking[:：]",
            r"(?i)^Extended thinking",
            r"(?i)^Let me think",
            r"(?i)^I need to think",
        ],
        separators: &["[/Thinking]", "</thinking>"],
        class_hints: &["thinking", "thought"],
        subtree: Some(r#"[class*="thinking"], [class*="thought"], [data-thinking]"#),
        cleanup: &[
            CleanupRule {
                pattern: r"(?i)\[Thinking\][\s\S]*?\[/Thinking\]",
                replacement: "",
            },
            CleanupRule {
                pattern: r"(?i)<thinking>[\s\S]*?</thinking>",
                replacement: "",
            },
            CleanupRule {
                pattern: r"(?i)Thinking:\n[\s\S]*?(\n\n|Response|Answer)",
                replacement: "$1",
            },
        ],
    },
    role_tokens: RoleTokens {
        user: &["human", "user"],
        assistant: &["assistant", "claude"],
    },
    session_list: None,
};

static REGISTRY: [PlatformConfig; 3] = [DOUBAO, YUANBAO, CLAUDE];

/// 获取平台规则
pub fn platform_config(platform: Platform) -> &'static PlatformConfig {
    match platform {
        Platform::Doubao => &REGISTRY[0],
        Platform::Yuanbao => &REGISTRY[1],
        Platform::Claude => &REGISTRY[2],
    }
}

/// 按注册顺序遍历所有平台规则
pub fn all_configs() -> impl Iterator<Item = &'static PlatformConfig> {
    REGISTRY.iter()
}
