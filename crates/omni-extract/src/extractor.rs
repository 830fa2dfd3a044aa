//! # Transcript Extractor
//!
//! 把页面解析为有序的消息列表。按以下顺序尝试，前一级没有候选时才进入下一级：
//!
//! 1. 结构化消息块（带角色判定）
//! 2. 消息容器内的用户/助手选择器，合并后按文档顺序排序
//! 3. 整个文档范围内的用户/助手选择器
//!
//! 任何一级都不会报错，找不到内容时返回空列表。

use scraper::ElementRef;
use tracing::debug;

use omni_core::registry::{BlockRule, RoleIndicator};
use omni_core::{platform_config, Extraction, Message, Platform, PlatformConfig, Role};

use crate::document::{first_descendant, is_ancestor, role_attributes, trimmed_text, Document};
use crate::thinking::final_answer;
use crate::title::extract_title;

/// 每一级提取得到的候选节点
type Candidates<'a> = Vec<(ElementRef<'a>, Role)>;

/// 命中的提取级别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStage {
    Blocks,
    Container,
    Document,
    Empty,
}

/// 会话转录提取器
#[derive(Debug, Clone, Copy)]
pub struct TranscriptExtractor {
    platform: Platform,
    config: &'static PlatformConfig,
}

impl TranscriptExtractor {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            config: platform_config(platform),
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// 解析 HTML 并提取
    pub fn extract_html(&self, html: &str) -> Extraction {
        self.extract(&Document::parse(html))
    }

    /// 提取标题与消息
    pub fn extract(&self, doc: &Document) -> Extraction {
        let messages = self.extract_messages(doc);
        let title = extract_title(doc, self.config, &messages);
        Extraction { title, messages }
    }

    pub fn extract_messages(&self, doc: &Document) -> Vec<Message> {
        self.extract_with_stage(doc).0
    }

    /// 提取消息并返回命中的级别
    pub fn extract_with_stage(&self, doc: &Document) -> (Vec<Message>, ExtractionStage) {
        if let Some(rule) = &self.config.message_block {
            let candidates = self.block_candidates(doc, rule);
            if !candidates.is_empty() {
                return (self.build(candidates), ExtractionStage::Blocks);
            }
        }

        if let Some(container) = doc.first_of(self.config.container_selectors) {
            let candidates = self.selector_candidates(doc, Some(container));
            if !candidates.is_empty() {
                return (self.build(candidates), ExtractionStage::Container);
            }
        }

        let candidates = self.selector_candidates(doc, None);
        if candidates.is_empty() {
            debug!(platform = %self.platform, "no message candidates found");
            return (Vec::new(), ExtractionStage::Empty);
        }
        (self.build(candidates), ExtractionStage::Document)
    }

    fn block_candidates<'a>(&self, doc: &'a Document, rule: &BlockRule) -> Candidates<'a> {
        let scope = if rule.within_container {
            match doc.first_of(self.config.container_selectors) {
                Some(container) => Some(container),
                None => return Vec::new(),
            }
        } else {
            None
        };

        let blocks = outermost(doc.select_in(scope, rule.selector));
        blocks
            .into_iter()
            .map(|block| {
                let role = if self.is_user_block(block, &rule.role) {
                    Role::User
                } else {
                    Role::Assistant
                };
                (block, role)
            })
            .collect()
    }

    fn is_user_block(&self, block: ElementRef<'_>, indicator: &RoleIndicator) -> bool {
        match indicator {
            RoleIndicator::UserMarker(css) => first_descendant(block, css).is_some(),
            RoleIndicator::Tokens { user_descendant } => {
                let attrs = role_attributes(block);
                self.config
                    .role_tokens
                    .user
                    .iter()
                    .any(|token| attrs.contains(token))
                    || first_descendant(block, user_descendant).is_some()
            }
        }
    }

    fn selector_candidates<'a>(
        &self,
        doc: &'a Document,
        scope: Option<ElementRef<'a>>,
    ) -> Candidates<'a> {
        let mut found: Candidates<'a> = Vec::new();
        let groups = [
            (self.config.user_selectors, Role::User),
            (self.config.assistant_selectors, Role::Assistant),
        ];
        for (selectors, role) in groups {
            for css in selectors {
                for el in doc.select_in(scope, css) {
                    // 同一节点只保留第一次出现的角色
                    if !found.iter().any(|(seen, _)| seen.id() == el.id()) {
                        found.push((el, role));
                    }
                }
            }
        }

        let mut found = drop_nested(found);
        doc.sort_by_document_order(&mut found);
        found
    }

    fn build(&self, candidates: Candidates<'_>) -> Vec<Message> {
        candidates
            .into_iter()
            .enumerate()
            .filter_map(|(index, (el, role))| {
                let content = match role {
                    Role::User => self.user_content(el),
                    Role::Assistant => final_answer(el, &self.config.thinking),
                };
                if content.is_empty() {
                    None
                } else {
                    Some(Message::new(self.platform, index, role, content))
                }
            })
            .collect()
    }

    fn user_content(&self, el: ElementRef<'_>) -> String {
        self.config
            .user_content_selectors
            .iter()
            .filter_map(|css| first_descendant(el, css))
            .map(trimmed_text)
            .find(|text| !text.is_empty())
            .unwrap_or_else(|| trimmed_text(el))
    }
}

/// 只保留最外层节点
fn outermost(nodes: Vec<ElementRef<'_>>) -> Vec<ElementRef<'_>> {
    nodes
        .iter()
        .filter(|node| !nodes.iter().any(|other| is_ancestor(*other, **node)))
        .copied()
        .collect()
}

/// 去掉嵌套在其他候选中的候选
fn drop_nested(candidates: Candidates<'_>) -> Candidates<'_> {
    let kept: Vec<bool> = candidates
        .iter()
        .map(|(el, _)| !candidates.iter().any(|(other, _)| is_ancestor(*other, *el)))
        .collect();
    candidates
        .into_iter()
        .zip(kept)
        .filter_map(|(candidate, keep)| keep.then_some(candidate))
        .collect()
}
