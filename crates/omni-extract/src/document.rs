//! HTML 文档模型与选择器/正则缓存。
//!
//! 页面以序列化后的 HTML 传入，解析后只在同步代码里使用，不跨越 `.await`。

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use tracing::debug;

static SELECTOR_CACHE: Lazy<Mutex<HashMap<String, Option<Selector>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

static REGEX_CACHE: Lazy<Mutex<HashMap<String, Option<Regex>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// 解析并缓存 CSS 选择器，无效选择器返回 None
pub fn selector(css: &str) -> Option<Selector> {
    if let Some(cached) = SELECTOR_CACHE.lock().get(css) {
        return cached.clone();
    }
    let parsed = match Selector::parse(css) {
        Ok(sel) => Some(sel),
        Err(e) => {
            debug!("Invalid selector {:?}: {:?}", css, e);
            None
        }
    };
    SELECTOR_CACHE.lock().insert(css.to_string(), parsed.clone());
    parsed
}

/// 编译并缓存正则，无效正则返回 None
pub fn regex(pattern: &str) -> Option<Regex> {
    if let Some(cached) = REGEX_CACHE.lock().get(pattern) {
        return cached.clone();
    }
    let compiled = match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            debug!("Invalid pattern {:?}: {}", pattern, e);
            None
        }
    };
    REGEX_CACHE.lock().insert(pattern.to_string(), compiled.clone());
    compiled
}

/// 已解析的页面
pub struct Document {
    html: Html,
}

impl Document {
    pub fn parse(source: &str) -> Self {
        Self {
            html: Html::parse_document(source),
        }
    }

    /// 根元素（`<html>`）
    pub fn root(&self) -> ElementRef<'_> {
        self.html.root_element()
    }

    /// 在整个文档或某个元素的后代中查找，作用域元素本身不参与匹配
    pub fn select_in<'a>(&'a self, scope: Option<ElementRef<'a>>, css: &str) -> Vec<ElementRef<'a>> {
        let Some(sel) = selector(css) else {
            return Vec::new();
        };
        let found: Vec<ElementRef<'a>> = match scope {
            Some(el) => el.select(&sel).collect(),
            None => self.html.select(&sel).collect(),
        };
        found
    }

    pub fn select_all(&self, css: &str) -> Vec<ElementRef<'_>> {
        self.select_in(None, css)
    }

    pub fn select_first(&self, css: &str) -> Option<ElementRef<'_>> {
        let sel = selector(css)?;
        let found = self.html.select(&sel).next();
        found
    }

    /// 按顺序尝试多个选择器，返回第一个命中的元素
    pub fn first_of(&self, selectors: &[&str]) -> Option<ElementRef<'_>> {
        selectors.iter().find_map(|css| self.select_first(css))
    }

    pub fn count(&self, css: &str) -> usize {
        self.select_all(css).len()
    }

    /// 按文档顺序稳定排序
    pub fn sort_by_document_order<T>(&self, items: &mut [(ElementRef<'_>, T)]) {
        let order: HashMap<_, usize> = self
            .html
            .tree
            .root()
            .descendants()
            .enumerate()
            .map(|(index, node)| (node.id(), index))
            .collect();
        items.sort_by_key(|(el, _)| order.get(&el.id()).copied().unwrap_or(usize::MAX));
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document").finish_non_exhaustive()
    }
}

/// 元素下第一个匹配的后代
pub fn first_descendant<'a>(el: ElementRef<'a>, css: &str) -> Option<ElementRef<'a>> {
    let sel = selector(css)?;
    let found = el.select(&sel).next();
    found
}

/// 元素的全部文本（等价于 textContent）
pub fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect()
}

/// 去除首尾空白后的文本
pub fn trimmed_text(el: ElementRef<'_>) -> String {
    text_of(el).trim().to_string()
}

/// 收集文本，跳过 `skip` 返回 true 的子树
pub fn text_excluding<F>(el: ElementRef<'_>, skip: &F) -> String
where
    F: Fn(&ElementRef<'_>) -> bool,
{
    let mut out = String::new();
    collect_text(el, skip, &mut out);
    out
}

fn collect_text<F>(el: ElementRef<'_>, skip: &F, out: &mut String)
where
    F: Fn(&ElementRef<'_>) -> bool,
{
    for child in el.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    if !skip(&child_el) {
                        collect_text(child_el, skip, out);
                    }
                }
            }
            _ => {}
        }
    }
}

/// class 与 data-testid 拼接后的小写字符串
pub fn role_attributes(el: ElementRef<'_>) -> String {
    let class = el.value().attr("class").unwrap_or_default();
    let test_id = el.value().attr("data-testid").unwrap_or_default();
    format!("{}{}", class, test_id).to_lowercase()
}

/// `a` 是否为 `b` 的祖先
pub fn is_ancestor(a: ElementRef<'_>, b: ElementRef<'_>) -> bool {
    b.ancestors().any(|node| node.id() == a.id())
}

/// 截取前 n 个字符
pub fn excerpt(text: &str, n: usize) -> String {
    text.chars().take(n).collect()
}
