//! Thinking filter.
//!
//! Assistant nodes on reasoning-capable models render a "thinking" section
//! before the final answer. Each strategy below is a pure function over the
//! node and the platform's [`ThinkingRules`]; they run in order and the first
//! non-empty result wins.

use scraper::ElementRef;
use tracing::trace;

use omni_core::registry::ThinkingRules;

use crate::document::{first_descendant, regex, text_excluding, text_of, trimmed_text};

/// A single filtering strategy.
pub type Strategy = fn(ElementRef<'_>, &ThinkingRules) -> Option<String>;

/// Strategies in the order they are tried.
pub const STRATEGIES: &[(&str, Strategy)] = &[
    ("answer_element", answer_element),
    ("separator", after_last_separator),
    ("children_walk", children_after_thinking),
    ("subtree_removal", without_thinking_subtree),
    ("cleanup", cleaned_text),
];

/// Minimum length of the text left over after removing the thinking subtree.
const MIN_REMAINDER_CHARS: usize = 10;

/// Final-answer text of an assistant node, or an empty string.
pub fn final_answer(el: ElementRef<'_>, rules: &ThinkingRules) -> String {
    for (name, strategy) in STRATEGIES {
        if let Some(text) = strategy(el, rules) {
            let text = text.trim();
            if !text.is_empty() {
                trace!(strategy = *name, "thinking filter resolved");
                return text.to_string();
            }
        }
    }
    String::new()
}

/// Whether `text` reads like reasoning rather than an answer.
pub fn looks_like_thinking(text: &str, rules: &ThinkingRules) -> bool {
    let text = text.trim();
    rules
        .markers
        .iter()
        .filter_map(|pattern| regex(pattern))
        .any(|re| re.is_match(text))
}

fn has_thinking_class(el: ElementRef<'_>, rules: &ThinkingRules) -> bool {
    let class = el.value().attr("class").unwrap_or_default().to_lowercase();
    rules.class_hints.iter().any(|hint| class.contains(hint))
}

fn content_root<'a>(el: ElementRef<'a>, rules: &ThinkingRules) -> ElementRef<'a> {
    rules
        .content_root
        .and_then(|css| first_descendant(el, css))
        .unwrap_or(el)
}

/// a. An explicit answer element whose text is not itself thinking.
pub fn answer_element(el: ElementRef<'_>, rules: &ThinkingRules) -> Option<String> {
    rules.answer_selectors.iter().find_map(|css| {
        let text = trimmed_text(first_descendant(el, css)?);
        if text.is_empty() || looks_like_thinking(&text, rules) {
            None
        } else {
            Some(text)
        }
    })
}

/// b. Everything after the last occurrence of any separator.
pub fn after_last_separator(el: ElementRef<'_>, rules: &ThinkingRules) -> Option<String> {
    let raw = text_of(content_root(el, rules));
    let cut = rules
        .separators
        .iter()
        .filter_map(|sep| raw.rfind(sep).map(|pos| pos + sep.len()))
        .max()?;
    let after = raw[cut..].trim();
    if after.is_empty() {
        None
    } else {
        Some(after.to_string())
    }
}

/// c. Direct children following the first skipped thinking child.
pub fn children_after_thinking(el: ElementRef<'_>, rules: &ThinkingRules) -> Option<String> {
    let root = content_root(el, rules);
    let mut skipped = false;
    let mut kept = Vec::new();

    for child in root.children().filter_map(ElementRef::wrap) {
        let text = text_of(child);
        if looks_like_thinking(&text, rules) || has_thinking_class(child, rules) {
            skipped = true;
            continue;
        }
        let text = text.trim();
        if skipped && !text.is_empty() {
            kept.push(text.to_string());
        }
    }

    if !skipped || kept.is_empty() {
        return None;
    }
    Some(kept.join("\n"))
}

/// d. The node's text with every thinking subtree removed.
pub fn without_thinking_subtree(el: ElementRef<'_>, rules: &ThinkingRules) -> Option<String> {
    let root = content_root(el, rules);
    let css = rules.subtree?;
    let sel = crate::document::selector(css)?;
    let thinking: Vec<ElementRef<'_>> = root.select(&sel).collect();
    if thinking.is_empty() {
        return None;
    }

    let remainder = text_excluding(root, &|node: &ElementRef<'_>| {
        thinking.iter().any(|t| t.id() == node.id())
    });
    let remainder = remainder.trim();
    if remainder.chars().count() > MIN_REMAINDER_CHARS {
        Some(remainder.to_string())
    } else {
        None
    }
}

/// e. Raw text with the platform's cleanup patterns removed.
pub fn cleaned_text(el: ElementRef<'_>, rules: &ThinkingRules) -> Option<String> {
    let mut text = text_of(content_root(el, rules));
    for rule in rules.cleanup {
        if let Some(re) = regex(rule.pattern) {
            text = re.replace_all(&text, rule.replacement).into_owned();
        }
    }
    Some(text.trim().to_string())
}
