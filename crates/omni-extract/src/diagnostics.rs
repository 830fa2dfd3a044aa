//! Selector diagnostics.
//!
//! Reports which of a platform's selectors match the current page. Used when
//! a platform changes its markup and extraction starts coming back empty.

use serde::Serialize;

use omni_core::{platform_config, Platform};

use crate::document::{excerpt, selector, text_of, Document};

const SAMPLE_CHARS: usize = 50;
const MAX_CANDIDATES: usize = 5;

/// Which selector group a probe belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorGroup {
    Title,
    Container,
    Block,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectorProbe {
    pub group: SelectorGroup,
    pub selector: String,
    /// False when the selector failed to parse.
    pub valid: bool,
    pub matches: usize,
    pub sample: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CandidateNode {
    pub class: String,
    pub sample: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectorReport {
    pub platform: Platform,
    pub probes: Vec<SelectorProbe>,
    /// Nodes that look like messages but none of the selectors reached.
    pub candidates: Vec<CandidateNode>,
}

impl SelectorReport {
    pub fn probes_in(&self, group: SelectorGroup) -> impl Iterator<Item = &SelectorProbe> {
        self.probes.iter().filter(move |p| p.group == group)
    }
}

pub fn diagnose(platform: Platform, doc: &Document) -> SelectorReport {
    let config = platform_config(platform);
    let mut groups: Vec<(SelectorGroup, Vec<&str>)> = vec![
        (SelectorGroup::Title, config.title_selectors.to_vec()),
        (SelectorGroup::Container, config.container_selectors.to_vec()),
    ];
    if let Some(block) = &config.message_block {
        groups.push((SelectorGroup::Block, vec![block.selector]));
    }
    groups.push((SelectorGroup::User, config.user_selectors.to_vec()));
    groups.push((SelectorGroup::Assistant, config.assistant_selectors.to_vec()));

    let probes = groups
        .into_iter()
        .flat_map(|(group, selectors)| {
            selectors.into_iter().map(move |css| probe(doc, group, css))
        })
        .collect();

    SelectorReport {
        platform,
        probes,
        candidates: auto_detect(doc),
    }
}

fn probe(doc: &Document, group: SelectorGroup, css: &str) -> SelectorProbe {
    let valid = selector(css).is_some();
    let matches = doc.select_all(css);
    SelectorProbe {
        group,
        selector: css.to_string(),
        valid,
        matches: matches.len(),
        sample: matches
            .first()
            .map(|el| excerpt(text_of(*el).trim(), SAMPLE_CHARS)),
    }
}

fn auto_detect(doc: &Document) -> Vec<CandidateNode> {
    doc.select_all("div")
        .into_iter()
        .filter_map(|el| {
            let class = el.value().attr("class").unwrap_or_default().to_string();
            let lowered = class.to_lowercase();
            if !["message", "chat", "bubble"].iter().any(|k| lowered.contains(k)) {
                return None;
            }
            let text = text_of(el);
            let len = text.chars().count();
            if len <= 20 || len >= 500 {
                return None;
            }
            Some(CandidateNode {
                class,
                sample: excerpt(text.trim(), 80),
            })
        })
        .take(MAX_CANDIDATES)
        .collect()
}
