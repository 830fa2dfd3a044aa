//! # Platform Detector
//!
//! 根据页面地址识别平台并推导会话 id。

use chrono::Utc;
use url::Url;

use crate::error::{CoreError, CoreResult};
use crate::registry::{all_configs, platform_config, IdSource, SessionIdRules};
use crate::types::Platform;

/// 识别地址所属平台，按注册顺序第一个匹配的 host 片段生效
pub fn detect_platform(address: &str) -> Option<Platform> {
    let url = Url::parse(address).ok()?;
    let host = url.host_str()?;
    all_configs()
        .find(|config| host.contains(config.host_fragment))
        .map(|config| config.platform)
}

/// 推导会话 id
///
/// 除 "新建会话" 地址外结果只取决于地址本身，同一地址总是得到同一个 id。
/// 新建会话返回 `new-{毫秒时间戳}`，每次调用都不同。
pub fn derive_session_id(address: &str, platform: Platform) -> CoreResult<String> {
    let url = Url::parse(address).map_err(|_| CoreError::invalid_address(address))?;
    let rules = &platform_config(platform).session_id;

    let segments: Vec<&str> = url
        .path_segments()
        .map(|parts| parts.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();

    if let Some(last) = segments.last() {
        if rules.new_markers.contains(last) {
            return Ok(format!("new-{}", Utc::now().timestamp_millis()));
        }
    }

    for source in rules.precedence {
        let candidate = match source {
            IdSource::Query => query_candidate(&url, rules),
            IdSource::Fragment => fragment_candidate(&url, rules),
            IdSource::Path { min_len } => path_candidate(&segments, rules, *min_len),
        };
        if let Some(id) = candidate {
            return Ok(id);
        }
    }

    let joined = segments.join("/");
    let key = if joined.is_empty() { "root" } else { joined.as_str() };
    Ok(format!("{}-{}", platform.as_str(), stable_path_hash(key)))
}

/// 新建会话的临时 id
pub fn is_unsaved_session_id(id: &str) -> bool {
    id.strip_prefix("new-")
        .map(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false)
}

fn query_candidate(url: &Url, rules: &SessionIdRules) -> Option<String> {
    rules.query_params.iter().find_map(|param| {
        url.query_pairs()
            .find(|(key, value)| key == *param && !value.is_empty())
            .map(|(_, value)| value.into_owned())
    })
}

fn fragment_candidate(url: &Url, rules: &SessionIdRules) -> Option<String> {
    let first = url.fragment()?.split('/').next()?;
    if first.chars().count() >= 4 && !rules.generic_tokens.contains(&first) {
        Some(first.to_string())
    } else {
        None
    }
}

fn path_candidate(segments: &[&str], rules: &SessionIdRules, min_len: usize) -> Option<String> {
    segments
        .iter()
        .find(|part| part.chars().count() >= min_len && !rules.generic_tokens.contains(*part))
        .map(|part| part.to_string())
}

/// 确定性的 32 位字符串哈希，以 36 进制输出
///
/// 按 UTF-16 码元计算 `h = h * 31 + c`（32 位回绕），取绝对值。
pub fn stable_path_hash(input: &str) -> String {
    let mut hash: i32 = 0;
    for unit in input.encode_utf16() {
        hash = (hash << 5).wrapping_sub(hash).wrapping_add(unit as i32);
    }
    to_base36((hash as i64).unsigned_abs())
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_platform() {
        assert_eq!(
            detect_platform("https://www.doubao.com/chat/123"),
            Some(Platform::Doubao)
        );
        assert_eq!(
            detect_platform("https://yuanbao.tencent.com/chat/123"),
            Some(Platform::Yuanbao)
        );
        assert_eq!(detect_platform("https://claude.ai/chat/123"), Some(Platform::Claude));
        assert_eq!(detect_platform("https://unknown.com/chat/123"), None);
        assert_eq!(detect_platform("not a url"), None);
    }

    #[test]
    fn test_path_segment_ids() {
        assert_eq!(
            derive_session_id("https://www.doubao.com/chat/abc123", Platform::Doubao).unwrap(),
            "abc123"
        );
        assert_eq!(
            derive_session_id("https://yuanbao.tencent.com/chat/xyz789", Platform::Yuanbao)
                .unwrap(),
            "xyz789"
        );
        assert_eq!(
            derive_session_id("https://claude.ai/chat/def456", Platform::Claude).unwrap(),
            "def456"
        );
    }

    #[test]
    fn test_yuanbao_prefers_query_then_fragment() {
        let url = "https://yuanbao.tencent.com/chat/abcdefgh12?chatId=q-1";
        assert_eq!(derive_session_id(url, Platform::Yuanbao).unwrap(), "q-1");

        let url = "https://yuanbao.tencent.com/chat/abcdefgh12#frag-42/x";
        assert_eq!(derive_session_id(url, Platform::Yuanbao).unwrap(), "frag-42");

        let url = "https://yuanbao.tencent.com/chat/abcdefgh12#ab";
        assert_eq!(derive_session_id(url, Platform::Yuanbao).unwrap(), "abcdefgh12");
    }

    #[test]
    fn test_generic_tokens_are_skipped() {
        let url = "https://claude.ai/chat?session=s-77";
        assert_eq!(derive_session_id(url, Platform::Claude).unwrap(), "s-77");

        let url = "https://www.doubao.com/c/#chat";
        let id = derive_session_id(url, Platform::Doubao).unwrap();
        assert!(id.starts_with("doubao-"));
    }

    #[test]
    fn test_new_chat_gets_unsaved_id() {
        let id = derive_session_id("https://claude.ai/chat/new", Platform::Claude).unwrap();
        assert!(id.contains("new-"));
        assert!(is_unsaved_session_id(&id));
        assert!(!is_unsaved_session_id("new-chat"));
    }

    #[test]
    fn test_fallback_hash_is_deterministic() {
        let a = derive_session_id("https://claude.ai/", Platform::Claude).unwrap();
        let b = derive_session_id("https://claude.ai/", Platform::Claude).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, format!("claude-{}", stable_path_hash("root")));

        let c = derive_session_id("https://claude.ai/c/x", Platform::Claude).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_stable_path_hash_values() {
        assert_eq!(stable_path_hash(""), "0");
        // "a" -> 97
        assert_eq!(stable_path_hash("a"), "2p");
        // "ab" -> 97 * 31 + 98 = 3105
        assert_eq!(stable_path_hash("ab"), "2e9");
    }

    #[test]
    fn test_invalid_address() {
        assert!(matches!(
            derive_session_id("::::", Platform::Doubao),
            Err(CoreError::InvalidAddress { .. })
        ));
    }
}
