//! revert 原因清洗
//! 从链上错误信息中提取人类可读的回滚原因，剥离二进制编码负载

use once_cell::sync::Lazy;
use regex::Regex;

/// 长十六进制负载（ABI编码的revert data等）
static HEX_PAYLOAD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"0x[0-9a-fA-F]{8,}").expect("valid regex"));

/// 多余空白
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

const MAX_REASON_LEN: usize = 200;

/// 清洗revert原因：
/// 1. 截取 "execution reverted:" / "revert:" 之后的部分（若存在）
/// 2. 剥离长十六进制负载
/// 3. 压缩空白并限长
pub fn sanitize_revert_reason(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let tail = if let Some(pos) = lowered.find("reverted") {
        raw[pos + "reverted".len()..]
            .trim_start_matches([':', ' '])
            .to_string()
    } else if let Some(pos) = lowered.find("revert") {
        raw[pos + "revert".len()..]
            .trim_start_matches([':', ' '])
            .to_string()
    } else {
        raw.to_string()
    };

    let stripped = HEX_PAYLOAD.replace_all(&tail, "");
    let collapsed = WHITESPACE.replace_all(stripped.trim(), " ").into_owned();

    let reason = if collapsed.is_empty() {
        "transaction reverted".to_string()
    } else {
        collapsed
    };

    if reason.chars().count() > MAX_REASON_LEN {
        let truncated: String = reason.chars().take(MAX_REASON_LEN).collect();
        format!("{}...", truncated)
    } else {
        reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_reason_after_revert_marker() {
        let raw = "execution reverted: TransferHelper: TRANSFER_FROM_FAILED";
        assert_eq!(
            sanitize_revert_reason(raw),
            "TransferHelper: TRANSFER_FROM_FAILED"
        );
    }

    #[test]
    fn test_strips_hex_payload() {
        let raw = "execution reverted: PancakeRouter: INSUFFICIENT_OUTPUT_AMOUNT 0x08c379a0000000000000000000000000000000000000000000000000000000000000002";
        let cleaned = sanitize_revert_reason(raw);
        assert!(!cleaned.contains("0x08c379a0"));
        assert!(cleaned.contains("INSUFFICIENT_OUTPUT_AMOUNT"));
    }

    #[test]
    fn test_empty_reason_fallback() {
        let raw = "execution reverted: 0x08c379a000000000000000000000000000000000";
        assert_eq!(sanitize_revert_reason(raw), "transaction reverted");
    }
}
