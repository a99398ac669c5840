//! 字符串相似度
//! 代币符号/名称的模糊匹配，用于"您是否想找…"候选排序

/// 归一化代币符号或名称：去掉非字母数字字符并转大写
///
/// "cl-8y" 与 "CL8Y" 归一化后相等
pub fn normalize_token_reference(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_uppercase()
}

/// Levenshtein 编辑距离
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// 归一化相似度，1.0 表示完全一致，0.0 表示毫无关联
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = normalize_token_reference(a);
    let b = normalize_token_reference(b);
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 0.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / max_len as f64
}
