//! 用户标识
//! 核心只存储并查询用户ID的单向哈希，原始ID不落库

use sha2::{Digest, Sha256};

/// 不透明的用户标识（来自聊天前端）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// 用户ID的SHA-256十六进制哈希，作为所有存储查询的键
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct UserHash(String);

impl UserHash {
    /// 对用户ID做不可逆哈希
    pub fn from_user_id(user_id: &UserId) -> Self {
        let digest = Sha256::digest(user_id.as_str().as_bytes());
        Self(hex::encode(digest))
    }

    /// 从已哈希的字符串还原（存储层使用）
    pub fn from_raw(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 日志用短前缀，避免整哈希刷屏
    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl std::fmt::Display for UserHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.short())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic_and_irreversible_shape() {
        let a = UserHash::from_user_id(&UserId::new("12345"));
        let b = UserHash::from_user_id(&UserId::new("12345"));
        let c = UserHash::from_user_id(&UserId::new("54321"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64);
        assert!(!a.as_str().contains("12345"));
    }
}
