//! PIN 哈希和验证模块
//! 使用 bcrypt 单向哈希，数据库中永不存明文PIN

use anyhow::{anyhow, Result};
use bcrypt::{hash, verify, DEFAULT_COST};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// PIN 明文包装器（使用Zeroize保护）
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Pin(String);

impl Pin {
    pub fn new(pin: impl Into<String>) -> Self {
        Self(pin.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Pin {
    // PIN 明文不进日志
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Pin(***)")
    }
}

/// 哈希PIN
pub fn hash_pin(pin: &str) -> Result<String> {
    if pin.is_empty() {
        return Err(anyhow!("PIN must not be empty"));
    }
    hash(pin, DEFAULT_COST).map_err(|e| anyhow!("Failed to hash pin: {}", e))
}

/// 验证PIN与存储哈希是否匹配
pub fn verify_pin_hash(pin: &str, stored_hash: &str) -> Result<bool> {
    verify(pin, stored_hash).map_err(|e| anyhow!("Failed to verify pin: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_hash_verify() {
        let hashed = hash_pin("1234").unwrap();
        assert!(verify_pin_hash("1234", &hashed).unwrap());
        assert!(!verify_pin_hash("4321", &hashed).unwrap());
    }

    #[test]
    fn test_empty_pin_rejected() {
        assert!(hash_pin("").is_err());
    }
}
