//! PBKDF2 密钥派生模块
//! 从（进程级根密钥，用户哈希，可选PIN，盐值）派生对称加密密钥

use pbkdf2::pbkdf2_hmac;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::WalletError;

/// PBKDF2 密钥派生参数
pub const PBKDF2_ITERATIONS: u32 = 100_000; // OWASP 推荐下限
pub const SALT_LENGTH: usize = 16; // 16字节盐值
pub const KEY_LENGTH: usize = 32; // 32字节密钥（AES-256）

/// 派生出的加密密钥（使用Zeroize保护）
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    key: [u8; KEY_LENGTH],
}

impl DerivedKey {
    pub fn as_slice(&self) -> &[u8] {
        &self.key
    }
}

/// 派生对称加密密钥
///
/// 口令材料：SHA-256(根密钥 ‖ ":" ‖ 用户哈希)；提供PIN时再拼接 ":" ‖ PIN。
/// 之后经 PBKDF2-HMAC-SHA256 以给定盐值拉伸为32字节密钥。
///
/// 相同输入必得相同密钥（解密历史数据依赖此性质）；
/// PIN不同必得不同密钥（PIN轮换级联依赖此性质）。
///
/// # Arguments
/// * `secret` - 进程级根密钥，非用户输入
/// * `user_hash` - 用户ID的单向哈希
/// * `pin` - 可选PIN
/// * `salt` - 盐值，必须为16字节
pub fn derive_key(
    secret: &str,
    user_hash: &str,
    pin: Option<&str>,
    salt: &[u8],
) -> Result<DerivedKey, WalletError> {
    if salt.len() != SALT_LENGTH {
        return Err(WalletError::Config(format!(
            "Salt must be {} bytes",
            SALT_LENGTH
        )));
    }

    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(b":");
    hasher.update(user_hash.as_bytes());
    if let Some(pin) = pin {
        hasher.update(b":");
        hasher.update(pin.as_bytes());
    }
    let mut password = [0u8; 32];
    password.copy_from_slice(&hasher.finalize());

    let mut key = [0u8; KEY_LENGTH];
    pbkdf2_hmac::<Sha256>(&password, salt, PBKDF2_ITERATIONS, &mut key);
    password.zeroize();

    Ok(DerivedKey { key })
}

/// 生成随机盐值
pub fn generate_salt() -> Vec<u8> {
    use rand::RngCore;
    let mut salt = vec![0u8; SALT_LENGTH];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "process-secret";
    const USER: &str = "abcdef0123456789";

    #[test]
    fn test_deterministic_derivation() {
        let salt = generate_salt();
        let key1 = derive_key(SECRET, USER, Some("1234"), &salt).unwrap();
        let key2 = derive_key(SECRET, USER, Some("1234"), &salt).unwrap();
        assert_eq!(key1.as_slice(), key2.as_slice());
    }

    #[test]
    fn test_pin_changes_key() {
        let salt = generate_salt();
        let with_pin = derive_key(SECRET, USER, Some("1234"), &salt).unwrap();
        let other_pin = derive_key(SECRET, USER, Some("4321"), &salt).unwrap();
        let no_pin = derive_key(SECRET, USER, None, &salt).unwrap();
        assert_ne!(with_pin.as_slice(), other_pin.as_slice());
        assert_ne!(with_pin.as_slice(), no_pin.as_slice());
    }

    #[test]
    fn test_salt_changes_key() {
        let key1 = derive_key(SECRET, USER, None, &generate_salt()).unwrap();
        let key2 = derive_key(SECRET, USER, None, &generate_salt()).unwrap();
        assert_ne!(key1.as_slice(), key2.as_slice());
    }

    #[test]
    fn test_rejects_bad_salt() {
        assert!(derive_key(SECRET, USER, None, &[0u8; 8]).is_err());
    }
}
