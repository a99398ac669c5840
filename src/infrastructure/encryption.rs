//! AES-256-GCM 加密/解密模块
//! 敏感数据的信封加密：每条记录独立随机盐值 + nonce + 密文

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::error::WalletError;
use crate::infrastructure::key_derivation::{DerivedKey, SALT_LENGTH};

/// GCM nonce 长度（96位）
pub const NONCE_LENGTH: usize = 12;

/// 加密信封：持久化的最小单元
///
/// 线格式：base64( salt(16) ‖ nonce(12) ‖ ciphertext )。
/// 盐值参与密钥派生；nonce与密文是AES-GCM的输出。
/// GCM认证保证用错误密钥解密必然失败，不会静默产出乱码明文。
#[derive(Debug, Clone)]
pub struct EncryptionEnvelope {
    pub salt: Vec<u8>,
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

impl EncryptionEnvelope {
    /// 编码为持久化字符串
    pub fn encode(&self) -> String {
        let mut combined =
            Vec::with_capacity(self.salt.len() + self.nonce.len() + self.ciphertext.len());
        combined.extend_from_slice(&self.salt);
        combined.extend_from_slice(&self.nonce);
        combined.extend_from_slice(&self.ciphertext);
        BASE64.encode(combined)
    }

    /// 从持久化字符串解码
    ///
    /// 任何格式问题（非base64、长度不足）都按数据损坏处理
    pub fn decode(encoded: &str) -> Result<Self, WalletError> {
        let combined = BASE64
            .decode(encoded.trim())
            .map_err(|_| WalletError::DecryptionFailed)?;
        if combined.len() <= SALT_LENGTH + NONCE_LENGTH {
            return Err(WalletError::DecryptionFailed);
        }
        Ok(Self {
            salt: combined[..SALT_LENGTH].to_vec(),
            nonce: combined[SALT_LENGTH..SALT_LENGTH + NONCE_LENGTH].to_vec(),
            ciphertext: combined[SALT_LENGTH + NONCE_LENGTH..].to_vec(),
        })
    }
}

/// 使用派生密钥加密
///
/// nonce 随机生成；`salt` 由调用方提供（密钥即由它派生），一并写入信封
pub fn encrypt_with_key(
    plaintext: &[u8],
    key: &DerivedKey,
    salt: Vec<u8>,
) -> Result<EncryptionEnvelope, WalletError> {
    let cipher = Aes256Gcm::new_from_slice(key.as_slice())
        .map_err(|_| WalletError::Config("Invalid encryption key length".into()))?;

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| WalletError::Config("Encryption failed".into()))?;

    Ok(EncryptionEnvelope {
        salt,
        nonce: nonce.to_vec(),
        ciphertext,
    })
}

/// 使用派生密钥解密
///
/// 密钥错误或密文损坏统一返回 DecryptionFailed，绝不透出乱码明文
pub fn decrypt_with_key(
    envelope: &EncryptionEnvelope,
    key: &DerivedKey,
) -> Result<Vec<u8>, WalletError> {
    if envelope.nonce.len() != NONCE_LENGTH {
        return Err(WalletError::DecryptionFailed);
    }
    let cipher = Aes256Gcm::new_from_slice(key.as_slice())
        .map_err(|_| WalletError::DecryptionFailed)?;

    let nonce = Nonce::from_slice(&envelope.nonce);
    cipher
        .decrypt(nonce, envelope.ciphertext.as_slice())
        .map_err(|_| WalletError::DecryptionFailed)
}
