//! 凭证保险库
//! 私钥/助记词/外部凭证的信封加解密；
//! 无存储私钥的钱包按派生索引从助记词惰性重派生

use std::sync::Arc;

use zeroize::Zeroizing;

use crate::config::Config;
use crate::domain::derivation;
use crate::domain::user::UserHash;
use crate::domain::wallet::WalletRecord;
use crate::error::WalletError;
use crate::infrastructure::encryption::{decrypt_with_key, encrypt_with_key, EncryptionEnvelope};
use crate::infrastructure::key_derivation::{derive_key, generate_salt};
use crate::infrastructure::retry::with_backoff;
use crate::repository::MnemonicRepository;

/// 凭证保险库（进程级单例，显式构造后按引用传递）
pub struct CredentialVault {
    config: Arc<Config>,
    mnemonics: Arc<dyn MnemonicRepository>,
}

impl CredentialVault {
    pub fn new(config: Arc<Config>, mnemonics: Arc<dyn MnemonicRepository>) -> Self {
        Self { config, mnemonics }
    }

    /// 加密明文为信封字符串
    ///
    /// 每次加密铸造全新随机盐值，密钥由（根密钥，用户哈希，可选PIN，盐值）派生
    pub fn encrypt(
        &self,
        plaintext: &str,
        user: &UserHash,
        pin: Option<&str>,
    ) -> Result<String, WalletError> {
        let salt = generate_salt();
        let key = derive_key(&self.config.encryption_secret, user.as_str(), pin, &salt)?;
        let envelope = encrypt_with_key(plaintext.as_bytes(), &key, salt)?;
        Ok(envelope.encode())
    }

    /// 解密信封字符串
    ///
    /// 密钥错误与密文损坏统一为 DecryptionFailed——调用方据此
    /// 引导清理/恢复流程，而不是带着错误数据继续
    pub fn decrypt(
        &self,
        encoded: &str,
        user: &UserHash,
        pin: Option<&str>,
    ) -> Result<Zeroizing<String>, WalletError> {
        let envelope = EncryptionEnvelope::decode(encoded)?;
        let key = derive_key(
            &self.config.encryption_secret,
            user.as_str(),
            pin,
            &envelope.salt,
        )?;
        let plaintext = decrypt_with_key(&envelope, &key)?;
        String::from_utf8(plaintext)
            .map(Zeroizing::new)
            .map_err(|_| WalletError::DecryptionFailed)
    }

    /// 取钱包私钥（hex）
    ///
    /// 有存储私钥则直接解密；否则解密助记词并按钱包的派生索引
    /// 重新派生——两条路径遵循同一失败契约
    pub async fn wallet_private_key(
        &self,
        record: &WalletRecord,
        pin: Option<&str>,
    ) -> Result<Zeroizing<String>, WalletError> {
        if let Some(encrypted) = &record.encrypted_private_key {
            return self.decrypt(encrypted, &record.user, pin);
        }

        let index = record
            .derivation_index
            .ok_or(WalletError::DecryptionFailed)?;

        let mnemonic_record = with_backoff(&self.config.storage_retry, "mnemonic.get", || {
            self.mnemonics.get(&record.user)
        })
        .await
        .map_err(WalletError::storage)?
        .ok_or(WalletError::MnemonicMissing)?;

        let phrase = self.decrypt(&mnemonic_record.encrypted_mnemonic, &record.user, pin)?;
        let derived = derivation::derive_wallet(&phrase, &self.config.derivation_path(index))
            .map_err(|_| WalletError::DecryptionFailed)?;

        // 派生地址与记录不符说明索引或助记词已损坏
        if !derived.address.eq_ignore_ascii_case(&record.address) {
            tracing::error!(
                user = %record.user,
                wallet = %record.name,
                "Derived address does not match stored wallet address"
            );
            return Err(WalletError::DecryptionFailed);
        }

        Ok(derived.private_key)
    }

    /// 从私钥构造链上签名器（带链ID）
    pub fn signer(
        &self,
        private_key_hex: &str,
    ) -> Result<ethers::signers::LocalWallet, WalletError> {
        use ethers::signers::Signer;

        let wallet: ethers::signers::LocalWallet = private_key_hex
            .trim()
            .trim_start_matches("0x")
            .parse()
            .map_err(|_| WalletError::DecryptionFailed)?;
        Ok(wallet.with_chain_id(self.config.chain_id))
    }
}
