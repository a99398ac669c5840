//! PIN 管理服务
//! PIN 验证、失败计数上报、会话缓存（TTL + 后台清扫）、
//! 以及改PIN时对用户全部密文的重加密级联

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use zeroize::Zeroizing;

use crate::config::Config;
use crate::domain::user::UserHash;
use crate::domain::wallet::{LinkedCredential, MnemonicRecord, WalletRecord};
use crate::error::WalletError;
use crate::infrastructure::pin_hash::{hash_pin, verify_pin_hash, Pin};
use crate::infrastructure::retry::with_backoff;
use crate::repository::{
    CredentialRepository, MnemonicRepository, PinAttemptRepository, PinAttemptState,
    PinRepository, WalletRepository,
};
use crate::service::vault::CredentialVault;

/// 会话缓存条目：仅存内存，决不落库
struct PinSessionEntry {
    pin: Pin,
    created_at: Instant,
    ttl: Duration,
}

impl PinSessionEntry {
    fn expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) >= self.ttl
    }
}

/// PIN 管理服务（进程级单例，显式构造后按引用传递）
pub struct PinAuthority {
    config: Arc<Config>,
    vault: Arc<CredentialVault>,
    pins: Arc<dyn PinRepository>,
    attempts: Arc<dyn PinAttemptRepository>,
    wallets: Arc<dyn WalletRepository>,
    mnemonics: Arc<dyn MnemonicRepository>,
    credentials: Arc<dyn CredentialRepository>,
    /// 跨请求共享的会话缓存，读写都持锁
    sessions: Mutex<HashMap<String, PinSessionEntry>>,
}

impl PinAuthority {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        vault: Arc<CredentialVault>,
        pins: Arc<dyn PinRepository>,
        attempts: Arc<dyn PinAttemptRepository>,
        wallets: Arc<dyn WalletRepository>,
        mnemonics: Arc<dyn MnemonicRepository>,
        credentials: Arc<dyn CredentialRepository>,
    ) -> Self {
        Self {
            config,
            vault,
            pins,
            attempts,
            wallets,
            mnemonics,
            credentials,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// 用户是否已设置PIN
    pub async fn has_pin(&self, user: &UserHash) -> Result<bool, WalletError> {
        let hash = with_backoff(&self.config.storage_retry, "pin.get_hash", || {
            self.pins.get_hash(user)
        })
        .await
        .map_err(WalletError::storage)?;
        Ok(hash.is_some())
    }

    /// 验证PIN
    ///
    /// 未设置PIN时平凡通过；验证成功则缓存PIN并清零失败计数，
    /// 失败则递增失败计数（锁定策略由前端依据计数实施，核心只记录上报）
    pub async fn verify(&self, user: &UserHash, pin: &str) -> Result<bool, WalletError> {
        let stored = with_backoff(&self.config.storage_retry, "pin.get_hash", || {
            self.pins.get_hash(user)
        })
        .await
        .map_err(WalletError::storage)?;

        let Some(stored_hash) = stored else {
            tracing::debug!(user = %user, "No pin set, verification passes trivially");
            return Ok(true);
        };

        let valid = verify_pin_hash(pin, &stored_hash).map_err(WalletError::storage)?;
        let now = chrono::Utc::now().timestamp();

        if valid {
            with_backoff(&self.config.storage_retry, "pin_attempt.reset", || {
                self.attempts.reset(user, now)
            })
            .await
            .map_err(WalletError::storage)?;
            self.store_session(user, pin).await;
            tracing::info!(user = %user, "Pin verified");
            Ok(true)
        } else {
            let state = with_backoff(&self.config.storage_retry, "pin_attempt.fail", || {
                self.attempts.record_failure(user, now)
            })
            .await
            .map_err(WalletError::storage)?;
            tracing::warn!(
                user = %user,
                failure_count = state.failure_count,
                "Invalid pin attempt"
            );
            Ok(false)
        }
    }

    /// 当前失败计数与最近尝试时间（前端锁定策略的依据）
    pub async fn lockout_status(&self, user: &UserHash) -> Result<PinAttemptState, WalletError> {
        let state = with_backoff(&self.config.storage_retry, "pin_attempt.get", || {
            self.attempts.get(user)
        })
        .await
        .map_err(WalletError::storage)?;
        Ok(state.unwrap_or_default())
    }

    /// 缓存已验证的PIN
    pub async fn store_session(&self, user: &UserHash, pin: &str) {
        let mut sessions = self.sessions.lock().await;
        sessions.insert(
            user.as_str().to_string(),
            PinSessionEntry {
                pin: Pin::new(pin),
                created_at: Instant::now(),
                ttl: self.config.pin.session_ttl,
            },
        );
    }

    /// 读取缓存PIN；过期条目在读取时即被清除
    pub async fn cached_pin(&self, user: &UserHash) -> Option<Zeroizing<String>> {
        let mut sessions = self.sessions.lock().await;
        let now = Instant::now();
        match sessions.get(user.as_str()) {
            Some(entry) if !entry.expired(now) => {
                Some(Zeroizing::new(entry.pin.as_str().to_string()))
            }
            Some(_) => {
                sessions.remove(user.as_str());
                tracing::debug!(user = %user, "Cached pin expired, removed on read");
                None
            }
            None => None,
        }
    }

    /// 清除指定用户的会话缓存（锁定操作）
    pub async fn clear_session(&self, user: &UserHash) -> bool {
        self.sessions.lock().await.remove(user.as_str()).is_some()
    }

    /// 清扫全部过期条目，返回清除数量
    pub async fn sweep_expired(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        let now = Instant::now();
        let before = sessions.len();
        sessions.retain(|_, entry| !entry.expired(now));
        let cleared = before - sessions.len();
        if cleared > 0 {
            tracing::info!(cleared, "Swept expired pin sessions");
        }
        cleared
    }

    /// 启动后台清扫任务（与请求路径共享同一把锁）
    pub fn spawn_sweeper(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let authority = self;
        let interval = authority.config.pin.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                authority.sweep_expired().await;
            }
        })
    }

    /// 首次设置PIN
    ///
    /// 已有PIN时拒绝（改PIN走 `rotate`）。设置后将此前以无PIN密钥
    /// 加密的全部密文重加密到带PIN密钥下
    pub async fn set_pin(&self, user: &UserHash, pin: &str) -> Result<(), WalletError> {
        if self.has_pin(user).await? {
            return Err(WalletError::Validation(
                "Pin already set, use rotate to change it".into(),
            ));
        }
        self.reencrypt_all(user, None, pin).await?;
        self.store_session(user, pin).await;
        tracing::info!(user = %user, "Pin set and secrets re-encrypted");
        Ok(())
    }

    /// 轮换PIN
    ///
    /// 旧PIN验证失败立即返回；成功则对用户全部密文做重加密级联。
    /// 用户视角下必须有效原子：所有明文先全部读出（任一读取失败即中止，
    /// 此时未写任何数据），PIN哈希在全部密文写回之后最后落库
    pub async fn rotate(
        &self,
        user: &UserHash,
        old_pin: &str,
        new_pin: &str,
    ) -> Result<(), WalletError> {
        let stored = with_backoff(&self.config.storage_retry, "pin.get_hash", || {
            self.pins.get_hash(user)
        })
        .await
        .map_err(WalletError::storage)?
        .ok_or(WalletError::PinVerification)?;

        if !verify_pin_hash(old_pin, &stored).map_err(WalletError::storage)? {
            let now = chrono::Utc::now().timestamp();
            let state = with_backoff(&self.config.storage_retry, "pin_attempt.fail", || {
                self.attempts.record_failure(user, now)
            })
            .await
            .map_err(WalletError::storage)?;
            tracing::warn!(
                user = %user,
                failure_count = state.failure_count,
                "Pin rotation rejected: old pin invalid"
            );
            return Err(WalletError::PinVerification);
        }

        self.reencrypt_all(user, Some(old_pin), new_pin).await?;
        self.store_session(user, new_pin).await;
        tracing::info!(user = %user, "Pin rotated, all secrets re-encrypted");
        Ok(())
    }

    /// 重加密级联
    ///
    /// 阶段一（只读）：在旧密钥下解出助记词、每个钱包的私钥、
    /// 每条外部凭证的明文；任何解密失败都在写入任何数据前中止。
    /// 阶段二（写入）：逐条写回新密钥密文；中途失败时尽力回滚已写记录。
    /// 阶段三：最后持久化新PIN哈希。
    async fn reencrypt_all(
        &self,
        user: &UserHash,
        old_pin: Option<&str>,
        new_pin: &str,
    ) -> Result<(), WalletError> {
        // ---- 阶段一：全部读出 ----
        let mnemonic_record = with_backoff(&self.config.storage_retry, "mnemonic.get", || {
            self.mnemonics.get(user)
        })
        .await
        .map_err(WalletError::storage)?;

        let mnemonic_plain = match &mnemonic_record {
            Some(record) => Some(
                self.vault
                    .decrypt(&record.encrypted_mnemonic, user, old_pin)?,
            ),
            None => None,
        };

        let wallets = with_backoff(&self.config.storage_retry, "wallet.list", || {
            self.wallets.list(user)
        })
        .await
        .map_err(WalletError::storage)?;

        let mut wallet_keys: Vec<(WalletRecord, Zeroizing<String>)> = Vec::new();
        for wallet in wallets {
            if let Some(encrypted) = &wallet.encrypted_private_key {
                let plain = self.vault.decrypt(encrypted, user, old_pin)?;
                wallet_keys.push((wallet, plain));
            }
        }

        let credentials = with_backoff(&self.config.storage_retry, "credential.list", || {
            self.credentials.list(user)
        })
        .await
        .map_err(WalletError::storage)?;

        let mut credential_payloads: Vec<(LinkedCredential, Zeroizing<String>)> = Vec::new();
        for credential in credentials {
            let plain = self
                .vault
                .decrypt(&credential.encrypted_payload, user, old_pin)?;
            credential_payloads.push((credential, plain));
        }

        // ---- 阶段二：写回新密钥密文 ----
        let mnemonic_plain_str: Option<&str> = mnemonic_plain.as_ref().map(|z| z.as_str());
        let mut written: Vec<RewrittenRecord> = Vec::new();
        let write_result = self
            .write_reencrypted(
                user,
                new_pin,
                &mnemonic_record,
                mnemonic_plain_str,
                &wallet_keys,
                &credential_payloads,
                &mut written,
            )
            .await;

        if let Err(err) = write_result {
            tracing::error!(user = %user, error = %err, "Re-encryption cascade failed, rolling back");
            self.rollback_rewritten(
                user,
                old_pin,
                &written,
                &mnemonic_record,
                mnemonic_plain_str,
                &wallet_keys,
                &credential_payloads,
            )
            .await;
            return Err(err);
        }

        // ---- 阶段三：哈希最后落库 ----
        let new_hash = hash_pin(new_pin).map_err(|e| WalletError::Validation(e.to_string()))?;
        with_backoff(&self.config.storage_retry, "pin.save_hash", || {
            self.pins.save_hash(user, &new_hash)
        })
        .await
        .map_err(WalletError::storage)?;

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_reencrypted(
        &self,
        user: &UserHash,
        new_pin: &str,
        mnemonic_record: &Option<MnemonicRecord>,
        mnemonic_plain: Option<&str>,
        wallet_keys: &[(WalletRecord, Zeroizing<String>)],
        credential_payloads: &[(LinkedCredential, Zeroizing<String>)],
        written: &mut Vec<RewrittenRecord>,
    ) -> Result<(), WalletError> {
        if let (Some(record), Some(plain)) = (mnemonic_record, mnemonic_plain) {
            let reencrypted = self.vault.encrypt(plain, user, Some(new_pin))?;
            let updated = MnemonicRecord {
                encrypted_mnemonic: reencrypted,
                ..record.clone()
            };
            with_backoff(&self.config.storage_retry, "mnemonic.save", || {
                self.mnemonics.save(&updated)
            })
            .await
            .map_err(WalletError::storage)?;
            written.push(RewrittenRecord::Mnemonic);
        }

        for (wallet, plain) in wallet_keys {
            let reencrypted = self.vault.encrypt(plain, user, Some(new_pin))?;
            let updated = WalletRecord {
                encrypted_private_key: Some(reencrypted),
                ..wallet.clone()
            };
            with_backoff(&self.config.storage_retry, "wallet.upsert", || {
                self.wallets.upsert(&updated)
            })
            .await
            .map_err(WalletError::storage)?;
            written.push(RewrittenRecord::Wallet(wallet.name.clone()));
        }

        for (credential, plain) in credential_payloads {
            let reencrypted = self.vault.encrypt(plain, user, Some(new_pin))?;
            let updated = LinkedCredential {
                encrypted_payload: reencrypted,
                ..credential.clone()
            };
            with_backoff(&self.config.storage_retry, "credential.upsert", || {
                self.credentials.upsert(&updated)
            })
            .await
            .map_err(WalletError::storage)?;
            written.push(RewrittenRecord::Credential(credential.label.clone()));
        }

        Ok(())
    }

    /// 写入阶段失败时的尽力回滚：把已写记录恢复为旧密钥密文
    #[allow(clippy::too_many_arguments)]
    async fn rollback_rewritten(
        &self,
        user: &UserHash,
        old_pin: Option<&str>,
        written: &[RewrittenRecord],
        mnemonic_record: &Option<MnemonicRecord>,
        mnemonic_plain: Option<&str>,
        wallet_keys: &[(WalletRecord, Zeroizing<String>)],
        credential_payloads: &[(LinkedCredential, Zeroizing<String>)],
    ) {
        for record in written {
            let result = match record {
                RewrittenRecord::Mnemonic => match (mnemonic_record, mnemonic_plain) {
                    (Some(original), Some(plain)) => {
                        match self.vault.encrypt(plain, user, old_pin) {
                            Ok(sealed) => {
                                let restored = MnemonicRecord {
                                    encrypted_mnemonic: sealed,
                                    ..original.clone()
                                };
                                self.mnemonics.save(&restored).await
                            }
                            Err(e) => Err(anyhow::anyhow!(e)),
                        }
                    }
                    _ => Ok(()),
                },
                RewrittenRecord::Wallet(name) => {
                    match wallet_keys.iter().find(|(w, _)| &w.name == name) {
                        Some((wallet, plain)) => {
                            match self.vault.encrypt(plain, user, old_pin) {
                                Ok(sealed) => {
                                    let restored = WalletRecord {
                                        encrypted_private_key: Some(sealed),
                                        ..wallet.clone()
                                    };
                                    self.wallets.upsert(&restored).await
                                }
                                Err(e) => Err(anyhow::anyhow!(e)),
                            }
                        }
                        None => Ok(()),
                    }
                }
                RewrittenRecord::Credential(label) => {
                    match credential_payloads.iter().find(|(c, _)| &c.label == label) {
                        Some((credential, plain)) => {
                            match self.vault.encrypt(plain, user, old_pin) {
                                Ok(sealed) => {
                                    let restored = LinkedCredential {
                                        encrypted_payload: sealed,
                                        ..credential.clone()
                                    };
                                    self.credentials.upsert(&restored).await
                                }
                                Err(e) => Err(anyhow::anyhow!(e)),
                            }
                        }
                        None => Ok(()),
                    }
                }
            };

            if let Err(err) = result {
                tracing::error!(user = %user, error = %err, "Rollback write failed");
            }
        }
    }
}

/// 级联中已写回的记录（回滚用）
enum RewrittenRecord {
    Mnemonic,
    Wallet(String),
    Credential(String),
}
