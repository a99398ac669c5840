//! 钱包生命周期服务
//! 创建/导入/重命名/删除/列出/激活/导出；
//! 首个钱包自动铸造助记词并置为活跃

use std::sync::Arc;

use zeroize::Zeroizing;

use crate::config::Config;
use crate::domain::derivation;
use crate::domain::user::{UserHash, UserId};
use crate::domain::wallet::{MnemonicRecord, WalletRecord};
use crate::error::WalletError;
use crate::infrastructure::retry::with_backoff;
use crate::repository::{MnemonicRepository, WalletRepository};
use crate::service::pin_authority::PinAuthority;
use crate::service::vault::CredentialVault;

/// 钱包生命周期服务
pub struct WalletManager {
    config: Arc<Config>,
    vault: Arc<CredentialVault>,
    pin_authority: Arc<PinAuthority>,
    wallets: Arc<dyn WalletRepository>,
    mnemonics: Arc<dyn MnemonicRepository>,
}

impl WalletManager {
    pub fn new(
        config: Arc<Config>,
        vault: Arc<CredentialVault>,
        pin_authority: Arc<PinAuthority>,
        wallets: Arc<dyn WalletRepository>,
        mnemonics: Arc<dyn MnemonicRepository>,
    ) -> Self {
        Self {
            config,
            vault,
            pin_authority,
            wallets,
            mnemonics,
        }
    }

    /// 创建新钱包：从用户助记词按下一个派生索引铸造
    ///
    /// 用户还没有助记词时先生成并加密保存（首次触达）；
    /// 钱包记录只存派生索引，不存私钥
    pub async fn create_wallet(
        &self,
        user: &UserId,
        name: &str,
    ) -> Result<WalletRecord, WalletError> {
        let user_hash = UserHash::from_user_id(user);
        let name = normalize_name(name)?;
        self.ensure_name_free(&user_hash, &name).await?;

        let pin = self.resolve_pin(&user_hash).await?;
        let pin_ref = pin.as_deref().map(|s| s.as_str());

        // 取或建助记词
        let mnemonic_record = with_backoff(&self.config.storage_retry, "mnemonic.get", || {
            self.mnemonics.get(&user_hash)
        })
        .await
        .map_err(WalletError::storage)?;

        let phrase: Zeroizing<String> = match &mnemonic_record {
            Some(record) => self
                .vault
                .decrypt(&record.encrypted_mnemonic, &user_hash, pin_ref)?,
            None => {
                let phrase = derivation::generate_mnemonic()
                    .map_err(|e| WalletError::Config(e.to_string()))?;
                let sealed = self.vault.encrypt(&phrase, &user_hash, pin_ref)?;
                let new_record = MnemonicRecord {
                    user: user_hash.clone(),
                    encrypted_mnemonic: sealed.clone(),
                    next_derivation_index: 0,
                };
                with_backoff(&self.config.storage_retry, "mnemonic.save", || {
                    self.mnemonics.save(&new_record)
                })
                .await
                .map_err(WalletError::storage)?;
                tracing::info!(user = %user_hash, "Minted new mnemonic for first wallet");
                phrase
            }
        };

        let index = with_backoff(&self.config.storage_retry, "mnemonic.mint_index", || {
            self.mnemonics.mint_derivation_index(&user_hash)
        })
        .await
        .map_err(WalletError::storage)?;

        // 解出的助记词派生失败说明数据已损坏
        let derived = derivation::derive_wallet(&phrase, &self.config.derivation_path(index))
            .map_err(|_| WalletError::DecryptionFailed)?;

        let is_first = self.list_wallets(user).await?.is_empty();
        let record = WalletRecord {
            user: user_hash.clone(),
            name: name.clone(),
            address: derived.address.clone(),
            encrypted_private_key: None,
            derivation_index: Some(index),
            imported: false,
            active: is_first,
            created_at: chrono::Utc::now(),
        };
        self.persist_new(&user_hash, &record).await?;

        tracing::info!(
            user = %user_hash,
            wallet = %name,
            address = %derived.address,
            derivation_index = index,
            "Wallet created"
        );
        Ok(record)
    }

    /// 导入钱包：原始私钥加密后存储，标记 imported
    pub async fn import_wallet(
        &self,
        user: &UserId,
        name: &str,
        private_key_hex: &str,
    ) -> Result<WalletRecord, WalletError> {
        let user_hash = UserHash::from_user_id(user);
        let name = normalize_name(name)?;
        self.ensure_name_free(&user_hash, &name).await?;

        let derived = derivation::wallet_from_private_key(private_key_hex)
            .map_err(|_| WalletError::Validation("Invalid private key".into()))?;

        let pin = self.resolve_pin(&user_hash).await?;
        let pin_ref = pin.as_deref().map(|s| s.as_str());
        let sealed = self
            .vault
            .encrypt(&derived.private_key, &user_hash, pin_ref)?;

        let is_first = self.list_wallets(user).await?.is_empty();
        let record = WalletRecord {
            user: user_hash.clone(),
            name: name.clone(),
            address: derived.address.clone(),
            encrypted_private_key: Some(sealed),
            derivation_index: None,
            imported: true,
            active: is_first,
            created_at: chrono::Utc::now(),
        };
        self.persist_new(&user_hash, &record).await?;

        tracing::info!(
            user = %user_hash,
            wallet = %name,
            address = %derived.address,
            "Wallet imported"
        );
        Ok(record)
    }

    /// 重命名钱包（用户内唯一）
    pub async fn rename_wallet(
        &self,
        user: &UserId,
        old_name: &str,
        new_name: &str,
    ) -> Result<(), WalletError> {
        let user_hash = UserHash::from_user_id(user);
        let new_name = normalize_name(new_name)?;

        if self.get_wallet(user, &new_name).await?.is_some() {
            return Err(WalletError::WalletAlreadyExists(new_name));
        }

        let renamed = with_backoff(&self.config.storage_retry, "wallet.rename", || {
            self.wallets.rename(&user_hash, old_name, &new_name)
        })
        .await
        .map_err(WalletError::storage)?;

        if !renamed {
            return Err(WalletError::WalletNotFound(old_name.to_string()));
        }
        tracing::info!(user = %user_hash, old = %old_name, new = %new_name, "Wallet renamed");
        Ok(())
    }

    /// 删除钱包；被删的是活跃钱包时把活跃标记转给幸存者
    pub async fn delete_wallet(&self, user: &UserId, name: &str) -> Result<(), WalletError> {
        let user_hash = UserHash::from_user_id(user);
        let target = self
            .get_wallet(user, name)
            .await?
            .ok_or_else(|| WalletError::WalletNotFound(name.to_string()))?;

        with_backoff(&self.config.storage_retry, "wallet.delete", || {
            self.wallets.delete(&user_hash, name)
        })
        .await
        .map_err(WalletError::storage)?;

        if target.active {
            let survivors = self.list_wallets(user).await?;
            if let Some(survivor) = survivors.first() {
                with_backoff(&self.config.storage_retry, "wallet.set_active", || {
                    self.wallets.set_active(&user_hash, &survivor.name)
                })
                .await
                .map_err(WalletError::storage)?;
                tracing::info!(
                    user = %user_hash,
                    wallet = %survivor.name,
                    "Active flag reassigned after deletion"
                );
            }
        }

        tracing::info!(user = %user_hash, wallet = %name, "Wallet deleted");
        Ok(())
    }

    /// 列出用户全部钱包
    pub async fn list_wallets(&self, user: &UserId) -> Result<Vec<WalletRecord>, WalletError> {
        let user_hash = UserHash::from_user_id(user);
        with_backoff(&self.config.storage_retry, "wallet.list", || {
            self.wallets.list(&user_hash)
        })
        .await
        .map_err(WalletError::storage)
    }

    /// 按名称取钱包
    pub async fn get_wallet(
        &self,
        user: &UserId,
        name: &str,
    ) -> Result<Option<WalletRecord>, WalletError> {
        let user_hash = UserHash::from_user_id(user);
        with_backoff(&self.config.storage_retry, "wallet.get_by_name", || {
            self.wallets.get_by_name(&user_hash, name)
        })
        .await
        .map_err(WalletError::storage)
    }

    /// 当前活跃钱包
    pub async fn active_wallet(
        &self,
        user: &UserId,
    ) -> Result<Option<WalletRecord>, WalletError> {
        let user_hash = UserHash::from_user_id(user);
        with_backoff(&self.config.storage_retry, "wallet.get_active", || {
            self.wallets.get_active(&user_hash)
        })
        .await
        .map_err(WalletError::storage)
    }

    /// 激活指定钱包（其余取消活跃）
    pub async fn activate_wallet(&self, user: &UserId, name: &str) -> Result<(), WalletError> {
        let user_hash = UserHash::from_user_id(user);
        let activated = with_backoff(&self.config.storage_retry, "wallet.set_active", || {
            self.wallets.set_active(&user_hash, name)
        })
        .await
        .map_err(WalletError::storage)?;

        if !activated {
            return Err(WalletError::WalletNotFound(name.to_string()));
        }
        tracing::info!(user = %user_hash, wallet = %name, "Wallet activated");
        Ok(())
    }

    /// 导出钱包私钥（hex）。PIN门控经由会话缓存
    pub async fn export_private_key(
        &self,
        user: &UserId,
        name: &str,
    ) -> Result<Zeroizing<String>, WalletError> {
        let user_hash = UserHash::from_user_id(user);
        let record = self
            .get_wallet(user, name)
            .await?
            .ok_or_else(|| WalletError::WalletNotFound(name.to_string()))?;

        let pin = self.resolve_pin(&user_hash).await?;
        self.vault
            .wallet_private_key(&record, pin.as_deref().map(|s| s.as_str()))
            .await
    }

    /// 设有PIN的账户必须持有会话缓存PIN，否则 PinRequired
    async fn resolve_pin(
        &self,
        user_hash: &UserHash,
    ) -> Result<Option<Zeroizing<String>>, WalletError> {
        if !self.pin_authority.has_pin(user_hash).await? {
            return Ok(None);
        }
        match self.pin_authority.cached_pin(user_hash).await {
            Some(pin) => Ok(Some(pin)),
            None => Err(WalletError::PinRequired),
        }
    }

    async fn ensure_name_free(
        &self,
        user_hash: &UserHash,
        name: &str,
    ) -> Result<(), WalletError> {
        with_backoff(&self.config.storage_retry, "wallet.ensure_user", || {
            self.wallets.ensure_user(user_hash)
        })
        .await
        .map_err(WalletError::storage)?;

        let existing = with_backoff(&self.config.storage_retry, "wallet.get_by_name", || {
            self.wallets.get_by_name(user_hash, name)
        })
        .await
        .map_err(WalletError::storage)?;

        if existing.is_some() {
            return Err(WalletError::WalletAlreadyExists(name.to_string()));
        }
        Ok(())
    }

    async fn persist_new(
        &self,
        _user_hash: &UserHash,
        record: &WalletRecord,
    ) -> Result<(), WalletError> {
        with_backoff(&self.config.storage_retry, "wallet.upsert", || {
            self.wallets.upsert(record)
        })
        .await
        .map_err(WalletError::storage)
    }
}

fn normalize_name(name: &str) -> Result<String, WalletError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(WalletError::Validation("wallet name must not be empty".into()));
    }
    Ok(trimmed.to_string())
}
