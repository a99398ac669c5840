//! 内存存储实现
//! 测试与嵌入方使用；语义与关系存储实现保持一致

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::token::TokenDescriptor;
use crate::domain::user::UserHash;
use crate::domain::wallet::{LinkedCredential, MnemonicRecord, WalletRecord};
use crate::repository::{
    CredentialRepository, MnemonicRepository, PinAttemptRepository, PinAttemptState,
    PinRepository, TokenRepository, WalletRepository,
};

/// 全部 Repository 的内存实现集合
#[derive(Default)]
pub struct MemoryStorage {
    wallets: Mutex<HashMap<String, Vec<WalletRecord>>>,
    mnemonics: Mutex<HashMap<String, MnemonicRecord>>,
    pins: Mutex<HashMap<String, String>>,
    pin_attempts: Mutex<HashMap<String, PinAttemptState>>,
    default_tokens: Mutex<Vec<TokenDescriptor>>,
    tracked_tokens: Mutex<HashMap<String, Vec<TokenDescriptor>>>,
    credentials: Mutex<HashMap<String, Vec<LinkedCredential>>>,
}

impl MemoryStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 测试辅助：预置默认列表条目
    pub async fn seed_default_token(&self, token: TokenDescriptor) {
        self.upsert_default_token(&token).await.expect("memory upsert");
    }
}

#[async_trait]
impl WalletRepository for MemoryStorage {
    async fn ensure_user(&self, user: &UserHash) -> Result<()> {
        self.wallets
            .lock()
            .await
            .entry(user.as_str().to_string())
            .or_default();
        Ok(())
    }

    async fn get_by_name(&self, user: &UserHash, name: &str) -> Result<Option<WalletRecord>> {
        Ok(self
            .wallets
            .lock()
            .await
            .get(user.as_str())
            .and_then(|list| list.iter().find(|w| w.name == name).cloned()))
    }

    async fn get_active(&self, user: &UserHash) -> Result<Option<WalletRecord>> {
        Ok(self
            .wallets
            .lock()
            .await
            .get(user.as_str())
            .and_then(|list| list.iter().find(|w| w.active).cloned()))
    }

    async fn list(&self, user: &UserHash) -> Result<Vec<WalletRecord>> {
        Ok(self
            .wallets
            .lock()
            .await
            .get(user.as_str())
            .cloned()
            .unwrap_or_default())
    }

    async fn upsert(&self, record: &WalletRecord) -> Result<()> {
        let mut wallets = self.wallets.lock().await;
        let list = wallets.entry(record.user.as_str().to_string()).or_default();
        if let Some(existing) = list.iter_mut().find(|w| w.name == record.name) {
            *existing = record.clone();
        } else {
            list.push(record.clone());
        }
        Ok(())
    }

    async fn rename(&self, user: &UserHash, old_name: &str, new_name: &str) -> Result<bool> {
        let mut wallets = self.wallets.lock().await;
        let Some(list) = wallets.get_mut(user.as_str()) else {
            return Ok(false);
        };
        if list.iter().any(|w| w.name == new_name) {
            return Ok(false);
        }
        match list.iter_mut().find(|w| w.name == old_name) {
            Some(wallet) => {
                wallet.name = new_name.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, user: &UserHash, name: &str) -> Result<bool> {
        let mut wallets = self.wallets.lock().await;
        let Some(list) = wallets.get_mut(user.as_str()) else {
            return Ok(false);
        };
        let before = list.len();
        list.retain(|w| w.name != name);
        Ok(list.len() < before)
    }

    async fn set_active(&self, user: &UserHash, name: &str) -> Result<bool> {
        let mut wallets = self.wallets.lock().await;
        let Some(list) = wallets.get_mut(user.as_str()) else {
            return Ok(false);
        };
        if !list.iter().any(|w| w.name == name) {
            return Ok(false);
        }
        for wallet in list.iter_mut() {
            wallet.active = wallet.name == name;
        }
        Ok(true)
    }
}

#[async_trait]
impl MnemonicRepository for MemoryStorage {
    async fn get(&self, user: &UserHash) -> Result<Option<MnemonicRecord>> {
        Ok(self.mnemonics.lock().await.get(user.as_str()).cloned())
    }

    async fn save(&self, record: &MnemonicRecord) -> Result<()> {
        self.mnemonics
            .lock()
            .await
            .insert(record.user.as_str().to_string(), record.clone());
        Ok(())
    }

    async fn mint_derivation_index(&self, user: &UserHash) -> Result<u32> {
        let mut mnemonics = self.mnemonics.lock().await;
        let record = mnemonics
            .get_mut(user.as_str())
            .ok_or_else(|| anyhow::anyhow!("no mnemonic for user"))?;
        let index = record.next_derivation_index;
        record.next_derivation_index += 1;
        Ok(index)
    }

    async fn delete(&self, user: &UserHash) -> Result<()> {
        self.mnemonics.lock().await.remove(user.as_str());
        Ok(())
    }
}

#[async_trait]
impl PinRepository for MemoryStorage {
    async fn get_hash(&self, user: &UserHash) -> Result<Option<String>> {
        Ok(self.pins.lock().await.get(user.as_str()).cloned())
    }

    async fn save_hash(&self, user: &UserHash, pin_hash: &str) -> Result<()> {
        self.pins
            .lock()
            .await
            .insert(user.as_str().to_string(), pin_hash.to_string());
        Ok(())
    }

    async fn delete(&self, user: &UserHash) -> Result<()> {
        self.pins.lock().await.remove(user.as_str());
        Ok(())
    }
}

#[async_trait]
impl PinAttemptRepository for MemoryStorage {
    async fn get(&self, user: &UserHash) -> Result<Option<PinAttemptState>> {
        Ok(self.pin_attempts.lock().await.get(user.as_str()).copied())
    }

    async fn record_failure(&self, user: &UserHash, now: i64) -> Result<PinAttemptState> {
        let mut attempts = self.pin_attempts.lock().await;
        let state = attempts.entry(user.as_str().to_string()).or_default();
        state.failure_count += 1;
        state.last_attempt_time = now;
        Ok(*state)
    }

    async fn reset(&self, user: &UserHash, now: i64) -> Result<()> {
        self.pin_attempts.lock().await.insert(
            user.as_str().to_string(),
            PinAttemptState {
                failure_count: 0,
                last_attempt_time: now,
            },
        );
        Ok(())
    }
}

#[async_trait]
impl TokenRepository for MemoryStorage {
    async fn default_tokens(&self, chain_id: u64) -> Result<Vec<TokenDescriptor>> {
        Ok(self
            .default_tokens
            .lock()
            .await
            .iter()
            .filter(|t| t.chain_id == chain_id)
            .cloned()
            .collect())
    }

    async fn upsert_default_token(&self, token: &TokenDescriptor) -> Result<()> {
        let mut tokens = self.default_tokens.lock().await;
        match tokens.iter_mut().find(|t| {
            t.chain_id == token.chain_id && t.address.eq_ignore_ascii_case(&token.address)
        }) {
            Some(existing) => *existing = token.clone(),
            None => tokens.push(token.clone()),
        }
        Ok(())
    }

    async fn tracked_tokens(&self, user: &UserHash, chain_id: u64) -> Result<Vec<TokenDescriptor>> {
        Ok(self
            .tracked_tokens
            .lock()
            .await
            .get(user.as_str())
            .map(|list| {
                list.iter()
                    .filter(|t| t.chain_id == chain_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn track_token(&self, user: &UserHash, token: &TokenDescriptor) -> Result<()> {
        let mut tracked = self.tracked_tokens.lock().await;
        let list = tracked.entry(user.as_str().to_string()).or_default();
        if !list.iter().any(|t| {
            t.chain_id == token.chain_id && t.address.eq_ignore_ascii_case(&token.address)
        }) {
            list.push(token.clone());
        }
        Ok(())
    }

    async fn untrack_token(&self, user: &UserHash, address: &str, chain_id: u64) -> Result<()> {
        if let Some(list) = self.tracked_tokens.lock().await.get_mut(user.as_str()) {
            list.retain(|t| {
                !(t.chain_id == chain_id && t.address.eq_ignore_ascii_case(address))
            });
        }
        Ok(())
    }

    async fn is_tracked(&self, user: &UserHash, address: &str, chain_id: u64) -> Result<bool> {
        Ok(self
            .tracked_tokens
            .lock()
            .await
            .get(user.as_str())
            .map(|list| {
                list.iter().any(|t| {
                    t.chain_id == chain_id && t.address.eq_ignore_ascii_case(address)
                })
            })
            .unwrap_or(false))
    }
}

#[async_trait]
impl CredentialRepository for MemoryStorage {
    async fn list(&self, user: &UserHash) -> Result<Vec<LinkedCredential>> {
        Ok(self
            .credentials
            .lock()
            .await
            .get(user.as_str())
            .cloned()
            .unwrap_or_default())
    }

    async fn upsert(&self, credential: &LinkedCredential) -> Result<()> {
        let mut credentials = self.credentials.lock().await;
        let list = credentials
            .entry(credential.user.as_str().to_string())
            .or_default();
        if let Some(existing) = list.iter_mut().find(|c| c.label == credential.label) {
            *existing = credential.clone();
        } else {
            list.push(credential.clone());
        }
        Ok(())
    }
}
