//! 保险库与PIN生命周期集成测试
//!
//! 覆盖：加解密往返、错误PIN关死、PIN轮换级联、失败计数、会话过期

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tidecore::domain::user::{UserHash, UserId};
use tidecore::domain::wallet::{LinkedCredential, WalletRecord};
use tidecore::repository::memory::MemoryStorage;
use tidecore::repository::{CredentialRepository, WalletRepository};
use tidecore::{AppState, StorageHandles, WalletError};

use common::{create_test_state, MockChain};

fn user() -> UserId {
    UserId::new("884213")
}

#[tokio::test]
async fn test_encrypt_decrypt_roundtrip_and_wrong_pin() {
    let (state, _storage) = create_test_state(MockChain::new());
    let user_hash = UserHash::from_user_id(&user());

    let sealed = state
        .vault
        .encrypt("test mnemonic words", &user_hash, Some("1234"))
        .unwrap();
    assert_eq!(
        state
            .vault
            .decrypt(&sealed, &user_hash, Some("1234"))
            .unwrap()
            .as_str(),
        "test mnemonic words"
    );

    // 错误PIN与损坏密文都必须关死，决不产出明文
    assert!(matches!(
        state.vault.decrypt(&sealed, &user_hash, Some("0000")),
        Err(WalletError::DecryptionFailed)
    ));
    let mut corrupted = sealed.clone();
    corrupted.truncate(corrupted.len() - 8);
    assert!(matches!(
        state.vault.decrypt(&corrupted, &user_hash, Some("1234")),
        Err(WalletError::DecryptionFailed)
    ));
}

#[tokio::test]
async fn test_pin_verify_and_attempt_tracking() {
    let (state, _storage) = create_test_state(MockChain::new());
    let user_id = user();
    let user_hash = UserHash::from_user_id(&user_id);

    // 未设置PIN时平凡通过
    assert!(state.pin_authority.verify(&user_hash, "whatever").await.unwrap());

    state.pin_authority.set_pin(&user_hash, "1234").await.unwrap();

    assert!(!state.pin_authority.verify(&user_hash, "1111").await.unwrap());
    assert!(!state.pin_authority.verify(&user_hash, "2222").await.unwrap());
    let status = state.pin_authority.lockout_status(&user_hash).await.unwrap();
    assert_eq!(status.failure_count, 2);
    assert!(status.last_attempt_time > 0);

    // 成功验证清零计数并缓存PIN
    assert!(state.pin_authority.verify(&user_hash, "1234").await.unwrap());
    let status = state.pin_authority.lockout_status(&user_hash).await.unwrap();
    assert_eq!(status.failure_count, 0);
    assert!(state.pin_authority.cached_pin(&user_hash).await.is_some());
}

#[tokio::test]
async fn test_pin_rotation_cascade() {
    let (state, storage) = create_test_state(MockChain::new());
    let user_id = user();
    let user_hash = UserHash::from_user_id(&user_id);

    // 先以无PIN状态创建两个钱包（一个铸造一个导入）和一条外部凭证
    state
        .wallet_manager
        .create_wallet(&user_id, "Default")
        .await
        .unwrap();
    let imported_key = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
    state
        .wallet_manager
        .import_wallet(&user_id, "Imported", imported_key)
        .await
        .unwrap();
    let credential = LinkedCredential {
        user: user_hash.clone(),
        label: "x-account".into(),
        encrypted_payload: state
            .vault
            .encrypt("oauth-token-payload", &user_hash, None)
            .unwrap(),
    };
    CredentialRepository::upsert(storage.as_ref(), &credential)
        .await
        .unwrap();

    // 设置PIN：全部密文迁移到带PIN密钥
    state.pin_authority.set_pin(&user_hash, "1234").await.unwrap();
    let exported = state
        .wallet_manager
        .export_private_key(&user_id, "Imported")
        .await
        .unwrap();
    assert_eq!(exported.as_str(), imported_key);

    // 轮换到新PIN
    state
        .pin_authority
        .rotate(&user_hash, "1234", "9876")
        .await
        .unwrap();

    // 新PIN解开一切
    let wallets = state.wallet_manager.list_wallets(&user_id).await.unwrap();
    for wallet in &wallets {
        state
            .vault
            .wallet_private_key(wallet, Some("9876"))
            .await
            .unwrap();
    }
    let credentials = CredentialRepository::list(storage.as_ref(), &user_hash)
        .await
        .unwrap();
    assert_eq!(
        state
            .vault
            .decrypt(&credentials[0].encrypted_payload, &user_hash, Some("9876"))
            .unwrap()
            .as_str(),
        "oauth-token-payload"
    );

    // 旧PIN全部失效
    for wallet in &wallets {
        if wallet.encrypted_private_key.is_some() {
            assert!(matches!(
                state.vault.wallet_private_key(wallet, Some("1234")).await,
                Err(WalletError::DecryptionFailed)
            ));
        }
    }
    assert!(matches!(
        state
            .vault
            .decrypt(&credentials[0].encrypted_payload, &user_hash, Some("1234")),
        Err(WalletError::DecryptionFailed)
    ));

    // 旧PIN也无法再通过验证
    assert!(!state.pin_authority.verify(&user_hash, "1234").await.unwrap());
    assert!(state.pin_authority.verify(&user_hash, "9876").await.unwrap());
}

#[tokio::test]
async fn test_rotate_rejects_wrong_old_pin() {
    let (state, _storage) = create_test_state(MockChain::new());
    let user_id = user();
    let user_hash = UserHash::from_user_id(&user_id);

    state
        .wallet_manager
        .create_wallet(&user_id, "Default")
        .await
        .unwrap();
    state.pin_authority.set_pin(&user_hash, "1234").await.unwrap();

    assert!(matches!(
        state.pin_authority.rotate(&user_hash, "0000", "9999").await,
        Err(WalletError::PinVerification)
    ));
    // 数据仍在旧PIN下可读
    let wallets = state.wallet_manager.list_wallets(&user_id).await.unwrap();
    state
        .vault
        .wallet_private_key(&wallets[0], Some("1234"))
        .await
        .unwrap();
}

/// 可按开关让 upsert 失败的钱包存储包装器（级联回滚测试用）
struct FlakyWalletStore {
    inner: Arc<MemoryStorage>,
    fail_upsert: AtomicBool,
}

#[async_trait]
impl WalletRepository for FlakyWalletStore {
    async fn ensure_user(&self, user: &UserHash) -> Result<()> {
        self.inner.ensure_user(user).await
    }

    async fn get_by_name(&self, user: &UserHash, name: &str) -> Result<Option<WalletRecord>> {
        self.inner.get_by_name(user, name).await
    }

    async fn get_active(&self, user: &UserHash) -> Result<Option<WalletRecord>> {
        self.inner.get_active(user).await
    }

    async fn list(&self, user: &UserHash) -> Result<Vec<WalletRecord>> {
        WalletRepository::list(self.inner.as_ref(), user).await
    }

    async fn upsert(&self, record: &WalletRecord) -> Result<()> {
        if self.fail_upsert.load(Ordering::SeqCst) {
            anyhow::bail!("wallet upsert rejected");
        }
        WalletRepository::upsert(self.inner.as_ref(), record).await
    }

    async fn rename(&self, user: &UserHash, old_name: &str, new_name: &str) -> Result<bool> {
        self.inner.rename(user, old_name, new_name).await
    }

    async fn delete(&self, user: &UserHash, name: &str) -> Result<bool> {
        WalletRepository::delete(self.inner.as_ref(), user, name).await
    }

    async fn set_active(&self, user: &UserHash, name: &str) -> Result<bool> {
        self.inner.set_active(user, name).await
    }
}

/// 级联中途写失败：PIN哈希不得更新，已写记录回滚到旧密钥
#[tokio::test]
async fn test_rotation_rollback_on_mid_cascade_write_failure() {
    let storage = MemoryStorage::new();
    let flaky = Arc::new(FlakyWalletStore {
        inner: storage.clone(),
        fail_upsert: AtomicBool::new(false),
    });
    let state = AppState::new(
        Arc::new(common::test_config()),
        MockChain::new(),
        StorageHandles {
            wallets: flaky.clone(),
            mnemonics: storage.clone(),
            pins: storage.clone(),
            pin_attempts: storage.clone(),
            tokens: storage.clone(),
            credentials: storage.clone(),
        },
    );

    let user_id = user();
    let user_hash = UserHash::from_user_id(&user_id);

    // 助记词钱包 + 导入钱包，随后设置PIN
    state
        .wallet_manager
        .create_wallet(&user_id, "Default")
        .await
        .unwrap();
    let imported_key = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
    state
        .wallet_manager
        .import_wallet(&user_id, "Imported", imported_key)
        .await
        .unwrap();
    state.pin_authority.set_pin(&user_hash, "1234").await.unwrap();

    // 助记词已写回新密钥之后，钱包写入开始失败
    flaky.fail_upsert.store(true, Ordering::SeqCst);
    assert!(matches!(
        state.pin_authority.rotate(&user_hash, "1234", "9876").await,
        Err(WalletError::Storage(_))
    ));
    flaky.fail_upsert.store(false, Ordering::SeqCst);

    // 哈希未更新：旧PIN仍验证通过，新PIN不通过
    assert!(state.pin_authority.verify(&user_hash, "1234").await.unwrap());
    assert!(!state.pin_authority.verify(&user_hash, "9876").await.unwrap());

    // 全部密文仍在旧密钥下可读（含已回滚的助记词）
    let wallets = state.wallet_manager.list_wallets(&user_id).await.unwrap();
    assert_eq!(wallets.len(), 2);
    for wallet in &wallets {
        state
            .vault
            .wallet_private_key(wallet, Some("1234"))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_session_cache_expiry_and_sweep() {
    let (state, _storage) = create_test_state(MockChain::new());
    let user_hash = UserHash::from_user_id(&user());

    state.pin_authority.store_session(&user_hash, "1234").await;
    assert!(state.pin_authority.cached_pin(&user_hash).await.is_some());

    // 手动清除
    assert!(state.pin_authority.clear_session(&user_hash).await);
    assert!(state.pin_authority.cached_pin(&user_hash).await.is_none());

    // 过期条目由清扫移除（TTL压为0的独立状态）
    let mut config = common::test_config();
    config.pin.session_ttl = std::time::Duration::from_millis(0);
    let storage = tidecore::repository::memory::MemoryStorage::new();
    let expired_state = tidecore::AppState::new(
        Arc::new(config),
        MockChain::new(),
        tidecore::StorageHandles::from_single(storage),
    );
    expired_state
        .pin_authority
        .store_session(&user_hash, "1234")
        .await;
    assert_eq!(expired_state.pin_authority.sweep_expired().await, 1);
    assert!(expired_state.pin_authority.cached_pin(&user_hash).await.is_none());
}
