//! 存储协作方接口
//!
//! 关系存储层不属于本核心（接口消费方自行实现）；
//! 这里只声明按键读写的 Repository trait，并提供内存实现供测试与嵌入方使用。
//! 所有 trait 都要求"首次触达即建行"（insert-if-absent）语义

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::token::TokenDescriptor;
use crate::domain::user::UserHash;
use crate::domain::wallet::{LinkedCredential, MnemonicRecord, WalletRecord};

/// PIN 尝试状态：失败计数 + 最近一次尝试时间
///
/// 锁定策略由前端实现，核心只记录与上报
#[derive(Debug, Clone, Copy, Default)]
pub struct PinAttemptState {
    pub failure_count: u32,
    /// Unix 秒
    pub last_attempt_time: i64,
}

/// 钱包记录存储
#[async_trait]
pub trait WalletRepository: Send + Sync {
    /// 确保用户行存在（insert-if-absent）
    async fn ensure_user(&self, user: &UserHash) -> Result<()>;

    async fn get_by_name(&self, user: &UserHash, name: &str) -> Result<Option<WalletRecord>>;

    /// 当前活跃钱包
    async fn get_active(&self, user: &UserHash) -> Result<Option<WalletRecord>>;

    async fn list(&self, user: &UserHash) -> Result<Vec<WalletRecord>>;

    /// 按 (user, name) 插入或覆盖
    async fn upsert(&self, record: &WalletRecord) -> Result<()>;

    /// 重命名；目标名已存在或源不存在时返回 false
    async fn rename(&self, user: &UserHash, old_name: &str, new_name: &str) -> Result<bool>;

    async fn delete(&self, user: &UserHash, name: &str) -> Result<bool>;

    /// 设为活跃并取消其他钱包的活跃标记
    async fn set_active(&self, user: &UserHash, name: &str) -> Result<bool>;
}

/// 助记词存储（每用户一条）
#[async_trait]
pub trait MnemonicRepository: Send + Sync {
    async fn get(&self, user: &UserHash) -> Result<Option<MnemonicRecord>>;

    async fn save(&self, record: &MnemonicRecord) -> Result<()>;

    /// 取出当前派生索引并单调递增计数器
    async fn mint_derivation_index(&self, user: &UserHash) -> Result<u32>;

    async fn delete(&self, user: &UserHash) -> Result<()>;
}

/// PIN 哈希存储；行缺失即 PIN-less 模式
#[async_trait]
pub trait PinRepository: Send + Sync {
    async fn get_hash(&self, user: &UserHash) -> Result<Option<String>>;

    async fn save_hash(&self, user: &UserHash, pin_hash: &str) -> Result<()>;

    async fn delete(&self, user: &UserHash) -> Result<()>;
}

/// PIN 尝试状态存储
#[async_trait]
pub trait PinAttemptRepository: Send + Sync {
    async fn get(&self, user: &UserHash) -> Result<Option<PinAttemptState>>;

    /// 失败计数 +1，返回新状态
    async fn record_failure(&self, user: &UserHash, now: i64) -> Result<PinAttemptState>;

    /// 成功后清零
    async fn reset(&self, user: &UserHash, now: i64) -> Result<()>;
}

/// 代币存储：权威默认列表 + 每用户跟踪列表
#[async_trait]
pub trait TokenRepository: Send + Sync {
    /// 权威默认列表（按链过滤）
    async fn default_tokens(&self, chain_id: u64) -> Result<Vec<TokenDescriptor>>;

    /// 按 (address, chain_id) 插入或更新默认列表条目
    async fn upsert_default_token(&self, token: &TokenDescriptor) -> Result<()>;

    /// 用户跟踪的代币
    async fn tracked_tokens(&self, user: &UserHash, chain_id: u64) -> Result<Vec<TokenDescriptor>>;

    async fn track_token(&self, user: &UserHash, token: &TokenDescriptor) -> Result<()>;

    async fn untrack_token(&self, user: &UserHash, address: &str, chain_id: u64) -> Result<()>;

    async fn is_tracked(&self, user: &UserHash, address: &str, chain_id: u64) -> Result<bool>;
}

/// 外部账户凭证存储（PIN轮换级联的重加密对象之一）
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    async fn list(&self, user: &UserHash) -> Result<Vec<LinkedCredential>>;

    /// 按 (user, label) 插入或覆盖
    async fn upsert(&self, credential: &LinkedCredential) -> Result<()>;
}
