//! 钱包与助记词记录

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::user::UserHash;

/// 钱包记录
///
/// `encrypted_private_key` 与 `derivation_index` 二选一：
/// 导入的钱包只有加密私钥；从助记词铸造的钱包只存派生索引，
/// 私钥在需要时从助记词按索引重新派生。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletRecord {
    pub user: UserHash,
    /// 用户内唯一的钱包名
    pub name: String,
    pub address: String,
    /// 加密私钥（信封编码），仅导入钱包持有
    pub encrypted_private_key: Option<String>,
    /// 助记词派生索引，仅铸造钱包持有
    pub derivation_index: Option<u32>,
    pub imported: bool,
    /// 每用户同一时刻恰有一个活跃钱包
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// 助记词记录：每用户一条，密文存储
///
/// 助记词只读取、派生、丢弃，明文决不落库；
/// `next_derivation_index` 单调递增，用于铸造下一个钱包
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MnemonicRecord {
    pub user: UserHash,
    pub encrypted_mnemonic: String,
    pub next_derivation_index: u32,
}

/// 用户关联的外部账户凭证（第三方token等），密文存储
///
/// PIN轮换级联时与助记词、私钥一并重加密
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkedCredential {
    pub user: UserHash,
    /// 凭证标签（如外部服务名）
    pub label: String,
    pub encrypted_payload: String,
}
