//! 统一错误类型
//! 核心引擎的业务错误分类，供聊天前端按类型恢复或提示

use crate::domain::token::TokenSuggestion;

/// 钱包核心错误
///
/// 分类原则：
/// - 输入/解析类错误（Validation/MissingParameter/UnknownToken）可本地恢复，
///   携带面向用户的可操作信息
/// - 签名/提交类错误使当前待确认交易回到可取消状态，不留在 Executing
/// - DecryptionFailed 视为数据损坏，不重试，由调用方引导清理/恢复流程
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("invalid parameter: {0}")]
    Validation(String),

    #[error("missing required parameter: {0}")]
    MissingParameter(String),

    /// 代币引用无法解析，附带最多5个相似候选
    #[error("unknown token reference: {reference}")]
    UnknownToken {
        reference: String,
        suggestions: Vec<TokenSuggestion>,
    },

    #[error("insufficient balance: have {available}, need {required}")]
    InsufficientBalance { available: String, required: String },

    /// 授权交易本身失败（额度不足由 ApprovalManager 内部吸收）
    #[error("token approval failed: {0}")]
    ApprovalFailed(String),

    /// 合约回滚，原因已剥离二进制负载
    #[error("contract reverted: {0}")]
    ContractRevert(String),

    /// 仅在降级估算也失败时对外暴露
    #[error("gas estimation failed: {0}")]
    GasEstimation(String),

    #[error("pin locked out after {failure_count} failed attempts")]
    PinLockout {
        failure_count: u32,
        last_attempt_time: i64,
    },

    /// 已设置PIN但会话缓存中无可用PIN（区别于锁定）
    #[error("pin required but not available")]
    PinRequired,

    #[error("pin verification failed")]
    PinVerification,

    /// 解密失败：错误密钥或密文损坏，决不返回错误明文
    #[error("failed to decrypt stored secret")]
    DecryptionFailed,

    #[error("no pending transaction to execute")]
    NothingPending,

    #[error("wallet not found: {0}")]
    WalletNotFound(String),

    #[error("wallet already exists: {0}")]
    WalletAlreadyExists(String),

    #[error("no mnemonic stored for user")]
    MnemonicMissing,

    /// 合规检查未通过或无法完成——默认阻断
    #[error("transaction blocked by compliance check")]
    ComplianceBlocked,

    #[error("invalid session state: {0}")]
    InvalidState(String),

    /// 存储层重试耗尽后才对外暴露
    #[error("storage error: {0}")]
    Storage(String),

    #[error("chain rpc error: {0}")]
    Chain(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl WalletError {
    /// 将存储层错误（重试耗尽后）收敛为 Storage
    pub fn storage(err: anyhow::Error) -> Self {
        Self::Storage(err.to_string())
    }

    /// 将链上调用错误归类：revert 识别为 ContractRevert 并清洗原因，
    /// 其余归为 Chain
    pub fn from_chain(err: anyhow::Error) -> Self {
        let message = err.to_string();
        let lowered = message.to_lowercase();
        if lowered.contains("revert") {
            Self::ContractRevert(crate::utils::revert::sanitize_revert_reason(&message))
        } else {
            Self::Chain(message)
        }
    }
}
