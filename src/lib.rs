//! TideCore - 对话式钱包核心引擎
//!
//! 凭证保险库（PIN派生密钥的信封加密 + PIN生命周期）与
//! 声明式交易处理流水线（代币解析、参数处理、授权、提交、交换路由）。
//! 聊天前端、自然语言分类器、关系存储与链RPC客户端均为外部协作方，
//! 本核心只消费其接口

pub mod app_state;
pub mod chain;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod repository;
pub mod service;
pub mod utils;

// 重新导出常用类型
pub use app_state::{AppState, StorageHandles};
pub use config::Config;
pub use error::WalletError;

// 统一模块导出
pub mod prelude {
    pub use crate::{
        app_state::{AppState, StorageHandles},
        chain::ChainRpc,
        config::Config,
        domain::{
            AppDescriptor, MethodKind, SessionState, TokenDescriptor, TransactionOutcome, UserId,
        },
        error::WalletError,
        service::pipeline::ComplianceDecision,
    };
}
