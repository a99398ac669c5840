//! 交易会话状态与预览

use std::collections::BTreeMap;
use std::sync::Arc;

use ethers::abi::Token;
use ethers::types::{Address, U256};
use uuid::Uuid;

use crate::domain::method::{AppDescriptor, MethodDescriptor};
use crate::domain::wallet::WalletRecord;

/// 每用户交易会话状态机
///
/// Idle → AwaitingConfirmation → Executing → Completed | Failed；
/// AwaitingPin 是 execute 在无缓存PIN时的停靠态；
/// cancel 从任何非终态回到 Idle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingConfirmation,
    AwaitingPin,
    Executing,
    Completed,
    Failed,
}

/// Gas 估算展示信息
#[derive(Debug, Clone)]
pub struct GasEstimateInfo {
    pub gas_limit: U256,
    pub gas_price: U256,
    /// gas_limit × gas_price
    pub total_cost_wei: U256,
    /// 原生资产计的人类可读费用
    pub total_cost_native: String,
    /// 估算失败、使用保守降级值时为 true
    pub fallback: bool,
}

/// 交易预览：人类可读摘要 + gas 估算
#[derive(Debug, Clone)]
pub struct TransactionPreview {
    pub summary: String,
    pub method_name: String,
    pub contract_name: String,
    pub contract_address: Address,
    pub gas: GasEstimateInfo,
}

/// 待确认交易
///
/// 每用户同一时刻至多一笔；新的 prepare_write 隐式作废旧的
#[derive(Debug, Clone)]
pub struct PendingTransaction {
    pub id: Uuid,
    pub app: Arc<AppDescriptor>,
    pub method: MethodDescriptor,
    /// 准备时刻的活跃钱包（执行期间不受切换影响）
    pub wallet: WalletRecord,
    /// 处理完成的参数（哨兵已解析）
    pub processed_params: BTreeMap<String, Token>,
    /// 随交易发送的原生资产金额
    pub value_wei: U256,
    pub preview: TransactionPreview,
}

/// 交易结果
#[derive(Debug, Clone)]
pub struct TransactionOutcome {
    pub tx_hash: String,
    pub success: bool,
    pub block_number: u64,
}
