//! 链RPC协作方接口
//!
//! 核心不拥有RPC客户端实现，只消费这组原语；
//! 生产环境由外层注入 ethers Provider 适配器，测试注入 mock

pub mod erc20;

use anyhow::Result;
use async_trait::async_trait;
use ethers::types::{
    transaction::eip2718::TypedTransaction, Address, Bytes, TransactionReceipt, H256, U256,
};

/// 链RPC原语
///
/// 注意：`send_raw_transaction` 决不在实现内自动重试——
/// 重播已签名交易有双花风险；确认等待由调用方轮询回执完成
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// 原生资产余额（wei）
    async fn get_balance(&self, address: Address) -> Result<U256>;

    /// 账户nonce
    async fn get_transaction_count(&self, address: Address) -> Result<U256>;

    /// 当前gas价格（wei）
    async fn gas_price(&self) -> Result<U256>;

    /// 估算gas用量
    async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<U256>;

    /// 只读合约调用
    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes>;

    /// 广播已签名的原始交易
    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256>;

    /// 查询交易回执（未上链时返回 None）
    async fn get_transaction_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>>;

    /// 最新区块时间戳（秒）
    async fn get_block_timestamp(&self) -> Result<u64>;
}
