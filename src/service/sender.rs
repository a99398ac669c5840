//! 交易发送器
//! 组装（nonce/gas/签名）→ 广播 → 有界轮询回执。
//! 广播决不自动重试；估算失败降级到保守固定值而不是中止

use std::sync::Arc;

use ethers::signers::{LocalWallet, Signer};
use ethers::types::{
    transaction::eip2718::TypedTransaction, Address, TransactionRequest, U256,
};

use crate::chain::ChainRpc;
use crate::config::Config;
use crate::domain::transaction::{GasEstimateInfo, TransactionOutcome};
use crate::error::WalletError;
use crate::utils::numeric::to_human_display;

/// 交易发送器（进程级单例，显式构造后按引用传递）
pub struct TransactionSender {
    config: Arc<Config>,
    rpc: Arc<dyn ChainRpc>,
}

impl TransactionSender {
    pub fn new(config: Arc<Config>, rpc: Arc<dyn ChainRpc>) -> Self {
        Self { config, rpc }
    }

    /// 估算合约调用的gas
    ///
    /// 估算或gas价格查询失败时降级为配置的保守值并打标，
    /// 预览照常给出而不是让整个准备流程失败
    pub async fn estimate_gas(
        &self,
        from: Address,
        to: Address,
        data: Vec<u8>,
        value: U256,
    ) -> GasEstimateInfo {
        let tx = TypedTransaction::Legacy(
            TransactionRequest::new()
                .from(from)
                .to(to)
                .data(data)
                .value(value),
        );

        let gas_price = match self.rpc.gas_price().await {
            Ok(price) => price,
            Err(err) => {
                tracing::warn!(error = %err, "Gas price lookup failed, using fallback");
                self.config.gas.fallback_gas_price
            }
        };

        let (gas_limit, fallback) = match self.rpc.estimate_gas(&tx).await {
            Ok(estimate) => (estimate, false),
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    fallback_gas = %self.config.gas.fallback_gas_limit,
                    "Gas estimation failed, using conservative fallback"
                );
                (self.config.gas.fallback_gas_limit, true)
            }
        };

        let total_cost_wei = gas_limit * gas_price;
        GasEstimateInfo {
            gas_limit,
            gas_price,
            total_cost_wei,
            total_cost_native: to_human_display(total_cost_wei, 18, 4),
            fallback,
        }
    }

    /// 原生资产余额
    pub async fn native_balance(&self, address: Address) -> Result<U256, WalletError> {
        self.rpc
            .get_balance(address)
            .await
            .map_err(WalletError::from_chain)
    }

    /// 只读合约调用
    pub async fn call_view(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, WalletError> {
        let tx = TypedTransaction::Legacy(TransactionRequest::new().to(to).data(data));
        let output = self
            .rpc
            .call(&tx)
            .await
            .map_err(WalletError::from_chain)?;
        Ok(output.to_vec())
    }

    /// 签名并提交状态变更调用，轮询回执
    ///
    /// 轮询耗尽仍未上链时返回 `success == false` 的结果，
    /// 交易可能稍后仍会确认——调用方据哈希自行跟进
    pub async fn send_call(
        &self,
        signer: &LocalWallet,
        to: Address,
        data: Vec<u8>,
        value: U256,
    ) -> Result<TransactionOutcome, WalletError> {
        let from = signer.address();

        let nonce = self
            .rpc
            .get_transaction_count(from)
            .await
            .map_err(WalletError::from_chain)?;

        let gas = self.estimate_gas(from, to, data.clone(), value).await;

        let request = TransactionRequest::new()
            .from(from)
            .to(to)
            .data(data)
            .value(value)
            .nonce(nonce)
            .gas(gas.gas_limit)
            .gas_price(gas.gas_price)
            .chain_id(self.config.chain_id);
        let tx = TypedTransaction::Legacy(request);

        let signature = signer
            .sign_transaction(&tx)
            .await
            .map_err(|e| WalletError::Chain(format!("Failed to sign transaction: {}", e)))?;
        let raw = tx.rlp_signed(&signature);

        let tx_hash = self
            .rpc
            .send_raw_transaction(raw)
            .await
            .map_err(WalletError::from_chain)?;
        let tx_hash_hex = format!("{:#x}", tx_hash);

        tracing::info!(
            tx_hash = %tx_hash_hex,
            from = %from,
            to = %to,
            nonce = %nonce,
            "Transaction broadcast, polling for receipt"
        );

        for attempt in 1..=self.config.gas.receipt_poll_attempts {
            match self.rpc.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    let success = receipt.status.map(|s| s.as_u64() == 1).unwrap_or(false);
                    let block_number = receipt.block_number.map(|b| b.as_u64()).unwrap_or(0);
                    tracing::info!(
                        tx_hash = %tx_hash_hex,
                        success,
                        block_number,
                        "Transaction confirmed"
                    );
                    return Ok(TransactionOutcome {
                        tx_hash: tx_hash_hex,
                        success,
                        block_number,
                    });
                }
                Ok(None) => {
                    tracing::debug!(
                        tx_hash = %tx_hash_hex,
                        attempt,
                        max_attempts = self.config.gas.receipt_poll_attempts,
                        "Receipt not yet available"
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        tx_hash = %tx_hash_hex,
                        attempt,
                        error = %err,
                        "Receipt poll failed"
                    );
                }
            }
            tokio::time::sleep(self.config.gas.receipt_poll_interval).await;
        }

        tracing::warn!(
            tx_hash = %tx_hash_hex,
            "Timed out waiting for confirmation, transaction may still confirm later"
        );
        Ok(TransactionOutcome {
            tx_hash: tx_hash_hex,
            success: false,
            block_number: 0,
        })
    }
}
