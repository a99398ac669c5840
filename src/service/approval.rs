//! 授权管理服务
//! 代币花费前的 ERC20 额度检查与按需授权；
//! 原生资产无额度概念，直接放行

use std::sync::Arc;

use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, U256};

use crate::chain::{erc20, ChainRpc};
use crate::error::WalletError;
use crate::service::sender::TransactionSender;

/// 授权管理服务
pub struct ApprovalManager {
    rpc: Arc<dyn ChainRpc>,
    sender: Arc<TransactionSender>,
}

impl ApprovalManager {
    pub fn new(rpc: Arc<dyn ChainRpc>, sender: Arc<TransactionSender>) -> Self {
        Self { rpc, sender }
    }

    /// 确保 spender 对代币持有足额授权
    ///
    /// `token` 为 None 表示原生资产，直接放行；
    /// 额度不足时提交恰好所需金额的 approve 交易并等待其确认，
    /// 授权路径上的任何失败都以 ApprovalFailed 中止调用方交易——
    /// 决不带着不足的额度去提交花费调用
    pub async fn ensure(
        &self,
        signer: &LocalWallet,
        spender: Address,
        token: Option<Address>,
        amount: U256,
    ) -> Result<(), WalletError> {
        let Some(token) = token else {
            return Ok(());
        };

        let owner = signer.address();
        let current = erc20::allowance(self.rpc.as_ref(), token, owner, spender)
            .await
            .map_err(|e| WalletError::ApprovalFailed(format!("allowance check failed: {}", e)))?;

        if current >= amount {
            tracing::debug!(
                token = %token,
                spender = %spender,
                allowance = %current,
                required = %amount,
                "Existing allowance sufficient"
            );
            return Ok(());
        }

        tracing::info!(
            token = %token,
            spender = %spender,
            allowance = %current,
            required = %amount,
            "Allowance insufficient, submitting approval"
        );

        let data = erc20::encode_approve(spender, amount)
            .map_err(|e| WalletError::ApprovalFailed(e.to_string()))?;

        let outcome = self
            .sender
            .send_call(signer, token, data, U256::zero())
            .await
            .map_err(|e| WalletError::ApprovalFailed(e.to_string()))?;

        if !outcome.success {
            return Err(WalletError::ApprovalFailed(format!(
                "approval transaction failed: {}",
                outcome.tx_hash
            )));
        }

        tracing::info!(
            token = %token,
            tx_hash = %outcome.tx_hash,
            "Token spending approved"
        );
        Ok(())
    }
}
