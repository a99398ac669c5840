//! 交换路由服务
//! 路径构造（直连或经中枢代币）、报价（含成交后费用扣减）、
//! 多步执行（按需授权 → 选择入口 → 提交），以及成交后的
//! 尽力而为副作用：费用转发与自动跟踪收到的代币

use std::sync::Arc;

use ethers::abi::{Abi, Token};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, U256};
use once_cell::sync::Lazy;

use crate::chain::{erc20, ChainRpc};
use crate::config::Config;
use crate::domain::token::TokenDescriptor;
use crate::domain::transaction::TransactionOutcome;
use crate::domain::user::UserHash;
use crate::error::WalletError;
use crate::repository::TokenRepository;
use crate::service::approval::ApprovalManager;
use crate::service::sender::TransactionSender;
use crate::service::token_resolver::TokenResolver;
use crate::utils::numeric::u256_to_f64;

/// DEX 路由合约 ABI（Uniswap V2 风格）
static ROUTER_ABI: Lazy<Abi> = Lazy::new(|| {
    ethers::abi::parse_abi(&[
        "function getAmountsOut(uint256 amountIn, address[] path) view returns (uint256[] amounts)",
        "function swapExactTokensForTokens(uint256 amountIn, uint256 amountOutMin, address[] path, address to, uint256 deadline) returns (uint256[] amounts)",
        "function swapExactETHForTokens(uint256 amountOutMin, address[] path, address to, uint256 deadline) payable returns (uint256[] amounts)",
        "function swapExactTokensForETH(uint256 amountIn, uint256 amountOutMin, address[] path, address to, uint256 deadline) returns (uint256[] amounts)",
    ])
    .expect("static router abi is valid")
});

/// 基点分母
const BPS_DENOMINATOR: u64 = 10_000;

/// 交换报价
#[derive(Debug, Clone)]
pub struct SwapQuote {
    pub path: Vec<Address>,
    pub amount_in: U256,
    /// 路由合约报出的原始产出
    pub router_amount_out: U256,
    /// 扣除成交后费用份额之后的预期产出
    pub amount_out_after_fee: U256,
    pub slippage_bps: u32,
    /// 隐含价格：产出/投入（展示用）
    pub implied_price: f64,
}

/// 交换结果
#[derive(Debug, Clone)]
pub struct SwapOutcome {
    pub transaction: TransactionOutcome,
    pub quote: SwapQuote,
}

/// 交换路由服务（进程级单例，显式构造后按引用传递）
pub struct SwapRouter {
    config: Arc<Config>,
    rpc: Arc<dyn ChainRpc>,
    resolver: Arc<TokenResolver>,
    approval: Arc<ApprovalManager>,
    sender: Arc<TransactionSender>,
    tokens: Arc<dyn TokenRepository>,
}

impl SwapRouter {
    pub fn new(
        config: Arc<Config>,
        rpc: Arc<dyn ChainRpc>,
        resolver: Arc<TokenResolver>,
        approval: Arc<ApprovalManager>,
        sender: Arc<TransactionSender>,
        tokens: Arc<dyn TokenRepository>,
    ) -> Self {
        Self {
            config,
            rpc,
            resolver,
            approval,
            sender,
            tokens,
        }
    }

    /// 构造交换路径
    ///
    /// 任一端为中枢代币 → 两元素直连路径；否则经中枢代币三元素路径
    pub fn route(&self, input: Address, output: Address) -> Vec<Address> {
        let hub = self.config.hub_token_address;
        if input == hub || output == hub {
            vec![input, output]
        } else {
            vec![input, hub, output]
        }
    }

    /// 从代币引用构造路径（原生别名已替换为 wrapped 地址）
    pub async fn route_refs(
        &self,
        input_ref: &str,
        output_ref: &str,
        user: Option<&UserHash>,
        wallet: Option<Address>,
    ) -> Result<Vec<Address>, WalletError> {
        let input = self.resolver.resolve(input_ref, user, wallet).await?;
        let output = self.resolver.resolve(output_ref, user, wallet).await?;
        Ok(self.route(input, output))
    }

    /// 沿路径询价
    pub async fn quote(
        &self,
        path: &[Address],
        amount_in: U256,
        slippage_bps: u32,
    ) -> Result<SwapQuote, WalletError> {
        if path.len() < 2 {
            return Err(WalletError::Validation("swap path needs two tokens".into()));
        }
        if amount_in.is_zero() {
            return Err(WalletError::Validation("swap amount must be positive".into()));
        }

        let function = ROUTER_ABI.function("getAmountsOut").expect("static abi");
        let data = function
            .encode_input(&[
                Token::Uint(amount_in),
                Token::Array(path.iter().copied().map(Token::Address).collect()),
            ])
            .map_err(|e| WalletError::Validation(format!("quote encoding failed: {}", e)))?;

        let output = self
            .sender
            .call_view(self.config.router_address, data)
            .await?;
        let decoded = function
            .decode_output(&output)
            .map_err(|e| WalletError::Chain(format!("Failed to decode quote: {}", e)))?;

        let amounts = match decoded.into_iter().next() {
            Some(Token::Array(items)) => items
                .into_iter()
                .filter_map(|t| match t {
                    Token::Uint(v) => Some(v),
                    _ => None,
                })
                .collect::<Vec<U256>>(),
            _ => Vec::new(),
        };
        let router_amount_out = amounts
            .last()
            .copied()
            .filter(|v| !v.is_zero())
            .ok_or_else(|| WalletError::Chain("Invalid amounts out from router".into()))?;

        // 成交后费用份额从报价产出中预先扣减
        let fee_bps = U256::from(self.config.swap.fee_bps.min(BPS_DENOMINATOR as u32 - 1));
        let amount_out_after_fee =
            router_amount_out * (U256::from(BPS_DENOMINATOR) - fee_bps) / U256::from(BPS_DENOMINATOR);

        let implied_price = u256_to_f64(router_amount_out) / u256_to_f64(amount_in).max(1.0);

        Ok(SwapQuote {
            path: path.to_vec(),
            amount_in,
            router_amount_out,
            amount_out_after_fee,
            slippage_bps,
            implied_price,
        })
    }

    /// 执行交换
    ///
    /// 输入非原生资产时先确保路由合约持有授权；
    /// 按两端是否原生资产选择入口方法；最小产出由报价和滑点容忍计算。
    /// 成交后的费用转发与自动跟踪失败只记日志——交换本身已成功
    pub async fn execute(
        &self,
        user: &UserHash,
        signer: &LocalWallet,
        input_ref: &str,
        output_ref: &str,
        amount_in: U256,
        slippage_bps: Option<u32>,
    ) -> Result<SwapOutcome, WalletError> {
        let slippage_bps = slippage_bps.unwrap_or(self.config.swap.default_slippage_bps);
        let owner = signer.address();

        let input_native = self.config.is_native_alias(input_ref);
        let output_native = self.config.is_native_alias(output_ref);

        let path = self
            .route_refs(input_ref, output_ref, Some(user), Some(owner))
            .await?;
        let quote = self.quote(&path, amount_in, slippage_bps).await?;

        // 授权：原生资产入金走 payable 入口，无需授权
        if !input_native {
            self.approval
                .ensure(signer, self.config.router_address, Some(path[0]), amount_in)
                .await?;
        }

        let amount_out_min = quote.router_amount_out
            * (U256::from(BPS_DENOMINATOR) - U256::from(slippage_bps.min(9_999)))
            / U256::from(BPS_DENOMINATOR);

        let deadline = self.deadline().await;
        let path_token = Token::Array(path.iter().copied().map(Token::Address).collect());

        let (function_name, args, value) = if input_native {
            (
                "swapExactETHForTokens",
                vec![
                    Token::Uint(amount_out_min),
                    path_token,
                    Token::Address(owner),
                    Token::Uint(deadline),
                ],
                amount_in,
            )
        } else if output_native {
            (
                "swapExactTokensForETH",
                vec![
                    Token::Uint(amount_in),
                    Token::Uint(amount_out_min),
                    path_token,
                    Token::Address(owner),
                    Token::Uint(deadline),
                ],
                U256::zero(),
            )
        } else {
            (
                "swapExactTokensForTokens",
                vec![
                    Token::Uint(amount_in),
                    Token::Uint(amount_out_min),
                    path_token,
                    Token::Address(owner),
                    Token::Uint(deadline),
                ],
                U256::zero(),
            )
        };

        let data = ROUTER_ABI
            .function(function_name)
            .expect("static abi")
            .encode_input(&args)
            .map_err(|e| WalletError::Validation(format!("swap encoding failed: {}", e)))?;

        tracing::info!(
            user = %user,
            entry = function_name,
            path_len = path.len(),
            amount_in = %amount_in,
            amount_out_min = %amount_out_min,
            "Submitting swap"
        );

        let transaction = self
            .sender
            .send_call(signer, self.config.router_address, data, value)
            .await?;

        if transaction.success {
            self.post_trade_effects(user, signer, &quote, output_native)
                .await;
        }

        Ok(SwapOutcome { transaction, quote })
    }

    /// 成交后副作用：费用转发 + 自动跟踪收到的代币。
    /// 全部尽力而为——任何失败都不回传，交换已成功
    async fn post_trade_effects(
        &self,
        user: &UserHash,
        signer: &LocalWallet,
        quote: &SwapQuote,
        output_native: bool,
    ) {
        self.forward_fee_share(signer, quote, output_native).await;
        if !output_native {
            if let Some(output_token) = quote.path.last() {
                self.auto_track_token(user, *output_token).await;
            }
        }
    }

    /// 把配置的费用份额转给归集地址
    async fn forward_fee_share(&self, signer: &LocalWallet, quote: &SwapQuote, output_native: bool) {
        let Some(collector) = self.config.swap.fee_collector else {
            return;
        };
        let fee_bps = self.config.swap.fee_bps;
        if fee_bps == 0 {
            return;
        }

        let fee_amount =
            quote.router_amount_out * U256::from(fee_bps) / U256::from(BPS_DENOMINATOR);
        if fee_amount.is_zero() {
            return;
        }

        let result = if output_native {
            self.sender
                .send_call(signer, collector, Vec::new(), fee_amount)
                .await
        } else {
            let Some(output_token) = quote.path.last().copied() else {
                return;
            };
            match erc20::encode_transfer(collector, fee_amount) {
                Ok(data) => {
                    self.sender
                        .send_call(signer, output_token, data, U256::zero())
                        .await
                }
                Err(err) => {
                    tracing::warn!(error = %err, "Fee transfer encoding failed");
                    return;
                }
            }
        };

        match result {
            Ok(outcome) if outcome.success => {
                tracing::info!(
                    collector = %collector,
                    fee = %fee_amount,
                    tx_hash = %outcome.tx_hash,
                    "Swap fee share forwarded"
                );
            }
            Ok(outcome) => {
                tracing::warn!(
                    tx_hash = %outcome.tx_hash,
                    "Fee forwarding transaction failed, continuing"
                );
            }
            Err(err) => {
                tracing::warn!(error = %err, "Fee forwarding failed, continuing");
            }
        }
    }

    /// 开始跟踪收到的代币（若尚未跟踪）
    async fn auto_track_token(&self, user: &UserHash, token: Address) {
        let address = crate::utils::address::checksum(token);
        match self
            .tokens
            .is_tracked(user, &address, self.config.chain_id)
            .await
        {
            Ok(true) => return,
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(user = %user, error = %err, "Tracked-state lookup failed");
                return;
            }
        }

        let descriptor = match self.resolver.descriptor_for(token, Some(user)).await {
            Ok(Some(descriptor)) => descriptor,
            Ok(None) => match self.fetch_onchain_descriptor(token).await {
                Some(descriptor) => descriptor,
                None => return,
            },
            Err(err) => {
                tracing::warn!(user = %user, error = %err, "Descriptor lookup failed");
                return;
            }
        };

        match self.tokens.track_token(user, &descriptor).await {
            Ok(()) => {
                tracing::info!(
                    user = %user,
                    symbol = %descriptor.symbol,
                    token = %descriptor.address,
                    "Auto-tracking received token"
                );
            }
            Err(err) => {
                tracing::warn!(user = %user, error = %err, "Auto-track failed, continuing");
            }
        }
    }

    async fn fetch_onchain_descriptor(&self, token: Address) -> Option<TokenDescriptor> {
        let symbol = erc20::symbol(self.rpc.as_ref(), token).await.ok()?;
        let name = erc20::name(self.rpc.as_ref(), token).await.ok()?;
        let decimals = erc20::decimals(self.rpc.as_ref(), token).await.ok()?;
        Some(TokenDescriptor {
            address: crate::utils::address::checksum(token),
            symbol,
            name,
            decimals,
            chain_id: self.config.chain_id,
        })
    }

    /// 截止时间：最新区块时间戳 + 配置窗口；查询失败退回本地时钟
    async fn deadline(&self) -> U256 {
        let base = match self.rpc.get_block_timestamp().await {
            Ok(timestamp) => timestamp,
            Err(err) => {
                tracing::warn!(error = %err, "Block timestamp lookup failed, using local clock");
                chrono::Utc::now().timestamp() as u64
            }
        };
        U256::from(base + self.config.deadline_window.as_secs())
    }
}
