//! 交易流水线
//! 预览（摘要 + gas估算）→ 确认 → 授权 → 签名提交 → 回执轮询。
//! 每用户同一时刻至多一笔待确认交易；同一用户的 execute 串行化
//! （钱包 nonce 不可重入，两笔并发提交必须互斥）

use std::collections::HashMap;
use std::sync::Arc;

use ethers::abi::Token;
use ethers::types::{Address, U256};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::Config;
use crate::domain::method::{
    AppDescriptor, MethodDescriptor, MethodKind, TokenAmountPair,
};
use crate::domain::transaction::{
    PendingTransaction, SessionState, TransactionOutcome, TransactionPreview,
};
use crate::domain::user::{UserHash, UserId};
use crate::error::WalletError;
use crate::infrastructure::retry::with_backoff;
use crate::repository::WalletRepository;
use crate::service::approval::ApprovalManager;
use crate::service::parameters::{ordered_args, resolve_sentinels, ParameterProcessor, ProcessedValue};
use crate::service::pin_authority::PinAuthority;
use crate::service::sender::TransactionSender;
use crate::service::token_resolver::TokenResolver;
use crate::service::vault::CredentialVault;

/// 合规检查结论（由调用方在 execute 前咨询制裁名单协作方得出）
///
/// 检查无法完成时默认阻断，决不默认放行
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplianceDecision {
    Approved,
    Blocked,
    /// 检查本身失败——按阻断处理
    Unavailable,
}

/// 每用户会话
struct UserSession {
    state: SessionState,
    pending: Option<PendingTransaction>,
}

impl Default for UserSession {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
            pending: None,
        }
    }
}

/// 交易流水线（进程级单例，显式构造后按引用传递）
pub struct TransactionPipeline {
    config: Arc<Config>,
    vault: Arc<CredentialVault>,
    pin_authority: Arc<PinAuthority>,
    resolver: Arc<TokenResolver>,
    processor: Arc<ParameterProcessor>,
    approval: Arc<ApprovalManager>,
    sender: Arc<TransactionSender>,
    wallets: Arc<dyn WalletRepository>,
    /// user hash → 会话；内层锁把同一用户的状态变更串行化
    sessions: Mutex<HashMap<String, Arc<Mutex<UserSession>>>>,
}

impl TransactionPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        vault: Arc<CredentialVault>,
        pin_authority: Arc<PinAuthority>,
        resolver: Arc<TokenResolver>,
        processor: Arc<ParameterProcessor>,
        approval: Arc<ApprovalManager>,
        sender: Arc<TransactionSender>,
        wallets: Arc<dyn WalletRepository>,
    ) -> Self {
        Self {
            config,
            vault,
            pin_authority,
            resolver,
            processor,
            approval,
            sender,
            wallets,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// 只读调用：解析合约/方法/ABI → 参数处理 → 按输入顺序编码 →
    /// 执行 call → 解码返回值
    pub async fn prepare_view(
        &self,
        app: &Arc<AppDescriptor>,
        method_name: &str,
        raw_params: &serde_json::Map<String, Value>,
        user: &UserId,
    ) -> Result<Vec<Token>, WalletError> {
        let user_hash = UserHash::from_user_id(user);
        let method = app
            .find_method(method_name, MethodKind::View)
            .ok_or_else(|| {
                WalletError::Validation(format!("View method {} not found in app config", method_name))
            })?
            .clone();

        let (_, contract) = app.contract_for(&method)?;
        let contract_address = contract.resolve_address()?;
        let function = contract.abi.function(&method.name).map_err(|_| {
            WalletError::Config(format!("Method {} not present in contract ABI", method.name))
        })?;

        let wallet_address = self.active_wallet_address(&user_hash).await?;
        let processed = self
            .processor
            .process(app, &method, raw_params, Some(&user_hash), wallet_address)
            .await?;
        let resolved = match wallet_address {
            Some(address) => resolve_sentinels(processed, address),
            None => {
                // 无钱包上下文时哨兵无从解析
                if processed
                    .values()
                    .any(|v| matches!(v, ProcessedValue::OwnWalletAddress))
                {
                    return Err(WalletError::WalletNotFound(
                        "no active wallet to resolve default address".into(),
                    ));
                }
                processed
                    .into_iter()
                    .map(|(k, v)| match v {
                        ProcessedValue::Token(token) => (k, token),
                        ProcessedValue::OwnWalletAddress => unreachable!("checked above"),
                    })
                    .collect()
            }
        };

        let args = ordered_args(&method, &resolved)?;
        let data = function
            .encode_input(&args)
            .map_err(|e| WalletError::Validation(format!("Argument encoding failed: {}", e)))?;

        let output = self.sender.call_view(contract_address, data).await?;
        let decoded = function
            .decode_output(&output)
            .map_err(|e| WalletError::Chain(format!("Failed to decode call output: {}", e)))?;

        tracing::info!(
            user = %user_hash,
            method = %method.name,
            "View call executed"
        );
        Ok(decoded)
    }

    /// 准备状态变更调用：参数处理、哨兵解析、人类摘要与gas估算，
    /// 存为待确认交易。已有待确认交易时隐式作废旧的
    pub async fn prepare_write(
        &self,
        app: &Arc<AppDescriptor>,
        method_name: &str,
        raw_params: &serde_json::Map<String, Value>,
        user: &UserId,
    ) -> Result<TransactionPreview, WalletError> {
        let user_hash = UserHash::from_user_id(user);
        let session = self.session(&user_hash).await;
        let mut session = session.lock().await;

        let method = app
            .find_method(method_name, MethodKind::Write)
            .ok_or_else(|| {
                WalletError::Validation(format!(
                    "Write method {} not found in app config",
                    method_name
                ))
            })?
            .clone();

        let wallet = self
            .active_wallet(&user_hash)
            .await?
            .ok_or_else(|| WalletError::WalletNotFound("no active wallet".into()))?;
        let wallet_address = crate::utils::address::parse_address(&wallet.address)?;

        let (contract_name, contract) = app.contract_for(&method)?;
        let contract_name = contract_name.to_string();
        let contract_address = contract.resolve_address()?;
        let function = contract.abi.function(&method.name).map_err(|_| {
            WalletError::Config(format!("Method {} not present in contract ABI", method.name))
        })?;

        let processed = self
            .processor
            .process(app, &method, raw_params, Some(&user_hash), Some(wallet_address))
            .await?;
        let resolved = resolve_sentinels(processed, wallet_address);

        let args = ordered_args(&method, &resolved)?;
        let data = function
            .encode_input(&args)
            .map_err(|e| WalletError::Validation(format!("Argument encoding failed: {}", e)))?;
        let value_wei = extract_value_wei(&resolved);

        let summary = build_summary(&method, raw_params);
        let gas = self
            .sender
            .estimate_gas(wallet_address, contract_address, data, value_wei)
            .await;

        // 原生余额必须覆盖 gas 费用与随交易发送的金额
        let native_balance = self.sender.native_balance(wallet_address).await?;
        let required = gas.total_cost_wei + value_wei;
        if native_balance < required {
            return Err(WalletError::InsufficientBalance {
                available: crate::utils::numeric::to_human_display(native_balance, 18, 6),
                required: crate::utils::numeric::to_human_display(required, 18, 6),
            });
        }

        let preview = TransactionPreview {
            summary,
            method_name: method.name.clone(),
            contract_name,
            contract_address,
            gas,
        };

        if let Some(previous) = &session.pending {
            tracing::info!(
                user = %user_hash,
                discarded = %previous.method.name,
                replacement = %method.name,
                "Discarding prior pending transaction"
            );
        }

        session.pending = Some(PendingTransaction {
            id: Uuid::new_v4(),
            app: Arc::clone(app),
            method,
            wallet,
            processed_params: resolved,
            value_wei,
            preview: preview.clone(),
        });
        session.state = SessionState::AwaitingConfirmation;

        tracing::info!(
            user = %user_hash,
            method = %preview.method_name,
            gas_cost = %preview.gas.total_cost_native,
            "Write call prepared, awaiting confirmation"
        );
        Ok(preview)
    }

    /// 执行待确认交易
    ///
    /// PIN门控：账户设有PIN且会话缓存无PIN时停靠到 AwaitingPin 而不是失败。
    /// 提交前的失败（授权、签名、广播被拒）回到可取消的 AwaitingConfirmation；
    /// 提交后按回执转入 Completed/Failed 并清除待确认交易
    pub async fn execute(
        &self,
        user: &UserId,
        compliance: ComplianceDecision,
    ) -> Result<TransactionOutcome, WalletError> {
        let user_hash = UserHash::from_user_id(user);
        let session = self.session(&user_hash).await;
        // 整个执行期间持有会话锁：同一用户并发 execute 串行化
        let mut session = session.lock().await;

        if session.pending.is_none() {
            return Err(WalletError::NothingPending);
        }
        if !matches!(
            session.state,
            SessionState::AwaitingConfirmation | SessionState::AwaitingPin
        ) {
            return Err(WalletError::InvalidState(format!(
                "cannot execute from {:?}",
                session.state
            )));
        }

        // 合规检查：无法完成时同样阻断
        if compliance != ComplianceDecision::Approved {
            tracing::warn!(user = %user_hash, ?compliance, "Execution blocked by compliance");
            return Err(WalletError::ComplianceBlocked);
        }

        // PIN 门控
        let pin = if self.pin_authority.has_pin(&user_hash).await? {
            match self.pin_authority.cached_pin(&user_hash).await {
                Some(pin) => Some(pin),
                None => {
                    session.state = SessionState::AwaitingPin;
                    tracing::info!(user = %user_hash, "Pin required, parking execution");
                    return Err(WalletError::PinRequired);
                }
            }
        } else {
            None
        };

        session.state = SessionState::Executing;
        let pending = session.pending.clone().expect("checked above");

        match self
            .execute_pending(&user_hash, &pending, pin.as_deref().map(|s| s.as_str()))
            .await
        {
            Ok(outcome) => {
                session.state = if outcome.success {
                    SessionState::Completed
                } else {
                    SessionState::Failed
                };
                session.pending = None;
                Ok(outcome)
            }
            Err(err) => {
                // 提交前失败：回到可取消状态，不留在 Executing
                session.state = SessionState::AwaitingConfirmation;
                tracing::error!(user = %user_hash, error = %err, "Execution aborted before broadcast");
                Err(err)
            }
        }
    }

    /// 取消待确认交易，回到空闲态（幂等）
    pub async fn cancel(&self, user: &UserId) -> Result<(), WalletError> {
        let user_hash = UserHash::from_user_id(user);
        let session = self.session(&user_hash).await;
        let mut session = session.lock().await;
        if session.pending.is_some() {
            tracing::info!(user = %user_hash, "Pending transaction cancelled");
        }
        session.pending = None;
        session.state = SessionState::Idle;
        Ok(())
    }

    /// 当前会话状态
    pub async fn session_state(&self, user: &UserId) -> SessionState {
        let user_hash = UserHash::from_user_id(user);
        let session = self.session(&user_hash).await;
        let session = session.lock().await;
        session.state
    }

    async fn execute_pending(
        &self,
        user_hash: &UserHash,
        pending: &PendingTransaction,
        pin: Option<&str>,
    ) -> Result<TransactionOutcome, WalletError> {
        let private_key = self.vault.wallet_private_key(&pending.wallet, pin).await?;
        let signer = self.vault.signer(&private_key)?;

        // 按需授权
        if pending.method.requires_token_approval {
            let (token, amount) =
                approval_target(&pending.method, &pending.processed_params)?;
            self.approval
                .ensure(&signer, pending.preview.contract_address, token, amount)
                .await?;
        }

        let (_, contract) = pending.app.contract_for(&pending.method)?;
        let function = contract.abi.function(&pending.method.name).map_err(|_| {
            WalletError::Config(format!(
                "Method {} not present in contract ABI",
                pending.method.name
            ))
        })?;
        let args = ordered_args(&pending.method, &pending.processed_params)?;
        let data = function
            .encode_input(&args)
            .map_err(|e| WalletError::Validation(format!("Argument encoding failed: {}", e)))?;

        tracing::info!(
            user = %user_hash,
            method = %pending.method.name,
            tx_id = %pending.id,
            "Submitting transaction"
        );

        self.sender
            .send_call(
                &signer,
                pending.preview.contract_address,
                data,
                pending.value_wei,
            )
            .await
    }

    async fn active_wallet(
        &self,
        user_hash: &UserHash,
    ) -> Result<Option<crate::domain::wallet::WalletRecord>, WalletError> {
        with_backoff(&self.config.storage_retry, "wallet.get_active", || {
            self.wallets.get_active(user_hash)
        })
        .await
        .map_err(WalletError::storage)
    }

    async fn active_wallet_address(
        &self,
        user_hash: &UserHash,
    ) -> Result<Option<Address>, WalletError> {
        match self.active_wallet(user_hash).await? {
            Some(wallet) => Ok(Some(crate::utils::address::parse_address(&wallet.address)?)),
            None => Ok(None),
        }
    }

    async fn session(&self, user_hash: &UserHash) -> Arc<Mutex<UserSession>> {
        let mut sessions = self.sessions.lock().await;
        Arc::clone(
            sessions
                .entry(user_hash.as_str().to_string())
                .or_default(),
        )
    }

    /// 解析路径引用供路由等上层使用（便捷转发）
    pub fn resolver(&self) -> &Arc<TokenResolver> {
        &self.resolver
    }
}

/// 从 token/amount 配对推导授权目标：
/// 花费的代币（原生资产为 None）与所需额度
fn approval_target(
    method: &MethodDescriptor,
    processed: &std::collections::BTreeMap<String, Token>,
) -> Result<(Option<Address>, U256), WalletError> {
    let pair = method
        .token_amount_pairs
        .iter()
        .find(|p| p.role == "input")
        .or_else(|| method.token_amount_pairs.first())
        .ok_or_else(|| {
            WalletError::Config(format!(
                "Method {} requires approval but declares no token_amount_pairs",
                method.name
            ))
        })?;

    let token = resolve_pair_token(pair, processed)?;
    let amount = resolve_pair_amount(pair, processed)?;
    Ok((token, amount))
}

/// `path[0]`/`path[-1]` 引用或参数名 → 花费代币地址；原生资产 → None
fn resolve_pair_token(
    pair: &TokenAmountPair,
    processed: &std::collections::BTreeMap<String, Token>,
) -> Result<Option<Address>, WalletError> {
    let reference = pair.token.trim();

    // path[k] 形式
    if let Some(open) = reference.find('[') {
        if reference.ends_with(']') {
            let param = &reference[..open];
            let index = &reference[open + 1..reference.len() - 1];
            let Some(Token::Array(items)) = processed.get(param) else {
                return Err(WalletError::Validation(format!(
                    "Approval token reference {} has no resolved path",
                    reference
                )));
            };
            let item = match index {
                "0" => items.first(),
                "-1" => items.last(),
                _ => None,
            };
            return match item {
                Some(Token::Address(address)) => Ok(Some(*address)),
                _ => Err(WalletError::Validation(format!(
                    "Approval token reference {} is not an address",
                    reference
                ))),
            };
        }
    }

    // 参数名形式：处理结果中的地址
    if let Some(Token::Address(address)) = processed.get(reference) {
        return Ok(Some(*address));
    }

    // 字面地址
    if crate::utils::address::is_address(reference) {
        return Ok(Some(crate::utils::address::parse_address(reference)?));
    }

    // 原生资产别名（如 "BNB"）：无需授权
    Ok(None)
}

fn resolve_pair_amount(
    pair: &TokenAmountPair,
    processed: &std::collections::BTreeMap<String, Token>,
) -> Result<U256, WalletError> {
    match processed.get(pair.amount.trim()) {
        Some(Token::Uint(amount)) => Ok(*amount),
        _ => Err(WalletError::Validation(format!(
            "Approval amount reference {} is not a processed amount",
            pair.amount
        ))),
    }
}

/// 交易的人类可读摘要（基于用户原始输入，预览展示用）
fn build_summary(method: &MethodDescriptor, raw_params: &serde_json::Map<String, Value>) -> String {
    if method.token_amount_pairs.is_empty() {
        return format!("Call {}", method.name);
    }

    let parts: Vec<String> = method
        .token_amount_pairs
        .iter()
        .map(|pair| {
            let amount = display_reference(&pair.amount, raw_params);
            let token = display_reference(&pair.token, raw_params);
            if pair.role.is_empty() {
                format!("{} {}", amount, token)
            } else {
                format!("{} {} {}", pair.role, amount, token)
            }
        })
        .collect();
    format!("{}: {}", method.name, parts.join(", "))
}

/// 摘要中的引用展示：取用户输入的原文（`path[0]` 取路径首元素原文）
fn display_reference(reference: &str, raw_params: &serde_json::Map<String, Value>) -> String {
    if let Some(open) = reference.find('[') {
        if reference.ends_with(']') {
            let param = &reference[..open];
            if let Some(Value::Array(items)) = raw_params.get(param) {
                let item = match &reference[open + 1..reference.len() - 1] {
                    "0" => items.first(),
                    "-1" => items.last(),
                    _ => None,
                };
                if let Some(Value::String(text)) = item {
                    return text.clone();
                }
            }
            return reference.to_string();
        }
    }

    match raw_params.get(reference) {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Number(number)) => number.to_string(),
        _ => reference.to_string(),
    }
}

/// 非合约参数 value_wei：随交易发送的原生资产金额
fn extract_value_wei(processed: &std::collections::BTreeMap<String, Token>) -> U256 {
    match processed.get("value_wei") {
        Some(Token::Uint(value)) => *value,
        _ => U256::zero(),
    }
}
