//! 代币解析服务
//! 把用户口中的代币引用（地址/原生别名/符号/名称）解析为规范合约地址。
//! 权威默认列表总是胜出；跟踪列表只做后备，符号歧义按链上余额消歧

use std::sync::Arc;

use ethers::types::{Address, U256};

use crate::chain::{erc20, ChainRpc};
use crate::config::Config;
use crate::domain::token::{TokenDescriptor, TokenSuggestion};
use crate::domain::user::UserHash;
use crate::error::WalletError;
use crate::infrastructure::retry::with_backoff;
use crate::repository::TokenRepository;
use crate::utils::address::{checksum, is_address, parse_address};
use crate::utils::similarity::{normalize_token_reference, similarity};

/// 模糊建议的相似度门槛与数量上限
const SUGGESTION_THRESHOLD: f64 = 0.5;
const SUGGESTION_LIMIT: usize = 5;
/// 参与余额二级排序的候选数量上限（限制链上调用次数）
const SUGGESTION_BALANCE_POOL: usize = 10;

/// 代币解析服务
pub struct TokenResolver {
    config: Arc<Config>,
    tokens: Arc<dyn TokenRepository>,
    rpc: Arc<dyn ChainRpc>,
}

impl TokenResolver {
    pub fn new(
        config: Arc<Config>,
        tokens: Arc<dyn TokenRepository>,
        rpc: Arc<dyn ChainRpc>,
    ) -> Self {
        Self {
            config,
            tokens,
            rpc,
        }
    }

    /// 解析代币引用
    ///
    /// 解析顺序（每级对下一级有权威性）：
    /// 1. 已是合法地址 → 原样使用
    /// 2. 原生资产别名 → 替换为 wrapped 原生地址
    /// 3. 权威默认列表按符号/名称匹配（大小写与标点不敏感）；
    ///    同符号但地址不同的跟踪条目视为陈旧数据，顺手清除
    /// 4. 仅当默认列表无此条目时查用户跟踪列表；多条同符号时
    ///    取给定钱包链上余额最大者（平手取先匹配者）
    ///
    /// 全部落空时返回 UnknownToken，携带相似度排序的候选供前端提示
    pub async fn resolve(
        &self,
        reference: &str,
        user: Option<&UserHash>,
        wallet: Option<Address>,
    ) -> Result<Address, WalletError> {
        let trimmed = reference.trim();
        if trimmed.is_empty() {
            return Err(WalletError::Validation("empty token reference".into()));
        }

        // 1. 地址直通
        if is_address(trimmed) {
            return parse_address(trimmed);
        }

        // 2. 原生资产别名
        if self.config.is_native_alias(trimmed) {
            return Ok(self.config.wrapped_native_address);
        }

        let normalized = normalize_token_reference(trimmed);

        // 3. 权威默认列表
        let defaults = self.default_tokens().await?;
        if let Some(token) = find_by_reference(&defaults, &normalized) {
            let address = parse_address(&token.address)?;
            if let Some(user) = user {
                self.cleanup_stale_tracked(user, token).await;
            }
            return Ok(address);
        }

        // 4. 用户跟踪列表后备
        if let Some(user) = user {
            let tracked = self.tracked_tokens(user).await?;
            let matches: Vec<&TokenDescriptor> = tracked
                .iter()
                .filter(|t| matches_reference(t, &normalized))
                .collect();
            match matches.len() {
                0 => {}
                1 => return parse_address(&matches[0].address),
                _ => {
                    let address = self.pick_by_balance(&matches, wallet).await?;
                    return Ok(address);
                }
            }
        }

        let suggestions = self.suggestions(trimmed, user, wallet).await;
        Err(WalletError::UnknownToken {
            reference: trimmed.to_string(),
            suggestions,
        })
    }

    /// 逐元素解析路径；首个不可解析元素即失败并透传其候选
    pub async fn resolve_path(
        &self,
        references: &[String],
        user: Option<&UserHash>,
        wallet: Option<Address>,
    ) -> Result<Vec<Address>, WalletError> {
        let mut resolved = Vec::with_capacity(references.len());
        for reference in references {
            resolved.push(self.resolve(reference, user, wallet).await?);
        }
        Ok(resolved)
    }

    /// 代币小数位：默认列表 → 用户跟踪列表 → 链上 decimals()
    pub async fn token_decimals(
        &self,
        address: Address,
        user: Option<&UserHash>,
    ) -> Result<u32, WalletError> {
        if address == self.config.wrapped_native_address {
            return Ok(18);
        }

        if let Some(descriptor) = self.descriptor_for(address, user).await? {
            return Ok(descriptor.decimals);
        }

        erc20::decimals(self.rpc.as_ref(), address)
            .await
            .map_err(WalletError::from_chain)
    }

    /// 按地址取描述符（默认列表优先，其次用户跟踪列表）
    pub async fn descriptor_for(
        &self,
        address: Address,
        user: Option<&UserHash>,
    ) -> Result<Option<TokenDescriptor>, WalletError> {
        let formatted = checksum(address);
        let defaults = self.default_tokens().await?;
        if let Some(token) = defaults
            .iter()
            .find(|t| t.address.eq_ignore_ascii_case(&formatted))
        {
            return Ok(Some(token.clone()));
        }

        if let Some(user) = user {
            let tracked = self.tracked_tokens(user).await?;
            if let Some(token) = tracked
                .iter()
                .find(|t| t.address.eq_ignore_ascii_case(&formatted))
            {
                return Ok(Some(token.clone()));
            }
        }
        Ok(None)
    }

    async fn default_tokens(&self) -> Result<Vec<TokenDescriptor>, WalletError> {
        with_backoff(&self.config.storage_retry, "token.defaults", || {
            self.tokens.default_tokens(self.config.chain_id)
        })
        .await
        .map_err(WalletError::storage)
    }

    async fn tracked_tokens(&self, user: &UserHash) -> Result<Vec<TokenDescriptor>, WalletError> {
        with_backoff(&self.config.storage_retry, "token.tracked", || {
            self.tokens.tracked_tokens(user, self.config.chain_id)
        })
        .await
        .map_err(WalletError::storage)
    }

    /// 陈旧迁移清理：默认列表胜出后，同符号不同地址的跟踪条目一律移除。
    /// 清理失败只记日志——解析结果不受影响
    async fn cleanup_stale_tracked(&self, user: &UserHash, authoritative: &TokenDescriptor) {
        let tracked = match self.tracked_tokens(user).await {
            Ok(list) => list,
            Err(err) => {
                tracing::warn!(user = %user, error = %err, "Stale token cleanup skipped");
                return;
            }
        };

        let symbol_norm = normalize_token_reference(&authoritative.symbol);
        for token in tracked {
            if normalize_token_reference(&token.symbol) == symbol_norm
                && !token.address.eq_ignore_ascii_case(&authoritative.address)
            {
                tracing::info!(
                    user = %user,
                    symbol = %token.symbol,
                    stale = %token.address,
                    canonical = %authoritative.address,
                    "Removing stale tracked token superseded by default list"
                );
                if let Err(err) = self
                    .tokens
                    .untrack_token(user, &token.address, token.chain_id)
                    .await
                {
                    tracing::warn!(user = %user, error = %err, "Failed to untrack stale token");
                }
            }
        }
    }

    /// 多条同符号跟踪条目：取链上余额最大者，平手取先匹配者
    async fn pick_by_balance(
        &self,
        candidates: &[&TokenDescriptor],
        wallet: Option<Address>,
    ) -> Result<Address, WalletError> {
        let Some(wallet) = wallet else {
            // 没有钱包上下文时无从比较余额，保持先匹配者
            return parse_address(&candidates[0].address);
        };

        let mut best: Option<(Address, U256)> = None;
        for candidate in candidates {
            let address = parse_address(&candidate.address)?;
            let balance = erc20::balance_of(self.rpc.as_ref(), address, wallet)
                .await
                .unwrap_or_else(|err| {
                    tracing::warn!(
                        token = %candidate.address,
                        error = %err,
                        "Balance lookup failed during disambiguation, treating as zero"
                    );
                    U256::zero()
                });
            // 严格大于才替换：平手保持先匹配者
            let better = match &best {
                Some((_, best_balance)) => balance > *best_balance,
                None => true,
            };
            if better {
                best = Some((address, balance));
            }
        }

        best.map(|(address, _)| address)
            .ok_or_else(|| WalletError::Validation("no candidates to disambiguate".into()))
    }

    /// 相似度排序的模糊候选，余额仅作二级排序键
    async fn suggestions(
        &self,
        reference: &str,
        user: Option<&UserHash>,
        wallet: Option<Address>,
    ) -> Vec<TokenSuggestion> {
        let mut candidates: Vec<TokenDescriptor> =
            self.default_tokens().await.unwrap_or_default();
        if let Some(user) = user {
            let tracked = self.tracked_tokens(user).await.unwrap_or_default();
            for token in tracked {
                if !candidates
                    .iter()
                    .any(|t| t.address.eq_ignore_ascii_case(&token.address))
                {
                    candidates.push(token);
                }
            }
        }

        let mut scored: Vec<(f64, TokenDescriptor)> = candidates
            .into_iter()
            .filter_map(|token| {
                let score = similarity(reference, &token.symbol)
                    .max(similarity(reference, &token.name));
                (score >= SUGGESTION_THRESHOLD).then_some((score, token))
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(SUGGESTION_BALANCE_POOL);

        // 余额作为二级排序键（仅在有钱包上下文时并发查询）
        let lookups = scored.into_iter().map(|(score, token)| async move {
            let balance = match wallet {
                Some(wallet) => match parse_address(&token.address) {
                    Ok(address) => erc20::balance_of(self.rpc.as_ref(), address, wallet)
                        .await
                        .unwrap_or_default(),
                    Err(_) => U256::zero(),
                },
                None => U256::zero(),
            };
            (score, balance, token)
        });
        let mut with_balance: Vec<(f64, U256, TokenDescriptor)> =
            futures::future::join_all(lookups).await;

        with_balance.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.1.cmp(&a.1))
        });
        with_balance.truncate(SUGGESTION_LIMIT);
        with_balance
            .into_iter()
            .map(|(_, _, token)| TokenSuggestion::from(&token))
            .collect()
    }
}

/// 符号或名称是否匹配归一化引用
fn matches_reference(token: &TokenDescriptor, normalized: &str) -> bool {
    normalize_token_reference(&token.symbol) == normalized
        || normalize_token_reference(&token.name) == normalized
}

fn find_by_reference<'a>(
    tokens: &'a [TokenDescriptor],
    normalized: &str,
) -> Option<&'a TokenDescriptor> {
    tokens.iter().find(|t| matches_reference(t, normalized))
}
