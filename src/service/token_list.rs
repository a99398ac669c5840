//! 默认代币列表加载
//! 从远端 token-list JSON 拉取权威默认列表并写入存储，
//! 畸形条目跳过并告警

use std::sync::Arc;

use serde::Deserialize;

use crate::config::Config;
use crate::domain::token::TokenDescriptor;
use crate::error::WalletError;
use crate::repository::TokenRepository;
use crate::utils::address::is_address;

/// token-list 标准格式
#[derive(Deserialize)]
struct TokenList {
    #[serde(default)]
    tokens: Vec<TokenListEntry>,
}

#[derive(Deserialize)]
struct TokenListEntry {
    address: String,
    symbol: String,
    name: String,
    decimals: u32,
    #[serde(rename = "chainId")]
    chain_id: u64,
}

/// 默认代币列表加载器
pub struct TokenListLoader {
    config: Arc<Config>,
    tokens: Arc<dyn TokenRepository>,
}

impl TokenListLoader {
    pub fn new(config: Arc<Config>, tokens: Arc<dyn TokenRepository>) -> Self {
        Self { config, tokens }
    }

    /// 拉取并写入当前链的默认列表，返回写入条目数
    pub async fn load(&self) -> Result<usize, WalletError> {
        let url = &self.config.default_token_list_url;
        let response = reqwest::get(url)
            .await
            .map_err(|e| WalletError::Config(format!("Failed to fetch token list: {}", e)))?
            .error_for_status()
            .map_err(|e| WalletError::Config(format!("Token list fetch rejected: {}", e)))?;

        let list: TokenList = response
            .json()
            .await
            .map_err(|e| WalletError::Config(format!("Invalid token list JSON: {}", e)))?;

        let mut loaded = 0usize;
        for entry in list.tokens {
            if entry.chain_id != self.config.chain_id {
                continue;
            }
            if !is_address(&entry.address) || entry.symbol.is_empty() {
                tracing::warn!(
                    address = %entry.address,
                    symbol = %entry.symbol,
                    "Skipping malformed token list entry"
                );
                continue;
            }
            let descriptor = TokenDescriptor {
                address: entry.address,
                symbol: entry.symbol,
                name: entry.name,
                decimals: entry.decimals,
                chain_id: entry.chain_id,
            };
            if let Err(err) = self.tokens.upsert_default_token(&descriptor).await {
                tracing::warn!(
                    symbol = %descriptor.symbol,
                    error = %err,
                    "Failed to upsert token list entry"
                );
                continue;
            }
            loaded += 1;
        }

        tracing::info!(url = %url, loaded, "Default token list loaded");
        Ok(loaded)
    }
}
