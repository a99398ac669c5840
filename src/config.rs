//! 配置管理模块
//! 从环境变量加载核心引擎的全部可调参数

use std::time::Duration;

use anyhow::{Context, Result};
use ethers::types::{Address, U256};

/// 核心引擎配置
#[derive(Debug, Clone)]
pub struct Config {
    /// 进程级加密根密钥（非用户输入），参与所有密钥派生
    pub encryption_secret: String,
    /// 链ID（默认 56，BSC 主网）
    pub chain_id: u64,
    /// 原生资产别名（路径/引用中出现时替换为 wrapped 地址）
    pub native_aliases: Vec<String>,
    /// wrapped 原生资产合约地址
    pub wrapped_native_address: Address,
    /// 交换路由中枢代币地址（无直接池时经由它路由）
    pub hub_token_address: Address,
    /// DEX 路由合约地址
    pub router_address: Address,
    pub pin: PinConfig,
    pub gas: GasConfig,
    pub storage_retry: StorageRetryConfig,
    pub swap: SwapConfig,
    /// 参数处理中 timestamp 默认值的未来窗口
    pub deadline_window: Duration,
    /// 默认代币列表地址（token-list JSON）
    pub default_token_list_url: String,
    /// 钱包派生路径模板，`{}` 位置填派生索引
    pub derivation_path_template: String,
}

/// PIN 会话与清扫配置
#[derive(Debug, Clone)]
pub struct PinConfig {
    /// 会话缓存TTL（默认30分钟）
    pub session_ttl: Duration,
    /// 后台清扫周期（默认5分钟）
    pub sweep_interval: Duration,
}

/// Gas 估算降级配置
#[derive(Debug, Clone)]
pub struct GasConfig {
    /// 估算失败时的保守gas上限
    pub fallback_gas_limit: U256,
    /// gas价格查询失败时的保守价格（wei）
    pub fallback_gas_price: U256,
    /// 回执轮询次数上限
    pub receipt_poll_attempts: u32,
    /// 回执轮询间隔
    pub receipt_poll_interval: Duration,
}

/// 存储层退避重试配置（仅针对 resource busy 类瞬时错误）
#[derive(Debug, Clone)]
pub struct StorageRetryConfig {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

/// 交换配置
#[derive(Debug, Clone)]
pub struct SwapConfig {
    /// 成交后费用份额（基点），从产出中扣除
    pub fee_bps: u32,
    /// 费用归集地址（未配置则跳过费用转发）
    pub fee_collector: Option<Address>,
    /// 默认滑点容忍（基点）
    pub default_slippage_bps: u32,
}

impl Config {
    /// 从环境变量加载配置
    ///
    /// 必需变量：`ENCRYPTION_SECRET`、`WRAPPED_NATIVE_ADDRESS`、
    /// `HUB_TOKEN_ADDRESS`、`DEX_ROUTER_ADDRESS`；其余均有默认值
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let encryption_secret =
            std::env::var("ENCRYPTION_SECRET").context("ENCRYPTION_SECRET not set")?;
        if encryption_secret.len() < 16 {
            anyhow::bail!("ENCRYPTION_SECRET too short (min 16 chars)");
        }

        let wrapped_native_address = parse_address_env("WRAPPED_NATIVE_ADDRESS")?;
        let hub_token_address = parse_address_env("HUB_TOKEN_ADDRESS")?;
        let router_address = parse_address_env("DEX_ROUTER_ADDRESS")?;

        let native_aliases = std::env::var("NATIVE_ALIASES")
            .unwrap_or_else(|_| "BNB,ETH".into())
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();

        let fee_collector = match std::env::var("SWAP_FEE_COLLECTOR") {
            Ok(v) if !v.trim().is_empty() => Some(
                v.trim()
                    .parse::<Address>()
                    .context("Invalid SWAP_FEE_COLLECTOR address")?,
            ),
            _ => None,
        };

        Ok(Self {
            encryption_secret,
            chain_id: env_u64("CHAIN_ID", 56),
            native_aliases,
            wrapped_native_address,
            hub_token_address,
            router_address,
            pin: PinConfig {
                session_ttl: Duration::from_secs(env_u64("PIN_SESSION_TTL_SECS", 1800)),
                sweep_interval: Duration::from_secs(env_u64("PIN_SWEEP_INTERVAL_SECS", 300)),
            },
            gas: GasConfig {
                fallback_gas_limit: U256::from(env_u64("FALLBACK_GAS_LIMIT", 250_000)),
                fallback_gas_price: U256::from(env_u64("FALLBACK_GAS_PRICE_WEI", 5_000_000_000)),
                receipt_poll_attempts: env_u64("RECEIPT_POLL_ATTEMPTS", 20) as u32,
                receipt_poll_interval: Duration::from_secs(env_u64(
                    "RECEIPT_POLL_INTERVAL_SECS",
                    5,
                )),
            },
            storage_retry: StorageRetryConfig {
                max_attempts: env_u64("STORAGE_RETRY_MAX_ATTEMPTS", 5) as u32,
                initial_backoff: Duration::from_millis(env_u64(
                    "STORAGE_RETRY_INITIAL_BACKOFF_MS",
                    100,
                )),
            },
            swap: SwapConfig {
                fee_bps: env_u64("SWAP_FEE_BPS", 0) as u32,
                fee_collector,
                default_slippage_bps: env_u64("SWAP_DEFAULT_SLIPPAGE_BPS", 100) as u32,
            },
            deadline_window: Duration::from_secs(env_u64("TX_DEADLINE_WINDOW_SECS", 300)),
            default_token_list_url: std::env::var("DEFAULT_TOKEN_LIST").unwrap_or_else(|_| {
                "https://tokens.pancakeswap.finance/pancakeswap-extended.json".into()
            }),
            derivation_path_template: std::env::var("ACCOUNT_PATH_TEMPLATE")
                .unwrap_or_else(|_| "m/44'/60'/0'/0/{}".into()),
        })
    }

    /// 按模板构造指定索引的派生路径
    pub fn derivation_path(&self, index: u32) -> String {
        self.derivation_path_template
            .replace("{}", &index.to_string())
    }

    /// 判断引用是否为原生资产别名（大小写不敏感）
    pub fn is_native_alias(&self, reference: &str) -> bool {
        let upper = reference.trim().to_uppercase();
        self.native_aliases.iter().any(|a| a == &upper)
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_address_env(name: &str) -> Result<Address> {
    std::env::var(name)
        .with_context(|| format!("{} not set", name))?
        .trim()
        .parse::<Address>()
        .with_context(|| format!("Invalid address in {}", name))
}

/// 测试用配置（不读环境变量），供各模块单元测试复用
#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[test]
    fn test_derivation_path_template() {
        let config = test_config();
        assert_eq!(config.derivation_path(0), "m/44'/60'/0'/0/0");
        assert_eq!(config.derivation_path(7), "m/44'/60'/0'/0/7");
    }

    #[test]
    fn test_native_alias_case_insensitive() {
        let config = test_config();
        assert!(config.is_native_alias("bnb"));
        assert!(config.is_native_alias("ETH"));
        assert!(!config.is_native_alias("CZUSD"));
    }

    /// 测试用配置（不读环境变量）
    pub(crate) fn test_config() -> Config {
        Config {
            encryption_secret: "unit-test-secret-0123456789abcdef".into(),
            chain_id: 56,
            native_aliases: vec!["BNB".into(), "ETH".into()],
            wrapped_native_address: "0xbb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c"
                .parse()
                .unwrap(),
            hub_token_address: "0xE68b79e51bf826534Ff37AA9CeE71a3842ee9c70"
                .parse()
                .unwrap(),
            router_address: "0xd77C2afeBf3dC665af07588BF798bd938968c72E"
                .parse()
                .unwrap(),
            pin: PinConfig {
                session_ttl: Duration::from_secs(1800),
                sweep_interval: Duration::from_secs(300),
            },
            gas: GasConfig {
                fallback_gas_limit: U256::from(250_000u64),
                fallback_gas_price: U256::from(5_000_000_000u64),
                receipt_poll_attempts: 20,
                receipt_poll_interval: Duration::from_millis(10),
            },
            storage_retry: StorageRetryConfig {
                max_attempts: 5,
                initial_backoff: Duration::from_millis(1),
            },
            swap: SwapConfig {
                fee_bps: 30,
                fee_collector: Some(
                    "0x000000000000000000000000000000000000dEaD"
                        .parse()
                        .unwrap(),
                ),
                default_slippage_bps: 100,
            },
            deadline_window: Duration::from_secs(300),
            default_token_list_url: "http://localhost/tokens.json".into(),
            derivation_path_template: "m/44'/60'/0'/0/{}".into(),
        }
    }
}
