//! 测试辅助模块
//! 可编程的链RPC mock、测试配置与服务装配

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::abi::{Abi, Token};
use ethers::types::{
    transaction::eip2718::TypedTransaction, Address, Bytes, NameOrAddress, TransactionReceipt,
    H256, U256, U64,
};
use once_cell::sync::Lazy;
use tokio::sync::Mutex;

use tidecore::chain::{erc20, ChainRpc};
use tidecore::config::{Config, GasConfig, PinConfig, StorageRetryConfig, SwapConfig};
use tidecore::domain::token::TokenDescriptor;
use tidecore::repository::memory::MemoryStorage;
use tidecore::{AppState, StorageHandles};

pub const WRAPPED_NATIVE: &str = "0xbb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c";
pub const HUB_TOKEN: &str = "0xE68b79e51bf826534Ff37AA9CeE71a3842ee9c70";
pub const ROUTER: &str = "0xd77C2afeBf3dC665af07588BF798bd938968c72E";
pub const FEE_COLLECTOR: &str = "0x000000000000000000000000000000000000dEaD";

static ROUTER_ABI: Lazy<Abi> = Lazy::new(|| {
    ethers::abi::parse_abi(&[
        "function getAmountsOut(uint256 amountIn, address[] path) view returns (uint256[] amounts)",
    ])
    .expect("valid abi")
});

/// 测试配置（不读环境变量；轮询/退避间隔压到毫秒级）
pub fn test_config() -> Config {
    Config {
        encryption_secret: "integration-test-secret-0123456789".into(),
        chain_id: 56,
        native_aliases: vec!["BNB".into(), "ETH".into()],
        wrapped_native_address: WRAPPED_NATIVE.parse().unwrap(),
        hub_token_address: HUB_TOKEN.parse().unwrap(),
        router_address: ROUTER.parse().unwrap(),
        pin: PinConfig {
            session_ttl: Duration::from_secs(1800),
            sweep_interval: Duration::from_secs(300),
        },
        gas: GasConfig {
            fallback_gas_limit: U256::from(250_000u64),
            fallback_gas_price: U256::from(5_000_000_000u64),
            receipt_poll_attempts: 3,
            receipt_poll_interval: Duration::from_millis(1),
        },
        storage_retry: StorageRetryConfig {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
        },
        swap: SwapConfig {
            fee_bps: 30,
            fee_collector: Some(FEE_COLLECTOR.parse().unwrap()),
            default_slippage_bps: 100,
        },
        deadline_window: Duration::from_secs(300),
        default_token_list_url: "http://localhost/tokens.json".into(),
        derivation_path_template: "m/44'/60'/0'/0/{}".into(),
    }
}

/// 可编程链RPC mock
///
/// 理解 ERC20 读调用与路由询价，记录每笔广播的原始交易
pub struct MockChain {
    pub native_balances: Mutex<HashMap<Address, U256>>,
    /// (token, owner) → 余额
    pub token_balances: Mutex<HashMap<(Address, Address), U256>>,
    /// (token, owner, spender) → 额度
    pub allowances: Mutex<HashMap<(Address, Address, Address), U256>>,
    pub token_decimals: Mutex<HashMap<Address, u32>>,
    /// token → (symbol, name)
    pub token_metadata: Mutex<HashMap<Address, (String, String)>>,
    pub gas_price: U256,
    pub gas_estimate: U256,
    pub fail_gas_estimate: AtomicBool,
    pub receipt_success: AtomicBool,
    /// 询价每跳产出倍率
    pub amounts_out_factor: u64,
    pub block_timestamp: u64,
    pub nonce: AtomicU64,
    pub sent_transactions: Mutex<Vec<Bytes>>,
}

impl Default for MockChain {
    fn default() -> Self {
        Self {
            native_balances: Mutex::new(HashMap::new()),
            token_balances: Mutex::new(HashMap::new()),
            allowances: Mutex::new(HashMap::new()),
            token_decimals: Mutex::new(HashMap::new()),
            token_metadata: Mutex::new(HashMap::new()),
            gas_price: U256::from(5_000_000_000u64),
            gas_estimate: U256::from(21_000u64),
            fail_gas_estimate: AtomicBool::new(false),
            receipt_success: AtomicBool::new(true),
            amounts_out_factor: 2,
            block_timestamp: 1_700_000_000,
            nonce: AtomicU64::new(0),
            sent_transactions: Mutex::new(Vec::new()),
        }
    }
}

impl MockChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn set_native_balance(&self, owner: Address, balance: U256) {
        self.native_balances.lock().await.insert(owner, balance);
    }

    pub async fn set_token_balance(&self, token: Address, owner: Address, balance: U256) {
        self.token_balances
            .lock()
            .await
            .insert((token, owner), balance);
    }

    pub async fn set_allowance(&self, token: Address, owner: Address, spender: Address, value: U256) {
        self.allowances
            .lock()
            .await
            .insert((token, owner, spender), value);
    }

    pub async fn set_token_metadata(
        &self,
        token: Address,
        symbol: &str,
        name: &str,
        decimals: u32,
    ) {
        self.token_metadata
            .lock()
            .await
            .insert(token, (symbol.to_string(), name.to_string()));
        self.token_decimals.lock().await.insert(token, decimals);
    }

    pub async fn sent_count(&self) -> usize {
        self.sent_transactions.lock().await.len()
    }

    fn selector(function: &str) -> [u8; 4] {
        erc20::abi()
            .function(function)
            .expect("erc20 abi")
            .short_signature()
    }
}

#[async_trait]
impl ChainRpc for MockChain {
    async fn get_balance(&self, address: Address) -> Result<U256> {
        Ok(self
            .native_balances
            .lock()
            .await
            .get(&address)
            .copied()
            .unwrap_or_default())
    }

    async fn get_transaction_count(&self, _address: Address) -> Result<U256> {
        Ok(U256::from(self.nonce.load(Ordering::SeqCst)))
    }

    async fn gas_price(&self) -> Result<U256> {
        Ok(self.gas_price)
    }

    async fn estimate_gas(&self, _tx: &TypedTransaction) -> Result<U256> {
        if self.fail_gas_estimate.load(Ordering::SeqCst) {
            return Err(anyhow!("execution reverted: estimation failed"));
        }
        Ok(self.gas_estimate)
    }

    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes> {
        let to = match tx.to() {
            Some(NameOrAddress::Address(address)) => *address,
            _ => return Err(anyhow!("call without target")),
        };
        let data = tx.data().cloned().unwrap_or_default();
        if data.len() < 4 {
            return Err(anyhow!("calldata too short"));
        }
        let selector: [u8; 4] = data[..4].try_into().expect("length checked");
        let payload = &data[4..];

        if selector == Self::selector("balanceOf") {
            let inputs = erc20::abi().function("balanceOf")?.decode_input(payload)?;
            let Some(Token::Address(owner)) = inputs.first() else {
                return Err(anyhow!("bad balanceOf input"));
            };
            let balance = self
                .token_balances
                .lock()
                .await
                .get(&(to, *owner))
                .copied()
                .unwrap_or_default();
            return Ok(ethers::abi::encode(&[Token::Uint(balance)]).into());
        }

        if selector == Self::selector("allowance") {
            let inputs = erc20::abi().function("allowance")?.decode_input(payload)?;
            let (Some(Token::Address(owner)), Some(Token::Address(spender))) =
                (inputs.first(), inputs.get(1))
            else {
                return Err(anyhow!("bad allowance input"));
            };
            let value = self
                .allowances
                .lock()
                .await
                .get(&(to, *owner, *spender))
                .copied()
                .unwrap_or_default();
            return Ok(ethers::abi::encode(&[Token::Uint(value)]).into());
        }

        if selector == Self::selector("decimals") {
            let decimals = self
                .token_decimals
                .lock()
                .await
                .get(&to)
                .copied()
                .unwrap_or(18);
            return Ok(ethers::abi::encode(&[Token::Uint(U256::from(decimals))]).into());
        }

        if selector == Self::selector("symbol") {
            let symbol = self
                .token_metadata
                .lock()
                .await
                .get(&to)
                .map(|(s, _)| s.clone())
                .unwrap_or_else(|| "MOCK".into());
            return Ok(ethers::abi::encode(&[Token::String(symbol)]).into());
        }

        if selector == Self::selector("name") {
            let name = self
                .token_metadata
                .lock()
                .await
                .get(&to)
                .map(|(_, n)| n.clone())
                .unwrap_or_else(|| "Mock Token".into());
            return Ok(ethers::abi::encode(&[Token::String(name)]).into());
        }

        let quote_fn = ROUTER_ABI.function("getAmountsOut").expect("router abi");
        if selector == quote_fn.short_signature() {
            let inputs = quote_fn.decode_input(payload)?;
            let (Some(Token::Uint(amount_in)), Some(Token::Array(path))) =
                (inputs.first(), inputs.get(1))
            else {
                return Err(anyhow!("bad getAmountsOut input"));
            };
            let mut amounts = Vec::with_capacity(path.len());
            let mut current = *amount_in;
            amounts.push(Token::Uint(current));
            for _ in 1..path.len() {
                current = current * U256::from(self.amounts_out_factor);
                amounts.push(Token::Uint(current));
            }
            return Ok(ethers::abi::encode(&[Token::Array(amounts)]).into());
        }

        Err(anyhow!("execution reverted: unknown selector"))
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256> {
        let hash = H256::from(ethers::utils::keccak256(&raw));
        self.sent_transactions.lock().await.push(raw);
        self.nonce.fetch_add(1, Ordering::SeqCst);
        Ok(hash)
    }

    async fn get_transaction_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>> {
        let status = u64::from(self.receipt_success.load(Ordering::SeqCst));
        Ok(Some(TransactionReceipt {
            transaction_hash: hash,
            status: Some(U64::from(status)),
            block_number: Some(U64::from(7u64)),
            ..Default::default()
        }))
    }

    async fn get_block_timestamp(&self) -> Result<u64> {
        Ok(self.block_timestamp)
    }
}

/// 装配测试用 AppState（内存存储 + mock链）
pub fn create_test_state(chain: Arc<MockChain>) -> (Arc<AppState>, Arc<MemoryStorage>) {
    let storage = MemoryStorage::new();
    let state = AppState::new(
        Arc::new(test_config()),
        chain,
        StorageHandles::from_single(storage.clone()),
    );
    (Arc::new(state), storage)
}

/// 默认列表代币描述符
pub fn token(address: &str, symbol: &str, name: &str) -> TokenDescriptor {
    TokenDescriptor {
        address: address.into(),
        symbol: symbol.into(),
        name: name.into(),
        decimals: 18,
        chain_id: 56,
    }
}
