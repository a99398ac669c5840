//! ERC20 调用辅助
//! 在 ChainRpc 原语之上封装常用的代币读写调用编码

use anyhow::{anyhow, Result};
use ethers::abi::{Abi, Token};
use ethers::types::{transaction::eip2718::TypedTransaction, Address, TransactionRequest, U256};
use once_cell::sync::Lazy;

use crate::chain::ChainRpc;

/// 最小 ERC20 ABI（人类可读格式，进程内解析一次）
static ERC20_ABI: Lazy<Abi> = Lazy::new(|| {
    ethers::abi::parse_abi(&[
        "function balanceOf(address owner) view returns (uint256)",
        "function decimals() view returns (uint8)",
        "function symbol() view returns (string)",
        "function name() view returns (string)",
        "function allowance(address owner, address spender) view returns (uint256)",
        "function approve(address spender, uint256 amount) returns (bool)",
        "function transfer(address to, uint256 amount) returns (bool)",
    ])
    .expect("static erc20 abi is valid")
});

pub fn abi() -> &'static Abi {
    &ERC20_ABI
}

fn encode_call(function: &str, args: &[Token]) -> Result<Vec<u8>> {
    ERC20_ABI
        .function(function)?
        .encode_input(args)
        .map_err(|e| anyhow!("Failed to encode {}: {}", function, e))
}

fn view_tx(token: Address, data: Vec<u8>) -> TypedTransaction {
    TypedTransaction::Legacy(TransactionRequest::new().to(token).data(data))
}

/// 查询代币余额
pub async fn balance_of(rpc: &dyn ChainRpc, token: Address, owner: Address) -> Result<U256> {
    let data = encode_call("balanceOf", &[Token::Address(owner)])?;
    let output = rpc.call(&view_tx(token, data)).await?;
    decode_uint(&output, "balanceOf")
}

/// 查询授权额度
pub async fn allowance(
    rpc: &dyn ChainRpc,
    token: Address,
    owner: Address,
    spender: Address,
) -> Result<U256> {
    let data = encode_call("allowance", &[Token::Address(owner), Token::Address(spender)])?;
    let output = rpc.call(&view_tx(token, data)).await?;
    decode_uint(&output, "allowance")
}

/// 查询代币小数位
pub async fn decimals(rpc: &dyn ChainRpc, token: Address) -> Result<u32> {
    let data = encode_call("decimals", &[])?;
    let output = rpc.call(&view_tx(token, data)).await?;
    Ok(decode_uint(&output, "decimals")?.as_u32())
}

/// 查询代币符号
pub async fn symbol(rpc: &dyn ChainRpc, token: Address) -> Result<String> {
    let data = encode_call("symbol", &[])?;
    let output = rpc.call(&view_tx(token, data)).await?;
    decode_string(&output, "symbol")
}

/// 查询代币名称
pub async fn name(rpc: &dyn ChainRpc, token: Address) -> Result<String> {
    let data = encode_call("name", &[])?;
    let output = rpc.call(&view_tx(token, data)).await?;
    decode_string(&output, "name")
}

/// 编码 approve 调用数据
pub fn encode_approve(spender: Address, amount: U256) -> Result<Vec<u8>> {
    encode_call("approve", &[Token::Address(spender), Token::Uint(amount)])
}

/// 编码 transfer 调用数据
pub fn encode_transfer(to: Address, amount: U256) -> Result<Vec<u8>> {
    encode_call("transfer", &[Token::Address(to), Token::Uint(amount)])
}

fn decode_uint(output: &[u8], function: &str) -> Result<U256> {
    let tokens = ERC20_ABI.function(function)?.decode_output(output)?;
    match tokens.first() {
        Some(Token::Uint(value)) => Ok(*value),
        other => Err(anyhow!("Unexpected {} output: {:?}", function, other)),
    }
}

fn decode_string(output: &[u8], function: &str) -> Result<String> {
    let tokens = ERC20_ABI.function(function)?.decode_output(output)?;
    match tokens.into_iter().next() {
        Some(Token::String(value)) => Ok(value),
        other => Err(anyhow!("Unexpected {} output: {:?}", function, other)),
    }
}
