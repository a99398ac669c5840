//! 参数处理服务
//! 按方法描述符的规则把人类输入转换为合约调用参数：
//! 金额换算、默认值注入、时间戳窗口、代币路径整体解析

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use ethers::abi::{ParamType, Token};
use ethers::types::{Address, U256};
use serde_json::Value;

use crate::config::Config;
use crate::domain::method::{AppDescriptor, MethodDescriptor, ParamDefault, ParamRule};
use crate::domain::user::UserHash;
use crate::error::WalletError;
use crate::service::token_resolver::TokenResolver;
use crate::utils::numeric::to_raw_amount;

/// 处理结果值
///
/// `OwnWalletAddress` 哨兵在此保留，由知道钱包的流水线最终解析
#[derive(Debug, Clone)]
pub enum ProcessedValue {
    Token(Token),
    OwnWalletAddress,
}

/// 参数处理服务
pub struct ParameterProcessor {
    config: Arc<Config>,
    resolver: Arc<TokenResolver>,
}

impl ParameterProcessor {
    pub fn new(config: Arc<Config>, resolver: Arc<TokenResolver>) -> Self {
        Self { config, resolver }
    }

    /// 处理原始参数
    ///
    /// 路径类参数先作为整体经 TokenResolver 解析（金额换算的
    /// decimals 查找依赖已解析的路径），之后逐参数应用规则；
    /// 未声明规则的参数按 ABI 类型做宽松转换。
    /// 处理后每个方法输入必须在结果中出现，否则 MissingParameter
    pub async fn process(
        &self,
        app: &AppDescriptor,
        method: &MethodDescriptor,
        raw: &serde_json::Map<String, Value>,
        user: Option<&UserHash>,
        wallet: Option<Address>,
    ) -> Result<BTreeMap<String, ProcessedValue>, WalletError> {
        let mut processed: BTreeMap<String, ProcessedValue> = BTreeMap::new();

        // ---- 先解析路径类参数 ----
        let mut resolved_paths: HashMap<String, Vec<Address>> = HashMap::new();
        for (name, value) in raw {
            if matches!(app.rule_for(name), Some(ParamRule::TokenPath)) {
                let references = path_references(name, value)?;
                let addresses = self.resolver.resolve_path(&references, user, wallet).await?;
                processed.insert(
                    name.clone(),
                    ProcessedValue::Token(Token::Array(
                        addresses.iter().copied().map(Token::Address).collect(),
                    )),
                );
                resolved_paths.insert(name.clone(), addresses);
            }
        }

        // ---- 逐参数应用规则 ----
        for (name, value) in raw {
            if processed.contains_key(name) {
                continue;
            }
            let token = match app.rule_for(name) {
                Some(ParamRule::TokenAmount {
                    convert_from_human,
                    decimals_source,
                }) => {
                    if *convert_from_human {
                        let decimals = match decimals_source {
                            Some(source) => {
                                self.decimals_for_source(source, raw, &resolved_paths, user, wallet)
                                    .await?
                            }
                            None => 18,
                        };
                        let human = value_as_string(name, value)?;
                        Token::Uint(to_raw_amount(&human, decimals)?)
                    } else {
                        Token::Uint(parse_uint(name, value)?)
                    }
                }
                Some(ParamRule::Timestamp { .. }) => Token::Uint(parse_uint(name, value)?),
                Some(ParamRule::Address { .. }) => {
                    let text = value_as_string(name, value)?;
                    Token::Address(crate::utils::address::parse_address(&text)?)
                }
                Some(ParamRule::Token) => {
                    let text = value_as_string(name, value)?;
                    Token::Address(self.resolver.resolve(&text, user, wallet).await?)
                }
                Some(ParamRule::TokenPath) => unreachable!("handled above"),
                Some(ParamRule::Raw { .. }) | None => {
                    match abi_param_type(app, method, name) {
                        Some(kind) => coerce_json_to_token(name, value, &kind)?,
                        None => coerce_loose(name, value)?,
                    }
                }
            };
            processed.insert(name.clone(), ProcessedValue::Token(token));
        }

        // ---- 缺省参数注入默认值 ----
        for name in &method.inputs {
            if processed.contains_key(name) {
                continue;
            }
            match app.rule_for(name) {
                Some(ParamRule::Timestamp { window }) => {
                    let window = window.unwrap_or(self.config.deadline_window);
                    let deadline =
                        chrono::Utc::now().timestamp() as u64 + window.as_secs();
                    processed.insert(
                        name.clone(),
                        ProcessedValue::Token(Token::Uint(U256::from(deadline))),
                    );
                }
                Some(ParamRule::Address {
                    default: Some(ParamDefault::OwnWalletAddress),
                }) => {
                    processed.insert(name.clone(), ProcessedValue::OwnWalletAddress);
                }
                Some(ParamRule::Address {
                    default: Some(ParamDefault::Value(value)),
                }) => {
                    let text = value_as_string(name, value)?;
                    processed.insert(
                        name.clone(),
                        ProcessedValue::Token(Token::Address(
                            crate::utils::address::parse_address(&text)?,
                        )),
                    );
                }
                Some(ParamRule::Raw {
                    default: Some(value),
                }) => {
                    let token = match abi_param_type(app, method, name) {
                        Some(kind) => coerce_json_to_token(name, value, &kind)?,
                        None => coerce_loose(name, value)?,
                    };
                    processed.insert(name.clone(), ProcessedValue::Token(token));
                }
                _ => {}
            }
        }

        // ---- 完整性检查 ----
        for name in &method.inputs {
            if !processed.contains_key(name) {
                return Err(WalletError::MissingParameter(name.clone()));
            }
        }

        Ok(processed)
    }

    /// decimals 来源解析：`path[0]`/`path[-1]` 引用、参数名引用、或字面代币引用
    async fn decimals_for_source(
        &self,
        source: &str,
        raw: &serde_json::Map<String, Value>,
        resolved_paths: &HashMap<String, Vec<Address>>,
        user: Option<&UserHash>,
        wallet: Option<Address>,
    ) -> Result<u32, WalletError> {
        if let Some((param, position)) = parse_indexed_reference(source) {
            let path = resolved_paths.get(param).ok_or_else(|| {
                WalletError::Validation(format!(
                    "decimals source {} refers to unresolved path {}",
                    source, param
                ))
            })?;
            let address = match position {
                PathPosition::First => path.first(),
                PathPosition::Last => path.last(),
            }
            .ok_or_else(|| WalletError::Validation(format!("empty path for {}", source)))?;
            return self.resolver.token_decimals(*address, user).await;
        }

        // 参数名引用：decimals 取自另一个参数携带的代币引用
        let reference = match raw.get(source) {
            Some(value) => value_as_string(source, value)?,
            None => source.to_string(), // 字面代币引用
        };

        if self.config.is_native_alias(&reference) {
            return Ok(18);
        }
        let address = self.resolver.resolve(&reference, user, wallet).await?;
        self.resolver.token_decimals(address, user).await
    }
}

/// 解析好的参数表转为按输入列表排序的调用实参
///
/// 哨兵必须已被解析；任何缺失输入都报 MissingParameter
pub fn ordered_args(
    method: &MethodDescriptor,
    processed: &BTreeMap<String, Token>,
) -> Result<Vec<Token>, WalletError> {
    method
        .inputs
        .iter()
        .map(|name| {
            processed
                .get(name)
                .cloned()
                .ok_or_else(|| WalletError::MissingParameter(name.clone()))
        })
        .collect()
}

/// 把处理结果中的哨兵解析为具体钱包地址
pub fn resolve_sentinels(
    processed: BTreeMap<String, ProcessedValue>,
    wallet: Address,
) -> BTreeMap<String, Token> {
    processed
        .into_iter()
        .map(|(name, value)| {
            let token = match value {
                ProcessedValue::Token(token) => token,
                ProcessedValue::OwnWalletAddress => Token::Address(wallet),
            };
            (name, token)
        })
        .collect()
}

enum PathPosition {
    First,
    Last,
}

/// 解析 `name[0]` / `name[-1]` 形式的引用
fn parse_indexed_reference(source: &str) -> Option<(&str, PathPosition)> {
    let open = source.find('[')?;
    if !source.ends_with(']') {
        return None;
    }
    let param = &source[..open];
    match &source[open + 1..source.len() - 1] {
        "0" => Some((param, PathPosition::First)),
        "-1" => Some((param, PathPosition::Last)),
        _ => None,
    }
}

fn path_references(name: &str, value: &Value) -> Result<Vec<String>, WalletError> {
    let Value::Array(items) = value else {
        return Err(WalletError::Validation(format!(
            "Parameter {} must be a list of token references",
            name
        )));
    };
    items
        .iter()
        .map(|item| value_as_string(name, item))
        .collect()
}

fn value_as_string(name: &str, value: &Value) -> Result<String, WalletError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(WalletError::Validation(format!(
            "Parameter {} has unsupported value: {}",
            name, other
        ))),
    }
}

fn parse_uint(name: &str, value: &Value) -> Result<U256, WalletError> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| WalletError::Validation(format!("Parameter {} must be a non-negative integer", name))),
        Value::String(s) => {
            let trimmed = s.trim();
            let parsed = if let Some(hex_digits) = trimmed.strip_prefix("0x") {
                U256::from_str_radix(hex_digits, 16).ok()
            } else {
                U256::from_dec_str(trimmed).ok()
            };
            parsed.ok_or_else(|| {
                WalletError::Validation(format!("Parameter {} is not a valid integer: {}", name, s))
            })
        }
        other => Err(WalletError::Validation(format!(
            "Parameter {} must be an integer, got {}",
            name, other
        ))),
    }
}

/// 查方法在ABI中对应位置的参数类型
fn abi_param_type(
    app: &AppDescriptor,
    method: &MethodDescriptor,
    name: &str,
) -> Option<ParamType> {
    let position = method.inputs.iter().position(|input| input == name)?;
    let (_, contract) = app.contract_for(method).ok()?;
    let function = contract.abi.function(&method.name).ok()?;
    function.inputs.get(position).map(|p| p.kind.clone())
}

/// 按ABI类型转换JSON值
fn coerce_json_to_token(name: &str, value: &Value, kind: &ParamType) -> Result<Token, WalletError> {
    match kind {
        ParamType::Uint(_) => Ok(Token::Uint(parse_uint(name, value)?)),
        ParamType::Int(_) => Ok(Token::Int(parse_uint(name, value)?)),
        ParamType::Address => {
            let text = value_as_string(name, value)?;
            Ok(Token::Address(crate::utils::address::parse_address(&text)?))
        }
        ParamType::Bool => match value {
            Value::Bool(b) => Ok(Token::Bool(*b)),
            other => Err(WalletError::Validation(format!(
                "Parameter {} must be a boolean, got {}",
                name, other
            ))),
        },
        ParamType::String => Ok(Token::String(value_as_string(name, value)?)),
        ParamType::Bytes => {
            let text = value_as_string(name, value)?;
            let bytes = hex::decode(text.trim_start_matches("0x"))
                .map_err(|_| WalletError::Validation(format!("Parameter {} must be hex bytes", name)))?;
            Ok(Token::Bytes(bytes))
        }
        ParamType::Array(inner) => {
            let Value::Array(items) = value else {
                return Err(WalletError::Validation(format!(
                    "Parameter {} must be an array",
                    name
                )));
            };
            let tokens = items
                .iter()
                .map(|item| coerce_json_to_token(name, item, inner))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Token::Array(tokens))
        }
        other => Err(WalletError::Validation(format!(
            "Unsupported ABI parameter type for {}: {}",
            name, other
        ))),
    }
}

/// 无ABI类型信息时的宽松转换（如 value_wei 这类非合约参数）
fn coerce_loose(name: &str, value: &Value) -> Result<Token, WalletError> {
    match value {
        Value::Number(_) => Ok(Token::Uint(parse_uint(name, value)?)),
        Value::String(s) => {
            let trimmed = s.trim();
            if crate::utils::address::is_address(trimmed) {
                Ok(Token::Address(crate::utils::address::parse_address(trimmed)?))
            } else if trimmed.chars().all(|c| c.is_ascii_digit()) && !trimmed.is_empty() {
                Ok(Token::Uint(parse_uint(name, value)?))
            } else {
                Ok(Token::String(s.clone()))
            }
        }
        Value::Bool(b) => Ok(Token::Bool(*b)),
        other => Err(WalletError::Validation(format!(
            "Parameter {} has unsupported value: {}",
            name, other
        ))),
    }
}
