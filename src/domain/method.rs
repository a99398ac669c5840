//! 声明式方法描述符
//! 每个应用一份配置：合约（地址环境变量 + ABI）、可调用方法（view/write）
//! 与按参数名索引的处理规则。配置在加载时解析为强类型结构，
//! 未知的处理规则类型在加载时拒绝，而不是拖到调用时

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use ethers::abi::Abi;
use ethers::types::Address;
use serde::Deserialize;

use crate::error::WalletError;

/// 方法类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    /// 只读调用
    View,
    /// 状态变更调用
    Write,
}

/// 代币/金额配对：用于授权检查与人类可读摘要
///
/// `token` 与 `amount` 是参数引用（参数名或 `path[0]`/`path[-1]`）
#[derive(Debug, Clone, Deserialize)]
pub struct TokenAmountPair {
    pub token: String,
    pub amount: String,
    #[serde(default)]
    pub role: String,
}

/// 方法描述符
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    pub name: String,
    /// 合约调用的参数顺序
    pub inputs: Vec<String>,
    /// 所属合约名；应用只有一个合约时可省略
    pub contract: Option<String>,
    pub requires_token_approval: bool,
    pub token_amount_pairs: Vec<TokenAmountPair>,
}

/// 延后解析的默认值
///
/// `OwnWalletAddress` 是显式哨兵，由知道钱包的流水线解析，
/// 不做魔法字符串的相等比较
#[derive(Debug, Clone, PartialEq)]
pub enum ParamDefault {
    /// 当前活跃钱包自身地址
    OwnWalletAddress,
    /// 字面默认值
    Value(serde_json::Value),
}

/// 参数处理规则（加载时从配置解析，未知 `type` 直接报错）
#[derive(Debug, Clone)]
pub enum ParamRule {
    /// 代币金额：按 decimals 来源把人类可读金额换算为最小单位整数
    TokenAmount {
        convert_from_human: bool,
        /// decimals 来源：参数名、`path[0]`/`path[-1]` 或字面代币引用
        decimals_source: Option<String>,
    },
    /// 时间戳：未提供时取 now + window
    Timestamp { window: Option<Duration> },
    /// 地址，可带默认值
    Address { default: Option<ParamDefault> },
    /// 单个代币引用，经 TokenResolver 解析为地址
    Token,
    /// 代币引用列表，作为整体先于其他参数解析
    TokenPath,
    /// 不做处理，可带字面默认值
    Raw { default: Option<serde_json::Value> },
}

/// 合约配置
#[derive(Debug, Clone)]
pub struct ContractConfig {
    /// 存放合约地址的环境变量名
    pub address_env_var: String,
    /// 显式地址，优先于环境变量（嵌入方/测试注入）
    pub address_override: Option<String>,
    pub abi: Abi,
}

impl ContractConfig {
    /// 解析合约地址：显式注入优先，否则读环境变量
    pub fn resolve_address(&self) -> Result<Address, WalletError> {
        let raw = match &self.address_override {
            Some(addr) => addr.clone(),
            None => std::env::var(&self.address_env_var).map_err(|_| {
                WalletError::Config(format!(
                    "Contract address not found in environment: {}",
                    self.address_env_var
                ))
            })?,
        };
        crate::utils::address::parse_address(&raw)
    }
}

/// 应用描述符：一份声明式配置对应一个可对话操作的链上应用
#[derive(Debug, Clone)]
pub struct AppDescriptor {
    pub name: String,
    pub description: String,
    pub contracts: HashMap<String, ContractConfig>,
    pub view_methods: Vec<MethodDescriptor>,
    pub write_methods: Vec<MethodDescriptor>,
    pub parameter_processing: HashMap<String, ParamRule>,
}

impl AppDescriptor {
    /// 从 JSON 字符串加载（ABI 内联在 `abi` 字段）
    pub fn from_json_str(config: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(config).context("Invalid app config JSON")?;
        Self::from_json_value(value, None)
    }

    /// 从配置目录加载：`config.json` + 其引用的 `abi_file` 文件
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let config_path = dir.join("config.json");
        let text = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let value: serde_json::Value =
            serde_json::from_str(&text).context("Invalid app config JSON")?;
        Self::from_json_value(value, Some(dir))
    }

    /// 从已解析的 JSON 值构建，`base_dir` 用于解析 `abi_file` 相对路径
    pub fn from_json_value(value: serde_json::Value, base_dir: Option<&Path>) -> Result<Self> {
        let raw: raw::AppConfig =
            serde_json::from_value(value).context("Invalid app config structure")?;

        let mut contracts = HashMap::new();
        for (name, contract) in raw.contracts {
            let abi_value = match (contract.abi, contract.abi_file) {
                (Some(inline), _) => inline,
                (None, Some(file)) => {
                    let dir = base_dir
                        .ok_or_else(|| anyhow!("abi_file requires loading from a directory"))?;
                    let path = dir.join(&file);
                    let text = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read ABI file {}", path.display()))?;
                    serde_json::from_str(&text)
                        .with_context(|| format!("Invalid ABI JSON in {}", file))?
                }
                (None, None) => bail!("Contract {} has neither abi nor abi_file", name),
            };
            let abi: Abi = serde_json::from_value(abi_value)
                .with_context(|| format!("Failed to parse ABI for contract {}", name))?;
            contracts.insert(
                name,
                ContractConfig {
                    address_env_var: contract.address_env_var,
                    address_override: None,
                    abi,
                },
            );
        }

        let mut parameter_processing = HashMap::new();
        for (param, rule) in raw.parameter_processing {
            parameter_processing.insert(param.clone(), convert_rule(&param, rule)?);
        }

        let convert_methods = |methods: Vec<raw::Method>| {
            methods
                .into_iter()
                .map(|m| MethodDescriptor {
                    name: m.name,
                    inputs: m.inputs,
                    contract: m.contract,
                    requires_token_approval: m.requires_token_approval,
                    token_amount_pairs: m.token_amount_pairs,
                })
                .collect::<Vec<_>>()
        };

        Ok(Self {
            name: raw.name,
            description: raw.description,
            contracts,
            view_methods: convert_methods(raw.available_methods.view),
            write_methods: convert_methods(raw.available_methods.write),
            parameter_processing,
        })
    }

    /// 注入合约地址（优先于环境变量）
    pub fn with_contract_address(mut self, contract: &str, address: &str) -> Self {
        if let Some(config) = self.contracts.get_mut(contract) {
            config.address_override = Some(address.to_string());
        }
        self
    }

    /// 按名称和类别查找方法
    pub fn find_method(&self, name: &str, kind: MethodKind) -> Option<&MethodDescriptor> {
        let methods = match kind {
            MethodKind::View => &self.view_methods,
            MethodKind::Write => &self.write_methods,
        };
        methods.iter().find(|m| m.name == name)
    }

    /// 方法所属合约：显式声明优先；应用仅一个合约时取该合约
    pub fn contract_for(
        &self,
        method: &MethodDescriptor,
    ) -> Result<(&str, &ContractConfig), WalletError> {
        if let Some(name) = &method.contract {
            return self
                .contracts
                .get_key_value(name.as_str())
                .map(|(k, v)| (k.as_str(), v))
                .ok_or_else(|| {
                    WalletError::Config(format!("Contract {} not found in app config", name))
                });
        }
        if self.contracts.len() == 1 {
            let (k, v) = self.contracts.iter().next().expect("len checked");
            return Ok((k.as_str(), v));
        }
        Err(WalletError::Config(format!(
            "Method {} must name its contract (app has {})",
            method.name,
            self.contracts.len()
        )))
    }

    /// 参数的处理规则
    pub fn rule_for(&self, param: &str) -> Option<&ParamRule> {
        self.parameter_processing.get(param)
    }
}

/// 解析 timestamp 默认值表达式："current_time + 5_minutes" / "current_time + 30_seconds"
fn parse_timestamp_default(expr: &str) -> Result<Duration> {
    let rest = expr
        .trim()
        .strip_prefix("current_time")
        .ok_or_else(|| anyhow!("Unsupported timestamp default: {}", expr))?
        .trim()
        .strip_prefix('+')
        .ok_or_else(|| anyhow!("Unsupported timestamp default: {}", expr))?
        .trim();

    let (number, unit) = rest
        .split_once('_')
        .ok_or_else(|| anyhow!("Unsupported timestamp default: {}", expr))?;
    let number: u64 = number
        .parse()
        .with_context(|| format!("Invalid number in timestamp default: {}", expr))?;

    match unit {
        "minutes" | "minute" => Ok(Duration::from_secs(number * 60)),
        "seconds" | "second" => Ok(Duration::from_secs(number)),
        other => bail!("Unsupported timestamp unit: {}", other),
    }
}

fn convert_rule(param: &str, rule: raw::ParamRule) -> Result<ParamRule> {
    Ok(match rule {
        raw::ParamRule::TokenAmount {
            convert_from_human,
            get_decimals_from,
        } => ParamRule::TokenAmount {
            convert_from_human,
            decimals_source: get_decimals_from,
        },
        raw::ParamRule::Timestamp { default } => ParamRule::Timestamp {
            window: default
                .map(|d| parse_timestamp_default(&d))
                .transpose()
                .with_context(|| format!("Bad timestamp default for parameter {}", param))?,
        },
        raw::ParamRule::Address { default } => ParamRule::Address {
            default: default.map(|d| {
                if d == "user_wallet_address" {
                    ParamDefault::OwnWalletAddress
                } else {
                    ParamDefault::Value(serde_json::Value::String(d))
                }
            }),
        },
        raw::ParamRule::Token => ParamRule::Token,
        raw::ParamRule::TokenPath => ParamRule::TokenPath,
        raw::ParamRule::Raw { default } => ParamRule::Raw { default },
    })
}

/// 配置文件的原始反序列化形态
mod raw {
    use super::TokenAmountPair;
    use serde::Deserialize;
    use std::collections::HashMap;

    #[derive(Deserialize)]
    pub struct AppConfig {
        pub name: String,
        #[serde(default)]
        pub description: String,
        pub contracts: HashMap<String, ContractConfig>,
        #[serde(default)]
        pub available_methods: MethodSet,
        #[serde(default)]
        pub parameter_processing: HashMap<String, ParamRule>,
    }

    #[derive(Deserialize)]
    pub struct ContractConfig {
        pub address_env_var: String,
        #[serde(default)]
        pub abi: Option<serde_json::Value>,
        #[serde(default)]
        pub abi_file: Option<String>,
    }

    #[derive(Deserialize, Default)]
    pub struct MethodSet {
        #[serde(default)]
        pub view: Vec<Method>,
        #[serde(default)]
        pub write: Vec<Method>,
    }

    #[derive(Deserialize)]
    pub struct Method {
        pub name: String,
        #[serde(default)]
        pub inputs: Vec<String>,
        #[serde(default)]
        pub contract: Option<String>,
        #[serde(default)]
        pub requires_token_approval: bool,
        #[serde(default)]
        pub token_amount_pairs: Vec<TokenAmountPair>,
    }

    /// `type` 标签不认识时 serde 在加载阶段即报错
    #[derive(Deserialize)]
    #[serde(tag = "type", rename_all = "snake_case")]
    pub enum ParamRule {
        TokenAmount {
            #[serde(default)]
            convert_from_human: bool,
            #[serde(default)]
            get_decimals_from: Option<String>,
        },
        Timestamp {
            #[serde(default)]
            default: Option<String>,
        },
        Address {
            #[serde(default)]
            default: Option<String>,
        },
        Token,
        TokenPath,
        Raw {
            #[serde(default)]
            default: Option<serde_json::Value>,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 与交换应用同构的最小配置
    fn swap_config_json() -> String {
        r#"{
            "name": "swap",
            "description": "Token swaps via the dex router",
            "contracts": {
                "router": {
                    "address_env_var": "DEX_ROUTER_ADDRESS",
                    "abi": [
                        {"type":"function","name":"getAmountsOut","stateMutability":"view",
                         "inputs":[{"name":"amountIn","type":"uint256"},{"name":"path","type":"address[]"}],
                         "outputs":[{"name":"amounts","type":"uint256[]"}]},
                        {"type":"function","name":"swapExactTokensForTokens","stateMutability":"nonpayable",
                         "inputs":[{"name":"amountIn","type":"uint256"},{"name":"amountOutMin","type":"uint256"},
                                   {"name":"path","type":"address[]"},{"name":"to","type":"address"},
                                   {"name":"deadline","type":"uint256"}],
                         "outputs":[{"name":"amounts","type":"uint256[]"}]}
                    ]
                }
            },
            "available_methods": {
                "view": [
                    {"name": "getAmountsOut", "inputs": ["amountIn", "path"]}
                ],
                "write": [
                    {"name": "swapExactTokensForTokens",
                     "inputs": ["amountIn", "amountOutMin", "path", "to", "deadline"],
                     "requires_token_approval": true,
                     "token_amount_pairs": [{"token": "path[0]", "amount": "amountIn", "role": "input"}]}
                ]
            },
            "parameter_processing": {
                "amountIn": {"type": "token_amount", "convert_from_human": true, "get_decimals_from": "path[0]"},
                "deadline": {"type": "timestamp", "default": "current_time + 5_minutes"},
                "to": {"type": "address", "default": "user_wallet_address"},
                "path": {"type": "token_path"}
            }
        }"#
        .to_string()
    }

    #[test]
    fn test_load_swap_config() {
        let app = AppDescriptor::from_json_str(&swap_config_json()).unwrap();
        assert_eq!(app.name, "swap");
        assert_eq!(app.view_methods.len(), 1);
        assert_eq!(app.write_methods.len(), 1);

        let write = app
            .find_method("swapExactTokensForTokens", MethodKind::Write)
            .unwrap();
        assert!(write.requires_token_approval);
        assert_eq!(write.inputs.len(), 5);
        assert_eq!(write.token_amount_pairs[0].token, "path[0]");

        // ABI 在加载时即已解析
        let (_, contract) = app.contract_for(write).unwrap();
        assert!(contract.abi.function("swapExactTokensForTokens").is_ok());
    }

    #[test]
    fn test_rules_are_typed_at_load() {
        let app = AppDescriptor::from_json_str(&swap_config_json()).unwrap();
        assert!(matches!(
            app.rule_for("to"),
            Some(ParamRule::Address {
                default: Some(ParamDefault::OwnWalletAddress)
            })
        ));
        match app.rule_for("deadline") {
            Some(ParamRule::Timestamp {
                window: Some(window),
            }) => assert_eq!(*window, Duration::from_secs(300)),
            other => panic!("unexpected rule: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_rule_type_rejected_at_load() {
        let config = r#"{
            "name": "bad",
            "contracts": {"c": {"address_env_var": "X", "abi": []}},
            "parameter_processing": {"p": {"type": "quantum_amount"}}
        }"#;
        assert!(AppDescriptor::from_json_str(config).is_err());
    }

    #[test]
    fn test_timestamp_default_parser() {
        assert_eq!(
            parse_timestamp_default("current_time + 5_minutes").unwrap(),
            Duration::from_secs(300)
        );
        assert_eq!(
            parse_timestamp_default("current_time + 30_seconds").unwrap(),
            Duration::from_secs(30)
        );
        assert!(parse_timestamp_default("yesterday").is_err());
        assert!(parse_timestamp_default("current_time + 5_hours").is_err());
    }
}
