//! 代币模型

use serde::{Deserialize, Serialize};

/// 代币描述符
///
/// 两种来源：权威默认列表（冲突时总是胜出）与用户跟踪列表
/// （后备，符号歧义时按链上余额消歧）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenDescriptor {
    pub address: String,
    pub symbol: String,
    pub name: String,
    pub decimals: u32,
    pub chain_id: u64,
}

/// 模糊匹配候选，随 UnknownToken 错误返回给前端做"您是否想找…"提示
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSuggestion {
    pub symbol: String,
    pub name: String,
    pub address: String,
}

impl From<&TokenDescriptor> for TokenSuggestion {
    fn from(token: &TokenDescriptor) -> Self {
        Self {
            symbol: token.symbol.clone(),
            name: token.name.clone(),
            address: token.address.clone(),
        }
    }
}
