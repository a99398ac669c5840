//! Domain 模块
//!
//! 核心领域模型：用户标识、钱包记录、代币、方法描述符与交易状态

pub mod derivation;
pub mod method;
pub mod token;
pub mod transaction;
pub mod user;
pub mod wallet;

pub use method::{AppDescriptor, MethodDescriptor, MethodKind, ParamDefault, ParamRule};
pub use token::{TokenDescriptor, TokenSuggestion};
pub use transaction::{PendingTransaction, SessionState, TransactionOutcome, TransactionPreview};
pub use user::{UserHash, UserId};
pub use wallet::{LinkedCredential, MnemonicRecord, WalletRecord};
