pub mod approval;
pub mod parameters;
pub mod pin_authority;
pub mod pipeline;
pub mod sender;
pub mod swap;
pub mod token_list;
pub mod token_resolver;
pub mod vault;
pub mod wallet_manager;
