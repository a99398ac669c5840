//! 应用状态
//! 进程级服务单例在此一次构造、显式装配，按引用传递到调用点——
//! 不做隐式全局查找

use std::sync::Arc;

use crate::chain::ChainRpc;
use crate::config::Config;
use crate::repository::{
    CredentialRepository, MnemonicRepository, PinAttemptRepository, PinRepository,
    TokenRepository, WalletRepository,
};
use crate::service::approval::ApprovalManager;
use crate::service::parameters::ParameterProcessor;
use crate::service::pin_authority::PinAuthority;
use crate::service::pipeline::TransactionPipeline;
use crate::service::sender::TransactionSender;
use crate::service::swap::SwapRouter;
use crate::service::token_list::TokenListLoader;
use crate::service::token_resolver::TokenResolver;
use crate::service::vault::CredentialVault;
use crate::service::wallet_manager::WalletManager;

/// 存储协作方句柄集合（由嵌入方注入具体实现）
#[derive(Clone)]
pub struct StorageHandles {
    pub wallets: Arc<dyn WalletRepository>,
    pub mnemonics: Arc<dyn MnemonicRepository>,
    pub pins: Arc<dyn PinRepository>,
    pub pin_attempts: Arc<dyn PinAttemptRepository>,
    pub tokens: Arc<dyn TokenRepository>,
    pub credentials: Arc<dyn CredentialRepository>,
}

impl StorageHandles {
    /// 用单个同时实现全部 Repository trait 的存储后端装配
    pub fn from_single<S>(storage: Arc<S>) -> Self
    where
        S: WalletRepository
            + MnemonicRepository
            + PinRepository
            + PinAttemptRepository
            + TokenRepository
            + CredentialRepository
            + 'static,
    {
        Self {
            wallets: storage.clone(),
            mnemonics: storage.clone(),
            pins: storage.clone(),
            pin_attempts: storage.clone(),
            tokens: storage.clone(),
            credentials: storage,
        }
    }
}

/// 应用状态：核心引擎的全部服务
pub struct AppState {
    pub config: Arc<Config>,
    pub vault: Arc<CredentialVault>,
    pub pin_authority: Arc<PinAuthority>,
    pub token_resolver: Arc<TokenResolver>,
    pub parameter_processor: Arc<ParameterProcessor>,
    pub approval_manager: Arc<ApprovalManager>,
    pub transaction_sender: Arc<TransactionSender>,
    pub pipeline: Arc<TransactionPipeline>,
    pub wallet_manager: Arc<WalletManager>,
    pub swap_router: Arc<SwapRouter>,
    pub token_list_loader: Arc<TokenListLoader>,
}

impl AppState {
    /// 装配全部服务
    pub fn new(config: Arc<Config>, rpc: Arc<dyn ChainRpc>, storage: StorageHandles) -> Self {
        let vault = Arc::new(CredentialVault::new(
            config.clone(),
            storage.mnemonics.clone(),
        ));
        let pin_authority = Arc::new(PinAuthority::new(
            config.clone(),
            vault.clone(),
            storage.pins.clone(),
            storage.pin_attempts.clone(),
            storage.wallets.clone(),
            storage.mnemonics.clone(),
            storage.credentials.clone(),
        ));
        let token_resolver = Arc::new(TokenResolver::new(
            config.clone(),
            storage.tokens.clone(),
            rpc.clone(),
        ));
        let parameter_processor = Arc::new(ParameterProcessor::new(
            config.clone(),
            token_resolver.clone(),
        ));
        let transaction_sender = Arc::new(TransactionSender::new(config.clone(), rpc.clone()));
        let approval_manager = Arc::new(ApprovalManager::new(
            rpc.clone(),
            transaction_sender.clone(),
        ));
        let pipeline = Arc::new(TransactionPipeline::new(
            config.clone(),
            vault.clone(),
            pin_authority.clone(),
            token_resolver.clone(),
            parameter_processor.clone(),
            approval_manager.clone(),
            transaction_sender.clone(),
            storage.wallets.clone(),
        ));
        let wallet_manager = Arc::new(WalletManager::new(
            config.clone(),
            vault.clone(),
            pin_authority.clone(),
            storage.wallets.clone(),
            storage.mnemonics.clone(),
        ));
        let swap_router = Arc::new(SwapRouter::new(
            config.clone(),
            rpc.clone(),
            token_resolver.clone(),
            approval_manager.clone(),
            transaction_sender.clone(),
            storage.tokens.clone(),
        ));
        let token_list_loader = Arc::new(TokenListLoader::new(
            config.clone(),
            storage.tokens.clone(),
        ));

        Self {
            config,
            vault,
            pin_authority,
            token_resolver,
            parameter_processor,
            approval_manager,
            transaction_sender,
            pipeline,
            wallet_manager,
            swap_router,
            token_list_loader,
        }
    }

    /// 启动后台任务（PIN会话清扫）
    pub fn spawn_background_tasks(&self) -> Vec<tokio::task::JoinHandle<()>> {
        vec![self.pin_authority.clone().spawn_sweeper()]
    }
}
