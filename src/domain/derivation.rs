//! 钱包派生
//!
//! 助记词生成与 BIP-32 路径派生，仅支持以太系 secp256k1 钱包

use anyhow::{Context, Result};
use bip39::{Language, Mnemonic};
use coins_bip32::path::DerivationPath;
use zeroize::Zeroizing;

/// 派生结果
///
/// `private_key` 为 hex 编码，仅用于立即加密存储或构造签名器，
/// 外层用完即丢
#[derive(Clone)]
pub struct DerivedWallet {
    /// 地址（EIP-55 checksum）
    pub address: String,
    /// 私钥（hex 编码，无 0x 前缀）
    pub private_key: Zeroizing<String>,
    /// 派生路径
    pub path: String,
}

impl std::fmt::Debug for DerivedWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedWallet")
            .field("address", &self.address)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// 生成新助记词（128位熵，12个英文单词）
pub fn generate_mnemonic() -> Result<Zeroizing<String>> {
    use rand::RngCore;
    let mut entropy = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut entropy);
    let mnemonic = Mnemonic::from_entropy_in(Language::English, &entropy)
        .context("Failed to build mnemonic from entropy")?;
    Ok(Zeroizing::new(mnemonic.to_string()))
}

/// 校验助记词合法性
pub fn validate_mnemonic(phrase: &str) -> Result<()> {
    Mnemonic::parse_in(Language::English, phrase)
        .context("Invalid mnemonic phrase")
        .map(|_| ())
}

/// 按路径从助记词派生以太坊钱包
///
/// # Arguments
/// * `phrase` - BIP39 助记词
/// * `path` - 完整派生路径，如 `m/44'/60'/0'/0/3`
pub fn derive_wallet(phrase: &str, path: &str) -> Result<DerivedWallet> {
    use coins_bip32::prelude::*;
    use k256::ecdsa::SigningKey;

    // 解析助记词并生成种子
    let mnemonic = Mnemonic::parse_in(Language::English, phrase).context("Invalid mnemonic")?;
    let seed = mnemonic.to_seed("");

    // 解析派生路径
    let derivation_path = path
        .parse::<DerivationPath>()
        .context("Invalid derivation path")?;

    // 从种子派生密钥
    let master_key = XPriv::root_from_seed(&seed, None).context("Failed to derive master key")?;
    let derived_key = master_key
        .derive_path(&derivation_path)
        .context("Failed to derive key")?;

    // XPriv 实现 AsRef<SigningKey>
    let signing_key: &SigningKey = derived_key.as_ref();
    let private_key = Zeroizing::new(hex::encode(signing_key.to_bytes()));
    let address = address_from_signing_key(signing_key);

    Ok(DerivedWallet {
        address,
        private_key,
        path: path.to_string(),
    })
}

/// 从原始私钥（hex，可带 0x 前缀）恢复钱包（导入流程）
pub fn wallet_from_private_key(private_key_hex: &str) -> Result<DerivedWallet> {
    use k256::ecdsa::SigningKey;

    let cleaned = private_key_hex.trim().trim_start_matches("0x");
    let bytes = hex::decode(cleaned).context("Private key must be hex")?;
    let signing_key = SigningKey::from_slice(&bytes).context("Invalid private key")?;
    let address = address_from_signing_key(&signing_key);

    Ok(DerivedWallet {
        address,
        private_key: Zeroizing::new(cleaned.to_lowercase()),
        path: String::new(),
    })
}

/// 公钥 → Keccak256 → 取后20字节 → checksum 地址
fn address_from_signing_key(signing_key: &k256::ecdsa::SigningKey) -> String {
    use sha3::{Digest, Keccak256};

    let verifying_key = signing_key.verifying_key();
    let public_key = verifying_key.to_encoded_point(false); // 未压缩格式
    let public_key_slice = &public_key.as_bytes()[1..]; // 去掉 0x04 前缀

    let hash = Keccak256::digest(public_key_slice);
    let address_bytes = &hash[12..];

    let address: ethers::types::Address = ethers::types::Address::from_slice(address_bytes);
    crate::utils::address::checksum(address)
}

#[cfg(test)]
mod tests {
    use super::*;

    // BIP39 标准测试助记词
    const TEST_MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn test_generate_and_validate() {
        let phrase = generate_mnemonic().unwrap();
        assert_eq!(phrase.split_whitespace().count(), 12);
        assert!(validate_mnemonic(&phrase).is_ok());
        assert!(validate_mnemonic("not a real mnemonic at all").is_err());
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let a = derive_wallet(TEST_MNEMONIC, "m/44'/60'/0'/0/0").unwrap();
        let b = derive_wallet(TEST_MNEMONIC, "m/44'/60'/0'/0/0").unwrap();
        assert_eq!(a.address, b.address);
        assert_eq!(*a.private_key, *b.private_key);
    }

    #[test]
    fn test_known_vector_index_zero() {
        // 标准测试助记词在 m/44'/60'/0'/0/0 的公认地址
        let wallet = derive_wallet(TEST_MNEMONIC, "m/44'/60'/0'/0/0").unwrap();
        assert_eq!(
            wallet.address,
            "0x9858EfFD232B4033E47d90003D41EC34EcaEda94"
        );
    }

    #[test]
    fn test_distinct_indices_distinct_addresses() {
        let w0 = derive_wallet(TEST_MNEMONIC, "m/44'/60'/0'/0/0").unwrap();
        let w1 = derive_wallet(TEST_MNEMONIC, "m/44'/60'/0'/0/1").unwrap();
        assert_ne!(w0.address, w1.address);
    }

    #[test]
    fn test_private_key_import_roundtrip() {
        let derived = derive_wallet(TEST_MNEMONIC, "m/44'/60'/0'/0/0").unwrap();
        let imported = wallet_from_private_key(&derived.private_key).unwrap();
        assert_eq!(imported.address, derived.address);

        let with_prefix =
            wallet_from_private_key(&format!("0x{}", derived.private_key.as_str())).unwrap();
        assert_eq!(with_prefix.address, derived.address);
    }
}
