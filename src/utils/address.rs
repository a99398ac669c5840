//! 地址校验工具

use ethers::types::Address;
use ethers::utils::to_checksum;

use crate::error::WalletError;

/// 判断字符串是否为格式合法的EVM地址（0x + 40位十六进制）
pub fn is_address(value: &str) -> bool {
    let v = value.trim();
    v.len() == 42 && v.starts_with("0x") && v[2..].chars().all(|c| c.is_ascii_hexdigit())
}

/// 解析EVM地址，失败返回 Validation 错误
pub fn parse_address(value: &str) -> Result<Address, WalletError> {
    value
        .trim()
        .parse::<Address>()
        .map_err(|_| WalletError::Validation(format!("Invalid address: {}", value)))
}

/// EIP-55 checksum 格式化
pub fn checksum(address: Address) -> String {
    to_checksum(&address, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_address() {
        assert!(is_address("0xbb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c"));
        assert!(!is_address("bb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c"));
        assert!(!is_address("0x123"));
        assert!(!is_address("0xZZ4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c"));
    }

    #[test]
    fn test_parse_and_checksum() {
        let addr = parse_address("0xbb4cdb9cbd36b01bd1cbaebf2de08d9173bc095c").unwrap();
        assert_eq!(checksum(addr), "0xbb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c");
        assert!(parse_address("not-an-address").is_err());
    }
}
