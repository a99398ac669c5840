//! 数值转换工具
//! 人类可读金额与链上原始整数金额（最小单位）之间的互转

use ethers::types::U256;
use rust_decimal::Decimal;

use crate::error::WalletError;

/// 后缀对应的十进制幂：1k = 10^3 … 1q = 10^15
fn suffix_exponent(suffix: char) -> Option<u32> {
    match suffix {
        'k' => Some(3),
        'm' => Some(6),
        'b' => Some(9),
        't' => Some(12),
        'q' => Some(15),
        _ => None,
    }
}

/// 解析人类可读金额（支持 k/m/b/t/q 后缀），返回（数值，十进制幂加成）
///
/// "2.5m" -> (2.5, 6)；"1000" -> (1000, 0)
fn parse_human_input(input: &str) -> Result<(Decimal, u32), WalletError> {
    let trimmed = input.trim().to_lowercase();
    if trimmed.is_empty() {
        return Err(WalletError::Validation("empty amount".into()));
    }

    let (number_part, exponent) = match trimmed.chars().last().and_then(suffix_exponent) {
        Some(exp) => (&trimmed[..trimmed.len() - 1], exp),
        None => (trimmed.as_str(), 0),
    };

    let number: Decimal = number_part
        .parse()
        .map_err(|_| WalletError::Validation(format!("Invalid amount format: {}", input)))?;

    if number.is_sign_negative() {
        return Err(WalletError::Validation(format!(
            "Amount must not be negative: {}",
            input
        )));
    }

    Ok((number, exponent))
}

/// 人类可读金额转原始整数金额
///
/// # Arguments
/// * `input` - 人类可读金额，如 "1.5"、"2.5m"、"1000k"
/// * `decimals` - 代币小数位数
///
/// # Returns
/// 最小单位的整数金额；小数位超出 `decimals` 的部分截断
pub fn to_raw_amount(input: &str, decimals: u32) -> Result<U256, WalletError> {
    let (number, suffix_exp) = parse_human_input(input)?;

    // Decimal 的 mantissa/scale 表示：value = mantissa / 10^scale
    let mantissa = number.mantissa();
    let scale = number.scale();

    let total_exp = decimals + suffix_exp;
    if scale > total_exp {
        // 精度超出最小单位，截断多余小数位
        let cut = scale - total_exp;
        let divisor = 10i128.checked_pow(cut).ok_or_else(|| {
            WalletError::Validation(format!("Amount precision out of range: {}", input))
        })?;
        return Ok(U256::from((mantissa / divisor) as u128));
    }

    let raw = U256::from(mantissa as u128)
        .checked_mul(U256::from(10u64).pow(U256::from(total_exp - scale)))
        .ok_or_else(|| WalletError::Validation(format!("Amount overflows: {}", input)))?;
    Ok(raw)
}

/// 原始整数金额转人类可读展示（带有效数字与量级后缀）
///
/// 仅用于预览/摘要展示，不参与金额计算
pub fn to_human_display(raw: U256, decimals: u32, sig_figs: u32) -> String {
    if raw.is_zero() {
        return "0".into();
    }

    let value = u256_to_f64(raw) / 10f64.powi(decimals as i32);
    display_with_sigfig(value, sig_figs)
}

/// 带量级后缀的有效数字展示："2352000.0" -> "2.352m"
pub fn display_with_sigfig(value: f64, sig_figs: u32) -> String {
    let (scaled, suffix) = if value >= 1e12 {
        (value / 1e12, "t")
    } else if value >= 1e9 {
        (value / 1e9, "b")
    } else if value >= 1e6 {
        (value / 1e6, "m")
    } else if value >= 1e3 {
        (value / 1e3, "k")
    } else {
        (value, "")
    };

    if scaled == 0.0 {
        return "0".into();
    }

    // 按有效数字保留小数位
    let magnitude = scaled.abs().log10().floor() as i32;
    let dec_places = (sig_figs as i32 - 1 - magnitude).max(0) as usize;
    let formatted = format!("{:.*}", dec_places, scaled);
    // 去掉多余的尾零
    let trimmed = if formatted.contains('.') {
        formatted.trim_end_matches('0').trim_end_matches('.')
    } else {
        &formatted
    };
    format!("{}{}", trimmed, suffix)
}

/// U256 转 f64（仅用于展示，接受精度损失）
pub fn u256_to_f64(value: U256) -> f64 {
    value.to_string().parse::<f64>().unwrap_or(f64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_amount() {
        assert_eq!(
            to_raw_amount("1.5", 18).unwrap(),
            U256::from(1_500_000_000_000_000_000u128)
        );
        assert_eq!(to_raw_amount("0", 18).unwrap(), U256::zero());
        assert_eq!(to_raw_amount("42", 6).unwrap(), U256::from(42_000_000u64));
    }

    #[test]
    fn test_suffix_amounts() {
        assert_eq!(to_raw_amount("1k", 0).unwrap(), U256::from(1_000u64));
        assert_eq!(to_raw_amount("2.5m", 0).unwrap(), U256::from(2_500_000u64));
        assert_eq!(to_raw_amount("1b", 0).unwrap(), U256::from(1_000_000_000u64));
        assert_eq!(
            to_raw_amount("0.5t", 0).unwrap(),
            U256::from(500_000_000_000u64)
        );
        assert_eq!(
            to_raw_amount("1q", 0).unwrap(),
            U256::from(1_000_000_000_000_000u64)
        );
        // 后缀与代币小数位叠加
        assert_eq!(
            to_raw_amount("1k", 18).unwrap(),
            U256::from(10u64).pow(U256::from(21u64))
        );
    }

    #[test]
    fn test_excess_precision_truncates() {
        // 6位小数代币，第7位被截断
        assert_eq!(
            to_raw_amount("1.2345678", 6).unwrap(),
            U256::from(1_234_567u64)
        );
    }

    #[test]
    fn test_invalid_amounts() {
        assert!(to_raw_amount("", 18).is_err());
        assert!(to_raw_amount("abc", 18).is_err());
        assert!(to_raw_amount("-5", 18).is_err());
    }

    #[test]
    fn test_display_with_sigfig() {
        assert_eq!(display_with_sigfig(2_352_000.0, 4), "2.352m");
        assert_eq!(display_with_sigfig(1.5, 4), "1.5");
        assert_eq!(display_with_sigfig(0.0, 4), "0");
        assert_eq!(display_with_sigfig(1_000.0, 4), "1k");
    }

    #[test]
    fn test_human_display_roundtrip() {
        let raw = to_raw_amount("2.5m", 18).unwrap();
        assert_eq!(to_human_display(raw, 18, 4), "2.5m");
    }
}
