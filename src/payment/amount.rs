//! Fixed-point USDC amounts.
//!
//! Amounts are carried as integer micro-units (6 decimals, the token's on-chain
//! precision) so that comparisons against event amounts are exact. Decimal
//! strings and floats only appear at the HTTP and storage boundaries.

use ethers::types::U256;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const USDC_DECIMALS: u32 = 6;
/// Fractional digits shown in a payment challenge.
pub const CHALLENGE_DECIMALS: u32 = 3;
const UNITS_PER_USDC: u64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UsdcAmount(u64);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("amount is empty")]
    Empty,
    #[error("amount `{0}` is not a decimal number")]
    NotDecimal(String),
    #[error("amount `{0}` has more than 6 fractional digits")]
    TooPrecise(String),
    #[error("amount `{0}` is out of range")]
    OutOfRange(String),
}

impl UsdcAmount {
    pub const ZERO: Self = Self(0);

    pub const fn from_micro_units(units: u64) -> Self {
        Self(units)
    }

    pub const fn micro_units(self) -> u64 {
        self.0
    }

    /// Parse a decimal string such as `"0.001"` without going through a float.
    pub fn parse(raw: &str) -> Result<Self, AmountError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(AmountError::Empty);
        }

        let (whole, fraction) = match raw.split_once('.') {
            Some((w, f)) => (w, f),
            None => (raw, ""),
        };
        let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
        if (whole.is_empty() && fraction.is_empty()) || !all_digits(whole) || !all_digits(fraction) {
            return Err(AmountError::NotDecimal(raw.to_string()));
        }

        let significant = fraction.trim_end_matches('0');
        if significant.len() > USDC_DECIMALS as usize {
            return Err(AmountError::TooPrecise(raw.to_string()));
        }

        let whole_units = if whole.is_empty() {
            0
        } else {
            whole
                .parse::<u64>()
                .map_err(|_| AmountError::OutOfRange(raw.to_string()))?
        };
        let mut fraction_units = 0u64;
        for (i, c) in significant.chars().enumerate() {
            let digit = u64::from(c as u8 - b'0');
            fraction_units += digit * 10u64.pow(USDC_DECIMALS - 1 - i as u32);
        }

        whole_units
            .checked_mul(UNITS_PER_USDC)
            .and_then(|w| w.checked_add(fraction_units))
            .map(Self)
            .ok_or_else(|| AmountError::OutOfRange(raw.to_string()))
    }

    /// Convert a display float (e.g. a JSON `amount_usdc`) to the nearest micro-unit.
    pub fn from_f64(value: f64) -> Result<Self, AmountError> {
        if !value.is_finite() || value < 0.0 {
            return Err(AmountError::OutOfRange(value.to_string()));
        }
        let units = (value * UNITS_PER_USDC as f64).round();
        if units > u64::MAX as f64 {
            return Err(AmountError::OutOfRange(value.to_string()));
        }
        Ok(Self(units as u64))
    }

    /// Convert an on-chain integer amount. Fails when it does not fit in 64 bits.
    pub fn from_u256(value: U256) -> Result<Self, AmountError> {
        if value > U256::from(u64::MAX) {
            return Err(AmountError::OutOfRange(value.to_string()));
        }
        Ok(Self(value.as_u64()))
    }

    pub fn to_u256(self) -> U256 {
        U256::from(self.0)
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / UNITS_PER_USDC as f64
    }

    /// Render with a fixed number of decimals, rounding half-up on the integer value.
    pub fn to_fixed(self, decimals: u32) -> String {
        let decimals = decimals.min(USDC_DECIMALS);
        let divisor = 10u64.pow(USDC_DECIMALS - decimals);
        let scaled = (u128::from(self.0) + u128::from(divisor / 2)) / u128::from(divisor);
        if decimals == 0 {
            return scaled.to_string();
        }
        let base = 10u128.pow(decimals);
        format!(
            "{}.{:0width$}",
            scaled / base,
            scaled % base,
            width = decimals as usize
        )
    }

    /// The 3-decimal form used in payment challenges.
    pub fn challenge_string(self) -> String {
        self.to_fixed(CHALLENGE_DECIMALS)
    }

    /// True when [`challenge_string`](Self::challenge_string) parses back to this exact amount.
    pub fn fits_challenge(self) -> bool {
        self.0 % 10u64.pow(USDC_DECIMALS - CHALLENGE_DECIMALS) == 0
    }
}

impl fmt::Display for UsdcAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / UNITS_PER_USDC;
        let fraction = self.0 % UNITS_PER_USDC;
        if fraction == 0 {
            return write!(f, "{whole}");
        }
        let digits = format!("{fraction:06}");
        write!(f, "{whole}.{}", digits.trim_end_matches('0'))
    }
}

impl std::str::FromStr for UsdcAmount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
