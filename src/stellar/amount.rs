//! Fixed-point amounts of the ledger's native currency.
//!
//! Amounts are stored as a signed count of stroops, the ledger's minor
//! unit (1 lumen = 10^7 stroops). All protocol arithmetic that can be fed
//! by untrusted inputs goes through the checked helpers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};
use std::str::FromStr;
use thiserror::Error;

/// Stroops per lumen.
pub const STROOPS_PER_LUMEN: i64 = 10_000_000;

/// An amount of the ledger's native currency, in stroops.
#[derive(
    Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Debug,
)]
#[serde(transparent)]
pub struct Amount(i64);

/// One stroop, the ledger's minor unit.
pub const STROOP: Amount = Amount(1);
pub const MICROLUMEN: Amount = Amount(10);
pub const MILLILUMEN: Amount = Amount(10_000);
/// One whole unit of the native currency.
pub const LUMEN: Amount = Amount(STROOPS_PER_LUMEN);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseAmountError {
    #[error("invalid amount syntax: {0:?}")]
    Syntax(String),
    #[error("too many decimal places in amount: {0:?}")]
    Precision(String),
    #[error("amount out of range: {0:?}")]
    Range(String),
}

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_stroops(stroops: i64) -> Self {
        Amount(stroops)
    }

    pub const fn as_stroops(self) -> i64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn checked_mul(self, n: i64) -> Option<Amount> {
        self.0.checked_mul(n).map(Amount)
    }

    /// Formats the amount the way the ledger's HTTP API renders native
    /// balances: a decimal lumen string with up to seven fractional
    /// digits and no trailing zeros.
    pub fn horizon_string(self) -> String {
        let neg = self.0 < 0;
        let abs = self.0.unsigned_abs();
        let whole = abs / STROOPS_PER_LUMEN as u64;
        let frac = abs % STROOPS_PER_LUMEN as u64;
        let sign = if neg { "-" } else { "" };
        if frac == 0 {
            return format!("{sign}{whole}");
        }
        let frac = format!("{frac:07}");
        format!("{sign}{whole}.{}", frac.trim_end_matches('0'))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} XLM", self.horizon_string())
    }
}

impl FromStr for Amount {
    type Err = ParseAmountError;

    /// Parses a decimal lumen string (the inverse of `horizon_string`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (neg, body) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        if body.is_empty() {
            return Err(ParseAmountError::Syntax(s.to_string()));
        }
        let (whole, frac) = match body.split_once('.') {
            Some((w, f)) => (w, f),
            None => (body, ""),
        };
        if frac.len() > 7 {
            return Err(ParseAmountError::Precision(s.to_string()));
        }
        if !whole.chars().all(|c| c.is_ascii_digit())
            || !frac.chars().all(|c| c.is_ascii_digit())
            || (whole.is_empty() && frac.is_empty())
        {
            return Err(ParseAmountError::Syntax(s.to_string()));
        }
        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole
                .parse()
                .map_err(|_| ParseAmountError::Range(s.to_string()))?
        };
        let mut frac_stroops: i64 = 0;
        if !frac.is_empty() {
            let padded = format!("{frac:0<7}");
            frac_stroops = padded
                .parse()
                .map_err(|_| ParseAmountError::Range(s.to_string()))?;
        }
        let stroops = whole
            .checked_mul(STROOPS_PER_LUMEN)
            .and_then(|n| n.checked_add(frac_stroops))
            .ok_or_else(|| ParseAmountError::Range(s.to_string()))?;
        Ok(Amount(if neg { -stroops } else { stroops }))
    }
}

impl Add for Amount {
    type Output = Amount;
    fn add(self, other: Amount) -> Amount {
        Amount(self.0 + other.0)
    }
}

impl AddAssign for Amount {
    fn add_assign(&mut self, other: Amount) {
        self.0 += other.0;
    }
}

impl Sub for Amount {
    type Output = Amount;
    fn sub(self, other: Amount) -> Amount {
        Amount(self.0 - other.0)
    }
}

impl SubAssign for Amount {
    fn sub_assign(&mut self, other: Amount) {
        self.0 -= other.0;
    }
}

impl Neg for Amount {
    type Output = Amount;
    fn neg(self) -> Amount {
        Amount(-self.0)
    }
}

impl Mul<i64> for Amount {
    type Output = Amount;
    fn mul(self, n: i64) -> Amount {
        Amount(self.0 * n)
    }
}

impl Mul<Amount> for i64 {
    type Output = Amount;
    fn mul(self, amt: Amount) -> Amount {
        Amount(self * amt.0)
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Amount {
        iter.fold(Amount(0), Add::add)
    }
}
