//! Fixed-point money type.
//!
//! All money amounts in the ledger are integer cents stored as `i64`
//! (1 USD = 100 cents). `Cents` wraps the raw integer so share counts and
//! activity ids cannot be mixed into money arithmetic by accident.
//!
//! There is intentionally no `From<i64>`; use [`Cents::new`] when a raw
//! integer is known to be a cent amount, and [`Cents::raw`] when crossing
//! into SQL binds or JSON.
//!
//! Floating point only appears at the wire boundary
//! ([`Cents::from_dollars_f64`]); decimal strings (CSV imports) go through
//! [`Cents::parse_decimal`] with no floats at all.

use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// A fixed-point monetary amount at 1e-2 scale.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cents(i64);

/// Errors from converting external representations into [`Cents`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CentsError {
    /// NaN or infinite wire price.
    NonFinite,
    /// Value does not fit in `i64` cents.
    OutOfRange,
    /// Decimal string could not be parsed.
    InvalidDecimal(String),
}

impl std::fmt::Display for CentsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CentsError::NonFinite => write!(f, "amount is not a finite number"),
            CentsError::OutOfRange => write!(f, "amount out of range for i64 cents"),
            CentsError::InvalidDecimal(raw) => write!(f, "invalid decimal amount: '{raw}'"),
        }
    }
}

impl std::error::Error for CentsError {}

impl Cents {
    pub const ZERO: Cents = Cents(0);
    pub const MAX: Cents = Cents(i64::MAX);
    pub const MIN: Cents = Cents(i64::MIN);

    #[inline]
    pub const fn new(raw: i64) -> Self {
        Cents(raw)
    }

    #[inline]
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// `round(dollars * 100)`, half away from zero.
    pub fn from_dollars_f64(dollars: f64) -> Result<Cents, CentsError> {
        if !dollars.is_finite() {
            return Err(CentsError::NonFinite);
        }
        let scaled = (dollars * 100.0).round();
        if scaled > i64::MAX as f64 || scaled < i64::MIN as f64 {
            return Err(CentsError::OutOfRange);
        }
        Ok(Cents(scaled as i64))
    }

    /// Parse a decimal dollar string such as `"1,234.5"`, `"-$12.34"` or
    /// `"(7.10)"` (accounting negative). At most two fractional digits.
    pub fn parse_decimal(raw: &str) -> Result<Cents, CentsError> {
        let bad = || CentsError::InvalidDecimal(raw.to_string());

        let mut s: String = raw.trim().chars().filter(|c| *c != ',').collect();
        let mut negative = false;
        if s.starts_with('(') && s.ends_with(')') && s.len() >= 2 {
            negative = true;
            s = s[1..s.len() - 1].to_string();
        }
        let mut rest = s.as_str();
        if let Some(r) = rest.strip_prefix('-') {
            negative = !negative;
            rest = r;
        } else if let Some(r) = rest.strip_prefix('+') {
            rest = r;
        }
        let rest = rest.strip_prefix('$').unwrap_or(rest);
        if rest.is_empty() {
            return Err(bad());
        }

        let (int_part, frac_part) = match rest.split_once('.') {
            Some((i, f)) => (i, f),
            None => (rest, ""),
        };
        if frac_part.len() > 2 {
            return Err(bad());
        }
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(bad());
        }
        if !int_part.chars().all(|c| c.is_ascii_digit())
            || !frac_part.chars().all(|c| c.is_ascii_digit())
        {
            return Err(bad());
        }

        let whole: i64 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| CentsError::OutOfRange)?
        };
        let frac: i64 = match frac_part.len() {
            0 => 0,
            1 => frac_part.parse::<i64>().map_err(|_| bad())? * 10,
            _ => frac_part.parse::<i64>().map_err(|_| bad())?,
        };

        let cents = whole
            .checked_mul(100)
            .and_then(|w| w.checked_add(frac))
            .ok_or(CentsError::OutOfRange)?;
        Ok(Cents(if negative { -cents } else { cents }))
    }

    #[inline]
    pub fn saturating_add(self, rhs: Cents) -> Cents {
        Cents(self.0.saturating_add(rhs.0))
    }

    #[inline]
    pub fn checked_add(self, rhs: Cents) -> Option<Cents> {
        self.0.checked_add(rhs.0).map(Cents)
    }

    #[inline]
    pub fn checked_sub(self, rhs: Cents) -> Option<Cents> {
        self.0.checked_sub(rhs.0).map(Cents)
    }

    /// Multiply a per-share amount by a share count. `None` on overflow;
    /// overflow in a gain computation is a critical error, never a clamp.
    #[inline]
    pub fn checked_mul_qty(self, qty: i64) -> Option<Cents> {
        self.0.checked_mul(qty).map(Cents)
    }

    #[inline]
    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub fn min(self, other: Cents) -> Cents {
        if self.0 <= other.0 {
            self
        } else {
            other
        }
    }
}

impl Add for Cents {
    type Output = Cents;
    #[inline]
    fn add(self, rhs: Cents) -> Cents {
        Cents(self.0 + rhs.0)
    }
}

impl Sub for Cents {
    type Output = Cents;
    #[inline]
    fn sub(self, rhs: Cents) -> Cents {
        Cents(self.0 - rhs.0)
    }
}

impl Neg for Cents {
    type Output = Cents;
    #[inline]
    fn neg(self) -> Cents {
        Cents(-self.0)
    }
}

impl AddAssign for Cents {
    #[inline]
    fn add_assign(&mut self, rhs: Cents) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Cents {
    #[inline]
    fn sub_assign(&mut self, rhs: Cents) {
        self.0 -= rhs.0;
    }
}

/// `$1,234.50` style without grouping: `$1234.50`, `-$0.75`.
impl std::fmt::Display for Cents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let abs = self.0.unsigned_abs();
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{sign}${}.{:02}", abs / 100, abs % 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_dollars_rounds_half_away_from_zero() {
        assert_eq!(Cents::from_dollars_f64(171.25).unwrap(), Cents::new(17_125));
        assert_eq!(Cents::from_dollars_f64(0.005).unwrap(), Cents::new(1));
        assert_eq!(Cents::from_dollars_f64(-0.005).unwrap(), Cents::new(-1));
        // 19.99 * 100 = 1998.9999999999998 in binary; truncation would lose a cent
        assert_eq!(Cents::from_dollars_f64(19.99).unwrap(), Cents::new(1_999));
    }

    #[test]
    fn from_dollars_rejects_non_finite() {
        assert_eq!(Cents::from_dollars_f64(f64::NAN), Err(CentsError::NonFinite));
        assert_eq!(
            Cents::from_dollars_f64(f64::INFINITY),
            Err(CentsError::NonFinite)
        );
        assert_eq!(Cents::from_dollars_f64(1e30), Err(CentsError::OutOfRange));
    }

    #[test]
    fn parse_decimal_variants() {
        assert_eq!(Cents::parse_decimal("1,234.5").unwrap(), Cents::new(123_450));
        assert_eq!(Cents::parse_decimal("-$12.34").unwrap(), Cents::new(-1_234));
        assert_eq!(Cents::parse_decimal("(7.10)").unwrap(), Cents::new(-710));
        assert_eq!(Cents::parse_decimal("42").unwrap(), Cents::new(4_200));
        assert_eq!(Cents::parse_decimal(".5").unwrap(), Cents::new(50));
        assert_eq!(Cents::parse_decimal(" 0.07 ").unwrap(), Cents::new(7));
    }

    #[test]
    fn parse_decimal_rejects_garbage() {
        assert!(Cents::parse_decimal("").is_err());
        assert!(Cents::parse_decimal("abc").is_err());
        assert!(Cents::parse_decimal("1.234").is_err());
        assert!(Cents::parse_decimal("1.2.3").is_err());
        assert!(Cents::parse_decimal("-").is_err());
    }

    #[test]
    fn checked_mul_qty_overflow_returns_none() {
        assert_eq!(Cents::new(5_000).checked_mul_qty(10), Some(Cents::new(50_000)));
        assert_eq!(Cents::MAX.checked_mul_qty(2), None);
    }

    #[test]
    fn display_formats_dollars() {
        assert_eq!(Cents::new(56_000).to_string(), "$560.00");
        assert_eq!(Cents::new(-75).to_string(), "-$0.75");
        assert_eq!(Cents::new(5).to_string(), "$0.05");
        assert_eq!(Cents::MIN.to_string(), "-$92233720368547758.08");
    }

    #[test]
    fn arithmetic_ops() {
        let mut acc = Cents::new(100);
        acc += Cents::new(50);
        acc -= Cents::new(20);
        assert_eq!(acc, Cents::new(130));
        assert_eq!(-acc, Cents::new(-130));
        assert_eq!(acc + Cents::ZERO, acc);
        assert_eq!(Cents::new(3).min(Cents::new(-1)), Cents::new(-1));
    }
}
