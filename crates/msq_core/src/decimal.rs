//! Exact decimal arithmetic: arbitrary-precision significand + scale 0..=28.
//! Value = significand · 10^(−scale). Integer-first throughout; floats do not
//! exist anywhere in the engine.
//!
//! - add/sub align to the larger scale (shift the smaller significand)
//! - mul adds scales; the result is reduced before the scale bound is checked
//! - div extends the numerator by `DIV_EXTRA_PRECISION` digits and truncates
//!   toward zero
//! - equality and ordering are numeric (scale-aligned), not representational

use std::cmp::Ordering;
use std::fmt;

use num_bigint::BigInt;
use num_bigint::Sign;

use crate::errors::ErrorKind;

/// Largest admissible scale. A parse or an operation that cannot be reduced
/// into this range is `InvalidDecimal`.
pub const MAX_SCALE: u32 = 28;

/// Extra precision digits appended to the numerator before division.
pub const DIV_EXTRA_PRECISION: u32 = 8;

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum DecimalError {
    #[error("invalid decimal: {0}")]
    Invalid(String),
    #[error("decimal division by zero")]
    DivByZero,
}

impl DecimalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DecimalError::Invalid(_) => ErrorKind::InvalidDecimal,
            DecimalError::DivByZero => ErrorKind::DecimalDivByZero,
        }
    }
}

/// Exact decimal. Construction keeps `scale <= MAX_SCALE`; arithmetic
/// preserves that bound or fails, never silently rounds a scale away.
#[derive(Clone, Debug)]
pub struct Decimal {
    sig: BigInt,
    scale: u32,
}

fn pow10(n: u32) -> BigInt {
    let mut p = BigInt::from(1u8);
    let ten = BigInt::from(10u8);
    for _ in 0..n {
        p *= &ten;
    }
    p
}

impl Decimal {
    pub fn new(sig: BigInt, scale: u32) -> Result<Self, DecimalError> {
        if scale > MAX_SCALE {
            return Err(DecimalError::Invalid(format!(
                "scale {scale} exceeds maximum {MAX_SCALE}"
            )));
        }
        Ok(Decimal { sig, scale })
    }

    pub fn from_int(n: i64) -> Self {
        Decimal {
            sig: BigInt::from(n),
            scale: 0,
        }
    }

    pub fn zero() -> Self {
        Decimal::from_int(0)
    }

    pub fn significand(&self) -> &BigInt {
        &self.sig
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    pub fn is_zero(&self) -> bool {
        self.sig.sign() == Sign::NoSign
    }

    /// Parse `[-]digits[.digits]`. Scale is taken from the written fraction
    /// (so `"10.50"` has scale 2); leading zeros are accepted on input and
    /// removed only by canonical emission.
    pub fn parse(s: &str) -> Result<Self, DecimalError> {
        let bytes = s.as_bytes();
        let invalid = || DecimalError::Invalid(s.to_string());

        let (neg, rest) = match bytes.first() {
            Some(b'-') => (true, &s[1..]),
            Some(_) => (false, s),
            None => return Err(invalid()),
        };
        let (int_part, frac_part) = match rest.split_once('.') {
            Some((i, f)) => (i, f),
            None => (rest, ""),
        };
        if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if rest.contains('.') && (frac_part.is_empty() || !frac_part.bytes().all(|b| b.is_ascii_digit())) {
            return Err(invalid());
        }
        let scale = u32::try_from(frac_part.len()).map_err(|_| invalid())?;
        if scale > MAX_SCALE {
            return Err(DecimalError::Invalid(format!(
                "fraction of {} digits exceeds scale {MAX_SCALE}",
                frac_part.len()
            )));
        }

        let mut digits = String::with_capacity(int_part.len() + frac_part.len());
        digits.push_str(int_part);
        digits.push_str(frac_part);
        let mut sig: BigInt = digits
            .parse()
            .map_err(|_| invalid())?;
        if neg {
            sig = -sig;
        }
        Ok(Decimal { sig, scale })
    }

    /// Shortest canonical form: no trailing fractional zeros, no bare point,
    /// zero is exactly `"0"` (never `"-0"`, never `"0.0"`).
    pub fn canonical_string(&self) -> String {
        if self.is_zero() {
            return "0".to_string();
        }
        let mut sig = self.sig.clone();
        let mut scale = self.scale;
        let ten = BigInt::from(10u8);
        while scale > 0 && (&sig % &ten).sign() == Sign::NoSign {
            sig /= &ten;
            scale -= 1;
        }

        let neg = sig.sign() == Sign::Minus;
        let mag = sig.magnitude().to_string();
        let mut out = String::new();
        if neg {
            out.push('-');
        }
        if scale == 0 {
            out.push_str(&mag);
        } else {
            let scale = scale as usize;
            if mag.len() > scale {
                out.push_str(&mag[..mag.len() - scale]);
                out.push('.');
                out.push_str(&mag[mag.len() - scale..]);
            } else {
                out.push_str("0.");
                for _ in 0..(scale - mag.len()) {
                    out.push('0');
                }
                out.push_str(&mag);
            }
        }
        out
    }

    fn aligned(&self, other: &Decimal) -> (BigInt, BigInt, u32) {
        let scale = self.scale.max(other.scale);
        let a = &self.sig * pow10(scale - self.scale);
        let b = &other.sig * pow10(scale - other.scale);
        (a, b, scale)
    }

    /// Strip trailing zero digits until `scale` fits the bound; error if the
    /// remaining significand still carries more fraction than `MAX_SCALE`.
    fn reduced(mut sig: BigInt, mut scale: u32) -> Result<Self, DecimalError> {
        let ten = BigInt::from(10u8);
        while scale > MAX_SCALE {
            if (&sig % &ten).sign() != Sign::NoSign {
                return Err(DecimalError::Invalid(format!(
                    "result scale {scale} exceeds maximum {MAX_SCALE}"
                )));
            }
            sig /= &ten;
            scale -= 1;
        }
        Ok(Decimal { sig, scale })
    }

    pub fn add(&self, other: &Decimal) -> Result<Decimal, DecimalError> {
        let (a, b, scale) = self.aligned(other);
        Ok(Decimal { sig: a + b, scale })
    }

    pub fn sub(&self, other: &Decimal) -> Result<Decimal, DecimalError> {
        let (a, b, scale) = self.aligned(other);
        Ok(Decimal { sig: a - b, scale })
    }

    pub fn mul(&self, other: &Decimal) -> Result<Decimal, DecimalError> {
        Decimal::reduced(&self.sig * &other.sig, self.scale + other.scale)
    }

    /// Truncating division with `DIV_EXTRA_PRECISION` extra digits:
    /// result scale = `self.scale + p − other.scale`, shifted back into range
    /// when the subtraction goes negative.
    pub fn div(&self, other: &Decimal) -> Result<Decimal, DecimalError> {
        if other.is_zero() {
            return Err(DecimalError::DivByZero);
        }
        let p = DIV_EXTRA_PRECISION;
        let num = &self.sig * pow10(p);
        let quot = num / &other.sig;
        let raw_scale = i64::from(self.scale) + i64::from(p) - i64::from(other.scale);
        if raw_scale < 0 {
            let sig = quot * pow10(u32::try_from(-raw_scale).expect("bounded by MAX_SCALE"));
            Ok(Decimal { sig, scale: 0 })
        } else {
            Decimal::reduced(quot, u32::try_from(raw_scale).expect("bounded"))
        }
    }

    /// Numeric comparison: align to the common scale, compare significands.
    pub fn cmp_numeric(&self, other: &Decimal) -> Ordering {
        let (a, b, _) = self.aligned(other);
        a.cmp(&b)
    }
}

impl PartialEq for Decimal {
    fn eq(&self, other: &Self) -> bool {
        self.cmp_numeric(other) == Ordering::Equal
    }
}

impl Eq for Decimal {}

impl PartialOrd for Decimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp_numeric(other))
    }
}

impl Ord for Decimal {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_numeric(other)
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::parse(s).unwrap()
    }

    #[test]
    fn parse_keeps_written_scale() {
        assert_eq!(dec("10.50").scale(), 2);
        assert_eq!(dec("10.500").scale(), 3);
        assert_eq!(dec("42").scale(), 0);
    }

    #[test]
    fn canonical_form_is_shortest() {
        assert_eq!(dec("10.500").canonical_string(), "10.5");
        assert_eq!(dec("0.0").canonical_string(), "0");
        assert_eq!(dec("-0").canonical_string(), "0");
        assert_eq!(dec("-0.0500").canonical_string(), "-0.05");
        assert_eq!(dec("100").canonical_string(), "100");
        assert_eq!(dec("0.00000001").canonical_string(), "0.00000001");
    }

    #[test]
    fn add_aligns_scales() {
        let sum = dec("10.50").add(&dec("5.25")).unwrap();
        assert_eq!(sum.canonical_string(), "15.75");
        // Same value at wider written scales canonicalises identically.
        let sum2 = dec("10.500").add(&dec("5.250")).unwrap();
        assert_eq!(sum2.canonical_string(), "15.75");
        assert_eq!(sum, sum2);
    }

    #[test]
    fn sub_and_neg_results() {
        assert_eq!(dec("1.0").sub(&dec("2.5")).unwrap().canonical_string(), "-1.5");
        assert_eq!(dec("2.5").sub(&dec("2.5")).unwrap().canonical_string(), "0");
    }

    #[test]
    fn mul_adds_scales() {
        assert_eq!(dec("1.5").mul(&dec("2.5")).unwrap().canonical_string(), "3.75");
        assert_eq!(dec("0.1").mul(&dec("0.1")).unwrap().canonical_string(), "0.01");
    }

    #[test]
    fn div_truncates_with_extra_precision() {
        let q = dec("1").div(&dec("3")).unwrap();
        assert_eq!(q.canonical_string(), "0.33333333");
        let q = dec("10").div(&dec("4")).unwrap();
        assert_eq!(q.canonical_string(), "2.5");
    }

    #[test]
    fn div_by_zero_is_typed() {
        assert_eq!(dec("1").div(&dec("0")), Err(DecimalError::DivByZero));
        assert_eq!(dec("1").div(&dec("0.00")), Err(DecimalError::DivByZero));
    }

    #[test]
    fn div_negative_raw_scale_shifts_up() {
        // num.scale(0) + 8 − den.scale(10) would be negative if the scale
        // bound admitted it; the quotient must come back shifted, not panic.
        let a = dec("1000000000000");
        let b = dec("0.0000000001");
        let q = a.div(&b).unwrap();
        assert_eq!(q.canonical_string(), "10000000000000000000000");
    }

    #[test]
    fn scale_bound_enforced() {
        assert!(Decimal::parse("0.00000000000000000000000000001").is_err()); // 29 digits
        let tight = dec("0.0000000000000001"); // scale 16
        assert!(tight.mul(&tight).is_err()); // scale 32, no zeros to strip
    }

    #[test]
    fn equality_is_numeric() {
        assert_eq!(dec("10.50"), dec("10.5"));
        assert!(dec("2.5") > dec("2.05"));
        assert!(dec("-3") < dec("0"));
    }

    #[test]
    fn parse_rejects_garbage() {
        for bad in ["", "-", ".", "1.", ".5", "1..2", "1e5", "+1", "1,5", "NaN"] {
            assert!(Decimal::parse(bad).is_err(), "accepted {bad:?}");
        }
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn emit_parse_round_trip(sig in -1_000_000_000_000i64..1_000_000_000_000i64, scale in 0u32..=12) {
                let d = Decimal::new(BigInt::from(sig), scale).unwrap();
                let s = d.canonical_string();
                let back = Decimal::parse(&s).unwrap();
                prop_assert_eq!(back.clone(), d);
                // Canonical emission is a fixed point.
                prop_assert_eq!(back.canonical_string(), s);
            }

            #[test]
            fn canonical_never_trailing_zero(sig in -1_000_000i64..1_000_000i64, scale in 0u32..=8) {
                let d = Decimal::new(BigInt::from(sig), scale).unwrap();
                let s = d.canonical_string();
                if s.contains('.') {
                    prop_assert!(!s.ends_with('0'));
                    prop_assert!(!s.ends_with('.'));
                }
                prop_assert_ne!(s.as_str(), "-0");
            }
        }
    }
}
