//! Conversions from node/API amount representations into integer satoshi.
//!
//! Every float or decimal-string amount that enters the system goes through
//! this module. Parsing is done on the decimal text itself so that values such
//! as `0.29` BTC never pick up binary floating point error on the way to
//! `29_000_000` sats.
//!
//! Rounding rule:
//! - [`Rounding::Nearest`] (half away from zero) for user-facing amounts and
//!   for UTXO values reported by the node.
//! - [`Rounding::Truncate`] (toward zero) for node-reported transaction
//!   amounts, where the node never emits more than 8 fractional digits.

use thiserror::Error;

pub const SATS_PER_BTC: i64 = 100_000_000;
pub const MSATS_PER_SAT: i64 = 1_000;

const BTC_DECIMALS: u32 = 8;
const FIAT_DECIMALS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    Nearest,
    Truncate,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("invalid decimal amount: {0:?}")]
    Invalid(String),

    #[error("amount out of range: {0}")]
    OutOfRange(String),
}

/// Parse a decimal string (optionally signed, optionally with an exponent)
/// and scale it by `10^scale`, rounding the remainder as requested.
pub fn decimal_to_units(input: &str, scale: u32, rounding: Rounding) -> Result<i64, AmountError> {
    let text = input.trim();
    let invalid = || AmountError::Invalid(input.to_string());

    let (negative, unsigned) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        Some(_) => (false, text),
        None => return Err(invalid()),
    };

    let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
        Some(pos) => {
            let exp: i64 = unsigned[pos + 1..].parse().map_err(|_| invalid())?;
            (&unsigned[..pos], exp)
        }
        None => (unsigned, 0),
    };

    let (int_part, frac_part) = match mantissa.split_once('.') {
        Some((i, f)) => (i, f),
        None => (mantissa, ""),
    };

    if int_part.is_empty() && frac_part.is_empty() {
        return Err(invalid());
    }
    if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let digits: Vec<u8> = int_part
        .bytes()
        .chain(frac_part.bytes())
        .map(|b| b - b'0')
        .collect();

    // Number of digits that end up left of the decimal point once scaled.
    let shift = exponent
        .checked_add(int_part.len() as i64 + scale as i64)
        .ok_or_else(|| AmountError::OutOfRange(input.to_string()))?;

    if shift > 30 {
        if digits.iter().all(|d| *d == 0) {
            return Ok(0);
        }
        return Err(AmountError::OutOfRange(input.to_string()));
    }

    let mut units: i128 = 0;
    for i in 0..shift.max(0) {
        let digit = digits.get(i as usize).copied().unwrap_or(0);
        units = units * 10 + digit as i128;
    }

    if rounding == Rounding::Nearest {
        let next = if shift < 0 {
            0
        } else {
            digits.get(shift as usize).copied().unwrap_or(0)
        };
        if next >= 5 {
            units += 1;
        }
    }

    let signed = if negative { -units } else { units };
    i64::try_from(signed).map_err(|_| AmountError::OutOfRange(input.to_string()))
}

/// Convert a BTC amount reported as a float into satoshi.
pub fn btc_to_sats(btc: f64, rounding: Rounding) -> Result<i64, AmountError> {
    if !btc.is_finite() {
        return Err(AmountError::Invalid(btc.to_string()));
    }
    // Display yields the shortest representation that round-trips.
    decimal_to_units(&format!("{}", btc), BTC_DECIMALS, rounding)
}

/// Convert a BTC amount carried as a JSON number without going through `f64`
/// arithmetic.
pub fn json_btc_to_sats(value: &serde_json::Number, rounding: Rounding) -> Result<i64, AmountError> {
    decimal_to_units(&value.to_string(), BTC_DECIMALS, rounding)
}

/// Milli-satoshi decimal string to satoshi (integer division).
pub fn msat_to_sats(msat: &str) -> Result<i64, AmountError> {
    let value: i64 = msat
        .trim()
        .parse()
        .map_err(|_| AmountError::Invalid(msat.to_string()))?;
    Ok(value / MSATS_PER_SAT)
}

/// Balance in the smallest unit of `currency`: 10^8 for BTC, 10^2 otherwise.
pub fn currency_to_minor_units(amount: &str, currency: &str) -> Result<i64, AmountError> {
    let scale = if currency.eq_ignore_ascii_case("BTC") {
        BTC_DECIMALS
    } else {
        FIAT_DECIMALS
    };
    decimal_to_units(amount, scale, Rounding::Nearest)
}

pub fn sats_to_btc(sats: i64) -> f64 {
    sats as f64 / SATS_PER_BTC as f64
}
