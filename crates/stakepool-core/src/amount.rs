use crate::error::AmountError;

/// Value in base units.
pub type Amount = u64;

/// Base units per whole unit of native value.
pub const UNIT: Amount = 1_000_000_000;

const DECIMALS: usize = 9;

/// Parse a decimal amount of whole units ("1", "0.5", "12.000000001") into
/// base units. Rounding never happens: more than nine fractional digits is an
/// error.
pub fn parse_units(input: &str) -> Result<Amount, AmountError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(AmountError::Empty);
    }
    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(AmountError::Invalid(s.to_string()));
    }
    let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(whole) || !all_digits(frac) {
        return Err(AmountError::Invalid(s.to_string()));
    }
    if frac.len() > DECIMALS {
        return Err(AmountError::TooPrecise(s.to_string()));
    }

    let overflow = || AmountError::Overflow(s.to_string());
    let whole_units: Amount = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| overflow())?
    };
    let frac_units: Amount = if frac.is_empty() {
        0
    } else {
        let padded = format!("{frac:0<width$}", width = DECIMALS);
        padded.parse().map_err(|_| overflow())?
    };
    whole_units
        .checked_mul(UNIT)
        .and_then(|v| v.checked_add(frac_units))
        .ok_or_else(overflow)
}

/// Render base units as a decimal amount of whole units, without trailing
/// fractional zeros.
pub fn format_units(amount: Amount) -> String {
    let whole = amount / UNIT;
    let frac = amount % UNIT;
    if frac == 0 {
        return whole.to_string();
    }
    let digits = format!("{frac:0>width$}", width = DECIMALS);
    format!("{whole}.{}", digits.trim_end_matches('0'))
}
