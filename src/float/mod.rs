//! Floating-point value engine.
//!
//! Classification, parsing, and shortest round-trip formatting for the
//! 32/64-bit IEEE-754 encodings and the x87 80-bit extended format. The
//! 80-bit format carries an explicit integer bit, so it has encodings IEEE
//! never produces (pseudo-NaN/Inf, pseudo-denormals, unnormals); those are
//! classified here rather than silently misread.

use thiserror::Error;

mod decimal;

/// Classification of a raw floating-point bit pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatClass {
    Zero,
    Denormal,
    /// x87 only: exponent zero but integer bit set. Must be normalized to a
    /// supported encoding before further processing.
    PseudoDenormal,
    Normal,
    Infinity,
    QNaN,
    SNaN,
    /// x87 encodings with no defined value (pseudo-NaN/Inf, unnormals).
    Unsupported,
}

impl FloatClass {
    /// True for classes rendered as tagged hex rather than a decimal value.
    pub fn is_special(self) -> bool {
        matches!(
            self,
            FloatClass::Infinity | FloatClass::QNaN | FloatClass::SNaN | FloatClass::Unsupported
        )
    }
}

/// Width selector for the value-level entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatWidth {
    F32,
    F64,
    F80,
}

fn classify_ieee(bits: u64, mantissa_len: u32, exp_len: u32) -> FloatClass {
    let exp_max = (1u64 << exp_len) - 1;
    let qnan_mask = 1u64 << (mantissa_len - 1);
    let mantissa = bits & ((1u64 << mantissa_len) - 1);
    let exponent = (bits >> mantissa_len) & exp_max;

    if exponent == exp_max {
        if mantissa == 0 {
            FloatClass::Infinity // |S|11..11|00..00|
        } else if mantissa & qnan_mask != 0 {
            FloatClass::QNaN // |S|11..11|1XX..XX|
        } else {
            FloatClass::SNaN // |S|11..11|0XX..XX|
        }
    } else if exponent == 0 {
        if mantissa == 0 {
            FloatClass::Zero
        } else {
            FloatClass::Denormal
        }
    } else {
        FloatClass::Normal
    }
}

/// Classify a raw binary32 pattern.
pub fn classify_f32(bits: u32) -> FloatClass {
    classify_ieee(u64::from(bits), 23, 8)
}

/// Classify a raw binary64 pattern.
pub fn classify_f64(bits: u64) -> FloatClass {
    classify_ieee(bits, 52, 11)
}

/// An x87 80-bit extended-precision value: 64-bit significand with an
/// explicit integer bit, 15-bit exponent, sign bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Value80 {
    /// Full 64-bit significand including the explicit integer bit (bit 63).
    pub mantissa: u64,
    /// Sign bit (bit 15) and 15-bit biased exponent.
    pub sign_exponent: u16,
}

const EXP80_BIAS: i32 = 16383;
const EXP80_MAX: u16 = 0x7fff;
const INTEGER_BIT: u64 = 1 << 63;

impl Value80 {
    pub const POS_INFINITY: Value80 = Value80 {
        mantissa: INTEGER_BIT,
        sign_exponent: 0x7fff,
    };
    pub const NEG_INFINITY: Value80 = Value80 {
        mantissa: INTEGER_BIT,
        sign_exponent: 0xffff,
    };
    pub const POS_QNAN: Value80 = Value80 {
        mantissa: 0xc000_0000_0000_0000,
        sign_exponent: 0x7fff,
    };
    pub const NEG_QNAN: Value80 = Value80 {
        mantissa: 0xc000_0000_0000_0000,
        sign_exponent: 0xffff,
    };
    pub const POS_SNAN: Value80 = Value80 {
        mantissa: 0x9000_0000_0000_0000,
        sign_exponent: 0x7fff,
    };
    pub const NEG_SNAN: Value80 = Value80 {
        mantissa: 0x9000_0000_0000_0000,
        sign_exponent: 0xffff,
    };
    pub const ZERO: Value80 = Value80 {
        mantissa: 0,
        sign_exponent: 0,
    };

    pub fn from_le_bytes(bytes: [u8; 10]) -> Self {
        let mut m = [0u8; 8];
        m.copy_from_slice(&bytes[..8]);
        Self {
            mantissa: u64::from_le_bytes(m),
            sign_exponent: u16::from_le_bytes([bytes[8], bytes[9]]),
        }
    }

    pub fn to_le_bytes(self) -> [u8; 10] {
        let mut out = [0u8; 10];
        out[..8].copy_from_slice(&self.mantissa.to_le_bytes());
        out[8..].copy_from_slice(&self.sign_exponent.to_le_bytes());
        out
    }

    pub fn negative(self) -> bool {
        self.sign_exponent & 0x8000 != 0
    }

    /// Biased 15-bit exponent.
    pub fn exponent(self) -> u16 {
        self.sign_exponent & 0x7fff
    }

    pub fn classify(self) -> FloatClass {
        // Like the IEEE classification but keyed on the explicit integer bit
        // as well, to detect the encodings IEEE-754 has no counterpart for.
        let qnan_mask = 3u64 << 62;
        let exponent = self.exponent();
        let mantissa = self.mantissa;
        let integer_bit = mantissa & INTEGER_BIT != 0;

        if exponent == EXP80_MAX {
            if mantissa == INTEGER_BIT {
                FloatClass::Infinity // |S|11..11|1.000..0|
            } else if mantissa & qnan_mask == qnan_mask {
                FloatClass::QNaN // |S|11..11|1.1XX..X|
            } else if mantissa & qnan_mask == INTEGER_BIT {
                FloatClass::SNaN // |S|11..11|1.0XX..X|
            } else {
                // exponent all ones with integer bit clear: pseudo-NaN/Inf
                FloatClass::Unsupported
            }
        } else if exponent == 0 {
            if mantissa == 0 {
                FloatClass::Zero
            } else if integer_bit {
                FloatClass::PseudoDenormal // |S|00..00|1.XXX..X|
            } else {
                FloatClass::Denormal // |S|00..00|0.XXX..X|
            }
        } else if integer_bit {
            FloatClass::Normal
        } else {
            // normal-range exponent with integer bit clear: unnormal
            FloatClass::Unsupported
        }
    }

    /// Pseudo-denormals evaluate as if their exponent field were 1; rewrite
    /// them to that supported encoding, as the FPU itself would.
    pub fn normalized(self) -> Self {
        if self.classify() == FloatClass::PseudoDenormal {
            Value80 {
                mantissa: self.mantissa,
                sign_exponent: (self.sign_exponent & 0x8000) | 1,
            }
        } else {
            self
        }
    }

    /// Nearest binary64 value. Exact whenever the significand fits in 53
    /// bits and the exponent is in binary64 range.
    pub fn to_f64(self) -> f64 {
        let sign = if self.negative() { -1.0f64 } else { 1.0f64 };
        match self.classify() {
            FloatClass::Zero => sign * 0.0,
            FloatClass::Infinity => sign * f64::INFINITY,
            FloatClass::QNaN | FloatClass::SNaN | FloatClass::Unsupported => f64::NAN,
            FloatClass::PseudoDenormal => self.normalized().to_f64(),
            FloatClass::Normal | FloatClass::Denormal => {
                let exponent = if self.exponent() == 0 {
                    1 - EXP80_BIAS // denormal scale
                } else {
                    i32::from(self.exponent()) - EXP80_BIAS
                };
                // powi computes negative powers as a reciprocal, so a single
                // factor past 2^1023 collapses to zero; split the scale in
                // halves that each stay in range
                let e1 = exponent / 2;
                let e2 = exponent - e1;
                sign * (self.mantissa as f64) * 2f64.powi(-63) * 2f64.powi(e1) * 2f64.powi(e2)
            }
        }
    }

    /// Exact widening conversion from binary64.
    pub fn from_f64(value: f64) -> Self {
        let bits = value.to_bits();
        let sign = ((bits >> 63) as u16) << 15;
        let exp = ((bits >> 52) & 0x7ff) as i32;
        let frac = bits & ((1u64 << 52) - 1);

        match classify_f64(bits) {
            FloatClass::Zero => Value80 {
                mantissa: 0,
                sign_exponent: sign,
            },
            FloatClass::Infinity => Value80 {
                mantissa: INTEGER_BIT,
                sign_exponent: sign | EXP80_MAX,
            },
            FloatClass::QNaN => Value80 {
                mantissa: Value80::POS_QNAN.mantissa,
                sign_exponent: sign | EXP80_MAX,
            },
            FloatClass::SNaN => Value80 {
                mantissa: Value80::POS_SNAN.mantissa,
                sign_exponent: sign | EXP80_MAX,
            },
            FloatClass::Denormal => {
                // Renormalize: shift the fraction so its top bit becomes the
                // explicit integer bit, adjusting the exponent to match.
                let lz = frac.leading_zeros();
                let mantissa = frac << lz;
                let exponent = (EXP80_BIAS - 1074 + 63 - lz as i32) as u16;
                Value80 {
                    mantissa,
                    sign_exponent: sign | exponent,
                }
            }
            _ => {
                let mantissa = INTEGER_BIT | (frac << 11);
                let exponent = (exp - 1023 + EXP80_BIAS) as u16;
                Value80 {
                    mantissa,
                    sign_exponent: sign | exponent,
                }
            }
        }
    }

    pub fn to_hex(self) -> String {
        format!("{:04x}{:016x}", self.sign_exponent, self.mantissa)
    }
}

/// Parse failure, split so interactive callers can tell "wrong" from
/// "not finished typing yet".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FloatParseError {
    #[error("invalid floating-point text: {0:?}")]
    Invalid(String),
    #[error("incomplete floating-point text: {0:?}")]
    Incomplete(String),
}

/// Validation verdict for partially typed input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    Acceptable,
    Intermediate,
    Invalid,
}

/// Signed special-literal lookup, shared by all widths. Returned flags are
/// (negative, class-selector) for the caller to map onto exact patterns.
fn special_literal(text: &str) -> Option<(bool, FloatClass)> {
    let (neg, rest) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    match rest {
        "inf" => Some((neg, FloatClass::Infinity)),
        "qnan" | "nan" => Some((neg, FloatClass::QNaN)),
        "snan" => Some((neg, FloatClass::SNaN)),
        _ => None,
    }
}

/// Digits and scale of a hex-float literal: the value is
/// `mantissa * 2^exponent`, with `truncated` set when nonzero digits were
/// dropped past the 121-bit accumulator.
struct HexParts {
    negative: bool,
    mantissa: u128,
    exponent: i32,
    truncated: bool,
}

/// Tokenize a hex-float literal (`[+-]0x1.8p3`). `parse::<f64>` does not
/// accept this form, so it is handled by hand.
fn parse_hex_parts(text: &str) -> Option<HexParts> {
    let (negative, rest) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let rest = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X"))?;

    let mut mantissa: u128 = 0;
    let mut frac_digits: i32 = 0;
    let mut whole_skips: i32 = 0;
    let mut truncated = false;
    let mut seen_digit = false;
    let mut in_frac = false;
    let mut chars = rest.char_indices();
    let mut exp_part: Option<&str> = None;

    for (i, c) in chars.by_ref() {
        match c {
            '0'..='9' | 'a'..='f' | 'A'..='F' => {
                seen_digit = true;
                let digit = c.to_digit(16)?;
                // saturate rather than overflow on absurdly long digit runs;
                // skipped whole-part digits still scale the value
                if mantissa >> 120 == 0 {
                    mantissa = (mantissa << 4) | u128::from(digit);
                    if in_frac {
                        frac_digits += 1;
                    }
                } else {
                    truncated |= digit != 0;
                    if !in_frac {
                        whole_skips += 1;
                    }
                }
            }
            '.' if !in_frac => in_frac = true,
            'p' | 'P' => {
                exp_part = Some(&rest[i + 1..]);
                break;
            }
            _ => return None,
        }
    }
    if !seen_digit {
        return None;
    }

    let exponent: i32 = match exp_part {
        Some(e) if !e.is_empty() => e.parse().ok()?,
        Some(_) => return None,
        None => 0,
    };

    Some(HexParts {
        negative,
        mantissa,
        exponent: exponent.saturating_add(4 * (whole_skips - frac_digits)),
        truncated,
    })
}

fn parse_hex_float(text: &str) -> Option<f64> {
    let parts = parse_hex_parts(text)?;
    let value = parts.mantissa as f64 * 2f64.powi(parts.exponent);
    Some(if parts.negative { -value } else { value })
}

/// Hex-float parse at full 64-bit significand precision, rounding to
/// nearest with ties to even.
fn parse_hex_extended(text: &str) -> Option<Value80> {
    let parts = parse_hex_parts(text)?;
    let sign = if parts.negative { 0x8000u16 } else { 0 };
    if parts.mantissa == 0 {
        return Some(Value80 {
            mantissa: 0,
            sign_exponent: sign,
        });
    }
    let infinity = if parts.negative {
        Value80::NEG_INFINITY
    } else {
        Value80::POS_INFINITY
    };

    let bits = 128 - parts.mantissa.leading_zeros() as i32;
    // unbiased exponent of the leading significand bit
    let mut e = parts.exponent.saturating_add(bits - 1);
    if e > EXP80_BIAS {
        return Some(infinity);
    }
    let exp_min = 1 - EXP80_BIAS;
    if e < exp_min - 64 {
        // below half the smallest denormal
        return Some(Value80 {
            mantissa: 0,
            sign_exponent: sign,
        });
    }

    let shift = (bits - 64) + (exp_min - e).max(0);
    let mut mantissa: u64;
    if shift <= 0 {
        mantissa = (parts.mantissa << (-shift) as u32) as u64;
    } else {
        let shift = shift as u32;
        mantissa = (parts.mantissa >> shift) as u64;
        let guard = (parts.mantissa >> (shift - 1)) & 1 == 1;
        let rest = parts.truncated || parts.mantissa & ((1u128 << (shift - 1)) - 1) != 0;
        if guard && (rest || mantissa & 1 == 1) {
            if mantissa == u64::MAX {
                mantissa = 1 << 63;
                e += 1;
                if e > EXP80_BIAS {
                    return Some(infinity);
                }
            } else {
                mantissa += 1;
            }
        }
    }

    if mantissa == 0 {
        return Some(Value80 {
            mantissa: 0,
            sign_exponent: sign,
        });
    }
    let biased = if mantissa >> 63 == 0 {
        0
    } else {
        (e.max(exp_min) + EXP80_BIAS) as u16
    };
    Some(Value80 {
        mantissa,
        sign_exponent: sign | biased,
    })
}

fn parse_finite_f64(text: &str) -> Option<f64> {
    if text.contains(['x', 'X']) {
        return parse_hex_float(text);
    }
    match text.parse::<f64>() {
        // reject "inf"/"nan" here; special literals get exact patterns below
        Ok(v) if v.is_finite() => Some(v),
        _ => None,
    }
}

/// Parse text into a raw binary32 pattern.
pub fn parse_f32(text: &str) -> Result<u32, FloatParseError> {
    let text = text.trim().to_ascii_lowercase();
    if let Some((neg, class)) = special_literal(&text) {
        let sign = if neg { 0x8000_0000u32 } else { 0 };
        return Ok(sign
            | match class {
                FloatClass::Infinity => 0x7f80_0000,
                FloatClass::QNaN => 0x7fc0_0000,
                _ => 0x7fa0_0000, // SNaN
            });
    }
    if let Some(v) = parse_finite_f64(&text) {
        return Ok((v as f32).to_bits());
    }
    Err(classify_parse_failure(&text))
}

/// Parse text into a raw binary64 pattern.
pub fn parse_f64(text: &str) -> Result<u64, FloatParseError> {
    let text = text.trim().to_ascii_lowercase();
    if let Some((neg, class)) = special_literal(&text) {
        let sign = if neg { 0x8000_0000_0000_0000u64 } else { 0 };
        return Ok(sign
            | match class {
                FloatClass::Infinity => 0x7ff0_0000_0000_0000,
                FloatClass::QNaN => 0x7ff8_0000_0000_0000,
                _ => 0x7ff4_0000_0000_0000, // SNaN
            });
    }
    if let Some(v) = parse_finite_f64(&text) {
        return Ok(v.to_bits());
    }
    Err(classify_parse_failure(&text))
}

/// Parse text into an 80-bit extended value.
pub fn parse_f80(text: &str) -> Result<Value80, FloatParseError> {
    let text = text.trim().to_ascii_lowercase();
    if let Some((neg, class)) = special_literal(&text) {
        return Ok(match (class, neg) {
            (FloatClass::Infinity, false) => Value80::POS_INFINITY,
            (FloatClass::Infinity, true) => Value80::NEG_INFINITY,
            (FloatClass::QNaN, false) => Value80::POS_QNAN,
            (FloatClass::QNaN, true) => Value80::NEG_QNAN,
            (_, false) => Value80::POS_SNAN,
            (_, true) => Value80::NEG_SNAN,
        });
    }
    // decimal and hex-float forms are rounded at full significand width;
    // a binary64 intermediate would lose the low 11 bits
    if text.contains(['x', 'X']) {
        if let Some(v) = parse_hex_extended(&text) {
            return Ok(v);
        }
    } else if let Some(v) = decimal::parse_decimal(&text) {
        return Ok(v);
    }
    Err(classify_parse_failure(&text))
}

fn classify_parse_failure(text: &str) -> FloatParseError {
    match validate(text) {
        Validity::Intermediate => FloatParseError::Incomplete(text.to_string()),
        _ => FloatParseError::Invalid(text.to_string()),
    }
}

/// Interactive validation: is `text` a finished value, a prefix of one, or
/// hopeless? Editing widgets use this to gate commit vs keep-typing.
pub fn validate(text: &str) -> Validity {
    if text.is_empty() {
        return Validity::Intermediate;
    }
    let lower = text.trim().to_ascii_lowercase();
    if special_literal(&lower).is_some() {
        return Validity::Acceptable;
    }
    if parse_finite_f64(&lower).is_some() {
        return Validity::Acceptable;
    }
    if matches_hexfloat_prefix(&lower) || matches_decimal_prefix(&lower) {
        return Validity::Intermediate;
    }
    if matches_special_prefix(&lower) {
        return Validity::Intermediate;
    }
    Validity::Invalid
}

/// `[+-]?[0-9]*.?[0-9]*(e[+-]?[0-9]*)?`
fn matches_decimal_prefix(s: &str) -> bool {
    let mut rest = s.strip_prefix(['+', '-']).unwrap_or(s);
    rest = rest.trim_start_matches(|c: char| c.is_ascii_digit());
    if let Some(r) = rest.strip_prefix('.') {
        rest = r.trim_start_matches(|c: char| c.is_ascii_digit());
    }
    if let Some(r) = rest.strip_prefix('e') {
        rest = r.strip_prefix(['+', '-']).unwrap_or(r);
        rest = rest.trim_start_matches(|c: char| c.is_ascii_digit());
    }
    rest.is_empty()
}

/// `[+-]?0x[0-9a-f]*.?[0-9a-f]*(p[+-]?[0-9]*)?`
fn matches_hexfloat_prefix(s: &str) -> bool {
    let rest = s.strip_prefix(['+', '-']).unwrap_or(s);
    let Some(rest) = rest.strip_prefix("0x") else {
        // still typing the "0x" introducer
        return rest.is_empty() || rest == "0";
    };
    let mut rest = rest.trim_start_matches(|c: char| c.is_ascii_hexdigit());
    if let Some(r) = rest.strip_prefix('.') {
        rest = r.trim_start_matches(|c: char| c.is_ascii_hexdigit());
    }
    if let Some(r) = rest.strip_prefix('p') {
        rest = r.strip_prefix(['+', '-']).unwrap_or(r);
        rest = rest.trim_start_matches(|c: char| c.is_ascii_digit());
    }
    rest.is_empty()
}

/// Prefixes of `[+-]?[sq]?nan` and `[+-]?inf`.
fn matches_special_prefix(s: &str) -> bool {
    let rest = s.strip_prefix(['+', '-']).unwrap_or(s);
    const COMPLETIONS: [&str; 4] = ["snan", "qnan", "nan", "inf"];
    COMPLETIONS.iter().any(|full| full.starts_with(rest))
}

/// Append `.0` when the shortest rendering looks like a plain integer, so a
/// register showing `25` as a float is not mistaken for an integer view.
fn disambiguate_integral(mut s: String) -> String {
    if !s.contains(['.', 'e', 'E']) {
        s.push_str(".0");
    }
    s
}

/// Group a hex pattern into 8-digit chunks from the right, matching the
/// layout FPU registers are displayed in.
fn group_hex(hex: &str) -> String {
    let mut out = String::with_capacity(hex.len() + 2);
    let lead = hex.len() % 8;
    if lead != 0 {
        out.push_str(&hex[..lead]);
    }
    for chunk in hex[lead..].as_bytes().chunks(8) {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(std::str::from_utf8(chunk).unwrap_or(""));
    }
    out
}

fn special_text(class: FloatClass, negative: bool, hex: &str) -> String {
    let sign = if negative { "-" } else { "+" };
    match class {
        FloatClass::Infinity => format!("{sign}INF"),
        FloatClass::QNaN => format!("{sign}QNAN {}", group_hex(hex)),
        FloatClass::SNaN => format!("{sign}SNAN {}", group_hex(hex)),
        _ => format!("{sign}BAD {}", group_hex(hex)),
    }
}

/// Shortest round-trip text for a raw binary32 pattern.
pub fn format_f32(bits: u32) -> String {
    let negative = bits & 0x8000_0000 != 0;
    match classify_f32(bits) {
        FloatClass::Zero => (if negative { "-0.0" } else { "0.0" }).to_string(),
        FloatClass::Normal | FloatClass::Denormal => {
            disambiguate_integral(f32::from_bits(bits).to_string())
        }
        class => special_text(class, negative, &format!("{bits:08x}")),
    }
}

/// Shortest round-trip text for a raw binary64 pattern.
pub fn format_f64(bits: u64) -> String {
    let negative = bits & 0x8000_0000_0000_0000 != 0;
    match classify_f64(bits) {
        FloatClass::Zero => (if negative { "-0.0" } else { "0.0" }).to_string(),
        FloatClass::Normal | FloatClass::Denormal => {
            disambiguate_integral(f64::from_bits(bits).to_string())
        }
        class => special_text(class, negative, &format!("{bits:016x}")),
    }
}

/// Text for an 80-bit extended value. Finite values are rendered with
/// enough digits to reconstruct every significand bit on re-parse.
pub fn format_f80(value: Value80) -> String {
    let negative = value.negative();
    match value.classify() {
        FloatClass::Zero => (if negative { "-0.0" } else { "0.0" }).to_string(),
        FloatClass::Normal | FloatClass::Denormal | FloatClass::PseudoDenormal => {
            decimal::format_finite(value.normalized())
        }
        class => special_text(class, negative, &value.to_hex()),
    }
}

/// Width-dispatched classification over a raw bit pattern.
pub fn classify(bits: u128, width: FloatWidth) -> FloatClass {
    match width {
        FloatWidth::F32 => classify_f32(bits as u32),
        FloatWidth::F64 => classify_f64(bits as u64),
        FloatWidth::F80 => Value80 {
            mantissa: bits as u64,
            sign_exponent: (bits >> 64) as u16,
        }
        .classify(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_binary32_corners() {
        assert_eq!(classify_f32(0x0000_0000), FloatClass::Zero);
        assert_eq!(classify_f32(0x8000_0000), FloatClass::Zero);
        assert_eq!(classify_f32(0x0000_0001), FloatClass::Denormal);
        assert_eq!(classify_f32(0x3f80_0000), FloatClass::Normal); // 1.0
        assert_eq!(classify_f32(0x7f80_0000), FloatClass::Infinity);
        assert_eq!(classify_f32(0xff80_0000), FloatClass::Infinity);
        assert_eq!(classify_f32(0x7fc0_0000), FloatClass::QNaN);
        assert_eq!(classify_f32(0x7fa0_0000), FloatClass::SNaN);
    }

    #[test]
    fn classify_binary64_corners() {
        assert_eq!(classify_f64(0x7ff0_0000_0000_0000), FloatClass::Infinity);
        assert_eq!(classify_f64(0x7ff8_0000_0000_0000), FloatClass::QNaN);
        assert_eq!(classify_f64(0x7ff4_0000_0000_0000), FloatClass::SNaN);
        assert_eq!(classify_f64(0x0010_0000_0000_0000), FloatClass::Normal);
        assert_eq!(classify_f64(0x0000_0000_0000_0001), FloatClass::Denormal);
    }

    #[test]
    fn classify_extended_corners() {
        // max exponent with integer bit clear is a pseudo-Inf: unsupported
        let pseudo_inf = Value80 {
            mantissa: 0,
            sign_exponent: 0x7fff,
        };
        assert_eq!(pseudo_inf.classify(), FloatClass::Unsupported);
        assert_eq!(Value80::POS_INFINITY.classify(), FloatClass::Infinity);
        assert_eq!(Value80::POS_QNAN.classify(), FloatClass::QNaN);
        assert_eq!(Value80::POS_SNAN.classify(), FloatClass::SNaN);

        // exponent zero with integer bit set
        let pseudo_denormal = Value80 {
            mantissa: INTEGER_BIT | 1,
            sign_exponent: 0,
        };
        assert_eq!(pseudo_denormal.classify(), FloatClass::PseudoDenormal);
        assert_eq!(pseudo_denormal.normalized().classify(), FloatClass::Normal);

        // normal-range exponent with integer bit clear: unnormal
        let unnormal = Value80 {
            mantissa: 1,
            sign_exponent: 0x4000,
        };
        assert_eq!(unnormal.classify(), FloatClass::Unsupported);
    }

    #[test]
    fn extended_f64_round_trip() {
        for v in [0.0f64, 1.0, -1.0, 1.5, -2.75, 1e300, 5e-300, 0.1] {
            assert_eq!(Value80::from_f64(v).to_f64(), v, "value {v}");
        }
        // denormal binary64 survives the widening
        let tiny = f64::from_bits(1);
        assert_eq!(Value80::from_f64(tiny).to_f64(), tiny);
    }

    #[test]
    fn extended_format_round_trips_all_significand_bits() {
        // 1 + 2^-63 differs from 1.0 only in the last significand bit, well
        // past what a binary64 intermediate could carry
        let fine = Value80 {
            mantissa: INTEGER_BIT | 1,
            sign_exponent: 16383,
        };
        let text = format_f80(fine);
        assert_eq!(text, "1.00000000000000000011");
        assert_eq!(parse_f80(&text).unwrap(), fine);

        for value in [
            Value80 {
                mantissa: u64::MAX,
                sign_exponent: 16383,
            },
            Value80 {
                mantissa: 0xdead_beef_cafe_f00d,
                sign_exponent: 0x8000 | 16380,
            },
            // smallest and largest denormals
            Value80 {
                mantissa: 1,
                sign_exponent: 0,
            },
            Value80 {
                mantissa: (1 << 63) - 1,
                sign_exponent: 0,
            },
            // largest finite value
            Value80 {
                mantissa: u64::MAX,
                sign_exponent: 0x7ffe,
            },
            Value80::from_f64(0.1),
            Value80::from_f64(-1e300),
        ] {
            let text = format_f80(value);
            assert_eq!(parse_f80(&text).unwrap(), value, "text {text}");
        }
    }

    #[test]
    fn extended_hex_float_keeps_full_precision() {
        // 65 mantissa bits in the literal round to the odd neighbor of 1.0
        let v = parse_f80("0x1.0000000000000002p0").unwrap();
        assert_eq!(v.mantissa, INTEGER_BIT | 1);
        assert_eq!(v.sign_exponent, 16383);

        assert_eq!(
            parse_f80("-0x1p-16445").unwrap(),
            Value80 {
                mantissa: 1,
                sign_exponent: 0x8000,
            }
        );
        assert_eq!(parse_f80("0x1p17000").unwrap(), Value80::POS_INFINITY);
    }

    #[test]
    fn special_literals_have_exact_patterns() {
        assert_eq!(parse_f32("+qnan").unwrap(), 0x7fc0_0000);
        assert_eq!(parse_f32("-inf").unwrap(), 0xff80_0000);
        assert_eq!(parse_f32("SNaN").unwrap(), 0x7fa0_0000);
        assert_eq!(parse_f64("nan").unwrap(), 0x7ff8_0000_0000_0000);
        assert_eq!(parse_f64("-snan").unwrap(), 0xfff4_0000_0000_0000);
        assert_eq!(parse_f80("inf").unwrap(), Value80::POS_INFINITY);
        assert_eq!(parse_f80("-qnan").unwrap(), Value80::NEG_QNAN);
        assert_eq!(
            classify_f32(parse_f32("snan").unwrap()),
            FloatClass::SNaN
        );
    }

    #[test]
    fn parse_decimal_and_hexfloat() {
        assert_eq!(parse_f64("1.5").unwrap(), 1.5f64.to_bits());
        assert_eq!(parse_f64("-2.5e3").unwrap(), (-2500.0f64).to_bits());
        assert_eq!(parse_f64("0x1.8p1").unwrap(), 3.0f64.to_bits());
        assert_eq!(parse_f64("0x10p0").unwrap(), 16.0f64.to_bits());
        assert_eq!(parse_f64("-0x1p-1").unwrap(), (-0.5f64).to_bits());
        assert_eq!(parse_f32("1.5").unwrap(), 1.5f32.to_bits());
        assert!(parse_f64("1.5.5").is_err());
    }

    #[test]
    fn parse_failure_kinds() {
        assert_eq!(
            parse_f64("1.5e"),
            Err(FloatParseError::Incomplete("1.5e".into()))
        );
        assert_eq!(
            parse_f64("hello"),
            Err(FloatParseError::Invalid("hello".into()))
        );
    }

    #[test]
    fn format_shortest_round_trip() {
        assert_eq!(format_f64(1.5f64.to_bits()), "1.5");
        assert_eq!(format_f64(25.0f64.to_bits()), "25.0");
        assert_eq!(format_f64((-0.1f64).to_bits()), "-0.1");
        assert_eq!(format_f32(1.5f32.to_bits()), "1.5");
        assert_eq!(format_f64(0.0f64.to_bits()), "0.0");
        assert_eq!(format_f64((-0.0f64).to_bits()), "-0.0");

        for bits in [
            1.5f64.to_bits(),
            0.1f64.to_bits(),
            (1.0f64 / 3.0).to_bits(),
            f64::MAX.to_bits(),
            f64::MIN_POSITIVE.to_bits(),
            1u64, // smallest denormal
        ] {
            let text = format_f64(bits);
            assert_eq!(parse_f64(&text).unwrap(), bits, "text {text}");
        }
        for bits in [1.5f32.to_bits(), 0.1f32.to_bits(), f32::MAX.to_bits(), 1u32] {
            let text = format_f32(bits);
            assert_eq!(parse_f32(&text).unwrap(), bits, "text {text}");
        }
    }

    #[test]
    fn format_specials() {
        assert_eq!(format_f32(0x7f80_0000), "+INF");
        assert_eq!(format_f32(0xff80_0000), "-INF");
        assert_eq!(format_f32(0x7fc0_0000), "+QNAN 7fc00000");
        assert_eq!(format_f64(0xfff4_0000_0000_0000), "-SNAN fff40000 00000000");
        assert_eq!(
            format_f80(Value80 {
                mantissa: 0,
                sign_exponent: 0x7fff
            }),
            "+BAD 7fff 00000000 00000000"
        );
        assert_eq!(format_f80(Value80::from_f64(1.5)), "1.5");
    }

    #[test]
    fn interactive_validation() {
        assert_eq!(validate(""), Validity::Intermediate);
        assert_eq!(validate("1.5"), Validity::Acceptable);
        assert_eq!(validate("1.5e"), Validity::Intermediate);
        assert_eq!(validate("-"), Validity::Intermediate);
        assert_eq!(validate("0x1.8p"), Validity::Intermediate);
        assert_eq!(validate("in"), Validity::Intermediate);
        assert_eq!(validate("-sn"), Validity::Intermediate);
        assert_eq!(validate("inf"), Validity::Acceptable);
        assert_eq!(validate("+qnan"), Validity::Acceptable);
        assert_eq!(validate("hello"), Validity::Invalid);
        assert_eq!(validate("1.5x"), Validity::Invalid);
    }

    #[test]
    fn width_dispatch() {
        assert_eq!(
            classify(0x7f80_0000u128, FloatWidth::F32),
            FloatClass::Infinity
        );
        assert_eq!(
            classify(0x7ff0_0000_0000_0000u128, FloatWidth::F64),
            FloatClass::Infinity
        );
        let bits = (0x7fffu128 << 64) | u128::from(INTEGER_BIT);
        assert_eq!(classify(bits, FloatWidth::F80), FloatClass::Infinity);
    }
}
