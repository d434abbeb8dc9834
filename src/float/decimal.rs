//! Exact decimal conversion for 80-bit extended values.
//!
//! Text round-trips must preserve all 64 significand bits, which rules out a
//! binary64 intermediate. Values are scaled with a small big-integer instead:
//! formatting emits 21 significant digits (the `max_digits10` of a 64-bit
//! significand) and parsing rounds the exact decimal to the nearest
//! representable value.

use std::cmp::Ordering;

use super::{Value80, EXP80_BIAS};

const EXP_MIN: i32 = 1 - EXP80_BIAS;
const EXP_MAX: i32 = EXP80_BIAS;
const DIGITS: usize = 21;
const LOG2_10: f64 = std::f64::consts::LOG2_10;

/// Unsigned big integer, little-endian base 2^64. Only the handful of
/// operations the scaling paths need.
#[derive(Clone)]
struct Big {
    limbs: Vec<u64>,
}

impl Big {
    fn zero() -> Self {
        Big { limbs: Vec::new() }
    }

    fn from_u128(v: u128) -> Self {
        let mut b = Big {
            limbs: vec![v as u64, (v >> 64) as u64],
        };
        b.trim();
        b
    }

    fn is_zero(&self) -> bool {
        self.limbs.is_empty()
    }

    fn trim(&mut self) {
        while self.limbs.last() == Some(&0) {
            self.limbs.pop();
        }
    }

    fn add(&mut self, other: &Big) {
        if self.limbs.len() < other.limbs.len() {
            self.limbs.resize(other.limbs.len(), 0);
        }
        let mut carry = false;
        for (i, limb) in self.limbs.iter_mut().enumerate() {
            let rhs = other.limbs.get(i).copied().unwrap_or(0);
            let (sum, c1) = limb.overflowing_add(rhs);
            let (sum, c2) = sum.overflowing_add(u64::from(carry));
            *limb = sum;
            carry = c1 || c2;
        }
        if carry {
            self.limbs.push(1);
        }
    }

    fn mul_small(&mut self, factor: u64) {
        let mut carry = 0u128;
        for limb in &mut self.limbs {
            let t = u128::from(*limb) * u128::from(factor) + carry;
            *limb = t as u64;
            carry = t >> 64;
        }
        if carry != 0 {
            self.limbs.push(carry as u64);
        }
        self.trim();
    }

    fn mul_u128(&self, factor: u128) -> Big {
        let mut low = self.clone();
        low.mul_small(factor as u64);
        let high_factor = (factor >> 64) as u64;
        if high_factor != 0 && !self.is_zero() {
            let mut high = self.clone();
            high.mul_small(high_factor);
            high.limbs.insert(0, 0);
            low.add(&high);
        }
        low
    }

    fn mul_pow10(&mut self, mut p: usize) {
        while p >= 19 {
            self.mul_small(10u64.pow(19));
            p -= 19;
        }
        if p > 0 {
            self.mul_small(10u64.pow(p as u32));
        }
    }

    fn mul_pow5(&mut self, mut p: u32) {
        while p >= 27 {
            self.mul_small(5u64.pow(27));
            p -= 27;
        }
        if p > 0 {
            self.mul_small(5u64.pow(p));
        }
    }

    fn shl(&mut self, bits: u32) {
        if self.is_zero() || bits == 0 {
            return;
        }
        let whole = (bits / 64) as usize;
        let offset = bits % 64;
        if offset != 0 {
            let mut carry = 0u64;
            for limb in &mut self.limbs {
                let shifted = (*limb << offset) | carry;
                carry = *limb >> (64 - offset);
                *limb = shifted;
            }
            if carry != 0 {
                self.limbs.push(carry);
            }
        }
        if whole > 0 {
            let mut limbs = vec![0; whole];
            limbs.extend_from_slice(&self.limbs);
            self.limbs = limbs;
        }
    }

    fn shr(&mut self, bits: u32) {
        let whole = (bits / 64) as usize;
        let offset = bits % 64;
        if whole >= self.limbs.len() {
            self.limbs.clear();
            return;
        }
        self.limbs.drain(..whole);
        if offset != 0 {
            let len = self.limbs.len();
            for i in 0..len {
                let high = if i + 1 < len { self.limbs[i + 1] } else { 0 };
                self.limbs[i] = (self.limbs[i] >> offset) | (high << (64 - offset));
            }
        }
        self.trim();
    }

    fn cmp_big(&self, other: &Big) -> Ordering {
        match self.limbs.len().cmp(&other.limbs.len()) {
            Ordering::Equal => {}
            unequal => return unequal,
        }
        for (a, b) in self.limbs.iter().rev().zip(other.limbs.iter().rev()) {
            match a.cmp(b) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }

    fn divrem_small(&mut self, divisor: u64) -> u64 {
        let mut rem = 0u128;
        for limb in self.limbs.iter_mut().rev() {
            let cur = (rem << 64) | u128::from(*limb);
            *limb = (cur / u128::from(divisor)) as u64;
            rem = cur % u128::from(divisor);
        }
        self.trim();
        rem as u64
    }

    fn to_decimal(mut self) -> Vec<u8> {
        if self.is_zero() {
            return vec![b'0'];
        }
        let mut chunks = Vec::new();
        while !self.is_zero() {
            chunks.push(self.divrem_small(10u64.pow(19)));
        }
        let mut out = chunks.pop().unwrap_or(0).to_string().into_bytes();
        for chunk in chunks.iter().rev() {
            out.extend_from_slice(format!("{chunk:019}").as_bytes());
        }
        out
    }
}

/// Render a finite, nonzero extended value.
pub(super) fn format_finite(value: Value80) -> String {
    let exp_field = i32::from(value.sign_exponent & 0x7fff);
    let unbiased = if exp_field == 0 {
        EXP_MIN
    } else {
        exp_field - EXP80_BIAS
    };
    // value = mantissa * 2^scale
    let scale = unbiased - 63;
    let (mut digits, dec_exp) = scaled_digits(value.mantissa, scale);
    while digits.len() > 1 && digits.last() == Some(&b'0') {
        digits.pop();
    }
    let text = render(&digits, dec_exp);
    if value.negative() {
        format!("-{text}")
    } else {
        text
    }
}

/// 21 correctly rounded significant digits of `mantissa * 2^scale`, plus the
/// decimal exponent of the leading digit.
fn scaled_digits(mantissa: u64, scale: i32) -> (Vec<u8>, i32) {
    let (whole, point) = if scale >= 0 {
        let mut n = Big::from_u128(u128::from(mantissa));
        n.shl(scale as u32);
        (n, 0usize)
    } else {
        // scale by enough decimal places that the integer part always keeps
        // at least one digit past the rounding position
        let shift = (-scale) as u32;
        let point = (u64::from(shift) * 30103 / 100000) as usize + 25;
        let mut n = Big::from_u128(u128::from(mantissa));
        n.mul_pow10(point);
        n.shr(shift);
        (n, point)
    };

    let mut digits = whole.to_decimal();
    let mut dec_exp = digits.len() as i32 - 1 - point as i32;
    if digits.len() > DIGITS {
        let tail = digits.split_off(DIGITS);
        // the dropped fraction is strictly below one unit of the last kept
        // position, so the first dropped digit alone decides the direction
        if tail[0] >= b'5' {
            let mut i = digits.len();
            loop {
                if i == 0 {
                    digits.insert(0, b'1');
                    digits.pop();
                    dec_exp += 1;
                    break;
                }
                i -= 1;
                if digits[i] == b'9' {
                    digits[i] = b'0';
                } else {
                    digits[i] += 1;
                    break;
                }
            }
        }
    }
    (digits, dec_exp)
}

fn render(digits: &[u8], dec_exp: i32) -> String {
    let as_text = |d: &[u8]| -> String { d.iter().map(|&b| b as char).collect() };
    let len = digits.len() as i32;
    if !(-4..=20).contains(&dec_exp) {
        let mut out = String::new();
        out.push(digits[0] as char);
        if len > 1 {
            out.push('.');
            out.push_str(&as_text(&digits[1..]));
        }
        out.push('e');
        out.push_str(&dec_exp.to_string());
        out
    } else if dec_exp < 0 {
        format!(
            "0.{}{}",
            "0".repeat((-dec_exp - 1) as usize),
            as_text(digits)
        )
    } else if dec_exp >= len - 1 {
        format!(
            "{}{}.0",
            as_text(digits),
            "0".repeat((dec_exp - len + 1) as usize)
        )
    } else {
        let split = (dec_exp + 1) as usize;
        format!("{}.{}", as_text(&digits[..split]), as_text(&digits[split..]))
    }
}

/// Correctly rounded decimal-to-extended conversion. `None` means the text is
/// not a plain decimal number; range overflow saturates to infinity and
/// underflow to zero, as `str::parse::<f64>` does.
pub(super) fn parse_decimal(text: &str) -> Option<Value80> {
    let (negative, rest) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };

    let mut digits: Vec<u8> = Vec::new();
    let mut frac_len: i64 = 0;
    let mut seen_digit = false;
    let mut seen_point = false;
    let mut exp10: i64 = 0;
    let bytes = rest.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            c @ b'0'..=b'9' => {
                seen_digit = true;
                digits.push(c);
                if seen_point {
                    frac_len += 1;
                }
            }
            b'.' if !seen_point => seen_point = true,
            b'e' => {
                let tail = &rest[i + 1..];
                let (exp_sign, exp_text) = match tail.as_bytes().first() {
                    Some(b'-') => (-1i64, &tail[1..]),
                    Some(b'+') => (1, &tail[1..]),
                    _ => (1, tail),
                };
                if exp_text.is_empty() || !exp_text.bytes().all(|c| c.is_ascii_digit()) {
                    return None;
                }
                let mut magnitude: i64 = 0;
                for c in exp_text.bytes() {
                    magnitude = (magnitude * 10 + i64::from(c - b'0')).min(100_000_000);
                }
                exp10 = exp_sign * magnitude;
                break;
            }
            _ => return None,
        }
        i += 1;
    }
    if !seen_digit {
        return None;
    }

    let sign = if negative { 0x8000u16 } else { 0 };
    let zero = Value80 {
        mantissa: 0,
        sign_exponent: sign,
    };
    let Some(first) = digits.iter().position(|&d| d != b'0') else {
        return Some(zero);
    };
    let digits = &digits[first..];
    // trailing zeros fold into the exponent to keep the big number small
    let trailing = digits.iter().rev().take_while(|&&d| d == b'0').count();
    let digits = &digits[..digits.len() - trailing];
    let dec_exp = exp10 - frac_len + trailing as i64;
    let ndigits = digits.len() as i64;
    // value is in [10^(top-1), 10^top)
    let top = ndigits + dec_exp;
    if top > 4935 {
        return Some(infinity(negative));
    }
    if top < -4960 {
        return Some(zero);
    }

    // leading digits give a binary exponent estimate good to about one unit
    let lead_len = digits.len().min(17);
    let mut lead: u64 = 0;
    for &d in &digits[..lead_len] {
        lead = lead * 10 + u64::from(d - b'0');
    }
    let log2 = (lead as f64).log2() + (dec_exp + ndigits - lead_len as i64) as f64 * LOG2_10;
    let mut e = (log2.floor() as i32).clamp(EXP_MIN, EXP_MAX);

    let mut significand = Big::zero();
    let mut idx = 0;
    while idx < digits.len() {
        let chunk = &digits[idx..(idx + 19).min(digits.len())];
        let mut v = 0u64;
        for &c in chunk {
            v = v * 10 + u64::from(c - b'0');
        }
        significand.mul_pow10(chunk.len());
        significand.add(&Big::from_u128(u128::from(v)));
        idx += chunk.len();
    }

    // compare m * 2^s against significand * 10^dec_exp by clearing the
    // decimal exponent with a factor of 5 and aligning the powers of two
    let pow5 = u32::try_from(dec_exp.unsigned_abs()).ok()?;
    let mut rhs_base = significand;
    let mut lhs_base = Big::from_u128(1);
    if dec_exp >= 0 {
        rhs_base.mul_pow5(pow5);
    } else {
        lhs_base.mul_pow5(pow5);
    }
    let compare = |m: u128, s: i64| -> Ordering {
        let mut lhs = lhs_base.mul_u128(m);
        let mut rhs = rhs_base.clone();
        let net = s - dec_exp;
        if net >= 0 {
            lhs.shl(net as u32);
        } else {
            rhs.shl((-net) as u32);
        }
        lhs.cmp_big(&rhs)
    };

    let mut mantissa: u64;
    let mut rounds = 0;
    loop {
        rounds += 1;
        if rounds > 96 {
            return None;
        }
        let s = i64::from(e) - 63;
        if compare(1u128 << 64, s) != Ordering::Greater {
            // at or above the top of this binade
            if e >= EXP_MAX {
                return Some(infinity(negative));
            }
            e += 1;
            continue;
        }
        let mut candidate = 0u64;
        for bit in (0..64).rev() {
            let trial = candidate | (1u64 << bit);
            if compare(u128::from(trial), s) != Ordering::Greater {
                candidate = trial;
            }
        }
        if candidate >> 63 == 0 && e > EXP_MIN {
            e -= 1;
            continue;
        }
        mantissa = candidate;
        // round to nearest, ties to even
        let above_half = match compare((u128::from(mantissa) << 1) | 1, s - 1) {
            Ordering::Less => true,
            Ordering::Equal => mantissa & 1 == 1,
            Ordering::Greater => false,
        };
        if above_half {
            if mantissa == u64::MAX {
                if e >= EXP_MAX {
                    return Some(infinity(negative));
                }
                mantissa = 1 << 63;
                e += 1;
            } else {
                mantissa += 1;
            }
        }
        break;
    }

    if mantissa == 0 {
        return Some(zero);
    }
    let biased = if mantissa >> 63 == 0 {
        0
    } else {
        (e + EXP80_BIAS) as u16
    };
    Some(Value80 {
        mantissa,
        sign_exponent: sign | biased,
    })
}

fn infinity(negative: bool) -> Value80 {
    if negative {
        Value80::NEG_INFINITY
    } else {
        Value80::POS_INFINITY
    }
}
