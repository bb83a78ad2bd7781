//! Binary codec for PostgreSQL `NUMERIC` values.
//!
//! The wire format is a header of four 16-bit fields (digit count, weight,
//! sign, display scale) followed by base-10000 digits. Values are exchanged
//! as decimal strings so no precision is lost on the way to JSON.

use std::error::Error;
use std::fmt::Write as _;

use bytes::{BufMut, BytesMut};

type BoxError = Box<dyn Error + Sync + Send>;

const SIGN_POS: u16 = 0x0000;
const SIGN_NEG: u16 = 0x4000;
const SIGN_NAN: u16 = 0xC000;
const SIGN_PINF: u16 = 0xD000;
const SIGN_NINF: u16 = 0xF000;

const HEADER_LEN: usize = 8;

fn read_u16(raw: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([raw[offset], raw[offset + 1]])
}

/// Decodes a binary `NUMERIC` into its decimal string form.
pub fn decode(raw: &[u8]) -> Result<String, BoxError> {
    if raw.len() < HEADER_LEN {
        return Err("numeric value too short".into());
    }

    let ndigits = read_u16(raw, 0) as usize;
    let weight = i32::from(read_u16(raw, 2) as i16);
    let sign = read_u16(raw, 4);
    let dscale = read_u16(raw, 6) as usize;

    if raw.len() != HEADER_LEN + ndigits * 2 {
        return Err(format!(
            "numeric value has {} bytes, expected {}",
            raw.len(),
            HEADER_LEN + ndigits * 2
        )
        .into());
    }

    match sign {
        SIGN_NAN => return Ok("NaN".to_string()),
        SIGN_PINF => return Ok("Infinity".to_string()),
        SIGN_NINF => return Ok("-Infinity".to_string()),
        SIGN_POS | SIGN_NEG => {},
        other => return Err(format!("invalid numeric sign 0x{other:04x}").into()),
    }

    let digits: Vec<u16> = (0..ndigits)
        .map(|i| read_u16(raw, HEADER_LEN + i * 2))
        .collect();
    let digit_at = |index: i32| -> u16 {
        usize::try_from(index)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == SIGN_NEG {
        out.push('-');
    }

    if weight < 0 {
        out.push('0');
    } else {
        for index in 0..=weight {
            let digit = digit_at(index);
            if index == 0 {
                write!(out, "{digit}")?;
            } else {
                write!(out, "{digit:04}")?;
            }
        }
    }

    if dscale > 0 {
        let groups = dscale.div_ceil(4) as i32;
        let mut fraction = String::with_capacity(groups as usize * 4);
        for group in 1..=groups {
            write!(fraction, "{:04}", digit_at(weight + group))?;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }

    Ok(out)
}

/// Encodes a decimal string (optionally signed, optionally in exponent
/// notation) as a binary `NUMERIC`.
pub fn encode(text: &str, out: &mut BytesMut) -> Result<(), BoxError> {
    let text = text.trim();

    match text {
        "NaN" => return write_numeric(out, &[], 0, SIGN_NAN, 0),
        "Infinity" | "+Infinity" => return write_numeric(out, &[], 0, SIGN_PINF, 0),
        "-Infinity" => return write_numeric(out, &[], 0, SIGN_NINF, 0),
        _ => {},
    }

    // Exponent notation: f64 Display never uses an exponent.
    let expanded;
    let text = if text.contains(['e', 'E']) {
        let value: f64 = text
            .parse()
            .map_err(|_| format!("invalid numeric value '{text}'"))?;
        expanded = value.to_string();
        expanded.as_str()
    } else {
        text
    };

    let (sign, unsigned) = match text.strip_prefix('-') {
        Some(rest) => (SIGN_NEG, rest),
        None => (SIGN_POS, text.strip_prefix('+').unwrap_or(text)),
    };

    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    let valid = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    if (int_part.is_empty() && frac_part.is_empty()) || !valid(int_part) || !valid(frac_part) {
        return Err(format!("invalid numeric value '{text}'").into());
    }

    let dscale = u16::try_from(frac_part.len()).map_err(|_| "numeric scale too large")?;
    let int_part = int_part.trim_start_matches('0');

    let int_padding = (4 - int_part.len() % 4) % 4;
    let frac_padding = (4 - frac_part.len() % 4) % 4;
    let mut all = String::with_capacity(int_part.len() + frac_part.len() + 8);
    all.extend(std::iter::repeat_n('0', int_padding));
    all.push_str(int_part);
    all.push_str(frac_part);
    all.extend(std::iter::repeat_n('0', frac_padding));

    let mut groups: Vec<u16> = all
        .as_bytes()
        .chunks(4)
        .map(|chunk| {
            chunk
                .iter()
                .fold(0u16, |acc, b| acc * 10 + u16::from(b - b'0'))
        })
        .collect();

    let int_groups = (int_part.len() + int_padding) / 4;
    let mut weight = int_groups as i32 - 1;

    let leading_zeros = groups.iter().take_while(|&&g| g == 0).count();
    groups.drain(..leading_zeros);
    weight -= leading_zeros as i32;
    while groups.last() == Some(&0) {
        groups.pop();
    }

    if groups.is_empty() {
        return write_numeric(out, &[], 0, SIGN_POS, dscale);
    }

    let weight = i16::try_from(weight).map_err(|_| "numeric value out of range")?;
    write_numeric(out, &groups, weight, sign, dscale)
}

fn write_numeric(
    out: &mut BytesMut,
    digits: &[u16],
    weight: i16,
    sign: u16,
    dscale: u16,
) -> Result<(), BoxError> {
    let ndigits = u16::try_from(digits.len()).map_err(|_| "numeric value too long")?;
    out.put_u16(ndigits);
    out.put_i16(weight);
    out.put_u16(sign);
    out.put_u16(dscale);
    for digit in digits {
        out.put_u16(*digit);
    }
    Ok(())
}
