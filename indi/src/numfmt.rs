//! Number formatting and sexagesimal conversion
//!
//! INDI number members carry a printf-style format. Besides the usual
//! `%f`/`%e`/`%g` family, `%<w>.<f>m` selects sexagesimal output
//! (`[-]D:MM[:SS[.s]]`) at a resolution chosen by `f`.

use crate::error::{IndiError, IndiResult};

/// Format `value` as sexagesimal in a field at least `width` wide.
///
/// `fracbase` is the number of pieces a whole unit is divided into:
/// 60 (`:mm`), 600 (`:mm.m`), 3600 (`:mm:ss`), 36000 (`:mm:ss.s`) or
/// 360000 (`:mm:ss.ss`).
pub fn fs_sexa(value: f64, width: usize, fracbase: u32) -> IndiResult<String> {
    let is_neg = value < 0.0;
    let base = u64::from(fracbase);
    let n = (value.abs() * base as f64 + 0.5) as u64;
    let d = n / base;
    let f = n % base;

    let mut out = if is_neg && d == 0 {
        format!("{:>width$}", "-0", width = width)
    } else if is_neg {
        format!("{:>width$}", -(d as i64), width = width)
    } else {
        format!("{:>width$}", d, width = width)
    };

    let tail = match fracbase {
        60 => format!(":{:02}", f),
        600 => format!(":{:02}.{:1}", f / 10, f % 10),
        3600 => format!(":{:02}:{:02}", f / 60, f % 60),
        36000 => {
            let s = f % 600;
            format!(":{:02}:{:02}.{:1}", f / 600, s / 10, s % 10)
        }
        360000 => {
            let s = f % 6000;
            format!(":{:02}:{:02}.{:02}", f / 6000, s / 100, s % 100)
        }
        other => {
            return Err(IndiError::InvalidFormat(format!(
                "unsupported sexagesimal fraction base {}",
                other
            )))
        }
    };
    out.push_str(&tail);
    Ok(out)
}

/// Parse a leading floating point literal the way `strtod` does.
///
/// Returns the value and the number of bytes consumed.
fn scan_float(s: &str) -> Option<(f64, usize)> {
    let bytes = s.as_bytes();
    let mut i = 0;
    if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
        i += 1;
    }
    let int_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let mut digits = i - int_start;
    if i < bytes.len() && bytes[i] == b'.' {
        let frac_start = i + 1;
        let mut j = frac_start;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        digits += j - frac_start;
        if digits > 0 {
            i = j;
        }
    }
    if digits == 0 {
        return None;
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        let exp_start = j;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j > exp_start {
            i = j;
        }
    }
    s[..i].parse::<f64>().ok().map(|v| (v, i))
}

/// Leading float of `s`, or 0 when there is none (C `atof`).
pub fn atof(s: &str) -> f64 {
    scan_float(s.trim_start()).map(|(v, _)| v).unwrap_or(0.0)
}

/// Parse sexagesimal or plain decimal text.
///
/// Spaces are ignored. Up to three numeric fields separated by any run
/// of non-digit characters are combined as `a + b/60 + c/3600`. A
/// leading `-` negates the whole value, including "-0:30".
pub fn scan_sexa(text: &str) -> Option<f64> {
    let compact: String = text.chars().filter(|c| *c != ' ').collect();
    let (negative, body) = match compact.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, compact.as_str()),
    };

    let mut parts = [0.0f64; 3];
    let mut rest = body;
    let mut found = 0;
    for slot in parts.iter_mut() {
        let Some((v, used)) = scan_float(rest) else {
            break;
        };
        *slot = v;
        found += 1;
        rest = &rest[used..];
        let skip = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        if skip == 0 {
            break;
        }
        rest = &rest[skip..];
    }
    if found == 0 {
        return None;
    }

    let a = parts[0].abs() + parts[1] / 60.0 + parts[2] / 3600.0;
    let a = if parts[0] < 0.0 { -a } else { a };
    Some(if negative { -a } else { a })
}

/// Split a value into degrees, minutes and seconds with carry.
pub fn get_sex_components(value: f64) -> (i32, i32, i32) {
    let mut d = value.trunc() as i32;
    let mut m = ((value.abs() - value.abs().trunc()) * 60.0).trunc() as i32;
    let mut s = ((value.abs() * 3600.0) % 60.0).round() as i32;

    if s == 60 {
        s = 0;
        m += 1;
    }
    if m == 60 {
        m = 0;
        if value < 0.0 {
            d -= 1;
        } else {
            d += 1;
        }
    }
    if value < 0.0 && d == 0 {
        m = -m;
    }
    (d, m, s)
}

/// Shortest text that parses back to the same `f64`.
pub fn format_value(value: f64) -> String {
    format!("{}", value)
}

/// printf conversion parsed from a number member's format.
#[derive(Debug, Default, Clone, PartialEq)]
struct Conversion {
    left: bool,
    plus: bool,
    space: bool,
    zero: bool,
    alt: bool,
    width: Option<usize>,
    precision: Option<usize>,
    conv: char,
}

/// Split a format into prefix, conversion and suffix.
fn parse_conversion(format: &str) -> IndiResult<(&str, Conversion, &str)> {
    let bad = || IndiError::InvalidFormat(format.to_string());
    let start = format.find('%').ok_or_else(bad)?;
    let prefix = &format[..start];
    let bytes = format.as_bytes();
    let mut i = start + 1;
    let mut fmt = Conversion::default();

    while i < bytes.len() {
        match bytes[i] {
            b'-' => fmt.left = true,
            b'+' => fmt.plus = true,
            b' ' => fmt.space = true,
            b'0' => fmt.zero = true,
            b'#' => fmt.alt = true,
            _ => break,
        }
        i += 1;
    }
    let w_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i > w_start {
        fmt.width = format[w_start..i].parse().ok();
    }
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        let p_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        fmt.precision = Some(format[p_start..i].parse().unwrap_or(0));
    }
    while i < bytes.len() && (bytes[i] == b'l' || bytes[i] == b'L' || bytes[i] == b'h') {
        i += 1;
    }
    let conv = format[i..].chars().next().ok_or_else(bad)?;
    fmt.conv = conv;
    Ok((prefix, fmt, &format[i + conv.len_utf8()..]))
}

/// `%e` body with C's signed two-digit exponent.
fn c_exp(value: f64, precision: usize, upper: bool) -> String {
    let s = format!("{:.*e}", precision, value);
    let (mantissa, exp) = s.split_once('e').unwrap_or((s.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let sign = if exp < 0 { '-' } else { '+' };
    let e = if upper { 'E' } else { 'e' };
    format!("{}{}{}{:02}", mantissa, e, sign, exp.abs())
}

fn strip_trailing_zeros(s: &str) -> String {
    match s.find(['e', 'E']) {
        Some(pos) => {
            let (m, e) = s.split_at(pos);
            if m.contains('.') {
                format!("{}{}", m.trim_end_matches('0').trim_end_matches('.'), e)
            } else {
                s.to_string()
            }
        }
        None if s.contains('.') => s.trim_end_matches('0').trim_end_matches('.').to_string(),
        None => s.to_string(),
    }
}

/// `%g` body.
fn c_general(value: f64, precision: usize, upper: bool, alt: bool) -> String {
    if !value.is_finite() {
        return format!("{}", value);
    }
    let p = precision.max(1);
    let exp = if value == 0.0 {
        0
    } else {
        let s = format!("{:.*e}", p - 1, value);
        s.split_once('e')
            .and_then(|(_, e)| e.parse::<i32>().ok())
            .unwrap_or(0)
    };
    let body = if exp < -4 || exp >= p as i32 {
        c_exp(value, p - 1, upper)
    } else {
        format!("{:.*}", (p as i32 - 1 - exp).max(0) as usize, value)
    };
    if alt {
        body
    } else {
        strip_trailing_zeros(&body)
    }
}

fn pad(fmt: &Conversion, body: String) -> String {
    let (sign, digits) = match body.strip_prefix('-') {
        Some(rest) => ("-", rest.to_string()),
        None if fmt.plus => ("+", body),
        None if fmt.space => (" ", body),
        None => ("", body),
    };
    let len = sign.len() + digits.len();
    let width = fmt.width.unwrap_or(0);
    if len >= width {
        return format!("{}{}", sign, digits);
    }
    let fill = width - len;
    if fmt.left {
        format!("{}{}{}", sign, digits, " ".repeat(fill))
    } else if fmt.zero {
        format!("{}{}{}", sign, "0".repeat(fill), digits)
    } else {
        format!("{}{}{}", " ".repeat(fill), sign, digits)
    }
}

/// `%g` with default precision, as used for timeouts on the wire.
pub fn format_g(value: f64) -> String {
    c_general(value, 6, false, false)
}

/// Render `value` with a number member's format.
///
/// Supports `%f %e %E %g %G %d %i` with flags, width and precision, and
/// the INDI `%<w>.<f>m` sexagesimal extension. Text around the
/// conversion is copied through.
pub fn number_format(format: &str, value: f64) -> IndiResult<String> {
    let (prefix, fmt, suffix) = parse_conversion(format)?;

    let body = match fmt.conv {
        'm' => {
            let width = fmt.width.unwrap_or(0);
            let frac = fmt.precision.unwrap_or(0);
            let fracbase = match frac {
                9 => 360000,
                8 => 36000,
                6 => 3600,
                5 => 600,
                _ => 60,
            };
            return Ok(format!(
                "{}{}{}",
                prefix,
                fs_sexa(value, width.saturating_sub(frac), fracbase)?,
                suffix
            ));
        }
        'f' | 'F' => format!("{:.*}", fmt.precision.unwrap_or(6), value),
        'e' | 'E' => c_exp(value, fmt.precision.unwrap_or(6), fmt.conv == 'E'),
        'g' | 'G' => c_general(
            value,
            fmt.precision.unwrap_or(6),
            fmt.conv == 'G',
            fmt.alt,
        ),
        'd' | 'i' => format!("{}", value as i64),
        _ => return Err(IndiError::InvalidFormat(format.to_string())),
    };
    Ok(format!("{}{}{}", prefix, pad(&fmt, body), suffix))
}
