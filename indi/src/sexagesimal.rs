//! Sexagesimal and printf-style number formatting
//!
//! INDI number elements carry a printf format string. A trailing `m`
//! conversion selects the sexagesimal form `D:MM[:SS][.f]`, where the
//! fraction digits pick the resolution.

use crate::error::{IndiError, IndiResult};

/// Field separators accepted between sexagesimal fields
const SEPARATORS: &[char] = &[':', ' ', '\t', '*', '\'', '"'];

/// Format `value` as sexagesimal text with the integer part right-aligned
/// in `width` characters.
///
/// `fracbase` selects the resolution: 60 (`D:MM`), 600 (`D:MM.m`),
/// 3600 (`D:MM:SS`), 36000 (`D:MM:SS.s`) or 360000 (`D:MM:SS.ss`).
pub fn fs_sexa(value: f64, width: usize, fracbase: u32) -> IndiResult<String> {
    if !matches!(fracbase, 60 | 600 | 3600 | 36000 | 360000) {
        return Err(IndiError::InvalidFormat(format!(
            "unsupported sexagesimal base {}",
            fracbase
        )));
    }

    let negative = value < 0.0;
    let base = u64::from(fracbase);
    let n = (value.abs() * base as f64 + 0.5) as u64;
    let degrees = n / base;
    let frac = n % base;

    let mut out = if negative && degrees == 0 {
        format!("{:>width$}", "-0", width = width)
    } else if negative {
        format!("{:>width$}", -(degrees as i64), width = width)
    } else {
        format!("{:>width$}", degrees, width = width)
    };

    match fracbase {
        60 => out.push_str(&format!(":{:02}", frac)),
        600 => out.push_str(&format!(":{:02}.{}", frac / 10, frac % 10)),
        3600 => out.push_str(&format!(":{:02}:{:02}", frac / 60, frac % 60)),
        36000 => {
            let secs = frac % 600;
            out.push_str(&format!(":{:02}:{:02}.{}", frac / 600, secs / 10, secs % 10));
        }
        _ => {
            let secs = frac % 6000;
            out.push_str(&format!(
                ":{:02}:{:02}.{:02}",
                frac / 6000,
                secs / 100,
                secs % 100
            ));
        }
    }

    Ok(out)
}

/// Parse `D`, `D:M` or `D:M:S` text into a signed decimal value.
///
/// Fields may be separated by `:`, whitespace, `*` or quote characters and
/// may carry decimals. The sign of the first field applies to the whole
/// value. Returns `None` for more than three fields, repeated leading signs,
/// or anything that is not a finite number.
pub fn scan_sexa(text: &str) -> Option<f64> {
    let fields: Vec<&str> = text
        .trim()
        .split(SEPARATORS)
        .filter(|f| !f.is_empty())
        .collect();
    if fields.is_empty() || fields.len() > 3 {
        return None;
    }

    let first = fields[0];
    let signs = first.chars().take_while(|c| *c == '+' || *c == '-').count();
    if signs > 1 {
        return None;
    }
    let negative = first.starts_with('-');
    let degrees = parse_field(&first[signs..])?;

    let mut value = degrees;
    let mut scale = 1.0;
    for field in &fields[1..] {
        scale /= 60.0;
        value += parse_field(field)? * scale;
    }

    Some(if negative { -value } else { value })
}

fn parse_field(field: &str) -> Option<f64> {
    if field.starts_with(['+', '-']) {
        return None;
    }
    if !field
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
    {
        return None;
    }
    field.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Render `value` according to an INDI number format such as `%8.3f` or
/// `%10.6m`.
pub fn number_format(format: &str, value: f64) -> IndiResult<String> {
    let spec = format.trim();
    if !spec.starts_with('%') || spec.len() < 2 {
        return Err(IndiError::InvalidFormat(format.to_string()));
    }

    if let Some(body) = spec.strip_suffix('m') {
        let (width, frac) = body[1..]
            .split_once('.')
            .ok_or_else(|| IndiError::InvalidFormat(format.to_string()))?;
        let width: usize = width
            .parse()
            .map_err(|_| IndiError::InvalidFormat(format.to_string()))?;
        let frac: usize = frac
            .parse()
            .map_err(|_| IndiError::InvalidFormat(format.to_string()))?;
        let base = match frac {
            9 => 360000,
            8 => 36000,
            6 => 3600,
            5 => 600,
            _ => 60,
        };
        let text = fs_sexa(value, width.saturating_sub(frac), base)?;
        return Ok(text.trim_start().to_string());
    }

    printf(spec, value)
}

/// Parsed `%[flags][width][.precision][length]conversion`
#[derive(Debug, Default)]
struct Conversion {
    left: bool,
    plus: bool,
    space: bool,
    zero: bool,
    alternate: bool,
    width: usize,
    precision: Option<usize>,
    conversion: char,
}

fn parse_conversion(spec: &str) -> IndiResult<(Conversion, &str)> {
    let invalid = || IndiError::InvalidFormat(spec.to_string());
    let mut conv = Conversion::default();
    let mut chars = spec[1..].char_indices().peekable();

    while let Some(&(_, c)) = chars.peek() {
        match c {
            '-' => conv.left = true,
            '+' => conv.plus = true,
            ' ' => conv.space = true,
            '0' => conv.zero = true,
            '#' => conv.alternate = true,
            _ => break,
        }
        chars.next();
    }

    let mut digits = String::new();
    while let Some(&(_, c)) = chars.peek() {
        if !c.is_ascii_digit() {
            break;
        }
        digits.push(c);
        chars.next();
    }
    if !digits.is_empty() {
        conv.width = digits.parse().map_err(|_| invalid())?;
    }

    if let Some(&(_, '.')) = chars.peek() {
        chars.next();
        let mut digits = String::new();
        while let Some(&(_, c)) = chars.peek() {
            if !c.is_ascii_digit() {
                break;
            }
            digits.push(c);
            chars.next();
        }
        conv.precision = Some(if digits.is_empty() {
            0
        } else {
            digits.parse().map_err(|_| invalid())?
        });
    }

    while let Some(&(_, c)) = chars.peek() {
        if !matches!(c, 'l' | 'h' | 'L') {
            break;
        }
        chars.next();
    }

    let (idx, c) = chars.next().ok_or_else(invalid)?;
    if !matches!(c, 'f' | 'F' | 'e' | 'E' | 'g' | 'G' | 'd' | 'i' | 'u' | 'x' | 'X') {
        return Err(invalid());
    }
    conv.conversion = c;
    // idx is relative to spec[1..]
    Ok((conv, &spec[1 + idx + c.len_utf8()..]))
}

/// Minimal printf for a single floating-point argument
fn printf(spec: &str, value: f64) -> IndiResult<String> {
    let (conv, suffix) = parse_conversion(spec)?;

    let body = if !value.is_finite() {
        let text = if value.is_nan() { "nan" } else { "inf" };
        if conv.conversion.is_ascii_uppercase() {
            text.to_uppercase()
        } else {
            text.to_string()
        }
    } else {
        match conv.conversion {
            'f' | 'F' => format!("{:.*}", conv.precision.unwrap_or(6), value.abs()),
            'e' | 'E' => c_exponential(
                value.abs(),
                conv.precision.unwrap_or(6),
                conv.conversion == 'E',
            ),
            'g' | 'G' => c_general(
                value.abs(),
                conv.precision.unwrap_or(6),
                conv.alternate,
                conv.conversion == 'G',
            ),
            'x' => format!("{:x}", value.abs().trunc() as u64),
            'X' => format!("{:X}", value.abs().trunc() as u64),
            _ => format!("{}", value.abs().trunc() as u64),
        }
    };

    let integer = matches!(conv.conversion, 'd' | 'i' | 'u' | 'x' | 'X');
    let negative = if integer {
        value.trunc() < 0.0
    } else {
        value.is_sign_negative() && !value.is_nan()
    };
    let sign = if negative {
        "-"
    } else if conv.plus {
        "+"
    } else if conv.space {
        " "
    } else {
        ""
    };

    let len = sign.len() + body.len();
    let mut out = if len >= conv.width {
        format!("{}{}", sign, body)
    } else if conv.left {
        format!("{}{}{}", sign, body, " ".repeat(conv.width - len))
    } else if conv.zero && value.is_finite() {
        format!("{}{}{}", sign, "0".repeat(conv.width - len), body)
    } else {
        format!("{}{}{}", " ".repeat(conv.width - len), sign, body)
    };
    out.push_str(suffix);
    Ok(out)
}

/// `%e` with a C-style exponent (`e+05`)
fn c_exponential(value: f64, precision: usize, upper: bool) -> String {
    let text = format!("{:.*e}", precision, value);
    let (mantissa, exponent) = text.split_once('e').unwrap_or((text.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let sign = if exponent < 0 { '-' } else { '+' };
    let e = if upper { 'E' } else { 'e' };
    format!("{}{}{}{:02}", mantissa, e, sign, exponent.abs())
}

/// `%g`: shortest of fixed/exponential with trailing zeros removed
fn c_general(value: f64, precision: usize, alternate: bool, upper: bool) -> String {
    let precision = precision.max(1);
    let exponent = if value == 0.0 {
        0
    } else {
        let text = format!("{:.*e}", precision - 1, value);
        text.split_once('e')
            .and_then(|(_, e)| e.parse::<i32>().ok())
            .unwrap_or(0)
    };

    let text = if exponent >= -4 && exponent < precision as i32 {
        let decimals = (precision as i32 - 1 - exponent).max(0) as usize;
        format!("{:.*}", decimals, value)
    } else {
        c_exponential(value, precision - 1, upper)
    };

    if alternate {
        return text;
    }
    match text.find(['e', 'E']) {
        Some(pos) => {
            let (mantissa, exp) = text.split_at(pos);
            format!("{}{}", strip_fraction_zeros(mantissa), exp)
        }
        None => strip_fraction_zeros(&text).to_string(),
    }
}

fn strip_fraction_zeros(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_format_sexagesimal() {
        assert_eq!(number_format("%9.6m", 12.5).unwrap(), "12:30:00");
        assert_eq!(number_format("%10.6m", 12.5).unwrap(), "12:30:00");
        assert_eq!(number_format("%10.6m", -12.5).unwrap(), "-12:30:00");
        assert_eq!(number_format("%6.3m", 5.25).unwrap(), "5:15");
        assert_eq!(number_format("%8.5m", 5.255).unwrap(), "5:15.3");
        assert_eq!(number_format("%11.8m", 5.25).unwrap(), "5:15:00.0");
        assert_eq!(number_format("%12.9m", 5.25).unwrap(), "5:15:00.00");
    }

    #[test]
    fn test_number_format_printf() {
        assert_eq!(number_format("%7.2f", 12.5).unwrap(), "  12.50");
        assert_eq!(number_format("%.3f", -0.5).unwrap(), "-0.500");
        assert_eq!(number_format("%-6.1f", 1.26).unwrap(), "1.3   ");
        assert_eq!(number_format("%06.1f", -1.5).unwrap(), "-001.5");
        assert_eq!(number_format("%+.1f", 3.0).unwrap(), "+3.0");
        assert_eq!(number_format("%d", 12.9).unwrap(), "12");
        assert_eq!(number_format("%5d", 42.0).unwrap(), "   42");
        assert_eq!(number_format("%.2e", 12345.0).unwrap(), "1.23e+04");
        assert_eq!(number_format("%g", 0.0001).unwrap(), "0.0001");
        assert_eq!(number_format("%g", 100000.0).unwrap(), "100000");
        assert_eq!(number_format("%g", 1000000.0).unwrap(), "1e+06");
        assert_eq!(number_format("%g", 2.5).unwrap(), "2.5");
        assert_eq!(number_format("%.0f", 7.0).unwrap(), "7");
    }

    #[test]
    fn test_number_format_invalid() {
        assert!(matches!(
            number_format("7.2f", 1.0),
            Err(IndiError::InvalidFormat(_))
        ));
        assert!(matches!(
            number_format("%", 1.0),
            Err(IndiError::InvalidFormat(_))
        ));
        assert!(matches!(
            number_format("%7.2q", 1.0),
            Err(IndiError::InvalidFormat(_))
        ));
        assert!(matches!(
            number_format("%xm", 1.0),
            Err(IndiError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_fs_sexa_bases() {
        assert_eq!(fs_sexa(12.5, 3, 60).unwrap(), " 12:30");
        assert_eq!(fs_sexa(12.5, 2, 600).unwrap(), "12:30.0");
        assert_eq!(fs_sexa(12.5, 2, 3600).unwrap(), "12:30:00");
        assert_eq!(fs_sexa(12.5, 2, 36000).unwrap(), "12:30:00.0");
        assert_eq!(fs_sexa(12.5, 2, 360000).unwrap(), "12:30:00.00");
    }

    #[test]
    fn test_fs_sexa_negative_zero_degrees() {
        assert_eq!(fs_sexa(-0.5, 4, 3600).unwrap(), "  -0:30:00");
        assert_eq!(fs_sexa(-0.5, 0, 60).unwrap(), "-0:30");
        assert_eq!(fs_sexa(-1.5, 3, 60).unwrap(), " -1:30");
    }

    #[test]
    fn test_fs_sexa_rounds_into_next_unit() {
        assert_eq!(fs_sexa(0.99999, 2, 3600).unwrap(), " 1:00:00");
    }

    #[test]
    fn test_fs_sexa_invalid_base() {
        assert!(matches!(
            fs_sexa(1.0, 2, 100),
            Err(IndiError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_scan_sexa() {
        let v = scan_sexa("12 00 34").unwrap();
        assert!((v - 12.009444).abs() < 1e-6);
        assert_eq!(scan_sexa("12:30"), Some(12.5));
        assert_eq!(scan_sexa("-12:30"), Some(-12.5));
        assert_eq!(scan_sexa("-0:30"), Some(-0.5));
        assert_eq!(scan_sexa("+45*30'00\""), Some(45.5));
        assert_eq!(scan_sexa("12.25"), Some(12.25));
        assert_eq!(scan_sexa("  7  "), Some(7.0));
        assert_eq!(scan_sexa("1.5e2"), Some(150.0));
    }

    #[test]
    fn test_scan_sexa_rejects() {
        assert_eq!(scan_sexa("12 00 34 34"), None);
        assert_eq!(scan_sexa("++45 45 45"), None);
        assert_eq!(scan_sexa("-+45"), None);
        assert_eq!(scan_sexa("12:-30"), None);
        assert_eq!(scan_sexa(""), None);
        assert_eq!(scan_sexa("abc"), None);
        assert_eq!(scan_sexa("nan"), None);
        assert_eq!(scan_sexa("12:xx"), None);
    }

    #[test]
    fn test_sexagesimal_roundtrip_within_resolution() {
        let values = [0.0, 12.5, -12.5, 359.99, -0.25, 23.934, -89.1234, 1.0 / 3.0];
        for &base in &[60u32, 600, 3600, 36000, 360000] {
            let resolution = 1.0 / base as f64;
            for &value in &values {
                let text = fs_sexa(value, 4, base).unwrap();
                let parsed = scan_sexa(&text).unwrap();
                assert!(
                    (parsed - value).abs() <= resolution / 2.0 + 1e-9,
                    "base {} value {} text {:?} parsed {}",
                    base,
                    value,
                    text,
                    parsed
                );
            }
        }
    }
}
