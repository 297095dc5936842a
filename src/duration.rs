//! Free-text duration parsing.
//!
//! Estimated durations are typed by people, so the parser is total: every
//! input maps to a non-negative hour count and anything unrecognised is 0.

use chrono::NaiveDate;

use crate::model::{Ms, HOUR_MS, MINUTE_MS};

const DAY_MS: Ms = 24 * HOUR_MS;

const RANGE_SEPARATORS: &[&str] = &["~", "-", "to", "until"];

/// Unit groups in priority order: the first group with a match wins.
/// Each group converts as `n * mul / div` hours.
const UNIT_GROUPS: &[(&[&str], f64, f64)] = &[
    (&["hour", "h", "小时"], 1.0, 1.0),
    (&["day", "天"], 24.0, 1.0),
    (&["minute", "min", "分钟"], 1.0, 60.0),
];

/// Parse a duration expression into hours.
///
/// Resolution order:
/// 1. `Y.M.D <sep> Y.M.D` or `Y.M.D <sep> M.D`: whole days between the dates, at least 24h.
/// 2. A lone `Y.M.D`: 24h.
/// 3. `<number><unit>` for hours, days, minutes.
/// 4. A bare number: hours.
/// 5. Anything else: 0.
pub fn parse_hours(text: &str) -> f64 {
    if let Some((start, rest)) = find_date(text) {
        if let Some(end) = range_end(start, rest) {
            let days = (end - start).num_days();
            return (days * 24).max(24) as f64;
        }
        return 24.0;
    }

    for (units, mul, div) in UNIT_GROUPS {
        if let Some(n) = find_with_unit(text, units) {
            return n * mul / div;
        }
    }

    match text.trim().parse::<f64>() {
        Ok(n) if n.is_finite() && n >= 0.0 => n,
        _ => 0.0,
    }
}

/// Render an elapsed span the way actual durations are displayed:
/// whole minutes under an hour, one-decimal hours under a day, days plus hours beyond.
pub fn format_elapsed(elapsed: Ms) -> String {
    let elapsed = elapsed.max(0);
    if elapsed < HOUR_MS {
        format!("{}分钟", elapsed / MINUTE_MS)
    } else if elapsed < DAY_MS {
        format!("{:.1}小时", elapsed as f64 / HOUR_MS as f64)
    } else {
        format!("{}天{}小时", elapsed / DAY_MS, (elapsed % DAY_MS) / HOUR_MS)
    }
}

/// Leading run of ASCII digits, parsed, plus the remainder.
fn leading_int(s: &str) -> Option<(u32, usize, &str)> {
    let len = s.bytes().take_while(u8::is_ascii_digit).count();
    if len == 0 {
        return None;
    }
    let value = s[..len].parse().ok()?;
    Some((value, len, &s[len..]))
}

/// Up to `max` dot-separated integer groups at the start of `s`.
fn dotted_groups(s: &str, max: usize) -> (Vec<(u32, usize)>, &str) {
    let mut groups = Vec::new();
    let mut rest = s;
    while groups.len() < max {
        let candidate = if groups.is_empty() {
            rest
        } else {
            match rest.strip_prefix('.') {
                Some(r) => r,
                None => break,
            }
        };
        match leading_int(candidate) {
            Some((value, len, r)) => {
                groups.push((value, len));
                rest = r;
            }
            None => break,
        }
    }
    (groups, rest)
}

fn ymd_at(s: &str) -> Option<(NaiveDate, &str)> {
    let (groups, rest) = dotted_groups(s, 3);
    match groups.as_slice() {
        [(y, 4), (m, _), (d, _)] => {
            NaiveDate::from_ymd_opt(*y as i32, *m, *d).map(|date| (date, rest))
        }
        _ => None,
    }
}

/// First valid `Y.M.D` in the text, with the text following it.
fn find_date(text: &str) -> Option<(NaiveDate, &str)> {
    let bytes = text.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if !b.is_ascii_digit() || (i > 0 && bytes[i - 1].is_ascii_digit()) {
            continue;
        }
        if let Some(found) = ymd_at(&text[i..]) {
            return Some(found);
        }
    }
    None
}

fn range_end(start: NaiveDate, rest: &str) -> Option<NaiveDate> {
    let rest = rest.trim_start();
    let after_sep = RANGE_SEPARATORS.iter().find_map(|sep| strip_prefix_ci(rest, sep))?;
    let candidate = after_sep.trim_start();

    let (groups, _) = dotted_groups(candidate, 3);
    match groups.as_slice() {
        [(y, 4), (m, _), (d, _)] => NaiveDate::from_ymd_opt(*y as i32, *m, *d),
        [(m, _), (d, _)] => NaiveDate::from_ymd_opt(chrono::Datelike::year(&start), *m, *d),
        _ => None,
    }
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let n = prefix.len();
    if s.len() >= n && s.is_char_boundary(n) && s[..n].eq_ignore_ascii_case(prefix) {
        Some(&s[n..])
    } else {
        None
    }
}

/// Leftmost `<number>\s*<unit>` in the text for any of the given unit spellings.
fn find_with_unit(text: &str, units: &[&str]) -> Option<f64> {
    let bytes = text.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if !b.is_ascii_digit() {
            continue;
        }
        let (number, rest) = leading_decimal(&text[i..]);
        let rest = rest.trim_start();
        if units.iter().any(|unit| strip_prefix_ci(rest, unit).is_some()) {
            if let Ok(n) = number.parse::<f64>() {
                return Some(n);
            }
        }
    }
    None
}

/// Split `\d+(\.\d+)?` off the front of `s`.
fn leading_decimal(s: &str) -> (&str, &str) {
    let int_len = s.bytes().take_while(u8::is_ascii_digit).count();
    let after = &s[int_len..];
    let frac_len = match after.strip_prefix('.') {
        Some(f) => {
            let digits = f.bytes().take_while(u8::is_ascii_digit).count();
            if digits > 0 { digits + 1 } else { 0 }
        }
        None => 0,
    };
    s.split_at(int_len + frac_len)
}
