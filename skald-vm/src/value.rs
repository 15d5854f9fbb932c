//! The dynamic value model.

use crate::heap::TableId;

/// A dynamically typed Skald value.
///
/// String payloads are exclusively owned by their slot; assignment copies
/// the bytes. Tables are shared by reference and compare by identity.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    /// Absence of a value.
    #[default]
    Unset,
    /// 64-bit IEEE float.
    Num(f64),
    /// Owned UTF-8 text.
    Str(String),
    /// Instruction index usable as a first-class code pointer. Negative
    /// while unresolved.
    Label(i32),
    /// Shared reference to a table.
    Table(TableId),
}

impl Value {
    /// Numeric kind tag, as reported by the `TYPE` opcode.
    pub const fn kind_tag(&self) -> u8 {
        match self {
            Value::Unset => 0,
            Value::Num(_) => 1,
            Value::Str(_) => 2,
            Value::Label(_) => 3,
            Value::Table(_) => 4,
        }
    }

    /// The table this value references, if any.
    pub const fn table_id(&self) -> Option<TableId> {
        match self {
            Value::Table(id) => Some(*id),
            _ => None,
        }
    }

    /// Numeric view: numbers as-is, strings parsed like `atof`, everything
    /// else zero.
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Num(n) => *n,
            Value::Str(s) => parse_number(s),
            _ => 0.0,
        }
    }
}

/// Parses the longest leading numeric prefix of `text`, `0.0` if none.
///
/// Mirrors a locale-free `atof`: optional sign, digits, one decimal point,
/// optional exponent; trailing garbage is ignored.
pub fn parse_number(text: &str) -> f64 {
    let s = text.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;

    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end += 1;
    }
    let mut digits = 0;
    while bytes.get(end).is_some_and(u8::is_ascii_digit) {
        end += 1;
        digits += 1;
    }
    if bytes.get(end) == Some(&b'.') {
        end += 1;
        while bytes.get(end).is_some_and(u8::is_ascii_digit) {
            end += 1;
            digits += 1;
        }
    }
    if digits == 0 {
        return 0.0;
    }
    if matches!(bytes.get(end), Some(b'e') | Some(b'E')) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+') | Some(b'-')) {
            exp_end += 1;
        }
        if bytes.get(exp_end).is_some_and(u8::is_ascii_digit) {
            while bytes.get(exp_end).is_some_and(u8::is_ascii_digit) {
                exp_end += 1;
            }
            end = exp_end;
        }
    }

    s[..end].parse().unwrap_or(0.0)
}

/// Formats a number with at most `max_decimals` digits, trailing zeroes and
/// a dangling decimal point trimmed.
pub fn format_number(value: f64, max_decimals: usize) -> String {
    let max_decimals = max_decimals.min(127);
    let mut text = format!("{value:.max_decimals$}");
    if text.contains('.') {
        while text.ends_with('0') {
            text.pop();
        }
        if text.ends_with('.') {
            text.pop();
        }
    }
    text
}

/// Strict same-kind equality, as used by table searches and `ECMP`.
///
/// Unlike the `=` operator this never coerces: a number and a string are
/// simply unequal, two unsets are equal, tables compare by identity.
pub fn strict_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Unset, Value::Unset) => true,
        (Value::Num(x), Value::Num(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Label(x), Value::Label(y)) => x == y,
        (Value::Table(x), Value::Table(y)) => x == y,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("42", 42.0)]
    #[test_case("-3.5", -3.5)]
    #[test_case("  7 pigs", 7.0)]
    #[test_case("1e3", 1000.0)]
    #[test_case("1e", 1.0; "bare exponent is trailing garbage")]
    #[test_case("", 0.0)]
    #[test_case("pigs", 0.0)]
    #[test_case(".5", 0.5)]
    fn parses_like_atof(text: &str, expected: f64) {
        assert_eq!(parse_number(text), expected);
    }

    #[test_case(34.0, "34")]
    #[test_case(3.5, "3.5")]
    #[test_case(-0.25, "-0.25")]
    #[test_case(0.0, "0")]
    #[test_case(1.0 / 3.0, "0.33333333")]
    fn formats_with_trimmed_decimals(value: f64, expected: &str) {
        assert_eq!(format_number(value, 8), expected);
    }

    #[test]
    fn number_string_round_trip() {
        for text in ["0", "1", "34", "12.25", "-8.5"] {
            assert_eq!(format_number(parse_number(text), 8), text);
        }
    }

    #[test]
    fn strict_equality_never_coerces() {
        assert!(!strict_equal(&Value::Num(7.0), &Value::Str("7".into())));
        assert!(strict_equal(&Value::Unset, &Value::Unset));
        assert!(strict_equal(&Value::Table(TableId(3)), &Value::Table(TableId(3))));
        assert!(!strict_equal(&Value::Table(TableId(3)), &Value::Table(TableId(4))));
    }

    #[test]
    fn to_number_coerces_strings_only() {
        assert_eq!(Value::Str("12.5".into()).to_number(), 12.5);
        assert_eq!(Value::Unset.to_number(), 0.0);
        assert_eq!(Value::Label(9).to_number(), 0.0);
    }
}
