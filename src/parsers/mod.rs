//! Locale-aware scalar converters used by every extractor.
//!
//! None of these functions fail: malformed input yields `None`.

use regex::Regex;
use std::sync::OnceLock;

static RE_WHITESPACE: OnceLock<Regex> = OnceLock::new();
static RE_FIRST_INT: OnceLock<Regex> = OnceLock::new();
static RE_FIRST_DECIMAL: OnceLock<Regex> = OnceLock::new();
static RE_NUMBER_SPAN: OnceLock<Regex> = OnceLock::new();
static RE_DECIMAL_COMMA: OnceLock<Regex> = OnceLock::new();
static RE_DOT_THOUSANDS: OnceLock<Regex> = OnceLock::new();
static RE_ENERGY_TOKEN: OnceLock<Regex> = OnceLock::new();
static RE_PHONE: OnceLock<Regex> = OnceLock::new();

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static pattern compiles"))
}

/// Space characters sites use inside numbers
const NUMBER_SPACES: [char; 4] = [' ', '\u{a0}', '\u{202f}', '\u{2009}'];

const TRUE_WORDS: &[&str] = &["yes", "oui", "ja", "true", "1", "✓", "✔"];
const FALSE_WORDS: &[&str] = &["no", "non", "nein", "false", "0"];
const ENERGY_PLACEHOLDERS: &[&str] = &["blank", "vide", "leer", "-", "n/a"];

/// Country code stripped from phone numbers
const COUNTRY_CODE: &str = "352";

/// Collapse all whitespace runs into single spaces and trim.
pub fn clean_text(raw: &str) -> String {
    regex(&RE_WHITESPACE, r"\s+").replace_all(raw, " ").trim().to_string()
}

/// Parse a price written in either locale.
///
/// `"1 308 251,98 €"` → 1308251.98 (comma followed by 1-2 trailing digits is a
/// decimal mark), `"714,725"` → 714725 (any other comma groups thousands).
pub fn parse_price(raw: &str) -> Option<f64> {
    let compact: String = raw
        .chars()
        .filter(|c| !NUMBER_SPACES.contains(c) && !c.is_whitespace())
        .collect();
    let number = regex(&RE_NUMBER_SPAN, r"\d[\d.,]*")
        .find(&compact)?
        .as_str()
        .trim_end_matches(['.', ',']);

    let normalized = if regex(&RE_DECIMAL_COMMA, r",\d{1,2}$").is_match(number) {
        number.replace('.', "").replace(',', ".")
    } else if regex(&RE_DOT_THOUSANDS, r"^\d{1,3}(\.\d{3})+$").is_match(number) {
        number.replace('.', "")
    } else {
        number.replace(',', "")
    };

    regex(&RE_FIRST_DECIMAL, r"\d+(?:\.\d+)?")
        .find(&normalized)
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

/// First run of digits as an integer
pub fn parse_int(raw: &str) -> Option<i32> {
    regex(&RE_FIRST_INT, r"\d+")
        .find(raw)
        .and_then(|m| m.as_str().parse().ok())
}

/// First decimal number, accepting a comma as the decimal mark ("51,69 m²")
pub fn parse_float(raw: &str) -> Option<f64> {
    let normalized: String = raw
        .chars()
        .filter(|c| !NUMBER_SPACES[1..].contains(c))
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    regex(&RE_FIRST_DECIMAL, r"\d+(?:\.\d+)?")
        .find(&normalized)
        .and_then(|m| m.as_str().parse().ok())
}

/// Closed multilingual yes/no vocabulary. Anything else is unknown.
pub fn parse_bool(raw: &str) -> Option<bool> {
    let word = raw.trim().to_lowercase();
    if TRUE_WORDS.contains(&word.as_str()) {
        Some(true)
    } else if FALSE_WORDS.contains(&word.as_str()) {
        Some(false)
    } else {
        None
    }
}

/// Energy / insulation class: a single letter A-G with up to three `+`.
pub fn parse_energy_class(raw: &str) -> Option<String> {
    let value = clean_text(raw);
    if value.is_empty() || ENERGY_PLACEHOLDERS.contains(&value.to_lowercase().as_str()) {
        return None;
    }
    let token = regex(&RE_ENERGY_TOKEN, r"^[A-Ga-g]\+{0,3}$");
    value
        .split(|c: char| c.is_whitespace() || c == ':' || c == '(' || c == ')')
        .find(|part| token.is_match(part))
        .map(|part| part.to_uppercase())
}

/// Find a Luxembourg-style phone number in free text and return its digits
/// without the country code.
pub fn extract_phone_number(text: &str) -> Option<String> {
    let text = text.replace(['\u{a0}', '\u{202f}'], " ");
    let pattern = regex(
        &RE_PHONE,
        r"(?x)
        (?:(?:\+|00)352[\s\-./]?)?
        (?:6[0-9]{2}|2[0-9]{1,2}|27[0-9]|28[0-9]|4[2-9][0-9]|5[0-9]{2})
        [\s\-./]?\d{2,3}[\s\-./]?\d{2,3}(?:[\s\-./]?\d{2,3})?",
    );
    pattern
        .find_iter(&text)
        .filter_map(|m| normalize_phone_digits(m.as_str()))
        .next()
}

/// Digits of a phone number with any leading country code removed.
/// Accepts only 6-12 residual digits.
pub fn normalize_phone_digits(raw: &str) -> Option<String> {
    let mut digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if let Some(rest) = digits.strip_prefix("00") {
        digits = rest.to_string();
    }
    if digits.starts_with(COUNTRY_CODE) && digits.len() > 9 {
        digits.drain(..COUNTRY_CODE.len());
    }
    (6..=12).contains(&digits.len()).then_some(digits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_comma_decimal_locale() {
        assert_eq!(parse_price("1 308 251,98 €"), Some(1308251.98));
        assert_eq!(parse_price("1\u{202f}308\u{202f}251,98\u{a0}€"), Some(1308251.98));
        assert_eq!(parse_price("2 450,5 €"), Some(2450.5));
    }

    #[test]
    fn price_comma_thousands_locale() {
        assert_eq!(parse_price("714,725"), Some(714725.0));
        assert_eq!(parse_price("489,000"), Some(489000.0));
        assert_eq!(parse_price("€1,250,000"), Some(1250000.0));
    }

    #[test]
    fn price_space_and_dot_grouping() {
        assert_eq!(parse_price("1 308 252 €"), Some(1308252.0));
        assert_eq!(parse_price("1.250.000 €"), Some(1250000.0));
        assert_eq!(parse_price("2 100 € / mois"), Some(2100.0));
        assert_eq!(parse_price("2 450,50 €/mois"), Some(2450.5));
    }

    #[test]
    fn price_without_digits_is_none() {
        assert_eq!(parse_price(""), None);
        assert_eq!(parse_price("Prix sur demande"), None);
        assert_eq!(parse_price("€"), None);
    }

    #[test]
    fn int_takes_first_digit_run() {
        assert_eq!(parse_int("3 chambres"), Some(3));
        assert_eq!(parse_int("Etage 2 / 5"), Some(2));
        assert_eq!(parse_int("aucune"), None);
    }

    #[test]
    fn float_accepts_comma_decimal() {
        assert_eq!(parse_float("111,24 m²"), Some(111.24));
        assert_eq!(parse_float("51.69 m²"), Some(51.69));
        assert_eq!(parse_float("m²"), None);
    }

    #[test]
    fn bool_closed_vocabulary() {
        assert_eq!(parse_bool("Oui"), Some(true));
        assert_eq!(parse_bool("Non"), Some(false));
        assert_eq!(parse_bool(" ja "), Some(true));
        assert_eq!(parse_bool("Nein"), Some(false));
        assert_eq!(parse_bool("✓"), Some(true));
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_bool(""), None);
    }

    #[test]
    fn energy_class_letters_and_placeholders() {
        assert_eq!(parse_energy_class("B"), Some("B".to_string()));
        assert_eq!(parse_energy_class("A++"), Some("A++".to_string()));
        assert_eq!(parse_energy_class("Classe C"), Some("C".to_string()));
        assert_eq!(parse_energy_class("vide"), None);
        assert_eq!(parse_energy_class("Blank"), None);
        assert_eq!(parse_energy_class("-"), None);
        assert_eq!(parse_energy_class("H"), None);
        assert_eq!(parse_energy_class("A++++"), None);
    }

    #[test]
    fn phone_with_country_code() {
        assert_eq!(
            extract_phone_number("Contactez-nous au +352 621 123 456 !"),
            Some("621123456".to_string())
        );
        assert_eq!(
            extract_phone_number("Tel 00352 691 23 45 67"),
            Some("691234567".to_string())
        );
    }

    #[test]
    fn phone_local_format() {
        assert_eq!(
            extract_phone_number("Appelez le 26 12 34 56 pour visiter"),
            Some("26123456".to_string())
        );
        assert_eq!(extract_phone_number("Bel appartement lumineux"), None);
    }

    #[test]
    fn phone_digit_normalization() {
        assert_eq!(normalize_phone_digits("tel:+352621123456"), Some("621123456".to_string()));
        assert_eq!(normalize_phone_digits("12345"), None);
        assert_eq!(normalize_phone_digits("1234567890123"), None);
    }
}
