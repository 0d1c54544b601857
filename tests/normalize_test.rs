//! Comprehensive unit tests for address.rs module

use proptest::prelude::*;
use sbv_rust::address::{normalize_participants, normalize_phone_number};

#[test]
fn test_normalize_ten_digit_number() {
    assert_eq!(normalize_phone_number("555-123-4567"), "+15551234567");
    assert_eq!(normalize_phone_number("(555) 123-4567"), "+15551234567");
    assert_eq!(normalize_phone_number("555.123.4567"), "+15551234567");
}

#[test]
fn test_normalize_eleven_digit_number_with_country_code() {
    assert_eq!(normalize_phone_number("1-555-123-4567"), "+15551234567");
    assert_eq!(normalize_phone_number("15551234567"), "+15551234567");
}

#[test]
fn test_normalize_keeps_explicit_plus() {
    assert_eq!(normalize_phone_number("+1 (555) 123-4567"), "+15551234567");
    assert_eq!(normalize_phone_number("+44 20 7946 0958"), "+442079460958");
}

#[test]
fn test_normalize_other_lengths_are_bare_digits() {
    assert_eq!(normalize_phone_number("12345"), "12345");
    assert_eq!(normalize_phone_number("25551234567"), "25551234567");
    assert_eq!(normalize_phone_number("*86"), "86");
}

#[test]
fn test_normalize_without_digits_is_empty() {
    assert_eq!(normalize_phone_number(""), "");
    assert_eq!(normalize_phone_number("Unknown"), "");
    assert_eq!(normalize_phone_number("+"), "");
}

#[test]
fn test_reformatted_numbers_share_a_key() {
    let variants = ["555-123-4567", "+15551234567", "(555) 123-4567", "1 555 123 4567"];
    let keys: Vec<String> = variants.iter().map(|v| normalize_phone_number(v)).collect();
    assert!(keys.iter().all(|k| k == "+15551234567"));
}

#[test]
fn test_participants_sorted_and_deduplicated() {
    let set = normalize_participants(["555-222-0000", "+15551110000", "5551110000", ""]);
    assert_eq!(set, vec!["+15551110000".to_string(), "+15552220000".to_string()]);
}

#[test]
fn test_participants_order_independent() {
    let a = normalize_participants(["5551110000", "5552220000", "5553330000"]);
    let b = normalize_participants(["5553330000", "5551110000", "5552220000"]);
    assert_eq!(a, b);
}

proptest! {
    #[test]
    fn prop_normalize_is_idempotent(raw in "\\PC{0,24}") {
        let once = normalize_phone_number(&raw);
        prop_assert_eq!(normalize_phone_number(&once), once.clone());
    }

    #[test]
    fn prop_output_is_plus_and_digits(raw in "[0-9()+ .-]{0,20}") {
        let out = normalize_phone_number(&raw);
        let digits = out.strip_prefix('+').unwrap_or(&out);
        prop_assert!(digits.chars().all(|c| c.is_ascii_digit()));
        prop_assert!(!digits.contains('+'));
    }

    #[test]
    fn prop_formatting_does_not_change_key(area in "[2-9][0-9]{2}", exchange in "[0-9]{3}", line in "[0-9]{4}") {
        let plain = format!("{area}{exchange}{line}");
        let dashed = format!("{area}-{exchange}-{line}");
        let international = format!("+1 ({area}) {exchange} {line}");
        let key = normalize_phone_number(&plain);
        prop_assert_eq!(&normalize_phone_number(&dashed), &key);
        prop_assert_eq!(&normalize_phone_number(&international), &key);
    }
}
