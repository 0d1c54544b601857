//! Phone number normalization
//!
//! The same contact shows up as `(555) 123-4567`, `555-123-4567` and
//! `+15551234567` across devices and backup versions. Every address is passed
//! through [`normalize_phone_number`] before it becomes part of a record key.

/// Canonicalize a phone number for use as a conversation key.
///
/// Non-digit characters are dropped. A leading `+` is kept. Without one, a
/// 10-digit number gets `+1`, an 11-digit number starting with `1` gets `+`,
/// and any other length is returned as bare digits. Input without digits
/// normalizes to the empty string.
///
/// ```
/// use sbv_rust::address::normalize_phone_number;
///
/// assert_eq!(normalize_phone_number("(555) 123-4567"), "+15551234567");
/// assert_eq!(normalize_phone_number("+44 20 7946 0958"), "+442079460958");
/// assert_eq!(normalize_phone_number("12345"), "12345");
/// ```
#[must_use]
pub fn normalize_phone_number(raw: &str) -> String {
    let has_plus = raw.starts_with('+');
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();

    if digits.is_empty() {
        return String::new();
    }

    if has_plus {
        return format!("+{digits}");
    }

    match digits.len() {
        10 => format!("+1{digits}"),
        11 if digits.starts_with('1') => format!("+{digits}"),
        _ => digits,
    }
}

/// Normalize a list of addresses into a sorted set, dropping empties.
#[must_use]
pub fn normalize_participants<'a, I>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut set: Vec<String> = raw
        .into_iter()
        .map(normalize_phone_number)
        .filter(|addr| !addr.is_empty())
        .collect();
    set.sort();
    set.dedup();
    set
}
