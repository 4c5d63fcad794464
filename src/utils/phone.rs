// src/utils/phone.rs

/// Strip everything but digits. Stored phones are always in this form.
pub fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Human-readable national format `(XX) XXXXX-XXXX`, dropping a leading
/// country code. Numbers that don't have 11 national digits come back as digits.
pub fn format_phone(raw: &str) -> String {
    let digits = normalize_phone(raw);
    let national = if digits.len() > 11 {
        &digits[digits.len() - 11..]
    } else {
        digits.as_str()
    };

    if national.len() == 11 {
        format!("({}) {}-{}", &national[0..2], &national[2..7], &national[7..])
    } else {
        national.to_string()
    }
}
