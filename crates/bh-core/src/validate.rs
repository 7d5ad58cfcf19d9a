use unicode_normalization::UnicodeNormalization;

use crate::error::{Error, Result};

pub const MAX_ROLE_LEN: usize = 50;
pub const MAX_SUBJECT_LEN: usize = 200;
pub const MAX_BODY_BYTES: usize = 64 * 1024;
pub const MAX_BEAD_ID_LEN: usize = 64;
pub const MAX_ALIAS_LEN: usize = 40;

/// NFC-normalise and trim a client string. All persisted text goes through
/// this before comparison or storage.
pub fn nfc_trim(s: &str) -> String {
    s.trim().nfc().collect()
}

/// Aliases match `^[a-z][a-z0-9-]{0,39}$`.
pub fn validate_alias(alias: &str) -> Result<()> {
    let mut chars = alias.chars();
    let valid_head = matches!(chars.next(), Some(c) if c.is_ascii_lowercase());
    let valid_tail = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !valid_head || !valid_tail || alias.len() > MAX_ALIAS_LEN {
        return Err(Error::Validation(format!(
            "alias {alias:?} must match ^[a-z][a-z0-9-]{{0,39}}$"
        )));
    }
    Ok(())
}

pub fn validate_role(role: &str) -> Result<()> {
    if role.is_empty() || role.len() > MAX_ROLE_LEN {
        return Err(Error::Validation(format!(
            "role must be 1..={MAX_ROLE_LEN} characters"
        )));
    }
    Ok(())
}

pub fn validate_subject(subject: &str) -> Result<()> {
    if subject.is_empty() || subject.chars().count() > MAX_SUBJECT_LEN {
        return Err(Error::Validation(format!(
            "subject must be 1..={MAX_SUBJECT_LEN} characters"
        )));
    }
    Ok(())
}

pub fn validate_body(body: &str) -> Result<()> {
    if body.is_empty() {
        return Err(Error::Validation("body must not be empty".into()));
    }
    if body.len() > MAX_BODY_BYTES {
        return Err(Error::Validation(format!(
            "body exceeds {MAX_BODY_BYTES} bytes"
        )));
    }
    Ok(())
}

/// Bead ids are client-defined; the server only bounds their length and
/// rejects embedded whitespace/control characters.
pub fn validate_bead_id(bead_id: &str) -> Result<()> {
    if bead_id.is_empty() || bead_id.len() > MAX_BEAD_ID_LEN {
        return Err(Error::Validation(format!(
            "bead_id must be 1..={MAX_BEAD_ID_LEN} characters"
        )));
    }
    if bead_id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(Error::Validation(
            "bead_id must not contain whitespace or control characters".into(),
        ));
    }
    Ok(())
}

/// Compare labels as sets, ignoring order and duplicates.
pub fn labels_equal(a: &[String], b: &[String]) -> bool {
    use std::collections::BTreeSet;
    let sa: BTreeSet<&str> = a.iter().map(String::as_str).collect();
    let sb: BTreeSet<&str> = b.iter().map(String::as_str).collect();
    sa == sb
}
