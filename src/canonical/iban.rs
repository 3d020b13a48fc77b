//! IBAN normalisation and ISO 7064 mod-97 checksum verification.

use super::is_known_country_code;

/// Outcome of an IBAN check, in decreasing order of confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IbanCheck {
    /// Checksum verified and the country prefix is known.
    Valid,
    /// Checksum verified but the country prefix is not an ISO 3166 code.
    /// Callers downgrade this to a warning rather than rejecting.
    UnknownCountry,
    /// Wrong length, illegal characters, or no leading country/check digits.
    InvalidFormat,
    /// Well-formed but the mod-97 check fails.
    InvalidChecksum,
}

/// Uppercase and strip all whitespace.
pub fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Verify a normalised IBAN.
pub fn check(iban: &str) -> IbanCheck {
    let bytes = iban.as_bytes();
    if !(15..=34).contains(&bytes.len())
        || !bytes[0].is_ascii_uppercase()
        || !bytes[1].is_ascii_uppercase()
        || !bytes[2].is_ascii_digit()
        || !bytes[3].is_ascii_digit()
        || !bytes[4..].iter().all(|b| b.is_ascii_alphanumeric())
    {
        return IbanCheck::InvalidFormat;
    }

    if mod97(iban) != 1 {
        return IbanCheck::InvalidChecksum;
    }

    if is_known_country_code(&iban[..2]) {
        IbanCheck::Valid
    } else {
        IbanCheck::UnknownCountry
    }
}

/// ISO 7064: move the first four characters to the end, substitute
/// A=10..Z=35, and take the remainder mod 97.
fn mod97(iban: &str) -> u32 {
    let rearranged = iban.bytes().skip(4).chain(iban.bytes().take(4));
    let mut rem: u32 = 0;
    for b in rearranged {
        if b.is_ascii_digit() {
            rem = (rem * 10 + u32::from(b - b'0')) % 97;
        } else {
            let v = u32::from(b - b'A') + 10;
            rem = (rem * 100 + v) % 97;
        }
    }
    rem
}
