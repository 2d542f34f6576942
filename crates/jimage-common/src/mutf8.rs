//! Modified UTF-8.
//!
//! Image strings use the JVM's modified UTF-8: NUL is written as the two-byte
//! sequence `0xC0 0x80` so that a single zero byte can terminate a string, and
//! supplementary characters are written as two three-byte surrogate
//! sequences rather than one four-byte sequence.
//!
//! Decoding and matching accept the terminator-free byte run of one string.
//! Matching compares against a Rust `&str` in place, without allocating.

use crate::{Error, Result};

/// Call `f` with every byte of the modified UTF-8 encoding of `text`.
#[inline]
pub fn for_each_byte<F: FnMut(u8)>(text: &str, mut f: F) {
    let mut units = [0u16; 2];
    for ch in text.chars() {
        let c = ch as u32;
        if c != 0 && c < 0x80 {
            f(c as u8);
            continue;
        }
        for &unit in ch.encode_utf16(&mut units).iter() {
            encode_unit(unit, &mut f);
        }
    }
}

#[inline]
fn encode_unit<F: FnMut(u8)>(unit: u16, f: &mut F) {
    let u = unit as u32;
    if u != 0 && u < 0x80 {
        f(u as u8);
    } else if u < 0x800 {
        f(0xC0 | (u >> 6) as u8);
        f(0x80 | (u & 0x3F) as u8);
    } else {
        f(0xE0 | (u >> 12) as u8);
        f(0x80 | ((u >> 6) & 0x3F) as u8);
        f(0x80 | (u & 0x3F) as u8);
    }
}

/// Encode `text` as modified UTF-8, without a terminator.
pub fn encode(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for_each_byte(text, |b| out.push(b));
    out
}

/// Decode one UTF-16 code unit starting at `pos`.
fn decode_unit(bytes: &[u8], pos: usize) -> Result<(u32, usize)> {
    let continuation = |i: usize| -> Result<u32> {
        match bytes.get(i) {
            Some(&b) if b & 0xC0 == 0x80 => Ok((b & 0x3F) as u32),
            _ => Err(Error::InvalidModifiedUtf8 { position: i }),
        }
    };

    let b0 = match bytes.get(pos) {
        Some(&b) => b as u32,
        None => return Err(Error::InvalidModifiedUtf8 { position: pos }),
    };

    if b0 < 0x80 {
        Ok((b0, pos + 1))
    } else if b0 & 0xE0 == 0xC0 {
        Ok((((b0 & 0x1F) << 6) | continuation(pos + 1)?, pos + 2))
    } else if b0 & 0xF0 == 0xE0 {
        let unit = ((b0 & 0x0F) << 12) | (continuation(pos + 1)? << 6) | continuation(pos + 2)?;
        Ok((unit, pos + 3))
    } else {
        Err(Error::InvalidModifiedUtf8 { position: pos })
    }
}

/// Decode one character starting at `pos`, returning it with the next position.
///
/// Surrogate pairs are recombined; an unpaired surrogate decodes to
/// `U+FFFD`, since it has no `char` representation.
pub fn decode_char(bytes: &[u8], pos: usize) -> Result<(char, usize)> {
    let (unit, next) = decode_unit(bytes, pos)?;

    if (0xD800..0xDC00).contains(&unit) {
        if let Ok((low, after)) = decode_unit(bytes, next) {
            if (0xDC00..0xE000).contains(&low) {
                let cp = 0x10000 + ((unit - 0xD800) << 10) + (low - 0xDC00);
                return Ok((
                    char::from_u32(cp).unwrap_or(char::REPLACEMENT_CHARACTER),
                    after,
                ));
            }
        }
        return Ok((char::REPLACEMENT_CHARACTER, next));
    }

    Ok((
        char::from_u32(unit).unwrap_or(char::REPLACEMENT_CHARACTER),
        next,
    ))
}

/// Decode a terminator-free modified UTF-8 byte run.
pub fn decode(bytes: &[u8]) -> Result<String> {
    if bytes.is_ascii() {
        return Ok(bytes.iter().map(|&b| b as char).collect());
    }

    let mut out = String::with_capacity(bytes.len());
    let mut pos = 0;
    while pos < bytes.len() {
        let (ch, next) = decode_char(bytes, pos)?;
        out.push(ch);
        pos = next;
    }
    Ok(out)
}

/// Check whether the stored string `stored` is a prefix of `candidate[start..]`.
///
/// Returns the number of candidate bytes consumed on success and `None` on
/// the first divergence. Malformed stored bytes never match.
pub fn match_prefix(stored: &[u8], candidate: &str, start: usize) -> Option<usize> {
    let cand = candidate.as_bytes();
    let mut pos = 0;
    let mut index = start;

    while pos < stored.len() {
        let b = stored[pos];
        if b < 0x80 {
            if cand.get(index) != Some(&b) {
                return None;
            }
            pos += 1;
            index += 1;
            continue;
        }

        let (ch, next) = decode_char(stored, pos).ok()?;
        let expected = candidate.get(index..)?.chars().next()?;
        if ch != expected {
            return None;
        }
        pos = next;
        index += ch.len_utf8();
    }

    Some(index - start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_nul_and_ascii() {
        assert_eq!(encode("a\0b"), vec![b'a', 0xC0, 0x80, b'b']);
    }

    #[test]
    fn test_encode_supplementary_as_surrogates() {
        assert_eq!(encode("\u{1F600}"), vec![0xED, 0xA0, 0xBD, 0xED, 0xB8, 0x80]);
    }

    #[test]
    fn test_decode_two_and_three_byte() {
        assert_eq!(decode(&[0xC3, 0xA9]).unwrap(), "é");
        assert_eq!(decode(&[0xE2, 0x82, 0xAC]).unwrap(), "€");
        assert_eq!(decode(&[0xC0, 0x80]).unwrap(), "\0");
    }

    #[test]
    fn test_decode_rejects_truncated() {
        assert!(matches!(
            decode(&[b'x', 0xE2, 0x82]),
            Err(Error::InvalidModifiedUtf8 { position: 3 })
        ));
    }

    #[test]
    fn test_match_prefix() {
        let stored = encode("java");
        assert_eq!(match_prefix(&stored, "/java/lang", 1), Some(4));
        assert_eq!(match_prefix(&stored, "/javax", 1), Some(4));
        assert_eq!(match_prefix(&stored, "/jav", 1), None);
        assert_eq!(match_prefix(&stored, "/kava", 1), None);
        assert_eq!(match_prefix(&[], "anything", 3), Some(0));
    }

    #[test]
    fn test_match_prefix_non_ascii() {
        let stored = encode("d\u{e9}j\u{e0}\u{1F600}");
        let candidate = "x/d\u{e9}j\u{e0}\u{1F600}/rest";
        let consumed = match_prefix(&stored, candidate, 2).unwrap();
        assert_eq!(&candidate[2 + consumed..], "/rest");
        assert_eq!(match_prefix(&stored, "x/deja", 2), None);
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(text in "\\PC*") {
            prop_assert_eq!(decode(&encode(&text)).unwrap(), text.clone());
            prop_assert_eq!(match_prefix(&encode(&text), &text, 0), Some(text.len()));
        }
    }
}
