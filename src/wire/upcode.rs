//! Upcode encoding & decoding for the Yate Engine external module protocol.
//!
//! Any value that contains special characters (ASCII `<32`), or `:`, MUST
//! have them converted to `%<upcode>` where `<upcode>` is the character
//! with a numeric value equal to `64 + original ASCII code`.
//!
//! The `%` character itself MUST be converted to a special `%%`
//! representation. Characters with codes `>=32` (except `%` and `:`)
//! SHOULD not be escaped but may be so.
//!
//! A `%`-escaped code may be received instead of an unescaped character
//! anywhere except in the initial keyword.
//!
//! _see <https://docs.yate.ro/wiki/External_module_command_flow#Format_of_commands_and_notifications>_.

use std::borrow::Cow;

use super::Error;

fn updecode(ch: char) -> Result<char, Error> {
    if ch == '%' {
        Ok(ch)
    } else {
        match u8::try_from(ch) {
            Ok(code @ 64..=127) => Ok(char::from(code - 64)),
            _ => Err(Error::BadUpcode(ch)),
        }
    }
}

/// Decode a `%`-encoded string, as found in any field but the initial verb.
///
/// Never panics: malformed upcodes are reported as [`Error::BadUpcode`].
pub fn decode(value: &str) -> Result<Cow<'_, str>, Error> {
    if !value.contains('%') {
        return Ok(value.into());
    }

    let mut decoded = String::with_capacity(value.len());
    let mut decoding = false;
    for ch in value.chars() {
        if decoding {
            decoding = false;
            decoded.push(updecode(ch)?);
        } else if ch == '%' {
            decoding = true;
        } else {
            decoded.push(ch);
        }
    }

    if decoding {
        return Err(Error::BadUpcode('\0'));
    }

    Ok(decoded.into())
}

fn upencode(ch: char) -> char {
    if ch == '%' {
        ch
    } else {
        char::from(ch as u8 + 64)
    }
}

/// Encode a string so it is safe to place in any field but the initial verb.
///
/// Encodes ASCII control characters, `%` and `:`; nothing else. This is the
/// exact predicate of spec §4.1 — no stray character is ever appended,
/// unlike the early codec named in spec §9.
pub fn encode(value: &str) -> Cow<'_, str> {
    let pred = |ch: &char| ch.is_ascii_control() || matches!(ch, '%' | ':');
    let encodable = value.chars().filter(pred).count();

    if encodable == 0 {
        return value.into();
    }

    let mut encoded = String::with_capacity(value.len() + encodable);
    for ch in value.chars() {
        if pred(&ch) {
            encoded.push('%');
            encoded.push(upencode(ch));
        } else {
            encoded.push(ch);
        }
    }

    encoded.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zc_decoding() {
        assert!(matches!(decode("123456"), Ok(Cow::Borrowed(_))));
        assert!(matches!(decode("engine.timer"), Ok(Cow::Borrowed(_))));
    }

    #[test]
    fn zc_encoding() {
        assert!(matches!(encode("123456"), Cow::Borrowed(_)));
        assert!(matches!(encode("engine.timer"), Cow::Borrowed(_)));
    }

    #[test]
    fn it_decodes() {
        assert_eq!(
            decode("a%%null%%separated%%string").unwrap(),
            "a%null%separated%string"
        );
        assert_eq!(
            decode("a%@null%@separated%@string").unwrap(),
            "a\0null\0separated\0string"
        );
        assert_eq!(
            decode("a%znull%zseparated%zstring").unwrap(),
            "a:null:separated:string"
        );
    }

    #[test]
    fn it_encodes() {
        assert_eq!(
            encode("a%null%separated%string"),
            "a%%null%%separated%%string"
        );
        assert_eq!(
            encode("a\0null\0separated\0string"),
            "a%@null%@separated%@string"
        );
        assert_eq!(
            encode("a:null:separated:string"),
            "a%znull%zseparated%zstring"
        );
    }

    #[test]
    fn its_consistent() {
        assert_eq!(encode(&decode("engine.timer").unwrap()), "engine.timer");
        assert_eq!(decode(&encode("engine.timer")).unwrap(), "engine.timer");

        assert_eq!(encode(&decode("some text").unwrap()), "some text");
        assert_eq!(decode(&encode("some text")).unwrap(), "some text");
    }

    #[test]
    fn it_rejects_bad_upcodes() {
        assert!(decode("%\n").is_err());
        assert!(decode("%\0").is_err());
        assert!(decode("%0").is_err());
        assert!(decode("% ").is_err());
    }

    /// Spec §8 scenario S1.
    #[test]
    fn s1_escape_round_trip() {
        let input = "a:b%c\nd";
        let escaped = encode(input);

        assert_eq!(escaped, "a%zb%%c%Jd");
        assert!(!escaped.chars().any(|ch| (ch as u32) < 32));
        assert!(!escaped.contains(':'));

        assert_eq!(decode(&escaped).unwrap(), input);
    }

    #[test]
    fn escape_contains_no_control_or_colon() {
        for s in ["plain", "a:b", "a\nb", "a\0b", "a%b", "mixed:\n%b"] {
            let escaped = encode(s);
            assert!(escaped.chars().all(|ch| !ch.is_ascii_control() && ch != ':'));
            assert_eq!(decode(&escaped).unwrap(), s);
        }
    }
}
