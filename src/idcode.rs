//! Sequential referral ID codes.
//!
//! Codes are four characters wide and move through four stages:
//!
//! | Stage | Shape              | Range           |
//! |-------|--------------------|-----------------|
//! | 1     | 4 digits           | `0001`-`9999`   |
//! | 2     | letter + 3 digits  | `A001`-`Z999`   |
//! | 3     | 2 letters + 2 digits | `AA01`-`ZZ99` |
//! | 4     | 3 letters + 1 digit  | `AAA1`-`ZZZ9` |
//!
//! The previous code must come from the most recently *created* record.
//! Sorting the codes themselves does not work: `Z999` sorts after `AA01`.

use std::fmt;

use thiserror::Error;

/// First code handed out when nothing has been allocated yet.
pub const FIRST_CODE: CodeFormat = CodeFormat::Digits(1);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodeError {
    /// The stored previous code matches none of the four stages.
    #[error("previous code {0:?} is not a recognized ID code")]
    Malformed(String),

    /// `ZZZ9` was the previous code; there is no next value.
    #[error("ID code sequence exhausted after ZZZ9")]
    Exhausted,
}

/// A parsed ID code. Digit fields hold the numeric trailing value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeFormat {
    Digits(u16),
    Letter(char, u16),
    TwoLetters(char, char, u16),
    ThreeLetters(char, char, char, u16),
}

impl CodeFormat {
    /// Parse a code. Anything other than the four exact shapes is rejected.
    pub fn parse(code: &str) -> Option<Self> {
        let bytes = code.as_bytes();
        if bytes.len() != 4 || !code.is_ascii() {
            return None;
        }

        let letters = bytes.iter().take_while(|b| b.is_ascii_uppercase()).count();
        let (head, tail) = bytes.split_at(letters);
        if tail.is_empty() || !tail.iter().all(u8::is_ascii_digit) {
            return None;
        }

        let value = tail
            .iter()
            .fold(0u16, |acc, b| acc * 10 + u16::from(b - b'0'));
        let letter = |i: usize| char::from(head[i]);

        match letters {
            0 => Some(Self::Digits(value)),
            1 => Some(Self::Letter(letter(0), value)),
            2 => Some(Self::TwoLetters(letter(0), letter(1), value)),
            3 => Some(Self::ThreeLetters(letter(0), letter(1), letter(2), value)),
            _ => None,
        }
    }

    /// The code that follows this one, crossing stage boundaries as needed.
    pub fn increment(self) -> Result<Self, CodeError> {
        let next = match self {
            Self::Digits(n) if n < 9999 => Self::Digits(n + 1),
            Self::Digits(_) => Self::Letter('A', 1),

            Self::Letter(c, n) if n < 999 => Self::Letter(c, n + 1),
            Self::Letter('Z', _) => Self::TwoLetters('A', 'A', 1),
            Self::Letter(c, _) => Self::Letter(next_letter(c), 1),

            Self::TwoLetters(a, b, n) if n < 99 => Self::TwoLetters(a, b, n + 1),
            Self::TwoLetters('Z', 'Z', _) => Self::ThreeLetters('A', 'A', 'A', 1),
            Self::TwoLetters(a, 'Z', _) => Self::TwoLetters(next_letter(a), 'A', 1),
            Self::TwoLetters(a, b, _) => Self::TwoLetters(a, next_letter(b), 1),

            Self::ThreeLetters(a, b, c, n) if n < 9 => Self::ThreeLetters(a, b, c, n + 1),
            Self::ThreeLetters('Z', 'Z', 'Z', _) => return Err(CodeError::Exhausted),
            Self::ThreeLetters(a, 'Z', 'Z', _) => Self::ThreeLetters(next_letter(a), 'A', 'A', 1),
            Self::ThreeLetters(a, b, 'Z', _) => Self::ThreeLetters(a, next_letter(b), 'A', 1),
            Self::ThreeLetters(a, b, c, _) => Self::ThreeLetters(a, b, next_letter(c), 1),
        };
        Ok(next)
    }
}

impl fmt::Display for CodeFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Digits(n) => write!(f, "{n:04}"),
            Self::Letter(a, n) => write!(f, "{a}{n:03}"),
            Self::TwoLetters(a, b, n) => write!(f, "{a}{b}{n:02}"),
            Self::ThreeLetters(a, b, c, n) => write!(f, "{a}{b}{c}{n}"),
        }
    }
}

fn next_letter(c: char) -> char {
    // Callers never pass 'Z'.
    char::from(c as u8 + 1)
}

/// Compute the code to assign after `last`.
///
/// `None` means no record has been created yet.
pub fn next_code(last: Option<&str>) -> Result<String, CodeError> {
    let Some(last) = last else {
        return Ok(FIRST_CODE.to_string());
    };

    let parsed = CodeFormat::parse(last).ok_or_else(|| CodeError::Malformed(last.to_string()))?;
    Ok(parsed.increment()?.to_string())
}
