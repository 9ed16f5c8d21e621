//! Response text to controller payload.

use thiserror::Error;

use crate::command::{CommandKind, CommandSpec};

/// Why a response could not be turned into a payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// The response does not match the command's pattern.
    #[error("response does not match pattern {0:?}")]
    PatternMismatch(String),

    /// No finite single-precision number could be parsed.
    #[error("invalid number {0:?}")]
    InvalidNumber(String),

    /// A byte-list token is not an integer in 0..=255.
    #[error("invalid byte {0:?}")]
    InvalidByte(String),

    /// The command kind has no encoding.
    #[error("command kind {0} has no encoding")]
    Unsupported(CommandKind),
}

/// Encode a response for the command it answered.
///
/// The response is re-checked against the command's pattern before any
/// parsing happens.
pub fn encode(text: &str, spec: &CommandSpec) -> Result<Vec<u8>, EncodeError> {
    if !spec.accepts(text) {
        return Err(EncodeError::PatternMismatch(spec.pattern().as_str().to_string()));
    }

    match spec.kind() {
        CommandKind::NumericScalar => encode_number(text),
        CommandKind::ByteList => encode_bytes(text),
        kind @ CommandKind::Unsupported => Err(EncodeError::Unsupported(kind)),
    }
}

/// `"20.0C\r"` becomes the big-endian IEEE-754 bytes of `20.0f32`.
fn encode_number(text: &str) -> Result<Vec<u8>, EncodeError> {
    let number = text
        .trim_start()
        .trim_end_matches(|c: char| !(c.is_ascii_digit() || c == '.'));

    let value: f32 = number
        .parse()
        .map_err(|_| EncodeError::InvalidNumber(text.to_string()))?;

    if !value.is_finite() {
        return Err(EncodeError::InvalidNumber(text.to_string()));
    }

    Ok(value.to_be_bytes().to_vec())
}

/// `"0 0 0 13 64\r"` becomes `[0, 0, 0, 13, 64]`.
fn encode_bytes(text: &str) -> Result<Vec<u8>, EncodeError> {
    text.trim_end_matches(['\r', '\n'])
        .split(' ')
        .map(|token| {
            token
                .parse::<u8>()
                .map_err(|_| EncodeError::InvalidByte(token.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric() -> CommandSpec {
        CommandSpec::new("RT\r", r"-?[\d.]+", 0, CommandKind::NumericScalar).unwrap()
    }

    fn bytes() -> CommandSpec {
        CommandSpec::new("RUFS\r", r"\d", 4, CommandKind::ByteList).unwrap()
    }

    #[test]
    fn test_numeric_with_unit() {
        assert_eq!(encode("20.0C\r", &numeric()).unwrap(), vec![0x41, 0xA0, 0x00, 0x00]);
    }

    #[test]
    fn test_numeric_variants() {
        assert_eq!(encode("-1.5C\r", &numeric()).unwrap(), (-1.5f32).to_be_bytes().to_vec());
        assert_eq!(encode("  7\r\n", &numeric()).unwrap(), 7.0f32.to_be_bytes().to_vec());
        assert_eq!(encode("0.25 degC\r", &numeric()).unwrap(), 0.25f32.to_be_bytes().to_vec());
    }

    #[test]
    fn test_numeric_rejects_garbage() {
        let spec = CommandSpec::new("RT\r", r"\d", 0, CommandKind::NumericScalar).unwrap();
        assert!(matches!(encode("1.2.3C\r", &spec), Err(EncodeError::InvalidNumber(_))));
        assert!(matches!(encode("T=5C\r", &spec), Err(EncodeError::InvalidNumber(_))));
    }

    #[test]
    fn test_numeric_rejects_overflow() {
        let spec = CommandSpec::new("RT\r", r"\d", 0, CommandKind::NumericScalar).unwrap();
        let huge = format!("{}0\r", "9".repeat(60));
        assert!(matches!(encode(&huge, &spec), Err(EncodeError::InvalidNumber(_))));
    }

    #[test]
    fn test_byte_list() {
        assert_eq!(encode("0 0 0 13 64\r", &bytes()).unwrap(), vec![0, 0, 0, 13, 64]);
        assert_eq!(
            encode("0 0 0 13 64 128 192 255\r", &bytes()).unwrap(),
            vec![0, 0, 0, 13, 64, 128, 192, 255]
        );
        assert_eq!(encode("7", &bytes()).unwrap(), vec![7]);
    }

    #[test]
    fn test_byte_list_rejects_out_of_range() {
        assert_eq!(
            encode("0 256 1\r", &bytes()),
            Err(EncodeError::InvalidByte("256".to_string()))
        );
    }

    #[test]
    fn test_byte_list_rejects_double_space() {
        assert_eq!(
            encode("1  2\r", &bytes()),
            Err(EncodeError::InvalidByte(String::new()))
        );
    }

    #[test]
    fn test_pattern_rechecked() {
        assert!(matches!(encode("ERR\r", &numeric()), Err(EncodeError::PatternMismatch(_))));
    }

    #[test]
    fn test_unsupported() {
        let spec = CommandSpec::new("ID\r", ".", 0, CommandKind::Unsupported).unwrap();
        assert_eq!(
            encode("ACME\r", &spec),
            Err(EncodeError::Unsupported(CommandKind::Unsupported))
        );
    }
}
