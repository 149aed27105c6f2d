use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};

use crate::{BridgeError, Result};

/// View applied to serial payloads at the read/write boundary. The session
/// itself always stores raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Utf8,
    Hex,
    Base64,
}

impl FromStr for Encoding {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" | "ascii" | "text" => Ok(Encoding::Utf8),
            "hex" => Ok(Encoding::Hex),
            "base64" | "b64" => Ok(Encoding::Base64),
            other => Err(BridgeError::invalid_argument(format!(
                "unknown encoding '{other}' (expected utf8, hex, or base64)"
            ))),
        }
    }
}

impl Encoding {
    pub fn decode(&self, data: &str) -> Result<Vec<u8>> {
        match self {
            Encoding::Utf8 => Ok(data.as_bytes().to_vec()),
            Encoding::Hex => {
                let compact: String = data.chars().filter(|c| !c.is_whitespace()).collect();
                hex::decode(&compact).map_err(|e| {
                    BridgeError::invalid_argument(format!("invalid hex payload: {e}"))
                })
            }
            Encoding::Base64 => BASE64_STANDARD.decode(data).map_err(|e| {
                BridgeError::invalid_argument(format!("invalid base64 payload: {e}"))
            }),
        }
    }

    pub fn encode(&self, bytes: &[u8]) -> String {
        match self {
            Encoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Encoding::Hex => hex::encode(bytes),
            Encoding::Base64 => BASE64_STANDARD.encode(bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_encoding_names() {
        assert_eq!("utf8".parse::<Encoding>().unwrap(), Encoding::Utf8);
        assert_eq!("UTF-8".parse::<Encoding>().unwrap(), Encoding::Utf8);
        assert_eq!("hex".parse::<Encoding>().unwrap(), Encoding::Hex);
        assert_eq!("b64".parse::<Encoding>().unwrap(), Encoding::Base64);
        assert!("ebcdic".parse::<Encoding>().is_err());
    }

    #[test]
    fn test_hex_decode_tolerates_spacing() {
        let bytes = Encoding::Hex.decode("de ad be ef").unwrap();
        assert_eq!(bytes, vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn test_hex_decode_rejects_odd_digits() {
        let err = Encoding::Hex.decode("abc").unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[test]
    fn test_utf8_round_trip() {
        let bytes = Encoding::Utf8.decode("hello").unwrap();
        assert_eq!(bytes, b"hello");
        assert_eq!(Encoding::Utf8.encode(&bytes), "hello");
    }

    #[test]
    fn test_base64_decode_rejects_garbage() {
        let err = Encoding::Base64.decode("!!not base64!!").unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }
}
