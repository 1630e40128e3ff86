use crate::error::{RecallError, Result};
use std::fmt;
use zeroize::Zeroizing;

pub const KEY_LEN: usize = 32;

/// Raw 32-byte database key. Wiped on drop.
#[derive(Clone)]
pub struct KeyMaterial {
    bytes: Zeroizing<[u8; KEY_LEN]>,
}

impl KeyMaterial {
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() != KEY_LEN {
            return Err(RecallError::InvalidKeyHex(format!(
                "expected {KEY_LEN} bytes, got {}",
                raw.len()
            )));
        }
        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        bytes.copy_from_slice(raw);
        Ok(Self { bytes })
    }

    pub fn from_hex(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.len() != KEY_LEN * 2 {
            return Err(RecallError::InvalidKeyHex(format!(
                "expected {} hex characters, got {}",
                KEY_LEN * 2,
                text.len()
            )));
        }
        let raw = Zeroizing::new(
            hex::decode(text).map_err(|e| RecallError::InvalidKeyHex(e.to_string()))?,
        );
        Self::from_bytes(&raw)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes[..])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..]
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let text = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";
        let key = KeyMaterial::from_hex(text).unwrap();
        assert_eq!(key.to_hex(), text);
        assert_eq!(key.as_bytes()[1], 0x11);
    }

    #[test]
    fn rejects_wrong_length_and_bad_digits() {
        assert!(matches!(
            KeyMaterial::from_hex("abcd"),
            Err(RecallError::InvalidKeyHex(_))
        ));
        let bad = "zz".repeat(32);
        assert!(matches!(
            KeyMaterial::from_hex(&bad),
            Err(RecallError::InvalidKeyHex(_))
        ));
    }

    #[test]
    fn debug_does_not_leak() {
        let key = KeyMaterial::from_bytes(&[7u8; 32]).unwrap();
        assert_eq!(format!("{key:?}"), "KeyMaterial(..)");
    }
}
