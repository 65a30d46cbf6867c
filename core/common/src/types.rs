//! Common types used throughout Strongbox.

use std::fmt;
use zeroize::Zeroize;

/// Plaintext or password bytes, wiped when dropped. `Debug` shows only the length.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SensitiveBytes(Vec<u8>);

impl SensitiveBytes {
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for SensitiveBytes {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

impl fmt::Debug for SensitiveBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SensitiveBytes(<{} bytes>)", self.0.len())
    }
}

/// Serde adapter that encodes byte vectors as standard base64 strings.
///
/// Use with `#[serde(with = "strongbox_common::base64_bytes")]`.
pub mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }

    /// Optional variant for `Option<Vec<u8>>` fields.
    pub mod option {
        use super::STANDARD;
        use base64::Engine as _;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(
            bytes: &Option<Vec<u8>>,
            serializer: S,
        ) -> std::result::Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match bytes {
                Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(
            deserializer: D,
        ) -> std::result::Result<Option<Vec<u8>>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let encoded: Option<String> = Option::deserialize(deserializer)?;
            encoded
                .map(|s| STANDARD.decode(s.as_bytes()))
                .transpose()
                .map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Blob {
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
        #[serde(with = "base64_bytes::option", default)]
        extra: Option<Vec<u8>>,
    }

    #[test]
    fn test_sensitive_bytes_debug_redacts() {
        let secret = SensitiveBytes::new(b"hunter2".to_vec());
        let rendered = format!("{:?}", secret);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("7 bytes"));
    }

    #[test]
    fn test_base64_field_encoding() {
        let blob = Blob {
            data: vec![0xde, 0xad, 0xbe, 0xef],
            extra: None,
        };
        let json = serde_json::to_string(&blob).unwrap();
        assert!(json.contains("\"3q2+7w==\""));

        let decoded: Blob = serde_json::from_str(r#"{"data":"3q2+7w==","extra":"AQI="}"#).unwrap();
        assert_eq!(decoded.data, vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(decoded.extra, Some(vec![1, 2]));
    }

    #[test]
    fn test_base64_rejects_garbage() {
        let result: std::result::Result<Blob, _> = serde_json::from_str(r#"{"data":"@@@"}"#);
        assert!(result.is_err());
    }
}
