//! Response authentication
//!
//! With MAC enabled the client holds a key pair from the key-exchange
//! endpoint. The wrapped key goes back to the server with every downloads
//! request; the client key signs responses with HMAC-SHA1. Keys and MACs
//! use web-safe base64 (`-_` for `+/`, and `,` for `=` padding).

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use gsb_core::storage::{retry_once, Storage};

use crate::error::UpdateError;

type HmacSha1 = Hmac<Sha1>;

/// Config key for the client key.
pub const CLIENT_KEY: &str = "ClientMAC";

/// Config key for the wrapped key.
pub const WRAPPED_KEY: &str = "WrappedMAC";

const WEBSAFE_DECODER: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decode web-safe base64. Standard alphabet input is accepted too.
pub fn decode_websafe(text: &str) -> Result<Vec<u8>, UpdateError> {
    let normalized: String = text
        .trim()
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            ',' => '=',
            c => c,
        })
        .collect();
    WEBSAFE_DECODER
        .decode(normalized)
        .map_err(|e| UpdateError::authentication(format!("invalid base64: {e}")))
}

/// Encode as web-safe base64 with `=` padding.
pub fn encode_websafe(bytes: &[u8]) -> String {
    base64::engine::general_purpose::URL_SAFE.encode(bytes)
}

/// HMAC-SHA1 of `data`, web-safe encoded.
pub fn sign(key: &[u8], data: &[u8]) -> Result<String, UpdateError> {
    let mut mac = HmacSha1::new_from_slice(key).map_err(|e| UpdateError::authentication(e.to_string()))?;
    mac.update(data);
    Ok(encode_websafe(&mac.finalize().into_bytes()))
}

/// Check a web-safe encoded HMAC-SHA1 of `data`.
pub fn verify(key: &[u8], data: &[u8], expected: &str) -> Result<(), UpdateError> {
    let expected = decode_websafe(expected)?;
    let mut mac = HmacSha1::new_from_slice(key).map_err(|e| UpdateError::authentication(e.to_string()))?;
    mac.update(data);
    mac.verify_slice(&expected)
        .map_err(|_| UpdateError::authentication("MAC mismatch"))
}

/// A client/wrapped key pair, kept in web-safe base64 as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacKeys {
    pub client_key: String,
    pub wrapped_key: String,
}

impl MacKeys {
    /// Load stored keys. Empty values count as absent.
    pub fn load(storage: &dyn Storage) -> Result<Option<Self>, UpdateError> {
        let client_key = retry_once("config read", || storage.get_config(CLIENT_KEY))?;
        let wrapped_key = retry_once("config read", || storage.get_config(WRAPPED_KEY))?;
        match (client_key, wrapped_key) {
            (Some(client_key), Some(wrapped_key)) if !client_key.is_empty() && !wrapped_key.is_empty() => {
                Ok(Some(Self { client_key, wrapped_key }))
            }
            _ => Ok(None),
        }
    }

    pub fn save(&self, storage: &dyn Storage) -> Result<(), UpdateError> {
        retry_once("config write", || storage.set_config(CLIENT_KEY, &self.client_key))?;
        retry_once("config write", || storage.set_config(WRAPPED_KEY, &self.wrapped_key))?;
        Ok(())
    }

    /// Forget stored keys.
    pub fn clear(storage: &dyn Storage) -> Result<(), UpdateError> {
        retry_once("config write", || storage.set_config(CLIENT_KEY, ""))?;
        retry_once("config write", || storage.set_config(WRAPPED_KEY, ""))?;
        Ok(())
    }

    pub fn client_key_bytes(&self) -> Result<Vec<u8>, UpdateError> {
        decode_websafe(&self.client_key)
    }

    /// Check `mac` against `data` using the client key.
    pub fn verify(&self, data: &[u8], mac: &str) -> Result<(), UpdateError> {
        verify(&self.client_key_bytes()?, data, mac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gsb_core::MemoryStore;

    #[test]
    fn test_sign_and_verify() {
        let key = b"secret-client-key";
        let mac = sign(key, b"n:1800\ni:list\n").unwrap();
        assert!(verify(key, b"n:1800\ni:list\n", &mac).is_ok());

        let err = verify(key, b"n:1801\ni:list\n", &mac).unwrap_err();
        assert!(err.is_authentication());
        assert!(verify(b"other-key", b"n:1800\ni:list\n", &mac).is_err());
    }

    #[test]
    fn test_known_hmac_sha1() {
        // RFC 2202 test case 2
        let mac = sign(b"Jefe", b"what do ya want for nothing?").unwrap();
        let raw = decode_websafe(&mac).unwrap();
        assert_eq!(raw[..4], [0xef, 0xfc, 0xdf, 0x6a]);
    }

    #[test]
    fn test_decode_websafe_variants() {
        // 0xfb 0xff encodes to "-_8=" web-safe, "+/8=" standard
        assert_eq!(decode_websafe("-_8=").unwrap(), vec![0xfb, 0xff]);
        assert_eq!(decode_websafe("-_8,").unwrap(), vec![0xfb, 0xff]);
        assert_eq!(decode_websafe("+/8=").unwrap(), vec![0xfb, 0xff]);
        assert_eq!(decode_websafe("-_8").unwrap(), vec![0xfb, 0xff]);
        assert!(decode_websafe("!!").is_err());
        assert_eq!(encode_websafe(&[0xfb, 0xff]), "-_8=");
    }

    #[test]
    fn test_key_storage() {
        let store = MemoryStore::new();
        assert_eq!(MacKeys::load(&store).unwrap(), None);

        let keys = MacKeys {
            client_key: encode_websafe(b"client"),
            wrapped_key: "AKEgNis".to_string(),
        };
        keys.save(&store).unwrap();
        assert_eq!(MacKeys::load(&store).unwrap(), Some(keys.clone()));
        assert_eq!(keys.client_key_bytes().unwrap(), b"client".to_vec());

        MacKeys::clear(&store).unwrap();
        assert_eq!(MacKeys::load(&store).unwrap(), None);
    }
}
