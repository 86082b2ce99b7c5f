//! Binary/text conversion and base64/base16 codecs.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;

use super::Module;
use crate::runtime::error::{RuntimeError, TypeError};

const fn engine(alphabet: &alphabet::Alphabet, pad: bool) -> GeneralPurpose {
    GeneralPurpose::new(
        alphabet,
        GeneralPurposeConfig::new()
            .with_encode_padding(pad)
            .with_decode_padding_mode(DecodePaddingMode::Indifferent),
    )
}

const STANDARD_PAD: GeneralPurpose = engine(&alphabet::STANDARD, true);
const STANDARD_NO_PAD: GeneralPurpose = engine(&alphabet::STANDARD, false);
const URL_SAFE_PAD: GeneralPurpose = engine(&alphabet::URL_SAFE, true);
const URL_SAFE_NO_PAD: GeneralPurpose = engine(&alphabet::URL_SAFE, false);

fn standard(padding: bool) -> &'static GeneralPurpose {
    if padding {
        &STANDARD_PAD
    } else {
        &STANDARD_NO_PAD
    }
}

fn url_safe(padding: bool) -> &'static GeneralPurpose {
    if padding {
        &URL_SAFE_PAD
    } else {
        &URL_SAFE_NO_PAD
    }
}

impl Module {
    /// Interpret raw bytes as UTF-8 text.
    pub fn binary_to_string(&self, data: &[u8]) -> Result<String, TypeError> {
        String::from_utf8(data.to_vec())
            .map_err(|e| TypeError::new(format!("binary data is not valid UTF-8: {e}")))
    }

    /// Raw bytes of a string.
    pub fn string_to_binary(&self, s: &str) -> Vec<u8> {
        s.as_bytes().to_vec()
    }

    pub fn base64_encode(&self, input: impl AsRef<[u8]>, padding: bool) -> String {
        standard(padding).encode(input)
    }

    /// Decode standard base64. Padding is optional on input.
    pub fn base64_decode(&self, input: &str, padding: bool) -> Result<Vec<u8>, RuntimeError> {
        standard(padding)
            .decode(input)
            .map_err(|e| RuntimeError::invalid_argument(format!("failed to decode base64: {e}")))
    }

    pub fn base64_url_encode(&self, input: impl AsRef<[u8]>, padding: bool) -> String {
        url_safe(padding).encode(input)
    }

    /// Decode URL-safe base64. Padding is optional on input.
    pub fn base64_url_decode(&self, input: &str, padding: bool) -> Result<Vec<u8>, RuntimeError> {
        url_safe(padding).decode(input).map_err(|e| {
            RuntimeError::invalid_argument(format!("failed to decode base64 url: {e}"))
        })
    }

    /// Lowercase hex.
    pub fn base16_encode(&self, input: impl AsRef<[u8]>) -> String {
        hex::encode(input)
    }

    pub fn base16_decode(&self, input: &str) -> Result<Vec<u8>, RuntimeError> {
        hex::decode(input)
            .map_err(|e| RuntimeError::invalid_argument(format!("failed to decode base16: {e}")))
    }
}
