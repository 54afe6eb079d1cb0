//! Text-safe encoding for payloads whose characters the primary tier's
//! serialization would otherwise mangle.
//!
//! URL-safe alphabet (`-`/`_` instead of `+`/`/`), no `=` padding.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

pub fn encode(raw: &str) -> String {
    URL_SAFE_NO_PAD.encode(raw.as_bytes())
}

/// Decode a value produced by [`encode`]. Any failure yields `None`.
pub fn decode(encoded: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(encoded.trim()).ok()?;
    String::from_utf8(bytes).ok()
}
