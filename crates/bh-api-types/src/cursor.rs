//! Opaque pagination cursors: URL-safe base64 over `sort_key|id`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// Encode `(last_sort_key, last_id)` into an opaque cursor.
pub fn encode(sort_key: &str, id: &str) -> String {
    URL_SAFE_NO_PAD.encode(format!("{sort_key}|{id}"))
}

/// Decode a cursor back into `(sort_key, id)`. Returns `None` for anything
/// not produced by [`encode`].
pub fn decode(cursor: &str) -> Option<(String, String)> {
    let raw = URL_SAFE_NO_PAD.decode(cursor).ok()?;
    let text = String::from_utf8(raw).ok()?;
    let (sort_key, id) = text.split_once('|')?;
    Some((sort_key.to_string(), id.to_string()))
}

/// Single-key convenience used where the sort key is the id itself.
pub fn encode_key(key: &str) -> String {
    encode(key, key)
}

pub fn decode_key(cursor: &str) -> Option<String> {
    decode(cursor).map(|(sort_key, _)| sort_key)
}
