// Reply rendering
//
// Turns a relay reply into exactly one displayable thing: decoded image
// bytes, verbatim text, or an error for anything unusable.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::relay::envelope::RelayReply;

/// Notice shown when the relay served a substitute instead of a genuine
/// model output.
pub const SUBSTITUTE_NOTICE: &str = "quota/key exhausted, using substitute image";

/// A successfully rendered result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    Image {
        bytes: Vec<u8>,
        mime: String,
        /// Present when the relay flagged the result as a substitute.
        substitute: Option<String>,
    },
    Text(String),
}

/// Render a successful reply. Fails when the reply claims success but
/// carries no usable image or text.
pub fn render_reply(reply: &RelayReply) -> Result<Rendered, String> {
    match reply.kind.as_deref() {
        Some("image") => {
            let data = reply
                .data
                .as_deref()
                .ok_or_else(|| "image reply without data".to_string())?;
            let bytes = BASE64
                .decode(data)
                .map_err(|e| format!("undecodable image data: {}", e))?;
            let substitute = reply.mock_used.then(|| {
                reply
                    .reason
                    .clone()
                    .map(|r| format!("{} ({})", SUBSTITUTE_NOTICE, r))
                    .unwrap_or_else(|| SUBSTITUTE_NOTICE.to_string())
            });
            Ok(Rendered::Image {
                bytes,
                mime: reply
                    .mime
                    .clone()
                    .unwrap_or_else(|| "image/png".to_string()),
                substitute,
            })
        }
        Some("text") => Ok(Rendered::Text(reply.text.clone().unwrap_or_default())),
        _ => Err("no usable result from relay".to_string()),
    }
}
