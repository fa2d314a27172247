//! MIME tree walking: body text extraction and attachment discovery.
//!
//! Both walks are pure folds over the [`MimePart`] tree. Nodes are visited
//! depth-first in document order, so multiple `text/plain` (or `text/html`)
//! parts concatenate in the order they appear in the message.

use base64::alphabet;
use base64::engine::general_purpose::GeneralPurposeConfig;
use base64::engine::{DecodePaddingMode, GeneralPurpose};
use base64::Engine;

use crate::models::{AttachmentRef, DecodedContent, MimePart};

/// URL-safe base64 that tolerates both padded and unpadded input, as
/// mailbox APIs emit either.
pub const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decodes base64url body data. Returns `None` on malformed input.
pub fn decode_body_data(data: &str) -> Option<Vec<u8>> {
    let compact: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    URL_SAFE_LENIENT.decode(compact.as_bytes()).ok()
}

/// Encodes bytes the way [`decode_body_data`] expects them.
pub fn encode_body_data(bytes: &[u8]) -> String {
    URL_SAFE_LENIENT.encode(bytes)
}

/// Extracts every `text/plain` and `text/html` body from the tree.
///
/// Each decoded fragment is followed by a newline. Fragments whose data
/// cannot be decoded contribute nothing.
pub fn extract(part: &MimePart) -> DecodedContent {
    let own = match part.mime_type.to_ascii_lowercase().as_str() {
        "text/plain" => DecodedContent {
            plain_text: decode_fragment(part),
            html: String::new(),
        },
        "text/html" => DecodedContent {
            plain_text: String::new(),
            html: decode_fragment(part),
        },
        _ => DecodedContent::default(),
    };

    part.parts
        .iter()
        .fold(own, |acc, child| acc.merge(extract(child)))
}

fn decode_fragment(part: &MimePart) -> String {
    part.body
        .data
        .as_deref()
        .and_then(decode_body_data)
        .map(|bytes| {
            let mut text = String::from_utf8_lossy(&bytes).into_owned();
            text.push('\n');
            text
        })
        .unwrap_or_default()
}

/// Lists every part that carries a filename, in traversal order.
pub fn attachments(part: &MimePart) -> Vec<AttachmentRef> {
    let own = if part.filename.trim().is_empty() {
        Vec::new()
    } else {
        vec![AttachmentRef {
            filename: part.filename.clone(),
            mime_type: part.mime_type.to_ascii_lowercase(),
            size: part.body.size,
            attachment_id: part.body.attachment_id.clone(),
            inline_data: part.body.data.clone(),
        }]
    };

    part.parts.iter().fold(own, |mut acc, child| {
        acc.extend(attachments(child));
        acc
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MimeBody;

    fn leaf(mime_type: &str, text: &str) -> MimePart {
        MimePart {
            mime_type: mime_type.to_string(),
            body: MimeBody {
                data: Some(encode_body_data(text.as_bytes())),
                size: text.len() as u64,
                attachment_id: None,
            },
            ..Default::default()
        }
    }

    fn container(mime_type: &str, parts: Vec<MimePart>) -> MimePart {
        MimePart {
            mime_type: mime_type.to_string(),
            parts,
            ..Default::default()
        }
    }

    #[test]
    fn test_single_plain_part() {
        let content = extract(&leaf("text/plain", "hello"));
        assert_eq!(content.plain_text, "hello\n");
        assert_eq!(content.html, "");
    }

    #[test]
    fn test_nested_alternative_keeps_traversal_order() {
        let tree = container(
            "multipart/mixed",
            vec![
                container(
                    "multipart/alternative",
                    vec![leaf("text/plain", "first"), leaf("text/html", "<p>first</p>")],
                ),
                leaf("text/plain", "second"),
                leaf("text/html", "<p>second</p>"),
            ],
        );
        let content = extract(&tree);
        assert_eq!(content.plain_text, "first\nsecond\n");
        assert_eq!(content.html, "<p>first</p>\n<p>second</p>\n");
    }

    #[test]
    fn test_undecodable_fragment_is_skipped() {
        let mut broken = leaf("text/plain", "");
        broken.body.data = Some("!!not base64!!".to_string());
        let tree = container("multipart/mixed", vec![broken, leaf("text/plain", "ok")]);
        assert_eq!(extract(&tree).plain_text, "ok\n");
    }

    #[test]
    fn test_mime_type_case_insensitive() {
        let content = extract(&leaf("TEXT/HTML", "<b>x</b>"));
        assert_eq!(content.html, "<b>x</b>\n");
    }

    #[test]
    fn test_padded_and_unpadded_decode() {
        assert_eq!(decode_body_data("aGk=").unwrap(), b"hi");
        assert_eq!(decode_body_data("aGk").unwrap(), b"hi");
        assert_eq!(decode_body_data("_-8").unwrap(), vec![0xff, 0xef]);
    }

    #[test]
    fn test_attachments_in_traversal_order() {
        let mut pdf = leaf("application/pdf", "%PDF-1.4");
        pdf.filename = "po.pdf".to_string();
        let mut remote = MimePart {
            mime_type: "application/octet-stream".to_string(),
            filename: "scan.bin".to_string(),
            ..Default::default()
        };
        remote.body.attachment_id = Some("att-1".to_string());
        let tree = container(
            "multipart/mixed",
            vec![leaf("text/plain", "see attached"), container("multipart/mixed", vec![pdf]), remote],
        );

        let found = attachments(&tree);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].filename, "po.pdf");
        assert!(found[0].inline_data.is_some());
        assert_eq!(found[1].attachment_id.as_deref(), Some("att-1"));
    }
}
