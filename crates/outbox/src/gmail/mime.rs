//! RFC 5322 / MIME message construction
//!
//! Messages always carry a `multipart/alternative` body with a plain-text
//! rendition followed by the HTML. With attachments that body is nested
//! inside a `multipart/mixed` envelope.

use anyhow::{Context, Result};
use base64::prelude::*;
use regex::Regex;
use std::sync::LazyLock;

use crate::models::{Attachment, OutgoingEmail};

const CRLF: &str = "\r\n";

/// Base64 line length inside attachment parts
const BASE64_LINE_LEN: usize = 76;

/// Longest input chunk per RFC 2047 encoded word (60 base64 chars)
const ENCODED_WORD_CHUNK: usize = 45;

static STYLE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style[^>]*>.*?</style>").expect("valid regex"));
static SCRIPT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script[^>]*>.*?</script>").expect("valid regex"));
static LINE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").expect("valid regex"));
static PARAGRAPH_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</p>").expect("valid regex"));
static ANY_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));
static BLANK_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// An attachment loaded from disk, ready to be encoded
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentPart {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

impl AttachmentPart {
    /// Read an attachment, deriving its content type from the filename
    pub fn load(attachment: &Attachment) -> Result<Self> {
        let data = std::fs::read(&attachment.path)
            .with_context(|| format!("Failed to read attachment {:?}", attachment.path))?;

        Ok(Self::new(&attachment.filename, data))
    }

    pub fn new(filename: &str, data: Vec<u8>) -> Self {
        let content_type = mime_guess::from_path(filename)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        Self {
            filename: filename.to_string(),
            content_type,
            data,
        }
    }
}

/// Generate a globally unique Message-ID for `domain`
pub fn generate_message_id(domain: &str) -> String {
    format!("<{}@{}>", uuid::Uuid::new_v4(), domain)
}

/// Strip angle brackets from a Message-ID, as Gmail search expects
pub fn bare_message_id(message_id: &str) -> String {
    message_id.replace(['<', '>'], "")
}

/// Encode a complete message for the Gmail `raw` field
pub fn encode_raw(message: &str) -> String {
    BASE64_URL_SAFE_NO_PAD.encode(message.as_bytes())
}

/// Plain-text rendition of an HTML body
pub fn html_to_text(html: &str) -> String {
    let text = STYLE_BLOCK.replace_all(html, "");
    let text = SCRIPT_BLOCK.replace_all(&text, "");
    let text = LINE_BREAK.replace_all(&text, "\n");
    let text = PARAGRAPH_END.replace_all(&text, "\n\n");
    let text = ANY_TAG.replace_all(&text, "");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">");

    BLANK_RUN.replace_all(&text, "\n\n").trim().to_string()
}

/// Build the full RFC 5322 message for `email`
pub fn build_mime_message(email: &OutgoingEmail, attachments: &[AttachmentPart]) -> String {
    let alternative_boundary = new_boundary("Alt");

    let mut headers = vec![
        format!("From: {}", header_value(&email.from_email)),
        format!("To: {}", header_value(&email.to.join(", "))),
    ];

    if !email.cc.is_empty() {
        headers.push(format!("Cc: {}", header_value(&email.cc.join(", "))));
    }

    headers.push(format!("Subject: {}", encode_header_word(&email.subject)));
    headers.push(format!("Message-ID: {}", header_value(&email.message_id)));

    if let Some(in_reply_to) = &email.in_reply_to {
        let in_reply_to = header_value(in_reply_to);
        headers.push(format!("In-Reply-To: {}", in_reply_to));
        headers.push(format!("References: {}", in_reply_to));
    }

    headers.push("MIME-Version: 1.0".to_string());

    let alternative = alternative_body(&email.html_body, &alternative_boundary);

    let body = if attachments.is_empty() {
        headers.push(format!(
            "Content-Type: multipart/alternative; boundary=\"{}\"",
            alternative_boundary
        ));
        alternative
    } else {
        let mixed_boundary = new_boundary("Part");
        headers.push(format!(
            "Content-Type: multipart/mixed; boundary=\"{}\"",
            mixed_boundary
        ));

        let mut parts = vec![
            format!("--{}", mixed_boundary),
            format!(
                "Content-Type: multipart/alternative; boundary=\"{}\"",
                alternative_boundary
            ),
            String::new(),
            alternative,
        ];

        for attachment in attachments {
            parts.push(format!("--{}", mixed_boundary));
            parts.push(attachment_part(attachment));
        }

        parts.push(format!("--{}--", mixed_boundary));
        parts.join(CRLF)
    };

    format!("{}{CRLF}{CRLF}{}", headers.join(CRLF), body)
}

fn new_boundary(kind: &str) -> String {
    format!("----=_{}_{}", kind, uuid::Uuid::new_v4().simple())
}

fn alternative_body(html: &str, boundary: &str) -> String {
    [
        format!("--{}", boundary),
        "Content-Type: text/plain; charset=UTF-8".to_string(),
        "Content-Transfer-Encoding: 8bit".to_string(),
        String::new(),
        html_to_text(html),
        format!("--{}", boundary),
        "Content-Type: text/html; charset=UTF-8".to_string(),
        "Content-Transfer-Encoding: 8bit".to_string(),
        String::new(),
        html.to_string(),
        format!("--{}--", boundary),
    ]
    .join(CRLF)
}

fn attachment_part(attachment: &AttachmentPart) -> String {
    let filename = header_value(&attachment.filename.replace('"', "'"));
    let (name_param, filename_param) = if filename.is_ascii() {
        (
            format!("name=\"{}\"", filename),
            format!("filename=\"{}\"", filename),
        )
    } else {
        // RFC 2231 extended parameters; encoded-words are not allowed here
        let pct = urlencoding::encode(&filename);
        (
            format!("name*=UTF-8''{}", pct),
            format!("filename*=UTF-8''{}", pct),
        )
    };
    let encoded = BASE64_STANDARD.encode(&attachment.data);

    let lines: Vec<&str> = encoded
        .as_bytes()
        .chunks(BASE64_LINE_LEN)
        .map(|chunk| std::str::from_utf8(chunk).unwrap_or_default())
        .collect();

    [
        format!("Content-Type: {}; {}", attachment.content_type, name_param),
        format!("Content-Disposition: attachment; {}", filename_param),
        "Content-Transfer-Encoding: base64".to_string(),
        String::new(),
        lines.join(CRLF),
    ]
    .join(CRLF)
}

/// Remove line breaks so a value cannot inject extra headers
fn header_value(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

/// RFC 2047 encode a header value when it is not plain ASCII
fn encode_header_word(value: &str) -> String {
    let value = header_value(value);
    if value.is_ascii() {
        return value;
    }

    let mut words = Vec::new();
    let mut chunk = String::new();

    for c in value.chars() {
        if chunk.len() + c.len_utf8() > ENCODED_WORD_CHUNK {
            words.push(std::mem::take(&mut chunk));
        }
        chunk.push(c);
    }
    if !chunk.is_empty() {
        words.push(chunk);
    }

    words
        .iter()
        .map(|word| format!("=?UTF-8?B?{}?=", BASE64_STANDARD.encode(word.as_bytes())))
        .collect::<Vec<_>>()
        .join("\r\n ")
}
