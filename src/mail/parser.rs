use mail_parser::{MessageParser, MimeHeaders, PartType};

use super::types::ParsedHeaders;

/// Preview length in characters for list rows.
const PREVIEW_LEN: usize = 100;

/// Extract list-view fields from cached content, which may be a full
/// message or a bare header block.
pub fn parse_headers(raw: &[u8]) -> Option<ParsedHeaders> {
    let message = MessageParser::default().parse(raw)?;

    let from = message
        .from()
        .and_then(|addrs| addrs.first())
        .map(|addr| {
            addr.name()
                .or_else(|| addr.address())
                .unwrap_or_default()
                .to_string()
        })
        .unwrap_or_default();

    // Collapse folded whitespace in subjects
    let subject = message
        .subject()
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
        .unwrap_or_default();

    let date = message.date().map(|d| d.to_timestamp());

    Some(ParsedHeaders {
        subject,
        from,
        date,
        preview: extract_preview(&message, PREVIEW_LEN),
    })
}

fn extract_text_body(message: &mail_parser::Message) -> Option<String> {
    for part in message.text_bodies() {
        if let PartType::Text(text) = &part.body {
            return Some(text.to_string());
        }
    }

    for part in message.parts.iter() {
        if let PartType::Text(text) = &part.body {
            let content_type = part.content_type();
            if content_type
                .map(|ct| ct.subtype() == Some("plain"))
                .unwrap_or(true)
            {
                return Some(text.to_string());
            }
        }
    }

    // HTML-only messages
    for part in message.html_bodies() {
        if let PartType::Html(html) = &part.body {
            return Some(html2text::from_read(html.as_bytes(), 200).unwrap_or_default());
        }
    }

    None
}

fn extract_preview(message: &mail_parser::Message, max_len: usize) -> Option<String> {
    let text = extract_text_body(message)?;

    let preview: String = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .filter(|c| !c.is_control())
        .take(max_len)
        .collect();

    let preview = preview.trim().to_string();

    if preview.is_empty() {
        None
    } else {
        Some(preview)
    }
}
