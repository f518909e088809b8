use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct MessageFlags: u32 {
        const SEEN = 0b00000001;
        const ANSWERED = 0b00000010;
        const FLAGGED = 0b00000100;
        const DELETED = 0b00001000;
        const DRAFT = 0b00010000;
    }
}

impl MessageFlags {
    pub fn is_unread(&self) -> bool {
        !self.contains(MessageFlags::SEEN)
    }

    pub fn is_starred(&self) -> bool {
        self.contains(MessageFlags::FLAGGED)
    }

    /// Build flags from IMAP system flag names such as `\Seen`.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        names
            .iter()
            .fold(MessageFlags::empty(), |acc, name| match name.as_ref() {
                n if n.eq_ignore_ascii_case("\\Seen") => acc | MessageFlags::SEEN,
                n if n.eq_ignore_ascii_case("\\Answered") => acc | MessageFlags::ANSWERED,
                n if n.eq_ignore_ascii_case("\\Flagged") => acc | MessageFlags::FLAGGED,
                n if n.eq_ignore_ascii_case("\\Deleted") => acc | MessageFlags::DELETED,
                n if n.eq_ignore_ascii_case("\\Draft") => acc | MessageFlags::DRAFT,
                _ => acc,
            })
    }

    /// IMAP name of a single system flag.
    pub fn imap_name(&self) -> Option<&'static str> {
        match *self {
            MessageFlags::SEEN => Some("\\Seen"),
            MessageFlags::ANSWERED => Some("\\Answered"),
            MessageFlags::FLAGGED => Some("\\Flagged"),
            MessageFlags::DELETED => Some("\\Deleted"),
            MessageFlags::DRAFT => Some("\\Draft"),
            _ => None,
        }
    }
}

/// A message as listed or fetched from a remote mailbox.
///
/// `raw_line` is the vendor attribute reply for this UID, still undecoded;
/// it is `None` when the server returned nothing for the message.
#[derive(Debug, Clone)]
pub struct RemoteMessage {
    pub uid: u32,
    pub raw_line: Option<String>,
    pub flags: MessageFlags,
    pub content: Vec<u8>,
    /// True when `content` holds only the header block.
    pub headers_only: bool,
}

/// Header-derived fields shown in list views.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedHeaders {
    pub subject: String,
    pub from: String,
    pub date: Option<i64>,
    pub preview: Option<String>,
}

/// One row of a threaded page, ready for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSummary {
    pub stable_id: u64,
    pub thread_id: Option<u64>,
    pub uid: Option<u32>,
    pub subject: String,
    pub from: String,
    pub date: Option<i64>,
    pub preview: Option<String>,
    pub unread: bool,
    pub starred: bool,
}

impl MessageSummary {
    pub fn status_icons(&self) -> String {
        let mut icons = String::new();
        icons.push(if self.starred { '*' } else { ' ' });
        icons.push(if self.unread { 'N' } else { ' ' });
        icons
    }

    pub fn display_date(&self, format: &str) -> String {
        self.date
            .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
            .map(|dt| dt.with_timezone(&chrono::Local).format(format).to_string())
            .unwrap_or_default()
    }
}

/// A message to hand to the outbound sender.
#[derive(Debug, Clone)]
pub struct ComposeEmail {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

impl ComposeEmail {
    /// Render RFC 5322 bytes for the given sender.
    pub fn to_raw(&self, from_email: &str, from_name: Option<&str>) -> anyhow::Result<Vec<u8>> {
        let from = mail_builder::headers::address::Address::new_address(
            from_name.map(str::to_string),
            from_email.to_string(),
        );
        let to: Vec<&str> = self.to.iter().map(String::as_str).collect();
        let raw = mail_builder::MessageBuilder::new()
            .from(from)
            .to(to)
            .subject(self.subject.as_str())
            .text_body(self.body.as_str())
            .write_to_vec()?;
        Ok(raw)
    }
}
