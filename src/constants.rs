//! Application-wide constants for tuning and configuration

/// Gmail's mailbox holding every message regardless of label.
pub const ALL_MAIL_MAILBOX: &str = "[Gmail]/All Mail";

/// Gmail's trash mailbox.
pub const TRASH_MAILBOX: &str = "[Gmail]/Trash";

/// Mailbox that restored messages are copied back into.
pub const RESTORE_MAILBOX: &str = "INBOX";

/// Maximum number of messages returned by a search.
pub const SEARCH_LIMIT: usize = 50;

/// Capacity of the parsed summary cache in the view refresher.
pub const SUMMARY_CACHE_CAPACITY: u64 = 2_000;

/// Buffer size for mutation result and navigation channels.
pub const CHANNEL_CAPACITY: usize = 32;

/// Maximum connections in the storage pool.
/// WAL allows many readers but a single writer.
pub const DB_MAX_CONNECTIONS: u32 = 4;

/// Gmail system labels as reported in `X-GM-LABELS` (marker stripped),
/// paired with the mailbox each one is listed as.
pub const SYSTEM_LABELS: &[(&str, &str)] = &[
    ("Inbox", "INBOX"),
    ("Starred", "[Gmail]/Starred"),
    ("Important", "[Gmail]/Important"),
    ("Sent", "[Gmail]/Sent Mail"),
    ("Draft", "[Gmail]/Drafts"),
    ("Trash", TRASH_MAILBOX),
    ("Spam", "[Gmail]/Spam"),
];
