//! Gmail vendor attributes (`X-GM-MSGID`, `X-GM-THRID`, `X-GM-LABELS`).
//!
//! The reply to a vendor `UID FETCH` is rebuilt into its textual line form
//! (`12 (UID 12 X-GM-MSGID 2222 ...)`) so that every consumer goes through
//! the same decoder in [`crate::mail::response`].

use std::collections::HashMap;

use anyhow::{Context, Result, bail};
use async_imap::imap_proto::{AttributeValue, Response, Status};

use super::ImapSession;

pub(crate) const VENDOR_ATTRIBUTES: &str = "(UID X-GM-MSGID X-GM-THRID X-GM-LABELS)";

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Render one FETCH reply as a line, keeping only the attributes the
/// decoder understands.
pub(crate) fn render_fetch_line(msg_number: u32, attrs: &[AttributeValue<'_>]) -> String {
    let parts: Vec<String> = attrs
        .iter()
        .filter_map(|attr| match attr {
            AttributeValue::Uid(uid) => Some(format!("UID {}", uid)),
            AttributeValue::GmailMsgId(id) => Some(format!("X-GM-MSGID {}", id)),
            AttributeValue::GmailThrId(id) => Some(format!("X-GM-THRID {}", id)),
            AttributeValue::GmailLabels(labels) => {
                let rendered: Vec<String> = labels.iter().map(|l| quote(l)).collect();
                Some(format!("X-GM-LABELS ({})", rendered.join(" ")))
            }
            _ => None,
        })
        .collect();

    format!("{} ({})", msg_number, parts.join(" "))
}

fn uid_of(attrs: &[AttributeValue<'_>]) -> Option<u32> {
    attrs.iter().find_map(|attr| match attr {
        AttributeValue::Uid(uid) => Some(*uid),
        _ => None,
    })
}

/// Issue the vendor FETCH for `uid_set` and return the reply lines keyed
/// by UID.
pub(crate) async fn fetch_vendor_lines(
    session: &mut ImapSession,
    uid_set: &str,
) -> Result<HashMap<u32, String>> {
    let id = session
        .run_command(format!("UID FETCH {} {}", uid_set, VENDOR_ATTRIBUTES))
        .await
        .context("Failed to send vendor fetch")?;

    let mut lines = HashMap::new();
    loop {
        let Some(response) = session
            .read_response()
            .await
            .context("Failed to read vendor fetch response")?
        else {
            bail!("Connection closed during vendor fetch");
        };

        match response.parsed() {
            Response::Fetch(msg_number, attrs) => match uid_of(attrs) {
                Some(uid) => {
                    lines.insert(uid, render_fetch_line(*msg_number, attrs));
                }
                None => tracing::debug!("Vendor fetch reply {} without UID", msg_number),
            },
            Response::Done {
                tag,
                status,
                information,
                ..
            } if *tag == id => {
                if !matches!(status, Status::Ok) {
                    bail!(
                        "Vendor fetch failed: {:?} {}",
                        status,
                        information.as_deref().unwrap_or_default()
                    );
                }
                break;
            }
            _ => {}
        }
    }

    Ok(lines)
}
