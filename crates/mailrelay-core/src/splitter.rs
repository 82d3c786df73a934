//! Splitting of batched notifications
//!
//! Monitoring tools often concatenate several alerts into one message,
//! separated by a fixed marker. Each significant fragment becomes a message
//! of its own carrying the subject of the batch.

use crate::{CoreError, CoreResult};

/// Marker between notifications in a batched message
pub const NOTIFICATION_DELIMITER: &[u8] = b"END OF NOTIFICATION";

/// Fragments whose trimmed length does not exceed this are dropped
pub const SIGNIFICANT_FRAGMENT_LEN: usize = 10;

/// One notification cut out of a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubMessage {
    pub subject: String,
    /// Raw fragment bytes, untrimmed
    pub body: Vec<u8>,
}

/// Lazy sequence of the significant fragments, in document order
///
/// Yields at most one item more than the number of delimiters.
#[derive(Debug)]
pub struct SubMessages<'a> {
    subject: String,
    rest: Option<&'a [u8]>,
}

impl Iterator for SubMessages<'_> {
    type Item = SubMessage;

    fn next(&mut self) -> Option<SubMessage> {
        loop {
            let rest = self.rest?;
            let (fragment, next) = match find(rest, NOTIFICATION_DELIMITER) {
                Some(at) => (&rest[..at], Some(&rest[at + NOTIFICATION_DELIMITER.len()..])),
                None => (rest, None),
            };
            self.rest = next;

            if is_significant(fragment) {
                return Some(SubMessage {
                    subject: self.subject.clone(),
                    body: fragment.to_vec(),
                });
            }
        }
    }
}

/// Split raw message data into sub-messages
///
/// The whole data is split, headers included. Fails if the data carries
/// no `Subject:` line.
pub fn split(raw: &[u8]) -> CoreResult<SubMessages<'_>> {
    let subject = extract_subject(raw)?;
    Ok(SubMessages {
        subject,
        rest: Some(raw),
    })
}

/// Value of the first `Subject:` line, trimmed
pub fn extract_subject(raw: &[u8]) -> CoreResult<String> {
    const PREFIX: &[u8] = b"subject:";

    raw.split(|&b| b == b'\n')
        .find(|line| {
            line.len() >= PREFIX.len() && line[..PREFIX.len()].eq_ignore_ascii_case(PREFIX)
        })
        .map(|line| {
            String::from_utf8_lossy(&line[PREFIX.len()..])
                .trim()
                .to_string()
        })
        .ok_or_else(|| CoreError::MalformedMessage("no Subject header".to_string()))
}

fn is_significant(fragment: &[u8]) -> bool {
    fragment.trim_ascii().len() > SIGNIFICANT_FRAGMENT_LEN
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
