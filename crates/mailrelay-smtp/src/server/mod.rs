//! Inbound SMTP for local submitters
//!
//! Accepts HELO/EHLO, MAIL, RCPT, DATA, RSET, NOOP and QUIT. Each completed
//! DATA hands an [`InboundEnvelope`] to an [`EnvelopeHandler`], whose reply
//! is what the client sees for the final dot.

mod command;
mod response;
mod session;

pub use command::Command;
pub use response::Reply;
pub use session::{Session, SessionLimits, SessionState, Step};

use crate::SmtpResult;
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::sync::watch;
use tracing::{debug, warn};

/// One received mail transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEnvelope {
    pub peer_address: SocketAddr,
    /// Reverse path; empty for the null sender
    pub mail_from: String,
    /// Forward paths in the order they were given
    pub rcpt_to: Vec<String>,
    /// Message data, dot-unstuffed, without the terminating `.`
    pub data: Vec<u8>,
}

/// Consumer of completed transactions
#[async_trait]
pub trait EnvelopeHandler: Send + Sync {
    /// Process an envelope and return the reply for the end of DATA
    async fn handle_envelope(&self, envelope: InboundEnvelope) -> Reply;
}

enum DataOutcome {
    Complete(Vec<u8>),
    TooLarge,
    LineTooLong,
    /// The listener stopped while data was still arriving
    Interrupted,
}

/// Outcome of reading one line under a length cap
enum Line {
    /// The buffer holds the line, terminator included
    Complete,
    /// The line was longer than the cap and has been discarded
    TooLong,
    Eof,
}

/// Run one SMTP session to completion
///
/// Once `shutdown` turns true the session answers `421` and closes the next
/// time it waits for the client. A transaction already handed to `handler`
/// is finished first.
pub async fn serve_connection<S, H>(
    stream: S,
    peer_address: SocketAddr,
    hostname: &str,
    handler: &H,
    mut shutdown: watch::Receiver<bool>,
) -> SmtpResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    H: EnvelopeHandler + ?Sized,
{
    let (read, mut write) = tokio::io::split(stream);
    let mut reader = BufReader::new(read);
    let mut session = Session::new(hostname);

    send_reply(&mut write, &session.greeting()).await?;

    let mut line = Vec::new();
    loop {
        let read = tokio::select! {
            read = read_line_bounded(&mut reader, &mut line, SessionLimits::COMMAND_LINE_MAX_LENGTH) => read?,
            _ = stopped(&mut shutdown) => {
                debug!("Closing idle session with {}", peer_address);
                send_reply(&mut write, &Reply::shutting_down(hostname)).await?;
                break;
            }
        };

        match read {
            Line::Eof => {
                debug!("{} closed the connection", peer_address);
                break;
            }
            Line::TooLong => {
                send_reply(&mut write, &Reply::new(500, "Line too long")).await?;
                continue;
            }
            Line::Complete => {}
        }

        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end_matches(['\r', '\n']);
        if text.is_empty() {
            continue;
        }

        match session.handle_line(text) {
            Step::Reply(reply) => send_reply(&mut write, &reply).await?,
            Step::Quit(reply) => {
                send_reply(&mut write, &reply).await?;
                break;
            }
            Step::Data(reply) => {
                send_reply(&mut write, &reply).await?;

                let outcome =
                    read_data(&mut reader, SessionLimits::MAX_DATA_SIZE, &mut shutdown).await?;
                let reply = match outcome {
                    DataOutcome::Complete(data) => match session.take_envelope(peer_address, data) {
                        Some(envelope) => handler.handle_envelope(envelope).await,
                        None => Reply::new(503, "No transaction in progress"),
                    },
                    DataOutcome::TooLarge => {
                        warn!("{} exceeded the message size limit", peer_address);
                        session.reset();
                        Reply::new(552, "Message size exceeds fixed maximum")
                    }
                    DataOutcome::LineTooLong => {
                        warn!("{} sent an over-long data line", peer_address);
                        session.reset();
                        Reply::new(500, "Line too long")
                    }
                    DataOutcome::Interrupted => {
                        debug!("Abandoning DATA from {} on shutdown", peer_address);
                        send_reply(&mut write, &Reply::shutting_down(hostname)).await?;
                        break;
                    }
                };
                send_reply(&mut write, &reply).await?;
            }
        }
    }

    write.shutdown().await.ok();
    Ok(())
}

/// Resolves once the listener asks sessions to stop; never if it went away
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Read one line of at most `max` bytes into `buf`
///
/// An over-long line is consumed up to its terminator without being kept.
async fn read_line_bounded<R>(reader: &mut R, buf: &mut Vec<u8>, max: usize) -> std::io::Result<Line>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    if (&mut *reader).take(max as u64).read_until(b'\n', buf).await? == 0 {
        return Ok(Line::Eof);
    }
    if buf.ends_with(b"\n") || buf.len() < max {
        return Ok(Line::Complete);
    }

    buf.clear();
    let mut rest = Vec::new();
    loop {
        rest.clear();
        let n = (&mut *reader).take(max as u64).read_until(b'\n', &mut rest).await?;
        if n == 0 || rest.ends_with(b"\n") {
            return Ok(Line::TooLong);
        }
    }
}

/// Read message data up to the `.` line, undoing dot-stuffing
async fn read_data<R>(
    reader: &mut R,
    max_size: usize,
    shutdown: &mut watch::Receiver<bool>,
) -> SmtpResult<DataOutcome>
where
    R: AsyncBufRead + Unpin,
{
    let mut data = Vec::new();
    let mut too_large = false;
    let mut too_long = false;
    let mut line = Vec::new();

    loop {
        let read = tokio::select! {
            read = read_line_bounded(reader, &mut line, SessionLimits::TEXT_LINE_MAX_LENGTH) => read?,
            _ = stopped(shutdown) => return Ok(DataOutcome::Interrupted),
        };

        match read {
            Line::Eof => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed during DATA",
                )
                .into())
            }
            Line::TooLong => {
                too_long = true;
                continue;
            }
            Line::Complete => {}
        }

        if line == b".\r\n" || line == b".\n" {
            break;
        }

        let content = match line.strip_prefix(b".") {
            Some(rest) => rest,
            None => &line[..],
        };

        if data.len() + content.len() > max_size {
            too_large = true;
        }
        if !too_large && !too_long {
            data.extend_from_slice(content);
        }
    }

    Ok(if too_long {
        DataOutcome::LineTooLong
    } else if too_large {
        DataOutcome::TooLarge
    } else {
        DataOutcome::Complete(data)
    })
}

async fn send_reply<W>(write: &mut W, reply: &Reply) -> SmtpResult<()>
where
    W: AsyncWrite + Unpin,
{
    write.write_all(reply.format().as_bytes()).await?;
    write.flush().await?;
    Ok(())
}
