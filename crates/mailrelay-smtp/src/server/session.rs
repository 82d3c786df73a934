//! Per-connection SMTP state

use super::{Command, InboundEnvelope, Reply};
use std::net::SocketAddr;

/// Protocol limits for local submitters
pub struct SessionLimits;

impl SessionLimits {
    /// Command line including CRLF (RFC 5321 4.5.3.1.4)
    pub const COMMAND_LINE_MAX_LENGTH: usize = 512;
    /// Message data line including CRLF (RFC 5321 4.5.3.1.6)
    pub const TEXT_LINE_MAX_LENGTH: usize = 1000;
    /// Reverse or forward path (RFC 5321 4.5.3.1.3)
    pub const PATH_MAX_LENGTH: usize = 256;
    /// Recipients per transaction
    pub const MAX_RECIPIENTS: usize = 100;
    /// Message data after dot-unstuffing
    pub const MAX_DATA_SIZE: usize = 10 * 1024 * 1024;
}

/// Where the session is in the SMTP dialogue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for HELO/EHLO
    Initial,
    /// Greeted, ready for MAIL
    Greeted,
    /// MAIL FROM received, waiting for RCPT
    MailReceived,
    /// At least one RCPT TO received
    RecipientsReceived,
}

/// What the connection loop should do after a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Send the reply and keep reading commands
    Reply(Reply),
    /// Send the 354 reply and switch to reading message data
    Data(Reply),
    /// Send the reply and close the connection
    Quit(Reply),
}

/// State of one inbound SMTP session
#[derive(Debug)]
pub struct Session {
    hostname: String,
    state: SessionState,
    mail_from: Option<String>,
    rcpt_to: Vec<String>,
}

impl Session {
    /// Create a new session announcing `hostname`
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            state: SessionState::Initial,
            mail_from: None,
            rcpt_to: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn greeting(&self) -> Reply {
        Reply::greeting(&self.hostname)
    }

    /// Handle one command line
    pub fn handle_line(&mut self, line: &str) -> Step {
        if line.len() + 2 > SessionLimits::COMMAND_LINE_MAX_LENGTH {
            return Step::Reply(Reply::new(500, "Line too long"));
        }

        match Command::parse(line) {
            Ok(command) => self.handle(command),
            Err(reply) => Step::Reply(reply),
        }
    }

    /// Handle a parsed command
    pub fn handle(&mut self, command: Command) -> Step {
        match command {
            Command::Helo(domain) => {
                self.greet();
                Step::Reply(Reply::helo(&self.hostname, &domain))
            }
            Command::Ehlo(domain) => {
                self.greet();
                Step::Reply(Reply::ehlo(
                    &self.hostname,
                    &domain,
                    SessionLimits::MAX_DATA_SIZE,
                ))
            }
            Command::MailFrom(path) => {
                if self.state != SessionState::Greeted {
                    return Step::Reply(bad_sequence("MAIL requires HELO/EHLO first"));
                }
                if path.len() > SessionLimits::PATH_MAX_LENGTH {
                    return Step::Reply(Reply::new(501, "Path too long"));
                }
                self.mail_from = Some(path);
                self.state = SessionState::MailReceived;
                Step::Reply(Reply::ok())
            }
            Command::RcptTo(path) => {
                if !matches!(
                    self.state,
                    SessionState::MailReceived | SessionState::RecipientsReceived
                ) {
                    return Step::Reply(bad_sequence("RCPT requires MAIL first"));
                }
                if path.len() > SessionLimits::PATH_MAX_LENGTH {
                    return Step::Reply(Reply::new(501, "Path too long"));
                }
                if self.rcpt_to.len() >= SessionLimits::MAX_RECIPIENTS {
                    return Step::Reply(Reply::new(452, "Too many recipients"));
                }
                self.rcpt_to.push(path);
                self.state = SessionState::RecipientsReceived;
                Step::Reply(Reply::ok())
            }
            Command::Data => {
                if self.state != SessionState::RecipientsReceived {
                    return Step::Reply(bad_sequence("DATA requires RCPT first"));
                }
                Step::Data(Reply::data_start())
            }
            Command::Rset => {
                self.reset();
                Step::Reply(Reply::ok())
            }
            Command::Noop => Step::Reply(Reply::ok()),
            Command::Quit => Step::Quit(Reply::quit(&self.hostname)),
        }
    }

    /// Close the current transaction and hand out its envelope
    ///
    /// Returns `None` unless the session has sender and recipients.
    pub fn take_envelope(&mut self, peer_address: SocketAddr, data: Vec<u8>) -> Option<InboundEnvelope> {
        if self.state != SessionState::RecipientsReceived {
            return None;
        }

        let mail_from = self.mail_from.take()?;
        let rcpt_to = std::mem::take(&mut self.rcpt_to);
        self.state = SessionState::Greeted;

        Some(InboundEnvelope {
            peer_address,
            mail_from,
            rcpt_to,
            data,
        })
    }

    /// Drop the transaction, keep the greeting
    pub fn reset(&mut self) {
        self.mail_from = None;
        self.rcpt_to.clear();
        if self.state != SessionState::Initial {
            self.state = SessionState::Greeted;
        }
    }

    fn greet(&mut self) {
        self.mail_from = None;
        self.rcpt_to.clear();
        self.state = SessionState::Greeted;
    }
}

fn bad_sequence(message: &str) -> Reply {
    Reply::new(503, message)
}
