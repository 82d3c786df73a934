//! SMTP replies sent to local submitters

/// A reply line (or multiline block) sent to a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Three-digit reply code
    pub code: u16,
    /// Text of the reply; more than one entry produces a multiline reply
    pub lines: Vec<String>,
}

impl Reply {
    /// Create a single-line reply
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            lines: vec![message.into()],
        }
    }

    pub fn ok() -> Self {
        Self::new(250, "OK")
    }

    pub fn greeting(hostname: &str) -> Self {
        Self::new(220, format!("{} ESMTP mailrelay", hostname))
    }

    pub fn helo(hostname: &str, client_domain: &str) -> Self {
        Self::new(250, format!("{} Hello {}", hostname, client_domain))
    }

    /// EHLO reply with the extensions this relay supports
    pub fn ehlo(hostname: &str, client_domain: &str, max_size: usize) -> Self {
        Self {
            code: 250,
            lines: vec![
                format!("{} Hello {}", hostname, client_domain),
                "PIPELINING".to_string(),
                "8BITMIME".to_string(),
                format!("SIZE {}", max_size),
            ],
        }
    }

    pub fn data_start() -> Self {
        Self::new(354, "End data with <CR><LF>.<CR><LF>")
    }

    pub fn quit(hostname: &str) -> Self {
        Self::new(221, format!("{} closing connection", hostname))
    }

    /// Sent to idle sessions when the listener stops
    pub fn shutting_down(hostname: &str) -> Self {
        Self::new(
            421,
            format!("{} Service not available, closing transmission channel", hostname),
        )
    }

    /// Format the reply for the wire
    pub fn format(&self) -> String {
        let last = self.lines.len().saturating_sub(1);
        let mut out = String::new();
        for (i, line) in self.lines.iter().enumerate() {
            let sep = if i == last { ' ' } else { '-' };
            out.push_str(&format!("{}{}{}\r\n", self.code, sep, line));
        }
        out
    }

    /// Check if this is a success reply (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }
}
