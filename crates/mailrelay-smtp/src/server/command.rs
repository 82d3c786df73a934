//! Parsing of inbound SMTP command lines

use super::Reply;

/// Commands understood by the inbound listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Helo(String),
    Ehlo(String),
    /// Reverse path; empty for the null sender `<>`
    MailFrom(String),
    RcptTo(String),
    Data,
    Rset,
    Noop,
    Quit,
}

impl Command {
    /// Parse one command line (without its line terminator)
    pub fn parse(line: &str) -> Result<Self, Reply> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(' ') {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };

        match verb.to_ascii_uppercase().as_str() {
            "HELO" => Ok(Command::Helo(domain_argument("HELO", rest)?)),
            "EHLO" => Ok(Command::Ehlo(domain_argument("EHLO", rest)?)),
            "MAIL" => {
                let path = path_argument(rest, "FROM:")
                    .ok_or_else(|| Reply::new(501, "Syntax: MAIL FROM:<address>"))?;
                Ok(Command::MailFrom(path))
            }
            "RCPT" => {
                let path = path_argument(rest, "TO:")
                    .ok_or_else(|| Reply::new(501, "Syntax: RCPT TO:<address>"))?;
                if path.is_empty() {
                    return Err(Reply::new(501, "Recipient address cannot be empty"));
                }
                Ok(Command::RcptTo(path))
            }
            "DATA" => no_argument("DATA", rest, Command::Data),
            "RSET" => no_argument("RSET", rest, Command::Rset),
            "NOOP" => Ok(Command::Noop),
            "QUIT" => Ok(Command::Quit),
            _ => Err(Reply::new(500, "Command not recognized")),
        }
    }
}

fn domain_argument(verb: &str, rest: &str) -> Result<String, Reply> {
    match rest.split_whitespace().next() {
        Some(domain) => Ok(domain.to_string()),
        None => Err(Reply::new(501, format!("{} requires domain argument", verb))),
    }
}

fn no_argument(verb: &str, rest: &str, command: Command) -> Result<Command, Reply> {
    if rest.is_empty() {
        Ok(command)
    } else {
        Err(Reply::new(501, format!("{} takes no arguments", verb)))
    }
}

/// Extract the address from `FROM:<addr> [params]` / `TO:<addr> [params]`
fn path_argument(rest: &str, keyword: &str) -> Option<String> {
    if !rest.get(..keyword.len())?.eq_ignore_ascii_case(keyword) {
        return None;
    }

    let path = rest[keyword.len()..].trim_start();
    let path = path.strip_prefix('<')?;
    let end = path.find('>')?;
    Some(path[..end].trim().to_string())
}
