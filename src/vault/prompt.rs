//! Interactive credential entry

use std::io::{self, BufRead, Write};

/// Source of user-typed credentials
pub trait CredentialPrompt: Send + Sync {
    fn read_line(&self, label: &str) -> io::Result<String>;
    /// Read without echo
    fn read_secret(&self, label: &str) -> io::Result<String>;
}

/// Reads from the controlling terminal
pub struct TerminalPrompt;

impl CredentialPrompt for TerminalPrompt {
    fn read_line(&self, label: &str) -> io::Result<String> {
        let mut stdout = io::stdout();
        write!(stdout, "{}", label)?;
        stdout.flush()?;

        let mut line = String::new();
        let read = io::stdin().lock().read_line(&mut line)?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "standard input closed",
            ));
        }
        Ok(trim_line_ending(&line).to_string())
    }

    fn read_secret(&self, label: &str) -> io::Result<String> {
        rpassword::prompt_password(label)
    }
}

fn trim_line_ending(line: &str) -> &str {
    line.trim_end_matches(['\n', '\r'])
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_line_ending() {
        assert_eq!(trim_line_ending("alice\n"), "alice");
        assert_eq!(trim_line_ending("alice\r\n"), "alice");
        assert_eq!(trim_line_ending(" alice "), " alice ");
    }
}
