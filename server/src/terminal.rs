//! Terminal input and output shared by the CLIs.

use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::Arc;

use nix::sys::termios::{self, LocalFlags, SetArg};

use crate::ssh::PassphrasePrompt;

/// Read one line from stdin with terminal echo disabled.
///
/// Returns `None` on EOF or read failure. Echo is restored before returning.
pub fn read_hidden(prompt: &str) -> Option<String> {
    let stdin = io::stdin();
    eprint!("{prompt}");
    let _ = io::stderr().flush();

    let original = termios::tcgetattr(&stdin).ok();
    if let Some(ref original) = original {
        let mut silent = original.clone();
        silent.local_flags.remove(LocalFlags::ECHO);
        silent.local_flags.insert(LocalFlags::ECHONL);
        let _ = termios::tcsetattr(&stdin, SetArg::TCSANOW, &silent);
    }

    let mut line = String::new();
    let read = stdin.lock().read_line(&mut line);

    if let Some(ref original) = original {
        let _ = termios::tcsetattr(&stdin, SetArg::TCSANOW, original);
    }

    match read {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
    }
}

/// Passphrase prompt on the controlling terminal, or `None` when stdin is not
/// a terminal (encrypted keys then fail with `PASSPHRASE_REQUIRED`).
pub fn passphrase_prompt() -> Option<Arc<PassphrasePrompt>> {
    if !io::stdin().is_terminal() {
        return None;
    }
    let prompt: Arc<PassphrasePrompt> =
        Arc::new(|| read_hidden("Enter passphrase for private key: "));
    Some(prompt)
}

/// The line both CLIs print for a status result.
pub fn status_line(target_id: &str, online: bool) -> String {
    let state = if online { "ONLINE" } else { "OFFLINE" };
    format!("Target '{target_id}' is {state}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_line() {
        assert_eq!(status_line("nas", true), "Target 'nas' is ONLINE");
        assert_eq!(status_line("nas", false), "Target 'nas' is OFFLINE");
    }
}
