//! Operator confirmation before destructive work.

use std::io::{self, BufRead, BufReader, Write};

/// Blocks on operator input unless forced.
pub struct ConfirmationGate {
    io: Option<(Box<dyn BufRead + Send>, Box<dyn Write + Send>)>,
}

impl std::fmt::Debug for ConfirmationGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfirmationGate")
            .field("forced", &self.is_forced())
            .finish()
    }
}

impl ConfirmationGate {
    /// Prompt on stderr, read from stdin.
    pub fn stdio() -> Self {
        Self::new(BufReader::new(io::stdin()), io::stderr())
    }

    /// Prompt on `output`, read from `input`.
    pub fn new(input: impl BufRead + Send + 'static, output: impl Write + Send + 'static) -> Self {
        Self {
            io: Some((Box::new(input), Box::new(output))),
        }
    }

    /// Approve everything without prompting.
    pub fn forced() -> Self {
        Self { io: None }
    }

    pub fn is_forced(&self) -> bool {
        self.io.is_none()
    }

    /// Ask a yes/no question. Accepts `yes` or `y`, case-insensitively.
    pub fn confirm(&mut self, prompt: &str) -> io::Result<bool> {
        match self.ask(&format!("{prompt} (yes/no): "))? {
            None => Ok(true),
            Some(answer) => {
                let answer = answer.to_lowercase();
                Ok(answer == "yes" || answer == "y")
            }
        }
    }

    /// Require the operator to type `phrase` exactly.
    pub fn confirm_phrase(&mut self, prompt: &str, phrase: &str) -> io::Result<bool> {
        match self.ask(&format!("{prompt}\nType {phrase} to proceed: "))? {
            None => Ok(true),
            Some(answer) => Ok(answer == phrase),
        }
    }

    /// Returns `None` when forced, else the trimmed answer. End of input is an empty answer.
    fn ask(&mut self, prompt: &str) -> io::Result<Option<String>> {
        let Some((input, output)) = self.io.as_mut() else {
            tracing::debug!("confirmation bypassed");
            return Ok(None);
        };
        write!(output, "{prompt}")?;
        output.flush()?;

        // Blocks the runtime thread; nothing else is in flight during a prompt.
        // Callers may be on a current-thread runtime, so no `block_in_place`.
        let mut line = String::new();
        input.read_line(&mut line)?;
        Ok(Some(line.trim().to_string()))
    }
}
