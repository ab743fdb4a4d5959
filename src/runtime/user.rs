//! Interactive confirmation prompts.

use anyhow::{Context, Result};
use std::io::{self, BufRead, Write};

use super::RealRuntime;

/// Writes `prompt` followed by a `(yes/no)` hint, then reads one answer line.
///
/// Only `y` and `yes` (any case, surrounding whitespace ignored) count as
/// consent; anything else, including end of input, is a refusal.
pub(crate) fn ask_yes_no<R: BufRead, W: Write>(
    prompt: &str,
    input: &mut R,
    output: &mut W,
) -> Result<bool> {
    write!(output, "{} (yes/no): ", prompt)?;
    output.flush()?;

    let mut answer = String::new();
    input
        .read_line(&mut answer)
        .context("Failed to read confirmation answer")?;

    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

impl RealRuntime {
    pub(crate) fn confirm_impl(&self, prompt: &str) -> Result<bool> {
        let stdin = io::stdin();
        let mut stdout = io::stdout();
        ask_yes_no(prompt, &mut stdin.lock(), &mut stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::ask_yes_no;
    use anyhow::Result;
    use std::io::Cursor;

    fn answer(text: &str) -> Result<(bool, String)> {
        let mut input = Cursor::new(text.as_bytes().to_vec());
        let mut output = Vec::new();
        let accepted = ask_yes_no("Overwrite?", &mut input, &mut output)?;
        Ok((accepted, String::from_utf8(output)?))
    }

    #[test]
    fn accepts_yes_variants() -> Result<()> {
        for case in ["y\n", "Y\n", "yes\n", " YES \n"] {
            let (accepted, _) = answer(case)?;
            assert!(accepted, "expected {:?} to be accepted", case);
        }
        Ok(())
    }

    #[test]
    fn rejects_everything_else() -> Result<()> {
        for case in ["n\n", "no\n", "\n", "yep\n", ""] {
            let (accepted, _) = answer(case)?;
            assert!(!accepted, "expected {:?} to be rejected", case);
        }
        Ok(())
    }

    #[test]
    fn prompt_carries_hint() -> Result<()> {
        let (_, out) = answer("no\n")?;
        assert_eq!(out, "Overwrite? (yes/no): ");
        Ok(())
    }
}
