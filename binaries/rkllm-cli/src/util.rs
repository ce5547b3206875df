use std::io::{self, Write};

pub fn process_prompt(raw_prompt: &str, prompt: &str) -> String {
    raw_prompt.replace("{{PROMPT}}", prompt)
}

/// Writes `text` without a trailing newline and flushes, so it shows up before the next token.
pub fn print_token(out: &mut impl Write, text: &str) -> io::Result<()> {
    write!(out, "{text}")?;
    out.flush()
}
