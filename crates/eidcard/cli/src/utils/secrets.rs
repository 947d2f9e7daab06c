//! CAN and PIN input
//!
//! Values come from a flag or its `EIDCARD_*` variable; when neither is set the
//! user is prompted on the terminal.

use std::io::{self, BufRead, Write};

use eyre::WrapErr;
use zeroize::Zeroizing;

/// Use `value` or prompt for it
pub(crate) fn secret(value: Option<&str>, prompt: &str) -> eyre::Result<Zeroizing<String>> {
    match value {
        Some(value) => Ok(Zeroizing::new(value.to_owned())),
        None => read_line(prompt),
    }
}

fn read_line(prompt: &str) -> eyre::Result<Zeroizing<String>> {
    let mut stdout = io::stdout();
    write!(stdout, "{prompt}: ")?;
    stdout.flush()?;

    let mut input = Zeroizing::new(String::new());
    io::stdin()
        .lock()
        .read_line(&mut input)
        .wrap_err_with(|| format!("failed to read {prompt}"))?;

    Ok(Zeroizing::new(input.trim().to_owned()))
}
