//! PIN management

use eidcard::{CardSession, CodeType};
use eidcard_transport_pcsc::PcscTransport;
use eyre::{WrapErr, ensure};
use zeroize::Zeroizing;

use crate::utils::{display, secrets};

pub(crate) fn change_code_command(
    session: &CardSession<PcscTransport>,
    code: CodeType,
    current: Option<&str>,
    new: Option<&str>,
) -> eyre::Result<()> {
    let current = secrets::secret(current, &format!("Current {code}"))?;
    let new = new_code(code, new)?;

    session
        .change_code(code, current.as_bytes(), new.as_bytes())
        .wrap_err_with(|| format!("failed to change {code}"))?;

    println!("{}", display::success(&format!("{code} changed")));
    Ok(())
}

pub(crate) fn unblock_code_command(
    session: &CardSession<PcscTransport>,
    code: CodeType,
    puk: Option<&str>,
    new: Option<&str>,
) -> eyre::Result<()> {
    let puk = secrets::secret(puk, "PUK")?;
    let new = new_code(code, new)?;

    session
        .unblock_and_change_code(puk.as_bytes(), code, new.as_bytes())
        .wrap_err_with(|| format!("failed to unblock {code}"))?;

    println!("{}", display::success(&format!("{code} unblocked and changed")));
    Ok(())
}

/// Take the new code from the flag, or prompt for it twice
fn new_code(code: CodeType, value: Option<&str>) -> eyre::Result<Zeroizing<String>> {
    if let Some(value) = value {
        return Ok(Zeroizing::new(value.to_owned()));
    }

    let first = secrets::secret(None, &format!("New {code}"))?;
    let second = secrets::secret(None, &format!("Repeat new {code}"))?;
    ensure!(first == second, "the new {code} entries do not match");
    Ok(first)
}
