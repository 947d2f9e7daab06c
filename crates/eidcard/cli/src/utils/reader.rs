//! Reader discovery helpers

use colored::Colorize;
use eidcard::CardKind;
use eidcard_transport_pcsc::{PcscDeviceManager, PcscError, PcscReader};

/// Print every reader PC/SC knows about, with the kind of document on it
pub(crate) fn list_readers(manager: &PcscDeviceManager) -> eyre::Result<()> {
    let readers = match manager.list_readers() {
        Ok(readers) => readers,
        Err(PcscError::NoReadersAvailable) => {
            println!("No readers found");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    println!("{}", "Readers".bold().underline());
    for (index, reader) in readers.iter().enumerate() {
        println!("  {}. {} ({})", index + 1, reader.name(), describe(reader));
    }

    Ok(())
}

fn describe(reader: &PcscReader) -> String {
    if !reader.has_card() {
        return "empty".dimmed().to_string();
    }

    match reader.historical_bytes().and_then(CardKind::detect) {
        Some(kind) => format!("{kind} document").green().to_string(),
        None => "unsupported card".yellow().to_string(),
    }
}
