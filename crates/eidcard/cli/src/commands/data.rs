//! Commands that read from the document

use std::path::Path;

use eidcard::{CardSession, CertificateType, CodeType, PersonalData};
use eidcard_apdu_core::DiscoveryManager;
use eidcard_transport_pcsc::{PcscTagReader, PcscTransport};
use eyre::WrapErr;
use tracing::info;

use crate::config::Config;
use crate::utils::display;

/// Report whether a contactless reader is ready
pub(crate) fn status_command(config: &Config) -> eyre::Result<()> {
    let mut tag_reader = PcscTagReader::new(config.pcsc());
    if let Some(name) = &config.reader {
        tag_reader = tag_reader.with_reader_filter(name.as_str());
    }

    let status = DiscoveryManager::new(tag_reader).status();
    println!(
        "{}",
        display::key_value_box("Contactless reader", &[("status", status.to_string())])
    );

    Ok(())
}

pub(crate) fn personal_data_command(
    session: &CardSession<PcscTransport>,
    json: bool,
) -> eyre::Result<()> {
    let holder = session
        .personal_data()
        .wrap_err("failed to read personal data")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&holder)?);
    } else {
        println!("{}", format_personal_data(&holder));
    }

    Ok(())
}

fn format_personal_data(holder: &PersonalData) -> String {
    let optional = |value: Option<String>| value.unwrap_or_else(|| "-".to_owned());

    display::key_value_box(
        "Document holder",
        &[
            ("Surname", holder.surname.clone()),
            ("Given names", holder.given_names.clone()),
            ("Personal code", holder.personal_code.clone()),
            ("Gender", optional(holder.gender.map(|g| g.to_string()))),
            ("Citizenship", holder.citizenship.clone()),
            (
                "Date of birth",
                optional(holder.date_of_birth.map(|d| d.to_string())),
            ),
            ("Place of birth", optional(holder.place_of_birth.clone())),
            ("Document number", holder.document_number.clone()),
            (
                "Valid until",
                optional(holder.expiry_date.map(|d| d.to_string())),
            ),
        ],
    )
}

/// Print a certificate as hex or write the DER to `output`
pub(crate) fn certificate_command(
    session: &CardSession<PcscTransport>,
    kind: CertificateType,
    output: Option<&Path>,
) -> eyre::Result<()> {
    let certificate = session
        .certificate(kind)
        .wrap_err_with(|| format!("failed to read the {kind} certificate"))?;

    match output {
        Some(path) => {
            std::fs::write(path, certificate.as_der())
                .wrap_err_with(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), len = certificate.as_der().len(), "Certificate saved");
            println!(
                "{}",
                display::success(&format!("{kind} certificate saved to {}", path.display()))
            );
        }
        None => println!("{}", hex::encode(certificate.as_der())),
    }

    Ok(())
}

pub(crate) fn retry_counters_command(session: &CardSession<PcscTransport>) -> eyre::Result<()> {
    let mut items = Vec::with_capacity(CodeType::ALL.len());
    for code in CodeType::ALL {
        let count = session
            .code_retry_counter(code)
            .wrap_err_with(|| format!("failed to read the {code} retry counter"))?;
        items.push((code.to_string(), display::retries(count)));
    }

    println!("{}", display::key_value_box("Attempts left", &items));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_personal_data_lists_missing_fields_as_dash() {
        let holder = PersonalData::from_records(&["MÄNNIK", "MARI-LIIS", "", "EST"]);
        let text = format_personal_data(&holder);

        assert!(text.contains("MÄNNIK"));
        assert!(text.contains("MARI-LIIS"));
        assert!(text.contains("EST"));
        assert!(text.contains('-'));
    }
}
