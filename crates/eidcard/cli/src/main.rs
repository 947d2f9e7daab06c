//! `eidcard`: read and use Estonian identity documents over a contactless reader

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use eidcard::{CertificateType, CodeType};
use eidcard_transport_pcsc::PcscDeviceManager;
use tracing_subscriber::{EnvFilter, filter::LevelFilter};

mod commands;
mod config;
mod utils;

use commands::*;
use config::Config;
use utils::{display, reader, session};

#[derive(Parser)]
#[command(version, about = "Read and use Estonian identity documents")]
struct Cli {
    /// Only use readers whose name contains this string
    #[arg(short, long, global = true)]
    reader: Option<String>,

    /// Debug level output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available readers
    List,

    /// Show whether a contactless reader is ready
    Status,

    /// Read the document holder's personal data
    PersonalData {
        #[command(flatten)]
        can: CanArg,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Read a certificate
    Certificate {
        #[command(flatten)]
        can: CanArg,

        /// Which certificate to read
        #[arg(long = "type", value_enum)]
        kind: CertificateArg,

        /// Write the DER certificate to this file instead of printing hex
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show how many attempts are left for each code
    RetryCounters {
        #[command(flatten)]
        can: CanArg,
    },

    /// Sign a Web eID authentication challenge with PIN1
    Authenticate {
        #[command(flatten)]
        can: CanArg,

        /// Origin of the relying party, e.g. https://example.org
        #[arg(long)]
        origin: String,

        /// Challenge nonce issued by the relying party
        #[arg(long)]
        nonce: String,

        /// PIN1 (prompted for when not given)
        #[arg(long, env = "EIDCARD_PIN1", hide_env_values = true)]
        pin1: Option<String>,
    },

    /// Sign a SHA-256, SHA-384 or SHA-512 hash with PIN2
    Sign {
        #[command(flatten)]
        can: CanArg,

        /// Hash to sign, hex encoded
        #[arg(long)]
        hash: String,

        /// PIN2 (prompted for when not given)
        #[arg(long, env = "EIDCARD_PIN2", hide_env_values = true)]
        pin2: Option<String>,
    },

    /// Change PIN1, PIN2 or the PUK
    ChangeCode {
        #[command(flatten)]
        can: CanArg,

        /// Code to change
        #[arg(value_enum)]
        code: CodeArg,

        /// Current value of the code (prompted for when not given)
        #[arg(long)]
        current: Option<String>,

        /// New value of the code (prompted for when not given)
        #[arg(long)]
        new: Option<String>,
    },

    /// Reset the retry counter of PIN1 or PIN2 with the PUK and set a new value
    UnblockCode {
        #[command(flatten)]
        can: CanArg,

        /// Code to unblock
        #[arg(value_enum)]
        code: CodeArg,

        /// PUK (prompted for when not given)
        #[arg(long, env = "EIDCARD_PUK", hide_env_values = true)]
        puk: Option<String>,

        /// New value of the code (prompted for when not given)
        #[arg(long)]
        new: Option<String>,
    },
}

#[derive(clap::Args)]
struct CanArg {
    /// Card Access Number printed on the document (prompted for when not given)
    #[arg(long, env = "EIDCARD_CAN", hide_env_values = true)]
    can: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum CertificateArg {
    Auth,
    Sign,
}

impl From<CertificateArg> for CertificateType {
    fn from(arg: CertificateArg) -> Self {
        match arg {
            CertificateArg::Auth => Self::Authentication,
            CertificateArg::Sign => Self::Signing,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum CodeArg {
    Pin1,
    Pin2,
    Puk,
}

impl From<CodeArg> for CodeType {
    fn from(arg: CodeArg) -> Self {
        match arg {
            CodeArg::Pin1 => Self::Pin1,
            CodeArg::Pin2 => Self::Pin2,
            CodeArg::Puk => Self::Puk,
        }
    }
}

fn main() -> eyre::Result<()> {
    let cli = Cli::parse();

    let mut config = config::load_config()?;
    if cli.reader.is_some() {
        config.reader.clone_from(&cli.reader);
    }

    setup_logging(cli.verbose, &config);

    let result = run(cli.command, &config);
    if let Err(error) = &result {
        report_code_error(error);
    }
    result
}

fn run(command: Commands, config: &Config) -> eyre::Result<()> {
    match command {
        Commands::List => reader::list_readers(&PcscDeviceManager::new()?),
        Commands::Status => status_command(config),
        Commands::PersonalData { can, json } => {
            let session = session::open_session(config, can.can.as_deref())?;
            personal_data_command(&session, json)
        }
        Commands::Certificate { can, kind, output } => {
            let session = session::open_session(config, can.can.as_deref())?;
            certificate_command(&session, kind.into(), output.as_deref())
        }
        Commands::RetryCounters { can } => {
            let session = session::open_session(config, can.can.as_deref())?;
            retry_counters_command(&session)
        }
        Commands::Authenticate {
            can,
            origin,
            nonce,
            pin1,
        } => {
            let session = session::open_session(config, can.can.as_deref())?;
            authenticate_command(&session, &origin, &nonce, pin1.as_deref())
        }
        Commands::Sign { can, hash, pin2 } => {
            let session = session::open_session(config, can.can.as_deref())?;
            sign_command(&session, &hash, pin2.as_deref())
        }
        Commands::ChangeCode {
            can,
            code,
            current,
            new,
        } => {
            let session = session::open_session(config, can.can.as_deref())?;
            change_code_command(&session, code.into(), current.as_deref(), new.as_deref())
        }
        Commands::UnblockCode {
            can,
            code,
            puk,
            new,
        } => {
            let session = session::open_session(config, can.can.as_deref())?;
            unblock_code_command(&session, code.into(), puk.as_deref(), new.as_deref())
        }
    }
}

/// Point out a wrong or locked code before eyre prints the error chain
fn report_code_error(error: &eyre::Report) {
    let Some(error) = error.downcast_ref::<eidcard::Error>() else {
        return;
    };

    if error.is_locked() {
        eprintln!("{}", display::warning("The code is blocked, unblock it with the PUK"));
    } else if let Some(retries) = error.retries_left() {
        eprintln!("{}", display::warning(&format!("{retries} attempts left")));
    }
}

fn setup_logging(verbose: bool, config: &Config) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        config.level()
    };

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(true)
        .init();
}
