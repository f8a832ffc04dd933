use std::time::Duration;

use clap::Parser;
use pacsnet_dimse::verification::verify_with_message_id;
use pacsnet_ul::ClientAssociationOptions;
use snafu::{Report, ResultExt, Whatever};
use tracing::{error, info, Level};
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

/// DICOM C-ECHO SCU
#[derive(Debug, Parser)]
#[command(version)]
struct App {
    /// socket address to SCP (example: "127.0.0.1:104")
    addr: String,
    /// verbose mode
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
    /// the calling AE title
    #[arg(long = "calling-ae-title", default_value = "ECHOSCU")]
    calling_ae_title: String,
    /// the called AE title
    #[arg(long = "called-ae-title", default_value = "ANY-SCP")]
    called_ae_title: String,
    /// the C-ECHO message ID
    #[arg(short = 'm', long = "message-id", default_value = "1")]
    message_id: u16,
    /// seconds to wait for the connection and for each response
    #[arg(short = 't', long = "timeout", default_value = "30")]
    timeout: u64,
}

fn main() {
    let App {
        addr,
        verbose,
        calling_ae_title,
        called_ae_title,
        message_id,
        timeout,
    } = App::parse();

    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(Level::DEBUG)
            .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
            .finish(),
    )
    .whatever_context("Could not set up global logging subscriber")
    .unwrap_or_else(|e: Whatever| {
        eprintln!("[ERROR] {}", Report::from_error(e));
    });

    let timeout = Some(Duration::from_secs(timeout));
    let options = ClientAssociationOptions::new()
        .calling_ae_title(calling_ae_title)
        .called_ae_title(called_ae_title)
        .connection_timeout(timeout)
        .artim_timeout(timeout)
        .dimse_timeout(timeout);

    match verify_with_message_id(options, addr.as_str(), message_id) {
        Ok(status) => {
            info!("C-ECHO successful (status {})", status);
        }
        Err(e) => {
            error!("{}", e.reason());
            if verbose {
                error!("{}", Report::from_error(e));
            }
            std::process::exit(-2);
        }
    }
}
