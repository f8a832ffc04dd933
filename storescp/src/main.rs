use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dicom_dictionary_std::uids;
use pacsnet_dimse::Server;
use pacsnet_pixeldata::{CodecParameters, CodecRegistry, Compressor};
use pacsnet_transfer_syntax_registry::TransferSyntaxRegistry;
use pacsnet_ul::ServerAssociationOptions;
use snafu::{ensure_whatever, Report, ResultExt, Whatever};
use tracing::{debug, error, Level};
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

mod store;
mod transfer;
use store::{store_handler, CompressTarget, StoreService};
use transfer::{storage_transfer_syntaxes, STORAGE_SOP_CLASSES};

/// DICOM C-STORE SCP with verification
#[derive(Debug, Parser)]
#[command(version)]
struct App {
    /// Verbose mode
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
    /// Application Entity title of this node
    #[arg(long = "ae-title", default_value = "STORE-SCP")]
    ae_title: String,
    /// Enforce max pdu length
    #[arg(short = 's', long = "strict")]
    strict: bool,
    /// Only accept native/uncompressed transfer syntaxes
    #[arg(long)]
    uncompressed_only: bool,
    /// Maximum PDU length
    #[arg(
        short = 'm',
        long = "max-pdu-length",
        default_value = "16384",
        value_parser(clap::value_parser!(u32).range(4096..=131072))
    )]
    max_pdu_length: u32,
    /// Seconds to wait for an association request or release
    #[arg(long = "artim-timeout", default_value = "30")]
    artim_timeout: u64,
    /// Seconds to wait for the next message (waits indefinitely if absent)
    #[arg(long = "dimse-timeout")]
    dimse_timeout: Option<u64>,
    /// Output directory for incoming objects
    #[arg(short = 'o', long = "out-dir", default_value = ".")]
    out_dir: PathBuf,
    /// Which port to listen on
    #[arg(short, long, default_value = "11111")]
    port: u16,
    /// Transcode incoming objects to this transfer syntax before storing
    #[arg(short = 'c', long = "compress", value_name = "UID")]
    compress: Option<String>,
    /// Quality of lossy compression (1 to 100)
    #[arg(long, requires = "compress")]
    quality: Option<String>,
    /// Ratio of lossy compression (such as 10 or 10:1)
    #[arg(long, requires = "compress")]
    ratio: Option<String>,
    /// Convert PALETTE COLOR images to RGB before compressing
    #[arg(long, requires = "compress")]
    convert_from_palette: bool,
}

fn main() {
    let app = App::parse();
    let level = if app.verbose {
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

    run(app).unwrap_or_else(|e| {
        error!("{}", Report::from_error(e));
        std::process::exit(-2);
    });
}

fn run(args: App) -> Result<(), Whatever> {
    let App {
        verbose: _,
        ae_title,
        strict,
        uncompressed_only,
        max_pdu_length,
        artim_timeout,
        dimse_timeout,
        out_dir,
        port,
        compress,
        quality,
        ratio,
        convert_from_palette,
    } = args;

    std::fs::create_dir_all(&out_dir).whatever_context("Could not create output directory")?;

    let ts_registry = Arc::new(TransferSyntaxRegistry::with_builtin());
    let codecs = Arc::new(
        CodecRegistry::with_builtin_codecs().whatever_context("Could not register codecs")?,
    );

    let target = match compress {
        Some(uid) => {
            ensure_whatever!(
                codecs.contains(&uid) || ts_registry.get(&uid).is_some_and(|ts| ts.is_native()),
                "No codec for transfer syntax {}",
                uid
            );
            let mut parameters = CodecParameters::new().convert_from_palette(convert_from_palette);
            if let Some(quality) = quality {
                parameters = parameters.quality(quality);
            }
            if let Some(ratio) = ratio {
                parameters = parameters.ratio(ratio);
            }
            Some(CompressTarget {
                transfer_syntax: uid,
                parameters,
            })
        }
        None => None,
    };

    let transfer_syntaxes = storage_transfer_syntaxes(&ts_registry, uncompressed_only);
    let mut options = ServerAssociationOptions::new()
        .accept_any()
        .ae_title(ae_title)
        .strict(strict)
        .max_pdu_length(max_pdu_length)
        .artim_timeout(Some(Duration::from_secs(artim_timeout)))
        .dimse_timeout(dimse_timeout.map(Duration::from_secs))
        .transfer_syntax_registry(Arc::clone(&ts_registry))
        .reject_without_accepted_contexts(true)
        .with_presentation_context(uids::VERIFICATION, transfer_syntaxes[..2].to_vec());
    for uid in STORAGE_SOP_CLASSES {
        options = options.with_presentation_context(*uid, transfer_syntaxes.clone());
    }

    let compressor = Compressor::new(Arc::clone(&ts_registry), codecs);
    let service = Arc::new(StoreService::new(out_dir, ts_registry, compressor, target));
    debug!("Storing objects in {}", service.out_dir().display());

    let listen_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    let listener = TcpListener::bind(listen_addr).whatever_context("Could not bind listener")?;

    let server = Server::new(options, move || store_handler(Arc::clone(&service)));
    server
        .serve(listener)
        .whatever_context("Could not accept associations")
}

#[cfg(test)]
mod tests {
    use crate::App;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        App::command().debug_assert();
    }
}
