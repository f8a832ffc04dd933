//! Storage of incoming instances
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dicom_core::Tag;
use dicom_dictionary_std::tags;
use dicom_object::FileMetaTableBuilder;
use pacsnet_dimse::{CommandField, DimseContext, Handler, Message, Status};
use pacsnet_pixeldata::{CodecParameters, CompressOutcome, Compressor, Dataset};
use pacsnet_transfer_syntax_registry::TransferSyntaxRegistry;
use snafu::{OptionExt, Report, ResultExt, Whatever};
use tracing::{debug, error, info, warn};

/// Transcoding applied to every stored instance.
#[derive(Debug, Clone)]
pub struct CompressTarget {
    pub transfer_syntax: String,
    pub parameters: CodecParameters,
}

/// Writes received instances to a directory,
/// optionally transcoding them first.
#[derive(Debug)]
pub struct StoreService {
    out_dir: PathBuf,
    ts_registry: Arc<TransferSyntaxRegistry>,
    compressor: Compressor,
    target: Option<CompressTarget>,
}

impl StoreService {
    pub fn new(
        out_dir: impl Into<PathBuf>,
        ts_registry: Arc<TransferSyntaxRegistry>,
        compressor: Compressor,
        target: Option<CompressTarget>,
    ) -> Self {
        StoreService {
            out_dir: out_dir.into(),
            ts_registry,
            compressor,
            target,
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Store the data set of a C-STORE request
    /// received in the given transfer syntax.
    ///
    /// Returns the path of the new file.
    pub fn store(&self, message: &Message, transfer_syntax: &str) -> Result<PathBuf, Whatever> {
        let bytes = message
            .dataset
            .as_deref()
            .whatever_context("C-STORE request without data set")?;
        let mut dataset = Dataset::from_bytes(bytes, transfer_syntax, &self.ts_registry)
            .whatever_context("could not read data set")?;

        if let Some(target) = &self.target {
            let outcome = self
                .compressor
                .compress(&mut dataset, &target.transfer_syntax, &target.parameters)
                .whatever_context("could not transcode data set")?;
            if let CompressOutcome::Transcoded { encoded_size, .. } = outcome {
                debug!(
                    "Transcoded to {} ({} bytes of pixel data)",
                    dataset.transfer_syntax(),
                    encoded_size
                );
            }
        }

        let sop_class_uid = uid_of(&dataset, tags::SOP_CLASS_UID)
            .or_else(|| message.command.affected_sop_class_uid())
            .whatever_context("missing SOP Class UID")?;
        let sop_instance_uid = uid_of(&dataset, tags::SOP_INSTANCE_UID)
            .or_else(|| message.command.affected_sop_instance_uid())
            .whatever_context("missing SOP Instance UID")?;

        let file_meta = FileMetaTableBuilder::new()
            .media_storage_sop_class_uid(sop_class_uid)
            .media_storage_sop_instance_uid(sop_instance_uid.as_str())
            .transfer_syntax(dataset.transfer_syntax())
            .build()
            .whatever_context("failed to build file meta group")?;
        let file_obj = dataset.into_object().with_exact_meta(file_meta);

        let file_path = self.out_dir.join(format!("{}.dcm", sop_instance_uid));
        file_obj
            .write_to_file(&file_path)
            .whatever_context("could not save DICOM object to file")?;
        Ok(file_path)
    }

    /// Handle one request message.
    ///
    /// Any failure to store an instance is answered
    /// with a failure status instead of ending the association.
    fn handle_request(
        &self,
        ctx: &mut DimseContext<'_>,
        message: Message,
    ) -> pacsnet_dimse::Result<()> {
        let command_field = message.command.command_field()?;
        match command_field {
            CommandField::CEchoRq => ctx.respond(&message, Status::SUCCESS),
            CommandField::CStoreRq => {
                let Some(transfer_syntax) = ctx
                    .transfer_syntax(message.presentation_context_id)
                    .map(str::to_string)
                else {
                    return ctx.respond(&message, Status::CANNOT_UNDERSTAND);
                };
                let status = match self.store(&message, &transfer_syntax) {
                    Ok(path) => {
                        info!("Stored {}", path.display());
                        Status::SUCCESS
                    }
                    Err(e) => {
                        error!("{}", Report::from_error(e));
                        Status::PROCESSING_FAILURE
                    }
                };
                ctx.respond(&message, status)
            }
            CommandField::CCancelRq => Ok(()),
            _ => {
                warn!("Unsupported request {:?}", command_field);
                ctx.respond(&message, Status::UNRECOGNIZED_OPERATION)
            }
        }
    }
}

fn uid_of(dataset: &Dataset, tag: Tag) -> Option<String> {
    let value = dataset.object().element(tag).ok()?.to_str().ok()?;
    let value = value.trim_end_matches(|c: char| c == '\0' || c.is_whitespace());
    (!value.is_empty()).then(|| value.to_string())
}

/// A fresh handler for one association.
pub fn store_handler(service: Arc<StoreService>) -> Handler {
    Handler::new()
        .on_request(move |ctx, message| service.handle_request(ctx, message))
        .on_release_request(|| debug!("Association released by the peer"))
        .on_abort(|source| warn!("Association aborted: {}", source))
        .on_network_error(|e| warn!("{}", Report::from_error(e)))
        .on_dimse_timeout(|| debug!("No message within the DIMSE timeout"))
}
