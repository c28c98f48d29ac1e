//! One-shot runs: generate remotely and save, or save the placeholder.

use std::path::Path;

use sdgen_client::client::{JobClient, JobError};
use sdgen_client::retry::Sleeper;
use sdgen_client::service::RemoteService;
use sdgen_core::job::{JobHandle, JobRequest, RetryPolicy};
use tokio_util::sync::CancellationToken;

use crate::output::{placeholder, resolve_payload, write_image, OutputError, PayloadSource};

/// What a successful `generate` run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateOutcome {
    pub handle: JobHandle,
    pub source: PayloadSource,
    pub bytes_written: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Output(#[from] OutputError),
}

impl DriverError {
    /// Short stage label for logs and exit messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Job(JobError::Submit(_)) => "submit",
            Self::Job(JobError::Await(_)) => "await",
            Self::Job(JobError::Fetch(_)) => "fetch",
            Self::Output(OutputError::Encode(_) | OutputError::Header(_)) => "encode",
            Self::Output(OutputError::UnrecognizedPayload { .. }) => "payload",
            Self::Output(OutputError::Io(_)) => "io",
        }
    }
}

/// Submit `request`, wait for it, and write the result to `output`.
///
/// Nothing is written unless the whole job succeeded and the payload
/// resolved to a complete image.
pub async fn generate_to_file<S: RemoteService, Z: Sleeper>(
    client: &mut JobClient<S, Z>,
    request: JobRequest,
    policy: RetryPolicy,
    cancel: &CancellationToken,
    output: &Path,
) -> Result<GenerateOutcome, DriverError> {
    let (width, height) = (request.width(), request.height());

    let (handle, bytes) = client.generate(request, policy, cancel).await?;
    let (image, source) = resolve_payload(bytes, width, height)?;
    let bytes_written = write_image(output, image)?;

    tracing::info!(
        handle = %handle,
        source = source.as_str(),
        bytes_written,
        path = %output.display(),
        "Image saved",
    );

    Ok(GenerateOutcome {
        handle,
        source,
        bytes_written,
    })
}

/// Write the placeholder gradient for `width x height` to `output`.
pub fn demo_to_file(width: u32, height: u32, output: &Path) -> Result<u64, OutputError> {
    let (image, _) = placeholder(width, height)?;
    let bytes_written = write_image(output, image)?;

    tracing::info!(
        width,
        height,
        bytes_written,
        path = %output.display(),
        "Placeholder image saved",
    );
    Ok(bytes_written)
}
