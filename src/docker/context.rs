//! Tar payload construction for image builds and credential provisioning.
//!
//! Docker's build and upload endpoints both consume tar archives. The build
//! context is tarred straight from the deployment's Dockerfile directory;
//! credentials are packed into a single-file archive that unpacks to the
//! fixed in-container path every stage expects.

use std::fs;
use std::path::Path;

use crate::error::DockerError;

/// Fixed in-container path of the provisioned credentials file.
pub const CONTAINER_CREDENTIALS_PATH: &str = "/credentials/google-cloud-credentials.json";

/// Tars a Dockerfile context directory for an image build.
///
/// # Errors
///
/// Returns `DockerError::BuildFailed` if the directory does not exist, and
/// `DockerError::Io` for read failures inside it.
pub fn build_context(dir: &Path) -> Result<Vec<u8>, DockerError> {
    if !dir.is_dir() {
        return Err(DockerError::BuildFailed(format!(
            "Build context directory does not exist: {}",
            dir.display()
        )));
    }

    let mut builder = tar::Builder::new(Vec::new());
    builder.append_dir_all("", dir)?;
    Ok(builder.into_inner()?)
}

/// Packs a local credentials file into a tar archive.
///
/// Unpacking the archive at `/` places the file at
/// [`CONTAINER_CREDENTIALS_PATH`], creating the directory as a side effect.
///
/// # Errors
///
/// Returns `DockerError::CopyFailed` if the credentials file cannot be read.
pub fn credentials_archive(credentials_file: &Path) -> Result<Vec<u8>, DockerError> {
    let data = fs::read(credentials_file).map_err(|e| {
        DockerError::CopyFailed(format!(
            "Failed to read credentials file {}: {e}",
            credentials_file.display()
        ))
    })?;

    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o600);
    header.set_cksum();

    let mut builder = tar::Builder::new(Vec::new());
    builder.append_data(
        &mut header,
        CONTAINER_CREDENTIALS_PATH.trim_start_matches('/'),
        data.as_slice(),
    )?;
    Ok(builder.into_inner()?)
}
