//! End-to-end segmentation of one image.
//!
//! ```text
//! tile → upload → execute → poll → download → stitch → cleanup → close
//! ```
//!
//! The session is closed on every path. Cleanup runs once results are
//! downloaded, even if stitching then fails, and its failure never masks
//! the outcome of the job.

use std::fs;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{JobError, TileError};
use crate::job::{CancelToken, JobClient, JobOptions, JobState, JobStore};
use crate::remote::{ExecOutput, RemoteSession};
use crate::stack::{stack_position, Calibration, SourceImage};
use crate::tile::{Stitcher, Tiler, TilingParams};

/// Result of a successful segmentation.
#[derive(Debug, Clone)]
pub struct Segmentation {
    /// The stitched result, titled `WIDU_<source title>`
    pub image: SourceImage,
    pub job_id: String,
    pub tiles: usize,
    /// Output of the remote command
    pub remote_output: ExecOutput,
    /// States the job went through
    pub history: Vec<JobState>,
    /// Best-effort cleanup failure, reported but not fatal
    pub cleanup_error: Option<JobError>,
}

/// Segment `image` on the remote host behind `session`.
///
/// Consumes the session and closes it before returning.
///
/// # Errors
///
/// Any failure of tiling, a remote stage or stitching. A cleanup failure is
/// handed back in [`Segmentation::cleanup_error`]; close failures are only
/// logged.
pub async fn segment<S: RemoteSession>(
    session: S,
    image: &SourceImage,
    params: &TilingParams,
    options: JobOptions,
    cancel: Option<CancelToken>,
) -> Result<Segmentation, JobError> {
    let store = match Tiler::new(*params).tile(image) {
        Ok(store) => store,
        Err(e) => {
            close_session(&session).await;
            return Err(JobError::Tiling(e));
        }
    };

    let mut client = JobClient::new(session, options, store.id());
    if let Some(token) = cancel {
        client = client.with_cancellation(token);
    }

    let outcome = run_job(&mut client, &store).await;

    let job_id = client.job_id().to_string();
    if let Err(e) = client.close().await {
        warn!(job_id = %job_id, error = %e, "Failed to close session");
    }
    outcome
}

async fn run_job<S: RemoteSession>(
    client: &mut JobClient<S>,
    store: &JobStore,
) -> Result<Segmentation, JobError> {
    let remote_output = client.run(store).await?;

    let stitched = Stitcher::new().stitch(store);
    if let Err(e) = &stitched {
        warn!(job_id = client.job_id(), error = %e, "Stitching failed, removing remote files");
    }

    // Never overrides the result
    let cleanup_error = client.cleanup().await.err();

    let image = stitched.map_err(JobError::Stitching)?;
    info!(
        job_id = client.job_id(),
        title = image.title(),
        planes = image.plane_count(),
        "Segmentation complete"
    );

    Ok(Segmentation {
        image,
        job_id: client.job_id().to_string(),
        tiles: store.raw_len(),
        remote_output,
        history: client.history().to_vec(),
        cleanup_error,
    })
}

async fn close_session<S: RemoteSession>(session: &S) {
    if let Err(e) = session.close().await {
        warn!(remote = session.identifier(), error = %e, "Failed to close session");
    }
}

// =============================================================================
// Image files
// =============================================================================

/// Load planes from image files into a stack.
///
/// Files are read in order as stack indices 1, 2, ...
pub fn load_stack(
    title: impl Into<String>,
    paths: &[PathBuf],
    n_slices: u32,
    n_frames: u32,
    calibration: Calibration,
) -> Result<SourceImage, String> {
    let planes = paths
        .iter()
        .map(|path| {
            image::open(path).map_err(|e| format!("Failed to read {}: {e}", path.display()))
        })
        .collect::<Result<Vec<DynamicImage>, String>>()?;

    SourceImage::new(title, planes, n_slices, n_frames, calibration)
        .map_err(|e: TileError| e.to_string())
}

/// Metadata written next to the output planes.
#[derive(Debug, Serialize)]
struct OutputMetadata<'a> {
    title: &'a str,
    job_id: &'a str,
    width: u32,
    height: u32,
    n_slices: u32,
    n_frames: u32,
    calibration: &'a Calibration,
    planes: Vec<String>,
}

/// Write each plane as `{title}-t{frame:03}-z{slice:03}.png` and a
/// `{title}.json` metadata file into `dir`.
///
/// Returns the paths written, metadata last.
pub fn write_result(result: &Segmentation, dir: &Path) -> Result<Vec<PathBuf>, String> {
    let image = &result.image;
    fs::create_dir_all(dir).map_err(|e| format!("Failed to create {}: {e}", dir.display()))?;

    let mut written = Vec::with_capacity(image.plane_count() + 1);
    for (i, plane) in image.planes().iter().enumerate() {
        let (frame, slice) = stack_position(image.n_slices(), i as u32 + 1);
        let path = dir.join(format!(
            "{}-t{:03}-z{:03}.png",
            image.title(),
            frame,
            slice
        ));
        plane
            .save_with_format(&path, ImageFormat::Png)
            .map_err(|e| format!("Failed to write {}: {e}", path.display()))?;
        written.push(path);
    }

    let metadata = OutputMetadata {
        title: image.title(),
        job_id: &result.job_id,
        width: image.width(),
        height: image.height(),
        n_slices: image.n_slices(),
        n_frames: image.n_frames(),
        calibration: image.calibration(),
        planes: written
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect(),
    };
    let path = dir.join(format!("{}.json", image.title()));
    let json = serde_json::to_string_pretty(&metadata)
        .map_err(|e| format!("Failed to serialize metadata: {e}"))?;
    fs::write(&path, json).map_err(|e| format!("Failed to write {}: {e}", path.display()))?;
    written.push(path);

    Ok(written)
}
