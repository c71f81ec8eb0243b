//! Image step of a user pipeline.

use tokio_util::sync::CancellationToken;

use super::outcome::{ImageOutcome, ReconcileError};
use super::{until_cancelled, Pipeline};
use crate::api::UserProfile;

/// Bring the cached primary image in line with `profile`.
///
/// - No primary image on the server: remove any local copy. Delete errors
///   are logged and do not fail the step.
/// - Primary image already cached: nothing to do, no request is made.
/// - Otherwise fetch and store it. Fetch and write errors are returned.
pub(crate) async fn reconcile_image(
    pipeline: &Pipeline,
    profile: &UserProfile,
    cancel: &CancellationToken,
) -> Result<ImageOutcome, ReconcileError> {
    let user_id = profile.id.as_str();

    if !profile.has_primary_image {
        if let Err(e) = pipeline.store.delete_image(profile).await {
            tracing::error!(user_id, error = %e, "Error deleting image");
        }
        return Ok(ImageOutcome::Cleared);
    }

    let cached = match pipeline.store.has_image(profile).await {
        Ok(cached) => cached,
        Err(e) => {
            tracing::warn!(user_id, error = %e, "Could not check for cached image, fetching it");
            false
        }
    };
    tracing::info!(user = %profile.name, cached, "Local image check");
    if cached {
        return Ok(ImageOutcome::Cached);
    }

    let url = pipeline
        .api
        .user_image_url(profile, &pipeline.image_options);
    tracing::info!(user_id, url = %url, "Getting image stream");

    let stream = until_cancelled(cancel, pipeline.api.fetch_byte_stream(&url)).await?;
    let bytes = pipeline.store.save_image(profile, stream).await?;
    tracing::info!(user_id, bytes, "Image save complete");

    Ok(ImageOutcome::Downloaded { bytes })
}
