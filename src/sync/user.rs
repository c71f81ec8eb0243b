//! Profile step of a user pipeline.

use tokio_util::sync::CancellationToken;

use super::image::reconcile_image;
use super::outcome::UserOutcome;
use super::{until_cancelled, Pipeline};
use crate::api::{ApiError, ServerUserRef};

/// Fetch, persist and image-reconcile one user. Never fails: every error is
/// logged and folded into the returned outcome.
pub(crate) async fn reconcile_user(
    pipeline: &Pipeline,
    user: &ServerUserRef,
    cancel: &CancellationToken,
) -> UserOutcome {
    let user_id = user.id.as_str();

    let profile = match until_cancelled(cancel, pipeline.api.fetch_user_profile(user_id)).await {
        Ok(profile) => profile,
        Err(ApiError::Cancelled) => {
            tracing::debug!(user_id, "Profile fetch abandoned on shutdown");
            return UserOutcome::Cancelled;
        }
        Err(e) => {
            tracing::error!(
                user_id,
                status = ?e.status_code(),
                error = %e,
                "Error getting user info"
            );
            if !e.is_identity_rejection() {
                return UserOutcome::FetchFailed;
            }
            match pipeline.store.delete_user_profile(user_id).await {
                Ok(()) => tracing::info!(user_id, "Removed offline user rejected by server"),
                Err(e) => tracing::error!(user_id, error = %e, "Error deleting offline user"),
            }
            return UserOutcome::Rejected;
        }
    };

    if let Err(e) = pipeline.store.save_user_profile(&profile).await {
        tracing::error!(user_id, error = %e, "Error saving offline user");
        return UserOutcome::SaveFailed;
    }

    match reconcile_image(pipeline, &profile, cancel).await {
        Ok(image) => UserOutcome::Synced(image),
        Err(e) if e.is_cancelled() => {
            tracing::debug!(user_id, "Image fetch abandoned on shutdown");
            UserOutcome::Cancelled
        }
        Err(e) => {
            tracing::error!(user_id, error = %e, "Error saving offline user image");
            UserOutcome::ImageFailed
        }
    }
}
