//! In-memory collaborators for pipeline tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::api::{ApiError, ImageOptions, ImageStream, RemoteApi, UserProfile};
use crate::store::{LocalStore, StoreError};

const IMAGE_URL_PREFIX: &str = "fake://images/";

/// Scripted remote API that records every request it receives.
#[derive(Default)]
pub(crate) struct FakeApi {
    profiles: HashMap<String, Result<UserProfile, u16>>,
    images: HashMap<String, Vec<u8>>,
    delays: HashMap<String, Duration>,
    hanging: HashSet<String>,
    panicking: HashSet<String>,
    profile_requests: Mutex<Vec<String>>,
    image_requests: Mutex<Vec<String>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(mut self, profile: UserProfile) -> Self {
        self.profiles.insert(profile.id.clone(), Ok(profile));
        self
    }

    pub fn with_status(mut self, user_id: &str, status: u16) -> Self {
        self.profiles.insert(user_id.to_string(), Err(status));
        self
    }

    pub fn with_image(mut self, user_id: &str, bytes: &[u8]) -> Self {
        self.images.insert(user_id.to_string(), bytes.to_vec());
        self
    }

    /// Delay the profile response for this user.
    pub fn with_delay(mut self, user_id: &str, delay: Duration) -> Self {
        self.delays.insert(user_id.to_string(), delay);
        self
    }

    /// Profile fetch for this user never completes.
    pub fn hanging(mut self, user_id: &str) -> Self {
        self.hanging.insert(user_id.to_string());
        self
    }

    /// Profile fetch for this user panics.
    pub fn panicking(mut self, user_id: &str) -> Self {
        self.panicking.insert(user_id.to_string());
        self
    }

    pub fn profile_requests(&self) -> Vec<String> {
        self.profile_requests.lock().unwrap().clone()
    }

    pub fn image_requests(&self) -> Vec<String> {
        self.image_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteApi for FakeApi {
    async fn fetch_user_profile(&self, user_id: &str) -> Result<UserProfile, ApiError> {
        self.profile_requests
            .lock()
            .unwrap()
            .push(user_id.to_string());

        if let Some(delay) = self.delays.get(user_id) {
            tokio::time::sleep(*delay).await;
        }
        if self.hanging.contains(user_id) {
            std::future::pending::<()>().await;
        }
        if self.panicking.contains(user_id) {
            panic!("scripted panic for {}", user_id);
        }

        match self.profiles.get(user_id) {
            Some(Ok(profile)) => Ok(profile.clone()),
            Some(Err(status)) => Err(ApiError::HttpStatus {
                status: *status,
                url: format!("fake://users/{}", user_id),
            }),
            None => Err(ApiError::HttpStatus {
                status: 404,
                url: format!("fake://users/{}", user_id),
            }),
        }
    }

    fn user_image_url(&self, profile: &UserProfile, _options: &ImageOptions) -> String {
        format!("{}{}", IMAGE_URL_PREFIX, profile.id)
    }

    async fn fetch_byte_stream(&self, url: &str) -> Result<ImageStream, ApiError> {
        self.image_requests.lock().unwrap().push(url.to_string());
        let user_id = url.strip_prefix(IMAGE_URL_PREFIX).unwrap_or(url);
        match self.images.get(user_id) {
            Some(bytes) => Ok(ImageStream::from_bytes(
                Some("image/png".to_string()),
                bytes.clone(),
            )),
            None => Err(ApiError::HttpStatus {
                status: 404,
                url: url.to_string(),
            }),
        }
    }
}

/// In-memory store that records deletions and can be told to fail.
#[derive(Default)]
pub(crate) struct MemoryStore {
    users: Mutex<HashMap<String, UserProfile>>,
    images: Mutex<HashMap<String, Vec<u8>>>,
    deleted_users: Mutex<Vec<String>>,
    deleted_images: Mutex<Vec<String>>,
    fail_image_save: HashSet<String>,
    fail_user_save: HashSet<String>,
    fail_deletes: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(self, profile: UserProfile) -> Self {
        self.users
            .lock()
            .unwrap()
            .insert(profile.id.clone(), profile);
        self
    }

    pub fn with_image(self, user_id: &str, bytes: &[u8]) -> Self {
        self.images
            .lock()
            .unwrap()
            .insert(user_id.to_string(), bytes.to_vec());
        self
    }

    pub fn failing_image_save(mut self, user_id: &str) -> Self {
        self.fail_image_save.insert(user_id.to_string());
        self
    }

    pub fn failing_user_save(mut self, user_id: &str) -> Self {
        self.fail_user_save.insert(user_id.to_string());
        self
    }

    pub fn failing_deletes(mut self) -> Self {
        self.fail_deletes = true;
        self
    }

    pub fn user(&self, user_id: &str) -> Option<UserProfile> {
        self.users.lock().unwrap().get(user_id).cloned()
    }

    pub fn image(&self, user_id: &str) -> Option<Vec<u8>> {
        self.images.lock().unwrap().get(user_id).cloned()
    }

    pub fn user_count(&self) -> usize {
        self.users.lock().unwrap().len()
    }

    pub fn deleted_users(&self) -> Vec<String> {
        self.deleted_users.lock().unwrap().clone()
    }

    pub fn deleted_images(&self) -> Vec<String> {
        self.deleted_images.lock().unwrap().clone()
    }
}

fn scripted_failure(what: &str, user_id: &str) -> StoreError {
    StoreError::Query(format!("scripted {} failure for {}", what, user_id))
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn save_user_profile(&self, profile: &UserProfile) -> Result<(), StoreError> {
        if self.fail_user_save.contains(&profile.id) {
            return Err(scripted_failure("profile save", &profile.id));
        }
        self.users
            .lock()
            .unwrap()
            .insert(profile.id.clone(), profile.clone());
        Ok(())
    }

    async fn delete_user_profile(&self, user_id: &str) -> Result<(), StoreError> {
        self.deleted_users
            .lock()
            .unwrap()
            .push(user_id.to_string());
        if self.fail_deletes {
            return Err(scripted_failure("profile delete", user_id));
        }
        self.users.lock().unwrap().remove(user_id);
        Ok(())
    }

    async fn has_image(&self, profile: &UserProfile) -> Result<bool, StoreError> {
        Ok(self.images.lock().unwrap().contains_key(&profile.id))
    }

    async fn save_image(
        &self,
        profile: &UserProfile,
        mut stream: ImageStream,
    ) -> Result<u64, StoreError> {
        if self.fail_image_save.contains(&profile.id) {
            return Err(scripted_failure("image save", &profile.id));
        }
        let mut body = Vec::new();
        while let Some(chunk) = stream.next_chunk().await {
            body.extend_from_slice(&chunk?);
        }
        let len = body.len() as u64;
        self.images
            .lock()
            .unwrap()
            .insert(profile.id.clone(), body);
        Ok(len)
    }

    async fn delete_image(&self, profile: &UserProfile) -> Result<(), StoreError> {
        self.deleted_images
            .lock()
            .unwrap()
            .push(profile.id.clone());
        if self.fail_deletes {
            return Err(scripted_failure("image delete", &profile.id));
        }
        self.images.lock().unwrap().remove(&profile.id);
        Ok(())
    }
}
