//! User creation, profile updates, and avatar replacement.
//!
//! `create_user` and `update_avatar` run a caller-supplied side effect inside
//! the open transaction (see [`AfterUserCreated`] and [`AvatarUpload`]). The
//! side effect can abort the write; the write cannot undo a side effect that
//! already happened.

use std::sync::Arc;

use async_trait::async_trait;
use mockable::Clock;
use scoped_futures::ScopedFutureExt;
use serde_json::json;
use tracing::{info, warn};

use super::ports::{
    AfterUserCreated, AvatarUpload, BlobStore, EMAIL_CONSTRAINT, LedgerOps, StoreError,
    USERNAME_CONSTRAINT,
};
use super::task_queue::{
    PayloadDeleteOldAvatar, PayloadSendVerifyEmail, TaskDistributor, TaskId, TaskKind,
};
use super::transaction::{TxCoordinator, TxError};
use super::{Error, NewUser, UpdateUserRequest, User, UserChanges, Username, avatar_filename};

/// Result of linking a new avatar to a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvatarUpdate {
    /// The user after the update.
    pub user: User,
    /// Location that was replaced, if the user had an avatar.
    pub previous_avatar_url: Option<String>,
}

/// Result of [`UserLifecycle::replace_avatar`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvatarReplacement {
    pub update: AvatarUpdate,
    /// Task scheduled to delete the replaced blob.
    pub cleanup_task: Option<TaskId>,
}

/// User account lifecycle backed by the record store.
#[derive(Clone)]
pub struct UserLifecycle {
    coordinator: TxCoordinator,
    clock: Arc<dyn Clock>,
}

impl UserLifecycle {
    /// Build the service.
    pub fn new(coordinator: TxCoordinator, clock: Arc<dyn Clock>) -> Self {
        Self { coordinator, clock }
    }

    /// Insert `user` and run `hook` before committing.
    ///
    /// # Errors
    ///
    /// `Conflict` with `details.reason` of `duplicate_username` or
    /// `duplicate_email` when the user clashes with an existing one. A hook
    /// error aborts the insert and is returned as the cause.
    pub async fn create_user(
        &self,
        user: NewUser,
        hook: &dyn AfterUserCreated,
    ) -> Result<User, TxError> {
        let created = self
            .coordinator
            .run_atomic(move |ops| insert_user(ops, user, hook).scope_boxed())
            .await?;
        info!(username = %created.username, "user created");
        Ok(created)
    }

    /// Fetch a user.
    pub async fn get_user(&self, username: Username) -> Result<User, TxError> {
        self.coordinator
            .run_atomic(move |ops| find_user(ops, username).scope_boxed())
            .await
    }

    /// Apply a profile update.
    pub async fn update_user(
        &self,
        username: Username,
        request: UpdateUserRequest,
    ) -> Result<User, TxError> {
        let changes = request.into_changes(self.clock.utc()).map_err(Error::from)?;
        self.coordinator
            .run_atomic(move |ops| apply_changes(ops, username, changes).scope_boxed())
            .await
    }

    /// Upload a new avatar and point the user at it.
    ///
    /// The returned [`AvatarUpdate::previous_avatar_url`] is the caller's
    /// to clean up once this call has returned.
    pub async fn update_avatar(
        &self,
        username: Username,
        filename: String,
        upload: &dyn AvatarUpload,
    ) -> Result<AvatarUpdate, TxError> {
        let update = self
            .coordinator
            .run_atomic(move |ops| link_avatar(ops, username, filename, upload).scope_boxed())
            .await?;
        info!(
            username = %update.user.username,
            avatar_url = update.user.avatar_url.as_deref().unwrap_or_default(),
            "avatar updated"
        );
        Ok(update)
    }

    /// [`update_avatar`](Self::update_avatar) followed, after commit, by a
    /// `DeleteOldAvatar` task for the replaced blob.
    ///
    /// A failure to enqueue the cleanup is logged and reported as
    /// `cleanup_task: None`; the avatar change itself is already durable.
    pub async fn replace_avatar(
        &self,
        username: Username,
        original_filename: &str,
        upload: &dyn AvatarUpload,
        distributor: &TaskDistributor,
    ) -> Result<AvatarReplacement, TxError> {
        let filename = avatar_filename(original_filename, self.clock.utc());
        let update = self.update_avatar(username, filename, upload).await?;

        let stale = update
            .previous_avatar_url
            .clone()
            .filter(|previous| Some(previous) != update.user.avatar_url.as_ref());
        let cleanup_task = match stale {
            Some(location) => {
                let payload = PayloadDeleteOldAvatar { location };
                match distributor
                    .distribute_delete_old_avatar(&payload, TaskKind::DeleteOldAvatar.default_options())
                    .await
                {
                    Ok(task) => Some(task.id),
                    Err(error) => {
                        warn!(location = %payload.location, error = %error, "failed to enqueue avatar cleanup");
                        None
                    }
                }
            }
            None => None,
        };

        Ok(AvatarReplacement {
            update,
            cleanup_task,
        })
    }
}

/// Post-create hook that schedules the verification email.
pub struct EnqueueVerifyEmail {
    distributor: TaskDistributor,
}

impl EnqueueVerifyEmail {
    /// Build the hook.
    #[must_use]
    pub const fn new(distributor: TaskDistributor) -> Self {
        Self { distributor }
    }
}

#[async_trait]
impl AfterUserCreated for EnqueueVerifyEmail {
    async fn after_create(&self, user: &User) -> Result<(), Error> {
        let payload = PayloadSendVerifyEmail {
            username: user.username.to_string(),
        };
        self.distributor
            .distribute_send_verify_email(&payload, TaskKind::SendVerifyEmail.default_options())
            .await
            .map(|_| ())
    }
}

/// Avatar upload that writes the given bytes to a [`BlobStore`].
pub struct BlobAvatarUpload {
    store: Arc<dyn BlobStore>,
    content: Vec<u8>,
}

impl BlobAvatarUpload {
    /// Upload `content` through `store`.
    pub fn new(store: Arc<dyn BlobStore>, content: Vec<u8>) -> Self {
        Self { store, content }
    }
}

#[async_trait]
impl AvatarUpload for BlobAvatarUpload {
    async fn upload(&self, filename: &str) -> Result<String, Error> {
        let stored = self
            .store
            .upload(filename, &self.content)
            .await
            .map_err(|err| {
                if err.is_invalid_name() {
                    Error::invalid_request(err.to_string())
                } else {
                    Error::service_unavailable(err.to_string())
                }
            })?;
        Ok(stored.location)
    }
}

fn map_user_write_error(error: StoreError) -> Error {
    match error {
        StoreError::UniqueViolation { constraint } if constraint == USERNAME_CONSTRAINT => {
            Error::conflict("username already exists")
                .with_details(json!({ "reason": "duplicate_username" }))
        }
        StoreError::UniqueViolation { constraint } if constraint == EMAIL_CONSTRAINT => {
            Error::conflict("email already in use")
                .with_details(json!({ "reason": "duplicate_email" }))
        }
        other => Error::from(other),
    }
}

fn user_not_found(username: &Username) -> Error {
    Error::not_found(format!("user {username} does not exist"))
}

async fn insert_user(
    ops: &mut dyn LedgerOps,
    user: NewUser,
    hook: &dyn AfterUserCreated,
) -> Result<User, Error> {
    let created = ops.create_user(user).await.map_err(map_user_write_error)?;
    hook.after_create(&created).await?;
    Ok(created)
}

async fn find_user(ops: &mut dyn LedgerOps, username: Username) -> Result<User, Error> {
    ops.get_user(&username)
        .await?
        .ok_or_else(|| user_not_found(&username))
}

async fn apply_changes(
    ops: &mut dyn LedgerOps,
    username: Username,
    changes: UserChanges,
) -> Result<User, Error> {
    if changes.is_empty() {
        return find_user(ops, username).await;
    }
    ops.update_user(&username, changes)
        .await
        .map_err(map_user_write_error)?
        .ok_or_else(|| user_not_found(&username))
}

async fn link_avatar(
    ops: &mut dyn LedgerOps,
    username: Username,
    filename: String,
    upload: &dyn AvatarUpload,
) -> Result<AvatarUpdate, Error> {
    let current = ops
        .lock_user(&username)
        .await?
        .ok_or_else(|| user_not_found(&username))?;
    let location = upload.upload(&filename).await?;
    let changes = UserChanges {
        avatar_url: Some(location),
        ..UserChanges::default()
    };
    let user = ops
        .update_user(&username, changes)
        .await?
        .ok_or_else(|| user_not_found(&username))?;
    Ok(AvatarUpdate {
        user,
        previous_avatar_url: current.avatar_url,
    })
}
