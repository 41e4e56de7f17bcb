//! User data model.
//!
//! Usernames and emails are validated newtypes so that every `User` reaching
//! the store already satisfies the shape rules enforced at the boundary.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::Error;

/// Minimum allowed length for a username.
pub const USERNAME_MIN: usize = 3;
/// Maximum allowed length for a username.
pub const USERNAME_MAX: usize = 100;
/// Maximum allowed length for an email address.
pub const EMAIL_MAX: usize = 200;
/// Maximum allowed length for a full name.
pub const FULL_NAME_MAX: usize = 100;

/// Validation errors returned by the user constructors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UserValidationError {
    #[error("username must be 3-100 characters")]
    UsernameLength,
    #[error("username may only contain lowercase letters, digits, or underscores")]
    UsernameCharacters,
    #[error("email must be a valid address of at most 200 characters")]
    InvalidEmail,
    #[error("full name must be 1-100 characters of letters and spaces")]
    InvalidFullName,
    #[error("password hash must not be empty")]
    EmptyPasswordHash,
    #[error("unknown role: {0}")]
    UnknownRole(String),
}

impl UserValidationError {
    const fn field(&self) -> &'static str {
        match self {
            Self::UsernameLength | Self::UsernameCharacters => "username",
            Self::InvalidEmail => "email",
            Self::InvalidFullName => "full_name",
            Self::EmptyPasswordHash => "hashed_password",
            Self::UnknownRole(_) => "role",
        }
    }
}

impl From<UserValidationError> for Error {
    fn from(value: UserValidationError) -> Self {
        Self::invalid_request(value.to_string()).with_details(json!({ "field": value.field() }))
    }
}

/// Unique login name; the primary key of a user.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Username(String);

impl Username {
    /// Validate and construct a [`Username`].
    ///
    /// # Examples
    /// ```
    /// use ledger::domain::Username;
    ///
    /// assert!(Username::new("alice_01").is_ok());
    /// assert!(Username::new("Al").is_err());
    /// ```
    pub fn new(value: impl Into<String>) -> Result<Self, UserValidationError> {
        let value = value.into();
        if !(USERNAME_MIN..=USERNAME_MAX).contains(&value.chars().count()) {
            return Err(UserValidationError::UsernameLength);
        }
        let allowed = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_';
        if !value.chars().all(allowed) {
            return Err(UserValidationError::UsernameCharacters);
        }
        Ok(Self(value))
    }

    /// Borrow the username as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Username> for String {
    fn from(value: Username) -> Self {
        value.0
    }
}

impl TryFrom<String> for Username {
    type Error = UserValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Contact address; unique across users.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Email(String);

impl Email {
    /// Validate and construct an [`Email`].
    pub fn new(value: impl Into<String>) -> Result<Self, UserValidationError> {
        let value = value.into();
        if value.len() > EMAIL_MAX || value.chars().any(char::is_whitespace) {
            return Err(UserValidationError::InvalidEmail);
        }
        match value.split_once('@') {
            Some((local, domain))
                if !local.is_empty()
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
                    && !domain.contains('@') =>
            {
                Ok(Self(value))
            }
            _ => Err(UserValidationError::InvalidEmail),
        }
    }

    /// Borrow the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Email> for String {
    fn from(value: Email) -> Self {
        value.0
    }
}

impl TryFrom<String> for Email {
    type Error = UserValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Authorisation role carried by a user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Regular customer holding accounts.
    #[default]
    Depositor,
    /// Staff member with access to every account.
    Banker,
}

impl Role {
    /// Stored representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Depositor => "depositor",
            Self::Banker => "banker",
        }
    }
}

impl FromStr for Role {
    type Err = UserValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "depositor" => Ok(Self::Depositor),
            "banker" => Ok(Self::Banker),
            other => Err(UserValidationError::UnknownRole(other.to_owned())),
        }
    }
}

fn validate_full_name(value: &str) -> Result<(), UserValidationError> {
    let length = value.chars().count();
    let trimmed = value.trim();
    if length == 0
        || length > FULL_NAME_MAX
        || trimmed.is_empty()
        || !value.chars().all(|c| c.is_alphabetic() || c == ' ')
    {
        return Err(UserValidationError::InvalidFullName);
    }
    Ok(())
}

fn validate_password_hash(value: &str) -> Result<(), UserValidationError> {
    if value.trim().is_empty() {
        return Err(UserValidationError::EmptyPasswordHash);
    }
    Ok(())
}

/// Persisted user record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub username: Username,
    pub role: Role,
    #[serde(skip_serializing)]
    pub hashed_password: String,
    pub full_name: String,
    pub email: Email,
    pub is_email_verified: bool,
    pub avatar_url: Option<String>,
    pub password_changed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Validated input for inserting a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub username: Username,
    pub role: Role,
    pub hashed_password: String,
    pub full_name: String,
    pub email: Email,
}

impl NewUser {
    /// Validate the free-form fields and build a depositor.
    ///
    /// The password must already be hashed; hashing belongs to the
    /// credential layer.
    pub fn new(
        username: Username,
        hashed_password: impl Into<String>,
        full_name: impl Into<String>,
        email: Email,
    ) -> Result<Self, UserValidationError> {
        let hashed_password = hashed_password.into();
        let full_name = full_name.into();
        validate_password_hash(&hashed_password)?;
        validate_full_name(&full_name)?;
        Ok(Self {
            username,
            role: Role::default(),
            hashed_password,
            full_name,
            email,
        })
    }

    /// Override the default role.
    #[must_use]
    pub const fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }
}

/// Partial update applied to a user row. `None` leaves a column untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserChanges {
    pub full_name: Option<String>,
    pub email: Option<Email>,
    pub hashed_password: Option<String>,
    pub password_changed_at: Option<DateTime<Utc>>,
    pub is_email_verified: Option<bool>,
    pub avatar_url: Option<String>,
}

impl UserChanges {
    /// True when no column would change.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.full_name.is_none()
            && self.email.is_none()
            && self.hashed_password.is_none()
            && self.password_changed_at.is_none()
            && self.is_email_verified.is_none()
            && self.avatar_url.is_none()
    }

    /// Apply the changes to an in-memory copy of a row.
    pub fn apply_to(&self, user: &mut User) {
        if let Some(full_name) = &self.full_name {
            user.full_name.clone_from(full_name);
        }
        if let Some(email) = &self.email {
            user.email = email.clone();
        }
        if let Some(hashed_password) = &self.hashed_password {
            user.hashed_password.clone_from(hashed_password);
        }
        if let Some(changed_at) = self.password_changed_at {
            user.password_changed_at = changed_at;
        }
        if let Some(verified) = self.is_email_verified {
            user.is_email_verified = verified;
        }
        if let Some(avatar_url) = &self.avatar_url {
            user.avatar_url = Some(avatar_url.clone());
        }
    }
}

/// Caller-facing profile update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateUserRequest {
    pub full_name: Option<String>,
    pub email: Option<Email>,
    pub hashed_password: Option<String>,
}

impl UpdateUserRequest {
    /// Validate the request and turn it into row changes stamped at `now`.
    ///
    /// A new email clears the verified flag; a new password hash records
    /// `now` as the password change time.
    pub fn into_changes(self, now: DateTime<Utc>) -> Result<UserChanges, UserValidationError> {
        if let Some(full_name) = &self.full_name {
            validate_full_name(full_name)?;
        }
        if let Some(hashed_password) = &self.hashed_password {
            validate_password_hash(hashed_password)?;
        }
        let email_changed = self.email.is_some();
        let password_changed = self.hashed_password.is_some();
        Ok(UserChanges {
            full_name: self.full_name,
            email: self.email,
            hashed_password: self.hashed_password,
            password_changed_at: password_changed.then_some(now),
            is_email_verified: email_changed.then_some(false),
            avatar_url: None,
        })
    }
}

/// Build a collision-resistant avatar file name.
///
/// The stem is lowercased, spaces become dashes, and the upload time is
/// appended before the extension.
///
/// # Examples
/// ```
/// use chrono::{TimeZone, Utc};
/// use ledger::domain::avatar_filename;
///
/// let now = Utc.timestamp_opt(1_700_000_000, 0).single().expect("timestamp");
/// assert_eq!(avatar_filename("My Face.PNG", now), "my-face-1700000000.PNG");
/// ```
#[must_use]
pub fn avatar_filename(original: &str, now: DateTime<Utc>) -> String {
    let path = Path::new(original);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_lowercase().replace(' ', "-"))
        .unwrap_or_default();
    let timestamp = now.timestamp();
    match path.extension() {
        Some(ext) => format!("{stem}-{timestamp}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{timestamp}"),
    }
}

#[cfg(test)]
mod tests {
    //! Validation coverage for user primitives.

    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    #[rstest]
    #[case("alice", true)]
    #[case("bob_99", true)]
    #[case("ab", false)]
    #[case("Alice", false)]
    #[case("with space", false)]
    fn username_validation(#[case] raw: &str, #[case] ok: bool) {
        assert_eq!(Username::new(raw).is_ok(), ok, "{raw}");
    }

    #[rstest]
    #[case("alice@example.com", true)]
    #[case("alice@example", false)]
    #[case("@example.com", false)]
    #[case("alice@@example.com", false)]
    #[case("alice @example.com", false)]
    fn email_validation(#[case] raw: &str, #[case] ok: bool) {
        assert_eq!(Email::new(raw).is_ok(), ok, "{raw}");
    }

    #[rstest]
    fn new_user_rejects_blank_password_hash() {
        let result = NewUser::new(
            Username::new("alice").expect("username"),
            "  ",
            "Alice Liddell",
            Email::new("alice@example.com").expect("email"),
        );
        assert_eq!(result, Err(UserValidationError::EmptyPasswordHash));
    }

    #[rstest]
    fn new_user_defaults_to_depositor() {
        let user = NewUser::new(
            Username::new("alice").expect("username"),
            "hash",
            "Alice Liddell",
            Email::new("alice@example.com").expect("email"),
        )
        .expect("valid user");
        assert_eq!(user.role, Role::Depositor);
        assert_eq!(user.with_role(Role::Banker).role, Role::Banker);
    }

    #[rstest]
    fn email_change_clears_verification_and_password_change_is_stamped() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().expect("time");
        let changes = UpdateUserRequest {
            full_name: None,
            email: Some(Email::new("new@example.com").expect("email")),
            hashed_password: Some("new-hash".to_owned()),
        }
        .into_changes(now)
        .expect("valid changes");

        assert_eq!(changes.is_email_verified, Some(false));
        assert_eq!(changes.password_changed_at, Some(now));
    }

    #[rstest]
    fn empty_request_produces_empty_changes() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().expect("time");
        let changes = UpdateUserRequest::default()
            .into_changes(now)
            .expect("valid changes");
        assert!(changes.is_empty());
    }

    #[rstest]
    fn validation_errors_map_to_invalid_request_with_field() {
        let error = Error::from(UserValidationError::InvalidEmail);
        assert_eq!(error.code(), crate::domain::ErrorCode::InvalidRequest);
        assert_eq!(error.details(), Some(&json!({ "field": "email" })));
    }

    #[rstest]
    #[case("avatar.jpg", "avatar-1700000000.jpg")]
    #[case("Holiday Snap.png", "holiday-snap-1700000000.png")]
    #[case("noext", "noext-1700000000")]
    fn avatar_filenames_are_normalised(#[case] original: &str, #[case] expected: &str) {
        let now = Utc.timestamp_opt(1_700_000_000, 0).single().expect("time");
        assert_eq!(avatar_filename(original, now), expected);
    }
}
