//! Diesel table definitions matching `backend/migrations`.
//!
//! Regenerate with `diesel print-schema` after changing a migration.

diesel::table! {
    /// Registered users keyed by username.
    users (username) {
        username -> Varchar,
        /// `depositor` or `banker`.
        role -> Varchar,
        hashed_password -> Varchar,
        full_name -> Varchar,
        email -> Varchar,
        is_email_verified -> Bool,
        avatar_url -> Nullable<Varchar>,
        password_changed_at -> Timestamptz,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    /// One balance per owner and currency; never negative.
    accounts (id) {
        id -> Int8,
        owner -> Varchar,
        balance -> Int8,
        currency -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    /// Signed balance movements; two per transfer.
    entries (id) {
        id -> Int8,
        account_id -> Int8,
        amount -> Int8,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    transfers (id) {
        id -> Int8,
        from_account_id -> Int8,
        to_account_id -> Int8,
        amount -> Int8,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    sessions (id) {
        id -> Uuid,
        username -> Varchar,
        refresh_token -> Varchar,
        user_agent -> Varchar,
        client_ip -> Varchar,
        is_blocked -> Bool,
        expires_at -> Timestamptz,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    /// Email verification codes issued by the verification job.
    verify_emails (id) {
        id -> Int8,
        username -> Varchar,
        email -> Varchar,
        secret_code -> Varchar,
        is_used -> Bool,
        created_at -> Timestamptz,
        expires_at -> Timestamptz,
    }
}

diesel::table! {
    /// Durable background tasks.
    tasks (id) {
        id -> Uuid,
        kind -> Varchar,
        payload -> Bytea,
        queue -> Varchar,
        state -> Varchar,
        retry_count -> Int4,
        max_retry -> Int4,
        next_visible_at -> Timestamptz,
        last_error -> Nullable<Text>,
        claimed_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(accounts -> users (owner));
diesel::joinable!(entries -> accounts (account_id));
diesel::joinable!(sessions -> users (username));
diesel::joinable!(verify_emails -> users (username));

diesel::allow_tables_to_appear_in_same_query!(
    accounts,
    entries,
    sessions,
    transfers,
    users,
    verify_emails,
);
