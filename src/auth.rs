//! Email/password authentication.
//!
//! Owns the `user`, `account` and `session` tables. The rest of the crate
//! only asks one question of it: which user, if any, is behind a request
//! ([`resolve_principal`]).

use std::{fmt, num::NonZeroU32};

use axum::http::{header, HeaderMap};
use axum_extra::extract::cookie::{Cookie, Key, SameSite, SignedCookieJar};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Duration;
use ring::{
    digest, pbkdf2,
    rand::{SecureRandom, SystemRandom},
};
use sqlx::{query, query_as, SqlitePool};
use uuid::Uuid;

use crate::{
    error::AuthError,
    model::{from_millis, now_millis, CurrentUser, Session, User},
    schema::{Credentials, NewUser},
};

pub const SESSION_COOKIE: &str = "todo.session_token";
pub const DEFAULT_PASSWORD_ITERATIONS: u32 = 100_000;

const PASSWORD_SCHEME: &str = "pbkdf2-sha256";
const CREDENTIAL_PROVIDER: &str = "credential";
const CREDENTIAL_LEN: usize = digest::SHA256_OUTPUT_LEN;
const SALT_LEN: usize = 16;
const TOKEN_LEN: usize = 32;

static PBKDF2_ALG: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;

/// Signing key and lifetimes used by the auth sub-application.
#[derive(Clone)]
pub struct AuthSettings {
    key: Key,
    session_ttl: Duration,
    password_iterations: NonZeroU32,
    secure_cookie: bool,
}

impl AuthSettings {
    pub fn new(secret: &[u8], session_ttl: Duration) -> Self {
        // SHA-512 stretches any secret to the 64 bytes a cookie key needs.
        let material = digest::digest(&digest::SHA512, secret);
        Self {
            key: Key::from(material.as_ref()),
            session_ttl,
            password_iterations: NonZeroU32::new(DEFAULT_PASSWORD_ITERATIONS)
                .unwrap_or(NonZeroU32::MIN),
            secure_cookie: true,
        }
    }

    /// Settings with a freshly generated signing key. Cookies do not survive a restart.
    pub fn with_random_secret(session_ttl: Duration) -> Result<Self, AuthError> {
        let secret: [u8; TOKEN_LEN] = random_bytes()?;
        Ok(Self::new(&secret, session_ttl))
    }

    pub fn with_password_iterations(mut self, iterations: NonZeroU32) -> Self {
        self.password_iterations = iterations;
        self
    }

    pub fn with_secure_cookie(mut self, secure: bool) -> Self {
        self.secure_cookie = secure;
        self
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    pub fn secure_cookie(&self) -> bool {
        self.secure_cookie
    }

    /// The signed cookies carried by a request. Cookies with a bad signature are dropped.
    pub fn cookie_jar(&self, headers: &HeaderMap) -> SignedCookieJar {
        SignedCookieJar::from_headers(headers, self.key.clone())
    }
}

impl fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSettings")
            .field("session_ttl", &self.session_ttl)
            .field("password_iterations", &self.password_iterations)
            .field("secure_cookie", &self.secure_cookie)
            .finish_non_exhaustive()
    }
}

/// Client details recorded with a new session.
#[derive(Debug, Clone, Default)]
pub struct SessionMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl SessionMeta {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        Self {
            ip_address: text("x-forwarded-for")
                .and_then(|forwarded| forwarded.split(',').next().map(|ip| ip.trim().to_string())),
            user_agent: text("user-agent"),
        }
    }
}

fn random_bytes<const N: usize>() -> Result<[u8; N], AuthError> {
    let mut bytes = [0u8; N];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| AuthError::Internal("system random source failed".to_string()))?;
    Ok(bytes)
}

/// Hashes a password as `pbkdf2-sha256$<iterations>$<salt>$<hash>`.
pub fn hash_password(password: &str, iterations: NonZeroU32) -> Result<String, AuthError> {
    let salt: [u8; SALT_LEN] = random_bytes()?;
    let mut hash = [0u8; CREDENTIAL_LEN];
    pbkdf2::derive(PBKDF2_ALG, iterations, &salt, password.as_bytes(), &mut hash);

    Ok(format!(
        "{PASSWORD_SCHEME}${iterations}${}${}",
        URL_SAFE_NO_PAD.encode(salt),
        URL_SAFE_NO_PAD.encode(hash)
    ))
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.split('$');
    let (Some(PASSWORD_SCHEME), Some(iterations), Some(salt), Some(hash), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return false;
    };
    let Some(iterations) = iterations.parse::<u32>().ok().and_then(NonZeroU32::new) else {
        return false;
    };
    let (Ok(salt), Ok(hash)) = (URL_SAFE_NO_PAD.decode(salt), URL_SAFE_NO_PAD.decode(hash)) else {
        return false;
    };

    pbkdf2::verify(PBKDF2_ALG, iterations, &salt, password.as_bytes(), &hash).is_ok()
}

/// Runs a password check that cannot succeed, so that an unknown email costs
/// as much as a wrong password.
fn reject_password(password: &str, iterations: NonZeroU32) {
    let _ = pbkdf2::verify(
        PBKDF2_ALG,
        iterations,
        &[0u8; SALT_LEN],
        password.as_bytes(),
        &[0u8; CREDENTIAL_LEN],
    );
}

/// The signed session cookie to set after a successful sign-in.
pub fn session_cookie(settings: &AuthSettings, token: &str) -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE, token.to_string())
        .path("/")
        .http_only(true)
        .secure(settings.secure_cookie)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(settings.session_ttl.num_seconds()))
        .finish()
}

/// The removal counterpart of [`session_cookie`].
pub fn expired_session_cookie(settings: &AuthSettings) -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE, "")
        .path("/")
        .http_only(true)
        .secure(settings.secure_cookie)
        .same_site(SameSite::Lax)
        .finish()
}

/// Session token carried by a request: a bearer token, or else the signed cookie.
pub fn session_token(settings: &AuthSettings, headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    settings
        .cookie_jar(headers)
        .get(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|token| !token.is_empty())
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    email: String,
    name: String,
    email_verified: bool,
    image: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<UserRow> for User {
    type Error = AuthError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            email: row.email,
            name: row.name,
            email_verified: row.email_verified,
            image: row.image,
            created_at: from_millis(row.created_at)?,
            updated_at: from_millis(row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    token: String,
    user_id: String,
    expires_at: i64,
    ip_address: Option<String>,
    user_agent: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<SessionRow> for Session {
    type Error = AuthError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            token: row.token,
            user_id: row.user_id,
            expires_at: from_millis(row.expires_at)?,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            created_at: from_millis(row.created_at)?,
            updated_at: from_millis(row.updated_at)?,
        })
    }
}

const USER_COLUMNS: &str = "u.id AS id, u.email AS email, u.name AS name, \
     u.email_verified AS email_verified, u.image AS image, u.created_at AS created_at, \
     u.updated_at AS updated_at";
const SESSION_COLUMNS: &str =
    "id, token, user_id, expires_at, ip_address, user_agent, created_at, updated_at";

/// Registers a user with a password credential.
pub async fn create_user(
    db: &SqlitePool,
    settings: &AuthSettings,
    new: NewUser,
) -> Result<User, AuthError> {
    let password_hash = hash_password(&new.password, settings.password_iterations)?;
    let now = now_millis();
    let user_id = Uuid::new_v4().to_string();

    let mut tx = db.begin().await?;
    let row = query_as::<_, UserRow>(
        r#"INSERT INTO "user" (id, email, name, email_verified, image, created_at, updated_at)
           VALUES (?, ?, ?, 0, NULL, ?, ?)
           RETURNING id, email, name, email_verified, image, created_at, updated_at"#,
    )
    .bind(&user_id)
    .bind(&new.email)
    .bind(&new.name)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            AuthError::UserAlreadyExists
        }
        other => AuthError::Store(other),
    })?;

    query(
        "INSERT INTO account (id, user_id, provider_id, password, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&user_id)
    .bind(CREDENTIAL_PROVIDER)
    .bind(password_hash)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    tracing::info!(user_id = %user_id, "User registered");
    User::try_from(row)
}

#[derive(sqlx::FromRow)]
struct CredentialRow {
    #[sqlx(flatten)]
    user: UserRow,
    password: Option<String>,
}

/// Looks up the user behind an email/password pair.
pub async fn verify_credentials(
    db: &SqlitePool,
    settings: &AuthSettings,
    credentials: &Credentials,
) -> Result<User, AuthError> {
    let row = query_as::<_, CredentialRow>(&format!(
        r#"SELECT {USER_COLUMNS}, a.password FROM "user" u
           JOIN account a ON a.user_id = u.id AND a.provider_id = ?
           WHERE u.email = ?"#
    ))
    .bind(CREDENTIAL_PROVIDER)
    .bind(&credentials.email)
    .fetch_optional(db)
    .await?;

    let Some(row) = row else {
        reject_password(&credentials.password, settings.password_iterations);
        return Err(AuthError::InvalidCredentials);
    };
    match row.password.as_deref() {
        Some(stored) if verify_password(&credentials.password, stored) => User::try_from(row.user),
        Some(_) => Err(AuthError::InvalidCredentials),
        None => {
            reject_password(&credentials.password, settings.password_iterations);
            Err(AuthError::InvalidCredentials)
        }
    }
}

pub async fn create_session(
    db: &SqlitePool,
    settings: &AuthSettings,
    user_id: &str,
    meta: SessionMeta,
) -> Result<Session, AuthError> {
    let token = URL_SAFE_NO_PAD.encode(random_bytes::<TOKEN_LEN>()?);
    let now = now_millis();
    let expires_at = now + settings.session_ttl.num_milliseconds();

    let pruned = query("DELETE FROM session WHERE expires_at <= ?")
        .bind(now)
        .execute(db)
        .await?
        .rows_affected();
    if pruned > 0 {
        tracing::debug!(pruned, "Removed expired sessions");
    }

    let row = query_as::<_, SessionRow>(&format!(
        "INSERT INTO session (id, token, user_id, expires_at, ip_address, user_agent, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING {SESSION_COLUMNS}"
    ))
    .bind(Uuid::new_v4().to_string())
    .bind(token)
    .bind(user_id)
    .bind(expires_at)
    .bind(meta.ip_address)
    .bind(meta.user_agent)
    .bind(now)
    .bind(now)
    .fetch_one(db)
    .await?;

    Session::try_from(row)
}

#[derive(sqlx::FromRow)]
struct SessionUserRow {
    #[sqlx(flatten)]
    user: UserRow,
    session_id: String,
    session_token: String,
    expires_at: i64,
    ip_address: Option<String>,
    user_agent: Option<String>,
    session_created_at: i64,
    session_updated_at: i64,
}

/// The unexpired session identified by `token`, with its user. An expired
/// session is deleted on sight.
pub async fn find_session(
    db: &SqlitePool,
    token: &str,
) -> Result<Option<(Session, User)>, AuthError> {
    let row = query_as::<_, SessionUserRow>(&format!(
        r#"SELECT {USER_COLUMNS}, s.id AS session_id, s.token AS session_token, s.expires_at,
                  s.ip_address, s.user_agent, s.created_at AS session_created_at,
                  s.updated_at AS session_updated_at
           FROM session s JOIN "user" u ON u.id = s.user_id
           WHERE s.token = ?"#
    ))
    .bind(token)
    .fetch_optional(db)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    if row.expires_at <= now_millis() {
        delete_session(db, token).await?;
        return Ok(None);
    }
    let session = Session::try_from(SessionRow {
        id: row.session_id,
        token: row.session_token,
        user_id: row.user.id.clone(),
        expires_at: row.expires_at,
        ip_address: row.ip_address,
        user_agent: row.user_agent,
        created_at: row.session_created_at,
        updated_at: row.session_updated_at,
    })?;
    Ok(Some((session, User::try_from(row.user)?)))
}

pub async fn delete_session(db: &SqlitePool, token: &str) -> Result<(), AuthError> {
    query("DELETE FROM session WHERE token = ?")
        .bind(token)
        .execute(db)
        .await?;
    Ok(())
}

/// Removes a user; accounts, sessions and todos go with it.
pub async fn delete_user(db: &SqlitePool, user_id: &str) -> Result<(), AuthError> {
    query(r#"DELETE FROM "user" WHERE id = ?"#)
        .bind(user_id)
        .execute(db)
        .await?;
    tracing::info!(user_id = %user_id, "User deleted");
    Ok(())
}

/// Resolves request headers to the signed-in user, if any.
pub async fn resolve_principal(
    db: &SqlitePool,
    settings: &AuthSettings,
    headers: &HeaderMap,
) -> Result<Option<CurrentUser>, AuthError> {
    let Some(token) = session_token(settings, headers) else {
        return Ok(None);
    };
    Ok(find_session(db, &token)
        .await?
        .map(|(_, user)| CurrentUser::from(&user)))
}
