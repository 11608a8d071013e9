use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::auth::password::{hash_password, verify_password, MIN_PASSWORD_LEN};
use crate::auth::session;
use crate::db::is_unique_violation;
use crate::db::models::User;
use crate::error::{AppError, AppResult};
use crate::extractors::{session_token, CurrentUser};
use crate::routes::users::fetch_user;
use crate::state::AppState;

// -- Request types --

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    /// Username or email address
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct AuthResponse {
    pub user: User,
    pub token: String,
}

// -- Cookie helpers --

fn session_cookie(name: &str, token: &str, max_age_hours: u64) -> String {
    let max_age_secs = max_age_hours * 3600;
    format!(
        "{}={}; HttpOnly; SameSite=Strict; Path=/; Max-Age={}",
        name, token, max_age_secs
    )
}

fn clear_session_cookie(name: &str) -> String {
    format!("{}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0", name)
}

fn authenticated(state: &AppState, status: StatusCode, user: User, token: String) -> Response {
    let cookie = session_cookie(
        &state.config.auth.cookie_name,
        &token,
        state.config.auth.session_hours,
    );
    (
        status,
        [(header::SET_COOKIE, cookie)],
        Json(AuthResponse { user, token }),
    )
        .into_response()
}

fn validate_username(username: &str) -> AppResult<()> {
    if !(3..=30).contains(&username.chars().count()) {
        return Err(AppError::BadRequest(
            "Username must be between 3 and 30 characters".into(),
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(AppError::BadRequest(
            "Username may only contain letters, digits, '_' and '-'".into(),
        ));
    }
    Ok(())
}

fn validate_email(email: &str) -> AppResult<()> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(AppError::BadRequest("A valid email is required".into())),
    }
}

// -- Handlers --

/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> AppResult<Response> {
    let username = req.username.trim().to_string();
    let email = req.email.trim().to_lowercase();
    validate_username(&username)?;
    validate_email(&email)?;
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    let display_name = req
        .display_name
        .as_deref()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let password_hash = hash_password(req.password, state.config.auth.bcrypt_cost).await?;
    let user_id = uuid::Uuid::now_v7().to_string();

    let conn = state.db.get()?;
    let inserted = conn.execute(
        "INSERT INTO users (id, username, email, password_hash, display_name)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![user_id, username, email, password_hash, display_name],
    );
    match inserted {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => {
            return Err(AppError::Conflict(
                "Username or email is already registered".into(),
            ))
        }
        Err(e) => return Err(e.into()),
    }

    let token = session::create_session(&conn, &user_id, state.config.auth.session_hours)?;
    let user = fetch_user(&conn, &user_id)?.ok_or(AppError::NotFound)?;

    tracing::info!(user = %user.id, "User registered: {}", user.username);
    Ok(authenticated(&state, StatusCode::CREATED, user, token))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> AppResult<Response> {
    let login = req.username.trim().to_string();

    let found: Option<(String, String)> = {
        let conn = state.db.get()?;
        conn.query_row(
            "SELECT id, password_hash FROM users WHERE username = ?1 OR email = ?2",
            params![login, login.to_lowercase()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?
    };

    let Some((user_id, password_hash)) = found else {
        return Err(AppError::Unauthorized);
    };
    if !verify_password(req.password, password_hash).await? {
        tracing::warn!("Failed login for {}", login);
        return Err(AppError::Unauthorized);
    }

    let conn = state.db.get()?;
    let purged = session::purge_expired(&conn)?;
    if purged > 0 {
        tracing::debug!(purged, "Expired sessions removed");
    }
    let token = session::create_session(&conn, &user_id, state.config.auth.session_hours)?;
    let user = fetch_user(&conn, &user_id)?.ok_or(AppError::NotFound)?;

    Ok(authenticated(&state, StatusCode::OK, user, token))
}

/// POST /api/auth/logout
pub async fn logout(
    State(state): State<AppState>,
    _user: CurrentUser,
    headers: HeaderMap,
) -> AppResult<Response> {
    if let Some(token) = session_token(&headers, &state.config.auth.cookie_name) {
        let conn = state.db.get()?;
        session::delete_session(&conn, token)?;
    }

    Ok((
        StatusCode::NO_CONTENT,
        [(
            header::SET_COOKIE,
            clear_session_cookie(&state.config.auth.cookie_name),
        )],
    )
        .into_response())
}

/// GET /api/auth/me
pub async fn me(State(state): State<AppState>, user: CurrentUser) -> AppResult<Json<User>> {
    let conn = state.db.get()?;
    let user = fetch_user(&conn, &user.id)?.ok_or(AppError::NotFound)?;
    Ok(Json(user))
}
