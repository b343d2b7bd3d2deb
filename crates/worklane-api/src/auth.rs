use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use uuid::Uuid;

use worklane_types::api::{
    Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse,
};
use worklane_types::models::UserRole;

use crate::AppState;
use crate::error::ApiError;

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // Validate input
    if !req.email.contains('@') || req.email.len() > 254 {
        return Err(ApiError::Validation("Invalid email address".into()));
    }
    if req.full_name.trim().is_empty() || req.full_name.len() > 100 {
        return Err(ApiError::Validation("Invalid full name".into()));
    }
    if req.password.len() < 8 {
        return Err(ApiError::Validation("Password must be at least 8 characters".into()));
    }

    // Check if email is taken
    if state.db.get_user_by_email(&req.email)?.is_some() {
        return Err(ApiError::Conflict("Email already registered".into()));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| ApiError::Storage(anyhow::anyhow!("password hashing failed: {}", e)))?
        .to_string();

    let user_id = Uuid::new_v4();
    let role = role_str(req.role);

    state.db.create_user(
        &user_id.to_string(),
        &req.email,
        req.full_name.trim(),
        role,
        &password_hash,
    )?;

    let token = create_token(&state.jwt_secret, user_id, req.full_name.trim(), req.role)
        .map_err(ApiError::Storage)?;

    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id, token })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .db
        .get_user_by_email(&req.email)?
        .ok_or(ApiError::Unauthorized)?;

    // Verify password
    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| ApiError::Storage(anyhow::anyhow!("corrupt password hash: {}", e)))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthorized)?;

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|e| ApiError::Storage(anyhow::anyhow!("corrupt user id '{}': {}", user.id, e)))?;

    let role = parse_role(&user.role)
        .ok_or_else(|| ApiError::Storage(anyhow::anyhow!("corrupt role '{}'", user.role)))?;

    let token =
        create_token(&state.jwt_secret, user_id, &user.full_name, role).map_err(ApiError::Storage)?;

    Ok(Json(LoginResponse {
        user_id,
        full_name: user.full_name,
        role,
        token,
    }))
}

fn role_str(role: UserRole) -> &'static str {
    match role {
        UserRole::Client => "client",
        UserRole::Freelancer => "freelancer",
    }
}

pub(crate) fn parse_role(raw: &str) -> Option<UserRole> {
    match raw {
        "client" => Some(UserRole::Client),
        "freelancer" => Some(UserRole::Freelancer),
        _ => None,
    }
}

fn create_token(
    secret: &str,
    user_id: Uuid,
    full_name: &str,
    role: UserRole,
) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        full_name: full_name.to_string(),
        role,
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
