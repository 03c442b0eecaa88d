//! User domain: registration and lookup.

use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;
use waypoint_core::messages::user as wire;
use waypoint_core::{decode_error, encode_error, AppError, DecodeError};

use super::{client_pipeline, invoke, server_pipeline};
use crate::service::call::{CallContext, CallError, Failer, IntoOutcome, ServiceError};
use crate::service::config::{ConfigError, ServiceConfig};
use crate::service::middleware::Pipeline;
use crate::service::operation::Operation;
use crate::storage::KeyValueStore;
use crate::transport::method::require_non_empty;
use crate::transport::{Channel, RpcMethod, RpcRouter};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A stored user, including credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub salt: String,
}

impl User {
    #[must_use]
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            username: self.username.clone(),
        }
    }

    /// Checks `password` against the stored salted hash.
    #[must_use]
    pub fn verify_password(&self, password: &str) -> bool {
        hash_password(&self.salt, password) == self.password_hash
    }
}

/// The public view of a user: what crosses the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserProfile {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UserError {
    #[error("Error missing {0}")]
    MissingField(&'static str),
    #[error("username already taken")]
    UsernameTaken,
    #[error("user not found")]
    NotFound,
}

impl From<UserError> for AppError {
    fn from(err: UserError) -> Self {
        AppError::from_display(&err)
    }
}

impl From<UserError> for ServiceError {
    fn from(err: UserError) -> Self {
        ServiceError::Application(err.into())
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Fields submitted when registering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub username: String,
    pub password: String,
}

impl RegisterRequest {
    /// Reports the first missing required field. Email is optional.
    ///
    /// # Errors
    ///
    /// Returns [`UserError::MissingField`] naming the field.
    pub fn validate(&self) -> Result<(), UserError> {
        let required = [
            ("FirstName", &self.first_name),
            ("LastName", &self.last_name),
            ("Username", &self.username),
            ("Password", &self.password),
        ];
        match required.iter().find(|(_, value)| value.is_empty()) {
            Some((name, _)) => Err(UserError::MissingField(*name)),
            None => Ok(()),
        }
    }
}

#[async_trait]
pub trait UserService: Send + Sync + 'static {
    async fn get_user(&self, ctx: CallContext, user_id: String) -> Result<UserProfile, ServiceError>;

    /// Registers a new user and returns its id.
    async fn register(&self, ctx: CallContext, req: RegisterRequest) -> Result<String, ServiceError>;
}

/// User service over two stores: users by id, and user ids by username.
pub struct BasicUserService {
    users: Arc<dyn KeyValueStore<User>>,
    usernames: Arc<dyn KeyValueStore<String>>,
}

impl BasicUserService {
    #[must_use]
    pub fn new(users: Arc<dyn KeyValueStore<User>>, usernames: Arc<dyn KeyValueStore<String>>) -> Self {
        Self { users, usernames }
    }
}

/// Hex SHA-256 of random bytes and the current time.
fn new_salt() -> String {
    let noise: [u8; 32] = rand::random();
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos());
    let mut hasher = Sha256::new();
    hasher.update(noise);
    hasher.update(nanos.to_le_bytes());
    hex::encode(hasher.finalize())
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

#[async_trait]
impl UserService for BasicUserService {
    async fn get_user(&self, _ctx: CallContext, user_id: String) -> Result<UserProfile, ServiceError> {
        let user = self.users.get(&user_id).ok_or(UserError::NotFound)?;
        Ok(user.profile())
    }

    async fn register(&self, _ctx: CallContext, req: RegisterRequest) -> Result<String, ServiceError> {
        req.validate()?;

        let id = uuid::Uuid::new_v4().to_string();
        if self.usernames.put_if_absent(&req.username, id.clone()).is_err() {
            return Err(UserError::UsernameTaken.into());
        }

        let salt = new_salt();
        let user = User {
            id: id.clone(),
            password_hash: hash_password(&salt, &req.password),
            salt,
            first_name: req.first_name,
            last_name: req.last_name,
            email: req.email,
            username: req.username,
        };
        self.users.put(&id, user);
        debug!(user_id = %id, "user registered");
        Ok(id)
    }
}

// ---------------------------------------------------------------------------
// Request / Response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetUserRequest {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetUserResponse {
    pub user: UserProfile,
    pub err: Option<AppError>,
}

impl From<Result<UserProfile, AppError>> for GetUserResponse {
    fn from(outcome: Result<UserProfile, AppError>) -> Self {
        match outcome {
            Ok(user) => Self { user, err: None },
            Err(e) => Self {
                user: UserProfile::default(),
                err: Some(e),
            },
        }
    }
}

impl Failer for GetUserResponse {
    fn failed(&self) -> Option<&AppError> {
        self.err.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterResponse {
    pub id: String,
    pub err: Option<AppError>,
}

impl From<Result<String, AppError>> for RegisterResponse {
    fn from(outcome: Result<String, AppError>) -> Self {
        match outcome {
            Ok(id) => Self { id, err: None },
            Err(e) => Self {
                id: String::new(),
                err: Some(e),
            },
        }
    }
}

impl Failer for RegisterResponse {
    fn failed(&self) -> Option<&AppError> {
        self.err.as_ref()
    }
}

// ---------------------------------------------------------------------------
// Endpoint operations
// ---------------------------------------------------------------------------

pub struct GetUserEndpoint {
    svc: Arc<dyn UserService>,
}

#[async_trait]
impl Operation<GetUserRequest> for GetUserEndpoint {
    type Response = GetUserResponse;

    async fn call(&self, ctx: CallContext, req: GetUserRequest) -> Result<GetUserResponse, CallError> {
        Ok(self.svc.get_user(ctx, req.user_id).await.into_outcome()?.into())
    }
}

pub struct RegisterEndpoint {
    svc: Arc<dyn UserService>,
}

#[async_trait]
impl Operation<RegisterRequest> for RegisterEndpoint {
    type Response = RegisterResponse;

    async fn call(&self, ctx: CallContext, req: RegisterRequest) -> Result<RegisterResponse, CallError> {
        Ok(self.svc.register(ctx, req).await.into_outcome()?.into())
    }
}

// ---------------------------------------------------------------------------
// Wire mapping
// ---------------------------------------------------------------------------

pub struct GetUserMethod;

impl RpcMethod for GetUserMethod {
    const NAME: &'static str = "GetUser";
    const PATH: &'static str = "/rpc/user/GetUser";

    type Request = GetUserRequest;
    type Response = GetUserResponse;
    type WireRequest = wire::GetUserRequest;
    type WireReply = wire::GetUserReply;

    fn decode_request(wire: wire::GetUserRequest) -> Result<GetUserRequest, DecodeError> {
        require_non_empty("userId", &wire.user_id)?;
        Ok(GetUserRequest {
            user_id: wire.user_id,
        })
    }

    fn encode_response(response: GetUserResponse) -> wire::GetUserReply {
        let err = encode_error(response.err.as_ref());
        let UserProfile {
            id,
            first_name,
            last_name,
            username,
        } = response.user;
        wire::GetUserReply {
            user: wire::UserRecord {
                id,
                first_name,
                last_name,
                username,
            },
            err,
        }
    }

    fn encode_request(request: GetUserRequest) -> wire::GetUserRequest {
        wire::GetUserRequest {
            user_id: request.user_id,
        }
    }

    fn decode_reply(wire: wire::GetUserReply) -> Result<GetUserResponse, DecodeError> {
        let err = decode_error(&wire.err);
        if err.is_none() {
            require_non_empty("user.id", &wire.user.id)?;
        }
        Ok(GetUserResponse {
            user: UserProfile {
                id: wire.user.id,
                first_name: wire.user.first_name,
                last_name: wire.user.last_name,
                username: wire.user.username,
            },
            err,
        })
    }
}

pub struct RegisterMethod;

impl RpcMethod for RegisterMethod {
    const NAME: &'static str = "Register";
    const PATH: &'static str = "/rpc/user/Register";

    type Request = RegisterRequest;
    type Response = RegisterResponse;
    type WireRequest = wire::RegisterRequest;
    type WireReply = wire::RegisterReply;

    fn decode_request(wire: wire::RegisterRequest) -> Result<RegisterRequest, DecodeError> {
        // Missing fields are reported by the service as application errors.
        Ok(RegisterRequest {
            first_name: wire.first_name,
            last_name: wire.last_name,
            email: wire.email,
            username: wire.username,
            password: wire.password,
        })
    }

    fn encode_response(response: RegisterResponse) -> wire::RegisterReply {
        wire::RegisterReply {
            err: encode_error(response.err.as_ref()),
            id: response.id,
        }
    }

    fn encode_request(request: RegisterRequest) -> wire::RegisterRequest {
        wire::RegisterRequest {
            first_name: request.first_name,
            last_name: request.last_name,
            email: request.email,
            username: request.username,
            password: request.password,
        }
    }

    fn decode_reply(wire: wire::RegisterReply) -> Result<RegisterResponse, DecodeError> {
        let err = decode_error(&wire.err);
        if err.is_none() {
            require_non_empty("id", &wire.id)?;
        }
        Ok(RegisterResponse { id: wire.id, err })
    }
}

// ---------------------------------------------------------------------------
// UserEndpoints
// ---------------------------------------------------------------------------

/// Pipelines for every user capability.
#[derive(Clone)]
pub struct UserEndpoints {
    get_user: Pipeline<GetUserRequest, GetUserResponse>,
    register: Pipeline<RegisterRequest, RegisterResponse>,
}

impl UserEndpoints {
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the server pipeline configuration is invalid.
    pub fn serve(svc: Arc<dyn UserService>, config: &ServiceConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            get_user: server_pipeline::<GetUserMethod, _>(
                GetUserEndpoint {
                    svc: Arc::clone(&svc),
                },
                config,
            )?,
            register: server_pipeline::<RegisterMethod, _>(RegisterEndpoint { svc }, config)?,
        })
    }

    /// # Errors
    ///
    /// Returns [`ConfigError`] if the client pipeline configuration is invalid.
    pub fn remote(channel: &Arc<dyn Channel>, config: &ServiceConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            get_user: client_pipeline::<GetUserMethod>(channel, config)?,
            register: client_pipeline::<RegisterMethod>(channel, config)?,
        })
    }

    #[must_use]
    pub fn mount(&self, router: RpcRouter) -> RpcRouter {
        router
            .route::<GetUserMethod>(self.get_user.clone())
            .route::<RegisterMethod>(self.register.clone())
    }
}

#[async_trait]
impl UserService for UserEndpoints {
    async fn get_user(&self, ctx: CallContext, user_id: String) -> Result<UserProfile, ServiceError> {
        let resp = invoke(&self.get_user, ctx, GetUserRequest { user_id }).await?;
        match resp.err {
            Some(e) => Err(e.into()),
            None => Ok(resp.user),
        }
    }

    async fn register(&self, ctx: CallContext, req: RegisterRequest) -> Result<String, ServiceError> {
        let resp = invoke(&self.register, ctx, req).await?;
        match resp.err {
            Some(e) => Err(e.into()),
            None => Ok(resp.id),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
