//! User service messages.

use serde::{Deserialize, Serialize};

/// Public projection of a stored user.
///
/// Email, password hash and salt never leave the server.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
}

/// Request for `user.GetUser`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetUserRequest {
    pub user_id: String,
}

/// Reply for `user.GetUser`.
///
/// `user` is always present; it is the default (empty) record when `err` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetUserReply {
    pub user: UserRecord,
    pub err: String,
}

/// Request for `user.Register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub username: String,
    pub password: String,
}

/// Reply for `user.Register`. `id` is empty when `err` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterReply {
    pub id: String,
    pub err: String,
}
