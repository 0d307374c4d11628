use crate::model::Id;
use sled::transaction::TransactionError;
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    User,
    Film,
    Genre,
    Mpa,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Entity::User => "User",
            Entity::Film => "Film",
            Entity::Genre => "Genre",
            Entity::Mpa => "MPA rating",
        })
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("{entity} with id {id} not found")]
    NotFound { entity: Entity, id: Id },

    #[error("User {user_id} is already friends with user {friend_id}")]
    AlreadyFriends { user_id: Id, friend_id: Id },

    #[error("User {user_id} already likes film {film_id}")]
    LikeAlreadyExists { film_id: Id, user_id: Id },

    #[error("User {user_id} has not liked film {film_id}")]
    LikeNotFound { film_id: Id, user_id: Id },

    #[error("User {0} cannot be friends with themselves")]
    SelfReference(Id),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl Error {
    pub fn not_found(entity: Entity, id: Id) -> Self {
        Error::NotFound { entity, id }
    }

    /// Storage, encoding and configuration failures, as opposed to errors
    /// caused by the request itself.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::Storage(_) | Error::Encoding(_) | Error::Corrupt(_)
        )
    }
}

/// Unwraps a sled transaction result, surfacing the aborting error as is.
pub fn settle<T>(result: std::result::Result<T, TransactionError<Error>>) -> Result<T> {
    result.map_err(|err| match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => Error::Storage(e),
    })
}
