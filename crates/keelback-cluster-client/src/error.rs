// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Errors raised while talking to cluster nodes.

use reqwest::StatusCode;

/// Error raised during communication with a node.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct NodeError {
    #[from]
    kind: Kind,
}

impl NodeError {
    /// Returns the HTTP error status code associated with the error, if any.
    pub fn http_status_code(&self) -> Option<StatusCode> {
        match &self.kind {
            Kind::Reqwest(inner) => inner.status(),
            Kind::Status { code, .. } => StatusCode::from_u16(*code).ok(),
            _ => None,
        }
    }

    pub(crate) fn reqwest(err: reqwest::Error) -> Self {
        Kind::Reqwest(err).into()
    }

    pub(crate) fn bcs(err: bcs::Error) -> Self {
        Kind::Bcs(err).into()
    }

    pub(crate) fn io(err: std::io::Error) -> Self {
        Kind::Io(err).into()
    }

    pub(crate) fn status(code: u16, message: String) -> Self {
        Kind::Status { code, message }.into()
    }

    pub(crate) fn unknown_store(store_id: u64) -> Self {
        Kind::UnknownStore(store_id).into()
    }

    /// Wraps an arbitrary error raised while interacting with a node.
    pub fn other<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Kind::Other(err.into()).into()
    }
}

/// Errors returned during the communication with a cluster node.
#[derive(Debug, thiserror::Error)]
pub(crate) enum Kind {
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error("failed to decode the response body")]
    Bcs(#[from] bcs::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("node returned status {code}: {message}")]
    Status { code: u16, message: String },
    #[error("store {0} is not known to this client")]
    UnknownStore(u64),
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

/// Errors raised while constructing a client.
#[derive(Debug, thiserror::Error)]
pub enum ClientBuildError {
    #[error("invalid endpoint url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
}

impl ClientBuildError {
    pub(crate) fn invalid_url(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}
