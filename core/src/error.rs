use alloy::transports::{RpcError as AlloyRpcError, TransportErrorKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RpcErrorKind {
    /// Server returned an error response.
    #[error("server returned an error response (code {code}): {message}")]
    ErrorResp {
        code: i64,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<String>,
    },

    /// Server returned a null response when a non-null response was expected.
    #[error("server returned a null response when a non-null response was expected")]
    NullResp,

    #[error("unsupported feature: {message}")]
    UnsupportedFeature { message: String },

    /// Returned when a local pre-processing step fails.
    #[error("local usage error: {message}")]
    InternalError { message: String },

    #[error("serialization error: {message}")]
    SerError { message: String },

    #[error("deserialization error: {message}, text: {text}")]
    DeserError { message: String, text: String },

    #[error("HTTP error {status} with body: {body}")]
    TransportHttpError { status: u16, body: String },

    #[error("transport error: {message}")]
    OtherTransportError { message: String },
}

/// Error returned by every chain-side collaborator call.
#[derive(Debug, Error, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainError {
    #[error("RPC error on network {network}: {message}")]
    RpcError {
        network: String,
        message: String,
        kind: RpcErrorKind,
    },

    #[error("{what} was not found")]
    NotFound { what: String },

    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl ChainError {
    /// Raw provider text for this error, used for broadcast classification.
    pub fn message(&self) -> String {
        match self {
            ChainError::RpcError { kind, .. } => match kind {
                RpcErrorKind::ErrorResp { message, .. } => message.clone(),
                other => other.to_string(),
            },
            other => other.to_string(),
        }
    }
}

fn to_chain_rpc_error_kind(err: &AlloyRpcError<TransportErrorKind>) -> RpcErrorKind {
    match err {
        AlloyRpcError::ErrorResp(err) => RpcErrorKind::ErrorResp {
            code: err.code,
            message: err.message.to_string(),
            data: err.data.as_ref().map(|data| data.to_string()),
        },
        AlloyRpcError::NullResp => RpcErrorKind::NullResp,
        AlloyRpcError::UnsupportedFeature(feature) => RpcErrorKind::UnsupportedFeature {
            message: feature.to_string(),
        },
        AlloyRpcError::LocalUsageError(err) => RpcErrorKind::InternalError {
            message: err.to_string(),
        },
        AlloyRpcError::SerError(err) => RpcErrorKind::SerError {
            message: err.to_string(),
        },
        AlloyRpcError::DeserError { err, text } => RpcErrorKind::DeserError {
            message: err.to_string(),
            text: text.to_string(),
        },
        AlloyRpcError::Transport(err) => match err {
            TransportErrorKind::HttpError(err) => RpcErrorKind::TransportHttpError {
                status: err.status,
                body: err.body.to_string(),
            },
            _ => RpcErrorKind::OtherTransportError {
                message: err.to_string(),
            },
        },
    }
}

pub trait AlloyRpcErrorToChainError {
    fn to_chain_error(&self, network: &str) -> ChainError;
}

impl AlloyRpcErrorToChainError for AlloyRpcError<TransportErrorKind> {
    fn to_chain_error(&self, network: &str) -> ChainError {
        ChainError::RpcError {
            network: network.to_string(),
            message: self.to_string(),
            kind: to_chain_rpc_error_kind(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_resp_message_is_the_provider_text() {
        let err = ChainError::RpcError {
            network: "1".to_string(),
            message: "server returned an error response: error code -32000: nonce too low"
                .to_string(),
            kind: RpcErrorKind::ErrorResp {
                code: -32000,
                message: "nonce too low".to_string(),
                data: None,
            },
        };

        assert_eq!(err.message(), "nonce too low");
    }

    #[test]
    fn serializes_with_type_tag() {
        let err = ChainError::NotFound {
            what: "block 7".to_string(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["type"], "NOT_FOUND");
        assert_eq!(json["what"], "block 7");
    }
}
