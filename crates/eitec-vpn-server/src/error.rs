use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use eitec_vpn_core::command::CommandError;
use eitec_vpn_core::telemetry::TelemetryError;

use crate::db::StoreError;

/// Domain errors surfaced by the interface manager, peer registry and
/// reconciler.
#[derive(Debug, thiserror::Error)]
pub enum VpnError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("capacity exceeded: {0}")]
    Capacity(String),

    #[error("{0}")]
    StateConflict(String),

    #[error("interface not found")]
    InterfaceNotFound,

    #[error("module not found")]
    ModuleNotFound,

    #[error("user vpn not found")]
    UserNotFound,

    #[error("command failed: {output}")]
    CommandFailed { output: String },

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// HTTP-facing error; every variant renders the `{code, message, data}`
/// envelope with `code` mirroring the status.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("{0}")]
    Internal(String),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "code": self.status_code().as_u16(),
            "message": self.to_string(),
            "data": serde_json::Value::Null,
        }))
    }
}

impl From<VpnError> for ApiError {
    fn from(err: VpnError) -> Self {
        match err {
            VpnError::Validation(msg) | VpnError::Capacity(msg) | VpnError::StateConflict(msg) => {
                Self::BadRequest(msg)
            }
            VpnError::InterfaceNotFound | VpnError::ModuleNotFound | VpnError::UserNotFound => {
                Self::NotFound
            }
            VpnError::Store(StoreError::NotFound) => Self::NotFound,
            VpnError::Store(StoreError::PoolExhausted { network }) => {
                Self::BadRequest(format!("no available addresses in network {network}"))
            }
            VpnError::Store(StoreError::AddressUnavailable { address }) => {
                Self::BadRequest(format!("address {address} is not available"))
            }
            other => {
                tracing::error!(error = %other, "internal error");
                Self::Internal(other.to_string())
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::from(VpnError::Store(err))
    }
}
