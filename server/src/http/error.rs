use axum::{Json, http::StatusCode, response::IntoResponse};
use serde_json::json;
use sip_core::error::{ContractInteractionErrorKind, RpcErrorKind, SipError};

/// SipError paired with an HTTP status
#[derive(Debug)]
pub struct ApiSipError(pub SipError);

impl From<SipError> for ApiSipError {
    fn from(error: SipError) -> Self {
        ApiSipError(error)
    }
}

impl IntoResponse for ApiSipError {
    fn into_response(self) -> axum::response::Response {
        let code = self.status_code();

        self.with_status(code)
    }
}

impl ApiSipError {
    fn with_status(self, status: StatusCode) -> axum::response::Response {
        (
            status,
            Json(json!({
                "error": {
                    "message": self.0.to_string(),
                    "details": self.0
                }
            })),
        )
            .into_response()
    }

    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            SipError::RpcError { kind, .. } => match kind {
                RpcErrorKind::NodeError { .. }
                | RpcErrorKind::NullResponse
                | RpcErrorKind::Payload { .. } => StatusCode::BAD_GATEWAY,
                RpcErrorKind::HttpStatus { status, .. } => {
                    StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
                }
                RpcErrorKind::Connection { .. } => StatusCode::SERVICE_UNAVAILABLE,
            },
            SipError::RpcConfigError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            SipError::ContractInteractionError { kind, .. } => match kind {
                ContractInteractionErrorKind::ZeroData { .. } => StatusCode::NOT_FOUND,
                ContractInteractionErrorKind::TransportError { .. } => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            SipError::HistoryError { .. } | SipError::DiscoveryFailed { .. } => {
                StatusCode::BAD_GATEWAY
            }
            SipError::InvalidPlanRecord { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            SipError::ValidationError { .. } | SipError::DecodeError { .. } => {
                StatusCode::BAD_REQUEST
            }
            SipError::RegistryError { .. } | SipError::InternalError { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

pub trait SipResult<T> {
    fn api_error(self) -> Result<T, ApiSipError>;
}

impl<T, E: Into<SipError>> SipResult<T> for Result<T, E> {
    fn api_error(self) -> Result<T, ApiSipError> {
        self.map_err(|e| ApiSipError(e.into()))
    }
}
