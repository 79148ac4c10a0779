use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransferEngineError>;

#[derive(Error, Debug)]
pub enum TransferEngineError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Request refused: {0}")]
    Refused(String),

    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<settlement::Error> for TransferEngineError {
    fn from(err: settlement::Error) -> Self {
        use settlement::Error as E;

        match err {
            E::Ledger(e) if e.is_input_error() => TransferEngineError::Validation(e.to_string()),
            E::Ledger(e) => TransferEngineError::Ledger(e.to_string()),
            E::Queue(e) => TransferEngineError::Queue(e.to_string()),
            E::Store(msg) => TransferEngineError::Internal(format!("metadata store: {}", msg)),
            E::Notification(msg) => TransferEngineError::Internal(format!("notification: {}", msg)),
            E::Rejected(msg) => TransferEngineError::Refused(msg),
            e @ (E::CurrencyNotFound(_) | E::AccountNotFound(_) | E::TransferNotFound(_)) => {
                TransferEngineError::NotFound(e.to_string())
            }
            E::Conflict(msg) => TransferEngineError::Conflict(msg),
            E::Validation(msg) | E::Config(msg) => TransferEngineError::Validation(msg),
            E::Provisioning(msg) => TransferEngineError::Provisioning(msg),
        }
    }
}

impl From<message_bus::Error> for TransferEngineError {
    fn from(err: message_bus::Error) -> Self {
        TransferEngineError::Queue(err.to_string())
    }
}

impl ResponseError for TransferEngineError {
    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();
        let error_message = self.to_string();

        HttpResponse::build(status_code).json(json!({
            "error": {
                "code": status_code.as_u16(),
                "message": error_message,
                "type": self.error_type()
            }
        }))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            TransferEngineError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TransferEngineError::Ledger(_) => StatusCode::BAD_GATEWAY,
            TransferEngineError::Queue(_) => StatusCode::BAD_GATEWAY,
            TransferEngineError::Validation(_) => StatusCode::BAD_REQUEST,
            TransferEngineError::NotFound(_) => StatusCode::NOT_FOUND,
            TransferEngineError::Conflict(_) => StatusCode::CONFLICT,
            TransferEngineError::Refused(_) => StatusCode::CONFLICT,
            TransferEngineError::Provisioning(_) => StatusCode::BAD_GATEWAY,
            TransferEngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl TransferEngineError {
    fn error_type(&self) -> &str {
        match self {
            TransferEngineError::Database(_) => "database_error",
            TransferEngineError::Ledger(_) => "ledger_error",
            TransferEngineError::Queue(_) => "messaging_error",
            TransferEngineError::Validation(_) => "validation_error",
            TransferEngineError::NotFound(_) => "not_found",
            TransferEngineError::Conflict(_) => "duplicate_error",
            TransferEngineError::Refused(_) => "refused",
            TransferEngineError::Provisioning(_) => "provisioning_error",
            TransferEngineError::Internal(_) => "internal_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settlement_errors_map_to_status_codes() {
        let cases = [
            (settlement::Error::CurrencyNotFound(840), StatusCode::NOT_FOUND),
            (settlement::Error::AccountNotFound(1), StatusCode::NOT_FOUND),
            (settlement::Error::Conflict("currency 840".into()), StatusCode::CONFLICT),
            (settlement::Error::Validation("code is required".into()), StatusCode::BAD_REQUEST),
            (settlement::Error::Store("timeout".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (settlement::Error::Provisioning("ledger down".into()), StatusCode::BAD_GATEWAY),
        ];

        for (err, expected) in cases {
            assert_eq!(TransferEngineError::from(err).status_code(), expected);
        }
    }

    #[test]
    fn test_error_body_shape() {
        let err = TransferEngineError::NotFound("Currency not found: 978".to_string());
        let response = err.error_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
