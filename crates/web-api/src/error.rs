use application::ApplicationError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        let status = match &error {
            ApplicationError::Domain(_) => StatusCode::BAD_REQUEST,
            ApplicationError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ApplicationError::Authorization(_) => StatusCode::FORBIDDEN,
            ApplicationError::Broker(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApplicationError::Infrastructure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, error.code(), error.to_string())
    }
}

impl From<domain::DomainError> for ApiError {
    fn from(error: domain::DomainError) -> Self {
        ApplicationError::from(error).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use application::BrokerError;
    use domain::DomainError;

    #[test]
    fn application_errors_map_to_http_status() {
        let cases = [
            (
                ApplicationError::from(DomainError::validation_error("roomId", "too long")),
                StatusCode::BAD_REQUEST,
            ),
            (ApplicationError::authentication("bad token"), StatusCode::UNAUTHORIZED),
            (ApplicationError::authorization("not a member"), StatusCode::FORBIDDEN),
            (
                ApplicationError::from(BrokerError::unavailable("down")),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ApplicationError::infrastructure("redis"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(ApiError::from(error).into_response().status(), expected);
        }
    }
}
