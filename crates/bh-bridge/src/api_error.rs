//! HTTP API error types.
//!
//! Wraps the shared error taxonomy and implements Axum's `IntoResponse` so
//! every handler failure renders the `{detail, code, fields?}` body with the
//! right status.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bh_api_types::ErrorBody;
use bh_core::Error;

#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl From<bh_store::StoreError> for ApiError {
    fn from(err: bh_store::StoreError) -> Self {
        ApiError(err.into())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            Error::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(detail = %self.0, "internal error");
        }
        let fields = match &self.0 {
            Error::Conflict { fields, .. } => fields.clone(),
            _ => None,
        };
        let body = ErrorBody {
            detail: self.0.to_string(),
            code: Some(self.0.code().to_string()),
            fields,
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn conflict_renders_fields() {
        let err = ApiError(Error::conflict_with(
            "bd-12 is claimed by alice",
            serde_json::json!({"claimants": [{"alias": "alice"}]}),
        ));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["detail"], "bd-12 is claimed by alice");
        assert_eq!(body["code"], "conflict");
        assert_eq!(body["fields"]["claimants"][0]["alias"], "alice");
    }

    #[tokio::test]
    async fn status_mapping_covers_taxonomy() {
        for (err, status) in [
            (Error::Validation("x".into()), StatusCode::BAD_REQUEST),
            (Error::Unauthenticated("x".into()), StatusCode::UNAUTHORIZED),
            (Error::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (Error::NotFound("x".into()), StatusCode::NOT_FOUND),
            (Error::conflict("x"), StatusCode::CONFLICT),
            (
                Error::PreconditionFailed("x".into()),
                StatusCode::PRECONDITION_FAILED,
            ),
            (Error::Unavailable("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (Error::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ] {
            assert_eq!(ApiError(err).status(), status);
        }
    }
}
