use axum::{
    extract::{FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// JSON body extractor whose rejections are JSON 400s in the shape of `ApiError`.
pub struct AppJson<T>(pub T);

impl<T, S> FromRequest<S> for AppJson<T>
where
    T: serde::de::DeserializeOwned + 'static,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => {
                let message = format!("Invalid request body: {}", rejection.body_text());
                tracing::warn!("{}", message);
                let error_response = json!({
                    "message": message,
                    "status": 400
                });
                Err((StatusCode::BAD_REQUEST, Json(error_response)).into_response())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubmitResponseRequest;
    use axum::body::Body;

    #[tokio::test]
    async fn malformed_body_is_a_json_400() {
        let request = Request::builder()
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from("{\"response\": 42"))
            .unwrap();

        let rejection = AppJson::<SubmitResponseRequest>::from_request(request, &())
            .await
            .err()
            .expect("rejected");
        assert_eq!(rejection.status(), StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(rejection.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], 400);
        assert!(json["message"]
            .as_str()
            .unwrap()
            .starts_with("Invalid request body"));
    }

    #[tokio::test]
    async fn well_formed_body_is_extracted() {
        let request = Request::builder()
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from("{\"response\": \"925\"}"))
            .unwrap();

        let AppJson(parsed) = AppJson::<SubmitResponseRequest>::from_request(request, &())
            .await
            .ok()
            .expect("parsed");
        assert_eq!(parsed.response, "925");
    }
}
