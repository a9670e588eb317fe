//! HTTP surface: `GET /items`, `GET /items/{id}`, `POST /items`.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use sqlsplit::Context;

use crate::interactor::{ItemInteractor, ServiceError};

pub type HttpResponse = Response<Full<Bytes>>;

/// Upper bound for the database work of one request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct CreateItemRequest {
    name: String,
}

pub async fn handle<B>(
    req: Request<B>,
    interactor: Arc<ItemInteractor>,
) -> Result<HttpResponse, Infallible>
where
    B: Body,
    B::Error: std::fmt::Display,
{
    let ctx = Context::background().with_timeout(REQUEST_TIMEOUT);
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match route(&ctx, &method, &path, req, &interactor).await {
        Ok(response) => response,
        Err(error) => error_response(&error),
    };
    tracing::info!(%method, %path, status = response.status().as_u16(), "Request handled");
    Ok(response)
}

async fn route<B>(
    ctx: &Context,
    method: &Method,
    path: &str,
    req: Request<B>,
    interactor: &ItemInteractor,
) -> Result<HttpResponse, ServiceError>
where
    B: Body,
    B::Error: std::fmt::Display,
{
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match (method, segments.as_slice()) {
        (&Method::GET, ["items"]) => Ok(json(StatusCode::OK, &interactor.list(ctx).await?)),
        (&Method::GET, ["items", id]) => Ok(json(StatusCode::OK, &interactor.get(ctx, id).await?)),
        (&Method::POST, ["items"]) => {
            let body = req
                .into_body()
                .collect()
                .await
                .map_err(|e| ServiceError::Validation(format!("unreadable body: {e}")))?
                .to_bytes();
            let input: CreateItemRequest = serde_json::from_slice(&body)
                .map_err(|e| ServiceError::Validation(e.to_string()))?;
            let item = interactor.create(ctx, &input.name).await?;
            Ok(json(StatusCode::CREATED, &item))
        }
        _ => Ok(json(
            StatusCode::NOT_FOUND,
            &serde_json::json!({ "error": "no such route" }),
        )),
    }
}

fn json<T: Serialize>(status: StatusCode, value: &T) -> HttpResponse {
    let (status, body) = match serde_json::to_vec(value) {
        Ok(body) => (status, body),
        Err(error) => {
            tracing::error!(%error, "Failed to encode response");
            (StatusCode::INTERNAL_SERVER_ERROR, b"{}".to_vec())
        }
    };
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn error_response(error: &ServiceError) -> HttpResponse {
    let status = match error {
        ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
        ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::Database(db) => {
            tracing::error!(error = %db, "Database call failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    json(status, &serde_json::json!({ "error": error.to_string() }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interactor::tests::interactor;

    fn request(method: &str, uri: &str, body: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Full::new(Bytes::from(body.to_string())))
            .unwrap()
    }

    async fn body_json(response: HttpResponse) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_create_then_fetch() {
        let interactor = Arc::new(interactor());

        let created = handle(
            request("POST", "/items", r#"{"name":"widget"}"#),
            interactor.clone(),
        )
        .await
        .unwrap();
        assert_eq!(created.status(), StatusCode::CREATED);
        assert_eq!(created.headers()[CONTENT_TYPE], "application/json");
        let created = body_json(created).await;
        let id = created["id"].as_str().unwrap().to_string();

        let fetched = handle(request("GET", &format!("/items/{id}"), ""), interactor.clone())
            .await
            .unwrap();
        assert_eq!(fetched.status(), StatusCode::OK);
        assert_eq!(body_json(fetched).await["name"], "widget");

        let listed = handle(request("GET", "/items", ""), interactor)
            .await
            .unwrap();
        assert_eq!(body_json(listed).await.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let interactor = Arc::new(interactor());

        let response = handle(request("POST", "/items", "not json"), interactor.clone())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = handle(request("POST", "/items", r#"{"name":""}"#), interactor.clone())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = handle(request("GET", "/items/unknown", ""), interactor.clone())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = handle(request("DELETE", "/items", ""), interactor)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
