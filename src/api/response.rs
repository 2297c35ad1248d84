use axum::{
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;

#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: &T, mut headers: HeaderMap) -> Response {
    let json = match serde_json::to_string(body) {
        Ok(json) => json,
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    (status, headers, json).into_response()
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        json_response(StatusCode::OK, &self, HeaderMap::new())
    }
}

/// `201 Created` with the created resource as `data`.
pub fn created<T: Serialize>(data: T) -> Response {
    json_response(StatusCode::CREATED, &ApiResponse { data }, HeaderMap::new())
}

pub fn with_total_count<T: Serialize>(data: T, count: i64) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("X-Total-Count", HeaderValue::from(count));
    json_response(StatusCode::OK, &ApiResponse { data }, headers)
}
