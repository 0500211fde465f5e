//! `POST /download` body extraction
//!
//! [`DownloadRequest`] is taken straight from the request: the media type
//! must be JSON, and the (already decompressed) body may not exceed
//! `server.max_request_bytes`.

use axum::{
    body::Body,
    extract::{FromRequest, Request},
    http::header::CONTENT_TYPE,
};
use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};

use super::{error::ApiError, models::DownloadRequest, state::AppState};

impl FromRequest<AppState> for DownloadRequest {
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        require_json(content_type.as_deref())?;

        let body = read_limited(req.into_body(), state.config.server.max_request_bytes).await?;
        decode(&body)
    }
}

/// `application/json`, parameters such as `charset` allowed
fn require_json(content_type: Option<&str>) -> Result<(), ApiError> {
    let content_type = content_type
        .ok_or_else(|| ApiError::InvalidPayload("missing Content-Type header".into()))?;
    let media_type: mime::Mime = content_type
        .parse()
        .map_err(|_| ApiError::InvalidPayload(format!("invalid Content-Type: {content_type}")))?;

    if media_type.type_() != mime::APPLICATION || media_type.subtype() != mime::JSON {
        return Err(ApiError::InvalidPayload(format!(
            "Content-Type must be application/json, got: {}",
            media_type.essence_str()
        )));
    }
    Ok(())
}

async fn read_limited(body: Body, limit: usize) -> Result<Bytes, ApiError> {
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<LengthLimitError>() => Err(ApiError::PayloadTooLarge(limit)),
        Err(e) => Err(ApiError::InvalidPayload(e.to_string())),
    }
}

fn decode(body: &[u8]) -> Result<DownloadRequest, ApiError> {
    let request: DownloadRequest = serde_json::from_slice(body)?;
    if request.url.trim().is_empty() {
        return Err(ApiError::InvalidPayload("url must not be empty".into()));
    }
    Ok(request)
}
