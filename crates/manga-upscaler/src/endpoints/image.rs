use anyhow::Context;
use axum::body::Body;
use axum::extract;
use axum::http::header;
use axum::response::Response;
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use upscaler_service::service::{ImageRequest, UpscaleService};

use super::ResponseError;

/// Upscaled images never change, clients may keep them for 30 days.
const CACHE_CONTROL: &str = "max-age=2592000";

/// Where the requested image belongs.
#[derive(Debug, Default, Deserialize)]
pub struct ImageQuery {
    chapter: Option<String>,
    page: Option<String>,
}

pub async fn upscale_image(
    extract::State(service): extract::State<UpscaleService>,
    extract::Path(encoded): extract::Path<String>,
    extract::Query(query): extract::Query<ImageQuery>,
) -> Result<Response, ResponseError> {
    sentry::configure_scope(|scope| {
        scope.set_transaction(Some("GET /{encoded}"));
    });

    let request = ImageRequest::decode(&encoded, query.chapter, query.page)?;
    tracing::debug!(url = %request.url, hints = ?request.hints, "Requested image");

    let path = service.resolve(request).await?;

    // The image may have been evicted in the meantime.
    let file = tokio::fs::File::open(&path)
        .await
        .context("failed to open upscaled image")?;
    let len = file
        .metadata()
        .await
        .context("failed to open upscaled image")?
        .len();

    Ok(Response::builder()
        .header(header::CONTENT_TYPE, "image/png")
        .header(header::CONTENT_LENGTH, len)
        .header(header::CACHE_CONTROL, CACHE_CONTROL)
        .body(Body::from_stream(ReaderStream::new(file)))?)
}
