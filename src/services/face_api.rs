use async_trait::async_trait;
use base64::Engine;
use image::RgbImage;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::time::Duration;

use crate::models::student::EncodingVector;

/// Detects faces in a frame and returns one encoding per face.
#[async_trait]
pub trait FaceEncoder: Send + Sync {
    async fn encode_faces(&self, frame: RgbImage) -> Result<Vec<EncodingVector>, FaceApiError>;
}

/// Client for the face recognition service.
///
/// Frames are sent JPEG-encoded; the service runs detection with the
/// requested model and answers with a 128-d encoding per face, ordered as the
/// faces were located.
pub struct FaceApiClient {
    http: Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct EncodeRequest<'a> {
    image: String,
    model: &'a str,
}

#[derive(Deserialize)]
struct EncodeResponse {
    faces: Vec<DetectedFace>,
}

#[derive(Deserialize)]
struct DetectedFace {
    /// top, right, bottom, left in frame pixels
    #[allow(dead_code)]
    location: [u32; 4],
    encoding: EncodingVector,
}

impl FaceApiClient {
    pub fn new(base_url: &str, model: &str) -> Result<Self, FaceApiError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(FaceApiError::Http)?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    /// Check the face service is reachable (for health checks).
    pub async fn health_check(&self) -> Result<(), FaceApiError> {
        let url = format!("{}/health", self.base_url);
        let response = self.http.get(&url).send().await.map_err(FaceApiError::Http)?;
        if !response.status().is_success() {
            return Err(FaceApiError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl FaceEncoder for FaceApiClient {
    async fn encode_faces(&self, frame: RgbImage) -> Result<Vec<EncodingVector>, FaceApiError> {
        let jpeg = tokio::task::spawn_blocking(move || encode_jpeg(&frame))
            .await
            .map_err(|e| FaceApiError::Worker(e.to_string()))??;

        let url = format!("{}/v1/encodings", self.base_url);
        let body = EncodeRequest {
            image: base64::engine::general_purpose::STANDARD.encode(&jpeg),
            model: &self.model,
        };

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(FaceApiError::Http)?;

        if !response.status().is_success() {
            return Err(FaceApiError::Status(response.status().as_u16()));
        }

        let parsed: EncodeResponse = response.json().await.map_err(FaceApiError::Http)?;
        Ok(parsed.faces.into_iter().map(|f| f.encoding).collect())
    }
}

fn encode_jpeg(frame: &RgbImage) -> Result<Vec<u8>, FaceApiError> {
    let mut buf = Cursor::new(Vec::new());
    frame
        .write_to(&mut buf, image::ImageFormat::Jpeg)
        .map_err(FaceApiError::Image)?;
    Ok(buf.into_inner())
}

#[derive(Debug, thiserror::Error)]
pub enum FaceApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Face service returned status {0}")]
    Status(u16),

    #[error("Image encoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("Encoding task failed: {0}")]
    Worker(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_jpeg_produces_jpeg() {
        let frame = RgbImage::from_pixel(16, 8, image::Rgb([120, 40, 200]));
        let bytes = encode_jpeg(&frame).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), image::ImageFormat::Jpeg);
    }

    #[test]
    fn test_response_parsing() {
        let body = r#"{"faces":[{"location":[10,60,70,5],"encoding":[0.1,-0.2,0.3]}]}"#;
        let parsed: EncodeResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.faces.len(), 1);
        assert_eq!(parsed.faces[0].encoding, vec![0.1, -0.2, 0.3]);
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = FaceApiClient::new("http://faces.local:8500/", "hog").unwrap();
        assert_eq!(client.base_url, "http://faces.local:8500");
    }
}
