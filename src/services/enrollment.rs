use garde::Validate;
use std::sync::Arc;

use crate::db::StoreError;
use crate::models::student::{EncodingVector, EnrollmentRequest};
use crate::services::face_api::{FaceApiError, FaceEncoder};
use crate::services::roster::{Roster, StudentRecord};

/// What an enrollment stored.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrollmentSummary {
    pub student_id: String,
    pub encodings: usize,
    pub images_without_face: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum EnrollmentError {
    #[error("Invalid enrollment: {0}")]
    Invalid(String),

    #[error("Student {0} is already enrolled")]
    AlreadyEnrolled(String),

    #[error("No images provided")]
    NoImages,

    #[error("Image {index} could not be decoded: {source}")]
    BadImage {
        index: usize,
        #[source]
        source: image::ImageError,
    },

    #[error("Face service error: {0}")]
    FaceApi(#[from] FaceApiError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for EnrollmentError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(id) => EnrollmentError::AlreadyEnrolled(id),
            other => EnrollmentError::Store(other),
        }
    }
}

/// Turns enrollment photos into reference encodings and stores the student.
pub struct Enroller {
    roster: Arc<dyn Roster>,
    encoder: Arc<dyn FaceEncoder>,
}

impl Enroller {
    pub fn new(roster: Arc<dyn Roster>, encoder: Arc<dyn FaceEncoder>) -> Self {
        Self { roster, encoder }
    }

    /// Encodes the first face found in each image. Images without a face add nothing.
    pub async fn enroll(
        &self,
        request: EnrollmentRequest,
        images: Vec<Vec<u8>>,
    ) -> Result<EnrollmentSummary, EnrollmentError> {
        request
            .validate()
            .map_err(|e| EnrollmentError::Invalid(e.to_string()))?;

        if images.is_empty() {
            return Err(EnrollmentError::NoImages);
        }

        if self.roster.is_enrolled(&request.student_id).await? {
            return Err(EnrollmentError::AlreadyEnrolled(request.student_id));
        }

        let mut encodings: Vec<EncodingVector> = Vec::new();
        let mut images_without_face = 0;
        for (index, bytes) in images.iter().enumerate() {
            let frame = image::load_from_memory(bytes)
                .map_err(|source| EnrollmentError::BadImage { index, source })?
                .to_rgb8();

            match self.encoder.encode_faces(frame).await?.into_iter().next() {
                Some(encoding) => encodings.push(encoding),
                None => {
                    tracing::debug!(student_id = %request.student_id, index, "No face in enrollment image");
                    images_without_face += 1;
                }
            }
        }

        let summary = EnrollmentSummary {
            student_id: request.student_id.clone(),
            encodings: encodings.len(),
            images_without_face,
        };

        self.roster
            .enroll(StudentRecord {
                student_id: request.student_id,
                group_id: request.group_id,
                name: request.name,
                email: request.email,
                encodings,
            })
            .await?;

        tracing::info!(
            student_id = %summary.student_id,
            encodings = summary.encodings,
            images_without_face,
            "Student enrolled"
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::roster::StaticRoster;
    use async_trait::async_trait;
    use image::{ImageFormat, RgbImage};
    use std::io::Cursor;

    /// Reports one face for bright images and none for dark ones.
    struct BrightnessEncoder;

    #[async_trait]
    impl FaceEncoder for BrightnessEncoder {
        async fn encode_faces(&self, frame: RgbImage) -> Result<Vec<EncodingVector>, FaceApiError> {
            let level = frame.get_pixel(0, 0)[0] as f64;
            if level > 127.0 {
                Ok(vec![vec![level / 255.0; 4], vec![0.0; 4]])
            } else {
                Ok(Vec::new())
            }
        }
    }

    fn png(level: u8) -> Vec<u8> {
        let img = RgbImage::from_pixel(8, 8, image::Rgb([level, level, level]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn request(id: &str) -> EnrollmentRequest {
        EnrollmentRequest {
            student_id: id.to_string(),
            group_id: "10A".to_string(),
            name: "Asha".to_string(),
            email: "asha@example.edu".to_string(),
        }
    }

    fn enroller() -> (Arc<StaticRoster>, Enroller) {
        let roster = Arc::new(StaticRoster::default());
        let enroller = Enroller::new(roster.clone(), Arc::new(BrightnessEncoder));
        (roster, enroller)
    }

    #[tokio::test]
    async fn test_first_face_per_image_is_kept() {
        let (roster, enroller) = enroller();
        let summary = enroller
            .enroll(request("a"), vec![png(255), png(0), png(200)])
            .await
            .unwrap();

        assert_eq!(summary.encodings, 2);
        assert_eq!(summary.images_without_face, 1);

        let stored = roster.encodings_for_group("10A").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].encodings.len(), 2);
        assert_eq!(stored[0].encodings[0], vec![1.0; 4]);
    }

    #[tokio::test]
    async fn test_duplicate_enrollment_is_rejected() {
        let (_roster, enroller) = enroller();
        enroller.enroll(request("a"), vec![png(255)]).await.unwrap();
        let err = enroller.enroll(request("a"), vec![png(255)]).await.unwrap_err();
        assert!(matches!(err, EnrollmentError::AlreadyEnrolled(_)));
    }

    #[tokio::test]
    async fn test_garbage_image_is_rejected() {
        let (_roster, enroller) = enroller();
        let err = enroller
            .enroll(request("a"), vec![png(255), b"not an image".to_vec()])
            .await
            .unwrap_err();
        assert!(matches!(err, EnrollmentError::BadImage { index: 1, .. }));
    }

    #[tokio::test]
    async fn test_missing_images_and_bad_metadata() {
        let (_roster, enroller) = enroller();
        assert!(matches!(
            enroller.enroll(request("a"), Vec::new()).await.unwrap_err(),
            EnrollmentError::NoImages
        ));

        let mut bad = request("b");
        bad.email = "nope".to_string();
        assert!(matches!(
            enroller.enroll(bad, vec![png(255)]).await.unwrap_err(),
            EnrollmentError::Invalid(_)
        ));
    }
}
