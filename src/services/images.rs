use base64::{engine::general_purpose, Engine};

use crate::models::ImageUpload;

/// Upload limits applied before anything is sent to a provider.
#[derive(Debug, Clone, Copy)]
pub struct UploadLimits {
    pub max_images: usize,
    pub max_image_bytes: usize,
}

/// Detect the image type from its magic bytes, falling back to the file extension.
pub fn detect_mime(filename: &str, bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("image/png");
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }

    let extension = filename.rsplit_once('.')?.1.to_lowercase();
    match extension.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

pub fn to_base64(image: &ImageUpload) -> String {
    general_purpose::STANDARD.encode(&image.bytes)
}

pub fn to_data_url(image: &ImageUpload) -> String {
    format!("data:{};base64,{}", image.mime, to_base64(image))
}

/// Validate raw `(filename, bytes)` uploads.
///
/// Returns the accepted images in upload order plus user-facing warnings for
/// everything that was skipped or cut off.
pub fn prepare_uploads(
    files: Vec<(String, Vec<u8>)>,
    limits: UploadLimits,
) -> (Vec<ImageUpload>, Vec<String>) {
    let mut images = Vec::new();
    let mut warnings = Vec::new();

    for (filename, bytes) in files {
        if bytes.is_empty() {
            // Browsers send an empty part when no file was chosen
            if !filename.is_empty() {
                warnings.push(format!("{} is empty and was skipped.", filename));
            }
            continue;
        }

        if bytes.len() > limits.max_image_bytes {
            log::warn!("⚠️ Skipping {}: {} bytes exceeds limit", filename, bytes.len());
            warnings.push(format!(
                "{} is larger than {} MB and was skipped.",
                filename,
                limits.max_image_bytes / (1024 * 1024)
            ));
            continue;
        }

        let Some(mime) = detect_mime(&filename, &bytes) else {
            log::warn!("⚠️ Skipping {}: unsupported image type", filename);
            warnings.push(format!(
                "{} is not a supported image (JPG, PNG, WEBP) and was skipped.",
                filename
            ));
            continue;
        };

        log::debug!("📊 Accepted {} ({}, {} bytes)", filename, mime, bytes.len());
        images.push(ImageUpload {
            filename,
            bytes,
            mime,
        });
    }

    if images.len() > limits.max_images {
        warnings.push(format!(
            "Maximum {max} images allowed. Only first {max} will be analyzed.",
            max = limits.max_images
        ));
        images.truncate(limits.max_images);
    }

    (images, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    const JPEG: [u8; 4] = [0xFF, 0xD8, 0xFF, 0xE0];
    const LIMITS: UploadLimits = UploadLimits {
        max_images: 5,
        max_image_bytes: 1024,
    };

    fn webp() -> Vec<u8> {
        let mut bytes = b"RIFF".to_vec();
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        bytes.extend_from_slice(b"WEBPVP8 ");
        bytes
    }

    #[test]
    fn test_detect_mime_from_magic_bytes() {
        assert_eq!(detect_mime("photo.bin", &JPEG), Some("image/jpeg"));
        assert_eq!(detect_mime("photo", &webp()), Some("image/webp"));
        assert_eq!(
            detect_mime("x", &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]),
            Some("image/png")
        );
    }

    #[test]
    fn test_detect_mime_from_extension() {
        assert_eq!(detect_mime("orange.JPEG", b"not magic"), Some("image/jpeg"));
        assert_eq!(detect_mime("orange.gif", b"GIF89a"), None);
        assert_eq!(detect_mime("orange", b"???"), None);
    }

    #[test]
    fn test_data_url() {
        let image = ImageUpload {
            filename: "a.jpg".to_string(),
            bytes: b"abc".to_vec(),
            mime: "image/jpeg",
        };
        assert_eq!(to_data_url(&image), "data:image/jpeg;base64,YWJj");
    }

    #[test]
    fn test_prepare_uploads_caps_at_max_images() {
        let files = (0..7)
            .map(|i| (format!("{}.jpg", i), JPEG.to_vec()))
            .collect();
        let (images, warnings) = prepare_uploads(files, LIMITS);

        assert_eq!(images.len(), 5);
        assert_eq!(images[4].filename, "4.jpg");
        assert_eq!(
            warnings,
            vec!["Maximum 5 images allowed. Only first 5 will be analyzed.".to_string()]
        );
    }

    #[test]
    fn test_prepare_uploads_skips_bad_files() {
        let files = vec![
            ("a.jpg".to_string(), JPEG.to_vec()),
            ("notes.txt".to_string(), b"hello".to_vec()),
            ("huge.jpg".to_string(), vec![0xFF; 2048]),
            (String::new(), Vec::new()),
        ];
        let (images, warnings) = prepare_uploads(files, LIMITS);

        assert_eq!(images.len(), 1);
        assert_eq!(images[0].mime, "image/jpeg");
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("notes.txt"));
        assert!(warnings[1].contains("huge.jpg"));
    }
}
