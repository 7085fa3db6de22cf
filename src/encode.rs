use std::fs;

use camino::Utf8Path;
use image::codecs::png::{CompressionType, FilterType, PngDecoder, PngEncoder};
use image::{ImageEncoder, RgbaImage};

use crate::error::EncodeError;

/// Encodes the report as a lossless PNG.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, EncodeError> {
    let mut out = Vec::new();
    let encoder =
        PngEncoder::new_with_quality(&mut out, CompressionType::Best, FilterType::Adaptive);

    encoder.write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        image::ExtendedColorType::Rgba8,
    )?;

    Ok(out)
}

pub fn decode_png(buffer: &[u8]) -> Result<RgbaImage, EncodeError> {
    let decoder = PngDecoder::new(std::io::Cursor::new(buffer))?;
    let image = image::DynamicImage::from_decoder(decoder)?;
    Ok(image.to_rgba8())
}

/// Writes the encoded report to `path`, creating missing parent directories.
pub fn save_png(image: &RgbaImage, path: &Utf8Path) -> Result<(), EncodeError> {
    let data = encode_png(image)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, &data)?;

    tracing::info!(%path, bytes = data.len(), "wrote report");
    Ok(())
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;
    use image::Rgba;

    use super::*;

    fn checkerboard() -> RgbaImage {
        RgbaImage::from_fn(16, 9, |x, y| match (x + y) % 3 {
            0 => Rgba([255, 255, 255, 255]),
            1 => Rgba([31, 119, 180, 255]),
            _ => Rgba([0, 0, 0, 128]),
        })
    }

    #[test]
    fn test_round_trip_is_lossless() {
        let image = checkerboard();
        let bytes = encode_png(&image).unwrap();

        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
        assert_eq!(decode_png(&bytes).unwrap(), image);
    }

    #[test]
    fn test_decode_garbage() {
        assert!(decode_png(b"definitely not a png").is_err());
    }

    #[test]
    fn test_save_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("nested/out.png")).unwrap();

        save_png(&checkerboard(), &path).unwrap();

        let bytes = fs::read(&path).unwrap();
        assert_eq!(decode_png(&bytes).unwrap(), checkerboard());
    }
}
