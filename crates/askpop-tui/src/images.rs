//! Image sources for the popup (files picked by path, the system clipboard)
//! and copying answers back out.

use std::fs;
use std::io::Cursor;
use std::path::Path;

use anyhow::{anyhow, Result};
use askpop_core::attachment::{is_image_mime, mime_from_path};
use askpop_core::EncodedImage;
use image::{DynamicImage, ImageFormat, RgbaImage};

/// What a clipboard paste turned out to hold
#[derive(Debug)]
pub enum ClipboardContent {
    Image(EncodedImage),
    Text(String),
    Empty,
}

/// Read an image file into an attachment. Any `image/*` type is accepted.
pub fn load_image_file(path: &Path) -> Result<EncodedImage> {
    let bytes = fs::read(path).map_err(|e| anyhow!("Failed to read {}: {}", path.display(), e))?;

    let mime = match mime_from_path(path) {
        Some(mime) => mime,
        None => image::guess_format(&bytes)
            .map(|format| format.to_mime_type())
            .map_err(|_| anyhow!("{} is not an image", path.display()))?,
    };
    if !is_image_mime(mime) {
        return Err(anyhow!("{} is not an image", path.display()));
    }

    Ok(EncodedImage::from_bytes(mime, &bytes)?)
}

/// Grab the clipboard. Images win over text so a screenshot paste attaches.
pub fn read_clipboard() -> Result<ClipboardContent> {
    let mut clipboard =
        arboard::Clipboard::new().map_err(|e| anyhow!("Failed to init clipboard: {}", e))?;

    if let Ok(image) = clipboard.get_image() {
        let encoded = encode_png(image.width as u32, image.height as u32, image.bytes.into_owned())?;
        return Ok(ClipboardContent::Image(encoded));
    }

    match clipboard.get_text() {
        Ok(text) if !text.is_empty() => Ok(ClipboardContent::Text(text)),
        _ => Ok(ClipboardContent::Empty),
    }
}

/// Put text on the system clipboard
pub fn write_clipboard(text: &str) -> Result<()> {
    let mut clipboard =
        arboard::Clipboard::new().map_err(|e| anyhow!("Failed to init clipboard: {}", e))?;
    clipboard
        .set_text(text.to_string())
        .map_err(|e| anyhow!("Failed to copy: {}", e))
}

/// Encode raw RGBA pixels as a PNG attachment
pub fn encode_png(width: u32, height: u32, rgba: Vec<u8>) -> Result<EncodedImage> {
    let pixels = RgbaImage::from_raw(width, height, rgba)
        .ok_or_else(|| anyhow!("Clipboard image has an unexpected size"))?;

    let mut png = Vec::new();
    DynamicImage::ImageRgba8(pixels)
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| anyhow!("PNG encode error: {}", e))?;

    Ok(EncodedImage::from_bytes("image/png", &png)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tiny_png() -> Vec<u8> {
        let encoded = encode_png(1, 1, vec![255, 0, 0, 255]).unwrap();
        encoded.decode().unwrap().bytes
    }

    #[test]
    fn test_encode_png_round_trips_through_decoder() {
        let encoded = encode_png(2, 1, vec![0, 0, 0, 255, 255, 255, 255, 255]).unwrap();
        assert_eq!(encoded.mime_type(), Some("image/png"));

        let decoded = encoded.decode().unwrap();
        assert_eq!(image::guess_format(&decoded.bytes).unwrap(), ImageFormat::Png);
        let pixels = image::load_from_memory(&decoded.bytes).unwrap();
        assert_eq!((pixels.width(), pixels.height()), (2, 1));
    }

    #[test]
    fn test_encode_png_rejects_short_buffer() {
        assert!(encode_png(4, 4, vec![0; 3]).is_err());
    }

    #[test]
    fn test_load_by_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shot.png");
        fs::write(&path, tiny_png()).unwrap();

        let image = load_image_file(&path).unwrap();
        assert_eq!(image.mime_type(), Some("image/png"));
        assert_eq!(image.decode().unwrap().bytes, tiny_png());
    }

    #[test]
    fn test_load_sniffs_content_without_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("capture");
        fs::write(&path, tiny_png()).unwrap();

        let image = load_image_file(&path).unwrap();
        assert_eq!(image.mime_type(), Some("image/png"));
    }

    #[test]
    fn test_load_rejects_non_image() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, "just text").unwrap();

        let err = load_image_file(&path).unwrap_err();
        assert!(err.to_string().contains("is not an image"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(load_image_file(&dir.path().join("nope.png")).is_err());
    }
}
