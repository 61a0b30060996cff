//! Splits uploaded documents into one PNG per page.
//!
//! PDFs are rasterised with `pdftoppm` (poppler-utils). TIFFs are decoded
//! frame by frame; every IFD in the main chain is one page.

use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use image::{DynamicImage, GrayAlphaImage, GrayImage, ImageFormat, RgbImage, RgbaImage};
use tempfile::TempDir;
use tiff::{
    decoder::{Decoder, DecodingResult},
    ColorType,
};
use tokio::process::Command;
use tracing::{debug, instrument};

use super::{check_command_output, DocumentFormat, OcrError};

/// A rendered page waiting for OCR.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// 1-based.
    pub page_number: u32,
    pub path: PathBuf,
}

/// Page images backed by a temporary directory that is removed on drop.
#[derive(Debug)]
pub struct PageImages {
    _tmpdir: TempDir,
    pages: Vec<PageImage>,
}

impl PageImages {
    pub fn iter(&self) -> impl Iterator<Item = &PageImage> {
        self.pages.iter()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

#[instrument(level = "debug", skip(path), fields(path = %path.display()))]
pub async fn split_pages(
    path: &Path,
    format: DocumentFormat,
    dpi: u32,
) -> Result<PageImages, OcrError> {
    let tmpdir = tempfile::Builder::new().prefix("ocr-pages").tempdir()?;

    let pages = match format {
        DocumentFormat::Pdf => rasterize_pdf(path, tmpdir.path(), dpi).await?,
        DocumentFormat::Tiff => {
            let source = path.to_owned();
            let out_dir = tmpdir.path().to_owned();
            tokio::task::spawn_blocking(move || split_tiff(&source, &out_dir))
                .await
                .map_err(|e| OcrError::PageSplit(format!("TIFF worker panicked: {}", e)))??
        }
    };

    if pages.is_empty() {
        return Err(OcrError::PageSplit(format!(
            "no pages found in {}",
            path.display()
        )));
    }

    debug!(pages = pages.len(), "Document split into pages");
    Ok(PageImages {
        _tmpdir: tmpdir,
        pages,
    })
}

async fn rasterize_pdf(path: &Path, out_dir: &Path, dpi: u32) -> Result<Vec<PageImage>, OcrError> {
    let output = Command::new("pdftoppm")
        .arg("-png")
        .arg("-r")
        .arg(dpi.to_string())
        .arg(path)
        .arg(out_dir.join("page"))
        .output()
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => OcrError::EngineUnavailable(
                "pdftoppm not found (install poppler-utils)".to_string(),
            ),
            _ => OcrError::Io(e),
        })?;
    check_command_output("pdftoppm", &output).map_err(OcrError::PageSplit)?;

    // pdftoppm zero-pads page numbers to a common width, so a lexical sort
    // is page order.
    let mut files = Vec::new();
    for entry in std::fs::read_dir(out_dir)? {
        let file = entry?.path();
        if file.extension().is_some_and(|ext| ext == "png") {
            files.push(file);
        }
    }
    files.sort();

    Ok(files
        .into_iter()
        .zip(1u32..)
        .map(|(path, page_number)| PageImage { page_number, path })
        .collect())
}

fn split_tiff(path: &Path, out_dir: &Path) -> Result<Vec<PageImage>, OcrError> {
    let file = File::open(path)?;
    let mut decoder = Decoder::new(BufReader::new(file)).map_err(tiff_error)?;
    let mut pages = Vec::new();

    loop {
        let page_number = pages.len() as u32 + 1;
        let image = decode_frame(&mut decoder, page_number)?;

        let page_path = out_dir.join(format!("page-{:05}.png", page_number));
        image
            .save_with_format(&page_path, ImageFormat::Png)
            .map_err(|e| OcrError::Image(format!("cannot write page {}: {}", page_number, e)))?;
        pages.push(PageImage {
            page_number,
            path: page_path,
        });

        if !decoder.more_images() {
            break;
        }
        decoder.next_image().map_err(tiff_error)?;
    }

    Ok(pages)
}

fn decode_frame<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
    page_number: u32,
) -> Result<DynamicImage, OcrError> {
    let (width, height) = decoder.dimensions().map_err(tiff_error)?;
    let color_type = decoder.colortype().map_err(tiff_error)?;
    let data = match decoder.read_image().map_err(tiff_error)? {
        DecodingResult::U8(data) => data,
        DecodingResult::U16(data) => data.iter().map(|&v| (v >> 8) as u8).collect(),
        _ => {
            return Err(OcrError::Image(format!(
                "unsupported sample format on page {}",
                page_number
            )))
        }
    };

    let bad_buffer =
        || OcrError::Image(format!("pixel buffer does not match page {} size", page_number));

    // WhiteIsZero samples arrive already inverted by the decoder.
    match color_type {
        ColorType::Gray(bits @ (1 | 2 | 4)) => {
            GrayImage::from_raw(width, height, unpack_gray(&data, width, bits))
                .map(DynamicImage::ImageLuma8)
                .ok_or_else(bad_buffer)
        }
        ColorType::Gray(8) | ColorType::Gray(16) => GrayImage::from_raw(width, height, data)
            .map(DynamicImage::ImageLuma8)
            .ok_or_else(bad_buffer),
        ColorType::GrayA(8) | ColorType::GrayA(16) => GrayAlphaImage::from_raw(width, height, data)
            .map(DynamicImage::ImageLumaA8)
            .ok_or_else(bad_buffer),
        ColorType::RGB(8) | ColorType::RGB(16) => RgbImage::from_raw(width, height, data)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(bad_buffer),
        ColorType::RGBA(8) | ColorType::RGBA(16) => RgbaImage::from_raw(width, height, data)
            .map(DynamicImage::ImageRgba8)
            .ok_or_else(bad_buffer),
        other => Err(OcrError::Image(format!(
            "unsupported TIFF color type {:?} on page {}",
            other, page_number
        ))),
    }
}

/// Expands sub-byte gray samples to one byte per pixel.
///
/// Rows are packed MSB first and padded to a whole byte.
fn unpack_gray(packed: &[u8], width: u32, bits: u8) -> Vec<u8> {
    let bits = usize::from(bits);
    let width = width as usize;
    let row_bytes = (width * bits).div_ceil(8).max(1);
    let max = (1u16 << bits) - 1;
    let per_byte = 8 / bits;

    let mut pixels = Vec::with_capacity(width * (packed.len() / row_bytes));
    for row in packed.chunks(row_bytes) {
        pixels.extend(
            row.iter()
                .flat_map(|&byte| {
                    (0..per_byte).map(move |i| u16::from(byte >> (8 - bits * (i + 1))) & max)
                })
                .take(width)
                .map(|v| (v * 255 / max) as u8),
        );
    }
    pixels
}

fn tiff_error(err: tiff::TiffError) -> OcrError {
    OcrError::Image(format!("TIFF decode failed: {}", err))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_split_multi_page_tiff() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.tiff");
        std::fs::write(&path, fixtures::multi_page_tiff(&[8, 16, 24])).unwrap();

        let pages = split_pages(&path, DocumentFormat::Tiff, 300).await.unwrap();
        assert_eq!(pages.len(), 3);

        for (page, expected_width) in pages.iter().zip([8, 16, 24]) {
            assert!(page.path.exists());
            let (width, height) = image::image_dimensions(&page.path).unwrap();
            assert_eq!((width, height), (expected_width, 4));
        }
        let numbers: Vec<u32> = pages.iter().map(|p| p.page_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_page_images_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.tif");
        std::fs::write(&path, fixtures::multi_page_tiff(&[8])).unwrap();

        let pages = split_pages(&path, DocumentFormat::Tiff, 300).await.unwrap();
        let first = pages.iter().next().unwrap().path.clone();
        assert!(first.exists());
        drop(pages);
        assert!(!first.exists());
    }

    fn luma(page: &PageImage) -> GrayImage {
        image::open(&page.path).unwrap().to_luma8()
    }

    #[tokio::test]
    async fn test_split_bilevel_tiff() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fax.tif");
        // 10 pixels wide, so each row carries 6 bits of padding.
        let rows: [&[u8]; 2] = [&[0b1010_1010, 0b1100_0000], &[0x00, 0x00]];
        std::fs::write(&path, fixtures::bilevel_tiff(10, &rows, false)).unwrap();

        let pages = split_pages(&path, DocumentFormat::Tiff, 300).await.unwrap();
        assert_eq!(pages.len(), 1);

        let img = luma(pages.iter().next().unwrap());
        assert_eq!(img.dimensions(), (10, 2));
        let top: Vec<u8> = (0..10).map(|x| img.get_pixel(x, 0)[0]).collect();
        assert_eq!(top, vec![255, 0, 255, 0, 255, 0, 255, 0, 255, 255]);
        assert!((0..10).all(|x| img.get_pixel(x, 1)[0] == 0));
    }

    #[tokio::test]
    async fn test_split_white_is_zero_tiff() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.tif");
        let rows: [&[u8]; 2] = [&[0xFF, 0xFF], &[0x00, 0x00]];
        std::fs::write(&path, fixtures::bilevel_tiff(16, &rows, true)).unwrap();

        let pages = split_pages(&path, DocumentFormat::Tiff, 300).await.unwrap();
        let img = luma(pages.iter().next().unwrap());
        // Set bits are black under WhiteIsZero.
        assert_eq!(img.get_pixel(0, 0)[0], 0);
        assert_eq!(img.get_pixel(15, 1)[0], 255);
    }

    #[test]
    fn test_unpack_two_bit_gray() {
        assert_eq!(unpack_gray(&[0b00_01_10_11], 4, 2), vec![0, 85, 170, 255]);
        assert_eq!(unpack_gray(&[0xF0, 0x0F], 2, 4), vec![255, 0, 0, 255]);
    }

    #[tokio::test]
    async fn test_rasterize_pdf_in_page_order() {
        if !crate::ocr::testing::command_available("pdftoppm") {
            return;
        }
        let path = Path::new(crate::ocr::testing::TWO_PAGE_PDF);

        let pages = split_pages(path, DocumentFormat::Pdf, 72).await.unwrap();
        let numbers: Vec<u32> = pages.iter().map(|p| p.page_number).collect();
        assert_eq!(numbers, vec![1, 2]);
        for page in pages.iter() {
            // US Letter at 72 dpi.
            assert_eq!(image::image_dimensions(&page.path).unwrap(), (612, 792));
        }
        let names: Vec<_> = pages
            .iter()
            .map(|p| p.path.file_name().unwrap().to_owned())
            .collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[tokio::test]
    async fn test_corrupt_tiff_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.tiff");
        std::fs::write(&path, b"II*\x00garbage").unwrap();

        let err = split_pages(&path, DocumentFormat::Tiff, 300).await.unwrap_err();
        assert!(matches!(err, OcrError::Image(_) | OcrError::Io(_)));
    }
}
