//! Tesseract OCR engine.
//!
//! Runs the `tesseract` CLI with TSV output and groups word boxes into lines.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::instrument;

use super::{
    check_command_output, BoundingBox, EngineKind, OcrEngine, OcrError, OcrLine, PageImage,
};

/// TSV rows at this level are single words.
const WORD_LEVEL: u32 = 5;

pub struct TesseractEngine {
    languages: String,
}

impl TesseractEngine {
    pub fn new(languages: &str) -> Self {
        Self {
            languages: languages.to_string(),
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Tesseract
    }

    #[instrument(level = "debug", skip_all, fields(page = page.page_number))]
    async fn recognize_page(&self, page: &PageImage) -> Result<Vec<OcrLine>, OcrError> {
        let output = Command::new("tesseract")
            .arg(&page.path)
            .arg("stdout")
            .arg("-l")
            .arg(&self.languages)
            .arg("tsv")
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => OcrError::EngineUnavailable(
                    "tesseract not found (install tesseract-ocr)".to_string(),
                ),
                _ => OcrError::Io(e),
            })?;

        check_command_output("tesseract", &output).map_err(|message| OcrError::Recognition {
            page: page.page_number,
            message,
        })?;

        Ok(parse_tsv(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Line being assembled from consecutive words.
struct LineBuilder {
    key: (u32, u32, u32, u32),
    words: Vec<String>,
    confidences: Vec<f32>,
    left: u32,
    top: u32,
    right: u32,
    bottom: u32,
}

impl LineBuilder {
    fn new(key: (u32, u32, u32, u32), word: &Word) -> Self {
        let mut line = Self {
            key,
            words: Vec::new(),
            confidences: Vec::new(),
            left: word.left,
            top: word.top,
            right: word.left + word.width,
            bottom: word.top + word.height,
        };
        line.push(word);
        line
    }

    fn push(&mut self, word: &Word) {
        self.words.push(word.text.clone());
        if word.confidence >= 0.0 {
            self.confidences.push(word.confidence);
        }
        self.left = self.left.min(word.left);
        self.top = self.top.min(word.top);
        self.right = self.right.max(word.left + word.width);
        self.bottom = self.bottom.max(word.top + word.height);
    }

    fn finish(self, line_number: u32) -> OcrLine {
        let confidence = if self.confidences.is_empty() {
            None
        } else {
            Some(self.confidences.iter().sum::<f32>() / self.confidences.len() as f32)
        };
        OcrLine {
            line_number,
            text: self.words.join(" "),
            confidence,
            bbox: BoundingBox {
                x: self.left,
                y: self.top,
                width: self.right - self.left,
                height: self.bottom - self.top,
            },
        }
    }
}

struct Word {
    key: (u32, u32, u32, u32),
    left: u32,
    top: u32,
    width: u32,
    height: u32,
    confidence: f32,
    text: String,
}

/// Parses one TSV row, keeping only non-empty words.
///
/// Columns: level page_num block_num par_num line_num word_num left top width
/// height conf text.
fn parse_word(row: &str) -> Option<Word> {
    let cols: Vec<&str> = row.splitn(12, '\t').collect();
    if cols.len() < 12 {
        return None;
    }
    let num = |i: usize| cols[i].trim().parse::<u32>().ok();

    if num(0)? != WORD_LEVEL {
        return None;
    }
    let text = cols[11].trim();
    if text.is_empty() {
        return None;
    }

    Some(Word {
        key: (num(1)?, num(2)?, num(3)?, num(4)?),
        left: num(6)?,
        top: num(7)?,
        width: num(8)?,
        height: num(9)?,
        confidence: cols[10].trim().parse().unwrap_or(-1.0),
        text: text.to_string(),
    })
}

pub(crate) fn parse_tsv(tsv: &str) -> Vec<OcrLine> {
    let mut lines: Vec<LineBuilder> = Vec::new();

    // The header row fails to parse as a word and is skipped.
    for word in tsv.lines().filter_map(parse_word) {
        match lines.last_mut() {
            Some(line) if line.key == word.key => line.push(&word),
            _ => lines.push(LineBuilder::new(word.key, &word)),
        }
    }

    lines
        .into_iter()
        .zip(1u32..)
        .map(|(line, number)| line.finish(number))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
1\t1\t0\t0\t0\t0\t0\t0\t2480\t3508\t-1\t
2\t1\t1\t0\t0\t0\t200\t300\t900\t120\t-1\t
3\t1\t1\t1\t0\t0\t200\t300\t900\t120\t-1\t
4\t1\t1\t1\t1\t0\t200\t300\t600\t50\t-1\t
5\t1\t1\t1\t1\t1\t200\t300\t250\t50\t96.5\tInvoice
5\t1\t1\t1\t1\t2\t470\t305\t330\t45\t91.5\tNumber:
4\t1\t1\t1\t2\t0\t200\t370\t900\t50\t-1\t
5\t1\t1\t1\t2\t1\t200\t370\t400\t50\t88.0\tTotal
5\t1\t1\t1\t2\t2\t620\t372\t10\t40\t-1\t
5\t1\t1\t1\t2\t3\t650\t368\t450\t54\t90.0\tEUR 42
";

    #[test]
    fn test_words_grouped_into_lines() {
        let lines = parse_tsv(SAMPLE_TSV);
        assert_eq!(lines.len(), 2);

        assert_eq!(lines[0].line_number, 1);
        assert_eq!(lines[0].text, "Invoice Number:");
        assert_eq!(lines[0].confidence, Some(94.0));
        assert_eq!(
            lines[0].bbox,
            BoundingBox {
                x: 200,
                y: 300,
                width: 600,
                height: 50
            }
        );

        assert_eq!(lines[1].line_number, 2);
        assert_eq!(lines[1].text, "Total EUR 42");
        assert_eq!(lines[1].confidence, Some(89.0));
        assert_eq!(lines[1].bbox.y, 368);
        assert_eq!(lines[1].bbox.height, 54);
    }

    #[test]
    fn test_blank_page_has_no_lines() {
        let tsv = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
1\t1\t0\t0\t0\t0\t0\t0\t2480\t3508\t-1\t
";
        assert!(parse_tsv(tsv).is_empty());
    }

    #[test]
    fn test_truncated_rows_ignored() {
        assert!(parse_tsv("5\t1\t1\t1\n").is_empty());
    }

    #[tokio::test]
    async fn test_recognize_rendered_pdf_page() {
        use crate::ocr::testing::{command_available, TWO_PAGE_PDF};
        use crate::ocr::{pages::split_pages, DocumentFormat};

        if !command_available("pdftoppm") || !command_available("tesseract") {
            return;
        }
        let pages = split_pages(std::path::Path::new(TWO_PAGE_PDF), DocumentFormat::Pdf, 300)
            .await
            .unwrap();
        let engine = TesseractEngine::new("eng");

        let first = engine.recognize_page(pages.iter().next().unwrap()).await.unwrap();
        assert_eq!(first.len(), 1, "{:?}", first);
        assert_eq!(first[0].line_number, 1);
        assert!(first[0].text.to_lowercase().contains("page one"), "{:?}", first);
        assert!(first[0].bbox.width > 0 && first[0].bbox.height > 0);

        let second = engine.recognize_page(pages.iter().nth(1).unwrap()).await.unwrap();
        assert!(second.iter().any(|l| l.text.to_lowercase().contains("page two")));
    }

    #[tokio::test]
    async fn test_missing_language_pack_is_an_error() {
        use crate::ocr::testing::command_available;

        if !command_available("tesseract") {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page-1.png");
        image::GrayImage::from_pixel(32, 32, image::Luma([255u8]))
            .save(&path)
            .unwrap();

        let engine = TesseractEngine::new("zz_not_a_language");
        let page = PageImage {
            page_number: 3,
            path,
        };
        let err = engine.recognize_page(&page).await.unwrap_err();
        assert!(matches!(err, OcrError::Recognition { page: 3, .. }), "{:?}", err);
    }
}
