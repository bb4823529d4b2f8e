use image::GrayImage;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::NamedTempFile;

use super::RecognizerError;

const COMMON_INSTALL_DIRS: [&str; 2] = [
    r"C:\Program Files\Tesseract-OCR",
    r"C:\Program Files (x86)\Tesseract-OCR",
];

/// A line of OCR text with the mean confidence (0-100) of its words
#[derive(Debug, Clone, PartialEq)]
pub struct OcrLine {
    pub text: String,
    pub confidence: f32,
}

struct OcrWord {
    text: String,
    confidence: f32,
}

/// Anything that can read lines of text from a binarised image.
pub trait OcrEngine {
    fn read_lines(&mut self, img: &GrayImage) -> Result<Vec<OcrLine>, RecognizerError>;
}

/// Tesseract driven through its command-line interface.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    executable: PathBuf,
    tessdata: Option<PathBuf>,
}

impl TesseractEngine {
    /// Finds Tesseract: the configured path, then next to the executable,
    /// then `PATH`, then the usual install directories.
    pub fn locate(configured: Option<&str>) -> Result<Self, RecognizerError> {
        let executable = find_tesseract_executable(configured)?;
        let tessdata = find_tessdata_dir(&executable);
        log::info!(
            "Using Tesseract at {} (tessdata: {})",
            executable.display(),
            tessdata
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "default".to_string())
        );
        Ok(Self {
            executable,
            tessdata,
        })
    }
}

impl OcrEngine for TesseractEngine {
    fn read_lines(&mut self, img: &GrayImage) -> Result<Vec<OcrLine>, RecognizerError> {
        // Save image to temporary file
        let temp_input = NamedTempFile::with_suffix(".png")?;
        img.save(temp_input.path())?;

        // Tesseract appends .tsv to the output base
        let temp_output = NamedTempFile::new()?;
        let output_base = temp_output.path().to_string_lossy().to_string();

        let mut command = Command::new(&self.executable);
        command.arg(temp_input.path()).arg(&output_base);
        if let Some(tessdata) = &self.tessdata {
            command.arg("--tessdata-dir").arg(tessdata);
        }
        let output = command
            .args(["-l", "eng", "--psm", "6", "tsv"])
            .output()
            .map_err(|e| RecognizerError::EngineUnavailable(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RecognizerError::EngineFailed(stderr.trim().to_string()));
        }

        let tsv_path = format!("{}.tsv", output_base);
        let tsv_content = std::fs::read_to_string(&tsv_path)?;
        let _ = std::fs::remove_file(&tsv_path);

        Ok(parse_tsv_output(&tsv_content))
    }
}

fn flush_line(words: &mut Vec<OcrWord>, lines: &mut Vec<OcrLine>) {
    if words.is_empty() {
        return;
    }
    let words = std::mem::take(words);
    let confidence = words.iter().map(|w| w.confidence).sum::<f32>() / words.len() as f32;
    let text = words
        .iter()
        .map(|w| w.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    lines.push(OcrLine { text, confidence });
}

/// Parses Tesseract TSV output into lines of words.
///
/// TSV fields: level, page_num, block_num, par_num, line_num, word_num,
/// left, top, width, height, conf, text. Only level 5 (word) rows with a
/// non-negative confidence are kept.
pub fn parse_tsv_output(tsv: &str) -> Vec<OcrLine> {
    let mut lines = Vec::new();
    let mut current_line: Option<(i32, i32, i32)> = None;
    let mut words: Vec<OcrWord> = Vec::new();

    for row in tsv.lines().skip(1) {
        let fields: Vec<&str> = row.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }
        let level: i32 = fields[0].parse().unwrap_or(-1);
        let conf: f32 = fields[10].parse().unwrap_or(-1.0);
        let text = fields[11].trim();
        if level != 5 || text.is_empty() || conf < 0.0 {
            continue;
        }

        // Line numbers restart per block and paragraph
        let key = (
            fields[2].parse().unwrap_or(-1),
            fields[3].parse().unwrap_or(-1),
            fields[4].parse().unwrap_or(-1),
        );
        if current_line.is_some_and(|k| k != key) {
            flush_line(&mut words, &mut lines);
        }
        current_line = Some(key);

        words.push(OcrWord {
            text: text.to_string(),
            confidence: conf,
        });
    }
    flush_line(&mut words, &mut lines);

    lines
}

fn find_tesseract_executable(configured: Option<&str>) -> Result<PathBuf, RecognizerError> {
    if let Some(path) = configured.map(PathBuf::from) {
        if path.exists() {
            return Ok(path);
        }
        log::warn!("Configured Tesseract path {} does not exist", path.display());
    }

    let local_exe = crate::paths::get_tesseract_dir().join(exe_name());
    if local_exe.exists() {
        return Ok(local_exe);
    }

    // Check PATH
    if let Ok(output) = Command::new("tesseract").arg("--version").output() {
        if output.status.success() {
            return Ok(PathBuf::from("tesseract"));
        }
    }

    COMMON_INSTALL_DIRS
        .iter()
        .map(|dir| Path::new(dir).join(exe_name()))
        .find(|p| p.exists())
        .ok_or_else(|| {
            RecognizerError::EngineUnavailable(
                "Tesseract not found. Install Tesseract-OCR or set ocr.tesseract_path".to_string(),
            )
        })
}

/// tessdata next to the executable, then `TESSDATA_PREFIX`; otherwise
/// Tesseract's built-in default is used.
fn find_tessdata_dir(executable: &Path) -> Option<PathBuf> {
    let beside = executable.parent().map(|dir| dir.join("tessdata"));
    let from_env = std::env::var("TESSDATA_PREFIX").ok().map(PathBuf::from);

    [beside, from_env.clone(), from_env.map(|p| p.join("tessdata"))]
        .into_iter()
        .flatten()
        .find(|dir| dir.join("eng.traineddata").exists())
}

fn exe_name() -> &'static str {
    if cfg!(windows) {
        "tesseract.exe"
    } else {
        "tesseract"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    fn row(level: i32, block: i32, line: i32, conf: f32, text: &str) -> String {
        format!("{level}\t1\t{block}\t1\t{line}\t1\t0\t0\t10\t10\t{conf}\t{text}")
    }

    #[test]
    fn test_parse_tsv_groups_words_into_lines() {
        let tsv = [
            HEADER.to_string(),
            row(4, 1, 1, -1.0, ""),
            row(5, 1, 1, 90.0, "Caught"),
            row(5, 1, 1, 80.0, "Devil"),
            row(5, 1, 1, 70.0, "Fruit"),
            row(5, 1, 2, 60.0, "Pity"),
        ]
        .join("\n");

        let lines = parse_tsv_output(&tsv);

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "Caught Devil Fruit");
        assert!((lines[0].confidence - 80.0).abs() < 1e-4);
        assert_eq!(lines[1].text, "Pity");
    }

    #[test]
    fn test_parse_tsv_splits_on_new_block() {
        let tsv = [
            HEADER.to_string(),
            row(5, 1, 1, 90.0, "one"),
            row(5, 2, 1, 90.0, "two"),
        ]
        .join("\n");

        let lines = parse_tsv_output(&tsv);
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn test_parse_tsv_skips_rejected_words_and_short_rows() {
        let tsv = [
            HEADER.to_string(),
            row(5, 1, 1, -1.0, "ghost"),
            "5\t1\t1".to_string(),
            row(5, 1, 1, 50.0, "real"),
        ]
        .join("\n");

        let lines = parse_tsv_output(&tsv);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "real");
        assert!((lines[0].confidence - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_parse_empty_output() {
        assert!(parse_tsv_output(HEADER).is_empty());
        assert!(parse_tsv_output("").is_empty());
    }
}
