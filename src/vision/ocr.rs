//! OCR (Optical Character Recognition) module
//!
//! Uses the ocrs engine (rten models) to detect words, group them into
//! lines and recognize each line.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use ocrs::{DecodeMethod, ImageSource, OcrEngine, OcrEngineParams};
use rten::Model;
use tracing::{debug, info, warn};

use super::{RecognitionLevel, TextRecognizer};
use crate::capture::Frame;
use crate::config::OcrSettings;
use crate::error::VisionError;

/// Language subtags the bundled Latin-script recognition model covers,
/// with the letters each adds beyond basic ASCII
const SUPPORTED_LANGUAGES: &[(&str, &str)] = &[
    ("en", ""),
    ("es", "áéíóúüñÁÉÍÓÚÜÑ¿¡"),
    ("fr", "àâæçéèêëîïôœùûüÿÀÂÆÇÉÈÊËÎÏÔŒÙÛÜŸ«»"),
    ("de", "äöüßÄÖÜ"),
    ("it", "àèéìíòóùÀÈÉÌÍÒÓÙ"),
    ("pt", "ãõáâàçéêíóôúÃÕÁÂÀÇÉÊÍÓÔÚ"),
    ("nl", "éëïóöüÉËÏÓÖÜ"),
    ("ca", "àçèéíïòóúü·ÀÇÈÉÍÏÒÓÚÜ"),
    ("gl", "áéíóúñÁÉÍÓÚÑ"),
    ("eu", "ñÑ"),
    ("da", "æøåÆØÅ"),
    ("sv", "åäöÅÄÖ"),
    ("no", "æøåÆØÅ"),
    ("fi", "åäöÅÄÖ"),
];

/// Characters every supported language shares
const BASE_CHARS: &str = "0123456789\
    abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ\
     !\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~€°";

const BEAM_WIDTH: u32 = 100;

fn language_letters(tag: &str) -> Option<&'static str> {
    let primary = tag.split(['-', '_']).next().unwrap_or_default().to_ascii_lowercase();
    SUPPORTED_LANGUAGES
        .iter()
        .find(|(code, _)| *code == primary)
        .map(|(_, letters)| *letters)
}

/// Split language hints into those the model can read and those it cannot
pub fn partition_languages(languages: &[String]) -> (Vec<String>, Vec<String>) {
    languages
        .iter()
        .cloned()
        .partition(|tag| language_letters(tag).is_some())
}

/// Characters the decoder may emit for the given hints; `None` leaves the
/// model's full alphabet when no hint is supported
pub fn allowed_chars(languages: &[String]) -> Option<String> {
    let mut letters: Vec<&str> = languages.iter().filter_map(|tag| language_letters(tag)).collect();
    if letters.is_empty() {
        return None;
    }
    letters.insert(0, BASE_CHARS);

    let mut chars = String::new();
    for c in letters.into_iter().flat_map(str::chars) {
        if !chars.contains(c) {
            chars.push(c);
        }
    }
    Some(chars)
}

/// Engine parameters for the given models and settings
pub fn engine_params(
    detection_model: Option<Model>,
    recognition_model: Option<Model>,
    settings: &OcrSettings,
) -> OcrEngineParams {
    let decode_method = match settings.level {
        RecognitionLevel::Accurate => DecodeMethod::BeamSearch { width: BEAM_WIDTH },
        RecognitionLevel::Fast => DecodeMethod::Greedy,
    };

    OcrEngineParams {
        detection_model,
        recognition_model,
        decode_method,
        allowed_chars: allowed_chars(&settings.languages),
        ..Default::default()
    }
}

/// Join recognized fragments with newlines
///
/// With correction enabled, whitespace inside each fragment is collapsed
/// and fragments holding no letters or digits are dropped as noise.
pub fn join_fragments<I>(fragments: I, language_correction: bool) -> String
where
    I: IntoIterator<Item = String>,
{
    let lines: Vec<String> = fragments
        .into_iter()
        .filter_map(|fragment| {
            if language_correction {
                let collapsed = fragment.split_whitespace().collect::<Vec<_>>().join(" ");
                collapsed
                    .chars()
                    .any(char::is_alphanumeric)
                    .then_some(collapsed)
            } else {
                let trimmed = fragment.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
        })
        .collect();
    lines.join("\n")
}

/// Text recognizer backed by ocrs
pub struct OcrsRecognizer {
    engine: Arc<OcrEngine>,
    language_correction: bool,
}

impl OcrsRecognizer {
    /// Load the detection and recognition models
    pub fn new(
        detection_model: &Path,
        recognition_model: &Path,
        settings: &OcrSettings,
    ) -> Result<Self, VisionError> {
        let (supported, unsupported) = partition_languages(&settings.languages);
        if !unsupported.is_empty() {
            warn!("OCR model cannot read languages {:?}, hints ignored", unsupported);
        }
        if supported.is_empty() {
            warn!("No supported OCR language hints configured");
        }

        let detection = Model::load_file(detection_model).map_err(|e| {
            VisionError::Model(format!("Failed to load {:?}: {}", detection_model, e))
        })?;
        let recognition = Model::load_file(recognition_model).map_err(|e| {
            VisionError::Model(format!("Failed to load {:?}: {}", recognition_model, e))
        })?;

        let engine = OcrEngine::new(engine_params(Some(detection), Some(recognition), settings))
            .map_err(|e| VisionError::Model(e.to_string()))?;

        info!(
            "OCR ready ({:?}, languages {:?}, correction {})",
            settings.level, supported, settings.language_correction
        );

        Ok(Self {
            engine: Arc::new(engine),
            language_correction: settings.language_correction,
        })
    }

    fn run(engine: &OcrEngine, frame: &Frame, language_correction: bool) -> Result<String, VisionError> {
        let start = Instant::now();
        let rgb = frame.to_rgb()?;

        let source = ImageSource::from_bytes(rgb.as_raw(), rgb.dimensions())
            .map_err(|e| VisionError::Frame(e.to_string()))?;
        let input = engine
            .prepare_input(source)
            .map_err(|e| VisionError::Inference(e.to_string()))?;

        let words = engine
            .detect_words(&input)
            .map_err(|e| VisionError::Inference(e.to_string()))?;
        let lines = engine.find_text_lines(&input, &words);
        let recognized = engine
            .recognize_text(&input, &lines)
            .map_err(|e| VisionError::Inference(e.to_string()))?;

        let text = join_fragments(
            recognized.into_iter().flatten().map(|line| line.to_string()),
            language_correction,
        );
        debug!(
            "OCR on frame {} read {} lines in {:?}",
            frame.sequence,
            text.lines().count(),
            start.elapsed()
        );
        Ok(text)
    }
}

#[async_trait]
impl TextRecognizer for OcrsRecognizer {
    async fn recognize(&self, frame: &Frame) -> Result<String, VisionError> {
        let engine = self.engine.clone();
        let frame = frame.clone();
        let correction = self.language_correction;

        tokio::task::spawn_blocking(move || Self::run(&engine, &frame, correction)).await?
    }
}
