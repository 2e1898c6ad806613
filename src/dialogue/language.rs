//! Language gate for typed input

use whatlang::Lang;

use crate::{Error, Result};

/// Decides whether typed input is in the language the NPCs speak
pub trait LanguageDetector: Send + Sync {
    /// True unless `text` is confidently in some other language
    fn is_expected(&self, text: &str) -> bool;
}

/// Trigram detector backed by `whatlang`
///
/// Only reliable detections can reject input; short or ambiguous text
/// passes.
#[derive(Debug, Clone, Copy)]
pub struct WhatlangDetector {
    expected: Lang,
}

impl WhatlangDetector {
    /// Create a detector expecting the given ISO 639-3 code (e.g. "eng")
    ///
    /// # Errors
    ///
    /// Returns a config error for an unknown code
    pub fn new(code: &str) -> Result<Self> {
        let expected =
            Lang::from_code(code).ok_or_else(|| Error::Config(format!("unknown language code: {code}")))?;
        Ok(Self { expected })
    }

    #[must_use]
    pub const fn expected(&self) -> Lang {
        self.expected
    }
}

impl Default for WhatlangDetector {
    fn default() -> Self {
        Self { expected: Lang::Eng }
    }
}

impl LanguageDetector for WhatlangDetector {
    fn is_expected(&self, text: &str) -> bool {
        match whatlang::detect(text) {
            Some(info) if info.is_reliable() && info.lang() != self.expected => {
                tracing::debug!(detected = info.lang().code(), confidence = info.confidence(), "unexpected language");
                false
            }
            _ => true,
        }
    }
}
