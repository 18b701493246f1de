//! Randomized delays that mimic how a person reads, thinks and types.
//!
//! Every function samples a uniform distribution over a fixed band selected by
//! the text length, so callers can rely on the band but never on the value.

use std::time::Duration;

use rand::Rng;

const SHORT_TEXT_CHARS: usize = 20;
const MEDIUM_TEXT_CHARS: usize = 100;
const BURST_PART_CHARS: usize = 40;
const MODERATE_PART_CHARS: usize = 150;
const TYPED_PREFIX_CHARS: usize = 500;

const READING_BANDS_SECS: [(f64, f64); 3] = [(1.0, 3.0), (2.0, 5.0), (3.0, 7.0)];
const THINKING_BANDS_SECS: [(f64, f64); 3] = [(1.0, 3.0), (3.0, 8.0), (5.0, 12.0)];
const TYPING_SPEED_CHARS_PER_SEC: (f64, f64) = (15.0, 40.0);
const PASTE_SPEED_CHARS_PER_SEC: (f64, f64) = (40.0, 80.0);
const TYPING_CLAMP_SECS: (f64, f64) = (1.5, 25.0);
const BURST_PART_SECS: (f64, f64) = (1.0, 2.5);
const AFTERTHOUGHT_PART_SECS: (f64, f64) = (5.0, 12.0);
const MODERATE_PART_SECS: (f64, f64) = (2.0, 4.0);
const LONG_PART_SECS: (f64, f64) = (3.0, 6.0);
const FIRST_CONTACT_SECS: (f64, f64) = (30.0, 120.0);

/// Lower-cased openings that read like "oh, one more thing".
pub const DEFAULT_AFTERTHOUGHT_CUES: &[&str] = &[
    "а кстати",
    "кста,",
    "и ещё",
    "а,",
    "да,",
    "ну и",
    "by the way",
    "btw",
    "oh, and",
    "also,",
];

fn uniform_secs((min, max): (f64, f64)) -> Duration {
    Duration::from_secs_f64(rand::thread_rng().gen_range(min..=max))
}

fn length_band(text_chars: usize, bands: &[(f64, f64); 3]) -> (f64, f64) {
    if text_chars < SHORT_TEXT_CHARS {
        bands[0]
    } else if text_chars < MEDIUM_TEXT_CHARS {
        bands[1]
    } else {
        bands[2]
    }
}

/// Band, in seconds, sampled by [`reading_delay`].
pub fn reading_delay_band(text_chars: usize) -> (f64, f64) {
    length_band(text_chars, &READING_BANDS_SECS)
}

/// Band, in seconds, sampled by [`thinking_delay`].
pub fn thinking_delay_band(text_chars: usize) -> (f64, f64) {
    length_band(text_chars, &THINKING_BANDS_SECS)
}

/// Time spent "reading" an inbound message before acknowledging it.
pub fn reading_delay(text_chars: usize) -> Duration {
    uniform_secs(reading_delay_band(text_chars))
}

/// Pause before the response generator is asked for a reply.
pub fn thinking_delay(text_chars: usize) -> Duration {
    uniform_secs(thinking_delay_band(text_chars))
}

/// Typing time for a part of `text_chars` characters.
///
/// The first 500 characters are typed at 15-40 chars/s; anything beyond is
/// treated as pasted at 40-80 chars/s. The total is clamped to 1.5-25s.
pub fn typing_delay(text_chars: usize) -> Duration {
    let mut rng = rand::thread_rng();
    let typed = text_chars.min(TYPED_PREFIX_CHARS);
    let pasted = text_chars.saturating_sub(TYPED_PREFIX_CHARS);

    let (min_speed, max_speed) = TYPING_SPEED_CHARS_PER_SEC;
    let mut seconds = typed as f64 / rng.gen_range(min_speed..=max_speed);
    if pasted > 0 {
        let (min_paste, max_paste) = PASTE_SPEED_CHARS_PER_SEC;
        seconds += pasted as f64 / rng.gen_range(min_paste..=max_paste);
    }
    let (floor, ceiling) = TYPING_CLAMP_SECS;
    Duration::from_secs_f64(seconds.clamp(floor, ceiling))
}

/// Delay before the very first message to a counterparty.
pub fn first_contact_delay() -> Duration {
    uniform_secs(FIRST_CONTACT_SECS)
}

/// Returns true when `text` opens with one of the afterthought `cues`.
pub fn starts_with_afterthought<S: AsRef<str>>(text: &str, cues: &[S]) -> bool {
    let lowered = text.trim().to_lowercase();
    cues.iter().any(|cue| {
        let cue = cue.as_ref().trim();
        !cue.is_empty() && lowered.starts_with(cue.to_lowercase().as_str())
    })
}

/// Band, in seconds, sampled by [`inter_part_delay`] for the part about to be sent.
pub fn inter_part_delay_band<S: AsRef<str>>(next_part: &str, cues: &[S]) -> (f64, f64) {
    let trimmed = next_part.trim();
    let chars = trimmed.chars().count();
    if chars < BURST_PART_CHARS {
        return BURST_PART_SECS;
    }
    if starts_with_afterthought(trimmed, cues) {
        return AFTERTHOUGHT_PART_SECS;
    }
    if chars < MODERATE_PART_CHARS {
        MODERATE_PART_SECS
    } else {
        LONG_PART_SECS
    }
}

/// Gap between two parts of the same response, chosen by the upcoming part.
pub fn inter_part_delay<S: AsRef<str>>(next_part: &str, cues: &[S]) -> Duration {
    uniform_secs(inter_part_delay_band(next_part, cues))
}

/// Delay model with a configurable afterthought vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HumanTiming {
    afterthought_cues: Vec<String>,
}

impl Default for HumanTiming {
    fn default() -> Self {
        Self::with_afterthought_cues(DEFAULT_AFTERTHOUGHT_CUES.iter().copied())
    }
}

impl HumanTiming {
    pub fn with_afterthought_cues<I, S>(cues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let afterthought_cues = cues
            .into_iter()
            .map(Into::into)
            .map(|cue: String| cue.trim().to_lowercase())
            .filter(|cue| !cue.is_empty())
            .collect();
        Self { afterthought_cues }
    }

    pub fn afterthought_cues(&self) -> &[String] {
        &self.afterthought_cues
    }

    pub fn reading_delay(&self, text: &str) -> Duration {
        reading_delay(text.chars().count())
    }

    pub fn thinking_delay(&self, text: &str) -> Duration {
        thinking_delay(text.chars().count())
    }

    pub fn typing_delay(&self, part: &str) -> Duration {
        typing_delay(part.chars().count())
    }

    pub fn inter_part_delay(&self, next_part: &str) -> Duration {
        inter_part_delay(next_part, &self.afterthought_cues)
    }

    pub fn first_contact_delay(&self) -> Duration {
        first_contact_delay()
    }
}
