use serde::{Deserialize, Serialize};
use std::fmt;

pub const FALLBACK_TOKEN: &str = "UNKNOWN";

/// A label drawn from a fixed vocabulary, with `UNKNOWN` as the fallback.
pub trait Label: Copy + Eq + fmt::Debug + Send + 'static {
    const VOCABULARY: &'static [Self];

    fn fallback() -> Self;

    fn as_str(&self) -> &'static str;

    /// Exact lookup of an already-normalized token against canonical names and aliases.
    fn from_token(token: &str) -> Option<Self>;

    fn parse_reply(raw: &str) -> Option<Self> {
        Self::from_token(&normalize_reply(raw))
    }

    fn is_fallback(&self) -> bool {
        *self == Self::fallback()
    }
}

/// First line of the reply, trimmed and uppercased.
pub fn normalize_reply(raw: &str) -> String {
    raw.trim_start()
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .to_uppercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "&'static str")]
pub enum Category {
    Travel,
    Accommodation,
    Food,
    #[default]
    Unknown,
}

const CATEGORY_ALIASES: &[(&str, Category)] = &[
    ("AIRLINE", Category::Travel),
    ("HOTEL", Category::Accommodation),
];

impl Label for Category {
    const VOCABULARY: &'static [Self] = &[Self::Travel, Self::Accommodation, Self::Food];

    fn fallback() -> Self {
        Self::Unknown
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Travel => "TRAVEL",
            Self::Accommodation => "ACCOMMODATION",
            Self::Food => "FOOD",
            Self::Unknown => FALLBACK_TOKEN,
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        Self::VOCABULARY
            .iter()
            .copied()
            .find(|label| label.as_str() == token)
            .or_else(|| {
                CATEGORY_ALIASES
                    .iter()
                    .find(|(alias, _)| *alias == token)
                    .map(|(_, label)| *label)
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "&'static str")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
    #[default]
    Unknown,
}

impl Label for Sentiment {
    const VOCABULARY: &'static [Self] = &[Self::Positive, Self::Negative, Self::Neutral];

    fn fallback() -> Self {
        Self::Unknown
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "POSITIVE",
            Self::Negative => "NEGATIVE",
            Self::Neutral => "NEUTRAL",
            Self::Unknown => FALLBACK_TOKEN,
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        Self::VOCABULARY
            .iter()
            .copied()
            .find(|label| label.as_str() == token)
    }
}

// Callers hand back results they stored themselves, so decoding is lenient.
impl From<String> for Category {
    fn from(token: String) -> Self {
        Self::from_token(&token.trim().to_uppercase()).unwrap_or_default()
    }
}

impl From<String> for Sentiment {
    fn from(token: String) -> Self {
        Self::from_token(&token.trim().to_uppercase()).unwrap_or_default()
    }
}

impl From<Category> for &'static str {
    fn from(label: Category) -> Self {
        label.as_str()
    }
}

impl From<Sentiment> for &'static str {
    fn from(label: Sentiment) -> Self {
        label.as_str()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}
