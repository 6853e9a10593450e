//! Reader preferences and the closed option sets offered at story setup.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Target reader age group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AgeGroup {
    #[serde(rename = "3-6")]
    Toddler,
    #[serde(rename = "7-10")]
    #[default]
    Child,
    #[serde(rename = "11-14")]
    Preteen,
    #[serde(rename = "15+")]
    Teen,
}

impl AgeGroup {
    pub const ALL: [AgeGroup; 4] = [
        AgeGroup::Toddler,
        AgeGroup::Child,
        AgeGroup::Preteen,
        AgeGroup::Teen,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgeGroup::Toddler => "3-6",
            AgeGroup::Child => "7-10",
            AgeGroup::Preteen => "11-14",
            AgeGroup::Teen => "15+",
        }
    }
}

/// Story genre.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Genre {
    #[default]
    Adventure,
    Fantasy,
    ScienceFiction,
    Mystery,
    Comedy,
    Educational,
}

impl Genre {
    pub const ALL: [Genre; 6] = [
        Genre::Adventure,
        Genre::Fantasy,
        Genre::ScienceFiction,
        Genre::Mystery,
        Genre::Comedy,
        Genre::Educational,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Genre::Adventure => "adventure",
            Genre::Fantasy => "fantasy",
            Genre::ScienceFiction => "science-fiction",
            Genre::Mystery => "mystery",
            Genre::Comedy => "comedy",
            Genre::Educational => "educational",
        }
    }
}

/// Illustration style requested from the image generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtStyle {
    #[default]
    Watercolor,
    Cartoon,
    PixelArt,
    Anime,
    Realistic,
    Sketch,
}

impl ArtStyle {
    pub const ALL: [ArtStyle; 6] = [
        ArtStyle::Watercolor,
        ArtStyle::Cartoon,
        ArtStyle::PixelArt,
        ArtStyle::Anime,
        ArtStyle::Realistic,
        ArtStyle::Sketch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtStyle::Watercolor => "watercolor",
            ArtStyle::Cartoon => "cartoon",
            ArtStyle::PixelArt => "pixel-art",
            ArtStyle::Anime => "anime",
            ArtStyle::Realistic => "realistic",
            ArtStyle::Sketch => "sketch",
        }
    }
}

macro_rules! option_set_traits {
    ($ty:ident, $label:literal) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $ty::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
                    .ok_or_else(|| {
                        let valid: Vec<_> = $ty::ALL.iter().map(|v| v.as_str()).collect();
                        format!(
                            "Invalid {}. Must be one of: {}",
                            $label,
                            valid.join(", ")
                        )
                    })
            }
        }
    };
}

option_set_traits!(AgeGroup, "age_group");
option_set_traits!(Genre, "genre");
option_set_traits!(ArtStyle, "art_style");

/// Per-profile reader preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub age_group: AgeGroup,
    pub genre: Genre,
    pub art_style: ArtStyle,
    pub auto_save: bool,
    pub narration_enabled: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            age_group: AgeGroup::default(),
            genre: Genre::default(),
            art_style: ArtStyle::default(),
            auto_save: true,
            narration_enabled: false,
        }
    }
}
