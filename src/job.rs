//! Download jobs and their categories.
//!
//! A [`Job`] is one media item to fetch. Jobs are built once by a job source
//! and then shared read-only between workers.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Export category a job was discovered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// The account's own profile page.
    Profile,
    /// Liked videos.
    Liked,
    /// Favorited videos.
    Favorites,
    /// Watch history.
    History,
    /// Videos the user shared.
    Shared,
    /// Videos sent in direct messages.
    Chat,
}

impl Category {
    /// All categories, in extraction order.
    pub const ALL: [Category; 6] = [
        Category::Profile,
        Category::Liked,
        Category::Favorites,
        Category::History,
        Category::Shared,
        Category::Chat,
    ];

    /// Returns the lowercase identifier used in job ids, config and the CLI.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::Liked => "liked",
            Self::Favorites => "favorites",
            Self::History => "history",
            Self::Shared => "shared",
            Self::Chat => "chat",
        }
    }

    /// Output folder artifacts of this category are written under.
    #[must_use]
    pub fn folder_name(&self) -> &'static str {
        match self {
            Self::Profile => "Profile",
            Self::Liked => "Likes",
            Self::Favorites => "Favorites",
            Self::History => "History",
            Self::Shared => "Shared",
            Self::Chat => "ChatHistory",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a category name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown category '{0}'\n  Suggestion: Use one of: profile, liked, favorites, history, shared, chat")]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "profile" => Ok(Self::Profile),
            "liked" | "likes" => Ok(Self::Liked),
            "favorites" | "favourites" => Ok(Self::Favorites),
            "history" => Ok(Self::History),
            "shared" => Ok(Self::Shared),
            "chat" => Ok(Self::Chat),
            other => Err(UnknownCategory(other.to_string())),
        }
    }
}

/// One media item to download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Stable identifier, unique within a batch and across runs.
    pub id: String,
    /// Where the media is fetched from.
    pub source_url: String,
    /// Category the item was discovered in.
    pub category: Category,
    /// Final artifact path.
    pub destination_path: PathBuf,
}

impl Job {
    /// Creates a job.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        source_url: impl Into<String>,
        category: Category,
        destination_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            source_url: source_url.into(),
            category,
            destination_path: destination_path.into(),
        }
    }
}
