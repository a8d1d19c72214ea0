//! Parser for JSON account exports.
//!
//! An export is one large JSON document. Media references live in a handful
//! of well-known lists:
//!
//! | Path | Category |
//! |------|----------|
//! | `Activity > Like List > ItemFavoriteList` | liked |
//! | `Activity > Favorite Videos > FavoriteVideoList` | favorites |
//! | `Activity > Video Browsing History > VideoList` | history |
//! | `Activity > Share History > ShareHistoryList` | shared |
//! | `Direct Messages > Chat History > ChatHistory` | chat |
//! | `Profile > Profile Information > ProfileMap` | profile |
//!
//! Anything else in the document is ignored, as are entries without a usable
//! link. Missing sections are not an error.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use super::{JobSource, SourceError};
use crate::job::{Category, Job};

/// Substring identifying a shared video link inside a chat message.
pub const CHAT_URL_MARKER: &str = "https://www.tiktokv.com/share/video/";

/// Longest sanitized filename component, in characters.
pub const MAX_FILENAME_LEN: usize = 100;

const LINK_FIELDS: [&str; 6] = ["link", "Link", "shareURL", "ShareURL", "videoURL", "VideoURL"];

const CHAT_KEY_PREFIX: &str = "Chat History with ";

const PROFILE_BASE_URL: &str = "https://www.tiktok.com/@";

const ARTIFACT_EXTENSION: &str = "mp4";

#[allow(clippy::expect_used)]
static VIDEO_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:/video/|/v/)(\d+)").expect("video id regex is valid")
});

/// `(section, list name, list key, category)` for the flat video lists.
const ACTIVITY_LISTS: [(&str, &str, &str, Category); 4] = [
    ("Activity", "Like List", "ItemFavoriteList", Category::Liked),
    ("Activity", "Favorite Videos", "FavoriteVideoList", Category::Favorites),
    ("Activity", "Video Browsing History", "VideoList", Category::History),
    ("Activity", "Share History", "ShareHistoryList", Category::Shared),
];

/// Jobs extracted from an export, with per-category counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedExport {
    pub jobs: Vec<Job>,
    /// Entries found per category, including repeats of the same video.
    pub counts: BTreeMap<Category, usize>,
}

impl ParsedExport {
    #[must_use]
    pub fn count(&self, category: Category) -> usize {
        self.counts.get(&category).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.jobs.len()
    }

    fn push(&mut self, job: Job) {
        *self.counts.entry(job.category).or_insert(0) += 1;
        self.jobs.push(job);
    }
}

/// A JSON export file on disk, mapped into jobs under `output_dir`.
#[derive(Debug, Clone)]
pub struct ExportSource {
    path: PathBuf,
    output_dir: PathBuf,
}

impl ExportSource {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            output_dir: output_dir.into(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads and parses the export file.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the file cannot be read, is not JSON, or
    /// its top level is not an object.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn parse(&self) -> Result<ParsedExport, SourceError> {
        let raw = std::fs::read(&self.path).map_err(|source| SourceError::Read {
            path: self.path.clone(),
            source,
        })?;
        let document: Value = serde_json::from_slice(&raw).map_err(|source| SourceError::Json {
            path: self.path.clone(),
            source,
        })?;
        if !document.is_object() {
            return Err(SourceError::NotAnObject {
                path: self.path.clone(),
            });
        }

        let parsed = parse_export(&document, &self.output_dir);
        info!(jobs = parsed.total(), "parsed export");
        Ok(parsed)
    }

    /// Same as [`ExportSource::parse`], run on tokio's blocking pool so a
    /// large export never stalls the async workers.
    ///
    /// # Errors
    ///
    /// Returns the [`SourceError`] from parsing, or [`SourceError::Task`]
    /// if the blocking task panicked.
    pub async fn load(self) -> Result<ParsedExport, SourceError> {
        tokio::task::spawn_blocking(move || self.parse()).await?
    }
}

impl JobSource for ExportSource {
    fn provide_jobs(&self) -> Result<Vec<Job>, SourceError> {
        self.parse().map(|parsed| parsed.jobs)
    }
}

/// Extracts every job from an export document.
#[must_use]
pub fn parse_export(document: &Value, output_dir: &Path) -> ParsedExport {
    let mut parsed = ParsedExport::default();

    for (section, name, list_key, category) in ACTIVITY_LISTS {
        let Some(entries) = lookup(document, &[section, name, list_key]).and_then(Value::as_array)
        else {
            continue;
        };
        let folder = output_dir.join(category.folder_name());
        for url in entries.iter().filter_map(entry_link) {
            parsed.push(media_job(category, None, url, &folder));
        }
    }

    if let Some(chats) =
        lookup(document, &["Direct Messages", "Chat History", "ChatHistory"]).and_then(Value::as_object)
    {
        parse_chats(chats, output_dir, &mut parsed);
    }

    if let Some(user) = lookup(
        document,
        &["Profile", "Profile Information", "ProfileMap", "userName"],
    )
    .and_then(Value::as_str)
    .map(str::trim)
    .filter(|user| !user.is_empty())
    {
        let folder = output_dir.join(Category::Profile.folder_name());
        let url = format!("{PROFILE_BASE_URL}{user}");
        parsed.push(media_job(Category::Profile, None, &url, &folder));
    }

    for (category, count) in &parsed.counts {
        debug!(%category, count, "export category");
    }

    parsed
}

fn parse_chats(chats: &Map<String, Value>, output_dir: &Path, parsed: &mut ParsedExport) {
    for (key, messages) in chats {
        let Some(user) = key.strip_prefix(CHAT_KEY_PREFIX) else {
            continue;
        };
        let user = user.trim_end_matches(':');
        let Some(messages) = messages.as_array() else {
            continue;
        };

        let folder = output_dir
            .join(Category::Chat.folder_name())
            .join(chat_folder_name(user));

        for content in messages
            .iter()
            .filter_map(|message| message.get("Content").and_then(Value::as_str))
        {
            if let Some(url) = content
                .split_whitespace()
                .find(|word| word.contains(CHAT_URL_MARKER))
            {
                parsed.push(media_job(Category::Chat, Some(user), url, &folder));
            }
        }
    }
}

fn lookup<'a>(document: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(document, |node, key| node.get(key))
}

fn entry_link(entry: &Value) -> Option<&str> {
    let entry = entry.as_object()?;
    LINK_FIELDS.iter().find_map(|field| {
        entry
            .get(*field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|url| !url.is_empty())
    })
}

fn media_job(category: Category, scope: Option<&str>, url: &str, folder: &Path) -> Job {
    let key = media_key(url);
    let id = match scope {
        Some(scope) => format!("{category}:{scope}:{key}"),
        None => format!("{category}:{key}"),
    };
    let destination = folder.join(format!("{key}.{ARTIFACT_EXTENSION}"));
    Job::new(id, url, category, destination)
}

/// Stable per-URL key: the numeric video id if present, else a hash prefix.
fn media_key(url: &str) -> String {
    if let Some(captures) = VIDEO_ID_PATTERN.captures(url)
        && let Some(id) = captures.get(1)
    {
        return id.as_str().to_string();
    }

    hex_digest(url, 8)
}

/// Folder for one correspondent's media.
///
/// Names that sanitizing would change get a hash suffix of the raw name, so
/// `a/b` and `ab` never share a folder.
fn chat_folder_name(user: &str) -> String {
    let sanitized = sanitize_filename(user);
    if sanitized == user {
        sanitized
    } else {
        format!("{sanitized}-{}", hex_digest(user, 4))
    }
}

fn hex_digest(text: &str, bytes: usize) -> String {
    Sha256::digest(text.as_bytes())
        .iter()
        .take(bytes)
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

/// Makes `name` safe to use as a single path component.
///
/// Removes `< > : " / \ | ? *` and control characters, trims surrounding
/// whitespace and limits the result to [`MAX_FILENAME_LEN`] characters.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|&c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
        .filter(|c| !c.is_control())
        .collect();
    let truncated: String = cleaned.trim().chars().take(MAX_FILENAME_LEN).collect();
    let truncated = truncated.trim_end();

    if truncated.is_empty() || truncated.chars().all(|c| c == '.') {
        "unknown".to_string()
    } else {
        truncated.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sample_export() -> Value {
        json!({
            "Activity": {
                "Like List": {
                    "ItemFavoriteList": [
                        {"date": "2024-01-01", "link": "https://www.tiktokv.com/share/video/7100000000000000001/"},
                        {"date": "2024-01-02", "Link": "https://www.tiktokv.com/share/video/7100000000000000002/"},
                        {"date": "2024-01-03"}
                    ]
                },
                "Favorite Videos": {
                    "FavoriteVideoList": [
                        {"Link": "https://www.tiktokv.com/share/video/7200000000000000001/"}
                    ]
                },
                "Video Browsing History": {
                    "VideoList": [
                        {"VideoLink": "ignored", "videoURL": "https://www.tiktok.com/v/7300000000000000001.html"}
                    ]
                },
                "Share History": {
                    "ShareHistoryList": [
                        {"shareURL": ""},
                        {"ShareURL": "https://example.com/clip"}
                    ]
                }
            },
            "Direct Messages": {
                "Chat History": {
                    "ChatHistory": {
                        "Chat History with alice:": [
                            {"Content": "look https://www.tiktokv.com/share/video/7400000000000000001/ lol"},
                            {"Content": "no link here"},
                            {"From": "alice"}
                        ],
                        "Something else": [
                            {"Content": "https://www.tiktokv.com/share/video/7400000000000000002/"}
                        ]
                    }
                }
            },
            "Profile": {
                "Profile Information": {
                    "ProfileMap": {"userName": "someone"}
                }
            }
        })
    }

    #[test]
    fn test_parse_export_extracts_all_categories() {
        let parsed = parse_export(&sample_export(), Path::new("/out"));

        assert_eq!(parsed.count(Category::Liked), 2);
        assert_eq!(parsed.count(Category::Favorites), 1);
        assert_eq!(parsed.count(Category::History), 1);
        assert_eq!(parsed.count(Category::Shared), 1);
        assert_eq!(parsed.count(Category::Chat), 1);
        assert_eq!(parsed.count(Category::Profile), 1);
        assert_eq!(parsed.total(), 7);
    }

    #[test]
    fn test_parse_export_ids_and_destinations() {
        let parsed = parse_export(&sample_export(), Path::new("/out"));
        let liked = &parsed.jobs[0];

        assert_eq!(liked.id, "liked:7100000000000000001");
        assert_eq!(
            liked.destination_path,
            PathBuf::from("/out/Likes/7100000000000000001.mp4")
        );

        let history = parsed
            .jobs
            .iter()
            .find(|job| job.category == Category::History)
            .unwrap();
        assert_eq!(history.id, "history:7300000000000000001");
    }

    #[test]
    fn test_parse_export_chat_jobs_are_scoped_by_user() {
        let parsed = parse_export(&sample_export(), Path::new("/out"));
        let chat = parsed
            .jobs
            .iter()
            .find(|job| job.category == Category::Chat)
            .unwrap();

        assert_eq!(chat.id, "chat:alice:7400000000000000001");
        assert_eq!(
            chat.source_url,
            "https://www.tiktokv.com/share/video/7400000000000000001/"
        );
        assert_eq!(
            chat.destination_path,
            PathBuf::from("/out/ChatHistory/alice/7400000000000000001.mp4")
        );
    }

    #[test]
    fn test_parse_export_chat_users_differing_only_in_reserved_characters_stay_apart() {
        let shared = "see https://www.tiktokv.com/share/video/7400000000000000009/";
        let document = json!({
            "Direct Messages": {"Chat History": {"ChatHistory": {
                "Chat History with a/b:": [{"Content": shared}],
                "Chat History with ab:": [{"Content": shared}]
            }}}
        });

        let parsed = parse_export(&document, Path::new("/out"));
        let ids: Vec<_> = parsed.jobs.iter().map(|job| job.id.as_str()).collect();
        assert_eq!(
            ids,
            ["chat:a/b:7400000000000000009", "chat:ab:7400000000000000009"]
        );

        let slashed = &parsed.jobs[0].destination_path;
        let plain = &parsed.jobs[1].destination_path;
        assert_ne!(slashed, plain);
        assert_eq!(
            *plain,
            PathBuf::from("/out/ChatHistory/ab/7400000000000000009.mp4")
        );
        let folder = slashed.parent().unwrap().file_name().unwrap().to_str().unwrap();
        assert!(folder.starts_with("ab-"));
        assert_eq!(folder.len(), "ab-".len() + 8);
    }

    #[test]
    fn test_parse_export_profile_job() {
        let parsed = parse_export(&sample_export(), Path::new("/out"));
        let profile = parsed
            .jobs
            .iter()
            .find(|job| job.category == Category::Profile)
            .unwrap();

        assert_eq!(profile.source_url, "https://www.tiktok.com/@someone");
        assert!(profile.id.starts_with("profile:"));
    }

    #[test]
    fn test_parse_export_hashes_urls_without_video_id() {
        let parsed = parse_export(&sample_export(), Path::new("/out"));
        let shared = parsed
            .jobs
            .iter()
            .find(|job| job.category == Category::Shared)
            .unwrap();

        let key = shared.id.strip_prefix("shared:").unwrap();
        assert_eq!(key.len(), 16);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_parse_export_ids_are_stable() {
        let first = parse_export(&sample_export(), Path::new("/a"));
        let second = parse_export(&sample_export(), Path::new("/b"));
        let ids = |parsed: &ParsedExport| {
            parsed
                .jobs
                .iter()
                .map(|job| job.id.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(&first), ids(&second));
    }

    #[test]
    fn test_parse_export_empty_document() {
        let parsed = parse_export(&json!({}), Path::new("/out"));
        assert!(parsed.jobs.is_empty());
        assert!(parsed.counts.is_empty());
    }

    #[test]
    fn test_parse_export_ignores_wrong_shapes() {
        let document = json!({
            "Activity": {"Like List": {"ItemFavoriteList": "not a list"}},
            "Direct Messages": {"Chat History": {"ChatHistory": []}},
            "Profile": {"Profile Information": {"ProfileMap": {"userName": "  "}}}
        });
        assert!(parse_export(&document, Path::new("/out")).jobs.is_empty());
    }

    #[test]
    fn test_sanitize_filename_removes_reserved_characters() {
        assert_eq!(sanitize_filename("a<b>c:d\"e/f\\g|h?i*j"), "abcdefghij");
        assert_eq!(sanitize_filename("tab\there\u{7}"), "tabhere");
        assert_eq!(sanitize_filename("  padded  "), "padded");
    }

    #[test]
    fn test_sanitize_filename_limits_length() {
        let long = "x".repeat(250);
        assert_eq!(sanitize_filename(&long).chars().count(), MAX_FILENAME_LEN);
    }

    #[test]
    fn test_sanitize_filename_never_empty_or_dots() {
        assert_eq!(sanitize_filename("///"), "unknown");
        assert_eq!(sanitize_filename(".."), "unknown");
    }

    #[test]
    fn test_export_source_reports_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = ExportSource::new(&path, dir.path()).parse().unwrap_err();
        assert!(matches!(err, SourceError::Json { .. }));
    }

    #[test]
    fn test_export_source_rejects_non_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();

        let err = ExportSource::new(&path, dir.path()).parse().unwrap_err();
        assert!(matches!(err, SourceError::NotAnObject { .. }));
    }

    #[tokio::test]
    async fn test_export_source_load_parses_on_blocking_pool() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.json");
        tokio::fs::write(&path, sample_export().to_string()).await.unwrap();

        let parsed = ExportSource::new(&path, dir.path()).load().await.unwrap();
        assert_eq!(parsed.total(), 7);
        assert_eq!(parsed, ExportSource::new(&path, dir.path()).parse().unwrap());
    }

    #[tokio::test]
    async fn test_export_source_load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");

        let err = ExportSource::new(&path, dir.path()).load().await.unwrap_err();
        assert!(matches!(err, SourceError::Read { .. }));
    }

    #[test]
    fn test_export_source_provides_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.json");
        std::fs::write(&path, sample_export().to_string()).unwrap();

        let jobs = ExportSource::new(&path, dir.path().join("out"))
            .provide_jobs()
            .unwrap();
        assert_eq!(jobs.len(), 7);
        assert!(jobs[0].destination_path.starts_with(dir.path().join("out")));
    }
}
