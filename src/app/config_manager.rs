//! Configuration lifecycle: merge CLI flags over the config file over defaults.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use archiver_core::download::{CONNECT_TIMEOUT, DEFAULT_TOOL, DEFAULT_TOOL_ARGS, READ_TIMEOUT};
use archiver_core::{EngineConfig, FetcherKind, FileConfig};

use crate::cli::DownloadArgs;

/// Everything a download run needs, after merging.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedDownload {
    pub(crate) export: PathBuf,
    pub(crate) output_dir: PathBuf,
    pub(crate) engine: EngineConfig,
    pub(crate) fetcher: FetcherKind,
    pub(crate) tool: String,
    pub(crate) tool_args: Vec<String>,
    pub(crate) connect_timeout: Duration,
    pub(crate) read_timeout: Duration,
    pub(crate) report_json: Option<PathBuf>,
}

/// Resolves the output directory shared by `download` and `status`.
pub(crate) fn resolve_output_dir(cli_value: Option<&PathBuf>, file: Option<&FileConfig>) -> PathBuf {
    cli_value
        .cloned()
        .or_else(|| file.and_then(|config| config.output_dir.clone()))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Applies CLI flags, then file values, then built-in defaults.
pub(crate) fn resolve_download(
    args: &DownloadArgs,
    file: Option<&FileConfig>,
) -> Result<ResolvedDownload> {
    let defaults = EngineConfig::default();

    let concurrency = args
        .concurrency
        .map(usize::from)
        .or_else(|| file.and_then(|config| config.concurrency))
        .unwrap_or(defaults.concurrency);

    let rate_limit_bytes_per_sec = args
        .rate_limit
        .or_else(|| file.and_then(FileConfig::rate_limit_bytes))
        .unwrap_or(defaults.rate_limit_bytes_per_sec);

    let max_retry_attempts = args
        .max_retries
        .map(u32::from)
        .or_else(|| file.and_then(|config| config.max_retries))
        .unwrap_or(defaults.max_retry_attempts);

    let base_retry_delay = args
        .retry_delay_ms
        .or_else(|| file.and_then(|config| config.retry_base_delay_ms))
        .map_or(defaults.base_retry_delay, Duration::from_millis);

    let max_retry_delay = file
        .and_then(|config| config.retry_max_delay_ms)
        .map_or(defaults.max_retry_delay, Duration::from_millis)
        .max(base_retry_delay);

    let shutdown_grace = file
        .and_then(|config| config.shutdown_grace_secs)
        .map_or(defaults.shutdown_grace, Duration::from_secs);

    let categories = if args.categories.is_empty() {
        file.and_then(|config| config.categories.clone())
            .unwrap_or_default()
    } else {
        args.categories.clone()
    };

    let engine = EngineConfig {
        concurrency,
        rate_limit_bytes_per_sec,
        max_retry_attempts,
        base_retry_delay,
        max_retry_delay,
        shutdown_grace,
        categories,
    };
    engine.validate()?;

    let tool = args
        .tool
        .clone()
        .or_else(|| file.and_then(|config| config.tool.clone()))
        .unwrap_or_else(|| DEFAULT_TOOL.to_string());
    if tool.trim().is_empty() {
        bail!("--tool must not be empty");
    }

    let tool_args = file
        .and_then(|config| config.tool_args.clone())
        .unwrap_or_else(|| DEFAULT_TOOL_ARGS.iter().map(ToString::to_string).collect());

    Ok(ResolvedDownload {
        export: args.export.clone(),
        output_dir: resolve_output_dir(args.output_dir.as_ref(), file),
        engine,
        fetcher: args
            .fetcher
            .or_else(|| file.and_then(|config| config.fetcher))
            .unwrap_or_default(),
        tool,
        tool_args,
        connect_timeout: args
            .connect_timeout_secs
            .or_else(|| file.and_then(|config| config.connect_timeout_secs))
            .map_or(CONNECT_TIMEOUT, Duration::from_secs),
        read_timeout: args
            .read_timeout_secs
            .or_else(|| file.and_then(|config| config.read_timeout_secs))
            .map_or(READ_TIMEOUT, Duration::from_secs),
        report_json: args.report_json.clone(),
    })
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use archiver_core::Category;
    use archiver_core::config::parse_config_str;
    use clap::Parser;

    use super::*;
    use crate::cli::{Cli, Command};

    fn download_args(argv: &[&str]) -> DownloadArgs {
        let mut full = vec!["archiver", "download", "export.json"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Command::Download(args) => args,
            Command::Status(_) => unreachable!(),
        }
    }

    fn file(raw: &str) -> FileConfig {
        parse_config_str(raw, Path::new("config.toml")).unwrap()
    }

    #[test]
    fn test_resolve_download_defaults_without_file() {
        let resolved = resolve_download(&download_args(&[]), None).unwrap();

        assert_eq!(resolved.output_dir, PathBuf::from("."));
        assert_eq!(resolved.engine, EngineConfig::default());
        assert_eq!(resolved.fetcher, FetcherKind::External);
        assert_eq!(resolved.tool, "yt-dlp");
        assert_eq!(resolved.tool_args.len(), DEFAULT_TOOL_ARGS.len());
        assert_eq!(resolved.connect_timeout, CONNECT_TIMEOUT);
        assert_eq!(resolved.read_timeout, READ_TIMEOUT);
    }

    #[test]
    fn test_resolve_download_file_values_apply() {
        let config = file(
            "output_dir = \"/srv/archive\"\nconcurrency = 4\nrate_limit = \"1M\"\nfetcher = \"http\"\ncategories = [\"liked\"]\n",
        );
        let resolved = resolve_download(&download_args(&[]), Some(&config)).unwrap();

        assert_eq!(resolved.output_dir, PathBuf::from("/srv/archive"));
        assert_eq!(resolved.engine.concurrency, 4);
        assert_eq!(resolved.engine.rate_limit_bytes_per_sec, 1024 * 1024);
        assert_eq!(resolved.engine.categories, vec![Category::Liked]);
        assert_eq!(resolved.fetcher, FetcherKind::Http);
    }

    #[test]
    fn test_resolve_download_cli_overrides_file() {
        let config = file("concurrency = 4\nrate_limit = \"1M\"\nmax_retries = 5\ntool = \"gallery-dl\"\n");
        let args = download_args(&[
            "-c", "8", "-l", "0", "-r", "2", "--tool", "yt-dlp", "-o", "out",
        ]);
        let resolved = resolve_download(&args, Some(&config)).unwrap();

        assert_eq!(resolved.engine.concurrency, 8);
        assert_eq!(resolved.engine.rate_limit_bytes_per_sec, 0);
        assert_eq!(resolved.engine.max_retry_attempts, 2);
        assert_eq!(resolved.tool, "yt-dlp");
        assert_eq!(resolved.output_dir, PathBuf::from("out"));
    }

    #[test]
    fn test_resolve_download_max_delay_never_below_base() {
        let args = download_args(&["--retry-delay-ms", "60000"]);
        let resolved = resolve_download(&args, None).unwrap();

        assert_eq!(resolved.engine.base_retry_delay, Duration::from_secs(60));
        assert_eq!(resolved.engine.max_retry_delay, Duration::from_secs(60));
    }

    #[test]
    fn test_resolve_output_dir_precedence() {
        let config = file("output_dir = \"from-file\"");
        assert_eq!(
            resolve_output_dir(Some(&PathBuf::from("cli")), Some(&config)),
            PathBuf::from("cli")
        );
        assert_eq!(
            resolve_output_dir(None, Some(&config)),
            PathBuf::from("from-file")
        );
        assert_eq!(resolve_output_dir(None, None), PathBuf::from("."));
    }
}
