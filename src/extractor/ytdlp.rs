#![forbid(unsafe_code)]

//! [`MediaExtractor`] backed by the `yt-dlp` executable.
//!
//! Every call spawns one child process, reads the single-line JSON info
//! dictionary it prints on stdout and maps any failure (spawn error, non-zero
//! exit, timeout, unparseable output) onto [`ExtractionFailed`].

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::{CacheClear, ExtractionFailed, ExtractionResult, ExtractorPolicy, MediaExtractor};

const CLEAR_CACHE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct YtDlpExtractor {
    binary: PathBuf,
    policy: ExtractorPolicy,
}

impl YtDlpExtractor {
    pub fn new(binary: impl Into<PathBuf>, policy: ExtractorPolicy) -> Self {
        Self {
            binary: binary.into(),
            policy,
        }
    }

    pub fn policy(&self) -> &ExtractorPolicy {
        &self.policy
    }

    /// Flags shared by every invocation: browser headers, retry counts and
    /// the capped backoff for transient HTTP failures.
    fn base_args(&self) -> Vec<String> {
        let mut args = vec![
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--no-progress".to_string(),
            "--retries".to_string(),
            self.policy.retries.to_string(),
            "--extractor-retries".to_string(),
            self.policy.extractor_retries.to_string(),
            "--fragment-retries".to_string(),
            self.policy.fragment_retries.to_string(),
            "--retry-sleep".to_string(),
            format!("http:{}", self.policy.backoff.as_retry_sleep_expr()),
        ];
        for (name, value) in &self.policy.http_headers {
            args.push("--add-headers".to_string());
            args.push(format!("{name}:{value}"));
        }
        args
    }

    fn metadata_args(&self, url: &str) -> Vec<String> {
        let mut args = self.base_args();
        args.push("--dump-single-json".to_string());
        args.push("--skip-download".to_string());
        args.push("--".to_string());
        args.push(url.to_string());
        args
    }

    fn download_args(&self, url: &str, output_dir: &Path) -> Vec<String> {
        let template = output_dir.join(&self.policy.output_template);
        let mut args = self.base_args();
        args.extend([
            "--dump-single-json".to_string(),
            "--no-simulate".to_string(),
            "--no-part".to_string(),
            "--format".to_string(),
            self.policy.format_selector.clone(),
            "--output".to_string(),
            template.to_string_lossy().into_owned(),
            "--".to_string(),
            url.to_string(),
        ]);
        args
    }

    async fn run(&self, args: Vec<String>, timeout: Duration) -> Result<Output, ExtractionFailed> {
        let mut command = Command::new(&self.binary);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(binary = %self.binary.display(), ?args, "spawning extractor");

        match tokio::time::timeout(timeout, command.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err)) => Err(ExtractionFailed::new(format!(
                "failed to launch {}: {err}",
                self.binary.display()
            ))),
            Err(_) => Err(ExtractionFailed::new(format!(
                "extractor timed out after {}s",
                timeout.as_secs()
            ))),
        }
    }

    async fn run_json(&self, args: Vec<String>) -> Result<ExtractionResult, ExtractionFailed> {
        let output = self.run(args, self.policy.timeout).await?;
        if !output.status.success() {
            return Err(ExtractionFailed::new(failure_reason(
                &output.stderr,
                &output.status.to_string(),
            )));
        }
        parse_info_json(&output.stdout)
    }
}

#[async_trait]
impl MediaExtractor for YtDlpExtractor {
    async fn fetch_metadata(&self, url: &str) -> Result<ExtractionResult, ExtractionFailed> {
        let mut result = self.run_json(self.metadata_args(url)).await?;
        result.formats = None;
        Ok(result)
    }

    async fn fetch_and_download(
        &self,
        url: &str,
        output_dir: &Path,
    ) -> Result<ExtractionResult, ExtractionFailed> {
        self.run_json(self.download_args(url, output_dir)).await
    }

    async fn list_formats(&self, url: &str) -> Result<ExtractionResult, ExtractionFailed> {
        self.run_json(self.metadata_args(url)).await
    }

    async fn clear_cache(&self) -> Result<CacheClear, ExtractionFailed> {
        let output = self
            .run(vec!["--rm-cache-dir".to_string()], CLEAR_CACHE_TIMEOUT)
            .await?;
        if output.status.success() {
            Ok(CacheClear::Cleared(
                String::from_utf8_lossy(&output.stdout).trim().to_string(),
            ))
        } else {
            Ok(CacheClear::Refused(failure_reason(
                &output.stderr,
                &output.status.to_string(),
            )))
        }
    }
}

/// The extractor prints its info dictionary as one JSON line; anything else
/// on stdout (stray diagnostics) is skipped.
fn parse_info_json(stdout: &[u8]) -> Result<ExtractionResult, ExtractionFailed> {
    let text = String::from_utf8_lossy(stdout);
    let line = text
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| line.starts_with('{'))
        .ok_or_else(|| ExtractionFailed::new("extractor produced no metadata"))?;
    serde_json::from_str(line)
        .map_err(|err| ExtractionFailed::new(format!("failed to parse extractor output: {err}")))
}

/// Picks the extractor's own error lines from stderr, falling back to the
/// last line and then to the exit status.
fn failure_reason(stderr: &[u8], status: &str) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    let errors: Vec<&str> = lines
        .iter()
        .copied()
        .filter(|line| line.starts_with("ERROR:"))
        .collect();
    if !errors.is_empty() {
        return errors.join("\n");
    }
    lines
        .last()
        .map(|line| line.to_string())
        .unwrap_or_else(|| format!("extractor exited with {status}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn failure_reason_prefers_error_lines() {
        let stderr = b"[TikTok] Extracting URL\nERROR: [TikTok] 123: Video not available\n";
        assert_eq!(
            failure_reason(stderr, "exit status: 1"),
            "ERROR: [TikTok] 123: Video not available"
        );
        assert_eq!(failure_reason(b"boom\n", "exit status: 1"), "boom");
        assert_eq!(
            failure_reason(b"", "exit status: 2"),
            "extractor exited with exit status: 2"
        );
    }

    #[test]
    fn parse_info_json_skips_noise() {
        let stdout = b"some diagnostic\n{\"title\":\"Clip\",\"ext\":\"mp4\"}\n";
        let parsed = parse_info_json(stdout).unwrap();
        assert_eq!(parsed.title.as_deref(), Some("Clip"));
        assert!(parse_info_json(b"nothing here").is_err());
        assert!(parse_info_json(b"{not json").is_err());
    }

    #[test]
    fn base_args_carry_headers_retries_and_backoff() {
        let extractor = YtDlpExtractor::new("yt-dlp", ExtractorPolicy::default());
        let args = extractor.base_args();
        let joined = args.join(" ");
        assert!(joined.contains("--extractor-retries 3"));
        assert!(joined.contains("--fragment-retries 3"));
        assert!(joined.contains("--retry-sleep http:exp=1:60:4"));
        assert!(args.iter().any(|a| a.starts_with("User-Agent:Mozilla/5.0")));
        assert!(args.iter().any(|a| a == "Referer:https://www.tiktok.com/"));
    }

    #[test]
    fn download_args_target_the_output_directory() {
        let extractor = YtDlpExtractor::new("yt-dlp", ExtractorPolicy::default());
        let args = extractor.download_args("https://example.test/v/1", Path::new("/data/abc"));
        let output = args
            .iter()
            .position(|a| a == "--output")
            .map(|i| args[i + 1].clone())
            .unwrap();
        assert_eq!(output, "/data/abc/%(title)s.%(ext)s");
        assert_eq!(args.last().map(String::as_str), Some("https://example.test/v/1"));
        assert!(args.iter().any(|a| a == "--no-simulate"));
    }

    #[cfg(unix)]
    fn install_stub(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("yt-dlp-stub");
        fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[cfg(unix)]
    const DOWNLOADING_STUB: &str = r#"
output=""
download=0
prev=""
for arg in "$@"; do
  if [ "$prev" = "--output" ]; then output="$arg"; fi
  if [ "$arg" = "--no-simulate" ]; then download=1; fi
  prev="$arg"
done
if [ "$download" = "1" ]; then
  target=$(printf '%s' "$output" | sed -e 's/%(title)s/Stub Clip/' -e 's/%(ext)s/mp4/')
  printf 'video-bytes' > "$target"
fi
printf '%s\n' '{"title":"Stub Clip","ext":"mp4","format":"h264 - 720x1280","format_id":"h264","formats":[{"format_id":"h264","ext":"mp4"}]}'
"#;

    #[cfg(unix)]
    #[tokio::test]
    async fn download_writes_into_output_dir() {
        let temp = TempDir::new().unwrap();
        let stub = install_stub(temp.path(), DOWNLOADING_STUB);
        let out_dir = temp.path().join("job");
        fs::create_dir_all(&out_dir).unwrap();

        let extractor = YtDlpExtractor::new(stub, ExtractorPolicy::default());
        let result = extractor
            .fetch_and_download("https://www.tiktok.com/@a/video/1", &out_dir)
            .await
            .unwrap();
        assert_eq!(result.title.as_deref(), Some("Stub Clip"));
        assert_eq!(
            fs::read_to_string(out_dir.join("Stub Clip.mp4")).unwrap(),
            "video-bytes"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn metadata_drops_formats_but_listing_keeps_them() {
        let temp = TempDir::new().unwrap();
        let stub = install_stub(temp.path(), DOWNLOADING_STUB);
        let extractor = YtDlpExtractor::new(stub, ExtractorPolicy::default());

        let meta = extractor.fetch_metadata("https://x.test/1").await.unwrap();
        assert!(meta.formats.is_none());

        let listed = extractor.list_formats("https://x.test/1").await.unwrap();
        assert_eq!(listed.format_list().len(), 1);
        assert!(listed.best_format().is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn extractor_errors_surface_verbatim() {
        let temp = TempDir::new().unwrap();
        let stub = install_stub(
            temp.path(),
            "echo 'ERROR: [TikTok] 42: Video unavailable in your region' >&2\nexit 1\n",
        );
        let extractor = YtDlpExtractor::new(stub, ExtractorPolicy::default());
        let err = extractor.fetch_metadata("https://x.test/42").await.unwrap_err();
        assert_eq!(err.reason, "ERROR: [TikTok] 42: Video unavailable in your region");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_extractor_times_out() {
        let temp = TempDir::new().unwrap();
        let stub = install_stub(temp.path(), "sleep 5\n");
        let policy = ExtractorPolicy {
            timeout: Duration::from_millis(200),
            ..ExtractorPolicy::default()
        };
        let extractor = YtDlpExtractor::new(stub, policy);
        let err = extractor.list_formats("https://x.test/1").await.unwrap_err();
        assert!(err.reason.contains("timed out"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn every_call_sends_the_browser_headers() {
        let temp = TempDir::new().unwrap();
        let record = temp.path().join("args.txt");
        let stub = install_stub(
            temp.path(),
            &format!(
                "for arg in \"$@\"; do printf '%s\\n' \"$arg\" >> '{}'; done\nprintf '%s\\n' '{{\"title\":\"t\"}}'\n",
                record.display()
            ),
        );
        let extractor = YtDlpExtractor::new(stub, ExtractorPolicy::default());
        extractor.fetch_metadata("https://x.test/1").await.unwrap();

        let recorded = fs::read_to_string(&record).unwrap();
        assert!(recorded.contains("Referer:https://www.tiktok.com/"));
        assert!(recorded.contains("Accept-Language:en-US,en;q=0.5"));
        assert!(recorded.contains("--skip-download"));
    }

    #[tokio::test]
    async fn missing_binary_is_an_extraction_failure() {
        let extractor = YtDlpExtractor::new(
            "/nonexistent/yt-dlp-binary",
            ExtractorPolicy::default(),
        );
        let err = extractor.fetch_metadata("https://x.test/1").await.unwrap_err();
        assert!(err.reason.contains("failed to launch"));
        assert!(extractor.clear_cache().await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn clear_cache_returns_output() {
        let temp = TempDir::new().unwrap();
        let stub = install_stub(temp.path(), "echo 'Removing cache dir /tmp/cache'\n");
        let extractor = YtDlpExtractor::new(stub, ExtractorPolicy::default());
        assert_eq!(
            extractor.clear_cache().await.unwrap(),
            CacheClear::Cleared("Removing cache dir /tmp/cache".into())
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn clear_cache_reports_non_zero_exit() {
        let temp = TempDir::new().unwrap();
        let stub = install_stub(temp.path(), "echo 'permission denied' >&2\nexit 1\n");
        let extractor = YtDlpExtractor::new(stub, ExtractorPolicy::default());
        assert_eq!(
            extractor.clear_cache().await.unwrap(),
            CacheClear::Refused("permission denied".into())
        );
    }
}
