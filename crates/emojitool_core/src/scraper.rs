use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use regex::Regex;
use reqwest::Url;
use reqwest::blocking::Client;
use serde::Serialize;

use crate::config::ToolConfig;
use crate::html::{decode_html, scan_tags, srcset_urls};
use crate::registry::{IMAGE_EXTENSIONS, is_image_file};

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub batch_size: usize,
    pub pause: Duration,
}

impl DownloadOptions {
    pub fn from_config(config: &ToolConfig) -> Self {
        Self {
            batch_size: config.batch_size(),
            pause: config.batch_pause(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DownloadOutcome {
    Downloaded { bytes: u64 },
    AlreadyPresent,
    DuplicateFilename,
    Empty,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub url: String,
    pub filename: Option<String>,
    pub outcome: DownloadOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScrapeReport {
    pub page_url: String,
    pub found: usize,
    pub downloaded: usize,
    pub already_present: usize,
    pub duplicate_filenames: usize,
    pub empty: usize,
    pub failed: usize,
    pub failures: Vec<(String, String)>,
    pub files_in_dir: usize,
}

impl ScrapeReport {
    fn tally(page_url: &str, found: usize, results: &[DownloadResult]) -> Self {
        let mut report = Self {
            page_url: page_url.to_string(),
            found,
            ..Self::default()
        };
        for result in results {
            match &result.outcome {
                DownloadOutcome::Downloaded { .. } => report.downloaded += 1,
                DownloadOutcome::AlreadyPresent => report.already_present += 1,
                DownloadOutcome::DuplicateFilename => report.duplicate_filenames += 1,
                DownloadOutcome::Empty => report.empty += 1,
                DownloadOutcome::Failed(message) => {
                    report.failed += 1;
                    report.failures.push((result.url.clone(), message.clone()));
                }
            }
        }
        report
    }
}

/// Collect every image URL on `image_host` referenced by the page.
///
/// Tag attributes are read first; a regex pass over the raw text then picks
/// up URLs living in inline styles, scripts or JSON blobs.
pub fn extract_image_urls(
    html: &str,
    page_url: &str,
    image_host: &str,
) -> Result<BTreeSet<String>> {
    let base = Url::parse(page_url).with_context(|| format!("invalid page URL {page_url}"))?;
    let mut urls = BTreeSet::new();

    for tag in scan_tags(html, "img") {
        for key in ["src", "data-src"] {
            if let Some(raw) = tag.attr(key)
                && let Some(url) = normalize_candidate(raw, &base, image_host)
            {
                urls.insert(url);
            }
        }
        if let Some(srcset) = tag.attr("srcset") {
            for raw in srcset_urls(&decode_html(srcset)) {
                if let Some(url) = normalize_candidate(&raw, &base, image_host) {
                    urls.insert(url);
                }
            }
        }
    }

    for tag in scan_tags(html, "source") {
        let candidates = tag
            .attr("srcset")
            .map(|srcset| srcset_urls(&decode_html(srcset)))
            .unwrap_or_default()
            .into_iter()
            .chain(tag.attr("src").map(ToString::to_string));
        for raw in candidates {
            if let Some(url) = normalize_candidate(&raw, &base, image_host) {
                urls.insert(url);
            }
        }
    }

    for tag in scan_tags(html, "a") {
        if let Some(raw) = tag.attr("href")
            && let Some(url) = normalize_candidate(raw, &base, image_host)
            && filename_from_url(&url).is_some_and(|name| is_image_file(&name))
        {
            urls.insert(url);
        }
    }

    let pattern = image_url_pattern(image_host)?;
    for found in pattern.find_iter(html) {
        if let Some(url) = normalize_candidate(found.as_str(), &base, image_host) {
            urls.insert(url);
        }
    }

    Ok(urls)
}

fn image_url_pattern(image_host: &str) -> Result<Regex> {
    let extensions = IMAGE_EXTENSIONS.join("|");
    let pattern = format!(
        r#"https?://(?i:{})/[^"'>\s]+\.(?i:{extensions})"#,
        regex::escape(image_host)
    );
    Regex::new(&pattern).with_context(|| format!("invalid image URL pattern {pattern}"))
}

fn normalize_candidate(raw: &str, base: &Url, image_host: &str) -> Option<String> {
    let decoded = decode_html(raw.trim());
    let candidate = decoded.trim();
    if candidate.is_empty() || candidate.starts_with("data:") {
        return None;
    }
    let mut url = Url::parse(candidate).or_else(|_| base.join(candidate)).ok()?;
    if !url.host_str()?.eq_ignore_ascii_case(image_host) {
        return None;
    }
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url.to_string())
}

/// Local file name for a download: the URL's last path segment, percent-decoded.
pub fn filename_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed
        .path_segments()?
        .rfind(|segment| !segment.is_empty())?
        .to_string();
    let decoded = urlencoding::decode(&segment).ok()?.into_owned();
    let decoded = decoded.trim();
    if decoded.is_empty()
        || decoded == "."
        || decoded == ".."
        || decoded.contains(['/', '\\'])
    {
        return None;
    }
    Some(decoded.to_string())
}

/// Download `urls` into `output_dir` in sequential batches of concurrent fetches.
///
/// `fetch` returns the body for one URL. A failure is recorded against that
/// URL only; the rest of the batch and later batches still run.
pub fn download_all_with<F>(
    urls: &[String],
    output_dir: &Path,
    options: &DownloadOptions,
    fetch: F,
) -> Result<Vec<DownloadResult>>
where
    F: Fn(&str) -> Result<Vec<u8>> + Sync,
{
    fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;

    let mut results = Vec::with_capacity(urls.len());
    let mut claimed = HashSet::new();
    let mut pending = Vec::new();
    for url in urls {
        match filename_from_url(url) {
            Some(filename) if claimed.insert(filename.clone()) => pending.push((url, filename)),
            Some(filename) => results.push(DownloadResult {
                url: url.clone(),
                filename: Some(filename),
                outcome: DownloadOutcome::DuplicateFilename,
            }),
            None => results.push(DownloadResult {
                url: url.clone(),
                filename: None,
                outcome: DownloadOutcome::Failed("cannot derive a file name".to_string()),
            }),
        }
    }

    let batch_size = options.batch_size.max(1);
    let batch_count = pending.len().div_ceil(batch_size);
    for (batch_index, batch) in pending.chunks(batch_size).enumerate() {
        tracing::info!(
            batch = batch_index + 1,
            of = batch_count,
            size = batch.len(),
            "downloading batch"
        );
        let fetch = &fetch;
        let batch_results = thread::scope(|scope| {
            let handles = batch
                .iter()
                .map(|(url, filename)| {
                    let handle =
                        scope.spawn(move || download_one(url, &output_dir.join(filename), fetch));
                    (url, filename, handle)
                })
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|(url, filename, handle)| DownloadResult {
                    url: (*url).clone(),
                    filename: Some(filename.clone()),
                    outcome: handle.join().unwrap_or_else(|_| {
                        DownloadOutcome::Failed("download task panicked".to_string())
                    }),
                })
                .collect::<Vec<_>>()
        });

        for result in &batch_results {
            if let DownloadOutcome::Failed(message) = &result.outcome {
                tracing::warn!(url = %result.url, error = %message, "download failed");
            }
        }
        results.extend(batch_results);

        if batch_index + 1 < batch_count && !options.pause.is_zero() {
            thread::sleep(options.pause);
        }
    }

    Ok(results)
}

fn download_one<F>(url: &str, target: &Path, fetch: &F) -> DownloadOutcome
where
    F: Fn(&str) -> Result<Vec<u8>>,
{
    if target.exists() {
        return DownloadOutcome::AlreadyPresent;
    }
    let body = match fetch(url) {
        Ok(body) => body,
        Err(error) => return DownloadOutcome::Failed(format!("{error:#}")),
    };
    if body.is_empty() {
        return DownloadOutcome::Empty;
    }
    match fs::write(target, &body) {
        Ok(()) => DownloadOutcome::Downloaded {
            bytes: body.len() as u64,
        },
        Err(error) => {
            DownloadOutcome::Failed(format!("failed to write {}: {error}", target.display()))
        }
    }
}

/// Fetch the gallery page, extract image URLs and download them into `output_dir`.
pub fn scrape(config: &ToolConfig, output_dir: &Path) -> Result<ScrapeReport> {
    let client = build_http_client(config)?;
    let user_agent = config.user_agent();
    let page_url = config.page_url();

    let response = client
        .get(page_url)
        .header("User-Agent", user_agent.as_str())
        .send()
        .with_context(|| format!("failed to fetch {page_url}"))?;
    let status = response.status();
    if !status.is_success() {
        bail!("HTTP {} while fetching {}", status.as_u16(), page_url);
    }
    let html = response.text().context("failed to read response body")?;

    let urls = extract_image_urls(&html, page_url, config.image_host())?
        .into_iter()
        .collect::<Vec<_>>();
    if urls.is_empty() {
        tracing::warn!(page_url, "no emoji images found");
        let mut report = ScrapeReport::tally(page_url, 0, &[]);
        report.files_in_dir = count_files(output_dir);
        return Ok(report);
    }

    let results = download_all_with(
        &urls,
        output_dir,
        &DownloadOptions::from_config(config),
        |url| fetch_bytes(&client, &user_agent, url),
    )?;
    let mut report = ScrapeReport::tally(page_url, urls.len(), &results);
    report.files_in_dir = count_files(output_dir);
    Ok(report)
}

fn fetch_bytes(client: &Client, user_agent: &str, url: &str) -> Result<Vec<u8>> {
    let response = client
        .get(url)
        .header("User-Agent", user_agent)
        .send()
        .with_context(|| format!("failed to fetch {url}"))?;
    let status = response.status();
    if !status.is_success() {
        bail!("HTTP {}", status.as_u16());
    }
    let body = response.bytes().context("failed to read response body")?;
    Ok(body.to_vec())
}

fn build_http_client(config: &ToolConfig) -> Result<Client> {
    Client::builder()
        .timeout(config.request_timeout())
        .build()
        .context("failed to build HTTP client")
}

fn count_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .filter(|entry| entry.file_type().is_ok_and(|ft| ft.is_file()))
                .count()
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::{Barrier, Mutex};
    use std::time::Instant;

    use anyhow::bail;
    use tempfile::tempdir;

    use super::*;

    const HOST: &str = "all-the.bufo.zone";

    fn options(batch_size: usize) -> DownloadOptions {
        DownloadOptions {
            batch_size,
            pause: Duration::ZERO,
        }
    }

    fn url(name: &str) -> String {
        format!("https://{HOST}/{name}")
    }

    #[test]
    fn extraction_merges_attributes_and_raw_text_without_duplicates() {
        let html = r#"
<html><body>
<img src="https://all-the.bufo.zone/bufo-dance.gif">
<img src="https://all-the.bufo.zone/bufo-dance.gif#frame" alt="again">
<img srcset="https://all-the.bufo.zone/bufo-dance.gif 1x, /local/other.png 2x">
<img data-src="//all-the.bufo.zone/bufo-sip.png">
<img src="https://elsewhere.example/bufo-fake.png">
<div style="background: url('https://all-the.bufo.zone/bufo-hype.webp')"></div>
<script>const list = ["https://all-the.bufo.zone/bufo-dance.gif", "https://all-the.bufo.zone/bufo%20cry.JPG"];</script>
<a href="https://all-the.bufo.zone/about">about</a>
</body></html>
"#;
        let urls = extract_image_urls(html, "https://bufo.zone", HOST).expect("extract");
        let urls = urls.into_iter().collect::<Vec<_>>();
        assert_eq!(
            urls,
            vec![
                url("bufo%20cry.JPG"),
                url("bufo-dance.gif"),
                url("bufo-hype.webp"),
                url("bufo-sip.png"),
            ]
        );
    }

    #[test]
    fn filename_comes_from_last_path_segment() {
        assert_eq!(
            filename_from_url(&url("nested/bufo-ok.png")),
            Some("bufo-ok.png".to_string())
        );
        assert_eq!(
            filename_from_url(&url("bufo%20cry.jpg?v=2")),
            Some("bufo cry.jpg".to_string())
        );
        assert_eq!(filename_from_url(&url("")), None);
        assert_eq!(filename_from_url(&url("..%2Fescape.png")), None);
    }

    #[test]
    fn existing_files_are_never_fetched() {
        let temp = tempdir().expect("tempdir");
        let dir = temp.path().join("emojis");
        fs::create_dir_all(&dir).expect("create dir");
        fs::write(dir.join("bufo-old.png"), b"old").expect("seed file");

        let calls = Mutex::new(Vec::new());
        let urls = vec![url("bufo-old.png"), url("bufo-new.png")];
        let results = download_all_with(&urls, &dir, &options(10), |requested| {
            calls.lock().expect("lock").push(requested.to_string());
            Ok(b"new".to_vec())
        })
        .expect("download");

        assert_eq!(calls.into_inner().expect("calls"), vec![url("bufo-new.png")]);
        assert_eq!(results[0].outcome, DownloadOutcome::AlreadyPresent);
        assert_eq!(
            results[1].outcome,
            DownloadOutcome::Downloaded { bytes: 3 }
        );
        assert_eq!(fs::read(dir.join("bufo-old.png")).expect("read"), b"old");
    }

    #[test]
    fn one_failure_does_not_stop_other_batches() {
        let temp = tempdir().expect("tempdir");
        let dir = temp.path().join("emojis");
        let urls = (0..7)
            .map(|index| url(&format!("bufo-{index}.png")))
            .collect::<Vec<_>>();
        let calls = Mutex::new(0usize);

        let results = download_all_with(&urls, &dir, &options(3), |requested| {
            *calls.lock().expect("lock") += 1;
            if requested.ends_with("bufo-1.png") {
                bail!("connection reset");
            }
            Ok(requested.as_bytes().to_vec())
        })
        .expect("download");

        assert_eq!(calls.into_inner().expect("calls"), 7);
        let report = ScrapeReport::tally("https://bufo.zone", urls.len(), &results);
        assert_eq!(report.downloaded, 6);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failures[0].0, url("bufo-1.png"));
        assert!(report.failures[0].1.contains("connection reset"));
        assert!(dir.join("bufo-6.png").exists());
        assert!(!dir.join("bufo-1.png").exists());
    }

    #[test]
    fn empty_bodies_are_counted_and_not_written() {
        let temp = tempdir().expect("tempdir");
        let dir = temp.path().join("emojis");
        let urls = vec![url("bufo-empty.png")];
        let results =
            download_all_with(&urls, &dir, &options(10), |_| Ok(Vec::new())).expect("download");
        assert_eq!(results[0].outcome, DownloadOutcome::Empty);
        assert!(!dir.join("bufo-empty.png").exists());
    }

    #[test]
    fn same_filename_from_two_urls_is_fetched_once() {
        let temp = tempdir().expect("tempdir");
        let dir = temp.path().join("emojis");
        let urls = vec![url("a/bufo.png"), url("b/bufo.png")];
        let calls = Mutex::new(0usize);
        let results = download_all_with(&urls, &dir, &options(10), |_| {
            *calls.lock().expect("lock") += 1;
            Ok(b"png".to_vec())
        })
        .expect("download");

        assert_eq!(calls.into_inner().expect("calls"), 1);
        let report = ScrapeReport::tally("https://bufo.zone", urls.len(), &results);
        assert_eq!(report.downloaded, 1);
        assert_eq!(report.duplicate_filenames, 1);
    }

    #[test]
    fn raw_text_pass_matches_host_case_insensitively() {
        let html = r#"<script>x="https://ALL-THE.bufo.zone/bufo-shout.png"</script>"#;
        let urls = extract_image_urls(html, "https://bufo.zone", HOST).expect("extract");
        assert_eq!(urls.len(), 1);
        let only = urls.into_iter().next().expect("one url");
        assert_eq!(only, url("bufo-shout.png"));
    }

    #[test]
    fn fetches_within_a_batch_run_concurrently() {
        let temp = tempdir().expect("tempdir");
        let dir = temp.path().join("emojis");
        let urls = (0..6)
            .map(|index| url(&format!("bufo-{index}.png")))
            .collect::<Vec<_>>();
        // Every fetch in a batch of 3 blocks until all 3 have started.
        let barrier = Barrier::new(3);

        let results = download_all_with(&urls, &dir, &options(3), |requested| {
            barrier.wait();
            Ok(requested.as_bytes().to_vec())
        })
        .expect("download");

        let report = ScrapeReport::tally("https://bufo.zone", urls.len(), &results);
        assert_eq!(report.downloaded, 6);
    }

    #[test]
    fn pause_runs_between_batches_only() {
        let temp = tempdir().expect("tempdir");
        let dir = temp.path().join("emojis");
        let urls = (0..5)
            .map(|index| url(&format!("bufo-{index}.png")))
            .collect::<Vec<_>>();
        let pause = Duration::from_millis(200);
        let options = DownloadOptions {
            batch_size: 2,
            pause,
        };

        let started = Instant::now();
        download_all_with(&urls, &dir, &options, |_| Ok(b"png".to_vec())).expect("download");
        let elapsed = started.elapsed();

        // three batches: two pauses, none after the last
        assert!(elapsed >= pause * 2, "elapsed {elapsed:?}");
        assert!(elapsed < pause * 3, "elapsed {elapsed:?}");
    }

    fn serve(listener: TcpListener, routes: Vec<(String, u16, Vec<u8>)>) {
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else {
                    break;
                };
                let mut request = Vec::new();
                let mut buffer = [0u8; 1024];
                while !request.windows(4).any(|window| window == b"\r\n\r\n") {
                    match stream.read(&mut buffer) {
                        Ok(0) | Err(_) => break,
                        Ok(read) => request.extend_from_slice(&buffer[..read]),
                    }
                }
                let request = String::from_utf8_lossy(&request);
                let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                let (status, body) = routes
                    .iter()
                    .find(|(route, _, _)| *route == path)
                    .map(|(_, status, body)| (*status, body.clone()))
                    .unwrap_or((404, b"missing".to_vec()));
                let head = format!(
                    "HTTP/1.1 {status} Fixture\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(head.as_bytes());
                let _ = stream.write_all(&body);
            }
        });
    }

    fn local_config(address: &str) -> ToolConfig {
        let mut config = ToolConfig::default();
        config.scraper.page_url = Some(format!("http://{address}/"));
        config.scraper.image_host = Some("127.0.0.1".to_string());
        config.scraper.pause_ms = Some(0);
        config
    }

    #[test]
    fn scrape_downloads_images_from_local_page() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let address = listener.local_addr().expect("address").to_string();
        let page = format!(
            r#"<html><img src="http://{address}/bufo-wave.png"><img src="/bufo-gone.gif"></html>"#
        );
        serve(
            listener,
            vec![
                ("/".to_string(), 200, page.into_bytes()),
                ("/bufo-wave.png".to_string(), 200, b"png-bytes".to_vec()),
            ],
        );

        let temp = tempdir().expect("tempdir");
        let dir = temp.path().join("emojis");
        let report = scrape(&local_config(&address), &dir).expect("scrape");

        assert_eq!(report.found, 2);
        assert_eq!(report.downloaded, 1);
        assert_eq!(report.failed, 1);
        assert!(report.failures[0].1.contains("HTTP 404"));
        assert_eq!(report.files_in_dir, 1);
        assert_eq!(fs::read(dir.join("bufo-wave.png")).expect("read"), b"png-bytes");
    }

    #[test]
    fn scrape_page_without_images_reports_zero() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let address = listener.local_addr().expect("address").to_string();
        serve(
            listener,
            vec![("/".to_string(), 200, b"<html><p>no frogs</p></html>".to_vec())],
        );

        let temp = tempdir().expect("tempdir");
        let dir = temp.path().join("emojis");
        fs::create_dir_all(&dir).expect("create dir");
        fs::write(dir.join("bufo-old.png"), b"old").expect("seed file");

        let report = scrape(&local_config(&address), &dir).expect("scrape");
        assert_eq!(report.found, 0);
        assert_eq!(report.downloaded, 0);
        assert_eq!(report.files_in_dir, 1);
    }

    #[test]
    fn scrape_fails_on_non_success_page() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let address = listener.local_addr().expect("address").to_string();
        serve(listener, vec![("/".to_string(), 503, b"down".to_vec())]);

        let temp = tempdir().expect("tempdir");
        let error = scrape(&local_config(&address), temp.path()).expect_err("must fail");
        assert!(error.to_string().contains("HTTP 503"), "{error:#}");
    }
}
