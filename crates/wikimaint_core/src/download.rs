use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::batch::RowError;
use crate::mediawiki::WikiReadApi;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadedFile {
    pub file: String,
    pub path: PathBuf,
    pub bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadReport {
    pub dir: PathBuf,
    pub downloaded: Vec<DownloadedFile>,
    pub missing: Vec<String>,
    pub errors: Vec<RowError>,
    pub request_count: usize,
}

/// Download the original upload of each listed file into `dir`.
pub fn download_files<A: WikiReadApi>(
    api: &mut A,
    file_names: &[String],
    dir: &Path,
) -> Result<DownloadReport> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let mut report = DownloadReport {
        dir: dir.to_path_buf(),
        downloaded: Vec::new(),
        missing: Vec::new(),
        errors: Vec::new(),
        request_count: 0,
    };

    for name in file_names.iter().map(|name| name.trim()) {
        if name.is_empty() {
            continue;
        }
        match download_one(api, name, dir) {
            Ok(Some(file)) => {
                debug!(file = %file.file, bytes = file.bytes, "downloaded");
                report.downloaded.push(file);
            }
            Ok(None) => report.missing.push(name.to_string()),
            Err(error) => {
                warn!(file = name, "download failed: {error:#}");
                report.errors.push(RowError {
                    item: name.to_string(),
                    error: format!("{error:#}"),
                });
            }
        }
    }

    report.request_count = api.request_count();
    Ok(report)
}

fn download_one<A: WikiReadApi>(
    api: &mut A,
    name: &str,
    dir: &Path,
) -> Result<Option<DownloadedFile>> {
    let Some(url) = api.get_file_url(name)? else {
        return Ok(None);
    };
    let target = dir.join(local_file_name(name)?);
    let partial = target.with_extension(match target.extension() {
        Some(ext) => format!("{}.part", ext.to_string_lossy()),
        None => "part".to_string(),
    });

    let file =
        File::create(&partial).with_context(|| format!("failed to create {}", partial.display()))?;
    let mut sink = HashingWriter::new(BufWriter::new(file));
    let streamed = api.fetch_url(&url, &mut sink);
    let finished = streamed.and_then(|bytes| sink.finish().map(|digest| (bytes, digest)));
    let (bytes, digest) = match finished {
        Ok(done) => done,
        Err(error) => {
            drop(sink);
            let _ = fs::remove_file(&partial);
            return Err(error);
        }
    };

    fs::rename(&partial, &target)
        .with_context(|| format!("failed to move download into {}", target.display()))?;
    Ok(Some(DownloadedFile {
        file: name.to_string(),
        path: target,
        bytes,
        sha256: digest,
    }))
}

/// Base name of a wiki file title, without any `File:` prefix.
pub fn local_file_name(name: &str) -> Result<String> {
    let bare = name
        .trim()
        .strip_prefix("File:")
        .unwrap_or(name.trim());
    let base = bare.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if base.is_empty() || base == "." || base == ".." {
        bail!("cannot derive a local file name from `{name}`");
    }
    Ok(base.to_string())
}

/// Writes through to `inner` while hashing everything written.
struct HashingWriter<W: Write> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    /// Flush and return the first 8 bytes of the digest as hex.
    fn finish(&mut self) -> Result<String> {
        self.inner.flush().context("failed to flush download")?;
        let digest = self.hasher.clone().finalize();
        let mut output = String::with_capacity(16);
        for byte in digest.iter().take(8) {
            output.push_str(&format!("{byte:02x}"));
        }
        Ok(output)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
