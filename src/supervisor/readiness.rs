use std::io::{ErrorKind, SeekFrom};
use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::errors::HarnessResult;

/// Scans the tail of `path` backwards, line by line, for `marker`. At most
/// `max_bytes` from the end of the file are read on each call. A log that does
/// not exist yet contains nothing.
pub async fn log_contains_marker(
    path: &Path,
    marker: &str,
    max_bytes: u64,
) -> HarnessResult<bool> {
    let mut file = match File::open(path).await {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err.into()),
    };

    let len = file.metadata().await?.len();
    let start = len.saturating_sub(max_bytes);
    if start > 0 {
        file.seek(SeekFrom::Start(start)).await?;
    }

    let mut buffer = Vec::with_capacity((len - start) as usize);
    file.take(max_bytes).read_to_end(&mut buffer).await?;
    let content = String::from_utf8_lossy(&buffer);
    Ok(content.lines().rev().any(|line| line.contains(marker)))
}
