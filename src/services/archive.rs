//! Streaming zip assembly for multi-file batches.
//!
//! A blocking task reads each object from storage and feeds it through a
//! `zip` stream writer whose output goes into a bounded channel. The HTTP body
//! drains that channel, so a slow client stalls the writer instead of the
//! archive piling up in memory. Nothing is written to disk.

use crate::{
    models::batch::FileDescriptor,
    services::keys,
    storage::ObjectStorage,
};
use anyhow::{Context, Result};
use bytes::Bytes;
use futures::Stream;
use std::{
    collections::HashSet,
    io::{self, BufWriter, Write},
    path::Path,
    sync::Arc,
};
use tokio::{runtime::Handle, sync::mpsc};
use tokio_util::io::SyncIoBridge;
use tracing::{debug, error};
use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

/// Chunks buffered between the zip writer and the response.
const CHANNEL_DEPTH: usize = 8;

/// Size of each chunk handed to the response body.
const CHUNK_SIZE: usize = 64 * 1024;

/// One archive member.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub key: String,
    pub name: String,
    pub size: i64,
}

/// Archive member names for `files`: base names only, made unique so every
/// file gets its own entry.
pub fn entries_for(files: &[FileDescriptor]) -> Vec<ArchiveEntry> {
    let mut taken = HashSet::new();
    files
        .iter()
        .enumerate()
        .map(|(idx, file)| {
            let fallback = format!("file-{}", idx + 1);
            let base = sanitize_entry_name(file.display_name(), &fallback);
            ArchiveEntry {
                key: file.key.clone(),
                name: keys::dedupe_name(&base, &mut taken),
                size: file.size,
            }
        })
        .collect()
}

/// Strip any directory part so entries cannot escape the extraction folder.
fn sanitize_entry_name(filename: &str, fallback: &str) -> String {
    Path::new(&filename.replace('\\', "/"))
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .unwrap_or(fallback)
        .to_string()
}

/// Stream a zip of `entries` as they are read from storage.
///
/// An error while assembling ends the stream with an `Err` item; whatever was
/// already sent is a truncated archive.
pub fn stream_zip(
    storage: Arc<dyn ObjectStorage>,
    entries: Vec<ArchiveEntry>,
) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(CHANNEL_DEPTH);
    let handle = Handle::current();

    tokio::task::spawn_blocking(move || {
        let count = entries.len();
        let writer = BufWriter::with_capacity(CHUNK_SIZE, ChannelWriter { tx: tx.clone() });
        match write_archive(&handle, storage.as_ref(), entries, writer) {
            Ok(()) => debug!(entries = count, "zip stream finished"),
            Err(err) => {
                error!(error = %format!("{:#}", err), "zip stream aborted");
                // Receiver may already be gone; nothing left to tell.
                let _ = tx.blocking_send(Err(io::Error::other(err.to_string())));
            }
        }
    });

    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
}

fn write_archive<W: Write>(
    handle: &Handle,
    storage: &dyn ObjectStorage,
    entries: Vec<ArchiveEntry>,
    writer: W,
) -> Result<()> {
    let mut zip = ZipWriter::new_stream(writer);

    for entry in entries {
        let reader = handle
            .block_on(storage.get_object(&entry.key))
            .with_context(|| format!("reading `{}` from storage", entry.key))?;
        let mut reader = SyncIoBridge::new_with_handle(reader, handle.clone());

        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(entry.size >= u32::MAX as i64)
            .unix_permissions(0o644);

        zip.start_file(entry.name.as_str(), options)
            .with_context(|| format!("adding `{}` to zip", entry.name))?;
        io::copy(&mut reader, &mut zip)
            .with_context(|| format!("writing `{}` into zip", entry.name))?;
    }

    let mut inner = zip.finish().context("finalizing zip")?;
    inner.flush().context("flushing zip")?;
    Ok(())
}

/// `Write` half of the response channel. Blocks while the channel is full.
struct ChannelWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.tx
            .blocking_send(Ok(Bytes::copy_from_slice(buf)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "download client went away"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
