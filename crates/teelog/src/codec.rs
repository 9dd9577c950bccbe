//! Append-only record writers, one per on-disk compression format

use crate::config::Compression;
use crate::{Error, Result};
use bzip2::write::BzEncoder;
use flate2::write::GzEncoder;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use xz2::write::XzEncoder;

#[cfg(windows)]
const TEXT_LINE_ENDING: &str = "\r\n";
#[cfg(not(windows))]
const TEXT_LINE_ENDING: &str = "\n";

/// How records are turned into bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// Newlines are written with the platform line ending
    Text,
    /// Record bytes are written unchanged with a `\n` terminator
    Binary,
}

impl StreamMode {
    pub fn from_binary(binary: bool) -> Self {
        if binary {
            StreamMode::Binary
        } else {
            StreamMode::Text
        }
    }
}

enum Sink {
    Plain(File),
    Gzip(GzEncoder<File>),
    Bzip2(BzEncoder<File>),
    Xz(XzEncoder<File>),
    Stderr(io::Stderr),
}

impl Sink {
    fn as_writer(&mut self) -> &mut dyn Write {
        match self {
            Sink::Plain(file) => file,
            Sink::Gzip(encoder) => encoder,
            Sink::Bzip2(encoder) => encoder,
            Sink::Xz(encoder) => encoder,
            Sink::Stderr(stderr) => stderr,
        }
    }

    fn finish(&mut self) -> io::Result<()> {
        match self {
            Sink::Plain(file) => file.flush(),
            Sink::Gzip(encoder) => encoder.try_finish(),
            Sink::Bzip2(encoder) => encoder.try_finish(),
            Sink::Xz(encoder) => encoder.try_finish(),
            Sink::Stderr(stderr) => stderr.flush(),
        }
    }
}

/// An append-only record stream.
///
/// Every [`append`](CodecWriter::append) writes one record plus its line
/// terminator and flushes the codec, so a crash loses at most the record in
/// flight. Compressed streams are finalized when the writer is dropped;
/// reopening the same path appends a new member/stream, which the standard
/// multi-stream decoders read back transparently.
pub struct CodecWriter {
    sink: Sink,
    mode: StreamMode,
    compression: Compression,
    path: Option<PathBuf>,
}

impl CodecWriter {
    /// Open `path` for appending through the given codec.
    ///
    /// `level` overrides the codec's default level (gzip 9, bzip2 9, xz preset 6).
    pub fn open(
        path: &Path,
        compression: Compression,
        level: Option<u32>,
        mode: StreamMode,
    ) -> Result<Self> {
        compression.check_level(level)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let level = level.unwrap_or_else(|| compression.default_level());

        let sink = match compression {
            Compression::None => Sink::Plain(file),
            Compression::Gzip => Sink::Gzip(GzEncoder::new(file, flate2::Compression::new(level))),
            Compression::Bzip2 => Sink::Bzip2(BzEncoder::new(file, bzip2::Compression::new(level))),
            Compression::Xz => Sink::Xz(XzEncoder::new(file, level)),
        };

        tracing::debug!(
            teelog.event = "log_file_opened",
            file_path = %path.display(),
            compression = ?compression,
            mode = ?mode,
            "Log file opened"
        );

        Ok(Self {
            sink,
            mode,
            compression,
            path: Some(path.to_path_buf()),
        })
    }

    /// A writer on the process's stderr, used when no file can be opened
    pub fn stderr() -> Self {
        Self {
            sink: Sink::Stderr(io::stderr()),
            mode: StreamMode::Text,
            compression: Compression::None,
            path: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    /// Append one formatted record, terminate it and flush.
    pub fn append(&mut self, record: &str) -> io::Result<()> {
        let writer = self.sink.as_writer();
        match self.mode {
            StreamMode::Binary => {
                writer.write_all(record.as_bytes())?;
                writer.write_all(b"\n")?;
            }
            StreamMode::Text => {
                if TEXT_LINE_ENDING == "\n" {
                    writer.write_all(record.as_bytes())?;
                } else {
                    writer.write_all(record.replace('\n', TEXT_LINE_ENDING).as_bytes())?;
                }
                writer.write_all(TEXT_LINE_ENDING.as_bytes())?;
            }
        }
        writer.flush()
    }

    /// Finalize the codec stream
    pub fn finish(&mut self) -> Result<()> {
        self.sink.finish().map_err(|e| Error::Codec {
            message: format!("Failed to finalize {:?} stream: {}", self.compression, e),
        })
    }
}

impl Drop for CodecWriter {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            tracing::warn!(
                teelog.event = "codec_finish_failed",
                error = %e,
                "Failed to finalize log stream"
            );
        }
    }
}
