//! Segment-file event source
//!
//! Reads binlog segment files in increasing numeric order, validating the
//! 4-byte magic and framing events as (header, body) pairs. The reader never
//! seeks into the middle of a file: skipping events structurally (rather than
//! by offset) is what keeps table-map bindings intact for later row events.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, BufReader};
use tracing::{debug, info};

use crate::binlog::decoder::BinlogDecoder;
use crate::binlog::event::{EventHeader, BINLOG_MAGIC, EVENT_HEADER_SIZE};
use crate::common::error::{BinlensError, Result};
use crate::common::position;
use crate::source::{EventSource, SourcedEvent, StopBound};

/// Reads decoded events out of on-disk binlog segments.
#[derive(Debug)]
pub struct FileSource {
    dir: PathBuf,
    segment: String,
    reader: BufReader<File>,
    decoder: BinlogDecoder,
    stop: StopBound,
    done: bool,
}

impl FileSource {
    /// Open the source at the first segment. Parsing always starts at the
    /// top of the file; positional filtering happens downstream so that
    /// format-description and table-map events are never skipped over.
    pub async fn open(
        dir: impl Into<PathBuf>,
        start_segment: impl Into<String>,
        stop: StopBound,
    ) -> Result<Self> {
        let dir = dir.into();
        let segment = start_segment.into();
        let reader = open_segment(&dir, &segment).await?;
        info!(segment = %segment, "reading binlog segments from {}", dir.display());
        Ok(Self {
            dir,
            segment,
            reader,
            decoder: BinlogDecoder::new(),
            stop,
            done: false,
        })
    }

    /// Move to the next segment file. Returns false when the stream is done:
    /// single-segment mode, stop bound passed, or no further file on disk.
    async fn advance_segment(&mut self) -> Result<bool> {
        if !self.stop.follow_segments {
            return Ok(false);
        }
        let Some(next) = position::next_segment(&self.segment) else {
            return Ok(false);
        };
        if self.stop.segment_out_of_range(&next) {
            return Ok(false);
        }
        match open_segment(&self.dir, &next).await {
            Ok(reader) => {
                info!(segment = %next, "rolled over to next segment");
                self.reader = reader;
                self.segment = next;
                Ok(true)
            }
            Err(BinlensError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(segment = %next, "no further segment file");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

async fn open_segment(dir: &Path, name: &str) -> Result<BufReader<File>> {
    let path = dir.join(name);
    let mut file = File::open(&path).await?;
    let mut magic = [0u8; 4];
    match file.read_exact(&mut magic).await {
        Ok(_) if magic == BINLOG_MAGIC => Ok(BufReader::new(file)),
        Ok(_) => Err(BinlensError::NotALogFile(name.to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(BinlensError::NotALogFile(name.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Fill `buf` from the reader. Distinguishes clean end of input from a
/// partially read frame.
async fn read_frame(reader: &mut BufReader<File>, buf: &mut [u8]) -> Result<FrameRead> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Ok(if filled == 0 {
                FrameRead::Eof
            } else {
                FrameRead::Short
            });
        }
        filled += n;
    }
    Ok(FrameRead::Full)
}

enum FrameRead {
    Full,
    Short,
    Eof,
}

#[async_trait]
impl EventSource for FileSource {
    async fn next_event(&mut self) -> Result<Option<SourcedEvent>> {
        loop {
            if self.done {
                return Ok(None);
            }

            let mut head = [0u8; EVENT_HEADER_SIZE];
            match read_frame(&mut self.reader, &mut head).await? {
                FrameRead::Full => {}
                FrameRead::Eof => {
                    if self.advance_segment().await? {
                        continue;
                    }
                    self.done = true;
                    return Ok(None);
                }
                FrameRead::Short => {
                    self.done = true;
                    return Err(BinlensError::Truncated {
                        segment: self.segment.clone(),
                        offset: 0,
                    });
                }
            }

            let header = EventHeader::parse(&head)?;
            if header.event_size as usize <= EVENT_HEADER_SIZE {
                self.done = true;
                return Err(BinlensError::Corrupt {
                    segment: self.segment.clone(),
                    detail: format!("declared event size {} is too small", header.event_size),
                });
            }

            let mut body = vec![0u8; header.event_size as usize - EVENT_HEADER_SIZE];
            match read_frame(&mut self.reader, &mut body).await? {
                FrameRead::Full => {}
                FrameRead::Eof | FrameRead::Short => {
                    self.done = true;
                    return Err(BinlensError::Truncated {
                        segment: self.segment.clone(),
                        offset: header.start_position() as u64,
                    });
                }
            }

            let event = match self.decoder.decode_body(&header, &body) {
                Ok(event) => event,
                Err(e) => {
                    self.done = true;
                    return Err(BinlensError::Corrupt {
                        segment: self.segment.clone(),
                        detail: e.to_string(),
                    });
                }
            };

            let sourced = SourcedEvent {
                segment: self.segment.clone(),
                header,
                event,
            };
            if self.stop.reached(&sourced.position()) {
                self.done = true;
                return Ok(None);
            }
            return Ok(Some(sourced));
        }
    }
}
