//! RDF decoding for imports, and the bounded pipe feeding the decoder.
//!
//! Formats are resolved by media type; every format oxigraph can parse is
//! registered. The [`ChannelReader`] turns an async byte stream into a blocking
//! [`Read`] with back-pressure: the producer is suspended while the pipe holds
//! `capacity` undelivered chunks.

use std::io::{self, Read};

use futures_util::{Stream, StreamExt};
use oxigraph::io::{RdfFormat, RdfParseError, RdfParser};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{CodecError, RepoError, RepoResult};
use crate::model::{Model, Statement};

/// Formats accepted by [`CodecRegistry::decoder_for`].
const FORMATS: [RdfFormat; 6] = [
    RdfFormat::Turtle,
    RdfFormat::NTriples,
    RdfFormat::NQuads,
    RdfFormat::TriG,
    RdfFormat::N3,
    RdfFormat::RdfXml,
];

/// Resolves media types to statement decoders.
#[derive(Debug, Clone, Default)]
pub struct CodecRegistry;

impl CodecRegistry {
    pub fn new() -> Self {
        Self
    }

    /// Media types with a registered decoder.
    pub fn supported_media_types(&self) -> Vec<&'static str> {
        FORMATS.iter().map(|f| f.media_type()).collect()
    }

    /// Decoder for `mime`, or `UnsupportedFormat`. Media type parameters such as
    /// `; charset=utf-8` are ignored.
    pub fn decoder_for(&self, mime: &str) -> RepoResult<RdfDecoder> {
        let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        RdfFormat::from_media_type(&essence)
            .map(|format| RdfDecoder { format })
            .ok_or_else(|| RepoError::UnsupportedFormat {
                mime: mime.to_string(),
                supported: self.supported_media_types().join(", "),
            })
    }
}

/// Parses one serialization into statements.
#[derive(Debug, Clone, Copy)]
pub struct RdfDecoder {
    format: RdfFormat,
}

impl RdfDecoder {
    pub fn format_name(&self) -> &'static str {
        self.format.name()
    }

    fn parse_error(&self, e: RdfParseError) -> CodecError {
        match e {
            RdfParseError::Io(source) => CodecError::Read { source },
            other => CodecError::Parse {
                format: self.format.name().to_string(),
                message: other.to_string(),
            },
        }
    }

    /// Feed each decoded statement to `sink`, stopping at the first error of
    /// either side. Returns the number of statements decoded.
    pub fn decode_with(
        &self,
        reader: impl Read,
        mut sink: impl FnMut(Statement) -> RepoResult<()>,
    ) -> RepoResult<usize> {
        let mut count = 0;
        for quad in RdfParser::from_format(self.format).for_reader(reader) {
            let quad = quad.map_err(|e| self.parse_error(e))?;
            sink(quad)?;
            count += 1;
        }
        Ok(count)
    }

    /// Decode the whole input. Any syntax or read error fails the whole decode;
    /// statements without a graph land in the default graph.
    pub fn decode(&self, reader: impl Read) -> Result<Model, CodecError> {
        let mut model = Model::new();
        for quad in RdfParser::from_format(self.format).for_reader(reader) {
            model.insert(quad.map_err(|e| self.parse_error(e))?);
        }
        Ok(model)
    }
}

/// Blocking reader over a bounded channel of byte chunks.
///
/// Must be read from a blocking context (e.g. `spawn_blocking`), never from an
/// async task.
pub struct ChannelReader {
    rx: mpsc::Receiver<io::Result<Vec<u8>>>,
    chunk: Vec<u8>,
    pos: usize,
}

impl ChannelReader {
    /// Spawn a task pumping `stream` into a pipe of `capacity` chunks.
    ///
    /// The pump stops after the first error chunk, at end of stream, or once the
    /// reader is dropped.
    pub fn pipe<S>(stream: S, capacity: usize) -> (Self, JoinHandle<()>)
    where
        S: Stream<Item = io::Result<Vec<u8>>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let pump = tokio::spawn(async move {
            let mut stream = Box::pin(stream);
            while let Some(chunk) = stream.next().await {
                let failed = chunk.is_err();
                if tx.send(chunk).await.is_err() || failed {
                    break;
                }
            }
        });
        let reader = Self {
            rx,
            chunk: Vec::new(),
            pos: 0,
        };
        (reader, pump)
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos >= self.chunk.len() {
            match self.rx.blocking_recv() {
                Some(Ok(chunk)) => {
                    self.chunk = chunk;
                    self.pos = 0;
                }
                Some(Err(e)) => return Err(e),
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.chunk.len() - self.pos);
        buf[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl std::fmt::Debug for ChannelReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelReader")
            .field("buffered", &(self.chunk.len() - self.pos.min(self.chunk.len())))
            .finish_non_exhaustive()
    }
}
