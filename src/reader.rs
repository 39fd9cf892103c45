//! Streaming reader with handler dispatch.

use itertools::Itertools;
use log::{debug, info, trace};
use prost::Message;

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::buffer::Buffer;
use crate::entity::EntityFilter;
use crate::error::{Error, Result};
use crate::file::{File, FileFormat};
use crate::handler::{dispatch, Handler};
use crate::header::Header;
use crate::index::LocationHandler;
use crate::osmpbf::{self, BlobReader, BlobType, HeaderBlock, PrimitiveBlock};
use crate::stats::Stats;

/// What to read from: a path or a prepared file handle.
#[derive(Debug, Clone)]
pub enum Source {
    Path(PathBuf),
    File(File),
}

impl Source {
    fn into_file(self) -> File {
        match self {
            Source::Path(path) => File::new(path),
            Source::File(file) => file,
        }
    }
}

impl From<&str> for Source {
    fn from(path: &str) -> Self {
        Source::Path(path.into())
    }
}

impl From<String> for Source {
    fn from(path: String) -> Self {
        Source::Path(path.into())
    }
}

impl From<&Path> for Source {
    fn from(path: &Path) -> Self {
        Source::Path(path.into())
    }
}

impl From<PathBuf> for Source {
    fn from(path: PathBuf) -> Self {
        Source::Path(path)
    }
}

impl From<File> for Source {
    fn from(file: File) -> Self {
        Source::File(file)
    }
}

impl From<&File> for Source {
    fn from(file: &File) -> Self {
        Source::File(file.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApplyOptions {
    /// Resolve way node locations while dispatching.
    pub with_location_handler: bool,
    /// Leave unknown way node locations undefined instead of failing.
    pub ignore_missing_locations: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Exhausted,
    Closed,
}

/// Reads an OSM file block by block.
///
/// The header is decoded when the reader is constructed. Entities are
/// either pulled with [`Reader::read`] or pushed into handlers with
/// [`Reader::apply`]; the stream can be consumed only once.
#[derive(Debug)]
pub struct Reader {
    file: File,
    header: Header,
    filter: EntityFilter,
    blobs: Option<BlobReader<BufReader<fs::File>>>,
    state: State,
}

impl Reader {
    /// Opens `source`, reading all entity kinds.
    pub fn open(source: impl Into<Source>) -> Result<Self> {
        Self::with_filter(source, EntityFilter::all())
    }

    /// Opens `source`, reading only the entity kinds selected by `filter`.
    pub fn with_filter(source: impl Into<Source>, filter: EntityFilter) -> Result<Self> {
        let mut file = source.into().into_file();
        file.check_path()?;

        let mut input = BufReader::new(fs::File::open(file.path())?);
        if file.format() == FileFormat::Unknown {
            file.set_format(FileFormat::sniff(input.fill_buf()?));
        }
        if file.format() != FileFormat::Pbf {
            return Err(Error::UnsupportedFormat(format!(
                "cannot read {} as {}",
                file.path().display(),
                file.format()
            )));
        }

        let mut blobs = BlobReader::new(input);
        let header = match blobs.next_block()? {
            Some(block) if block.blob_type == BlobType::Header => {
                Header::from_pbf(HeaderBlock::decode(block.data.as_slice())?)
            }
            Some(_) => return Err(Error::malformed("file does not start with OSMHeader")),
            None => return Err(Error::malformed("empty file")),
        };
        for feature in &header.required_features {
            if !osmpbf::SUPPORTED_FEATURES.contains(&feature.as_str()) {
                return Err(Error::UnsupportedFeature(format!(
                    "required feature '{}'",
                    feature
                )));
            }
        }

        info!(
            "Opened {} (format: {}, generator: '{}')",
            file.path().display(),
            file.format(),
            header.generator()
        );
        debug!(
            "Required features: {}",
            header.required_features.iter().join(", ")
        );

        Ok(Self {
            file,
            header,
            filter,
            blobs: Some(blobs),
            state: State::Open,
        })
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn filter(&self) -> EntityFilter {
        self.filter
    }

    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    /// Returns the next buffer of entities, `None` at the end of the stream.
    pub fn read(&mut self) -> Result<Option<Buffer>> {
        match self.state {
            State::Closed => return Err(Error::Closed),
            State::Exhausted => return Ok(None),
            State::Open => {}
        }
        let result = self.read_next();
        if !matches!(result, Ok(Some(_))) {
            self.state = State::Exhausted;
        }
        result
    }

    fn read_next(&mut self) -> Result<Option<Buffer>> {
        let blobs = self.blobs.as_mut().ok_or(Error::Closed)?;
        while let Some(block) = blobs.next_block()? {
            if block.blob_type == BlobType::Header {
                return Err(Error::malformed("unexpected OSMHeader after first block"));
            }

            let kinds = osmpbf::block_kinds(&block.data)?;
            if !kinds.intersects(&self.filter) {
                trace!("Skipping block of unselected kinds {:?}", kinds);
                continue;
            }

            let block = PrimitiveBlock::decode(block.data.as_slice())?;
            let mut buffer = Buffer::new();
            osmpbf::decode_block(&block, &self.filter, &mut buffer)?;
            if !buffer.is_empty() {
                trace!("Decoded block with {} entities", buffer.len());
                return Ok(Some(buffer));
            }
        }
        Ok(None)
    }

    /// Dispatches all remaining entities to `handler`, then calls `done`.
    pub fn apply<H: Handler>(&mut self, handler: &mut H, options: ApplyOptions) -> Result<()> {
        self.apply_all(&mut [handler as &mut dyn Handler], options)
    }

    /// Dispatches all remaining entities to each handler in turn, then calls
    /// `done` on each handler.
    pub fn apply_all(
        &mut self,
        handlers: &mut [&mut dyn Handler],
        options: ApplyOptions,
    ) -> Result<()> {
        if handlers.is_empty() {
            return Err(Error::invalid_argument("please provide a handler"));
        }
        match self.state {
            State::Closed => return Err(Error::Closed),
            State::Exhausted => return Err(Error::Exhausted),
            State::Open => {}
        }

        let result = self.run_pass(handlers, options);
        if result.is_err() {
            self.state = State::Exhausted;
        }
        result
    }

    fn run_pass(&mut self, handlers: &mut [&mut dyn Handler], options: ApplyOptions) -> Result<()> {
        let mut location_handler = if options.with_location_handler {
            Some(LocationHandler::default().ignore_missing(options.ignore_missing_locations))
        } else {
            None
        };

        let mut stats = Stats::default();
        while let Some(mut buffer) = self.read()? {
            for entity in buffer.iter_mut() {
                if let Some(ref mut location_handler) = location_handler {
                    location_handler.apply(entity)?;
                }
                for handler in handlers.iter_mut() {
                    dispatch(entity, &mut **handler)?;
                }
                stats.count(entity);
            }
        }

        for handler in handlers.iter_mut() {
            handler.done()?;
        }

        debug!(
            "Dispatched {} entities from {}",
            stats.total(),
            self.file.path().display()
        );
        if let Some(location_handler) = location_handler {
            debug!(
                "Location index: {} locations, {} bytes",
                location_handler.len(),
                location_handler.used_memory()
            );
        }
        Ok(())
    }

    /// Releases the underlying file. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.blobs.take().is_some() {
            info!("Closed {}", self.file.path().display());
        }
        self.state = State::Closed;
        Ok(())
    }
}
