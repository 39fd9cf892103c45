//! PBF writer.

use log::{debug, info};
use prost::Message;

use std::fs;
use std::io::{BufWriter, Write};

use crate::buffer::Buffer;
use crate::entity::{Entity, EntityKind};
use crate::error::{Error, Result};
use crate::file::{File, FileFormat};
use crate::header::Header;
use crate::osmpbf::{self, BlobType, BLOCK_OVERHEAD, MAX_BLOCK_SIZE, MAX_ENTITIES_PER_BLOCK};

/// Whether a writer may replace an existing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Overwrite {
    Allow,
    #[default]
    No,
}

/// Writes entities into an OSM PBF file.
///
/// The header is written on construction. Entities are collected into
/// blocks of a single kind; a block is written when the kind changes, when
/// it holds [`MAX_ENTITIES_PER_BLOCK`] entities or would grow beyond
/// [`MAX_BLOCK_SIZE`] bytes, or on [`Writer::close`]. Dropping a writer without closing it
/// loses the pending block.
#[derive(Debug)]
pub struct Writer {
    file: File,
    out: Option<BufWriter<fs::File>>,
    pending: Vec<Entity>,
    pending_kind: Option<EntityKind>,
    // upper bound of the encoded size of `pending`
    pending_size: usize,
    max_block_size: usize,
    num_blocks: usize,
}

impl Writer {
    pub fn new(file: File, header: &Header, overwrite: Overwrite) -> Result<Self> {
        file.check_path()?;
        if file.format() != FileFormat::Pbf {
            return Err(Error::UnsupportedFormat(format!(
                "cannot write {} as {}",
                file.path().display(),
                file.format()
            )));
        }

        let out = match overwrite {
            Overwrite::Allow => fs::File::create(file.path())?,
            Overwrite::No => fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(file.path())?,
        };
        let mut out = BufWriter::new(out);

        let writingprogram = concat!("osmio/", env!("CARGO_PKG_VERSION"));
        let header_block = header.to_pbf(writingprogram).encode_to_vec();
        osmpbf::write_blob(
            &mut out,
            BlobType::Header,
            &header_block,
            file.options().pbf_compression,
        )?;
        info!("Writing {}", file.path().display());

        Ok(Self {
            file,
            out: Some(out),
            pending: Vec::with_capacity(MAX_ENTITIES_PER_BLOCK),
            pending_kind: None,
            pending_size: BLOCK_OVERHEAD,
            max_block_size: MAX_BLOCK_SIZE,
            num_blocks: 0,
        })
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    /// Writes all entities of the buffer in order.
    pub fn write(&mut self, buffer: Buffer) -> Result<()> {
        for entity in buffer {
            self.write_entity(entity)?;
        }
        Ok(())
    }

    pub fn write_entity(&mut self, entity: Entity) -> Result<()> {
        if self.out.is_none() {
            return Err(Error::Closed);
        }
        let kind = entity.kind();
        let size = osmpbf::max_encoded_size(&entity);
        if self.pending_kind != Some(kind)
            || self.pending.len() >= MAX_ENTITIES_PER_BLOCK
            || self.pending_size + size > self.max_block_size
        {
            self.flush_block()?;
        }
        self.pending.push(entity);
        self.pending_kind = Some(kind);
        self.pending_size += size;
        Ok(())
    }

    fn flush_block(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let options = *self.file.options();
        let data = osmpbf::encode_block(&self.pending, options.add_metadata).encode_to_vec();
        let out = self.out.as_mut().ok_or(Error::Closed)?;
        osmpbf::write_blob(out, BlobType::Data, &data, options.pbf_compression)?;
        self.num_blocks += 1;
        self.pending.clear();
        self.pending_kind = None;
        self.pending_size = BLOCK_OVERHEAD;
        Ok(())
    }

    /// Writes the pending block and flushes the file. Closing twice is a
    /// no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.out.is_none() {
            return Ok(());
        }
        self.flush_block()?;
        if let Some(mut out) = self.out.take() {
            out.flush()?;
        }
        debug!("Wrote {} data blocks", self.num_blocks);
        info!("Closed {}", self.file.path().display());
        Ok(())
    }
}
