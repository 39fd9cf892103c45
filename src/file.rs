//! File handles: a path plus a declared format.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// Not declared and not detectable from the file name.
    Unknown,
    Pbf,
    Xml,
    Opl,
    O5m,
}

impl FileFormat {
    /// Detects the format from a file name suffix like `.osm.pbf` or
    /// `.osm.bz2`.
    pub fn from_path(path: &Path) -> Self {
        let name = match path.file_name().and_then(|name| name.to_str()) {
            Some(name) => name.to_ascii_lowercase(),
            None => return FileFormat::Unknown,
        };
        let mut parts: Vec<&str> = name.split('.').skip(1).collect();
        // compression suffixes don't change the format
        if matches!(parts.last(), Some(&"gz") | Some(&"bz2")) {
            parts.pop();
        }
        match parts.last() {
            Some(&"pbf") => FileFormat::Pbf,
            Some(&"osm") | Some(&"osc") | Some(&"osh") | Some(&"xml") => FileFormat::Xml,
            Some(&"opl") => FileFormat::Opl,
            Some(&"o5m") | Some(&"o5c") => FileFormat::O5m,
            _ => FileFormat::Unknown,
        }
    }

    /// Detects the format from the first bytes of a file.
    pub(crate) fn sniff(data: &[u8]) -> Self {
        // 4 byte length, then BlobHeader field 1 (string, length 9)
        const PBF_MAGIC: &[u8] = b"\x0a\x09OSMHeader";
        if data.len() >= 4 + PBF_MAGIC.len() && &data[4..4 + PBF_MAGIC.len()] == PBF_MAGIC {
            return FileFormat::Pbf;
        }
        match data.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'<') => FileFormat::Xml,
            _ => FileFormat::Unknown,
        }
    }
}

impl FromStr for FileFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pbf" | "osm.pbf" => Ok(FileFormat::Pbf),
            "osm" | "xml" | "osc" | "osh" | "osm.gz" | "osm.bz2" | "osc.gz" | "osc.bz2" => {
                Ok(FileFormat::Xml)
            }
            "opl" => Ok(FileFormat::Opl),
            "o5m" | "o5c" => Ok(FileFormat::O5m),
            _ => Err(Error::invalid_argument(format!("unknown file format '{}'", s))),
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            FileFormat::Unknown => "unknown",
            FileFormat::Pbf => "pbf",
            FileFormat::Xml => "xml",
            FileFormat::Opl => "opl",
            FileFormat::O5m => "o5m",
        };
        f.write_str(name)
    }
}

/// Compression of PBF data blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PbfCompression {
    None,
    #[default]
    Zlib,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatOptions {
    pub pbf_compression: PbfCompression,
    /// Whether the writer stores version, timestamp, changeset and user.
    pub add_metadata: bool,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            pbf_compression: PbfCompression::Zlib,
            add_metadata: true,
        }
    }
}

impl FormatOptions {
    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match (key, value) {
            ("pbf_compression", "zlib") => self.pbf_compression = PbfCompression::Zlib,
            ("pbf_compression", "none") => self.pbf_compression = PbfCompression::None,
            ("add_metadata", "true") => self.add_metadata = true,
            ("add_metadata", "false") => self.add_metadata = false,
            _ => {
                return Err(Error::invalid_argument(format!(
                    "invalid file format option '{}={}'",
                    key, value
                )))
            }
        }
        Ok(())
    }
}

/// An OSM file: path, format and format options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    path: PathBuf,
    format: FileFormat,
    options: FormatOptions,
}

impl File {
    /// Creates a file handle; the format is derived from the file name.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let format = FileFormat::from_path(&path);
        Self {
            path,
            format,
            options: FormatOptions::default(),
        }
    }

    /// Creates a file handle with an explicit format string, e.g. `"pbf"` or
    /// `"pbf,pbf_compression=none,add_metadata=false"`.
    pub fn with_format(path: impl Into<PathBuf>, format: &str) -> Result<Self> {
        let mut parts = format.split(',').map(str::trim);
        let format = match parts.next() {
            Some(name) if !name.is_empty() => name.parse::<FileFormat>()?,
            _ => return Err(Error::invalid_argument("empty file format")),
        };
        let mut options = FormatOptions::default();
        for option in parts {
            let (key, value) = option.split_once('=').ok_or_else(|| {
                Error::invalid_argument(format!("file format option '{}' lacks a value", option))
            })?;
            options.set(key.trim(), value.trim())?;
        }
        Ok(Self {
            path: path.into(),
            format,
            options,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    pub fn options(&self) -> &FormatOptions {
        &self.options
    }

    pub(crate) fn set_format(&mut self, format: FileFormat) {
        self.format = format;
    }

    /// Rejects the empty path and `-`, which other tools use for stdin or
    /// stdout. Whether the path exists is left to opening it.
    pub(crate) fn check_path(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(Error::invalid_argument("empty file name"));
        }
        if self.path.as_os_str() == "-" {
            return Err(Error::invalid_argument(
                "reading from stdin or writing to stdout is not supported",
            ));
        }
        Ok(())
    }
}
