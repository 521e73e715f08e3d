//! Zip and tar containers: detection, extraction, and repacking.
use crate::error::{
    ExtractArchiveSnafu, ExtractZipSnafu, PackArchiveSnafu, PackZipSnafu, Result,
};
use crate::naming::{suffixed_archive_name, suffixed_zip_name};
use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use snafu::ResultExt;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const TAR_BLOCK_LEN: usize = 512;

/// Compression applied to a tar archive.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TarCompression {
    None,
    Gzip,
    Bzip2,
}

/// A supported container format.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Tar(TarCompression),
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveKind::Zip => f.write_str("zip"),
            ArchiveKind::Tar(TarCompression::None) => f.write_str("tar"),
            ArchiveKind::Tar(TarCompression::Gzip) => f.write_str("tar.gz"),
            ArchiveKind::Tar(TarCompression::Bzip2) => f.write_str("tar.bz2"),
        }
    }
}

impl ArchiveKind {
    /// Identify the container format of a file, if any.
    ///
    /// Zip archives are recognized by their central directory,
    /// tar archives by the checksum of their first header,
    /// after gzip or bzip2 decompression if applicable.
    pub fn detect(path: &Path) -> Option<ArchiveKind> {
        let is_zip = File::open(path)
            .ok()
            .map_or(false, |file| ZipArchive::new(BufReader::new(file)).is_ok());
        if is_zip {
            return Some(ArchiveKind::Zip);
        }
        detect_tar(path).ok().flatten().map(ArchiveKind::Tar)
    }

    /// The name of the repacked archive, with a suffix inserted
    /// before the extension.
    pub fn suffixed_name(self, name: &str, suffix: &str) -> String {
        match self {
            ArchiveKind::Zip => suffixed_zip_name(name, suffix),
            ArchiveKind::Tar(_) => suffixed_archive_name(name, suffix),
        }
    }

    /// Extract all entries of the archive into a directory.
    pub fn extract(self, path: &Path, dest: &Path) -> Result<()> {
        match self {
            ArchiveKind::Zip => {
                let file = File::open(path).context(ExtractArchiveSnafu { path })?;
                let mut archive =
                    ZipArchive::new(BufReader::new(file)).context(ExtractZipSnafu { path })?;
                archive.extract(dest).context(ExtractZipSnafu { path })
            }
            ArchiveKind::Tar(compression) => {
                let reader = open_tar(path, compression).context(ExtractArchiveSnafu { path })?;
                tar::Archive::new(reader)
                    .unpack(dest)
                    .context(ExtractArchiveSnafu { path })
            }
        }
    }

    /// Pack every file under `src` into a new archive at `target`,
    /// named by their path relative to `src`.
    pub fn pack(self, src: &Path, target: &Path) -> Result<()> {
        match self {
            ArchiveKind::Zip => pack_zip(src, target),
            ArchiveKind::Tar(compression) => {
                pack_tar(src, target, compression).context(PackArchiveSnafu { path: target })
            }
        }
    }
}

fn open_tar(path: &Path, compression: TarCompression) -> io::Result<Box<dyn Read>> {
    let file = BufReader::new(File::open(path)?);
    Ok(match compression {
        TarCompression::None => Box::new(file),
        TarCompression::Gzip => Box::new(GzDecoder::new(file)),
        TarCompression::Bzip2 => Box::new(BzDecoder::new(file)),
    })
}

fn detect_tar(path: &Path) -> io::Result<Option<TarCompression>> {
    let mut magic = Vec::with_capacity(3);
    File::open(path)?.take(3).read_to_end(&mut magic)?;
    let compression = if magic.starts_with(&[0x1f, 0x8b]) {
        TarCompression::Gzip
    } else if magic.starts_with(b"BZh") {
        TarCompression::Bzip2
    } else {
        TarCompression::None
    };

    let mut block = Vec::with_capacity(TAR_BLOCK_LEN);
    open_tar(path, compression)?
        .take(TAR_BLOCK_LEN as u64)
        .read_to_end(&mut block)?;
    Ok(is_tar_header(&block).then_some(compression))
}

/// Validate a tar header block by its checksum.
fn is_tar_header(block: &[u8]) -> bool {
    if block.len() != TAR_BLOCK_LEN || block.iter().all(|&b| b == 0) {
        return false;
    }
    // the checksum field counts as spaces
    let computed: u32 = block
        .iter()
        .enumerate()
        .map(|(i, &b)| if (148..156).contains(&i) { u32::from(b' ') } else { u32::from(b) })
        .sum();
    tar::Header::from_byte_slice(block)
        .cksum()
        .map_or(false, |stored| stored == computed)
}

/// The entry name of a file relative to the packed directory,
/// with `/` separators.
fn entry_name(src: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(src).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn pack_zip(src: &Path, target: &Path) -> Result<()> {
    let file = File::create(target).context(PackArchiveSnafu { path: target })?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = entry
            .map_err(io::Error::from)
            .context(PackArchiveSnafu { path: target })?;
        if !entry.file_type().is_file() {
            continue;
        }
        zip.start_file(entry_name(src, entry.path()), options)
            .context(PackZipSnafu { path: target })?;
        let mut source = File::open(entry.path()).context(PackArchiveSnafu { path: target })?;
        io::copy(&mut source, &mut zip).context(PackArchiveSnafu { path: target })?;
    }
    zip.finish().context(PackZipSnafu { path: target })?;
    Ok(())
}

fn pack_tar(src: &Path, target: &Path, compression: TarCompression) -> io::Result<()> {
    let file = File::create(target)?;
    match compression {
        TarCompression::None => {
            append_tree(src, file)?.flush()?;
        }
        TarCompression::Gzip => {
            let encoder = GzEncoder::new(file, flate2::Compression::default());
            append_tree(src, encoder)?.finish()?;
        }
        TarCompression::Bzip2 => {
            let encoder = BzEncoder::new(file, bzip2::Compression::default());
            append_tree(src, encoder)?.finish()?;
        }
    }
    Ok(())
}

fn append_tree<W: Write>(src: &Path, writer: W) -> io::Result<W> {
    let mut builder = tar::Builder::new(writer);
    for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        let name = entry_name(src, entry.path());
        if entry.file_type().is_dir() {
            builder.append_dir(&name, entry.path())?;
        } else if entry.file_type().is_file() {
            builder.append_path_with_name(entry.path(), &name)?;
        }
    }
    builder.into_inner()
}
