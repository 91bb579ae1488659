//! Mach-O structural parser and symbol resolution
//!
//! Reads Mach-O images without loading them: load commands, segments and
//! sections, the nlist symbol table and the export trie, for images mapped
//! from disk, from a shared cache, or already loaded in the current process.

pub mod commands;
pub mod common;
pub mod diagnostics;
pub mod error;
pub mod exports;
pub mod format;
pub mod image;
pub mod layout;
pub mod linkedit;
pub mod lookup;
pub mod segments;
pub mod symtab;
#[cfg(test)]
mod synth;

pub use commands::{LoadCommand, LoadCommands};
pub use diagnostics::Diagnostics;
pub use error::{ParseError, ParseResult};
pub use exports::{trie_walk, DependentResolver, ExportKind, ExportRecord};
pub use image::{DependentDylib, DylibId, EncryptionRange, MachImage, MappingMode, PlatformVersion};
pub use layout::{LayoutInfo, SegmentFlags, SegmentLayout};
pub use linkedit::LinkEditInfo;
pub use lookup::{GlobalSymbolLookup, ImageEnumerator, ImageList, LoadedImage};
pub use segments::{SectionInfo, SegmentInfo};
pub use symtab::{ClosestSymbol, SymbolEntry};

use memmap2::Mmap;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::info;

/// A Mach-O file mapped read-only from disk
pub struct MappedFile {
    path: PathBuf,
    map: Mmap,
}

impl MappedFile {
    pub fn open(path: impl AsRef<Path>) -> ParseResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        // SAFETY: the mapping is read-only and private to this value; callers
        // must not truncate the file while it is mapped.
        let map = unsafe { Mmap::map(&file)? };
        info!(path = %path.display(), size = map.len(), "mapped file");
        Ok(Self { path, map })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes(&self) -> &[u8] {
        &self.map
    }

    /// The mapped bytes as an image. Images flagged as cache members are
    /// treated as a raw slice of a cache file.
    pub fn image(&self) -> ParseResult<MachImage<'_>> {
        MachImage::out_of_process(&self.map, true)
    }
}
