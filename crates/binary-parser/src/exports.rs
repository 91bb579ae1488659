//! Export trie resolution
//!
//! The trie is a prefix tree serialized into the link-edit segment. Each node
//! starts with a ULEB128 terminal size; a non-zero size is followed by the
//! export payload. Then comes a one-byte child count and, for each child, a
//! NUL-terminated edge label and the ULEB128 offset of the child node.

use std::ops::ControlFlow;

use tracing::{debug, warn};

use crate::common::ByteCursor;
use crate::diagnostics::Diagnostics;
use crate::error::{ParseError, ParseResult};
use crate::format::*;
use crate::image::MachImage;

/// Most nodes a single lookup may visit
pub const MAX_TRIE_DEPTH: usize = 128;

/// Longest chain of re-exports followed for one lookup
pub const MAX_REEXPORT_DEPTH: u32 = 64;

/// Produces the image for a dependent dylib, given its index in the
/// requesting image's dependent list and its load path
pub type DependentResolver<'r, 'a> = dyn FnMut(u32, &str) -> Option<MachImage<'a>> + 'r;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    /// Value is an offset from the image header
    HeaderOffset,
    /// Value is an absolute address
    Absolute,
    /// Value is the stub offset; the resolver function is at `resolver_offset`
    ResolverOffset,
}

/// A resolved export
#[derive(Debug, Clone)]
pub struct ExportRecord<'a> {
    pub kind: ExportKind,
    pub is_thread_local: bool,
    pub is_weak_def: bool,
    /// Image that actually defines the symbol, after following re-exports
    pub image: MachImage<'a>,
    pub value: u64,
    pub resolver_offset: Option<u64>,
    /// Name as defined in `image`
    pub name: String,
}

impl ExportRecord<'_> {
    /// Address of the export in the defining image's address space
    pub fn address(&self) -> Option<u64> {
        match self.kind {
            ExportKind::Absolute => Some(self.value),
            ExportKind::HeaderOffset | ExportKind::ResolverOffset => {
                self.image.header_address().checked_add(self.value)
            }
        }
    }
}

/// Walk `trie` for `name`. Returns the offset of the terminal payload, which
/// starts with the export flags.
pub fn trie_walk(diag: &mut Diagnostics, trie: &[u8], name: &str) -> Option<usize> {
    let mut visited = Vec::with_capacity(16);
    visited.push(0usize);
    let mut rest = name.as_bytes();
    let mut node = 0usize;

    loop {
        let mut cursor = ByteCursor::new_at(trie, node);
        let terminal_size = cursor.read_uleb128(diag)?;
        let children = usize::try_from(terminal_size)
            .ok()
            .and_then(|size| cursor.offset().checked_add(size))
            .filter(|&end| end <= trie.len());
        let Some(children) = children else {
            diag.error("malformed trie, terminal info extends past end of trie");
            return None;
        };
        if rest.is_empty() && terminal_size != 0 {
            return Some(cursor.offset());
        }

        cursor.set_offset(children);
        let Some(child_count) = cursor.read_u8() else {
            diag.error("malformed trie, child count extends past end of trie");
            return None;
        };

        let mut next = None;
        for _ in 0..child_count {
            let mut matched = true;
            let mut consumed = 0usize;
            loop {
                let Some(byte) = cursor.read_u8() else {
                    diag.error("malformed trie node, child node extends past end of trie");
                    return None;
                };
                if byte == 0 {
                    break;
                }
                if matched && rest.get(consumed) == Some(&byte) {
                    consumed += 1;
                } else {
                    matched = false;
                }
            }
            if matched {
                let child = cursor.read_uleb128(diag)?;
                let child = usize::try_from(child).ok().filter(|&c| c != 0 && c < trie.len());
                let Some(child) = child else {
                    diag.error(format!(
                        "malformed trie child, nodeOffset=0x{:X} out of range",
                        node
                    ));
                    return None;
                };
                rest = &rest[consumed..];
                next = Some(child);
                break;
            }
            if !cursor.skip_leb128() {
                diag.error("malformed trie node, child node extends past end of trie");
                return None;
            }
        }

        let child = next?;
        if visited.contains(&child) {
            diag.error(format!("malformed trie child, cycle to nodeOffset=0x{:X}", child));
            return None;
        }
        if visited.len() >= MAX_TRIE_DEPTH {
            diag.error("malformed trie too deep");
            return None;
        }
        visited.push(child);
        node = child;
    }
}

enum Terminal<'t> {
    ReExport { ordinal: u64, import_name: &'t str },
    Export { flags: ExportFlags, value: u64, resolver: Option<u64> },
}

fn read_terminal<'t>(diag: &mut Diagnostics, trie: &'t [u8], offset: usize) -> Option<Terminal<'t>> {
    let mut cursor = ByteCursor::new_at(trie, offset);
    let flags = ExportFlags::from_bits_retain(cursor.read_uleb128(diag)?);
    if flags.contains(ExportFlags::REEXPORT) {
        let ordinal = cursor.read_uleb128(diag)?;
        let import_name = cursor
            .read_cstr()
            .and_then(|raw| std::str::from_utf8(raw).ok());
        let Some(import_name) = import_name else {
            diag.error("malformed re-export import name");
            return None;
        };
        return Some(Terminal::ReExport {
            ordinal,
            import_name,
        });
    }
    let value = cursor.read_uleb128(diag)?;
    let resolver = if flags.contains(ExportFlags::STUB_AND_RESOLVER) {
        Some(cursor.read_uleb128(diag)?)
    } else {
        None
    };
    Some(Terminal::Export {
        flags,
        value,
        resolver,
    })
}

impl<'a> MachImage<'a> {
    /// Resolve `name` through this image's exports, following re-exports via
    /// `resolver`. Malformed data is recorded in `diag` and yields `Ok(None)`;
    /// a re-export that cannot be followed because of how the lookup was set
    /// up is an error.
    pub fn find_exported_symbol(
        &self,
        diag: &mut Diagnostics,
        name: &str,
        resolver: Option<&mut DependentResolver<'_, 'a>>,
    ) -> ParseResult<Option<ExportRecord<'a>>> {
        self.resolve_export(diag, name, resolver, 0)
    }

    /// Runtime address of `name`, or `None` when it is not exported
    pub fn has_exported_symbol(
        &self,
        name: &str,
        resolver: Option<&mut DependentResolver<'_, 'a>>,
    ) -> ParseResult<Option<u64>> {
        let mut diag = Diagnostics::new();
        let record = self.find_exported_symbol(&mut diag, name, resolver)?;
        Ok(record.and_then(|record| record.address()))
    }

    fn resolve_export(
        &self,
        diag: &mut Diagnostics,
        name: &str,
        mut resolver: Option<&mut DependentResolver<'_, 'a>>,
        depth: u32,
    ) -> ParseResult<Option<ExportRecord<'a>>> {
        if depth > MAX_REEXPORT_DEPTH {
            diag.error(format!("re-export chain too deep for {}", name));
            return Ok(None);
        }

        let info = self.link_edit_info(diag);
        if info.layout.is_none() {
            return Ok(None);
        }
        if !info.has_export_info() {
            return Ok(self.legacy_export(diag, name));
        }
        let Some(trie) = info.export_trie(self) else {
            diag.error("export trie not within image");
            return Ok(None);
        };

        let mut walk_diag = Diagnostics::new();
        let found = trie_walk(&mut walk_diag, trie, name);
        let malformed = walk_diag.has_error();
        diag.absorb(walk_diag);
        let Some(offset) = found else {
            if malformed {
                return Ok(None);
            }
            return self.search_reexported_dylibs(diag, name, resolver, depth);
        };

        match read_terminal(diag, trie, offset) {
            None => Ok(None),
            Some(Terminal::ReExport {
                ordinal,
                import_name,
            }) => {
                let Some(resolve) = resolver.as_deref_mut() else {
                    return Err(ParseError::MissingDependentResolver {
                        symbol: name.to_string(),
                    });
                };
                let count = self.dependent_dylib_count();
                if ordinal == 0 || ordinal > u64::from(count) {
                    return Err(ParseError::OrdinalOutOfRange {
                        ordinal,
                        symbol: name.to_string(),
                        count,
                    });
                }
                let dep_index = (ordinal - 1) as u32;
                let load_path = self.dependent_dylib_load_path(dep_index).unwrap_or("");
                let Some(dependent) = resolve(dep_index, load_path) else {
                    diag.error(format!(
                        "dependent dylib {} not found for re-exported symbol {}",
                        ordinal, name
                    ));
                    return Ok(None);
                };
                let import_name = if import_name.is_empty() { name } else { import_name };
                debug!(symbol = name, import = import_name, dylib = load_path, "following re-export");
                dependent.resolve_export(diag, import_name, resolver, depth + 1)
            }
            Some(Terminal::Export {
                flags,
                value,
                resolver: resolver_offset,
            }) => {
                let kind = match flags.kind() {
                    EXPORT_SYMBOL_FLAGS_KIND_REGULAR | EXPORT_SYMBOL_FLAGS_KIND_THREAD_LOCAL => {
                        if resolver_offset.is_some() {
                            ExportKind::ResolverOffset
                        } else {
                            ExportKind::HeaderOffset
                        }
                    }
                    EXPORT_SYMBOL_FLAGS_KIND_ABSOLUTE => ExportKind::Absolute,
                    other => {
                        diag.error(format!("unsupported exported symbol kind {} for {}", other, name));
                        return Ok(None);
                    }
                };
                Ok(Some(ExportRecord {
                    kind,
                    is_thread_local: flags.kind() == EXPORT_SYMBOL_FLAGS_KIND_THREAD_LOCAL,
                    is_weak_def: flags.contains(ExportFlags::WEAK_DEFINITION),
                    image: *self,
                    value,
                    resolver_offset,
                    name: name.to_string(),
                }))
            }
        }
    }

    /// Symbols absent from the trie may come from a re-exported dylib
    fn search_reexported_dylibs(
        &self,
        diag: &mut Diagnostics,
        name: &str,
        mut resolver: Option<&mut DependentResolver<'_, 'a>>,
        depth: u32,
    ) -> ParseResult<Option<ExportRecord<'a>>> {
        let mut reexports = Vec::new();
        let mut index = 0u32;
        self.for_each_dependent_dylib(diag, |dylib| {
            if dylib.is_reexport {
                reexports.push((index, dylib.load_path));
            }
            index += 1;
            ControlFlow::Continue(())
        });

        for (dep_index, load_path) in reexports {
            let Some(resolve) = resolver.as_deref_mut() else {
                return Ok(None);
            };
            let Some(dependent) = resolve(dep_index, load_path) else {
                warn!(dylib = load_path, symbol = name, "re-exported dylib not available");
                continue;
            };
            match dependent.resolve_export(diag, name, resolver.as_deref_mut(), depth + 1) {
                Ok(Some(record)) => return Ok(Some(record)),
                Ok(None) => {}
                Err(err) => {
                    debug!(dylib = load_path, symbol = name, error = %err, "skipping re-exported dylib");
                }
            }
        }
        Ok(None)
    }

    /// Images without export info only have their symbol table
    fn legacy_export(&self, diag: &mut Diagnostics, name: &str) -> Option<ExportRecord<'a>> {
        let base = self.preferred_load_address();
        let mut found = None;
        self.for_each_global_symbol(diag, |symbol| {
            if symbol.name == name {
                found = Some(*symbol);
                return ControlFlow::Break(());
            }
            ControlFlow::Continue(())
        });
        let symbol = found?;
        let Some(value) = symbol.value.checked_sub(base) else {
            diag.error(format!("symbol {} below image base", name));
            return None;
        };
        Some(ExportRecord {
            kind: ExportKind::HeaderOffset,
            is_thread_local: false,
            is_weak_def: symbol.is_weak_def(),
            image: *self,
            value,
            resolver_offset: None,
            name: name.to_string(),
        })
    }
}
