//! nlist symbol table scanning

use std::ops::{ControlFlow, Range};

use machscope_core::Address;
use scroll::{Endian, Pread};

use crate::common::c_str_at;
use crate::diagnostics::Diagnostics;
use crate::format::*;
use crate::image::MachImage;
use crate::linkedit::LinkEditInfo;

/// Decoded nlist entry with its name resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolEntry<'a> {
    pub name: &'a str,
    pub value: u64,
    pub n_type: u8,
    pub n_sect: u8,
    pub n_desc: u16,
}

impl SymbolEntry<'_> {
    pub fn is_weak_def(&self) -> bool {
        self.n_desc & N_WEAK_DEF != 0
    }

    fn is_defined(&self) -> bool {
        self.n_type & N_STAB == 0 && self.n_type & N_TYPE == N_SECT
    }

    pub fn is_global(&self) -> bool {
        self.is_defined() && self.n_type & N_EXT != 0
    }

    pub fn is_local(&self) -> bool {
        self.is_defined() && self.n_type & N_EXT == 0
    }
}

/// Symbol hit resolved to a runtime address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosestSymbol<'a> {
    pub name: &'a str,
    pub address: u64,
}

struct SymbolTable<'a> {
    nlists: &'a [u8],
    strings: &'a [u8],
    count: u32,
    is_64: bool,
    endian: Endian,
}

impl<'a> SymbolTable<'a> {
    fn entry_size(&self) -> usize {
        if self.is_64 {
            Nlist64::SIZE
        } else {
            Nlist32::SIZE
        }
    }

    /// `None` for entries whose name is unusable
    fn entry(&self, index: u32) -> Option<SymbolEntry<'a>> {
        let offset = index as usize * self.entry_size();
        let (strx, n_type, n_sect, n_desc, value) = if self.is_64 {
            let raw: Nlist64 = self.nlists.pread_with(offset, self.endian).ok()?;
            (raw.n_strx, raw.n_type, raw.n_sect, raw.n_desc, raw.n_value)
        } else {
            let raw: Nlist32 = self.nlists.pread_with(offset, self.endian).ok()?;
            (raw.n_strx, raw.n_type, raw.n_sect, raw.n_desc, u64::from(raw.n_value))
        };
        if strx as usize >= self.strings.len() {
            return None;
        }
        Some(SymbolEntry {
            name: c_str_at(self.strings, strx as usize)?,
            value,
            n_type,
            n_sect,
            n_desc,
        })
    }

    fn scan<F>(&self, range: Range<u32>, visitor: &mut F) -> ControlFlow<()>
    where
        F: FnMut(&SymbolEntry<'a>) -> ControlFlow<()>,
    {
        for index in range {
            if let Some(entry) = self.entry(index) {
                visitor(&entry)?;
            }
        }
        ControlFlow::Continue(())
    }
}

impl<'a> MachImage<'a> {
    fn symbol_table(&self, diag: &mut Diagnostics, info: &LinkEditInfo) -> Option<SymbolTable<'a>> {
        let symtab = info.symtab.as_ref()?;
        info.layout.as_ref()?;
        let entry_size = if self.is_64() { Nlist64::SIZE } else { Nlist32::SIZE };
        let Some(nlists) = (symtab.nsyms as usize)
            .checked_mul(entry_size)
            .and_then(|len| u32::try_from(len).ok())
            .and_then(|len| info.content(self, symtab.symoff, len))
        else {
            diag.error("symbol table not within image");
            return None;
        };
        let Some(strings) = info.content(self, symtab.stroff, symtab.strsize) else {
            diag.error("string pool not within image");
            return None;
        };
        Some(SymbolTable {
            nlists,
            strings,
            count: symtab.nsyms,
            is_64: self.is_64(),
            endian: self.endian(),
        })
    }

    fn partition(
        &self,
        diag: &mut Diagnostics,
        table: &SymbolTable<'a>,
        start: u32,
        count: u32,
        what: &str,
    ) -> Option<Range<u32>> {
        match start.checked_add(count) {
            Some(end) if end <= table.count => Some(start..end),
            _ => {
                diag.error(format!("{} symbols extend past end of symbol table", what));
                None
            }
        }
    }

    fn scan_symbols<F>(&self, diag: &mut Diagnostics, globals: bool, mut visitor: F)
    where
        F: FnMut(&SymbolEntry<'a>) -> ControlFlow<()>,
    {
        let info = self.link_edit_info(diag);
        let Some(table) = self.symbol_table(diag, &info) else {
            return;
        };
        let range = match (&info.dysymtab, globals) {
            (Some(dy), true) => self.partition(diag, &table, dy.iextdefsym, dy.nextdefsym, "global"),
            (Some(dy), false) => self.partition(diag, &table, dy.ilocalsym, dy.nlocalsym, "local"),
            (None, _) => Some(0..table.count),
        };
        let Some(range) = range else {
            return;
        };
        let _ = table.scan(range, &mut |entry: &SymbolEntry<'a>| {
            let wanted = if globals { entry.is_global() } else { entry.is_local() };
            if wanted {
                visitor(entry)
            } else {
                ControlFlow::Continue(())
            }
        });
    }

    /// Exported definitions: external, section-defined, not debug entries
    pub fn for_each_global_symbol<F>(&self, diag: &mut Diagnostics, visitor: F)
    where
        F: FnMut(&SymbolEntry<'a>) -> ControlFlow<()>,
    {
        self.scan_symbols(diag, true, visitor)
    }

    pub fn for_each_local_symbol<F>(&self, diag: &mut Diagnostics, visitor: F)
    where
        F: FnMut(&SymbolEntry<'a>) -> ControlFlow<()>,
    {
        self.scan_symbols(diag, false, visitor)
    }

    /// Defined symbol with the largest value not above `unslid_addr`
    pub fn find_closest_symbol(&self, unslid_addr: u64) -> Option<SymbolEntry<'a>> {
        let mut best: Option<SymbolEntry<'a>> = None;
        let mut consider = |entry: &SymbolEntry<'a>| {
            if entry.value <= unslid_addr && best.map_or(true, |b| entry.value > b.value) {
                best = Some(*entry);
            }
            ControlFlow::Continue(())
        };
        let mut diag = Diagnostics::new();
        self.for_each_global_symbol(&mut diag, &mut consider);
        let mut diag = Diagnostics::new();
        self.for_each_local_symbol(&mut diag, &mut consider);
        best
    }

    /// Closest symbol for a runtime address, with the symbol's runtime address
    pub fn find_closest_symbol_address(&self, runtime_addr: u64) -> Option<ClosestSymbol<'a>> {
        let slide = self.slide()?;
        let unslid = Address::new(runtime_addr).checked_offset(slide.checked_neg()?)?;
        let entry = self.find_closest_symbol(unslid.as_u64())?;
        Some(ClosestSymbol {
            name: entry.name,
            address: Address::new(entry.value).checked_offset(slide)?.as_u64(),
        })
    }

    /// First entry named exactly `name` with a non-zero value, anywhere in the table
    pub fn find_symbol(&self, name: &str) -> Option<SymbolEntry<'a>> {
        let mut diag = Diagnostics::new();
        let info = self.link_edit_info(&mut diag);
        let table = self.symbol_table(&mut diag, &info)?;
        let mut found = None;
        let _ = table.scan(0..table.count, &mut |entry: &SymbolEntry<'a>| {
            if entry.value != 0 && entry.name == name {
                found = Some(*entry);
                return ControlFlow::Break(());
            }
            ControlFlow::Continue(())
        });
        found
    }
}
