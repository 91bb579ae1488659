//! Segment and section enumeration

use std::ops::ControlFlow;

use machscope_core::CpuType;

use crate::commands::LoadCommand;
use crate::common::fixed_name;
use crate::diagnostics::Diagnostics;
use crate::format::*;
use crate::image::MachImage;

/// One `LC_SEGMENT` / `LC_SEGMENT_64`
#[derive(Debug, Clone, Copy)]
pub struct SegmentInfo<'a> {
    /// Position among segment commands
    pub index: u32,
    pub name: &'a str,
    pub vm_addr: u64,
    pub vm_size: u64,
    pub file_offset: u64,
    pub file_size: u64,
    pub max_prot: VmProt,
    pub init_prot: VmProt,
    pub section_count: u32,
    pub flags: u32,
    /// i386 segment containing a section with relocation attributes
    pub has_text_relocs: bool,
    command: LoadCommand<'a>,
}

impl SegmentInfo<'_> {
    pub fn is_writable(&self) -> bool {
        self.init_prot.contains(VmProt::WRITE)
    }

    pub fn is_executable(&self) -> bool {
        self.init_prot.contains(VmProt::EXECUTE)
    }

    pub fn contains_address(&self, addr: u64) -> bool {
        addr >= self.vm_addr && addr - self.vm_addr < self.vm_size
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SectionInfo<'a> {
    pub segment_index: u32,
    pub segment_name: &'a str,
    pub name: &'a str,
    pub addr: u64,
    pub size: u64,
    pub file_offset: u32,
    pub align: u32,
    pub flags: u32,
    pub reserved1: u32,
    pub reserved2: u32,
    pub segment_init_prot: VmProt,
}

impl SectionInfo<'_> {
    pub fn section_type(&self) -> u32 {
        self.flags & SECTION_TYPE
    }

    /// Zero-fill sections occupy address space but no file bytes
    pub fn is_zero_fill(&self) -> bool {
        matches!(
            self.section_type(),
            S_ZEROFILL | S_GB_ZEROFILL | S_THREAD_LOCAL_ZEROFILL
        )
    }
}

fn name_field<'a>(bytes: &'a [u8], offset: usize) -> &'a str {
    bytes
        .get(offset..offset + 16)
        .and_then(|raw| <&[u8; 16]>::try_from(raw).ok())
        .map(fixed_name)
        .unwrap_or("")
}

impl<'a> MachImage<'a> {
    fn segment_command_size(&self) -> usize {
        if self.is_64() {
            SegmentCommand64::SIZE
        } else {
            SegmentCommand32::SIZE
        }
    }

    fn section_record_size(&self) -> usize {
        if self.is_64() {
            Section64::SIZE
        } else {
            Section32::SIZE
        }
    }

    fn decode_segment(&self, cmd: &LoadCommand<'a>, index: u32) -> Result<SegmentInfo<'a>, String> {
        let name = name_field(cmd.bytes(), 8);
        let info = if self.is_64() {
            let seg = cmd
                .parse::<SegmentCommand64>()
                .ok_or_else(|| "LC_SEGMENT_64 load command size wrong".to_string())?;
            SegmentInfo {
                index,
                name,
                vm_addr: seg.vmaddr,
                vm_size: seg.vmsize,
                file_offset: seg.fileoff,
                file_size: seg.filesize,
                max_prot: VmProt::from_bits_truncate(seg.maxprot),
                init_prot: VmProt::from_bits_truncate(seg.initprot),
                section_count: seg.nsects,
                flags: seg.flags,
                has_text_relocs: false,
                command: *cmd,
            }
        } else {
            let seg = cmd
                .parse::<SegmentCommand32>()
                .ok_or_else(|| "LC_SEGMENT load command size wrong".to_string())?;
            SegmentInfo {
                index,
                name,
                vm_addr: u64::from(seg.vmaddr),
                vm_size: u64::from(seg.vmsize),
                file_offset: u64::from(seg.fileoff),
                file_size: u64::from(seg.filesize),
                max_prot: VmProt::from_bits_truncate(seg.maxprot),
                init_prot: VmProt::from_bits_truncate(seg.initprot),
                section_count: seg.nsects,
                flags: seg.flags,
                has_text_relocs: false,
                command: *cmd,
            }
        };

        let table = (info.section_count as usize)
            .checked_mul(self.section_record_size())
            .and_then(|len| len.checked_add(self.segment_command_size()));
        match table {
            Some(end) if end <= cmd.cmdsize as usize => {}
            _ => {
                return Err(format!(
                    "malformed load command #{}, section table extends past end of segment command",
                    cmd.index
                ))
            }
        }

        let mut info = info;
        if self.cpu_type() == CpuType::X86 {
            let mut relocs = false;
            let _ = self.walk_sections(&info, |section| {
                if section.flags & (S_ATTR_EXT_RELOC | S_ATTR_LOC_RELOC) != 0 {
                    relocs = true;
                    return ControlFlow::Break(());
                }
                ControlFlow::Continue(())
            });
            info.has_text_relocs = relocs;
        }
        Ok(info)
    }

    /// Sections of an already validated segment
    fn walk_sections<F>(&self, segment: &SegmentInfo<'a>, mut visitor: F) -> ControlFlow<()>
    where
        F: FnMut(&SectionInfo<'a>) -> ControlFlow<()>,
    {
        let cmd = &segment.command;
        let record_size = self.section_record_size();
        for i in 0..segment.section_count as usize {
            let offset = self.segment_command_size() + i * record_size;
            let bytes = cmd.bytes();
            let section = if self.is_64() {
                let Some(raw) = cmd.parse_at::<Section64>(offset) else {
                    break;
                };
                SectionInfo {
                    segment_index: segment.index,
                    segment_name: name_field(bytes, offset + 16),
                    name: name_field(bytes, offset),
                    addr: raw.addr,
                    size: raw.size,
                    file_offset: raw.offset,
                    align: raw.align,
                    flags: raw.flags,
                    reserved1: raw.reserved1,
                    reserved2: raw.reserved2,
                    segment_init_prot: segment.init_prot,
                }
            } else {
                let Some(raw) = cmd.parse_at::<Section32>(offset) else {
                    break;
                };
                SectionInfo {
                    segment_index: segment.index,
                    segment_name: name_field(bytes, offset + 16),
                    name: name_field(bytes, offset),
                    addr: u64::from(raw.addr),
                    size: u64::from(raw.size),
                    file_offset: raw.offset,
                    align: raw.align,
                    flags: raw.flags,
                    reserved1: raw.reserved1,
                    reserved2: raw.reserved2,
                    segment_init_prot: segment.init_prot,
                }
            };
            visitor(&section)?;
        }
        ControlFlow::Continue(())
    }

    /// Visit segment commands in load-command order
    pub fn for_each_segment<F>(&self, diag: &mut Diagnostics, mut visitor: F)
    where
        F: FnMut(&SegmentInfo<'a>) -> ControlFlow<()>,
    {
        let segment_cmd = if self.is_64() { LC_SEGMENT_64 } else { LC_SEGMENT };
        let mut index = 0u32;
        let mut failure = None;
        self.for_each_load_command(diag, |cmd| {
            if cmd.cmd != segment_cmd {
                return ControlFlow::Continue(());
            }
            match self.decode_segment(cmd, index) {
                Ok(info) => {
                    index += 1;
                    visitor(&info)
                }
                Err(message) => {
                    failure = Some(message);
                    ControlFlow::Break(())
                }
            }
        });
        if let Some(message) = failure {
            diag.error(message);
        }
    }

    /// Visit every section of every segment
    pub fn for_each_section<F>(&self, diag: &mut Diagnostics, mut visitor: F)
    where
        F: FnMut(&SectionInfo<'a>) -> ControlFlow<()>,
    {
        self.for_each_segment(diag, |segment| self.walk_sections(segment, &mut visitor));
    }

    /// Visit sections together with their bytes in this image's mapping.
    /// Zero-fill sections get an empty slice. Sections whose bytes cannot be
    /// located are reported and skipped.
    pub fn for_each_section_content<F>(&self, diag: &mut Diagnostics, mut visitor: F)
    where
        F: FnMut(&SectionInfo<'a>, &'a [u8]) -> ControlFlow<()>,
    {
        let Some(layout) = self.layout(diag) else {
            return;
        };
        let data = self.data();
        let mut missing = Vec::new();
        self.for_each_section(diag, |section| {
            if section.is_zero_fill() || section.size == 0 {
                return visitor(section, &[]);
            }
            match layout
                .address_to_content(section.addr, section.size)
                .and_then(|range| data.get(range))
            {
                Some(content) => visitor(section, content),
                None => {
                    missing.push(format!(
                        "section {},{} content not within image",
                        section.segment_name, section.name
                    ));
                    ControlFlow::Continue(())
                }
            }
        });
        for message in missing {
            diag.error(message);
        }
    }

    pub fn find_segment(&self, name: &str) -> Option<SegmentInfo<'a>> {
        let mut diag = Diagnostics::new();
        let mut found = None;
        self.for_each_segment(&mut diag, |segment| {
            if segment.name == name {
                found = Some(*segment);
                return ControlFlow::Break(());
            }
            ControlFlow::Continue(())
        });
        found
    }

    /// Unslid address of `__TEXT`, 0 when there is none
    pub fn preferred_load_address(&self) -> u64 {
        self.find_segment(SEG_TEXT).map(|text| text.vm_addr).unwrap_or(0)
    }

    pub fn segment_name(&self, index: u32) -> Option<&'a str> {
        let mut diag = Diagnostics::new();
        let mut found = None;
        self.for_each_segment(&mut diag, |segment| {
            if segment.index == index {
                found = Some(segment.name);
                return ControlFlow::Break(());
            }
            ControlFlow::Continue(())
        });
        found
    }
}
