//! Synthetic Mach-O images for exercising the parser
//!
//! `ImageBuilder` lays out a header, the requested load commands and a
//! link-edit blob (symbols, strings, tries, other link-edit data) so that
//! file offsets and addresses agree: the link-edit segment sits at the same
//! distance from `__TEXT` in memory as in the file. The same bytes are
//! therefore valid both as a raw file and as an in-process image.
//! Malformed inputs are produced with `raw_command`, `ncmds` and `patch`.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use machscope_core::CpuType;

use crate::format::*;

/// Output buffer with a fixed byte order
struct Out {
    buf: Vec<u8>,
    big: bool,
}

impl Out {
    fn new(big: bool) -> Self {
        Self { buf: Vec::new(), big }
    }

    fn u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    fn u16(&mut self, value: u16) {
        let mut raw = [0u8; 2];
        if self.big {
            BigEndian::write_u16(&mut raw, value);
        } else {
            LittleEndian::write_u16(&mut raw, value);
        }
        self.buf.extend_from_slice(&raw);
    }

    fn u32(&mut self, value: u32) {
        let mut raw = [0u8; 4];
        if self.big {
            BigEndian::write_u32(&mut raw, value);
        } else {
            LittleEndian::write_u32(&mut raw, value);
        }
        self.buf.extend_from_slice(&raw);
    }

    fn u64(&mut self, value: u64) {
        let mut raw = [0u8; 8];
        if self.big {
            BigEndian::write_u64(&mut raw, value);
        } else {
            LittleEndian::write_u64(&mut raw, value);
        }
        self.buf.extend_from_slice(&raw);
    }

    /// Pointer-sized field
    fn word(&mut self, is_64: bool, value: u64) {
        if is_64 {
            self.u64(value);
        } else {
            self.u32(value as u32);
        }
    }

    fn name16(&mut self, name: &str) {
        let mut raw = [0u8; 16];
        let len = name.len().min(16);
        raw[..len].copy_from_slice(&name.as_bytes()[..len]);
        self.buf.extend_from_slice(&raw);
    }

    fn bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn pad_to(&mut self, len: usize) {
        if self.buf.len() < len {
            self.buf.resize(len, 0);
        }
    }

    fn len(&self) -> usize {
        self.buf.len()
    }
}

fn align(value: usize, to: usize) -> usize {
    (value + to - 1) / to * to
}

pub fn uleb128(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn uleb_len(value: u64) -> usize {
    let mut raw = Vec::new();
    uleb128(value, &mut raw);
    raw.len()
}

#[derive(Debug, Clone)]
struct SectionPlan {
    name: String,
    addr: u64,
    size: u64,
    offset: u32,
    flags: u32,
}

#[derive(Debug, Clone)]
struct SegmentPlan {
    name: String,
    vm_addr: u64,
    vm_size: u64,
    file_offset: u64,
    file_size: u64,
    init_prot: VmProt,
    sections: Vec<SectionPlan>,
    nsects_override: Option<u32>,
}

#[derive(Debug, Clone)]
struct SymbolPlan {
    name: Option<String>,
    strx: u32,
    n_type: u8,
    n_sect: u8,
    n_desc: u16,
    value: u64,
}

#[derive(Debug, Clone)]
enum Command {
    Segment(SegmentPlan),
    LinkeditSegment,
    Symtab,
    Dysymtab([u32; 4]),
    DyldInfo(usize),
    LinkeditData(u32, usize),
    Dylib(u32, String),
    Rpath(String),
    Uuid([u8; 16]),
    VersionMin(u32, u32, u32),
    BuildVersion(u32, u32, u32),
    Encryption { offset: u32, size: u32, id: u32, wide: bool },
    Raw(u32, u32, Vec<u8>),
}

/// Builder for a single-architecture Mach-O image
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    is_64: bool,
    big_endian: bool,
    cpu: CpuType,
    cpu_subtype: u32,
    file_type: u32,
    flags: u32,
    ncmds: Option<u32>,
    commands: Vec<Command>,
    symbols: Vec<SymbolPlan>,
    blobs: Vec<Vec<u8>>,
    min_len: usize,
    patches: Vec<(usize, Vec<u8>)>,
}

impl ImageBuilder {
    fn new(is_64: bool) -> Self {
        Self {
            is_64,
            big_endian: false,
            cpu: if is_64 { CpuType::X86_64 } else { CpuType::X86 },
            cpu_subtype: 3,
            file_type: MH_EXECUTE,
            flags: 0,
            ncmds: None,
            commands: Vec::new(),
            symbols: Vec::new(),
            blobs: Vec::new(),
            min_len: 0,
            patches: Vec::new(),
        }
    }

    pub fn new_64() -> Self {
        Self::new(true)
    }

    pub fn new_32() -> Self {
        Self::new(false)
    }

    pub fn big_endian(mut self) -> Self {
        self.big_endian = true;
        self
    }

    pub fn cpu(mut self, cpu: CpuType, subtype: u32) -> Self {
        self.cpu = cpu;
        self.cpu_subtype = subtype;
        self
    }

    pub fn file_type(mut self, file_type: u32) -> Self {
        self.file_type = file_type;
        self
    }

    pub fn flags(mut self, flags: HeaderFlags) -> Self {
        self.flags = flags.bits();
        self
    }

    /// Declare a command count different from the commands written
    pub fn ncmds(mut self, count: u32) -> Self {
        self.ncmds = Some(count);
        self
    }

    pub fn segment(mut self, name: &str, vm_addr: u64, vm_size: u64, file_offset: u64, file_size: u64) -> Self {
        let init_prot = match name {
            "__TEXT" => VmProt::READ | VmProt::EXECUTE,
            "__DATA" | "__DATA_CONST" => VmProt::READ | VmProt::WRITE,
            "__PAGEZERO" => VmProt::empty(),
            _ => VmProt::READ,
        };
        self.commands.push(Command::Segment(SegmentPlan {
            name: name.to_string(),
            vm_addr,
            vm_size,
            file_offset,
            file_size,
            init_prot,
            sections: Vec::new(),
            nsects_override: None,
        }));
        self
    }

    fn last_segment(&mut self) -> Option<&mut SegmentPlan> {
        self.commands.iter_mut().rev().find_map(|cmd| match cmd {
            Command::Segment(plan) => Some(plan),
            _ => None,
        })
    }

    /// Initial protection of the most recent segment
    pub fn protection(mut self, prot: VmProt) -> Self {
        if let Some(segment) = self.last_segment() {
            segment.init_prot = prot;
        }
        self
    }

    /// Add a section to the most recent segment
    pub fn section(mut self, name: &str, addr: u64, size: u64, offset: u32, flags: u32) -> Self {
        if let Some(segment) = self.last_segment() {
            segment.sections.push(SectionPlan {
                name: name.to_string(),
                addr,
                size,
                offset,
                flags,
            });
        }
        self
    }

    /// Write `count` into the most recent segment's `nsects` regardless of
    /// how many sections it has
    pub fn override_section_count(mut self, count: u32) -> Self {
        if let Some(segment) = self.last_segment() {
            segment.nsects_override = Some(count);
        }
        self
    }

    /// `__LINKEDIT` covering the link-edit blob
    pub fn linkedit_segment(mut self) -> Self {
        self.commands.push(Command::LinkeditSegment);
        self
    }

    pub fn symbol(mut self, name: &str, n_type: u8, n_sect: u8, n_desc: u16, value: u64) -> Self {
        self.symbols.push(SymbolPlan {
            name: Some(name.to_string()),
            strx: 0,
            n_type,
            n_sect,
            n_desc,
            value,
        });
        self
    }

    /// Symbol whose string index is written as given
    pub fn symbol_with_strx(mut self, strx: u32, n_type: u8, n_sect: u8, n_desc: u16, value: u64) -> Self {
        self.symbols.push(SymbolPlan {
            name: None,
            strx,
            n_type,
            n_sect,
            n_desc,
            value,
        });
        self
    }

    pub fn symtab(mut self) -> Self {
        self.commands.push(Command::Symtab);
        self
    }

    pub fn dysymtab(mut self, ilocalsym: u32, nlocalsym: u32, iextdefsym: u32, nextdefsym: u32) -> Self {
        self.commands
            .push(Command::Dysymtab([ilocalsym, nlocalsym, iextdefsym, nextdefsym]));
        self
    }

    fn add_blob(&mut self, bytes: Vec<u8>) -> usize {
        self.blobs.push(bytes);
        self.blobs.len() - 1
    }

    /// Export trie referenced from `LC_DYLD_INFO_ONLY`
    pub fn dyld_info_exports(mut self, trie: Vec<u8>) -> Self {
        let blob = self.add_blob(trie);
        self.commands.push(Command::DyldInfo(blob));
        self
    }

    /// Export trie referenced from `LC_DYLD_EXPORTS_TRIE`
    pub fn exports_trie(self, trie: Vec<u8>) -> Self {
        self.linkedit_data(LC_DYLD_EXPORTS_TRIE, &trie)
    }

    pub fn linkedit_data(mut self, cmd: u32, bytes: &[u8]) -> Self {
        let blob = self.add_blob(bytes.to_vec());
        self.commands.push(Command::LinkeditData(cmd, blob));
        self
    }

    pub fn dylib(mut self, cmd: u32, path: &str) -> Self {
        self.commands.push(Command::Dylib(cmd, path.to_string()));
        self
    }

    pub fn load_dylib(self, path: &str) -> Self {
        self.dylib(LC_LOAD_DYLIB, path)
    }

    pub fn weak_dylib(self, path: &str) -> Self {
        self.dylib(LC_LOAD_WEAK_DYLIB, path)
    }

    pub fn reexport_dylib(self, path: &str) -> Self {
        self.dylib(LC_REEXPORT_DYLIB, path)
    }

    pub fn upward_dylib(self, path: &str) -> Self {
        self.dylib(LC_LOAD_UPWARD_DYLIB, path)
    }

    pub fn id_dylib(self, install_name: &str) -> Self {
        self.dylib(LC_ID_DYLIB, install_name)
    }

    pub fn rpath(mut self, path: &str) -> Self {
        self.commands.push(Command::Rpath(path.to_string()));
        self
    }

    pub fn uuid(mut self, uuid: [u8; 16]) -> Self {
        self.commands.push(Command::Uuid(uuid));
        self
    }

    pub fn version_min(mut self, cmd: u32, version: u32, sdk: u32) -> Self {
        self.commands.push(Command::VersionMin(cmd, version, sdk));
        self
    }

    pub fn build_version(mut self, platform: u32, minos: u32, sdk: u32) -> Self {
        self.commands.push(Command::BuildVersion(platform, minos, sdk));
        self
    }

    /// `wide` selects `LC_ENCRYPTION_INFO_64`
    pub fn encryption_info(mut self, offset: u32, size: u32, id: u32, wide: bool) -> Self {
        self.commands.push(Command::Encryption {
            offset,
            size,
            id,
            wide,
        });
        self
    }

    /// Command with an arbitrary declared size. Only the 8-byte header and
    /// `payload` are written.
    pub fn raw_command(mut self, cmd: u32, cmdsize: u32, payload: &[u8]) -> Self {
        self.commands.push(Command::Raw(cmd, cmdsize, payload.to_vec()));
        self
    }

    /// Extend the image with zeros to at least `len` bytes
    pub fn pad_to(mut self, len: usize) -> Self {
        self.min_len = self.min_len.max(len);
        self
    }

    /// Overwrite bytes after layout
    pub fn patch(mut self, offset: usize, bytes: &[u8]) -> Self {
        self.patches.push((offset, bytes.to_vec()));
        self
    }

    fn header_size(&self) -> usize {
        if self.is_64 {
            MachHeader::SIZE_64
        } else {
            MachHeader::SIZE
        }
    }

    fn command_size(&self, command: &Command) -> usize {
        let (segment, section) = if self.is_64 {
            (SegmentCommand64::SIZE, Section64::SIZE)
        } else {
            (SegmentCommand32::SIZE, Section32::SIZE)
        };
        match command {
            Command::Segment(plan) => segment + plan.sections.len() * section,
            Command::LinkeditSegment => segment,
            Command::Symtab => SymtabCommand::SIZE,
            Command::Dysymtab(_) => DysymtabCommand::SIZE,
            Command::DyldInfo(_) => DyldInfoCommand::SIZE,
            Command::LinkeditData(..) => LinkeditDataCommand::SIZE,
            Command::Dylib(_, path) => align(DylibCommand::SIZE + path.len() + 1, 8),
            Command::Rpath(path) => align(RpathCommand::SIZE + path.len() + 1, 8),
            Command::Uuid(_) => UuidCommand::SIZE,
            Command::VersionMin(..) => VersionMinCommand::SIZE,
            Command::BuildVersion(..) => BuildVersionCommand::SIZE,
            Command::Encryption { wide, .. } => {
                if *wide {
                    EncryptionInfoCommand::SIZE_64
                } else {
                    EncryptionInfoCommand::SIZE
                }
            }
            Command::Raw(_, _, payload) => LoadCommandHeader::SIZE + payload.len(),
        }
    }

    pub fn build(self) -> Vec<u8> {
        let is_64 = self.is_64;
        let sizeofcmds: usize = self.commands.iter().map(|c| self.command_size(c)).sum();
        let cmds_end = self.header_size() + sizeofcmds;

        // Link-edit blob starts after the commands and any small explicit segment
        let segments_end = self
            .commands
            .iter()
            .filter_map(|cmd| match cmd {
                Command::Segment(plan) => plan.file_offset.checked_add(plan.file_size),
                _ => None,
            })
            .filter(|&end| end <= 0x10_0000)
            .max()
            .unwrap_or(0) as usize;
        let blob_start = align(cmds_end.max(segments_end), 16);

        let mut blob = Vec::new();
        let nlist_size = if is_64 { Nlist64::SIZE } else { Nlist32::SIZE };
        let symoff = blob_start;
        let has_symtab =
            !self.symbols.is_empty() || self.commands.iter().any(|cmd| matches!(cmd, Command::Symtab));
        let mut strings = if has_symtab { vec![0u8] } else { Vec::new() };
        let mut nlists = Out::new(self.big_endian);
        for symbol in &self.symbols {
            let strx = match &symbol.name {
                Some(name) => {
                    let strx = strings.len() as u32;
                    strings.extend_from_slice(name.as_bytes());
                    strings.push(0);
                    strx
                }
                None => symbol.strx,
            };
            nlists.u32(strx);
            nlists.u8(symbol.n_type);
            nlists.u8(symbol.n_sect);
            nlists.u16(symbol.n_desc);
            nlists.word(is_64, symbol.value);
        }
        debug_assert_eq!(nlists.len(), self.symbols.len() * nlist_size);
        blob.extend_from_slice(&nlists.buf);
        let stroff = blob_start + blob.len();
        blob.extend_from_slice(&strings);
        let mut blob_offsets = Vec::new();
        for data in &self.blobs {
            blob.resize(align(blob.len(), 8), 0);
            blob_offsets.push(blob_start + blob.len());
            blob.extend_from_slice(data);
        }
        let text_vm = self
            .commands
            .iter()
            .find_map(|cmd| match cmd {
                Command::Segment(plan) if plan.name == SEG_TEXT => Some(plan.vm_addr),
                _ => None,
            })
            .unwrap_or(0);

        let mut out = Out::new(self.big_endian);
        out.u32(if is_64 { MH_MAGIC_64 } else { MH_MAGIC });
        out.u32(self.cpu.raw());
        out.u32(self.cpu_subtype);
        out.u32(self.file_type);
        out.u32(self.ncmds.unwrap_or(self.commands.len() as u32));
        out.u32(sizeofcmds as u32);
        out.u32(self.flags);
        if is_64 {
            out.u32(0);
        }

        for command in &self.commands {
            let start = out.len();
            let size = self.command_size(command) as u32;
            match command {
                Command::Segment(plan) => self.write_segment(&mut out, plan, size),
                Command::LinkeditSegment => {
                    let plan = SegmentPlan {
                        name: SEG_LINKEDIT.to_string(),
                        vm_addr: text_vm + blob_start as u64,
                        vm_size: align(blob.len().max(1), 0x1000) as u64,
                        file_offset: blob_start as u64,
                        file_size: blob.len() as u64,
                        init_prot: VmProt::READ,
                        sections: Vec::new(),
                        nsects_override: None,
                    };
                    self.write_segment(&mut out, &plan, size);
                }
                Command::Symtab => {
                    out.u32(LC_SYMTAB);
                    out.u32(size);
                    out.u32(symoff as u32);
                    out.u32(self.symbols.len() as u32);
                    out.u32(stroff as u32);
                    out.u32(strings.len() as u32);
                }
                Command::Dysymtab(fields) => {
                    out.u32(LC_DYSYMTAB);
                    out.u32(size);
                    for field in fields {
                        out.u32(*field);
                    }
                    for _ in 0..14 {
                        out.u32(0);
                    }
                }
                Command::DyldInfo(blob_index) => {
                    out.u32(LC_DYLD_INFO_ONLY);
                    out.u32(size);
                    for _ in 0..8 {
                        out.u32(0);
                    }
                    out.u32(blob_offsets[*blob_index] as u32);
                    out.u32(self.blobs[*blob_index].len() as u32);
                }
                Command::LinkeditData(cmd, blob_index) => {
                    out.u32(*cmd);
                    out.u32(size);
                    out.u32(blob_offsets[*blob_index] as u32);
                    out.u32(self.blobs[*blob_index].len() as u32);
                }
                Command::Dylib(cmd, path) => {
                    out.u32(*cmd);
                    out.u32(size);
                    out.u32(DylibCommand::SIZE as u32);
                    out.u32(2);
                    out.u32(0x0001_0000);
                    out.u32(0x0001_0000);
                    out.bytes(path.as_bytes());
                }
                Command::Rpath(path) => {
                    out.u32(LC_RPATH);
                    out.u32(size);
                    out.u32(RpathCommand::SIZE as u32);
                    out.bytes(path.as_bytes());
                }
                Command::Uuid(uuid) => {
                    out.u32(LC_UUID);
                    out.u32(size);
                    out.bytes(uuid);
                }
                Command::VersionMin(cmd, version, sdk) => {
                    out.u32(*cmd);
                    out.u32(size);
                    out.u32(*version);
                    out.u32(*sdk);
                }
                Command::BuildVersion(platform, minos, sdk) => {
                    out.u32(LC_BUILD_VERSION);
                    out.u32(size);
                    out.u32(*platform);
                    out.u32(*minos);
                    out.u32(*sdk);
                    out.u32(0);
                }
                Command::Encryption {
                    offset,
                    size: crypt_size,
                    id,
                    wide,
                } => {
                    out.u32(if *wide { LC_ENCRYPTION_INFO_64 } else { LC_ENCRYPTION_INFO });
                    out.u32(size);
                    out.u32(*offset);
                    out.u32(*crypt_size);
                    out.u32(*id);
                }
                Command::Raw(cmd, cmdsize, payload) => {
                    out.u32(*cmd);
                    out.u32(*cmdsize);
                    out.bytes(payload);
                }
            }
            // Strings and padding
            out.pad_to(start + self.command_size(command));
        }

        if !blob.is_empty() {
            out.pad_to(blob_start);
            out.bytes(&blob);
        }
        out.pad_to(self.min_len);
        let mut data = out.buf;
        for (offset, bytes) in self.patches {
            if data.len() < offset + bytes.len() {
                data.resize(offset + bytes.len(), 0);
            }
            data[offset..offset + bytes.len()].copy_from_slice(&bytes);
        }
        data
    }

    fn write_segment(&self, out: &mut Out, plan: &SegmentPlan, size: u32) {
        let is_64 = self.is_64;
        out.u32(if is_64 { LC_SEGMENT_64 } else { LC_SEGMENT });
        out.u32(size);
        out.name16(&plan.name);
        out.word(is_64, plan.vm_addr);
        out.word(is_64, plan.vm_size);
        out.word(is_64, plan.file_offset);
        out.word(is_64, plan.file_size);
        out.u32((VmProt::READ | VmProt::WRITE | VmProt::EXECUTE).bits());
        out.u32(plan.init_prot.bits());
        out.u32(plan.nsects_override.unwrap_or(plan.sections.len() as u32));
        out.u32(0);
        for section in &plan.sections {
            out.name16(&section.name);
            out.name16(&plan.name);
            out.word(is_64, section.addr);
            out.word(is_64, section.size);
            out.u32(section.offset);
            out.u32(0);
            out.u32(0);
            out.u32(0);
            out.u32(section.flags);
            out.u32(0);
            out.u32(0);
            if is_64 {
                out.u32(0);
            }
        }
    }
}

/// Builder for serialized export tries
#[derive(Debug, Clone, Default)]
pub struct TrieBuilder {
    entries: Vec<(String, Vec<u8>)>,
}

#[derive(Debug, Default)]
struct TrieNode {
    terminal: Option<Vec<u8>>,
    edges: Vec<(Vec<u8>, usize)>,
}

impl TrieBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Terminal with an arbitrary payload
    pub fn raw_terminal(mut self, name: &str, payload: Vec<u8>) -> Self {
        self.entries.push((name.to_string(), payload));
        self
    }

    fn simple(self, name: &str, flags: u64, value: u64) -> Self {
        let mut payload = Vec::new();
        uleb128(flags, &mut payload);
        uleb128(value, &mut payload);
        self.raw_terminal(name, payload)
    }

    pub fn regular(self, name: &str, offset: u64) -> Self {
        self.simple(name, EXPORT_SYMBOL_FLAGS_KIND_REGULAR, offset)
    }

    pub fn weak(self, name: &str, offset: u64) -> Self {
        self.simple(name, ExportFlags::WEAK_DEFINITION.bits(), offset)
    }

    pub fn absolute(self, name: &str, value: u64) -> Self {
        self.simple(name, EXPORT_SYMBOL_FLAGS_KIND_ABSOLUTE, value)
    }

    pub fn thread_local(self, name: &str, offset: u64) -> Self {
        self.simple(name, EXPORT_SYMBOL_FLAGS_KIND_THREAD_LOCAL, offset)
    }

    pub fn stub_and_resolver(self, name: &str, stub: u64, resolver: u64) -> Self {
        let mut payload = Vec::new();
        uleb128(ExportFlags::STUB_AND_RESOLVER.bits(), &mut payload);
        uleb128(stub, &mut payload);
        uleb128(resolver, &mut payload);
        self.raw_terminal(name, payload)
    }

    /// Re-export from dependent `ordinal`; an empty `import_name` keeps the name
    pub fn reexport(self, name: &str, ordinal: u64, import_name: &str) -> Self {
        let mut payload = Vec::new();
        uleb128(ExportFlags::REEXPORT.bits(), &mut payload);
        uleb128(ordinal, &mut payload);
        payload.extend_from_slice(import_name.as_bytes());
        payload.push(0);
        self.raw_terminal(name, payload)
    }

    pub fn build(self) -> Vec<u8> {
        let mut nodes = vec![TrieNode::default()];
        for (name, payload) in self.entries {
            insert(&mut nodes, name.as_bytes(), payload);
        }

        let mut order = Vec::with_capacity(nodes.len());
        let mut stack = vec![0usize];
        while let Some(node) = stack.pop() {
            order.push(node);
            for (_, child) in nodes[node].edges.iter().rev() {
                stack.push(*child);
            }
        }

        // Node sizes depend on child offsets, so iterate until stable
        let mut offsets = vec![0u64; nodes.len()];
        loop {
            let mut changed = false;
            let mut offset = 0u64;
            for &node in &order {
                if offsets[node] != offset {
                    offsets[node] = offset;
                    changed = true;
                }
                offset += node_size(&nodes[node], &offsets) as u64;
            }
            if !changed {
                break;
            }
        }

        let mut out = Vec::new();
        for &node in &order {
            let node = &nodes[node];
            match &node.terminal {
                Some(payload) => {
                    uleb128(payload.len() as u64, &mut out);
                    out.extend_from_slice(payload);
                }
                None => out.push(0),
            }
            out.push(node.edges.len() as u8);
            for (label, child) in &node.edges {
                out.extend_from_slice(label);
                out.push(0);
                uleb128(offsets[*child], &mut out);
            }
        }
        out
    }
}

fn node_size(node: &TrieNode, offsets: &[u64]) -> usize {
    let terminal = match &node.terminal {
        Some(payload) => uleb_len(payload.len() as u64) + payload.len(),
        None => 1,
    };
    let edges: usize = node
        .edges
        .iter()
        .map(|(label, child)| label.len() + 1 + uleb_len(offsets[*child]))
        .sum();
    terminal + 1 + edges
}

fn insert(nodes: &mut Vec<TrieNode>, name: &[u8], payload: Vec<u8>) {
    let mut node = 0usize;
    let mut rest = name;
    loop {
        if rest.is_empty() {
            nodes[node].terminal = Some(payload);
            return;
        }
        let edge = nodes[node]
            .edges
            .iter()
            .position(|(label, _)| label.first() == rest.first());
        let Some(edge) = edge else {
            nodes.push(TrieNode {
                terminal: Some(payload),
                edges: Vec::new(),
            });
            let child = nodes.len() - 1;
            nodes[node].edges.push((rest.to_vec(), child));
            return;
        };

        let (label, child) = nodes[node].edges[edge].clone();
        let common = label
            .iter()
            .zip(rest)
            .take_while(|(a, b)| a == b)
            .count();
        if common < label.len() {
            nodes.push(TrieNode {
                terminal: None,
                edges: vec![(label[common..].to_vec(), child)],
            });
            let middle = nodes.len() - 1;
            nodes[node].edges[edge] = (label[..common].to_vec(), middle);
            node = middle;
        } else {
            node = child;
        }
        rest = &rest[common..];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uleb128() {
        let mut out = Vec::new();
        uleb128(624_485, &mut out);
        assert_eq!(out, vec![0xE5, 0x8E, 0x26]);
        assert_eq!(uleb_len(127), 1);
        assert_eq!(uleb_len(128), 2);
    }

    #[test]
    fn test_trie_shares_prefixes() {
        let trie = TrieBuilder::new().regular("_ab", 1).regular("_ac", 2).build();
        // root: no terminal, one edge "_a"
        assert_eq!(&trie[..5], &[0x00, 0x01, b'_', b'a', 0x00]);
    }

    #[test]
    fn test_header_layout() {
        let data = ImageBuilder::new_64().uuid([0; 16]).build();
        assert_eq!(&data[..4], &MH_MAGIC_64.to_le_bytes());
        assert_eq!(data.len(), MachHeader::SIZE_64 + UuidCommand::SIZE);
        let data = ImageBuilder::new_32().big_endian().build();
        assert_eq!(&data[..4], &MH_MAGIC.to_be_bytes());
    }
}
