//! Mach-O on-disk records and constants
//!
//! Records are decoded with `scroll` using the byte order selected by the
//! header magic. `SIZE` is the exact on-disk size of each record and is what
//! load-command size validation compares against.

use scroll::Pread;

pub const MH_MAGIC: u32 = 0xFEED_FACE;
pub const MH_CIGAM: u32 = 0xCEFA_EDFE;
pub const MH_MAGIC_64: u32 = 0xFEED_FACF;
pub const MH_CIGAM_64: u32 = 0xCFFA_EDFE;

// File types
pub const MH_OBJECT: u32 = 0x1;
pub const MH_EXECUTE: u32 = 0x2;
pub const MH_DYLIB: u32 = 0x6;
pub const MH_DYLINKER: u32 = 0x7;
pub const MH_BUNDLE: u32 = 0x8;

// Load commands
pub const LC_REQ_DYLD: u32 = 0x8000_0000;
pub const LC_SEGMENT: u32 = 0x1;
pub const LC_SYMTAB: u32 = 0x2;
pub const LC_DYSYMTAB: u32 = 0xB;
pub const LC_LOAD_DYLIB: u32 = 0xC;
pub const LC_ID_DYLIB: u32 = 0xD;
pub const LC_LOAD_DYLINKER: u32 = 0xE;
pub const LC_LOAD_WEAK_DYLIB: u32 = 0x18 | LC_REQ_DYLD;
pub const LC_SEGMENT_64: u32 = 0x19;
pub const LC_UUID: u32 = 0x1B;
pub const LC_RPATH: u32 = 0x1C | LC_REQ_DYLD;
pub const LC_CODE_SIGNATURE: u32 = 0x1D;
pub const LC_SEGMENT_SPLIT_INFO: u32 = 0x1E;
pub const LC_REEXPORT_DYLIB: u32 = 0x1F | LC_REQ_DYLD;
pub const LC_ENCRYPTION_INFO: u32 = 0x21;
pub const LC_DYLD_INFO: u32 = 0x22;
pub const LC_DYLD_INFO_ONLY: u32 = 0x22 | LC_REQ_DYLD;
pub const LC_LOAD_UPWARD_DYLIB: u32 = 0x23 | LC_REQ_DYLD;
pub const LC_VERSION_MIN_MACOSX: u32 = 0x24;
pub const LC_VERSION_MIN_IPHONEOS: u32 = 0x25;
pub const LC_FUNCTION_STARTS: u32 = 0x26;
pub const LC_DATA_IN_CODE: u32 = 0x29;
pub const LC_ENCRYPTION_INFO_64: u32 = 0x2C;
pub const LC_VERSION_MIN_TVOS: u32 = 0x2F;
pub const LC_VERSION_MIN_WATCHOS: u32 = 0x30;
pub const LC_BUILD_VERSION: u32 = 0x32;
pub const LC_DYLD_EXPORTS_TRIE: u32 = 0x33 | LC_REQ_DYLD;

// Build-version platforms
pub const PLATFORM_MACOS: u32 = 1;
pub const PLATFORM_IOS: u32 = 2;
pub const PLATFORM_TVOS: u32 = 3;
pub const PLATFORM_WATCHOS: u32 = 4;
pub const PLATFORM_BRIDGEOS: u32 = 5;
pub const PLATFORM_IOSSIMULATOR: u32 = 7;
pub const PLATFORM_TVOSSIMULATOR: u32 = 8;
pub const PLATFORM_WATCHOSSIMULATOR: u32 = 9;

// Section attributes
pub const SECTION_TYPE: u32 = 0x0000_00FF;
pub const S_ZEROFILL: u32 = 0x1;
pub const S_GB_ZEROFILL: u32 = 0xC;
pub const S_THREAD_LOCAL_ZEROFILL: u32 = 0x12;
pub const S_ATTR_LOC_RELOC: u32 = 0x0000_0100;
pub const S_ATTR_EXT_RELOC: u32 = 0x0000_0200;

// nlist n_type / n_desc bits
pub const N_STAB: u8 = 0xE0;
pub const N_TYPE: u8 = 0x0E;
pub const N_EXT: u8 = 0x01;
pub const N_SECT: u8 = 0x0E;
pub const N_WEAK_DEF: u16 = 0x0080;

pub const SEG_TEXT: &str = "__TEXT";
pub const SEG_LINKEDIT: &str = "__LINKEDIT";

bitflags::bitflags! {
    /// Mach header `flags` bits this crate looks at
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HeaderFlags: u32 {
        const HAS_TLV_DESCRIPTORS = 0x0080_0000;
        const DYLIB_IN_CACHE = 0x8000_0000;
    }
}

bitflags::bitflags! {
    /// Segment memory protections
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct VmProt: u32 {
        const READ = 0x1;
        const WRITE = 0x2;
        const EXECUTE = 0x4;
    }
}

bitflags::bitflags! {
    /// Terminal flags in the export trie. The low two bits are the kind.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExportFlags: u64 {
        const KIND_MASK = 0x03;
        const WEAK_DEFINITION = 0x04;
        const REEXPORT = 0x08;
        const STUB_AND_RESOLVER = 0x10;
        const _ = !0;
    }
}

pub const EXPORT_SYMBOL_FLAGS_KIND_REGULAR: u64 = 0x00;
pub const EXPORT_SYMBOL_FLAGS_KIND_THREAD_LOCAL: u64 = 0x01;
pub const EXPORT_SYMBOL_FLAGS_KIND_ABSOLUTE: u64 = 0x02;

impl ExportFlags {
    pub fn kind(&self) -> u64 {
        self.bits() & Self::KIND_MASK.bits()
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pread)]
pub struct MachHeader {
    pub magic: u32,
    pub cputype: u32,
    pub cpusubtype: u32,
    pub filetype: u32,
    pub ncmds: u32,
    pub sizeofcmds: u32,
    pub flags: u32,
}

impl MachHeader {
    pub const SIZE: usize = 28;
    pub const SIZE_64: usize = 32;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pread)]
pub struct LoadCommandHeader {
    pub cmd: u32,
    pub cmdsize: u32,
}

impl LoadCommandHeader {
    pub const SIZE: usize = 8;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pread)]
pub struct SegmentCommand32 {
    pub cmd: u32,
    pub cmdsize: u32,
    pub segname: [u8; 16],
    pub vmaddr: u32,
    pub vmsize: u32,
    pub fileoff: u32,
    pub filesize: u32,
    pub maxprot: u32,
    pub initprot: u32,
    pub nsects: u32,
    pub flags: u32,
}

impl SegmentCommand32 {
    pub const SIZE: usize = 56;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pread)]
pub struct SegmentCommand64 {
    pub cmd: u32,
    pub cmdsize: u32,
    pub segname: [u8; 16],
    pub vmaddr: u64,
    pub vmsize: u64,
    pub fileoff: u64,
    pub filesize: u64,
    pub maxprot: u32,
    pub initprot: u32,
    pub nsects: u32,
    pub flags: u32,
}

impl SegmentCommand64 {
    pub const SIZE: usize = 72;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pread)]
pub struct Section32 {
    pub sectname: [u8; 16],
    pub segname: [u8; 16],
    pub addr: u32,
    pub size: u32,
    pub offset: u32,
    pub align: u32,
    pub reloff: u32,
    pub nreloc: u32,
    pub flags: u32,
    pub reserved1: u32,
    pub reserved2: u32,
}

impl Section32 {
    pub const SIZE: usize = 68;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pread)]
pub struct Section64 {
    pub sectname: [u8; 16],
    pub segname: [u8; 16],
    pub addr: u64,
    pub size: u64,
    pub offset: u32,
    pub align: u32,
    pub reloff: u32,
    pub nreloc: u32,
    pub flags: u32,
    pub reserved1: u32,
    pub reserved2: u32,
    pub reserved3: u32,
}

impl Section64 {
    pub const SIZE: usize = 80;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pread)]
pub struct SymtabCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub symoff: u32,
    pub nsyms: u32,
    pub stroff: u32,
    pub strsize: u32,
}

impl SymtabCommand {
    pub const SIZE: usize = 24;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pread)]
pub struct DysymtabCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub ilocalsym: u32,
    pub nlocalsym: u32,
    pub iextdefsym: u32,
    pub nextdefsym: u32,
    pub iundefsym: u32,
    pub nundefsym: u32,
    pub tocoff: u32,
    pub ntoc: u32,
    pub modtaboff: u32,
    pub nmodtab: u32,
    pub extrefsymoff: u32,
    pub nextrefsyms: u32,
    pub indirectsymoff: u32,
    pub nindirectsyms: u32,
    pub extreloff: u32,
    pub nextrel: u32,
    pub locreloff: u32,
    pub nlocrel: u32,
}

impl DysymtabCommand {
    pub const SIZE: usize = 80;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pread)]
pub struct DyldInfoCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub rebase_off: u32,
    pub rebase_size: u32,
    pub bind_off: u32,
    pub bind_size: u32,
    pub weak_bind_off: u32,
    pub weak_bind_size: u32,
    pub lazy_bind_off: u32,
    pub lazy_bind_size: u32,
    pub export_off: u32,
    pub export_size: u32,
}

impl DyldInfoCommand {
    pub const SIZE: usize = 48;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pread)]
pub struct LinkeditDataCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub dataoff: u32,
    pub datasize: u32,
}

impl LinkeditDataCommand {
    pub const SIZE: usize = 16;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pread)]
pub struct DylibCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub name_offset: u32,
    pub timestamp: u32,
    pub current_version: u32,
    pub compatibility_version: u32,
}

impl DylibCommand {
    pub const SIZE: usize = 24;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pread)]
pub struct RpathCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub path_offset: u32,
}

impl RpathCommand {
    pub const SIZE: usize = 12;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pread)]
pub struct UuidCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub uuid: [u8; 16],
}

impl UuidCommand {
    pub const SIZE: usize = 24;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pread)]
pub struct VersionMinCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub version: u32,
    pub sdk: u32,
}

impl VersionMinCommand {
    pub const SIZE: usize = 16;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pread)]
pub struct BuildVersionCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub platform: u32,
    pub minos: u32,
    pub sdk: u32,
    pub ntools: u32,
}

impl BuildVersionCommand {
    pub const SIZE: usize = 24;
    pub const TOOL_SIZE: usize = 8;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pread)]
pub struct EncryptionInfoCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub cryptoff: u32,
    pub cryptsize: u32,
    pub cryptid: u32,
}

impl EncryptionInfoCommand {
    pub const SIZE: usize = 20;
    /// The 64-bit variant appends four bytes of padding
    pub const SIZE_64: usize = 24;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pread)]
pub struct Nlist32 {
    pub n_strx: u32,
    pub n_type: u8,
    pub n_sect: u8,
    pub n_desc: u16,
    pub n_value: u32,
}

impl Nlist32 {
    pub const SIZE: usize = 12;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pread)]
pub struct Nlist64 {
    pub n_strx: u32,
    pub n_type: u8,
    pub n_sect: u8,
    pub n_desc: u16,
    pub n_value: u64,
}

impl Nlist64 {
    pub const SIZE: usize = 16;
}

/// Printable name of a singleton load command, used in diagnostics
pub fn command_name(cmd: u32) -> &'static str {
    match cmd {
        LC_SYMTAB => "LC_SYMTAB",
        LC_DYSYMTAB => "LC_DYSYMTAB",
        LC_DYLD_INFO | LC_DYLD_INFO_ONLY => "LC_DYLD_INFO",
        LC_DYLD_EXPORTS_TRIE => "LC_DYLD_EXPORTS_TRIE",
        LC_SEGMENT_SPLIT_INFO => "LC_SEGMENT_SPLIT_INFO",
        LC_FUNCTION_STARTS => "LC_FUNCTION_STARTS",
        LC_DATA_IN_CODE => "LC_DATA_IN_CODE",
        LC_CODE_SIGNATURE => "LC_CODE_SIGNATURE",
        LC_UUID => "LC_UUID",
        LC_BUILD_VERSION => "LC_BUILD_VERSION",
        LC_ENCRYPTION_INFO => "LC_ENCRYPTION_INFO",
        LC_ENCRYPTION_INFO_64 => "LC_ENCRYPTION_INFO_64",
        LC_VERSION_MIN_MACOSX
        | LC_VERSION_MIN_IPHONEOS
        | LC_VERSION_MIN_TVOS
        | LC_VERSION_MIN_WATCHOS => "LC_VERSION_MIN_*",
        _ => "load",
    }
}
