//! Mach-O image view and structural introspection

use std::ops::ControlFlow;

use machscope_core::{CpuType, PackedVersion, Platform};
use scroll::{Endian, Pread};

use crate::diagnostics::Diagnostics;
use crate::error::{ParseError, ParseResult};
use crate::format::*;

/// How the bytes behind an image were mapped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingMode {
    /// Loaded by the dynamic linker. `header_address` is the runtime address
    /// of byte 0 of the view. Without an explicit slide it is derived from
    /// the `__TEXT` segment.
    InProcess {
        header_address: u64,
        slide: Option<i64>,
    },
    /// Whole file mapped as one contiguous region
    RawFile,
    /// Image inside a shared cache file mapped as one region, padding not expanded
    CacheRaw,
    /// Image inside a shared cache mapped the way the runtime maps it
    CacheExpanded,
}

/// Read-only view over a Mach-O image
///
/// Owns nothing: byte 0 of `data` is the Mach header and the caller keeps the
/// memory alive. The header magic fixes struct widths and byte order for
/// every later read.
#[derive(Debug, Clone, Copy)]
pub struct MachImage<'a> {
    data: &'a [u8],
    header: MachHeader,
    is_64: bool,
    endian: Endian,
    mode: MappingMode,
}

/// Platform plus minimum OS and SDK versions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformVersion {
    pub platform: Platform,
    pub min_os: PackedVersion,
    pub sdk: PackedVersion,
}

/// Install name and versions from `LC_ID_DYLIB`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DylibId<'a> {
    pub install_name: &'a str,
    pub compat_version: PackedVersion,
    pub current_version: PackedVersion,
}

/// One `LC_LOAD_*DYLIB` / `LC_REEXPORT_DYLIB` entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependentDylib<'a> {
    /// Empty when the command's name offset is unusable
    pub load_path: &'a str,
    pub is_weak: bool,
    pub is_reexport: bool,
    pub is_upward: bool,
    pub compat_version: PackedVersion,
    pub current_version: PackedVersion,
}

/// Encrypted range of the text segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionRange {
    pub text_offset: u32,
    pub size: u32,
}

const ARCH_NAMES: &[(&str, CpuType, u32)] = &[
    ("x86_64", CpuType::X86_64, 3),
    ("x86_64h", CpuType::X86_64, 8),
    ("i386", CpuType::X86, 3),
    ("arm64", CpuType::Arm64, 0),
    ("arm64_v8", CpuType::Arm64, 1),
    ("arm64e", CpuType::Arm64, 2),
    ("armv4t", CpuType::Arm, 5),
    ("armv6", CpuType::Arm, 6),
    ("armv5tej", CpuType::Arm, 7),
    ("armxscale", CpuType::Arm, 8),
    ("armv7", CpuType::Arm, 9),
    ("armv7f", CpuType::Arm, 10),
    ("armv7s", CpuType::Arm, 11),
    ("armv7k", CpuType::Arm, 12),
];

const CPU_SUBTYPE_MASK: u32 = 0x00FF_FFFF;

impl<'a> MachImage<'a> {
    /// Decode the header of `data` and wrap it with the given mapping mode
    pub fn parse(data: &'a [u8], mode: MappingMode) -> ParseResult<Self> {
        if data.len() < 4 {
            return Err(ParseError::truncated(4, data.len()));
        }
        let magic = data.pread_with::<u32>(0, scroll::LE)?;
        let (is_64, endian) = match magic {
            MH_MAGIC => (false, scroll::LE),
            MH_MAGIC_64 => (true, scroll::LE),
            MH_CIGAM => (false, scroll::BE),
            MH_CIGAM_64 => (true, scroll::BE),
            _ => {
                return Err(ParseError::InvalidMagic {
                    expected: MH_MAGIC_64,
                    actual: magic,
                })
            }
        };
        let header_size = if is_64 { MachHeader::SIZE_64 } else { MachHeader::SIZE };
        if data.len() < header_size {
            return Err(ParseError::truncated(header_size, data.len()));
        }
        let header: MachHeader = data.pread_with(0, endian)?;
        Ok(Self {
            data,
            header,
            is_64,
            endian,
            mode,
        })
    }

    /// Image loaded by the dynamic linker whose header lives at `header_address`
    pub fn in_process(data: &'a [u8], header_address: u64) -> ParseResult<Self> {
        Self::parse(
            data,
            MappingMode::InProcess {
                header_address,
                slide: None,
            },
        )
    }

    /// Image mapped by something other than the dynamic linker. Images not
    /// flagged as living in a shared cache are raw mapped files; cached ones
    /// follow the cache's own mapping.
    pub fn out_of_process(data: &'a [u8], cache_is_raw: bool) -> ParseResult<Self> {
        let image = Self::parse(data, MappingMode::RawFile)?;
        let mode = if !image.in_dyld_cache() {
            MappingMode::RawFile
        } else if cache_is_raw {
            MappingMode::CacheRaw
        } else {
            MappingMode::CacheExpanded
        };
        Ok(image.with_mode(mode))
    }

    pub fn with_mode(mut self, mode: MappingMode) -> Self {
        self.mode = mode;
        self
    }

    /// Check that `data` looks like a loadable Mach-O for the running CPU
    pub fn is_macho(diag: &mut Diagnostics, data: &[u8]) -> bool {
        Self::is_macho_for(diag, data, CpuType::native())
    }

    pub fn is_macho_for(diag: &mut Diagnostics, data: &[u8], cpu: Option<CpuType>) -> bool {
        if data.len() < 4096 {
            diag.error("file too short");
            return false;
        }
        let image = match MachImage::parse(data, MappingMode::RawFile) {
            Ok(image) if image.endian == scroll::LE => image,
            _ => {
                diag.error("not a mach-o file");
                return false;
            }
        };
        if let Some(cpu) = cpu {
            if image.cpu_type() != cpu {
                diag.error("wrong cpu type");
                return false;
            }
        }
        true
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn header(&self) -> &MachHeader {
        &self.header
    }

    pub fn mode(&self) -> MappingMode {
        self.mode
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn is_64(&self) -> bool {
        self.is_64
    }

    pub fn header_size(&self) -> usize {
        if self.is_64 {
            MachHeader::SIZE_64
        } else {
            MachHeader::SIZE
        }
    }

    pub fn file_type(&self) -> u32 {
        self.header.filetype
    }

    pub fn cpu_type(&self) -> CpuType {
        CpuType::from_raw(self.header.cputype)
    }

    pub fn flags(&self) -> HeaderFlags {
        HeaderFlags::from_bits_retain(self.header.flags)
    }

    pub fn in_dyld_cache(&self) -> bool {
        self.flags().contains(HeaderFlags::DYLIB_IN_CACHE)
    }

    pub fn has_thread_local_variables(&self) -> bool {
        self.flags().contains(HeaderFlags::HAS_TLV_DESCRIPTORS)
    }

    /// Whole file mapped as one region rather than laid out like the loader does
    pub fn is_raw(&self) -> bool {
        self.mode == MappingMode::RawFile
    }

    pub fn in_raw_cache(&self) -> bool {
        self.mode == MappingMode::CacheRaw
    }

    pub fn arch_name(&self) -> &'static str {
        let cpu = self.cpu_type();
        let subtype = self.header.cpusubtype & CPU_SUBTYPE_MASK;
        ARCH_NAMES
            .iter()
            .find(|(_, c, s)| *c == cpu && *s == subtype)
            .map(|(name, _, _)| *name)
            .unwrap_or("unknown")
    }

    /// Runtime address of the header for in-process images, the preferred
    /// (unslid) load address otherwise
    pub fn header_address(&self) -> u64 {
        match self.mode {
            MappingMode::InProcess { header_address, .. } => header_address,
            _ => self.preferred_load_address(),
        }
    }

    /// Distance between the preferred and actual load address. Mapped images
    /// have no slide. `None` when an in-process image has no `__TEXT`.
    pub fn slide(&self) -> Option<i64> {
        match self.mode {
            MappingMode::InProcess {
                slide: Some(slide), ..
            } => Some(slide),
            MappingMode::InProcess {
                header_address,
                slide: None,
            } => {
                let text = self.find_segment(SEG_TEXT)?;
                Some(header_address.wrapping_sub(text.vm_addr) as i64)
            }
            _ => Some(0),
        }
    }

    /// Platform and versions from the first version load command
    pub fn platform_and_version(&self) -> Option<PlatformVersion> {
        let mut diag = Diagnostics::new();
        let mut found = None;
        self.for_each_load_command(&mut diag, |cmd| {
            let version = match cmd.cmd {
                LC_VERSION_MIN_IPHONEOS
                | LC_VERSION_MIN_MACOSX
                | LC_VERSION_MIN_TVOS
                | LC_VERSION_MIN_WATCHOS => {
                    let Some(vers) = cmd.parse::<VersionMinCommand>() else {
                        return ControlFlow::Continue(());
                    };
                    let platform = match cmd.cmd {
                        LC_VERSION_MIN_IPHONEOS => Platform::iOS,
                        LC_VERSION_MIN_MACOSX => Platform::MacOS,
                        LC_VERSION_MIN_TVOS => Platform::tvOS,
                        _ => Platform::watchOS,
                    };
                    PlatformVersion {
                        platform,
                        min_os: PackedVersion(vers.version),
                        sdk: PackedVersion(vers.sdk),
                    }
                }
                LC_BUILD_VERSION => {
                    let Some(build) = cmd.parse::<BuildVersionCommand>() else {
                        return ControlFlow::Continue(());
                    };
                    PlatformVersion {
                        platform: platform_from_build(build.platform),
                        min_os: PackedVersion(build.minos),
                        sdk: PackedVersion(build.sdk),
                    }
                }
                _ => return ControlFlow::Continue(()),
            };
            found = Some(version);
            ControlFlow::Break(())
        });
        found
    }

    /// Platform from the version commands, falling back to the CPU type for
    /// old binaries that carry none
    pub fn platform(&self) -> Platform {
        if let Some(version) = self.platform_and_version() {
            return version.platform;
        }
        match self.cpu_type() {
            CpuType::X86 | CpuType::X86_64 => Platform::MacOS,
            CpuType::Arm | CpuType::Arm64 => Platform::iOS,
            CpuType::Unknown(_) => Platform::MacOS,
        }
    }

    /// Intel binary built for a non-macOS platform
    pub fn is_simulator_binary(&self) -> bool {
        match self.cpu_type() {
            CpuType::X86 | CpuType::X86_64 => self
                .platform_and_version()
                .map(|v| v.platform != Platform::MacOS)
                .unwrap_or(false),
            _ => false,
        }
    }

    pub fn uuid(&self) -> Option<[u8; 16]> {
        let mut diag = Diagnostics::new();
        let mut uuid = None;
        self.for_each_load_command(&mut diag, |cmd| {
            if cmd.cmd == LC_UUID {
                uuid = cmd.parse::<UuidCommand>().map(|c| c.uuid);
                return ControlFlow::Break(());
            }
            ControlFlow::Continue(())
        });
        uuid
    }

    pub fn dylib_install_name(&self) -> Option<DylibId<'a>> {
        let mut diag = Diagnostics::new();
        let mut id = None;
        self.for_each_load_command(&mut diag, |cmd| {
            if cmd.cmd == LC_ID_DYLIB {
                id = cmd.parse::<DylibCommand>().and_then(|dylib| {
                    Some(DylibId {
                        install_name: cmd.string_at(dylib.name_offset)?,
                        compat_version: PackedVersion(dylib.compatibility_version),
                        current_version: PackedVersion(dylib.current_version),
                    })
                });
                return ControlFlow::Break(());
            }
            ControlFlow::Continue(())
        });
        id
    }

    /// Install name of a dylib; `None` for other file types
    pub fn install_name(&self) -> Option<&'a str> {
        if self.file_type() != MH_DYLIB {
            return None;
        }
        self.dylib_install_name().map(|id| id.install_name)
    }

    pub fn for_each_dependent_dylib<F>(&self, diag: &mut Diagnostics, mut visitor: F)
    where
        F: FnMut(&DependentDylib<'a>) -> ControlFlow<()>,
    {
        let mut truncated = Vec::new();
        let mut malformed = Vec::new();
        self.for_each_load_command(diag, |cmd| {
            match cmd.cmd {
                LC_LOAD_DYLIB | LC_LOAD_WEAK_DYLIB | LC_REEXPORT_DYLIB | LC_LOAD_UPWARD_DYLIB => {}
                _ => return ControlFlow::Continue(()),
            }
            // Unusable commands still occupy an ordinal slot.
            let (load_path, compat, current) = match cmd.parse::<DylibCommand>() {
                Some(dylib) => match cmd.string_at(dylib.name_offset) {
                    Some(path) => (path, dylib.compatibility_version, dylib.current_version),
                    None => {
                        malformed.push(cmd.index);
                        ("", dylib.compatibility_version, dylib.current_version)
                    }
                },
                None => {
                    truncated.push(cmd.index);
                    ("", 0, 0)
                }
            };
            visitor(&DependentDylib {
                load_path,
                is_weak: cmd.cmd == LC_LOAD_WEAK_DYLIB,
                is_reexport: cmd.cmd == LC_REEXPORT_DYLIB,
                is_upward: cmd.cmd == LC_LOAD_UPWARD_DYLIB,
                compat_version: PackedVersion(compat),
                current_version: PackedVersion(current),
            })
        });
        for index in truncated {
            diag.error(format!("dylib load command #{} too small", index));
        }
        for index in malformed {
            diag.error(format!("dylib load command #{} has unusable name offset", index));
        }
    }

    pub fn dependent_dylib_count(&self) -> u32 {
        let mut diag = Diagnostics::new();
        let mut count = 0;
        self.for_each_dependent_dylib(&mut diag, |_| {
            count += 1;
            ControlFlow::Continue(())
        });
        count
    }

    pub fn dependent_dylib_load_path(&self, dep_index: u32) -> Option<&'a str> {
        let mut diag = Diagnostics::new();
        let mut current = 0;
        let mut found = None;
        self.for_each_dependent_dylib(&mut diag, |dylib| {
            if current == dep_index {
                found = Some(dylib.load_path);
                return ControlFlow::Break(());
            }
            current += 1;
            ControlFlow::Continue(())
        });
        found
    }

    pub fn for_each_rpath<F>(&self, diag: &mut Diagnostics, mut visitor: F)
    where
        F: FnMut(&'a str) -> ControlFlow<()>,
    {
        let mut malformed = Vec::new();
        self.for_each_load_command(diag, |cmd| {
            if cmd.cmd != LC_RPATH {
                return ControlFlow::Continue(());
            }
            match cmd
                .parse::<RpathCommand>()
                .and_then(|rpath| cmd.string_at(rpath.path_offset))
            {
                Some(path) => visitor(path),
                None => {
                    malformed.push(cmd.index);
                    ControlFlow::Continue(())
                }
            }
        });
        for index in malformed {
            diag.error(format!("LC_RPATH load command #{} has unusable path offset", index));
        }
    }

    /// Encrypted text range, present only when the image is actually
    /// encrypted (`cryptid` 1)
    pub fn encryption_info(&self) -> Option<EncryptionRange> {
        let mut diag = Diagnostics::new();
        let mut range = None;
        self.for_each_load_command(&mut diag, |cmd| {
            if cmd.cmd == LC_ENCRYPTION_INFO || cmd.cmd == LC_ENCRYPTION_INFO_64 {
                range = cmd
                    .parse::<EncryptionInfoCommand>()
                    .filter(|enc| enc.cryptid == 1)
                    .map(|enc| EncryptionRange {
                        text_offset: enc.cryptoff,
                        size: enc.cryptsize,
                    });
                return ControlFlow::Break(());
            }
            ControlFlow::Continue(())
        });
        range
    }
}

fn platform_from_build(platform: u32) -> Platform {
    match platform {
        PLATFORM_MACOS => Platform::MacOS,
        PLATFORM_IOS | PLATFORM_IOSSIMULATOR => Platform::iOS,
        PLATFORM_TVOS | PLATFORM_TVOSSIMULATOR => Platform::tvOS,
        PLATFORM_WATCHOS | PLATFORM_WATCHOSSIMULATOR => Platform::watchOS,
        PLATFORM_BRIDGEOS => Platform::bridgeOS,
        _ => Platform::Unknown,
    }
}
