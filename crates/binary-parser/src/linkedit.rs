//! Singleton link-edit metadata commands

use std::ops::ControlFlow;

use scroll::ctx::TryFromCtx;
use scroll::Endian;

use crate::commands::LoadCommand;
use crate::diagnostics::Diagnostics;
use crate::format::*;
use crate::image::MachImage;
use crate::layout::LayoutInfo;

/// References to the image's link-edit metadata, gathered in one walk.
/// The first well-sized occurrence of each command is kept.
#[derive(Debug, Clone, Default)]
pub struct LinkEditInfo {
    pub symtab: Option<SymtabCommand>,
    pub dysymtab: Option<DysymtabCommand>,
    pub dyld_info: Option<DyldInfoCommand>,
    pub exports_trie: Option<LinkeditDataCommand>,
    pub split_seg_info: Option<LinkeditDataCommand>,
    pub function_starts: Option<LinkeditDataCommand>,
    pub data_in_code: Option<LinkeditDataCommand>,
    pub code_signature: Option<LinkeditDataCommand>,
    pub layout: Option<LayoutInfo>,
}

impl LinkEditInfo {
    /// Bytes of a link-edit table given its file offset and size
    pub fn content<'a>(&self, image: &MachImage<'a>, file_offset: u32, size: u32) -> Option<&'a [u8]> {
        let range = self
            .layout
            .as_ref()?
            .linkedit_range(u64::from(file_offset), u64::from(size))?;
        image.data().get(range)
    }

    /// Export trie bytes, from `LC_DYLD_INFO[_ONLY]` or `LC_DYLD_EXPORTS_TRIE`
    pub fn export_trie<'a>(&self, image: &MachImage<'a>) -> Option<&'a [u8]> {
        if let Some(info) = &self.dyld_info {
            return self.content(image, info.export_off, info.export_size);
        }
        let trie = self.exports_trie.as_ref()?;
        self.content(image, trie.dataoff, trie.datasize)
    }

    pub fn has_export_info(&self) -> bool {
        self.dyld_info.is_some() || self.exports_trie.is_some()
    }
}

/// Store the first well-sized occurrence of a singleton command
fn keep_first<'a, T>(
    slot: &mut Option<T>,
    cmd: &LoadCommand<'a>,
    expected_size: usize,
    errors: &mut Vec<String>,
) where
    T: TryFromCtx<'a, Endian, Error = scroll::Error>,
{
    let name = command_name(cmd.cmd);
    if cmd.cmdsize as usize != expected_size {
        errors.push(format!("{} load command size wrong", name));
        return;
    }
    if slot.is_some() {
        errors.push(format!("multiple {} load commands", name));
        return;
    }
    *slot = cmd.parse::<T>();
}

/// Validate a command that is not stored but may appear once
fn check_once(seen: &mut bool, cmd: &LoadCommand<'_>, size_ok: bool, errors: &mut Vec<String>) {
    let name = command_name(cmd.cmd);
    if !size_ok {
        errors.push(format!("{} load command size wrong", name));
    }
    if *seen {
        errors.push(format!("multiple {} load commands", name));
    }
    *seen = true;
}

impl<'a> MachImage<'a> {
    /// Collect link-edit metadata. Size and duplicate problems are recorded
    /// and the walk continues. The layout is only computed when this walk
    /// found nothing wrong, so a missing `layout` means the image is unusable.
    pub fn link_edit_info(&self, diag: &mut Diagnostics) -> LinkEditInfo {
        let mut local = Diagnostics::new();
        let info = self.collect_link_edit(&mut local);
        diag.absorb(local);
        info
    }

    fn collect_link_edit(&self, diag: &mut Diagnostics) -> LinkEditInfo {
        let mut info = LinkEditInfo::default();
        let mut errors = Vec::new();
        let mut seen_uuid = false;
        let mut seen_version = false;
        let mut seen_encryption = false;
        let is_64 = self.is_64();

        self.for_each_load_command(diag, |cmd| {
            match cmd.cmd {
                LC_SYMTAB => keep_first(&mut info.symtab, cmd, SymtabCommand::SIZE, &mut errors),
                LC_DYSYMTAB => keep_first(&mut info.dysymtab, cmd, DysymtabCommand::SIZE, &mut errors),
                LC_DYLD_INFO | LC_DYLD_INFO_ONLY => {
                    keep_first(&mut info.dyld_info, cmd, DyldInfoCommand::SIZE, &mut errors)
                }
                LC_DYLD_EXPORTS_TRIE => {
                    keep_first(&mut info.exports_trie, cmd, LinkeditDataCommand::SIZE, &mut errors)
                }
                LC_SEGMENT_SPLIT_INFO => {
                    keep_first(&mut info.split_seg_info, cmd, LinkeditDataCommand::SIZE, &mut errors)
                }
                LC_FUNCTION_STARTS => {
                    keep_first(&mut info.function_starts, cmd, LinkeditDataCommand::SIZE, &mut errors)
                }
                LC_DATA_IN_CODE => {
                    keep_first(&mut info.data_in_code, cmd, LinkeditDataCommand::SIZE, &mut errors)
                }
                LC_CODE_SIGNATURE => {
                    keep_first(&mut info.code_signature, cmd, LinkeditDataCommand::SIZE, &mut errors)
                }
                LC_UUID => check_once(
                    &mut seen_uuid,
                    cmd,
                    cmd.cmdsize as usize == UuidCommand::SIZE,
                    &mut errors,
                ),
                LC_VERSION_MIN_MACOSX
                | LC_VERSION_MIN_IPHONEOS
                | LC_VERSION_MIN_TVOS
                | LC_VERSION_MIN_WATCHOS => check_once(
                    &mut seen_version,
                    cmd,
                    cmd.cmdsize as usize == VersionMinCommand::SIZE,
                    &mut errors,
                ),
                LC_BUILD_VERSION => {
                    let size_ok = cmd
                        .parse::<BuildVersionCommand>()
                        .and_then(|build| {
                            (build.ntools as usize)
                                .checked_mul(BuildVersionCommand::TOOL_SIZE)?
                                .checked_add(BuildVersionCommand::SIZE)
                        })
                        .map_or(false, |size| size == cmd.cmdsize as usize);
                    check_once(&mut seen_version, cmd, size_ok, &mut errors)
                }
                LC_ENCRYPTION_INFO => {
                    if is_64 {
                        errors.push("LC_ENCRYPTION_INFO found in 64-bit mach-o".to_string());
                    }
                    check_once(
                        &mut seen_encryption,
                        cmd,
                        cmd.cmdsize as usize == EncryptionInfoCommand::SIZE,
                        &mut errors,
                    )
                }
                LC_ENCRYPTION_INFO_64 => {
                    if !is_64 {
                        errors.push("LC_ENCRYPTION_INFO_64 found in 32-bit mach-o".to_string());
                    }
                    check_once(
                        &mut seen_encryption,
                        cmd,
                        cmd.cmdsize as usize == EncryptionInfoCommand::SIZE_64,
                        &mut errors,
                    )
                }
                _ => {}
            }
            ControlFlow::Continue(())
        });

        for message in errors {
            diag.error(message);
        }
        if info.dysymtab.is_some() && info.symtab.is_none() {
            diag.error("LC_DYSYMTAB but no LC_SYMTAB load command");
        }
        if diag.no_error() {
            info.layout = self.layout(diag);
        }
        info
    }
}
