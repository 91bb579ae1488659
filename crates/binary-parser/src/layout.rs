//! Mapping between file offsets, unslid addresses and content offsets
//!
//! A content offset is an index into the image's byte view. How it relates
//! to file offsets and addresses depends on who mapped the bytes.

use std::ops::{ControlFlow, Range};

use tracing::debug;

use crate::diagnostics::Diagnostics;
use crate::format::{SEG_LINKEDIT, SEG_TEXT};
use crate::image::{MachImage, MappingMode};

/// Most segments recorded for a mapped image
pub const MAX_SEGMENTS: usize = 128;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SegmentFlags: u8 {
        const WRITABLE = 0x1;
        const EXECUTABLE = 0x2;
        const TEXT_RELOCS_ALLOWED = 0x4;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentLayout {
    /// Content offset of the segment's first byte; `None` when it cannot be
    /// computed without underflow
    pub mapping_offset: Option<u64>,
    pub file_offset: u64,
    pub file_size: u64,
    pub vm_addr: u64,
    pub vm_size: u64,
    pub flags: SegmentFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkeditPlacement {
    pub vm_addr: u64,
    pub file_offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutInfo {
    InProcess {
        slide: i64,
        header_address: u64,
        text_unslid: u64,
        linkedit: Option<LinkeditPlacement>,
    },
    Mapped {
        segments: Vec<SegmentLayout>,
        linkedit_index: Option<usize>,
    },
}

fn to_range(start: u64, size: u64) -> Option<Range<usize>> {
    let end = start.checked_add(size)?;
    Some(usize::try_from(start).ok()?..usize::try_from(end).ok()?)
}

impl LayoutInfo {
    /// Content range of `size` bytes stored in the link-edit segment at
    /// `file_offset`
    pub fn linkedit_range(&self, file_offset: u64, size: u64) -> Option<Range<usize>> {
        let start = match self {
            LayoutInfo::InProcess {
                text_unslid,
                linkedit,
                ..
            } => {
                let linkedit = linkedit.as_ref()?;
                let delta = file_offset.checked_sub(linkedit.file_offset)?;
                linkedit
                    .vm_addr
                    .checked_sub(*text_unslid)?
                    .checked_add(delta)?
            }
            LayoutInfo::Mapped {
                segments,
                linkedit_index,
            } => {
                let segment = segments.get((*linkedit_index)?)?;
                let delta = file_offset.checked_sub(segment.file_offset)?;
                segment.mapping_offset?.checked_add(delta)?
            }
        };
        to_range(start, size)
    }

    /// Content range of `size` bytes at unslid address `addr`
    pub fn address_to_content(&self, addr: u64, size: u64) -> Option<Range<usize>> {
        let start = match self {
            LayoutInfo::InProcess { text_unslid, .. } => addr.checked_sub(*text_unslid)?,
            LayoutInfo::Mapped { segments, .. } => {
                let segment = segments
                    .iter()
                    .find(|s| addr >= s.vm_addr && addr - s.vm_addr < s.vm_size)?;
                segment.mapping_offset?.checked_add(addr - segment.vm_addr)?
            }
        };
        to_range(start, size)
    }

    pub fn segments(&self) -> &[SegmentLayout] {
        match self {
            LayoutInfo::Mapped { segments, .. } => segments,
            LayoutInfo::InProcess { .. } => &[],
        }
    }
}

impl<'a> MachImage<'a> {
    /// Compute the layout for this image's mapping mode. In-process images
    /// without `__TEXT` have no layout.
    pub fn layout(&self, diag: &mut Diagnostics) -> Option<LayoutInfo> {
        match self.mode() {
            MappingMode::InProcess { header_address, .. } => {
                let mut text = None;
                let mut linkedit = None;
                self.for_each_segment(diag, |segment| {
                    if segment.name == SEG_TEXT && text.is_none() {
                        text = Some(segment.vm_addr);
                    } else if segment.name == SEG_LINKEDIT && linkedit.is_none() {
                        linkedit = Some(LinkeditPlacement {
                            vm_addr: segment.vm_addr,
                            file_offset: segment.file_offset,
                        });
                    }
                    ControlFlow::Continue(())
                });
                let Some(text_unslid) = text else {
                    diag.error("missing __TEXT segment");
                    return None;
                };
                let slide = self.slide()?;
                debug!(header_address, slide, "in-process layout");
                Some(LayoutInfo::InProcess {
                    slide,
                    header_address,
                    text_unslid,
                    linkedit,
                })
            }
            mode => {
                let text = self.find_segment(SEG_TEXT);
                let mut segments = Vec::new();
                let mut linkedit_index = None;
                self.for_each_segment(diag, |segment| {
                    if segments.len() >= MAX_SEGMENTS {
                        return ControlFlow::Break(());
                    }
                    let mapping_offset = match mode {
                        MappingMode::CacheRaw => text.and_then(|t| segment.file_offset.checked_sub(t.file_offset)),
                        MappingMode::CacheExpanded => text.and_then(|t| segment.vm_addr.checked_sub(t.vm_addr)),
                        _ => Some(segment.file_offset),
                    };
                    let mut flags = SegmentFlags::empty();
                    flags.set(SegmentFlags::WRITABLE, segment.is_writable());
                    flags.set(SegmentFlags::EXECUTABLE, segment.is_executable());
                    flags.set(SegmentFlags::TEXT_RELOCS_ALLOWED, segment.has_text_relocs);
                    if segment.name == SEG_LINKEDIT && linkedit_index.is_none() {
                        linkedit_index = Some(segments.len());
                    }
                    segments.push(SegmentLayout {
                        mapping_offset,
                        file_offset: segment.file_offset,
                        file_size: segment.file_size,
                        vm_addr: segment.vm_addr,
                        vm_size: segment.vm_size,
                        flags,
                    });
                    ControlFlow::Continue(())
                });
                debug!(?mode, count = segments.len(), "mapped layout");
                Some(LayoutInfo::Mapped {
                    segments,
                    linkedit_index,
                })
            }
        }
    }
}
