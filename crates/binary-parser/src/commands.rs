//! Load command walking
//!
//! The walk validates every command size against the declared command list
//! before handing the command out, so nothing downstream can be led outside
//! the list by a corrupt `ncmds` or `sizeofcmds`.

use std::ops::{ControlFlow, Range};

use scroll::{ctx::TryFromCtx, Endian, Pread};

use crate::common::c_str_at;
use crate::diagnostics::Diagnostics;
use crate::error::{ParseError, ParseResult};
use crate::format::LoadCommandHeader;
use crate::image::MachImage;

/// One validated load command
#[derive(Debug, Clone, Copy)]
pub struct LoadCommand<'a> {
    /// Position in the command list
    pub index: u32,
    pub cmd: u32,
    pub cmdsize: u32,
    /// Offset of the command from the start of the image
    pub offset: usize,
    bytes: &'a [u8],
    endian: Endian,
}

impl<'a> LoadCommand<'a> {
    /// Raw bytes of the command, `cmdsize` long
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Decode the command as a fixed-size record. Reads never leave the command.
    pub fn parse<T>(&self) -> Option<T>
    where
        T: TryFromCtx<'a, Endian, Error = scroll::Error>,
    {
        self.bytes.pread_with::<T>(0, self.endian).ok()
    }

    /// Decode a record that follows the command header at `offset`
    pub fn parse_at<T>(&self, offset: usize) -> Option<T>
    where
        T: TryFromCtx<'a, Endian, Error = scroll::Error>,
    {
        self.bytes.pread_with::<T>(offset, self.endian).ok()
    }

    /// `lc_str` payload: a NUL-terminated string at `offset` inside the command
    pub fn string_at(&self, offset: u32) -> Option<&'a str> {
        if offset >= self.cmdsize {
            return None;
        }
        c_str_at(self.bytes, offset as usize)
    }
}

/// Lazy, finite sequence of load commands
///
/// Yields at most `ncmds` items. After the first error no further items are
/// produced.
pub struct LoadCommands<'a> {
    data: &'a [u8],
    endian: Endian,
    list: Range<usize>,
    next_offset: usize,
    index: u32,
    count: u32,
    pending: Option<ParseError>,
    failed: bool,
}

impl<'a> LoadCommands<'a> {
    pub(crate) fn new(image: &MachImage<'a>) -> Self {
        let start = image.header_size();
        let (list, pending) = match start.checked_add(image.header().sizeofcmds as usize) {
            Some(end) if end <= image.data().len() => (start..end, None),
            _ => (
                start..start,
                Some(ParseError::malformed_command(0, "load commands extend past end of image")),
            ),
        };
        Self {
            data: image.data(),
            endian: image.endian(),
            list,
            next_offset: start,
            index: 0,
            count: image.header().ncmds,
            pending,
            failed: false,
        }
    }

    fn fail(&mut self, error: ParseError) -> Option<ParseResult<LoadCommand<'a>>> {
        self.failed = true;
        Some(Err(error))
    }
}

impl<'a> Iterator for LoadCommands<'a> {
    type Item = ParseResult<LoadCommand<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.count {
            return None;
        }
        if self.failed {
            return None;
        }
        if let Some(error) = self.pending.take() {
            return self.fail(error);
        }

        let index = self.index;
        let offset = self.next_offset;
        let header: LoadCommandHeader = match self.data.pread_with(offset, self.endian) {
            Ok(header) => header,
            Err(_) => return self.fail(ParseError::malformed_command(index, "truncated command header")),
        };
        if header.cmdsize < LoadCommandHeader::SIZE as u32 {
            return self.fail(ParseError::malformed_command(
                index,
                format!("size too small {}", header.cmdsize),
            ));
        }
        let next = match offset.checked_add(header.cmdsize as usize) {
            Some(next) if next <= self.list.end && next >= self.list.start => next,
            _ => {
                return self.fail(ParseError::malformed_command(
                    index,
                    format!("size too large 0x{:X}", header.cmdsize),
                ))
            }
        };

        self.next_offset = next;
        self.index += 1;
        Some(Ok(LoadCommand {
            index,
            cmd: header.cmd,
            cmdsize: header.cmdsize,
            offset,
            bytes: &self.data[offset..next],
            endian: self.endian,
        }))
    }
}

impl<'a> MachImage<'a> {
    /// Iterate load commands; each call starts a fresh walk
    pub fn load_commands(&self) -> LoadCommands<'a> {
        LoadCommands::new(self)
    }

    /// Visit load commands until the visitor breaks or a malformed command is
    /// found. A malformed command is recorded in `diag` and ends the walk.
    pub fn for_each_load_command<F>(&self, diag: &mut Diagnostics, mut visitor: F)
    where
        F: FnMut(&LoadCommand<'a>) -> ControlFlow<()>,
    {
        for command in self.load_commands() {
            match command {
                Ok(command) => {
                    if visitor(&command).is_break() {
                        return;
                    }
                }
                Err(error) => {
                    diag.error(error.to_string());
                    return;
                }
            }
        }
    }

    /// Structural sanity check of header and command list, usable before any
    /// other query
    pub fn is_well_formed(data: &[u8]) -> bool {
        match MachImage::parse(data, crate::image::MappingMode::RawFile) {
            Ok(image) => image.load_commands().all(|command| command.is_ok()),
            Err(_) => false,
        }
    }
}
