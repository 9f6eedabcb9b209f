//! XNU arm64 boot arguments
//!
//! Revision 2 / version 2 layout, little-endian, natural alignment. The
//! structure is encoded by hand into a fixed byte buffer so the guest sees
//! exactly the offsets below regardless of host layout.

use static_assertions::const_assert;

use crate::{BootError, Result, REGION_ALIGN};

pub const BOOT_ARGS_REVISION: u16 = 2;
pub const BOOT_ARGS_VERSION: u16 = 2;

/// Command line buffer length, including the terminating NUL
pub const BOOT_LINE_LENGTH: usize = 608;

/// Encoded size of the structure
pub const BOOT_ARGS_SIZE: usize = 736;

/// Boot framebuffer geometry
pub const FRAMEBUFFER_WIDTH: u64 = 600;
pub const FRAMEBUFFER_HEIGHT: u64 = 800;
pub const FRAMEBUFFER_DEPTH: u64 = 32;
pub const FRAMEBUFFER_SIZE: u64 = FRAMEBUFFER_WIDTH * FRAMEBUFFER_HEIGHT * (FRAMEBUFFER_DEPTH / 8);

/// Video display flag: graphics mode
const VIDEO_DISPLAY_GRAPHICS: u64 = 1;

mod offsets {
    pub const REVISION: usize = 0;
    pub const VERSION: usize = 2;
    pub const VIRT_BASE: usize = 8;
    pub const PHYS_BASE: usize = 16;
    pub const MEM_SIZE: usize = 24;
    pub const TOP_OF_KERNEL_DATA: usize = 32;
    pub const VIDEO: usize = 40;
    pub const MACHINE_TYPE: usize = 88;
    pub const DEVICE_TREE_P: usize = 96;
    pub const DEVICE_TREE_LENGTH: usize = 104;
    pub const COMMAND_LINE: usize = 108;
    pub const BOOT_FLAGS: usize = 720;
    pub const MEM_SIZE_ACTUAL: usize = 728;
}

const_assert!(offsets::COMMAND_LINE + BOOT_LINE_LENGTH <= offsets::BOOT_FLAGS);
const_assert!(offsets::MEM_SIZE_ACTUAL + 8 == BOOT_ARGS_SIZE);
const_assert!(offsets::VIDEO + 6 * 8 == offsets::MACHINE_TYPE);
const_assert!((BOOT_ARGS_SIZE as u64) < REGION_ALIGN);

/// Boot video descriptor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoBootArgs {
    pub base_addr: u64,
    pub display: u64,
    pub row_bytes: u64,
    pub width: u64,
    pub height: u64,
    pub depth: u64,
}

impl VideoBootArgs {
    /// Descriptor for the boot framebuffer placed at `base_addr`
    pub fn framebuffer(base_addr: u64) -> Self {
        Self {
            base_addr,
            display: VIDEO_DISPLAY_GRAPHICS,
            row_bytes: FRAMEBUFFER_WIDTH * (FRAMEBUFFER_DEPTH / 8),
            width: FRAMEBUFFER_WIDTH,
            height: FRAMEBUFFER_HEIGHT,
            depth: FRAMEBUFFER_DEPTH,
        }
    }

    fn fields(&self) -> [u64; 6] {
        [
            self.base_addr,
            self.display,
            self.row_bytes,
            self.width,
            self.height,
            self.depth,
        ]
    }
}

/// Boot arguments handed to the kernel in x0
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootArgs {
    pub virt_base: u64,
    pub phys_base: u64,
    pub mem_size: u64,
    /// Physical address of the first byte after all boot data
    pub top_of_kernel_data: u64,
    pub video: VideoBootArgs,
    pub machine_type: u32,
    /// Kernel virtual address of the device tree
    pub device_tree_va: u64,
    pub device_tree_length: u32,
    pub command_line: String,
    pub boot_flags: u64,
    pub mem_size_actual: u64,
}

impl BootArgs {
    /// Encode into the 736-byte guest representation
    ///
    /// # Errors
    /// Returns `CommandLineTooLong` if the command line plus its NUL does not
    /// fit in the 608-byte buffer
    pub fn encode(&self) -> Result<[u8; BOOT_ARGS_SIZE]> {
        let cmdline = self.command_line.as_bytes();
        if cmdline.len() >= BOOT_LINE_LENGTH {
            return Err(BootError::CommandLineTooLong {
                len: cmdline.len(),
                max: BOOT_LINE_LENGTH - 1,
            });
        }

        let mut buf = [0u8; BOOT_ARGS_SIZE];
        put(&mut buf, offsets::REVISION, &BOOT_ARGS_REVISION.to_le_bytes());
        put(&mut buf, offsets::VERSION, &BOOT_ARGS_VERSION.to_le_bytes());
        put(&mut buf, offsets::VIRT_BASE, &self.virt_base.to_le_bytes());
        put(&mut buf, offsets::PHYS_BASE, &self.phys_base.to_le_bytes());
        put(&mut buf, offsets::MEM_SIZE, &self.mem_size.to_le_bytes());
        put(
            &mut buf,
            offsets::TOP_OF_KERNEL_DATA,
            &self.top_of_kernel_data.to_le_bytes(),
        );
        for (i, field) in self.video.fields().iter().enumerate() {
            put(&mut buf, offsets::VIDEO + i * 8, &field.to_le_bytes());
        }
        put(&mut buf, offsets::MACHINE_TYPE, &self.machine_type.to_le_bytes());
        put(&mut buf, offsets::DEVICE_TREE_P, &self.device_tree_va.to_le_bytes());
        put(
            &mut buf,
            offsets::DEVICE_TREE_LENGTH,
            &self.device_tree_length.to_le_bytes(),
        );
        // Remainder of the buffer stays NUL
        put(&mut buf, offsets::COMMAND_LINE, cmdline);
        put(&mut buf, offsets::BOOT_FLAGS, &self.boot_flags.to_le_bytes());
        put(
            &mut buf,
            offsets::MEM_SIZE_ACTUAL,
            &self.mem_size_actual.to_le_bytes(),
        );

        Ok(buf)
    }

    /// Decode a guest boot-args structure
    ///
    /// Returns `None` if the buffer is short or the revision/version do not
    /// match.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < BOOT_ARGS_SIZE {
            return None;
        }
        if get_u16(bytes, offsets::REVISION) != BOOT_ARGS_REVISION
            || get_u16(bytes, offsets::VERSION) != BOOT_ARGS_VERSION
        {
            return None;
        }

        let line = &bytes[offsets::COMMAND_LINE..offsets::COMMAND_LINE + BOOT_LINE_LENGTH];
        let line_len = line.iter().position(|&b| b == 0).unwrap_or(line.len());
        let command_line = String::from_utf8_lossy(&line[..line_len]).into_owned();

        let video_field = |i: usize| get_u64(bytes, offsets::VIDEO + i * 8);

        Some(Self {
            virt_base: get_u64(bytes, offsets::VIRT_BASE),
            phys_base: get_u64(bytes, offsets::PHYS_BASE),
            mem_size: get_u64(bytes, offsets::MEM_SIZE),
            top_of_kernel_data: get_u64(bytes, offsets::TOP_OF_KERNEL_DATA),
            video: VideoBootArgs {
                base_addr: video_field(0),
                display: video_field(1),
                row_bytes: video_field(2),
                width: video_field(3),
                height: video_field(4),
                depth: video_field(5),
            },
            machine_type: get_u32(bytes, offsets::MACHINE_TYPE),
            device_tree_va: get_u64(bytes, offsets::DEVICE_TREE_P),
            device_tree_length: get_u32(bytes, offsets::DEVICE_TREE_LENGTH),
            command_line,
            boot_flags: get_u64(bytes, offsets::BOOT_FLAGS),
            mem_size_actual: get_u64(bytes, offsets::MEM_SIZE_ACTUAL),
        })
    }
}

fn put(buf: &mut [u8], offset: usize, bytes: &[u8]) {
    buf[offset..offset + bytes.len()].copy_from_slice(bytes);
}

fn get_u16(buf: &[u8], offset: usize) -> u16 {
    let mut raw = [0u8; 2];
    raw.copy_from_slice(&buf[offset..offset + 2]);
    u16::from_le_bytes(raw)
}

fn get_u32(buf: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

fn get_u64(buf: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BootArgs {
        BootArgs {
            virt_base: 0xFFFF_FFF0_0000_0000,
            phys_base: 0x4000_0000,
            mem_size: 0x8700_4000,
            top_of_kernel_data: 0x4840_0000,
            video: VideoBootArgs::framebuffer(0x4822_0000),
            machine_type: 0,
            device_tree_va: 0xFFFF_FFF0_081D_0000,
            device_tree_length: 0x1234,
            command_line: "debug=0x8 kextlog=0xfff".to_string(),
            boot_flags: 0,
            mem_size_actual: 0,
        }
    }

    #[test]
    fn test_field_offsets() {
        let bytes = sample().encode().unwrap();

        assert_eq!(&bytes[0..2], &2u16.to_le_bytes());
        assert_eq!(&bytes[2..4], &2u16.to_le_bytes());
        assert_eq!(get_u64(&bytes, 8), 0xFFFF_FFF0_0000_0000);
        assert_eq!(get_u64(&bytes, 16), 0x4000_0000);
        assert_eq!(get_u64(&bytes, 24), 0x8700_4000);
        assert_eq!(get_u64(&bytes, 32), 0x4840_0000);
        assert_eq!(get_u64(&bytes, 40), 0x4822_0000);
        assert_eq!(get_u64(&bytes, 96), 0xFFFF_FFF0_081D_0000);
        assert_eq!(get_u32(&bytes, 104), 0x1234);
        assert_eq!(&bytes[108..108 + 4], b"debu");
        // NUL terminated
        assert_eq!(bytes[108 + "debug=0x8 kextlog=0xfff".len()], 0);
    }

    #[test]
    fn test_decode_matches_encode() {
        let args = sample();
        let bytes = args.encode().unwrap();
        assert_eq!(BootArgs::decode(&bytes), Some(args));
    }

    #[test]
    fn test_framebuffer_descriptor() {
        let video = VideoBootArgs::framebuffer(0x1000_0000);
        assert_eq!(video.row_bytes, 600 * 4);
        assert_eq!(video.row_bytes * video.height, FRAMEBUFFER_SIZE);
        assert_eq!(FRAMEBUFFER_SIZE, 0x1D_4C00);
    }

    #[test]
    fn test_command_line_limit() {
        let mut args = sample();
        args.command_line = "a".repeat(BOOT_LINE_LENGTH - 1);
        let bytes = args.encode().unwrap();
        assert_eq!(bytes[offsets::COMMAND_LINE + BOOT_LINE_LENGTH - 1], 0);

        args.command_line.push('a');
        assert!(matches!(
            args.encode(),
            Err(BootError::CommandLineTooLong { len: 608, max: 607 })
        ));
    }

    #[test]
    fn test_decode_rejects_foreign_revision() {
        let mut bytes = sample().encode().unwrap();
        bytes[0] = 1;
        assert!(BootArgs::decode(&bytes).is_none());
        assert!(BootArgs::decode(&bytes[..100]).is_none());
    }
}
