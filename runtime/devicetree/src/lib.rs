//! XNU Device Tree - codec for the Apple flattened device tree format
//!
//! # Purpose
//! Parses the device tree shipped with an iOS firmware image, lets the
//! machine inspect and modify it, and serialises it back into the format
//! iBoot hands to XNU.
//!
//! # Format
//! ```text
//! node     := u32 n_properties, u32 n_children, property*, node*
//! property := char name[32], u32 length, u8 value[align4(length & 0x7fffffff)]
//! ```
//! All integers are little-endian. Bit 31 of `length` is a flag iBoot uses
//! for placeholder properties; it is preserved verbatim.
//!
//! # Integration Points
//! - Depends on: boot-layout (device-tree encoder interface)
//! - Provides to: machine (SoC base lookup, console bootstrap, layout)
//!
//! # Testing Strategy
//! - Unit tests: node/property API, parser bounds checks
//! - Integration tests: boot memory fix-ups on a realistic tree

mod codec;
mod fixup;
mod node;

pub use node::{DeviceTree, Node, Property, PROP_NAME_LEN};

use t8030_boot_layout::BootError;
use thiserror::Error;

/// Error types for device tree operations
#[derive(Debug, Error)]
pub enum DeviceTreeError {
    #[error("Device tree truncated at offset {offset:#x}")]
    Truncated { offset: usize },

    #[error("Property name '{0}' does not fit in a 32-byte name field")]
    NameTooLong(String),

    #[error("Node '{0}' not found")]
    NodeNotFound(String),

    #[error("Property '{property}' not found in node '{node}'")]
    PropertyNotFound { node: String, property: String },

    #[error("Property '{property}' is malformed: {reason}")]
    InvalidProperty { property: String, reason: String },

    #[error("Device tree nesting exceeds {0} levels")]
    TooDeep(usize),

    #[error("{0} trailing bytes after root node")]
    TrailingData(usize),
}

pub type Result<T> = core::result::Result<T, DeviceTreeError>;

impl From<DeviceTreeError> for BootError {
    fn from(err: DeviceTreeError) -> Self {
        match err {
            DeviceTreeError::NodeNotFound(_) | DeviceTreeError::PropertyNotFound { .. } => {
                BootError::MissingResource(err.to_string())
            }
            _ => BootError::InvalidDeviceTree(err.to_string()),
        }
    }
}
