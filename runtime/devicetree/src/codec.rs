//! Binary encoding and decoding
//!
//! Parsing is bounds-checked everywhere: a corrupt or truncated blob yields
//! an error, never a panic.

use crate::node::{DeviceTree, Node, Property, PROP_NAME_LEN};
use crate::{DeviceTreeError, Result};

/// Length-word flag iBoot sets on placeholder properties
const PROP_FLAG_MASK: u32 = 0x8000_0000;

/// Deepest nesting accepted by the parser
const MAX_DEPTH: usize = 64;

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(DeviceTreeError::Truncated { offset: self.pos })?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

const fn padded(len: usize) -> usize {
    (len + 3) & !3
}

fn read_property(reader: &mut Reader<'_>) -> Result<Property> {
    let raw_name = reader.take(PROP_NAME_LEN)?;
    let name_len = raw_name
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(PROP_NAME_LEN);
    let name = String::from_utf8_lossy(&raw_name[..name_len]).into_owned();

    let length_word = reader.u32()?;
    let len = (length_word & !PROP_FLAG_MASK) as usize;
    let value = reader.take(padded(len))?[..len].to_vec();

    // A name filling all 32 bytes has no terminator and is rejected
    let mut prop = Property::new(&name, value)?;
    prop.flags = length_word & PROP_FLAG_MASK;
    Ok(prop)
}

fn read_node(reader: &mut Reader<'_>, depth: usize) -> Result<Node> {
    if depth > MAX_DEPTH {
        return Err(DeviceTreeError::TooDeep(MAX_DEPTH));
    }

    let n_props = reader.u32()?;
    let n_children = reader.u32()?;

    let mut node = Node::default();
    for _ in 0..n_props {
        node.properties.push(read_property(reader)?);
    }
    for _ in 0..n_children {
        node.children.push(read_node(reader, depth + 1)?);
    }
    Ok(node)
}

fn write_node(node: &Node, out: &mut Vec<u8>) {
    out.extend_from_slice(&(node.properties.len() as u32).to_le_bytes());
    out.extend_from_slice(&(node.children.len() as u32).to_le_bytes());

    for prop in &node.properties {
        let mut name = [0u8; PROP_NAME_LEN];
        name[..prop.name().len()].copy_from_slice(prop.name().as_bytes());
        out.extend_from_slice(&name);

        let length_word = (prop.len() as u32 & !PROP_FLAG_MASK) | prop.flags;
        out.extend_from_slice(&length_word.to_le_bytes());
        out.extend_from_slice(prop.value());
        out.resize(out.len() + padded(prop.len()) - prop.len(), 0);
    }

    for child in &node.children {
        write_node(child, out);
    }
}

fn node_len(node: &Node) -> usize {
    let props: usize = node
        .properties
        .iter()
        .map(|p| PROP_NAME_LEN + 4 + padded(p.len()))
        .sum();
    let children: usize = node.children.iter().map(node_len).sum();
    8 + props + children
}

impl DeviceTree {
    /// Parse a flattened device tree
    ///
    /// # Errors
    /// - `Truncated` if a header or value runs past the end of `data`
    /// - `TooDeep` if nodes nest more than 64 levels deep
    /// - `TrailingData` if bytes remain after the root node
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = Reader { data, pos: 0 };
        let root = read_node(&mut reader, 0)?;

        let trailing = data.len() - reader.pos;
        if trailing != 0 {
            return Err(DeviceTreeError::TrailingData(trailing));
        }

        log::debug!("Parsed device tree ({:#x} bytes)", data.len());
        Ok(Self::new(root))
    }

    /// Serialise the tree
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        write_node(self.root(), &mut out);
        out
    }

    /// Size of [`DeviceTree::to_bytes`] without encoding
    pub fn encoded_len(&self) -> usize {
        node_len(self.root())
    }
}
