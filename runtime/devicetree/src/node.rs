//! In-memory device tree

use crate::{DeviceTreeError, Result};

/// Fixed size of a property name field, including the NUL terminator
pub const PROP_NAME_LEN: usize = 32;

/// A named property
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    name: String,
    value: Vec<u8>,
    /// High bit of the on-disk length word
    pub(crate) flags: u32,
}

impl Property {
    /// Create a property
    ///
    /// # Errors
    /// Returns `NameTooLong` if `name` leaves no room for the NUL terminator
    pub fn new(name: &str, value: Vec<u8>) -> Result<Self> {
        if name.len() >= PROP_NAME_LEN {
            return Err(DeviceTreeError::NameTooLong(name.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            value,
            flags: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// The `index`-th little-endian u32 cell
    pub fn u32_at(&self, index: usize) -> Option<u32> {
        let start = index.checked_mul(4)?;
        let bytes = self.value.get(start..start.checked_add(4)?)?;
        Some(u32::from_le_bytes(bytes.try_into().ok()?))
    }

    /// The `index`-th little-endian u64 cell
    pub fn u64_at(&self, index: usize) -> Option<u64> {
        let start = index.checked_mul(8)?;
        let bytes = self.value.get(start..start.checked_add(8)?)?;
        Some(u64::from_le_bytes(bytes.try_into().ok()?))
    }

    /// Value as a NUL-terminated string
    pub fn as_str(&self) -> Option<&str> {
        let end = self
            .value
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.value.len());
        core::str::from_utf8(&self.value[..end]).ok()
    }
}

/// A node with its properties and children
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    pub(crate) properties: Vec<Property>,
    pub(crate) children: Vec<Node>,
}

impl Node {
    /// Create a node carrying only a `name` property
    pub fn new(name: &str) -> Result<Self> {
        let mut node = Self::default();
        let mut value = name.as_bytes().to_vec();
        value.push(0);
        node.set_property("name", value)?;
        Ok(node)
    }

    /// Value of the `name` property
    pub fn name(&self) -> Option<&str> {
        self.property("name")?.as_str()
    }

    fn display_name(&self) -> String {
        self.name().unwrap_or("<unnamed>").to_string()
    }

    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Look up a property that must exist
    pub fn require_property(&self, name: &str) -> Result<&Property> {
        self.property(name)
            .ok_or_else(|| DeviceTreeError::PropertyNotFound {
                node: self.display_name(),
                property: name.to_string(),
            })
    }

    /// Replace the value of `name`, appending the property if absent
    pub fn set_property(&mut self, name: &str, value: impl Into<Vec<u8>>) -> Result<()> {
        let value = value.into();
        match self.properties.iter_mut().find(|p| p.name == name) {
            Some(prop) => prop.value = value,
            None => self.properties.push(Property::new(name, value)?),
        }
        Ok(())
    }

    pub fn set_u32(&mut self, name: &str, value: u32) -> Result<()> {
        self.set_property(name, value.to_le_bytes())
    }

    pub fn set_u64(&mut self, name: &str, value: u64) -> Result<()> {
        self.set_property(name, value.to_le_bytes())
    }

    /// Store `values` as consecutive little-endian u64 cells
    pub fn set_u64_cells(&mut self, name: &str, values: &[u64]) -> Result<()> {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.set_property(name, bytes)
    }

    pub fn remove_property(&mut self, name: &str) -> Option<Property> {
        let index = self.properties.iter().position(|p| p.name == name)?;
        Some(self.properties.remove(index))
    }

    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name() == Some(name))
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.children.iter_mut().find(|c| c.name() == Some(name))
    }

    pub fn add_child(&mut self, child: Node) {
        self.children.push(child);
    }
}

/// A parsed device tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceTree {
    root: Node,
}

impl DeviceTree {
    pub fn new(root: Node) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Node {
        &mut self.root
    }

    /// Resolve a `/`-separated path of child names from the root
    ///
    /// # Errors
    /// Returns `NodeNotFound` naming the first missing component
    pub fn node(&self, path: &str) -> Result<&Node> {
        let mut node = &self.root;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            node = node
                .child(part)
                .ok_or_else(|| DeviceTreeError::NodeNotFound(part.to_string()))?;
        }
        Ok(node)
    }

    pub fn node_mut(&mut self, path: &str) -> Result<&mut Node> {
        let mut node = &mut self.root;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            node = node
                .child_mut(part)
                .ok_or_else(|| DeviceTreeError::NodeNotFound(part.to_string()))?;
        }
        Ok(node)
    }
}
