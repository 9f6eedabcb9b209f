//! Boot-time device tree fix-ups
//!
//! Before handing the tree to XNU the `/chosen` node is rewritten the way
//! iBoot would: the entropy placeholder is dropped, DRAM is described and
//! the `memory-map` records where the ramdisk and trust cache were placed.

use t8030_boot_layout::{BootMemoryMap, DeviceTreeEncoder, PhysRange};

use crate::{DeviceTree, DeviceTreeError, Node, Result};

impl DeviceTree {
    /// Rewrite `/chosen` for the given memory map
    ///
    /// # Errors
    /// Returns `NodeNotFound` if `chosen` or `chosen/memory-map` is missing
    pub fn apply_boot_memory(&mut self, map: &BootMemoryMap) -> Result<()> {
        let chosen = self
            .root_mut()
            .child_mut("chosen")
            .ok_or_else(|| DeviceTreeError::NodeNotFound("chosen".to_string()))?;

        chosen.remove_property("random-seed");
        chosen.set_u32("security-domain", 0)?;
        chosen.set_u32("chip-epoch", 0)?;
        chosen.set_u64("dram-base", map.dram_base)?;
        chosen.set_u64("dram-size", map.dram_size)?;

        let memory_map = chosen
            .child_mut("memory-map")
            .ok_or_else(|| DeviceTreeError::NodeNotFound("memory-map".to_string()))?;
        set_range(memory_map, "RAMDisk", &map.ramdisk)?;
        set_range(memory_map, "TrustCache", &map.trust_cache)?;

        log::debug!(
            "Device tree chosen: dram {:#x} + {:#x}",
            map.dram_base,
            map.dram_size
        );
        Ok(())
    }
}

fn set_range(node: &mut Node, name: &str, range: &PhysRange) -> Result<()> {
    if range.is_empty() {
        return Ok(());
    }
    node.set_u64_cells(name, &[range.pa, range.size])
}

impl DeviceTreeEncoder for DeviceTree {
    fn encode(&mut self, map: &BootMemoryMap) -> t8030_boot_layout::Result<Vec<u8>> {
        self.apply_boot_memory(map)?;
        Ok(self.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_with_chosen() -> DeviceTree {
        let mut root = Node::new("device-tree").unwrap();
        let mut chosen = Node::new("chosen").unwrap();
        chosen.set_property("random-seed", vec![0xAAu8; 64]).unwrap();
        chosen.add_child(Node::new("memory-map").unwrap());
        root.add_child(chosen);
        DeviceTree::new(root)
    }

    fn map() -> BootMemoryMap {
        BootMemoryMap {
            dram_base: 0x4000_0000,
            dram_size: 0x8700_4000,
            ramdisk: PhysRange::new(0x4821_0000, 0x30000),
            trust_cache: PhysRange::new(0x4200_0000, 0x1000),
        }
    }

    #[test]
    fn test_chosen_rewritten() {
        let mut tree = tree_with_chosen();
        tree.apply_boot_memory(&map()).unwrap();

        let chosen = tree.node("chosen").unwrap();
        assert!(chosen.property("random-seed").is_none());
        assert_eq!(chosen.property("security-domain").unwrap().u32_at(0), Some(0));
        assert_eq!(chosen.property("chip-epoch").unwrap().u32_at(0), Some(0));
        assert_eq!(chosen.property("dram-base").unwrap().u64_at(0), Some(0x4000_0000));
        assert_eq!(chosen.property("dram-size").unwrap().u64_at(0), Some(0x8700_4000));

        let memory_map = tree.node("chosen/memory-map").unwrap();
        let ramdisk = memory_map.property("RAMDisk").unwrap();
        assert_eq!((ramdisk.u64_at(0), ramdisk.u64_at(1)), (Some(0x4821_0000), Some(0x30000)));
        let tc = memory_map.property("TrustCache").unwrap();
        assert_eq!((tc.u64_at(0), tc.u64_at(1)), (Some(0x4200_0000), Some(0x1000)));
    }

    #[test]
    fn test_empty_ranges_omitted() {
        let mut tree = tree_with_chosen();
        let mut m = map();
        m.ramdisk = PhysRange::default();
        tree.apply_boot_memory(&m).unwrap();

        let memory_map = tree.node("chosen/memory-map").unwrap();
        assert!(memory_map.property("RAMDisk").is_none());
        assert!(memory_map.property("TrustCache").is_some());
    }

    #[test]
    fn test_missing_chosen() {
        let mut tree = DeviceTree::new(Node::new("device-tree").unwrap());
        let result = DeviceTreeEncoder::encode(&mut tree, &map());
        assert!(matches!(
            result,
            Err(t8030_boot_layout::BootError::MissingResource(_))
        ));
    }

    #[test]
    fn test_missing_memory_map() {
        let mut root = Node::new("device-tree").unwrap();
        root.add_child(Node::new("chosen").unwrap());
        let mut tree = DeviceTree::new(root);

        assert!(matches!(
            tree.apply_boot_memory(&map()),
            Err(DeviceTreeError::NodeNotFound(ref n)) if n == "memory-map"
        ));
    }

    #[test]
    fn test_encoder_output_reparses() {
        let mut tree = tree_with_chosen();
        let bytes = DeviceTreeEncoder::encode(&mut tree, &map()).unwrap();

        let reparsed = DeviceTree::parse(&bytes).unwrap();
        assert_eq!(reparsed, tree);
    }
}
