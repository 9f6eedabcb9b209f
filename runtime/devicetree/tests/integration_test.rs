//! Integration tests for the XNU device tree codec

use t8030_boot_layout::{BootMemoryMap, DeviceTreeEncoder, PhysRange, T8030_MAX_DEVICETREE_SIZE};
use t8030_devicetree::{DeviceTree, Node};

/// A reduced T8030 tree: arm-io with a boot console, cpus and chosen
fn t8030_tree() -> DeviceTree {
    let mut root = Node::new("device-tree").unwrap();
    root.set_property("compatible", b"iPhone12,1\0AppleARM\0".to_vec())
        .unwrap();

    let mut arm_io = Node::new("arm-io").unwrap();
    arm_io
        .set_u64_cells("ranges", &[0x2_0000_0000, 0x2_0000_0000, 0x2000_0000])
        .unwrap();
    let mut uart0 = Node::new("uart0").unwrap();
    uart0.set_u64_cells("reg", &[0x3520_0000, 0x4000]).unwrap();
    uart0.set_property("boot-console", Vec::<u8>::new()).unwrap();
    arm_io.add_child(uart0);
    root.add_child(arm_io);

    let mut cpus = Node::new("cpus").unwrap();
    for i in 0..6 {
        let mut cpu = Node::new(&format!("cpu{}", i)).unwrap();
        cpu.set_u32("cpu-id", i).unwrap();
        cpus.add_child(cpu);
    }
    root.add_child(cpus);

    let mut chosen = Node::new("chosen").unwrap();
    chosen.set_property("random-seed", vec![0u8; 64]).unwrap();
    chosen.add_child(Node::new("memory-map").unwrap());
    root.add_child(chosen);

    DeviceTree::new(root)
}

#[test]
fn test_parse_encoded_tree() {
    let tree = t8030_tree();
    let bytes = tree.to_bytes();

    let parsed = DeviceTree::parse(&bytes).unwrap();
    assert_eq!(parsed, tree);

    let ranges = parsed.node("arm-io").unwrap().property("ranges").unwrap();
    assert_eq!(ranges.u64_at(1), Some(0x2_0000_0000));

    let uart = parsed.node("arm-io/uart0").unwrap();
    assert!(uart.property("boot-console").is_some());
    assert_eq!(uart.property("reg").unwrap().u64_at(0), Some(0x3520_0000));

    assert_eq!(parsed.node("cpus").unwrap().children().len(), 6);
    assert_eq!(
        parsed.node("cpus/cpu5").unwrap().property("cpu-id").unwrap().u32_at(0),
        Some(5)
    );
}

#[test]
fn test_encoder_grows_tree_by_fixups() {
    let mut tree = t8030_tree();
    let before = tree.encoded_len();

    let map = BootMemoryMap {
        dram_base: 0x4000_0000,
        dram_size: 0x8000_0000,
        ramdisk: PhysRange::default(),
        trust_cache: PhysRange::new(0x4200_0000, 0x1000),
    };
    let bytes = tree.encode(&map).unwrap();

    // random-seed (64) removed; four scalars and one range added
    let prop = |len: usize| 32 + 4 + ((len + 3) & !3);
    let expected = before - prop(64) + 2 * prop(4) + 2 * prop(8) + prop(16);
    assert_eq!(bytes.len(), expected);
    assert!((bytes.len() as u64) < T8030_MAX_DEVICETREE_SIZE);

    // Applying twice is stable
    let again = tree.encode(&map).unwrap();
    assert_eq!(again, bytes);
}
