use snap_corpus::{
    corpus_checksum, generate, pointer_slots, read_corpus, read_corpus_at, read_header,
    relocate_in_place, verify_corpus_checksum, Options, HEADER_CHECKSUM_OFFSET,
};
use snap_types::{
    ArchitectureId, EndState, FpRegsX86_64, GRegsX86_64, MemoryBytes, MemoryMapping, MemoryPerms,
    RegSet, RegisterState, Snapshot, X86_64,
};

fn test_snapshots() -> Vec<Snapshot> {
    let mut gregs = GRegsX86_64::default();
    gregs.rip = 0x1000_0000;
    let fpregs = FpRegsX86_64::default();
    let registers = RegisterState::new(gregs.to_bytes(), fpregs.to_bytes());

    let make = |id: &str, start: u64, fill: u8| Snapshot {
        architecture_id: ArchitectureId::X86_64,
        id: id.to_string(),
        memory_mappings: vec![MemoryMapping::new(
            start,
            0x2000,
            MemoryPerms::READ | MemoryPerms::EXEC,
        )],
        memory_bytes: vec![
            MemoryBytes::new(start, vec![fill; 0x1000]),
            MemoryBytes::new(start + 0x1000, vec![fill ^ 0x5a; 0x77]),
        ],
        registers: registers.clone(),
        expected_end_states: vec![EndState {
            instruction_address: start + 0x80,
            registers: registers.clone(),
            memory_bytes: vec![MemoryBytes::new(start + 0x1800, vec![fill, 1, 2])],
            register_checksum: Vec::new(),
        }],
    };
    vec![
        make("reloc_a", 0x1000_0000, 0x90),
        make("reloc_b", 0x3000_0000, 0xcc),
    ]
}

fn generate_image() -> snap_corpus::CorpusBuffer {
    generate(
        ArchitectureId::X86_64,
        &test_snapshots(),
        Options {
            compress_repeating_bytes: true,
            counters: None,
        },
    )
    .unwrap()
}

// Every pointer slot holds null or a value inside `[0, num_bytes)`.
#[test]
fn emitted_pointers_are_null_or_in_bounds() {
    let image = generate_image();
    let slots = pointer_slots::<X86_64>(&image).unwrap();
    assert!(!slots.is_empty());
    for slot in slots {
        let value = u64::from_le_bytes(
            image[slot as usize..slot as usize + 8].try_into().unwrap(),
        );
        assert!(
            value == 0 || value < image.len() as u64,
            "pointer at {slot:#x} holds out-of-range value {value:#x}"
        );
    }
}

// Mapping the image at two different bases yields structurally equal
// object graphs once each view's pointers are relocated.
#[test]
fn relocated_views_are_structurally_equal() {
    let image = generate_image();
    let nominal = read_corpus::<X86_64>(&image).unwrap();

    for base in [0x1000u64, 0x7f12_3456_8000u64] {
        let mut relocated = image.to_vec();
        relocate_in_place::<X86_64>(&mut relocated, base).unwrap();
        let view = read_corpus_at::<X86_64>(&relocated, base).unwrap();
        assert_eq!(view, nominal, "view at base {base:#x} diverged");
    }
}

#[test]
fn relocating_to_base_zero_is_identity() {
    let image = generate_image();
    let mut relocated = image.to_vec();
    relocate_in_place::<X86_64>(&mut relocated, 0).unwrap();
    assert_eq!(&relocated[..], &image[..]);
}

// Replacing the stored checksum with zero and recomputing reproduces the
// stored value.
#[test]
fn stored_checksum_is_a_fixpoint() {
    let image = generate_image();
    let header = read_header(&image).unwrap();
    assert_eq!(corpus_checksum(&image), header.checksum);
    verify_corpus_checksum(&image).unwrap();
}

// Any single-byte change outside the checksum slot is detected.
#[test]
fn checksum_detects_single_byte_corruption() {
    let image = generate_image();
    let checksum_slot = HEADER_CHECKSUM_OFFSET..HEADER_CHECKSUM_OFFSET + 8;

    // Probe a spread of positions: header, records, payloads, final byte.
    let positions = [0usize, 8, 40, 80, image.len() / 2, image.len() - 1];
    for &position in &positions {
        if checksum_slot.contains(&position) {
            continue;
        }
        let mut corrupted = image.to_vec();
        corrupted[position] ^= 0x01;
        let header = read_header(&image).unwrap();
        assert_ne!(
            corpus_checksum(&corrupted),
            header.checksum,
            "flip at {position} not detected"
        );
    }
}

#[test]
fn truncated_and_garbage_images_are_rejected() {
    let image = generate_image();

    assert!(read_corpus::<X86_64>(&image[..image.len() - 1]).is_err());
    assert!(read_corpus::<X86_64>(&[]).is_err());
    assert!(read_header(&[0u8; 16]).is_err());

    let mut bad_magic = image.to_vec();
    bad_magic[0] ^= 0xff;
    assert!(read_header(&bad_magic).is_err());
}
