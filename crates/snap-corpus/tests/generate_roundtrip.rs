use snap_corpus::{
    checksum_of, generate, read_corpus, Checksummer, DecodedByteData, Options, CORPUS_MAGIC,
    HEADER_SIZE, REGISTER_STATE_VIEW_SIZE, SNAP_CORPUS_SIZE, SNAP_SIZE,
};
use snap_types::{
    serialize_register_checksum, ArchitectureId, EndState, FpRegsX86_64, GRegsX86_64,
    MemoryBytes, MemoryMapping, MemoryPerms, RegSet, RegisterChecksum, RegisterState, Snapshot,
    X86_64,
};

fn gregs_bytes(rip: u64) -> Vec<u8> {
    let mut regs = GRegsX86_64::default();
    regs.rip = rip;
    regs.rsp = 0x7fff_ffff_e000;
    regs.rflags = 0x202;
    regs.cs = 0x33;
    regs.to_bytes()
}

fn fpregs_bytes(seed: u128) -> Vec<u8> {
    let mut regs = FpRegsX86_64::default();
    regs.mxcsr = 0x1f80;
    regs.fcw = 0x37f;
    regs.xmm[0] = seed;
    regs.to_bytes()
}

fn basic_snapshot() -> Snapshot {
    let payload: Vec<u8> = (0..0x200u32).map(|i| (i * 7 + 3) as u8).collect();
    Snapshot {
        architecture_id: ArchitectureId::X86_64,
        id: "basic_test".to_string(),
        memory_mappings: vec![
            MemoryMapping::new(0x1000_0000, 0x1000, MemoryPerms::READ | MemoryPerms::EXEC),
            MemoryMapping::new(
                0x2000_0000,
                0x2000,
                MemoryPerms::READ | MemoryPerms::WRITE,
            ),
        ],
        memory_bytes: vec![
            MemoryBytes::new(0x1000_0000, payload.clone()),
            MemoryBytes::new(0x2000_0800, vec![0x42; 0x100]),
        ],
        registers: RegisterState::new(gregs_bytes(0x1000_0000), fpregs_bytes(7)),
        expected_end_states: vec![EndState {
            instruction_address: 0x1000_0066,
            registers: RegisterState::new(gregs_bytes(0x1000_0066), fpregs_bytes(9)),
            memory_bytes: vec![MemoryBytes::new(0x2000_0800, vec![0x43; 0x20])],
            register_checksum: serialize_register_checksum::<X86_64>(&RegisterChecksum {
                register_groups: 0b101,
                checksum: 0x1234_5678_9abc_def0,
            }),
        }],
    }
}

#[test]
fn empty_corpus_is_header_and_empty_snap_array() {
    let image = generate(ArchitectureId::X86_64, &[], Options::default()).unwrap();
    assert_eq!(image.len() as u64, SNAP_CORPUS_SIZE);

    let corpus = read_corpus::<X86_64>(&image).unwrap();
    assert!(corpus.snaps.is_empty());
    assert_eq!(corpus.header.num_bytes, image.len() as u64);
}

#[test]
fn header_is_consistent() {
    let image = generate(
        ArchitectureId::X86_64,
        &[basic_snapshot()],
        Options::default(),
    )
    .unwrap();

    let corpus = read_corpus::<X86_64>(&image).unwrap();
    let header = corpus.header;
    assert_eq!(header.magic, CORPUS_MAGIC);
    assert_eq!(u64::from(header.header_size), HEADER_SIZE);
    assert_eq!(header.num_bytes, image.len() as u64);
    assert_eq!(u64::from(header.corpus_type_size), SNAP_CORPUS_SIZE);
    assert_eq!(u64::from(header.snap_type_size), SNAP_SIZE);
    assert_eq!(
        u64::from(header.register_state_type_size),
        REGISTER_STATE_VIEW_SIZE
    );
    assert_eq!(header.architecture_id, ArchitectureId::X86_64 as u8);
}

#[test]
fn single_snapshot_roundtrips() {
    let snapshot = basic_snapshot();
    let image = generate(
        ArchitectureId::X86_64,
        std::slice::from_ref(&snapshot),
        Options::default(),
    )
    .unwrap();

    let corpus = read_corpus::<X86_64>(&image).unwrap();
    assert_eq!(corpus.snaps.len(), 1);
    let snap = &corpus.snaps[0];

    assert_eq!(snap.id, snapshot.id);

    assert_eq!(snap.mappings.len(), snapshot.memory_mappings.len());
    for (decoded, original) in snap.mappings.iter().zip(&snapshot.memory_mappings) {
        assert_eq!(decoded.start_address, original.start_address);
        assert_eq!(decoded.num_bytes, original.num_bytes);
        assert_eq!(decoded.perms, original.perms);
    }

    // Memory bytes reconstruct bit-for-bit, grouped under their mapping.
    assert_eq!(snap.mappings[0].memory_bytes.len(), 1);
    assert_eq!(
        snap.mappings[0].memory_bytes[0].materialize(),
        snapshot.memory_bytes[0].byte_values
    );
    assert_eq!(snap.mappings[1].memory_bytes.len(), 1);
    assert_eq!(
        snap.mappings[1].memory_bytes[0].start_address,
        snapshot.memory_bytes[1].start_address
    );
    assert_eq!(
        snap.mappings[1].memory_bytes[0].materialize(),
        snapshot.memory_bytes[1].byte_values
    );

    // Per-mapping checksums cover the mapping's bytes in declared order.
    assert_eq!(
        snap.mappings[0].memory_checksum,
        checksum_of(&snapshot.memory_bytes[0].byte_values)
    );

    // Register structures equal the canonical serialized forms.
    assert_eq!(snap.registers.gregs, snapshot.registers.gregs);
    assert_eq!(snap.registers.fpregs, snapshot.registers.fpregs);

    let end_state = &snapshot.expected_end_states[0];
    assert_eq!(
        snap.end_state_instruction_address,
        end_state.instruction_address
    );
    assert_eq!(snap.end_state_registers.gregs, end_state.registers.gregs);
    assert_eq!(snap.end_state_registers.fpregs, end_state.registers.fpregs);
    assert_eq!(snap.end_state_memory_bytes.len(), 1);
    assert_eq!(
        snap.end_state_memory_bytes[0].materialize(),
        end_state.memory_bytes[0].byte_values
    );
    assert_eq!(
        snap.end_state_register_checksum,
        RegisterChecksum {
            register_groups: 0b101,
            checksum: 0x1234_5678_9abc_def0,
        }
    );

    // Register-memory checksums hash fpregs then gregs.
    let mut checksummer = Checksummer::new();
    checksummer.update(&snapshot.registers.fpregs);
    checksummer.update(&snapshot.registers.gregs);
    assert_eq!(snap.registers_memory_checksum, checksummer.finish());
}

#[test]
fn empty_end_state_registers_emit_zero_filled_structures() {
    let mut snapshot = basic_snapshot();
    snapshot.expected_end_states[0].registers = RegisterState::default();
    snapshot.expected_end_states[0].register_checksum = Vec::new();

    let image = generate(
        ArchitectureId::X86_64,
        std::slice::from_ref(&snapshot),
        Options::default(),
    )
    .unwrap();
    let corpus = read_corpus::<X86_64>(&image).unwrap();
    let snap = &corpus.snaps[0];

    let zero_gregs = vec![0u8; GRegsX86_64::WIRE_SIZE];
    let zero_fpregs = vec![0u8; FpRegsX86_64::WIRE_SIZE];
    assert_eq!(snap.end_state_registers.gregs, zero_gregs);
    assert_eq!(snap.end_state_registers.fpregs, zero_fpregs);
    assert_eq!(
        snap.end_state_register_checksum,
        RegisterChecksum::default()
    );

    let mut checksummer = Checksummer::new();
    checksummer.update(&zero_fpregs);
    checksummer.update(&zero_gregs);
    assert_eq!(
        snap.end_state_registers_memory_checksum,
        checksummer.finish()
    );
}

#[test]
fn generation_is_deterministic() {
    let snapshots = vec![basic_snapshot(), {
        let mut other = basic_snapshot();
        other.id = "second".to_string();
        other.memory_bytes[1] = MemoryBytes::new(0x2000_0800, vec![0x55; 0x80]);
        other
    }];

    let first = generate(ArchitectureId::X86_64, &snapshots, Options::default()).unwrap();
    let second = generate(ArchitectureId::X86_64, &snapshots, Options::default()).unwrap();
    assert_eq!(&first[..], &second[..]);
}

#[test]
fn empty_id_and_empty_memory_roundtrip() {
    let snapshot = Snapshot {
        architecture_id: ArchitectureId::X86_64,
        id: String::new(),
        memory_mappings: vec![MemoryMapping::new(0x1000, 0x1000, MemoryPerms::READ)],
        memory_bytes: Vec::new(),
        registers: RegisterState::new(gregs_bytes(0x1000), fpregs_bytes(0)),
        expected_end_states: vec![EndState {
            instruction_address: 0x1004,
            registers: RegisterState::default(),
            memory_bytes: Vec::new(),
            register_checksum: Vec::new(),
        }],
    };
    let image = generate(
        ArchitectureId::X86_64,
        std::slice::from_ref(&snapshot),
        Options::default(),
    )
    .unwrap();
    let corpus = read_corpus::<X86_64>(&image).unwrap();
    let snap = &corpus.snaps[0];
    assert_eq!(snap.id, "");
    assert_eq!(snap.mappings.len(), 1);
    assert!(snap.mappings[0].memory_bytes.is_empty());
    assert!(snap.end_state_memory_bytes.is_empty());
    assert_eq!(snap.mappings[0].memory_checksum, checksum_of(&[]));
}

#[test]
fn aarch64_corpus_roundtrips() {
    use snap_types::{AArch64, FpRegsAArch64, GRegsAArch64};

    let mut gregs = GRegsAArch64::default();
    gregs.pc = 0x40_0000;
    gregs.x[0] = 0xdead;
    let mut fpregs = FpRegsAArch64::default();
    fpregs.v[1] = 42;

    let snapshot = Snapshot {
        architecture_id: ArchitectureId::AArch64,
        id: "arm".to_string(),
        memory_mappings: vec![MemoryMapping::new(
            0x40_0000,
            0x1000,
            MemoryPerms::READ | MemoryPerms::EXEC,
        )],
        memory_bytes: vec![MemoryBytes::new(0x40_0000, vec![0x1f, 0x20, 0x03, 0xd5])],
        registers: RegisterState::new(gregs.to_bytes(), fpregs.to_bytes()),
        expected_end_states: vec![EndState {
            instruction_address: 0x40_0004,
            registers: RegisterState::default(),
            memory_bytes: Vec::new(),
            register_checksum: Vec::new(),
        }],
    };

    let image = generate(
        ArchitectureId::AArch64,
        std::slice::from_ref(&snapshot),
        Options::default(),
    )
    .unwrap();
    let corpus = read_corpus::<AArch64>(&image).unwrap();
    assert_eq!(corpus.header.architecture_id, ArchitectureId::AArch64 as u8);
    assert_eq!(corpus.snaps[0].registers.gregs, gregs.to_bytes());
    assert_eq!(corpus.snaps[0].registers.fpregs, fpregs.to_bytes());

    // A reader built for the wrong architecture refuses the image.
    assert!(read_corpus::<X86_64>(&image).is_err());
}

#[test]
fn repeating_payload_decodes_identically_with_and_without_compression() {
    let mut snapshot = basic_snapshot();
    snapshot.memory_bytes[0] = MemoryBytes::new(0x1000_0000, vec![0x90; 0x1000]);

    let compressed = generate(
        ArchitectureId::X86_64,
        std::slice::from_ref(&snapshot),
        Options {
            compress_repeating_bytes: true,
            counters: None,
        },
    )
    .unwrap();
    let plain = generate(
        ArchitectureId::X86_64,
        std::slice::from_ref(&snapshot),
        Options::default(),
    )
    .unwrap();

    let from_compressed = read_corpus::<X86_64>(&compressed).unwrap();
    let from_plain = read_corpus::<X86_64>(&plain).unwrap();
    let compressed_bytes = &from_compressed.snaps[0].mappings[0].memory_bytes[0];
    let plain_bytes = &from_plain.snaps[0].mappings[0].memory_bytes[0];

    assert!(matches!(
        compressed_bytes.data,
        DecodedByteData::Repeating {
            value: 0x90,
            size: 0x1000
        }
    ));
    assert!(matches!(plain_bytes.data, DecodedByteData::Literal(_)));
    assert_eq!(compressed_bytes.materialize(), plain_bytes.materialize());
}
