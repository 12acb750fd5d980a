//! Two-pass corpus generation.
//!
//! Generation traverses the input snapshots twice with the same walker. The
//! layout pass only bump-allocates, computing the size and alignment of
//! every arena and populating the dedup tables. The final buffer is then
//! allocated, the sub-arenas are placed inside it, and the dedup tables are
//! cleared. The emit pass repeats the identical allocation sequence, so
//! every allocation lands on the offset computed during layout, and this
//! time writes record contents through the resulting refs.
//!
//! Pointers are emitted for a nominal load address of zero: every stored
//! pointer is an offset into the image, and a consumer that maps the image
//! at base `L` relocates by adding `L`.

use std::collections::HashMap;
use std::marker::PhantomData;

use tracing::debug;

use snap_types::{
    deserialize_register_checksum, split_bytes_by_mapping, Arch, ArchitectureId, MemoryBytes,
    MemoryMapping, RegSet, RegisterState, Snapshot,
};

use crate::arena::{BlockId, Blocks, Ref};
use crate::buffer::CorpusBuffer;
use crate::checksum::{corpus_checksum, Checksummer};
use crate::dedup::DedupTable;
use crate::error::{CorpusError, Result};
use crate::format::{
    self, MemoryBytesData, RegisterStateView, SnapArray, SnapCorpusHeader, CORPUS_MAGIC,
    HEADER_CHECKSUM_OFFSET, HEADER_SIZE, PTR_SIZE, REGISTER_STATE_VIEW_SIZE, RUNNER_PAGE_SIZE,
    SNAP_CORPUS_SIZE, SNAP_MEMORY_BYTES_SIZE, SNAP_MEMORY_MAPPING_SIZE, SNAP_SIZE,
};
use crate::wire::put_u64;

/// Contents are generated as if the image were loaded at address zero;
/// runtime relocation is then a single add of the actual base.
const NOMINAL_LOAD_ADDRESS: u64 = 0;

/// Generation options.
#[derive(Debug, Default)]
pub struct Options<'c> {
    /// Emit single-value payloads as inline `(value, size)` runs instead of
    /// allocating a byte array.
    pub compress_repeating_bytes: bool,
    /// If set, receives the size of every arena (keyed by
    /// `main_block`, `snap_block`, ..., `page_data_block`) after emission.
    pub counters: Option<&'c mut HashMap<String, u64>>,
}

/// Generates a relocatable corpus image from `snapshots`, dispatching on a
/// runtime architecture id.
///
/// Every snapshot must target `architecture_id`, carry exactly one expected
/// end state, and have nonempty start registers; violations are reported as
/// errors. Inputs must also never present the same byte payload at both a
/// page-aligned and an unaligned placement: payloads are deduplicated by
/// content and keep the alignment of their first occurrence.
///
/// Output is deterministic: equal inputs produce byte-identical images,
/// checksums included.
pub fn generate(
    architecture_id: ArchitectureId,
    snapshots: &[Snapshot],
    options: Options<'_>,
) -> Result<CorpusBuffer> {
    match architecture_id {
        ArchitectureId::X86_64 => generate_for::<snap_types::X86_64>(snapshots, options),
        ArchitectureId::AArch64 => generate_for::<snap_types::AArch64>(snapshots, options),
    }
}

/// [`generate`] with the architecture fixed at compile time.
pub fn generate_for<A: Arch>(snapshots: &[Snapshot], options: Options<'_>) -> Result<CorpusBuffer> {
    let Options {
        compress_repeating_bytes,
        counters,
    } = options;

    let mut traversal = Traversal::<A>::new(compress_repeating_bytes);
    let layout_sizes = traversal.process(Pass::Layout, snapshots)?;

    let required_alignment = traversal.blocks.required_alignment(BlockId::Main);
    assert!(
        required_alignment <= RUNNER_PAGE_SIZE,
        "corpus layout requires alignment {required_alignment}, beyond the runner page size"
    );
    let num_bytes = traversal.blocks.size(BlockId::Main);
    debug!(
        snapshots = snapshots.len(),
        num_bytes, "corpus layout complete"
    );

    let mut buffer = CorpusBuffer::new_zeroed(num_bytes as usize, RUNNER_PAGE_SIZE as usize)?;
    traversal.prepare_emit(&mut buffer);
    let emit_sizes = traversal.process(Pass::Emit, snapshots)?;
    debug_assert_eq!(layout_sizes, emit_sizes, "layout and emit passes disagree");
    debug!(num_bytes = buffer.len(), "corpus emitted");

    if let Some(counters) = counters {
        *counters = emit_sizes;
    }
    Ok(buffer)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Layout,
    Emit,
}

#[derive(Debug, Clone, Copy)]
enum RegKind {
    GRegs,
    FpRegs,
}

struct RegisterStateRefs {
    gregs: Ref,
    fpregs: Ref,
    /// Checksum over the emitted register structures; computed during the
    /// emit pass only.
    memory_checksum: u64,
}

/// One corpus generation in flight. Not reusable across generations.
struct Traversal<'s, 'b, A: Arch> {
    compress_repeating_bytes: bool,
    blocks: Blocks,
    contents: Option<&'b mut [u8]>,
    byte_data_refs: DedupTable<'s>,
    gregs_refs: DedupTable<'s>,
    fpregs_refs: DedupTable<'s>,
    _arch: PhantomData<A>,
}

impl<'s, 'b, A: Arch> Traversal<'s, 'b, A> {
    fn new(compress_repeating_bytes: bool) -> Self {
        Self {
            compress_repeating_bytes,
            blocks: Blocks::new(),
            contents: None,
            byte_data_refs: DedupTable::new(),
            gregs_refs: DedupTable::new(),
            fpregs_refs: DedupTable::new(),
            _arch: PhantomData,
        }
    }

    /// Run one pass of the walker over `snapshots` and return the arena
    /// sizes it produced. Both passes run the same code; only writes are
    /// gated on the pass.
    fn process(&mut self, pass: Pass, snapshots: &'s [Snapshot]) -> Result<HashMap<String, u64>> {
        let num_snaps = snapshots.len() as u64;
        let corpus_ref = self.blocks.allocate(BlockId::Snap, SNAP_CORPUS_SIZE, 8);
        let elements_ref = self
            .blocks
            .allocate(BlockId::Snap, PTR_SIZE * num_snaps, 8);
        let snaps_ref = self.blocks.allocate(BlockId::Snap, SNAP_SIZE * num_snaps, 8);

        for (i, snapshot) in snapshots.iter().enumerate() {
            self.process_snapshot(pass, snapshot, snaps_ref.add(i as u64 * SNAP_SIZE))?;
        }

        // Merge the sub-arenas into the image-wide arena, pointer-bearing
        // regions first.
        for sub in BlockId::SUB_BLOCKS {
            self.blocks.merge_into_main(sub);
        }

        if pass == Pass::Emit {
            let num_bytes = self.blocks.size(BlockId::Main);
            let header = SnapCorpusHeader {
                magic: CORPUS_MAGIC,
                header_size: HEADER_SIZE as u32,
                checksum: 0,
                num_bytes,
                corpus_type_size: SNAP_CORPUS_SIZE as u32,
                snap_type_size: SNAP_SIZE as u32,
                register_state_type_size: REGISTER_STATE_VIEW_SIZE as u32,
                architecture_id: A::ID as u8,
            };
            let snaps_array =
                array_descriptor(num_snaps, self.blocks.load_address(elements_ref));
            self.emit(corpus_ref, SNAP_CORPUS_SIZE, |buf| {
                header.write_to(buf);
                snaps_array.write_at(buf, HEADER_SIZE as usize);
            });

            for i in 0..num_snaps {
                let snap_address = self.blocks.load_address(snaps_ref.add(i * SNAP_SIZE));
                self.emit(elements_ref.add(i * PTR_SIZE), PTR_SIZE, |buf| {
                    put_u64(buf, 0, snap_address);
                });
            }

            // The checksum covers the finished image with its own slot held
            // zero, so it can be stored without invalidating itself.
            let contents = self.image_mut();
            debug_assert_eq!(contents.len() as u64, num_bytes);
            let checksum = corpus_checksum(contents);
            put_u64(contents, HEADER_CHECKSUM_OFFSET, checksum);
        }

        Ok(self.block_sizes())
    }

    /// Place the sub-arenas inside the final buffer and rewind everything
    /// for the emit pass.
    fn prepare_emit(&mut self, contents: &'b mut [u8]) {
        debug_assert_eq!(contents.len() as u64, self.blocks.size(BlockId::Main));

        self.blocks
            .place(BlockId::Main, 0, NOMINAL_LOAD_ADDRESS);
        self.blocks.reset_size_and_alignment(BlockId::Main);
        for sub in BlockId::SUB_BLOCKS {
            let merged = self.blocks.merge_into_main(sub);
            let load_address = self.blocks.load_address(merged);
            self.blocks.place(sub, merged.offset, load_address);
            self.blocks.reset_size_and_alignment(sub);
        }
        self.blocks.reset_size_and_alignment(BlockId::Main);

        // The emit pass re-discovers every dedup entry in the same order.
        self.byte_data_refs.clear();
        self.gregs_refs.clear();
        self.fpregs_refs.clear();

        self.contents = Some(contents);
    }

    fn process_snapshot(&mut self, pass: Pass, snapshot: &'s Snapshot, snap_ref: Ref) -> Result<()> {
        if snapshot.architecture_id != A::ID {
            return Err(CorpusError::ArchitectureMismatch {
                id: snapshot.id.clone(),
                expected: A::ID.name(),
                found: snapshot.architecture_id.name(),
            });
        }

        let id_bytes = snapshot.id.as_bytes();
        let id_ref = self
            .blocks
            .allocate(BlockId::Strings, id_bytes.len() as u64 + 1, 1);

        let bytes_per_mapping =
            split_bytes_by_mapping(&snapshot.memory_mappings, &snapshot.memory_bytes).map_err(
                |source| CorpusError::BadSnapshot {
                    id: snapshot.id.clone(),
                    source,
                },
            )?;
        let mappings_ref =
            self.process_memory_mappings(pass, &snapshot.memory_mappings, &bytes_per_mapping);

        if snapshot.expected_end_states.len() != 1 {
            return Err(CorpusError::EndStateCount {
                id: snapshot.id.clone(),
                found: snapshot.expected_end_states.len(),
            });
        }
        let end_state = &snapshot.expected_end_states[0];
        let end_state_bytes: Vec<&'s MemoryBytes> = end_state.memory_bytes.iter().collect();
        let end_state_bytes_ref = self.process_memory_bytes_list(pass, &end_state_bytes);

        let registers = self.process_register_state(pass, &snapshot.registers, false, &snapshot.id)?;
        let end_state_registers =
            self.process_register_state(pass, &end_state.registers, true, &snapshot.id)?;

        let end_state_register_checksum =
            deserialize_register_checksum::<A>(&end_state.register_checksum).map_err(|source| {
                CorpusError::BadSnapshot {
                    id: snapshot.id.clone(),
                    source,
                }
            })?;

        if pass == Pass::Emit {
            self.emit(id_ref, id_bytes.len() as u64 + 1, |buf| {
                buf[..id_bytes.len()].copy_from_slice(id_bytes);
                buf[id_bytes.len()] = 0;
            });

            let snap = format::Snap {
                id: self.blocks.load_address(id_ref),
                memory_mappings: array_descriptor(
                    snapshot.memory_mappings.len() as u64,
                    self.blocks.load_address(mappings_ref),
                ),
                registers: self.register_view(&registers),
                end_state_instruction_address: end_state.instruction_address,
                end_state_registers: self.register_view(&end_state_registers),
                end_state_memory_bytes: array_descriptor(
                    end_state_bytes.len() as u64,
                    self.blocks.load_address(end_state_bytes_ref),
                ),
                end_state_register_checksum,
                registers_memory_checksum: registers.memory_checksum,
                end_state_registers_memory_checksum: end_state_registers.memory_checksum,
            };
            self.emit(snap_ref, SNAP_SIZE, |buf| snap.write_to(buf));
        }
        Ok(())
    }

    fn process_memory_mappings(
        &mut self,
        pass: Pass,
        mappings: &[MemoryMapping],
        bytes_per_mapping: &[Vec<&'s MemoryBytes>],
    ) -> Ref {
        let elements_ref = self.blocks.allocate(
            BlockId::MemoryMapping,
            SNAP_MEMORY_MAPPING_SIZE * mappings.len() as u64,
            8,
        );
        for (i, (mapping, bytes_list)) in mappings.iter().zip(bytes_per_mapping).enumerate() {
            self.process_memory_mapping(
                pass,
                mapping,
                bytes_list,
                elements_ref.add(i as u64 * SNAP_MEMORY_MAPPING_SIZE),
            );
        }
        elements_ref
    }

    fn process_memory_mapping(
        &mut self,
        pass: Pass,
        mapping: &MemoryMapping,
        bytes_list: &[&'s MemoryBytes],
        mapping_ref: Ref,
    ) {
        let elements_ref = self.process_memory_bytes_list(pass, bytes_list);

        if pass == Pass::Emit {
            let mut checksummer = Checksummer::new();
            for bytes in bytes_list {
                checksummer.update(&bytes.byte_values);
            }
            let record = format::SnapMemoryMapping {
                start_address: mapping.start_address,
                num_bytes: mapping.num_bytes,
                perms: mapping.perms.bits(),
                memory_checksum: checksummer.finish(),
                memory_bytes: array_descriptor(
                    bytes_list.len() as u64,
                    self.blocks.load_address(elements_ref),
                ),
            };
            self.emit(mapping_ref, SNAP_MEMORY_MAPPING_SIZE, |buf| {
                record.write_to(buf)
            });
        }
    }

    fn process_memory_bytes_list(&mut self, pass: Pass, bytes_list: &[&'s MemoryBytes]) -> Ref {
        let elements_ref = self.blocks.allocate(
            BlockId::MemoryBytes,
            SNAP_MEMORY_BYTES_SIZE * bytes_list.len() as u64,
            8,
        );
        for (i, &bytes) in bytes_list.iter().enumerate() {
            self.process_memory_bytes(pass, bytes, elements_ref.add(i as u64 * SNAP_MEMORY_BYTES_SIZE));
        }
        elements_ref
    }

    fn process_memory_bytes(&mut self, pass: Pass, bytes: &'s MemoryBytes, record_ref: Ref) {
        // Repeating runs are stored inline and take precedence over
        // page-aligned routing; no payload is allocated at all.
        let compress = self.compress_repeating_bytes && bytes.is_repeating_byte_run();
        let record = if compress {
            format::SnapMemoryBytes {
                start_address: bytes.start_address,
                data: MemoryBytesData::ByteRun {
                    value: bytes.byte_values[0],
                    size: bytes.num_bytes(),
                },
            }
        } else {
            let payload_ref = self.process_payload(pass, bytes);
            let size = bytes.num_bytes();
            format::SnapMemoryBytes {
                start_address: bytes.start_address,
                data: MemoryBytesData::ByteValues {
                    size,
                    elements: if size == 0 {
                        0
                    } else {
                        self.blocks.load_address(payload_ref)
                    },
                },
            }
        };

        if pass == Pass::Emit {
            self.emit(record_ref, SNAP_MEMORY_BYTES_SIZE, |buf| record.write_to(buf));
        }
    }

    /// Allocate (or find the deduplicated allocation of) the backing bytes
    /// for one memory-bytes record.
    fn process_payload(&mut self, pass: Pass, bytes: &'s MemoryBytes) -> Ref {
        let payload: &'s [u8] = &bytes.byte_values;
        if let Some(existing) = self.byte_data_refs.get(payload) {
            // Contents were copied when the payload was first seen.
            // Verifying the copy is expensive for large payloads, so only
            // debug builds do it.
            if cfg!(debug_assertions) && pass == Pass::Emit {
                let range = self.blocks.image_range(existing, payload.len() as u64);
                if let Some(contents) = self.contents.as_deref() {
                    debug_assert_eq!(
                        &contents[range],
                        payload,
                        "deduplicated payload contents diverged"
                    );
                }
            }
            return existing;
        }

        // Page-aligned, page-sized payloads get page alignment inside the
        // image so a runner can map them directly from the corpus file.
        let page_aligned = bytes.start_address % RUNNER_PAGE_SIZE == 0
            && bytes.num_bytes() % RUNNER_PAGE_SIZE == 0;
        let payload_ref = if page_aligned {
            self.blocks
                .allocate(BlockId::PageData, payload.len() as u64, RUNNER_PAGE_SIZE)
        } else {
            self.blocks.allocate(BlockId::ByteData, payload.len() as u64, 8)
        };
        self.byte_data_refs.insert(payload, payload_ref);

        if pass == Pass::Emit {
            self.emit(payload_ref, payload.len() as u64, |buf| {
                buf.copy_from_slice(payload)
            });
        }
        payload_ref
    }

    fn process_register_state(
        &mut self,
        pass: Pass,
        registers: &'s RegisterState,
        allow_empty: bool,
        snapshot_id: &str,
    ) -> Result<RegisterStateRefs> {
        let gregs = self.process_register_set::<A::GRegs>(
            pass,
            &registers.gregs,
            allow_empty,
            RegKind::GRegs,
            snapshot_id,
        )?;
        let fpregs = self.process_register_set::<A::FPRegs>(
            pass,
            &registers.fpregs,
            allow_empty,
            RegKind::FpRegs,
            snapshot_id,
        )?;
        let memory_checksum = if pass == Pass::Emit {
            register_memory_checksum::<A>(&registers.fpregs, &registers.gregs)
        } else {
            0
        };
        Ok(RegisterStateRefs {
            gregs,
            fpregs,
            memory_checksum,
        })
    }

    /// Deduplicate one register set by its serialized bytes and emit the
    /// deserialized structure. An empty byte string emits the zero-filled
    /// structure (the output buffer is already zeroed) when permitted.
    ///
    /// GPRs and FPRs use separate maps and separate arenas: two register
    /// kinds whose serialized bytes happen to collide must never share
    /// storage.
    fn process_register_set<R: RegSet>(
        &mut self,
        pass: Pass,
        serialized: &'s [u8],
        allow_empty: bool,
        kind: RegKind,
        snapshot_id: &str,
    ) -> Result<Ref> {
        // Reject empty-where-forbidden before the dedup lookup: an empty
        // end-state key interned earlier must not mask the check.
        if serialized.is_empty() && !allow_empty {
            return Err(CorpusError::EmptyRegisters {
                id: snapshot_id.to_string(),
            });
        }

        let existing = match kind {
            RegKind::GRegs => self.gregs_refs.get(serialized),
            RegKind::FpRegs => self.fpregs_refs.get(serialized),
        };
        if let Some(existing) = existing {
            return Ok(existing);
        }

        let decoded = if serialized.is_empty() {
            None
        } else {
            Some(
                R::from_bytes(serialized).map_err(|source| CorpusError::BadSnapshot {
                    id: snapshot_id.to_string(),
                    source,
                })?,
            )
        };

        let block = match kind {
            RegKind::GRegs => BlockId::GRegs,
            RegKind::FpRegs => BlockId::FpRegs,
        };
        let register_ref = self
            .blocks
            .allocate(block, R::WIRE_SIZE as u64, R::WIRE_ALIGN as u64);
        match kind {
            RegKind::GRegs => self.gregs_refs.insert(serialized, register_ref),
            RegKind::FpRegs => self.fpregs_refs.insert(serialized, register_ref),
        }

        if pass == Pass::Emit {
            if let Some(registers) = decoded {
                self.emit(register_ref, R::WIRE_SIZE as u64, |buf| {
                    registers.write_to(buf)
                });
            }
        }
        Ok(register_ref)
    }

    fn register_view(&self, refs: &RegisterStateRefs) -> RegisterStateView {
        RegisterStateView {
            fpregs: self.blocks.load_address(refs.fpregs),
            gregs: self.blocks.load_address(refs.gregs),
        }
    }

    fn emit(&mut self, r: Ref, len: u64, write: impl FnOnce(&mut [u8])) {
        let range = self.blocks.image_range(r, len);
        let contents = self.image_mut();
        write(&mut contents[range]);
    }

    fn image_mut(&mut self) -> &mut [u8] {
        match self.contents.as_deref_mut() {
            Some(contents) => contents,
            None => unreachable!("emit pass ran without an output buffer"),
        }
    }

    fn block_sizes(&self) -> HashMap<String, u64> {
        BlockId::ALL
            .iter()
            .map(|&id| (id.counter_key().to_string(), self.blocks.size(id)))
            .collect()
    }
}

/// `(size, elements)` with a null pointer for empty arrays, keeping every
/// emitted pointer inside `[0, num_bytes)`.
fn array_descriptor(size: u64, elements: u64) -> SnapArray {
    SnapArray {
        size,
        elements: if size == 0 { 0 } else { elements },
    }
}

/// Checksum over the raw in-image bytes of one register state, fpregs then
/// gregs. Register codecs are bijective, so for nonempty input the
/// serialized bytes equal the emitted structure bytes; empty input hashes
/// as the zero-filled structure it emits.
fn register_memory_checksum<A: Arch>(fpregs: &[u8], gregs: &[u8]) -> u64 {
    let mut checksummer = Checksummer::new();
    if fpregs.is_empty() {
        checksummer.update(&vec![0u8; A::FPRegs::WIRE_SIZE]);
    } else {
        checksummer.update(fpregs);
    }
    if gregs.is_empty() {
        checksummer.update(&vec![0u8; A::GRegs::WIRE_SIZE]);
    } else {
        checksummer.update(gregs);
    }
    checksummer.finish()
}
