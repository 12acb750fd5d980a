//! Architecture tags and fixed-size register files.
//!
//! Register states travel through snapshots in serialized form (raw little-
//! endian bytes). The serialized layout is bit-identical to the form the
//! corpus emits, so `from_bytes` followed by `write_to` reproduces the input
//! exactly. Decoders reject any length mismatch.

use crate::error::{Result, SnapshotError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ArchitectureId {
    X86_64 = 1,
    AArch64 = 2,
}

impl ArchitectureId {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            1 => Ok(ArchitectureId::X86_64),
            2 => Ok(ArchitectureId::AArch64),
            _ => Err(SnapshotError::UnknownArchitecture(v)),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ArchitectureId::X86_64 => "x86_64",
            ArchitectureId::AArch64 => "aarch64",
        }
    }
}

/// A fixed-size register file with a defined little-endian wire layout.
pub trait RegSet: Clone + Copy + Default + PartialEq + std::fmt::Debug {
    /// Byte length of both the serialized form and the emitted in-image form.
    const WIRE_SIZE: usize;

    /// Alignment of the emitted in-image form.
    const WIRE_ALIGN: usize;

    /// Decode from exactly [`Self::WIRE_SIZE`] bytes.
    fn from_bytes(bytes: &[u8]) -> Result<Self>;

    /// Encode into `out`, which must be exactly [`Self::WIRE_SIZE`] bytes.
    fn write_to(&self, out: &mut [u8]);

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; Self::WIRE_SIZE];
        self.write_to(&mut out);
        out
    }
}

/// Compile-time architecture selector for the generator.
pub trait Arch: Clone + Copy + Send + Sync + std::fmt::Debug + 'static {
    const ID: ArchitectureId;
    type GRegs: RegSet;
    type FPRegs: RegSet;
}

#[derive(Debug, Clone, Copy)]
pub struct X86_64;

impl Arch for X86_64 {
    const ID: ArchitectureId = ArchitectureId::X86_64;
    type GRegs = GRegsX86_64;
    type FPRegs = FpRegsX86_64;
}

#[derive(Debug, Clone, Copy)]
pub struct AArch64;

impl Arch for AArch64 {
    const ID: ArchitectureId = ArchitectureId::AArch64;
    type GRegs = GRegsAArch64;
    type FPRegs = FpRegsAArch64;
}

struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn u16(&mut self, v: u16) {
        self.buf[self.pos..self.pos + 2].copy_from_slice(&v.to_le_bytes());
        self.pos += 2;
    }

    fn u32(&mut self, v: u32) {
        self.buf[self.pos..self.pos + 4].copy_from_slice(&v.to_le_bytes());
        self.pos += 4;
    }

    fn u64(&mut self, v: u64) {
        self.buf[self.pos..self.pos + 8].copy_from_slice(&v.to_le_bytes());
        self.pos += 8;
    }

    fn u128(&mut self, v: u128) {
        self.buf[self.pos..self.pos + 16].copy_from_slice(&v.to_le_bytes());
        self.pos += 16;
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn u16(&mut self) -> u16 {
        let v = u16::from_le_bytes(self.buf[self.pos..self.pos + 2].try_into().unwrap());
        self.pos += 2;
        v
    }

    fn u32(&mut self) -> u32 {
        let v = u32::from_le_bytes(self.buf[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        v
    }

    fn u64(&mut self) -> u64 {
        let v = u64::from_le_bytes(self.buf[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        v
    }

    fn u128(&mut self) -> u128 {
        let v = u128::from_le_bytes(self.buf[self.pos..self.pos + 16].try_into().unwrap());
        self.pos += 16;
        v
    }
}

fn check_len<T: RegSet>(bytes: &[u8]) -> Result<()> {
    if bytes.len() != T::WIRE_SIZE {
        return Err(SnapshotError::RegisterLength {
            expected: T::WIRE_SIZE,
            found: bytes.len(),
        });
    }
    Ok(())
}

/// x86-64 general-purpose register file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GRegsX86_64 {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rbp: u64,
    pub rsp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub rflags: u64,
    pub fs_base: u64,
    pub gs_base: u64,
    pub cs: u32,
    pub ss: u32,
    pub ds: u32,
    pub es: u32,
    pub fs: u32,
    pub gs: u32,
}

impl RegSet for GRegsX86_64 {
    const WIRE_SIZE: usize = 20 * 8 + 6 * 4;
    const WIRE_ALIGN: usize = 8;

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        check_len::<Self>(bytes)?;
        let mut r = Reader::new(bytes);
        Ok(Self {
            rax: r.u64(),
            rbx: r.u64(),
            rcx: r.u64(),
            rdx: r.u64(),
            rdi: r.u64(),
            rsi: r.u64(),
            rbp: r.u64(),
            rsp: r.u64(),
            r8: r.u64(),
            r9: r.u64(),
            r10: r.u64(),
            r11: r.u64(),
            r12: r.u64(),
            r13: r.u64(),
            r14: r.u64(),
            r15: r.u64(),
            rip: r.u64(),
            rflags: r.u64(),
            fs_base: r.u64(),
            gs_base: r.u64(),
            cs: r.u32(),
            ss: r.u32(),
            ds: r.u32(),
            es: r.u32(),
            fs: r.u32(),
            gs: r.u32(),
        })
    }

    fn write_to(&self, out: &mut [u8]) {
        assert_eq!(out.len(), Self::WIRE_SIZE);
        let mut w = Writer::new(out);
        w.u64(self.rax);
        w.u64(self.rbx);
        w.u64(self.rcx);
        w.u64(self.rdx);
        w.u64(self.rdi);
        w.u64(self.rsi);
        w.u64(self.rbp);
        w.u64(self.rsp);
        w.u64(self.r8);
        w.u64(self.r9);
        w.u64(self.r10);
        w.u64(self.r11);
        w.u64(self.r12);
        w.u64(self.r13);
        w.u64(self.r14);
        w.u64(self.r15);
        w.u64(self.rip);
        w.u64(self.rflags);
        w.u64(self.fs_base);
        w.u64(self.gs_base);
        w.u32(self.cs);
        w.u32(self.ss);
        w.u32(self.ds);
        w.u32(self.es);
        w.u32(self.fs);
        w.u32(self.gs);
    }
}

/// x86-64 floating-point/vector register file, fxsave-shaped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FpRegsX86_64 {
    pub fcw: u16,
    pub fsw: u16,
    pub ftw: u16,
    pub fop: u16,
    pub last_ip: u64,
    pub last_dp: u64,
    pub mxcsr: u32,
    pub mxcsr_mask: u32,
    pub st: [u128; 8],
    pub xmm: [u128; 16],
}

impl RegSet for FpRegsX86_64 {
    const WIRE_SIZE: usize = 32 + 8 * 16 + 16 * 16;
    const WIRE_ALIGN: usize = 16;

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        check_len::<Self>(bytes)?;
        let mut r = Reader::new(bytes);
        let mut regs = Self {
            fcw: r.u16(),
            fsw: r.u16(),
            ftw: r.u16(),
            fop: r.u16(),
            last_ip: r.u64(),
            last_dp: r.u64(),
            mxcsr: r.u32(),
            mxcsr_mask: r.u32(),
            st: [0; 8],
            xmm: [0; 16],
        };
        for st in regs.st.iter_mut() {
            *st = r.u128();
        }
        for xmm in regs.xmm.iter_mut() {
            *xmm = r.u128();
        }
        Ok(regs)
    }

    fn write_to(&self, out: &mut [u8]) {
        assert_eq!(out.len(), Self::WIRE_SIZE);
        let mut w = Writer::new(out);
        w.u16(self.fcw);
        w.u16(self.fsw);
        w.u16(self.ftw);
        w.u16(self.fop);
        w.u64(self.last_ip);
        w.u64(self.last_dp);
        w.u32(self.mxcsr);
        w.u32(self.mxcsr_mask);
        for st in &self.st {
            w.u128(*st);
        }
        for xmm in &self.xmm {
            w.u128(*xmm);
        }
    }
}

/// AArch64 general-purpose register file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GRegsAArch64 {
    pub x: [u64; 31],
    pub sp: u64,
    pub pc: u64,
    pub pstate: u64,
    pub tpidr: u64,
    pub tpidrro: u64,
}

impl RegSet for GRegsAArch64 {
    const WIRE_SIZE: usize = 36 * 8;
    const WIRE_ALIGN: usize = 8;

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        check_len::<Self>(bytes)?;
        let mut r = Reader::new(bytes);
        let mut regs = Self::default();
        for x in regs.x.iter_mut() {
            *x = r.u64();
        }
        regs.sp = r.u64();
        regs.pc = r.u64();
        regs.pstate = r.u64();
        regs.tpidr = r.u64();
        regs.tpidrro = r.u64();
        Ok(regs)
    }

    fn write_to(&self, out: &mut [u8]) {
        assert_eq!(out.len(), Self::WIRE_SIZE);
        let mut w = Writer::new(out);
        for x in &self.x {
            w.u64(*x);
        }
        w.u64(self.sp);
        w.u64(self.pc);
        w.u64(self.pstate);
        w.u64(self.tpidr);
        w.u64(self.tpidrro);
    }
}

/// AArch64 SIMD/floating-point register file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FpRegsAArch64 {
    pub v: [u128; 32],
    pub fpsr: u32,
    pub fpcr: u32,
}

impl RegSet for FpRegsAArch64 {
    const WIRE_SIZE: usize = 32 * 16 + 8;
    const WIRE_ALIGN: usize = 16;

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        check_len::<Self>(bytes)?;
        let mut r = Reader::new(bytes);
        let mut regs = Self::default();
        for v in regs.v.iter_mut() {
            *v = r.u128();
        }
        regs.fpsr = r.u32();
        regs.fpcr = r.u32();
        Ok(regs)
    }

    fn write_to(&self, out: &mut [u8]) {
        assert_eq!(out.len(), Self::WIRE_SIZE);
        let mut w = Writer::new(out);
        for v in &self.v {
            w.u128(*v);
        }
        w.u32(self.fpsr);
        w.u32(self.fpcr);
    }
}
