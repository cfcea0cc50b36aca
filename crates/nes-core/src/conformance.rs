//! Single-step JSON conformance harness
//!
//! Reads test vectors in the widely used single-step format: one JSON file
//! per opcode, each an array of cases giving the CPU registers and touched
//! RAM before and after one instruction, plus its bus activity per cycle.
//!
//! ```json
//! { "name": "65 10 00",
//!   "initial": { "pc": 32768, "s": 253, "a": 1, "x": 0, "y": 0, "p": 36,
//!                "ram": [[32768, 101], [32769, 16], [16, 1]] },
//!   "final":   { ... },
//!   "cycles":  [[32768, 101, "read"], [32769, 16, "read"], [16, 1, "read"]] }
//! ```

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::bus::{FlatMemory, Memory};
use crate::cpu::{Cpu, CpuError, StatusFlags};

/// Register file and RAM contents at one side of a test
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuState {
    pub pc: u16,
    pub s: u8,
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub p: u8,
    pub ram: Vec<(u16, u8)>,
}

/// One test vector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    pub initial: CpuState,
    #[serde(rename = "final")]
    pub expected: CpuState,
    /// Bus activity, one entry per cycle: address, value, "read" or "write"
    #[serde(default)]
    pub cycles: Vec<(u16, u8, String)>,
}

/// A difference between the expected and the observed state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mismatch {
    Register {
        name: &'static str,
        expected: u16,
        actual: u16,
    },
    Memory {
        address: u16,
        expected: u8,
        actual: u8,
    },
    Cycles {
        expected: usize,
        actual: u32,
    },
    Cpu(CpuError),
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mismatch::Register {
                name,
                expected,
                actual,
            } => write!(f, "{}: expected {:02X}, got {:02X}", name, expected, actual),
            Mismatch::Memory {
                address,
                expected,
                actual,
            } => write!(
                f,
                "${:04X}: expected {:02X}, got {:02X}",
                address, expected, actual
            ),
            Mismatch::Cycles { expected, actual } => {
                write!(f, "cycles: expected {}, got {}", expected, actual)
            }
            Mismatch::Cpu(err) => write!(f, "{}", err),
        }
    }
}

/// Outcome of one case
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseResult {
    pub name: String,
    pub mismatches: Vec<Mismatch>,
}

impl CaseResult {
    pub fn passed(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Outcome of one vector file
#[derive(Debug, Clone)]
pub struct FileReport {
    pub path: PathBuf,
    pub total: usize,
    pub passed: usize,
    /// Failing cases, in file order
    pub failures: Vec<CaseResult>,
}

impl FileReport {
    pub fn all_passed(&self) -> bool {
        self.passed == self.total
    }
}

#[derive(Debug)]
pub enum ConformanceError {
    Io(PathBuf, io::Error),
    Json(PathBuf, serde_json::Error),
}

impl fmt::Display for ConformanceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConformanceError::Io(path, err) => write!(f, "{}: {}", path.display(), err),
            ConformanceError::Json(path, err) => {
                write!(f, "{}: invalid test vectors: {}", path.display(), err)
            }
        }
    }
}

impl std::error::Error for ConformanceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConformanceError::Io(_, err) => Some(err),
            ConformanceError::Json(_, err) => Some(err),
        }
    }
}

/// Break and Unused have no storage in P, so they are not compared
fn comparable_status(p: u8) -> u8 {
    (p & !StatusFlags::BREAK) | StatusFlags::UNUSED
}

/// Run one case: reset, load the initial state, execute one instruction and
/// compare every register and every listed RAM cell.
///
/// Cells the case touched are zeroed afterwards so `mem` can be reused.
pub fn run_case(cpu: &mut Cpu, mem: &mut FlatMemory, case: &TestCase) -> CaseResult {
    cpu.reset(mem);
    {
        let initial = &case.initial;
        let registers = cpu.registers_mut();
        registers.pc = initial.pc;
        registers.sp = initial.s;
        registers.a = initial.a;
        registers.x = initial.x;
        registers.y = initial.y;
        cpu.set_status(initial.p);
    }
    for &(address, value) in &case.initial.ram {
        mem.write8(address, value);
    }

    let mut mismatches = Vec::new();
    match cpu.step(mem) {
        Ok(cycles) => {
            if !case.cycles.is_empty() && case.cycles.len() != cycles as usize {
                mismatches.push(Mismatch::Cycles {
                    expected: case.cycles.len(),
                    actual: cycles,
                });
            }
        }
        Err(err) => mismatches.push(Mismatch::Cpu(err)),
    }

    let expected = &case.expected;
    let registers = *cpu.registers();
    let checks: [(&'static str, u16, u16); 6] = [
        ("PC", expected.pc, registers.pc),
        ("S", expected.s as u16, registers.sp as u16),
        ("A", expected.a as u16, registers.a as u16),
        ("X", expected.x as u16, registers.x as u16),
        ("Y", expected.y as u16, registers.y as u16),
        (
            "P",
            comparable_status(expected.p) as u16,
            comparable_status(cpu.status().bits()) as u16,
        ),
    ];
    for (name, expected, actual) in checks {
        if expected != actual {
            mismatches.push(Mismatch::Register {
                name,
                expected,
                actual,
            });
        }
    }

    for &(address, value) in &expected.ram {
        let actual = mem.read8(address);
        if actual != value {
            mismatches.push(Mismatch::Memory {
                address,
                expected: value,
                actual,
            });
        }
    }

    let touched = case
        .initial
        .ram
        .iter()
        .chain(&expected.ram)
        .map(|&(address, _)| address)
        .chain(case.cycles.iter().map(|(address, _, _)| *address));
    for address in touched {
        mem.write8(address, 0);
    }

    CaseResult {
        name: case.name.clone(),
        mismatches,
    }
}

/// Parse a vector file
pub fn load_cases(path: &Path) -> Result<Vec<TestCase>, ConformanceError> {
    let text =
        std::fs::read_to_string(path).map_err(|e| ConformanceError::Io(path.to_path_buf(), e))?;
    serde_json::from_str(&text).map_err(|e| ConformanceError::Json(path.to_path_buf(), e))
}

/// Run every case in one file
pub fn run_file(path: &Path) -> Result<FileReport, ConformanceError> {
    let cases = load_cases(path)?;
    let mut cpu = Cpu::new();
    let mut mem = FlatMemory::new();

    let mut report = FileReport {
        path: path.to_path_buf(),
        total: cases.len(),
        passed: 0,
        failures: Vec::new(),
    };
    for case in &cases {
        let result = run_case(&mut cpu, &mut mem, case);
        if result.passed() {
            report.passed += 1;
        } else {
            report.failures.push(result);
        }
    }
    debug!(
        file = %path.display(),
        passed = report.passed,
        total = report.total,
        "vector file done"
    );
    Ok(report)
}

/// `*.json` files in `dir`, sorted by name
pub fn vector_files(dir: &Path) -> Result<Vec<PathBuf>, ConformanceError> {
    let entries = std::fs::read_dir(dir).map_err(|e| ConformanceError::Io(dir.to_path_buf(), e))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| ConformanceError::Io(dir.to_path_buf(), e))?
            .path();
        if path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Run every vector file in `dir` on the rayon thread pool.
///
/// Reports come back in file-name order. The first file that fails to load
/// aborts the run; a panicking worker panics the caller.
pub fn run_dir(dir: &Path) -> Result<Vec<FileReport>, ConformanceError> {
    let files = vector_files(dir)?;
    info!(
        files = files.len(),
        workers = rayon::current_num_threads(),
        "running conformance vectors"
    );
    files.par_iter().map(|path| run_file(path)).collect()
}
