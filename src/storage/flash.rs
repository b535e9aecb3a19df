/// `storage/flash.rs` - block I/O for the reserved script region
///
/// The region is split into two equally sized banks. Both backends follow
/// NOR flash rules: erased bytes read as `0xFF` and programming can only
/// clear bits, so a bank must be erased before it is rewritten.
use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

pub const ERASED: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bank {
    A,
    B,
}

impl Bank {
    pub fn other(self) -> Bank {
        match self {
            Bank::A => Bank::B,
            Bank::B => Bank::A,
        }
    }

    fn index(self) -> usize {
        match self {
            Bank::A => 0,
            Bank::B => 1,
        }
    }
}

pub trait Flash: Send {
    /// Size of one bank in bytes.
    fn bank_len(&self) -> usize;
    fn read(&self, bank: Bank, offset: usize, buf: &mut [u8]) -> io::Result<()>;
    fn erase(&mut self, bank: Bank) -> io::Result<()>;
    fn program(&mut self, bank: Bank, offset: usize, data: &[u8]) -> io::Result<()>;
}

fn check_range(bank_len: usize, offset: usize, len: usize) -> io::Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= bank_len => Ok(()),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("access {offset}+{len} outside bank of {bank_len} bytes"),
        )),
    }
}

// ── In-memory flash ──────────────────────────────────────────────────────────

/// RAM-backed flash. Starts erased. Failures can be injected to exercise the
/// store's recovery paths.
#[derive(Debug, Clone)]
pub struct MemFlash {
    banks: [Vec<u8>; 2],
    fail_programs_after: Option<usize>,
}

impl MemFlash {
    pub fn new(bank_len: usize) -> Self {
        Self {
            banks: [vec![ERASED; bank_len], vec![ERASED; bank_len]],
            fail_programs_after: None,
        }
    }

    /// Let `n` more program operations succeed, then fail every one after.
    pub fn fail_programs_after(&mut self, n: usize) {
        self.fail_programs_after = Some(n);
    }

    pub fn clear_faults(&mut self) {
        self.fail_programs_after = None;
    }

    pub fn bank(&self, bank: Bank) -> &[u8] {
        &self.banks[bank.index()]
    }
}

impl Flash for MemFlash {
    fn bank_len(&self) -> usize {
        self.banks[0].len()
    }

    fn read(&self, bank: Bank, offset: usize, buf: &mut [u8]) -> io::Result<()> {
        check_range(self.bank_len(), offset, buf.len())?;
        buf.copy_from_slice(&self.banks[bank.index()][offset..offset + buf.len()]);
        Ok(())
    }

    fn erase(&mut self, bank: Bank) -> io::Result<()> {
        self.banks[bank.index()].fill(ERASED);
        Ok(())
    }

    fn program(&mut self, bank: Bank, offset: usize, data: &[u8]) -> io::Result<()> {
        check_range(self.bank_len(), offset, data.len())?;
        match self.fail_programs_after {
            Some(0) => return Err(io::Error::other("injected program failure")),
            Some(ref mut n) => *n -= 1,
            None => {}
        }
        for (cell, byte) in self.banks[bank.index()][offset..].iter_mut().zip(data) {
            *cell &= *byte;
        }
        Ok(())
    }
}

// ── File-backed flash ────────────────────────────────────────────────────────

/// A host file standing in for the flash part: bank A followed by bank B.
#[derive(Debug)]
pub struct FileFlash {
    path: PathBuf,
    file: File,
    bank_len: usize,
}

impl FileFlash {
    /// Open `path`, creating an erased image when it is missing or the wrong size.
    pub fn open(path: &Path, bank_len: usize) -> io::Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let expected = (bank_len * 2) as u64;
        if file.metadata()?.len() != expected {
            log::warn!(
                "[store] flash image {} has unexpected size, erasing",
                path.display()
            );
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&vec![ERASED; bank_len * 2])?;
            file.sync_data()?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            file,
            bank_len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn position(&self, bank: Bank, offset: usize) -> u64 {
        (bank.index() * self.bank_len + offset) as u64
    }
}

impl Flash for FileFlash {
    fn bank_len(&self) -> usize {
        self.bank_len
    }

    fn read(&self, bank: Bank, offset: usize, buf: &mut [u8]) -> io::Result<()> {
        check_range(self.bank_len, offset, buf.len())?;
        let mut file = &self.file;
        file.seek(SeekFrom::Start(self.position(bank, offset)))?;
        file.read_exact(buf)
    }

    fn erase(&mut self, bank: Bank) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(self.position(bank, 0)))?;
        self.file.write_all(&vec![ERASED; self.bank_len])?;
        self.file.sync_data()
    }

    fn program(&mut self, bank: Bank, offset: usize, data: &[u8]) -> io::Result<()> {
        let mut current = vec![0u8; data.len()];
        self.read(bank, offset, &mut current)?;
        for (cell, byte) in current.iter_mut().zip(data) {
            *cell &= *byte;
        }
        self.file.seek(SeekFrom::Start(self.position(bank, offset)))?;
        self.file.write_all(&current)?;
        self.file.sync_data()
    }
}
