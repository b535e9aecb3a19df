/// `storage/script_store.rs` - persistence of the single user script
///
/// Bank layout: `magic:u16 | len:u16 | sequence:u32` (little-endian) followed
/// by `len` script bytes. A save erases the bank not holding the newest
/// script, programs the body, verifies it, and only then programs the header.
/// Until that last step the previous script is still the newest valid one, so
/// an interrupted or failed save never exposes a truncated script.
use super::flash::{Bank, Flash};
use crate::error::{BridgeError, BridgeResult};

pub const HEADER_LEN: usize = 8;
const MAGIC: u16 = 0xA55C;
const ERASED_SEQUENCE: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    len: u16,
    sequence: u32,
}

impl Header {
    fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..2].copy_from_slice(&MAGIC.to_le_bytes());
        out[2..4].copy_from_slice(&self.len.to_le_bytes());
        out[4..8].copy_from_slice(&self.sequence.to_le_bytes());
        out
    }

    fn parse(bytes: &[u8; HEADER_LEN], max_len: usize) -> Option<Header> {
        let magic = u16::from_le_bytes([bytes[0], bytes[1]]);
        let len = u16::from_le_bytes([bytes[2], bytes[3]]);
        let sequence = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if magic != MAGIC || sequence == ERASED_SEQUENCE || len as usize > max_len {
            return None;
        }
        Some(Header { len, sequence })
    }
}

/// `a` was written after `b`, tolerating sequence wrap-around.
fn is_newer(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

pub struct ScriptStore<F: Flash> {
    flash: F,
}

impl<F: Flash> ScriptStore<F> {
    pub fn new(flash: F) -> Self {
        Self { flash }
    }

    /// Largest script the region can hold.
    pub fn capacity(&self) -> usize {
        self.flash
            .bank_len()
            .saturating_sub(HEADER_LEN)
            .min(u16::MAX as usize)
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    fn header(&self, bank: Bank) -> Option<Header> {
        let mut raw = [0u8; HEADER_LEN];
        if let Err(e) = self.flash.read(bank, 0, &mut raw) {
            log::warn!("[store] reading {bank:?} header failed: {e}");
            return None;
        }
        Header::parse(&raw, self.capacity())
    }

    fn newest(&self) -> Option<(Bank, Header)> {
        match (self.header(Bank::A), self.header(Bank::B)) {
            (Some(a), Some(b)) if is_newer(b.sequence, a.sequence) => Some((Bank::B, b)),
            (Some(a), _) => Some((Bank::A, a)),
            (None, Some(b)) => Some((Bank::B, b)),
            (None, None) => None,
        }
    }

    pub fn has_user_script(&self) -> bool {
        self.newest().is_some()
    }

    /// Copy the stored script into `out`, returning its length.
    pub fn read_user_script(&self, out: &mut [u8]) -> BridgeResult<usize> {
        let (bank, header) = self
            .newest()
            .ok_or_else(|| BridgeError::StorageRead("no user script".into()))?;
        let len = header.len as usize;
        if len > out.len() {
            return Err(BridgeError::StorageRead(format!(
                "stored script is {len} bytes, buffer holds {}",
                out.len()
            )));
        }
        self.flash
            .read(bank, HEADER_LEN, &mut out[..len])
            .map_err(|e| BridgeError::StorageRead(e.to_string()))?;
        Ok(len)
    }

    pub fn write_user_script(&mut self, script: &[u8]) -> BridgeResult<()> {
        if script.len() > self.capacity() {
            return Err(BridgeError::StorageWrite(format!(
                "script is {} bytes, region holds {}",
                script.len(),
                self.capacity()
            )));
        }

        let newest = self.newest();
        let target = newest.map(|(bank, _)| bank.other()).unwrap_or(Bank::A);
        let mut sequence = newest.map(|(_, h)| h.sequence.wrapping_add(1)).unwrap_or(0);
        if sequence == ERASED_SEQUENCE {
            sequence = 0;
        }
        let header = Header {
            len: script.len() as u16,
            sequence,
        };

        let write_err = |e: std::io::Error| BridgeError::StorageWrite(e.to_string());
        self.flash.erase(target).map_err(write_err)?;
        self.flash
            .program(target, HEADER_LEN, script)
            .map_err(write_err)?;

        let mut readback = vec![0u8; script.len()];
        self.flash
            .read(target, HEADER_LEN, &mut readback)
            .map_err(write_err)?;
        if readback != script {
            return Err(BridgeError::StorageWrite("verify failed".into()));
        }

        self.flash
            .program(target, 0, &header.to_bytes())
            .map_err(write_err)?;
        log::info!(
            "[store] saved {} byte script to {target:?} (seq {sequence})",
            script.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::flash::{FileFlash, MemFlash};

    fn store() -> ScriptStore<MemFlash> {
        ScriptStore::new(MemFlash::new(1024 + HEADER_LEN))
    }

    fn read_all<F: Flash>(store: &ScriptStore<F>) -> Vec<u8> {
        let mut buf = vec![0u8; store.capacity()];
        let n = store.read_user_script(&mut buf).unwrap();
        buf.truncate(n);
        buf
    }

    #[test]
    fn erased_region_has_no_script() {
        let store = store();
        assert!(!store.has_user_script());
        let mut buf = [0u8; 16];
        assert!(matches!(
            store.read_user_script(&mut buf),
            Err(BridgeError::StorageRead(_))
        ));
    }

    #[test]
    fn write_then_read() {
        let mut store = store();
        store.write_user_script(b"print('hi')").unwrap();
        assert!(store.has_user_script());
        assert_eq!(read_all(&store), b"print('hi')");
    }

    #[test]
    fn empty_script_is_still_a_script() {
        let mut store = store();
        store.write_user_script(b"").unwrap();
        assert!(store.has_user_script());
        assert!(read_all(&store).is_empty());
    }

    #[test]
    fn newer_write_wins_and_alternates_banks() {
        let mut store = store();
        store.write_user_script(b"one").unwrap();
        store.write_user_script(b"two").unwrap();
        store.write_user_script(b"three").unwrap();
        assert_eq!(read_all(&store), b"three");
        // third write lands back in bank A
        assert_eq!(&store.flash().bank(Bank::A)[HEADER_LEN..HEADER_LEN + 5], b"three");
        assert_eq!(&store.flash().bank(Bank::B)[HEADER_LEN..HEADER_LEN + 3], b"two");
    }

    #[test]
    fn short_buffer_is_a_read_error() {
        let mut store = store();
        store.write_user_script(&[b'x'; 100]).unwrap();
        let mut buf = [0u8; 99];
        assert!(matches!(
            store.read_user_script(&mut buf),
            Err(BridgeError::StorageRead(_))
        ));
    }

    #[test]
    fn oversize_write_is_rejected() {
        let mut store = store();
        let big = vec![b'x'; store.capacity() + 1];
        assert!(matches!(
            store.write_user_script(&big),
            Err(BridgeError::StorageWrite(_))
        ));
        assert!(!store.has_user_script());
    }

    #[test]
    fn failed_body_write_keeps_previous_script() {
        let mut store = store();
        store.write_user_script(b"old script").unwrap();
        store.flash_mut().fail_programs_after(0);
        assert!(store.write_user_script(b"new script").is_err());
        store.flash_mut().clear_faults();
        assert_eq!(read_all(&store), b"old script");
    }

    #[test]
    fn failed_header_write_keeps_previous_script() {
        let mut store = store();
        store.write_user_script(b"old script").unwrap();
        // body program succeeds, header program fails
        store.flash_mut().fail_programs_after(1);
        assert!(store.write_user_script(b"new script").is_err());
        store.flash_mut().clear_faults();
        assert_eq!(read_all(&store), b"old script");
    }

    #[test]
    fn failed_first_write_leaves_no_script() {
        let mut store = store();
        store.flash_mut().fail_programs_after(0);
        assert!(store.write_user_script(b"first").is_err());
        assert!(!store.has_user_script());
    }

    #[test]
    fn sequence_wraps() {
        assert!(is_newer(0, u32::MAX - 1));
        assert!(is_newer(5, 4));
        assert!(!is_newer(4, 5));
    }

    #[test]
    fn survives_reopen_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.bin");
        {
            let mut store = ScriptStore::new(FileFlash::open(&path, 256).unwrap());
            store.write_user_script(b"output[1].volts = 3").unwrap();
        }
        let store = ScriptStore::new(FileFlash::open(&path, 256).unwrap());
        assert_eq!(read_all(&store), b"output[1].volts = 3");
    }
}
