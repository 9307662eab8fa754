//! X authority cookie and Xauthority file encoding
//!
//! Records are written in the binary Xauthority format:
//! `family:u16 | len:u16 address | len:u16 number | len:u16 name | len:u16 data`,
//! all integers big-endian.

use rand::RngCore;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use super::error::Result;

/// Authorization protocol name
pub const MIT_MAGIC_COOKIE: &str = "MIT-MAGIC-COOKIE-1";

const FAMILY_LOCAL: u16 = 256;
const FAMILY_WILD: u16 = 65535;

/// 128-bit MIT-MAGIC-COOKIE-1 secret
#[derive(Clone, PartialEq, Eq)]
pub struct Cookie([u8; 16]);

impl Cookie {
    /// Fresh random cookie
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Lower-case hex form, as `xauth add` expects
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl std::fmt::Debug for Cookie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Cookie(..)")
    }
}

fn push_field(out: &mut Vec<u8>, field: &[u8]) {
    out.extend_from_slice(&(field.len() as u16).to_be_bytes());
    out.extend_from_slice(field);
}

fn push_record(out: &mut Vec<u8>, family: u16, address: &[u8], number: &str, cookie: &Cookie) {
    out.extend_from_slice(&family.to_be_bytes());
    push_field(out, address);
    push_field(out, number.as_bytes());
    push_field(out, MIT_MAGIC_COOKIE.as_bytes());
    push_field(out, cookie.as_bytes());
}

/// Encode the records granting `cookie` access to display `number`
///
/// One record for the local host name and a wildcard record, so clients
/// resolving the host differently still find the cookie.
pub fn encode(hostname: &str, number: &str, cookie: &Cookie) -> Vec<u8> {
    let mut out = Vec::with_capacity(128);
    push_record(&mut out, FAMILY_LOCAL, hostname.as_bytes(), number, cookie);
    push_record(&mut out, FAMILY_WILD, b"", number, cookie);
    out
}

/// Encoded records for this host
pub fn encode_for_host(number: &str, cookie: &Cookie) -> Vec<u8> {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string());
    encode(&host, number, cookie)
}

/// Write an authority file readable only by its owner
pub fn write_file(path: &Path, records: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(records)?;
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookies_are_random() {
        assert_ne!(Cookie::generate(), Cookie::generate());
        assert_eq!(Cookie::generate().to_hex().len(), 32);
    }

    #[test]
    fn test_record_layout() {
        let cookie = Cookie::from_bytes([0xab; 16]);
        let data = encode("box", "0", &cookie);

        // family local
        assert_eq!(&data[0..2], &[0x01, 0x00]);
        // address
        assert_eq!(&data[2..4], &[0x00, 0x03]);
        assert_eq!(&data[4..7], b"box");
        // display number
        assert_eq!(&data[7..9], &[0x00, 0x01]);
        assert_eq!(&data[9..10], b"0");
        // protocol name
        assert_eq!(&data[10..12], &[0x00, 18]);
        assert_eq!(&data[12..30], MIT_MAGIC_COOKIE.as_bytes());
        // cookie
        assert_eq!(&data[30..32], &[0x00, 16]);
        assert_eq!(&data[32..48], &[0xab; 16]);
        // wildcard record follows
        assert_eq!(&data[48..50], &[0xff, 0xff]);
        assert_eq!(data.len(), 48 + 2 + 2 + 2 + 1 + 2 + 18 + 2 + 16);
    }

    #[test]
    fn test_write_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("auth/gould.auth");
        write_file(&path, &encode("box", "0", &Cookie::generate())).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
