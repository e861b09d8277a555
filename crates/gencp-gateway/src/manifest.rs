//! Manifest table and file retrieval.
//!
//! The bootstrap register at `0x01D0` holds the address of the manifest
//! table. The table starts with a 64-bit entry count followed by 64-byte
//! entries, each describing one file stored in device memory together with
//! its SHA-1 digest.

use gencp_transport::Transport;
use serde::Serialize;
use sha1::{Digest, Sha1};
use tracing::{debug, info, warn};

use crate::bootstrap::MANIFEST_TABLE_ADDRESS;
use crate::client::DeviceClient;
use crate::error::{GatewayError, Result};

/// Size of one manifest entry on the wire.
pub const MANIFEST_ENTRY_SIZE: usize = 64;

/// Size of the entry count that precedes the entries.
const COUNT_SIZE: u64 = 8;

/// Most entries a manifest may list before it is treated as corrupt.
pub const MAX_MANIFEST_ENTRIES: u64 = 256;

/// File format of a manifest entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    Uncompressed,
    Zip,
    Other(u8),
}

impl SchemaType {
    fn from_bits(bits: u8) -> Self {
        match bits {
            0 => Self::Uncompressed,
            1 => Self::Zip,
            other => Self::Other(other),
        }
    }
}

/// One decoded manifest entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    pub file_version: u32,
    pub schema: u32,
    pub address: u64,
    pub size: u64,
    #[serde(serialize_with = "serialize_hex")]
    pub sha1: [u8; 20],
}

impl ManifestEntry {
    /// Decode a big-endian 64-byte entry.
    pub fn parse(raw: &[u8; MANIFEST_ENTRY_SIZE]) -> Self {
        let u32_at = |at: usize| {
            u32::from_be_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]])
        };
        let u64_at = |at: usize| {
            let mut word = [0u8; 8];
            word.copy_from_slice(&raw[at..at + 8]);
            u64::from_be_bytes(word)
        };
        let mut sha1 = [0u8; 20];
        sha1.copy_from_slice(&raw[24..44]);
        Self {
            file_version: u32_at(0),
            schema: u32_at(4),
            address: u64_at(8),
            size: u64_at(16),
            sha1,
        }
    }

    /// `(major, minor, subminor)` of the described file.
    pub fn file_version(&self) -> (u8, u8, u16) {
        (
            (self.file_version >> 24) as u8,
            (self.file_version >> 16) as u8,
            self.file_version as u16,
        )
    }

    /// `(major, minor)` of the description schema.
    pub fn schema_version(&self) -> (u8, u8) {
        ((self.schema >> 24) as u8, (self.schema >> 16) as u8)
    }

    pub fn schema_type(&self) -> SchemaType {
        SchemaType::from_bits(((self.schema >> 10) & 0x3F) as u8)
    }

    /// Lowercase hex form of the stored digest.
    pub fn sha1_hex(&self) -> String {
        hex::encode(self.sha1)
    }

    /// Whether the entry carries a digest at all. An all-zero field means
    /// the device does not publish one.
    pub fn has_digest(&self) -> bool {
        self.sha1.iter().any(|b| *b != 0)
    }
}

fn serialize_hex<S: serde::Serializer>(
    sha1: &[u8; 20],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(sha1))
}

/// A file downloaded through the manifest.
#[derive(Debug, Clone)]
pub struct RetrievedFile {
    pub entry: ManifestEntry,
    pub data: Vec<u8>,
    /// SHA-1 of `data`.
    pub digest: [u8; 20],
    /// `false` when the entry published a digest that `data` does not match.
    pub digest_ok: bool,
}

impl RetrievedFile {
    /// Lowercase hex form of the computed digest.
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest)
    }
}

/// Read the manifest table address from the bootstrap registers.
pub fn manifest_address<T: Transport>(client: &mut DeviceClient<T>) -> Result<u64> {
    client.read_register::<u64>(MANIFEST_TABLE_ADDRESS)
}

/// Read entry `index` of the table at `base`.
pub fn read_entry<T: Transport>(
    client: &mut DeviceClient<T>,
    base: u64,
    index: u64,
) -> Result<ManifestEntry> {
    let address = index
        .checked_mul(MANIFEST_ENTRY_SIZE as u64)
        .and_then(|offset| offset.checked_add(COUNT_SIZE))
        .and_then(|offset| base.checked_add(offset))
        .ok_or(GatewayError::AddressOverflow {
            address: base,
            len: COUNT_SIZE,
        })?;
    let bytes = client.read_memory(address, MANIFEST_ENTRY_SIZE)?;
    let mut raw = [0u8; MANIFEST_ENTRY_SIZE];
    raw.copy_from_slice(&bytes);
    Ok(ManifestEntry::parse(&raw))
}

/// Read the table address and its entry count.
fn manifest_header<T: Transport>(client: &mut DeviceClient<T>) -> Result<(u64, u64)> {
    let base = manifest_address(client)?;
    let count = client.read_register::<u64>(base)?;
    debug!(base, count, "read manifest header");
    if count > MAX_MANIFEST_ENTRIES {
        return Err(GatewayError::ManifestTooLarge {
            count,
            max: MAX_MANIFEST_ENTRIES,
        });
    }
    Ok((base, count))
}

/// List every manifest entry.
pub fn read_manifest<T: Transport>(client: &mut DeviceClient<T>) -> Result<Vec<ManifestEntry>> {
    let (base, count) = manifest_header(client)?;
    (0..count).map(|i| read_entry(client, base, i)).collect()
}

/// Download the file described by manifest entry `index`.
///
/// The file is read in packets of at most `max_payload` bytes. A digest
/// mismatch is logged and reported through [`RetrievedFile::digest_ok`];
/// the data is returned either way.
pub fn retrieve_file<T: Transport>(
    client: &mut DeviceClient<T>,
    index: usize,
) -> Result<RetrievedFile> {
    let (base, count) = manifest_header(client)?;
    if index as u64 >= count {
        return Err(GatewayError::NoSuchEntry { index, count });
    }

    let entry = read_entry(client, base, index as u64)?;
    let max = client.config().max_file_size;
    if entry.size > max {
        return Err(GatewayError::FileTooLarge {
            size: entry.size,
            max,
        });
    }

    let (major, minor, sub) = entry.file_version();
    info!(
        index,
        address = entry.address,
        size = entry.size,
        version = %format!("{major}.{minor}.{sub}"),
        "retrieving file"
    );
    let data = client.read_memory(entry.address, entry.size as usize)?;

    let digest: [u8; 20] = Sha1::digest(&data).into();
    let digest_ok = !entry.has_digest() || digest == entry.sha1;
    if !digest_ok {
        warn!(
            expected = %entry.sha1_hex(),
            computed = %hex::encode(digest),
            "file digest mismatch"
        );
    }

    Ok(RetrievedFile {
        entry,
        data,
        digest,
        digest_ok,
    })
}

#[cfg(test)]
mod tests {
    use gencp_packet::Status;

    use super::*;
    use crate::config::ClientConfig;
    use crate::device::{SimulatedDevice, DESCRIPTION_XML, FILE_BASE, MANIFEST_BASE};
    use crate::testing::Loopback;

    fn client(device: SimulatedDevice) -> DeviceClient<Loopback> {
        DeviceClient::new(Loopback::new(device))
    }

    #[test]
    fn parse_entry_fields() {
        let mut raw = [0u8; MANIFEST_ENTRY_SIZE];
        raw[0..4].copy_from_slice(&0x0102_0003u32.to_be_bytes());
        raw[4..8].copy_from_slice(&(0x0301_0000u32 | (1 << 10)).to_be_bytes());
        raw[8..16].copy_from_slice(&0x2000u64.to_be_bytes());
        raw[16..24].copy_from_slice(&150u64.to_be_bytes());
        raw[24] = 0xAB;
        raw[43] = 0xCD;
        raw[44..].fill(0xEE);

        let entry = ManifestEntry::parse(&raw);
        assert_eq!(entry.file_version(), (1, 2, 3));
        assert_eq!(entry.schema_version(), (3, 1));
        assert_eq!(entry.schema_type(), SchemaType::Zip);
        assert_eq!(entry.address, 0x2000);
        assert_eq!(entry.size, 150);
        assert!(entry.sha1_hex().starts_with("ab"));
        assert!(entry.sha1_hex().ends_with("cd"));
    }

    #[test]
    fn unknown_schema_type_is_kept() {
        let mut raw = [0u8; MANIFEST_ENTRY_SIZE];
        raw[4..8].copy_from_slice(&(5u32 << 10).to_be_bytes());
        assert_eq!(ManifestEntry::parse(&raw).schema_type(), SchemaType::Other(5));
    }

    #[test]
    fn lists_simulated_manifest() {
        let mut c = client(SimulatedDevice::new());
        let entries = read_manifest(&mut c).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].address, FILE_BASE);
        assert_eq!(entries[0].size, DESCRIPTION_XML.len() as u64);
        assert_eq!(entries[0].schema_type(), SchemaType::Uncompressed);
    }

    #[test]
    fn retrieves_file_in_packets() {
        let mut c = client(SimulatedDevice::new());
        let file = retrieve_file(&mut c, 0).unwrap();
        assert_eq!(file.data, DESCRIPTION_XML.as_bytes());
        assert!(file.digest_ok);
        assert_eq!(file.digest, file.entry.sha1);

        // Bootstrap pointer, count, entry (one packet), then the file.
        let packets = DESCRIPTION_XML.len().div_ceil(64);
        assert_eq!(c.get_ref().requests, 3 + packets);
    }

    #[test]
    fn digest_mismatch_still_returns_data() {
        let mut device = SimulatedDevice::new();
        device.poke(FILE_BASE, b"<");
        device.poke(FILE_BASE + 1, b"!");
        let mut c = client(device);
        let file = retrieve_file(&mut c, 0).unwrap();
        assert!(!file.digest_ok);
        assert_eq!(&file.data[..2], b"<!");
    }

    #[test]
    fn zero_digest_is_not_checked() {
        let mut device = SimulatedDevice::new();
        device.poke(MANIFEST_BASE + 8 + 24, &[0u8; 20]);
        let mut c = client(device);
        assert!(retrieve_file(&mut c, 0).unwrap().digest_ok);
    }

    #[test]
    fn missing_entry_is_rejected() {
        let mut c = client(SimulatedDevice::new());
        let err = retrieve_file(&mut c, 1).unwrap_err();
        assert!(matches!(err, GatewayError::NoSuchEntry { index: 1, count: 1 }));
    }

    #[test]
    fn size_limit_is_enforced_before_download() {
        let config = ClientConfig {
            max_file_size: 16,
            ..ClientConfig::default()
        };
        let mut c = DeviceClient::with_config(Loopback::new(SimulatedDevice::new()), config);
        let err = retrieve_file(&mut c, 0).unwrap_err();
        assert!(matches!(err, GatewayError::FileTooLarge { max: 16, .. }));
        assert_eq!(c.get_ref().requests, 3);
    }

    #[test]
    fn entry_address_near_top_of_memory_is_refused() {
        let mut device = SimulatedDevice::new();
        let entry = MANIFEST_BASE + COUNT_SIZE;
        device.poke(entry + 8, &(u64::MAX - 10).to_be_bytes());
        device.poke(entry + 16, &100u64.to_be_bytes());
        let mut c = client(device);

        let err = retrieve_file(&mut c, 0).unwrap_err();
        assert!(matches!(err, GatewayError::AddressOverflow { len: 100, .. }));
        assert_eq!(err.status(), Status::InvalidAddress);
        // Pointer, count and entry; no file packets.
        assert_eq!(c.get_ref().requests, 3);
    }

    #[test]
    fn table_base_near_top_of_memory_is_refused() {
        let mut c = client(SimulatedDevice::new());
        let err = read_entry(&mut c, u64::MAX - 4, 0).unwrap_err();
        assert!(matches!(err, GatewayError::AddressOverflow { .. }));
        let err = read_entry(&mut c, MANIFEST_BASE, u64::MAX / 2).unwrap_err();
        assert!(matches!(err, GatewayError::AddressOverflow { .. }));
        assert_eq!(c.get_ref().requests, 0);
    }

    #[test]
    fn corrupt_entry_count_is_refused() {
        let mut device = SimulatedDevice::new();
        device.poke(MANIFEST_BASE, &u64::MAX.to_be_bytes());
        let mut c = client(device);

        let err = read_manifest(&mut c).unwrap_err();
        assert!(matches!(
            err,
            GatewayError::ManifestTooLarge {
                count: u64::MAX,
                max: MAX_MANIFEST_ENTRIES
            }
        ));
        assert_eq!(c.get_ref().requests, 2);
        assert!(matches!(
            retrieve_file(&mut c, 0),
            Err(GatewayError::ManifestTooLarge { .. })
        ));
    }

    #[test]
    fn zip_entries_are_flagged() {
        let mut device = SimulatedDevice::new();
        assert!(device.install_file(b"PK\x03\x04not-really-a-zip", 1));
        let mut c = client(device);
        let file = retrieve_file(&mut c, 0).unwrap();
        assert_eq!(file.entry.schema_type(), SchemaType::Zip);
        assert!(file.digest_ok);
    }
}
