//! Client log records: a fixed header plus the redo/undo client data.

use fntfs_error::{NtfsError, Result};
use fntfs_types::{
    Lsn, align8, ensure_slice, read_le_u16, read_le_u32, read_le_u64, write_le_u16, write_le_u32,
    write_le_u64,
};

use crate::op::LogOperation;

/// Log record header length.
pub const LOG_RECORD_HEADER_LEN: usize = 0x30;
/// Fixed part of the client data, before the LCN list.
pub const CLIENT_DATA_HEADER_LEN: usize = 0x20;

const RECORD_TYPE_CLIENT: u32 = 1;
const RECORD_TYPE_CLIENT_RESTART: u32 = 2;
/// The one client this engine writes for.
pub const NTFS_CLIENT_ID: u32 = 0;

/// One client record.
///
/// The page a record changes is addressed by `lcns` (the clusters the
/// page occupies, starting at `target_vcn`) and `cluster_block_offset`
/// (512-byte blocks into the first cluster). `record_offset` and
/// `attribute_offset` locate the change inside that page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Assigned on append.
    pub lsn: Lsn,
    pub client_previous_lsn: Lsn,
    pub client_undo_next_lsn: Lsn,
    pub transaction_id: u32,
    pub flags: u16,
    pub redo_op: LogOperation,
    pub undo_op: LogOperation,
    /// Index of the open attribute entry the page belongs to.
    pub target_attribute: u16,
    pub record_offset: u16,
    pub attribute_offset: u16,
    pub cluster_block_offset: u16,
    pub target_vcn: u64,
    pub lcns: Vec<u64>,
    pub redo_data: Vec<u8>,
    pub undo_data: Vec<u8>,
}

impl LogRecord {
    /// A record with no page target (boundary and dump records).
    #[must_use]
    pub const fn control(redo_op: LogOperation, redo_data: Vec<u8>) -> Self {
        Self {
            lsn: Lsn::ZERO,
            client_previous_lsn: Lsn::ZERO,
            client_undo_next_lsn: Lsn::ZERO,
            transaction_id: 0,
            flags: 0,
            redo_op,
            undo_op: LogOperation::Noop,
            target_attribute: 0,
            record_offset: 0,
            attribute_offset: 0,
            cluster_block_offset: 0,
            target_vcn: 0,
            lcns: Vec::new(),
            redo_data,
            undo_data: Vec::new(),
        }
    }

    /// A redo-only page update.
    #[must_use]
    pub fn page_update(
        redo_op: LogOperation,
        target_attribute: u16,
        target_vcn: u64,
        lcns: Vec<u64>,
        cluster_block_offset: u16,
        record_offset: u16,
        redo_data: Vec<u8>,
    ) -> Self {
        Self {
            target_attribute,
            target_vcn,
            lcns,
            cluster_block_offset,
            record_offset,
            ..Self::control(redo_op, redo_data)
        }
    }

    fn client_data_len(&self) -> usize {
        CLIENT_DATA_HEADER_LEN
            + 8 * self.lcns.len()
            + align8(self.redo_data.len())
            + align8(self.undo_data.len())
    }

    /// Bytes this record occupies in a log page.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        LOG_RECORD_HEADER_LEN + self.client_data_len()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let client_len = self.client_data_len();
        let mut out = vec![0_u8; LOG_RECORD_HEADER_LEN + client_len];
        write_le_u64(&mut out, 0x00, self.lsn.get())?;
        write_le_u64(&mut out, 0x08, self.client_previous_lsn.get())?;
        write_le_u64(&mut out, 0x10, self.client_undo_next_lsn.get())?;
        write_le_u32(&mut out, 0x18, to_u32(client_len, "client data")?)?;
        write_le_u32(&mut out, 0x1C, NTFS_CLIENT_ID)?;
        write_le_u32(&mut out, 0x20, RECORD_TYPE_CLIENT)?;
        write_le_u32(&mut out, 0x24, self.transaction_id)?;
        write_le_u16(&mut out, 0x28, self.flags)?;

        let body = LOG_RECORD_HEADER_LEN;
        let redo_offset = CLIENT_DATA_HEADER_LEN + 8 * self.lcns.len();
        let undo_offset = redo_offset + align8(self.redo_data.len());
        write_le_u16(&mut out, body, self.redo_op.code())?;
        write_le_u16(&mut out, body + 0x02, self.undo_op.code())?;
        write_le_u16(&mut out, body + 0x04, to_u16(redo_offset, "redo offset")?)?;
        write_le_u16(&mut out, body + 0x06, to_u16(self.redo_data.len(), "redo length")?)?;
        write_le_u16(&mut out, body + 0x08, to_u16(undo_offset, "undo offset")?)?;
        write_le_u16(&mut out, body + 0x0A, to_u16(self.undo_data.len(), "undo length")?)?;
        write_le_u16(&mut out, body + 0x0C, self.target_attribute)?;
        write_le_u16(&mut out, body + 0x0E, to_u16(self.lcns.len(), "lcn count")?)?;
        write_le_u16(&mut out, body + 0x10, self.record_offset)?;
        write_le_u16(&mut out, body + 0x12, self.attribute_offset)?;
        write_le_u16(&mut out, body + 0x14, self.cluster_block_offset)?;
        write_le_u64(&mut out, body + 0x18, self.target_vcn)?;
        for (i, lcn) in self.lcns.iter().enumerate() {
            write_le_u64(&mut out, body + CLIENT_DATA_HEADER_LEN + 8 * i, *lcn)?;
        }
        out[body + redo_offset..body + redo_offset + self.redo_data.len()]
            .copy_from_slice(&self.redo_data);
        out[body + undo_offset..body + undo_offset + self.undo_data.len()]
            .copy_from_slice(&self.undo_data);
        Ok(out)
    }

    /// Decode the record at the start of `data`. Returns the record and the
    /// bytes it occupies.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        let header = ensure_slice(data, 0, LOG_RECORD_HEADER_LEN)
            .map_err(|_| NtfsError::corrupt("log record", "truncated header"))?;
        let client_len = read_le_u32(header, 0x18)? as usize;
        let record_type = read_le_u32(header, 0x20)?;
        match record_type {
            RECORD_TYPE_CLIENT => {}
            RECORD_TYPE_CLIENT_RESTART => {
                return Err(NtfsError::unsupported("client restart log records"));
            }
            other => {
                return Err(NtfsError::corrupt(
                    "log record",
                    format!("record type {other}"),
                ));
            }
        }
        let total = LOG_RECORD_HEADER_LEN + client_len;
        let client = data
            .get(LOG_RECORD_HEADER_LEN..total)
            .ok_or_else(|| {
                NtfsError::corrupt(
                    "log record",
                    format!("client data of {client_len} bytes overruns page"),
                )
            })?;
        if client_len < CLIENT_DATA_HEADER_LEN || total % 8 != 0 {
            return Err(NtfsError::corrupt(
                "log record",
                format!("client data length {client_len}"),
            ));
        }

        let lcn_count = usize::from(read_le_u16(client, 0x0E)?);
        let lcns_end = CLIENT_DATA_HEADER_LEN + 8 * lcn_count;
        let mut lcns = Vec::with_capacity(lcn_count);
        for i in 0..lcn_count {
            lcns.push(read_le_u64(client, CLIENT_DATA_HEADER_LEN + 8 * i).map_err(|_| {
                NtfsError::corrupt("log record", "lcn list overruns client data")
            })?);
        }
        let redo_data = client_slice(client, read_le_u16(client, 0x04)?, read_le_u16(client, 0x06)?, lcns_end, "redo")?;
        let undo_data = client_slice(client, read_le_u16(client, 0x08)?, read_le_u16(client, 0x0A)?, lcns_end, "undo")?;

        let record = Self {
            lsn: Lsn(read_le_u64(header, 0x00)?),
            client_previous_lsn: Lsn(read_le_u64(header, 0x08)?),
            client_undo_next_lsn: Lsn(read_le_u64(header, 0x10)?),
            transaction_id: read_le_u32(header, 0x24)?,
            flags: read_le_u16(header, 0x28)?,
            redo_op: LogOperation::from_code(read_le_u16(client, 0x00)?)?,
            undo_op: LogOperation::from_code(read_le_u16(client, 0x02)?)?,
            target_attribute: read_le_u16(client, 0x0C)?,
            record_offset: read_le_u16(client, 0x10)?,
            attribute_offset: read_le_u16(client, 0x12)?,
            cluster_block_offset: read_le_u16(client, 0x14)?,
            target_vcn: read_le_u64(client, 0x18)?,
            lcns,
            redo_data,
            undo_data,
        };
        Ok((record, total))
    }
}

fn client_slice(
    client: &[u8],
    offset: u16,
    len: u16,
    min_offset: usize,
    what: &str,
) -> Result<Vec<u8>> {
    let (offset, len) = (usize::from(offset), usize::from(len));
    if len == 0 {
        return Ok(Vec::new());
    }
    if offset < min_offset {
        return Err(NtfsError::corrupt(
            "log record",
            format!("{what} data at {offset:#x} overlaps the lcn list"),
        ));
    }
    client
        .get(offset..offset + len)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| {
            NtfsError::corrupt(
                "log record",
                format!("{what} data {offset:#x}+{len} overruns client data"),
            )
        })
}

fn to_u16(value: usize, what: &str) -> Result<u16> {
    u16::try_from(value)
        .map_err(|_| NtfsError::unsupported(format!("log record {what} of {value} bytes")))
}

fn to_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| NtfsError::unsupported(format!("log record {what} of {value} bytes")))
}
