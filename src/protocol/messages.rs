//! Big-endian wire framing for the write-chain and read protocols.
//!
//! Field layout grounded on
//! `examples/original_source/src/common/cltocs_communication.h` (exact
//! field order/sizes, including the 30-byte `WRITE_DATA` prefix:
//! `4+8+4+2+4+4+4`). Struct-level big-endian (de)serialization follows the
//! `endian_trait::Endian` idiom used in
//! `examples/wofferl-proxmox-backup/src/tape/drive/lto/sg_tape.rs`, applied
//! here through explicit `to_be_bytes`/`from_be_bytes` conversions instead
//! of a derive, since these frames mix fixed prefixes with variable-length
//! tails the derive can't express on its own.

use std::convert::TryInto;
use std::io::{self, Read, Write};
use std::net::{IpAddr, Ipv4Addr};

use crate::chunk::PartType;
use crate::error::StatusCode;

pub const WRITE_DATA_PREFIX_SIZE: usize = 4 + 8 + 4 + 2 + 4 + 4 + 4;

fn io_invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkAddress {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl NetworkAddress {
    pub fn to_socket_addr(self) -> std::net::SocketAddr {
        std::net::SocketAddr::new(IpAddr::V4(self.ip), self.port)
    }

    fn write_to(self, w: &mut impl Write) -> io::Result<()> {
        w.write_all(&u32::from(self.ip).to_be_bytes())?;
        w.write_all(&self.port.to_be_bytes())?;
        Ok(())
    }

    fn read_from(r: &mut impl Read) -> io::Result<Self> {
        let mut buf = [0u8; 4];
        r.read_exact(&mut buf)?;
        let ip = Ipv4Addr::from(u32::from_be_bytes(buf));
        let mut port_buf = [0u8; 2];
        r.read_exact(&mut port_buf)?;
        Ok(NetworkAddress { ip, port: u16::from_be_bytes(port_buf) })
    }
}

fn write_part_type(w: &mut impl Write, part_type: PartType) -> io::Result<()> {
    w.write_all(&part_type.to_wire_id().to_be_bytes())
}

fn read_part_type(r: &mut impl Read) -> io::Result<PartType> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    PartType::from_wire_id(u16::from_be_bytes(buf)).map_err(|e| io_invalid(e.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteInit {
    pub chunk_id: u64,
    pub version: u32,
    pub part_type: PartType,
    pub chain: Vec<NetworkAddress>,
}

impl WriteInit {
    pub fn write_to(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_all(&self.chunk_id.to_be_bytes())?;
        w.write_all(&self.version.to_be_bytes())?;
        write_part_type(w, self.part_type)?;
        w.write_all(&(self.chain.len() as u32).to_be_bytes())?;
        for addr in &self.chain {
            addr.write_to(w)?;
        }
        Ok(())
    }

    pub fn read_from(r: &mut impl Read) -> io::Result<Self> {
        let mut buf8 = [0u8; 8];
        r.read_exact(&mut buf8)?;
        let chunk_id = u64::from_be_bytes(buf8);
        let mut buf4 = [0u8; 4];
        r.read_exact(&mut buf4)?;
        let version = u32::from_be_bytes(buf4);
        let part_type = read_part_type(r)?;
        r.read_exact(&mut buf4)?;
        let count = u32::from_be_bytes(buf4);
        let mut chain = Vec::with_capacity(count as usize);
        for _ in 0..count {
            chain.push(NetworkAddress::read_from(r)?);
        }
        Ok(WriteInit { chunk_id, version, part_type, chain })
    }

    /// Returns the same init frame with the head of the chain stripped,
    /// used when forwarding to the next hop.
    pub fn without_head(&self) -> WriteInit {
        WriteInit {
            chunk_id: self.chunk_id,
            version: self.version,
            part_type: self.part_type,
            chain: self.chain.iter().skip(1).copied().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteData {
    pub version: u32,
    pub chunk_id: u64,
    pub write_id: u32,
    pub block: u16,
    pub offset: u32,
    pub size: u32,
    pub crc: u32,
    pub payload: Vec<u8>,
}

impl WriteData {
    pub fn write_to(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_all(&self.version.to_be_bytes())?;
        w.write_all(&self.chunk_id.to_be_bytes())?;
        w.write_all(&self.write_id.to_be_bytes())?;
        w.write_all(&self.block.to_be_bytes())?;
        w.write_all(&self.offset.to_be_bytes())?;
        w.write_all(&self.size.to_be_bytes())?;
        w.write_all(&self.crc.to_be_bytes())?;
        w.write_all(&self.payload)?;
        Ok(())
    }

    pub fn read_from(r: &mut impl Read) -> io::Result<Self> {
        let mut prefix = [0u8; WRITE_DATA_PREFIX_SIZE];
        r.read_exact(&mut prefix)?;
        let version = u32::from_be_bytes(prefix[0..4].try_into().unwrap());
        let chunk_id = u64::from_be_bytes(prefix[4..12].try_into().unwrap());
        let write_id = u32::from_be_bytes(prefix[12..16].try_into().unwrap());
        let block = u16::from_be_bytes(prefix[16..18].try_into().unwrap());
        let offset = u32::from_be_bytes(prefix[18..22].try_into().unwrap());
        let size = u32::from_be_bytes(prefix[22..26].try_into().unwrap());
        let crc = u32::from_be_bytes(prefix[26..30].try_into().unwrap());
        let mut payload = vec![0u8; size as usize];
        r.read_exact(&mut payload)?;
        Ok(WriteData { version, chunk_id, write_id, block, offset, size, crc, payload })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteEnd {
    pub chunk_id: u64,
}

impl WriteEnd {
    pub fn write_to(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_all(&self.chunk_id.to_be_bytes())
    }

    pub fn read_from(r: &mut impl Read) -> io::Result<Self> {
        let mut buf = [0u8; 8];
        r.read_exact(&mut buf)?;
        Ok(WriteEnd { chunk_id: u64::from_be_bytes(buf) })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteStatus {
    pub chunk_id: u64,
    pub part_type: PartType,
    pub status: StatusCode,
}

impl WriteStatus {
    pub fn write_to(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_all(&self.chunk_id.to_be_bytes())?;
        write_part_type(w, self.part_type)?;
        w.write_all(&[self.status.to_wire()])?;
        Ok(())
    }

    pub fn read_from(r: &mut impl Read) -> io::Result<Self> {
        let mut buf8 = [0u8; 8];
        r.read_exact(&mut buf8)?;
        let chunk_id = u64::from_be_bytes(buf8);
        let part_type = read_part_type(r)?;
        let mut status_buf = [0u8; 1];
        r.read_exact(&mut status_buf)?;
        Ok(WriteStatus { chunk_id, part_type, status: StatusCode::from_wire(status_buf[0]) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::XorPart;

    #[test]
    fn write_init_round_trips() {
        let init = WriteInit {
            chunk_id: 42,
            version: 5,
            part_type: PartType::Standard,
            chain: vec![
                NetworkAddress { ip: Ipv4Addr::new(10, 0, 0, 1), port: 9422 },
                NetworkAddress { ip: Ipv4Addr::new(10, 0, 0, 2), port: 9422 },
            ],
        };
        let mut buf = Vec::new();
        init.write_to(&mut buf).unwrap();
        let decoded = WriteInit::read_from(&mut &buf[..]).unwrap();
        assert_eq!(decoded, init);
    }

    #[test]
    fn write_data_prefix_is_exactly_30_bytes() {
        let frame = WriteData {
            version: 5,
            chunk_id: 42,
            write_id: 1,
            block: 0,
            offset: 0,
            size: 4,
            crc: 0x190A55AD,
            payload: vec![0, 0, 0, 0],
        };
        let mut buf = Vec::new();
        frame.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), WRITE_DATA_PREFIX_SIZE + 4);
        let decoded = WriteData::read_from(&mut &buf[..]).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn without_head_drops_first_chain_entry() {
        let init = WriteInit {
            chunk_id: 1,
            version: 1,
            part_type: PartType::Xor { level: 2, part: XorPart::Parity },
            chain: vec![
                NetworkAddress { ip: Ipv4Addr::new(1, 1, 1, 1), port: 1 },
                NetworkAddress { ip: Ipv4Addr::new(2, 2, 2, 2), port: 2 },
            ],
        };
        let forwarded = init.without_head();
        assert_eq!(forwarded.chain.len(), 1);
        assert_eq!(forwarded.chain[0].ip, Ipv4Addr::new(2, 2, 2, 2));
    }

    #[test]
    fn write_status_round_trips() {
        let status = WriteStatus { chunk_id: 7, part_type: PartType::Standard, status: StatusCode::NoSpace };
        let mut buf = Vec::new();
        status.write_to(&mut buf).unwrap();
        let decoded = WriteStatus::read_from(&mut &buf[..]).unwrap();
        assert_eq!(decoded, status);
    }
}
