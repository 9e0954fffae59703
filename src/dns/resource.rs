use bitstream_io::{BigEndian, BitRead, BitReader, BitWrite, BitWriter};
use std::net::{Ipv4Addr, Ipv6Addr};

use super::{
    ParseError,
    common::{PacketComponent, read_labels, write_labels},
    enums::{RecordClass, RecordType},
};

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum RData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Name(Vec<String>),
    Mx {
        preference: u16,
        exchange: Vec<String>,
    },
    Txt(Vec<Vec<u8>>),
    Soa {
        mname: Vec<String>,
        rname: Vec<String>,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minimum: u32,
    },
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: Vec<String>,
    },
    /// Anything the core doesn't need to inspect: carried byte-for-byte.
    Raw(Vec<u8>),
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DnsResourceRecord {
    pub labels: Vec<String>,
    pub rtype: RecordType,
    pub rclass: RecordClass,
    pub ttl: u32,
    pub rdata: RData,
}

impl DnsResourceRecord {
    pub fn a(labels: Vec<String>, ttl: u32, addr: Ipv4Addr) -> Self {
        Self {
            labels,
            rtype: RecordType::A,
            rclass: RecordClass::IN,
            ttl,
            rdata: RData::A(addr),
        }
    }

    pub fn aaaa(labels: Vec<String>, ttl: u32, addr: Ipv6Addr) -> Self {
        Self {
            labels,
            rtype: RecordType::AAAA,
            rclass: RecordClass::IN,
            ttl,
            rdata: RData::Aaaa(addr),
        }
    }
}

impl PacketComponent for DnsResourceRecord {
    fn write(&self, writer: &mut BitWriter<&mut Vec<u8>, BigEndian>) -> Result<(), ParseError> {
        write_labels(writer, &self.labels)?;
        writer.write_var::<u16>(16, self.rtype.into())?;
        writer.write_var::<u16>(16, self.rclass.into())?;
        writer.write_var::<u32>(32, self.ttl)?;

        let mut rdata_buf: Vec<u8> = Vec::new();
        {
            let mut rdata_writer: BitWriter<&mut Vec<u8>, BigEndian> =
                BitWriter::new(&mut rdata_buf);
            write_rdata(&mut rdata_writer, &self.rdata)?;
            rdata_writer.byte_align()?;
        }
        writer.write_var::<u16>(16, rdata_buf.len() as u16)?;
        writer.write_bytes(&rdata_buf)?;
        Ok(())
    }

    fn read(
        &mut self,
        reader: &mut BitReader<&[u8], BigEndian>,
        packet_buf: &[u8],
    ) -> Result<(), ParseError> {
        let labels = read_labels(reader, packet_buf)?;
        let rtype: RecordType = reader.read_var::<u16>(16)?.into();
        let rclass: RecordClass = reader.read_var::<u16>(16)?.into();
        let ttl = reader.read_var::<u32>(32)?;
        let rdlength = reader.read_var::<u16>(16)? as usize;

        let mut raw = vec![0u8; rdlength];
        reader.read_bytes(&mut raw)?;

        let rdata = parse_rdata(rtype, &raw, packet_buf)?;

        *self = DnsResourceRecord {
            labels,
            rtype,
            rclass,
            ttl,
            rdata,
        };
        Ok(())
    }
}

fn write_rdata(
    writer: &mut BitWriter<&mut Vec<u8>, BigEndian>,
    rdata: &RData,
) -> Result<(), ParseError> {
    match rdata {
        RData::A(addr) => {
            for octet in addr.octets() {
                writer.write_var::<u8>(8, octet)?;
            }
        }
        RData::Aaaa(addr) => {
            for octet in addr.octets() {
                writer.write_var::<u8>(8, octet)?;
            }
        }
        RData::Name(labels) => write_labels(writer, labels)?,
        RData::Mx {
            preference,
            exchange,
        } => {
            writer.write_var::<u16>(16, *preference)?;
            write_labels(writer, exchange)?;
        }
        RData::Txt(strings) => {
            for s in strings {
                writer.write_var::<u8>(8, s.len() as u8)?;
                writer.write_bytes(s)?;
            }
        }
        RData::Soa {
            mname,
            rname,
            serial,
            refresh,
            retry,
            expire,
            minimum,
        } => {
            write_labels(writer, mname)?;
            write_labels(writer, rname)?;
            writer.write_var::<u32>(32, *serial)?;
            writer.write_var::<u32>(32, *refresh)?;
            writer.write_var::<u32>(32, *retry)?;
            writer.write_var::<u32>(32, *expire)?;
            writer.write_var::<u32>(32, *minimum)?;
        }
        RData::Srv {
            priority,
            weight,
            port,
            target,
        } => {
            writer.write_var::<u16>(16, *priority)?;
            writer.write_var::<u16>(16, *weight)?;
            writer.write_var::<u16>(16, *port)?;
            write_labels(writer, target)?;
        }
        RData::Raw(bytes) => writer.write_bytes(bytes)?,
    }
    Ok(())
}

fn parse_rdata(rtype: RecordType, raw: &[u8], packet_buf: &[u8]) -> Result<RData, ParseError> {
    match rtype {
        RecordType::A => {
            if raw.len() != 4 {
                return Err(ParseError::InvalidRData);
            }
            Ok(RData::A(Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3])))
        }
        RecordType::AAAA => {
            if raw.len() != 16 {
                return Err(ParseError::InvalidRData);
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(raw);
            Ok(RData::Aaaa(Ipv6Addr::from(octets)))
        }
        RecordType::NS | RecordType::CNAME | RecordType::PTR => {
            let mut reader = BitReader::endian(raw, BigEndian);
            Ok(RData::Name(read_labels(&mut reader, packet_buf)?))
        }
        RecordType::MX => {
            let mut reader = BitReader::endian(raw, BigEndian);
            let preference = reader.read_var::<u16>(16)?;
            let exchange = read_labels(&mut reader, packet_buf)?;
            Ok(RData::Mx {
                preference,
                exchange,
            })
        }
        RecordType::TXT => {
            let mut strings = Vec::new();
            let mut pos = 0;
            while pos < raw.len() {
                let len = raw[pos] as usize;
                pos += 1;
                let end = (pos + len).min(raw.len());
                strings.push(raw[pos..end].to_vec());
                pos = end;
            }
            Ok(RData::Txt(strings))
        }
        RecordType::SOA => {
            let mut reader = BitReader::endian(raw, BigEndian);
            let mname = read_labels(&mut reader, packet_buf)?;
            let rname = read_labels(&mut reader, packet_buf)?;
            let serial = reader.read_var::<u32>(32)?;
            let refresh = reader.read_var::<u32>(32)?;
            let retry = reader.read_var::<u32>(32)?;
            let expire = reader.read_var::<u32>(32)?;
            let minimum = reader.read_var::<u32>(32)?;
            Ok(RData::Soa {
                mname,
                rname,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            })
        }
        RecordType::SRV => {
            let mut reader = BitReader::endian(raw, BigEndian);
            let priority = reader.read_var::<u16>(16)?;
            let weight = reader.read_var::<u16>(16)?;
            let port = reader.read_var::<u16>(16)?;
            let target = read_labels(&mut reader, packet_buf)?;
            Ok(RData::Srv {
                priority,
                weight,
                port,
                target,
            })
        }
        _ => Ok(RData::Raw(raw.to_vec())),
    }
}
