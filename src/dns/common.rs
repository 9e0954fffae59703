use bitstream_io::{BigEndian, BitRead, BitReader, BitWrite, BitWriter};

use super::ParseError;

/// Shared wire-format helpers for header/question/resource records.
///
/// Domain names on the wire may use compression pointers (RFC 1035 §4.1.4);
/// reading therefore needs access to the full packet buffer so a pointer can
/// be followed back to an earlier label sequence. Writing never emits
/// pointers: every name is written out in full. This keeps encoded packets
/// slightly larger than a fully-compressing implementation but keeps the
/// writer simple and always correct.
pub trait PacketComponent {
    fn write(&self, writer: &mut BitWriter<&mut Vec<u8>, BigEndian>) -> Result<(), ParseError>;

    fn read(
        &mut self,
        reader: &mut BitReader<&[u8], BigEndian>,
        packet_buf: &[u8],
    ) -> Result<(), ParseError>;
}

/// Read a domain name, following compression pointers against `packet_buf`.
pub fn read_labels(
    reader: &mut BitReader<&[u8], BigEndian>,
    packet_buf: &[u8],
) -> Result<Vec<String>, ParseError> {
    let mut labels = Vec::new();
    let mut jumps = 0u32;

    loop {
        let len = reader.read_var::<u8>(8)?;
        if len == 0 {
            break;
        }
        if (len & 0xC0) == 0xC0 {
            let second = reader.read_var::<u8>(8)?;
            let pointer = (((len & 0x3F) as usize) << 8) | second as usize;
            jumps += 1;
            if jumps > 64 {
                return Err(ParseError::InvalidLabel);
            }
            let mut tail = read_labels_at(packet_buf, pointer, jumps)?;
            labels.append(&mut tail);
            return Ok(labels);
        }
        if len > 63 {
            return Err(ParseError::InvalidLabel);
        }
        let mut buf = vec![0u8; len as usize];
        reader.read_bytes(&mut buf)?;
        labels.push(String::from_utf8(buf).map_err(|_| ParseError::InvalidLabel)?);
        jumps += 1;
        if jumps > 128 {
            return Err(ParseError::InvalidLabel);
        }
    }
    Ok(labels)
}

fn read_labels_at(
    packet_buf: &[u8],
    offset: usize,
    mut jumps: u32,
) -> Result<Vec<String>, ParseError> {
    let mut labels = Vec::new();
    let mut pos = offset;
    loop {
        let len = *packet_buf.get(pos).ok_or(ParseError::InvalidLabel)? as usize;
        if len == 0 {
            break;
        }
        if (len & 0xC0) == 0xC0 {
            let second = *packet_buf.get(pos + 1).ok_or(ParseError::InvalidLabel)? as usize;
            let pointer = ((len & 0x3F) << 8) | second;
            jumps += 1;
            if jumps > 64 {
                return Err(ParseError::InvalidLabel);
            }
            let mut tail = read_labels_at(packet_buf, pointer, jumps)?;
            labels.append(&mut tail);
            return Ok(labels);
        }
        if len > 63 {
            return Err(ParseError::InvalidLabel);
        }
        let start = pos + 1;
        let end = start + len;
        let slice = packet_buf.get(start..end).ok_or(ParseError::InvalidLabel)?;
        labels.push(String::from_utf8(slice.to_vec()).map_err(|_| ParseError::InvalidLabel)?);
        pos = end;
        jumps += 1;
        if jumps > 128 {
            return Err(ParseError::InvalidLabel);
        }
    }
    Ok(labels)
}

pub fn write_labels(
    writer: &mut BitWriter<&mut Vec<u8>, BigEndian>,
    labels: &[String],
) -> Result<(), ParseError> {
    for label in labels {
        if label.is_empty() {
            continue;
        }
        if label.len() > 63 {
            return Err(ParseError::InvalidLabel);
        }
        writer.write_var::<u8>(8, label.len() as u8)?;
        writer.write_bytes(label.as_bytes())?;
    }
    writer.write_var::<u8>(8, 0)?;
    Ok(())
}
