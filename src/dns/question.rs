use bitstream_io::{BigEndian, BitRead, BitReader, BitWrite, BitWriter};

use super::{
    ParseError,
    common::{PacketComponent, read_labels, write_labels},
    enums::{RecordClass, RecordType},
};

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DnsQuestion {
    pub labels: Vec<String>,
    pub qtype: RecordType,
    pub qclass: RecordClass,
}

impl DnsQuestion {
    pub fn name(&self) -> String {
        self.labels.join(".")
    }
}

impl PacketComponent for DnsQuestion {
    fn write(&self, writer: &mut BitWriter<&mut Vec<u8>, BigEndian>) -> Result<(), ParseError> {
        write_labels(writer, &self.labels)?;
        writer.write_var::<u16>(16, self.qtype.into())?;
        writer.write_var::<u16>(16, self.qclass.into())?;
        Ok(())
    }

    fn read(
        &mut self,
        reader: &mut BitReader<&[u8], BigEndian>,
        packet_buf: &[u8],
    ) -> Result<(), ParseError> {
        let labels = read_labels(reader, packet_buf)?;
        let qtype = reader.read_var::<u16>(16)?.into();
        let qclass = reader.read_var::<u16>(16)?.into();
        *self = DnsQuestion {
            labels,
            qtype,
            qclass,
        };
        Ok(())
    }
}
