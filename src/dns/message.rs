use bitstream_io::{BigEndian, BitReader, BitWriter};

use super::{
    ParseError,
    common::PacketComponent,
    enums::RCode,
    header::DnsHeader,
    question::DnsQuestion,
    resource::DnsResourceRecord,
};

/// A parsed DNS message: header plus the four sections. This is the unit the
/// cache stores, the forwarder exchanges with upstreams, and the handler
/// writes back to the client.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DnsMessage {
    pub header: DnsHeader,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<DnsResourceRecord>,
    pub authorities: Vec<DnsResourceRecord>,
    pub additionals: Vec<DnsResourceRecord>,
}

impl DnsMessage {
    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        let mut reader = BitReader::endian(buf, BigEndian);
        let mut header = DnsHeader::default();
        header.read(&mut reader, buf)?;

        let mut questions = Vec::with_capacity(header.qdcount as usize);
        for _ in 0..header.qdcount {
            let mut q = DnsQuestion::default();
            q.read(&mut reader, buf)?;
            questions.push(q);
        }

        let answers = read_records(&mut reader, buf, header.ancount)?;
        let authorities = read_records(&mut reader, buf, header.nscount)?;
        let additionals = read_records(&mut reader, buf, header.arcount)?;

        Ok(DnsMessage {
            header,
            questions,
            answers,
            authorities,
            additionals,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ParseError> {
        let mut buf = Vec::with_capacity(512);
        {
            let mut writer: BitWriter<&mut Vec<u8>, BigEndian> = BitWriter::new(&mut buf);
            let mut header = self.header.clone();
            header.qdcount = self.questions.len() as u16;
            header.ancount = self.answers.len() as u16;
            header.nscount = self.authorities.len() as u16;
            header.arcount = self.additionals.len() as u16;
            header.write(&mut writer)?;
            for q in &self.questions {
                q.write(&mut writer)?;
            }
            for r in self
                .answers
                .iter()
                .chain(self.authorities.iter())
                .chain(self.additionals.iter())
            {
                r.write(&mut writer)?;
            }
            writer.byte_align()?;
        }
        Ok(buf)
    }

    pub fn first_question(&self) -> Option<&DnsQuestion> {
        self.questions.first()
    }

    pub fn set_id(&mut self, id: u16) {
        self.header.id = id;
    }

    pub fn truncated(&self) -> bool {
        self.header.tc
    }

    /// Build an empty reply to `request`, ready to have an rcode or answers
    /// attached.
    pub fn reply_to(request: &DnsMessage) -> Self {
        let mut header = DnsHeader {
            id: request.header.id,
            qr: true,
            opcode: request.header.opcode,
            rd: request.header.rd,
            ra: true,
            ..Default::default()
        };
        header.rcode = RCode::NoError.into();
        DnsMessage {
            header,
            questions: request.questions.clone(),
            answers: Vec::new(),
            authorities: Vec::new(),
            additionals: Vec::new(),
        }
    }

    pub fn set_rcode(&mut self, rcode: RCode) {
        self.header.rcode = rcode.into();
    }

    pub fn servfail(request: &DnsMessage) -> Self {
        let mut msg = Self::reply_to(request);
        msg.set_rcode(RCode::ServFail);
        msg
    }

    pub fn nxdomain(request: &DnsMessage) -> Self {
        let mut msg = Self::reply_to(request);
        msg.set_rcode(RCode::NxDomain);
        msg
    }

    /// The smallest TTL among the answer records, or `default` if there are
    /// none. Mirrors the "find the smallest TTL" step the forwarder result
    /// is cached with.
    pub fn min_answer_ttl(&self, default: u32) -> u32 {
        self.answers
            .iter()
            .map(|r| r.ttl)
            .filter(|ttl| *ttl > 0)
            .min()
            .unwrap_or(default)
    }
}

fn read_records(
    reader: &mut BitReader<&[u8], BigEndian>,
    packet_buf: &[u8],
    count: u16,
) -> Result<Vec<DnsResourceRecord>, ParseError> {
    let mut records = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let mut r = DnsResourceRecord {
            labels: Vec::new(),
            rtype: Default::default(),
            rclass: Default::default(),
            ttl: 0,
            rdata: super::resource::RData::Raw(Vec::new()),
        };
        r.read(reader, packet_buf)?;
        records.push(r);
    }
    Ok(records)
}
