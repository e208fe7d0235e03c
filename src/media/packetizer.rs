use rtp::header::Header;
use rtp::sequence::Sequencer;
use util::marshal::{Marshal, MarshalSize};

use crate::error::{Error, Result};
use crate::media::clock::{rescale_timestamp, TRANSPORT_CLOCK_RATE};
use crate::rtp_transceiver::{PayloadType, SSRC};

/// Fixed RTP header size: no CSRCs, no header extensions.
pub const RTP_HEADER_SIZE: usize = 12;

/// Location of one marshaled packet inside the packet scratch buffer.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct PacketDescriptor {
    pub offset: usize,
    pub size: usize,
    /// Set on every packet of a keyframe.
    pub keyframe: bool,
    /// RTP marker bit, set on the last packet of a frame.
    pub marker: bool,
}

/// Packetizer fragments encoded frames into RTP packets of at most `mtu`
/// bytes, writing them back to back into a caller-owned buffer.
pub struct Packetizer {
    mtu: usize,
    payload_type: PayloadType,
    ssrc: SSRC,
    clock_rate: u32,
    timestamp_offset: u32,
    sequencer: Box<dyn Sequencer + Send + Sync>,
}

impl std::fmt::Debug for Packetizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packetizer")
            .field("mtu", &self.mtu)
            .field("payload_type", &self.payload_type)
            .field("ssrc", &self.ssrc)
            .field("clock_rate", &self.clock_rate)
            .finish()
    }
}

impl Packetizer {
    /// Creates a packetizer with a random initial sequence number and
    /// timestamp offset.
    pub fn new(
        mtu: usize,
        payload_type: PayloadType,
        ssrc: SSRC,
        clock_rate: u32,
    ) -> Result<Self> {
        Self::with_sequencer(
            mtu,
            payload_type,
            ssrc,
            clock_rate,
            rand::random::<u32>(),
            Box::new(rtp::sequence::new_random_sequencer()),
        )
    }

    pub fn with_sequencer(
        mtu: usize,
        payload_type: PayloadType,
        ssrc: SSRC,
        clock_rate: u32,
        timestamp_offset: u32,
        sequencer: Box<dyn Sequencer + Send + Sync>,
    ) -> Result<Self> {
        if mtu <= RTP_HEADER_SIZE {
            return Err(Error::ErrInvalidMtu(mtu));
        }
        Ok(Packetizer {
            mtu,
            payload_type,
            ssrc,
            clock_rate,
            timestamp_offset,
            sequencer,
        })
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Largest payload carried by a single packet.
    pub fn max_payload_size(&self) -> usize {
        self.mtu - RTP_HEADER_SIZE
    }

    /// Number of packets a payload of `len` bytes fragments into.
    pub fn packet_count(&self, len: usize) -> usize {
        len.div_ceil(self.max_payload_size())
    }

    /// Packet scratch size needed for a payload of up to `max_payload` bytes.
    pub fn buffer_size_for(&self, max_payload: usize) -> usize {
        self.packet_count(max_payload).max(1) * self.mtu
    }

    /// Largest payload that is guaranteed to fit a buffer of `buffer_len`.
    pub fn payload_capacity(&self, buffer_len: usize) -> usize {
        (buffer_len / self.mtu) * self.max_payload_size()
    }

    /// Converts a 90 kHz frame timestamp to this stream's RTP timestamp.
    pub fn rtp_timestamp(&self, timestamp: u64) -> u32 {
        let ticks = rescale_timestamp(timestamp, TRANSPORT_CLOCK_RATE, self.clock_rate);
        // RTP timestamps are modulo 2^32.
        self.timestamp_offset.wrapping_add(ticks as u32)
    }

    /// packetize writes the packets for one frame into `out` and describes
    /// them in `descriptors`, returning the packet count. Neither buffer is
    /// grown when it was sized with [`Packetizer::buffer_size_for`] and
    /// [`Packetizer::packet_count`].
    pub fn packetize(
        &mut self,
        payload: &[u8],
        timestamp: u64,
        keyframe: bool,
        out: &mut [u8],
        descriptors: &mut Vec<PacketDescriptor>,
    ) -> Result<usize> {
        descriptors.clear();
        if payload.is_empty() {
            return Ok(0);
        }

        let capacity = self.payload_capacity(out.len());
        if payload.len() > capacity {
            return Err(Error::ErrEncodedFrameTooLarge {
                size: payload.len(),
                capacity,
            });
        }

        let rtp_timestamp = self.rtp_timestamp(timestamp);
        let max_payload = self.max_payload_size();
        let count = self.packet_count(payload.len());
        let mut offset = 0;

        for (i, chunk) in payload.chunks(max_payload).enumerate() {
            let marker = i + 1 == count;
            let header = Header {
                version: 2,
                marker,
                payload_type: self.payload_type,
                sequence_number: self.sequencer.next_sequence_number(),
                timestamp: rtp_timestamp,
                ssrc: self.ssrc,
                ..Default::default()
            };

            let header_len = header.marshal_size();
            let size = header_len + chunk.len();
            let packet = &mut out[offset..offset + size];
            header.marshal_to(&mut packet[..header_len])?;
            packet[header_len..].copy_from_slice(chunk);

            descriptors.push(PacketDescriptor {
                offset,
                size,
                keyframe,
                marker,
            });
            offset += size;
        }

        Ok(count)
    }
}
