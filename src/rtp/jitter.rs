//! Jitter buffer: a circular array of packet slots keyed by sequence
//! number. Slot `i` holds the packet whose sequence is `first_seq + i`
//! (modulo the pool size); an empty slot is a gap.

use tracing::debug;

use super::MAX_PACKET_SIZE;

/// Jitter buffer geometry and thresholds.
#[derive(Debug, Clone, Copy)]
pub struct JitterConfig {
    /// Slot count
    pub max_packet_count: u16,
    /// Pre-roll depth before delivery starts
    pub delay_packet_count: u16,
    /// Percentage of the pre-roll depth after which gaps are re-requested
    /// (capped at 80)
    pub resent_ratio: u8,
    /// Largest tolerated negative sequence delta before resync
    pub max_misorder: u16,
    /// Largest tolerated positive sequence delta before resync
    pub max_dropout: u16,
    /// Largest stored payload
    pub max_packet_size: usize,
    /// Initial anchor sequence (0 = pin on first packet)
    pub seq: u16,
    /// Initial anchor timestamp
    pub timestamp: u32,
    /// Pinned SSRC (0 = pin on first packet)
    pub ssrc: u32,
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            max_packet_count: 32,
            delay_packet_count: 16,
            resent_ratio: 10,
            max_misorder: 100,
            max_dropout: 3000,
            max_packet_size: MAX_PACKET_SIZE,
            seq: 0,
            timestamp: 0,
            ssrc: 0,
        }
    }
}

impl JitterConfig {
    pub(crate) fn is_valid(&self) -> bool {
        self.max_packet_count != 0
            && self.delay_packet_count <= self.max_packet_count
            && self.max_packet_size != 0
            && self.max_packet_size <= MAX_PACKET_SIZE
    }
}

/// Outcome of a [`JitterBuffer::get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitterGet {
    /// Payload bytes delivered
    Packet(usize),
    /// Gap that outlived the retransmit window
    Lost,
    /// Placeholder for a packet ejected by overflow
    Discarded,
    /// Still pre-rolling
    NoPacket,
}

struct Slot {
    buf: Box<[u8]>,
    len: usize,
}

pub(crate) struct JitterBuffer {
    slots: Vec<Slot>,
    ssrc: u32,
    first_seq: u16,
    #[allow(dead_code)] // Anchored for timing, not consumed yet
    first_ts: u32,
    first_packet: usize,
    packet_count: u16,
    resent_count: u16,
    filling: bool,
    discarded_count: u32,
    drop_count: u32,
    delay_packet_count: u16,
    resent_packet_count: u16,
    resent_ratio: u8,
    max_misorder: u16,
    max_dropout: u16,
}

fn resent_window(delay: u16, ratio: u8) -> u16 {
    let ratio = u16::from(ratio.min(80));
    delay * ratio / 100
}

impl JitterBuffer {
    pub(crate) fn new(config: JitterConfig) -> Self {
        let slots = (0..config.max_packet_count)
            .map(|_| Slot {
                buf: vec![0u8; config.max_packet_size].into_boxed_slice(),
                len: 0,
            })
            .collect();

        Self {
            slots,
            ssrc: config.ssrc,
            first_seq: config.seq,
            first_ts: config.timestamp,
            first_packet: 0,
            packet_count: 0,
            resent_count: 0,
            filling: true,
            discarded_count: 0,
            drop_count: 0,
            delay_packet_count: config.delay_packet_count,
            resent_packet_count: resent_window(config.delay_packet_count, config.resent_ratio),
            resent_ratio: config.resent_ratio,
            max_misorder: if config.max_misorder == 0 {
                100
            } else {
                config.max_misorder
            },
            max_dropout: if config.max_dropout == 0 {
                3000
            } else {
                config.max_dropout
            },
        }
    }

    pub(crate) fn set_delay_packets(&mut self, packets: u16) {
        let packets = packets.min(u16::try_from(self.slots.len()).unwrap_or(u16::MAX));
        self.delay_packet_count = packets;
        self.resent_packet_count = resent_window(packets, self.resent_ratio);
    }

    /// Consume one post-flush throwaway credit; the caller drops the packet
    /// when this returns true.
    pub(crate) fn take_drop_credit(&mut self) -> bool {
        if self.drop_count > 0 {
            self.drop_count -= 1;
            true
        } else {
            false
        }
    }

    fn pool(&self) -> u16 {
        u16::try_from(self.slots.len()).unwrap_or(u16::MAX)
    }

    /// Insert a raw RTP packet (header included). Returns the retransmit
    /// requests this insertion produced, as `(first_missing, count)` runs.
    pub(crate) fn put(&mut self, packet: &[u8]) -> Vec<(u16, u16)> {
        let mut requests = Vec::new();
        if packet.len() < 12 {
            return requests;
        }

        let seq = u16::from_be_bytes([packet[2], packet[3]]);
        let ts = u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]);
        let ssrc = u32::from_be_bytes([packet[8], packet[9], packet[10], packet[11]]);

        // An SSRC of zero never occurs on real sessions; the first one pins
        if self.ssrc == 0 {
            self.ssrc = ssrc;
            if self.first_seq == 0 {
                self.first_seq = seq;
            }
            if self.first_ts == 0 {
                self.first_ts = ts;
            }
        } else if self.ssrc != ssrc {
            return requests;
        }

        // Signed 16-bit delta handles wraparound
        #[allow(clippy::cast_possible_wrap)]
        let mut delta = i32::from(seq.wrapping_sub(self.first_seq) as i16);
        if (delta < 0 && -delta > i32::from(self.max_misorder))
            || (delta > 0 && delta > i32::from(self.max_dropout))
        {
            debug!(seq, delta, "sequence discontinuity, resynchronising");
            self.reset(seq, ts);
            delta = 0;
        }
        if delta < 0 {
            // Too late
            return requests;
        }
        #[allow(clippy::cast_sign_loss)]
        let mut delta = delta as u16;

        // Make room by ejecting the oldest slots
        while delta >= self.pool() {
            self.slots[self.first_packet].len = 0;
            self.first_packet = (self.first_packet + 1) % self.slots.len();
            self.first_seq = self.first_seq.wrapping_add(1);
            self.discarded_count += 1;
            if self.packet_count > 0 {
                self.packet_count -= 1;
                if self.packet_count == 0 {
                    self.filling = true;
                }
            }
            if self.resent_count > 0 {
                self.resent_count -= 1;
            }
            delta -= 1;
        }

        // Ask for retransmits of gaps old enough to be genuinely missing
        if delta >= self.resent_packet_count {
            self.check_resent(delta - self.resent_packet_count, &mut requests);
        }

        let i = (self.first_packet + usize::from(delta)) % self.slots.len();
        if self.slots[i].len != 0 {
            // Duplicate
            return requests;
        }

        let len = packet.len().min(self.slots[i].buf.len());
        self.slots[i].buf[..len].copy_from_slice(&packet[..len]);
        self.slots[i].len = len;

        if delta + 1 > self.packet_count {
            self.packet_count = delta + 1;
            if self.packet_count > self.delay_packet_count {
                self.filling = false;
            }
        }

        requests
    }

    /// Scan unfilled slots in `[resent_count, count)` of the window and
    /// coalesce contiguous gaps into request runs.
    fn check_resent(&mut self, count: u16, requests: &mut Vec<(u16, u16)>) {
        if self.resent_count >= count {
            return;
        }

        let mut i = (self.first_packet + usize::from(self.resent_count)) % self.slots.len();
        let mut seq = self.first_seq.wrapping_add(self.resent_count);
        let mut remaining = count - self.resent_count;
        let mut miss_seq = 0u16;
        let mut miss_count = 0u16;

        while remaining > 0 {
            if self.slots[i].len == 0 {
                if miss_count == 0 {
                    miss_seq = seq;
                }
                miss_count += 1;
            } else if miss_count > 0 {
                requests.push((miss_seq, miss_count));
                miss_count = 0;
            }

            seq = seq.wrapping_add(1);
            i = (i + 1) % self.slots.len();
            remaining -= 1;
            self.resent_count += 1;
        }

        if miss_count > 0 {
            requests.push((miss_seq, miss_count));
        }
    }

    /// Pop the oldest slot. Delivered packets are stripped of the RTP
    /// header, CSRC list and extension block.
    pub(crate) fn get(&mut self, out: &mut [u8]) -> JitterGet {
        if self.filling {
            return JitterGet::NoPacket;
        }

        if self.discarded_count > 0 {
            self.discarded_count -= 1;
            return JitterGet::Discarded;
        }

        let slot = self.first_packet;
        let len = self.slots[slot].len;
        let result = if len > 0 {
            let p = &self.slots[slot].buf[..len];
            let mut offset = 12 + usize::from(p[0] & 0x0F) * 4;
            if p[0] & 0x10 != 0 {
                offset += 4;
                if offset < len {
                    offset += usize::from(u16::from_be_bytes([p[offset - 2], p[offset - 1]]));
                }
            }
            if offset >= len {
                JitterGet::Packet(0)
            } else {
                let n = (len - offset).min(out.len());
                out[..n].copy_from_slice(&p[offset..offset + n]);
                JitterGet::Packet(n)
            }
        } else {
            JitterGet::Lost
        };

        self.packet_count = self.packet_count.saturating_sub(1);
        if self.packet_count == 0 {
            self.filling = true;
        }
        if self.resent_count > 0 {
            self.resent_count -= 1;
        }

        self.slots[slot].len = 0;
        self.first_seq = self.first_seq.wrapping_add(1);
        self.first_packet = (self.first_packet + 1) % self.slots.len();

        result
    }

    fn reset(&mut self, seq: u16, timestamp: u32) {
        for slot in &mut self.slots {
            slot.len = 0;
        }
        self.packet_count = 0;
        self.resent_count = 0;
        self.first_packet = 0;
        self.filling = true;
        self.first_seq = seq;
        self.first_ts = timestamp;

        if seq == 0 && timestamp == 0 {
            self.ssrc = 0;
        }
    }

    /// Flush. A non-zero `seq` re-anchors there and arms a throwaway
    /// credit for the packets that were in flight before the flush.
    pub(crate) fn flush(&mut self, seq: u16, timestamp: u32) {
        let in_flight = u32::from(self.packet_count);
        self.reset(seq, timestamp);
        if seq != 0 {
            self.drop_count = in_flight;
        }
    }
}
