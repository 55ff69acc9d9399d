//! Keyed initial sequence numbers after RFC 6528.
//!
//! The pseudorandom function is SipHash-2-4 (Aumasson and Bernstein, "SipHash: a fast
//! short-input PRF"), keyed with the engine secret.
use super::table::FourTuple;
use crate::time::Tick;
use crate::wire::{IpAddress, TcpSeqNumber};

/// Sequence clock increment per tick.
///
/// RFC 6528 suggests one per 4 microseconds, a tick lasts 200 milliseconds.
const ISN_PER_TICK: u32 = 50_000;

/// Two addresses of up to 16 octets and two ports.
const MAX_MESSAGE: usize = 36;

/// Computes `ISN = M + F(localip, localport, remoteip, remoteport, secretkey)`.
///
/// `M` is the engine clock scaled by `ISN_PER_TICK` and `F` is SipHash-2-4 under the secret. The
/// same function also picks the starting point of the ephemeral port search.
#[derive(Clone, Debug)]
pub struct IsnGenerator {
    key: [u64; 2],
}

impl IsnGenerator {
    /// Key the generator with the process wide random hasher seed.
    ///
    /// Two fresh hashers of the same `RandomState` hash distinct constants, their outputs form
    /// the key.
    #[cfg(feature = "std")]
    pub fn from_std_hash() -> Self {
        use std::collections::hash_map::RandomState;
        use std::hash::{BuildHasher, Hasher};

        let state = RandomState::new();
        let derive = |label: u64| {
            let mut hasher = state.build_hasher();
            hasher.write_u64(label);
            hasher.finish()
        };
        IsnGenerator { key: [derive(0), derive(1)] }
    }

    /// Key the generator with 16 secret octets.
    ///
    /// These should come from a cryptographic random source or a key derivation function.
    pub fn from_secret_key_bytes(bytes: [u8; 16]) -> Self {
        IsnGenerator { key: [read_le(&bytes[..8]), read_le(&bytes[8..])] }
    }

    /// The initial sequence number of `connection` at time `now`.
    ///
    /// An unspecified address hashes as `0.0.0.0`.
    pub fn get_isn(&self, connection: FourTuple, now: Tick) -> TcpSeqNumber {
        let offset = self.hash(connection) as u32;
        let clock = now.value().wrapping_mul(ISN_PER_TICK);
        TcpSeqNumber::from(offset.wrapping_add(clock))
    }

    /// A keyed pseudorandom starting point for the ephemeral port search.
    pub fn port_offset(&self, local: IpAddress, remote: IpAddress) -> u16 {
        let hash = self.hash(FourTuple {
            local,
            local_port: 0,
            remote,
            remote_port: 0,
        });
        (hash >> 48) as u16
    }

    fn hash(&self, connection: FourTuple) -> u64 {
        let mut message = [0u8; MAX_MESSAGE];
        let mut len = 0;
        let local_port = connection.local_port.to_be_bytes();
        let remote_port = connection.remote_port.to_be_bytes();
        let parts: [&[u8]; 4] = [
            address_octets(&connection.local),
            &local_port,
            address_octets(&connection.remote),
            &remote_port,
        ];
        for part in parts.iter() {
            message[len..len + part.len()].copy_from_slice(part);
            len += part.len();
        }
        siphash24(self.key, &message[..len])
    }
}

fn address_octets(addr: &IpAddress) -> &[u8] {
    match addr {
        IpAddress::Unspecified => &[0u8; 4],
        concrete => concrete.as_bytes(),
    }
}

fn read_le(bytes: &[u8]) -> u64 {
    let mut word = [0u8; 8];
    word[..bytes.len()].copy_from_slice(bytes);
    u64::from_le_bytes(word)
}

/// The four state words, initialized from "somepseudorandomlygeneratedbytes".
struct Sip([u64; 4]);

impl Sip {
    fn new([k0, k1]: [u64; 2]) -> Self {
        Sip([
            k0 ^ 0x736f_6d65_7073_6575,
            k1 ^ 0x646f_7261_6e64_6f6d,
            k0 ^ 0x6c79_6765_6e65_7261,
            k1 ^ 0x7465_6462_7974_6573,
        ])
    }

    fn rounds(&mut self, count: usize) {
        let [v0, v1, v2, v3] = &mut self.0;
        for _ in 0..count {
            *v0 = v0.wrapping_add(*v1);
            *v1 = v1.rotate_left(13) ^ *v0;
            *v0 = v0.rotate_left(32);
            *v2 = v2.wrapping_add(*v3);
            *v3 = v3.rotate_left(16) ^ *v2;
            *v0 = v0.wrapping_add(*v3);
            *v3 = v3.rotate_left(21) ^ *v0;
            *v2 = v2.wrapping_add(*v1);
            *v1 = v1.rotate_left(17) ^ *v2;
            *v2 = v2.rotate_left(32);
        }
    }

    fn compress(&mut self, block: u64) {
        self.0[3] ^= block;
        self.rounds(2);
        self.0[0] ^= block;
    }

    fn finish(mut self) -> u64 {
        self.0[2] ^= 0xff;
        self.rounds(4);
        self.0.iter().fold(0, |acc, word| acc ^ word)
    }
}

/// SipHash-2-4 of `data`, the last block carrying the length in its top octet.
fn siphash24(key: [u64; 2], data: &[u8]) -> u64 {
    let mut sip = Sip::new(key);
    let mut blocks = data.chunks_exact(8);
    for block in &mut blocks {
        sip.compress(read_le(block));
    }
    let tail = read_le(blocks.remainder()) | (data.len() as u64) << 56;
    sip.compress(tail);
    sip.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Ipv6Address;

    fn reference_key() -> [u64; 2] {
        let mut bytes = [0u8; 16];
        bytes.iter_mut().enumerate().for_each(|(i, b)| *b = i as u8);
        IsnGenerator::from_secret_key_bytes(bytes).key
    }

    #[test]
    fn reference_vectors() {
        let message: [u8; 15] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14];
        // Appendix A of the paper.
        assert_eq!(siphash24(reference_key(), &message), 0xa129_ca61_49be_45e5);
        // First entry of the reference implementation's vectors.
        assert_eq!(siphash24(reference_key(), &[]), 0x726f_db47_dd0e_0e31);
    }

    fn tuple(local: IpAddress, port: u16) -> FourTuple {
        FourTuple {
            local,
            local_port: port,
            remote: IpAddress::v4(10, 0, 0, 2),
            remote_port: 80,
        }
    }

    #[test]
    fn isn_advances_with_clock() {
        let isn = IsnGenerator::from_secret_key_bytes([7; 16]);
        let here = IpAddress::v4(10, 0, 0, 1);
        let first = isn.get_isn(tuple(here, 1000), Tick(0));
        let later = isn.get_isn(tuple(here, 1000), Tick(3));
        assert_eq!(later.diff(first), 3 * ISN_PER_TICK as i32);
        assert_ne!(isn.get_isn(tuple(here, 1001), Tick(0)), first);
    }

    #[test]
    fn key_and_family_matter() {
        let a = IsnGenerator::from_secret_key_bytes([1; 16]);
        let b = IsnGenerator::from_secret_key_bytes([2; 16]);
        let here = IpAddress::v4(10, 0, 0, 1);
        assert_ne!(a.get_isn(tuple(here, 1000), Tick(0)), b.get_isn(tuple(here, 1000), Tick(0)));

        let mapped = IpAddress::Ipv6(Ipv6Address::new(0, 0, 0, 0, 0, 0xffff, 0x0a00, 0x0001));
        assert_ne!(a.get_isn(tuple(here, 1000), Tick(0)), a.get_isn(tuple(mapped, 1000), Tick(0)));

        let unspecified = tuple(IpAddress::Unspecified, 1000);
        let zero = tuple(IpAddress::v4(0, 0, 0, 0), 1000);
        assert_eq!(a.get_isn(unspecified, Tick(5)), a.get_isn(zero, Tick(5)));
    }
}
