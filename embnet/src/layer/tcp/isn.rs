//! Initial sequence number generation, as recommended by RFC 6528.
//!
//! Uses a keyed cryptographic hash function (SipHash-2-4) instead of appending the secret key to
//! the four tuple for hashing. Hash function SipHash-2-4 from:
//!
//! > SipHash: a fast short-input PRF, Jean-Philippe Aumasson and Daniel J. Bernstein
use byteorder::{ByteOrder, LittleEndian};

use crate::time::Instant;
use crate::wire::TcpSeqNumber;

use super::FourTuple;

/// An initial sequence number generator based on SipHash-2-4.
///
/// > ISN = M + SipHash-2-4(secretkey, localip, localport, remoteip, remoteport)
///
/// where `M` is a timer ticking every 4 microseconds. The hash function already provides a setup
/// for keyed use, so the secret is not hashed as the last parameter but set up as the key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IsnGenerator {
    keys: (u64, u64),
}

/// The SipHash initialization, "somepseudorandomlygeneratedbytes" read as big endian words.
const IV: [u64; 4] = [
    0x736f_6d65_7073_6575,
    0x646f_7261_6e64_6f6d,
    0x6c79_6765_6e65_7261,
    0x7465_6462_7974_6573,
];

/// The four lanes of SipHash-2-4.
struct State([u64; 4]);

impl IsnGenerator {
    /// Create a generator with some pre-defined secret key.
    ///
    /// Really, create the key with some cryptographic random means or derive them from some other
    /// key with a key derivation function.
    pub fn from_secret_key_bytes(bytes: [u8; 16]) -> Self {
        let a = LittleEndian::read_u64(&bytes[..8]);
        let b = LittleEndian::read_u64(&bytes[8..]);
        IsnGenerator { keys: (a, b), }
    }

    /// Get the initial sequence number for a connection.
    ///
    /// The value advances by 250 every millisecond, or when the underlying secret key is updated.
    pub fn get_isn(&self, connection: FourTuple, time: Instant) -> TcpSeqNumber {
        let mut state = State::init(self.keys.0, self.keys.1);

        let m = u64::from(connection.local.to_network_integer())
            | u64::from(connection.remote.to_network_integer()) << 32;
        let p = u64::from(connection.local_port)
            | u64::from(connection.remote_port) << 16
            // Message length = 12
            | 12_u64 << 56;
        state.absorb(m);
        state.absorb(p);
        let hash = state.finalize() as u32;

        let ticks = (time.total_millis() as u32).wrapping_mul(250);
        TcpSeqNumber(hash.wrapping_add(ticks))
    }
}

impl State {
    const COMPRESSION_ROUNDS: usize = 2;
    const FINAL_ROUNDS: usize = 4;

    fn init(k0: u64, k1: u64) -> Self {
        State([IV[0] ^ k0, IV[1] ^ k1, IV[2] ^ k0, IV[3] ^ k1])
    }

    fn round(&mut self) {
        let [v0, v1, v2, v3] = &mut self.0;
        *v0 = v0.wrapping_add(*v1);
        *v2 = v2.wrapping_add(*v3);
        *v1 = v1.rotate_left(13) ^ *v0;
        *v3 = v3.rotate_left(16) ^ *v2;
        *v0 = v0.rotate_left(32);

        *v2 = v2.wrapping_add(*v1);
        *v0 = v0.wrapping_add(*v3);
        *v1 = v1.rotate_left(17) ^ *v2;
        *v3 = v3.rotate_left(21) ^ *v0;
        *v2 = v2.rotate_left(32);
    }

    /// Mix one little endian message word.
    ///
    /// The word carrying the message length must be the last one.
    fn absorb(&mut self, m: u64) {
        self.0[3] ^= m;
        for _ in 0..Self::COMPRESSION_ROUNDS {
            self.round();
        }
        self.0[0] ^= m;
    }

    fn finalize(mut self) -> u64 {
        self.0[2] ^= 0xff;
        for _ in 0..Self::FINAL_ROUNDS {
            self.round();
        }
        self.0.iter().fold(0, |acc, lane| acc ^ lane)
    }
}
