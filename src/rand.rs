//! Jittered random primitives.
//!
//! Everywhere the protocol specifies uniform choice (subnet buckets, node
//! ids, selectors, broadcast slots, pauses) it goes through
//! [`Rng::bounded`]. The generator is a ChaCha stream cipher seeded by the
//! stack; tests reseed it to force collisions deterministically.

use rand_chacha::rand_core::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

pub(crate) struct Rng {
	inner: ChaCha20Rng,
}

impl Rng {
	pub fn from_seed(seed: [u8; 32]) -> Self {
		Self {
			inner: ChaCha20Rng::from_seed(seed),
		}
	}

	/// `offset + (r mod range)`; an empty range yields `offset`.
	pub fn bounded(&mut self, range: u32, offset: u32) -> u32 {
		if range == 0 {
			offset
		} else {
			offset + self.inner.next_u32() % range
		}
	}

	pub fn byte(&mut self) -> u8 {
		(self.inner.next_u32() & 0xff) as u8
	}
}
