//! Locally repairable codes (LRC) on top of Reed-Solomon erasure coding over
//! GF(2^8).
//!
//! An LRC splits the `k` data chunks into `L` locality groups and extends a
//! standard Reed-Solomon code with one local parity per group, giving
//! `n = k + L + m` chunks total. The point of the local parities is repair
//! cost: any single failure inside a group is rebuilt from that group's
//! surviving chunks alone, while the `m` global parities cover multi-failure
//! patterns through a full GF(2^8) linear solve.
//!
//! The [`Lrc`] facade bundles the code parameters with an owning, 16-byte
//! aligned chunk buffer; [`lrc::LrcParam`] and [`buf::LrcBuf`] are also
//! usable separately when the caller manages buffers across several codes.
//!
//! ```rust
//! use erasure_lrc::Lrc;
//!
//! // 4 data chunks in two groups of 2, with 2 global parities.
//! let mut lrc = Lrc::new(&[2, 2], 2, 1024).unwrap();
//! for i in 0..4 {
//!     lrc.chunk_mut(i).fill(i as u8 + 1);
//! }
//! lrc.encode().unwrap();
//!
//! // Losing chunk 3 only consults its group: chunk 2 and local parity 5.
//! assert_eq!(lrc.get_source(&[3]).unwrap(), vec![2, 5]);
//! let original = lrc.chunk(3).to_vec();
//! lrc.chunk_mut(3).fill(0);
//! lrc.decode(&[3]).unwrap();
//! assert_eq!(lrc.chunk(3), &original[..]);
//! ```

pub mod buf;
pub mod gf;
pub mod lrc;

pub use buf::LrcBuf;
pub use lrc::{Decoder, Error, LocalGroup, Lrc, LrcParam};
