use erasure_lrc::{Decoder, Error, Lrc, LrcBuf, LrcParam};
use rand::prelude::*;

const CHUNK_SIZE: usize = 16;

/// Snapshot every chunk of the stripe.
fn stripe(lrc: &Lrc) -> Vec<Vec<u8>> {
    (0..lrc.param().n()).map(|i| lrc.chunk(i).to_vec()).collect()
}

fn assert_stripe_eq(lrc: &Lrc, expected: &[Vec<u8>]) {
    for (i, chunk) in expected.iter().enumerate() {
        assert_eq!(lrc.chunk(i), &chunk[..], "chunk {i} differs");
    }
}

/// Fill the data chunks with the bytes 0x00.. in chunk order.
fn fill_sequential(lrc: &mut Lrc) {
    let k = lrc.param().k();
    let chunk_size = lrc.buf().chunk_size();
    for i in 0..k {
        for (j, b) in lrc.chunk_mut(i).iter_mut().enumerate() {
            *b = (i * chunk_size + j) as u8;
        }
    }
}

fn fill_random(lrc: &mut Lrc, rng: &mut impl Rng) {
    for i in 0..lrc.param().k() {
        rng.fill(lrc.chunk_mut(i));
    }
}

#[test]
fn trivial_encode() {
    let mut lrc = Lrc::new(&[2, 2], 2, CHUNK_SIZE).unwrap();
    fill_sequential(&mut lrc);
    lrc.encode().unwrap();

    // Chunk i holds bytes 16*i..16*i+16, so XOR within a group leaves 0x10
    // in every byte.
    assert!(lrc.chunk(4).iter().all(|&b| b == 0x10), "local parity 0");
    assert!(lrc.chunk(5).iter().all(|&b| b == 0x10), "local parity 1");
    // The first global row is all-ones: the XOR of every data chunk.
    let mut expected = vec![0u8; CHUNK_SIZE];
    for i in 0..4 {
        for (e, &b) in expected.iter_mut().zip(lrc.chunk(i)) {
            *e ^= b;
        }
    }
    assert_eq!(lrc.chunk(6), &expected[..], "first global parity");
}

#[test]
fn single_data_erasure_round_trip() {
    let mut lrc = Lrc::new(&[2, 2], 2, CHUNK_SIZE).unwrap();
    fill_sequential(&mut lrc);
    lrc.encode().unwrap();
    let original = stripe(&lrc);

    assert_eq!(lrc.get_source(&[1]).unwrap(), vec![0, 4]);
    lrc.chunk_mut(1).fill(0);
    lrc.decode(&[1]).unwrap();
    assert_stripe_eq(&lrc, &original);
}

#[test]
fn local_parity_erasure_round_trip() {
    let mut lrc = Lrc::new(&[2, 2], 2, CHUNK_SIZE).unwrap();
    fill_sequential(&mut lrc);
    lrc.encode().unwrap();
    let original = stripe(&lrc);

    assert_eq!(lrc.get_source(&[4]).unwrap(), vec![0, 1]);
    lrc.chunk_mut(4).fill(0);
    lrc.decode(&[4]).unwrap();
    assert_stripe_eq(&lrc, &original);
}

#[test]
fn mixed_group_failures_round_trip() {
    // Group 0 loses both data chunks and needs the global parities; group 1
    // still repairs its one loss locally.
    let mut lrc = Lrc::new(&[2, 2], 2, CHUNK_SIZE).unwrap();
    fill_sequential(&mut lrc);
    lrc.encode().unwrap();
    let original = stripe(&lrc);

    let erased = [0, 1, 2];
    let source = lrc.get_source(&erased).unwrap();
    for required in [3, 4, 5] {
        assert!(source.contains(&required), "missing source {required}");
    }
    assert!(source.iter().any(|&c| c >= 6));

    for &e in &erased {
        lrc.chunk_mut(e).fill(0);
    }
    lrc.decode(&erased).unwrap();
    assert_stripe_eq(&lrc, &original);
}

#[test]
fn unrecoverable_pattern() {
    let mut lrc = Lrc::new(&[2, 2], 1, CHUNK_SIZE).unwrap();
    fill_sequential(&mut lrc);
    lrc.encode().unwrap();

    // Two data chunks plus the local parity of group 0: two unknowns but
    // only the single global row to solve with.
    let err = lrc.decode(&[0, 1, 4]).unwrap_err();
    assert!(matches!(err, Error::Unrecoverable(_)), "got {err}");
}

#[test]
fn capacity_check() {
    // k = 250, L = 5, m = 2 -> 257 chunks: over the field capacity.
    assert!(matches!(
        Lrc::new(&[50; 5], 2, CHUNK_SIZE),
        Err(Error::InvalidM(_))
    ));
    // k = 240, L = 5, m = 10 -> 255 chunks: fits.
    assert!(Lrc::new(&[48; 5], 10, CHUNK_SIZE).is_ok());
}

#[test]
fn local_parity_is_group_xor() {
    let mut rng = rand::rng();
    let mut lrc = Lrc::new(&[3, 2], 2, 64).unwrap();
    fill_random(&mut lrc, &mut rng);
    lrc.encode().unwrap();

    for (i, group) in lrc.param().locals().iter().enumerate() {
        let mut expected = vec![0u8; 64];
        for c in group.start()..group.start() + group.len() {
            for (e, &b) in expected.iter_mut().zip(lrc.chunk(c)) {
                *e ^= b;
            }
        }
        assert_eq!(lrc.chunk(lrc.param().k() + i), &expected[..], "group {i}");
    }
}

#[test]
fn every_single_erasure_repairs() {
    let mut rng = rand::rng();
    let mut lrc = Lrc::new(&[3, 2], 2, 64).unwrap();
    fill_random(&mut lrc, &mut rng);
    lrc.encode().unwrap();
    let original = stripe(&lrc);
    let (k, n_local) = (lrc.param().k(), lrc.param().n_local());

    for e in 0..lrc.param().n() {
        // A failure inside a locality group must not consult other groups.
        if e < k + n_local {
            let group = if e < k {
                lrc.param()
                    .locals()
                    .iter()
                    .position(|g| (g.start()..g.start() + g.len()).contains(&e))
                    .unwrap()
            } else {
                e - k
            };
            let g = lrc.param().locals()[group];
            let mut members: Vec<usize> = (g.start()..g.start() + g.len()).collect();
            members.push(k + group);
            members.retain(|&c| c != e);
            assert_eq!(lrc.get_source(&[e]).unwrap(), members, "erasure {e}");
        }

        lrc.chunk_mut(e).fill(0);
        lrc.decode(&[e]).unwrap();
        assert_stripe_eq(&lrc, &original);
    }
}

#[test]
fn double_erasure_within_each_group_decodes() {
    let mut rng = rand::rng();
    let mut lrc = Lrc::new(&[3, 3], 2, 32).unwrap();
    fill_random(&mut lrc, &mut rng);
    lrc.encode().unwrap();
    let original = stripe(&lrc);

    for group in lrc.param().locals().to_vec() {
        let pairs = [
            [group.start(), group.start() + 1],
            [group.start() + 1, group.start() + 2],
        ];
        for erased in pairs {
            for &e in &erased {
                lrc.chunk_mut(e).fill(0);
            }
            lrc.decode(&erased).unwrap();
            assert_stripe_eq(&lrc, &original);
        }
    }
}

#[test]
fn one_erasure_per_group_plus_lost_globals_decodes() {
    // The worst all-local pattern: one loss in every group while every
    // global parity is gone too. Locals repair, globals re-encode.
    let mut rng = rand::rng();
    let mut lrc = Lrc::new(&[2, 3, 2], 2, 48).unwrap();
    fill_random(&mut lrc, &mut rng);
    lrc.encode().unwrap();
    let original = stripe(&lrc);
    let k = lrc.param().k();
    let n = lrc.param().n();

    let mut erased: Vec<usize> = lrc
        .param()
        .locals()
        .iter()
        .map(|g| g.start() + rng.random_range(0..g.len()))
        .collect();
    erased.extend(k + lrc.param().n_local()..n);

    for &e in &erased {
        lrc.chunk_mut(e).fill(0);
    }
    lrc.decode(&erased).unwrap();
    assert_stripe_eq(&lrc, &original);
}

#[test]
fn random_round_trips() {
    let mut rng = rand::rng();
    let configs: &[(&[usize], usize)] = &[
        (&[2, 2], 2),
        (&[3, 2], 2),
        (&[4, 4], 3),
        (&[2, 2, 2], 2),
    ];

    for &(local_sizes, m) in configs {
        let mut lrc = Lrc::new(local_sizes, m, 32).unwrap();
        let n = lrc.param().n();
        let max_erased = local_sizes.len() + m;
        let mut decoded = 0;

        for _ in 0..50 {
            fill_random(&mut lrc, &mut rng);
            lrc.encode().unwrap();
            let original = stripe(&lrc);

            let amount = rng.random_range(1..=max_erased);
            let erased = rand::seq::index::sample(&mut rng, n, amount).into_vec();
            for &e in &erased {
                lrc.chunk_mut(e).fill(0);
            }

            match lrc.decode(&erased) {
                Ok(()) => {
                    decoded += 1;
                    assert_stripe_eq(&lrc, &original);
                }
                Err(Error::Unrecoverable(_)) => {
                    // Beyond capacity; restore and move on.
                    for (i, chunk) in original.iter().enumerate() {
                        lrc.chunk_mut(i).copy_from_slice(chunk);
                    }
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert!(decoded > 0, "no decodable pattern for {local_sizes:?}");
    }
}

#[test]
fn decoder_exposes_its_source_set() {
    // Driving the decoder directly, the way callers with external buffers do.
    let param = LrcParam::new(&[2, 2], 2).unwrap();
    let mut buf = LrcBuf::new(&param, CHUNK_SIZE).unwrap();
    for i in 0..param.k() {
        buf.chunk_mut(i).fill(i as u8 + 1);
    }
    param.encode(&mut buf).unwrap();
    let expected = buf.chunk(1).to_vec();

    buf.chunk_mut(1).fill(0);
    let dec = Decoder::new(&param, &mut buf, &[1]).unwrap();
    assert_eq!(dec.source(), &[0, 4]);
    dec.decode();
    assert_eq!(buf.chunk(1), &expected[..]);
}

#[test]
fn unaligned_chunk_size_round_trip() {
    // 20-byte chunks pad to 32-byte windows; coding must only touch the
    // logical 20 bytes.
    let mut rng = rand::rng();
    let mut lrc = Lrc::new(&[2, 2], 2, 20).unwrap();
    assert_eq!(lrc.buf().aligned_chunk_size(), 32);
    fill_random(&mut lrc, &mut rng);
    lrc.encode().unwrap();
    let original = stripe(&lrc);

    for &e in &[2, 6] {
        lrc.chunk_mut(e).fill(0);
    }
    lrc.decode(&[2, 6]).unwrap();
    assert_stripe_eq(&lrc, &original);
}
