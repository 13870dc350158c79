// vim: tw=80
//! XOR parity primitives.
//!
//! Everything here is associative and commutative, so callers may combine
//! buffers in any order and parallelize parity accumulation across disks.
//! XOR is also self-inverse: accumulating the same buffer twice restores
//! the original contents.

/// Byte-wise XOR of `src` into `dst`.
pub fn bxor(dst: &mut [u8], src: &[u8]) {
    assert_eq!(dst.len(), src.len());
    for (d, s) in dst.iter_mut().zip(src.iter()) {
        *d ^= *s;
    }
}

/// Word-at-a-time XOR of `src` into `dst`.
///
/// Operates on machine-word-sized chunks, falling back to byte-wise XOR for
/// the unaligned tail.  Semantically identical to [`bxor`].
pub fn longword_bxor(dst: &mut [u8], src: &[u8]) {
    assert_eq!(dst.len(), src.len());
    const W: usize = std::mem::size_of::<u64>();
    for (d, s) in dst.chunks_exact_mut(W).zip(src.chunks_exact(W)) {
        let x = u64::from_ne_bytes(d[..].try_into().unwrap()) ^
                u64::from_ne_bytes(s[..].try_into().unwrap());
        d.copy_from_slice(&x.to_ne_bytes());
    }
    let tail = dst.len() - dst.len() % W;
    bxor(&mut dst[tail..], &src[tail..]);
}

/// Word-at-a-time 3-operand XOR: `dst = a ^ b`, overwriting `dst`.
pub fn longword_bxor3(dst: &mut [u8], a: &[u8], b: &[u8]) {
    assert_eq!(dst.len(), a.len());
    assert_eq!(dst.len(), b.len());
    const W: usize = std::mem::size_of::<u64>();
    let mut it = dst.chunks_exact_mut(W)
        .zip(a.chunks_exact(W).zip(b.chunks_exact(W)));
    for (d, (ca, cb)) in &mut it {
        let x = u64::from_ne_bytes(ca[..].try_into().unwrap()) ^
                u64::from_ne_bytes(cb[..].try_into().unwrap());
        d.copy_from_slice(&x.to_ne_bytes());
    }
    let tail = dst.len() - dst.len() % W;
    for i in tail..dst.len() {
        dst[i] = a[i] ^ b[i];
    }
}

/// Accumulate one physical block's contents into a running parity buffer.
///
/// This is the core primitive behind single-parity redundancy: the parity
/// block is the XOR-accumulation of every data block in the stripe, and any
/// one missing block is the XOR-accumulation of all the others plus parity.
pub fn xor_into_buffer(acc: &mut [u8], block: &[u8]) {
    longword_bxor(acc, block);
}

/// XOR algorithm selection.
///
/// Chosen once per array by
/// [`FuncTable::configure`](super::nodefn::FuncTable::configure); all node
/// functions dispatch through it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum XorAlgorithm {
    /// One byte at a time.  Always correct.
    Bytewise,
    /// One machine word at a time, byte-wise tail.
    Longword,
}

impl XorAlgorithm {
    pub fn xor_into(self, acc: &mut [u8], block: &[u8]) {
        match self {
            XorAlgorithm::Bytewise => bxor(acc, block),
            XorAlgorithm::Longword => longword_bxor(acc, block),
        }
    }
}

// LCOV_EXCL_STOP
