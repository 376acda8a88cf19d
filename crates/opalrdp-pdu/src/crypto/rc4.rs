//! RC4 stream cipher.
//!
//! The key schedule runs once at construction; every [`Rc4::process`] call
//! advances the keystream, so an encrypt/decrypt pair only lines up when both
//! sides sit at the same stream position. No maintained crate ships bare RC4
//! anymore, and the legacy security layer needs exactly that.

#[derive(Clone)]
pub struct Rc4 {
    state: [u8; 256],
    i: u8,
    j: u8,
}

impl core::fmt::Debug for Rc4 {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // the internal state is key material
        f.debug_struct("Rc4").finish_non_exhaustive()
    }
}

impl Rc4 {
    pub fn new(key: &[u8]) -> Self {
        let mut state = [0u8; 256];
        for (slot, value) in state.iter_mut().zip(0..=255u8) {
            *slot = value;
        }

        let mut j = 0u8;
        for (i, key_byte) in (0..=255u8).zip(key.iter().cycle()) {
            j = j.wrapping_add(state[usize::from(i)]).wrapping_add(*key_byte);
            state.swap(usize::from(i), usize::from(j));
        }

        Self { state, i: 0, j: 0 }
    }

    /// XORs `input` with the next keystream bytes into a fresh buffer.
    pub fn process(&mut self, input: &[u8]) -> Vec<u8> {
        input.iter().map(|byte| byte ^ self.keystream_byte()).collect()
    }

    fn keystream_byte(&mut self) -> u8 {
        self.i = self.i.wrapping_add(1);
        self.j = self.j.wrapping_add(self.state[usize::from(self.i)]);
        self.state.swap(usize::from(self.i), usize::from(self.j));

        let a = self.state[usize::from(self.i)];
        let b = self.state[usize::from(self.j)];
        self.state[usize::from(a.wrapping_add(b))]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The classic published key/plaintext triples.
    #[rstest::rstest]
    #[case(b"Key".as_slice(), b"Plaintext".as_slice(), &[0xBB, 0xF3, 0x16, 0xE8, 0xD9, 0x40, 0xAF, 0x0A, 0xD3])]
    #[case(b"Wiki".as_slice(), b"pedia".as_slice(), &[0x10, 0x21, 0xBF, 0x04, 0x20])]
    #[case(
        b"Secret".as_slice(),
        b"Attack at dawn".as_slice(),
        &[0x45, 0xA0, 0x1F, 0x64, 0x5F, 0xC3, 0x5B, 0x38, 0x35, 0x52, 0x54, 0x4B, 0x9B, 0xF5]
    )]
    fn published_vectors(#[case] key: &[u8], #[case] plaintext: &[u8], #[case] ciphertext: &[u8]) {
        assert_eq!(Rc4::new(key).process(plaintext), ciphertext);
    }

    #[test]
    fn rfc6229_keystream_head() {
        // RFC 6229, 40-bit key 0x0102030405: first eight keystream bytes.
        let keystream = Rc4::new(&[0x01, 0x02, 0x03, 0x04, 0x05]).process(&[0; 8]);
        assert_eq!(keystream, [0xB2, 0x39, 0x63, 0x05, 0xF0, 0x3D, 0xC0, 0x29]);
    }

    #[test]
    fn keystream_is_continuous_across_calls() {
        let mut split = Rc4::new(b"Secret");
        let mut parts = split.process(b"Attack ");
        parts.extend(split.process(b"at dawn"));

        assert_eq!(parts, Rc4::new(b"Secret").process(b"Attack at dawn"));
    }

    #[test]
    fn symmetric_at_matched_positions() {
        let message = b"stream position matters";

        let ciphertext = Rc4::new(b"session key").process(message);
        assert_eq!(Rc4::new(b"session key").process(&ciphertext), message);
    }

    #[test]
    fn empty_input_consumes_nothing() {
        let mut cipher = Rc4::new(b"k");
        assert!(cipher.process(&[]).is_empty());
        assert_eq!(cipher.process(b"x"), Rc4::new(b"k").process(b"x"));
    }
}
