//! basE91 text encoding, as used by the legacy web client.

const ALPHABET: &[u8; 91] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!#$%&()*+,./:;<=>?@[]^_`{|}~\"";

const fn decode_table() -> [i16; 256] {
    let mut table = [-1i16; 256];
    let mut i = 0;
    while i < ALPHABET.len() {
        table[ALPHABET[i] as usize] = i as i16;
        i += 1;
    }
    table
}

const DECODE: [i16; 256] = decode_table();

pub fn encode(input: &[u8]) -> String {
    let mut out = String::with_capacity(input.len() * 123 / 100 + 2);
    let mut bits: u32 = 0;
    let mut nbits: u32 = 0;

    for &byte in input {
        bits |= (byte as u32) << nbits;
        nbits += 8;
        if nbits > 13 {
            let mut value = bits & 8191;
            if value > 88 {
                bits >>= 13;
                nbits -= 13;
            } else {
                value = bits & 16383;
                bits >>= 14;
                nbits -= 14;
            }
            out.push(ALPHABET[(value % 91) as usize] as char);
            out.push(ALPHABET[(value / 91) as usize] as char);
        }
    }

    if nbits > 0 {
        out.push(ALPHABET[(bits % 91) as usize] as char);
        if nbits > 7 || bits > 90 {
            out.push(ALPHABET[(bits / 91) as usize] as char);
        }
    }

    out
}

/// Decode basE91 text. Characters outside the alphabet are skipped, which is
/// how the reference decoder treats line breaks and other noise.
pub fn decode(input: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() * 7 / 8);
    let mut pending: Option<u32> = None;
    let mut bits: u32 = 0;
    let mut nbits: u32 = 0;

    for byte in input.bytes() {
        let digit = DECODE[byte as usize];
        if digit < 0 {
            continue;
        }
        let digit = digit as u32;
        match pending.take() {
            None => pending = Some(digit),
            Some(low) => {
                let value = low + digit * 91;
                bits |= value << nbits;
                nbits += if value & 8191 > 88 { 13 } else { 14 };
                loop {
                    out.push((bits & 0xff) as u8);
                    bits >>= 8;
                    nbits -= 8;
                    if nbits <= 7 {
                        break;
                    }
                }
            }
        }
    }

    if let Some(low) = pending {
        out.push(((bits | low << nbits) & 0xff) as u8);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_vectors() {
        assert_eq!(encode(b"test"), "fPNKd");
        assert_eq!(encode(b"Hello, World!"), ">OwJh>}AQ;r@@Y?F");
        assert_eq!(decode(">OwJh>}AQ;r@@Y?F"), b"Hello, World!");
    }

    #[test]
    fn test_empty() {
        assert_eq!(encode(b""), "");
        assert!(decode("").is_empty());
    }

    #[test]
    fn test_binary_round_trip() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        assert_eq!(decode(&encode(&data)), data);
    }

    #[test]
    fn test_decode_skips_foreign_characters() {
        assert_eq!(decode("fPN\nKd "), b"test");
    }
}
