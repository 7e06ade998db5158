// Copyright (c) 2024 The TQUIC Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use bytes::Buf;
use bytes::BufMut;

use crate::error::Error;
use crate::Result;

/// The maximum value for QUIC variable-length integer encoding
/// See RFC 9000 Section 16
pub const VINT_MAX: u64 = 4_611_686_018_427_387_903;

/// Encoder for QUIC wire data
pub trait Encoder {
    /// Write an unsigned 8 bit integer to self.
    fn write_u8(&mut self, n: u8) -> Result<usize>;

    /// Write an unsigned 16 bit integer to self in big-endian byte order.
    fn write_u16(&mut self, n: u16) -> Result<usize>;

    /// Write an unsigned 32 bit integer to self in big-endian byte order.
    fn write_u32(&mut self, n: u32) -> Result<usize>;

    /// Write an unsigned 64 bit integer to self in the big-endian byte order.
    fn write_u64(&mut self, n: u64) -> Result<usize>;

    /// Write an unsigned 64 bit integer to self in QUIC variable length integer encoding.
    fn write_varint(&mut self, n: u64) -> Result<usize>;
}

/// Decoder for QUIC wire data
pub trait Decoder {
    /// Read an unsigned 8 bit integer from self.
    fn read_u8(&mut self) -> Result<u8>;

    /// Read an unsigned 16 bit integer from self in big-endian byte order.
    fn read_u16(&mut self) -> Result<u16>;

    /// Read an unsigned 32 bit integer from self in big-endian byte order.
    fn read_u32(&mut self) -> Result<u32>;

    /// Read an unsigned 64 bit integer from self in big-endian byte order.
    fn read_u64(&mut self) -> Result<u64>;

    /// Read an unsigned 64 bit integer from self in QUIC variable length integer encoding.
    fn read_varint(&mut self) -> Result<u64>;
}

impl Encoder for &mut [u8] {
    fn write_u8(&mut self, n: u8) -> Result<usize> {
        if self.remaining_mut() < 1 {
            return Err(Error::BufferTooShort);
        }
        self.put_u8(n);
        Ok(1)
    }

    fn write_u16(&mut self, n: u16) -> Result<usize> {
        if self.remaining_mut() < 2 {
            return Err(Error::BufferTooShort);
        }
        self.put_u16(n);
        Ok(2)
    }

    fn write_u32(&mut self, n: u32) -> Result<usize> {
        if self.remaining_mut() < 4 {
            return Err(Error::BufferTooShort);
        }
        self.put_u32(n);
        Ok(4)
    }

    fn write_u64(&mut self, n: u64) -> Result<usize> {
        if self.remaining_mut() < 8 {
            return Err(Error::BufferTooShort);
        }
        self.put_u64(n);
        Ok(8)
    }

    fn write_varint(&mut self, n: u64) -> Result<usize> {
        let len = encode_varint_len(n);
        if self.remaining_mut() < len {
            return Err(Error::BufferTooShort);
        }

        match len {
            1 => self.put_u8(n as u8),
            2 => self.put_u16(n as u16 | 0x4000),
            4 => self.put_u32(n as u32 | 0x8000_0000),
            8 => self.put_u64(n | 0xc000_0000_0000_0000),
            _ => unreachable!(),
        };

        Ok(len)
    }
}

impl Decoder for &[u8] {
    fn read_u8(&mut self) -> Result<u8> {
        if self.remaining() < 1 {
            return Err(Error::BufferTooShort);
        }
        Ok(self.get_u8())
    }

    fn read_u16(&mut self) -> Result<u16> {
        if self.remaining() < 2 {
            return Err(Error::BufferTooShort);
        }
        Ok(self.get_u16())
    }

    fn read_u32(&mut self) -> Result<u32> {
        if self.remaining() < 4 {
            return Err(Error::BufferTooShort);
        }
        Ok(self.get_u32())
    }

    fn read_u64(&mut self) -> Result<u64> {
        if self.remaining() < 8 {
            return Err(Error::BufferTooShort);
        }
        Ok(self.get_u64())
    }

    fn read_varint(&mut self) -> Result<u64> {
        if self.remaining() < 1 {
            return Err(Error::BufferTooShort);
        }
        let first = self[0];
        let len = decode_varint_len(first);
        if self.remaining() < len {
            return Err(Error::BufferTooShort);
        }

        let v = match len {
            1 => u64::from(self.read_u8()?),
            2 => u64::from(self.read_u16()? & 0x3fff),
            4 => u64::from(self.read_u32()? & 0x3fffffff),
            8 => self.read_u64()? & 0x3fffffffffffffff,
            _ => unreachable!(),
        };

        Ok(v)
    }
}

/// Return the length of a varint.
///
/// The QUIC variable-length integer encoding reserves the two most significant bits of the first
/// byte to encode the base-2 logarithm of the integer encoding length in bytes. The integer value
/// is encoded on the remaining bits, in network byte order.
pub fn decode_varint_len(first: u8) -> usize {
    match first >> 6 {
        0 => 1,
        1 => 2,
        2 => 4,
        3 => 8,
        _ => unreachable!(),
    }
}

/// Return the encoding length of an int using variable-length integer encoding.
///
/// See RFC 9000 Section 16 Table 4 Summary of Integer Encodings.
pub fn encode_varint_len(n: u64) -> usize {
    if n <= 63 {
        1
    } else if n <= 16383 {
        2
    } else if n <= 1_073_741_823 {
        4
    } else if n <= VINT_MAX {
        8
    } else {
        unreachable!()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;

    #[test]
    fn codec_uint() -> Result<()> {
        let mut buf = [0_u8; 32];
        let mut len = 0;

        let mut bw = &mut buf[..];
        len += bw.write_u8(0x01)?;
        len += bw.write_u16(0x0102)?;
        len += bw.write_u32(0x01020304)?;
        len += bw.write_u64(0x0102030405060708)?;
        let exp = [
            0x01_u8, // u8
            0x01, 0x02, // u16
            0x01, 0x02, 0x03, 0x04, // u32
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, // u64
        ];
        assert_eq!(len, exp.len());
        assert_eq!(buf[..len], exp);

        let mut br = &buf[..];
        assert_eq!(br.read_u8()?, 0x01);
        assert_eq!(br.read_u16()?, 0x0102);
        assert_eq!(br.read_u32()?, 0x01020304);
        assert_eq!(br.read_u64()?, 0x0102030405060708);
        Ok(())
    }

    #[test]
    fn codec_varint() -> Result<()> {
        let mut buf = [0_u8; 8];
        let data = [
            (
                151_288_809_941_952_652,
                vec![0xc2_u8, 0x19, 0x7c, 0x5e, 0xff, 0x14, 0xe8, 0x8c],
            ),
            (494_878_333, vec![0x9d_u8, 0x7f, 0x3e, 0x7d]),
            (15_293, vec![0x7b_u8, 0xbd]),
            (37, vec![0x25_u8]),
        ];

        for (n, b) in data.iter() {
            let mut br = &b[..];
            assert_eq!(br.read_varint()?, *n);

            let mut bw = &mut buf[..];
            let len = bw.write_varint(*n)?;
            assert_eq!(buf[..len], b[..]);
        }
        Ok(())
    }

    #[test]
    fn codec_short_buffer() {
        let mut buf = [0_u8; 1];
        let mut bw = &mut buf[..];
        assert_eq!(bw.write_u64(1), Err(Error::BufferTooShort));
        assert_eq!(bw.write_varint(16384), Err(Error::BufferTooShort));

        let mut br = &buf[..1];
        assert_eq!(br.read_u16(), Err(Error::BufferTooShort));

        let short = [0x7b_u8];
        let mut br = &short[..];
        assert_eq!(br.read_varint(), Err(Error::BufferTooShort));
    }
}
