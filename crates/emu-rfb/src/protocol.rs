//! RFB wire format: handshake strings, pixel formats and messages.
//!
//! All multi-byte fields are big-endian, except pixel data, whose byte
//! order the client picks with `SetPixelFormat`.

use tokio::io::{AsyncRead, AsyncReadExt};

pub const VERSION_3_8: &[u8; 12] = b"RFB 003.008\n";

/// Security type None.
pub const SECURITY_NONE: u8 = 1;

pub const ENCODING_RAW: i32 = 0;
pub const ENCODING_DESKTOP_SIZE: i32 = -223;

/// Longest cut-text payload accepted before the session is dropped.
pub const MAX_CUT_TEXT: u32 = 1 << 20;

const MSG_SET_PIXEL_FORMAT: u8 = 0;
const MSG_SET_ENCODINGS: u8 = 2;
const MSG_FRAMEBUFFER_UPDATE_REQUEST: u8 = 3;
const MSG_KEY_EVENT: u8 = 4;
const MSG_POINTER_EVENT: u8 = 5;
const MSG_CLIENT_CUT_TEXT: u8 = 6;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("unsupported protocol version {0:?}")]
    Version(String),
    #[error("client chose unsupported security type {0}")]
    Security(u8),
    #[error("unsupported pixel format: {bits_per_pixel} bpp, true colour {true_colour}")]
    PixelFormat { bits_per_pixel: u8, true_colour: bool },
    #[error("unknown client message type {0}")]
    UnknownMessage(u8),
    #[error("cut text of {0} bytes is too long")]
    CutTextTooLong(u32),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Minor protocol version agreed with a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    V3_3,
    V3_7,
    V3_8,
}

impl Version {
    /// Parse a client's `ProtocolVersion` message. Unknown minor versions
    /// below 7 fall back to 3.3 and anything newer than 8 is treated as 3.8.
    pub fn parse(message: &[u8; 12]) -> Result<Self> {
        let invalid = || ProtocolError::Version(String::from_utf8_lossy(message).into_owned());
        if &message[..4] != b"RFB " || message[7] != b'.' || message[11] != b'\n' {
            return Err(invalid());
        }
        let number = |bytes: &[u8]| -> Option<u32> {
            std::str::from_utf8(bytes).ok()?.parse().ok()
        };
        let major = number(&message[4..7]).ok_or_else(invalid)?;
        let minor = number(&message[8..11]).ok_or_else(invalid)?;
        if major != 3 {
            return Err(invalid());
        }
        Ok(match minor {
            0..=6 => Self::V3_3,
            7 => Self::V3_7,
            _ => Self::V3_8,
        })
    }
}

/// Pixel layout for framebuffer updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    pub bits_per_pixel: u8,
    pub depth: u8,
    pub big_endian: bool,
    pub true_colour: bool,
    pub red_max: u16,
    pub green_max: u16,
    pub blue_max: u16,
    pub red_shift: u8,
    pub green_shift: u8,
    pub blue_shift: u8,
}

impl PixelFormat {
    /// The server's native format: 32 bpp little-endian `0x00RRGGBB`.
    pub const NATIVE: Self = Self {
        bits_per_pixel: 32,
        depth: 24,
        big_endian: false,
        true_colour: true,
        red_max: 255,
        green_max: 255,
        blue_max: 255,
        red_shift: 16,
        green_shift: 8,
        blue_shift: 0,
    };

    #[must_use]
    pub fn decode(bytes: &[u8; 16]) -> Self {
        Self {
            bits_per_pixel: bytes[0],
            depth: bytes[1],
            big_endian: bytes[2] != 0,
            true_colour: bytes[3] != 0,
            red_max: u16::from_be_bytes([bytes[4], bytes[5]]),
            green_max: u16::from_be_bytes([bytes[6], bytes[7]]),
            blue_max: u16::from_be_bytes([bytes[8], bytes[9]]),
            red_shift: bytes[10],
            green_shift: bytes[11],
            blue_shift: bytes[12],
        }
    }

    #[must_use]
    pub fn encode(&self) -> [u8; 16] {
        let mut out = [0; 16];
        out[0] = self.bits_per_pixel;
        out[1] = self.depth;
        out[2] = u8::from(self.big_endian);
        out[3] = u8::from(self.true_colour);
        out[4..6].copy_from_slice(&self.red_max.to_be_bytes());
        out[6..8].copy_from_slice(&self.green_max.to_be_bytes());
        out[8..10].copy_from_slice(&self.blue_max.to_be_bytes());
        out[10] = self.red_shift;
        out[11] = self.green_shift;
        out[12] = self.blue_shift;
        out
    }

    /// Only true-colour formats of 8, 16 or 32 bits are served.
    pub fn validate(&self) -> Result<()> {
        if self.true_colour && matches!(self.bits_per_pixel, 8 | 16 | 32) {
            Ok(())
        } else {
            Err(ProtocolError::PixelFormat {
                bits_per_pixel: self.bits_per_pixel,
                true_colour: self.true_colour,
            })
        }
    }

    #[must_use]
    pub fn bytes_per_pixel(&self) -> usize {
        usize::from(self.bits_per_pixel / 8)
    }

    /// Append one `0x00RRGGBB` pixel in this format.
    pub fn push_pixel(&self, rgb: u32, out: &mut Vec<u8>) {
        let scale = |channel: u32, max: u16| channel * u32::from(max) / 255;
        let r = scale((rgb >> 16) & 0xFF, self.red_max);
        let g = scale((rgb >> 8) & 0xFF, self.green_max);
        let b = scale(rgb & 0xFF, self.blue_max);
        let value = r.checked_shl(u32::from(self.red_shift)).unwrap_or(0)
            | g.checked_shl(u32::from(self.green_shift)).unwrap_or(0)
            | b.checked_shl(u32::from(self.blue_shift)).unwrap_or(0);

        match (self.bits_per_pixel, self.big_endian) {
            (8, _) => out.push(value as u8),
            (16, false) => out.extend_from_slice(&(value as u16).to_le_bytes()),
            (16, true) => out.extend_from_slice(&(value as u16).to_be_bytes()),
            (_, false) => out.extend_from_slice(&value.to_le_bytes()),
            (_, true) => out.extend_from_slice(&value.to_be_bytes()),
        }
    }
}

/// A decoded client-to-server message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    SetPixelFormat(PixelFormat),
    SetEncodings(Vec<i32>),
    FramebufferUpdateRequest {
        incremental: bool,
        x: u16,
        y: u16,
        width: u16,
        height: u16,
    },
    KeyEvent {
        down: bool,
        keysym: u32,
    },
    PointerEvent {
        buttons: u8,
        x: u16,
        y: u16,
    },
    CutText,
}

impl ClientMessage {
    /// Read the next message. Returns `Ok(None)` on a clean close before a
    /// message starts.
    pub async fn read<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Self>> {
        let mut kind = [0u8; 1];
        if reader.read(&mut kind).await? == 0 {
            return Ok(None);
        }
        let message = match kind[0] {
            MSG_SET_PIXEL_FORMAT => {
                let mut body = [0u8; 19];
                reader.read_exact(&mut body).await?;
                let mut format = [0u8; 16];
                format.copy_from_slice(&body[3..]);
                Self::SetPixelFormat(PixelFormat::decode(&format))
            }
            MSG_SET_ENCODINGS => {
                let mut header = [0u8; 3];
                reader.read_exact(&mut header).await?;
                let count = u16::from_be_bytes([header[1], header[2]]);
                let mut encodings = Vec::with_capacity(usize::from(count));
                for _ in 0..count {
                    encodings.push(reader.read_i32().await?);
                }
                Self::SetEncodings(encodings)
            }
            MSG_FRAMEBUFFER_UPDATE_REQUEST => {
                let mut body = [0u8; 9];
                reader.read_exact(&mut body).await?;
                let field = |i: usize| u16::from_be_bytes([body[i], body[i + 1]]);
                Self::FramebufferUpdateRequest {
                    incremental: body[0] != 0,
                    x: field(1),
                    y: field(3),
                    width: field(5),
                    height: field(7),
                }
            }
            MSG_KEY_EVENT => {
                let mut body = [0u8; 7];
                reader.read_exact(&mut body).await?;
                Self::KeyEvent {
                    down: body[0] != 0,
                    keysym: u32::from_be_bytes([body[3], body[4], body[5], body[6]]),
                }
            }
            MSG_POINTER_EVENT => {
                let mut body = [0u8; 5];
                reader.read_exact(&mut body).await?;
                Self::PointerEvent {
                    buttons: body[0],
                    x: u16::from_be_bytes([body[1], body[2]]),
                    y: u16::from_be_bytes([body[3], body[4]]),
                }
            }
            MSG_CLIENT_CUT_TEXT => {
                let mut header = [0u8; 7];
                reader.read_exact(&mut header).await?;
                let length = u32::from_be_bytes([header[3], header[4], header[5], header[6]]);
                if length > MAX_CUT_TEXT {
                    return Err(ProtocolError::CutTextTooLong(length));
                }
                let mut text = vec![0u8; length as usize];
                reader.read_exact(&mut text).await?;
                Self::CutText
            }
            other => return Err(ProtocolError::UnknownMessage(other)),
        };
        Ok(Some(message))
    }
}

/// `ServerInit`: frame size, pixel format and desktop name.
#[must_use]
pub fn server_init(width: u16, height: u16, format: &PixelFormat, name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(24 + name.len());
    out.extend_from_slice(&width.to_be_bytes());
    out.extend_from_slice(&height.to_be_bytes());
    out.extend_from_slice(&format.encode());
    out.extend_from_slice(&(name.len() as u32).to_be_bytes());
    out.extend_from_slice(name.as_bytes());
    out
}

/// Start a `FramebufferUpdate` message with `rectangles` rectangles.
pub fn update_header(rectangles: u16, out: &mut Vec<u8>) {
    out.push(0);
    out.push(0);
    out.extend_from_slice(&rectangles.to_be_bytes());
}

/// Rectangle header. Raw pixel data, if any, follows it.
pub fn rect_header(x: u16, y: u16, width: u16, height: u16, encoding: i32, out: &mut Vec<u8>) {
    out.extend_from_slice(&x.to_be_bytes());
    out.extend_from_slice(&y.to_be_bytes());
    out.extend_from_slice(&width.to_be_bytes());
    out.extend_from_slice(&height.to_be_bytes());
    out.extend_from_slice(&encoding.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_are_negotiated_down() {
        assert_eq!(Version::parse(b"RFB 003.003\n").expect("3.3"), Version::V3_3);
        assert_eq!(Version::parse(b"RFB 003.005\n").expect("3.5"), Version::V3_3);
        assert_eq!(Version::parse(b"RFB 003.007\n").expect("3.7"), Version::V3_7);
        assert_eq!(Version::parse(b"RFB 003.889\n").expect("3.889"), Version::V3_8);
        assert!(Version::parse(b"RFB 004.000\n").is_err());
        assert!(Version::parse(b"HTTP/1.1 200").is_err());
    }

    #[test]
    fn pixel_format_survives_the_wire() {
        let format = PixelFormat {
            big_endian: true,
            ..PixelFormat::NATIVE
        };
        assert_eq!(PixelFormat::decode(&format.encode()), format);
    }

    #[test]
    fn colour_map_formats_are_rejected() {
        let format = PixelFormat {
            bits_per_pixel: 8,
            true_colour: false,
            ..PixelFormat::NATIVE
        };
        assert!(matches!(
            format.validate(),
            Err(ProtocolError::PixelFormat { bits_per_pixel: 8, .. })
        ));
        assert!(PixelFormat::NATIVE.validate().is_ok());
    }

    #[test]
    fn pixels_are_scaled_and_shifted() {
        let mut out = Vec::new();
        PixelFormat::NATIVE.push_pixel(0x00FF_8000, &mut out);
        assert_eq!(out, [0x00, 0x80, 0xFF, 0x00]);

        // RGB565 big-endian.
        let rgb565 = PixelFormat {
            bits_per_pixel: 16,
            depth: 16,
            big_endian: true,
            true_colour: true,
            red_max: 31,
            green_max: 63,
            blue_max: 31,
            red_shift: 11,
            green_shift: 5,
            blue_shift: 0,
        };
        out.clear();
        rgb565.push_pixel(0x00FF_FFFF, &mut out);
        assert_eq!(out, [0xFF, 0xFF]);

        // BGR233.
        let bgr233 = PixelFormat {
            bits_per_pixel: 8,
            depth: 8,
            big_endian: false,
            true_colour: true,
            red_max: 7,
            green_max: 7,
            blue_max: 3,
            red_shift: 0,
            green_shift: 3,
            blue_shift: 6,
        };
        out.clear();
        bgr233.push_pixel(0x0000_00FF, &mut out);
        assert_eq!(out, [0xC0]);
    }

    #[tokio::test]
    async fn messages_are_decoded() {
        let mut bytes: &[u8] = &[
            3, 1, 0, 0, 0, 0, 0x02, 0x80, 0x01, 0x00, // update request
            4, 1, 0, 0, 0, 0, 0xFF, 0x0D, // key down Return
            5, 0x01, 0x00, 0x10, 0x00, 0x20, // pointer
            2, 0, 0, 2, 0, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0x21, // encodings
            6, 0, 0, 0, 0, 0, 0, 2, b'h', b'i', // cut text
        ];
        let mut messages = Vec::new();
        while let Some(message) = ClientMessage::read(&mut bytes).await.expect("decode") {
            messages.push(message);
        }
        assert_eq!(
            messages,
            vec![
                ClientMessage::FramebufferUpdateRequest {
                    incremental: true,
                    x: 0,
                    y: 0,
                    width: 640,
                    height: 256,
                },
                ClientMessage::KeyEvent {
                    down: true,
                    keysym: 0xFF0D,
                },
                ClientMessage::PointerEvent {
                    buttons: 1,
                    x: 16,
                    y: 32,
                },
                ClientMessage::SetEncodings(vec![ENCODING_RAW, ENCODING_DESKTOP_SIZE]),
                ClientMessage::CutText,
            ]
        );
    }

    #[tokio::test]
    async fn unknown_message_is_an_error() {
        let mut bytes: &[u8] = &[9];
        assert!(matches!(
            ClientMessage::read(&mut bytes).await,
            Err(ProtocolError::UnknownMessage(9))
        ));
    }
}
