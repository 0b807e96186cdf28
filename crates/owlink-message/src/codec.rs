use bytes::{Buf, BufMut, Bytes, BytesMut};
use crc::{Crc, CRC_8_SMBUS};

use crate::error::{MessageError, Result};
use crate::message::*;

/// Start byte of every packed message.
pub const MESSAGE_STX: u8 = 0xFD;

/// STX + length + 2-byte message id.
pub const MESSAGE_HEADER_SIZE: usize = 4;

/// CRC-8 trailer.
pub const MESSAGE_TRAILER_SIZE: usize = 1;

/// Largest body the one-byte length field can describe.
pub const MAX_BODY: usize = u8::MAX as usize;

const CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);

/// Turns application messages into bytes and back.
///
/// Encoded messages may be larger than one link frame; the caller splits and
/// reassembles them, so `decode` works on a growing buffer and must tolerate
/// partial input.
pub trait MessageCodec: Send + Sync {
    /// Append the encoded form of `message` to `dst`.
    fn encode(&self, message: &Message, dst: &mut BytesMut) -> Result<()>;

    /// Decode one message from the front of `src`.
    ///
    /// Returns `Ok(None)` when more bytes are needed. On `Err`, at least one
    /// byte has been consumed so the caller can keep decoding.
    fn decode(&self, src: &mut BytesMut) -> Result<Option<Message>>;
}

/// Compact little-endian message encoding.
///
/// ```text
/// 0xFD | len | id (u16 LE) | body (len bytes) | crc8(len..body)
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct PackedCodec;

impl PackedCodec {
    pub fn new() -> Self {
        Self
    }
}

impl MessageCodec for PackedCodec {
    fn encode(&self, message: &Message, dst: &mut BytesMut) -> Result<()> {
        let id = message.id();
        let mut body = BytesMut::with_capacity(64);
        encode_body(message, &mut body)?;
        if body.len() > MAX_BODY {
            return Err(MessageError::BodyTooLarge {
                id,
                size: body.len(),
                max: MAX_BODY,
            });
        }

        let start = dst.len();
        dst.reserve(MESSAGE_HEADER_SIZE + body.len() + MESSAGE_TRAILER_SIZE);
        dst.put_u8(MESSAGE_STX);
        dst.put_u8(body.len() as u8);
        dst.put_u16_le(id);
        dst.extend_from_slice(&body);
        let crc = CRC8.checksum(&dst[start + 1..]);
        dst.put_u8(crc);
        Ok(())
    }

    fn decode(&self, src: &mut BytesMut) -> Result<Option<Message>> {
        let Some(start) = src.iter().position(|byte| *byte == MESSAGE_STX) else {
            src.clear();
            return Ok(None);
        };
        if start > 0 {
            tracing::debug!(skipped = start, "skipping bytes before message start");
            src.advance(start);
        }

        if src.len() < MESSAGE_HEADER_SIZE {
            return Ok(None);
        }

        let len = src[1] as usize;
        let total = MESSAGE_HEADER_SIZE + len + MESSAGE_TRAILER_SIZE;
        if src.len() < total {
            return Ok(None);
        }

        let expected = CRC8.checksum(&src[1..MESSAGE_HEADER_SIZE + len]);
        let actual = src[MESSAGE_HEADER_SIZE + len];
        if expected != actual {
            src.advance(1);
            return Err(MessageError::ChecksumMismatch { expected, actual });
        }

        let id = u16::from_le_bytes([src[2], src[3]]);
        let mut packet = src.split_to(total);
        packet.advance(MESSAGE_HEADER_SIZE);
        packet.truncate(len);
        decode_body(id, packet.freeze()).map(Some)
    }
}

fn encode_body(message: &Message, body: &mut BytesMut) -> Result<()> {
    match message {
        Message::Heartbeat(hb) => {
            body.put_u32_le(hb.custom_mode);
            body.put_u8(hb.kind);
            body.put_u8(hb.autopilot);
            body.put_u8(hb.base_mode);
            body.put_u8(hb.system_status);
            body.put_u8(hb.version);
        }
        Message::Attitude(att) => {
            body.put_u32_le(att.time_boot_ms);
            for value in [
                att.roll,
                att.pitch,
                att.yaw,
                att.rollspeed,
                att.pitchspeed,
                att.yawspeed,
            ] {
                body.put_f32_le(value);
            }
        }
        Message::GlobalPosition(pos) => {
            body.put_u32_le(pos.time_boot_ms);
            body.put_i32_le(pos.lat);
            body.put_i32_le(pos.lon);
            body.put_i32_le(pos.alt);
            body.put_i32_le(pos.relative_alt);
            body.put_i16_le(pos.vx);
            body.put_i16_le(pos.vy);
            body.put_i16_le(pos.vz);
            body.put_u16_le(pos.hdg);
        }
        Message::CommandLong(cmd) => {
            for param in cmd.params {
                body.put_f32_le(param);
            }
            body.put_u16_le(cmd.command);
            body.put_u8(cmd.target_system);
            body.put_u8(cmd.target_component);
            body.put_u8(cmd.confirmation);
        }
        Message::CommandAck(ack) => {
            body.put_u16_le(ack.command);
            body.put_u8(ack.result);
            if let Some(param2) = ack.result_param2 {
                body.put_i32_le(param2);
            }
        }
        Message::BatteryStatus(battery) => {
            body.put_u16_le(battery.voltage_mv);
            body.put_i16_le(battery.current_ca);
            body.put_i8(battery.remaining);
        }
        Message::AutopilotVersion(version) => {
            body.put_u64_le(version.capabilities);
            body.put_u32_le(version.flight_sw_version);
            body.put_u32_le(version.board_version);
            body.put_u64_le(version.uid);
        }
        Message::ExtendedSysState(state) => {
            body.put_u8(state.vtol_state);
            body.put_u8(state.landed_state);
        }
        Message::StatusText(status) => {
            let text = status.text.as_bytes();
            if text.len() > STATUSTEXT_MAX {
                return Err(MessageError::Malformed {
                    id: STATUSTEXT,
                    reason: format!("text is {} bytes, max {STATUSTEXT_MAX}", text.len()),
                });
            }
            body.put_u8(status.severity);
            body.extend_from_slice(text);
        }
        Message::PhotoInfo(info) => {
            body.put_u8(info.photo_id);
            body.put_u8(info.total);
        }
        Message::PhotoChunk(chunk) => {
            if chunk.data.len() != PHOTO_CHUNK_SIZE {
                return Err(MessageError::Malformed {
                    id: PHOTO_CHUNK,
                    reason: format!(
                        "chunk data is {} bytes, expected {PHOTO_CHUNK_SIZE}",
                        chunk.data.len()
                    ),
                });
            }
            body.put_u8(chunk.index);
            body.put_u8(chunk.photo_id);
            body.extend_from_slice(&chunk.data);
            body.put_u8(chunk.checksum);
        }
        Message::PhotoAck(ack) => {
            body.put_u8(ack.photo_id);
            body.put_u8(ack.result);
        }
        Message::Unknown { body: raw, .. } => body.extend_from_slice(raw),
    }
    Ok(())
}

fn decode_body(id: u16, mut body: Bytes) -> Result<Message> {
    let message = match id {
        HEARTBEAT => {
            expect_len(id, &body, 9)?;
            Message::Heartbeat(Heartbeat {
                custom_mode: body.get_u32_le(),
                kind: body.get_u8(),
                autopilot: body.get_u8(),
                base_mode: body.get_u8(),
                system_status: body.get_u8(),
                version: body.get_u8(),
            })
        }
        ATTITUDE => {
            expect_len(id, &body, 28)?;
            Message::Attitude(Attitude {
                time_boot_ms: body.get_u32_le(),
                roll: body.get_f32_le(),
                pitch: body.get_f32_le(),
                yaw: body.get_f32_le(),
                rollspeed: body.get_f32_le(),
                pitchspeed: body.get_f32_le(),
                yawspeed: body.get_f32_le(),
            })
        }
        GLOBAL_POSITION_INT => {
            expect_len(id, &body, 28)?;
            Message::GlobalPosition(GlobalPosition {
                time_boot_ms: body.get_u32_le(),
                lat: body.get_i32_le(),
                lon: body.get_i32_le(),
                alt: body.get_i32_le(),
                relative_alt: body.get_i32_le(),
                vx: body.get_i16_le(),
                vy: body.get_i16_le(),
                vz: body.get_i16_le(),
                hdg: body.get_u16_le(),
            })
        }
        COMMAND_LONG => {
            expect_len(id, &body, 33)?;
            let mut params = [0f32; 7];
            for param in &mut params {
                *param = body.get_f32_le();
            }
            Message::CommandLong(CommandLong {
                params,
                command: body.get_u16_le(),
                target_system: body.get_u8(),
                target_component: body.get_u8(),
                confirmation: body.get_u8(),
            })
        }
        COMMAND_ACK => {
            if body.len() != 3 && body.len() != 7 {
                return Err(malformed(id, &body, "3 or 7"));
            }
            Message::CommandAck(CommandAck {
                command: body.get_u16_le(),
                result: body.get_u8(),
                result_param2: (body.remaining() == 4).then(|| body.get_i32_le()),
            })
        }
        BATTERY_STATUS => {
            expect_len(id, &body, 5)?;
            Message::BatteryStatus(BatteryStatus {
                voltage_mv: body.get_u16_le(),
                current_ca: body.get_i16_le(),
                remaining: body.get_i8(),
            })
        }
        AUTOPILOT_VERSION => {
            expect_len(id, &body, 24)?;
            Message::AutopilotVersion(AutopilotVersion {
                capabilities: body.get_u64_le(),
                flight_sw_version: body.get_u32_le(),
                board_version: body.get_u32_le(),
                uid: body.get_u64_le(),
            })
        }
        EXTENDED_SYS_STATE => {
            expect_len(id, &body, 2)?;
            Message::ExtendedSysState(ExtendedSysState {
                vtol_state: body.get_u8(),
                landed_state: body.get_u8(),
            })
        }
        STATUSTEXT => {
            if body.is_empty() || body.len() > STATUSTEXT_MAX + 1 {
                return Err(malformed(id, &body, "1-51"));
            }
            let severity = body.get_u8();
            let text = String::from_utf8_lossy(&body)
                .trim_end_matches('\0')
                .to_string();
            Message::StatusText(StatusText { severity, text })
        }
        PHOTO_INFO => {
            expect_len(id, &body, 2)?;
            Message::PhotoInfo(PhotoInfo {
                photo_id: body.get_u8(),
                total: body.get_u8(),
            })
        }
        PHOTO_CHUNK => {
            expect_len(id, &body, PHOTO_CHUNK_SIZE + 3)?;
            let index = body.get_u8();
            let photo_id = body.get_u8();
            let data = body.split_to(PHOTO_CHUNK_SIZE);
            Message::PhotoChunk(PhotoChunk {
                index,
                photo_id,
                data,
                checksum: body.get_u8(),
            })
        }
        PHOTO_ACK => {
            expect_len(id, &body, 2)?;
            Message::PhotoAck(PhotoAck {
                photo_id: body.get_u8(),
                result: body.get_u8(),
            })
        }
        _ => Message::Unknown { id, body },
    };
    Ok(message)
}

fn expect_len(id: u16, body: &Bytes, len: usize) -> Result<()> {
    if body.len() == len {
        Ok(())
    } else {
        Err(malformed(id, body, &len.to_string()))
    }
}

fn malformed(id: u16, body: &Bytes, expected: &str) -> MessageError {
    MessageError::Malformed {
        id,
        reason: format!("body is {} bytes, expected {expected}", body.len()),
    }
}
