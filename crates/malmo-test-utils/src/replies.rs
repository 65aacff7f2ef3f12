//! Canned reply payloads in the backend's wire encoding (network byte order).

use malmo_core::types::FrameGeometry;

/// 4-byte status / port reply.
pub fn status(value: u32) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

/// 1-byte done flag of a peek reply.
pub fn done_flag(done: bool) -> Vec<u8> {
    vec![u8::from(done)]
}

/// 10-byte step reply: `f64` reward, `u8` done, `u8` sent.
pub fn step(reward: f64, done: bool, sent: u8) -> Vec<u8> {
    let mut buf = reward.to_be_bytes().to_vec();
    buf.push(u8::from(done));
    buf.push(sent);
    buf
}

/// A frame filled with one byte value.
pub fn frame(geometry: FrameGeometry, fill: u8) -> Vec<u8> {
    vec![fill; geometry.len()]
}

/// A frame whose bytes count upward, wrapping at 256.
#[allow(clippy::cast_possible_truncation)]
pub fn gradient_frame(geometry: FrameGeometry) -> Vec<u8> {
    (0..geometry.len()).map(|i| i as u8).collect()
}
