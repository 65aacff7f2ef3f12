//! MalmoEnv request messages and reply decoding.
//!
//! The protocol is strictly positional: every request is followed by a
//! fixed sequence of replies and nothing correlates them but order. Reply
//! decoders therefore treat any size mismatch as a desynchronization.
//!
//! Numeric replies use network byte order: statuses and ports are `u32`,
//! the step reply is `(f64 reward, u8 done, u8 sent)`.

use std::fmt;

use malmo_core::error::{ConfigError, ProtocolError};

/// Protocol version announced in the greeting.
pub const MALMO_VERSION: &str = "0.37.0";

/// Byte length of the step reply `(f64, u8, u8)`.
pub const STEP_REPLY_LEN: usize = 10;

/// Mission init status meaning the backend accepted the episode.
pub const MISSION_ACCEPTED: u32 = 1;

// ---------------------------------------------------------------------------
// StepOptions
// ---------------------------------------------------------------------------

/// Encodes which extra payloads accompany each step exchange.
///
/// | value | turn key | info |
/// |-------|----------|------|
/// | 0     | yes      | yes  |
/// | 1     | yes      | no   |
/// | 2     | no       | yes  |
/// | 3     | no       | no   |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StepOptions(u8);

impl StepOptions {
    pub const fn value(self) -> u8 {
        self.0
    }

    /// The held turn key is sent after each step and a new one is received.
    pub const fn with_turn_key(self) -> bool {
        self.0 < 2
    }

    /// An info payload follows the step reply.
    pub const fn with_info(self) -> bool {
        self.0 == 0 || self.0 == 2
    }
}

impl TryFrom<u8> for StepOptions {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if value > 3 {
            return Err(ConfigError::InvalidValue {
                field: "step_options".into(),
                message: format!("{value} (must be 0..=3)"),
            });
        }
        Ok(Self(value))
    }
}

impl fmt::Display for StepOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A tagged request from the client.
///
/// Mission descriptors and identity tokens are sent as bare payloads and are
/// not represented here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Greeting sent immediately after connecting. No reply.
    Hello,
    /// Ask for the current observation without acting.
    Peek,
    /// Act with an encoded command.
    Step {
        options: StepOptions,
        command: String,
    },
    /// End the running episode.
    Quit,
    /// Ask the head node for the port of the mission to join.
    Find { token: String },
    /// Purge the experiment's last token from the head node.
    Close { token: String },
    /// Reset the experiment's episode count on the service.
    Init { token: String },
    Status,
    /// Ask the service to exit (and be restarted by its supervisor).
    Exit { token: String },
}

impl Request {
    /// Message name used in logs and state errors.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Hello => "hello",
            Self::Peek => "peek",
            Self::Step { .. } => "step",
            Self::Quit => "quit",
            Self::Find { .. } => "find",
            Self::Close { .. } => "close",
            Self::Init { .. } => "init",
            Self::Status => "status",
            Self::Exit { .. } => "exit",
        }
    }

    /// Wire payload of this request.
    pub fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hello => write!(f, "<MalmoEnv{MALMO_VERSION}/>"),
            Self::Peek => f.write_str("<Peek/>"),
            // The service strips a fixed-length closing tag of the form
            // `</StepN >`; the space is part of the wire format.
            Self::Step { options, command } => {
                write!(f, "<Step{options}>{command}</Step{options} >")
            }
            Self::Quit => f.write_str("<Quit/>"),
            Self::Find { token } => write!(f, "<Find>{token}</Find>"),
            Self::Close { token } => write!(f, "<Close>{token}</Close>"),
            Self::Init { token } => write!(f, "<Init>{token}</Init>"),
            Self::Status => f.write_str("<Status/>"),
            Self::Exit { token } => write!(f, "<Exit>{token}</Exit>"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

/// `experimentId:role:resets`, identifying one episode of one agent.
pub fn episode_token(experiment_id: &str, role: u32, resets: u64) -> String {
    format!("{experiment_id}:{role}:{resets}")
}

/// Identity token sent after the mission descriptor:
/// `experimentId:role:resets:agentCount:synchronous`.
pub fn mission_token(
    experiment_id: &str,
    role: u32,
    resets: u64,
    agent_count: usize,
    synchronous: bool,
) -> String {
    format!(
        "{}:{agent_count}:{synchronous}",
        episode_token(experiment_id, role, resets)
    )
}

// ---------------------------------------------------------------------------
// Reply decoding
// ---------------------------------------------------------------------------

fn expect_len(reply: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if reply.len() == expected {
        Ok(())
    } else {
        Err(ProtocolError::ReplySize {
            expected,
            got: reply.len(),
        })
    }
}

/// Decode a 4-byte status, port or acknowledgement reply.
pub fn decode_status(reply: &[u8]) -> Result<u32, ProtocolError> {
    expect_len(reply, 4)?;
    Ok(u32::from_be_bytes([reply[0], reply[1], reply[2], reply[3]]))
}

/// Decode the 1-byte done flag of a peek reply.
pub fn decode_done_flag(reply: &[u8]) -> Result<bool, ProtocolError> {
    expect_len(reply, 1)?;
    Ok(reply[0] == 1)
}

/// Decode a UTF-8 text reply (info payloads, turn keys, status strings).
pub fn decode_text(reply: Vec<u8>) -> Result<String, ProtocolError> {
    Ok(String::from_utf8(reply)?)
}

/// Fixed-size reply to a step request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReply {
    pub reward: f64,
    pub done: bool,
    /// Nonzero when the backend forwarded the command to the next party.
    pub sent: u8,
}

impl StepReply {
    pub fn decode(reply: &[u8]) -> Result<Self, ProtocolError> {
        expect_len(reply, STEP_REPLY_LEN)?;
        let mut reward = [0u8; 8];
        reward.copy_from_slice(&reply[..8]);
        Ok(Self {
            reward: f64::from_be_bytes(reward),
            done: reply[8] == 1,
            sent: reply[9],
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // ---- Requests ----

    #[test]
    fn hello_announces_version() {
        assert_eq!(Request::Hello.to_string(), "<MalmoEnv0.37.0/>");
    }

    #[test]
    fn step_framing_keeps_closing_space() {
        let req = Request::Step {
            options: StepOptions::try_from(2).unwrap(),
            command: "forward 1\ncamera 0 1.5".into(),
        };
        assert_eq!(
            req.encode(),
            b"<Step2>forward 1\ncamera 0 1.5</Step2 >".to_vec()
        );
    }

    #[test]
    fn tagged_token_requests() {
        let token = episode_token("exp", 1, 3);
        assert_eq!(
            Request::Find {
                token: token.clone()
            }
            .to_string(),
            "<Find>exp:1:3</Find>"
        );
        assert_eq!(
            Request::Close {
                token: token.clone()
            }
            .to_string(),
            "<Close>exp:1:3</Close>"
        );
        assert_eq!(
            Request::Init {
                token: token.clone()
            }
            .to_string(),
            "<Init>exp:1:3</Init>"
        );
        assert_eq!(Request::Exit { token }.to_string(), "<Exit>exp:1:3</Exit>");
        assert_eq!(Request::Status.to_string(), "<Status/>");
        assert_eq!(Request::Quit.to_string(), "<Quit/>");
        assert_eq!(Request::Peek.to_string(), "<Peek/>");
    }

    #[test]
    fn mission_token_layout() {
        assert_eq!(mission_token("exp", 0, 1, 1, true), "exp:0:1:1:true");
        assert_eq!(mission_token("exp", 1, 4, 2, false), "exp:1:4:2:false");
    }

    // ---- StepOptions ----

    #[test]
    fn step_options_table() {
        let flags: Vec<_> = (0..=3)
            .map(|v| {
                let o = StepOptions::try_from(v).unwrap();
                (o.with_turn_key(), o.with_info())
            })
            .collect();
        assert_eq!(
            flags,
            vec![(true, true), (true, false), (false, true), (false, false)]
        );
    }

    #[test]
    fn step_options_rejects_out_of_range() {
        assert!(StepOptions::try_from(4).is_err());
    }

    // ---- Replies ----

    #[test]
    fn decode_status_big_endian() {
        assert_eq!(decode_status(&[0, 0, 0, 1]).unwrap(), 1);
        assert_eq!(decode_status(&[0, 0, 0x23, 0x28]).unwrap(), 9000);
    }

    #[test]
    fn decode_status_rejects_wrong_size() {
        let err = decode_status(&[0, 1]).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::ReplySize {
                expected: 4,
                got: 2
            }
        ));
    }

    #[test]
    fn decode_done_flag_values() {
        assert!(decode_done_flag(&[1]).unwrap());
        assert!(!decode_done_flag(&[0]).unwrap());
        assert!(decode_done_flag(&[]).is_err());
    }

    #[test]
    fn step_reply_decodes() {
        let mut raw = 2.5f64.to_be_bytes().to_vec();
        raw.extend([1, 0]);
        let reply = StepReply::decode(&raw).unwrap();
        assert!((reply.reward - 2.5).abs() < f64::EPSILON);
        assert!(reply.done);
        assert_eq!(reply.sent, 0);
    }

    #[test]
    fn step_reply_rejects_short_payload() {
        assert!(StepReply::decode(&[0; 9]).is_err());
    }

    #[test]
    fn decode_text_rejects_invalid_utf8() {
        assert_eq!(decode_text(b"tk1".to_vec()).unwrap(), "tk1");
        assert!(matches!(
            decode_text(vec![0xff, 0xfe]),
            Err(ProtocolError::InvalidUtf8(_))
        ));
    }
}
