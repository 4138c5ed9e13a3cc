//! Binary frames exchanged with the pool over the streaming connection.
//!
//! Every frame starts with a one byte discriminant followed by fixed offset
//! fields. Integers and floats are little-endian. Client frames end with the
//! text form of a signature, which is the only variable length part.

use bytes::{Buf, BufMut};

use crate::{
    errors::{DecodeError, DecodeResult, IdentityError},
    identity::Identity,
    types::{Challenge, NonceRange},
};

// server -> client
pub const ASSIGNMENT_TYPE: u8 = 0;
pub const POOL_RESULT_TYPE: u8 = 1;
pub const ASSIGNMENT_LEN: usize = 57;
pub const POOL_RESULT_LEN: usize = 101;

// client -> server
pub const READY_TYPE: u8 = 0;
pub const SUBMISSION_TYPE: u8 = 2;
pub const READY_HEADER_LEN: usize = 41;
pub const SUBMISSION_HEADER_LEN: usize = 57;

#[macro_export]
macro_rules! impl_bytes_conversion {
    ($t:ty) => {
        impl From<$t> for Vec<u8> {
            fn from(value: $t) -> Self {
                value.encode()
            }
        }

        impl TryFrom<&[u8]> for $t {
            type Error = $crate::errors::DecodeError;

            fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
                <$t>::decode(value)
            }
        }
    };
}

/// pool -> client
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Assignment(Assignment),
    PoolResult(PoolResult),
    /// forward compatible frames the client does not understand
    Unknown(u8),
}

impl_bytes_conversion!(ServerMessage);

/// client -> pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Ready(ReadyMessage),
    Submission(SubmissionReport),
}

impl_bytes_conversion!(ClientMessage);

/// A mining round handed out by the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub challenge: Challenge,
    /// seconds left in the round
    pub cutoff: u64,
    pub nonce_range: NonceRange,
}

/// Pool wide outcome of the last round.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolResult {
    pub difficulty: u32,
    pub total_balance: f64,
    pub total_rewards: f64,
    pub top_stake: f64,
    pub multiplier: f64,
    pub active_miners: u32,
    pub challenge: Challenge,
    pub best_nonce: u64,
    pub miner_difficulty: u32,
    pub miner_earned: f64,
    pub miner_share: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyMessage {
    pub pubkey: [u8; 32],
    pub timestamp: u64,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReport {
    pub digest: [u8; 16],
    pub nonce: u64,
    pub pubkey: [u8; 32],
    pub signature: Vec<u8>,
}

fn ensure_len(data: &[u8], kind: &'static str, expected: usize) -> DecodeResult<()> {
    if data.len() < expected {
        return Err(DecodeError::TooShort { kind, expected, actual: data.len() });
    }
    Ok(())
}

impl ServerMessage {
    pub fn decode(data: &[u8]) -> DecodeResult<Self> {
        let Some(&tag) = data.first() else {
            return Err(DecodeError::Empty);
        };
        match tag {
            ASSIGNMENT_TYPE => Assignment::decode(data).map(ServerMessage::Assignment),
            POOL_RESULT_TYPE => PoolResult::decode(data).map(ServerMessage::PoolResult),
            other => Ok(ServerMessage::Unknown(other)),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            ServerMessage::Assignment(assignment) => assignment.encode(),
            ServerMessage::PoolResult(result) => result.encode(),
            ServerMessage::Unknown(tag) => vec![*tag],
        }
    }
}

impl Assignment {
    fn decode(data: &[u8]) -> DecodeResult<Self> {
        ensure_len(data, "assignment", ASSIGNMENT_LEN)?;
        let mut buf = &data[1..ASSIGNMENT_LEN];

        let mut challenge = [0u8; 32];
        buf.copy_to_slice(&mut challenge);
        let cutoff = buf.get_u64_le();
        let start = buf.get_u64_le();
        let end = buf.get_u64_le();

        Ok(Self { challenge, cutoff, nonce_range: NonceRange::new(start, end) })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ASSIGNMENT_LEN);
        buf.put_u8(ASSIGNMENT_TYPE);
        buf.put_slice(&self.challenge);
        buf.put_u64_le(self.cutoff);
        buf.put_u64_le(self.nonce_range.start);
        buf.put_u64_le(self.nonce_range.end);
        buf
    }
}

impl PoolResult {
    fn decode(data: &[u8]) -> DecodeResult<Self> {
        ensure_len(data, "pool result", POOL_RESULT_LEN)?;
        let mut buf = &data[1..POOL_RESULT_LEN];

        let difficulty = buf.get_u32_le();
        let total_balance = buf.get_f64_le();
        let total_rewards = buf.get_f64_le();
        let top_stake = buf.get_f64_le();
        let multiplier = buf.get_f64_le();
        let active_miners = buf.get_u32_le();
        let mut challenge = [0u8; 32];
        buf.copy_to_slice(&mut challenge);
        let best_nonce = buf.get_u64_le();
        let miner_difficulty = buf.get_u32_le();
        let miner_earned = buf.get_f64_le();
        let miner_share = buf.get_f64_le();

        Ok(Self {
            difficulty,
            total_balance,
            total_rewards,
            top_stake,
            multiplier,
            active_miners,
            challenge,
            best_nonce,
            miner_difficulty,
            miner_earned,
            miner_share,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(POOL_RESULT_LEN);
        buf.put_u8(POOL_RESULT_TYPE);
        buf.put_u32_le(self.difficulty);
        buf.put_f64_le(self.total_balance);
        buf.put_f64_le(self.total_rewards);
        buf.put_f64_le(self.top_stake);
        buf.put_f64_le(self.multiplier);
        buf.put_u32_le(self.active_miners);
        buf.put_slice(&self.challenge);
        buf.put_u64_le(self.best_nonce);
        buf.put_u32_le(self.miner_difficulty);
        buf.put_f64_le(self.miner_earned);
        buf.put_f64_le(self.miner_share);
        buf
    }
}

impl ClientMessage {
    pub fn decode(data: &[u8]) -> DecodeResult<Self> {
        let Some(&tag) = data.first() else {
            return Err(DecodeError::Empty);
        };
        match tag {
            READY_TYPE => ReadyMessage::decode(data).map(ClientMessage::Ready),
            SUBMISSION_TYPE => SubmissionReport::decode(data).map(ClientMessage::Submission),
            other => Err(DecodeError::UnknownClientType(other)),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            ClientMessage::Ready(ready) => ready.encode(),
            ClientMessage::Submission(report) => report.encode(),
        }
    }
}

impl ReadyMessage {
    /// Sign `timestamp` with the session identity.
    pub fn sign(identity: &dyn Identity, timestamp: u64) -> Result<Self, IdentityError> {
        let pubkey = identity.pubkey().ok_or(IdentityError::Unavailable)?;
        let signature = identity.sign_text(&timestamp.to_le_bytes())?;
        Ok(Self { pubkey, timestamp, signature: signature.into_bytes() })
    }

    fn decode(data: &[u8]) -> DecodeResult<Self> {
        ensure_len(data, "ready", READY_HEADER_LEN)?;
        let mut buf = &data[1..];

        let mut pubkey = [0u8; 32];
        buf.copy_to_slice(&mut pubkey);
        let timestamp = buf.get_u64_le();

        Ok(Self { pubkey, timestamp, signature: buf.to_vec() })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(READY_HEADER_LEN + self.signature.len());
        buf.put_u8(READY_TYPE);
        buf.put_slice(&self.pubkey);
        buf.put_u64_le(self.timestamp);
        buf.put_slice(&self.signature);
        buf
    }
}

impl SubmissionReport {
    /// Bytes covered by the submission signature: `digest || nonce_le`.
    pub fn signed_payload(digest: &[u8; 16], nonce: u64) -> [u8; 24] {
        let mut payload = [0u8; 24];
        payload[..16].copy_from_slice(digest);
        payload[16..].copy_from_slice(&nonce.to_le_bytes());
        payload
    }

    pub fn sign(
        identity: &dyn Identity,
        digest: [u8; 16],
        nonce: u64,
    ) -> Result<Self, IdentityError> {
        let pubkey = identity.pubkey().ok_or(IdentityError::Unavailable)?;
        let signature = identity.sign_text(&Self::signed_payload(&digest, nonce))?;
        Ok(Self { digest, nonce, pubkey, signature: signature.into_bytes() })
    }

    fn decode(data: &[u8]) -> DecodeResult<Self> {
        ensure_len(data, "submission", SUBMISSION_HEADER_LEN)?;
        let mut buf = &data[1..];

        let mut digest = [0u8; 16];
        buf.copy_to_slice(&mut digest);
        let nonce = buf.get_u64_le();
        let mut pubkey = [0u8; 32];
        buf.copy_to_slice(&mut pubkey);

        Ok(Self { digest, nonce, pubkey, signature: buf.to_vec() })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SUBMISSION_HEADER_LEN + self.signature.len());
        buf.put_u8(SUBMISSION_TYPE);
        buf.put_slice(&self.digest);
        buf.put_u64_le(self.nonce);
        buf.put_slice(&self.pubkey);
        buf.put_slice(&self.signature);
        buf
    }
}

#[cfg(test)]
mod tests {
    use solana_sdk::{
        signature::{Keypair, Signature},
        signer::Signer,
    };
    use std::str::FromStr;

    use super::*;

    #[test]
    fn decode_assignment_example() {
        let mut frame = vec![0u8];
        frame.extend_from_slice(&[0u8; 32]);
        frame.extend_from_slice(&[0x3C, 0, 0, 0, 0, 0, 0, 0]);
        frame.extend_from_slice(&[0u8; 8]);
        frame.extend_from_slice(&[0x10, 0x27, 0, 0, 0, 0, 0, 0]);

        let ServerMessage::Assignment(assignment) = ServerMessage::decode(&frame).unwrap() else {
            panic!("expected an assignment");
        };
        assert_eq!(assignment.challenge, [0u8; 32]);
        assert_eq!(assignment.cutoff, 60);
        assert_eq!(assignment.nonce_range, NonceRange::new(0, 10_000));
    }

    #[test]
    fn decode_assignment_reads_fields_in_place() {
        let mut frame = vec![ASSIGNMENT_TYPE];
        frame.extend((1..=32).map(|b| b as u8));
        frame.extend_from_slice(&45u64.to_le_bytes());
        frame.extend_from_slice(&1_000u64.to_le_bytes());
        frame.extend_from_slice(&u64::MAX.to_le_bytes());
        // trailing bytes beyond the minimum are ignored
        frame.extend_from_slice(&[0xAA, 0xBB]);

        let message = ServerMessage::decode(&frame).unwrap();
        let ServerMessage::Assignment(assignment) = message else {
            panic!("expected an assignment");
        };
        assert_eq!(assignment.challenge[0], 1);
        assert_eq!(assignment.challenge[31], 32);
        assert_eq!(assignment.cutoff, 45);
        assert_eq!(assignment.nonce_range, NonceRange::new(1_000, u64::MAX));
    }

    #[test]
    fn short_known_frames_fail() {
        for len in 1..ASSIGNMENT_LEN {
            let frame = vec![ASSIGNMENT_TYPE; len];
            let err = ServerMessage::decode(&frame).unwrap_err();
            assert!(err.is_fatal(), "len {len}");
        }
        for len in 1..POOL_RESULT_LEN {
            let mut frame = vec![0u8; len];
            frame[0] = POOL_RESULT_TYPE;
            assert_eq!(
                ServerMessage::decode(&frame),
                Err(DecodeError::TooShort {
                    kind: "pool result",
                    expected: POOL_RESULT_LEN,
                    actual: len
                })
            );
        }
    }

    #[test]
    fn unknown_and_empty_frames_are_not_fatal() {
        assert_eq!(ServerMessage::decode(&[7, 1, 2]), Ok(ServerMessage::Unknown(7)));
        assert_eq!(ServerMessage::decode(&[255]), Ok(ServerMessage::Unknown(255)));

        let err = ServerMessage::decode(&[]).unwrap_err();
        assert_eq!(err, DecodeError::Empty);
        assert!(!err.is_fatal());
    }

    #[test]
    fn decode_pool_result_offsets() {
        let result = PoolResult {
            difficulty: 21,
            total_balance: 12.5,
            total_rewards: 0.25,
            top_stake: 1000.0,
            multiplier: 1.75,
            active_miners: 314,
            challenge: [9u8; 32],
            best_nonce: 77_777,
            miner_difficulty: 18,
            miner_earned: 0.0125,
            miner_share: 0.05,
        };
        let frame = result.encode();
        assert_eq!(frame.len(), POOL_RESULT_LEN);
        assert_eq!(&frame[37..41], &314u32.to_le_bytes());
        assert_eq!(&frame[73..81], &77_777u64.to_le_bytes());

        assert_eq!(ServerMessage::decode(&frame), Ok(ServerMessage::PoolResult(result)));
    }

    #[test]
    fn ready_message_layout() {
        let keypair = Keypair::new();
        let ready = ReadyMessage::sign(&keypair, 1_700_000_000).unwrap();
        let frame: Vec<u8> = ClientMessage::Ready(ready.clone()).into();

        assert_eq!(frame[0], READY_TYPE);
        assert_eq!(&frame[1..33], &Signer::pubkey(&keypair).to_bytes());
        assert_eq!(&frame[33..41], &1_700_000_000u64.to_le_bytes());

        let text = std::str::from_utf8(&frame[41..]).unwrap();
        let signature = Signature::from_str(text).unwrap();
        assert!(signature.verify(&Signer::pubkey(&keypair).to_bytes(), &1_700_000_000u64.to_le_bytes()));

        assert_eq!(ClientMessage::try_from(frame.as_slice()), Ok(ClientMessage::Ready(ready)));
    }

    #[test]
    fn submission_layout() {
        let keypair = Keypair::new();
        let digest = [3u8; 16];
        let report = SubmissionReport::sign(&keypair, digest, 42).unwrap();
        let frame = report.encode();

        assert_eq!(frame[0], SUBMISSION_TYPE);
        assert_eq!(&frame[1..17], &digest);
        assert_eq!(&frame[17..25], &42u64.to_le_bytes());
        assert_eq!(&frame[25..57], &Signer::pubkey(&keypair).to_bytes());

        let text = std::str::from_utf8(&frame[57..]).unwrap();
        let signature = Signature::from_str(text).unwrap();
        let payload = SubmissionReport::signed_payload(&digest, 42);
        assert!(signature.verify(&Signer::pubkey(&keypair).to_bytes(), &payload));

        let ClientMessage::Submission(decoded) = ClientMessage::decode(&frame).unwrap() else {
            panic!("expected a submission");
        };
        assert_eq!(decoded, report);
    }

    #[test]
    fn client_decode_rejects_unknown_type() {
        assert_eq!(ClientMessage::decode(&[1, 2, 3]), Err(DecodeError::UnknownClientType(1)));
        assert!(ClientMessage::decode(&[SUBMISSION_TYPE; 20]).is_err());
    }
}
