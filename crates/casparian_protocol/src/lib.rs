//! Binary Protocol v4: Sentinel <-> Worker wire format.
//!
//! Control plane only - record batches flow from the guest to the worker's
//! sinks, never over this channel.
//!
//! # Protocol Specification
//!
//! Header Format: !BBHQI (16 bytes, Network Byte Order / Big Endian)
//! ```text
//! [VER:1][OP:1][RES:2][JOB_ID:8][LEN:4]
//! ```
//!
//! - VER (u8): Protocol version (0x04)
//! - OP (u8): OpCode
//! - RES (u16): Reserved, must be zero on encode
//! - JOB_ID (u64): Job ID (zero for session-level opcodes)
//! - LEN (u32): Payload length in bytes

pub mod config;
pub mod defaults;
pub mod error;
pub mod schema;
pub mod sink;
pub mod types;

pub use schema::{ColumnSpec, LogicalType, SchemaContract, RESERVED_LINEAGE_COLUMNS};
pub use sink::SinkSpec;
pub use types::{
    ConcludePayload,
    DeployCommand,
    DispatchCommand,
    EnvReadyPayload,
    ErrorKind,
    ErrorPayload,
    FileStatus,
    HeartbeatPayload,
    IdentifyPayload,
    JobId,
    JobOutcome,
    JobReceipt,
    JobState,
    PrepareEnvCommand,
    TagSource,
    UpsertOutcome,
};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use error::{ProtocolError, Result};
use std::io::Cursor;

/// Protocol version
pub const PROTOCOL_VERSION: u8 = 0x04;

/// Header size in bytes
pub const HEADER_SIZE: usize = 16;

/// Maximum payload size (the max value of u32)
pub const MAX_PAYLOAD_SIZE: usize = u32::MAX as usize;

/// Wire opcodes for the worker session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Unknown = 0,

    // Worker -> Sentinel (Handshake)
    Identify = 1, // "I am here. My capabilities are [A, B, C]."

    // Sentinel -> Worker (Command)
    Dispatch = 2, // "Process this file. Here is your sink specification."

    // Sentinel -> Worker (Abort)
    Abort = 3, // "Cancel this job."

    // Worker -> Sentinel (Keep-alive)
    Heartbeat = 4, // "Still alive, N jobs in flight."

    // Worker -> Sentinel (Completion)
    Conclude = 5, // "Job finished. Here is the outcome."

    // Bidirectional (session-level error)
    Err = 6,

    // Sentinel -> Worker (soft restart hint)
    Reload = 7,

    // Sentinel -> Worker (environment provisioning)
    PrepareEnv = 8, // "Provision an environment for this dependency set."

    // Worker -> Sentinel
    EnvReady = 9, // "Environment is ready (handle, cached?)."

    // Sentinel -> Worker (binding registration)
    Deploy = 10, // "Register this parser source."

    // Worker -> Sentinel (ack of DISPATCH)
    Receipt = 11,
}

impl OpCode {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(OpCode::Unknown),
            1 => Ok(OpCode::Identify),
            2 => Ok(OpCode::Dispatch),
            3 => Ok(OpCode::Abort),
            4 => Ok(OpCode::Heartbeat),
            5 => Ok(OpCode::Conclude),
            6 => Ok(OpCode::Err),
            7 => Ok(OpCode::Reload),
            8 => Ok(OpCode::PrepareEnv),
            9 => Ok(OpCode::EnvReady),
            10 => Ok(OpCode::Deploy),
            11 => Ok(OpCode::Receipt),
            _ => Err(ProtocolError::InvalidOpCode(value)),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Protocol header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub opcode: OpCode,
    pub reserved: u16,
    pub job_id: JobId,
    pub payload_len: u32,
}

impl Header {
    pub fn new(opcode: OpCode, job_id: JobId, payload_len: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            opcode,
            reserved: 0,
            job_id,
            payload_len,
        }
    }

    /// Pack header into a 16-byte buffer (network byte order).
    pub fn pack(&self) -> Result<[u8; HEADER_SIZE]> {
        let mut buf = [0u8; HEADER_SIZE];
        let mut cursor = Cursor::new(&mut buf[..]);

        cursor.write_u8(self.version)?;
        cursor.write_u8(self.opcode.as_u8())?;
        cursor.write_u16::<BigEndian>(self.reserved)?;
        cursor.write_u64::<BigEndian>(self.job_id.as_u64())?;
        cursor.write_u32::<BigEndian>(self.payload_len)?;

        Ok(buf)
    }

    /// Unpack header from a 16-byte buffer.
    ///
    /// A version byte other than [`PROTOCOL_VERSION`] is a session-fatal
    /// `protocol_error`; callers must answer ERR and drop the peer.
    pub fn unpack(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(ProtocolError::HeaderTooShort {
                expected: HEADER_SIZE,
                got: data.len(),
            });
        }

        let mut cursor = Cursor::new(&data[..HEADER_SIZE]);

        let version = cursor.read_u8()?;
        let op_raw = cursor.read_u8()?;
        let reserved = cursor.read_u16::<BigEndian>()?;
        let job_id = JobId::new(cursor.read_u64::<BigEndian>()?);
        let payload_len = cursor.read_u32::<BigEndian>()?;

        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                got: version,
            });
        }

        let opcode = OpCode::from_u8(op_raw)?;

        Ok(Self {
            version,
            opcode,
            reserved,
            job_id,
            payload_len,
        })
    }
}

/// Protocol message (header + payload)
#[derive(Debug, Clone)]
pub struct Message {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Message {
    /// Create a new message.
    ///
    /// Returns an error if payload exceeds [`MAX_PAYLOAD_SIZE`].
    pub fn new(opcode: OpCode, job_id: JobId, payload: Vec<u8>) -> Result<Self> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        let header = Header::new(opcode, job_id, payload.len() as u32);
        Ok(Self { header, payload })
    }

    /// Encode a serde payload and wrap it in a message.
    pub fn encode<T: serde::Serialize>(opcode: OpCode, job_id: JobId, payload: &T) -> Result<Self> {
        let bytes = serde_json::to_vec(payload)?;
        Self::new(opcode, job_id, bytes)
    }

    /// Decode the payload into a serde type.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Pack message into transport frames (header, payload)
    pub fn pack(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        let header_bytes = self.header.pack()?.to_vec();
        Ok((header_bytes, self.payload.clone()))
    }

    /// Unpack message from transport frames
    pub fn unpack(frames: &[Vec<u8>]) -> Result<Self> {
        if frames.len() < 2 {
            return Err(ProtocolError::InvalidFrameCount {
                expected: 2,
                got: frames.len(),
            });
        }

        let header = Header::unpack(&frames[0])?;
        let payload = frames[1].clone();

        if payload.len() != header.payload_len as usize {
            return Err(ProtocolError::PayloadLengthMismatch {
                expected: header.payload_len as usize,
                got: payload.len(),
            });
        }

        Ok(Self { header, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_OPCODES: &[OpCode] = &[
        OpCode::Unknown,
        OpCode::Identify,
        OpCode::Dispatch,
        OpCode::Abort,
        OpCode::Heartbeat,
        OpCode::Conclude,
        OpCode::Err,
        OpCode::Reload,
        OpCode::PrepareEnv,
        OpCode::EnvReady,
        OpCode::Deploy,
        OpCode::Receipt,
    ];

    #[test]
    fn test_header_pack_unpack() {
        let header = Header::new(OpCode::Dispatch, JobId::new(12345), 1024);
        let packed = header.pack().unwrap();

        assert_eq!(packed.len(), HEADER_SIZE);

        let unpacked = Header::unpack(&packed).unwrap();
        assert_eq!(unpacked.version, PROTOCOL_VERSION);
        assert_eq!(unpacked.opcode, OpCode::Dispatch);
        assert_eq!(unpacked.job_id, JobId::new(12345));
        assert_eq!(unpacked.payload_len, 1024);
    }

    #[test]
    fn test_header_roundtrip_all_opcodes() {
        for &opcode in ALL_OPCODES {
            let header = Header::new(opcode, JobId::new(9999), 512);
            let packed = header.pack().unwrap();
            let unpacked = Header::unpack(&packed).unwrap();
            assert_eq!(header, unpacked);
            // Byte-level round trip: unpack(pack(bytes)) == bytes
            assert_eq!(unpacked.pack().unwrap(), packed);
        }
    }

    #[test]
    fn test_opcode_u8_roundtrip() {
        for &opcode in ALL_OPCODES {
            assert_eq!(OpCode::from_u8(opcode.as_u8()).unwrap(), opcode);
        }
        assert!(OpCode::from_u8(200).is_err());
    }

    #[test]
    fn test_version_mismatch() {
        let header = Header::new(OpCode::Identify, JobId::new(1), 0);
        let mut packed = header.pack().unwrap();
        packed[0] = 0x03;

        let result = Header::unpack(&packed);
        assert!(matches!(
            result,
            Err(ProtocolError::VersionMismatch { got: 0x03, .. })
        ));
    }

    #[test]
    fn test_header_too_short() {
        let buf = [0u8; 8];
        let result = Header::unpack(&buf);
        assert!(matches!(result, Err(ProtocolError::HeaderTooShort { .. })));
    }

    #[test]
    fn test_message_pack_unpack() {
        let payload = b"{\"worker_id\":\"w1\"}".to_vec();
        let msg = Message::new(OpCode::Identify, JobId::new(42), payload.clone()).unwrap();

        let (header_bytes, payload_bytes) = msg.pack().unwrap();
        let frames = vec![header_bytes, payload_bytes];

        let unpacked = Message::unpack(&frames).unwrap();
        assert_eq!(unpacked.header.opcode, OpCode::Identify);
        assert_eq!(unpacked.header.job_id, JobId::new(42));
        assert_eq!(unpacked.payload, payload);
    }

    #[test]
    fn test_message_payload_length_mismatch() {
        let msg = Message::new(OpCode::Heartbeat, JobId::new(0), vec![1, 2, 3]).unwrap();
        let (header_bytes, _) = msg.pack().unwrap();
        let frames = vec![header_bytes, vec![1, 2]];

        let result = Message::unpack(&frames);
        assert!(matches!(
            result,
            Err(ProtocolError::PayloadLengthMismatch { expected: 3, got: 2 })
        ));
    }

    #[test]
    fn test_typed_encode_decode() {
        let payload = types::HeartbeatPayload {
            ts: 1_700_000_000_000,
            in_flight: 1,
        };
        let msg = Message::encode(OpCode::Heartbeat, JobId::new(0), &payload).unwrap();
        let decoded: types::HeartbeatPayload = msg.decode().unwrap();
        assert_eq!(decoded.ts, payload.ts);
        assert_eq!(decoded.in_flight, 1);
    }
}
