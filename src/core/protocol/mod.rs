//! Device protocol layer
//!
//! Provides the pieces needed to talk to command/response serial devices:
//! - Checksum algorithms (8-bit sum, CRC-16/CCITT)
//! - Declarative frame layouts
//! - Frame encoding, validation and stream resynchronisation
//! - Status code classification
//! - Built-in device families (TAU2, LRF, VISCA, Pelco-D)

pub mod checksum;
pub mod devices;
pub mod frame_spec;
pub mod framing;
pub mod status;

pub use checksum::ChecksumAlgorithm;
pub use devices::{DeviceFamily, DeviceProfile, ReadStrategy, ResponseTiming};
pub use frame_spec::{
    ByteOrder, ChecksumSpec, Coverage, FieldLayout, FrameSpec, LengthEncoding, Placement, SpecError,
};
pub use framing::{decode, encode, encode_reply, Command, DecodedFrame, FrameScanner, RawFrame, ValidationFailure};
pub use status::{DeviceStatus, StatusClass, StatusTable};
