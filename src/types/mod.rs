//! Core types for the downlink transport and product layers.
//!
//! ## Architecture
//!
//! The types follow the layering of the broadcast:
//! - [`TransportUnit`] is one fixed-size frame from the receiver, carrying a
//!   [`UnitHeader`] and an M_PDU ([`MpduHeader`] + packet zone)
//! - [`ApplicationPacket`] is a variable-length packet rebuilt from the packet
//!   zones of consecutive units on one virtual channel
//! - [`CompletedFile`] is a reassembled file with its [`IntegrityStatus`],
//!   advisory [`Quality`] and [`CloseReason`]
//!
//! Counters on both layers wrap; [`classify`] applies the half-range rule to
//! tell duplicates, gaps and resets apart.
//!
//! ## Usage Example
//!
//! ```rust
//! use downlink::types::{UnitHeader, classify, CounterStep, UNIT_COUNTER_MODULUS};
//!
//! let header = UnitHeader::parse(&[0x40, 0x15, 0x00, 0x00, 0x2a, 0x00]).unwrap();
//! assert_eq!(header.vcid, 21);
//! assert_eq!(
//!     classify(Some(40), header.counter, UNIT_COUNTER_MODULUS),
//!     CounterStep::Gap { missing: 1 }
//! );
//! ```

mod counter;
mod file;
mod packet;
mod unit;
mod update_rate;

pub use counter::{
    CounterStep, PACKET_SEQUENCE_MODULUS, UNIT_COUNTER_MODULUS, classify, counter_delta,
};
pub use file::{CloseReason, CompletedFile, FileType, IntegrityStatus, Quality};
pub use packet::{
    ApplicationPacket, IDLE_APID, PACKET_CRC_SIZE, PACKET_HEADER_SIZE, PACKET_VERSION,
    PacketHeader, SequenceFlags, TRANSPORT_HEADER_SIZE, TransportFileHeader,
};
pub use unit::{
    FILL_VCID, MPDU_HEADER_SIZE, MpduHeader, NO_PACKET_START, TransportUnit, UNIT_HEADER_SIZE,
    UNIT_VERSION, UnitHeader,
};
pub use update_rate::UpdateRate;
