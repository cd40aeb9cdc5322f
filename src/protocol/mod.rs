pub mod codec;
pub mod frame;
pub mod packet;

pub use codec::{PayloadReader, PayloadWriter};
pub use frame::{read_frame, write_packet, MAX_FRAME_BYTES};
pub use packet::{DeclineReason, Packet, PushFailure};
