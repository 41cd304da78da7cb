//! Wire framing and the managers for packets and internal notifications.

pub mod codec;
pub mod internal;
pub mod packet;

pub use codec::{encode_frame, FrameDecoder, FrameError, MAX_FRAME_SIZE};
pub use internal::InternalManager;
pub use packet::{commands, KeepAlive, PacketContext, PacketManager, PacketParser, Unsupported, WorldTime};
