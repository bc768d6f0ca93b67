//! 会话与实时消息
//!
//! - [`ConversationRegistry`] - 会话、成员、消息、反应 (持久化)
//! - [`ChatHub`] - 实时连接、房间广播、在线状态、正在输入
//! - [`ws`] - `/ws/chat` 传输层

pub mod error;
pub mod hub;
pub mod presence;
pub mod registry;
pub mod rooms;
pub mod storage;
pub mod typing;
pub mod ws;

pub use error::{ChatError, ChatResult, HubError};
pub use hub::{ChatHub, HubSession};
pub use presence::{LocalPresence, PresenceTracker};
pub use registry::{ConversationRegistry, ReactionChange};
pub use rooms::{ConnectionId, LocalRooms, RoomRegistry};
pub use storage::ChatStorage;
pub use typing::TypingTracker;
