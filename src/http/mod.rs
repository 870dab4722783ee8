//! Request/Reply pair and PSG wire framing (component F).

pub mod psg;
pub mod reply;
pub mod request;

pub use psg::{Chunk, ReplyCompletion, ReplyMessage, ReplyMimeType, Severity};
pub use reply::{Reply, ReplyState};
pub use request::{QueryParams, Request, RequestBody};
