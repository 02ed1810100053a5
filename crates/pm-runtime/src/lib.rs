#![doc = "Real-time acquisition core: sampling scheduler, handoff channel, logging consumer, lifecycle."]

pub mod cancel;
pub mod channel;
pub mod clock;
pub mod consumer;
pub mod lifecycle;
pub mod realtime;
pub mod scheduler;
pub mod sink;

pub use cancel::*;
pub use channel::*;
pub use clock::*;
pub use consumer::*;
pub use lifecycle::*;
pub use realtime::*;
pub use scheduler::*;
pub use sink::*;
