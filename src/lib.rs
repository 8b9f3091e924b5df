// DBGp client library
//
// Implements the IDE side of the DBGp debugging protocol: listen for an
// engine, negotiate features, then drive execution, breakpoints, and
// variable inspection over an async message pump.

pub mod arguments;
pub mod base64;
pub mod breakpoint;
pub mod connection;
pub mod context;
pub mod error;
mod eventloop;
pub mod events;
pub mod property;
pub mod protocol;
pub mod server;
pub mod stack;
pub mod typemap;
pub mod xml;

pub use breakpoint::{Breakpoint, BreakpointKind, HitCondition};
pub use connection::{Connection, EngineStatus};
pub use context::Context;
pub use error::{DbgpError, DbgpResult};
pub use events::{ConnectionEvent, InitPacket};
pub use property::Property;
pub use server::{Server, DEFAULT_PORT};
pub use stack::{Location, Stack, StackLevel, StackLevelType};
pub use typemap::{CommonType, Type, Typemap};
