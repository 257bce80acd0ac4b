// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host-side client of the HIOMAP flash mediation protocol.
//!
//! Presents a block-level flash device (`HiomapDevice::{read,write,erase,
//! get_info}`) over a BMC-mediated SPI/NOR flash reached through a moving
//! LPC memory window negotiated over IPMI. Callers supply a [`Transport`]
//! and a [`WindowIO`]; everything else — windowing, command sequencing,
//! asynchronous BMC events, and recovery from a reset — is handled
//! internally.
//!
//! Unlike the rest of this workspace's `drv-*` crates, this one is not
//! `no_std`: the concurrency model it implements (a session-wide lock held
//! across a whole façade call, an event sink invoked from a foreign
//! thread) is the host-side model this protocol was designed for, not a
//! single Hubris task's cooperative one.

mod config;
mod error;
mod event;
mod facade;
mod protocol;
mod session;
mod trace;
mod transport;
mod window;
mod wire;

pub use config::SessionConfig;
pub use error::{FlashError, IoError, TransportError};
pub use event::EventState;
pub use facade::HiomapDevice;
pub use session::SessionStatus;
pub use transport::{EventSink, RawResponse, Transport, WindowIO};
pub use window::{Direction, Window};
