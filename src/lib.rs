/*
 * Description: A client-side distributed tracing library compatible with the Zipkin v1 wire format.
 *
 * Copyright (C) 2022 Danny McClanahan <dmcC2@hypnicjerk.ai>
 * SPDX-License-Identifier: GPL-3.0-or-later
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! A client-side distributed tracing library compatible with the Zipkin v1 wire format.
//!
//! A trace is a tree of timed [`model::SpanInfo`] records sharing one [`id::TraceId`]. Each
//! trace is owned, for its entire life, by exactly one [`aggregator`] task: clients never touch
//! a trace's state directly, they send it fire-and-forget messages carrying their own
//! client-captured timestamp. This keeps the hot path — an unsampled [`id::Id`] — allocation-free
//! and lookup-free: every public operation short-circuits on `id.sampled() == false` before doing
//! anything else.
//!
//! Two equivalent surfaces are exposed: the functional API in [`client`], which threads an
//! [`id::Id`] explicitly through every call, and the contextual API in [`context`], which stashes
//! the current `Id` in task-local storage so call sites that already have a [`tokio`] task to
//! themselves don't have to carry it by hand.
//!
//! Encoding finished spans to JSON and posting them to a collector is explicitly out of scope;
//! see [`report::Reporter`] for the boundary this crate hands spans across instead.

#![deny(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]
#![doc(test(attr(deny(warnings))))]
#![deny(clippy::all)]

pub mod aggregator;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod id;
pub mod model;
pub mod registry;
pub mod report;
pub mod timeout;
pub mod timestamp;
pub mod wire;

pub use client::Client;
pub use config::{Config, DebugContextPolicy, TraceOptions};
pub use error::{IdKind, IdParseError, TraceError};
pub use id::{Id, OriginParent, SpanId, TraceId};
pub use model::{Endpoint, SpanKind};
pub use report::{ChannelReporter, LoggingReporter, NullReporter, Reporter};
