/*
 * Description: In-memory span/trace model, kept independent of the wire representation.
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

//! The in-memory span/trace model.
//!
//! Kept deliberately separate from [`crate::wire`]'s protocol types: the aggregator only ever
//! mutates these, and conversion to the wire shape happens once, at report time.

use crate::id::{SpanId, TraceId};
use crate::report::Reporter;
use crate::timestamp::Timestamp;

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

/// A local or remote network endpoint associated with an annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
  /// IPv4 address, if known.
  pub ipv4: Option<Ipv4Addr>,
  /// IPv6 address, if known.
  pub ipv6: Option<Ipv6Addr>,
  /// A hostname to resolve at wire-conversion time, if neither ip is already known.
  pub hostname: Option<String>,
  /// Port, if known.
  pub port: Option<u16>,
  /// Service name, if known.
  pub service_name: Option<String>,
}

impl Endpoint {
  /// An endpoint carrying only a service name.
  pub fn named(service_name: impl Into<String>) -> Self {
    Self {
      ipv4: None,
      ipv6: None,
      hostname: None,
      port: None,
      service_name: Some(service_name.into()),
    }
  }

  /// Whether this endpoint carries any identifying information at all.
  ///
  /// An endpoint with no ip, no hostname, and no service name is not a well-formed remote
  /// endpoint, per the `InvalidRemoteEndpoint` error case.
  pub fn is_well_formed(&self) -> bool {
    self.ipv4.is_some()
      || self.ipv6.is_some()
      || self.hostname.is_some()
      || self.service_name.is_some()
  }
}

/// A timestamped event on a span.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
  /// When the event occurred.
  pub timestamp: Timestamp,
  /// The event's value, e.g. `cs`, `cr`, `timeout`, `async`, or a user string.
  pub value: String,
  /// The endpoint the event is attributed to, if any.
  pub endpoint: Option<Endpoint>,
}

/// The typed value carried by a [`BinaryAnnotation`].
#[derive(Debug, Clone, PartialEq)]
pub enum BinaryAnnotationValue {
  /// A UTF-8 string value.
  String(String),
  /// A boolean value; used by the distinguished `ca`/`sa` peer-address tags.
  Bool(bool),
  /// A 16-bit signed integer.
  I16(i16),
  /// A 32-bit signed integer.
  I32(i32),
  /// A 64-bit signed integer.
  I64(i64),
  /// A double-precision float.
  Double(f64),
  /// Raw bytes, base64-encoded on the wire.
  Bytes(Vec<u8>),
}

/// A key/value tag attached to a span.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryAnnotation {
  /// The tag key.
  pub key: String,
  /// The tag value.
  pub value: BinaryAnnotationValue,
  /// The endpoint this tag is attributed to, if any.
  pub endpoint: Option<Endpoint>,
}

/// Whether a span represents a client-initiated or server-initiated unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
  /// A span begun by this process calling out (`start`).
  Client,
  /// A span begun by this process accepting an inbound request (`join`).
  Server,
}

impl SpanKind {
  /// Parse the textual `type` option; only `"client"`/`"server"` are accepted.
  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "client" => Some(Self::Client),
      "server" => Some(Self::Server),
      _ => None,
    }
  }

  /// The event annotation value emitted at span start: `cs` for client, `sr` for server.
  pub fn start_annotation(self) -> &'static str {
    match self {
      Self::Client => "cs",
      Self::Server => "sr",
    }
  }

  /// The distinguished peer-address binary annotation key: `sa` for client, `ca` for server.
  pub fn peer_key(self) -> &'static str {
    match self {
      Self::Client => "sa",
      Self::Server => "ca",
    }
  }
}

/// The parent a span is nested under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentId {
  /// This is the trace's root span.
  Root,
  /// This span is nested under the given span id.
  Span(SpanId),
}

/// One span's mutable record, owned exclusively by its trace's aggregator.
#[derive(Debug, Clone)]
pub struct SpanInfo {
  /// This span's id.
  pub id: SpanId,
  /// The span it is nested under, or [`ParentId::Root`].
  pub parent_id: ParentId,
  /// The span's display name.
  pub name: String,
  /// When the span began.
  pub start_timestamp: Timestamp,
  /// When the span ended, if it has.
  pub end_timestamp: Option<Timestamp>,
  /// `true` if this span's start event was recorded by a different process (a server-side
  /// join); its duration is not reported in that case.
  pub shared: bool,
  /// Event annotations, newest-first (prepended as they arrive; sorted by timestamp at
  /// conversion).
  pub annotations: Vec<Annotation>,
  /// Tags, newest-first (prepended as they arrive; sorted by timestamp at conversion).
  pub binary_annotations: Vec<BinaryAnnotation>,
}

impl SpanInfo {
  /// Whether this span has been finished (has an `end_timestamp`).
  pub fn is_finished(&self) -> bool { self.end_timestamp.is_some() }
}

/// Local-endpoint defaults and the reporter handle a trace was started with.
#[derive(Clone)]
pub struct LocalConfig {
  /// The default local endpoint used for annotations that do not specify one explicitly.
  pub local_endpoint: Endpoint,
  /// Where finished spans are sent.
  pub reporter: Arc<dyn Reporter>,
}

impl std::fmt::Debug for LocalConfig {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("LocalConfig")
      .field("local_endpoint", &self.local_endpoint)
      .field("reporter", &"<dyn Reporter>")
      .finish()
  }
}

/// One trace's full mutable state, owned exclusively by its aggregator task.
#[derive(Debug, Clone)]
pub struct TraceState {
  /// This trace's id.
  pub trace_id: TraceId,
  /// The root span's id.
  pub root_span_id: SpanId,
  /// The parent this trace joined under, if any.
  pub parent_id: ParentId,
  /// Whether the caller requested sampling.
  pub sample: bool,
  /// Whether the caller forced sampling via the debug flag.
  pub debug: bool,
  /// Every span in this trace, keyed by span id.
  pub spans: HashMap<SpanId, SpanInfo>,
  /// When this trace began.
  pub timestamp: Timestamp,
  /// When this trace ended, set on finish or timeout.
  pub end_timestamp: Option<Timestamp>,
  /// The timestamp carried by the most recently applied message; drives TTL re-arming.
  pub last_activity: Timestamp,
  /// Inactivity timeout, in milliseconds.
  pub ttl_millis: u64,
  /// Whether this trace is in (or has entered) the `Async` finish state.
  pub is_async: bool,
  /// Local-endpoint defaults and reporter handle.
  pub config: LocalConfig,
}

impl TraceState {
  fn child_spans(&self) -> impl Iterator<Item = &SpanInfo> {
    let root = self.root_span_id;
    self.spans.values().filter(move |s| s.id != root)
  }

  /// Whether every non-root span in this trace has been finished. The root span itself is
  /// excluded: in the `Async` finish state it has deliberately not been given an
  /// `end_timestamp` yet, so including it here would always read as "unfinished".
  pub fn all_children_finished(&self) -> bool {
    self.child_spans().all(SpanInfo::is_finished)
  }

  /// Whether this trace has any non-root child spans.
  pub fn has_child_spans(&self) -> bool {
    self.child_spans().next().is_some()
  }

  /// The latest `end_timestamp` among non-root spans, if every one of them has finished.
  pub fn max_child_end_timestamp(&self) -> Option<Timestamp> {
    self.child_spans().map(|s| s.end_timestamp).collect::<Option<Vec<_>>>().and_then(|ts| ts.into_iter().max())
  }
}
