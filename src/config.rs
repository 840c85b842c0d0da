/*
 * Description: Crate-wide configuration and per-trace option overrides.
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

//! Crate-wide configuration.
//!
//! Loading these values from environment variables or a config file is an external concern
//! (see the purpose/scope section); this module only defines the shape and its defaults.

use crate::model::Endpoint;
use crate::report::{NullReporter, Reporter};

use std::net::Ipv4Addr;
use std::sync::Arc;

/// Default inactivity timeout for a trace, in milliseconds.
pub const DEFAULT_TTL_MILLIS: u64 = 30_000;

/// How the contextual API behaves when no trace context is present in the current task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugContextPolicy {
  /// Return the `ignore` sentinel with no side effect.
  Silent,
  /// Log a warning once, then return the `ignore` sentinel.
  Warn,
  /// Return [`crate::error::TraceError::MissingContext`].
  Raise,
}

impl Default for DebugContextPolicy {
  fn default() -> Self { Self::Silent }
}

/// Process-wide defaults applied to every trace unless overridden per call.
#[derive(Clone)]
pub struct Config {
  /// Default service name for the local endpoint.
  pub system_id: String,
  /// Default local ip. Auto-discovery of the host's non-loopback interface is out of scope
  /// here; callers supply it, or it falls back to `127.0.0.1`.
  pub ip: Ipv4Addr,
  /// Default local port.
  pub port: u16,
  /// Default reporter, shared across every trace that does not override it.
  pub reporter: Arc<dyn Reporter>,
  /// Missing-context behavior for the contextual API.
  pub debug_context: DebugContextPolicy,
}

impl Config {
  /// The local endpoint derived from `system_id`/`ip`/`port`.
  pub fn local_endpoint(&self) -> Endpoint {
    Endpoint {
      ipv4: Some(self.ip),
      ipv6: None,
      hostname: None,
      port: Some(self.port),
      service_name: Some(self.system_id.clone()),
    }
  }
}

impl Default for Config {
  fn default() -> Self {
    Self {
      system_id: "unknown".to_string(),
      ip: Ipv4Addr::LOCALHOST,
      port: 0,
      reporter: Arc::new(NullReporter),
      debug_context: DebugContextPolicy::default(),
    }
  }
}

impl std::fmt::Debug for Config {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Config")
      .field("system_id", &self.system_id)
      .field("ip", &self.ip)
      .field("port", &self.port)
      .field("reporter", &"<dyn Reporter>")
      .field("debug_context", &self.debug_context)
      .finish()
  }
}

/// Per-call overrides recognized by `start`/`join`/`start_span`/`finish_span`/`update_span`/
/// `finish`. Every field is optional; unset fields fall back to `Config` or to the operation's
/// own literal default (e.g. `name` defaults to `"unknown"` in `start_span`).
#[derive(Clone, Default)]
pub struct TraceOptions {
  /// Span display name.
  pub name: Option<String>,
  /// `client` or `server`; defaults to `client` in `start`, `server` in `join`.
  pub kind: Option<crate::model::SpanKind>,
  /// Explicit sampling decision.
  pub sample: Option<bool>,
  /// Forces sampling regardless of `sample`.
  pub debug: Option<bool>,
  /// The peer endpoint, recorded as a `ca`/`sa` binary annotation.
  pub remote: Option<Endpoint>,
  /// Overrides the local endpoint used for this call's annotations.
  pub endpoint: Option<Endpoint>,
  /// Inactivity timeout override, in milliseconds.
  pub ttl_millis: Option<u64>,
  /// Reporter override for this trace.
  pub reporter: Option<Arc<dyn Reporter>>,
  /// Extra annotations/deltas to apply alongside this call.
  pub annotations: Vec<crate::aggregator::Delta>,
  /// `finish` only: transition to the `Async` state instead of terminating immediately.
  pub is_async: Option<bool>,
  /// `start_span` only: adds an `lc` ("local component") binary annotation.
  pub local: Option<String>,
  /// `update_span` only: overrides the captured timestamp.
  pub timestamp: Option<crate::timestamp::Timestamp>,
}

impl std::fmt::Debug for TraceOptions {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TraceOptions")
      .field("name", &self.name)
      .field("kind", &self.kind)
      .field("sample", &self.sample)
      .field("debug", &self.debug)
      .field("remote", &self.remote)
      .field("endpoint", &self.endpoint)
      .field("ttl_millis", &self.ttl_millis)
      .field("annotations_len", &self.annotations.len())
      .field("is_async", &self.is_async)
      .field("local", &self.local)
      .finish()
  }
}
