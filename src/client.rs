/*
 * Description: The functional and contextual client API surfaces.
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

//! The client API: a functional surface that threads an [`Id`] explicitly, and a contextual
//! surface built on top of it using [`crate::context`]'s task-local storage.
//!
//! Every operation here short-circuits on an unsampled `Id`: if `id.sampled()` is false, the
//! call performs no hash lookup, no lock, no message send, and no allocation beyond returning
//! the input id (the "dominant-performance code path" from the concurrency design).

use crate::aggregator::{Delta, Message, StartSpanInput};
use crate::config::{Config, TraceOptions};
use crate::context;
use crate::error::TraceError;
use crate::id::{Id, OriginParent, SpanId, TraceId};
use crate::model::{BinaryAnnotationValue, Endpoint, LocalConfig, ParentId, SpanInfo, SpanKind, TraceState};
use crate::registry::Supervisor;
use crate::timestamp::Timestamp;

use std::collections::HashMap;
use std::future::Future;

/// A handle bundling process-wide [`Config`] with the supervisor that spawns and tracks
/// aggregators; constructing traces is done by calling its methods rather than free functions, so
/// multiple independently configured clients can coexist in one process (e.g. in tests).
#[derive(Clone)]
pub struct Client {
  config: Config,
  supervisor: Supervisor,
}

impl Client {
  /// Construct a client from a fully specified configuration.
  pub fn new(config: Config) -> Self { Self { config, supervisor: Supervisor::new() } }

  fn resolve_ttl(&self, options: &TraceOptions) -> u64 {
    options.ttl_millis.unwrap_or(crate::config::DEFAULT_TTL_MILLIS)
  }

  fn resolve_local_config(&self, options: &TraceOptions) -> LocalConfig {
    LocalConfig {
      local_endpoint: options.endpoint.clone().unwrap_or_else(|| self.config.local_endpoint()),
      reporter: options.reporter.clone().unwrap_or_else(|| self.config.reporter.clone()),
    }
  }

  fn start_annotations(&self, kind: SpanKind, options: &TraceOptions) -> Vec<Delta> {
    let mut deltas = vec![Delta::Annotate(kind.start_annotation().to_string(), None)];
    if let Some(remote) = &options.remote {
      deltas.push(Delta::BinaryAnnotate {
        key: kind.peer_key().to_string(),
        value: BinaryAnnotationValue::Bool(true),
        endpoint: Some(remote.clone()),
      });
    }
    deltas
  }

  fn begin(
    &self,
    trace_id: TraceId,
    span_id: SpanId,
    origin_parent: OriginParent,
    kind: SpanKind,
    options: &TraceOptions,
  ) -> Result<Id, TraceError> {
    if let Some(remote) = &options.remote {
      if !remote.is_well_formed() {
        return Err(TraceError::InvalidRemoteEndpoint);
      }
    }

    let sample = options.sample.unwrap_or(false);
    let debug = options.debug.unwrap_or(false);
    let sampled = sample || debug;

    let mut id = Id::init(trace_id, span_id, origin_parent, sample, debug);
    context::set_trace_id_log_key(&trace_id.to_hex());
    if !sampled {
      return Ok(id);
    }

    let at = Timestamp::now();
    let mut spans = HashMap::new();
    spans.insert(
      span_id,
      SpanInfo {
        id: span_id,
        parent_id: match origin_parent {
          OriginParent::Root => ParentId::Root,
          OriginParent::Span(parent) => ParentId::Span(parent),
        },
        name: options.name.clone().unwrap_or_else(|| "unknown".to_string()),
        start_timestamp: at,
        end_timestamp: None,
        shared: matches!(kind, SpanKind::Server),
        annotations: Vec::new(),
        binary_annotations: Vec::new(),
      },
    );

    let local_config = self.resolve_local_config(options);
    let state = TraceState {
      trace_id,
      root_span_id: span_id,
      parent_id: match origin_parent {
        OriginParent::Root => ParentId::Root,
        OriginParent::Span(parent) => ParentId::Span(parent),
      },
      sample,
      debug,
      spans,
      timestamp: at,
      end_timestamp: None,
      last_activity: at,
      ttl_millis: self.resolve_ttl(options),
      is_async: false,
      config: local_config.clone(),
    };
    let (_key, handle) = self.supervisor.start_tracer(state);

    for delta in self.start_annotations(kind, options) {
      handle.send(Message::Update { span_id, at, deltas: vec![delta] });
    }
    for delta in options.annotations.clone() {
      handle.send(Message::Update { span_id, at, deltas: vec![delta] });
    }

    id = id.with_handle(handle);
    tracing::info!("trace started");
    Ok(id)
  }

  /// Start a new root trace. `options.kind` defaults to `client`.
  pub fn start(&self, options: TraceOptions) -> Result<Id, TraceError> {
    let kind = options.kind.unwrap_or(SpanKind::Client);
    let trace_id = TraceId::generate();
    let span_id = SpanId(trace_id.low_64());
    self.begin(trace_id, span_id, OriginParent::Root, kind, &options)
  }

  /// Join an existing trace, typically on the server side of an inbound request.
  /// `options.kind` defaults to `server`.
  pub fn join(
    &self,
    trace_id: TraceId,
    span_id: SpanId,
    parent_id: OriginParent,
    sample: bool,
    debug: bool,
    mut options: TraceOptions,
  ) -> Result<Id, TraceError> {
    let kind = options.kind.unwrap_or(SpanKind::Server);
    options.sample = Some(sample);
    options.debug = Some(debug);
    self.begin(trace_id, span_id, parent_id, kind, &options)
  }

  /// Open a new child span.
  pub fn start_span(&self, id: &Id, options: TraceOptions) -> Id {
    if !id.sampled() {
      return id.clone();
    }
    let Some(handle) = id.handle() else { return id.clone() };

    let new_span_id = SpanId::generate();
    let at = Timestamp::now();
    handle.send(Message::StartSpan {
      at,
      input: StartSpanInput {
        span_id: new_span_id,
        parent_id: ParentId::Span(id.current_span_id()),
        name: options.name.clone().unwrap_or_else(|| "unknown".to_string()),
        local: options.local.clone(),
        annotations: options.annotations.clone(),
      },
    });
    id.push(new_span_id).with_handle(handle.clone())
  }

  /// Finish a span, popping back to its parent.
  pub fn finish_span(&self, id: &Id, options: TraceOptions) -> Id {
    if !id.sampled() {
      return id.clone();
    }
    let Some(handle) = id.handle() else { return id.clone() };

    let at = Timestamp::now();
    handle.send(Message::FinishSpan {
      span_id: id.current_span_id(),
      at,
      annotations: options.annotations,
    });
    id.pop()
  }

  /// Apply deltas to the current span without finishing it. Returns `id` unchanged.
  pub fn update_span(&self, id: &Id, deltas: Vec<Delta>, options: TraceOptions) -> Id {
    if !id.sampled() {
      return id.clone();
    }
    let Some(handle) = id.handle() else { return id.clone() };

    let at = options.timestamp.unwrap_or_else(Timestamp::now);
    handle.send(Message::Update { span_id: id.current_span_id(), at, deltas });
    id.clone()
  }

  /// Finish the trace. If `options.is_async` is set, the trace transitions to the `Async`
  /// state and keeps running until its child spans finish or its TTL expires.
  pub fn finish(&self, id: &Id, options: TraceOptions) {
    context::clear_trace_id_log_key();
    if !id.sampled() {
      return;
    }
    let Some(handle) = id.handle() else { return };

    let at = Timestamp::now();
    handle.send(Message::Finish {
      at,
      is_async: options.is_async.unwrap_or(false),
      annotations: options.annotations,
    });
  }
}

/// Parse a `type` option string into a [`SpanKind`], for callers taking it as text (e.g. from an
/// external configuration source rather than already-typed code).
pub fn parse_kind(s: &str) -> Result<SpanKind, TraceError> {
  SpanKind::parse(s).ok_or_else(|| TraceError::InvalidKind(s.to_string()))
}

/// `client_send` -> `cs`.
pub fn client_send() -> Delta { Delta::Annotate("cs".to_string(), None) }
/// `client_recv` -> `cr`.
pub fn client_recv() -> Delta { Delta::Annotate("cr".to_string(), None) }
/// `server_send` -> `ss`.
pub fn server_send() -> Delta { Delta::Annotate("ss".to_string(), None) }
/// `server_recv` -> `sr`.
pub fn server_recv() -> Delta { Delta::Annotate("sr".to_string(), None) }
/// `wire_send` -> `ws`.
pub fn wire_send() -> Delta { Delta::Annotate("ws".to_string(), None) }
/// `wire_recv` -> `wr`.
pub fn wire_recv() -> Delta { Delta::Annotate("wr".to_string(), None) }

/// A bare event annotation with an explicit value, optionally attributed to `endpoint`.
pub fn annotate(value: impl Into<String>, endpoint: Option<Endpoint>) -> Delta {
  Delta::Annotate(value.into(), endpoint)
}

/// A string tag.
pub fn tag(key: impl Into<String>, value: impl Into<String>) -> Delta {
  Delta::BinaryAnnotate {
    key: key.into(),
    value: BinaryAnnotationValue::String(value.into()),
    endpoint: None,
  }
}

/// A boolean tag.
pub fn tag_bool(key: impl Into<String>, value: bool) -> Delta {
  Delta::BinaryAnnotate { key: key.into(), value: BinaryAnnotationValue::Bool(value), endpoint: None }
}

/// Set the current span's display name.
pub fn rename(name: impl Into<String>) -> Delta { Delta::Name(name.into()) }

/// Mark the trace asynchronous (used as an `annotations`/`deltas` entry on `finish`).
pub fn make_async() -> Delta { Delta::Async }

/// Run `future` with `id` established as the current task's ambient trace context, per the
/// contextual API surface.
pub async fn surface<F, T>(id: Id, future: F) -> T
where
  F: Future<Output = T>,
{
  context::surface(id, future).await
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::report::ChannelReporter;
  use std::sync::Arc;

  fn client_with_channel() -> (Client, tokio::sync::mpsc::UnboundedReceiver<Vec<crate::wire::WireSpan>>) {
    let (reporter, rx) = ChannelReporter::new();
    let mut config = Config::default();
    config.system_id = "test-svc".to_string();
    config.reporter = Arc::new(reporter);
    (Client::new(config), rx)
  }

  #[tokio::test]
  async fn scenario_root_trace_two_annotations_then_finish() {
    let (client, mut rx) = client_with_channel();
    let id = client
      .start(TraceOptions { name: Some("main".to_string()), sample: Some(true), ..Default::default() })
      .unwrap();
    let id = client.update_span(&id, vec![tag("http.method", "GET")], TraceOptions::default());
    let id = client.update_span(&id, vec![client_recv()], TraceOptions::default());
    client.finish(&id, TraceOptions::default());

    let spans = rx.recv().await.unwrap();
    assert_eq!(spans.len(), 1);
    let span = &spans[0];
    assert_eq!(span.name.as_deref(), Some("main"));
    assert!(span.annotations.iter().any(|a| a.value == "cs"));
    assert!(span.annotations.iter().any(|a| a.value == "cr"));
    assert!(span
      .binary_annotations
      .iter()
      .any(|b| b.key == "http.method" && matches!(&b.value, crate::wire::WireBinaryValue::String(s) if s == "GET")));
    assert!(span.parent_id.is_none());
    assert!(span.duration.unwrap() >= 1);
  }

  #[tokio::test]
  async fn scenario_server_join_with_remote_client() {
    let (client, mut rx) = client_with_channel();
    let trace_id = crate::id::parse_trace(&"a".repeat(32)).unwrap();
    let span_id = crate::id::parse_span(&"b".repeat(16)).unwrap();
    let parent_id = crate::id::parse_span(&"c".repeat(16)).unwrap();

    let id = client
      .join(
        trace_id,
        span_id,
        OriginParent::Span(parent_id),
        true,
        false,
        TraceOptions {
          remote: Some(Endpoint {
            ipv4: Some(std::net::Ipv4Addr::new(10, 0, 0, 1)),
            ipv6: None,
            hostname: None,
            port: None,
            service_name: Some("client-svc".to_string()),
          }),
          ..Default::default()
        },
      )
      .unwrap();
    client.finish(&id, TraceOptions::default());

    let spans = rx.recv().await.unwrap();
    assert_eq!(spans.len(), 1);
    let span = &spans[0];
    assert_eq!(span.trace_id, "a".repeat(32));
    assert_eq!(span.parent_id.as_deref(), Some("c".repeat(16).as_str()));
    assert!(span.duration.is_none());
    assert!(span.annotations.iter().any(|a| a.value == "sr"));
    assert!(span.binary_annotations.iter().any(|b| {
      b.key == "ca"
        && matches!(&b.value, crate::wire::WireBinaryValue::Bool(true))
        && b.endpoint.as_ref().map(|e| e.service_name == "client-svc").unwrap_or(false)
    }));
  }

  #[tokio::test]
  async fn scenario_parallel_child_spans() {
    let (client, mut rx) = client_with_channel();
    let id = client
      .start(TraceOptions { name: Some("main".to_string()), sample: Some(true), ..Default::default() })
      .unwrap();

    let id_a = client.start_span(&id, TraceOptions { name: Some("a".to_string()), ..Default::default() });
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    client.finish_span(&id_a, TraceOptions::default());

    let id_b = client.start_span(&id, TraceOptions { name: Some("b".to_string()), ..Default::default() });
    tokio::time::sleep(std::time::Duration::from_millis(15)).await;
    client.finish_span(&id_b, TraceOptions::default());

    client.finish(&id, TraceOptions::default());

    let spans = rx.recv().await.unwrap();
    assert_eq!(spans.len(), 3);
    let main = spans.iter().find(|s| s.name.as_deref() == Some("main")).unwrap();
    let a = spans.iter().find(|s| s.name.as_deref() == Some("a")).unwrap();
    let b = spans.iter().find(|s| s.name.as_deref() == Some("b")).unwrap();
    assert_eq!(a.parent_id.as_deref(), Some(main.id.as_str()));
    assert_eq!(b.parent_id.as_deref(), Some(main.id.as_str()));
    assert!(main.duration.unwrap() >= a.duration.unwrap().max(b.duration.unwrap()));
  }

  #[tokio::test]
  async fn scenario_debug_trace_reports_debug_on_every_span() {
    let (client, mut rx) = client_with_channel();
    let id = client
      .start(TraceOptions { name: Some("main".to_string()), debug: Some(true), ..Default::default() })
      .unwrap();
    let child = client.start_span(&id, TraceOptions { name: Some("child".to_string()), ..Default::default() });
    client.finish_span(&child, TraceOptions::default());
    client.finish(&id, TraceOptions::default());

    let spans = rx.recv().await.unwrap();
    assert_eq!(spans.len(), 2);
    assert!(spans.iter().all(|s| s.debug));
  }

  #[tokio::test]
  async fn scenario_unsampled_trace_is_a_no_op() {
    let (client, mut rx) = client_with_channel();
    let id = client.start(TraceOptions { sample: Some(false), debug: Some(false), ..Default::default() }).unwrap();
    let original = id.clone();

    let id = client.start_span(&id, TraceOptions::default());
    let id = client.update_span(&id, vec![tag("k", "v")], TraceOptions::default());
    let id = client.finish_span(&id, TraceOptions::default());
    client.finish(&id, TraceOptions::default());

    assert_eq!(id, original);
    assert!(rx.try_recv().is_err());
  }

  #[tokio::test]
  async fn scenario_destructure_and_parse_round_trip() {
    let (client, _rx) = client_with_channel();
    let id = client.start(TraceOptions { sample: Some(true), debug: Some(true), ..Default::default() }).unwrap();
    let (tr, sp, pr, sample, debug) = id.destructure();

    assert_eq!(tr.len(), 32);
    assert_eq!(sp.len(), 16);
    assert_eq!(pr, "");
    assert!(sample);
    assert!(debug);

    let joined = client
      .join(
        crate::id::parse_trace(&tr).unwrap(),
        crate::id::parse_span(&sp).unwrap(),
        OriginParent::Root,
        sample,
        debug,
        TraceOptions::default(),
      )
      .unwrap();
    assert_eq!(joined.trace_id().to_hex(), tr);
  }
}
