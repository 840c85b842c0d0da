/*
 * Description: End-to-end scenarios exercising the client API against a channel reporter.
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

use std::sync::Arc;
use std::time::Duration;

use zipkin_trace::client::{self, make_async};
use zipkin_trace::{ChannelReporter, Client, Config, OriginParent, TraceOptions};

fn init_test_logging() {
  let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn client_with_channel() -> (Client, tokio::sync::mpsc::UnboundedReceiver<Vec<zipkin_trace::wire::WireSpan>>) {
  init_test_logging();
  let (reporter, rx) = ChannelReporter::new();
  let config = Config { reporter: Arc::new(reporter), ..Config::default() };
  (Client::new(config), rx)
}

#[tokio::test]
async fn async_trace_with_one_timed_out_child() {
  let (client, mut rx) = client_with_channel();
  let id = client
    .start(TraceOptions {
      name: Some("main".to_string()),
      sample: Some(true),
      ttl_millis: Some(100),
      ..Default::default()
    })
    .unwrap();

  let slow = client.start_span(&id, TraceOptions { name: Some("slow".to_string()), ..Default::default() });
  let _ = slow;

  client.finish(&id, TraceOptions { is_async: Some(true), annotations: vec![make_async()], ..Default::default() });

  let spans = tokio::time::timeout(Duration::from_millis(500), rx.recv())
    .await
    .expect("aggregator should terminate once its ttl expires")
    .unwrap();

  assert_eq!(spans.len(), 2);
  let main = spans.iter().find(|s| s.name.as_deref() == Some("main")).unwrap();
  let slow_span = spans.iter().find(|s| s.name.as_deref() == Some("slow")).unwrap();

  assert!(main.annotations.iter().any(|a| a.value == "async"));
  assert!(slow_span.annotations.iter().any(|a| a.value == "timeout"));
  let main_end = main.timestamp + main.duration.unwrap_or(0);
  let slow_end = slow_span.timestamp + slow_span.duration.unwrap_or(0);
  assert!((main_end - slow_end).abs() < 1_000, "main and slow should close within the same timeout tick");
}

#[tokio::test]
async fn contextual_api_round_trips_through_task_local_storage() {
  let (client, mut rx) = client_with_channel();
  let id = client.start(TraceOptions { sample: Some(true), ..Default::default() }).unwrap();
  let trace_hex = id.trace_id().to_hex();

  client::surface(id, async {
    let current = zipkin_trace::context::submerge(zipkin_trace::DebugContextPolicy::Raise).unwrap();
    assert_eq!(current.trace_id().to_hex(), trace_hex);
  })
  .await;

  // The context only exists inside the `surface` scope; outside it, silent policy degrades to
  // the ignore sentinel rather than panicking or leaking state across tasks.
  let outside = zipkin_trace::context::submerge(zipkin_trace::DebugContextPolicy::Silent).unwrap();
  assert!(outside.is_ignored());

  let _ = rx.try_recv();
}

#[tokio::test]
async fn missing_context_raise_policy_surfaces_an_error() {
  let result = zipkin_trace::context::submerge(zipkin_trace::DebugContextPolicy::Raise);
  assert!(matches!(result, Err(zipkin_trace::TraceError::MissingContext)));
}

#[tokio::test]
async fn invalid_remote_endpoint_is_rejected() {
  let (client, _rx) = client_with_channel();
  let result = client.start(TraceOptions {
    sample: Some(true),
    remote: Some(zipkin_trace::Endpoint {
      ipv4: None,
      ipv6: None,
      hostname: None,
      port: None,
      service_name: None,
    }),
    ..Default::default()
  });
  assert!(matches!(result, Err(zipkin_trace::TraceError::InvalidRemoteEndpoint)));
}

#[tokio::test]
async fn join_without_explicit_kind_defaults_to_server_and_is_shared() {
  let (client, mut rx) = client_with_channel();
  let trace_id = zipkin_trace::id::parse_trace(&"1".repeat(32)).unwrap();
  let span_id = zipkin_trace::id::parse_span(&"2".repeat(16)).unwrap();

  let id = client
    .join(trace_id, span_id, OriginParent::Root, true, false, TraceOptions::default())
    .unwrap();
  client.finish(&id, TraceOptions::default());

  let spans = rx.recv().await.unwrap();
  assert_eq!(spans.len(), 1);
  assert!(spans[0].duration.is_none());
  assert!(spans[0].annotations.iter().any(|a| a.value == "sr"));
}
