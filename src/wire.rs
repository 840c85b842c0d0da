/*
 * Description: Protocol (wire) types and conversion from the in-memory trace model.
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

//! Protocol (wire) types, kept separate from [`crate::model`]'s in-memory representation.
//!
//! These types derive [`serde::Serialize`] behind the `serde` feature purely so a downstream
//! JSON encoder (out of scope here) has a typed value to serialize against; this crate never
//! calls `serde_json::to_string` on them itself.

use crate::model::{Annotation, BinaryAnnotation, BinaryAnnotationValue, Endpoint, ParentId, SpanInfo, TraceState};

use std::net::{ToSocketAddrs, Ipv4Addr, Ipv6Addr};

#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
#[derive(Debug, Clone, PartialEq)]
/// A single finished span, in the shape the Zipkin v1 collector API expects.
pub struct WireSpan {
  /// 16- or 32-character lower-case hex trace id.
  pub trace_id: String,
  /// 16-character lower-case hex span id.
  pub id: String,
  /// 16-character lower-case hex parent span id, omitted for root spans.
  #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
  pub parent_id: Option<String>,
  /// The span's display name.
  #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
  pub name: Option<String>,
  /// Microseconds since the Unix epoch.
  pub timestamp: i64,
  /// Microseconds; absent for shared (server-joined) spans.
  #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
  pub duration: Option<i64>,
  /// Whether this span was marked debug.
  pub debug: bool,
  /// Event annotations, sorted by timestamp.
  pub annotations: Vec<WireAnnotation>,
  /// Tags, sorted by timestamp.
  pub binary_annotations: Vec<WireBinaryAnnotation>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, PartialEq)]
/// A timestamped event, as reported on the wire.
pub struct WireAnnotation {
  /// Microseconds since the Unix epoch.
  pub timestamp: i64,
  /// The event value, e.g. `cs`, `sr`, `timeout`.
  pub value: String,
  /// The endpoint this event is attributed to, if any.
  #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
  pub endpoint: Option<WireEndpoint>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
#[derive(Debug, Clone, PartialEq)]
/// A key/value tag, as reported on the wire.
pub struct WireBinaryAnnotation {
  /// The tag key.
  pub key: String,
  /// The tag value.
  pub value: WireBinaryValue,
  /// The endpoint this tag is attributed to, if any.
  #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
  pub endpoint: Option<WireEndpoint>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
#[derive(Debug, Clone, PartialEq)]
/// A tag's typed value, as reported on the wire.
///
/// Booleans round-trip as booleans; bytes are base64-encoded; strings pass through; integer
/// types round-trip numerically.
pub enum WireBinaryValue {
  /// A UTF-8 string.
  String(String),
  /// A boolean, used by the distinguished `ca`/`sa` peer-address tags.
  Bool(bool),
  /// A 16-bit signed integer.
  I16(i16),
  /// A 32-bit signed integer.
  I32(i32),
  /// A 64-bit signed integer.
  I64(i64),
  /// A double-precision float.
  Double(f64),
  /// Base64-encoded bytes.
  Bytes(String),
}

#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
#[derive(Debug, Clone, PartialEq, Eq)]
/// A network endpoint, as reported on the wire.
pub struct WireEndpoint {
  /// Lower-case service name; empty string if unknown.
  pub service_name: String,
  /// Port; `0` if unknown.
  pub port: u16,
  /// Canonical IPv4 address string, if known.
  #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
  pub ipv4: Option<String>,
  /// Canonical IPv6 address string, if known.
  #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
  pub ipv6: Option<String>,
}

const BASE64_ALPHABET: &[u8; 64] =
  b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// A small table-driven base64 encoder, in the same spirit as the hex table in [`crate::id`].
///
/// Not pulled in as a dependency since this crate needs only one direction of one encoding.
fn base64_encode(bytes: &[u8]) -> String {
  let mut out = String::with_capacity((bytes.len() + 2) / 3 * 4);
  for chunk in bytes.chunks(3) {
    let b0 = chunk[0];
    let b1 = chunk.get(1).copied();
    let b2 = chunk.get(2).copied();

    let c0 = b0 >> 2;
    let c1 = ((b0 & 0x03) << 4) | (b1.unwrap_or(0) >> 4);
    let c2 = ((b1.unwrap_or(0) & 0x0f) << 2) | (b2.unwrap_or(0) >> 6);
    let c3 = b2.unwrap_or(0) & 0x3f;

    out.push(BASE64_ALPHABET[c0 as usize] as char);
    out.push(BASE64_ALPHABET[c1 as usize] as char);
    out.push(if b1.is_some() { BASE64_ALPHABET[c2 as usize] as char } else { '=' });
    out.push(if b2.is_some() { BASE64_ALPHABET[c3 as usize] as char } else { '=' });
  }
  out
}

fn resolve_endpoint(endpoint: &Endpoint) -> WireEndpoint {
  let mut ipv4 = endpoint.ipv4;
  let mut ipv6 = endpoint.ipv6;

  if ipv4.is_none() && ipv6.is_none() {
    if let Some(hostname) = &endpoint.hostname {
      let lookup_target = format!("{hostname}:0");
      if let Ok(addrs) = lookup_target.to_socket_addrs() {
        for addr in addrs {
          match addr.ip() {
            std::net::IpAddr::V4(v4) => {
              ipv4 = Some(v4);
              break;
            },
            std::net::IpAddr::V6(v6) if ipv6.is_none() => ipv6 = Some(v6),
            _ => {},
          }
        }
      }
    }
  }

  WireEndpoint {
    service_name: endpoint.service_name.clone().unwrap_or_default(),
    port: endpoint.port.unwrap_or(0),
    ipv4: ipv4.as_ref().map(Ipv4Addr::to_string),
    ipv6: ipv6.as_ref().map(Ipv6Addr::to_string),
  }
}

fn convert_annotation(a: &Annotation) -> WireAnnotation {
  WireAnnotation {
    timestamp: a.timestamp.to_absolute_micros() as i64,
    value: a.value.clone(),
    endpoint: a.endpoint.as_ref().map(resolve_endpoint),
  }
}

fn convert_binary_annotation(b: &BinaryAnnotation) -> WireBinaryAnnotation {
  let value = match &b.value {
    BinaryAnnotationValue::String(s) => WireBinaryValue::String(s.clone()),
    BinaryAnnotationValue::Bool(v) => WireBinaryValue::Bool(*v),
    BinaryAnnotationValue::I16(v) => WireBinaryValue::I16(*v),
    BinaryAnnotationValue::I32(v) => WireBinaryValue::I32(*v),
    BinaryAnnotationValue::I64(v) => WireBinaryValue::I64(*v),
    BinaryAnnotationValue::Double(v) => WireBinaryValue::Double(*v),
    BinaryAnnotationValue::Bytes(raw) => WireBinaryValue::Bytes(base64_encode(raw)),
  };
  WireBinaryAnnotation {
    key: b.key.clone(),
    value,
    endpoint: b.endpoint.as_ref().map(resolve_endpoint),
  }
}

/// Convert one span, given the trace's id, its `debug` bit, and the timestamp to use as the
/// fallback end for unfinished spans (the trace's own `end_timestamp`).
pub fn convert_span(
  trace_id_hex: &str,
  trace_debug: bool,
  span: &SpanInfo,
  trace_end: crate::timestamp::Timestamp,
) -> WireSpan {
  let mut annotations: Vec<WireAnnotation> = span.annotations.iter().map(convert_annotation).collect();
  annotations.sort_by_key(|a| a.timestamp);

  // Binary annotations carry no timestamp field on the wire, so arrival order (newest-first,
  // as prepended by the aggregator) is preserved rather than sorted.
  let binary_annotations: Vec<WireBinaryAnnotation> =
    span.binary_annotations.iter().map(convert_binary_annotation).collect();

  let duration = if span.shared {
    None
  } else {
    let end = span.end_timestamp.unwrap_or(trace_end);
    Some(span.start_timestamp.duration_micros(end) as i64)
  };

  WireSpan {
    trace_id: trace_id_hex.to_string(),
    id: span.id.to_hex(),
    parent_id: match span.parent_id {
      ParentId::Root => None,
      ParentId::Span(id) => Some(id.to_hex()),
    },
    name: Some(span.name.clone()),
    timestamp: span.start_timestamp.to_absolute_micros() as i64,
    duration,
    debug: trace_debug,
    annotations,
    binary_annotations,
  }
}

/// Convert a full trace into its wire spans, one per entry in `state.spans`.
pub fn convert_trace(state: &TraceState) -> Vec<WireSpan> {
  let trace_id_hex = state.trace_id.to_hex();
  let trace_end = state.end_timestamp.unwrap_or(state.last_activity);
  let mut spans: Vec<WireSpan> = state
    .spans
    .values()
    .map(|span| convert_span(&trace_id_hex, state.debug, span, trace_end))
    .collect();
  spans.sort_by_key(|s| s.timestamp);
  spans
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn base64_round_trip_known_vectors() {
    assert_eq!(base64_encode(b""), "");
    assert_eq!(base64_encode(b"f"), "Zg==");
    assert_eq!(base64_encode(b"fo"), "Zm8=");
    assert_eq!(base64_encode(b"foo"), "Zm9v");
    assert_eq!(base64_encode(b"foob"), "Zm9vYg==");
    assert_eq!(base64_encode(b"fooba"), "Zm9vYmE=");
    assert_eq!(base64_encode(b"foobar"), "Zm9vYmFy");
  }

  #[test]
  fn endpoint_defaults_empty_name_and_zero_port() {
    let e = Endpoint {
      ipv4: None,
      ipv6: None,
      hostname: None,
      port: None,
      service_name: None,
    };
    let w = resolve_endpoint(&e);
    assert_eq!(w.service_name, "");
    assert_eq!(w.port, 0);
  }

  #[test]
  fn explicit_ipv4_passes_through() {
    let e = Endpoint {
      ipv4: Some(Ipv4Addr::new(10, 0, 0, 1)),
      ipv6: None,
      hostname: None,
      port: Some(8080),
      service_name: Some("svc".into()),
    };
    let w = resolve_endpoint(&e);
    assert_eq!(w.ipv4.as_deref(), Some("10.0.0.1"));
    assert_eq!(w.port, 8080);
    assert_eq!(w.service_name, "svc");
  }

  fn bare_span(id: crate::id::SpanId) -> SpanInfo {
    SpanInfo {
      id,
      parent_id: ParentId::Root,
      name: "main".to_string(),
      start_timestamp: crate::timestamp::Timestamp::now(),
      end_timestamp: None,
      shared: false,
      annotations: Vec::new(),
      binary_annotations: Vec::new(),
    }
  }

  #[test]
  fn convert_span_reports_the_trace_debug_bit() {
    let span = bare_span(crate::id::SpanId::generate());
    let now = crate::timestamp::Timestamp::now();

    let not_debug = convert_span("a".repeat(32).as_str(), false, &span, now);
    assert!(!not_debug.debug);

    let debug = convert_span("a".repeat(32).as_str(), true, &span, now);
    assert!(debug.debug);
  }
}
