/*
 * Description: Trace/span identifiers, their textual codec, and the propagable Id handle.
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

//! Trace/span identifiers, their textual codec, and the propagable [`Id`] handle.

use crate::error::{IdKind, IdParseError};

use rand::RngCore;

use std::fmt;

const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";

/// A precomputed byte -> two-lower-case-hex-chars table, indexed by the byte value.
///
/// Avoids a generic integer-to-string format call per byte on the hot conversion path, per the
/// "Hex encoding" design note.
static HEX_TABLE: [[u8; 2]; 256] = build_hex_table();

const fn build_hex_table() -> [[u8; 2]; 256] {
  let mut table = [[0u8; 2]; 256];
  let mut i = 0usize;
  while i < 256 {
    table[i] = [HEX_CHARS[i >> 4], HEX_CHARS[i & 0xf]];
    i += 1;
  }
  table
}

fn encode_hex(bytes: &[u8]) -> String {
  let mut out = String::with_capacity(bytes.len() * 2);
  for &b in bytes {
    let pair = HEX_TABLE[b as usize];
    out.push(pair[0] as char);
    out.push(pair[1] as char);
  }
  out
}

fn decode_hex_exact(s: &str, kind: IdKind) -> Result<Vec<u8>, IdParseError> {
  let is_valid = !s.is_empty()
    && s.len() % 2 == 0
    && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
  if !is_valid {
    return Err(IdParseError {
      kind,
      input: s.to_string(),
    });
  }
  let mut out = Vec::with_capacity(s.len() / 2);
  let bytes = s.as_bytes();
  let mut i = 0;
  while i < bytes.len() {
    let hi = hex_val(bytes[i]);
    let lo = hex_val(bytes[i + 1]);
    out.push((hi << 4) | lo);
    i += 2;
  }
  Ok(out)
}

fn hex_val(b: u8) -> u8 {
  match b {
    b'0'..=b'9' => b - b'0',
    b'a'..=b'f' => b - b'a' + 10,
    _ => unreachable!("validated by decode_hex_exact"),
  }
}

/// A 128-bit trace identifier, shared by every span within one trace.
///
/// Accepted textual forms are exactly 32 lower-case hex characters, or exactly 16 (the 64-bit
/// compatibility form, left-zero-extended to 128 bits on parse).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId(pub u128);

impl TraceId {
  /// Generate a new trace id from a cryptographically strong random source.
  pub fn generate() -> Self {
    let mut rng = rand::thread_rng();
    Self(rng.next_u64() as u128 | ((rng.next_u64() as u128) << 64))
  }

  /// Render the canonical 32-character lower-case hex form.
  pub fn to_hex(self) -> String {
    encode_hex(&self.0.to_be_bytes())
  }

  /// The low 64 bits, used to derive an initial span id from a freshly generated trace id.
  pub fn low_64(self) -> u64 {
    self.0 as u64
  }
}

impl fmt::Display for TraceId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.to_hex())
  }
}

/// Parse a trace id from its textual form.
///
/// Accepts exactly 32 or exactly 16 lower-case hex characters; anything else (wrong length,
/// whitespace, upper-case, non-hex) is a parse error, never a silent best-effort acceptance.
pub fn parse_trace(s: &str) -> Result<TraceId, IdParseError> {
  let bytes = decode_hex_exact(s, IdKind::Trace)?;
  let value = match bytes.len() {
    16 => {
      let mut buf = [0u8; 16];
      buf[8..].copy_from_slice(&bytes);
      u128::from_be_bytes(buf)
    },
    8 => {
      let mut buf = [0u8; 8];
      buf.copy_from_slice(&bytes);
      u64::from_be_bytes(buf) as u128
    },
    _ => {
      return Err(IdParseError {
        kind: IdKind::Trace,
        input: s.to_string(),
      })
    },
  };
  Ok(TraceId(value))
}

/// A 64-bit span identifier, unique within its trace.
///
/// Canonical textual form is exactly 16 lower-case hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId(pub u64);

impl SpanId {
  /// Generate a new span id from a cryptographically strong random source.
  pub fn generate() -> Self { Self(rand::thread_rng().next_u64()) }

  /// Render the canonical 16-character lower-case hex form.
  pub fn to_hex(self) -> String { encode_hex(&self.0.to_be_bytes()) }
}

impl fmt::Display for SpanId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.to_hex())
  }
}

/// Parse a span id from its textual form.
///
/// Accepts exactly 16 lower-case hex characters.
pub fn parse_span(s: &str) -> Result<SpanId, IdParseError> {
  let bytes = decode_hex_exact(s, IdKind::Span)?;
  if bytes.len() != 8 {
    return Err(IdParseError {
      kind: IdKind::Span,
      input: s.to_string(),
    });
  }
  let mut buf = [0u8; 8];
  buf.copy_from_slice(&bytes);
  Ok(SpanId(u64::from_be_bytes(buf)))
}

/// The parent a trace's root span joined under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OriginParent {
  /// This trace began here; there is no parent outside this process.
  Root,
  /// This trace joined an existing span (typically a server-side join on an inbound request).
  Span(SpanId),
}

/// The opaque, propagable trace context handle.
///
/// Passed by value; cheap to clone at the shallow depths real call graphs reach. The ancestor
/// stack is a plain `Vec`, pushed/popped non-destructively (each operation returns a new `Id`
/// rather than mutating in place), matching the "Opaque handle" design note without introducing a
/// persistent cons-list dependency this corpus never reaches for.
#[derive(Debug, Clone)]
pub struct Id {
  trace_id: TraceId,
  current_span_id: SpanId,
  origin_parent_id: OriginParent,
  ancestor_stack: Vec<SpanId>,
  sample: bool,
  debug: bool,
  sampled: bool,
  /// `true` for the distinguished sentinel returned by unsampled-path short-circuits and by
  /// [`Id::ignore`]. Every operation on an ignored `Id` is a no-op that returns the same `Id`.
  ignored: bool,
  /// The aggregator this trace was started/joined with, if sampled. `None` for unsampled
  /// traces and for the `ignore` sentinel, so the fast path never allocates or looks anything
  /// up. Not part of equality: two `Id`s are compared by their addressable identity, not by
  /// which aggregator instance happens to be backing them.
  handle: Option<crate::aggregator::AggregatorHandle>,
}

impl PartialEq for Id {
  fn eq(&self, other: &Self) -> bool {
    self.trace_id == other.trace_id
      && self.current_span_id == other.current_span_id
      && self.origin_parent_id == other.origin_parent_id
      && self.ancestor_stack == other.ancestor_stack
      && self.sample == other.sample
      && self.debug == other.debug
      && self.sampled == other.sampled
      && self.ignored == other.ignored
  }
}
impl Eq for Id {}

impl Id {
  /// Construct a new `Id` with an empty ancestor stack.
  ///
  /// `sampled` is cached as `sample || debug`, per the invariant in §3.
  pub fn init(
    trace_id: TraceId,
    span_id: SpanId,
    parent_id: OriginParent,
    sample: bool,
    debug: bool,
  ) -> Self {
    Self {
      trace_id,
      current_span_id: span_id,
      origin_parent_id: parent_id,
      ancestor_stack: Vec::new(),
      sample,
      debug,
      sampled: sample || debug,
      ignored: false,
      handle: None,
    }
  }

  /// The distinguished "ignore" sentinel. Every API operation on it is a no-op returning itself.
  pub fn ignore() -> Self {
    Self {
      trace_id: TraceId(0),
      current_span_id: SpanId(0),
      origin_parent_id: OriginParent::Root,
      ancestor_stack: Vec::new(),
      sample: false,
      debug: false,
      sampled: false,
      ignored: true,
      handle: None,
    }
  }

  /// Attach the aggregator handle this trace was started/joined with.
  ///
  /// Called once by the client API immediately after a sampled trace's aggregator is spawned.
  pub fn with_handle(mut self, handle: crate::aggregator::AggregatorHandle) -> Self {
    self.handle = Some(handle);
    self
  }

  /// The aggregator handle this trace is backed by, if sampled.
  pub fn handle(&self) -> Option<&crate::aggregator::AggregatorHandle> { self.handle.as_ref() }

  /// Whether this is the `ignore` sentinel.
  pub fn is_ignored(&self) -> bool { self.ignored }

  /// The cached `sample || debug` bit. `false` triggers the allocation-free, message-free
  /// fast path in every client API call.
  pub fn sampled(&self) -> bool { self.sampled }

  /// Whether the caller explicitly requested sampling (independent of `debug`).
  pub fn sample(&self) -> bool { self.sample }

  /// Whether the caller forced sampling regardless of the sampling decision.
  pub fn debug(&self) -> bool { self.debug }

  /// The trace this handle belongs to.
  pub fn trace_id(&self) -> TraceId { self.trace_id }

  /// The span this handle currently points at.
  pub fn current_span_id(&self) -> SpanId { self.current_span_id }

  /// The parent this trace joined under, if this is the root handle with no open children.
  pub fn origin_parent_id(&self) -> OriginParent { self.origin_parent_id }

  /// Push a new child span onto this handle.
  ///
  /// The current span id is moved onto the ancestor stack; `new_span_id` becomes current.
  /// `origin_parent_id` is untouched. A no-op on the `ignore` sentinel.
  pub fn push(&self, new_span_id: SpanId) -> Self {
    if self.ignored {
      return self.clone();
    }
    let mut ancestor_stack = self.ancestor_stack.clone();
    ancestor_stack.push(self.current_span_id);
    Self {
      current_span_id: new_span_id,
      ancestor_stack,
      ..self.clone()
    }
  }

  /// Pop the current span, restoring the most recent ancestor.
  ///
  /// On an empty ancestor stack, returns `self` unchanged (there is no parent to restore to
  /// locally; `origin_parent_id` remains the record of what this trace joined under). A no-op on
  /// the `ignore` sentinel.
  pub fn pop(&self) -> Self {
    if self.ignored {
      return self.clone();
    }
    let mut ancestor_stack = self.ancestor_stack.clone();
    match ancestor_stack.pop() {
      Some(parent) => Self {
        current_span_id: parent,
        ancestor_stack,
        ..self.clone()
      },
      None => self.clone(),
    }
  }

  /// Decompose this handle into its wire-propagable textual components.
  ///
  /// The parent component is: empty string if the ancestor stack is empty and
  /// `origin_parent_id` is [`OriginParent::Root`]; the hex form of `origin_parent_id` if the
  /// stack is empty but it is a span; otherwise the hex form of the stack's head.
  pub fn destructure(&self) -> (String, String, String, bool, bool) {
    let parent_hex = match (self.ancestor_stack.last(), self.origin_parent_id) {
      (Some(top), _) => top.to_hex(),
      (None, OriginParent::Root) => String::new(),
      (None, OriginParent::Span(parent)) => parent.to_hex(),
    };
    (
      self.trace_id.to_hex(),
      self.current_span_id.to_hex(),
      parent_hex,
      self.sample,
      self.debug,
    )
  }
}
