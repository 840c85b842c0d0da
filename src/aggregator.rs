/*
 * Description: The per-trace actor: owns one trace's mutable state, serializes its mutations.
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

//! The per-trace actor.
//!
//! Modeled on the teacher's `lines`/`bytes` modules: a `tokio::task::spawn`ed future owns all
//! mutable state and a channel receiver; callers never touch the state directly, only send
//! messages. Here the state is a [`TraceState`] rather than a byte buffer, and the actor
//! additionally races the receiver against a TTL timer via `tokio::select!`.

use crate::id::SpanId;
use crate::model::{Annotation, BinaryAnnotation, BinaryAnnotationValue, Endpoint, LocalConfig, ParentId, SpanInfo, TraceState};
use crate::timeout::apply_timeout;
use crate::timestamp::Timestamp;
use crate::wire::convert_trace;

use tokio::sync::mpsc;
use tokio::time::Duration;

/// One mutation to apply to a span or to the trace as a whole.
///
/// Carries no timestamp itself — the timestamp lives on the enclosing [`Message`], captured by
/// the client at the call site, per the "client-side captured timestamp" contract.
#[derive(Debug, Clone)]
pub enum Delta {
  /// Set the span's display name.
  Name(String),
  /// Mark the trace as asynchronous and add an `async` event annotation.
  Async,
  /// Prepend an event annotation. `None` endpoint defaults to the config-derived local
  /// endpoint at apply time.
  Annotate(String, Option<Endpoint>),
  /// Prepend a binary annotation (tag).
  BinaryAnnotate {
    /// The tag key.
    key: String,
    /// The tag value.
    value: BinaryAnnotationValue,
    /// The tag's endpoint, if any.
    endpoint: Option<Endpoint>,
  },
}

impl Delta {
  fn apply(self, span: &mut SpanInfo, at: Timestamp, local_endpoint: &Endpoint) {
    match self {
      Delta::Name(name) => span.name = name,
      Delta::Async => span.annotations.insert(
        0,
        Annotation {
          timestamp: at,
          value: "async".to_string(),
          endpoint: Some(local_endpoint.clone()),
        },
      ),
      Delta::Annotate(value, endpoint) => span.annotations.insert(
        0,
        Annotation {
          timestamp: at,
          value,
          endpoint: endpoint.or_else(|| Some(local_endpoint.clone())),
        },
      ),
      Delta::BinaryAnnotate { key, value, endpoint } => span.binary_annotations.insert(
        0,
        BinaryAnnotation { key, value, endpoint },
      ),
    }
  }
}

/// Span-start parameters carried by the [`Message::StartSpan`] message.
#[derive(Debug, Clone)]
pub struct StartSpanInput {
  /// The new span's id.
  pub span_id: SpanId,
  /// The span it nests under.
  pub parent_id: ParentId,
  /// Display name; defaults to `"unknown"` at the client if unset.
  pub name: String,
  /// If set, adds an `lc` binary annotation with this component name.
  pub local: Option<String>,
  /// Extra deltas to apply immediately after insertion.
  pub annotations: Vec<Delta>,
}

/// One message sent from a client to its trace's aggregator.
#[derive(Debug)]
pub enum Message {
  /// Insert a new span.
  StartSpan {
    /// Client-captured timestamp.
    at: Timestamp,
    /// Span-start parameters.
    input: StartSpanInput,
  },
  /// Mark a span finished.
  FinishSpan {
    /// Which span.
    span_id: SpanId,
    /// Client-captured timestamp.
    at: Timestamp,
    /// Extra deltas to apply before marking finished.
    annotations: Vec<Delta>,
  },
  /// Apply deltas to a span without finishing it.
  Update {
    /// Which span.
    span_id: SpanId,
    /// Client-captured (or overridden) timestamp.
    at: Timestamp,
    /// The deltas to apply, in order.
    deltas: Vec<Delta>,
  },
  /// Finish the trace.
  Finish {
    /// Client-captured timestamp.
    at: Timestamp,
    /// Transition to `Async` instead of terminating immediately.
    is_async: bool,
    /// Extra deltas to apply to the root span before finishing/transitioning.
    annotations: Vec<Delta>,
  },
}

impl Message {
  /// The timestamp every message carries, used to re-arm the aggregator's TTL.
  fn timestamp(&self) -> Timestamp {
    match self {
      Message::StartSpan { at, .. } => *at,
      Message::FinishSpan { at, .. } => *at,
      Message::Update { at, .. } => *at,
      Message::Finish { at, .. } => *at,
    }
  }
}

/// A handle clients use to send messages to a running aggregator.
#[derive(Debug, Clone)]
pub struct AggregatorHandle {
  sender: mpsc::UnboundedSender<Message>,
}

impl AggregatorHandle {
  /// Send a message. A closed channel (aggregator already terminated) is a silent no-op, per
  /// the missing-aggregator tolerance.
  pub fn send(&self, message: Message) {
    if self.sender.send(message).is_err() {
      tracing::debug!("message sent to a terminated aggregator; dropped");
    }
  }
}

enum FinishState {
  Active,
  Async,
}

/// Spawn a new aggregator owning `state`, returning a handle clients can send messages to.
pub fn spawn(mut state: TraceState) -> AggregatorHandle {
  let (sender, mut receiver) = mpsc::unbounded_channel::<Message>();
  let trace_id = state.trace_id;

  tokio::spawn(async move {
    let mut finish_state = FinishState::Active;

    loop {
      let ttl = Duration::from_millis(state.ttl_millis);
      tokio::select! {
        maybe_message = receiver.recv() => {
          match maybe_message {
            Some(message) => {
              state.last_activity = message.timestamp();
              match apply_message(&mut state, message, &mut finish_state) {
                ControlFlow::Continue => continue,
                ControlFlow::Terminate => break,
              }
            },
            None => {
              tracing::debug!(trace_id = %trace_id, "all senders dropped; terminating aggregator");
              break;
            },
          }
        },
        _ = tokio::time::sleep(ttl) => {
          tracing::debug!(trace_id = %trace_id, "aggregator ttl expired");
          apply_timeout(&mut state, Timestamp::now());
          break;
        },
      }
    }

    report(&state).await;
  });

  AggregatorHandle { sender }
}

enum ControlFlow {
  Continue,
  Terminate,
}

fn apply_message(state: &mut TraceState, message: Message, finish_state: &mut FinishState) -> ControlFlow {
  match message {
    Message::StartSpan { at, input } => {
      let local_endpoint = state.config.local_endpoint.clone();
      let mut span = SpanInfo {
        id: input.span_id,
        parent_id: input.parent_id,
        name: input.name,
        start_timestamp: at,
        end_timestamp: None,
        shared: false,
        annotations: Vec::new(),
        binary_annotations: Vec::new(),
      };
      if let Some(component) = input.local {
        span.binary_annotations.push(BinaryAnnotation {
          key: "lc".to_string(),
          value: BinaryAnnotationValue::String(component),
          endpoint: Some(local_endpoint.clone()),
        });
      }
      for delta in input.annotations {
        delta.apply(&mut span, at, &local_endpoint);
      }
      state.spans.insert(input.span_id, span);
      ControlFlow::Continue
    },

    Message::FinishSpan { span_id, at, annotations } => {
      let local_endpoint = state.config.local_endpoint.clone();
      if let Some(span) = state.spans.get_mut(&span_id) {
        for delta in annotations {
          delta.apply(span, at, &local_endpoint);
        }
        span.end_timestamp = Some(at);
      } else {
        tracing::debug!("finish_span for unknown span id; ignored");
      }
      ControlFlow::Continue
    },

    Message::Update { span_id, at, deltas } => {
      let local_endpoint = state.config.local_endpoint.clone();
      if let Some(span) = state.spans.get_mut(&span_id) {
        for delta in deltas {
          delta.apply(span, at, &local_endpoint);
        }
      } else {
        tracing::debug!("update for unknown span id; ignored");
      }
      ControlFlow::Continue
    },

    Message::Finish { at, is_async, annotations } => {
      let local_endpoint = state.config.local_endpoint.clone();
      let root_id = state.root_span_id;
      if let Some(root) = state.spans.get_mut(&root_id) {
        for delta in annotations {
          delta.apply(root, at, &local_endpoint);
        }
      }

      if is_async {
        state.is_async = true;
        *finish_state = FinishState::Async;
        if let Some(root) = state.spans.get_mut(&root_id) {
          let already_present = root.annotations.iter().any(|a| a.value == "async");
          if !already_present {
            root.annotations.insert(
              0,
              Annotation {
                timestamp: at,
                value: "async".to_string(),
                endpoint: Some(local_endpoint),
              },
            );
          }
        }
        ControlFlow::Continue
      } else {
        match finish_state {
          FinishState::Active | FinishState::Async => {
            state.end_timestamp = Some(at);
            ControlFlow::Terminate
          },
        }
      }
    },
  }
}

async fn report(state: &TraceState) {
  let spans = convert_trace(state);
  if let Err(err) = state.config.reporter.ingest(spans).await {
    tracing::warn!(error = %err, "reporter failed to ingest spans");
  }
}
