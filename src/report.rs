/*
 * Description: The Reporter boundary and non-network implementations.
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

//! The `Reporter` boundary.
//!
//! A reporter is the one point where this crate hands finished spans to the outside world.
//! Encoding them to JSON and posting them to a collector is explicitly out of scope (see the
//! purpose/scope section) — this module only defines the trait and a few non-network
//! implementations useful for testing and for composing with an external sink via a channel.

use crate::wire::WireSpan;

use std::fmt;

/// The single operation a reporter must support: take a batch of finished spans and do
/// something with them.
///
/// Implementations must not panic; a reporter failure is caught by the aggregator, logged, and
/// does not prevent normal termination (see the error handling design).
#[async_trait::async_trait]
pub trait Reporter: fmt::Debug + Send + Sync {
  /// Ingest a batch of spans belonging to one trace.
  async fn ingest(&self, spans: Vec<WireSpan>) -> Result<(), ReportError>;
}

/// A reporter failed to ingest a batch.
///
/// Never propagated to a client; only ever logged by the aggregator that caught it.
#[derive(thiserror::Error, Debug)]
#[error("reporter failed to ingest spans: {0}")]
pub struct ReportError(pub String);

/// A reporter that discards every span.
///
/// Useful as the default when no reporter is configured and tracing is only being exercised for
/// its side effects on task-local logging context.
#[derive(Debug, Default)]
pub struct NullReporter;

#[async_trait::async_trait]
impl Reporter for NullReporter {
  async fn ingest(&self, _spans: Vec<WireSpan>) -> Result<(), ReportError> { Ok(()) }
}

/// A reporter that logs each batch via `tracing` at debug level.
///
/// Grounded in the teacher's habit of routing everything through `tracing` rather than
/// `println!`; useful during development before a real collector is wired up.
#[derive(Debug, Default)]
pub struct LoggingReporter;

#[async_trait::async_trait]
impl Reporter for LoggingReporter {
  async fn ingest(&self, spans: Vec<WireSpan>) -> Result<(), ReportError> {
    for span in &spans {
      tracing::debug!(trace_id = %span.trace_id, id = %span.id, name = ?span.name, "reporting span");
    }
    Ok(())
  }
}

/// A reporter that forwards each batch over an unbounded channel.
///
/// Grounded in the teacher's `StringProcess`/`BytesProcess` pattern of exposing a receiver end
/// to the caller while a background task drives the sender; here the "background task" is the
/// aggregator itself, and this reporter is just the sender half. Used by this crate's own
/// integration tests, and usable by any downstream caller that wants to own the encode/post
/// step itself.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
  sender: tokio::sync::mpsc::UnboundedSender<Vec<WireSpan>>,
}

impl ChannelReporter {
  /// Construct a new channel reporter, returning it paired with the receiver end.
  pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<Vec<WireSpan>>) {
    let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
    (Self { sender }, receiver)
  }
}

#[async_trait::async_trait]
impl Reporter for ChannelReporter {
  async fn ingest(&self, spans: Vec<WireSpan>) -> Result<(), ReportError> {
    self
      .sender
      .send(spans)
      .map_err(|e| ReportError(format!("receiver dropped: {e}")))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn null_reporter_always_ok() {
    assert!(NullReporter.ingest(Vec::new()).await.is_ok());
  }

  #[tokio::test]
  async fn channel_reporter_forwards_batches() {
    let (reporter, mut rx) = ChannelReporter::new();
    reporter.ingest(Vec::new()).await.unwrap();
    let received = rx.recv().await.unwrap();
    assert!(received.is_empty());
  }

  #[tokio::test]
  async fn channel_reporter_errors_after_receiver_dropped() {
    let (reporter, rx) = ChannelReporter::new();
    drop(rx);
    assert!(reporter.ingest(Vec::new()).await.is_err());
  }
}
