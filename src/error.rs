/*
 * Description: Error types raised across the tracing client's public boundary.
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

//! Error types raised across the tracing client's public boundary.
//!
//! Internal degradations (a message to a terminated aggregator, a mutation for a span the
//! aggregator has already forgotten, a reporter that failed) never appear here: those are logged
//! and swallowed at the point they occur, per the "a tracing library must never crash its host"
//! principle. Only misuse at the API boundary produces a value of these types.

use std::fmt;

/// Which kind of id a [`IdParseError`] failed to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
  /// A 128-bit (or 64-bit compatibility) trace id.
  Trace,
  /// A 64-bit span id.
  Span,
}

impl fmt::Display for IdKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Trace => write!(f, "trace id"),
      Self::Span => write!(f, "span id"),
    }
  }
}

/// Failure to parse a textual id.
///
/// Returned by [`crate::id::parse_trace`]/[`crate::id::parse_span`]; never panics, and never
/// tolerates whitespace, mixed case, or off-by-one lengths.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} must be exactly the allowed number of lower-case hex characters, got {input:?}")]
pub struct IdParseError {
  /// The kind of id that failed to parse.
  pub kind: IdKind,
  /// The offending input.
  pub input: String,
}

/// Errors raised to the caller at the client API boundary.
///
/// These are the only errors this crate ever returns from the functional or contextual API;
/// every other failure mode described in the error handling design (missing span, missing
/// aggregator, reporter failure, timeout) degrades silently.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TraceError {
  /// `type` was not one of `client` or `server`.
  #[error("span kind must be `client` or `server`, got {0:?}")]
  InvalidKind(String),

  /// `remote` was supplied but was not a well-formed [`crate::model::Endpoint`].
  #[error("remote endpoint must carry an ip, a service name, or both")]
  InvalidRemoteEndpoint,

  /// A textual id failed to parse.
  #[error(transparent)]
  IdParse(#[from] IdParseError),

  /// The contextual API was used with no [`crate::id::Id`] present in task-local state, and the
  /// configured [`crate::context::DebugContextPolicy`] is `Raise`.
  #[error("no trace context is present in this task")]
  MissingContext,
}
