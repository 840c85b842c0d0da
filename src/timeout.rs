/*
 * Description: Synchronous and asynchronous trace timeout policies.
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

//! What happens to a trace's spans when its aggregator's TTL expires.
//!
//! These are pure functions over [`TraceState`], kept separate from [`crate::aggregator`] so the
//! policy itself — which has no direct corpus analog and is transcribed straight from the design
//! — can be tested in isolation from the actor machinery that invokes it.

use crate::model::{Annotation, TraceState};
use crate::timestamp::Timestamp;

/// Apply the timeout policy to `state` as of instant `at`, mutating it in place so it is ready
/// for conversion and reporting.
pub fn apply_timeout(state: &mut TraceState, at: Timestamp) {
  if state.is_async {
    apply_async_timeout(state, at);
  } else {
    apply_synchronous_timeout(state, at);
  }
}

/// Every unfinished span gets `end_timestamp = at` and a `timeout` event annotation at `at`
/// carrying the local endpoint; the trace's own `end_timestamp` is set to `at`.
fn apply_synchronous_timeout(state: &mut TraceState, at: Timestamp) {
  let local_endpoint = state.config.local_endpoint.clone();
  for span in state.spans.values_mut() {
    if span.end_timestamp.is_none() {
      span.end_timestamp = Some(at);
      span.annotations.insert(
        0,
        Annotation {
          timestamp: at,
          value: "timeout".to_string(),
          endpoint: Some(local_endpoint.clone()),
        },
      );
    }
  }
  state.end_timestamp = Some(at);
}

fn apply_async_timeout(state: &mut TraceState, at: Timestamp) {
  if !state.has_child_spans() {
    let close_at = state.last_activity;
    if let Some(root) = state.spans.get_mut(&state.root_span_id) {
      root.end_timestamp = Some(close_at);
    }
    state.end_timestamp = Some(close_at);
    return;
  }

  if state.all_children_finished() {
    let close_at = state.max_child_end_timestamp().unwrap_or(at);
    if let Some(root) = state.spans.get_mut(&state.root_span_id) {
      root.end_timestamp = Some(close_at);
    }
    state.end_timestamp = Some(close_at);
    return;
  }

  apply_synchronous_timeout(state, at);
}
